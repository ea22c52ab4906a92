//! reqwest implementation of the remote API.
//!
//! All reads are batched: one POST per poll cycle for the numeric
//! expressions and one for the string expressions.  Action dispatch is one
//! POST per action.  The automation host reports some failures inside a
//! 200 body rather than via status codes, so every success body is also
//! scanned for failure markers before it is trusted.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use simbridge_core::InputAction;
use tracing::debug;

use crate::application::remote_api::{rewrite_script, RemoteApi, RemoteError, RemoteErrorKind};

/// Failure markers the host embeds in otherwise-successful bodies.
const BODY_FAILURE_MARKERS: [&str; 4] = ["error", "exception", "not connected", "offline"];

// ── Wire shapes ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct VarQuery<'a> {
    var: &'a str,
}

#[derive(Debug, Deserialize)]
struct NumberReading {
    var: String,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct StringReading {
    var: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct TriggerRequest<'a> {
    evt: &'a str,
    value: f64,
}

#[derive(Debug, Serialize)]
struct SetVarRequest<'a> {
    var: &'a str,
    value: f64,
}

#[derive(Debug, Serialize)]
struct ScriptRequest<'a> {
    code: &'a str,
}

#[derive(Debug, Serialize)]
struct ButtonRequest {
    dev: u32,
    chn: u32,
    btn: u32,
    val: f64,
}

// ── Client ────────────────────────────────────────────────────────────────────

/// HTTP client for one remote host.
pub struct RemoteClient {
    base_url: String,
    http: reqwest::Client,
}

impl RemoteClient {
    /// Builds the client with a per-call timeout.
    ///
    /// # Errors
    ///
    /// Returns a [`RemoteError`] of kind `Exception` when the underlying
    /// HTTP client cannot be constructed.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::new(RemoteErrorKind::Exception, e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// POSTs `body` as JSON and returns the response body after status and
    /// failure-marker checks.
    async fn post_checked<T: Serialize>(&self, path: &str, body: &T) -> Result<String, RemoteError> {
        let url = format!("{}/{path}", self.base_url);
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            return Err(RemoteError::new(
                RemoteErrorKind::Http,
                format!("{path}: status {status}"),
            ));
        }
        if body_reports_failure(&text) {
            return Err(RemoteError::new(
                RemoteErrorKind::Aao,
                format!("{path}: host reported failure: {}", snippet(&text)),
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl RemoteApi for RemoteClient {
    async fn read_numbers(&self, exprs: &[String]) -> Result<HashMap<String, f64>, RemoteError> {
        if exprs.is_empty() {
            return Ok(HashMap::new());
        }
        let body: Vec<VarQuery<'_>> = exprs.iter().map(|e| VarQuery { var: e }).collect();
        let text = self.post_checked("getvars", &body).await?;
        let readings: Vec<NumberReading> = serde_json::from_str(&text)
            .map_err(|e| RemoteError::new(RemoteErrorKind::Parse, format!("getvars: {e}")))?;
        Ok(readings.into_iter().map(|r| (r.var, r.value)).collect())
    }

    async fn read_strings(
        &self,
        exprs: &[String],
    ) -> Result<HashMap<String, String>, RemoteError> {
        if exprs.is_empty() {
            return Ok(HashMap::new());
        }
        let body: Vec<VarQuery<'_>> = exprs.iter().map(|e| VarQuery { var: e }).collect();
        let text = self.post_checked("getstringvars", &body).await?;
        let readings: Vec<StringReading> = serde_json::from_str(&text)
            .map_err(|e| RemoteError::new(RemoteErrorKind::Parse, format!("getstringvars: {e}")))?;
        Ok(readings.into_iter().map(|r| (r.var, r.value)).collect())
    }

    async fn send_action(&self, action: &InputAction) -> Result<(), RemoteError> {
        // A script of the shape `[number ](>K:EVENT)` is dispatched as the
        // cheaper trigger form.
        let rewritten;
        let action = match action {
            InputAction::Script { code } => match rewrite_script(code) {
                Some(trigger) => {
                    debug!(code = %code, "script rewritten to trigger");
                    rewritten = trigger;
                    &rewritten
                }
                None => action,
            },
            _ => action,
        };

        match action {
            InputAction::Trigger { name, value } => {
                if name.is_empty() {
                    return Err(RemoteError::new(RemoteErrorKind::Input, "empty trigger name"));
                }
                self.post_checked("triggers", &[TriggerRequest { evt: name, value: *value }])
                    .await?;
            }
            InputAction::SetVar { name, value } => {
                if name.is_empty() {
                    return Err(RemoteError::new(RemoteErrorKind::Input, "empty variable name"));
                }
                self.post_checked("setvars", &[SetVarRequest { var: name, value: *value }])
                    .await?;
            }
            InputAction::Script { code } => {
                self.post_checked("scripts", &[ScriptRequest { code }]).await?;
            }
            InputAction::Button {
                device,
                channel,
                button,
                value,
            } => {
                self.post_checked(
                    "buttons",
                    &[ButtonRequest {
                        dev: *device,
                        chn: *channel,
                        btn: *button,
                        val: *value,
                    }],
                )
                .await?;
            }
        }
        Ok(())
    }
}

// ── Error mapping ─────────────────────────────────────────────────────────────

fn map_reqwest_error(e: reqwest::Error) -> RemoteError {
    let kind = if e.is_timeout() {
        RemoteErrorKind::Timeout
    } else if e.is_connect() {
        RemoteErrorKind::Network
    } else if e.is_decode() {
        RemoteErrorKind::Parse
    } else if e.is_status() {
        RemoteErrorKind::Http
    } else {
        RemoteErrorKind::Exception
    };
    RemoteError::new(kind, e.to_string())
}

/// Scans a transport-level success body for host-side failure markers.
fn body_reports_failure(body: &str) -> bool {
    let lowered = body.to_ascii_lowercase();
    BODY_FAILURE_MARKERS.iter().any(|m| lowered.contains(m))
}

fn snippet(body: &str) -> &str {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(120) {
        Some((i, _)) => &trimmed[..i],
        None => trimmed,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_failure_markers_are_case_insensitive() {
        assert!(body_reports_failure("ERROR: var not found"));
        assert!(body_reports_failure("Script Exception in line 3"));
        assert!(body_reports_failure("simulator Not Connected"));
        assert!(body_reports_failure("host is OFFLINE"));
        assert!(!body_reports_failure(r#"[{"var":"(A:X,Number)","value":1.0}]"#));
    }

    #[test]
    fn test_readings_parse_into_map_shape() {
        let text = r#"[{"var":"(A:COM ACTIVE FREQUENCY:1,MHz)","value":118.275}]"#;
        let readings: Vec<NumberReading> = serde_json::from_str(text).unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].var, "(A:COM ACTIVE FREQUENCY:1,MHz)");
        assert_eq!(readings[0].value, 118.275);
    }

    #[test]
    fn test_request_bodies_serialize_to_expected_shapes() {
        let trigger = serde_json::to_value([TriggerRequest {
            evt: "K:GEAR_UP",
            value: 1.0,
        }])
        .unwrap();
        assert_eq!(
            trigger,
            serde_json::json!([{"evt": "K:GEAR_UP", "value": 1.0}])
        );

        let button = serde_json::to_value([ButtonRequest {
            dev: 1,
            chn: 2,
            btn: 3,
            val: 1.0,
        }])
        .unwrap();
        assert_eq!(
            button,
            serde_json::json!([{"dev": 1, "chn": 2, "btn": 3, "val": 1.0}])
        );
    }

    #[tokio::test]
    async fn test_empty_batches_short_circuit_without_network() {
        // Unroutable base URL: a network attempt would error, an empty
        // batch must not.
        let client = RemoteClient::new("http://127.0.0.1:1/webapi", Duration::from_millis(50))
            .unwrap();
        assert_eq!(client.read_numbers(&[]).await.unwrap(), HashMap::new());
        assert_eq!(client.read_strings(&[]).await.unwrap(), HashMap::new());
    }

    #[tokio::test]
    async fn test_unreachable_host_maps_to_network_or_timeout() {
        let client = RemoteClient::new("http://127.0.0.1:1/webapi", Duration::from_millis(200))
            .unwrap();
        let err = client
            .read_numbers(&["(A:X,Number)".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            RemoteErrorKind::Network | RemoteErrorKind::Timeout
        ));
    }

    #[tokio::test]
    async fn test_empty_trigger_name_is_an_input_error() {
        let client = RemoteClient::new("http://127.0.0.1:1/webapi", Duration::from_millis(50))
            .unwrap();
        let err = client
            .send_action(&InputAction::Trigger {
                name: String::new(),
                value: 1.0,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), RemoteErrorKind::Input);
    }
}
