//! The trait seam to the flight-simulation automation host, its error
//! taxonomy, and the script-to-trigger rewrite.
//!
//! The orchestrator and the action worker depend only on [`RemoteApi`];
//! the reqwest implementation lives in `infrastructure::remote`, and tests
//! inject recording doubles.

use std::collections::HashMap;

use async_trait::async_trait;
use simbridge_core::InputAction;
use thiserror::Error;

/// Classification of a remote-API failure.
///
/// Every failure mode of every operation collapses into exactly one of
/// these kinds; callers retry based on the kind and never see a panic or
/// an unhandled transport fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    /// Non-success HTTP status.
    Http,
    /// Response body could not be decoded.
    Parse,
    /// Connection-level failure (refused, reset, DNS).
    Network,
    /// The per-call timeout elapsed.
    Timeout,
    /// Unexpected client-side fault.
    Exception,
    /// Transport-level success whose body reports a host-side failure.
    Aao,
    /// The action itself was invalid before any network activity.
    Input,
}

/// Typed failure returned by every [`RemoteApi`] operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind:?} error: {message}")]
pub struct RemoteError {
    kind: RemoteErrorKind,
    message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> RemoteErrorKind {
        self.kind
    }

    /// Stable identity used for per-signature log rate limiting.
    pub fn signature(&self) -> String {
        format!("{:?}:{}", self.kind, self.message)
    }
}

/// Batched remote-variable access and single-action dispatch.
///
/// Contract shared by all implementations:
/// - empty expression batches succeed with an empty map and no network
///   call;
/// - `send_action` dispatches exactly one directive; the four action kinds
///   are mutually exclusive per call;
/// - all failures come back as [`RemoteError`], never as panics.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Reads a batch of numeric expressions, returning expression → value.
    async fn read_numbers(&self, exprs: &[String]) -> Result<HashMap<String, f64>, RemoteError>;

    /// Reads a batch of string expressions, returning expression → text.
    async fn read_strings(&self, exprs: &[String])
        -> Result<HashMap<String, String>, RemoteError>;

    /// Dispatches one input action.
    async fn send_action(&self, action: &InputAction) -> Result<(), RemoteError>;
}

// ── Script-to-trigger rewrite ─────────────────────────────────────────────────

/// Rewrites a script of the shape `[number ](>K:EVENT)` — an optional
/// numeric value followed by exactly one parenthesized key-event directive
/// — into the cheaper trigger form.
///
/// Returns `None` when the script does not match the strict pattern; such
/// scripts are sent verbatim.
pub fn rewrite_script(code: &str) -> Option<InputAction> {
    let trimmed = code.trim();
    let open = trimmed.find('(')?;

    let prefix = trimmed[..open].trim();
    let value = if prefix.is_empty() {
        1.0
    } else {
        prefix.parse::<f64>().ok()?
    };

    let directive = &trimmed[open..];
    if !directive.ends_with(')') {
        return None;
    }
    let inner = &directive[1..directive.len() - 1];
    if inner.contains('(') || inner.contains(')') {
        return None;
    }

    // Only key-event directives have a trigger equivalent.
    let name = inner.strip_prefix('>').unwrap_or(inner);
    if !name.starts_with("K:") || name.len() <= 2 {
        return None;
    }

    Some(InputAction::Trigger {
        name: name.to_string(),
        value,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
