//! Input-mapping records and the math applied to matched hardware lines:
//! match tokens, rate/deadband filters, linear maps, and action templates
//! with placeholder substitution.
//!
//! The stateful per-line processing (edge suppression, analog state, the
//! action queue) lives in the daemon's input engine; this module holds the
//! pure pieces it evaluates.

use serde::{Deserialize, Serialize};

use super::RoundMode;

/// Match token of an input mapping: `"*"` accepts any numeric argument.
pub const WILDCARD: &str = "*";

/// Rate/deadband filter block of an input mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Minimum milliseconds between emissions for this mapping instance.
    #[serde(default)]
    pub rate_ms: u64,
    /// Minimum absolute change in the raw value before it is forwarded.
    #[serde(default)]
    pub deadband: Option<f64>,
}

/// Linear map block of an input mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearMapConfig {
    pub in_min: f64,
    pub in_max: f64,
    pub out_min: f64,
    pub out_max: f64,
    #[serde(default)]
    pub round: RoundMode,
    #[serde(default)]
    pub clamp: bool,
}

/// Action descriptor of an input mapping.
///
/// Required fields are optional at the type level on purpose: a mapping
/// whose action lacks them produces no action at runtime instead of
/// failing configuration parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ActionConfig {
    /// Fire a simulator event, optionally with a fixed value.
    Trigger {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        value: Option<f64>,
    },
    /// Write the mapped value into a simulator variable.
    SetVar {
        #[serde(default)]
        name: Option<String>,
    },
    /// Run a script; placeholders are substituted before dispatch.
    Script {
        #[serde(default)]
        code: Option<String>,
    },
    /// Press/release a virtual joystick button.
    Button {
        #[serde(default)]
        device: Option<u32>,
        #[serde(default)]
        channel: Option<u32>,
        #[serde(default)]
        button: Option<u32>,
        #[serde(default)]
        value: Option<f64>,
    },
}

/// User-facing input mapping record, handed over by the config collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMappingConfig {
    /// Hardware identifier the mapping listens to.
    pub identifier: String,
    /// Exact argument text to match, or [`WILDCARD`].
    #[serde(rename = "match", default = "default_match")]
    pub match_token: String,
    #[serde(default)]
    pub filter: Option<FilterConfig>,
    #[serde(default)]
    pub map: Option<LinearMapConfig>,
    pub action: ActionConfig,
}

fn default_match() -> String {
    WILDCARD.to_string()
}

impl InputMappingConfig {
    pub fn is_wildcard(&self) -> bool {
        self.match_token == WILDCARD
    }
}

/// The computed values of one accepted sample, fed into action templates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappedSample {
    /// Raw hardware value as parsed from the line.
    pub raw: f64,
    /// After the linear map (or `raw` when no map is configured).
    pub mapped: f64,
    /// Integer form of `mapped` per the map's rounding mode.
    pub mapped_int: i64,
    /// Normalised position in the linear map's input range, [0,1] when the
    /// map clamps.  Without a linear map there is no input range to
    /// normalise against, so [`MappedSample::identity`] leaves this equal
    /// to `raw`.
    pub norm: f64,
}

impl MappedSample {
    /// Identity sample for mappings without a linear map.  All fields
    /// derive from `raw` directly; in particular `norm` is `raw`, not a
    /// [0,1] position.
    pub fn identity(raw: f64) -> Self {
        Self {
            raw,
            mapped: raw,
            mapped_int: raw.round() as i64,
            norm: raw,
        }
    }
}

/// Applies the linear map to a raw value.
///
/// Returns `None` for a degenerate input range (`in_max == in_min`); the
/// caller discards the line in that case.
pub fn apply_linear(cfg: &LinearMapConfig, raw: f64) -> Option<MappedSample> {
    let span = cfg.in_max - cfg.in_min;
    if span == 0.0 {
        return None;
    }
    let mut norm = (raw - cfg.in_min) / span;
    if cfg.clamp {
        norm = norm.clamp(0.0, 1.0);
    }
    let mut mapped = cfg.out_min + norm * (cfg.out_max - cfg.out_min);
    if cfg.clamp {
        let (lo, hi) = if cfg.out_min <= cfg.out_max {
            (cfg.out_min, cfg.out_max)
        } else {
            (cfg.out_max, cfg.out_min)
        };
        mapped = mapped.clamp(lo, hi);
    }
    Some(MappedSample {
        raw,
        mapped,
        mapped_int: cfg.round.apply(mapped) as i64,
        norm,
    })
}

/// An ephemeral queued work item produced per matched line, consumed by the
/// remote-dispatch worker.
#[derive(Debug, Clone, PartialEq)]
pub enum InputAction {
    Trigger { name: String, value: f64 },
    SetVar { name: String, value: f64 },
    Script { code: String },
    Button { device: u32, channel: u32, button: u32, value: f64 },
}

/// Builds the action for one accepted sample.
///
/// Returns `None` when the descriptor lacks a required field; such lines
/// are dropped silently rather than reported as errors.
pub fn build_action(action: &ActionConfig, sample: &MappedSample) -> Option<InputAction> {
    match action {
        ActionConfig::Trigger { name, value } => Some(InputAction::Trigger {
            name: name.clone()?,
            value: value.unwrap_or(sample.mapped),
        }),
        ActionConfig::SetVar { name } => Some(InputAction::SetVar {
            name: name.clone()?,
            value: sample.mapped,
        }),
        ActionConfig::Script { code } => Some(InputAction::Script {
            code: substitute_placeholders(code.as_deref()?, sample),
        }),
        ActionConfig::Button {
            device,
            channel,
            button,
            value,
        } => Some(InputAction::Button {
            device: (*device)?,
            channel: (*channel)?,
            button: (*button)?,
            value: value.unwrap_or(sample.mapped),
        }),
    }
}

/// Substitutes `{raw}`, `{value}`, `{int}`, `{pct}` (alias of `{int}`), and
/// `{norm}` into script text, case-insensitively.
pub fn substitute_placeholders(code: &str, sample: &MappedSample) -> String {
    let mut out = String::with_capacity(code.len());
    let mut rest = code;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        match tail.find('}') {
            Some(close) => {
                let key = tail[1..close].to_ascii_lowercase();
                match key.as_str() {
                    "raw" => out.push_str(&trim_float(sample.raw)),
                    "value" => out.push_str(&trim_float(sample.mapped)),
                    "int" | "pct" => out.push_str(&sample.mapped_int.to_string()),
                    "norm" => out.push_str(&trim_float(sample.norm)),
                    _ => out.push_str(&tail[..close + 1]),
                }
                rest = &tail[close + 1..];
            }
            None => {
                out.push_str(tail);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

fn trim_float(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{v:.0}")
    } else {
        let mut s = format!("{v:.6}");
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
        s
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
