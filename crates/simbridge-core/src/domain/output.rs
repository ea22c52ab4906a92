//! Resolution of configured output mappings against the catalog.
//!
//! A configured mapping only names a catalog identifier and the simulator
//! expressions feeding it; the panel-side address, bit mask, and buffer
//! length always come from the catalog.  Resolution runs once at startup
//! and freezes the mapping kind: a resolved mapping never changes from Bit
//! to String (or back) at runtime.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::catalog::Catalog;
use super::format::{FitSpec, FormatConfig, TextStyle};

/// Error produced while resolving one configured output mapping.
///
/// Carries enough context to point the user at the offending mapping.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("output mapping '{0}': identifier not found in any loaded catalog")]
    UnknownIdentifier(String),

    #[error("output mapping '{0}': catalog entry has no string output, but a string mapping was requested")]
    NoTextOutput(String),

    #[error("output mapping '{0}': catalog entry has no masked integer output")]
    NoIntegerOutput(String),

    #[error("output mapping '{0}': bit mapping requires a source expression")]
    MissingExpression(String),

    #[error("output mapping '{0}': string mapping has no sources")]
    MissingSources(String),
}

/// Requested mapping kind; normally inferred, may be forced via config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Bit,
    String,
}

/// One source feeding a string mapping, as written in config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub expr: String,
    /// Marks a remote expression as string-valued (read via the string
    /// batch instead of the numeric batch).
    #[serde(default)]
    pub string: bool,
}

/// User-facing output mapping record, handed over by the config collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMappingConfig {
    /// Catalog identifier of the panel control.
    pub name: String,
    /// Name of the transport this output is published on.
    pub target: String,
    /// Numeric source expression for bit mappings (or a single-source
    /// shorthand for string mappings).
    #[serde(default)]
    pub expr: Option<String>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub invert: bool,
    #[serde(default)]
    pub mode: Option<OutputMode>,
    #[serde(default)]
    pub format: Option<FormatConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

fn default_threshold() -> f64 {
    0.5
}

/// One resolved source of a string mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSource {
    /// Config literal inserted verbatim (escapes honoured at render time).
    Literal(String),
    /// Remote numeric expression.
    Number(String),
    /// Remote string expression.
    Text(String),
}

impl OutputSource {
    fn classify(cfg: &SourceConfig) -> Self {
        // Remote-API expressions start with '(' after trimming; everything
        // else is a literal and keeps its exact whitespace.
        let trimmed = cfg.expr.trim();
        if trimmed.starts_with('(') {
            if cfg.string {
                OutputSource::Text(trimmed.to_string())
            } else {
                OutputSource::Number(trimmed.to_string())
            }
        } else {
            OutputSource::Literal(cfg.expr.clone())
        }
    }

    /// The remote expression, when this source is one.
    pub fn expression(&self) -> Option<(&str, bool)> {
        match self {
            OutputSource::Literal(_) => None,
            OutputSource::Number(e) => Some((e, false)),
            OutputSource::Text(e) => Some((e, true)),
        }
    }
}

/// Runtime form of a resolved string mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedText {
    pub max_len: usize,
    pub style: TextStyle,
    pub fit: FitSpec,
    pub sources: Vec<OutputSource>,
}

/// The frozen kind of a resolved output mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedKind {
    Bit {
        mask: u16,
        threshold: f64,
        invert: bool,
        expr: String,
    },
    Text(ResolvedText),
}

/// Immutable, catalog-backed form of a configured output, built once at
/// startup and evaluated every poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOutput {
    pub name: String,
    pub target: String,
    pub address: u16,
    pub kind: ResolvedKind,
}

impl ResolvedOutput {
    /// Resolves `config` against `catalog`.
    ///
    /// The mapping is a string mapping when the config asks for one (mode
    /// or format block present) or when the catalog exposes only a string
    /// output for the identifier; otherwise it is a bit mapping over the
    /// catalog's masked integer output.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] naming the mapping when the identifier is
    /// unknown, the catalog lacks the required output kind, or a required
    /// config field is absent.
    pub fn resolve(config: &OutputMappingConfig, catalog: &Catalog) -> Result<Self, ResolveError> {
        let entry = catalog
            .get(&config.name)
            .ok_or_else(|| ResolveError::UnknownIdentifier(config.name.clone()))?;

        let wants_text = config.mode == Some(OutputMode::String)
            || config.format.is_some()
            || (entry.integer_output().is_none() && entry.text_output().is_some());

        if wants_text {
            let (address, max_len) = entry
                .text_output()
                .ok_or_else(|| ResolveError::NoTextOutput(config.name.clone()))?;

            let mut sources: Vec<OutputSource> =
                config.sources.iter().map(OutputSource::classify).collect();
            if sources.is_empty() {
                if let Some(expr) = &config.expr {
                    sources.push(OutputSource::classify(&SourceConfig {
                        expr: expr.clone(),
                        string: false,
                    }));
                }
            }
            if sources.is_empty() {
                return Err(ResolveError::MissingSources(config.name.clone()));
            }

            let format = config.format.clone().unwrap_or_default();
            Ok(Self {
                name: config.name.clone(),
                target: config.target.clone(),
                address,
                kind: ResolvedKind::Text(ResolvedText {
                    max_len,
                    style: format.style(),
                    fit: format.fit(),
                    sources,
                }),
            })
        } else {
            let (address, mask, _shift) = entry
                .integer_output()
                .ok_or_else(|| ResolveError::NoIntegerOutput(config.name.clone()))?;
            let expr = config
                .expr
                .clone()
                .ok_or_else(|| ResolveError::MissingExpression(config.name.clone()))?;
            Ok(Self {
                name: config.name.clone(),
                target: config.target.clone(),
                address,
                kind: ResolvedKind::Bit {
                    mask,
                    threshold: config.threshold,
                    invert: config.invert,
                    expr: expr.trim().to_string(),
                },
            })
        }
    }

    /// Iterates the remote expressions this mapping reads, with a flag for
    /// string-valued ones.
    pub fn expressions(&self) -> Vec<(&str, bool)> {
        match &self.kind {
            ResolvedKind::Bit { expr, .. } => vec![(expr.as_str(), false)],
            ResolvedKind::Text(text) => text
                .sources
                .iter()
                .filter_map(OutputSource::expression)
                .collect(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
