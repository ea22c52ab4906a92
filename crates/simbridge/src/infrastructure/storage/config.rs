//! TOML configuration for the bridge daemon.
//!
//! The config file is passed on the command line (defaulting to
//! `simbridge.toml` in the working directory) and holds everything the
//! daemon wires at startup: general bridge behaviour, the remote host,
//! the serial transports, and the output/input mapping tables.
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return
//! value of `some_fn()` when absent from the file, so a minimal config
//! works on first run and older files survive new fields.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use simbridge_core::{InputMappingConfig, OutputMappingConfig};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub transports: Vec<TransportConfig>,
    #[serde(default)]
    pub outputs: Vec<OutputMappingConfig>,
    #[serde(default)]
    pub inputs: Vec<InputMappingConfig>,
    #[serde(default)]
    pub persist: PersistConfig,
}

/// General bridge behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    /// Poll cycle interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Export frame period in microseconds.
    #[serde(default = "default_export_period_us")]
    pub export_period_us: u64,
    /// Append a keepalive record to every export frame.
    #[serde(default = "default_true")]
    pub keepalive: bool,
    /// Suppress repeated integer arguments per (transport, identifier).
    #[serde(default = "default_true")]
    pub edge_suppression: bool,
    /// Abort startup on the first unresolvable output mapping instead of
    /// skipping it.
    #[serde(default)]
    pub stop_on_error: bool,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Path to the control catalog file.
    #[serde(default = "default_catalog_file")]
    pub catalog_file: String,
}

/// Remote host settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    /// Base URL of the remote-variable web API.
    #[serde(default = "default_remote_url")]
    pub url: String,
    /// Per-call HTTP timeout in milliseconds.
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
    /// Optional read-back performed after every dispatched action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<VerifyConfig>,
}

/// Verification read-back block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifyConfig {
    pub exprs: Vec<String>,
    #[serde(default = "default_verify_delay_ms")]
    pub delay_ms: u64,
}

/// One serial panel link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    /// Name output mappings refer to via `target`.
    pub name: String,
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

/// Last-state persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistConfig {
    /// Identifiers whose numeric reports are recorded.
    #[serde(default)]
    pub identifiers: Vec<String>,
    /// State file path.
    #[serde(default = "default_state_file")]
    pub file: String,
    /// Minimum seconds between flushes.
    #[serde(default = "default_flush_min_secs")]
    pub flush_min_secs: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_poll_interval_ms() -> u64 {
    50
}
fn default_export_period_us() -> u64 {
    33_333
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_catalog_file() -> String {
    "catalog.json".to_string()
}
fn default_remote_url() -> String {
    "http://127.0.0.1:43380/webapi".to_string()
}
fn default_remote_timeout_ms() -> u64 {
    2000
}
fn default_verify_delay_ms() -> u64 {
    100
}
fn default_baud() -> u32 {
    115_200
}
fn default_state_file() -> String {
    "simbridge-state.json".to_string()
}
fn default_flush_min_secs() -> u64 {
    10
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bridge: BridgeConfig::default(),
            remote: RemoteConfig::default(),
            transports: Vec::new(),
            outputs: Vec::new(),
            inputs: Vec::new(),
            persist: PersistConfig::default(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            export_period_us: default_export_period_us(),
            keepalive: default_true(),
            edge_suppression: default_true(),
            stop_on_error: false,
            log_level: default_log_level(),
            catalog_file: default_catalog_file(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: default_remote_url(),
            timeout_ms: default_remote_timeout_ms(),
            verify: None,
        }
    }
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            identifiers: Vec::new(),
            file: default_state_file(),
            flush_min_secs: default_flush_min_secs(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads the config from `path`, returning `AppConfig::default()` if the
/// file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_expected_timing() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.bridge.poll_interval_ms, 50);
        assert_eq!(cfg.bridge.export_period_us, 33_333);
        assert!(cfg.bridge.keepalive);
        assert!(cfg.bridge.edge_suppression);
        assert!(!cfg.bridge.stop_on_error);
    }

    #[test]
    fn test_default_config_has_no_mappings() {
        let cfg = AppConfig::default();
        assert!(cfg.transports.is_empty());
        assert!(cfg.outputs.is_empty());
        assert!(cfg.inputs.is_empty());
        assert!(cfg.persist.identifiers.is_empty());
    }

    #[test]
    fn test_deserialize_minimal_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_full_config_round_trips() {
        let toml_str = r#"
[bridge]
poll_interval_ms = 100
stop_on_error = true
log_level = "debug"

[remote]
url = "http://192.168.1.20:43380/webapi"
timeout_ms = 500

[remote.verify]
exprs = ["(A:GEAR HANDLE POSITION,Bool)"]
delay_ms = 50

[[transports]]
name = "pedestal"
port = "/dev/ttyUSB0"

[[outputs]]
name = "MASTER_CAUTION"
target = "pedestal"
expr = "(A:ANNUNCIATOR MASTER CAUTION,Bool)"

[[inputs]]
identifier = "GEAR_SW"
action = { kind = "trigger", name = "K:GEAR_SET" }

[persist]
identifiers = ["TRIM_WHEEL"]
flush_min_secs = 30
"#;
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize");
        assert_eq!(cfg.bridge.poll_interval_ms, 100);
        assert!(cfg.bridge.stop_on_error);
        assert_eq!(cfg.remote.timeout_ms, 500);
        assert_eq!(cfg.remote.verify.as_ref().unwrap().delay_ms, 50);
        assert_eq!(cfg.transports[0].baud, 115_200);
        assert_eq!(cfg.outputs[0].name, "MASTER_CAUTION");
        assert_eq!(cfg.inputs[0].identifier, "GEAR_SW");
        assert_eq!(cfg.persist.flush_min_secs, 30);

        let serialized = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: AppConfig = toml::from_str(&serialized).expect("round trip");
        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let path = Path::new("/nonexistent/path/simbridge.toml");
        let cfg = load_config(path).expect("missing file falls back to defaults");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_load_config_rejects_malformed_toml() {
        let dir = std::env::temp_dir().join(format!("simbridge_cfg_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        let result = load_config(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));

        std::fs::remove_dir_all(&dir).ok();
    }
}
