//! JSON catalog loader.
//!
//! The catalog file describes every panel control the daemon may be asked
//! to address: identifier, output locations (registers with masks, string
//! buffers), and input interfaces.  The file format lives here; the core
//! crate only sees the typed [`Catalog`] built from it.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use simbridge_core::{Catalog, CatalogEntry, CatalogInput, CatalogOutput, InputInterface};
use thiserror::Error;
use tracing::info;

/// Error type for catalog file loading.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("I/O error reading catalog at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct EntryRecord {
    identifier: String,
    #[serde(default)]
    outputs: Vec<OutputRecord>,
    #[serde(default)]
    inputs: Vec<InputRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum OutputRecord {
    Integer {
        address: u16,
        mask: u16,
        #[serde(default)]
        shift: u8,
    },
    Text {
        address: u16,
        max_length: usize,
    },
}

#[derive(Debug, Deserialize)]
struct InputRecord {
    interface: InterfaceRecord,
    #[serde(default = "default_max_value")]
    max_value: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum InterfaceRecord {
    Switch,
    Button,
    Rotary,
    Analog,
}

fn default_max_value() -> u32 {
    1
}

impl From<OutputRecord> for CatalogOutput {
    fn from(record: OutputRecord) -> Self {
        match record {
            OutputRecord::Integer { address, mask, shift } => {
                CatalogOutput::Integer { address, mask, shift }
            }
            OutputRecord::Text { address, max_length } => {
                CatalogOutput::Text { address, max_length }
            }
        }
    }
}

impl From<InputRecord> for CatalogInput {
    fn from(record: InputRecord) -> Self {
        CatalogInput {
            interface: match record.interface {
                InterfaceRecord::Switch => InputInterface::Switch,
                InterfaceRecord::Button => InputInterface::Button,
                InterfaceRecord::Rotary => InputInterface::Rotary,
                InterfaceRecord::Analog => InputInterface::Analog,
            },
            max_value: record.max_value,
        }
    }
}

/// Loads the catalog from a JSON file.
///
/// # Errors
///
/// Returns [`CatalogError::Io`] when the file cannot be read and
/// [`CatalogError::Parse`] when its JSON does not match the schema.
pub fn load_catalog(path: &Path) -> Result<Catalog, CatalogError> {
    let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let records: Vec<EntryRecord> = serde_json::from_str(&content)?;
    let catalog = Catalog::from_entries(records.into_iter().map(|record| CatalogEntry {
        identifier: record.identifier,
        outputs: record.outputs.into_iter().map(Into::into).collect(),
        inputs: record.inputs.into_iter().map(Into::into).collect(),
    }));
    info!(path = %path.display(), entries = catalog.len(), "catalog loaded");
    Ok(catalog)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
    [
        {
            "identifier": "MASTER_CAUTION",
            "outputs": [{"type": "integer", "address": 16, "mask": 2048, "shift": 11}]
        },
        {
            "identifier": "COM1_DISPLAY",
            "outputs": [{"type": "text", "address": 256, "max_length": 7}]
        },
        {
            "identifier": "GEAR_SW",
            "inputs": [{"interface": "switch"}]
        }
    ]
    "#;

    fn write_temp(tag: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("simbridge_cat_{tag}_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("catalog.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_sample_catalog_parses_all_entry_kinds() {
        let path = write_temp("sample", SAMPLE);
        let catalog = load_catalog(&path).expect("load");
        assert_eq!(catalog.len(), 3);
        assert_eq!(
            catalog.get("MASTER_CAUTION").unwrap().integer_output(),
            Some((16, 2048, 11))
        );
        assert_eq!(
            catalog.get("COM1_DISPLAY").unwrap().text_output(),
            Some((256, 7))
        );
        let gear = catalog.get("GEAR_SW").unwrap();
        assert_eq!(gear.inputs[0].interface, InputInterface::Switch);
        assert_eq!(gear.inputs[0].max_value, 1);
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let result = load_catalog(Path::new("/nonexistent/catalog.json"));
        assert!(matches!(result, Err(CatalogError::Io { .. })));
    }

    #[test]
    fn test_malformed_json_is_a_parse_error() {
        let path = write_temp("bad", "{ not json");
        let result = load_catalog(&path);
        assert!(matches!(result, Err(CatalogError::Parse(_))));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }
}
