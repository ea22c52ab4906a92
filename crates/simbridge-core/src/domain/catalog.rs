//! The control catalog: read-only hardware metadata the bridge consumes.
//!
//! A catalog entry describes, for one panel control identifier, where its
//! outputs live on the panel (16-bit registers with bit masks, or
//! fixed-length string buffers) and what kind of physical input it is.
//! Parsing catalog description files into these structures is an external
//! collaborator's job; the core only ever sees the typed records and treats
//! them as immutable for the lifetime of the process.

use std::collections::HashMap;

/// One output location exposed by a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogOutput {
    /// A masked bit field inside a 16-bit register.
    Integer { address: u16, mask: u16, shift: u8 },
    /// A fixed-length character buffer.
    Text { address: u16, max_length: usize },
}

/// Physical interface kind of a catalog input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputInterface {
    Switch,
    Button,
    Rotary,
    Analog,
}

/// One input exposed by a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogInput {
    pub interface: InputInterface,
    /// Largest raw value the hardware reports for this input.
    pub max_value: u32,
}

/// All catalog metadata for one control identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub identifier: String,
    pub outputs: Vec<CatalogOutput>,
    pub inputs: Vec<CatalogInput>,
}

impl CatalogEntry {
    /// First masked integer output, if the entry has one.
    pub fn integer_output(&self) -> Option<(u16, u16, u8)> {
        self.outputs.iter().find_map(|o| match o {
            CatalogOutput::Integer { address, mask, shift } => Some((*address, *mask, *shift)),
            CatalogOutput::Text { .. } => None,
        })
    }

    /// First string-buffer output, if the entry has one.
    pub fn text_output(&self) -> Option<(u16, usize)> {
        self.outputs.iter().find_map(|o| match o {
            CatalogOutput::Text { address, max_length } => Some((*address, *max_length)),
            CatalogOutput::Integer { .. } => None,
        })
    }
}

/// Identifier-keyed view over the catalog entries of all loaded panels.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    entries: HashMap<String, CatalogEntry>,
}

impl Catalog {
    /// Builds the lookup from externally parsed entries.  On duplicate
    /// identifiers the first entry wins, matching file load order.
    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let mut map = HashMap::new();
        for entry in entries {
            map.entry(entry.identifier.clone()).or_insert(entry);
        }
        Self { entries: map }
    }

    pub fn get(&self, identifier: &str) -> Option<&CatalogEntry> {
        self.entries.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
