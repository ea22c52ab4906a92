//! # simbridge-core
//!
//! Shared library for simbridge containing the hardware wire codec, the
//! control-catalog data model, output-mapping resolution and fixed-width
//! formatting, and the input-mapping math (linear maps, filters, action
//! templates).
//!
//! This crate is pure: it has no dependency on tokio, sockets, serial
//! devices, or the file system.  Everything stateful (threads, queues,
//! caches, HTTP) lives in the `simbridge` daemon crate; this crate only
//! provides the types and functions those components agree on:
//!
//! - **`protocol`** – How bytes travel to the panels.  A periodic export
//!   frame is a 4-byte sync pattern followed by (address, length, payload)
//!   write-access records, all little-endian.
//!
//! - **`domain`** – The catalog model (identifier → register/string-buffer
//!   outputs and input interfaces), resolution of configured output
//!   mappings into immutable runtime form, the string-rendering pipeline,
//!   and the input side: match tokens, deadband/rate filters, linear maps,
//!   and action construction with placeholder substitution.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `simbridge_core::WriteRecord` instead of the full module path.
pub use domain::catalog::{Catalog, CatalogEntry, CatalogInput, CatalogOutput, InputInterface};
pub use domain::format::{
    bit_state, render_text, FitSpec, FormatConfig, SourceValue, TextStyle,
};
pub use domain::input::{
    apply_linear, build_action, ActionConfig, FilterConfig, InputAction, InputMappingConfig,
    LinearMapConfig, MappedSample,
};
pub use domain::output::{
    OutputMappingConfig, OutputSource, ResolveError, ResolvedKind, ResolvedOutput, ResolvedText,
    SourceConfig,
};
pub use domain::RoundMode;
pub use protocol::frame::{build_frame, decode_frame, FrameError, WriteRecord, SYNC_PATTERN};
