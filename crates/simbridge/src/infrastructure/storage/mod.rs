//! File-system storage: daemon configuration, the control catalog, and the
//! persisted last-known control state.

pub mod catalog_file;
pub mod config;
pub mod laststate;
