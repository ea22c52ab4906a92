//! Infrastructure layer for the bridge daemon.
//!
//! Contains device- and OS-facing adapters: serial transports and the
//! export scheduler, the HTTP remote-API client, and file-system storage
//! for configuration and persisted control state.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `simbridge_core`, but MUST NOT be imported by the `application` or
//! domain layers.

pub mod remote;
pub mod serial;
pub mod storage;
