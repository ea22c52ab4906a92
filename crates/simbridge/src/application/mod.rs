//! Application layer: the bridge's runtime use cases.
//!
//! Use cases here orchestrate `simbridge_core` domain logic and depend on
//! abstractions (the [`remote_api::RemoteApi`] trait, channels, the
//! application-owned export queues) rather than concrete sockets or serial
//! devices, so everything in this layer is unit-testable with recording
//! doubles.
//!
//! # Sub-modules
//!
//! - **`input_engine`** – Processes every inbound hardware line: edge
//!   suppression, mapping selection, filtering, linear mapping, and action
//!   construction.  Runs on every knob turn and switch flip.
//!
//! - **`orchestrator`** – The steady-state poll loop: batched remote reads,
//!   de-duplicated publication through the word cache, backoff on failure.
//!
//! - **`action_worker`** – Drains the input-action queue and dispatches each
//!   action to the simulator, with optional verification read-back.
//!
//! - **`remote_api`** – The trait seam to the simulator plus the typed
//!   error taxonomy and the script-to-trigger rewrite.

pub mod action_worker;
pub mod input_engine;
pub mod orchestrator;
pub mod remote_api;
