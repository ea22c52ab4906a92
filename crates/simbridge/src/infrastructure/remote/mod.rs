//! HTTP adapter for the simulator's remote-variable web API.

pub mod client;

pub use client::RemoteClient;
