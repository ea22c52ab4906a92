//! Hardware-facing wire protocol: export frames and write-access records.

pub mod frame;

pub use frame::{build_frame, decode_frame, FrameError, WriteRecord, SYNC_PATTERN};
