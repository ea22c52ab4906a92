//! Binary codec for the panel export frame.
//!
//! Wire format:
//! ```text
//! [sync:4 = 0x55 0x55 0x55 0x55] ([addr:2 LE][payload_len:2 LE][payload:N])*
//! ```
//! A frame carries zero or more write-access records; a sync-only frame is
//! valid and doubles as a link heartbeat.  Byte order and field widths are
//! fixed by the hardware decoders and must never change.

use thiserror::Error;

/// The fixed 4-byte synchronisation pattern opening every export frame.
pub const SYNC_PATTERN: [u8; 4] = [0x55, 0x55, 0x55, 0x55];

/// Errors that can occur while constructing or decoding frames.
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    /// A record payload exceeds the 16-bit length field.
    #[error("payload of {0} bytes exceeds the 65535-byte record limit")]
    PayloadTooLarge(usize),

    /// The frame does not begin with the sync pattern.
    #[error("missing or corrupt sync pattern")]
    BadSync,

    /// The byte slice ended in the middle of a record.
    #[error("truncated frame: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },
}

/// One (address, payload) write-access unit inside an export frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// Target register or string-buffer base address on the panel.
    pub address: u16,
    /// Raw payload bytes; length is encoded on the wire as `u16` LE.
    pub payload: Vec<u8>,
}

impl WriteRecord {
    /// Builds a record carrying one 16-bit register value (2-byte LE payload).
    pub fn register(address: u16, value: u16) -> Self {
        Self {
            address,
            payload: value.to_le_bytes().to_vec(),
        }
    }

    /// Builds a record carrying an arbitrary byte payload.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PayloadTooLarge`] if `payload` exceeds 65535
    /// bytes, the maximum the 2-byte length field can express.
    pub fn bytes(address: u16, payload: Vec<u8>) -> Result<Self, FrameError> {
        if payload.len() > u16::MAX as usize {
            return Err(FrameError::PayloadTooLarge(payload.len()));
        }
        Ok(Self { address, payload })
    }

    /// Encoded size of this record on the wire.
    pub fn encoded_len(&self) -> usize {
        4 + self.payload.len()
    }
}

/// Encodes one export frame: sync pattern followed by `records` in order.
pub fn build_frame(records: &[WriteRecord]) -> Vec<u8> {
    let body: usize = records.iter().map(WriteRecord::encoded_len).sum();
    let mut buf = Vec::with_capacity(SYNC_PATTERN.len() + body);
    buf.extend_from_slice(&SYNC_PATTERN);
    for record in records {
        buf.extend_from_slice(&record.address.to_le_bytes());
        buf.extend_from_slice(&(record.payload.len() as u16).to_le_bytes());
        buf.extend_from_slice(&record.payload);
    }
    buf
}

/// Decodes an export frame back into its record sequence.
///
/// Primarily used by tests and wire diagnostics; the panels themselves are
/// the production decoders.
///
/// # Errors
///
/// Returns [`FrameError::BadSync`] if the sync pattern is absent and
/// [`FrameError::Truncated`] if the bytes end mid-record.
pub fn decode_frame(bytes: &[u8]) -> Result<Vec<WriteRecord>, FrameError> {
    if bytes.len() < SYNC_PATTERN.len() || bytes[..4] != SYNC_PATTERN {
        return Err(FrameError::BadSync);
    }

    let mut records = Vec::new();
    let mut off = SYNC_PATTERN.len();
    while off < bytes.len() {
        if bytes.len() < off + 4 {
            return Err(FrameError::Truncated {
                needed: off + 4,
                available: bytes.len(),
            });
        }
        let address = u16::from_le_bytes([bytes[off], bytes[off + 1]]);
        let len = u16::from_le_bytes([bytes[off + 2], bytes[off + 3]]) as usize;
        let start = off + 4;
        if bytes.len() < start + len {
            return Err(FrameError::Truncated {
                needed: start + len,
                available: bytes.len(),
            });
        }
        records.push(WriteRecord {
            address,
            payload: bytes[start..start + len].to_vec(),
        });
        off = start + len;
    }
    Ok(records)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
