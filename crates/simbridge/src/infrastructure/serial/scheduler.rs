//! Fixed-rate export scheduler, one task per transport.
//!
//! Every tick drains the transport's export queue, encodes one frame, and
//! hands it to the writer thread.  A tick with no pending records still
//! sends a frame: sync-only, plus the keepalive register when keepalive is
//! enabled, so the panel can detect a dead link from the cadence alone.
//! Ticks missed while the writer stalls are skipped, not replayed, which
//! keeps the frame cadence instead of bursting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use simbridge_core::{build_frame, WriteRecord};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::application::orchestrator::ExportQueue;
use crate::infrastructure::serial::SerialTransport;

/// Register the keepalive marker is written to; outside every panel's
/// mapped address space.
pub const KEEPALIVE_ADDRESS: u16 = 0x7FFE;

/// Fixed keepalive payload value.
pub const KEEPALIVE_VALUE: u16 = 0xA55A;

/// Default frame period, about 30 frames per second.
pub const DEFAULT_EXPORT_PERIOD: Duration = Duration::from_micros(33_333);

/// Spawns the export tick task for one transport.
pub fn spawn_export_scheduler(
    transport: Arc<SerialTransport>,
    queue: ExportQueue,
    period: Duration,
    keepalive: bool,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while running.load(Ordering::SeqCst) {
            ticker.tick().await;
            let mut records = queue.drain();
            if keepalive {
                records.push(WriteRecord::register(KEEPALIVE_ADDRESS, KEEPALIVE_VALUE));
            }
            // Sync-only when empty; the frame cadence itself is the signal.
            transport.enqueue_write(build_frame(&records));
        }
        debug!(name = transport.name(), "export scheduler stopped");
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
