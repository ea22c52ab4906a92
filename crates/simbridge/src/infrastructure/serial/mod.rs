//! Serial panel transports.
//!
//! One [`SerialTransport`] per configured panel link.  Each transport owns
//! two dedicated threads so synchronous serial I/O never blocks the Tokio
//! runtime:
//!
//! - the **writer** thread drains a byte queue and writes complete export
//!   frames to the device;
//! - the **reader** thread accumulates bytes, splits them on newlines, and
//!   forwards each non-empty line to the input engine's channel.
//!
//! Both threads exit when the shutdown flag clears or the device errors
//! out; a dead transport drops enqueued writes instead of buffering them
//! forever.

pub mod scheduler;

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

/// One complete inbound line from a panel, tagged with its transport name.
#[derive(Debug, Clone, PartialEq)]
pub struct LineEvent {
    pub transport: String,
    pub line: String,
}

/// Byte counters exposed for periodic status logging.
#[derive(Debug, Default)]
pub struct TransportStats {
    pub tx_bytes: AtomicU64,
    pub rx_bytes: AtomicU64,
}

/// Error type for serial transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The serial device could not be opened.
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// The opened port handle could not be duplicated for the reader.
    #[error("failed to clone serial port {port}: {source}")]
    Clone {
        port: String,
        #[source]
        source: serialport::Error,
    },
}

/// Handle to one running panel link.
#[derive(Clone)]
pub struct SerialTransport {
    name: String,
    write_tx: mpsc::Sender<Vec<u8>>,
    alive: Arc<AtomicBool>,
    stats: Arc<TransportStats>,
}

impl SerialTransport {
    /// Opens the named serial device and starts the transport threads.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the device cannot be opened or its
    /// handle cannot be duplicated for the reader thread.
    pub fn open(
        name: &str,
        port: &str,
        baud: u32,
        line_tx: tokio::sync::mpsc::UnboundedSender<LineEvent>,
        running: Arc<AtomicBool>,
    ) -> Result<Self, TransportError> {
        let writer = serialport::new(port, baud)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|source| TransportError::Open {
                port: port.to_string(),
                source,
            })?;
        let reader = writer.try_clone().map_err(|source| TransportError::Clone {
            port: port.to_string(),
            source,
        })?;
        info!(name, port, baud, "serial transport opened");
        Ok(Self::start(
            name,
            Box::new(writer),
            Box::new(reader),
            line_tx,
            running,
        ))
    }

    /// Starts the transport threads over arbitrary reader/writer halves.
    ///
    /// Split from [`open`](Self::open) so tests can drive the threads with
    /// in-memory doubles instead of real devices.
    pub fn start(
        name: &str,
        writer: Box<dyn Write + Send>,
        reader: Box<dyn Read + Send>,
        line_tx: tokio::sync::mpsc::UnboundedSender<LineEvent>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let (write_tx, write_rx) = mpsc::channel::<Vec<u8>>();
        let alive = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(TransportStats::default());

        {
            let name = name.to_string();
            let alive = alive.clone();
            let stats = stats.clone();
            let running = running.clone();
            std::thread::Builder::new()
                .name(format!("serial-write-{name}"))
                .spawn(move || {
                    writer_loop(&name, writer, write_rx, alive, stats, running);
                })
                .expect("failed to spawn serial writer thread");
        }
        {
            let name = name.to_string();
            let alive = alive.clone();
            let stats = stats.clone();
            std::thread::Builder::new()
                .name(format!("serial-read-{name}"))
                .spawn(move || {
                    reader_loop(&name, reader, line_tx, alive, stats, running);
                })
                .expect("failed to spawn serial reader thread");
        }

        Self {
            name: name.to_string(),
            write_tx,
            alive,
            stats,
        }
    }

    /// Queues one encoded frame for the writer thread.
    ///
    /// Writes to a dead transport are dropped; the scheduler keeps ticking
    /// and delivery resumes if the link is reopened.
    pub fn enqueue_write(&self, bytes: Vec<u8>) {
        if !self.alive.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.write_tx.send(bytes);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }
}

/// Writer thread body: drain the queue, write each frame fully, flush.
fn writer_loop(
    name: &str,
    mut writer: Box<dyn Write + Send>,
    write_rx: mpsc::Receiver<Vec<u8>>,
    alive: Arc<AtomicBool>,
    stats: Arc<TransportStats>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) && alive.load(Ordering::SeqCst) {
        let first = match write_rx.recv_timeout(Duration::from_millis(250)) {
            Ok(bytes) => bytes,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        let mut batch = vec![first];
        while let Ok(bytes) = write_rx.try_recv() {
            batch.push(bytes);
        }

        for bytes in batch {
            if let Err(e) = writer.write_all(&bytes) {
                error!(name, "serial write failed: {e}");
                alive.store(false, Ordering::SeqCst);
                return;
            }
            stats.tx_bytes.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        }
        if let Err(e) = writer.flush() {
            error!(name, "serial flush failed: {e}");
            alive.store(false, Ordering::SeqCst);
            return;
        }
    }
    debug!(name, "serial writer stopped");
}

/// Reader thread body: accumulate bytes, emit complete trimmed lines.
fn reader_loop(
    name: &str,
    mut reader: Box<dyn Read + Send>,
    line_tx: tokio::sync::mpsc::UnboundedSender<LineEvent>,
    alive: Arc<AtomicBool>,
    stats: Arc<TransportStats>,
    running: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 256];
    let mut pending: Vec<u8> = Vec::new();

    while running.load(Ordering::SeqCst) && alive.load(Ordering::SeqCst) {
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                warn!(name, "serial link closed by device");
                alive.store(false, Ordering::SeqCst);
                break;
            }
            Ok(n) => n,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                error!(name, "serial read failed: {e}");
                alive.store(false, Ordering::SeqCst);
                break;
            }
        };

        stats.rx_bytes.fetch_add(n as u64, Ordering::Relaxed);
        pending.extend_from_slice(&buf[..n]);

        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if line.is_empty() {
                continue;
            }
            if line_tx
                .send(LineEvent {
                    transport: name.to_string(),
                    line,
                })
                .is_err()
            {
                // Receiver dropped – application is shutting down.
                return;
            }
        }
    }
    debug!(name, "serial reader stopped");
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Write half that records everything written to it.
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Read half that yields a fixed byte script then times out forever.
    struct ScriptedReader {
        chunks: Vec<Vec<u8>>,
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.chunks.is_empty() {
                std::thread::sleep(Duration::from_millis(5));
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "idle"));
            }
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    fn idle_reader() -> Box<dyn Read + Send> {
        Box::new(ScriptedReader { chunks: vec![] })
    }

    #[test]
    fn test_enqueued_frames_reach_the_writer() {
        let sink = SharedSink::default();
        let (line_tx, _line_rx) = tokio::sync::mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));
        let transport = SerialTransport::start(
            "panel1",
            Box::new(sink.clone()),
            idle_reader(),
            line_tx,
            running.clone(),
        );

        transport.enqueue_write(vec![0x55, 0x55, 0x55, 0x55]);
        std::thread::sleep(Duration::from_millis(100));
        running.store(false, Ordering::SeqCst);

        assert_eq!(*sink.0.lock().unwrap(), vec![0x55, 0x55, 0x55, 0x55]);
        assert_eq!(transport.stats().tx_bytes.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_reader_splits_lines_across_chunks() {
        let reader = ScriptedReader {
            chunks: vec![b"GEAR_SW 1\nTHROT".to_vec(), b"TLE 512\n\n".to_vec()],
        };
        let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));
        let _transport = SerialTransport::start(
            "panel1",
            Box::new(SharedSink::default()),
            Box::new(reader),
            line_tx,
            running.clone(),
        );

        std::thread::sleep(Duration::from_millis(100));
        running.store(false, Ordering::SeqCst);

        assert_eq!(
            line_rx.try_recv().ok(),
            Some(LineEvent {
                transport: "panel1".to_string(),
                line: "GEAR_SW 1".to_string()
            })
        );
        assert_eq!(
            line_rx.try_recv().ok(),
            Some(LineEvent {
                transport: "panel1".to_string(),
                line: "THROTTLE 512".to_string()
            })
        );
        // The blank line is dropped.
        assert!(line_rx.try_recv().is_err());
    }

    #[test]
    fn test_device_eof_marks_transport_dead() {
        struct Eof;
        impl Read for Eof {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Ok(0)
            }
        }
        let (line_tx, _line_rx) = tokio::sync::mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));
        let transport = SerialTransport::start(
            "panel1",
            Box::new(SharedSink::default()),
            Box::new(Eof),
            line_tx,
            running.clone(),
        );

        std::thread::sleep(Duration::from_millis(100));
        assert!(!transport.is_alive());
        // Writes to a dead transport are dropped without panicking.
        transport.enqueue_write(vec![1, 2, 3]);
        running.store(false, Ordering::SeqCst);
    }

    #[test]
    fn test_carriage_returns_are_trimmed() {
        let reader = ScriptedReader {
            chunks: vec![b"ENC_A -1\r\n".to_vec()],
        };
        let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));
        let _transport = SerialTransport::start(
            "panel1",
            Box::new(SharedSink::default()),
            Box::new(reader),
            line_tx,
            running.clone(),
        );

        std::thread::sleep(Duration::from_millis(100));
        running.store(false, Ordering::SeqCst);

        assert_eq!(line_rx.try_recv().unwrap().line, "ENC_A -1");
    }
}
