//! The steady-state poll loop.
//!
//! Each cycle reads every remote expression the resolved output mappings
//! need (one numeric batch, one string batch), evaluates the mappings, and
//! pushes write records for changed values onto the per-transport export
//! queues.  Publication is de-duplicated against the last published state
//! and word-level register writes go through a cache so mappings sharing a
//! register never clobber each other's bits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use simbridge_core::{
    bit_state, render_text, OutputSource, ResolvedKind, ResolvedOutput, SourceValue, WriteRecord,
};
use tracing::{debug, warn};

use super::remote_api::{RemoteApi, RemoteError};

// ── Export queue ──────────────────────────────────────────────────────────────

/// Pending write records for one transport, drained by its export
/// scheduler on the next frame tick.
///
/// The queue is deliberately unbounded; the scheduler drains it at frame
/// rate, so it only grows while a transport stalls.
#[derive(Debug, Clone, Default)]
pub struct ExportQueue {
    records: Arc<Mutex<Vec<WriteRecord>>>,
}

impl ExportQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: WriteRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }

    /// Takes all pending records, leaving the queue empty.
    pub fn drain(&self) -> Vec<WriteRecord> {
        match self.records.lock() {
            Ok(mut records) => std::mem::take(&mut *records),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Failure backoff and log rate limiting ─────────────────────────────────────

/// Delay before the next poll attempt after `streak` consecutive failures.
///
/// Starts at 200 ms, doubles per failure, capped at 5 s.
pub fn backoff_delay(streak: u32) -> Duration {
    let doublings = streak.saturating_sub(1).min(16);
    let ms = 200u64.saturating_mul(1 << doublings);
    Duration::from_millis(ms.min(5000))
}

/// Suppresses repeats of the same log signature inside a fixed window, so
/// a simulator outage does not flood the log at poll rate.
pub struct LogLimiter {
    window: Duration,
    last: HashMap<String, Instant>,
}

impl LogLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    pub fn should_log(&mut self, signature: &str) -> bool {
        self.should_log_at(signature, Instant::now())
    }

    fn should_log_at(&mut self, signature: &str, now: Instant) -> bool {
        match self.last.get(signature) {
            Some(prev) if now.duration_since(*prev) < self.window => false,
            _ => {
                // Signatures embed variable error text; drop expired ones so
                // the map cannot grow for the life of the process.
                let window = self.window;
                self.last.retain(|_, prev| now.duration_since(*prev) < window);
                self.last.insert(signature.to_string(), now);
                true
            }
        }
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

/// Last value published per output mapping, used for de-duplication.
#[derive(Debug, Clone, PartialEq)]
enum PublishedState {
    Bit(bool),
    Text(Vec<u8>),
}

/// Owns the resolved output mappings and drives the poll cycle.
pub struct Orchestrator {
    remote: Arc<dyn RemoteApi>,
    /// Serializes remote calls with the action worker so a slow poll never
    /// interleaves with an input dispatch.
    gate: Arc<tokio::sync::Mutex<()>>,
    outputs: Vec<ResolvedOutput>,
    exports: HashMap<String, ExportQueue>,
    /// Full 16-bit register values per (transport, address); this task is
    /// the only writer, so read-modify-write needs no further locking.
    word_cache: HashMap<(String, u16), u16>,
    published: HashMap<String, PublishedState>,
    failure_streak: u32,
    log_limiter: LogLimiter,
    poll_interval: Duration,
}

impl Orchestrator {
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        gate: Arc<tokio::sync::Mutex<()>>,
        outputs: Vec<ResolvedOutput>,
        exports: HashMap<String, ExportQueue>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            remote,
            gate,
            outputs,
            exports,
            word_cache: HashMap::new(),
            published: HashMap::new(),
            failure_streak: 0,
            log_limiter: LogLimiter::new(Duration::from_secs(5)),
            poll_interval,
        }
    }

    /// Runs one poll cycle: batched reads, then publication.
    pub async fn poll_once(&mut self) -> Result<(), RemoteError> {
        let mut numeric_exprs: Vec<String> = Vec::new();
        let mut string_exprs: Vec<String> = Vec::new();
        for output in &self.outputs {
            for (expr, is_string) in output.expressions() {
                let bucket = if is_string { &mut string_exprs } else { &mut numeric_exprs };
                if !bucket.iter().any(|e| e == expr) {
                    bucket.push(expr.to_string());
                }
            }
        }

        let (numbers, strings) = {
            let _guard = self.gate.lock().await;
            let numbers = self.remote.read_numbers(&numeric_exprs).await?;
            let strings = if string_exprs.is_empty() {
                HashMap::new()
            } else {
                self.remote.read_strings(&string_exprs).await?
            };
            (numbers, strings)
        };

        self.publish(&numbers, &strings);
        Ok(())
    }

    fn publish(&mut self, numbers: &HashMap<String, f64>, strings: &HashMap<String, String>) {
        let Self {
            outputs,
            exports,
            word_cache,
            published,
            ..
        } = self;

        for output in outputs.iter() {
            let Some(queue) = exports.get(&output.target) else {
                continue;
            };
            match &output.kind {
                ResolvedKind::Bit {
                    mask,
                    threshold,
                    invert,
                    expr,
                } => {
                    // A value the simulator did not report leaves the
                    // panel state untouched.
                    let Some(value) = numbers.get(expr) else {
                        continue;
                    };
                    let state = bit_state(*value, *threshold, *invert);
                    let desired = PublishedState::Bit(state);
                    if published.get(&output.name) == Some(&desired) {
                        continue;
                    }
                    let word = word_cache
                        .entry((output.target.clone(), output.address))
                        .or_insert(0);
                    if state {
                        *word |= mask;
                    } else {
                        *word &= !mask;
                    }
                    queue.push(WriteRecord::register(output.address, *word));
                    published.insert(output.name.clone(), desired);
                    debug!(name = %output.name, state, "published bit");
                }
                ResolvedKind::Text(text) => {
                    let mut values = Vec::with_capacity(text.sources.len());
                    let mut complete = true;
                    for source in &text.sources {
                        match source {
                            OutputSource::Literal(s) => {
                                values.push(SourceValue::Literal(s.clone()));
                            }
                            OutputSource::Number(expr) => match numbers.get(expr) {
                                Some(v) => values.push(SourceValue::Number(*v)),
                                None => {
                                    complete = false;
                                    break;
                                }
                            },
                            OutputSource::Text(expr) => match strings.get(expr) {
                                Some(s) => values.push(SourceValue::Text(s.clone())),
                                None => {
                                    complete = false;
                                    break;
                                }
                            },
                        }
                    }
                    if !complete {
                        continue;
                    }
                    let rendered = render_text(&text.style, &text.fit, text.max_len, &values);
                    let desired = PublishedState::Text(rendered.clone());
                    if published.get(&output.name) == Some(&desired) {
                        continue;
                    }
                    match WriteRecord::bytes(output.address, rendered) {
                        Ok(record) => {
                            queue.push(record);
                            published.insert(output.name.clone(), desired);
                            debug!(name = %output.name, "published text");
                        }
                        Err(e) => {
                            warn!(name = %output.name, error = %e, "dropping oversized text record");
                        }
                    }
                }
            }
        }
    }

    /// Poll loop body: cycle, reset or grow the failure streak, sleep.
    pub async fn run(mut self, running: Arc<AtomicBool>) {
        while running.load(Ordering::SeqCst) {
            match self.poll_once().await {
                Ok(()) => {
                    self.failure_streak = 0;
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => {
                    self.failure_streak += 1;
                    let delay = backoff_delay(self.failure_streak);
                    if self.log_limiter.should_log(&e.signature()) {
                        warn!(
                            error = %e,
                            streak = self.failure_streak,
                            backoff_ms = delay.as_millis() as u64,
                            "poll cycle failed"
                        );
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
        debug!("orchestrator stopped");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use simbridge_core::{Catalog, CatalogEntry, CatalogOutput, OutputMappingConfig};

    use super::*;
    use crate::application::remote_api::RemoteErrorKind;

    struct FakeRemote {
        numbers: Mutex<HashMap<String, f64>>,
        strings: Mutex<HashMap<String, String>>,
        fail: Mutex<bool>,
    }

    impl FakeRemote {
        fn new() -> Self {
            Self {
                numbers: Mutex::new(HashMap::new()),
                strings: Mutex::new(HashMap::new()),
                fail: Mutex::new(false),
            }
        }

        fn set_number(&self, expr: &str, value: f64) {
            self.numbers.lock().unwrap().insert(expr.to_string(), value);
        }

        fn set_string(&self, expr: &str, value: &str) {
            self.strings
                .lock()
                .unwrap()
                .insert(expr.to_string(), value.to_string());
        }
    }

    #[async_trait]
    impl RemoteApi for FakeRemote {
        async fn read_numbers(
            &self,
            exprs: &[String],
        ) -> Result<HashMap<String, f64>, RemoteError> {
            if *self.fail.lock().unwrap() {
                return Err(RemoteError::new(RemoteErrorKind::Network, "connection refused"));
            }
            let known = self.numbers.lock().unwrap();
            Ok(exprs
                .iter()
                .filter_map(|e| known.get(e).map(|v| (e.clone(), *v)))
                .collect())
        }

        async fn read_strings(
            &self,
            exprs: &[String],
        ) -> Result<HashMap<String, String>, RemoteError> {
            let known = self.strings.lock().unwrap();
            Ok(exprs
                .iter()
                .filter_map(|e| known.get(e).map(|v| (e.clone(), v.clone())))
                .collect())
        }

        async fn send_action(
            &self,
            _action: &simbridge_core::InputAction,
        ) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    fn catalog() -> Catalog {
        Catalog::from_entries([
            CatalogEntry {
                identifier: "MASTER_CAUTION".to_string(),
                outputs: vec![CatalogOutput::Integer {
                    address: 0x0010,
                    mask: 0x0800,
                    shift: 11,
                }],
                inputs: vec![],
            },
            CatalogEntry {
                identifier: "MASTER_WARNING".to_string(),
                outputs: vec![CatalogOutput::Integer {
                    address: 0x0010,
                    mask: 0x0400,
                    shift: 10,
                }],
                inputs: vec![],
            },
            CatalogEntry {
                identifier: "COM1_DISPLAY".to_string(),
                outputs: vec![CatalogOutput::Text {
                    address: 0x0100,
                    max_length: 7,
                }],
                inputs: vec![],
            },
        ])
    }

    fn bit_output(name: &str, expr: &str) -> ResolvedOutput {
        let cfg = OutputMappingConfig {
            name: name.to_string(),
            target: "panel1".to_string(),
            expr: Some(expr.to_string()),
            threshold: 0.5,
            invert: false,
            mode: None,
            format: None,
            sources: vec![],
        };
        ResolvedOutput::resolve(&cfg, &catalog()).unwrap()
    }

    fn setup(
        outputs: Vec<ResolvedOutput>,
    ) -> (Orchestrator, Arc<FakeRemote>, ExportQueue) {
        let remote = Arc::new(FakeRemote::new());
        let queue = ExportQueue::new();
        let exports = HashMap::from([("panel1".to_string(), queue.clone())]);
        let orch = Orchestrator::new(
            remote.clone(),
            Arc::new(tokio::sync::Mutex::new(())),
            outputs,
            exports,
            Duration::from_millis(50),
        );
        (orch, remote, queue)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let ms: Vec<u64> = (1..=8).map(|s| backoff_delay(s).as_millis() as u64).collect();
        assert_eq!(ms, vec![200, 400, 800, 1600, 3200, 5000, 5000, 5000]);
    }

    #[test]
    fn test_log_limiter_suppresses_within_window() {
        let mut limiter = LogLimiter::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(limiter.should_log_at("Network:refused", t0));
        assert!(!limiter.should_log_at("Network:refused", t0 + Duration::from_secs(2)));
        assert!(limiter.should_log_at("Timeout:elapsed", t0 + Duration::from_secs(2)));
        assert!(limiter.should_log_at("Network:refused", t0 + Duration::from_secs(6)));
    }

    #[test]
    fn test_log_limiter_evicts_expired_signatures() {
        let mut limiter = LogLimiter::new(Duration::from_secs(5));
        let t0 = Instant::now();
        // Signatures carry variable error text, so each outage detail is a
        // fresh key; expired ones must not accumulate.
        for i in 0..100 {
            assert!(limiter.should_log_at(&format!("Http:status {i}"), t0));
        }
        assert!(limiter.should_log_at("Network:refused", t0 + Duration::from_secs(6)));
        assert_eq!(limiter.last.len(), 1);
    }

    #[test]
    fn test_export_queue_drain_takes_everything() {
        let queue = ExportQueue::new();
        queue.push(WriteRecord::register(0x0010, 1));
        queue.push(WriteRecord::register(0x0012, 2));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain().len(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_bit_published_once_until_value_changes() {
        let expr = "(A:ANNUNCIATOR MASTER CAUTION,Bool)";
        let (mut orch, remote, queue) = setup(vec![bit_output("MASTER_CAUTION", expr)]);
        remote.set_number(expr, 1.0);

        orch.poll_once().await.unwrap();
        orch.poll_once().await.unwrap();
        let records = queue.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address, 0x0010);
        assert_eq!(records[0].payload, vec![0x00, 0x08]);

        remote.set_number(expr, 0.0);
        orch.poll_once().await.unwrap();
        let records = queue.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, vec![0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_shared_register_bits_do_not_clobber_each_other() {
        let caution = "(A:CAUTION,Bool)";
        let warning = "(A:WARNING,Bool)";
        let (mut orch, remote, queue) = setup(vec![
            bit_output("MASTER_CAUTION", caution),
            bit_output("MASTER_WARNING", warning),
        ]);
        remote.set_number(caution, 1.0);
        remote.set_number(warning, 1.0);
        orch.poll_once().await.unwrap();
        let records = queue.drain();
        // Second write must carry both bits: 0x0800 | 0x0400.
        assert_eq!(records.last().unwrap().payload, vec![0x00, 0x0C]);

        remote.set_number(caution, 0.0);
        orch.poll_once().await.unwrap();
        let records = queue.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, vec![0x00, 0x04]);
    }

    #[tokio::test]
    async fn test_missing_value_leaves_panel_untouched() {
        let (mut orch, _remote, queue) =
            setup(vec![bit_output("MASTER_CAUTION", "(A:CAUTION,Bool)")]);
        orch.poll_once().await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_text_mapping_renders_exact_buffer_length() {
        let expr = "(A:COM ACTIVE FREQUENCY:1,MHz)";
        let cfg = OutputMappingConfig {
            name: "COM1_DISPLAY".to_string(),
            target: "panel1".to_string(),
            expr: None,
            threshold: 0.5,
            invert: false,
            mode: None,
            format: Some(simbridge_core::FormatConfig {
                template: Some("{0:000.000}".to_string()),
                ..Default::default()
            }),
            sources: vec![simbridge_core::SourceConfig {
                expr: expr.to_string(),
                string: false,
            }],
        };
        let resolved = ResolvedOutput::resolve(&cfg, &catalog()).unwrap();
        let (mut orch, remote, queue) = setup(vec![resolved]);
        remote.set_number(expr, 118.275);
        orch.poll_once().await.unwrap();
        let records = queue.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address, 0x0100);
        assert_eq!(records[0].payload, b"118.275".to_vec());
    }

    #[tokio::test]
    async fn test_string_source_flows_from_string_batch() {
        let expr = "(A:ATC ID,String)";
        let cfg = OutputMappingConfig {
            name: "COM1_DISPLAY".to_string(),
            target: "panel1".to_string(),
            expr: None,
            threshold: 0.5,
            invert: false,
            mode: None,
            format: None,
            sources: vec![simbridge_core::SourceConfig {
                expr: expr.to_string(),
                string: true,
            }],
        };
        let resolved = ResolvedOutput::resolve(&cfg, &catalog()).unwrap();
        let (mut orch, remote, queue) = setup(vec![resolved]);
        remote.set_string(expr, "ON");
        orch.poll_once().await.unwrap();
        let records = queue.drain();
        assert_eq!(records[0].payload, b"ON     ".to_vec());
    }

    #[tokio::test]
    async fn test_failed_poll_surfaces_remote_error() {
        let (mut orch, remote, _queue) =
            setup(vec![bit_output("MASTER_CAUTION", "(A:CAUTION,Bool)")]);
        *remote.fail.lock().unwrap() = true;
        assert!(orch.poll_once().await.is_err());
    }
}
