//! simbridge daemon entry point.
//!
//! Wires together the infrastructure adapters and starts the Tokio runtime.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load config + catalog, resolve output mappings
//!  └─ start services
//!       ├─ SerialTransport      (writer + reader thread per panel link)
//!       ├─ export scheduler     (Tokio task per transport)
//!       ├─ line pump → InputEngine (Tokio task)
//!       ├─ persistence task     (Tokio task, throttled flushes)
//!       ├─ ActionWorker         (Tokio task)
//!       └─ Orchestrator         (Tokio task, poll loop)
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use simbridge::application::action_worker::{ActionWorker, VerifySpec};
use simbridge::application::input_engine::InputEngine;
use simbridge::application::orchestrator::{ExportQueue, Orchestrator};
use simbridge::application::remote_api::RemoteApi;
use simbridge::infrastructure::remote::RemoteClient;
use simbridge::infrastructure::serial::scheduler::spawn_export_scheduler;
use simbridge::infrastructure::serial::{LineEvent, SerialTransport};
use simbridge::infrastructure::storage::catalog_file::load_catalog;
use simbridge::infrastructure::storage::config::load_config;
use simbridge::infrastructure::storage::laststate::LastStateCache;
use simbridge_core::ResolvedOutput;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "simbridge.toml".to_string());
    let config = load_config(Path::new(&config_path))
        .with_context(|| format!("loading config from {config_path}"))?;

    // Initialise structured logging.  `RUST_LOG` overrides the config level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.bridge.log_level.clone())),
        )
        .init();

    info!("simbridge starting (config: {config_path})");

    let catalog = load_catalog(Path::new(&config.bridge.catalog_file))
        .with_context(|| format!("loading catalog from {}", config.bridge.catalog_file))?;

    // ── Resolve output mappings ───────────────────────────────────────────────
    let mut outputs = Vec::with_capacity(config.outputs.len());
    for mapping in &config.outputs {
        match ResolvedOutput::resolve(mapping, &catalog) {
            Ok(resolved) => outputs.push(resolved),
            Err(e) if config.bridge.stop_on_error => {
                bail!("output mapping rejected: {e}");
            }
            Err(e) => {
                error!("skipping output mapping: {e}");
            }
        }
    }
    info!(
        outputs = outputs.len(),
        inputs = config.inputs.len(),
        "mappings resolved"
    );

    // Shutdown flag shared across all background services.
    let running = Arc::new(AtomicBool::new(true));

    // ── Serial transports + export schedulers ────────────────────────────────
    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<LineEvent>();
    let export_period = Duration::from_micros(config.bridge.export_period_us);
    let mut exports: HashMap<String, ExportQueue> = HashMap::new();
    let mut transports: Vec<Arc<SerialTransport>> = Vec::new();

    for transport_cfg in &config.transports {
        let transport = match SerialTransport::open(
            &transport_cfg.name,
            &transport_cfg.port,
            transport_cfg.baud,
            line_tx.clone(),
            Arc::clone(&running),
        ) {
            Ok(t) => Arc::new(t),
            Err(e) if config.bridge.stop_on_error => bail!("transport failed: {e}"),
            Err(e) => {
                error!("skipping transport '{}': {e}", transport_cfg.name);
                continue;
            }
        };

        let queue = ExportQueue::new();
        exports.insert(transport_cfg.name.clone(), queue.clone());
        spawn_export_scheduler(
            Arc::clone(&transport),
            queue,
            export_period,
            config.bridge.keepalive,
            Arc::clone(&running),
        );
        transports.push(transport);
    }
    drop(line_tx);

    // ── Input engine + line pump ──────────────────────────────────────────────
    let persist_idents: HashSet<String> = config.persist.identifiers.iter().cloned().collect();
    let (persist_tx, mut persist_rx) = tokio::sync::mpsc::unbounded_channel();
    let persist_sender = (!persist_idents.is_empty()).then_some(persist_tx);

    let (mut engine, action_rx) = InputEngine::new(
        config.inputs.clone(),
        config.bridge.edge_suppression,
        persist_idents,
        persist_sender,
    );
    tokio::spawn(async move {
        while let Some(event) = line_rx.recv().await {
            engine.handle_line(&event.transport, &event.line);
        }
    });

    // ── Persistence task ──────────────────────────────────────────────────────
    let state_path = config.persist.file.clone();
    let flush_interval = Duration::from_secs(config.persist.flush_min_secs);
    let persist_running = Arc::clone(&running);
    let persist_handle = tokio::spawn(async move {
        let mut cache = LastStateCache::load(Path::new(&state_path), flush_interval);
        loop {
            match tokio::time::timeout(Duration::from_millis(250), persist_rx.recv()).await {
                Ok(Some(obs)) => {
                    cache.update(&obs.identifier, &obs.value);
                    cache.maybe_flush(false);
                }
                Ok(None) => break,
                Err(_) => {
                    if !persist_running.load(Ordering::SeqCst) {
                        break;
                    }
                    cache.maybe_flush(false);
                }
            }
        }
        cache.maybe_flush(true);
    });

    // ── Remote client + workers ───────────────────────────────────────────────
    let remote: Arc<dyn RemoteApi> = Arc::new(
        RemoteClient::new(
            &config.remote.url,
            Duration::from_millis(config.remote.timeout_ms),
        )
        .context("building remote client")?,
    );
    let gate = Arc::new(tokio::sync::Mutex::new(()));

    let verify = config.remote.verify.as_ref().map(|v| VerifySpec {
        exprs: v.exprs.clone(),
        delay: Duration::from_millis(v.delay_ms),
    });
    let worker = ActionWorker::new(Arc::clone(&remote), Arc::clone(&gate), verify);
    tokio::spawn(worker.run(action_rx, Arc::clone(&running)));

    let orchestrator = Orchestrator::new(
        remote,
        gate,
        outputs,
        exports,
        Duration::from_millis(config.bridge.poll_interval_ms),
    );
    tokio::spawn(orchestrator.run(Arc::clone(&running)));

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::SeqCst);
        }
    });

    info!("simbridge ready.  Press Ctrl-C to exit.");

    // Supervision loop: block until shutdown, log link status periodically.
    let mut status_countdown = 0u32;
    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if !running.load(Ordering::SeqCst) {
            break;
        }
        status_countdown += 1;
        if status_countdown >= 300 {
            status_countdown = 0;
            for transport in &transports {
                let stats = transport.stats();
                if transport.is_alive() {
                    info!(
                        name = transport.name(),
                        tx_bytes = stats.tx_bytes.load(Ordering::Relaxed),
                        rx_bytes = stats.rx_bytes.load(Ordering::Relaxed),
                        "transport status"
                    );
                } else {
                    warn!(name = transport.name(), "transport is down");
                }
            }
        }
    }

    // Let the persistence task write its final state before exiting.
    let _ = tokio::time::timeout(Duration::from_secs(2), persist_handle).await;

    info!("simbridge stopped");
    Ok(())
}
