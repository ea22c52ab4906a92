//! Drains the input-action queue and dispatches each action to the
//! simulator.
//!
//! Dispatch is serialized with the orchestrator's poll cycle through the
//! shared gate so the remote host never sees interleaved batches.  An
//! optional verification block reads a set of expressions back shortly
//! after each dispatch, which makes mis-wired mappings visible in the log
//! without a simulator-side debugger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use simbridge_core::InputAction;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::remote_api::RemoteApi;

/// Read-back configuration applied after every dispatched action.
#[derive(Debug, Clone)]
pub struct VerifySpec {
    pub exprs: Vec<String>,
    pub delay: Duration,
}

/// Consumes [`InputAction`]s and forwards them to the remote API.
pub struct ActionWorker {
    remote: Arc<dyn RemoteApi>,
    gate: Arc<tokio::sync::Mutex<()>>,
    verify: Option<VerifySpec>,
}

impl ActionWorker {
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        gate: Arc<tokio::sync::Mutex<()>>,
        verify: Option<VerifySpec>,
    ) -> Self {
        Self {
            remote,
            gate,
            verify,
        }
    }

    /// Worker loop: wake on queued actions, drain, dispatch in order.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<InputAction>, running: Arc<AtomicBool>) {
        while running.load(Ordering::SeqCst) {
            let first =
                match tokio::time::timeout(Duration::from_millis(250), rx.recv()).await {
                    Ok(Some(action)) => action,
                    // Producer side dropped; nothing more will arrive.
                    Ok(None) => break,
                    // Periodic wakeup to observe the shutdown flag.
                    Err(_) => continue,
                };

            let mut batch = vec![first];
            while let Ok(action) = rx.try_recv() {
                batch.push(action);
            }

            for action in batch {
                self.dispatch(&action).await;
            }
        }
        debug!("action worker stopped");
    }

    async fn dispatch(&self, action: &InputAction) {
        let result = {
            let _guard = self.gate.lock().await;
            self.remote.send_action(action).await
        };
        match result {
            Ok(()) => {
                debug!(?action, "dispatched action");
                if let Some(verify) = &self.verify {
                    self.read_back(verify).await;
                }
            }
            Err(e) => {
                warn!(?action, error = %e, "action dispatch failed");
            }
        }
    }

    async fn read_back(&self, verify: &VerifySpec) {
        tokio::time::sleep(verify.delay).await;
        let result = {
            let _guard = self.gate.lock().await;
            self.remote.read_numbers(&verify.exprs).await
        };
        match result {
            Ok(values) => {
                for expr in &verify.exprs {
                    match values.get(expr) {
                        Some(v) => info!(expr = %expr, value = *v, "verify read-back"),
                        None => info!(expr = %expr, "verify read-back: no value"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "verify read-back failed"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
