//! Per-line processing of inbound hardware reports.
//!
//! Every line a panel sends (`IDENTIFIER ARGUMENT`) passes through one
//! engine instance: persistence observation, edge suppression, mapping
//! selection, rate/deadband filtering, the linear map, and action
//! construction.  Accepted actions are handed to the dispatch worker over
//! an unbounded channel; the engine itself never performs I/O.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use simbridge_core::{
    apply_linear, build_action, InputAction, InputMappingConfig, MappedSample,
};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A numeric report from a persistence-flagged identifier, forwarded to
/// the last-state store independently of mapping matches.  Carries the
/// literal argument text so the stored state replays exactly what the
/// hardware said.
#[derive(Debug, Clone, PartialEq)]
pub struct StateObservation {
    pub identifier: String,
    pub value: String,
}

/// Filter state kept per (transport, identifier, mapping slot).
#[derive(Debug, Clone, Copy)]
struct AnalogState {
    last_raw: f64,
    last_emit: Instant,
}

/// Stateful line processor shared by all transports.
pub struct InputEngine {
    /// Mappings grouped by identifier, preserving registration order.
    mappings: HashMap<String, Vec<InputMappingConfig>>,
    edge_suppression: bool,
    /// Last integer argument seen per (transport, identifier).
    edge_cache: HashMap<(String, String), String>,
    analog: HashMap<(String, String, usize), AnalogState>,
    action_tx: mpsc::UnboundedSender<InputAction>,
    persist_idents: HashSet<String>,
    persist_tx: Option<mpsc::UnboundedSender<StateObservation>>,
}

impl InputEngine {
    /// Builds the engine and the action queue its consumers drain.
    pub fn new(
        mappings: Vec<InputMappingConfig>,
        edge_suppression: bool,
        persist_idents: HashSet<String>,
        persist_tx: Option<mpsc::UnboundedSender<StateObservation>>,
    ) -> (Self, mpsc::UnboundedReceiver<InputAction>) {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let mut grouped: HashMap<String, Vec<InputMappingConfig>> = HashMap::new();
        for mapping in mappings {
            grouped.entry(mapping.identifier.clone()).or_default().push(mapping);
        }
        let engine = Self {
            mappings: grouped,
            edge_suppression,
            edge_cache: HashMap::new(),
            analog: HashMap::new(),
            action_tx,
            persist_idents,
            persist_tx,
        };
        (engine, action_rx)
    }

    /// Processes one inbound line from the named transport.
    pub fn handle_line(&mut self, transport: &str, line: &str) {
        self.handle_line_at(transport, line, Instant::now());
    }

    /// Same as [`handle_line`](Self::handle_line), with the clock injected.
    pub fn handle_line_at(&mut self, transport: &str, line: &str, now: Instant) {
        let Some((identifier, argument)) = split_line(line) else {
            trace!(transport, line, "discarding malformed line");
            return;
        };

        // Persistence observation happens before any matching or
        // suppression so a flagged identifier is recorded even when no
        // mapping listens to it.
        if self.persist_idents.contains(identifier) && argument.parse::<f64>().is_ok() {
            if let Some(tx) = &self.persist_tx {
                let _ = tx.send(StateObservation {
                    identifier: identifier.to_string(),
                    value: argument.to_string(),
                });
            }
        }

        // Hardware repeats switch states on every scan; suppress exact
        // integer repeats once per line, not per mapping.
        if self.edge_suppression && argument.parse::<i64>().is_ok() {
            let key = (transport.to_string(), identifier.to_string());
            match self.edge_cache.get(&key) {
                Some(last) if last == argument => {
                    trace!(transport, identifier, argument, "suppressed repeat");
                    return;
                }
                _ => {
                    self.edge_cache.insert(key, argument.to_string());
                }
            }
        }

        let Some(group) = self.mappings.get(identifier) else {
            return;
        };

        // Exact matches win over the wildcard regardless of registration
        // order; among wildcards the first registered one is used.
        let candidate = group
            .iter()
            .enumerate()
            .find(|(_, m)| m.match_token == argument)
            .or_else(|| group.iter().enumerate().find(|(_, m)| m.is_wildcard()));
        let Some((slot, mapping)) = candidate else {
            return;
        };

        let raw = if mapping.is_wildcard() {
            // A wildcard mapping feeds numeric machinery; a non-numeric
            // argument has nothing to feed it with.
            match argument.parse::<f64>() {
                Ok(v) => v,
                Err(_) => {
                    debug!(transport, identifier, argument, "non-numeric argument for wildcard mapping");
                    return;
                }
            }
        } else {
            argument.parse::<f64>().unwrap_or(0.0)
        };

        let analog_key = (transport.to_string(), identifier.to_string(), slot);
        if let Some(filter) = &mapping.filter {
            // The first sample after startup or idle always passes; the
            // filter only compares against recorded state.
            if let Some(state) = self.analog.get(&analog_key) {
                if filter.rate_ms > 0
                    && now.duration_since(state.last_emit).as_millis() < u128::from(filter.rate_ms)
                {
                    return;
                }
                if let Some(deadband) = filter.deadband {
                    if (raw - state.last_raw).abs() < deadband {
                        return;
                    }
                }
            }
        }

        let sample = match &mapping.map {
            Some(map) => match apply_linear(map, raw) {
                Some(sample) => sample,
                None => {
                    debug!(identifier, "degenerate linear map, dropping line");
                    return;
                }
            },
            None => MappedSample::identity(raw),
        };

        let Some(action) = build_action(&mapping.action, &sample) else {
            return;
        };

        // Enqueue before recording analog state so a send failure never
        // leaves the filter believing the sample was emitted.
        if self.action_tx.send(action).is_ok() {
            self.analog.insert(
                analog_key,
                AnalogState {
                    last_raw: raw,
                    last_emit: now,
                },
            );
        }
    }
}

/// Splits a line into identifier and argument at the first whitespace run.
fn split_line(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    let split = trimmed.find(char::is_whitespace)?;
    let identifier = &trimmed[..split];
    let argument = trimmed[split..].trim_start();
    if identifier.is_empty() || argument.is_empty() {
        return None;
    }
    Some((identifier, argument))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
