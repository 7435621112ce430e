//! Admission gate: the non-blocking "may this item run on this node now"
//! decision hook polled by the scheduler.
//!
//! Each (item, node) pair gets at most one in-flight probe at a time. The
//! first poll submits the probe to the gate's runtime and answers
//! `Pending`; later polls answer `Pending` until the probe resolves, then
//! hand out the terminal outcome exactly once and forget the pair.

use crate::model::{
    AdmissionOutcome, CheckKey, ProbeDefinition, WorkItem, MSG_NODE_OFFLINE,
    MSG_PREREQUISITES_NOT_MET,
};
use crate::node::Node;
use crate::runner::{self, ProbeResult, DEFAULT_PROBE_TIMEOUT};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Gate tuning knobs.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Wall-clock bound for one probe invocation.
    pub probe_timeout: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// One in-flight admission check.
///
/// The spawned task writes the resolved outcome into `outcome`; the
/// handle lets the poller detect a task that died without resolving.
#[derive(Debug)]
struct InFlightCheck {
    outcome: Arc<OnceLock<AdmissionOutcome>>,
    task: JoinHandle<()>,
}

/// Admission gate over a shared async runtime.
///
/// Owned by whatever wires up the scheduler; probes run on the injected
/// runtime handle, never on the polling caller's thread.
#[derive(Debug)]
pub struct AdmissionGate {
    runtime: Handle,
    config: GateConfig,
    in_flight: Mutex<HashMap<CheckKey, InFlightCheck>>,
}

impl AdmissionGate {
    /// Create a gate running probes on the current tokio runtime.
    ///
    /// Panics outside a runtime context; use [`AdmissionGate::with_runtime`]
    /// to inject a handle explicitly.
    pub fn new(config: GateConfig) -> Self {
        Self::with_runtime(config, Handle::current())
    }

    /// Create a gate running probes on the given runtime handle.
    pub fn with_runtime(config: GateConfig, runtime: Handle) -> Self {
        Self {
            runtime,
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Poll the admission decision for one (item, node) pair.
    ///
    /// Returns `None` when the item carries no probe definition: the gate
    /// is not applicable and has no objection. Otherwise returns the
    /// current [`AdmissionOutcome`]; the scheduler re-polls until it sees
    /// a terminal one. Never blocks: the only work on the caller's thread
    /// is a map lookup and, on first sight of a pair, a task submission.
    ///
    /// A terminal outcome is handed out exactly once. The next poll for
    /// the same pair starts a fresh probe.
    pub fn can_admit(&self, item: &WorkItem, node: &Arc<dyn Node>) -> Option<AdmissionOutcome> {
        let probe = item.probe.as_ref()?;
        let key = CheckKey::new(item.id, node.name());

        // Check-then-insert must stay one critical section to keep the
        // one-probe-per-key invariant.
        let mut in_flight = self.lock_in_flight();
        let outcome = match in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                // Sample the task state before the slot: the store into the
                // slot happens before task completion, so a finished task
                // with a still-empty slot can only mean a panic. Reading in
                // the other order could misreport a probe that resolved
                // between the two loads.
                let finished = entry.get().task.is_finished();
                if let Some(resolved) = entry.get().outcome.get().cloned() {
                    entry.remove();
                    debug!(%key, outcome = %resolved, "admission check consumed");
                    resolved
                } else if finished {
                    // The task ended without storing an outcome, so it
                    // panicked. Drop the entry rather than leak the key.
                    entry.remove();
                    warn!(%key, "probe task died without resolving");
                    AdmissionOutcome::check_failed("probe task panicked")
                } else {
                    AdmissionOutcome::Pending
                }
            }
            Entry::Vacant(slot) => {
                let outcome = Arc::new(OnceLock::new());
                let task = self.runtime.spawn(resolve_probe(
                    Arc::clone(node),
                    probe.clone(),
                    item.params.clone(),
                    self.config.probe_timeout,
                    key.clone(),
                    Arc::clone(&outcome),
                ));
                slot.insert(InFlightCheck { outcome, task });
                debug!(%key, "admission check submitted");
                AdmissionOutcome::Pending
            }
        };
        Some(outcome)
    }

    /// Number of unconsumed admission checks.
    pub fn in_flight_len(&self) -> usize {
        self.lock_in_flight().len()
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<CheckKey, InFlightCheck>> {
        // Insert and remove cannot leave the map half-mutated, so a
        // poisoned lock is still a consistent map.
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Run one probe to completion and store the admission outcome.
///
/// Everything that can go wrong resolves to a clean outcome here; no
/// fault escapes the task boundary.
async fn resolve_probe(
    node: Arc<dyn Node>,
    probe: ProbeDefinition,
    params: BTreeMap<String, String>,
    timeout: Duration,
    key: CheckKey,
    slot: Arc<OnceLock<AdmissionOutcome>>,
) {
    let outcome = match runner::run_probe(node.as_ref(), &probe, &params, timeout).await {
        Ok(ProbeResult::Passed) => AdmissionOutcome::Allowed,
        Ok(ProbeResult::Failed(cause)) => {
            debug!(%key, ?cause, "prerequisite probe failed");
            AdmissionOutcome::Blocked {
                reason: MSG_PREREQUISITES_NOT_MET.to_string(),
                node: node.name().to_string(),
            }
        }
        Ok(ProbeResult::NodeUnavailable) => AdmissionOutcome::Blocked {
            reason: MSG_NODE_OFFLINE.to_string(),
            node: node.name().to_string(),
        },
        Err(e) => {
            warn!(%key, error = %e, "prerequisite check could not run");
            AdmissionOutcome::check_failed(e)
        }
    };

    debug!(%key, outcome = %outcome, "admission check resolved");
    // The poller may have been abandoned; a filled slot it never reads is
    // the accepted leak, bounded by the probe timeout.
    let _ = slot.set(outcome);
}
