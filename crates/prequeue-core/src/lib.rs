//! prequeue core - admission gate for a build-job queue
//!
//! Before a pending work item may start on a candidate node, the node
//! must pass the job's prerequisite probe (an arbitrary script). This
//! crate provides:
//! - the probe runner: materialize + execute a script on a node with a
//!   bounded timeout, classify the result
//! - the admission gate: the non-blocking per-(item, node) decision hook
//!   the scheduler polls each tick, with at most one in-flight probe per
//!   pair

pub mod fakes;
pub mod gate;
pub mod model;
pub mod node;
pub mod runner;
pub mod telemetry;

// Re-export key types
pub use gate::{AdmissionGate, GateConfig};
pub use model::{
    AdmissionOutcome, CheckKey, Interpreter, ProbeDefinition, WorkItem, MSG_CHECKING,
    MSG_NODE_OFFLINE, MSG_PREREQUISITES_NOT_MET,
};
pub use node::{LaunchError, LaunchStatus, LocalNode, Node};
pub use runner::{
    run_probe, FailureCause, ProbeError, ProbeResult, DEFAULT_PROBE_TIMEOUT, PARAMS_ENV_VAR,
};
pub use telemetry::init_tracing;
