//! Data model for prerequisite probes and admission decisions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Operator-facing description of a check that is still running.
pub const MSG_CHECKING: &str = "checking job prerequisites";

/// Fixed blocking reason for a probe that exited non-zero or timed out.
pub const MSG_PREREQUISITES_NOT_MET: &str = "job prerequisites are not met";

/// Fixed blocking reason for a node with no resolvable root directory.
pub const MSG_NODE_OFFLINE: &str = "node is offline";

/// Script interpreter a probe runs under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Interpreter {
    /// POSIX shell (`sh -xe <script>`).
    PosixShell,

    /// Windows batch (`cmd /c call <script>`).
    WindowsBatch,
}

impl Interpreter {
    /// File extension used when the script body is materialized on disk.
    pub fn extension(&self) -> &'static str {
        match self {
            Interpreter::PosixShell => "sh",
            Interpreter::WindowsBatch => "bat",
        }
    }

    /// Build the command line that executes a materialized script file.
    pub fn command_line(&self, script: &Path) -> Vec<String> {
        match self {
            Interpreter::PosixShell => vec![
                "sh".to_string(),
                "-xe".to_string(),
                script.display().to_string(),
            ],
            Interpreter::WindowsBatch => vec![
                "cmd".to_string(),
                "/c".to_string(),
                "call".to_string(),
                script.display().to_string(),
            ],
        }
    }
}

/// A job's prerequisite probe: a script that must exit 0 on a candidate
/// node before the job may start there.
///
/// Owned by the job configuration and read-only to the gate. Environment
/// overrides are additive; the inherited environment is never cleared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeDefinition {
    /// Script body to materialize and execute.
    pub script: String,

    /// Interpreter the script runs under.
    pub interpreter: Interpreter,

    /// Extra environment variables injected into the probe process.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl ProbeDefinition {
    /// Create a probe definition with no environment overrides.
    pub fn new(script: impl Into<String>, interpreter: Interpreter) -> Self {
        Self {
            script: script.into(),
            interpreter,
            env: BTreeMap::new(),
        }
    }

    /// Add an environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// A pending queue entry under consideration by the scheduler.
///
/// The gate reads only the identifier, the parameter map, and the optional
/// probe definition carried over from the job configuration.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Stable queue identifier.
    pub id: u64,

    /// Build parameters, exposed to the probe via the `PARAMS` variable.
    pub params: BTreeMap<String, String>,

    /// The job's prerequisite probe, if one is configured.
    pub probe: Option<ProbeDefinition>,
}

impl WorkItem {
    /// Create a work item with no parameters and no probe.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            params: BTreeMap::new(),
            probe: None,
        }
    }

    /// Add a build parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Attach a prerequisite probe.
    pub fn with_probe(mut self, probe: ProbeDefinition) -> Self {
        self.probe = Some(probe);
        self
    }
}

/// Identity of one (work item, node) admission check in progress.
///
/// At most one probe execution is in flight per key at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckKey {
    /// Work item identifier.
    pub item_id: u64,

    /// Candidate node name.
    pub node_name: String,
}

impl CheckKey {
    /// Derive the key for an (item, node) pair.
    pub fn new(item_id: u64, node_name: impl Into<String>) -> Self {
        Self {
            item_id,
            node_name: node_name.into(),
        }
    }
}

impl fmt::Display for CheckKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.item_id, self.node_name)
    }
}

/// Admission decision for one (work item, node) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdmissionOutcome {
    /// The check is still running; ask again next scheduling tick.
    Pending,

    /// The probe passed; no objection to placing the item on the node.
    Allowed,

    /// Terminal negative decision with a human-readable cause.
    Blocked {
        /// Why the item may not start on the node.
        reason: String,
        /// Node the decision applies to.
        node: String,
    },

    /// The check mechanism itself malfunctioned (infra error, not an
    /// unmet prerequisite).
    CheckFailed {
        /// Operator-facing failure detail.
        message: String,
    },
}

impl AdmissionOutcome {
    /// Build a `CheckFailed` outcome from an underlying error detail.
    pub fn check_failed(detail: impl fmt::Display) -> Self {
        AdmissionOutcome::CheckFailed {
            message: format!("failed to check job prerequisites: {detail}"),
        }
    }

    /// Whether this outcome ends the admission cycle for its pair.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AdmissionOutcome::Pending)
    }
}

impl fmt::Display for AdmissionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionOutcome::Pending => write!(f, "{MSG_CHECKING}"),
            AdmissionOutcome::Allowed => write!(f, "allowed"),
            AdmissionOutcome::Blocked { reason, node } => {
                write!(f, "blocked on {node}: {reason}")
            }
            AdmissionOutcome::CheckFailed { message } => write!(f, "{message}"),
        }
    }
}
