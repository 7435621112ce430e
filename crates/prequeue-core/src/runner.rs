//! Probe execution: materialize a prerequisite script on a node, run it
//! under its interpreter with a bounded timeout, and reduce the result
//! to a ternary outcome.

use crate::model::ProbeDefinition;
use crate::node::{LaunchError, LaunchStatus, Node};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default wall-clock bound for one probe invocation.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variable carrying the item's serialized build parameters.
pub const PARAMS_ENV_VAR: &str = "PARAMS";

/// Why a probe counted as "prerequisites not met".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// The script ran to completion and exited non-zero.
    NonZeroExit(i32),

    /// The script outlived the timeout and was killed.
    TimedOut,
}

/// Outcome of one probe invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// Exit code 0: prerequisites are met.
    Passed,

    /// Non-zero exit or timeout: prerequisites are not met.
    Failed(FailureCause),

    /// The node has no root directory; nothing was written or launched.
    NodeUnavailable,
}

/// Infra errors that mean the check itself is broken, as opposed to a
/// probe that legitimately said "no".
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("could not write probe script {path}: {source}")]
    ScriptWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Execute `probe` on `node` and classify the result.
///
/// The script body is materialized as a uniquely named temporary file in
/// the node's root directory, executed with that directory as cwd, and
/// deleted afterwards (best effort). The item `params` are exposed to the
/// script through the `PARAMS` variable as newline-separated `key=value`
/// pairs, alongside the probe's own environment overrides.
pub async fn run_probe(
    node: &dyn Node,
    probe: &ProbeDefinition,
    params: &BTreeMap<String, String>,
    timeout: Duration,
) -> Result<ProbeResult, ProbeError> {
    let Some(root) = node.root_path() else {
        debug!(node = node.name(), "node has no root directory, treating as offline");
        return Ok(ProbeResult::NodeUnavailable);
    };

    let script_path = root.join(format!(
        "prereq-{}.{}",
        Uuid::new_v4().simple(),
        probe.interpreter.extension()
    ));
    tokio::fs::write(&script_path, probe.script.as_bytes())
        .await
        .map_err(|source| ProbeError::ScriptWrite {
            path: script_path.clone(),
            source,
        })?;

    let command = probe.interpreter.command_line(&script_path);

    let mut env = probe.env.clone();
    env.insert(PARAMS_ENV_VAR.to_string(), serialize_params(params));

    debug!(node = node.name(), script = %script_path.display(), "running prerequisite probe");
    let launched = node.launch(&command, &env, &root, timeout).await;

    // Best-effort cleanup, including after a launch error.
    if let Err(e) = tokio::fs::remove_file(&script_path).await {
        warn!(
            path = %script_path.display(),
            error = %e,
            "failed to delete probe script"
        );
    }

    match launched {
        Ok(LaunchStatus::Exited(0)) => Ok(ProbeResult::Passed),
        Ok(LaunchStatus::Exited(code)) => Ok(ProbeResult::Failed(FailureCause::NonZeroExit(code))),
        Ok(LaunchStatus::TimedOut) => Ok(ProbeResult::Failed(FailureCause::TimedOut)),
        Err(e) => Err(ProbeError::Launch(e)),
    }
}

/// Render the parameter map as newline-separated `key=value` pairs.
fn serialize_params(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n")
}
