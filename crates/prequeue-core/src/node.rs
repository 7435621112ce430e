//! Worker-node abstraction: a root working directory plus a bounded
//! command-launch capability.
//!
//! The gate never mutates a node. It only asks for the root directory
//! (absence means the node is offline) and launches the probe command
//! with a hard wall-clock timeout.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// How a launched probe process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStatus {
    /// The process exited; code is -1 when killed by a signal.
    Exited(i32),

    /// The process outlived the timeout and was killed.
    TimedOut,
}

/// Infra-level launch failures, distinct from a clean non-zero exit.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("empty command line")]
    EmptyCommand,

    #[error("failed to spawn probe process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to wait for probe process: {0}")]
    Wait(#[source] std::io::Error),
}

/// An opaque handle to a worker node.
#[async_trait]
pub trait Node: Send + Sync {
    /// Stable node name, used in check keys and blocking reasons.
    fn name(&self) -> &str;

    /// Root working directory, or `None` when the node is offline.
    fn root_path(&self) -> Option<PathBuf>;

    /// Launch `command` on the node with `cwd` as working directory and
    /// `env` merged additively into the inherited environment.
    ///
    /// Must resolve within `timeout`: a process still running at the
    /// bound is killed and reported as [`LaunchStatus::TimedOut`], never
    /// left hanging.
    async fn launch(
        &self,
        command: &[String],
        env: &BTreeMap<String, String>,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<LaunchStatus, LaunchError>;
}

/// Node implementation for the machine the process runs on.
#[derive(Debug, Clone)]
pub struct LocalNode {
    name: String,
    root: PathBuf,
}

impl LocalNode {
    /// Create a local node rooted at `root`.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Node for LocalNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn root_path(&self) -> Option<PathBuf> {
        Some(self.root.clone())
    }

    async fn launch(
        &self,
        command: &[String],
        env: &BTreeMap<String, String>,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<LaunchStatus, LaunchError> {
        let (program, args) = command.split_first().ok_or(LaunchError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(env)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future on timeout must reap the child.
            .kill_on_drop(true);

        debug!(node = %self.name, program = %program, "spawning probe process");
        let child = cmd.spawn().map_err(LaunchError::Spawn)?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let code = output.status.code().unwrap_or(-1);
                if !output.stdout.is_empty() {
                    debug!(
                        node = %self.name,
                        stdout = %String::from_utf8_lossy(&output.stdout),
                        "probe stdout"
                    );
                }
                if !output.stderr.is_empty() {
                    debug!(
                        node = %self.name,
                        stderr = %String::from_utf8_lossy(&output.stderr),
                        "probe stderr"
                    );
                }
                Ok(LaunchStatus::Exited(code))
            }
            Ok(Err(e)) => Err(LaunchError::Wait(e)),
            Err(_) => {
                debug!(node = %self.name, ?timeout, "probe process timed out");
                Ok(LaunchStatus::TimedOut)
            }
        }
    }
}
