//! In-memory test doubles for the node abstraction.

use crate::node::{LaunchError, LaunchStatus, Node};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What a [`FakeNode`] does when asked to launch a command.
#[derive(Debug, Clone)]
pub enum LaunchBehavior {
    /// Report this exit code immediately.
    Exit(i32),

    /// Report this exit code after a delay, to keep a check in flight.
    ExitAfter { code: i32, delay: Duration },

    /// Report a timeout.
    TimeOut,

    /// Fail to spawn with this message.
    SpawnError(String),

    /// Panic inside the launch, for task-death handling tests.
    Panic,
}

/// Scripted [`Node`] with a launch counter, for exercising the gate
/// without real processes.
#[derive(Debug)]
pub struct FakeNode {
    name: String,
    root: Option<PathBuf>,
    behavior: LaunchBehavior,
    launches: AtomicUsize,
}

impl FakeNode {
    /// A node with a root directory and scripted launch behavior.
    pub fn online(
        name: impl Into<String>,
        root: impl AsRef<Path>,
        behavior: LaunchBehavior,
    ) -> Self {
        Self {
            name: name.into(),
            root: Some(root.as_ref().to_path_buf()),
            behavior,
            launches: AtomicUsize::new(0),
        }
    }

    /// A node with no resolvable root directory.
    pub fn offline(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: None,
            behavior: LaunchBehavior::Exit(0),
            launches: AtomicUsize::new(0),
        }
    }

    /// How many times `launch` has been called.
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Node for FakeNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn root_path(&self) -> Option<PathBuf> {
        self.root.clone()
    }

    async fn launch(
        &self,
        _command: &[String],
        _env: &BTreeMap<String, String>,
        _cwd: &Path,
        _timeout: Duration,
    ) -> Result<LaunchStatus, LaunchError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            LaunchBehavior::Exit(code) => Ok(LaunchStatus::Exited(*code)),
            LaunchBehavior::ExitAfter { code, delay } => {
                tokio::time::sleep(*delay).await;
                Ok(LaunchStatus::Exited(*code))
            }
            LaunchBehavior::TimeOut => Ok(LaunchStatus::TimedOut),
            LaunchBehavior::SpawnError(message) => Err(LaunchError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                message.clone(),
            ))),
            LaunchBehavior::Panic => panic!("fake node launch panic"),
        }
    }
}
