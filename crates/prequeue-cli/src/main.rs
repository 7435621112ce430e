//! prequeue - run a job prerequisite probe the way the admission gate
//! would, against the local machine.
//!
//! Lets an operator debug a prerequisite script outside the scheduler:
//! the probe is materialized, executed with a bounded timeout, and the
//! admission outcome is reported on stdout. Exit status: 0 allowed,
//! 1 blocked, 2 check failed.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use prequeue_core::{
    AdmissionGate, AdmissionOutcome, GateConfig, Interpreter, LocalNode, Node, ProbeDefinition,
    WorkItem,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, Level};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "prequeue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run build-job prerequisite probes", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and a JSON outcome
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a prerequisite probe against the local machine
    Check {
        /// Inline script body
        #[arg(long, conflicts_with = "script_file", required_unless_present = "script_file")]
        script: Option<String>,

        /// Read the script body from a file
        #[arg(long)]
        script_file: Option<PathBuf>,

        /// Script interpreter
        #[arg(long, value_enum, default_value_t = InterpreterArg::PosixShell)]
        interpreter: InterpreterArg,

        /// Build parameter as KEY=VALUE (repeatable), exposed via $PARAMS
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Environment override as KEY=VALUE (repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Working directory for the probe (default: a fresh temp dir)
        #[arg(long)]
        root: Option<PathBuf>,

        /// Node name used in the reported outcome
        #[arg(long, default_value = "local")]
        node_name: String,

        /// Probe timeout in seconds
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InterpreterArg {
    /// POSIX shell
    PosixShell,
    /// Windows batch
    WindowsBatch,
}

impl From<InterpreterArg> for Interpreter {
    fn from(arg: InterpreterArg) -> Self {
        match arg {
            InterpreterArg::PosixShell => Interpreter::PosixShell,
            InterpreterArg::WindowsBatch => Interpreter::WindowsBatch,
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    Ok((key.to_string(), value.to_string()))
}

fn exit_status(outcome: &AdmissionOutcome) -> u8 {
    match outcome {
        AdmissionOutcome::Allowed => 0,
        AdmissionOutcome::Blocked { .. } => 1,
        AdmissionOutcome::CheckFailed { .. } | AdmissionOutcome::Pending => 2,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    prequeue_core::init_tracing(cli.json, level);

    // The status is carried out of the match so scope-owned state (the
    // scratch tempdir in particular) is dropped before the process exits.
    let status = match cli.command {
        Commands::Check {
            script,
            script_file,
            interpreter,
            params,
            env,
            root,
            node_name,
            timeout_secs,
        } => {
            let body = match (script, script_file) {
                (Some(body), _) => body,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read script file {}", path.display()))?,
                (None, None) => unreachable!("clap enforces one script source"),
            };

            let mut probe = ProbeDefinition::new(body, interpreter.into());
            for raw in env {
                let (key, value) = parse_key_value(&raw)?;
                probe = probe.with_env(key, value);
            }

            let mut item = WorkItem::new(0).with_probe(probe);
            for raw in params {
                let (key, value) = parse_key_value(&raw)?;
                item = item.with_param(key, value);
            }

            // Keep the temp dir alive until the probe has run.
            let (_scratch, root) = match root {
                Some(dir) => (None, dir),
                None => {
                    let dir = tempfile::tempdir().context("failed to create probe directory")?;
                    let path = dir.path().to_path_buf();
                    (Some(dir), path)
                }
            };

            let node: Arc<dyn Node> = Arc::new(LocalNode::new(node_name, &root));
            let gate = AdmissionGate::new(GateConfig {
                probe_timeout: Duration::from_secs(timeout_secs),
            });

            let outcome = loop {
                match gate.can_admit(&item, &node) {
                    Some(AdmissionOutcome::Pending) => {
                        debug!("probe still running");
                        tokio::time::sleep(POLL_INTERVAL).await;
                    }
                    Some(outcome) => break outcome,
                    None => unreachable!("work item always carries a probe here"),
                }
            };

            if cli.json {
                println!("{}", serde_json::to_string(&outcome)?);
            } else {
                println!("{outcome}");
            }

            exit_status(&outcome)
        }
    };

    Ok(ExitCode::from(status))
}
