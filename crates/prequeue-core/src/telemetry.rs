//! Tracing initialisation for prequeue binaries.
//!
//! Call [`init_tracing`] once at program start to configure the global
//! subscriber with an `EnvFilter` and optional JSON formatting.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// * `json` — when `true`, emit newline-delimited JSON log lines.
/// * `level` — default verbosity when `RUST_LOG` is not set.
///
/// `RUST_LOG` overrides the default filter entirely, so operators can
/// still turn individual targets up or down. Returns `true` when this
/// call installed the subscriber; `false` when one was already set (the
/// global subscriber can only be installed once per process, so repeat
/// calls are no-ops).
pub fn init_tracing(json: bool, level: Level) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .is_ok()
    }
}

/// Default filter: the requested level for prequeue itself, with tokio's
/// internals pinned to warn so probe child-process churn stays quiet.
fn default_directives(level: Level) -> String {
    format!("{level},tokio=warn,runtime=warn")
}
