//! Observability module for correlation and logging setup

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Correlation ID joining the per-project log lines of one fan-out
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "arcade_indexer=debug,info"
    } else {
        "arcade_indexer=info,warn"
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the defaults.
///
/// Fails if a global subscriber is already set.
pub fn init_logging(verbose: bool, json: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose).into());
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true).with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()?;
    }
    Ok(())
}
