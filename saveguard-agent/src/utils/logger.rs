//! Logging: tracing subscriber setup and the injected log sink.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging with the specified level
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// How a user-facing log line should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Warning,
    Error,
}

/// Sink for user-facing status messages.
///
/// Components receive an `Arc<dyn LogSink>` at construction. Implementations
/// must not panic and have no way to report failure back.
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str, severity: Severity);
}

/// Prefix marking repository eviction messages.
pub const EVICTION_PREFIX: &str = "[Eviction]";

/// Forwards status messages to `tracing`.
///
/// Messages starting with [`EVICTION_PREFIX`] go to the
/// `saveguard::eviction` target so they can be filtered separately.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: &str, severity: Severity) {
        let eviction = message.starts_with(EVICTION_PREFIX);
        match (severity, eviction) {
            (Severity::Success, false) => tracing::info!(target: "saveguard", "{}", message),
            (Severity::Warning, false) => tracing::warn!(target: "saveguard", "{}", message),
            (Severity::Error, false) => tracing::error!(target: "saveguard", "{}", message),
            (Severity::Success, true) => {
                tracing::info!(target: "saveguard::eviction", "{}", message)
            }
            (Severity::Warning, true) => {
                tracing::warn!(target: "saveguard::eviction", "{}", message)
            }
            (Severity::Error, true) => {
                tracing::error!(target: "saveguard::eviction", "{}", message)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemorySink;
    use super::*;

    #[test]
    fn test_tracing_sink_never_panics_without_subscriber() {
        let sink = TracingSink;
        sink.log("Backup created", Severity::Success);
        sink.log("Pull failed", Severity::Warning);
        sink.log("Push failed", Severity::Error);
        sink.log("[Eviction] Remote repository deleted.", Severity::Warning);
    }

    #[test]
    fn test_memory_sink_records_severity() {
        let sink = MemorySink::new();
        sink.log("Pull failed: offline", Severity::Warning);

        assert!(sink.contains("Pull failed", Severity::Warning));
        assert!(!sink.contains("Pull failed", Severity::Error));
        assert_eq!(sink.entries().len(), 1);
    }
}
