//! Structured logging initialization.
//!
//! One-time process-wide `tracing` subscriber setup, mirroring the way the
//! rest of this crate exposes a single global for cross-cutting concerns
//! (the metrics registry, the event bus sequence counter). Embedding
//! applications call [`init_logging`] once at startup; everything else in
//! the workspace just calls `tracing::{debug,info,warn,error}!` and trusts
//! a subscriber is listening.

use std::sync::Once;

use nimbus_core::{NimbusError, Result};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Output format for the process-wide log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, no ANSI color codes assumed (safe for container logs).
    #[default]
    Compact,
    /// Newline-delimited JSON, one object per event.
    Json,
}

/// Logging configuration read once at process startup.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset.
    pub default_level: Level,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            format: LogFormat::Compact,
        }
    }
}

/// Install the global `tracing` subscriber. Idempotent: a second call is a
/// no-op rather than a panic, since test binaries and embedding
/// applications may both try to initialize logging.
///
/// `RUST_LOG` takes precedence over `config.default_level` when set.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let mut init_result = Ok(());

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("nimbus={}", config.default_level)));

        let result = match config.format {
            LogFormat::Compact => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(true).compact())
                .try_init(),
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(true).json())
                .try_init(),
        };

        init_result = result.map_err(|e| {
            NimbusError::config_invalid(format!("failed to install tracing subscriber: {e}"))
        });
    });

    init_result
}
