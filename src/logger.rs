//! Engine-scoped logging.
//!
//! Each locker owns a [`Logger`]: a tracing span tagged with its namespace
//! plus the `debug` switch. The same value is handed to the backend during
//! initialization, so backend events nest under the engine that owns them.

use tracing::Span;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Logging handle scoped to one locker instance.
#[derive(Debug, Clone)]
pub struct Logger {
    span: Span,
    debug: bool,
}

impl Logger {
    pub fn new(namespace: &str, debug: bool) -> Self {
        Self {
            span: tracing::info_span!("locker", namespace = %namespace),
            debug,
        }
    }

    /// Span that every event of this locker is parented to.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Whether debug-level events should be emitted.
    pub fn is_debug(&self) -> bool {
        self.debug
    }
}

/// Emits a debug event under the logger's span, only in debug mode.
#[macro_export]
macro_rules! locker_debug {
    ($logger:expr, $($arg:tt)+) => {
        if $logger.is_debug() {
            ::tracing::debug!(parent: $logger.span(), $($arg)+);
        }
    };
}

/// Installs a global subscriber with an env filter and a fmt layer.
///
/// `default_filter` is used when `RUST_LOG` is not set, e.g. `"locker=debug"`.
/// Fails if a global subscriber is already installed.
pub fn init_tracing(default_filter: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}
