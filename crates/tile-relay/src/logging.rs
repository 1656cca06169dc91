use tracing::{Level, Metadata};
use tracing_subscriber::filter::{filter_fn, EnvFilter};
use tracing_subscriber::prelude::*;

use crate::config::LogConfig;

impl LogConfig {
    /// Whether records at `level` pass the configured switches.
    pub fn enabled(&self, level: &Level) -> bool {
        match *level {
            Level::ERROR => true,
            Level::WARN => self.warn,
            Level::INFO => self.info,
            Level::DEBUG | Level::TRACE => self.debug,
        }
    }
}

/// Install the global JSON subscriber.
///
/// `RUST_LOG`, when set, replaces the config switches entirely.
pub fn init(log: LogConfig) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_thread_ids(true);

    match EnvFilter::try_from_default_env() {
        Ok(env_filter) => tracing_subscriber::registry()
            .with(fmt_layer.with_filter(env_filter))
            .init(),
        Err(_) => tracing_subscriber::registry()
            .with(fmt_layer.with_filter(filter_fn(move |meta: &Metadata<'_>| {
                log.enabled(meta.level())
            })))
            .init(),
    }
}
