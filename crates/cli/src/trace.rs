//! Tracing setup for the prewarm binary
//!
//! Only the CLI installs a subscriber; the library crates just emit
//! events. Output goes to stderr (the wrapped tool owns stdout), or to
//! the configured log file.

use std::sync::Arc;

use prewarm_cache::CacheConfig;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the global subscriber from the resolved configuration.
///
/// `RUST_LOG` overrides the derived filter; otherwise `debug` gates
/// between warn- and debug-level output for the prewarm crates.
pub fn init(config: &CacheConfig) -> miette::Result<()> {
    let env_filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(env_filter);

    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| miette::miette!("Failed to open log file {}: {e}", path.display()))?;
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .with_target(true);
            registry
                .with(layer)
                .try_init()
                .map_err(|e| miette::miette!("Failed to initialize tracing: {e}"))?;
        }
        None => {
            let layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(false);
            registry
                .with(layer)
                .try_init()
                .map_err(|e| miette::miette!("Failed to initialize tracing: {e}"))?;
        }
    }

    Ok(())
}

fn build_filter(config: &CacheConfig) -> miette::Result<EnvFilter> {
    let level = if config.debug { "debug" } else { "warn" };
    EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(format!(
                "prewarm_cli={level},prewarm_cache={level},prewarm_wrappers={level}"
            ))
        })
        .map_err(|e| miette::miette!("Failed to create tracing filter: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_builds_for_both_levels() {
        assert!(build_filter(&CacheConfig::default()).is_ok());
        let debug = CacheConfig {
            debug: true,
            ..CacheConfig::default()
        };
        assert!(build_filter(&debug).is_ok());
    }
}
