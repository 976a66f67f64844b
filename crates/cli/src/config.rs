//! Configuration materialization
//!
//! Configuration is resolved once, here, and threaded through the
//! façade and driver as a value. Resolution order per option:
//! environment variable, then the store's persisted snapshot (which is
//! how `--max-size` stays durable), then the built-in default.
//!
//! Size variables accept the same suffix grammar as `--max-size`;
//! booleans accept `1`/`true`/`yes`/`on` (case-insensitive).

use std::path::PathBuf;

use prewarm_cache::CacheConfig;

use crate::size::parse_size;

/// Resolves the effective configuration from the process environment.
pub fn resolve() -> CacheConfig {
    resolve_with(|name| std::env::var(name).ok())
}

/// Resolution over an arbitrary variable source, for testability.
pub fn resolve_with(get: impl Fn(&str) -> Option<String>) -> CacheConfig {
    let dir = get("PREWARM_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(default_dir);

    let mut config = CacheConfig::load_snapshot(&dir).unwrap_or_default();
    config.dir = dir;

    if let Some(value) = get("PREWARM_MAX_CACHE_SIZE") {
        apply_size(&mut config.max_cache_size, "PREWARM_MAX_CACHE_SIZE", &value);
    }
    if let Some(value) = get("PREWARM_MAX_LOCAL_ENTRY_SIZE") {
        apply_size(
            &mut config.max_local_entry_size,
            "PREWARM_MAX_LOCAL_ENTRY_SIZE",
            &value,
        );
    }
    if let Some(value) = get("PREWARM_MAX_REMOTE_ENTRY_SIZE") {
        apply_size(
            &mut config.max_remote_entry_size,
            "PREWARM_MAX_REMOTE_ENTRY_SIZE",
            &value,
        );
    }
    if let Some(value) = get("PREWARM_COMPRESS") {
        config.compress = parse_bool(&value);
    }
    if let Some(value) = get("PREWARM_HARD_LINKS") {
        config.hard_links = parse_bool(&value);
    }
    if let Some(value) = get("PREWARM_READ_ONLY_REMOTE") {
        config.read_only_remote = parse_bool(&value);
    }
    if let Some(value) = get("PREWARM_REMOTE") {
        config.remote = (!value.trim().is_empty()).then(|| value.trim().to_string());
    }
    if let Some(value) = get("PREWARM_LOG_FILE") {
        config.log_file = (!value.trim().is_empty()).then(|| PathBuf::from(value.trim()));
    }
    if let Some(value) = get("PREWARM_DEBUG") {
        config.debug = parse_bool(&value);
    }
    if let Some(value) = get("PREWARM_PERF") {
        config.perf = parse_bool(&value);
    }

    config
}

fn default_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".prewarm"))
        .unwrap_or_else(|| PathBuf::from(".prewarm"))
}

fn apply_size(target: &mut u64, name: &str, value: &str) {
    match parse_size(value) {
        Ok(bytes) => *target = bytes,
        Err(e) => eprintln!("prewarm: ignoring {name}: {e}"),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
