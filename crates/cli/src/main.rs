//! The prewarm binary
//!
//! Dispatches between cache management (`-C`, `-s`, `-M`, `-V`, `-h`)
//! and compiler wrapping (explicit `prewarm <compiler> …` or symlink
//! invocation), and guarantees that a caching failure never becomes a
//! build failure: every error path either degrades to running the tool
//! unchanged or forwards the tool's own exit code.

mod cli;
mod config;
mod size;
mod trace;

use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser};

use prewarm_cache::{Cache, CacheConfig, LocalStore, RemoteCache};
use prewarm_wrappers::{handle_command, run_passthrough, Wrapper};

use crate::cli::{classify, Cli, Invocation, CANONICAL_NAME};
use crate::size::format_size;

fn main() {
    let argv: Vec<String> = std::env::args().collect();
    let exit_code = match classify(&argv) {
        Invocation::Usage => {
            let _ = Cli::command().print_help();
            1
        }
        Invocation::Options => run_options(),
        Invocation::Wrap(command) => wrap_compiler(command),
    };
    std::process::exit(exit_code);
}

/// Handles the cache-management forms.
fn run_options() -> i32 {
    let cli = Cli::parse();
    let config = config::resolve();
    if let Err(e) = trace::init(&config) {
        eprintln!("prewarm: {e}");
    }

    let result = if cli.clear {
        clear_cache(&config)
    } else if cli.show_stats {
        show_stats(&config)
    } else if let Some(bytes) = cli.max_size {
        set_max_size(&config, bytes)
    } else {
        // clap already handled -h/-V; nothing else remains
        let _ = Cli::command().print_help();
        return 1;
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("prewarm: {e}");
            1
        }
    }
}

fn clear_cache(config: &CacheConfig) -> prewarm_cache::Result<()> {
    let store = LocalStore::open(config)?;
    store.clear()?;
    println!("Cache cleared.");
    Ok(())
}

fn show_stats(config: &CacheConfig) -> prewarm_cache::Result<()> {
    let store = LocalStore::open(config)?;
    let summary = store.summary()?;
    println!("prewarm cache: {}", config.dir.display());
    println!("  entries:              {}", summary.entries);
    let cap = if config.max_cache_size == 0 {
        "unlimited".to_string()
    } else {
        format_size(config.max_cache_size)
    };
    println!(
        "  cache size:           {} (max {})",
        format_size(summary.total_size),
        cap
    );
    print!("{}", summary.stats);
    Ok(())
}

fn set_max_size(config: &CacheConfig, bytes: u64) -> prewarm_cache::Result<()> {
    let mut store = LocalStore::open(config)?;
    store.set_max_cache_size(bytes)?;
    if bytes == 0 {
        println!("Maximum cache size set to unlimited.");
    } else {
        println!("Maximum cache size set to {}.", format_size(bytes));
    }
    Ok(())
}

/// Wraps one compiler invocation. `command[0]` is the compiler as
/// invoked (a bare name under symlink dispatch).
fn wrap_compiler(mut command: Vec<String>) -> i32 {
    let config = config::resolve();
    if let Err(e) = trace::init(&config) {
        eprintln!("prewarm: {e}");
    }

    // Resolve the true tool path. This is what capability matching and
    // program identification key on, and it prevents a symlinked
    // prewarm from recursing into itself.
    match find_executable(&command[0]) {
        Ok(true_exe) => command[0] = true_exe.display().to_string(),
        Err(ResolveError::OnlySelf) => {
            eprintln!(
                "prewarm: '{}' resolves back to prewarm and no real tool was found",
                command[0]
            );
            return 1;
        }
        Err(ResolveError::NotFound) => {
            tracing::debug!(program = %command[0], "Could not resolve executable, running as-is");
        }
    }

    let mut was_wrapped = false;
    let mut return_code = 1;

    match Cache::new(&config, remote_backend(&config)) {
        Ok(mut cache) => {
            if let Some(mut wrapper) = select_wrapper(Path::new(&command[0])) {
                match handle_command(wrapper.as_mut(), &mut command, &mut cache, &config) {
                    Ok(code) => {
                        was_wrapped = true;
                        return_code = code;
                    }
                    Err(e) if e.is_fatal() => {
                        eprintln!("prewarm: {e}");
                        return 1;
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Wrapper rejected the command, falling back");
                    }
                }
            } else {
                tracing::debug!(program = %command[0], "No suitable wrapper");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not open the cache, falling back");
        }
    }

    if !was_wrapped {
        return_code = match run_passthrough(&command) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("prewarm: {e}");
                1
            }
        };
    }

    return_code
}

/// Why the wrapped tool could not be resolved.
#[derive(Debug, PartialEq, Eq)]
enum ResolveError {
    /// No candidate exists at all.
    NotFound,
    /// Every candidate is really prewarm (the symlink case); running
    /// it would recurse forever.
    OnlySelf,
}

/// Resolves the wrapped tool to its true executable path.
///
/// Candidates that are really prewarm itself (the symlink case) are
/// skipped so the first genuine tool on `PATH` wins.
fn find_executable(program: &str) -> Result<PathBuf, ResolveError> {
    let direct = Path::new(program);
    let candidates: Vec<PathBuf> = if direct.components().count() > 1 {
        vec![direct.to_path_buf()]
    } else {
        match which::which_all(program) {
            Ok(found) => found.collect(),
            Err(_) => Vec::new(),
        }
    };
    if candidates.is_empty() {
        return Err(ResolveError::NotFound);
    }

    let mut saw_self = false;
    for candidate in candidates {
        if !candidate.exists() {
            continue;
        }
        let resolved = std::fs::canonicalize(&candidate).unwrap_or(candidate);
        let basename = resolved
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        if basename != CANONICAL_NAME {
            return Ok(resolved);
        }
        tracing::debug!(path = %resolved.display(), "Skipping prewarm itself");
        saw_self = true;
    }
    Err(if saw_self {
        ResolveError::OnlySelf
    } else {
        ResolveError::NotFound
    })
}

/// Selects the wrapper claiming this tool, if any.
///
/// Tool-family wrappers (GCC-like, MSVC-like, scripted) are external
/// collaborators; they are consulted here in order. An unclaimed
/// command runs unchanged through the fallback path.
fn select_wrapper(_true_exe: &Path) -> Option<Box<dyn Wrapper>> {
    None
}

/// Builds the remote tier from configuration.
///
/// Remote transports are external collaborators; a configured endpoint
/// with no registered transport disables the remote tier with a
/// warning.
fn remote_backend(config: &CacheConfig) -> Option<Box<dyn RemoteCache>> {
    let url = config.remote.as_deref()?;
    tracing::warn!(remote = %url, "No transport available for the configured remote, ignoring");
    None
}
