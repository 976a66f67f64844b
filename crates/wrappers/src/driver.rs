//! The caching command driver
//!
//! `handle_command` is the fixed algorithm every wrapper inherits:
//! resolve arguments, fingerprint the invocation, consult the cache,
//! run the tool on a miss, and record the result on success. The hash
//! ordering in the fingerprint steps is part of the cache key
//! contract; changing it invalidates every existing entry.

use std::time::Instant;

use prewarm_cache::{
    direct_fingerprint, preprocessor_fingerprint, Cache, CacheConfig, CacheEntry, CompressionMode,
};

use crate::error::Result;
use crate::exec::run_tool;
use crate::wrapper::{Capabilities, Wrapper};

/// Runs one wrapped command through the cache.
///
/// Returns the exit code to forward: the cached code on a hit, the
/// child's code on a miss. Non-zero child exits are forwarded verbatim
/// and never cached, so transient failures are not memorized.
///
/// # Errors
///
/// [`crate::Error::ToolExec`] when the underlying tool cannot be
/// started (fatal); any other error means the wrapper rejected the
/// command and the caller should fall back to plain execution.
pub fn handle_command(
    wrapper: &mut dyn Wrapper,
    args: &mut Vec<String>,
    cache: &mut Cache,
    config: &CacheConfig,
) -> Result<i32> {
    let perf = config.perf;

    // Expand response files and the like before anything inspects the
    // argument vector
    timed(perf, "resolve_args", || wrapper.resolve_args(args))?;

    let capabilities = Capabilities::from_strings(&wrapper.capabilities());
    let allow_hard_links = config.hard_links && capabilities.hard_links;

    let expected_files = timed(perf, "get_build_files", || wrapper.expected_outputs(args))?;
    let relevant_env = wrapper.relevant_env_vars();
    let program_id = timed(perf, "get_program_id", || wrapper.program_id(args))?;

    // Direct mode first: keyed on the raw command, it skips the
    // preprocessing cost entirely on a hit
    let direct_fp = if wrapper.direct_mode() {
        let fp = direct_fingerprint(args, &relevant_env, &program_id);
        if let Some(return_code) = timed(perf, "lookup_direct", || {
            cache.lookup_direct(&fp, &expected_files, allow_hard_links, true)
        }) {
            return Ok(return_code);
        }
        Some(fp)
    } else {
        None
    };

    // Preprocessor mode: (a) preprocessed source, (b) filtered
    // arguments, (c) environment, (d) program id — in that order
    let preprocessed = timed(perf, "preprocess", || wrapper.preprocess_source(args))?;
    let relevant_args = timed(perf, "filter_args", || wrapper.relevant_arguments(args));
    let fp = preprocessor_fingerprint(&preprocessed, &relevant_args, &relevant_env, &program_id);

    if let Some(return_code) = timed(perf, "cache_lookup", || {
        cache.lookup(&fp, &expected_files, allow_hard_links, true)
    }) {
        return Ok(return_code);
    }

    tracing::debug!(hash = %fp, "Cache miss, running the tool");
    let result = timed(perf, "run_for_miss", || run_tool(args))?;

    // Only successful runs are recorded
    if result.return_code == 0 {
        let mut file_ids = Vec::new();
        let mut missing_required = None;
        for (slot, expected) in &expected_files {
            if expected.path.is_file() {
                file_ids.push(slot.clone());
            } else if expected.required {
                missing_required = Some(slot.clone());
            }
        }

        if let Some(slot) = missing_required {
            tracing::warn!(
                hash = %fp,
                slot = %slot,
                "Tool succeeded but a required output is missing, not caching"
            );
        } else {
            let entry = CacheEntry::new(
                file_ids,
                if config.compress {
                    CompressionMode::All
                } else {
                    CompressionMode::None
                },
                result.stdout.clone(),
                result.stderr.clone(),
                result.return_code,
            );
            timed(perf, "add_to_cache", || {
                cache.add(&fp, &entry, &expected_files, allow_hard_links);
            });

            if let Some(direct_fp) = direct_fp {
                match timed(perf, "get_implicit_inputs", || wrapper.implicit_inputs(args)) {
                    Ok(inputs) => cache.add_direct(&direct_fp, &fp, &inputs),
                    Err(e) => {
                        tracing::warn!(hash = %direct_fp, error = %e, "Could not enumerate implicit inputs");
                    }
                }
            }
        }
    }

    // Forward the child's output and exit code as if it had run
    // directly
    emit(&result.stdout, &result.stderr);
    Ok(result.return_code)
}

fn emit(stdout: &[u8], stderr: &[u8]) {
    use std::io::Write;
    let out = std::io::stdout();
    let mut out = out.lock();
    let _ = out.write_all(stdout);
    let _ = out.flush();
    let err = std::io::stderr();
    let mut err = err.lock();
    let _ = err.write_all(stderr);
    let _ = err.flush();
}

fn timed<T>(perf: bool, operation: &str, f: impl FnOnce() -> T) -> T {
    if !perf {
        return f();
    }
    let start = Instant::now();
    let result = f();
    tracing::debug!(
        operation,
        duration_ms = start.elapsed().as_millis() as u64,
        "Performance measurement"
    );
    result
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use prewarm_cache::ExpectedFile;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    /// Wrapper for a scripted fake compiler: copies its "source" to an
    /// output file and prints a banner.
    struct FakeWrapper {
        outputs: BTreeMap<String, ExpectedFile>,
        extra_relevant: Vec<String>,
        direct: bool,
        implicit: Vec<PathBuf>,
        preprocess_result: Vec<u8>,
        preprocess_calls: usize,
    }

    impl FakeWrapper {
        fn new(outputs: BTreeMap<String, ExpectedFile>) -> Self {
            Self {
                outputs,
                extra_relevant: Vec::new(),
                direct: false,
                implicit: Vec::new(),
                preprocess_result: b"preprocessed".to_vec(),
                preprocess_calls: 0,
            }
        }
    }

    impl Wrapper for FakeWrapper {
        fn preprocess_source(&mut self, _args: &[String]) -> Result<Vec<u8>> {
            self.preprocess_calls += 1;
            Ok(self.preprocess_result.clone())
        }

        fn relevant_arguments(&self, _args: &[String]) -> Vec<String> {
            self.extra_relevant.clone()
        }

        fn program_id(&mut self, _args: &[String]) -> Result<String> {
            Ok("fake-tool 1.0".to_string())
        }

        fn expected_outputs(&self, _args: &[String]) -> Result<BTreeMap<String, ExpectedFile>> {
            Ok(self.outputs.clone())
        }

        fn direct_mode(&self) -> bool {
            self.direct
        }

        fn implicit_inputs(&mut self, _args: &[String]) -> Result<Vec<PathBuf>> {
            Ok(self.implicit.clone())
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        work: PathBuf,
        cache: Cache,
        config: CacheConfig,
        counter: PathBuf,
        out_file: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let work = tmp.path().to_path_buf();
            let config = CacheConfig {
                dir: work.join("cache"),
                ..CacheConfig::default()
            };
            let cache = Cache::new(&config, None).unwrap();
            let counter = work.join("runs");
            let out_file = work.join("out.o");
            Self {
                _tmp: tmp,
                work,
                cache,
                config,
                counter,
                out_file,
            }
        }

        /// Command that bumps the run counter, writes the output file,
        /// and prints to both streams.
        fn compile_command(&self) -> Vec<String> {
            let script = format!(
                "echo run >> {counter}; printf 'obj-bytes' > {out}; echo building; echo note >&2",
                counter = self.counter.display(),
                out = self.out_file.display(),
            );
            vec!["/bin/sh".to_string(), "-c".to_string(), script]
        }

        fn runs(&self) -> usize {
            std::fs::read_to_string(&self.counter)
                .map(|s| s.lines().count())
                .unwrap_or(0)
        }

        fn outputs(&self) -> BTreeMap<String, ExpectedFile> {
            let mut map = BTreeMap::new();
            map.insert(
                "object".to_string(),
                ExpectedFile::required(&self.out_file),
            );
            map
        }
    }

    fn run(fixture: &mut Fixture, wrapper: &mut FakeWrapper, args: &[String]) -> i32 {
        let mut args = args.to_vec();
        let config = fixture.config.clone();
        handle_command(wrapper, &mut args, &mut fixture.cache, &config).unwrap()
    }

    #[test]
    fn miss_runs_tool_then_hit_replays() {
        let mut fixture = Fixture::new();
        let args = fixture.compile_command();
        let mut wrapper = FakeWrapper::new(fixture.outputs());

        // First invocation: miss, tool runs
        assert_eq!(run(&mut fixture, &mut wrapper, &args), 0);
        assert_eq!(fixture.runs(), 1);
        assert_eq!(std::fs::read(&fixture.out_file).unwrap(), b"obj-bytes");

        // Second invocation: hit, tool does not run, output restored
        std::fs::remove_file(&fixture.out_file).unwrap();
        assert_eq!(run(&mut fixture, &mut wrapper, &args), 0);
        assert_eq!(fixture.runs(), 1, "tool must not run on a hit");
        assert_eq!(std::fs::read(&fixture.out_file).unwrap(), b"obj-bytes");
    }

    #[test]
    fn non_zero_exit_is_forwarded_and_not_cached() {
        let mut fixture = Fixture::new();
        let args = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("echo run >> {}; exit 2", fixture.counter.display()),
        ];
        let mut wrapper = FakeWrapper::new(BTreeMap::new());

        assert_eq!(run(&mut fixture, &mut wrapper, &args), 2);
        assert_eq!(run(&mut fixture, &mut wrapper, &args), 2);
        // Both invocations actually ran the tool
        assert_eq!(fixture.runs(), 2);
        assert_eq!(fixture.cache.local().get_stats().unwrap().local_add, 0);
    }

    #[test]
    fn changing_relevant_arguments_changes_the_key() {
        let mut fixture = Fixture::new();
        let args = fixture.compile_command();
        let mut wrapper = FakeWrapper::new(fixture.outputs());
        wrapper.extra_relevant = vec!["-O2".to_string()];

        assert_eq!(run(&mut fixture, &mut wrapper, &args), 0);
        assert_eq!(fixture.runs(), 1);

        // Same command, different relevant arguments: a different key
        wrapper.extra_relevant = vec!["-O3".to_string()];
        assert_eq!(run(&mut fixture, &mut wrapper, &args), 0);
        assert_eq!(fixture.runs(), 2);
    }

    #[test]
    fn argument_order_is_part_of_the_key() {
        let mut fixture = Fixture::new();
        let args = fixture.compile_command();
        let mut wrapper = FakeWrapper::new(fixture.outputs());
        wrapper.extra_relevant = vec!["-a".to_string(), "-b".to_string()];
        assert_eq!(run(&mut fixture, &mut wrapper, &args), 0);

        wrapper.extra_relevant = vec!["-b".to_string(), "-a".to_string()];
        assert_eq!(run(&mut fixture, &mut wrapper, &args), 0);
        assert_eq!(fixture.runs(), 2, "permuted arguments must be a different key");
    }

    #[test]
    fn direct_mode_skips_preprocessing_on_hit() {
        let mut fixture = Fixture::new();
        let header = fixture.work.join("config.h");
        std::fs::write(&header, b"#define N 1").unwrap();

        let args = fixture.compile_command();
        let mut wrapper = FakeWrapper::new(fixture.outputs());
        wrapper.direct = true;
        wrapper.implicit = vec![header.clone()];

        // Miss: preprocess runs, entry and manifest are recorded
        assert_eq!(run(&mut fixture, &mut wrapper, &args), 0);
        assert_eq!(wrapper.preprocess_calls, 1);
        assert_eq!(fixture.runs(), 1);

        // Direct hit: no preprocessing, no tool run
        std::fs::remove_file(&fixture.out_file).unwrap();
        assert_eq!(run(&mut fixture, &mut wrapper, &args), 0);
        assert_eq!(wrapper.preprocess_calls, 1, "direct hit must skip preprocessing");
        assert_eq!(fixture.runs(), 1);
        assert!(fixture.out_file.exists());

        // Touch the header: direct miss, but the preprocessor key still
        // matches, so the tool is again not run
        std::fs::write(&header, b"#define N 2").unwrap();
        assert_eq!(run(&mut fixture, &mut wrapper, &args), 0);
        assert_eq!(wrapper.preprocess_calls, 2, "direct miss must fall back to preprocessing");
        assert_eq!(fixture.runs(), 1);

        let stats = fixture.cache.local().get_stats().unwrap();
        assert_eq!(stats.direct_hit, 1);
        assert_eq!(stats.direct_miss, 2); // initial miss + post-modification miss
    }

    #[test]
    fn missing_required_output_is_not_cached() {
        let mut fixture = Fixture::new();
        // Tool succeeds but never writes the declared output
        let args = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("echo run >> {}", fixture.counter.display()),
        ];
        let mut wrapper = FakeWrapper::new(fixture.outputs());

        assert_eq!(run(&mut fixture, &mut wrapper, &args), 0);
        assert_eq!(run(&mut fixture, &mut wrapper, &args), 0);
        assert_eq!(fixture.runs(), 2, "nothing may be cached without the output");
    }

    #[test]
    fn optional_outputs_may_be_absent() {
        let mut fixture = Fixture::new();
        let args = fixture.compile_command();
        let mut outputs = fixture.outputs();
        outputs.insert(
            "dep".to_string(),
            ExpectedFile::optional(fixture.work.join("never-written.d")),
        );
        let mut wrapper = FakeWrapper::new(outputs);

        assert_eq!(run(&mut fixture, &mut wrapper, &args), 0);
        std::fs::remove_file(&fixture.out_file).unwrap();
        assert_eq!(run(&mut fixture, &mut wrapper, &args), 0);
        assert_eq!(fixture.runs(), 1);
        assert!(fixture.out_file.exists());
        assert!(!fixture.work.join("never-written.d").exists());
    }

    #[test]
    fn wrapper_rejection_is_not_fatal() {
        struct Rejecting;
        impl Wrapper for Rejecting {
            fn resolve_args(&mut self, _args: &mut Vec<String>) -> Result<()> {
                Err(crate::Error::wrapper("cannot expand response file"))
            }
        }

        let mut fixture = Fixture::new();
        let mut args = vec!["/bin/true".to_string()];
        let config = fixture.config.clone();
        let err = handle_command(&mut Rejecting, &mut args, &mut fixture.cache, &config)
            .unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn unstartable_tool_is_fatal() {
        let mut fixture = Fixture::new();
        let mut wrapper = FakeWrapper::new(BTreeMap::new());
        let mut args = vec![fixture.work.join("no-such-tool").display().to_string()];
        let config = fixture.config.clone();
        let err = handle_command(&mut wrapper, &mut args, &mut fixture.cache, &config)
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
