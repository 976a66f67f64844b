//! Option parsing for the prewarm binary
//!
//! Three invocation forms exist:
//! - `prewarm [options]` — cache management (this parser)
//! - `prewarm <compiler> [args…]` — wrap a compiler invocation
//! - `<symlink-to-prewarm> [args…]` — the symlink basename is the
//!   compiler
//!
//! Only the first form goes through clap; the other two forward
//! arbitrary tool arguments untouched.

use clap::Parser;

use crate::size::parse_size;

/// The canonical executable name; invocation under any other basename
/// means symlink dispatch.
pub const CANONICAL_NAME: &str = "prewarm";

/// Cache-management options.
#[derive(Parser, Debug)]
#[command(name = "prewarm")]
#[command(about = "A transparent compiler-invocation cache")]
#[command(
    after_help = "Run `prewarm <compiler> [compiler-options]` to wrap a compiler invocation,\n\
                  or symlink a compiler name to prewarm and invoke the symlink."
)]
#[command(version)]
pub struct Cli {
    /// Clear the cache completely (except configuration)
    #[arg(short = 'C', long)]
    pub clear: bool,

    /// Show statistics summary
    #[arg(short = 's', long)]
    pub show_stats: bool,

    /// Set maximum size of cache to SIZE (use 0 for no limit);
    /// available suffixes: k, M, G, T (decimal) and Ki, Mi, Gi, Ti
    /// (binary); default suffix: G
    #[arg(short = 'M', long, value_name = "SIZE", value_parser = parse_size)]
    pub max_size: Option<u64>,
}

/// How one argv is to be handled.
#[derive(Debug, PartialEq, Eq)]
pub enum Invocation {
    /// `prewarm -C | -s | -M …` (including `-h`/`-V`): parse options.
    Options,
    /// Wrap a compiler: the vector starts with the compiler itself.
    Wrap(Vec<String>),
    /// Bare `prewarm` with no arguments: print help, exit non-zero.
    Usage,
}

/// Classifies an argv without consuming it.
pub fn classify(argv: &[String]) -> Invocation {
    let invoked_as = argv
        .first()
        .map(|arg0| exe_basename(arg0))
        .unwrap_or_default();

    if invoked_as != CANONICAL_NAME && !invoked_as.is_empty() {
        // Symlink dispatch: argv[0] is the compiler
        return Invocation::Wrap(argv.to_vec());
    }

    match argv.get(1) {
        None => Invocation::Usage,
        Some(first) if first.starts_with('-') => Invocation::Options,
        Some(_) => Invocation::Wrap(argv[1..].to_vec()),
    }
}

/// The basename of an executable path, without a Windows-style
/// extension.
fn exe_basename(arg0: &str) -> String {
    std::path::Path::new(arg0)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn options_form_parses() {
        let cli = Cli::try_parse_from(["prewarm", "-C"]).unwrap();
        assert!(cli.clear);
        assert!(!cli.show_stats);

        let cli = Cli::try_parse_from(["prewarm", "--show-stats"]).unwrap();
        assert!(cli.show_stats);
    }

    #[test]
    fn max_size_uses_the_suffix_grammar() {
        let cli = Cli::try_parse_from(["prewarm", "-M", "10M"]).unwrap();
        assert_eq!(cli.max_size, Some(10_000_000));

        let cli = Cli::try_parse_from(["prewarm", "--max-size", "2"]).unwrap();
        assert_eq!(cli.max_size, Some(2_000_000_000));

        assert!(Cli::try_parse_from(["prewarm", "-M", "banana"]).is_err());
        assert!(Cli::try_parse_from(["prewarm", "-M"]).is_err());
    }

    #[test]
    fn unknown_option_is_an_error() {
        assert!(Cli::try_parse_from(["prewarm", "--frobnicate"]).is_err());
    }

    #[test]
    fn classify_bare_invocation() {
        assert_eq!(classify(&argv(&["prewarm"])), Invocation::Usage);
        assert_eq!(classify(&argv(&["/usr/bin/prewarm"])), Invocation::Usage);
    }

    #[test]
    fn classify_options() {
        assert_eq!(classify(&argv(&["prewarm", "-C"])), Invocation::Options);
        assert_eq!(classify(&argv(&["prewarm", "--version"])), Invocation::Options);
    }

    #[test]
    fn classify_wrapped_compiler() {
        let inv = classify(&argv(&["prewarm", "gcc", "-c", "main.c"]));
        assert_eq!(inv, Invocation::Wrap(argv(&["gcc", "-c", "main.c"])));
    }

    #[test]
    fn classify_symlink_dispatch() {
        let inv = classify(&argv(&["/usr/local/bin/gcc", "-c", "main.c"]));
        assert_eq!(
            inv,
            Invocation::Wrap(argv(&["/usr/local/bin/gcc", "-c", "main.c"]))
        );
    }

    #[test]
    fn exe_basename_strips_dirs_and_extension() {
        assert_eq!(exe_basename("/usr/bin/prewarm"), "prewarm");
        assert_eq!(exe_basename("prewarm.exe"), "prewarm");
        assert_eq!(exe_basename("gcc"), "gcc");
    }
}
