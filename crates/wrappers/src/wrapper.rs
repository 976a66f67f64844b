//! The wrapper contract
//!
//! The original driver design uses a template-method base class with
//! virtual hooks; here the hooks are a trait with default method
//! bodies, and the driver calls through a `&mut dyn Wrapper`. Every
//! default reproduces the classic base behavior, so a wrapper only
//! overrides the parts that matter for its tool family.

use std::collections::BTreeMap;
use std::path::PathBuf;

use prewarm_cache::{fingerprint_file, ExpectedFile};

use crate::error::{Error, Result};

/// Parsed wrapper capabilities.
///
/// Wrappers report capabilities as strings; unknown strings are
/// ignored so newer wrappers stay compatible with older drivers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    /// Outputs are guaranteed not to be mutated by consumers
    /// post-build, so they are safe to hard-link into the cache.
    pub hard_links: bool,
}

impl Capabilities {
    /// Parses a capability string set.
    #[must_use]
    pub fn from_strings(strings: &[String]) -> Self {
        let mut caps = Self::default();
        for s in strings {
            if s == "hard_links" {
                caps.hard_links = true;
            }
        }
        caps
    }
}

/// Adapter between one tool family and the cache.
///
/// The argument vector passed to each hook has already been through
/// [`Wrapper::resolve_args`]; `args[0]` is the resolved path of the
/// tool executable.
pub trait Wrapper {
    /// Expands response files and similar indirections in place.
    fn resolve_args(&mut self, _args: &mut Vec<String>) -> Result<()> {
        Ok(())
    }

    /// Capability strings for this wrapper. See [`Capabilities`].
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Runs the tool's preprocessing step and returns its output.
    ///
    /// The default is a tool with no preprocessing step.
    fn preprocess_source(&mut self, _args: &[String]) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    /// The arguments that affect the output, order-preserving.
    ///
    /// The default treats every argument as relevant.
    fn relevant_arguments(&self, args: &[String]) -> Vec<String> {
        args.to_vec()
    }

    /// The environment variables that affect the output.
    fn relevant_env_vars(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// A string identifying the tool build (version banner or
    /// similar). The default digests the tool binary itself.
    fn program_id(&mut self, args: &[String]) -> Result<String> {
        let program = args
            .first()
            .ok_or_else(|| Error::wrapper("empty command"))?;
        let digest = fingerprint_file(program.as_ref())?;
        Ok(digest.to_string())
    }

    /// The output files this command is expected to produce, keyed by
    /// logical slot id.
    fn expected_outputs(&self, _args: &[String]) -> Result<BTreeMap<String, ExpectedFile>> {
        Ok(BTreeMap::new())
    }

    /// Whether this wrapper supports direct mode. A wrapper that
    /// cannot enumerate the implicit inputs reliably must leave this
    /// disabled rather than guess.
    fn direct_mode(&self) -> bool {
        false
    }

    /// The implicit input files (header-like reads) of the invocation,
    /// discoverable only after a run. Only consulted when
    /// [`Wrapper::direct_mode`] is enabled.
    fn implicit_inputs(&mut self, _args: &[String]) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}
