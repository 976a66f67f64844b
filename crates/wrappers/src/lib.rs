//! Wrapper framework for prewarm
//!
//! A *wrapper* adapts one tool family to the cache: it maps a command
//! line to the inputs of the fingerprint and the expected outputs. This
//! crate defines the wrapper contract, the child-process primitive, and
//! the fixed driver algorithm every wrapper inherits. Concrete
//! tool-family wrappers (GCC-like, MSVC-like, scripted) are external
//! collaborators implementing [`Wrapper`].

mod error;

pub mod driver;
pub mod exec;
pub mod wrapper;

pub use driver::handle_command;
pub use error::{Error, Result};
pub use exec::{run_passthrough, run_tool, RunResult};
pub use wrapper::{Capabilities, Wrapper};
