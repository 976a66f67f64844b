//! Child-process execution
//!
//! One invocation drives one command; the child is waited on
//! synchronously with captured or inherited stdio.

use std::process::{Command, Stdio};

use crate::error::{Error, Result};

/// The result of running a tool with captured output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
    /// Exit code; a signal-terminated child reads as 1.
    pub return_code: i32,
}

/// Runs `args` with stdout/stderr captured.
///
/// A non-zero exit is not an error here; only failure to start the
/// program is.
pub fn run_tool(args: &[String]) -> Result<RunResult> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| Error::wrapper("empty command"))?;

    let output = Command::new(program)
        .args(rest)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| Error::ToolExec {
            program: program.clone(),
            source: e,
        })?;

    let return_code = output.status.code().unwrap_or(1);
    if return_code != 0 {
        tracing::debug!(program = %program, exit = return_code, "Tool exited non-zero");
    }

    Ok(RunResult {
        stdout: output.stdout,
        stderr: output.stderr,
        return_code,
    })
}

/// Runs `args` with inherited stdio, for the non-caching fallback
/// path. The tool behaves exactly as if invoked directly.
pub fn run_passthrough(args: &[String]) -> Result<i32> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| Error::wrapper("empty command"))?;

    let status = Command::new(program)
        .args(rest)
        .status()
        .map_err(|e| Error::ToolExec {
            program: program.clone(),
            source: e,
        })?;

    Ok(status.code().unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_stderr_and_exit_code() {
        let result = run_tool(&sh("echo out; echo err >&2; exit 3")).unwrap();
        assert_eq!(result.stdout, b"out\n");
        assert_eq!(result.stderr, b"err\n");
        assert_eq!(result.return_code, 3);
    }

    #[cfg(unix)]
    #[test]
    fn zero_exit() {
        let result = run_tool(&sh("true")).unwrap();
        assert_eq!(result.return_code, 0);
        assert!(result.stdout.is_empty());
    }

    #[test]
    fn missing_program_is_tool_exec() {
        let err = run_tool(&["/definitely/not/a/real/binary".to_string()]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn empty_command_is_wrapper_error() {
        let err = run_tool(&[]).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[cfg(unix)]
    #[test]
    fn passthrough_returns_exit_code() {
        let code = run_passthrough(&sh("exit 7")).unwrap();
        assert_eq!(code, 7);
    }
}
