//! Thin wrapper around `std::process::Command`.
//!
//! Two run modes:
//! - [`Cmd::run`] captures stdout/stderr and fails on non-zero exit
//! - [`Cmd::run_interactive`] inherits stdio so long-running external tools
//!   (make, cmake, git) stream their output verbatim to the user
//!
//! Environment for child processes is passed explicitly through [`Cmd::env`]
//! rather than mutated on the parent process.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Builder for an external command invocation.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    error_msg: Option<String>,
    allow_fail: bool,
}

/// Captured result of a [`Cmd::run`] invocation.
#[derive(Debug)]
pub struct CmdResult {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
    success: bool,
}

impl CmdResult {
    pub fn success(&self) -> bool {
        self.success
    }
}

impl Cmd {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            error_msg: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.envs.push((key.to_string(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Message used instead of the generic one when the command fails.
    pub fn error_msg(mut self, msg: &str) -> Self {
        self.error_msg = Some(msg.to_string());
        self
    }

    /// Treat a non-zero exit as a normal result instead of an error.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    /// Run the command, capturing output.
    pub fn run(self) -> Result<CmdResult> {
        let output = self
            .command()
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to spawn '{}'", self.describe()))?;

        let result = CmdResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
            success: output.status.success(),
        };

        if !result.success && !self.allow_fail {
            let msg = self
                .error_msg
                .clone()
                .unwrap_or_else(|| format!("command failed: {}", self.describe()));
            bail!(
                "{}\n  Exit code: {}\n  stderr: {}",
                msg,
                result.code.unwrap_or(-1),
                result.stderr.trim()
            );
        }

        Ok(result)
    }

    /// Run the command with inherited stdio.
    ///
    /// External tool output is surfaced unmodified; on failure only the exit
    /// status is reported since the tool already printed its own errors.
    pub fn run_interactive(self) -> Result<()> {
        let status = self
            .command()
            .status()
            .with_context(|| format!("failed to spawn '{}'", self.describe()))?;

        if !status.success() && !self.allow_fail {
            let msg = self
                .error_msg
                .clone()
                .unwrap_or_else(|| format!("command failed: {}", self.describe()));
            bail!("{}\n  Exit code: {}", msg, status.code().unwrap_or(-1));
        }

        Ok(())
    }
}

/// Fail with a descriptive error if `path` does not exist.
pub fn ensure_exists(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        bail!("{} not found at: {}", what, path.display());
    }
    Ok(())
}
