//! Thin async wrapper around the `git` executable.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

/// Why a git invocation did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitFailure {
    /// The executable could not be started at all.
    Unavailable(String),
    /// The invocation ran longer than the configured timeout.
    TimedOut(Duration),
    /// git ran and exited non-zero.
    Exited { code: Option<i32>, stderr: String },
    /// Any other I/O problem while running git.
    Io(String),
}

impl fmt::Display for GitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(reason) => write!(f, "git could not be started: {reason}"),
            Self::TimedOut(after) => write!(f, "git timed out after {}s", after.as_secs()),
            Self::Exited { code, stderr } => match code {
                Some(code) => write!(f, "git exited with status {code}: {stderr}"),
                None => write!(f, "git was terminated by a signal: {stderr}"),
            },
            Self::Io(reason) => write!(f, "git I/O error: {reason}"),
        }
    }
}

/// Runs git commands with prompts disabled and a per-invocation timeout.
#[derive(Debug, Clone)]
pub struct Git {
    program: OsString,
    timeout: Duration,
}

impl Git {
    /// Use the `git` found on `PATH`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("git", timeout)
    }

    /// Use a specific git executable.
    pub fn with_program(program: impl Into<OsString>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Run git with `args`, optionally inside `cwd`, returning trimmed stdout.
    ///
    /// # Errors
    ///
    /// Returns a [`GitFailure`] describing why the command did not succeed.
    pub async fn run<I, S>(&self, cwd: Option<&Path>, args: I) -> Result<String, GitFailure>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        debug!(command = ?command.as_std(), "Running git");

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => return Err(GitFailure::TimedOut(self.timeout)),
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(GitFailure::Unavailable(e.to_string()));
            }
            Ok(Err(e)) => return Err(GitFailure::Io(e.to_string())),
            Ok(Ok(output)) => output,
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(GitFailure::Exited {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    /// Commit id checked out in `repo`, if it can be resolved.
    pub async fn head_revision(&self, repo: &Path) -> Option<String> {
        self.run(Some(repo), ["rev-parse", "HEAD"])
            .await
            .ok()
            .filter(|rev| !rev.is_empty())
    }
}
