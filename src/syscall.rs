// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Supervised system call execution.
//!
//! Every external command Rigup runs goes through this module. A command is
//! described by an [`Invocation`], launched as a single child process whose
//! stdout is discarded, and whose stderr is redirected into a __capture
//! sink__ so it can be replayed to the user if the command fails. The child
//! is exposed through a [`ProcessHandle`] the moment it is spawned, which
//! lets a reporter poll its liveness while it runs. Once the child dies, the
//! captured stderr is collected into a [`RunResult`] and the sink is
//! destroyed.
//!
//! # Capture Sinks
//!
//! A capture sink is a uniquely named temporary file created at spawn time,
//! and owned by the handle of the child writing to it. Tying the sink to the
//! handle means it is removed on every exit path, including early drops, so
//! sequential invocations can never observe each other's output. One child,
//! one sink.
//!
//! # Liveness
//!
//! Callers that want progress feedback poll [`ProcessHandle::is_alive`]
//! between short sleeps, then hand the handle to [`collect`] for the final
//! blocking wait. Callers that do not care use [`run`], which composes the
//! two. Either way the exit status becomes observable exactly once, after
//! the child has fully terminated.

use std::{
    ffi::{OsStr, OsString},
    process::{ExitStatus, Stdio},
};

use tempfile::NamedTempFile;
use tokio::process::{Child, Command};
use tracing::{debug, instrument};

/// External command to execute under supervision.
///
/// Carries a human-readable label alongside the program and its arguments.
/// Immutable once constructed, and consumed by a single spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    label: String,
    program: OsString,
    args: Vec<OsString>,
}

impl Invocation {
    /// Construct new invocation for target program.
    pub fn new(label: impl Into<String>, program: impl Into<OsString>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append arguments to pass to the program.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Human-readable label for progress and report lines.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Program to execute.
    pub fn program(&self) -> &OsStr {
        &self.program
    }

    /// Arguments passed to the program.
    pub fn args(&self) -> &[OsString] {
        &self.args
    }
}

/// Outcome of one supervised run.
///
/// Built only after the child has fully terminated. A non-zero exit code is
/// reported faithfully as data; deciding whether that constitutes an overall
/// failure belongs to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Exit code the host OS reported for the child.
    pub exit_code: i32,

    /// Captured stderr of the child, line by line, in order.
    pub stderr_lines: Vec<String>,
}

impl RunResult {
    /// Check if the child exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Opaque reference to an in-flight child process.
///
/// Owned by the spawning call for the process's duration. Reporters receive
/// it by mutable reference to poll liveness; they never own or terminate the
/// process themselves. At most one handle exists per invocation.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    sink: NamedTempFile,
}

impl ProcessHandle {
    /// OS process id, while the child is still running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Check whether the child is still running.
    ///
    /// A handle that can no longer be polled counts as dead.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// Launch invocation as a supervised child process.
///
/// The child's stdout is discarded, and its stderr is redirected into a
/// fresh capture sink. Returns immediately with a [`ProcessHandle`] so the
/// caller can observe progress concurrently. The child is marked for a
/// best-effort kill if the handle is dropped before being collected.
///
/// # Errors
///
/// - Return [`Error::CaptureSink`] if the capture sink cannot be created.
/// - Return [`Error::Spawn`] if the OS cannot start the command at all.
#[instrument(skip(invocation), level = "debug")]
pub fn spawn_supervised(invocation: &Invocation) -> Result<ProcessHandle> {
    let sink = NamedTempFile::new().map_err(Error::CaptureSink)?;
    let stderr = sink.reopen().map_err(Error::CaptureSink)?;
    debug!(
        "spawn {:?} with capture sink at {:?}",
        invocation.label(),
        sink.path()
    );

    let child = Command::new(invocation.program())
        .args(invocation.args())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| Error::Spawn {
            source: err,
            label: invocation.label().into(),
        })?;

    Ok(ProcessHandle { child, sink })
}

/// Wait for child termination, and collect its captured stderr.
///
/// Blocks until the exit status is available, reads the capture sink back
/// line by line, and destroys the sink. The returned [`RunResult`] is owned
/// exclusively by the caller.
///
/// # Errors
///
/// - Return [`Error::Wait`] if the exit status cannot be acquired.
/// - Return [`Error::CaptureSink`] if the capture sink cannot be read back.
pub async fn collect(mut handle: ProcessHandle) -> Result<RunResult> {
    let status = handle.child.wait().await.map_err(Error::Wait)?;
    let captured = tokio::fs::read_to_string(handle.sink.path())
        .await
        .map_err(Error::CaptureSink)?;
    let stderr_lines = captured.lines().map(str::to_owned).collect();

    // INVARIANT: Sink is dropped with the handle, removing the temporary
    // file on every exit path.
    Ok(RunResult {
        exit_code: exit_code_of(status),
        stderr_lines,
    })
}

/// Run invocation start to finish without liveness feedback.
///
/// # Errors
///
/// - Return [`Error::CaptureSink`] if the capture sink cannot be managed.
/// - Return [`Error::Spawn`] if the OS cannot start the command at all.
/// - Return [`Error::Wait`] if the exit status cannot be acquired.
pub async fn run(invocation: &Invocation) -> Result<RunResult> {
    let handle = spawn_supervised(invocation)?;
    collect(handle).await
}

/// Run invocation with all output discarded, reporting only exit-zero.
///
/// Used for ground-truth queries like "is this package installed" where the
/// exit code is the entire answer.
///
/// # Errors
///
/// - Return [`Error::Spawn`] if the OS cannot start the command at all.
pub async fn probe(invocation: &Invocation) -> Result<bool> {
    let status = Command::new(invocation.program())
        .args(invocation.args())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|err| Error::Spawn {
            source: err,
            label: invocation.label().into(),
        })?;

    Ok(status.success())
}

// Signal deaths follow the shell convention of 128 + signal number, so the
// reported code matches what `$?` would have shown.
#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

/// Supervised execution error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Capture sink cannot be created or read back.
    #[error("failed to manage stderr capture sink")]
    CaptureSink(#[source] std::io::Error),

    /// The OS could not start the requested command at all.
    #[error("failed to start command for {label:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        label: String,
    },

    /// Exit status of the child cannot be acquired.
    #[error("failed to wait on child process")]
    Wait(#[source] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sh(label: &str, script: &str) -> Invocation {
        Invocation::new(label, "sh").with_args(["-c", script])
    }

    #[tokio::test]
    async fn reports_exit_code_without_translation() -> anyhow::Result<()> {
        let result = run(&sh("exit seven", "exit 7")).await?;
        assert_eq!(result.exit_code, 7);
        assert!(!result.success());

        let result = run(&sh("exit zero", "exit 0")).await?;
        assert_eq!(result.exit_code, 0);
        assert!(result.success());

        Ok(())
    }

    #[tokio::test]
    async fn captures_stderr_lines_in_order() -> anyhow::Result<()> {
        let result = run(&sh(
            "stderr lines",
            "echo one >&2; echo two >&2; echo three >&2; exit 1",
        ))
        .await?;

        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stderr_lines, vec!["one", "two", "three"]);

        Ok(())
    }

    #[tokio::test]
    async fn discards_stdout() -> anyhow::Result<()> {
        let result = run(&sh("noisy stdout", "echo loud; echo louder")).await?;
        assert_eq!(result.stderr_lines, Vec::<String>::new());
        assert!(result.success());

        Ok(())
    }

    #[tokio::test]
    async fn sequential_runs_stay_isolated() -> anyhow::Result<()> {
        let first = run(&sh("fails loudly", "echo leak me >&2; exit 3")).await?;
        let second = run(&sh("quiet success", "exit 0")).await?;

        assert_eq!(first.stderr_lines, vec!["leak me"]);
        assert_eq!(second.stderr_lines, Vec::<String>::new());
        assert_eq!(second.exit_code, 0);

        Ok(())
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let invocation = Invocation::new("no such program", "rigup-no-such-binary-here");
        let error = run(&invocation).await.unwrap_err();
        assert!(matches!(error, Error::Spawn { .. }));
    }

    #[tokio::test]
    async fn handle_observes_liveness_until_death() -> anyhow::Result<()> {
        let mut handle = spawn_supervised(&sh("short sleep", "sleep 0.2"))?;
        assert!(handle.id().is_some());

        while handle.is_alive() {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let result = collect(handle).await?;
        assert_eq!(result.exit_code, 0);

        Ok(())
    }

    #[tokio::test]
    async fn probe_reflects_exit_status() -> anyhow::Result<()> {
        assert!(probe(&sh("probe ok", "exit 0")).await?);
        assert!(!probe(&sh("probe fail", "exit 1")).await?);

        Ok(())
    }
}
