// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Idempotent package installation.
//!
//! The front door for installing anything is [`InstallGuard`]. Before a
//! single byte of install work happens, the guard asks the host package
//! manager whether the package is already present, and skips the install
//! outright when it is. Absent packages are installed under a supervised
//! child process with spinner feedback, and the outcome is reported with one
//! banner line plus the captured stderr on failure.
//!
//! A full `ensure_installed` call walks exactly one of two paths:
//!
//! 1. Query says installed: report success, return [`InstallOutcome::Skipped`].
//! 2. Query says absent: run the install, then report success or failure by
//!    exit code, returning the faithful [`RunResult`] either way.
//!
//! Calling `ensure_installed` twice in a row for the same package performs
//! the install at most once; the second call always takes the skipped
//! branch. The guard never retries and never escalates: a failed install is
//! data for the caller's aggregation policy.
//!
//! # Package Names
//!
//! Package names travel straight into package manager argv, so they are
//! validated up front by the [`PackageName`] value type instead of being
//! spliced into a shell string. Anything that could smuggle shell syntax is
//! rejected at parse time.

pub mod backend;

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};
use tracing::{debug, info, instrument};

use crate::{
    package::backend::PackageBackend,
    progress::Report,
    syscall::{self, RunResult},
};

/// Validated package name.
///
/// Accepts the character set real apt and brew package names draw from:
/// ASCII alphanumerics plus `+`, `-`, `.`, `_`, and `@`, starting with an
/// alphanumeric. Everything else, in particular whitespace and shell
/// metacharacters, fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageName(String);

impl PackageName {
    /// Construct new validated package name.
    ///
    /// # Errors
    ///
    /// - Return [`PackageError::InvalidName`] if the name is empty, does not
    ///   start with an ASCII alphanumeric, or contains a character outside
    ///   the allowed set.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();

        let Some(first) = name.chars().next() else {
            return Err(PackageError::InvalidName {
                name,
                reason: "name is empty",
            });
        };

        if !first.is_ascii_alphanumeric() {
            return Err(PackageError::InvalidName {
                name,
                reason: "name must start with an ASCII alphanumeric",
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.' | '_' | '@'))
        {
            return Err(PackageError::InvalidName {
                name,
                reason: "name contains a character outside [A-Za-z0-9+-._@]",
            });
        }

        Ok(Self(name))
    }

    /// Treat package name as string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PackageName {
    type Err = PackageError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::new(name)
    }
}

impl TryFrom<String> for PackageName {
    type Error = PackageError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

impl From<PackageName> for String {
    fn from(name: PackageName) -> Self {
        name.0
    }
}

impl Display for PackageName {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Outcome of one idempotent install request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Package was already present; zero additional work performed.
    Skipped,

    /// Install command ran; its result is reported faithfully, non-zero
    /// exit codes included.
    Ran(RunResult),
}

impl InstallOutcome {
    /// Check if the package ended up installed without error.
    pub fn succeeded(&self) -> bool {
        match self {
            Self::Skipped => true,
            Self::Ran(result) => result.success(),
        }
    }

    /// Exit code to fold into a script-level status.
    ///
    /// A skipped install counts as zero. Callers that need to distinguish
    /// skips from fresh installs match on the outcome directly.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Skipped => 0,
            Self::Ran(result) => result.exit_code,
        }
    }
}

/// Idempotent install front door.
///
/// Pairs a [`PackageBackend`] that knows how to talk to the host package
/// manager with a [`Report`] implementation that narrates the run.
#[derive(Debug, Clone)]
pub struct InstallGuard<B, R>
where
    B: PackageBackend,
    R: Report,
{
    backend: B,
    reporter: R,
}

impl<B, R> InstallGuard<B, R>
where
    B: PackageBackend,
    R: Report,
{
    /// Construct new install guard.
    pub fn new(backend: B, reporter: R) -> Self {
        Self { backend, reporter }
    }

    /// Check installed state of a package without side effects.
    ///
    /// # Errors
    ///
    /// - Return [`PackageError::Syscall`] if the query cannot be spawned.
    pub async fn is_installed(&self, name: &PackageName) -> Result<bool> {
        Ok(syscall::probe(&self.backend.query(name)).await?)
    }

    /// Install a package unless the backend already reports it present.
    ///
    /// The query's exit code is ground truth, checked on every call. A
    /// present package short-circuits into a success line. An absent one is
    /// installed under spinner supervision, then reported: one banner line,
    /// plus each captured stderr line with an error marker on failure.
    ///
    /// # Errors
    ///
    /// - Return [`PackageError::Syscall`] if the query or install command
    ///   cannot be spawned or waited on at all. A non-zero install exit is
    ///   not an error here; it comes back inside [`InstallOutcome::Ran`].
    #[instrument(skip(self), level = "debug")]
    pub async fn ensure_installed(
        &self,
        name: &PackageName,
        label: &str,
    ) -> Result<InstallOutcome> {
        debug!("query backend for {name}");
        if self.is_installed(name).await? {
            info!("{name} already installed, skipping");
            self.reporter.success(label);
            return Ok(InstallOutcome::Skipped);
        }

        let invocation = self.backend.install(name);
        let mut handle = syscall::spawn_supervised(&invocation)?;
        self.reporter.attend(&mut handle, label).await;
        let result = syscall::collect(handle).await?;

        if result.success() {
            self.reporter.success(label);
        } else {
            self.reporter.failure(label, result.exit_code);
            for line in &result.stderr_lines {
                self.reporter.detail(line);
            }
        }

        Ok(InstallOutcome::Ran(result))
    }
}

/// Package installation error types.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// Package name fails validation.
    #[error("invalid package name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Underlying system call failed outright.
    #[error(transparent)]
    Syscall(#[from] crate::syscall::Error),
}

/// Friendly result alias :3
pub type Result<T, E = PackageError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::Invocation;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use std::{
        path::PathBuf,
        sync::{Arc, Mutex},
        time::Duration,
    };
    use tempfile::TempDir;

    #[test_case("curl"; "plain name")]
    #[test_case("g++"; "plus signs")]
    #[test_case("libssl1.1"; "dots and digits")]
    #[test_case("node@20"; "at version")]
    #[test_case("rust_analyzer"; "underscore")]
    #[test]
    fn package_name_accepts(raw: &str) {
        assert_eq!(PackageName::new(raw).unwrap().as_str(), raw);
    }

    #[test_case(""; "empty")]
    #[test_case("has space"; "whitespace")]
    #[test_case("rm -rf /"; "shell payload")]
    #[test_case(";evil"; "leading semicolon")]
    #[test_case("-starts-with-dash"; "leading dash")]
    #[test_case("new\nline"; "newline")]
    #[test]
    fn package_name_rejects(raw: &str) {
        assert!(matches!(
            PackageName::new(raw),
            Err(PackageError::InvalidName { .. })
        ));
    }

    /// Backend whose installed-state is a marker file per package.
    ///
    /// Query runs `test -e`, install runs `touch`, so the full guard flow
    /// exercises real child processes end to end.
    #[derive(Debug)]
    struct MarkerBackend {
        dir: PathBuf,
    }

    impl MarkerBackend {
        fn marker(&self, name: &PackageName) -> String {
            self.dir.join(name.as_str()).to_string_lossy().into_owned()
        }
    }

    impl PackageBackend for MarkerBackend {
        fn query(&self, name: &PackageName) -> Invocation {
            Invocation::new(format!("query {name}"), "test")
                .with_args(["-e".to_owned(), self.marker(name)])
        }

        fn install(&self, name: &PackageName) -> Invocation {
            Invocation::new(format!("install {name}"), "touch").with_args([self.marker(name)])
        }
    }

    /// Backend whose install always fails the way apt does for an unknown
    /// package.
    #[derive(Debug)]
    struct FailingBackend;

    impl PackageBackend for FailingBackend {
        fn query(&self, _name: &PackageName) -> Invocation {
            Invocation::new("query", "false")
        }

        fn install(&self, _name: &PackageName) -> Invocation {
            Invocation::new("install", "sh").with_args([
                "-c",
                "echo 'E: Unable to locate package gcc' >&2; exit 100",
            ])
        }
    }

    /// Reporter that records every emitted line for assertions.
    #[derive(Debug, Default, Clone)]
    struct RecordingReporter {
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingReporter {
        fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    impl Report for RecordingReporter {
        async fn attend(&self, handle: &mut crate::syscall::ProcessHandle, _label: &str) {
            while handle.is_alive() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        fn success(&self, label: &str) {
            self.lines.lock().unwrap().push(format!("ok {label}"));
        }

        fn failure(&self, label: &str, exit_code: i32) {
            self.lines
                .lock()
                .unwrap()
                .push(format!("fail {label} exit {exit_code}"));
        }

        fn detail(&self, line: &str) {
            self.lines.lock().unwrap().push(format!("!! {line}"));
        }
    }

    fn marker_guard(dir: &TempDir) -> InstallGuard<MarkerBackend, RecordingReporter> {
        let backend = MarkerBackend {
            dir: dir.path().to_path_buf(),
        };
        InstallGuard::new(backend, RecordingReporter::default())
    }

    #[tokio::test]
    async fn skips_when_already_installed() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let guard = marker_guard(&dir);
        let name: PackageName = "curl".parse()?;
        std::fs::write(dir.path().join("curl"), "")?;

        let outcome = guard.ensure_installed(&name, "cURL").await?;

        assert_eq!(outcome, InstallOutcome::Skipped);
        assert_eq!(guard.reporter.lines(), vec!["ok cURL"]);

        Ok(())
    }

    #[tokio::test]
    async fn installs_when_absent() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let guard = marker_guard(&dir);
        let name: PackageName = "jq".parse()?;

        let outcome = guard.ensure_installed(&name, "jq").await?;

        assert!(outcome.succeeded());
        assert!(matches!(outcome, InstallOutcome::Ran(_)));
        assert!(dir.path().join("jq").exists());
        assert_eq!(guard.reporter.lines(), vec!["ok jq"]);

        Ok(())
    }

    #[tokio::test]
    async fn reports_failure_with_captured_stderr() -> anyhow::Result<()> {
        let guard = InstallGuard::new(FailingBackend, RecordingReporter::default());
        let name: PackageName = "gcc".parse()?;

        let outcome = guard.ensure_installed(&name, "GCC").await?;

        let InstallOutcome::Ran(result) = &outcome else {
            panic!("expected a fresh install attempt");
        };
        assert_eq!(result.exit_code, 100);
        assert_eq!(result.stderr_lines, vec!["E: Unable to locate package gcc"]);
        assert_eq!(
            guard.reporter.lines(),
            vec!["fail GCC exit 100", "!! E: Unable to locate package gcc"]
        );

        Ok(())
    }

    #[tokio::test]
    async fn second_call_takes_the_skipped_branch() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let guard = marker_guard(&dir);
        let name: PackageName = "bat".parse()?;

        let first = guard.ensure_installed(&name, "bat").await?;
        let second = guard.ensure_installed(&name, "bat").await?;

        assert!(matches!(first, InstallOutcome::Ran(_)));
        assert!(first.succeeded());
        assert_eq!(second, InstallOutcome::Skipped);
        // Two success reports, one install.
        assert_eq!(guard.reporter.lines(), vec!["ok bat", "ok bat"]);

        Ok(())
    }
}
