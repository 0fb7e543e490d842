// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Manifest-driven provisioning runs.
//!
//! A provisioning run walks every package entry of a [`Manifest`] through
//! the install guard, top to bottom, and folds the outcomes into a
//! [`ProvisionReport`]. The report carries the script-level exit status the
//! whole toolkit promises its callers: zero when everything installed or was
//! already present, otherwise the exit code of the last failing install.
//!
//! Failures are reported and walked past by default. Manifests that prefer
//! to stop at the first broken package set `halt_on_failure`; the decision
//! lives with the manifest author, not this module.

use tracing::{info, instrument, warn};

use crate::{
    manifest::Manifest,
    package::{backend::PackageBackend, InstallGuard, InstallOutcome, PackageName},
    progress::Report,
};

/// Summary of one provisioning run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Packages skipped because they were already present.
    pub skipped: usize,

    /// Packages freshly installed without error.
    pub installed: usize,

    /// Packages whose install command failed, with their exit codes, in
    /// encounter order.
    pub failures: Vec<(PackageName, i32)>,
}

impl ProvisionReport {
    /// Check if every entry ended up installed or skipped.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Script-level exit status for the run.
    ///
    /// Zero when clean, otherwise the last failure's exit code.
    pub fn exit_code(&self) -> i32 {
        self.failures.last().map(|(_, code)| *code).unwrap_or(0)
    }
}

/// Installed-state of one manifest entry, as found by [`Provisioner::survey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveyEntry {
    /// Package the entry names.
    pub name: PackageName,

    /// Label the manifest shows for it.
    pub label: String,

    /// Whether the backend reports it installed.
    pub installed: bool,
}

/// Drive a full manifest through the install guard.
#[derive(Debug, Clone)]
pub struct Provisioner<B, R>
where
    B: PackageBackend,
    R: Report,
{
    guard: InstallGuard<B, R>,
    halt_on_failure: bool,
}

impl<B, R> Provisioner<B, R>
where
    B: PackageBackend,
    R: Report,
{
    /// Construct new provisioner.
    pub fn new(guard: InstallGuard<B, R>, halt_on_failure: bool) -> Self {
        Self {
            guard,
            halt_on_failure,
        }
    }

    /// Ensure every package in the manifest is installed.
    ///
    /// Entries are visited in listed order. Install failures land in the
    /// report rather than aborting the walk, unless the run was constructed
    /// with halt-on-failure.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::Package`] if a query or install cannot be
    ///   spawned at all. Ordinary non-zero installs are data in the report,
    ///   not errors.
    #[instrument(skip(self, manifest), level = "debug")]
    pub async fn provision(&self, manifest: &Manifest) -> Result<ProvisionReport> {
        let mut report = ProvisionReport::default();

        for entry in &manifest.packages {
            let outcome = self
                .guard
                .ensure_installed(&entry.name, entry.display_label())
                .await?;

            match outcome {
                InstallOutcome::Skipped => report.skipped += 1,
                InstallOutcome::Ran(result) if result.success() => report.installed += 1,
                InstallOutcome::Ran(result) => {
                    warn!(
                        "install of {} failed with exit code {}",
                        entry.name, result.exit_code
                    );
                    report.failures.push((entry.name.clone(), result.exit_code));

                    if self.halt_on_failure {
                        info!("halting provisioning run at first failure");
                        break;
                    }
                }
            }
        }

        info!(
            "provisioning done: {} installed, {} skipped, {} failed",
            report.installed,
            report.skipped,
            report.failures.len()
        );

        Ok(report)
    }

    /// Report installed-state per manifest entry, performing zero installs.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::Package`] if a query cannot be spawned.
    pub async fn survey(&self, manifest: &Manifest) -> Result<Vec<SurveyEntry>> {
        let mut entries = Vec::new();

        for entry in &manifest.packages {
            let installed = self.guard.is_installed(&entry.name).await?;
            entries.push(SurveyEntry {
                name: entry.name.clone(),
                label: entry.display_label().to_owned(),
                installed,
            });
        }

        Ok(entries)
    }
}

/// Provisioning error types.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Install guard failed below the outcome level.
    #[error(transparent)]
    Package(#[from] crate::package::PackageError),
}

/// Friendly result alias :3
pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        manifest::{ManifestSettings, PackageEntry},
        package::backend::PackageBackend,
        progress::{RenderMode, SpinnerReporter},
        syscall::Invocation,
    };
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Marker-file backend whose install deliberately breaks for one
    /// package name.
    #[derive(Debug)]
    struct ScriptedBackend {
        dir: PathBuf,
        broken: &'static str,
    }

    impl ScriptedBackend {
        fn marker(&self, name: &PackageName) -> String {
            self.dir.join(name.as_str()).to_string_lossy().into_owned()
        }
    }

    impl PackageBackend for ScriptedBackend {
        fn query(&self, name: &PackageName) -> Invocation {
            Invocation::new(format!("query {name}"), "test")
                .with_args(["-e".to_owned(), self.marker(name)])
        }

        fn install(&self, name: &PackageName) -> Invocation {
            if name.as_str() == self.broken {
                Invocation::new(format!("install {name}"), "sh").with_args([
                    "-c",
                    "echo 'E: Unable to locate package' >&2; exit 100",
                ])
            } else {
                Invocation::new(format!("install {name}"), "touch").with_args([self.marker(name)])
            }
        }
    }

    fn manifest(names: &[&str]) -> Manifest {
        Manifest {
            settings: ManifestSettings::default(),
            packages: names
                .iter()
                .map(|name| PackageEntry {
                    name: name.parse().unwrap(),
                    label: None,
                })
                .collect(),
        }
    }

    fn provisioner(
        dir: &TempDir,
        broken: &'static str,
        halt_on_failure: bool,
    ) -> Provisioner<ScriptedBackend, SpinnerReporter> {
        let backend = ScriptedBackend {
            dir: dir.path().to_path_buf(),
            broken,
        };
        let guard = InstallGuard::new(backend, SpinnerReporter::new(RenderMode::PlainLog));
        Provisioner::new(guard, halt_on_failure)
    }

    #[tokio::test]
    async fn aggregates_skips_installs_and_failures() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("curl"), "")?;
        let provisioner = provisioner(&dir, "badpkg", false);

        let report = provisioner
            .provision(&manifest(&["curl", "jq", "badpkg"]))
            .await?;

        assert_eq!(report.skipped, 1);
        assert_eq!(report.installed, 1);
        assert_eq!(report.failures, vec![("badpkg".parse()?, 100)]);
        assert!(!report.is_clean());
        assert_eq!(report.exit_code(), 100);

        Ok(())
    }

    #[tokio::test]
    async fn clean_run_exits_zero() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let provisioner = provisioner(&dir, "unused", false);

        let report = provisioner.provision(&manifest(&["jq", "bat"])).await?;

        assert_eq!(report.installed, 2);
        assert!(report.is_clean());
        assert_eq!(report.exit_code(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn halt_on_failure_stops_the_walk() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let provisioner = provisioner(&dir, "badpkg", true);

        let report = provisioner
            .provision(&manifest(&["badpkg", "jq"]))
            .await?;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.installed, 0);
        // The walk stopped before jq; its marker never appeared.
        assert!(!dir.path().join("jq").exists());

        Ok(())
    }

    #[tokio::test]
    async fn survey_performs_no_installs() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("curl"), "")?;
        let provisioner = provisioner(&dir, "unused", false);

        let entries = provisioner.survey(&manifest(&["curl", "jq"])).await?;

        assert_eq!(entries.len(), 2);
        assert!(entries[0].installed);
        assert!(!entries[1].installed);
        // Surveying jq did not install it.
        assert!(!dir.path().join("jq").exists());

        Ok(())
    }
}
