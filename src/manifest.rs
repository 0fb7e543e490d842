// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Provisioning manifest layout.
//!
//! Specify the layout of the manifest file that Rigup walks when
//! provisioning a workstation, to simplify the process of serialization and
//! deserialization. File I/O is left to the caller to figure out.
//!
//! # General Layout
//!
//! A manifest is composed of two basic parts: settings and a package
//! listing. The settings section configures the run as a whole, e.g., which
//! package manager backend to use, and whether a failed install should halt
//! the run. The package listing names each package to ensure installed, with
//! an optional human-facing label for progress lines.
//!
//! ```toml
//! [settings]
//! description = "shell tooling for a fresh box"
//! backend = "apt"
//! halt_on_failure = false
//!
//! [[package]]
//! name = "curl"
//! label = "cURL"
//!
//! [[package]]
//! name = "jq"
//! ```
//!
//! The manifest is declarative input to the provisioning run, nothing more.
//! There is no dependency resolution between entries; packages are visited
//! top to bottom, exactly as listed.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    str::FromStr,
};

use crate::package::{backend::BackendKind, PackageName};

/// Provisioning manifest layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Manifest {
    /// Settings for the provisioning run.
    pub settings: ManifestSettings,

    /// Packages to ensure installed, in listed order.
    #[serde(rename = "package", default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<PackageEntry>,
}

impl FromStr for Manifest {
    type Err = ManifestError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data).map_err(ManifestError::Deserialize)
    }
}

impl Display for Manifest {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ManifestError::Serialize)?
                .as_str(),
        )
    }
}

/// Manifest configuration settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ManifestSettings {
    /// Brief description of what this manifest provisions.
    pub description: String,

    /// Package manager backend to use; detected from the host when unset.
    pub backend: Option<BackendKind>,

    /// Stop at the first failed install instead of reporting and moving on.
    #[serde(default)]
    pub halt_on_failure: bool,
}

/// One package to ensure installed.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct PackageEntry {
    /// Name the package manager knows the package by.
    pub name: PackageName,

    /// Human-facing label for progress lines.
    pub label: Option<String>,
}

impl PackageEntry {
    /// Label to show the user, falling back to the package name.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(self.name.as_str())
    }
}

/// Manifest error types.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Failed to deserialize manifest.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize manifest.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),
}

impl From<ManifestError> for FmtError {
    fn from(_: ManifestError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
pub type Result<T, E = ManifestError> = std::result::Result<T, E>;
