// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Package manager backends.
//!
//! A backend translates a validated [`PackageName`] into the concrete
//! command lines of one host package manager. Backends never run anything
//! themselves; they only construct [`Invocation`]s, which keeps the mapping
//! from name to argv explicit and free of shell interpolation.
//!
//! Two contracts per backend, both judged purely by exit code:
//!
//! 1. __Query__: exit zero means the package is installed. Treated as ground
//!    truth on every call, with no caching.
//! 2. __Install__: non-interactive, auto-confirmed install of one package.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};
use tracing::debug;

use crate::{
    package::PackageName,
    syscall::{self, Invocation},
};

/// Layer of indirection for host package manager access.
pub trait PackageBackend {
    /// Build the installed-state query for a package.
    ///
    /// Exit zero from the resulting invocation means "installed".
    fn query(&self, name: &PackageName) -> Invocation;

    /// Build the non-interactive install command for a package.
    fn install(&self, name: &PackageName) -> Invocation;
}

/// Debian/Ubuntu apt backend.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Apt;

impl PackageBackend for Apt {
    fn query(&self, name: &PackageName) -> Invocation {
        Invocation::new(format!("query {name}"), "dpkg").with_args(["-s", name.as_str()])
    }

    fn install(&self, name: &PackageName) -> Invocation {
        Invocation::new(format!("install {name}"), "sudo").with_args([
            "apt-get",
            "install",
            "--yes",
            name.as_str(),
        ])
    }
}

/// Homebrew backend for macOS and Linuxbrew hosts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Homebrew;

impl PackageBackend for Homebrew {
    fn query(&self, name: &PackageName) -> Invocation {
        Invocation::new(format!("query {name}"), "brew")
            .with_args(["list", "--versions", name.as_str()])
    }

    fn install(&self, name: &PackageName) -> Invocation {
        Invocation::new(format!("install {name}"), "brew").with_args(["install", name.as_str()])
    }
}

/// Selectable backend kinds, as named in manifests and CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Apt,

    #[serde(alias = "homebrew")]
    Brew,
}

impl FromStr for BackendKind {
    type Err = BackendError;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            "apt" => Ok(Self::Apt),
            "brew" | "homebrew" => Ok(Self::Brew),
            unknown => Err(BackendError::UnknownKind(unknown.into())),
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Apt => fmt.write_str("apt"),
            Self::Brew => fmt.write_str("brew"),
        }
    }
}

/// Backend selected for the running host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostBackend {
    Apt(Apt),
    Homebrew(Homebrew),
}

impl HostBackend {
    /// Select backend for an explicitly requested kind.
    pub fn from_kind(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Apt => Self::Apt(Apt),
            BackendKind::Brew => Self::Homebrew(Homebrew),
        }
    }

    /// Probe the host for a usable package manager.
    ///
    /// Apt wins on hosts where both respond. The probe is the exit code of
    /// the manager's version query, nothing fancier.
    ///
    /// # Errors
    ///
    /// - Return [`BackendError::NoSupportedBackend`] if neither apt-get nor
    ///   brew responds on this host.
    pub async fn detect() -> Result<Self> {
        if available("apt-get").await {
            debug!("detected apt-get on host");
            return Ok(Self::Apt(Apt));
        }

        if available("brew").await {
            debug!("detected brew on host");
            return Ok(Self::Homebrew(Homebrew));
        }

        Err(BackendError::NoSupportedBackend)
    }
}

impl PackageBackend for HostBackend {
    fn query(&self, name: &PackageName) -> Invocation {
        match self {
            Self::Apt(apt) => apt.query(name),
            Self::Homebrew(brew) => brew.query(name),
        }
    }

    fn install(&self, name: &PackageName) -> Invocation {
        match self {
            Self::Apt(apt) => apt.install(name),
            Self::Homebrew(brew) => brew.install(name),
        }
    }
}

async fn available(program: &str) -> bool {
    let invocation = Invocation::new(format!("detect {program}"), program).with_args(["--version"]);
    syscall::probe(&invocation).await.unwrap_or(false)
}

/// Backend selection error types.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Requested backend kind is not one we know.
    #[error("unknown backend kind {0:?}, expected \"apt\" or \"brew\"")]
    UnknownKind(String),

    /// Host has no package manager this crate understands.
    #[error("no supported package manager found on host (tried apt-get and brew)")]
    NoSupportedBackend,
}

/// Friendly result alias :3
pub type Result<T, E = BackendError> = std::result::Result<T, E>;
