// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Provision a fresh workstation from a declarative package manifest.
//!
//! Rigup keeps the boring part of a new machine boring: it reads a TOML
//! manifest of packages, asks the host package manager which of them are
//! already installed, and installs the rest one at a time under a spinner,
//! with captured stderr replayed on failure. Installs are idempotent by
//! construction, so running the same manifest twice is always safe.
//!
//! A small watch mode rounds out the toolkit: it keeps a development command
//! running and restarts it whenever matching files change.
//!
//! # Module Map
//!
//! - [`syscall`]: supervised child-process execution with stderr capture.
//! - [`progress`]: spinner liveness feedback and report lines.
//! - [`package`]: validated package names, backends, and the install guard.
//! - [`manifest`]: the TOML manifest layout.
//! - [`provision`]: manifest-driven runs and their reports.
//! - [`path`]: where the manifest lives by default.
//! - [`watch`]: restart a command when watched files change.

pub mod manifest;
pub mod package;
pub mod path;
pub mod progress;
pub mod provision;
pub mod syscall;
pub mod watch;
