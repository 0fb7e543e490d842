// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Restart a command when watched files change.
//!
//! Watch mode keeps a development command running while its sources change
//! underneath it: save a file, and the command is stopped and started again.
//! The watched directory is observed recursively, change events are filtered
//! through glob-based [`WatchRules`], and the running child is replaced by a
//! [`Reloader`].
//!
//! # Event Handling
//!
//! Only file creation, modification, and removal trigger a reload. Editors
//! tend to produce a burst of events per save, so matching events are left
//! to settle briefly and coalesced into a single restart.
//!
//! # Shutdown
//!
//! The loop runs until interrupted. On interrupt the current child is
//! stopped the same way a reload would stop it, then the loop returns.

use glob::Pattern;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    process::{Child, Command},
    sync::mpsc,
    time::{sleep, timeout},
};
use tracing::{debug, info, instrument, warn};

use crate::syscall::Invocation;

/// How long matching events get to settle before the restart happens.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// How long a child gets to exit after a polite stop request.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Glob rules selecting which changed files trigger a reload.
///
/// Ignore patterns always win. With no watch patterns at all, every
/// non-ignored file counts. Patterns are matched against the path relative
/// to the watched directory, and against the bare file name, so `*.rs`
/// catches changes inside subdirectories too.
#[derive(Debug, Clone, Default)]
pub struct WatchRules {
    patterns: Vec<Pattern>,
    ignores: Vec<Pattern>,
}

impl WatchRules {
    /// Construct new rules from raw glob patterns.
    ///
    /// # Errors
    ///
    /// - Return [`WatchError::Pattern`] if any pattern is not a valid glob.
    pub fn new(
        patterns: impl IntoIterator<Item = impl AsRef<str>>,
        ignores: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self> {
        Ok(Self {
            patterns: parse_patterns(patterns)?,
            ignores: parse_patterns(ignores)?,
        })
    }

    /// Check whether a change at the given relative path triggers a reload.
    pub fn matches(&self, path: &Path) -> bool {
        if self.ignores.iter().any(|ignore| ignore.matches_path(path)) {
            return false;
        }

        if self.patterns.is_empty() {
            return true;
        }

        let by_name = path.file_name().is_some_and(|name| {
            let name = name.to_string_lossy();
            self.patterns.iter().any(|pattern| pattern.matches(&name))
        });

        by_name || self.patterns.iter().any(|pattern| pattern.matches_path(path))
    }
}

fn parse_patterns(raw: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Vec<Pattern>> {
    raw.into_iter()
        .map(|raw| {
            Pattern::new(raw.as_ref()).map_err(|err| WatchError::Pattern {
                source: err,
                pattern: raw.as_ref().into(),
            })
        })
        .collect()
}

/// Supervise the application process between reloads.
///
/// Runs the command the way a developer would by hand: the child inherits
/// the terminal, and a reload stops it politely before spawning the next
/// one.
#[derive(Debug)]
pub struct Reloader {
    invocation: Invocation,
    child: Option<Child>,
}

impl Reloader {
    /// Construct new reloader for target invocation.
    pub fn new(invocation: Invocation) -> Self {
        Self {
            invocation,
            child: None,
        }
    }

    /// Process id of the current child, while one is running.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Spawn a fresh child with inherited standard streams.
    ///
    /// # Errors
    ///
    /// - Return [`WatchError::Spawn`] if the OS cannot start the command at
    ///   all.
    pub fn start(&mut self) -> Result<()> {
        debug!("spawn {:?}", self.invocation.label());
        let child = Command::new(self.invocation.program())
            .args(self.invocation.args())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| WatchError::Spawn {
                source: err,
                label: self.invocation.label().into(),
            })?;
        self.child = Some(child);

        Ok(())
    }

    /// Stop the current child, then spawn a fresh one.
    ///
    /// # Errors
    ///
    /// - Return [`WatchError::Stop`] if the old child cannot be stopped.
    /// - Return [`WatchError::Spawn`] if the OS cannot start the command at
    ///   all.
    pub async fn restart(&mut self) -> Result<()> {
        self.stop().await?;
        self.start()
    }

    /// Stop the current child, if any.
    ///
    /// Requests termination first, and escalates to a hard kill when the
    /// child outstays the grace period. The child is fully reaped before
    /// this returns.
    ///
    /// # Errors
    ///
    /// - Return [`WatchError::Stop`] if the child cannot be killed or
    ///   reaped.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        debug!("stop {:?}", self.invocation.label());
        request_stop(&mut child);
        match timeout(STOP_GRACE, child.wait()).await {
            Ok(status) => {
                status.map_err(|err| self.stop_error(err))?;
            }
            Err(_) => {
                warn!(
                    "{:?} ignored the stop request, killing it",
                    self.invocation.label()
                );
                child.start_kill().map_err(|err| self.stop_error(err))?;
                child.wait().await.map_err(|err| self.stop_error(err))?;
            }
        }

        Ok(())
    }

    fn stop_error(&self, source: std::io::Error) -> WatchError {
        WatchError::Stop {
            source,
            label: self.invocation.label().into(),
        }
    }
}

#[cfg(unix)]
fn request_stop(child: &mut Child) {
    use nix::{
        sys::signal::{kill, Signal},
        unistd::Pid,
    };

    if let Some(pid) = child.id() {
        if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_err() {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) {
    let _ = child.start_kill();
}

/// Run invocation under watch, restarting it whenever matching files change.
///
/// Blocks until interrupted. Changes anywhere under the watched directory
/// are matched against the rules relative to that directory; each matching
/// change stops the running child and spawns a fresh one.
///
/// # Errors
///
/// - Return [`WatchError::Resolve`] if the watch directory cannot be
///   resolved.
/// - Return [`WatchError::Watch`] if the file system watcher cannot be set
///   up.
/// - Return [`WatchError::Spawn`] if the OS cannot start the command at all.
/// - Return [`WatchError::Stop`] if a child cannot be stopped during reload
///   or shutdown.
#[instrument(skip(invocation, rules), level = "debug")]
pub async fn watch_and_reload(
    invocation: Invocation,
    dir: &Path,
    rules: WatchRules,
) -> Result<()> {
    // Notify reports absolute paths, so rule matching needs the canonical
    // root to strip.
    let root = dir.canonicalize().map_err(|err| WatchError::Resolve {
        source: err,
        path: dir.to_path_buf(),
    })?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            if let Some(path) = relevant_path(&event) {
                let _ = tx.send(path);
            }
        }
    })
    .map_err(|err| WatchError::Watch {
        source: err,
        path: root.clone(),
    })?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|err| WatchError::Watch {
            source: err,
            path: root.clone(),
        })?;
    info!("watching {:?} for changes", root.display());

    let mut reloader = Reloader::new(invocation);
    reloader.start()?;

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            changed = rx.recv() => {
                let Some(path) = changed else { break };
                let relative = path.strip_prefix(&root).unwrap_or(path.as_path());
                if !rules.matches(relative) {
                    continue;
                }

                sleep(SETTLE_DELAY).await;
                while rx.try_recv().is_ok() {}

                info!("change detected in {:?}", relative.display());
                reloader.restart().await?;
            }
            _ = &mut interrupt => {
                info!("interrupt received, stopping watch");
                break;
            }
        }
    }

    reloader.stop().await?;

    Ok(())
}

fn relevant_path(event: &Event) -> Option<PathBuf> {
    use notify::event::{CreateKind, RemoveKind};

    let relevant = match event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => false,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => true,
        _ => false,
    };

    if relevant {
        event.paths.first().cloned()
    } else {
        None
    }
}

/// Watch mode error types.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Watch pattern fails to parse as a glob.
    #[error("invalid watch pattern {pattern:?}")]
    Pattern {
        #[source]
        source: glob::PatternError,
        pattern: String,
    },

    /// Watched directory cannot be resolved.
    #[error("cannot resolve watch directory {path:?}")]
    Resolve {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// File system watcher cannot be set up.
    #[error("cannot watch {path:?} for changes")]
    Watch {
        #[source]
        source: notify::Error,
        path: PathBuf,
    },

    /// The OS could not start the requested command at all.
    #[error("failed to start command for {label:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        label: String,
    },

    /// Current child cannot be stopped or reaped.
    #[error("failed to stop command for {label:?}")]
    Stop {
        #[source]
        source: std::io::Error,
        label: String,
    },
}

/// Friendly result alias :3
pub type Result<T, E = WatchError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    fn event(kind: EventKind, path: &str) -> Event {
        Event {
            kind,
            paths: vec![PathBuf::from(path)],
            attrs: Default::default(),
        }
    }

    #[test_case(EventKind::Create(CreateKind::File), true; "file creation")]
    #[test_case(EventKind::Modify(ModifyKind::Any), true; "modification")]
    #[test_case(EventKind::Remove(RemoveKind::File), true; "file removal")]
    #[test_case(EventKind::Create(CreateKind::Folder), false; "folder creation")]
    #[test_case(EventKind::Remove(RemoveKind::Folder), false; "folder removal")]
    #[test_case(EventKind::Access(AccessKind::Any), false; "access")]
    #[test]
    fn relevant_path_filters_event_kinds(kind: EventKind, expect: bool) {
        let result = relevant_path(&event(kind, "src/lib.rs"));
        assert_eq!(result.is_some(), expect);
    }

    #[test]
    fn rules_match_by_file_name_across_subdirectories() -> anyhow::Result<()> {
        let rules = WatchRules::new(["*.rs"], Vec::<&str>::new())?;

        assert!(rules.matches(Path::new("main.rs")));
        assert!(rules.matches(Path::new("deep/nested/module.rs")));
        assert!(!rules.matches(Path::new("README.md")));

        Ok(())
    }

    #[test]
    fn ignore_patterns_always_win() -> anyhow::Result<()> {
        let rules = WatchRules::new(["*.py"], ["venv/*"])?;

        assert!(rules.matches(Path::new("app.py")));
        assert!(!rules.matches(Path::new("venv/lib.py")));

        Ok(())
    }

    #[test]
    fn empty_patterns_match_everything_not_ignored() -> anyhow::Result<()> {
        let rules = WatchRules::new(Vec::<&str>::new(), ["target/*"])?;

        assert!(rules.matches(Path::new("Cargo.toml")));
        assert!(!rules.matches(Path::new("target/debug")));

        Ok(())
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let result = WatchRules::new(["[unclosed"], Vec::<&str>::new());
        assert!(matches!(result, Err(WatchError::Pattern { .. })));
    }

    #[tokio::test]
    async fn reloader_stops_a_running_child() -> anyhow::Result<()> {
        let invocation = Invocation::new("sleeper", "sh").with_args(["-c", "sleep 30"]);
        let mut reloader = Reloader::new(invocation);

        reloader.start()?;
        assert!(reloader.id().is_some());

        reloader.stop().await?;
        assert!(reloader.id().is_none());

        Ok(())
    }

    #[tokio::test]
    async fn restart_replaces_the_child() -> anyhow::Result<()> {
        let invocation = Invocation::new("sleeper", "sh").with_args(["-c", "sleep 30"]);
        let mut reloader = Reloader::new(invocation);

        reloader.start()?;
        let first = reloader.id();
        reloader.restart().await?;
        let second = reloader.id();

        assert!(first.is_some());
        assert!(second.is_some());
        assert_ne!(first, second);

        reloader.stop().await?;

        Ok(())
    }

    #[tokio::test]
    async fn stopping_without_a_child_is_a_no_op() -> anyhow::Result<()> {
        let mut reloader = Reloader::new(Invocation::new("idle", "true"));
        reloader.stop().await?;

        Ok(())
    }
}
