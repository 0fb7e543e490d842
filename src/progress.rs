// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Liveness feedback for supervised commands.
//!
//! While a supervised child runs, the user sees a small spinner next to the
//! command's label. The spinner is pure presentation: it polls the child's
//! [`ProcessHandle`] at a fixed cadence, draws a frame, and stops the moment
//! liveness fails. It never touches the child or its result.
//!
//! # Render Modes
//!
//! Interactive terminals get a 4-frame spinner redrawn in place, with cursor
//! discipline handled by indicatif. Environments without cursor control
//! (pipes, CI logs) fall back to plain append-only lines that carry no
//! escape sequences at all, so captured logs stay readable.
//!
//! Success and failure banners are the caller's to request once the run is
//! over; the spinner itself leaves no trace behind.

use std::{future::Future, time::Duration};

use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::time::sleep;

use crate::syscall::ProcessHandle;

/// Spinner glyph rotation.
const TICK_FRAMES: &[&str] = &["|", "/", "-", "\\"];

/// Cadence between liveness polls.
const TICK_INTERVAL: Duration = Duration::from_millis(200);

/// Layer of indirection for user-facing run feedback.
pub trait Report {
    /// Render liveness feedback until the handle's process dies.
    ///
    /// Must stop the instant the liveness check fails, emitting no further
    /// frame after that point.
    fn attend(&self, handle: &mut ProcessHandle, label: &str) -> impl Future<Output = ()>;

    /// Emit one success line for label.
    fn success(&self, label: &str);

    /// Emit one failure line for label.
    fn failure(&self, label: &str, exit_code: i32);

    /// Emit one captured stderr line with an error marker.
    fn detail(&self, line: &str);
}

/// How run feedback should be rendered.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Cursor control available; redraw frames in place.
    #[default]
    Interactive,

    /// Append-only output for logs and pipes; no escape sequences.
    PlainLog,
}

impl RenderMode {
    /// Detect render mode from stderr's terminal capability.
    pub fn detect() -> Self {
        if console::user_attended_stderr() {
            Self::Interactive
        } else {
            Self::PlainLog
        }
    }
}

/// Render one spinner frame as text.
///
/// Interactive frames cycle through the glyph rotation per poll round. Plain
/// frames pin a single glyph, and never contain cursor-control sequences.
pub fn frame(mode: RenderMode, round: usize, label: &str) -> String {
    let glyph = match mode {
        RenderMode::Interactive => TICK_FRAMES[round % TICK_FRAMES.len()],
        RenderMode::PlainLog => "*",
    };

    format!("[{glyph}] {label}")
}

/// Terminal spinner reporter.
///
/// Polls the child at a fixed cadence, sleeping between polls, and renders
/// according to its [`RenderMode`].
#[derive(Debug, Clone, Default)]
pub struct SpinnerReporter {
    mode: RenderMode,
}

impl SpinnerReporter {
    /// Construct new reporter with explicit render mode.
    pub fn new(mode: RenderMode) -> Self {
        Self { mode }
    }

    /// Construct new reporter, detecting render mode from the environment.
    pub fn from_env() -> Self {
        Self::new(RenderMode::detect())
    }

    fn spinner_style() -> ProgressStyle {
        // Indicatif reserves the last tick string for the finished state,
        // which finish_and_clear never shows. The trailing entry keeps the
        // live rotation at the full four frames.
        let ticks: Vec<&str> = TICK_FRAMES.iter().copied().chain([""]).collect();
        ProgressStyle::with_template("[{spinner:.yellow}] {msg}")
            .unwrap()
            .tick_strings(&ticks)
    }
}

impl Report for SpinnerReporter {
    async fn attend(&self, handle: &mut ProcessHandle, label: &str) {
        match self.mode {
            RenderMode::Interactive => {
                let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
                bar.set_style(Self::spinner_style());
                bar.set_message(label.to_owned());

                while handle.is_alive() {
                    bar.tick();
                    sleep(TICK_INTERVAL).await;
                }

                // INVARIANT: No frame survives past process death.
                bar.finish_and_clear();
            }
            RenderMode::PlainLog => {
                eprintln!("{}", frame(RenderMode::PlainLog, 0, label));

                while handle.is_alive() {
                    sleep(TICK_INTERVAL).await;
                }
            }
        }
    }

    fn success(&self, label: &str) {
        match self.mode {
            RenderMode::Interactive => {
                eprintln!("{} {label}", style("✓").green().bold());
            }
            RenderMode::PlainLog => eprintln!("[ok] {label}"),
        }
    }

    fn failure(&self, label: &str, exit_code: i32) {
        match self.mode {
            RenderMode::Interactive => {
                eprintln!("{} {label} (exit {exit_code})", style("✗").red().bold());
            }
            RenderMode::PlainLog => eprintln!("[failed] {label} (exit {exit_code})"),
        }
    }

    fn detail(&self, line: &str) {
        match self.mode {
            RenderMode::Interactive => {
                eprintln!("    {} {line}", style("↳").red());
            }
            RenderMode::PlainLog => eprintln!("    !! {line}"),
        }
    }
}
