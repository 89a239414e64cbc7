//! Action dispatch.
//!
//! The admission pipeline decides *what* to run; this module decides *how*.
//! [`ActionRouter`] is the seam: production wiring uses [`ProcessRouter`],
//! which spawns the configured constructor as a detached child process,
//! while tests substitute [`RecordingRouter`].
//!
//! Dispatch is fire-and-forget: the returned status reflects spawn success
//! only, never the child's eventual exit code, so a hanging action script
//! cannot stall packet reception.

use std::sync::Mutex;
use tokio::process::Command;
use tracing::debug;

use crate::error::{KnockError, Result};

/// Routes an admitted knock or dead-drop match to its configured action.
pub trait ActionRouter: Send + Sync {
    /// Spawn `constructor` with the given positional arguments.
    ///
    /// When `exec_split` is set and the constructor contains a space, the
    /// first token becomes the command and the remainder its leading
    /// argument (so `"/usr/bin/python3 /opt/handler.py"` works as written).
    fn dispatch(&self, constructor: &str, args: &[String], exec_split: bool) -> Result<()>;
}

/// Production router: spawns the constructor as a detached subprocess.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRouter;

impl ActionRouter for ProcessRouter {
    fn dispatch(&self, constructor: &str, args: &[String], exec_split: bool) -> Result<()> {
        let mut command = match split_constructor(constructor, exec_split) {
            (cmd, Some(leading)) => {
                let mut c = Command::new(cmd);
                c.arg(leading);
                c
            }
            (cmd, None) => Command::new(cmd),
        };

        let child = command
            .args(args)
            .spawn()
            .map_err(|e| KnockError::SpawnError(format!("{constructor}: {e}")))?;

        debug!(constructor, pid = ?child.id(), "Spawned action process");
        Ok(())
    }
}

/// Split a constructor into command and leading argument.
///
/// Only splits on the first space, and only when asked to: paths
/// containing spaces stay intact when `exec_split` is off.
fn split_constructor(constructor: &str, exec_split: bool) -> (&str, Option<&str>) {
    if !exec_split {
        return (constructor, None);
    }
    match constructor.split_once(' ') {
        Some((cmd, rest)) if !rest.trim().is_empty() => (cmd, Some(rest.trim_start())),
        _ => (constructor, None),
    }
}

/// A recorded dispatch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDispatch {
    /// Constructor path as configured.
    pub constructor: String,
    /// Positional arguments, in dispatch order.
    pub args: Vec<String>,
    /// Whether constructor splitting was requested.
    pub exec_split: bool,
}

/// Test double that records every dispatch instead of spawning.
#[derive(Debug, Default)]
pub struct RecordingRouter {
    calls: Mutex<Vec<RecordedDispatch>>,
}

impl RecordingRouter {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all dispatches so far.
    pub fn calls(&self) -> Vec<RecordedDispatch> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl ActionRouter for RecordingRouter {
    fn dispatch(&self, constructor: &str, args: &[String], exec_split: bool) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedDispatch {
                constructor: constructor.to_string(),
                args: args.to_vec(),
                exec_split,
            });
        }
        Ok(())
    }
}
