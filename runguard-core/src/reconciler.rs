// runguard-core/src/reconciler.rs

//! Decides whether a guarded command needs to run and runs it.
//!
//! A host drives one [`CommandReconciler`] per convergence pass through five calls:
//! [`available`](CommandReconciler::available), [`list_changes`](CommandReconciler::list_changes),
//! [`converge`](CommandReconciler::converge), [`can_reload`](CommandReconciler::can_reload)
//! and [`reload`](CommandReconciler::reload). Guards are re-evaluated on every call;
//! nothing observed during planning is assumed to still hold at apply time.

use crate::errors::{Result, RunError};
use crate::guards::GuardState;
use crate::io::{CommandOutput, ExecIo, PosixIo, split_command_line};
use crate::spec::CommandSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// File whose presence marks the execution environment as usable.
pub const AVAILABILITY_PROBE: &str = "/bin/true";

/// Key reported by [`CommandReconciler::list_changes`] when the command would run.
pub const EXECUTE_CHANGE: &str = "execute";

/// Status a probe is treated as having returned when it could not be started.
const PROBE_SPAWN_FAILURE_STATUS: i32 = 127;

/// A pending difference between current and desired state.
///
/// Serializes as a `[current, desired]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(bool, bool)", into = "(bool, bool)")]
pub struct Change {
    pub current: bool,
    pub desired: bool,
}

impl From<(bool, bool)> for Change {
    fn from((current, desired): (bool, bool)) -> Self {
        Change { current, desired }
    }
}

impl From<Change> for (bool, bool) {
    fn from(change: Change) -> Self {
        (change.current, change.desired)
    }
}

pub type Changes = BTreeMap<String, Change>;

/// Reconciles [`CommandSpec`]s against the system reachable through `I`.
#[derive(Debug, Clone)]
pub struct CommandReconciler<I: ExecIo> {
    io: I,
    default_cwd: Option<PathBuf>,
}

impl CommandReconciler<PosixIo> {
    pub fn posix() -> Self {
        Self::new(PosixIo::new())
    }
}

impl<I: ExecIo> CommandReconciler<I> {
    pub fn new(io: I) -> Self {
        CommandReconciler {
            io,
            default_cwd: None,
        }
    }

    /// Working directory for commands whose spec sets no `cwd`.
    /// Without one, commands inherit the host process's directory.
    pub fn with_default_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.default_cwd = Some(cwd.into());
        self
    }

    pub fn io(&self) -> &I {
        &self.io
    }

    pub fn available(&self, _spec: &CommandSpec) -> bool {
        self.io.file_exists(Path::new(AVAILABILITY_PROBE))
    }

    /// Like [`available`](Self::available), as a `Result` the host can propagate.
    pub fn ensure_available(&self, spec: &CommandSpec) -> Result<()> {
        if self.available(spec) {
            Ok(())
        } else {
            Err(RunError::unavailable(format!(
                "'{}' not found",
                AVAILABILITY_PROBE
            )))
        }
    }

    /// Always `true`: a command resource can be re-applied in place.
    pub fn can_reload(&self) -> bool {
        true
    }

    /// Evaluates every guard of `spec` against the live system.
    ///
    /// All guards run, even once one of them already blocks, so every probe shows
    /// up in the logs. A probe exiting non-zero is guard input, not an error. Only
    /// a probe timeout or an unusable probe command line is returned as `Err`.
    pub fn evaluate_guards(&self, spec: &CommandSpec) -> Result<GuardState> {
        let timeout = spec.timeout_duration()?;
        let mut state = GuardState::permit_all();

        if let Some(path) = spec.creates() {
            state.creates = !self.io.file_exists(Path::new(path));
        }

        if let Some(probe) = spec.unless() {
            // Only run when the probe fails.
            state.unless = self.run_probe(spec, probe, timeout)? != 0;
        }

        if let Some(probe) = spec.onlyif() {
            // Only run when the probe succeeds.
            state.onlyif = self.run_probe(spec, probe, timeout)? == 0;
        }

        debug!(
            command = %spec.command,
            guards = %state,
            run = state.permits_run(),
            "Evaluated guards"
        );
        Ok(state)
    }

    /// Reports what [`converge`](Self::converge) would do, without doing it.
    pub fn list_changes(&self, spec: &CommandSpec) -> Result<Changes> {
        let mut changes = Changes::new();
        if self.evaluate_guards(spec)?.permits_run() {
            changes.insert(EXECUTE_CHANGE.to_string(), Change::from((false, true)));
        }
        Ok(changes)
    }

    /// The directory a command of `spec` runs in.
    pub fn resolve_cwd(&self, spec: &CommandSpec) -> Option<PathBuf> {
        spec.cwd()
            .map(PathBuf::from)
            .or_else(|| self.default_cwd.clone())
    }

    /// Runs `command_line` with the environment of `spec`.
    ///
    /// # Errors
    ///
    /// [`RunError::CommandFailed`] carrying the captured stderr when the command
    /// exits non-zero, [`RunError::Timeout`] when it outlives `timeout`.
    pub fn execute_command(
        &self,
        spec: &CommandSpec,
        command_line: &str,
        timeout: Duration,
        cwd: Option<&Path>,
    ) -> Result<CommandOutput> {
        let argv = split_command_line(command_line)?;
        let (program, args) = split_program(&argv, command_line)?;
        let output = self
            .io
            .run(program, args, spec.environment.as_ref(), cwd, timeout)?;

        if !output.success() {
            return Err(RunError::CommandFailed {
                command: command_line.to_string(),
                status: output.status,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// Runs `command_line` if the guards of `spec` permit it right now.
    ///
    /// Returns `Ok(true)` when the command ran and succeeded, `Ok(false)` when the
    /// guards blocked it.
    pub fn apply(&self, spec: &CommandSpec, command_line: &str) -> Result<bool> {
        let guards = self.evaluate_guards(spec)?;
        if !guards.permits_run() {
            info!(
                command = command_line,
                blocked_by = ?guards.blocking(),
                "Guards block execution, skipping"
            );
            return Ok(false);
        }

        let unsupported = spec.unsupported_fields();
        if !unsupported.is_empty() {
            warn!(command = command_line, fields = ?unsupported, "Fields are set but not applied");
        }

        let timeout = spec.timeout_duration()?;
        let cwd = self.resolve_cwd(spec);
        info!(command = command_line, ?cwd, "Executing command");
        self.execute_command(spec, command_line, timeout, cwd.as_deref())?;
        Ok(true)
    }

    /// Re-applies `spec` through its reload command, or through `command` when
    /// none is configured.
    pub fn reload(&self, spec: &CommandSpec) -> Result<bool> {
        match spec.reload_command() {
            Some(reload) => self.apply(spec, reload),
            None => self.apply(spec, &spec.command),
        }
    }

    /// The normal apply path of a convergence pass.
    ///
    /// A `reload_only` spec is never applied here, only through [`reload`](Self::reload).
    pub fn converge(&self, spec: &CommandSpec) -> Result<bool> {
        if spec.reload_only {
            debug!(command = %spec.command, "reload_only is set, nothing to converge");
            return Ok(false);
        }
        self.apply(spec, &spec.command)
    }

    fn run_probe(&self, spec: &CommandSpec, probe: &str, timeout: Duration) -> Result<i32> {
        let argv = split_command_line(probe)?;
        let (program, args) = split_program(&argv, probe)?;

        // Probes never get the command's cwd.
        match self
            .io
            .run(program, args, spec.environment.as_ref(), None, timeout)
        {
            Ok(output) => {
                debug!(probe, status = output.status, "Probe finished");
                Ok(output.status)
            }
            Err(RunError::Spawn { command, source }) => {
                warn!(
                    probe = %command,
                    error = %source,
                    "Probe could not be started, treating it as failed"
                );
                Ok(PROBE_SPAWN_FAILURE_STATUS)
            }
            Err(e) => Err(e),
        }
    }
}

fn split_program<'a>(argv: &'a [String], command_line: &str) -> Result<(&'a str, &'a [String])> {
    argv.split_first()
        .map(|(program, args)| (program.as_str(), args))
        .ok_or_else(|| RunError::InvalidCommandLine {
            command_line: command_line.to_string(),
        })
}
