// runguard-core/src/spec.rs

//! Desired-state description of a guarded command and its TOML loading.

use crate::errors::{Result, RunError};
use crate::io::split_command_line;
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: f64 = 300.0;
const DEFAULT_RETRIES: u32 = 1;

fn default_timeout() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_returns() -> Vec<i32> {
    vec![0]
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// A command to run when its guards permit it.
///
/// Empty strings in optional fields count as absent, so a TOML file may write
/// `creates = ""` to disable a guard.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    /// Command line to execute. Also identifies the resource.
    pub command: String,
    /// When this path exists the command counts as already applied.
    #[serde(default)]
    pub creates: Option<String>,
    /// Working directory for the command (not for probes).
    #[serde(default)]
    pub cwd: Option<String>,
    /// Overrides merged into the inherited environment.
    #[serde(default)]
    pub environment: Option<HashMap<String, String>>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub umask: Option<String>,
    /// Probe: run only when this exits 0.
    #[serde(default)]
    pub onlyif: Option<String>,
    /// Probe: skip when this exits 0.
    #[serde(default)]
    pub unless: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    /// Command used instead of `command` on reload.
    #[serde(default)]
    pub reload: Option<String>,
    /// Never applied directly, only reloaded.
    #[serde(default)]
    pub reload_only: bool,
    #[serde(default = "default_returns")]
    pub returns: Vec<i32>,
    /// Bound in seconds for every probe and command.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub try_sleep: f64,
}

impl CommandSpec {
    /// Creates a validated spec with every optional field unset.
    pub fn new(command: impl Into<String>) -> Result<Self> {
        let spec = Self::unchecked(command.into());
        spec.validate()?;
        Ok(spec)
    }

    fn unchecked(command: String) -> Self {
        CommandSpec {
            command,
            creates: None,
            cwd: None,
            environment: None,
            user: None,
            group: None,
            umask: None,
            onlyif: None,
            unless: None,
            path: None,
            reload: None,
            reload_only: false,
            returns: default_returns(),
            timeout: DEFAULT_TIMEOUT_SECS,
            retries: DEFAULT_RETRIES,
            try_sleep: 0.0,
        }
    }

    pub fn with_creates(mut self, path: impl Into<String>) -> Self {
        self.creates = Some(path.into());
        self
    }

    pub fn with_onlyif(mut self, probe: impl Into<String>) -> Self {
        self.onlyif = Some(probe.into());
        self
    }

    pub fn with_unless(mut self, probe: impl Into<String>) -> Self {
        self.unless = Some(probe.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_reload(mut self, reload: impl Into<String>) -> Self {
        self.reload = Some(reload.into());
        self
    }

    pub fn with_reload_only(mut self, reload_only: bool) -> Self {
        self.reload_only = reload_only;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.as_secs_f64();
        self
    }

    pub fn creates(&self) -> Option<&str> {
        non_empty(&self.creates)
    }

    pub fn onlyif(&self) -> Option<&str> {
        non_empty(&self.onlyif)
    }

    pub fn unless(&self) -> Option<&str> {
        non_empty(&self.unless)
    }

    pub fn cwd(&self) -> Option<&str> {
        non_empty(&self.cwd)
    }

    pub fn reload_command(&self) -> Option<&str> {
        non_empty(&self.reload)
    }

    /// The probe/command bound as a `Duration`.
    pub fn timeout_duration(&self) -> Result<Duration> {
        if self.timeout.is_nan() || self.timeout <= 0.0 {
            return Err(RunError::invalid_spec(format!(
                "'timeout' must be a positive number of seconds, got {}",
                self.timeout
            )));
        }
        Duration::try_from_secs_f64(self.timeout).map_err(|e| {
            RunError::invalid_spec(format!("'timeout' of {} is out of range: {}", self.timeout, e))
        })
    }

    /// Checks the invariants a host must uphold before handing the spec over.
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(RunError::invalid_spec("'command' is empty."));
        }
        split_command_line(&self.command)
            .map_err(|e| RunError::invalid_spec(format!("'command': {}", e)))?;
        for (field, value) in [
            ("onlyif", self.onlyif()),
            ("unless", self.unless()),
            ("reload", self.reload_command()),
        ] {
            if let Some(line) = value {
                split_command_line(line)
                    .map_err(|e| RunError::invalid_spec(format!("'{}': {}", field, e)))?;
            }
        }
        self.timeout_duration()?;
        if !self.try_sleep.is_finite() || self.try_sleep < 0.0 {
            return Err(RunError::invalid_spec(
                "'try_sleep' must be a non-negative number of seconds.",
            ));
        }
        Ok(())
    }

    /// Schema fields that are set but have no effect on execution.
    ///
    /// `user`, `group`, `umask`, `path`, `returns`, `retries` and `try_sleep` are
    /// accepted for compatibility with existing resource definitions; the
    /// reconciler reports them instead of enforcing them.
    pub fn unsupported_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        for (name, value) in [
            ("user", &self.user),
            ("group", &self.group),
            ("umask", &self.umask),
            ("path", &self.path),
        ] {
            if non_empty(value).is_some() {
                fields.push(name);
            }
        }
        if self.returns != default_returns() {
            fields.push("returns");
        }
        if self.retries != DEFAULT_RETRIES {
            fields.push("retries");
        }
        if self.try_sleep != 0.0 {
            fields.push("try_sleep");
        }
        fields
    }

    /// Parses and validates a single resource table.
    pub fn from_toml_str(content: &str) -> Result<CommandSpec> {
        let spec: CommandSpec = toml::from_str(content).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse resource TOML");
            RunError::Config(
                anyhow!(e).context("Failed to parse resource TOML. Check TOML syntax."),
            )
        })?;
        spec.validate()?;
        Ok(spec)
    }
}

/// A document holding any number of `[[run]]` resources.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct ResourceFile {
    #[serde(default)]
    pub run: Vec<CommandSpec>,
}

impl ResourceFile {
    pub fn from_toml_str(content: &str) -> Result<ResourceFile> {
        let file: ResourceFile = toml::from_str(content).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse resource file");
            RunError::Config(
                anyhow!(e).context("Failed to parse resource file. Check TOML syntax."),
            )
        })?;

        for (index, spec) in file.run.iter().enumerate() {
            spec.validate().map_err(|e| {
                RunError::invalid_spec(format!("Resource #{} ('{}'): {}", index, spec.command, e))
            })?;
        }

        tracing::info!(count = file.run.len(), "Loaded resource file.");
        Ok(file)
    }
}
