// runguard-cli/src/report.rs

//! Per-resource results of a convergence pass and how they are printed.

use colored::*;
use runguard_core::{Changes, CommandReconciler, CommandSpec, ExecIo, RunError};
use tracing::{debug, error};

/// Which lifecycle call the host makes for every resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Plan,
    Apply,
    Reload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Plan phase result.
    Planned(Changes),
    Changed,
    Unchanged,
    /// The execution environment is missing; the resource was not touched.
    Unavailable,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceReport {
    pub command: String,
    pub outcome: Outcome,
}

impl ResourceReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }

    pub fn render(&self) -> String {
        let status = match &self.outcome {
            Outcome::Planned(changes) if changes.is_empty() => "no changes".dimmed().to_string(),
            Outcome::Planned(changes) => {
                let json =
                    serde_json::to_string(changes).unwrap_or_else(|_| format!("{:?}", changes));
                format!("{} {}", "would change".cyan(), json)
            }
            Outcome::Changed => "changed".green().to_string(),
            Outcome::Unchanged => "unchanged".dimmed().to_string(),
            Outcome::Unavailable => "skipped (unavailable)".yellow().to_string(),
            Outcome::Failed(reason) => {
                return format!(
                    "{} {}: {}",
                    "failed:".red().bold(),
                    self.command.bold(),
                    reason.trim_end()
                );
            }
        };
        format!("{} {}", status, self.command.bold())
    }
}

/// Drives one lifecycle call for every resource. A failing resource does not stop
/// the pass.
pub fn run_pass<I: ExecIo>(
    reconciler: &CommandReconciler<I>,
    resources: &[CommandSpec],
    phase: Phase,
) -> Vec<ResourceReport> {
    resources
        .iter()
        .map(|spec| ResourceReport {
            command: spec.command.clone(),
            outcome: run_one(reconciler, spec, phase),
        })
        .collect()
}

fn run_one<I: ExecIo>(
    reconciler: &CommandReconciler<I>,
    spec: &CommandSpec,
    phase: Phase,
) -> Outcome {
    if let Err(e) = reconciler.ensure_available(spec) {
        debug!(command = %spec.command, error = %e, "Skipping resource");
        return Outcome::Unavailable;
    }

    let result = match phase {
        Phase::Plan => return planned(reconciler.list_changes(spec), spec),
        Phase::Apply => reconciler.converge(spec),
        Phase::Reload => reconciler.reload(spec),
    };

    match result {
        Ok(true) => Outcome::Changed,
        Ok(false) => Outcome::Unchanged,
        Err(e) => failed(e, spec),
    }
}

fn planned(result: Result<Changes, RunError>, spec: &CommandSpec) -> Outcome {
    match result {
        Ok(changes) => Outcome::Planned(changes),
        Err(e) => failed(e, spec),
    }
}

fn failed(e: RunError, spec: &CommandSpec) -> Outcome {
    error!(command = %spec.command, error = %e, "Resource failed");
    // Show the captured stderr itself when there is one.
    let reason = match e.stderr() {
        Some(stderr) if !stderr.trim().is_empty() => stderr.to_string(),
        _ => e.to_string(),
    };
    Outcome::Failed(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn spec(command: &str) -> CommandSpec {
        CommandSpec::new(command).unwrap()
    }

    #[test]
    fn test_pass_continues_after_failure() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("after");
        let resources = vec![
            spec("sh -c 'echo nope >&2; exit 3'"),
            spec(&format!("touch '{}'", marker.display())),
        ];
        let reports = run_pass(&CommandReconciler::posix(), &resources, Phase::Apply);

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].outcome, Outcome::Failed("nope\n".to_string()));
        assert!(reports[0].is_failure());
        assert_eq!(reports[1].outcome, Outcome::Changed);
        assert!(marker.exists());
    }

    #[test]
    fn test_plan_has_no_side_effects() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("planned");
        let resources = vec![spec(&format!("touch '{}'", marker.display()))];
        let reports = run_pass(&CommandReconciler::posix(), &resources, Phase::Plan);

        match &reports[0].outcome {
            Outcome::Planned(changes) => assert!(changes.contains_key("execute")),
            other => panic!("Unexpected outcome: {:?}", other),
        }
        assert!(!marker.exists());
    }

    #[test]
    fn test_reload_pass_and_unchanged() {
        let resources = vec![
            spec("echo start").with_reload("true").with_reload_only(true),
            spec("echo hi").with_unless("true"),
        ];
        let reconciler = CommandReconciler::posix();
        let reports = run_pass(&reconciler, &resources, Phase::Reload);
        assert_eq!(reports[0].outcome, Outcome::Changed);
        assert_eq!(reports[1].outcome, Outcome::Unchanged);

        let applied = run_pass(&reconciler, &resources[..1], Phase::Apply);
        assert_eq!(applied[0].outcome, Outcome::Unchanged);
    }

    #[test]
    fn test_timeout_reported_as_failure() {
        let resources = vec![spec("sleep 5").with_timeout(Duration::from_millis(200))];
        let reports = run_pass(&CommandReconciler::posix(), &resources, Phase::Apply);
        match &reports[0].outcome {
            Outcome::Failed(reason) => assert!(reason.contains("timed out"), "{}", reason),
            other => panic!("Unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_render_mentions_command_and_reason() {
        colored::control::set_override(false);
        let report = ResourceReport {
            command: "make install".to_string(),
            outcome: Outcome::Failed("no rule\n".to_string()),
        };
        assert_eq!(report.render(), "failed: make install: no rule");

        let mut changes = Changes::new();
        changes.insert("execute".to_string(), (false, true).into());
        let planned = ResourceReport {
            command: "make".to_string(),
            outcome: Outcome::Planned(changes),
        };
        assert_eq!(planned.render(), r#"would change {"execute":[false,true]} make"#);
    }
}
