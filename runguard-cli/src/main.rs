// runguard-cli/src/main.rs
mod models;
mod report;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::fs;
use std::io;
use std::path::Path;
use std::process::ExitCode;

use runguard_core::{CommandReconciler, ResourceFile};

use crate::models::cli::{Cli, Commands};
use crate::report::{Phase, ResourceReport, run_pass};

use tracing::{Level, error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn load_resources(path: &Path) -> Result<ResourceFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read resource file: {:?}", path))?;
    let resources = ResourceFile::from_toml_str(&content)
        .with_context(|| format!("Failed to parse or validate resource file: {:?}", path))?;
    info!(path = ?path, count = resources.run.len(), "Loaded resources");
    Ok(resources)
}

fn init_logging(verbose: u8) -> Result<()> {
    let default_level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(default_level.into()));

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init()
        .context("Failed to initialize logging")
}

fn run(cli: Cli) -> Result<Vec<ResourceReport>> {
    let resources = load_resources(cli.command.file())?;

    let mut reconciler = CommandReconciler::posix();
    if let Some(cwd) = cli.cwd {
        reconciler = reconciler.with_default_cwd(cwd);
    }

    let phase = match cli.command {
        Commands::Plan { .. } => Phase::Plan,
        Commands::Apply { .. } => Phase::Apply,
        Commands::Reload { .. } => Phase::Reload,
    };
    Ok(run_pass(&reconciler, &resources.run, phase))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("{} {:#}", "Error:".red(), e);
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(reports) => {
            for report in &reports {
                println!("{}", report.render());
            }
            let failures = reports.iter().filter(|r| r.is_failure()).count();
            if failures > 0 {
                eprintln!(
                    "{} {} of {} resources failed",
                    "Error:".red(),
                    failures,
                    reports.len()
                );
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!("Operation failed: {:#}", e);
            eprintln!("{} Operation failed: {:#}", "Error:".red(), e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_resources_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resources.toml");
        fs::write(
            &path,
            r#"
                [[run]]
                command = "touch /tmp/runguard-x"
                creates = "/tmp/runguard-x"

                [[run]]
                command = "echo hi"
                onlyif = "false"
            "#,
        )
        .unwrap();
        let resources = load_resources(&path).unwrap();
        assert_eq!(resources.run.len(), 2);
        assert_eq!(resources.run[1].onlyif(), Some("false"));
    }

    #[test]
    fn test_load_resources_missing_file() {
        let dir = tempdir().unwrap();
        let err = load_resources(&dir.path().join("absent.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read resource file"));
    }

    #[test]
    fn test_run_apply_uses_default_cwd() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resources.toml");
        fs::write(&path, "[[run]]\ncommand = \"touch made-by-runguard\"\n").unwrap();
        let cli = Cli::try_parse_from([
            "runguard",
            "apply",
            path.to_str().unwrap(),
            "--cwd",
            dir.path().to_str().unwrap(),
        ])
        .unwrap();
        let reports = run(cli).unwrap();
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].is_failure(), "{:?}", reports[0]);
        assert!(dir.path().join("made-by-runguard").exists());
    }
}
