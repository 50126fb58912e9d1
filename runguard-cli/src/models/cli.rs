use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Runguard: run commands only when their guards say so.
/// Reads `[[run]]` resources from a TOML file and drives one convergence pass.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase message verbosity.
    ///
    /// Specify multiple times for more verbose output:
    ///  -v:  INFO level
    ///  -vv: DEBUG level
    ///  -vvv: TRACE level (most verbose)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Working directory for commands whose resource sets no `cwd`.
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show which resources would execute, without executing anything.
    Plan {
        /// Resource file with `[[run]]` tables.
        file: PathBuf,
    },
    /// Execute every resource whose guards permit it.
    Apply {
        /// Resource file with `[[run]]` tables.
        file: PathBuf,
    },
    /// Reload every resource (reload command, or the command itself).
    Reload {
        /// Resource file with `[[run]]` tables.
        file: PathBuf,
    },
}

impl Commands {
    pub fn file(&self) -> &PathBuf {
        match self {
            Commands::Plan { file } | Commands::Apply { file } | Commands::Reload { file } => file,
        }
    }
}
