// runguard-core/src/io.rs

//! The I/O capability the reconciler runs against.
//!
//! The reconciler never touches the filesystem or spawns processes itself; it goes
//! through an [`ExecIo`] implementation handed to it by the host. [`PosixIo`] is the
//! real one. Tests substitute a recording fake.
//!
//! Commands are never passed through a shell. A command line is split into an
//! argument vector with quoting-aware word splitting (see [`split_command_line`]),
//! so shell metacharacters such as `|`, `>` or `&&` reach the program as plain
//! arguments.

use crate::errors::{Result, RunError};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Represents the structured output of an executed external command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    /// The exit status code of the command (e.g., 0 for success).
    pub status: i32,
    /// The captured standard output as a string.
    pub stdout: String,
    /// The captured standard error as a string.
    pub stderr: String,
}

impl CommandOutput {
    /// Checks if the command executed successfully (status code 0).
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Host-supplied capability for filesystem checks and process execution.
pub trait ExecIo: Send + Sync {
    /// Returns whether `path` currently exists.
    fn file_exists(&self, path: &Path) -> bool;

    /// Runs `executable` with `args` and waits for it, bounded by `timeout`.
    ///
    /// `env` entries override the inherited environment; they do not replace it.
    /// A non-zero exit status is *not* an error here: callers inspect
    /// [`CommandOutput::status`] themselves. Errors are reserved for processes that
    /// could not be started ([`RunError::Spawn`]) or that were killed on expiry of
    /// the bound ([`RunError::Timeout`]).
    fn run(
        &self,
        executable: &str,
        args: &[String],
        env: Option<&HashMap<String, String>>,
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> Result<CommandOutput>;
}

impl<T: ExecIo + ?Sized> ExecIo for Arc<T> {
    fn file_exists(&self, path: &Path) -> bool {
        (**self).file_exists(path)
    }

    fn run(
        &self,
        executable: &str,
        args: &[String],
        env: Option<&HashMap<String, String>>,
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        (**self).run(executable, args, env, cwd, timeout)
    }
}

/// Splits a command line into an argument vector using shell quoting rules.
///
/// Fails when quotes are unbalanced or the line holds no words at all.
pub fn split_command_line(command_line: &str) -> Result<Vec<String>> {
    match shlex::split(command_line) {
        Some(words) if !words.is_empty() => Ok(words),
        _ => Err(RunError::InvalidCommandLine {
            command_line: command_line.to_string(),
        }),
    }
}

/// [`ExecIo`] backed by the local POSIX system.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixIo;

impl PosixIo {
    pub fn new() -> Self {
        PosixIo
    }
}

impl ExecIo for PosixIo {
    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn run(
        &self,
        executable: &str,
        args: &[String],
        env: Option<&HashMap<String, String>>,
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        debug!(executable, ?args, ?cwd, ?timeout, "Spawning process");

        let describe = || {
            std::iter::once(executable)
                .chain(args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ")
        };
        let spawn_error = |source: io::Error| {
            warn!(executable, error = %source, "Failed to spawn command process");
            RunError::Spawn {
                command: describe(),
                source,
            }
        };

        // Output goes to unlinked temp files, not pipes: a background grandchild
        // holding a pipe open must not keep us waiting past the deadline.
        let mut stdout_file = tempfile::tempfile().map_err(spawn_error)?;
        let mut stderr_file = tempfile::tempfile().map_err(spawn_error)?;

        let mut expression = duct::cmd(executable, args)
            .stdin_null()
            .stdout_file(stdout_file.try_clone().map_err(spawn_error)?)
            .stderr_file(stderr_file.try_clone().map_err(spawn_error)?)
            .unchecked(); // Non-zero exit is data, not an error
        if let Some(dir) = cwd {
            expression = expression.dir(dir);
        }
        if let Some(overrides) = env {
            for (key, value) in overrides {
                expression = expression.env(key, value);
            }
        }

        let handle = expression.start().map_err(spawn_error)?;

        // No deadline when the bound does not fit into an Instant.
        let deadline = Instant::now().checked_add(timeout);

        let status = loop {
            match handle.try_wait() {
                Ok(Some(output)) => break output.status.code().unwrap_or(-1),
                Ok(None) => {}
                Err(source) => return Err(spawn_error(source)),
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(executable, ?timeout, "Process exceeded its timeout, killing it");
                if let Err(e) = handle.kill() {
                    warn!(executable, error = %e, "Failed to kill timed out process");
                }
                return Err(RunError::Timeout {
                    command: describe(),
                    timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        let result = CommandOutput {
            status,
            stdout: read_captured(&mut stdout_file).map_err(spawn_error)?,
            stderr: read_captured(&mut stderr_file).map_err(spawn_error)?,
        };
        debug!(
            "Process exit status: {}\nStderr preview (first 3 lines):\n{}",
            result.status,
            result.stderr.lines().take(3).collect::<Vec<_>>().join("\n")
        );
        Ok(result)
    }
}

/// Reads everything written to a capture file so far.
fn read_captured(file: &mut File) -> io::Result<String> {
    let mut bytes = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const BOUND: Duration = Duration::from_secs(10);

    fn words(line: &str) -> Vec<String> {
        split_command_line(line).unwrap()
    }

    #[test]
    fn test_split_respects_quotes() {
        assert_eq!(
            words(r#"sh -c "echo 'a b' | cat""#),
            vec!["sh", "-c", "echo 'a b' | cat"]
        );
        assert_eq!(words("touch /tmp/x"), vec!["touch", "/tmp/x"]);
    }

    #[test]
    fn test_split_rejects_unbalanced_and_empty() {
        assert!(matches!(
            split_command_line("echo 'oops"),
            Err(RunError::InvalidCommandLine { .. })
        ));
        assert!(split_command_line("   ").is_err());
        assert!(split_command_line("").is_err());
    }

    #[test]
    fn test_posix_run_captures_output() {
        let out = PosixIo
            .run("echo", &words("Hello Core Shell"), None, None, BOUND)
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "Hello Core Shell");
        assert!(out.stderr.is_empty());
    }

    #[test]
    fn test_posix_run_does_not_interpret_metacharacters() {
        let out = PosixIo
            .run("echo", &words("a | b > c"), None, None, BOUND)
            .unwrap();
        assert_eq!(out.stdout.trim(), "a | b > c");
    }

    #[test]
    fn test_posix_run_reports_non_zero_status() {
        let out = PosixIo
            .run("sh", &words("-c 'echo nope >&2; exit 2'"), None, None, BOUND)
            .unwrap();
        assert_eq!(out.status, 2);
        assert_eq!(out.stderr.trim(), "nope");
    }

    #[test]
    fn test_posix_run_applies_cwd_and_env() {
        let dir = tempdir().unwrap();
        let mut env = HashMap::new();
        env.insert("RUNGUARD_TEST_VALUE".to_string(), "from-env".to_string());
        let out = PosixIo
            .run(
                "sh",
                &words(r#"-c 'pwd; echo "$RUNGUARD_TEST_VALUE"; echo "${PATH:+has-path}"'"#),
                Some(&env),
                Some(dir.path()),
                BOUND,
            )
            .unwrap();
        let lines: Vec<&str> = out.stdout.lines().collect();
        let expected_dir = dir.path().canonicalize().unwrap();
        assert_eq!(Path::new(lines[0]).canonicalize().unwrap(), expected_dir);
        assert_eq!(lines[1], "from-env");
        // Overrides merge into the inherited environment.
        assert_eq!(lines[2], "has-path");
    }

    #[test]
    fn test_posix_run_missing_executable_is_spawn_error() {
        let result = PosixIo.run(
            "this_command_does_not_exist_qwertyuiop",
            &[],
            None,
            None,
            BOUND,
        );
        assert!(matches!(result, Err(RunError::Spawn { .. })), "{:?}", result);
    }

    #[test]
    fn test_posix_run_kills_on_timeout() {
        let started = Instant::now();
        let result = PosixIo.run(
            "sleep",
            &words("5"),
            None,
            None,
            Duration::from_millis(200),
        );
        assert!(matches!(result, Err(RunError::Timeout { .. })), "{:?}", result);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_posix_run_returns_when_background_child_keeps_running() {
        let started = Instant::now();
        let out = PosixIo
            .run(
                "sh",
                &words("-c 'sleep 5 & echo started'"),
                None,
                None,
                Duration::from_millis(300),
            )
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "started");
    }

    #[test]
    fn test_posix_file_exists() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("marker");
        assert!(!PosixIo.file_exists(&file));
        std::fs::write(&file, "").unwrap();
        assert!(PosixIo.file_exists(&file));
    }
}
