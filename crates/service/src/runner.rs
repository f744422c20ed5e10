//! External command execution
//!
//! Every external program goes through the [`ProcessRunner`] trait so the
//! dispatcher can be tested without spawning real processes.

use crate::registry::ExecutableCommand;
use common::{Error, Result};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Time a timed-out process group gets between SIGTERM and SIGKILL
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Text best describing the outcome: stderr, else stdout, trimmed
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Runs an [`ExecutableCommand`] to completion
pub trait ProcessRunner: Send + Sync {
    /// Run `command` and wait for it to exit
    ///
    /// With a `timeout`, a process still running afterwards is killed and
    /// [`Error::Timeout`] is returned. A non-zero exit is not an error here;
    /// callers inspect [`ProcessOutput::code`].
    fn run(&self, command: &ExecutableCommand, timeout: Option<Duration>) -> Result<ProcessOutput>;
}

/// Runner spawning real OS processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, command: &ExecutableCommand, timeout: Option<Duration>) -> Result<ProcessOutput> {
        let program = command.program.as_str();
        debug!("Spawning: {}", command);

        let mut cmd = Command::new(program);
        // Avoid commands hanging waiting for input.
        cmd.args(&command.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group, so a timeout also reaches the tool behind sudo
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::CommandExecution {
                program: program.to_string(),
                code: None,
                detail: format!("could not be launched: {}", e),
            })?;

        // Drain pipes concurrently to avoid deadlocks on large output.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_handle = std::thread::spawn(move || drain(stdout));
        let stderr_handle = std::thread::spawn(move || drain(stderr));

        let status = match timeout {
            Some(limit) => match child.wait_timeout(limit)? {
                Some(status) => status,
                None => {
                    warn!("{} still running after {}s, killing it", program, limit.as_secs());
                    terminate(&mut child);
                    // Descendants outside the group may still hold the pipes;
                    // the drain threads are left to finish on their own.
                    drop(stdout_handle);
                    drop(stderr_handle);
                    return Err(Error::Timeout {
                        program: program.to_string(),
                        timeout_secs: limit.as_secs(),
                    });
                }
            },
            None => child.wait()?,
        };

        let output = ProcessOutput {
            code: status.code(),
            stdout: stdout_handle.join().unwrap_or_default(),
            stderr: stderr_handle.join().unwrap_or_default(),
        };
        debug!("{} exited with {:?}", program, output.code);
        Ok(output)
    }
}

/// Stop a timed-out child and everything in its process group
///
/// SIGTERM first, which `sudo` relays to the tool it runs, then SIGKILL for
/// whatever is left after [`KILL_GRACE`].
#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let group = Pid::from_raw(child.id() as i32);
    if let Err(e) = killpg(group, Signal::SIGTERM) {
        debug!("SIGTERM to process group {} failed: {}", group, e);
    }
    if let Ok(Some(status)) = child.wait_timeout(KILL_GRACE) {
        debug!("Process group leader exited with {}", status);
    }
    if let Err(e) = killpg(group, Signal::SIGKILL) {
        // ESRCH: the whole group is already gone
        debug!("SIGKILL to process group {} failed: {}", group, e);
    }
    let _ = child.wait();
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use common::ErrorKind;
    use std::time::Instant;

    fn sh(script: &str) -> ExecutableCommand {
        ExecutableCommand::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn test_zero_exit_is_success() {
        let output = SystemRunner.run(&sh("echo formatted"), None).unwrap();
        assert!(output.success());
        assert_eq!(output.diagnostic(), "formatted");
    }

    #[test]
    fn test_non_zero_exit_is_reported() {
        let output = SystemRunner
            .run(&sh("echo 'bad superblock' >&2; exit 8"), None)
            .unwrap();
        assert!(!output.success());
        assert_eq!(output.code, Some(8));
        assert_eq!(output.diagnostic(), "bad superblock");
    }

    #[test]
    fn test_missing_program() {
        let err = SystemRunner
            .run(&ExecutableCommand::new("/nonexistent/usb-repair-tool"), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandExecution);
    }

    #[test]
    fn test_timeout_kills_process() {
        let started = Instant::now();
        let err = SystemRunner
            .run(
                &ExecutableCommand::new("sleep").arg("10"),
                Some(Duration::from_millis(200)),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_timeout_kills_forked_children() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("still-running");

        // The shell forks a worker that outlives it unless the group is killed
        let script = format!("(sleep 1; touch '{}') & sleep 6; true", marker.display());
        let started = Instant::now();
        let err = SystemRunner
            .run(&sh(&script), Some(Duration::from_millis(300)))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "returned after {:?}",
            started.elapsed()
        );

        std::thread::sleep(Duration::from_millis(1500));
        assert!(!marker.exists(), "forked child survived the timeout");
    }

    #[test]
    fn test_timeout_survives_ignored_sigterm() {
        let started = Instant::now();
        let err = SystemRunner
            .run(
                &sh("trap '' TERM; sleep 8; true"),
                Some(Duration::from_millis(200)),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_finishes_within_timeout() {
        let output = SystemRunner
            .run(&sh("exit 0"), Some(Duration::from_secs(10)))
            .unwrap();
        assert!(output.success());
    }
}
