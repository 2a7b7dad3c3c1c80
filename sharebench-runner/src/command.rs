//! External command execution
//!
//! The one place sharebench shells out. Callers decide whether a failure is
//! fatal; nothing here retries.

use sharebench_core::{CommandLine, DeviceConfig};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Runs external commands
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion, feeding `stdin` if given, with `env` applied
    /// on top of the inherited environment. Returns whether it exited with 0.
    fn run(&self, command: &CommandLine, stdin: Option<&str>, env: &DeviceConfig) -> bool;
}

/// `CommandRunner` backed by `std::process::Command`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, command: &CommandLine, stdin: Option<&str>, env: &DeviceConfig) -> bool {
        debug!(command = %command, "Running command");

        let mut child = match Command::new(command.program())
            .args(command.args())
            .envs(env.iter())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %command, "Failed to launch command: {}", e);
                return false;
            }
        };

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            // Dropping the pipe afterwards closes the child's stdin
            if let Err(e) = pipe.write_all(input.as_bytes()) {
                warn!(command = %command, "Failed to write command stdin: {}", e);
            }
        }

        let output = match child.wait_with_output() {
            Ok(output) => output,
            Err(e) => {
                warn!(command = %command, "Failed to wait for command: {}", e);
                return false;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            debug!(command = %command, "stdout: {}", stdout.trim());
        }

        if output.status.success() {
            true
        } else {
            warn!(
                command = %command,
                status = %output.status,
                "Command failed: {}",
                stderr.trim()
            );
            false
        }
    }
}
