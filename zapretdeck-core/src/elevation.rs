//! Privileged command execution
//!
//! The GUI process runs unprivileged; everything that touches the bypass
//! process, firewall rules or systemd goes through a [`PrivilegedExecutor`]
//! built from a one-time credential check. Commands are serialized per
//! executor so no two privileged invocations race against the same service
//! instance.

use crate::utils::display_command;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::fmt;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Elevation and privileged execution errors
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    #[error("Invalid elevation credential")]
    InvalidCredential,

    #[error("Permission denied: {command}")]
    PermissionDenied { command: String },

    #[error("Command failed: {command}: {stderr}")]
    ExecutionFailed { command: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ElevationResult<T> = Result<T, ElevationError>;

/// Output of a finished privileged command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, -1 when terminated by a signal
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Validated elevation token.
///
/// Never serialized, never logged; the secret is wiped before the backing
/// memory is freed.
pub struct Credential {
    secret: String,
}

impl Credential {
    fn new(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
        }
    }

    fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        // Overwrite in place; zero bytes keep the String valid UTF-8.
        unsafe {
            for b in self.secret.as_mut_vec().iter_mut() {
                *b = 0;
            }
        }
    }
}

/// Seam between the executor and the OS elevation mechanism.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program args..` with elevated rights, feeding `secret` to the
    /// elevation mechanism.
    async fn run(&self, secret: &str, program: &str, args: &[String]) -> io::Result<CommandOutput>;

    /// Check that `secret` grants elevation without running anything else.
    async fn validate(&self, secret: &str) -> io::Result<bool>;
}

/// Production runner: `sudo -S` with the secret on stdin.
pub struct SudoRunner;

impl SudoRunner {
    async fn spawn_sudo(secret: &str, sudo_args: &[&str]) -> io::Result<CommandOutput> {
        let mut child = Command::new("sudo")
            .args(sudo_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(secret.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            // closing stdin lets sudo stop waiting for more input
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl CommandRunner for SudoRunner {
    async fn run(&self, secret: &str, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        let mut sudo_args: Vec<&str> = vec!["-S", "-p", "", "--", program];
        sudo_args.extend(args.iter().map(String::as_str));
        Self::spawn_sudo(secret, &sudo_args).await
    }

    async fn validate(&self, secret: &str) -> io::Result<bool> {
        // -k invalidates the cached timestamp first, so a stale sudo grant
        // cannot mask a wrong password.
        let output = Self::spawn_sudo(secret, &["-S", "-k", "-p", "", "--", "true"]).await?;
        Ok(output.success())
    }
}

/// Executes privileged commands after a one-time credential check.
///
/// The credential is validated exactly once in [`authorize`]; subsequent
/// [`run`] calls reuse it until the executor is dropped or explicitly
/// invalidated.
///
/// [`authorize`]: PrivilegedExecutor::authorize
/// [`run`]: PrivilegedExecutor::run
pub struct PrivilegedExecutor {
    credential: Credential,
    runner: Arc<dyn CommandRunner>,
    run_lock: Mutex<()>,
}

impl PrivilegedExecutor {
    /// Validate `secret` and build an executor around it.
    ///
    /// A wrong secret fails with [`ElevationError::InvalidCredential`] and
    /// performs no other side effects.
    pub async fn authorize(runner: Arc<dyn CommandRunner>, secret: &str) -> ElevationResult<Self> {
        if !runner.validate(secret).await? {
            warn!("Elevation refused: invalid credential");
            return Err(ElevationError::InvalidCredential);
        }

        info!("Elevation credential validated");
        Ok(Self {
            credential: Credential::new(secret),
            runner,
            run_lock: Mutex::new(()),
        })
    }

    /// Run one privileged command to completion.
    ///
    /// Commands are serialized: a second call waits until the first one
    /// finishes.
    pub async fn run(&self, program: &str, args: &[String]) -> ElevationResult<CommandOutput> {
        let _guard = self.run_lock.lock().await;

        let command = display_command(program, args);
        debug!("Running privileged command: {}", command);

        let output = self.runner.run(self.credential.secret(), program, args).await?;
        if output.success() {
            return Ok(output);
        }

        let stderr = output.stderr.trim().to_string();
        if stderr.to_ascii_lowercase().contains("permission denied") {
            return Err(ElevationError::PermissionDenied { command });
        }

        let stderr = if stderr.is_empty() {
            format!("exit code {}", output.status)
        } else {
            stderr
        };
        Err(ElevationError::ExecutionFailed { command, stderr })
    }

    /// Drop the credential. A new [`authorize`](Self::authorize) is required
    /// afterwards.
    pub fn invalidate(self) {
        info!("Elevation credential invalidated");
    }
}

impl fmt::Debug for PrivilegedExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivilegedExecutor")
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}
