//! Local PowerShell execution.
//!
//! Used when the provider runs on a Windows host with no endpoint and no
//! credentials configured: scripts go to a local `powershell.exe` instead of
//! a WS-Management shell.

use crate::command::encode_powershell;
use crate::shell::{CommandResult, Shell};
use adp_core::{AdError, AdErrorKind, AdResult};
use log::{debug, trace, warn};
use tokio::process::Command;

pub const DEFAULT_POWERSHELL: &str = "powershell.exe";

/// Runs every script in a fresh local PowerShell process.
pub struct LocalShell {
    program: String,
}

impl Default for LocalShell {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalShell {
    pub fn new() -> Self {
        Self::with_program(DEFAULT_POWERSHELL)
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait::async_trait]
impl Shell for LocalShell {
    async fn run(&mut self, script: &str) -> AdResult<CommandResult> {
        debug!("Local PS exec ({} chars)", script.len());

        let child = Command::new(&self.program)
            .args([
                "-NoProfile",
                "-NonInteractive",
                "-EncodedCommand",
                &encode_powershell(script),
            ])
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AdError::with_details(
                    AdErrorKind::Transport,
                    "Failed to spawn PowerShell process",
                    e.to_string(),
                )
            })?;

        let output = child.wait_with_output().await.map_err(|e| {
            AdError::with_details(
                AdErrorKind::Transport,
                "PowerShell process failed",
                e.to_string(),
            )
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        trace!("PS stdout ({} bytes)", stdout.len());
        if !stderr.is_empty() {
            warn!("PS stderr ({} bytes)", stderr.len());
        }

        Ok(CommandResult {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn close(&mut self) -> AdResult<()> {
        Ok(())
    }
}
