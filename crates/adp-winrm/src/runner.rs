//! PowerShell command runner.
//!
//! Renders a [`PsCommand`], runs it on a pooled command session (or a
//! one-shot local shell for `exec_locally`), decodes CLIXML stderr and
//! applies the array wrapping option.

use crate::clixml;
use crate::command::PsCommand;
use crate::local::LocalShell;
use crate::pool::SessionPool;
use crate::shell::{CommandResult, Shell};
use adp_core::{AdError, AdResult};
use log::{debug, trace, warn};
use serde::de::DeserializeOwned;
use std::sync::Arc;

#[derive(Clone)]
pub struct PsRunner {
    pool: Arc<SessionPool>,
}

impl PsRunner {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Execute and return raw (decoded) output. Exactly one invocation.
    pub async fn run(&self, cmd: &PsCommand) -> AdResult<CommandResult> {
        let rendered = cmd.render();
        debug!("PS exec: {}", rendered.redacted);

        let raw = if cmd.options().exec_locally {
            LocalShell::new().run(&rendered.script).await?
        } else {
            let mut lease = self.pool.acquire_command().await?;
            lease.run(&rendered.script).await?
        };

        let mut out = CommandResult {
            stderr: clixml::decode_stderr(&raw.stderr),
            ..raw
        };
        trace!("PS stdout ({} bytes)", out.stdout.len());
        if !out.stderr.trim().is_empty() {
            warn!("PS stderr: {}", out.stderr.chars().take(500).collect::<String>());
        }
        if cmd.options().force_array {
            out = out.force_array();
        }
        Ok(out)
    }

    /// Execute and assert success (exit 0), returning the output.
    pub async fn run_ok(&self, cmd: &PsCommand) -> AdResult<CommandResult> {
        let out = self.run(cmd).await?;
        check_exit(out)
    }

    /// Execute and parse the JSON output as a typed single object.
    pub async fn run_json<T: DeserializeOwned>(&self, cmd: &PsCommand) -> AdResult<T> {
        self.run_ok(cmd).await?.parse_json()
    }

    /// Execute and parse the JSON output as a typed array.
    pub async fn run_json_array<T: DeserializeOwned>(&self, cmd: &PsCommand) -> AdResult<Vec<T>> {
        self.run_ok(cmd).await?.parse_json_array()
    }

    /// Run a script that produces no output; just assert success.
    pub async fn run_void(&self, cmd: &PsCommand) -> AdResult<()> {
        self.run_ok(cmd).await?;
        Ok(())
    }
}

/// Non-zero exit becomes an error classified from stderr.
pub fn check_exit(out: CommandResult) -> AdResult<CommandResult> {
    if out.success() {
        return Ok(out);
    }
    if out.stderr.trim().is_empty() {
        Err(AdError::command(format!(
            "PowerShell exited with code {}",
            out.exit_code
        )))
    } else {
        Err(AdError::from_remote(out.stderr.trim().to_string()))
    }
}
