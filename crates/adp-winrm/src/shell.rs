//! The `Shell` seam: something that runs one PowerShell script at a time.

use crate::transport::WinRmTransport;
use adp_core::{AdErrorKind, AdResult};
use log::{debug, warn};
use serde::de::DeserializeOwned;

/// Output of one PowerShell invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Wrap non-empty stdout that is not already a JSON array in `[...]`.
    pub fn force_array(mut self) -> Self {
        let trimmed = self.stdout.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('[') {
            self.stdout = format!("[{}]", trimmed);
        }
        self
    }

    /// Parse stdout as JSON.
    pub fn parse_json<T: DeserializeOwned>(&self) -> AdResult<T> {
        Ok(serde_json::from_str(self.stdout.trim())?)
    }

    /// Parse stdout as a JSON array; an empty stdout is an empty list and a
    /// single object is a list of one.
    pub fn parse_json_array<T: DeserializeOwned>(&self) -> AdResult<Vec<T>> {
        let trimmed = self.stdout.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        if trimmed.starts_with('[') {
            Ok(serde_json::from_str(trimmed)?)
        } else {
            Ok(vec![serde_json::from_str(trimmed)?])
        }
    }
}

/// A PowerShell host. Implementations own at most one underlying shell and
/// run scripts strictly one after the other.
#[async_trait::async_trait]
pub trait Shell: Send {
    /// Run one script and collect its output.
    async fn run(&mut self, script: &str) -> AdResult<CommandResult>;

    /// Release the underlying shell; the next `run` opens a new one.
    async fn close(&mut self) -> AdResult<()>;
}

/// A WinRS shell on the remote endpoint, opened lazily.
pub struct RemoteShell {
    transport: WinRmTransport,
    shell_id: Option<String>,
}

impl RemoteShell {
    pub fn new(transport: WinRmTransport) -> Self {
        Self {
            transport,
            shell_id: None,
        }
    }

    /// Open the shell right away so connection and auth failures surface
    /// to the caller that asked for the session.
    pub async fn open(transport: WinRmTransport) -> AdResult<Self> {
        let mut shell = Self::new(transport);
        shell.ensure_open().await?;
        Ok(shell)
    }

    async fn ensure_open(&mut self) -> AdResult<String> {
        if let Some(id) = &self.shell_id {
            return Ok(id.clone());
        }
        let id = self.transport.create_shell().await?;
        self.shell_id = Some(id.clone());
        Ok(id)
    }
}

#[async_trait::async_trait]
impl Shell for RemoteShell {
    async fn run(&mut self, script: &str) -> AdResult<CommandResult> {
        let shell_id = self.ensure_open().await?;
        let result = self.transport.run_powershell(&shell_id, script).await;
        if let Err(e) = &result {
            if matches!(e.kind, AdErrorKind::Transport | AdErrorKind::Auth) {
                debug!("Dropping WinRM shell {} after failure: {}", shell_id, e);
                self.shell_id = None;
            }
        }
        result
    }

    async fn close(&mut self) -> AdResult<()> {
        if let Some(id) = self.shell_id.take() {
            if let Err(e) = self.transport.delete_shell(&id).await {
                warn!("Failed to delete WinRM shell {}: {}", id, e);
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        #[serde(rename = "Name")]
        name: String,
    }

    fn out(stdout: &str) -> CommandResult {
        CommandResult {
            stdout: stdout.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn force_array_wraps_objects_only() {
        assert_eq!(out("{\"a\":1}").force_array().stdout, "[{\"a\":1}]");
        assert_eq!(out("[1,2]").force_array().stdout, "[1,2]");
        assert_eq!(out("").force_array().stdout, "");
        assert_eq!(out("  \r\n").force_array().stdout, "  \r\n");
    }

    #[test]
    fn json_array_parsing() {
        let items: Vec<Item> = out("").parse_json_array().unwrap();
        assert!(items.is_empty());
        let items: Vec<Item> = out("{\"Name\":\"a\"}").parse_json_array().unwrap();
        assert_eq!(items, vec![Item { name: "a".into() }]);
        let items: Vec<Item> = out("[{\"Name\":\"a\"},{\"Name\":\"b\"}]\r\n").parse_json_array().unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn bad_json_is_parse_error() {
        let err = out("not json").parse_json::<Item>().unwrap_err();
        assert_eq!(err.kind, AdErrorKind::Parse);
    }
}
