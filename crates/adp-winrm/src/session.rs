//! Command and file sessions handed out by the pool.

use crate::clixml;
use crate::command::quote;
use crate::local::LocalShell;
use crate::shell::{CommandResult, RemoteShell, Shell};
use crate::transport::WinRmTransport;
use adp_core::{AdError, AdResult, Settings};
use base64::Engine;
use log::{debug, warn};
use std::sync::Arc;

/// File operations allowed on one underlying shell before it is recycled.
pub const MAX_FILE_OPS_PER_SHELL: u32 = 15;

/// Raw bytes per upload chunk. The base64 form must fit comfortably in one
/// encoded command line.
pub const UPLOAD_CHUNK_SIZE: usize = 2048;

const PRESENT_MARKER: &str = "B64:";
const REMOVED_MARKER: &str = "removed";

// ─── Factory ─────────────────────────────────────────────────────────────────

/// Opens the shells behind new sessions.
#[async_trait::async_trait]
pub trait ShellFactory: Send + Sync {
    async fn open(&self) -> AdResult<Box<dyn Shell>>;
}

/// WinRM shells for a remote endpoint, local PowerShell in local mode.
pub struct WinRmShellFactory {
    settings: Arc<Settings>,
}

impl WinRmShellFactory {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }
}

#[async_trait::async_trait]
impl ShellFactory for WinRmShellFactory {
    async fn open(&self) -> AdResult<Box<dyn Shell>> {
        if self.settings.is_local() {
            debug!("Local mode, using a local PowerShell host");
            return Ok(Box::new(LocalShell::new()));
        }
        let transport = WinRmTransport::new(&self.settings)?;
        Ok(Box::new(RemoteShell::open(transport).await?))
    }
}

// ─── Command session ─────────────────────────────────────────────────────────

/// Runs PowerShell scripts.
pub struct CommandSession {
    id: u64,
    shell: Box<dyn Shell>,
}

impl CommandSession {
    pub fn new(id: u64, shell: Box<dyn Shell>) -> Self {
        Self { id, shell }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn run(&mut self, script: &str) -> AdResult<CommandResult> {
        self.shell.run(script).await
    }
}

// ─── File session ────────────────────────────────────────────────────────────

/// Moves files to and from paths visible to the remote host (SYSVOL).
pub struct FileSession {
    id: u64,
    shell: Box<dyn Shell>,
    ops: u32,
}

impl FileSession {
    pub fn new(id: u64, shell: Box<dyn Shell>) -> Self {
        Self { id, shell, ops: 0 }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Operations performed on the current underlying shell.
    pub fn ops_on_shell(&self) -> u32 {
        self.ops
    }

    async fn op(&mut self, script: &str) -> AdResult<CommandResult> {
        if self.ops >= MAX_FILE_OPS_PER_SHELL {
            debug!("File session {} recycling its shell after {} operations", self.id, self.ops);
            if let Err(e) = self.shell.close().await {
                warn!("File session {}: closing shell failed: {}", self.id, e);
            }
            self.ops = 0;
        }
        self.ops += 1;

        let out = self.shell.run(script).await?;
        if !out.success() {
            let stderr = clixml::decode_stderr(&out.stderr);
            return Err(if stderr.trim().is_empty() {
                AdError::command(format!("file operation exited with code {}", out.exit_code))
            } else {
                AdError::from_remote(stderr)
            });
        }
        Ok(out)
    }

    /// Write `data` to `remote_path`, creating parent directories and
    /// replacing any existing file.
    pub async fn upload(&mut self, data: &[u8], remote_path: &str) -> AdResult<()> {
        let engine = base64::engine::general_purpose::STANDARD;
        let path = quote(remote_path);
        let mut chunks = data.chunks(UPLOAD_CHUNK_SIZE);

        let first = engine.encode(chunks.next().unwrap_or_default());
        self.op(&format!(
            "$ErrorActionPreference = 'Stop'; $p = {path}; \
             $d = [System.IO.Path]::GetDirectoryName($p); \
             if (-not (Test-Path -LiteralPath $d)) {{ New-Item -ItemType Directory -Path $d -Force | Out-Null }}; \
             [System.IO.File]::WriteAllBytes($p, [System.Convert]::FromBase64String(\"{first}\"))"
        ))
        .await?;

        for chunk in chunks {
            let encoded = engine.encode(chunk);
            self.op(&format!(
                "$ErrorActionPreference = 'Stop'; \
                 $b = [System.Convert]::FromBase64String(\"{encoded}\"); \
                 $f = [System.IO.File]::Open({path}, [System.IO.FileMode]::Append); \
                 try {{ $f.Write($b, 0, $b.Length) }} finally {{ $f.Close() }}"
            ))
            .await?;
        }
        debug!("Uploaded {} bytes to {}", data.len(), remote_path);
        Ok(())
    }

    /// Read `remote_path`; `None` when it does not exist.
    pub async fn download(&mut self, remote_path: &str) -> AdResult<Option<Vec<u8>>> {
        let out = self
            .op(&format!(
                "$ErrorActionPreference = 'Stop'; $p = {}; \
                 if (Test-Path -LiteralPath $p -PathType Leaf) {{ \"{}\" + [System.Convert]::ToBase64String([System.IO.File]::ReadAllBytes($p)) }}",
                quote(remote_path),
                PRESENT_MARKER
            ))
            .await?;

        let stdout = out.stdout.trim();
        match stdout.strip_prefix(PRESENT_MARKER) {
            None => Ok(None),
            Some(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map(Some)
                .map_err(|e| AdError::parse(format!("invalid file content from {}: {}", remote_path, e))),
        }
    }

    /// Delete `remote_path`; returns whether a file was removed.
    pub async fn remove(&mut self, remote_path: &str) -> AdResult<bool> {
        let out = self
            .op(&format!(
                "$ErrorActionPreference = 'Stop'; $p = {}; \
                 if (Test-Path -LiteralPath $p) {{ Remove-Item -LiteralPath $p -Force; \"{}\" }}",
                quote(remote_path),
                REMOVED_MARKER
            ))
            .await?;
        Ok(out.stdout.trim() == REMOVED_MARKER)
    }
}
