//! WinRM HTTP transport layer.
//!
//! Posts SOAP envelopes to the WS-Management endpoint, drives the
//! authentication handshake and implements the remote shell lifecycle.

use crate::auth::{self, AuthProvider};
use crate::command::encode_powershell;
use crate::shell::CommandResult;
use crate::soap::{self, EnvelopeContext, ReceiveChunk};
use adp_core::{AdError, AdErrorKind, AdResult, Settings};
use log::{debug, trace, warn};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);
const OPERATION_TIMEOUT: &str = "PT60S";
const LOCALE: &str = "en-US";
const CONTENT_TYPE: &str = "application/soap+xml;charset=UTF-8";

/// Upper bound on 401 round trips within one handshake.
const MAX_AUTH_ROUNDS: usize = 3;

fn http_error(e: reqwest::Error) -> AdError {
    if e.is_timeout() {
        AdError::transport(format!("WinRM request timed out: {}", e))
    } else if e.is_connect() {
        AdError::transport(format!("cannot connect to WinRM endpoint: {}", e))
    } else {
        AdError::transport(format!("WinRM request failed: {}", e))
    }
}

/// Authenticated channel to one WS-Management endpoint.
pub struct WinRmTransport {
    client: reqwest::Client,
    endpoint: String,
    auth: Box<dyn AuthProvider>,
    authenticated: bool,
    request_counter: u64,
}

impl WinRmTransport {
    pub fn new(settings: &Settings) -> AdResult<Self> {
        Self::with_auth(settings, auth::provider_for(settings)?)
    }

    pub fn with_auth(settings: &Settings, auth: Box<dyn AuthProvider>) -> AdResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(TCP_KEEPALIVE)
            .danger_accept_invalid_certs(settings.insecure)
            // NTLM and Kerberos authenticate the connection, keep reusing it.
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| AdError::transport(format!("cannot build HTTP client: {}", e)))?;

        debug!(
            "WinRM transport for {} using {} authentication",
            settings.endpoint(),
            auth.name()
        );
        Ok(Self {
            client,
            endpoint: settings.endpoint(),
            auth,
            authenticated: false,
            request_counter: 0,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&mut self, body: &str, auth_header: Option<&str>) -> AdResult<reqwest::Response> {
        self.request_counter += 1;
        debug!("WinRM request #{} to {}", self.request_counter, self.endpoint);
        trace!("WinRM request body: {}", body);

        let mut req = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(body.to_string());
        if let Some(value) = auth_header {
            req = req.header(reqwest::header::AUTHORIZATION, value);
        }
        req.send().await.map_err(http_error)
    }

    fn challenge_of(resp: &reqwest::Response) -> String {
        resp.headers()
            .get_all(reqwest::header::WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ")
    }

    async fn handshake(&mut self, body: &str) -> AdResult<reqwest::Response> {
        self.auth.reset();
        let mut header = self.auth.initial_auth_header().await?;
        for _ in 0..MAX_AUTH_ROUNDS {
            let resp = self.post(body, Some(&header)).await?;
            if resp.status() != reqwest::StatusCode::UNAUTHORIZED {
                self.authenticated = true;
                return Ok(resp);
            }
            let challenge = Self::challenge_of(&resp);
            match self.auth.process_challenge(&challenge).await? {
                Some(next) => header = next,
                None => break,
            }
        }
        Err(AdError::auth(format!(
            "{} authentication rejected by {}",
            self.auth.name(),
            self.endpoint
        )))
    }

    /// Send one SOAP envelope and return the response body.
    pub async fn send_message(&mut self, body: &str) -> AdResult<String> {
        let resp = if self.auth.is_stateless() {
            let header = self.auth.initial_auth_header().await?;
            let resp = self.post(body, Some(&header)).await?;
            if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
                return Err(AdError::auth(format!(
                    "{} authentication rejected by {}",
                    self.auth.name(),
                    self.endpoint
                )));
            }
            resp
        } else if !self.authenticated {
            self.handshake(body).await?
        } else {
            let resp = self.post(body, None).await?;
            if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
                debug!("WinRM endpoint dropped the authenticated connection, re-authenticating");
                self.authenticated = false;
                self.handshake(body).await?
            } else {
                resp
            }
        };

        let status = resp.status();
        let text = resp.text().await.map_err(http_error)?;
        trace!("WinRM response ({}): {}", status, text);

        if status != reqwest::StatusCode::OK {
            let message = match soap::parse_soap_fault(&text) {
                Some(fault) => format!("WinRM request failed with HTTP {}: {}", status.as_u16(), fault),
                None => format!("WinRM request failed with HTTP {}", status.as_u16()),
            };
            return Err(AdError::with_details(AdErrorKind::Transport, message, text));
        }
        Ok(text)
    }

    fn context<'a>(&'a self, message_id: &'a str) -> EnvelopeContext<'a> {
        EnvelopeContext {
            endpoint: &self.endpoint,
            message_id,
            timeout: OPERATION_TIMEOUT,
            locale: LOCALE,
        }
    }

    // ─── Shell lifecycle ─────────────────────────────────────────────────

    pub async fn create_shell(&mut self) -> AdResult<String> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let envelope = soap::create_shell(&self.context(&message_id));
        let response = self.send_message(&envelope).await?;
        let shell_id = soap::parse_shell_id(&response)?;
        debug!("Opened WinRM shell {}", shell_id);
        Ok(shell_id)
    }

    pub async fn delete_shell(&mut self, shell_id: &str) -> AdResult<()> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let envelope = soap::delete_shell(&self.context(&message_id), shell_id);
        self.send_message(&envelope).await?;
        debug!("Closed WinRM shell {}", shell_id);
        Ok(())
    }

    pub async fn run_command(
        &mut self,
        shell_id: &str,
        command: &str,
        arguments: &[String],
    ) -> AdResult<String> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let envelope = soap::command(&self.context(&message_id), shell_id, command, arguments);
        let response = self.send_message(&envelope).await?;
        soap::parse_command_id(&response)
    }

    pub async fn receive(&mut self, shell_id: &str, command_id: &str) -> AdResult<ReceiveChunk> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let envelope = soap::receive(&self.context(&message_id), shell_id, command_id);
        let response = self.send_message(&envelope).await?;
        soap::parse_receive(&response)
    }

    pub async fn signal_terminate(&mut self, shell_id: &str, command_id: &str) -> AdResult<()> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let envelope = soap::signal(
            &self.context(&message_id),
            shell_id,
            command_id,
            soap::SIGNAL_TERMINATE,
        );
        self.send_message(&envelope).await?;
        Ok(())
    }

    async fn collect_output(&mut self, shell_id: &str, command_id: &str) -> AdResult<CommandResult> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        loop {
            match self.receive(shell_id, command_id).await {
                Ok(chunk) => {
                    stdout.extend_from_slice(&chunk.stdout);
                    stderr.extend_from_slice(&chunk.stderr);
                    if chunk.done {
                        return Ok(CommandResult {
                            stdout: String::from_utf8_lossy(&stdout).into_owned(),
                            stderr: String::from_utf8_lossy(&stderr).into_owned(),
                            exit_code: chunk.exit_code.unwrap_or(0),
                        });
                    }
                }
                Err(e) if is_operation_timeout(&e) => {
                    trace!("Receive timed out, command {} still running", command_id);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run one PowerShell script in the given shell.
    pub async fn run_powershell(&mut self, shell_id: &str, script: &str) -> AdResult<CommandResult> {
        let arguments = vec![
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-EncodedCommand".to_string(),
            encode_powershell(script),
        ];
        let command_id = self.run_command(shell_id, "powershell.exe", &arguments).await?;
        let result = self.collect_output(shell_id, &command_id).await;
        if let Err(e) = self.signal_terminate(shell_id, &command_id).await {
            warn!("Failed to terminate command {}: {}", command_id, e);
        }
        result
    }
}

fn is_operation_timeout(e: &AdError) -> bool {
    e.kind == AdErrorKind::Transport
        && e.details
            .as_deref()
            .map(|d| d.contains(soap::FAULT_OPERATION_TIMEOUT))
            .unwrap_or(false)
}
