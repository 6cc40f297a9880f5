//! Authentication providers for the WinRM endpoint.
//!
//! Supports Basic, NTLM (NTLMv2 over `Negotiate`) and Kerberos (SPNEGO over
//! `Negotiate`).

use crate::kerberos::KerberosClient;
use crate::ntlm::{self, NtlmCredentials};
use adp_core::{AdError, AdResult, AuthMode, Settings};
use base64::Engine;
use log::debug;

// ─── Auth Provider Trait ─────────────────────────────────────────────────────

/// Trait for authentication providers.
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    /// Name of this auth mechanism.
    fn name(&self) -> &str;

    /// Header value for the first request of a handshake.
    async fn initial_auth_header(&mut self) -> AdResult<String>;

    /// Process a 401 challenge and return the next auth header.
    /// Returns None once the mechanism has nothing more to send.
    async fn process_challenge(&mut self, challenge: &str) -> AdResult<Option<String>>;

    /// Schemes that send the same header on every request and never
    /// establish connection state.
    fn is_stateless(&self) -> bool {
        false
    }

    /// Forget any handshake state so a new one can start.
    fn reset(&mut self) {}
}

/// Build the provider selected by the settings: Kerberos when a realm is
/// configured, NTLM when asked for, Basic otherwise.
pub fn provider_for(settings: &Settings) -> AdResult<Box<dyn AuthProvider>> {
    if settings.kerberos.is_some() {
        return Ok(Box::new(KerberosAuth::new(KerberosClient::from_settings(settings)?)));
    }
    match settings.auth {
        AuthMode::Ntlm => Ok(Box::new(NtlmAuth::new(NtlmCredentials::from_login(
            &settings.username,
            &settings.password,
        )))),
        AuthMode::Kerberos => Err(AdError::transport("Kerberos requested without a realm")),
        AuthMode::Basic => Ok(Box::new(BasicAuth::new(&settings.username, &settings.password))),
    }
}

/// Strip the scheme of a `WWW-Authenticate` value and decode the token.
fn decode_challenge(challenge: &str) -> AdResult<Option<Vec<u8>>> {
    let token = challenge
        .split(',')
        .map(str::trim)
        .find_map(|part| {
            part.strip_prefix("Negotiate")
                .or_else(|| part.strip_prefix("NTLM"))
                .or_else(|| part.strip_prefix("Kerberos"))
        })
        .map(str::trim);
    match token {
        None | Some("") => Ok(None),
        Some(t) => base64::engine::general_purpose::STANDARD
            .decode(t)
            .map(Some)
            .map_err(|e| AdError::auth(format!("Failed to decode challenge: {}", e))),
    }
}

fn negotiate_header(token: &[u8]) -> String {
    format!(
        "Negotiate {}",
        base64::engine::general_purpose::STANDARD.encode(token)
    )
}

// ─── Basic Authentication ────────────────────────────────────────────────────

/// HTTP Basic authentication (base64 username:password).
pub struct BasicAuth {
    header: String,
}

impl BasicAuth {
    pub fn new(username: &str, password: &str) -> Self {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password));
        Self {
            header: format!("Basic {}", encoded),
        }
    }
}

#[async_trait::async_trait]
impl AuthProvider for BasicAuth {
    fn name(&self) -> &str {
        "Basic"
    }

    async fn initial_auth_header(&mut self) -> AdResult<String> {
        Ok(self.header.clone())
    }

    async fn process_challenge(&mut self, _challenge: &str) -> AdResult<Option<String>> {
        // Basic is single-round
        Ok(None)
    }

    fn is_stateless(&self) -> bool {
        true
    }
}

// ─── NTLM Authentication ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum NtlmState {
    Initial,
    NegotiateSent,
    Authenticated,
}

/// NTLMv2 authentication carried in `Negotiate` headers.
pub struct NtlmAuth {
    credentials: NtlmCredentials,
    state: NtlmState,
}

impl NtlmAuth {
    pub fn new(credentials: NtlmCredentials) -> Self {
        Self {
            credentials,
            state: NtlmState::Initial,
        }
    }
}

#[async_trait::async_trait]
impl AuthProvider for NtlmAuth {
    fn name(&self) -> &str {
        "NTLM"
    }

    async fn initial_auth_header(&mut self) -> AdResult<String> {
        self.state = NtlmState::NegotiateSent;
        Ok(negotiate_header(&ntlm::negotiate_message()))
    }

    async fn process_challenge(&mut self, challenge: &str) -> AdResult<Option<String>> {
        match self.state {
            NtlmState::Initial => Ok(Some(self.initial_auth_header().await?)),
            NtlmState::NegotiateSent => {
                let bytes = decode_challenge(challenge)?
                    .ok_or_else(|| AdError::auth("NTLM challenge missing from 401 response"))?;
                let parsed = ntlm::parse_challenge(&bytes)?;
                let message = ntlm::authenticate_message(&self.credentials, &parsed)?;
                self.state = NtlmState::Authenticated;
                debug!("NTLM challenge processed for {}", self.credentials.username);
                Ok(Some(negotiate_header(&message)))
            }
            NtlmState::Authenticated => Ok(None),
        }
    }

    fn reset(&mut self) {
        self.state = NtlmState::Initial;
    }
}

// ─── Kerberos Authentication ─────────────────────────────────────────────────

/// Kerberos through SPNEGO. The AP-REQ goes out on the first request; a
/// further 401 means the service rejected it.
pub struct KerberosAuth {
    client: KerberosClient,
    sent: bool,
}

impl KerberosAuth {
    pub fn new(client: KerberosClient) -> Self {
        Self {
            client,
            sent: false,
        }
    }
}

#[async_trait::async_trait]
impl AuthProvider for KerberosAuth {
    fn name(&self) -> &str {
        "Kerberos"
    }

    async fn initial_auth_header(&mut self) -> AdResult<String> {
        let token = self.client.initial_token().await?;
        self.sent = true;
        Ok(negotiate_header(&token))
    }

    async fn process_challenge(&mut self, _challenge: &str) -> AdResult<Option<String>> {
        if self.sent {
            Ok(None)
        } else {
            Ok(Some(self.initial_auth_header().await?))
        }
    }

    fn reset(&mut self) {
        self.sent = false;
    }
}
