//! Error types shared by every AD provider crate.

use serde::{Deserialize, Serialize};

/// Error kinds produced by the execution layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdErrorKind {
    /// HTTP/TCP/TLS failure, unexpected HTTP status or Kerberos setup failure.
    Transport,
    /// LDAP bind or SPNEGO/NTLM handshake failure.
    Auth,
    /// PowerShell exited with a non-zero code.
    Command,
    /// The directory object does not exist.
    NotFound,
    /// The directory object already exists or is already linked.
    Conflict,
    /// Malformed JSON, CLIXML, INF or keytab data.
    Parse,
    /// A result violated a structural guarantee (empty GUID, too many entries).
    InvariantViolation,
    /// Input rejected before anything was sent.
    Validation,
}

/// Structured error returned by every fallible operation of the provider.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("[{kind:?}] {message}")]
pub struct AdError {
    pub kind: AdErrorKind,
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
}

/// Remote messages that mean "the object is absent".
pub const NOT_FOUND_PATTERNS: &[&str] = &[
    "ObjectNotFound",
    "ADIdentityNotFoundException",
    "GpoWithNameNotFound",
    "GpoWithIdNotFound",
    "GpoLinkNotFound",
    "ItemNotFoundException",
    "There is no such object",
];

/// Remote messages that mean "the object already exists", most specific first.
const CONFLICT_PATTERNS: &[(&str, &str)] = &[
    ("GpoWithNameAlreadyExists", "a GPO with this name already exists"),
    ("is already linked", "the GPO is already linked to this target"),
    ("AlreadyExists", "an object with this name already exists"),
];

impl AdError {
    pub fn new(kind: AdErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        kind: AdErrorKind,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Some(details.into()),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(AdErrorKind::Transport, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(AdErrorKind::Auth, message)
    }

    pub fn command(message: impl Into<String>) -> Self {
        Self::new(AdErrorKind::Command, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(AdErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(AdErrorKind::Conflict, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(AdErrorKind::Parse, message)
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(AdErrorKind::InvariantViolation, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(AdErrorKind::Validation, message)
    }

    /// Classify an error message coming back from the directory (PowerShell
    /// stderr or an LDAP diagnostic) by the well-known patterns.
    pub fn from_remote(message: impl Into<String>) -> Self {
        let message = message.into();
        if NOT_FOUND_PATTERNS.iter().any(|p| message.contains(p)) {
            return Self::new(AdErrorKind::NotFound, message);
        }
        for (pattern, readable) in CONFLICT_PATTERNS {
            if message.contains(pattern) {
                return Self::with_details(AdErrorKind::Conflict, *readable, message);
            }
        }
        Self::new(AdErrorKind::Command, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == AdErrorKind::NotFound
    }
}

impl From<serde_json::Error> for AdError {
    fn from(e: serde_json::Error) -> Self {
        Self::parse(format!("invalid JSON: {}", e))
    }
}

impl From<std::io::Error> for AdError {
    fn from(e: std::io::Error) -> Self {
        Self::transport(format!("I/O error: {}", e))
    }
}

/// Convert an `AdError` into a plain `String` for host diagnostics.
impl From<AdError> for String {
    fn from(e: AdError) -> String {
        e.to_string()
    }
}

/// Convenience alias.
pub type AdResult<T> = Result<T, AdError>;

/// Turn a NotFound result into `None`, keeping every other error.
pub fn absent_on_not_found<T>(result: AdResult<T>) -> AdResult<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
