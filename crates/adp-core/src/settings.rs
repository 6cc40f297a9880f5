//! Immutable connection settings shared by every layer.
//!
//! A `Settings` value is built once when the provider is configured and is
//! then shared read-only (usually as `Arc<Settings>`).

use crate::error::{AdError, AdResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ─── Transport ───────────────────────────────────────────────────────────────

/// WS-Management transport scheme.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// WinRM over HTTP (port 5985)
    #[default]
    Http,
    /// WinRM over HTTPS (port 5986)
    Https,
}

impl Scheme {
    pub fn parse(s: &str) -> AdResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(AdError::validation(format!(
                "unsupported WinRM protocol '{}', expected http or https",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Http => 5985,
            Self::Https => 5986,
        }
    }
}

/// How requests to the WinRM endpoint are authenticated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// HTTP Basic with the configured credentials
    #[default]
    Basic,
    /// NTLMv2 handshake
    Ntlm,
    /// Kerberos through SPNEGO
    Kerberos,
}

/// Kerberos parameters; present only when a realm is configured.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct KerberosSettings {
    pub realm: String,
    /// Path to an existing krb5.conf; synthesized when absent.
    #[serde(default)]
    pub conf_path: Option<PathBuf>,
    /// Path to a keytab; password authentication is used when absent.
    #[serde(default)]
    pub keytab_path: Option<PathBuf>,
    /// Alternate service principal name.
    #[serde(default)]
    pub spn: Option<String>,
}

// ─── LDAP ────────────────────────────────────────────────────────────────────

/// Which back-end the user and group adapters talk to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Winrm,
    Ldap,
}

impl Backend {
    pub fn parse(s: &str) -> AdResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "winrm" | "" => Ok(Self::Winrm),
            "ldap" => Ok(Self::Ldap),
            other => Err(AdError::validation(format!(
                "unsupported backend '{}', expected winrm or ldap",
                other
            ))),
        }
    }
}

/// LDAP URL scheme.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LdapScheme {
    #[default]
    Ldap,
    Ldaps,
}

impl LdapScheme {
    pub fn parse(s: &str) -> AdResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ldap" => Ok(Self::Ldap),
            "ldaps" => Ok(Self::Ldaps),
            other => Err(AdError::validation(format!(
                "unsupported LDAP protocol '{}', expected ldap or ldaps",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ldap => "ldap",
            Self::Ldaps => "ldaps",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Ldap => 389,
            Self::Ldaps => 636,
        }
    }
}

// ─── Settings ────────────────────────────────────────────────────────────────

/// Provider-wide configuration. Never mutated after construction.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
    /// Skip TLS certificate validation.
    pub insecure: bool,
    pub username: String,
    pub password: String,
    pub auth: AuthMode,
    #[serde(default)]
    pub kerberos: Option<KerberosSettings>,
    /// Wrap commands in Invoke-Command and inject a PSCredential.
    pub pass_credentials: bool,
    /// Pinned domain controller; empty means "use the realm".
    #[serde(default)]
    pub domain_controller: String,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub ldap_scheme: LdapScheme,
    #[serde(default)]
    pub ldap_port: u16,
    #[serde(default)]
    pub ldap_insecure: bool,
    /// Base DN of the domain, discovered from rootDSE when absent.
    #[serde(default)]
    pub domain_dn: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: Scheme::Http.default_port(),
            scheme: Scheme::Http,
            insecure: false,
            username: String::new(),
            password: String::new(),
            auth: AuthMode::Basic,
            kerberos: None,
            pass_credentials: false,
            domain_controller: String::new(),
            backend: Backend::Winrm,
            ldap_scheme: LdapScheme::Ldap,
            ldap_port: LdapScheme::Ldap.default_port(),
            ldap_insecure: false,
            domain_dn: None,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("scheme", &self.scheme)
            .field("insecure", &self.insecure)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("auth", &self.auth)
            .field("kerberos", &self.kerberos)
            .field("pass_credentials", &self.pass_credentials)
            .field("domain_controller", &self.domain_controller)
            .field("backend", &self.backend)
            .finish()
    }
}

impl Settings {
    /// The WS-Management endpoint URI.
    pub fn endpoint(&self) -> String {
        format!("{}://{}:{}/wsman", self.scheme.as_str(), self.host, self.port)
    }

    /// The LDAP URL of the configured host.
    pub fn ldap_url(&self) -> String {
        format!("{}://{}:{}", self.ldap_scheme.as_str(), self.host, self.ldap_port)
    }

    /// Local mode: running on Windows with no host and no credentials.
    pub fn is_local(&self) -> bool {
        cfg!(windows) && self.host.is_empty() && self.username.is_empty() && self.password.is_empty()
    }

    pub fn realm(&self) -> Option<&str> {
        self.kerberos.as_ref().map(|k| k.realm.as_str())
    }

    /// Server passed to `-Server`/`-ComputerName`: the pinned DC, else the realm.
    pub fn target_server(&self) -> &str {
        if !self.domain_controller.is_empty() {
            &self.domain_controller
        } else {
            self.realm().unwrap_or_default()
        }
    }

    /// Service principal of the WinRM endpoint.
    pub fn spn(&self) -> String {
        match self.kerberos.as_ref().and_then(|k| k.spn.clone()) {
            Some(spn) if !spn.is_empty() => spn,
            _ => format!("HTTP/{}", self.host),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_uses_scheme_and_port() {
        let s = Settings {
            host: "dc1.example.com".into(),
            port: 5986,
            scheme: Scheme::Https,
            ..Default::default()
        };
        assert_eq!(s.endpoint(), "https://dc1.example.com:5986/wsman");
    }

    #[test]
    fn scheme_parse() {
        assert_eq!(Scheme::parse("HTTPS").unwrap(), Scheme::Https);
        assert!(Scheme::parse("ftp").is_err());
    }

    #[test]
    fn target_server_prefers_domain_controller() {
        let mut s = Settings {
            kerberos: Some(KerberosSettings {
                realm: "EXAMPLE.COM".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(s.target_server(), "EXAMPLE.COM");
        s.domain_controller = "dc2".into();
        assert_eq!(s.target_server(), "dc2");
    }

    #[test]
    fn spn_defaults_to_http_host() {
        let mut s = Settings {
            host: "dc1".into(),
            kerberos: Some(KerberosSettings::default()),
            ..Default::default()
        };
        assert_eq!(s.spn(), "HTTP/dc1");
        if let Some(k) = s.kerberos.as_mut() {
            k.spn = Some("WSMAN/dc1.example.com".into());
        }
        assert_eq!(s.spn(), "WSMAN/dc1.example.com");
    }

    #[test]
    fn debug_hides_password() {
        let s = Settings {
            password: "hunter2".into(),
            ..Default::default()
        };
        assert!(!format!("{:?}", s).contains("hunter2"));
    }

    #[test]
    fn local_mode_requires_empty_endpoint() {
        let s = Settings {
            host: "dc1".into(),
            ..Default::default()
        };
        assert!(!s.is_local());
    }
}
