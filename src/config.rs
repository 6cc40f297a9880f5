//! Provider options: parsing, environment defaults and validation.
//!
//! Options arrive from the host as a map of JSON scalars keyed by option
//! name. A missing (or null) option falls back to its `AD_*` environment
//! variable, then to the built-in default.

use adp_core::{AdError, AdResult, AuthMode, Backend, KerberosSettings, LdapScheme, Scheme, Settings};
use adp_ldap::encoding::domain_dn_from_realm;
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Raw provider options as handed over by the host.
pub type OptionMap = HashMap<String, Value>;

pub const DEFAULT_WINRM_PORT: u16 = 5985;

/// Every option the provider understands, with its environment fallback.
pub const OPTIONS: &[(&str, Option<&str>)] = &[
    ("winrm_username", Some("AD_USER")),
    ("winrm_password", Some("AD_PASSWORD")),
    ("winrm_hostname", Some("AD_HOSTNAME")),
    ("winrm_port", Some("AD_PORT")),
    ("winrm_proto", Some("AD_PROTO")),
    ("winrm_insecure", Some("AD_WINRM_INSECURE")),
    ("winrm_use_ntlm", Some("AD_WINRM_USE_NTLM")),
    ("winrm_pass_credentials", Some("AD_WINRM_PASS_CREDENTIALS")),
    ("krb_realm", Some("AD_KRB_REALM")),
    ("krb_conf", Some("AD_KRB_CONF")),
    ("krb_keytab", Some("AD_KRB_KEYTAB")),
    ("krb_spn", Some("AD_KRB_SPN")),
    ("domain_controller", Some("AD_DOMAIN_CONTROLLER")),
    ("backend", None),
    ("ldap_proto", None),
    ("ldap_port", None),
    ("ldap_insecure", None),
    ("domain_dn", None),
];

/// Validated provider options.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub winrm_username: String,
    pub winrm_password: String,
    pub winrm_hostname: String,
    pub winrm_port: u16,
    pub winrm_proto: Scheme,
    pub winrm_insecure: bool,
    pub winrm_use_ntlm: bool,
    pub winrm_pass_credentials: bool,
    pub krb_realm: String,
    pub krb_conf: Option<PathBuf>,
    pub krb_keytab: Option<PathBuf>,
    pub krb_spn: Option<String>,
    pub domain_controller: String,
    pub backend: Backend,
    pub ldap_proto: LdapScheme,
    pub ldap_port: u16,
    pub ldap_insecure: bool,
    pub domain_dn: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            winrm_username: String::new(),
            winrm_password: String::new(),
            winrm_hostname: String::new(),
            winrm_port: DEFAULT_WINRM_PORT,
            winrm_proto: Scheme::Http,
            winrm_insecure: false,
            winrm_use_ntlm: false,
            winrm_pass_credentials: false,
            krb_realm: String::new(),
            krb_conf: None,
            krb_keytab: None,
            krb_spn: None,
            domain_controller: String::new(),
            backend: Backend::Winrm,
            ldap_proto: LdapScheme::Ldap,
            ldap_port: LdapScheme::Ldap.default_port(),
            ldap_insecure: false,
            domain_dn: None,
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("winrm_username", &self.winrm_username)
            .field("winrm_password", &"<REDACTED>")
            .field("winrm_hostname", &self.winrm_hostname)
            .field("winrm_port", &self.winrm_port)
            .field("winrm_proto", &self.winrm_proto)
            .field("winrm_insecure", &self.winrm_insecure)
            .field("winrm_use_ntlm", &self.winrm_use_ntlm)
            .field("winrm_pass_credentials", &self.winrm_pass_credentials)
            .field("krb_realm", &self.krb_realm)
            .field("krb_conf", &self.krb_conf)
            .field("krb_keytab", &self.krb_keytab)
            .field("krb_spn", &self.krb_spn)
            .field("domain_controller", &self.domain_controller)
            .field("backend", &self.backend)
            .field("ldap_proto", &self.ldap_proto)
            .field("ldap_port", &self.ldap_port)
            .field("ldap_insecure", &self.ldap_insecure)
            .field("domain_dn", &self.domain_dn)
            .finish()
    }
}

// ─── Option lookup ───────────────────────────────────────────────────────────

/// One option's raw value: the map entry, else its environment variable.
fn lookup(options: &OptionMap, key: &str) -> Option<Value> {
    match options.get(key) {
        Some(Value::Null) | None => {}
        Some(v) => return Some(v.clone()),
    }
    let env = OPTIONS.iter().find(|(k, _)| *k == key).and_then(|(_, e)| *e)?;
    match std::env::var(env) {
        Ok(v) if !v.is_empty() => Some(Value::String(v)),
        _ => None,
    }
}

fn string_option(options: &OptionMap, key: &str) -> AdResult<Option<String>> {
    match lookup(options, key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(AdError::validation(format!(
            "option {} must be a string, got {}",
            key, other
        ))),
    }
}

fn bool_option(options: &OptionMap, key: &str) -> AdResult<Option<bool>> {
    match lookup(options, key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" | "" => Ok(Some(false)),
            _ => Err(AdError::validation(format!(
                "option {} must be a boolean, got '{}'",
                key, s
            ))),
        },
        Some(other) => Err(AdError::validation(format!(
            "option {} must be a boolean, got {}",
            key, other
        ))),
    }
}

fn port_option(options: &OptionMap, key: &str) -> AdResult<Option<u16>> {
    let raw = match lookup(options, key) {
        None => return Ok(None),
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    };
    match raw {
        Some(p) if (1..=65535).contains(&p) => Ok(Some(p as u16)),
        _ => Err(AdError::validation(format!(
            "option {} must be a port number between 1 and 65535",
            key
        ))),
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

// ─── Parsing ─────────────────────────────────────────────────────────────────

impl ProviderConfig {
    /// Parse and validate the host's options.
    pub fn from_options(options: &OptionMap) -> AdResult<Self> {
        for key in options.keys() {
            if !OPTIONS.iter().any(|(k, _)| k == key) {
                warn!("Ignoring unknown provider option '{}'", key);
            }
        }

        let winrm_proto = match non_empty(string_option(options, "winrm_proto")?) {
            Some(p) => Scheme::parse(&p)?,
            None => Scheme::Http,
        };
        let ldap_proto = match non_empty(string_option(options, "ldap_proto")?) {
            Some(p) => LdapScheme::parse(&p)?,
            None => LdapScheme::Ldap,
        };
        let backend = Backend::parse(&string_option(options, "backend")?.unwrap_or_default())?;

        let mut config = Self {
            winrm_username: string_option(options, "winrm_username")?.unwrap_or_default(),
            winrm_password: string_option(options, "winrm_password")?.unwrap_or_default(),
            winrm_hostname: string_option(options, "winrm_hostname")?
                .unwrap_or_default()
                .trim()
                .to_string(),
            winrm_port: port_option(options, "winrm_port")?.unwrap_or(DEFAULT_WINRM_PORT),
            winrm_proto,
            winrm_insecure: bool_option(options, "winrm_insecure")?.unwrap_or(false),
            winrm_use_ntlm: bool_option(options, "winrm_use_ntlm")?.unwrap_or(false),
            winrm_pass_credentials: bool_option(options, "winrm_pass_credentials")?.unwrap_or(false),
            krb_realm: non_empty(string_option(options, "krb_realm")?).unwrap_or_default(),
            krb_conf: non_empty(string_option(options, "krb_conf")?).map(PathBuf::from),
            krb_keytab: non_empty(string_option(options, "krb_keytab")?).map(PathBuf::from),
            krb_spn: non_empty(string_option(options, "krb_spn")?),
            domain_controller: non_empty(string_option(options, "domain_controller")?).unwrap_or_default(),
            backend,
            ldap_proto,
            ldap_port: port_option(options, "ldap_port")?.unwrap_or_else(|| ldap_proto.default_port()),
            ldap_insecure: bool_option(options, "ldap_insecure")?.unwrap_or(false),
            domain_dn: non_empty(string_option(options, "domain_dn")?),
        };
        config.validate()?;
        debug!("Provider configuration: {:?}", config);
        Ok(config)
    }

    fn validate(&mut self) -> AdResult<()> {
        if self.winrm_pass_credentials && self.winrm_proto != Scheme::Https {
            return Err(AdError::validation(
                "winrm_pass_credentials requires winrm_proto = https",
            ));
        }
        if self.krb_realm.is_empty() {
            for (name, set) in [
                ("krb_conf", self.krb_conf.is_some()),
                ("krb_keytab", self.krb_keytab.is_some()),
                ("krb_spn", self.krb_spn.is_some()),
            ] {
                if set {
                    warn!("{} is ignored without krb_realm", name);
                }
            }
            self.krb_conf = None;
            self.krb_keytab = None;
            self.krb_spn = None;
        } else if self.winrm_use_ntlm {
            warn!("krb_realm is set, Kerberos takes precedence over winrm_use_ntlm");
        }
        if self.backend == Backend::Ldap && self.winrm_hostname.is_empty() {
            return Err(AdError::validation("the ldap backend requires winrm_hostname"));
        }
        Ok(())
    }

    pub fn auth_mode(&self) -> AuthMode {
        if !self.krb_realm.is_empty() {
            AuthMode::Kerberos
        } else if self.winrm_use_ntlm {
            AuthMode::Ntlm
        } else {
            AuthMode::Basic
        }
    }

    /// The immutable settings shared by every layer.
    pub fn into_settings(self) -> Settings {
        let auth = self.auth_mode();
        let kerberos = (!self.krb_realm.is_empty()).then(|| KerberosSettings {
            realm: self.krb_realm.clone(),
            conf_path: self.krb_conf.clone(),
            keytab_path: self.krb_keytab.clone(),
            spn: self.krb_spn.clone(),
        });
        let domain_dn = self.domain_dn.clone().or_else(|| {
            (!self.krb_realm.is_empty()).then(|| domain_dn_from_realm(&self.krb_realm))
        });
        Settings {
            host: self.winrm_hostname,
            port: self.winrm_port,
            scheme: self.winrm_proto,
            insecure: self.winrm_insecure,
            username: self.winrm_username,
            password: self.winrm_password,
            auth,
            kerberos,
            pass_credentials: self.winrm_pass_credentials,
            domain_controller: self.domain_controller,
            backend: self.backend,
            ldap_scheme: self.ldap_proto,
            ldap_port: self.ldap_port,
            ldap_insecure: self.ldap_insecure,
            domain_dn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adp_core::AdErrorKind;
    use serde_json::json;
    use serial_test::serial;

    fn clear_env() {
        for (_, env) in OPTIONS {
            if let Some(env) = env {
                std::env::remove_var(env);
            }
        }
    }

    fn options(v: Value) -> OptionMap {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    #[serial]
    fn defaults() {
        clear_env();
        let c = ProviderConfig::from_options(&OptionMap::new()).unwrap();
        assert_eq!(c, ProviderConfig::default());
        let s = c.into_settings();
        assert_eq!(s.port, 5985);
        assert_eq!(s.scheme, Scheme::Http);
        assert_eq!(s.auth, AuthMode::Basic);
        assert!(s.kerberos.is_none());
        assert_eq!(s.ldap_port, 389);
    }

    #[test]
    #[serial]
    fn scalars_are_coerced() {
        clear_env();
        let c = ProviderConfig::from_options(&options(json!({
            "winrm_hostname": "dc1.example.com",
            "winrm_port": "5986",
            "winrm_proto": "HTTPS",
            "winrm_insecure": "true",
            "winrm_pass_credentials": true,
            "winrm_use_ntlm": "0",
        })))
        .unwrap();
        assert_eq!(c.winrm_port, 5986);
        assert_eq!(c.winrm_proto, Scheme::Https);
        assert!(c.winrm_insecure);
        assert!(c.winrm_pass_credentials);
        assert!(!c.winrm_use_ntlm);

        let bad = ProviderConfig::from_options(&options(json!({ "winrm_insecure": "maybe" }))).unwrap_err();
        assert_eq!(bad.kind, AdErrorKind::Validation);
    }

    #[test]
    #[serial]
    fn port_range() {
        clear_env();
        for port in [json!(0), json!(65536), json!("http"), json!(-1)] {
            let err = ProviderConfig::from_options(&options(json!({ "winrm_port": port }))).unwrap_err();
            assert_eq!(err.kind, AdErrorKind::Validation);
        }
        let c = ProviderConfig::from_options(&options(json!({ "winrm_port": 65535 }))).unwrap();
        assert_eq!(c.winrm_port, 65535);
    }

    #[test]
    #[serial]
    fn bad_enums_are_rejected() {
        clear_env();
        for (key, value) in [("winrm_proto", "ftp"), ("backend", "adsi"), ("ldap_proto", "cldap")] {
            let mut map = OptionMap::new();
            map.insert(key.to_string(), json!(value));
            assert_eq!(
                ProviderConfig::from_options(&map).unwrap_err().kind,
                AdErrorKind::Validation,
                "{}",
                key
            );
        }
    }

    #[test]
    #[serial]
    fn pass_credentials_needs_https() {
        clear_env();
        let err = ProviderConfig::from_options(&options(json!({ "winrm_pass_credentials": true }))).unwrap_err();
        assert_eq!(err.kind, AdErrorKind::Validation);
        assert!(err.message.contains("https"));
    }

    #[test]
    #[serial]
    fn kerberos_options_need_a_realm() {
        clear_env();
        let c = ProviderConfig::from_options(&options(json!({
            "krb_keytab": "/etc/krb5.keytab",
            "krb_spn": "HTTP/dc1",
        })))
        .unwrap();
        assert!(c.krb_keytab.is_none());
        assert!(c.krb_spn.is_none());
        assert!(c.into_settings().kerberos.is_none());
    }

    #[test]
    #[serial]
    fn kerberos_mode() {
        clear_env();
        let s = ProviderConfig::from_options(&options(json!({
            "winrm_hostname": "dc1.example.com",
            "krb_realm": "EXAMPLE.COM",
            "krb_keytab": "/etc/krb5.keytab",
            "winrm_use_ntlm": true,
        })))
        .unwrap()
        .into_settings();
        assert_eq!(s.auth, AuthMode::Kerberos);
        let krb = s.kerberos.as_ref().unwrap();
        assert_eq!(krb.realm, "EXAMPLE.COM");
        assert_eq!(krb.keytab_path.as_deref(), Some(std::path::Path::new("/etc/krb5.keytab")));
        assert_eq!(s.target_server(), "EXAMPLE.COM");
        assert_eq!(s.domain_dn.as_deref(), Some("DC=example,DC=com"));
    }

    #[test]
    #[serial]
    fn ntlm_mode_and_pinned_controller() {
        clear_env();
        let s = ProviderConfig::from_options(&options(json!({
            "winrm_use_ntlm": true,
            "domain_controller": "dc2.example.com",
        })))
        .unwrap()
        .into_settings();
        assert_eq!(s.auth, AuthMode::Ntlm);
        assert_eq!(s.target_server(), "dc2.example.com");
    }

    #[test]
    #[serial]
    fn environment_defaults() {
        clear_env();
        std::env::set_var("AD_HOSTNAME", "dc3.example.com");
        std::env::set_var("AD_PORT", "5986");
        std::env::set_var("AD_PROTO", "https");
        std::env::set_var("AD_USER", "admin");
        std::env::set_var("AD_WINRM_INSECURE", "true");
        std::env::set_var("AD_KRB_REALM", "EXAMPLE.COM");

        let c = ProviderConfig::from_options(&options(json!({ "winrm_username": "explicit" }))).unwrap();
        assert_eq!(c.winrm_hostname, "dc3.example.com");
        assert_eq!(c.winrm_port, 5986);
        assert_eq!(c.winrm_proto, Scheme::Https);
        assert!(c.winrm_insecure);
        assert_eq!(c.krb_realm, "EXAMPLE.COM");
        // An explicit option wins over the environment.
        assert_eq!(c.winrm_username, "explicit");

        let null_falls_back = ProviderConfig::from_options(&options(json!({ "winrm_username": null }))).unwrap();
        assert_eq!(null_falls_back.winrm_username, "admin");
        clear_env();
    }

    #[test]
    #[serial]
    fn ldap_backend() {
        clear_env();
        let s = ProviderConfig::from_options(&options(json!({
            "winrm_hostname": "dc1.example.com",
            "backend": "ldap",
            "ldap_proto": "ldaps",
            "domain_dn": "DC=corp,DC=example,DC=com",
        })))
        .unwrap()
        .into_settings();
        assert_eq!(s.backend, Backend::Ldap);
        assert_eq!(s.ldap_port, 636);
        assert_eq!(s.ldap_url(), "ldaps://dc1.example.com:636");
        assert_eq!(s.domain_dn.as_deref(), Some("DC=corp,DC=example,DC=com"));

        let err = ProviderConfig::from_options(&options(json!({ "backend": "ldap" }))).unwrap_err();
        assert_eq!(err.kind, AdErrorKind::Validation);
    }

    #[test]
    fn debug_redacts_password() {
        let c = ProviderConfig {
            winrm_password: "hunter2".into(),
            ..Default::default()
        };
        let printed = format!("{:?}", c);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<REDACTED>"));
    }
}
