//! Kerberos configuration, keytab loading and initial-token generation.
//!
//! Password logins go through the pure-Rust `sspi` Kerberos client, which
//! talks to the KDC through [`KdcNetworkClient`]. Keytab logins run the
//! ticket exchanges in [`crate::ticket`] with the keytab key, or go through
//! the system GSSAPI library when the `gssapi` feature is enabled.

use adp_core::{AdError, AdResult, Settings};
use log::{debug, warn};
use picky_krb::crypto::CipherSuite;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const KDC_PORT: u16 = 88;
pub const ADMIN_PORT: u16 = 749;

/// Encryption types offered when the configuration is synthesized.
pub const PERMITTED_ENCTYPES: &[&str] = &[
    "aes128-cts-hmac-sha1-96",
    "aes256-cts-hmac-sha1-96",
    "aes128-cts-hmac-sha256-128",
    "aes256-cts-hmac-sha384-192",
];

/// Pre-authentication types, most preferred first.
pub const PREAUTH_TYPES: &[u32] = &[17, 16, 15, 14];

const KDC_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_UDP_PREFERENCE_LIMIT: usize = 1465;

// ─── krb5.conf ───────────────────────────────────────────────────────────────

/// One `[realms]` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealmEntry {
    pub kdc: Vec<String>,
    pub admin_server: Vec<String>,
    pub kpasswd_server: Vec<String>,
}

/// The subset of krb5.conf this crate reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Krb5Config {
    pub libdefaults: BTreeMap<String, String>,
    pub realms: BTreeMap<String, RealmEntry>,
}

impl Krb5Config {
    /// Single-realm configuration pointing every service at `host`.
    pub fn synthesize(realm: &str, host: &str) -> Self {
        let enctypes = PERMITTED_ENCTYPES.join(" ");
        let preauth = PREAUTH_TYPES
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        let mut libdefaults = BTreeMap::new();
        libdefaults.insert("default_realm".to_string(), realm.to_string());
        libdefaults.insert("dns_lookup_kdc".to_string(), "false".to_string());
        libdefaults.insert("dns_lookup_realm".to_string(), "false".to_string());
        libdefaults.insert("default_tkt_enctypes".to_string(), enctypes.clone());
        libdefaults.insert("default_tgs_enctypes".to_string(), enctypes.clone());
        libdefaults.insert("permitted_enctypes".to_string(), enctypes);
        libdefaults.insert("udp_preference_limit".to_string(), "1".to_string());
        libdefaults.insert("preferred_preauth_types".to_string(), preauth);

        let mut realms = BTreeMap::new();
        realms.insert(
            realm.to_string(),
            RealmEntry {
                kdc: vec![format!("{}:{}", host, KDC_PORT)],
                admin_server: vec![format!("{}:{}", host, ADMIN_PORT)],
                kpasswd_server: vec![host.to_string()],
            },
        );
        Self { libdefaults, realms }
    }

    /// Parse a krb5.conf. Sections other than `[libdefaults]` and
    /// `[realms]` are checked for structure and otherwise ignored.
    pub fn parse(text: &str) -> AdResult<Self> {
        let mut conf = Self::default();
        let mut section: Option<String> = None;
        let mut depth = 0usize;
        let mut current_realm: Option<String> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let err = |msg: &str| {
                AdError::transport(format!("invalid krb5.conf line {}: {}", line_no, msg))
            };

            if line.starts_with('[') {
                if depth != 0 {
                    return Err(err("section header inside a block"));
                }
                let name = line
                    .strip_prefix('[')
                    .and_then(|l| l.strip_suffix(']'))
                    .ok_or_else(|| err("unterminated section header"))?;
                section = Some(name.trim().to_string());
                continue;
            }
            let section_name = section.as_deref().ok_or_else(|| err("entry outside of a section"))?;

            if line == "}" {
                if depth == 0 {
                    return Err(err("unbalanced '}'"));
                }
                depth -= 1;
                if depth == 0 {
                    current_realm = None;
                }
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .ok_or_else(|| err("expected 'key = value'"))?;

            if value == "{" {
                if section_name == "realms" && depth == 0 {
                    conf.realms.entry(key.to_string()).or_default();
                    current_realm = Some(key.to_string());
                }
                depth += 1;
                continue;
            }

            match (section_name, depth, current_realm.as_ref()) {
                ("libdefaults", 0, _) => {
                    conf.libdefaults.insert(key.to_string(), value.to_string());
                }
                ("realms", 1, Some(realm)) => {
                    let entry = conf.realms.entry(realm.clone()).or_default();
                    match key {
                        "kdc" => entry.kdc.push(value.to_string()),
                        "admin_server" => entry.admin_server.push(value.to_string()),
                        "kpasswd_server" => entry.kpasswd_server.push(value.to_string()),
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        if depth != 0 {
            return Err(AdError::transport("invalid krb5.conf: unterminated block"));
        }
        Ok(conf)
    }

    pub fn load(path: &Path) -> AdResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AdError::transport(format!("cannot read krb5.conf '{}': {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    pub fn render(&self) -> String {
        let mut out = String::from("[libdefaults]\n");
        for (k, v) in &self.libdefaults {
            out.push_str(&format!("    {} = {}\n", k, v));
        }
        out.push_str("\n[realms]\n");
        for (realm, entry) in &self.realms {
            out.push_str(&format!("    {} = {{\n", realm));
            for kdc in &entry.kdc {
                out.push_str(&format!("        kdc = {}\n", kdc));
            }
            for admin in &entry.admin_server {
                out.push_str(&format!("        admin_server = {}\n", admin));
            }
            for kpasswd in &entry.kpasswd_server {
                out.push_str(&format!("        kpasswd_server = {}\n", kpasswd));
            }
            out.push_str("    }\n");
        }
        out
    }

    /// First KDC of the realm (realm names compare case-insensitively).
    pub fn kdc_for(&self, realm: &str) -> Option<&str> {
        self.realms
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(realm))
            .and_then(|(_, entry)| entry.kdc.first())
            .map(String::as_str)
    }

    /// Encryption types the native client can use, in configured order.
    /// `permitted_enctypes` wins over `default_tkt_enctypes`; names the
    /// client has no cipher for are skipped.
    pub fn permitted_ciphers(&self) -> Vec<CipherSuite> {
        let listed = self
            .libdefaults
            .get("permitted_enctypes")
            .or_else(|| self.libdefaults.get("default_tkt_enctypes"));
        let Some(listed) = listed else {
            return vec![CipherSuite::Aes256CtsHmacSha196, CipherSuite::Aes128CtsHmacSha196];
        };

        let mut out = Vec::new();
        for name in listed.split(|c: char| c.is_whitespace() || c == ',') {
            let suite = match name.to_ascii_lowercase().as_str() {
                "aes256-cts-hmac-sha1-96" | "aes256-cts" | "18" => CipherSuite::Aes256CtsHmacSha196,
                "aes128-cts-hmac-sha1-96" | "aes128-cts" | "17" => CipherSuite::Aes128CtsHmacSha196,
                "aes" => {
                    for suite in [CipherSuite::Aes256CtsHmacSha196, CipherSuite::Aes128CtsHmacSha196] {
                        if !out.contains(&suite) {
                            out.push(suite);
                        }
                    }
                    continue;
                }
                _ => continue,
            };
            if !out.contains(&suite) {
                out.push(suite);
            }
        }
        out
    }

    /// Messages larger than this go to the KDC over TCP.
    pub fn udp_preference_limit(&self) -> usize {
        self.libdefaults
            .get("udp_preference_limit")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_UDP_PREFERENCE_LIMIT)
    }
}

// ─── Keytab ──────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq)]
pub struct KeytabEntry {
    pub realm: String,
    pub components: Vec<String>,
    pub kvno: u32,
    pub enctype: u16,
    pub timestamp: u32,
    pub key: Vec<u8>,
}

impl std::fmt::Debug for KeytabEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeytabEntry")
            .field("principal", &self.principal())
            .field("kvno", &self.kvno)
            .field("enctype", &self.enctype)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

impl KeytabEntry {
    pub fn principal(&self) -> String {
        format!("{}@{}", self.components.join("/"), self.realm)
    }
}

/// MIT keytab (format versions 0x0501 and 0x0502).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keytab {
    pub entries: Vec<KeytabEntry>,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    big_endian: bool,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> AdResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| AdError::transport("keytab is truncated"))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> AdResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> AdResult<u16> {
        let b = self.take(2)?;
        let b = [b[0], b[1]];
        Ok(if self.big_endian { u16::from_be_bytes(b) } else { u16::from_le_bytes(b) })
    }

    fn u32(&mut self) -> AdResult<u32> {
        let b = self.take(4)?;
        let b = [b[0], b[1], b[2], b[3]];
        Ok(if self.big_endian { u32::from_be_bytes(b) } else { u32::from_le_bytes(b) })
    }

    fn string(&mut self) -> AdResult<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| AdError::transport("keytab holds a non UTF-8 name"))
    }
}

impl Keytab {
    pub fn parse(data: &[u8]) -> AdResult<Self> {
        if data.len() < 2 || data[0] != 0x05 {
            return Err(AdError::transport("not a keytab file"));
        }
        let version = data[1];
        if version != 0x01 && version != 0x02 {
            return Err(AdError::transport(format!(
                "unsupported keytab version 0x05{:02x}",
                version
            )));
        }
        let mut cur = Cursor {
            data,
            pos: 2,
            big_endian: version == 0x02,
        };

        let mut entries = Vec::new();
        while cur.pos < data.len() {
            let size = cur.u32()? as i32;
            if size < 0 {
                // Hole left by a deleted entry.
                cur.take(size.unsigned_abs() as usize)?;
                continue;
            }
            if size == 0 {
                break;
            }
            let record = cur.take(size as usize)?;
            let mut rec = Cursor {
                data: record,
                pos: 0,
                big_endian: cur.big_endian,
            };

            let mut count = rec.u16()? as usize;
            if version == 0x01 {
                count = count.saturating_sub(1);
            }
            let realm = rec.string()?;
            let components = (0..count)
                .map(|_| rec.string())
                .collect::<AdResult<Vec<_>>>()?;
            if version == 0x02 {
                let _name_type = rec.u32()?;
            }
            let timestamp = rec.u32()?;
            let mut kvno = u32::from(rec.u8()?);
            let enctype = rec.u16()?;
            let key_len = rec.u16()? as usize;
            let key = rec.take(key_len)?.to_vec();
            if record.len() - rec.pos >= 4 {
                let wide = rec.u32()?;
                if wide != 0 {
                    kvno = wide;
                }
            }

            entries.push(KeytabEntry {
                realm,
                components,
                kvno,
                enctype,
                timestamp,
                key,
            });
        }

        if entries.is_empty() {
            return Err(AdError::transport("keytab holds no entries"));
        }
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> AdResult<Self> {
        let data = std::fs::read(path).map_err(|e| {
            AdError::transport(format!("cannot read keytab '{}': {}", path.display(), e))
        })?;
        Self::parse(&data)
    }

    /// Principal to log in as: the configured user when the keytab holds it,
    /// otherwise the first entry of the realm.
    pub fn select_principal(&self, username: &str, realm: &str) -> AdResult<String> {
        let wanted = if username.is_empty() {
            None
        } else if username.contains('@') {
            Some(username.to_string())
        } else {
            Some(format!("{}@{}", username, realm))
        };

        if let Some(wanted) = wanted {
            return self
                .entries
                .iter()
                .map(KeytabEntry::principal)
                .find(|p| p.eq_ignore_ascii_case(&wanted))
                .ok_or_else(|| {
                    AdError::transport(format!("keytab holds no key for '{}'", wanted))
                });
        }

        self.entries
            .iter()
            .find(|e| e.realm.eq_ignore_ascii_case(realm))
            .map(KeytabEntry::principal)
            .ok_or_else(|| AdError::transport(format!("keytab holds no key for realm {}", realm)))
    }
}

// ─── KDC transport ───────────────────────────────────────────────────────────

/// Blocking KDC client used by `sspi` while it builds a ticket request.
pub struct KdcNetworkClient {
    http: Option<reqwest::blocking::Client>,
}

impl KdcNetworkClient {
    pub fn new(insecure: bool) -> Self {
        let http = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .connect_timeout(KDC_TIMEOUT)
            .timeout(KDC_TIMEOUT)
            .build()
            .map_err(|e| warn!("KDC proxy client unavailable: {}", e))
            .ok();
        Self { http }
    }

    fn resolve(url: &str) -> sspi::Result<std::net::SocketAddr> {
        let addr = url
            .trim_start_matches("tcp://")
            .trim_start_matches("udp://")
            .trim_end_matches('/');
        addr.to_socket_addrs()
            .map_err(|e| kdc_error(format!("KDC address resolution failed: {}", e)))?
            .next()
            .ok_or_else(|| kdc_error("KDC address resolved to nothing".to_string()))
    }

    /// Request and response are both framed with a 4-byte big-endian length.
    fn send_tcp(url: &str, data: &[u8]) -> sspi::Result<Vec<u8>> {
        let addr = Self::resolve(url)?;
        let mut stream = TcpStream::connect_timeout(&addr, KDC_TIMEOUT)
            .map_err(|e| kdc_error(format!("KDC unreachable: {}", e)))?;
        let _ = stream.set_read_timeout(Some(KDC_TIMEOUT));
        let _ = stream.set_write_timeout(Some(KDC_TIMEOUT));
        stream
            .write_all(data)
            .map_err(|e| kdc_error(format!("KDC write failed: {}", e)))?;

        let mut len = [0u8; 4];
        stream
            .read_exact(&mut len)
            .map_err(|e| kdc_error(format!("KDC read failed: {}", e)))?;
        let body_len = u32::from_be_bytes(len) as usize;
        let mut reply = vec![0u8; 4 + body_len];
        reply[..4].copy_from_slice(&len);
        stream
            .read_exact(&mut reply[4..])
            .map_err(|e| kdc_error(format!("KDC read failed: {}", e)))?;
        Ok(reply)
    }

    fn send_udp(url: &str, data: &[u8]) -> sspi::Result<Vec<u8>> {
        let addr = Self::resolve(url)?;
        // Datagrams carry no length prefix.
        let payload = if data.len() >= 4
            && u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize == data.len() - 4
        {
            &data[4..]
        } else {
            data
        };
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .map_err(|e| kdc_error(format!("cannot open UDP socket: {}", e)))?;
        let _ = socket.set_read_timeout(Some(KDC_TIMEOUT));
        socket
            .send_to(payload, addr)
            .map_err(|e| kdc_error(format!("KDC write failed: {}", e)))?;
        let mut buf = vec![0u8; 65_535];
        let n = socket
            .recv(&mut buf)
            .map_err(|e| kdc_error(format!("KDC read failed: {}", e)))?;
        let mut reply = Vec::with_capacity(n + 4);
        reply.extend_from_slice(&(n as u32).to_be_bytes());
        reply.extend_from_slice(&buf[..n]);
        Ok(reply)
    }

    fn send_http(&self, url: &str, data: &[u8]) -> sspi::Result<Vec<u8>> {
        let client = self
            .http
            .as_ref()
            .ok_or_else(|| kdc_error("KDC proxy client unavailable".to_string()))?;
        let resp = client
            .post(url)
            .body(data.to_vec())
            .send()
            .map_err(|e| kdc_error(format!("HTTP request failed: {}", e)))?;
        Ok(resp
            .bytes()
            .map_err(|e| kdc_error(format!("Failed to read response body: {}", e)))?
            .to_vec())
    }
}

impl KdcNetworkClient {
    /// Send one KDC message (bare DER, no length prefix) and return the bare
    /// reply. `kdc` is `host[:port]` or a `tcp://`, `udp://` or `http(s)://`
    /// URL. Bare addresses use UDP for messages up to `udp_limit` bytes.
    pub fn exchange(
        &self,
        kdc: &str,
        realm: &str,
        message: &[u8],
        udp_limit: usize,
    ) -> AdResult<Vec<u8>> {
        let transport_err = |e: sspi::Error| AdError::transport(e.to_string());

        if kdc.starts_with("http://") || kdc.starts_with("https://") {
            return self.exchange_proxy(kdc, realm, message);
        }
        let addr = kdc_address(kdc);
        let reply = if prefers_tcp(kdc, message.len(), udp_limit) {
            debug!("KDC request ({} bytes) over TCP to {}", message.len(), addr);
            Self::send_tcp(&addr, &length_prefixed(message))
        } else {
            debug!("KDC request ({} bytes) over UDP to {}", message.len(), addr);
            Self::send_udp(&addr, message)
        }
        .map_err(transport_err)?;
        Ok(reply.get(4..).unwrap_or_default().to_vec())
    }

    /// MS-KKDCP: the framed message travels inside a `KDC-PROXY-MESSAGE`.
    fn exchange_proxy(&self, url: &str, realm: &str, message: &[u8]) -> AdResult<Vec<u8>> {
        use picky_asn1::restricted_string::IA5String;
        use picky_asn1::wrapper::{ExplicitContextTag0, ExplicitContextTag1, OctetStringAsn1, Optional};
        use picky_krb::data_types::KerberosStringAsn1;
        use picky_krb::messages::KdcProxyMessage;

        let der_err = |e: picky_asn1_der::Asn1DerError| AdError::transport(format!("KDC proxy message: {}", e));
        let domain = IA5String::from_string(realm.to_string())
            .map_err(|e| AdError::transport(format!("invalid realm '{}': {}", realm, e)))?;
        let request = KdcProxyMessage {
            kerb_message: ExplicitContextTag0::from(OctetStringAsn1::from(length_prefixed(message))),
            target_domain: Optional::from(Some(ExplicitContextTag1::from(KerberosStringAsn1::from(domain)))),
            dclocator_hint: Optional::from(None),
        };
        let body = request.to_vec().map_err(der_err)?;
        debug!("KDC request ({} bytes) through proxy {}", message.len(), url);
        let reply = self
            .send_http(url, &body)
            .map_err(|e| AdError::transport(e.to_string()))?;
        let reply = KdcProxyMessage::from_raw(&reply).map_err(der_err)?;
        Ok(reply.kerb_message.0 .0.get(4..).unwrap_or_default().to_vec())
    }
}

fn length_prefixed(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 4);
    out.extend_from_slice(&(message.len() as u32).to_be_bytes());
    out.extend_from_slice(message);
    out
}

/// `host:port` of a KDC entry, defaulting the port to 88.
pub fn kdc_address(kdc: &str) -> String {
    let host = kdc
        .trim_start_matches("tcp://")
        .trim_start_matches("udp://")
        .trim_end_matches('/');
    if host.contains(':') {
        host.to_string()
    } else {
        format!("{}:{}", host, KDC_PORT)
    }
}

/// An explicit `tcp://` or `udp://` scheme wins over the size limit.
pub fn prefers_tcp(kdc: &str, len: usize, udp_limit: usize) -> bool {
    if kdc.starts_with("tcp://") {
        true
    } else if kdc.starts_with("udp://") {
        false
    } else {
        len > udp_limit
    }
}

fn kdc_error(message: String) -> sspi::Error {
    sspi::Error::new(sspi::ErrorKind::NoAuthenticatingAuthority, message)
}

impl sspi::network_client::NetworkClient for KdcNetworkClient {
    fn send(&self, request: &sspi::generator::NetworkRequest) -> sspi::Result<Vec<u8>> {
        use sspi::network_client::NetworkProtocol;

        let url = request.url.to_string();
        debug!("Kerberos KDC request ({:?}) to {}", request.protocol, url);
        match request.protocol {
            NetworkProtocol::Tcp => Self::send_tcp(&url, &request.data),
            NetworkProtocol::Udp => Self::send_udp(&url, &request.data),
            NetworkProtocol::Http | NetworkProtocol::Https => self.send_http(&url, &request.data),
        }
    }
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// How the client obtains its initial credentials.
#[derive(Clone)]
pub enum KerberosCredentials {
    Password { username: String, password: String },
    Keytab { principal: String, path: PathBuf },
}

/// Everything needed to produce an AP-REQ for the WinRM service.
#[derive(Clone)]
pub struct KerberosClient {
    pub realm: String,
    pub spn: String,
    pub kdc: String,
    pub config: Krb5Config,
    pub credentials: KerberosCredentials,
    insecure: bool,
}

impl KerberosClient {
    /// Resolve configuration and credentials from the settings. All local
    /// failures (configuration, keytab) surface here as Transport errors.
    pub fn from_settings(settings: &Settings) -> AdResult<Self> {
        let krb = settings
            .kerberos
            .as_ref()
            .ok_or_else(|| AdError::transport("Kerberos requested without a realm"))?;
        let realm = krb.realm.to_uppercase();

        let config = match &krb.conf_path {
            Some(path) => Krb5Config::load(path)?,
            None => Krb5Config::synthesize(&realm, &settings.host),
        };
        let kdc = config
            .kdc_for(&realm)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}:{}", settings.host, KDC_PORT));

        let credentials = match &krb.keytab_path {
            Some(path) => {
                let keytab = Keytab::load(path)?;
                let principal = keytab.select_principal(&settings.username, &realm)?;
                debug!("Using keytab {} for {}", path.display(), principal);
                KerberosCredentials::Keytab {
                    principal,
                    path: path.clone(),
                }
            }
            None => KerberosCredentials::Password {
                username: qualify_username(&settings.username, &realm),
                password: settings.password.clone(),
            },
        };

        Ok(Self {
            realm,
            spn: settings.spn(),
            kdc,
            config,
            credentials,
            insecure: settings.insecure,
        })
    }

    fn kdc_url(&self) -> String {
        if self.kdc.contains("://") {
            self.kdc.clone()
        } else if self.kdc.contains(':') {
            format!("tcp://{}", self.kdc)
        } else {
            format!("tcp://{}:{}", self.kdc, KDC_PORT)
        }
    }

    /// Produce the SPNEGO-framed initial token for the service.
    pub async fn initial_token(&self) -> AdResult<Vec<u8>> {
        let client = self.clone();
        let token = tokio::task::spawn_blocking(move || client.initial_token_blocking())
            .await
            .map_err(|e| AdError::auth(format!("Kerberos worker failed: {}", e)))??;
        Ok(crate::spnego::ensure_wrapped(token))
    }

    fn initial_token_blocking(&self) -> AdResult<Vec<u8>> {
        match &self.credentials {
            KerberosCredentials::Password { username, password } => {
                self.sspi_token(username, password)
            }
            KerberosCredentials::Keytab { principal, path } => self.keytab_token(principal, path),
        }
    }

    fn sspi_token(&self, username: &str, password: &str) -> AdResult<Vec<u8>> {
        use sspi::{
            AuthIdentity, BufferType, ClientRequestFlags, CredentialUse, Credentials,
            DataRepresentation, Kerberos, KerberosConfig, SecurityBuffer, Sspi, SspiImpl, Username,
        };

        let auth_err = |e: sspi::Error| AdError::auth(format!("Kerberos authentication failed: {}", e));

        let mut kerberos =
            Kerberos::new_client_from_config(KerberosConfig::new(&self.kdc_url(), local_hostname()))
                .map_err(|e| AdError::transport(format!("Kerberos setup failed: {}", e)))?;

        let identity = AuthIdentity {
            username: Username::parse(username)
                .map_err(|e| AdError::auth(format!("invalid Kerberos username: {}", e)))?,
            password: password.to_string().into(),
        };
        let credentials = Credentials::AuthIdentity(identity);
        let mut handle = kerberos
            .acquire_credentials_handle()
            .with_credential_use(CredentialUse::Outbound)
            .with_auth_data(&credentials)
            .execute(&mut kerberos)
            .map_err(auth_err)?
            .credentials_handle;

        let network = KdcNetworkClient::new(self.insecure);
        let mut output = vec![SecurityBuffer::new(Vec::new(), BufferType::Token)];
        let mut builder = kerberos
            .initialize_security_context()
            .with_credentials_handle(&mut handle)
            .with_context_requirements(ClientRequestFlags::MUTUAL_AUTH)
            .with_target_data_representation(DataRepresentation::Native)
            .with_target_name(&self.spn)
            .with_output(&mut output);
        kerberos
            .initialize_security_context_impl(&mut builder)
            .map_err(auth_err)?
            .resolve_with_client(&network)
            .map_err(auth_err)?;

        let token = output
            .into_iter()
            .next()
            .map(|b| b.buffer)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| AdError::auth("Kerberos produced an empty token"))?;
        debug!("Obtained Kerberos token for {} ({} bytes)", self.spn, token.len());
        Ok(token)
    }

    #[cfg(not(feature = "gssapi"))]
    fn keytab_token(&self, principal: &str, path: &Path) -> AdResult<Vec<u8>> {
        let keytab = Keytab::load(path)?;
        let hostname = local_hostname();
        let request = crate::ticket::TicketRequest {
            principal,
            spn: &self.spn,
            kdc: &self.kdc,
            hostname: &hostname,
            config: &self.config,
        };
        let network = KdcNetworkClient::new(self.insecure);
        let token = crate::ticket::keytab_ap_req(&request, &keytab, &network)?;
        debug!("Obtained Kerberos token for {} ({} bytes)", self.spn, token.len());
        Ok(token)
    }

    #[cfg(feature = "gssapi")]
    fn keytab_token(&self, principal: &str, keytab: &Path) -> AdResult<Vec<u8>> {
        use cross_krb5::{ClientCtx, InitiateFlags};

        let conf = tempfile_path("krb5.conf");
        std::fs::write(&conf, self.config.render())
            .map_err(|e| AdError::transport(format!("cannot write krb5.conf: {}", e)))?;

        // GSSAPI names services as service@host.
        let target = self.spn.replacen('/', "@", 1);
        let result = with_krb5_env(&conf, keytab, || {
            ClientCtx::new(InitiateFlags::empty(), Some(principal), &target, None)
                .map(|(_pending, token)| token.to_vec())
        });
        let _ = std::fs::remove_file(&conf);
        result.map_err(|e| AdError::auth(format!("Kerberos authentication failed: {}", e)))
    }
}

#[cfg(feature = "gssapi")]
fn tempfile_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "adp-{}-{}-{}",
        std::process::id(),
        rand::random::<u32>(),
        name
    ))
}

static KRB5_ENV: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Run `f` with `KRB5_CONFIG` and `KRB5_CLIENT_KTNAME` set, restoring the
/// previous values afterwards. Callers are serialized on a process-wide
/// lock, so concurrent logins never see each other's files.
#[cfg_attr(not(feature = "gssapi"), allow(dead_code))]
fn with_krb5_env<T>(conf: &Path, keytab: &Path, f: impl FnOnce() -> T) -> T {
    let _guard = KRB5_ENV.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let saved = [
        ("KRB5_CONFIG", std::env::var_os("KRB5_CONFIG")),
        ("KRB5_CLIENT_KTNAME", std::env::var_os("KRB5_CLIENT_KTNAME")),
    ];
    std::env::set_var("KRB5_CONFIG", conf);
    std::env::set_var("KRB5_CLIENT_KTNAME", keytab);
    let out = f();
    for (name, value) in saved {
        match value {
            Some(v) => std::env::set_var(name, v),
            None => std::env::remove_var(name),
        }
    }
    out
}

fn local_hostname() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

/// `user` → `user@REALM`; already qualified names are kept.
pub fn qualify_username(username: &str, realm: &str) -> String {
    if username.contains('@') || username.contains('\\') {
        username.to_string()
    } else {
        format!("{}@{}", username, realm)
    }
}
