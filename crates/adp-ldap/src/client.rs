//! LDAP connection and the directory operations the back-end needs.

use adp_core::{AdError, AdResult, LdapScheme, Settings};
use adp_winrm::kerberos::qualify_username;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, LdapResult, Mod, Scope, SearchEntry, SearchResult};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::time::Duration;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub const RC_SUCCESS: u32 = 0;
pub const RC_NO_SUCH_OBJECT: u32 = 32;
pub const RC_INVALID_CREDENTIALS: u32 = 49;
pub const RC_ALREADY_EXISTS: u32 = 68;

/// Attribute list for an add request.
pub type Attrs = Vec<(String, Vec<Vec<u8>>)>;

/// Map an LDAP result code onto the error kinds.
pub fn check(res: LdapResult, what: &str) -> AdResult<()> {
    match res.rc {
        RC_SUCCESS => Ok(()),
        RC_ALREADY_EXISTS => Err(AdError::with_details(
            adp_core::AdErrorKind::Conflict,
            format!("object already exists: {}", what),
            res.text,
        )),
        RC_NO_SUCH_OBJECT => Err(AdError::not_found(format!("There is no such object: {}", what))),
        RC_INVALID_CREDENTIALS => Err(AdError::auth(format!("LDAP bind rejected: {}", res.text))),
        rc => Err(AdError::command(format!("LDAP error {} on {}: {}", rc, what, res.text))),
    }
}

fn ldap_error(what: &str, e: LdapError) -> AdError {
    AdError::transport(format!("LDAP {} failed: {}", what, e))
}

/// The directory operations used by the object back-end.
#[async_trait::async_trait]
pub trait DirectoryOps: Send + Sync {
    async fn search(&self, base: &str, scope: Scope, filter: &str, attrs: &[&str]) -> AdResult<Vec<SearchEntry>>;

    async fn add(&self, dn: &str, attrs: Attrs) -> AdResult<()>;

    async fn modify(&self, dn: &str, mods: Vec<Mod<Vec<u8>>>) -> AdResult<()>;

    /// Rename and/or move `dn` (modify DN).
    async fn rename(&self, dn: &str, new_rdn: &str, new_parent: Option<&str>) -> AdResult<()>;

    async fn delete(&self, dn: &str) -> AdResult<()>;

    /// Exactly one entry; none is `NotFound` and several is an invariant
    /// violation.
    async fn search_one(&self, base: &str, scope: Scope, filter: &str, attrs: &[&str]) -> AdResult<SearchEntry> {
        let mut entries = self.search(base, scope, filter, attrs).await?;
        match entries.len() {
            0 => Err(AdError::not_found(format!("There is no such object: {} under {}", filter, base))),
            1 => Ok(entries.remove(0)),
            n => Err(AdError::invariant(format!(
                "{} entries match {} under {}, expected one",
                n, filter, base
            ))),
        }
    }

    /// `defaultNamingContext` of the rootDSE.
    async fn default_naming_context(&self) -> AdResult<String> {
        let entry = self
            .search_one("", Scope::Base, "(objectClass=*)", &["defaultNamingContext"])
            .await?;
        first_value(&entry, "defaultNamingContext")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AdError::invariant("rootDSE has no defaultNamingContext"))
    }
}

#[async_trait::async_trait]
impl<D: DirectoryOps + ?Sized> DirectoryOps for Box<D> {
    async fn search(&self, base: &str, scope: Scope, filter: &str, attrs: &[&str]) -> AdResult<Vec<SearchEntry>> {
        (**self).search(base, scope, filter, attrs).await
    }

    async fn add(&self, dn: &str, attrs: Attrs) -> AdResult<()> {
        (**self).add(dn, attrs).await
    }

    async fn modify(&self, dn: &str, mods: Vec<Mod<Vec<u8>>>) -> AdResult<()> {
        (**self).modify(dn, mods).await
    }

    async fn rename(&self, dn: &str, new_rdn: &str, new_parent: Option<&str>) -> AdResult<()> {
        (**self).rename(dn, new_rdn, new_parent).await
    }

    async fn delete(&self, dn: &str) -> AdResult<()> {
        (**self).delete(dn).await
    }
}

/// First string value of `attr`, matched case-insensitively.
pub fn first_value(entry: &SearchEntry, attr: &str) -> Option<String> {
    entry
        .attrs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(attr))
        .and_then(|(_, v)| v.first().cloned())
}

/// First value of `attr` as raw bytes, whether ldap3 filed it as text or
/// as binary.
pub fn first_bytes(entry: &SearchEntry, attr: &str) -> Option<Vec<u8>> {
    entry
        .bin_attrs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(attr))
        .and_then(|(_, v)| v.first().cloned())
        .or_else(|| first_value(entry, attr).map(String::into_bytes))
}

/// A bound LDAP connection.
#[derive(Clone)]
pub struct LdapClient {
    ldap: Ldap,
    url: String,
}

impl LdapClient {
    /// Connect to the configured host and bind with the provider
    /// credentials.
    pub async fn connect(settings: &Settings) -> AdResult<Self> {
        let url = settings.ldap_url();
        let tls = settings.ldap_scheme == LdapScheme::Ldaps;
        debug!("Connecting to {} (tls: {}, insecure: {})", url, tls, settings.ldap_insecure);

        let conn_settings = LdapConnSettings::new()
            .set_conn_timeout(CONNECT_TIMEOUT)
            .set_no_tls_verify(settings.ldap_insecure);
        let (conn, mut ldap) = LdapConnAsync::with_settings(conn_settings, &url)
            .await
            .map_err(|e| ldap_error(&format!("connection to {}", url), e))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!("LDAP connection driver error: {}", e);
            }
        });

        let bind_name = match settings.realm() {
            Some(realm) if !realm.is_empty() => qualify_username(&settings.username, realm),
            _ => settings.username.clone(),
        };
        let res = ldap
            .simple_bind(&bind_name, &settings.password)
            .await
            .map_err(|e| ldap_error("bind", e))?;
        check(res, &bind_name)?;

        info!("LDAP bind to {} as {} succeeded", url, bind_name);
        Ok(Self { ldap, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn unbind(&self) -> AdResult<()> {
        let mut ldap = self.ldap.clone();
        ldap.unbind().await.map_err(|e| ldap_error("unbind", e))
    }
}

#[async_trait::async_trait]
impl DirectoryOps for LdapClient {
    async fn search(&self, base: &str, scope: Scope, filter: &str, attrs: &[&str]) -> AdResult<Vec<SearchEntry>> {
        debug!("LDAP search base={:?} filter={}", base, filter);
        let mut ldap = self.ldap.clone();
        let SearchResult(entries, res) = ldap
            .search(base, scope, filter, attrs.to_vec())
            .await
            .map_err(|e| ldap_error("search", e))?;
        check(res, base)?;
        Ok(entries
            .into_iter()
            .filter(|e| !e.is_ref())
            .map(SearchEntry::construct)
            .collect())
    }

    async fn add(&self, dn: &str, attrs: Attrs) -> AdResult<()> {
        debug!("LDAP add {}", dn);
        let mut ldap = self.ldap.clone();
        let attrs: Vec<(Vec<u8>, HashSet<Vec<u8>>)> = attrs
            .into_iter()
            .map(|(k, v)| (k.into_bytes(), v.into_iter().collect()))
            .collect();
        let res = ldap.add(dn, attrs).await.map_err(|e| ldap_error("add", e))?;
        check(res, dn)
    }

    async fn modify(&self, dn: &str, mods: Vec<Mod<Vec<u8>>>) -> AdResult<()> {
        if mods.is_empty() {
            return Ok(());
        }
        debug!("LDAP modify {} ({} changes)", dn, mods.len());
        let mut ldap = self.ldap.clone();
        let res = ldap.modify(dn, mods).await.map_err(|e| ldap_error("modify", e))?;
        check(res, dn)
    }

    async fn rename(&self, dn: &str, new_rdn: &str, new_parent: Option<&str>) -> AdResult<()> {
        debug!("LDAP modify DN {} -> {} under {:?}", dn, new_rdn, new_parent);
        let mut ldap = self.ldap.clone();
        let res = ldap
            .modifydn(dn, new_rdn, true, new_parent)
            .await
            .map_err(|e| ldap_error("modify DN", e))?;
        check(res, dn)
    }

    async fn delete(&self, dn: &str) -> AdResult<()> {
        debug!("LDAP delete {}", dn);
        let mut ldap = self.ldap.clone();
        let res = ldap.delete(dn).await.map_err(|e| ldap_error("delete", e))?;
        check(res, dn)
    }
}
