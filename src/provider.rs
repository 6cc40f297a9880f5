//! The configured provider instance.
//!
//! Owns the settings, the session pool and (for the `ldap` backend) the
//! directory connection. The pool and the LDAP connection are created on
//! first use and live as long as the provider.

use crate::config::{OptionMap, ProviderConfig};
use adp_core::{AdError, AdResult, Backend, LdapScheme, Settings};
use adp_gpo::GpoSecurity;
use adp_ldap::{DirectoryOps, LdapClient, LdapDirectory};
use adp_winrm::{CommandOptions, PsRunner, SessionPool, ShellFactory, WinRmShellFactory};
use log::info;
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;

/// The LDAP back-end as the provider holds it.
pub type Directory = LdapDirectory<Box<dyn DirectoryOps>>;

pub struct Provider {
    settings: Arc<Settings>,
    factory: Arc<dyn ShellFactory>,
    pool: OnceLock<Arc<SessionPool>>,
    directory: OnceCell<Arc<Directory>>,
}

impl Provider {
    /// Parse the host's options and build a provider from them.
    pub fn configure(options: &OptionMap) -> AdResult<Self> {
        let settings = ProviderConfig::from_options(options)?.into_settings();
        info!(
            "Configured AD provider for {} ({:?} auth, {:?} backend)",
            if settings.host.is_empty() { "localhost" } else { settings.host.as_str() },
            settings.auth,
            settings.backend
        );
        Ok(Self::new(settings))
    }

    pub fn new(settings: Settings) -> Self {
        let settings = Arc::new(settings);
        let factory = Arc::new(WinRmShellFactory::new(settings.clone()));
        Self::with_shell_factory(settings, factory)
    }

    /// A provider whose sessions come from `factory` instead of WinRM.
    pub fn with_shell_factory(settings: Arc<Settings>, factory: Arc<dyn ShellFactory>) -> Self {
        Self {
            settings,
            factory,
            pool: OnceLock::new(),
            directory: OnceCell::new(),
        }
    }

    /// Use `ops` for the LDAP back-end instead of connecting to the host.
    pub fn with_directory_ops(self, ops: Box<dyn DirectoryOps>, domain_dn: &str) -> Self {
        let tls = self.settings.ldap_scheme == LdapScheme::Ldaps;
        let directory = Arc::new(LdapDirectory::new(ops, domain_dn, tls));
        Self {
            directory: OnceCell::new_with(Some(directory)),
            ..self
        }
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn backend(&self) -> Backend {
        self.settings.backend
    }

    pub fn command_options(&self) -> CommandOptions {
        CommandOptions::from_settings(&self.settings)
    }

    pub fn pool(&self) -> Arc<SessionPool> {
        self.pool
            .get_or_init(|| Arc::new(SessionPool::new(self.factory.clone())))
            .clone()
    }

    pub fn runner(&self) -> PsRunner {
        PsRunner::new(self.pool())
    }

    pub fn gpo_security(&self) -> GpoSecurity {
        GpoSecurity::new(self.runner(), self.command_options())
    }

    /// The LDAP back-end, connecting and binding on first use.
    pub async fn directory(&self) -> AdResult<Arc<Directory>> {
        self.directory
            .get_or_try_init(|| async {
                let client = LdapClient::connect(&self.settings).await?;
                let tls = self.settings.ldap_scheme == LdapScheme::Ldaps;
                let ops: Box<dyn DirectoryOps> = Box::new(client);
                let directory = LdapDirectory::discover(ops, self.settings.domain_dn.as_deref(), tls).await?;
                Ok::<_, AdError>(Arc::new(directory))
            })
            .await
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pool_is_created_once() {
        let provider = Provider::new(Settings::default());
        assert!(Arc::ptr_eq(&provider.pool(), &provider.pool()));
        assert_eq!(provider.pool().idle(), (0, 0));
    }

    #[test]
    fn command_options_follow_settings() {
        let provider = Provider::new(Settings {
            host: "dc1".into(),
            username: "admin".into(),
            password: "secret".into(),
            domain_controller: "dc2".into(),
            ..Default::default()
        });
        let opts = provider.command_options();
        assert_eq!(opts.server, "dc2");
        assert_eq!(opts.username, "admin");
        assert!(!opts.pass_credentials);
    }

    #[test]
    #[serial_test::serial]
    fn configure_rejects_invalid_options() {
        let options: OptionMap = serde_json::from_value(json!({ "winrm_proto": "ftp" })).unwrap();
        assert!(Provider::configure(&options).is_err());
    }
}
