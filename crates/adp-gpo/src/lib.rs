//! # AD Provider – GPO Security Settings
//!
//! Codec for the security template (`GptTmpl.inf`) and for `GPT.INI`, plus
//! the SYSVOL round trip that stores a template and publishes a new GPO
//! version.

pub mod gptini;
pub mod inf;
pub mod security;

pub use gptini::GptIni;
pub use inf::{
    AccountLockout, AclRecord, EventAudit, KerberosPolicy, LogSettings, PasswordPolicies, RegistryValue,
    RestrictedGroup, SecuritySettings,
};
pub use security::GpoSecurity;
