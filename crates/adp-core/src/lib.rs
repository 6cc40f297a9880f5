//! # AD Provider – Core
//!
//! Shared types used by every layer of the provider: the structured error,
//! the immutable connection settings, directory attribute bitfields and the
//! composite identifiers surfaced to the host.

pub mod error;
pub mod flags;
pub mod ids;
pub mod settings;

pub use error::{absent_on_not_found, AdError, AdErrorKind, AdResult};
pub use settings::{AuthMode, Backend, KerberosSettings, LdapScheme, Scheme, Settings};
