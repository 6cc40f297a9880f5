//! # AD Provider – LDAP Back-end
//!
//! Bind, search, add, modify and delete against a domain controller, the
//! encodings AD wants on the wire (`unicodePwd`, `objectGUID`, escaped DNs
//! and filters) and a user/group back-end built on them.

pub mod client;
pub mod directory;
pub mod encoding;

pub use client::{DirectoryOps, LdapClient};
pub use directory::LdapDirectory;
