//! # adp
//!
//! Declarative Active Directory management. The host hands over its
//! provider options once ([`Provider::configure`]) and then drives resources
//! through the [`Resource`] lifecycle:
//!
//! * users, groups, group memberships, OUs, computers, gMSAs, GPOs and GPO
//!   links through [`ObjectResource`];
//! * GPO security templates through [`GpoSecurityResource`].
//!
//! The heavy lifting lives in the member crates: `adp-winrm` (transport,
//! session pool, PowerShell runner), `adp-objects` (per-variant command and
//! JSON codecs), `adp-gpo` (INF codec, SYSVOL storage) and `adp-ldap` (the
//! LDAP back-end for users and groups).

pub mod config;
pub mod logging;
pub mod provider;
pub mod resources;

pub use adp_core::{AdError, AdErrorKind, AdResult, Settings};
pub use adp_objects::{AdObject, ObjectKind};
pub use config::{OptionMap, ProviderConfig};
pub use provider::Provider;
pub use resources::{GpoSecurityResource, GpoSecurityState, ObjectResource, Resource};

use std::sync::Arc;

/// Every object kind the provider manages, in registration order.
pub const OBJECT_KINDS: &[ObjectKind] = &[
    ObjectKind::User,
    ObjectKind::Group,
    ObjectKind::GroupMembership,
    ObjectKind::GroupMember,
    ObjectKind::OrgUnit,
    ObjectKind::Computer,
    ObjectKind::Gmsa,
    ObjectKind::Gpo,
    ObjectKind::GpLink,
];

/// One adapter per object kind, all sharing `provider`.
pub fn object_resources(provider: &Arc<Provider>) -> Vec<ObjectResource> {
    OBJECT_KINDS
        .iter()
        .map(|kind| ObjectResource::new(provider.clone(), *kind))
        .collect()
}
