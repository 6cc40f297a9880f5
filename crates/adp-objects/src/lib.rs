//! # AD Provider – Object Codecs
//!
//! One codec per Active Directory object variant. Each maps the typed
//! object to PowerShell parameter fragments (create, update, delete, read)
//! and maps the cmdlet's `ConvertTo-Json` output back to the typed object.
//! [`AdObject`] ties the variants together as one tagged value.

pub mod computer;
pub mod gmsa;
pub mod gplink;
pub mod gpo;
pub mod group;
pub mod json;
pub mod membership;
pub mod object;
pub mod ou;
pub mod params;
pub mod user;

pub use computer::Computer;
pub use gmsa::Gmsa;
pub use gplink::GpLink;
pub use gpo::{Gpo, GpoStatus};
pub use group::Group;
pub use membership::{GroupMember, GroupMembership, Member};
pub use object::{AdObject, ObjectKind};
pub use ou::OrgUnit;
pub use user::User;
