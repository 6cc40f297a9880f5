//! The tagged object variant and its four codec operations.

use crate::computer::Computer;
use crate::gmsa::Gmsa;
use crate::gplink::GpLink;
use crate::gpo::Gpo;
use crate::group::Group;
use crate::membership::{build_read_members, parse_members, GroupMember, GroupMembership, Member};
use crate::ou::OrgUnit;
use crate::user::User;
use adp_core::{AdError, AdResult};
use adp_winrm::{CommandOptions, PsCommand};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    User,
    Group,
    GroupMembership,
    GroupMember,
    OrgUnit,
    Computer,
    Gmsa,
    Gpo,
    GpLink,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::GroupMembership => "group_membership",
            Self::GroupMember => "group_member",
            Self::OrgUnit => "ou",
            Self::Computer => "computer",
            Self::Gmsa => "gmsa",
            Self::Gpo => "gpo",
            Self::GpLink => "gplink",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdObject {
    User(User),
    Group(Group),
    GroupMembership(GroupMembership),
    GroupMember(GroupMember),
    #[serde(rename = "ou")]
    OrgUnit(OrgUnit),
    Computer(Computer),
    Gmsa(Gmsa),
    Gpo(Gpo),
    #[serde(rename = "gplink")]
    GpLink(GpLink),
}

fn kind_mismatch(expected: ObjectKind, got: ObjectKind) -> AdError {
    AdError::validation(format!("expected a {} object, got a {}", expected, got))
}

fn as_members(ids: &std::collections::BTreeSet<String>) -> Vec<Member> {
    ids.iter()
        .map(|id| Member {
            id: id.to_ascii_lowercase(),
            ..Default::default()
        })
        .collect()
}

impl AdObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::User(_) => ObjectKind::User,
            Self::Group(_) => ObjectKind::Group,
            Self::GroupMembership(_) => ObjectKind::GroupMembership,
            Self::GroupMember(_) => ObjectKind::GroupMember,
            Self::OrgUnit(_) => ObjectKind::OrgUnit,
            Self::Computer(_) => ObjectKind::Computer,
            Self::Gmsa(_) => ObjectKind::Gmsa,
            Self::Gpo(_) => ObjectKind::Gpo,
            Self::GpLink(_) => ObjectKind::GpLink,
        }
    }

    /// Identifier surfaced to the host.
    pub fn id(&self) -> &str {
        match self {
            Self::User(o) => &o.id,
            Self::Group(o) => &o.id,
            Self::GroupMembership(o) => &o.id,
            Self::GroupMember(o) => &o.id,
            Self::OrgUnit(o) => &o.id,
            Self::Computer(o) => &o.id,
            Self::Gmsa(o) => &o.id,
            Self::Gpo(o) => &o.id,
            Self::GpLink(o) => &o.id,
        }
    }

    /// Commands creating the object; the last one's JSON output (if any)
    /// describes the new object.
    pub fn build_create(&self, options: &CommandOptions) -> AdResult<Vec<PsCommand>> {
        Ok(match self {
            Self::User(o) => vec![o.build_create(options)?],
            Self::Group(o) => vec![o.build_create(options)?],
            Self::GroupMembership(o) => o.build_create(options)?,
            Self::GroupMember(o) => vec![o.build_create(options)?],
            Self::OrgUnit(o) => vec![o.build_create(options)?],
            Self::Computer(o) => vec![o.build_create(options)?],
            Self::Gmsa(o) => vec![o.build_create(options)?],
            Self::Gpo(o) => vec![o.build_create(options)?],
            Self::GpLink(o) => vec![o.build_create(options)?],
        })
    }

    /// Commands turning `prior` (the last observed state) into `self`.
    pub fn build_update(&self, prior: &AdObject, options: &CommandOptions) -> AdResult<Vec<PsCommand>> {
        match (self, prior) {
            (Self::User(n), Self::User(o)) => n.build_update(o, options),
            (Self::Group(n), Self::Group(o)) => n.build_update(o, options),
            (Self::GroupMembership(n), Self::GroupMembership(o)) => {
                n.build_update(&as_members(&o.members), options)
            }
            (Self::GroupMember(n), Self::GroupMember(o)) => {
                if n == o {
                    Ok(Vec::new())
                } else {
                    Err(AdError::validation("a group member pair cannot be changed in place"))
                }
            }
            (Self::OrgUnit(n), Self::OrgUnit(o)) => n.build_update(o, options),
            (Self::Computer(n), Self::Computer(o)) => n.build_update(o, options),
            (Self::Gmsa(n), Self::Gmsa(o)) => n.build_update(o, options),
            (Self::Gpo(n), Self::Gpo(o)) => n.build_update(o, options),
            (Self::GpLink(n), Self::GpLink(o)) => Ok(n.build_update(o, options)?.into_iter().collect()),
            (n, o) => Err(kind_mismatch(n.kind(), o.kind())),
        }
    }

    /// Commands removing the object described by `self` (as last observed).
    pub fn build_delete(&self, options: &CommandOptions) -> AdResult<Vec<PsCommand>> {
        Ok(match self {
            Self::User(o) => vec![User::build_delete(&o.id, options)?],
            Self::Group(o) => vec![Group::build_delete(&o.id, options)?],
            Self::GroupMembership(o) => {
                GroupMembership::build_delete(&o.group_id, &as_members(&o.members), options)?
            }
            Self::GroupMember(o) => vec![o.build_delete(options)?],
            Self::OrgUnit(o) => OrgUnit::build_delete(&o.id, options)?,
            Self::Computer(o) => vec![Computer::build_delete(&o.id, options)?],
            Self::Gmsa(o) => vec![Gmsa::build_delete(&o.id, options)?],
            Self::Gpo(o) => vec![Gpo::build_delete(&o.id, &o.domain, options)?],
            Self::GpLink(o) => vec![o.build_delete(options)?],
        })
    }

    /// The read command for the object `self` identifies.
    pub fn build_read(&self, options: &CommandOptions) -> AdResult<PsCommand> {
        match self {
            Self::User(o) => User::build_read(&o.id, options),
            Self::Group(o) => Group::build_read(&o.id, options),
            Self::GroupMembership(o) => build_read_members(&o.group_id, options),
            Self::GroupMember(o) => build_read_members(&o.group_id, options),
            Self::OrgUnit(o) => OrgUnit::build_read(&o.id, options),
            Self::Computer(o) => Computer::build_read(&o.id, options),
            Self::Gmsa(o) => Gmsa::build_read(&o.id, options),
            Self::Gpo(o) => Gpo::build_read(&o.id, &o.domain, options),
            Self::GpLink(o) => Ok(GpLink::build_read(&o.target_dn, options)),
        }
    }

    /// Parse the output of [`build_read`](Self::build_read). `None` means the
    /// read succeeded but the object is not there (an unlinked GPO, a member
    /// no longer in its group).
    pub fn parse_read(&self, json: &str) -> AdResult<Option<AdObject>> {
        Ok(Some(match self {
            Self::User(desired) => Self::User(User::parse(json)?.with_write_only(desired)),
            Self::Group(_) => Self::Group(Group::parse(json)?),
            Self::GroupMembership(o) => {
                let members = parse_members(json)?;
                Self::GroupMembership(GroupMembership::from_observed(&o.id, &o.group_id, &members))
            }
            Self::GroupMember(o) => {
                if !o.is_present(&parse_members(json)?) {
                    return Ok(None);
                }
                Self::GroupMember(o.clone())
            }
            Self::OrgUnit(_) => Self::OrgUnit(OrgUnit::parse(json)?),
            Self::Computer(_) => Self::Computer(Computer::parse(json)?),
            Self::Gmsa(_) => Self::Gmsa(Gmsa::parse(json)?),
            Self::Gpo(_) => Self::Gpo(Gpo::parse(json)?),
            Self::GpLink(o) => match GpLink::parse_read(json, &o.gpo_id, &o.target_dn)? {
                Some(link) => Self::GpLink(link),
                None => return Ok(None),
            },
        }))
    }

    /// Parse the JSON printed by the last create command, when the variant
    /// prints one.
    pub fn parse_created(kind: ObjectKind, json: &str) -> AdResult<Option<AdObject>> {
        Ok(Some(match kind {
            ObjectKind::User => Self::User(User::parse(json)?),
            ObjectKind::Group => Self::Group(Group::parse(json)?),
            ObjectKind::OrgUnit => Self::OrgUnit(OrgUnit::parse(json)?),
            ObjectKind::Computer => Self::Computer(Computer::parse(json)?),
            ObjectKind::Gmsa => Self::Gmsa(Gmsa::parse(json)?),
            ObjectKind::Gpo => Self::Gpo(Gpo::parse(json)?),
            ObjectKind::GpLink => Self::GpLink(GpLink::parse_created(json)?),
            ObjectKind::GroupMembership | ObjectKind::GroupMember => return Ok(None),
        }))
    }

    /// Copy the id assigned at creation into the desired state.
    pub fn with_id(mut self, id: &str) -> AdObject {
        let id = id.to_string();
        match &mut self {
            Self::User(o) => o.id = id,
            Self::Group(o) => o.id = id,
            Self::GroupMembership(o) => o.id = id,
            Self::GroupMember(o) => o.id = id,
            Self::OrgUnit(o) => o.id = id,
            Self::Computer(o) => o.id = id,
            Self::Gmsa(o) => o.id = id,
            Self::Gpo(o) => o.id = id,
            Self::GpLink(o) => o.id = id,
        }
        self
    }
}
