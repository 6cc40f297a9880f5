//! Group membership, as a whole set (`GroupMembership`) or as a single
//! group/member pair (`GroupMember`).

use crate::json::{de_string, from_ps_array, require_guid};
use crate::params::Params;
use adp_core::ids::{new_membership_id, pair_id, parse_guid_pair, split_composite, validate_guid};
use adp_core::AdResult;
use adp_winrm::{ps_array, CommandOptions, PsCommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One entry of `Get-ADGroupMember`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub name: String,
    pub dn: String,
    pub object_class: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMember {
    #[serde(rename = "ObjectGUID", deserialize_with = "de_string")]
    object_guid: String,
    #[serde(rename = "Name", deserialize_with = "de_string")]
    name: String,
    #[serde(rename = "DistinguishedName", deserialize_with = "de_string")]
    distinguished_name: String,
    #[serde(rename = "objectClass", deserialize_with = "de_string")]
    object_class: String,
}

/// Parse `Get-ADGroupMember` output (any of: nothing, one object, a list).
pub fn parse_members(json: &str) -> AdResult<Vec<Member>> {
    from_ps_array::<RawMember>(json)?
        .into_iter()
        .map(|raw| {
            Ok(Member {
                id: require_guid(&raw.object_guid, "group member")?.to_ascii_lowercase(),
                name: raw.name,
                dn: raw.distinguished_name,
                object_class: raw.object_class,
            })
        })
        .collect()
}

/// `Get-ADGroupMember -Identity "<group>"`, always a JSON array.
pub fn build_read_members(group_id: &str, options: &CommandOptions) -> AdResult<PsCommand> {
    Ok(Params::for_identity("Get-ADGroupMember", group_id)?
        .into_command(&options.clone().json().array()))
}

fn build_add(group_id: &str, members: &BTreeSet<String>, options: &CommandOptions) -> AdResult<PsCommand> {
    Ok(Params::for_identity("Add-ADGroupMember", group_id)?
        .raw(format!("-Members {}", ps_array(members)))
        .into_command(options))
}

fn build_remove(group_id: &str, members: &BTreeSet<String>, options: &CommandOptions) -> AdResult<PsCommand> {
    Ok(Params::for_identity("Remove-ADGroupMember", group_id)?
        .raw(format!("-Members {}", ps_array(members)))
        .raw("-Confirm:$false")
        .into_command(options))
}

/// Canonical member set: validated, brace-free, lower-case GUIDs.
pub fn normalize_members<I, S>(members: I) -> AdResult<BTreeSet<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    members
        .into_iter()
        .map(|m| validate_guid(m.as_ref()).map(|g| g.to_ascii_lowercase()))
        .collect()
}

/// `(to_add, to_remove)` by GUID equality.
pub fn diff(
    desired: &BTreeSet<String>,
    observed: &BTreeSet<String>,
) -> (BTreeSet<String>, BTreeSet<String>) {
    (
        desired.difference(observed).cloned().collect(),
        observed.difference(desired).cloned().collect(),
    )
}

// ─── Whole-set membership ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    /// `<groupID>_<uuid>`
    #[serde(default)]
    pub id: String,
    pub group_id: String,
    pub members: BTreeSet<String>,
}

impl GroupMembership {
    /// Fresh membership resource with a new composite id.
    pub fn new(group_id: &str, members: BTreeSet<String>) -> AdResult<Self> {
        let group_id = validate_guid(group_id)?;
        Ok(Self {
            id: new_membership_id(&group_id),
            group_id,
            members,
        })
    }

    /// Group GUID from a `<groupID>_<uuid>` id.
    pub fn group_from_id(id: &str) -> AdResult<String> {
        let (group, _) = split_composite(id)?;
        validate_guid(group)
    }

    /// `Add-ADGroupMember` with every desired member; nothing for an empty set.
    pub fn build_create(&self, options: &CommandOptions) -> AdResult<Vec<PsCommand>> {
        let desired = normalize_members(&self.members)?;
        if desired.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![build_add(&self.group_id, &desired, options)?])
    }

    /// One add then one remove, each only when non-empty.
    pub fn build_update(&self, observed: &[Member], options: &CommandOptions) -> AdResult<Vec<PsCommand>> {
        let desired = normalize_members(&self.members)?;
        let current: BTreeSet<String> = observed.iter().map(|m| m.id.to_ascii_lowercase()).collect();
        let (to_add, to_remove) = diff(&desired, &current);

        let mut cmds = Vec::new();
        if !to_add.is_empty() {
            cmds.push(build_add(&self.group_id, &to_add, options)?);
        }
        if !to_remove.is_empty() {
            cmds.push(build_remove(&self.group_id, &to_remove, options)?);
        }
        Ok(cmds)
    }

    /// Removal of everything currently in the group.
    pub fn build_delete(group_id: &str, observed: &[Member], options: &CommandOptions) -> AdResult<Vec<PsCommand>> {
        let all: BTreeSet<String> = observed.iter().map(|m| m.id.clone()).collect();
        if all.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![build_remove(group_id, &all, options)?])
    }

    pub fn from_observed(id: &str, group_id: &str, observed: &[Member]) -> Self {
        Self {
            id: id.to_string(),
            group_id: group_id.to_string(),
            members: observed.iter().map(|m| m.id.clone()).collect(),
        }
    }
}

// ─── Single member ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    /// `<groupID>_<memberID>`
    #[serde(default)]
    pub id: String,
    pub group_id: String,
    pub member_id: String,
}

impl GroupMember {
    pub fn new(group_id: &str, member_id: &str) -> AdResult<Self> {
        let group_id = validate_guid(group_id)?;
        let member_id = validate_guid(member_id)?;
        Ok(Self {
            id: pair_id(&group_id, &member_id),
            group_id,
            member_id,
        })
    }

    pub fn from_id(id: &str) -> AdResult<Self> {
        let (group_id, member_id) = parse_guid_pair(id)?;
        Self::new(&group_id, &member_id)
    }

    pub fn build_create(&self, options: &CommandOptions) -> AdResult<PsCommand> {
        build_add(&self.group_id, &normalize_members([&self.member_id])?, options)
    }

    pub fn build_delete(&self, options: &CommandOptions) -> AdResult<PsCommand> {
        build_remove(&self.group_id, &normalize_members([&self.member_id])?, options)
    }

    /// Whether the pair is present in `Get-ADGroupMember` output.
    pub fn is_present(&self, observed: &[Member]) -> bool {
        observed.iter().any(|m| m.id.eq_ignore_ascii_case(&self.member_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP: &str = "5f1c3b8e-2d4a-4c6e-9b1f-0a2b3c4d5e6f";
    const A: &str = "0e7d6c5b-4a39-4281-8f7e-6d5c4b3a2918";
    const B: &str = "a1b2c3d4-e5f6-4711-8899-aabbccddeeff";
    const C: &str = "11111111-2222-4333-8444-555555555555";

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn member(id: &str) -> Member {
        Member {
            id: id.into(),
            ..Default::default()
        }
    }

    #[test]
    fn diff_identities() {
        let d = set(&[A, B]);
        let empty = BTreeSet::new();
        assert_eq!(diff(&d, &d), (empty.clone(), empty.clone()));
        assert_eq!(diff(&d, &empty), (d.clone(), empty.clone()));
        assert_eq!(diff(&empty, &d), (empty.clone(), d.clone()));
        assert_eq!(diff(&set(&[A, B]), &set(&[B, C])), (set(&[A]), set(&[C])));
    }

    #[test]
    fn update_adds_then_removes() {
        let m = GroupMembership {
            id: new_membership_id(GROUP),
            group_id: GROUP.into(),
            members: set(&[A, &B.to_uppercase()]),
        };
        let cmds = m
            .build_update(&[member(B), member(C)], &CommandOptions::default())
            .unwrap();
        assert_eq!(cmds.len(), 2);
        assert_eq!(
            cmds[0].render().script,
            format!("Add-ADGroupMember -Identity \"{}\" -Members @(\"{}\")", GROUP, A)
        );
        assert_eq!(
            cmds[1].render().script,
            format!("Remove-ADGroupMember -Identity \"{}\" -Members @(\"{}\") -Confirm:$false", GROUP, C)
        );
    }

    #[test]
    fn update_in_sync_is_empty() {
        let m = GroupMembership::new(GROUP, set(&[A])).unwrap();
        assert!(m.build_update(&[member(A)], &CommandOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn invalid_member_never_reaches_the_wire() {
        let m = GroupMembership::new(GROUP, set(&["CN=bob,DC=x"])).unwrap();
        assert!(m.build_create(&CommandOptions::default()).is_err());
    }

    #[test]
    fn delete_removes_everything_observed() {
        let cmds = GroupMembership::build_delete(GROUP, &[member(A), member(B)], &CommandOptions::default()).unwrap();
        assert_eq!(cmds.len(), 1);
        assert!(cmds[0].render().script.contains(&format!("@(\"{}\",\"{}\")", A, B)));
        assert!(GroupMembership::build_delete(GROUP, &[], &CommandOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn membership_id_carries_group() {
        let m = GroupMembership::new(GROUP, BTreeSet::new()).unwrap();
        assert_eq!(GroupMembership::group_from_id(&m.id).unwrap(), GROUP);
        assert!(GroupMembership::group_from_id("nope").is_err());
    }

    #[test]
    fn parse_member_list() {
        let json = format!(
            r#"{{"ObjectGUID":"{}","Name":"bob","DistinguishedName":"CN=bob,DC=x","objectClass":"user"}}"#,
            A.to_uppercase()
        );
        let members = parse_members(&json).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, A);
        assert_eq!(members[0].object_class, "user");
        assert!(parse_members("").unwrap().is_empty());
        assert!(parse_members(r#"[{"Name":"x"}]"#).is_err());
    }

    #[test]
    fn member_pair() {
        let pair = GroupMember::from_id(&format!("{}_{}", GROUP, A)).unwrap();
        assert_eq!(pair.member_id, A);
        assert!(pair.is_present(&[member(&A.to_uppercase())]));
        assert!(!pair.is_present(&[member(B)]));
        assert!(GroupMember::from_id(&format!("{}/{}", GROUP, A)).is_err());
        assert!(pair
            .build_delete(&CommandOptions::default())
            .unwrap()
            .render()
            .script
            .starts_with("Remove-ADGroupMember"));
    }

    #[test]
    fn read_members_is_forced_to_an_array() {
        let cmd = build_read_members(GROUP, &CommandOptions::default()).unwrap();
        assert!(cmd.options().force_array);
        assert!(cmd.render().script.ends_with("| ConvertTo-Json"));
    }
}
