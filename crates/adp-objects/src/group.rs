//! Groups (`New-ADGroup` / `Set-ADGroup` / `Get-ADGroup`).

use crate::json::{de_opt_i64, de_string, from_ps, require_guid, value_to_string};
use crate::params::{relocate, Params};
use adp_core::flags::{decode_group_type, GroupCategory, GroupScope};
use adp_core::ids::{container_from_dn, validate_guid};
use adp_core::{AdError, AdResult};
use adp_winrm::{CommandOptions, PsCommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub dn: String,
    pub name: String,
    #[serde(default)]
    pub container: String,
    #[serde(default)]
    pub sam_account_name: String,
    pub scope: GroupScope,
    pub category: GroupCategory,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct RawGroup {
    #[serde(rename = "ObjectGUID", deserialize_with = "de_string")]
    object_guid: String,
    #[serde(deserialize_with = "de_string")]
    distinguished_name: String,
    #[serde(deserialize_with = "de_string")]
    name: String,
    #[serde(deserialize_with = "de_string")]
    sam_account_name: String,
    #[serde(deserialize_with = "de_string")]
    description: String,
    group_scope: Value,
    group_category: Value,
    #[serde(rename = "groupType", deserialize_with = "de_opt_i64")]
    group_type: Option<i64>,
}

/// `ADGroupScope` as an enum name or its numeric value.
fn scope_from_ps(v: &Value) -> AdResult<GroupScope> {
    match v.as_i64() {
        Some(0) => Ok(GroupScope::Local),
        Some(1) => Ok(GroupScope::Global),
        Some(2) => Ok(GroupScope::Universal),
        Some(n) => Err(AdError::parse(format!("unknown GroupScope value {}", n))),
        None => GroupScope::parse(&value_to_string(v)),
    }
}

/// `ADGroupCategory`: Distribution (0) reads back as `system`.
fn category_from_ps(v: &Value) -> AdResult<GroupCategory> {
    match v.as_i64() {
        Some(0) => Ok(GroupCategory::System),
        Some(1) => Ok(GroupCategory::Security),
        Some(n) => Err(AdError::parse(format!("unknown GroupCategory value {}", n))),
        None => match value_to_string(v).to_ascii_lowercase().as_str() {
            "distribution" => Ok(GroupCategory::System),
            other => GroupCategory::parse(other),
        },
    }
}

impl Group {
    pub fn build_create(&self, options: &CommandOptions) -> AdResult<PsCommand> {
        Ok(Params::new("New-ADGroup")
            .raw("-Passthru")
            .string("Name", &self.name)
            .raw(format!("-GroupScope {}", self.scope.ps_name()))
            .raw(format!("-GroupCategory {}", self.category.ps_name()))
            .opt("SamAccountName", &self.sam_account_name)
            .opt("Path", &self.container)
            .opt("Description", &self.description)
            .into_command(&options.clone().json()))
    }

    pub fn build_update(&self, prior: &Group, options: &CommandOptions) -> AdResult<Vec<PsCommand>> {
        let id = validate_guid(&prior.id)?;
        let mut cmds = Vec::new();

        let mut p = Params::for_identity("Set-ADGroup", &id)?
            .changed("SamAccountName", &prior.sam_account_name, &self.sam_account_name)
            .changed("Description", &prior.description, &self.description);
        if prior.scope != self.scope {
            p = p.raw(format!("-GroupScope {}", self.scope.ps_name()));
        }
        if prior.category.ps_name() != self.category.ps_name() {
            p = p.raw(format!("-GroupCategory {}", self.category.ps_name()));
        }
        if !p.is_bare() {
            cmds.push(p.into_command(options));
        }

        cmds.extend(relocate(
            &id,
            (&prior.name, &self.name),
            (&prior.container, &self.container),
            options,
        )?);
        Ok(cmds)
    }

    pub fn build_delete(id: &str, options: &CommandOptions) -> AdResult<PsCommand> {
        Ok(Params::for_identity("Remove-ADGroup", id)?
            .raw("-Confirm:$false")
            .into_command(options))
    }

    pub fn build_read(id: &str, options: &CommandOptions) -> AdResult<PsCommand> {
        Ok(Params::for_identity("Get-ADGroup", id)?
            .raw("-Properties *")
            .into_command(&options.clone().json()))
    }

    pub fn parse(json: &str) -> AdResult<Group> {
        let raw: RawGroup = from_ps(json)?;
        let id = require_guid(&raw.object_guid, "group")?;

        let (scope, category) = match raw.group_type {
            Some(bits) => decode_group_type(bits)?,
            None => (scope_from_ps(&raw.group_scope)?, category_from_ps(&raw.group_category)?),
        };

        Ok(Group {
            id,
            container: container_from_dn(&raw.distinguished_name),
            dn: raw.distinguished_name,
            name: raw.name,
            sam_account_name: raw.sam_account_name,
            scope,
            category,
            description: raw.description,
        })
    }
}
