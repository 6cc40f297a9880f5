//! Computer accounts.

use crate::json::{de_string, from_ps, require_guid};
use crate::params::{relocate, Params};
use adp_core::ids::{container_from_dn, validate_guid};
use adp_core::AdResult;
use adp_winrm::{CommandOptions, PsCommand};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Computer {
    pub id: String,
    pub dn: String,
    pub name: String,
    pub container: String,
    /// Pre-Windows 2000 name (`sAMAccountName` without the trailing `$`).
    pub pre2k_name: String,
    pub description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct RawComputer {
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
}

impl Computer {
    /// `sAMAccountName` form of the pre-2000 name.
    fn sam(&self) -> String {
        if self.pre2k_name.is_empty() || self.pre2k_name.ends_with('$') {
            self.pre2k_name.clone()
        } else {
            format!("{}$", self.pre2k_name)
        }
    }

    pub fn build_create(&self, options: &CommandOptions) -> AdResult<PsCommand> {
        Ok(Params::new("New-ADComputer")
            .raw("-Passthru")
            .string("Name", &self.name)
            .opt("SamAccountName", &self.sam())
            .opt("Path", &self.container)
            .opt("Description", &self.description)
            .into_command(&options.clone().json()))
    }

    pub fn build_update(&self, prior: &Computer, options: &CommandOptions) -> AdResult<Vec<PsCommand>> {
        let id = validate_guid(&prior.id)?;
        let mut cmds = Vec::new();
        let p = Params::for_identity("Set-ADComputer", &id)?
            .changed("SamAccountName", &prior.sam(), &self.sam())
            .changed("Description", &prior.description, &self.description);
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

    /// Computers may own child objects (BitLocker keys, service
    /// connection points), hence the recursive object removal.
    pub fn build_delete(id: &str, options: &CommandOptions) -> AdResult<PsCommand> {
        Ok(Params::for_identity("Remove-ADObject", id)?
            .raw("-Recursive")
            .raw("-Confirm:$false")
            .into_command(options))
    }

    pub fn build_read(id: &str, options: &CommandOptions) -> AdResult<PsCommand> {
        Ok(Params::for_identity("Get-ADComputer", id)?
            .raw("-Properties *")
            .into_command(&options.clone().json()))
    }

    pub fn parse(json: &str) -> AdResult<Computer> {
        let raw: RawComputer = from_ps(json)?;
        Ok(Computer {
            id: require_guid(&raw.object_guid, "computer")?,
            container: container_from_dn(&raw.distinguished_name),
            dn: raw.distinguished_name,
            name: raw.name,
            pre2k_name: raw.sam_account_name.trim_end_matches('$').to_string(),
            description: raw.description,
        })
    }
}
