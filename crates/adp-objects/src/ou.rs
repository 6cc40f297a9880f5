//! Organizational units.

use crate::json::{de_bool, de_string, from_ps, require_guid};
use crate::params::{move_object, rename_object, Params};
use adp_core::ids::{container_from_dn, validate_guid};
use adp_core::AdResult;
use adp_winrm::{CommandOptions, PsCommand};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrgUnit {
    pub id: String,
    pub dn: String,
    pub name: String,
    /// Parent container (`path` of the OU).
    pub container: String,
    pub description: String,
    pub protected: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct RawOrgUnit {
    #[serde(rename = "ObjectGUID", deserialize_with = "de_string")]
    object_guid: String,
    #[serde(deserialize_with = "de_string")]
    distinguished_name: String,
    #[serde(deserialize_with = "de_string")]
    name: String,
    #[serde(deserialize_with = "de_string")]
    description: String,
    #[serde(deserialize_with = "de_bool")]
    protected_from_accidental_deletion: bool,
}

fn set_protection(id: &str, protected: bool, options: &CommandOptions) -> AdResult<PsCommand> {
    Ok(Params::for_identity("Set-ADOrganizationalUnit", id)?
        .flag("ProtectedFromAccidentalDeletion", protected)
        .into_command(options))
}

impl OrgUnit {
    pub fn build_create(&self, options: &CommandOptions) -> AdResult<PsCommand> {
        Ok(Params::new("New-ADOrganizationalUnit")
            .raw("-Passthru")
            .string("Name", &self.name)
            .flag("ProtectedFromAccidentalDeletion", self.protected)
            .opt("Path", &self.container)
            .opt("Description", &self.description)
            .into_command(&options.clone().json()))
    }

    /// A protected OU cannot be moved, so protection is lifted around a move
    /// and restored afterwards.
    pub fn build_update(&self, prior: &OrgUnit, options: &CommandOptions) -> AdResult<Vec<PsCommand>> {
        let id = validate_guid(&prior.id)?;
        let moving = !self.container.is_empty() && !prior.container.eq_ignore_ascii_case(&self.container);
        let mut cmds = Vec::new();

        let p = Params::for_identity("Set-ADOrganizationalUnit", &id)?
            .changed("Description", &prior.description, &self.description);
        if !p.is_bare() {
            cmds.push(p.into_command(options));
        }

        if prior.name != self.name && !self.name.is_empty() {
            cmds.push(rename_object(&id, &self.name, options)?);
        }

        if moving {
            if prior.protected {
                cmds.push(set_protection(&id, false, options)?);
            }
            cmds.push(move_object(&id, &self.container, options)?);
            if self.protected {
                cmds.push(set_protection(&id, true, options)?);
            }
        } else if prior.protected != self.protected {
            cmds.push(set_protection(&id, self.protected, options)?);
        }
        Ok(cmds)
    }

    /// Unprotect, then remove the OU and everything below it.
    pub fn build_delete(id: &str, options: &CommandOptions) -> AdResult<Vec<PsCommand>> {
        Ok(vec![
            set_protection(id, false, options)?,
            Params::for_identity("Remove-ADOrganizationalUnit", id)?
                .raw("-Recursive")
                .raw("-Confirm:$false")
                .into_command(options),
        ])
    }

    pub fn build_read(id: &str, options: &CommandOptions) -> AdResult<PsCommand> {
        Ok(Params::for_identity("Get-ADOrganizationalUnit", id)?
            .raw("-Properties *")
            .into_command(&options.clone().json()))
    }

    pub fn parse(json: &str) -> AdResult<OrgUnit> {
        let raw: RawOrgUnit = from_ps(json)?;
        Ok(OrgUnit {
            id: require_guid(&raw.object_guid, "organizational unit")?,
            container: container_from_dn(&raw.distinguished_name),
            dn: raw.distinguished_name,
            name: raw.name,
            description: raw.description,
            protected: raw.protected_from_accidental_deletion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: &str = "5f1c3b8e-2d4a-4c6e-9b1f-0a2b3c4d5e6f";

    fn ou() -> OrgUnit {
        OrgUnit {
            id: G.into(),
            name: "Sales".into(),
            container: "DC=x,DC=com".into(),
            protected: true,
            ..Default::default()
        }
    }

    #[test]
    fn create_always_emits_protection() {
        let mut o = ou();
        o.protected = false;
        assert_eq!(
            o.build_create(&CommandOptions::default()).unwrap().render().script,
            "New-ADOrganizationalUnit -Passthru -Name \"Sales\" -ProtectedFromAccidentalDeletion $false \
             -Path \"DC=x,DC=com\" | ConvertTo-Json"
        );
    }

    #[test]
    fn move_of_protected_ou_is_bracketed() {
        let prior = ou();
        let mut desired = ou();
        desired.container = "OU=Regions,DC=x,DC=com".into();
        let scripts: Vec<String> = desired
            .build_update(&prior, &CommandOptions::default())
            .unwrap()
            .iter()
            .map(|c| c.render().script)
            .collect();
        assert_eq!(scripts.len(), 3);
        assert!(scripts[0].ends_with("-ProtectedFromAccidentalDeletion $false"));
        assert!(scripts[1].starts_with("Move-ADObject"));
        assert!(scripts[2].ends_with("-ProtectedFromAccidentalDeletion $true"));
    }

    #[test]
    fn protection_toggle_without_move() {
        let prior = ou();
        let mut desired = ou();
        desired.protected = false;
        desired.description = "EMEA".into();
        let scripts: Vec<String> = desired
            .build_update(&prior, &CommandOptions::default())
            .unwrap()
            .iter()
            .map(|c| c.render().script)
            .collect();
        assert_eq!(scripts.len(), 2);
        assert!(scripts[0].ends_with("-Description \"EMEA\""));
        assert!(scripts[1].ends_with("-ProtectedFromAccidentalDeletion $false"));
    }

    #[test]
    fn delete_unprotects_first() {
        let cmds = OrgUnit::build_delete(G, &CommandOptions::default()).unwrap();
        assert!(cmds[0].render().script.contains("$false"));
        assert_eq!(
            cmds[1].render().script,
            format!("Remove-ADOrganizationalUnit -Identity \"{}\" -Recursive -Confirm:$false", G)
        );
    }

    #[test]
    fn parse_ou() {
        let json = format!(
            r#"{{"ObjectGUID":"{}","DistinguishedName":"OU=Sales,DC=x,DC=com","Name":"Sales",
                "Description":null,"ProtectedFromAccidentalDeletion":true}}"#,
            G
        );
        let o = OrgUnit::parse(&json).unwrap();
        assert_eq!(o.container, "DC=x,DC=com");
        assert!(o.protected);
        assert_eq!(o.description, "");
    }
}
