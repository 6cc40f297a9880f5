//! Group policy objects (`GroupPolicy` module cmdlets).
//!
//! The GroupPolicy cmdlets take no `-Credential`, so these commands are
//! rendered in `Invoke-Command` mode when credentials are passed.

use crate::json::{de_string, from_ps, require_guid, value_to_string};
use crate::params::Params;
use adp_core::ids::validate_guid;
use adp_core::{AdError, AdResult};
use adp_winrm::{quote, CommandOptions, PsCommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GpoStatus {
    #[default]
    AllSettingsEnabled,
    UserSettingsDisabled,
    ComputerSettingsDisabled,
    AllSettingsDisabled,
}

impl GpoStatus {
    pub fn parse(s: &str) -> AdResult<Self> {
        match s.trim() {
            "AllSettingsEnabled" => Ok(Self::AllSettingsEnabled),
            "UserSettingsDisabled" => Ok(Self::UserSettingsDisabled),
            "ComputerSettingsDisabled" => Ok(Self::ComputerSettingsDisabled),
            "AllSettingsDisabled" => Ok(Self::AllSettingsDisabled),
            other => Err(AdError::validation(format!("unknown GPO status '{}'", other))),
        }
    }

    /// `Microsoft.GroupPolicy.GpoStatus` numeric values.
    pub fn from_value(n: i64) -> AdResult<Self> {
        match n {
            0 => Ok(Self::AllSettingsDisabled),
            1 => Ok(Self::UserSettingsDisabled),
            2 => Ok(Self::ComputerSettingsDisabled),
            3 => Ok(Self::AllSettingsEnabled),
            other => Err(AdError::parse(format!("unknown GpoStatus value {}", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllSettingsEnabled => "AllSettingsEnabled",
            Self::UserSettingsDisabled => "UserSettingsDisabled",
            Self::ComputerSettingsDisabled => "ComputerSettingsDisabled",
            Self::AllSettingsDisabled => "AllSettingsDisabled",
        }
    }
}

impl fmt::Display for GpoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Gpo {
    pub id: String,
    /// DN of the `groupPolicyContainer` object.
    pub dn: String,
    pub name: String,
    pub domain: String,
    pub description: String,
    pub status: GpoStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct RawGpo {
    #[serde(deserialize_with = "de_string")]
    id: String,
    #[serde(deserialize_with = "de_string")]
    display_name: String,
    #[serde(deserialize_with = "de_string")]
    domain_name: String,
    #[serde(deserialize_with = "de_string")]
    description: String,
    #[serde(deserialize_with = "de_string")]
    path: String,
    gpo_status: Value,
}

fn gpo_options(options: &CommandOptions) -> CommandOptions {
    options.clone().invoke()
}

impl Gpo {
    /// `\\<domain>\SYSVOL\<domain>\Policies\{<GUID>}`
    pub fn sysvol_path(&self) -> String {
        format!(
            "\\\\{0}\\SYSVOL\\{0}\\Policies\\{{{1}}}",
            self.domain,
            self.id.to_ascii_uppercase()
        )
    }

    fn with_domain(&self, p: Params) -> Params {
        p.opt("Domain", &self.domain)
    }

    /// `New-GPO`; a non-default status is assigned on the returned object.
    pub fn build_create(&self, options: &CommandOptions) -> AdResult<PsCommand> {
        let new = self
            .with_domain(Params::new("New-GPO").string("Name", &self.name))
            .opt("Comment", &self.description);
        let opts = gpo_options(options).json();
        if self.status == GpoStatus::AllSettingsEnabled {
            return Ok(new.into_command(&opts));
        }
        Ok(PsCommand::new(opts)
            .arg("$gpo =")
            .args(new.fragments().iter().cloned())
            .arg(format!("; $gpo.GpoStatus = {}; $gpo", quote(self.status.as_str()))))
    }

    pub fn build_update(&self, prior: &Gpo, options: &CommandOptions) -> AdResult<Vec<PsCommand>> {
        let id = validate_guid(&prior.id)?;
        let opts = gpo_options(options);
        let mut cmds = Vec::new();

        if prior.name != self.name && !self.name.is_empty() {
            cmds.push(
                self.with_domain(Params::new("Rename-GPO").string("Guid", &id))
                    .string("TargetName", &self.name)
                    .into_command(&opts),
            );
        }

        let mut assignments = Vec::new();
        if prior.status != self.status {
            assignments.push(format!("$gpo.GpoStatus = {};", quote(self.status.as_str())));
        }
        if prior.description != self.description {
            assignments.push(format!("$gpo.Description = {};", quote(&self.description)));
        }
        if !assignments.is_empty() {
            let get = self.with_domain(Params::new("Get-GPO").string("Guid", &id));
            cmds.push(
                PsCommand::new(opts)
                    .arg("$gpo =")
                    .args(get.fragments().iter().cloned())
                    .arg(";")
                    .args(assignments),
            );
        }
        Ok(cmds)
    }

    pub fn build_delete(id: &str, domain: &str, options: &CommandOptions) -> AdResult<PsCommand> {
        let id = validate_guid(id)?;
        Ok(Params::new("Remove-GPO")
            .string("Guid", &id)
            .opt("Domain", domain)
            .raw("-Confirm:$false")
            .into_command(&gpo_options(options)))
    }

    pub fn build_read(id: &str, domain: &str, options: &CommandOptions) -> AdResult<PsCommand> {
        let id = validate_guid(id)?;
        Ok(Params::new("Get-GPO")
            .string("Guid", &id)
            .opt("Domain", domain)
            .into_command(&gpo_options(options).json()))
    }

    pub fn parse(json: &str) -> AdResult<Gpo> {
        let raw: RawGpo = from_ps(json)?;
        let status = match &raw.gpo_status {
            Value::Null => GpoStatus::AllSettingsEnabled,
            Value::Number(n) => GpoStatus::from_value(n.as_i64().unwrap_or(-1))?,
            other => GpoStatus::parse(&value_to_string(other))?,
        };
        Ok(Gpo {
            id: require_guid(&raw.id, "GPO")?.to_ascii_lowercase(),
            dn: raw.path,
            name: raw.display_name,
            domain: raw.domain_name,
            description: raw.description,
            status,
        })
    }
}
