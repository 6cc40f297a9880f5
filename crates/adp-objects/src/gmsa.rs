//! Group-managed service accounts.

use crate::json::{
    de_bool, de_opt_i64, de_string, de_string_list, from_ps, parse_ps_date, require_guid, value_to_string,
};
use crate::params::{relocate, Params};
use adp_core::flags::{decode_encryption_types, encryption_types_ps, EncryptionType, EncryptionTypes};
use adp_core::ids::{container_from_dn, validate_guid};
use adp_core::{AdError, AdResult};
use adp_winrm::{ps_array, CommandOptions, PsCommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Gmsa {
    pub id: String,
    pub dn: String,
    pub name: String,
    pub container: String,
    pub sam_account_name: String,
    pub dns_host_name: String,
    pub display_name: String,
    pub description: String,
    pub enabled: bool,
    /// RFC 3339; empty means "never".
    pub expiration: String,
    pub kerberos_encryption_type: EncryptionTypes,
    /// Only honoured at creation; 0 leaves the directory default.
    pub managed_password_interval_in_days: u32,
    pub service_principal_names: BTreeSet<String>,
    pub principals_allowed_to_retrieve_managed_password: BTreeSet<String>,
    pub principals_allowed_to_delegate_to_account: BTreeSet<String>,
    pub trusted_for_delegation: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct RawGmsa {
    #[serde(rename = "ObjectGUID", deserialize_with = "de_string")]
    object_guid: String,
    #[serde(deserialize_with = "de_string")]
    distinguished_name: String,
    #[serde(deserialize_with = "de_string")]
    name: String,
    #[serde(deserialize_with = "de_string")]
    sam_account_name: String,
    #[serde(rename = "DNSHostName", deserialize_with = "de_string")]
    dns_host_name: String,
    #[serde(deserialize_with = "de_string")]
    display_name: String,
    #[serde(deserialize_with = "de_string")]
    description: String,
    #[serde(deserialize_with = "de_bool")]
    enabled: bool,
    #[serde(deserialize_with = "de_string")]
    account_expiration_date: String,
    kerberos_encryption_type: Value,
    #[serde(rename = "msDS-SupportedEncryptionTypes", deserialize_with = "de_opt_i64")]
    supported_encryption_types: Option<i64>,
    #[serde(deserialize_with = "de_opt_i64")]
    managed_password_interval_in_days: Option<i64>,
    #[serde(deserialize_with = "de_string_list")]
    service_principal_names: Vec<String>,
    #[serde(deserialize_with = "de_string_list")]
    principals_allowed_to_retrieve_managed_password: Vec<String>,
    #[serde(deserialize_with = "de_string_list")]
    principals_allowed_to_delegate_to_account: Vec<String>,
    #[serde(deserialize_with = "de_bool")]
    trusted_for_delegation: bool,
}

/// `KerberosEncryptionType` comes back as the flag value, a comma list of
/// names or an array of either.
fn encryption_types_from_ps(v: &Value) -> AdResult<EncryptionTypes> {
    match v {
        Value::Null => Ok(EncryptionTypes::new()),
        Value::Number(n) => Ok(decode_encryption_types(n.as_u64().unwrap_or(0) as u32)),
        Value::Array(items) => {
            let mut set = EncryptionTypes::new();
            for item in items {
                set.extend(encryption_types_from_ps(item)?);
            }
            Ok(set)
        }
        other => value_to_string(other)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none"))
            .map(EncryptionType::parse)
            .collect(),
    }
}

impl Gmsa {
    pub fn build_create(&self, options: &CommandOptions) -> AdResult<PsCommand> {
        let mut p = Params::new("New-ADServiceAccount")
            .raw("-Passthru")
            .string("Name", &self.name)
            .string("DNSHostName", &self.dns_host_name)
            .flag("Enabled", self.enabled)
            .flag("TrustedForDelegation", self.trusted_for_delegation)
            .opt("SamAccountName", &self.sam_account_name)
            .opt("Path", &self.container)
            .opt("DisplayName", &self.display_name)
            .opt("Description", &self.description)
            .opt("AccountExpirationDate", &self.expiration);
        if !self.kerberos_encryption_type.is_empty() {
            p = p.raw(format!(
                "-KerberosEncryptionType {}",
                encryption_types_ps(&self.kerberos_encryption_type)
            ));
        }
        if self.managed_password_interval_in_days > 0 {
            p = p.raw(format!(
                "-ManagedPasswordIntervalInDays {}",
                self.managed_password_interval_in_days
            ));
        }
        if !self.service_principal_names.is_empty() {
            p = p.raw(format!("-ServicePrincipalNames {}", ps_array(&self.service_principal_names)));
        }
        if !self.principals_allowed_to_retrieve_managed_password.is_empty() {
            p = p.raw(format!(
                "-PrincipalsAllowedToRetrieveManagedPassword {}",
                ps_array(&self.principals_allowed_to_retrieve_managed_password)
            ));
        }
        if !self.principals_allowed_to_delegate_to_account.is_empty() {
            p = p.raw(format!(
                "-PrincipalsAllowedToDelegateToAccount {}",
                ps_array(&self.principals_allowed_to_delegate_to_account)
            ));
        }
        Ok(p.into_command(&options.clone().json()))
    }

    pub fn build_update(&self, prior: &Gmsa, options: &CommandOptions) -> AdResult<Vec<PsCommand>> {
        if self.managed_password_interval_in_days != 0
            && self.managed_password_interval_in_days != prior.managed_password_interval_in_days
        {
            return Err(AdError::validation(format!(
                "managed_password_interval_in_days cannot change after creation ({} -> {})",
                prior.managed_password_interval_in_days, self.managed_password_interval_in_days
            )));
        }
        let id = validate_guid(&prior.id)?;
        let mut clear: Vec<&str> = Vec::new();

        let mut p = Params::for_identity("Set-ADServiceAccount", &id)?
            .changed("DNSHostName", &prior.dns_host_name, &self.dns_host_name)
            .changed("SamAccountName", &prior.sam_account_name, &self.sam_account_name)
            .changed("DisplayName", &prior.display_name, &self.display_name)
            .changed("Description", &prior.description, &self.description)
            .changed("AccountExpirationDate", &prior.expiration, &self.expiration)
            .changed_flag("Enabled", prior.enabled, self.enabled)
            .changed_flag("TrustedForDelegation", prior.trusted_for_delegation, self.trusted_for_delegation);

        if prior.kerberos_encryption_type != self.kerberos_encryption_type {
            p = p.raw(format!(
                "-KerberosEncryptionType {}",
                encryption_types_ps(&self.kerberos_encryption_type)
            ));
        }
        if prior.service_principal_names != self.service_principal_names {
            if self.service_principal_names.is_empty() {
                clear.push("servicePrincipalName");
            } else {
                p = p.raw(format!(
                    "-ServicePrincipalNames @{{Replace={}}}",
                    ps_array(&self.service_principal_names)
                ));
            }
        }
        for (param, old, new) in [
            (
                "PrincipalsAllowedToRetrieveManagedPassword",
                &prior.principals_allowed_to_retrieve_managed_password,
                &self.principals_allowed_to_retrieve_managed_password,
            ),
            (
                "PrincipalsAllowedToDelegateToAccount",
                &prior.principals_allowed_to_delegate_to_account,
                &self.principals_allowed_to_delegate_to_account,
            ),
        ] {
            if old != new {
                p = if new.is_empty() {
                    p.raw(format!("-{} $null", param))
                } else {
                    p.raw(format!("-{} {}", param, ps_array(new)))
                };
            }
        }
        if !clear.is_empty() {
            p = p.raw(format!("-Clear {}", clear.join(",")));
        }

        let mut cmds = Vec::new();
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
        Ok(Params::for_identity("Remove-ADServiceAccount", id)?
            .raw("-Confirm:$false")
            .into_command(options))
    }

    pub fn build_read(id: &str, options: &CommandOptions) -> AdResult<PsCommand> {
        Ok(Params::for_identity("Get-ADServiceAccount", id)?
            .raw("-Properties *")
            .into_command(&options.clone().json()))
    }

    pub fn parse(json: &str) -> AdResult<Gmsa> {
        let raw: RawGmsa = from_ps(json)?;
        let id = require_guid(&raw.object_guid, "service account")?;

        let kerberos_encryption_type = match raw.supported_encryption_types {
            Some(bits) => decode_encryption_types(bits as u32),
            None => encryption_types_from_ps(&raw.kerberos_encryption_type)?,
        };

        Ok(Gmsa {
            id,
            container: container_from_dn(&raw.distinguished_name),
            dn: raw.distinguished_name,
            name: raw.name,
            sam_account_name: raw.sam_account_name,
            dns_host_name: raw.dns_host_name,
            display_name: raw.display_name,
            description: raw.description,
            enabled: raw.enabled,
            expiration: parse_ps_date(&raw.account_expiration_date)?,
            kerberos_encryption_type,
            managed_password_interval_in_days: raw.managed_password_interval_in_days.unwrap_or(0).max(0) as u32,
            service_principal_names: raw.service_principal_names.into_iter().collect(),
            principals_allowed_to_retrieve_managed_password: raw
                .principals_allowed_to_retrieve_managed_password
                .into_iter()
                .collect(),
            principals_allowed_to_delegate_to_account: raw
                .principals_allowed_to_delegate_to_account
                .into_iter()
                .collect(),
            trusted_for_delegation: raw.trusted_for_delegation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: &str = "5f1c3b8e-2d4a-4c6e-9b1f-0a2b3c4d5e6f";

    fn gmsa() -> Gmsa {
        Gmsa {
            id: G.into(),
            name: "svc-web".into(),
            dns_host_name: "svc-web.x.com".into(),
            enabled: true,
            managed_password_interval_in_days: 30,
            kerberos_encryption_type: [EncryptionType::Aes128, EncryptionType::Aes256].into_iter().collect(),
            principals_allowed_to_retrieve_managed_password: ["CN=WebHosts,DC=x".to_string()].into_iter().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn expiration_from_ms_date() {
        let json = format!(
            r#"{{"ObjectGUID":"{}","Name":"svc","AccountExpirationDate":"\/Date(1700000000000)\/"}}"#,
            G
        );
        assert_eq!(Gmsa::parse(&json).unwrap().expiration, "2023-11-14T22:13:20Z");
    }

    #[test]
    fn encryption_types_from_every_shape() {
        let aes: EncryptionTypes = [EncryptionType::Aes128, EncryptionType::Aes256].into_iter().collect();
        assert_eq!(encryption_types_from_ps(&serde_json::json!(24)).unwrap(), aes);
        assert_eq!(encryption_types_from_ps(&serde_json::json!("AES128, AES256")).unwrap(), aes);
        assert_eq!(encryption_types_from_ps(&serde_json::json!(["AES128", 16])).unwrap(), aes);
        assert!(encryption_types_from_ps(&serde_json::json!("None")).unwrap().is_empty());
        assert_eq!(encryption_types_from_ps(&serde_json::json!(28)).unwrap().len(), 3);
        assert!(encryption_types_from_ps(&serde_json::json!("DES")).is_err());
    }

    #[test]
    fn supported_encryption_types_win() {
        let json = format!(
            r#"{{"ObjectGUID":"{}","KerberosEncryptionType":"RC4","msDS-SupportedEncryptionTypes":20}}"#,
            G
        );
        let g = Gmsa::parse(&json).unwrap();
        let want: EncryptionTypes = [EncryptionType::Rc4, EncryptionType::Aes256].into_iter().collect();
        assert_eq!(g.kerberos_encryption_type, want);
    }

    #[test]
    fn create_script() {
        let script = gmsa().build_create(&CommandOptions::default()).unwrap().render().script;
        assert_eq!(
            script,
            "New-ADServiceAccount -Passthru -Name \"svc-web\" -DNSHostName \"svc-web.x.com\" -Enabled $true \
             -TrustedForDelegation $false -KerberosEncryptionType AES128,AES256 \
             -ManagedPasswordIntervalInDays 30 \
             -PrincipalsAllowedToRetrieveManagedPassword @(\"CN=WebHosts,DC=x\") | ConvertTo-Json"
        );
    }

    #[test]
    fn password_interval_is_create_only() {
        let prior = gmsa();
        let mut desired = gmsa();
        desired.managed_password_interval_in_days = 15;
        let err = desired.build_update(&prior, &CommandOptions::default()).unwrap_err();
        assert_eq!(err.kind, adp_core::AdErrorKind::Validation);
    }

    #[test]
    fn update_lists() {
        let mut prior = gmsa();
        prior.service_principal_names = ["HTTP/web".to_string()].into_iter().collect();
        let mut desired = gmsa();
        desired.principals_allowed_to_retrieve_managed_password.clear();
        desired.kerberos_encryption_type.clear();
        let cmds = desired.build_update(&prior, &CommandOptions::default()).unwrap();
        assert_eq!(
            cmds[0].render().script,
            format!(
                "Set-ADServiceAccount -Identity \"{}\" -KerberosEncryptionType None \
                 -PrincipalsAllowedToRetrieveManagedPassword $null -Clear servicePrincipalName",
                G
            )
        );
    }
}
