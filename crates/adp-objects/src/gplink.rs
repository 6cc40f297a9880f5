//! Links between a GPO and a container (`gPLink`).

use crate::json::{de_bool, de_opt_i64, de_string, from_ps, value_to_string};
use crate::params::Params;
use adp_core::ids::{pair_id, split_composite, validate_guid};
use adp_core::{AdError, AdResult};
use adp_winrm::{CommandOptions, PsCommand};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

lazy_static! {
    static ref LINK_RE: Regex =
        Regex::new(r"(?i)\{([0-9a-f-]{36})\}([^;]*);([0-3])").expect("static gPLink regex");
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpLink {
    /// `<gpoID>_<targetDN>`
    pub id: String,
    pub gpo_id: String,
    pub target_dn: String,
    pub enforced: bool,
    pub enabled: bool,
    /// Zero-based position in the target's link list.
    pub order: u32,
}

/// `gPLink` link options: 0 enabled, 1 disabled, 2 enforced, 3 enforced
/// and disabled.
pub fn decode_link_state(state: u8) -> (bool, bool) {
    match state {
        0 => (false, true),
        1 => (false, false),
        2 => (true, true),
        _ => (true, false),
    }
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "Yes"
    } else {
        "No"
    }
}

/// Entries of a raw `gPLink` value, in attribute order. The target is the
/// DN embedded after `]` when present, otherwise `target_dn`.
pub fn parse_gplink_attribute(value: &str, target_dn: &str) -> Vec<GpLink> {
    value
        .split('[')
        .filter(|s| !s.trim().is_empty())
        .enumerate()
        .filter_map(|(order, segment)| {
            let caps = LINK_RE.captures(segment)?;
            let gpo_id = caps[1].to_ascii_lowercase();
            let target = match caps[2].strip_prefix(']') {
                Some(embedded) if !embedded.is_empty() => embedded.to_string(),
                _ => target_dn.to_string(),
            };
            let state: u8 = caps[3].parse().ok()?;
            let (enforced, enabled) = decode_link_state(state);
            Some(GpLink {
                id: pair_id(&gpo_id, &target),
                gpo_id,
                target_dn: target,
                enforced,
                enabled,
                order: order as u32,
            })
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct RawNewLink {
    #[serde(deserialize_with = "de_string")]
    gpo_id: String,
    #[serde(deserialize_with = "de_string")]
    target: String,
    #[serde(deserialize_with = "de_bool")]
    enabled: bool,
    #[serde(deserialize_with = "de_bool")]
    enforced: bool,
    #[serde(deserialize_with = "de_opt_i64")]
    order: Option<i64>,
}

impl GpLink {
    pub fn new(gpo_id: &str, target_dn: &str) -> AdResult<Self> {
        let gpo_id = validate_guid(gpo_id)?.to_ascii_lowercase();
        if target_dn.trim().is_empty() {
            return Err(AdError::validation("GPO link target must not be empty"));
        }
        Ok(Self {
            id: pair_id(&gpo_id, target_dn),
            gpo_id,
            target_dn: target_dn.to_string(),
            enabled: true,
            ..Default::default()
        })
    }

    /// Split `<gpoID>_<targetDN>`.
    pub fn parse_id(id: &str) -> AdResult<(String, String)> {
        let (gpo, target) = split_composite(id)?;
        Ok((validate_guid(gpo)?.to_ascii_lowercase(), target.to_string()))
    }

    fn head(&self, cmdlet: &str) -> AdResult<Params> {
        let gpo = validate_guid(&self.gpo_id)?;
        Ok(Params::new(cmdlet)
            .string("Guid", &gpo)
            .string("Target", &self.target_dn))
    }

    /// `New-GPLink`; `-Order` is one-based.
    pub fn build_create(&self, options: &CommandOptions) -> AdResult<PsCommand> {
        let mut p = self
            .head("New-GPLink")?
            .raw(format!("-LinkEnabled {}", yes_no(self.enabled)))
            .raw(format!("-Enforced {}", yes_no(self.enforced)));
        if self.order > 0 {
            p = p.raw(format!("-Order {}", self.order + 1));
        }
        Ok(p.into_command(&options.clone().invoke().json()))
    }

    pub fn build_update(&self, prior: &GpLink, options: &CommandOptions) -> AdResult<Option<PsCommand>> {
        let mut p = self.head("Set-GPLink")?;
        let bare = p.fragments().len();
        if prior.enabled != self.enabled {
            p = p.raw(format!("-LinkEnabled {}", yes_no(self.enabled)));
        }
        if prior.enforced != self.enforced {
            p = p.raw(format!("-Enforced {}", yes_no(self.enforced)));
        }
        if prior.order != self.order {
            p = p.raw(format!("-Order {}", self.order + 1));
        }
        if p.fragments().len() == bare {
            return Ok(None);
        }
        Ok(Some(p.into_command(&options.clone().invoke())))
    }

    pub fn build_delete(&self, options: &CommandOptions) -> AdResult<PsCommand> {
        Ok(self
            .head("Remove-GPLink")?
            .raw("-Confirm:$false")
            .into_command(&options.clone().invoke()))
    }

    /// `Get-ADObject` of the target with its `gPLink` attribute.
    pub fn build_read(target_dn: &str, options: &CommandOptions) -> PsCommand {
        Params::new("Get-ADObject")
            .string("Identity", target_dn)
            .raw("-Properties gplink")
            .into_command(&options.clone().json())
    }

    /// Output of `New-GPLink`.
    pub fn parse_created(json: &str) -> AdResult<GpLink> {
        let raw: RawNewLink = from_ps(json)?;
        let gpo_id = validate_guid(&raw.gpo_id)
            .map_err(|_| AdError::invariant("New-GPLink returned no GpoId"))?
            .to_ascii_lowercase();
        Ok(GpLink {
            id: pair_id(&gpo_id, &raw.target),
            gpo_id,
            target_dn: raw.target,
            enabled: raw.enabled,
            enforced: raw.enforced,
            order: raw.order.unwrap_or(1).max(1) as u32 - 1,
        })
    }

    /// Find `gpo_id` in the `Get-ADObject` output of its target; `None` when
    /// the GPO is not linked there.
    pub fn parse_read(json: &str, gpo_id: &str, target_dn: &str) -> AdResult<Option<GpLink>> {
        let obj: Value = from_ps(json)?;
        let attr = obj
            .as_object()
            .and_then(|m| m.iter().find(|(k, _)| k.eq_ignore_ascii_case("gplink")))
            .map(|(_, v)| value_to_string(v))
            .unwrap_or_default();
        Ok(parse_gplink_attribute(&attr, target_dn)
            .into_iter()
            .find(|l| l.gpo_id.eq_ignore_ascii_case(gpo_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AAAA: &str = "AAAAAAAA-AAAA-AAAA-AAAA-AAAAAAAAAAAA";
    const BBBB: &str = "BBBBBBBB-BBBB-BBBB-BBBB-BBBBBBBBBBBB";

    #[test]
    fn link_states() {
        assert_eq!(decode_link_state(0), (false, true));
        assert_eq!(decode_link_state(1), (false, false));
        assert_eq!(decode_link_state(2), (true, true));
        assert_eq!(decode_link_state(3), (true, false));
    }

    #[test]
    fn gplink_attribute_lookup() {
        let value = format!("[cn={{{}}}]cn=ou1,dc=x;2[cn={{{}}}]cn=ou2,dc=x;0", AAAA, BBBB);
        let links = parse_gplink_attribute(&value, "");
        let a = links.iter().find(|l| l.gpo_id.eq_ignore_ascii_case(AAAA)).unwrap();
        assert_eq!(a.order, 0);
        assert!(a.enforced);
        assert!(a.enabled);
        assert_eq!(a.target_dn, "cn=ou1,dc=x");

        let b = links.iter().find(|l| l.gpo_id.eq_ignore_ascii_case(BBBB)).unwrap();
        assert_eq!((b.order, b.enforced, b.enabled), (1, false, true));
    }

    #[test]
    fn ldap_form_uses_queried_target() {
        let value = format!(
            "[LDAP://cn={{{}}},cn=policies,cn=system,DC=x,DC=com;1][LDAP://cn={{{}}},cn=policies,cn=system,DC=x,DC=com;0]",
            AAAA, BBBB
        );
        let json = serde_json::json!({ "DistinguishedName": "OU=Sales,DC=x,DC=com", "gPLink": value }).to_string();
        let link = GpLink::parse_read(&json, &AAAA.to_lowercase(), "OU=Sales,DC=x,DC=com")
            .unwrap()
            .unwrap();
        assert_eq!(link.target_dn, "OU=Sales,DC=x,DC=com");
        assert!(!link.enabled);
        assert_eq!(link.order, 0);

        let missing = GpLink::parse_read(r#"{"gplink": null}"#, AAAA, "OU=Sales,DC=x,DC=com").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn create_and_parse_created() {
        let link = GpLink::new(AAAA, "OU=Sales,DC=x,DC=com").unwrap();
        assert_eq!(
            link.build_create(&CommandOptions::default()).unwrap().render().script,
            format!(
                "New-GPLink -Guid \"{}\" -Target \"OU=Sales,DC=x,DC=com\" -LinkEnabled Yes -Enforced No | ConvertTo-Json",
                AAAA.to_lowercase()
            )
        );

        let json = format!(
            r#"{{"GpoId":"{}","DisplayName":"Baseline","Enabled":true,"Enforced":false,"Order":2,"Target":"OU=Sales,DC=x,DC=com"}}"#,
            AAAA
        );
        let created = GpLink::parse_created(&json).unwrap();
        assert_eq!(created.order, 1);
        assert_eq!(created.id, format!("{}_OU=Sales,DC=x,DC=com", AAAA.to_lowercase()));
    }

    #[test]
    fn id_round_trip() {
        let (gpo, target) = GpLink::parse_id(&format!("{}_OU=a_b,DC=x", AAAA)).unwrap();
        assert_eq!(gpo, AAAA.to_lowercase());
        assert_eq!(target, "OU=a_b,DC=x");
        assert!(GpLink::parse_id("nope_OU=a").is_err());
    }

    #[test]
    fn update_only_changed_options() {
        let prior = GpLink::new(AAAA, "OU=a,DC=x").unwrap();
        assert!(prior.build_update(&prior, &CommandOptions::default()).unwrap().is_none());
        let mut desired = prior.clone();
        desired.enforced = true;
        let cmd = desired.build_update(&prior, &CommandOptions::default()).unwrap().unwrap();
        assert!(cmd.render().script.ends_with("-Enforced Yes"));
    }
}
