//! Identifiers surfaced to the host: object GUIDs and composite ids.

use crate::error::{AdError, AdResult};
use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

lazy_static! {
    static ref GUID_RE: Regex =
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .expect("static GUID regex");
}

/// Separator of composite ids.
pub const ID_SEPARATOR: char = '_';

/// Suffix of the GPO security settings resource id.
pub const SECURITY_SETTINGS_SUFFIX: &str = "securitysettings";

/// Accept `xxxxxxxx-xxxx-...` with or without surrounding braces and return
/// the bare form.
pub fn validate_guid(value: &str) -> AdResult<String> {
    let bare = value.trim().trim_start_matches('{').trim_end_matches('}');
    if GUID_RE.is_match(bare) {
        Ok(bare.to_string())
    } else {
        Err(AdError::validation(format!("'{}' is not a valid GUID", value)))
    }
}

pub fn is_guid(value: &str) -> bool {
    validate_guid(value).is_ok()
}

/// Split a composite id on the first separator. Both halves must be non-empty.
pub fn split_composite(id: &str) -> AdResult<(&str, &str)> {
    match id.split_once(ID_SEPARATOR) {
        Some((a, b)) if !a.is_empty() && !b.is_empty() => Ok((a, b)),
        _ => Err(AdError::validation(format!(
            "malformed id '{}', expected <id>{}<id>",
            id, ID_SEPARATOR
        ))),
    }
}

/// `<groupID>_<random-UUID>` for membership-as-set.
pub fn new_membership_id(group_id: &str) -> String {
    format!("{}{}{}", group_id, ID_SEPARATOR, Uuid::new_v4())
}

/// `<a>_<b>` for membership-as-pair and GPO links.
pub fn pair_id(a: &str, b: &str) -> String {
    format!("{}{}{}", a, ID_SEPARATOR, b)
}

/// Parse a pair id whose halves must both be GUIDs.
pub fn parse_guid_pair(id: &str) -> AdResult<(String, String)> {
    let (a, b) = split_composite(id)?;
    Ok((validate_guid(a)?, validate_guid(b)?))
}

pub fn security_settings_id(gpo_id: &str) -> String {
    pair_id(gpo_id, SECURITY_SETTINGS_SUFFIX)
}

pub fn parse_security_settings_id(id: &str) -> AdResult<String> {
    let (gpo, suffix) = split_composite(id)?;
    if suffix != SECURITY_SETTINGS_SUFFIX {
        return Err(AdError::validation(format!(
            "malformed id '{}', expected <gpoID>{}{}",
            id, ID_SEPARATOR, SECURITY_SETTINGS_SUFFIX
        )));
    }
    validate_guid(gpo)
}

/// Everything after the first unescaped `,` of a distinguished name.
pub fn container_from_dn(dn: &str) -> String {
    let bytes = dn.as_bytes();
    let mut escaped = false;
    for (i, b) in bytes.iter().enumerate() {
        match b {
            b'\\' if !escaped => escaped = true,
            b',' if !escaped => return dn[i + 1..].trim_start().to_string(),
            _ => escaped = false,
        }
    }
    String::new()
}
