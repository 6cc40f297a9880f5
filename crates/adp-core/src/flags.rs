//! Directory attribute bitfields: `groupType`, `userAccountControl` and
//! `msDS-SupportedEncryptionTypes`.

use crate::error::{AdError, AdResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ─── Group type ──────────────────────────────────────────────────────────────

pub const GROUP_TYPE_SYSTEM: u32 = 0x0000_0001;
pub const GROUP_TYPE_GLOBAL: u32 = 0x0000_0002;
pub const GROUP_TYPE_LOCAL: u32 = 0x0000_0004;
pub const GROUP_TYPE_UNIVERSAL: u32 = 0x0000_0008;
pub const GROUP_TYPE_APP_BASIC: u32 = 0x0000_0010;
pub const GROUP_TYPE_APP_QUERY: u32 = 0x0000_0020;
pub const GROUP_TYPE_SECURITY: u32 = 0x8000_0000;

const SCOPE_MASK: u32 = GROUP_TYPE_GLOBAL | GROUP_TYPE_LOCAL | GROUP_TYPE_UNIVERSAL;
const CATEGORY_MASK: u32 =
    GROUP_TYPE_SYSTEM | GROUP_TYPE_SECURITY | GROUP_TYPE_APP_BASIC | GROUP_TYPE_APP_QUERY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupScope {
    Global,
    Local,
    Universal,
}

impl GroupScope {
    pub const ALL: [GroupScope; 3] = [Self::Global, Self::Local, Self::Universal];

    pub fn parse(s: &str) -> AdResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "local" | "domainlocal" => Ok(Self::Local),
            "universal" => Ok(Self::Universal),
            other => Err(AdError::validation(format!("unknown group scope '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Local => "local",
            Self::Universal => "universal",
        }
    }

    /// Name accepted by `-GroupScope`.
    pub fn ps_name(&self) -> &'static str {
        match self {
            Self::Global => "Global",
            Self::Local => "DomainLocal",
            Self::Universal => "Universal",
        }
    }

    pub fn bit(&self) -> u32 {
        match self {
            Self::Global => GROUP_TYPE_GLOBAL,
            Self::Local => GROUP_TYPE_LOCAL,
            Self::Universal => GROUP_TYPE_UNIVERSAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupCategory {
    System,
    Security,
    AppBasic,
    AppQuery,
}

impl GroupCategory {
    pub const ALL: [GroupCategory; 4] = [Self::System, Self::Security, Self::AppBasic, Self::AppQuery];

    pub fn parse(s: &str) -> AdResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "security" => Ok(Self::Security),
            "app_basic" => Ok(Self::AppBasic),
            "app_query" => Ok(Self::AppQuery),
            other => Err(AdError::validation(format!("unknown group category '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Security => "security",
            Self::AppBasic => "app_basic",
            Self::AppQuery => "app_query",
        }
    }

    /// Name accepted by `-GroupCategory`; anything but security is a
    /// distribution group for the AD cmdlets.
    pub fn ps_name(&self) -> &'static str {
        match self {
            Self::Security => "Security",
            _ => "Distribution",
        }
    }

    pub fn bit(&self) -> u32 {
        match self {
            Self::System => GROUP_TYPE_SYSTEM,
            Self::Security => GROUP_TYPE_SECURITY,
            Self::AppBasic => GROUP_TYPE_APP_BASIC,
            Self::AppQuery => GROUP_TYPE_APP_QUERY,
        }
    }
}

/// Combine a scope and a category into a `groupType` value.
pub fn encode_group_type(scope: GroupScope, category: GroupCategory) -> u32 {
    scope.bit() | category.bit()
}

/// The signed form stored in the directory (`groupType` is an INTEGER).
pub fn group_type_to_ldap(bits: u32) -> i32 {
    bits as i32
}

/// Split a `groupType` value into scope and category. Exactly one scope bit
/// and exactly one category bit must be set.
pub fn decode_group_type(value: i64) -> AdResult<(GroupScope, GroupCategory)> {
    let bits = value as i32 as u32;
    let scope = match bits & SCOPE_MASK {
        GROUP_TYPE_GLOBAL => GroupScope::Global,
        GROUP_TYPE_LOCAL => GroupScope::Local,
        GROUP_TYPE_UNIVERSAL => GroupScope::Universal,
        other => {
            return Err(AdError::invariant(format!(
                "groupType {:#x} must carry exactly one scope bit (found {:#x})",
                bits, other
            )))
        }
    };
    let category = match bits & CATEGORY_MASK {
        GROUP_TYPE_SYSTEM => GroupCategory::System,
        GROUP_TYPE_SECURITY => GroupCategory::Security,
        GROUP_TYPE_APP_BASIC => GroupCategory::AppBasic,
        GROUP_TYPE_APP_QUERY => GroupCategory::AppQuery,
        other => {
            return Err(AdError::invariant(format!(
                "groupType {:#x} must carry exactly one category bit (found {:#x})",
                bits, other
            )))
        }
    };
    Ok((scope, category))
}

// ─── User account control ────────────────────────────────────────────────────

pub const UAC_ACCOUNT_DISABLE: u32 = 0x0002;
pub const UAC_PASSWD_CANT_CHANGE: u32 = 0x0040;
pub const UAC_NORMAL_ACCOUNT: u32 = 0x0200;
pub const UAC_DONT_EXPIRE_PASSWORD: u32 = 0x1_0000;

/// The user flags carried by `userAccountControl`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UacFlags {
    pub disabled: bool,
    pub password_never_expires: bool,
    pub cannot_change_password: bool,
}

impl UacFlags {
    /// Derived value to write back. A user with no flags gets the base
    /// `NORMAL_ACCOUNT` value alone.
    pub fn encode(&self) -> u32 {
        let mut value = UAC_NORMAL_ACCOUNT;
        if self.disabled {
            value |= UAC_ACCOUNT_DISABLE;
        }
        if self.password_never_expires {
            value |= UAC_DONT_EXPIRE_PASSWORD;
        }
        if self.cannot_change_password {
            value |= UAC_PASSWD_CANT_CHANGE;
        }
        value
    }

    /// Flags derived purely from an observed value; unrelated bits are ignored.
    pub fn decode(value: u32) -> Self {
        Self {
            disabled: value & UAC_ACCOUNT_DISABLE != 0,
            password_never_expires: value & UAC_DONT_EXPIRE_PASSWORD != 0,
            cannot_change_password: value & UAC_PASSWD_CANT_CHANGE != 0,
        }
    }
}

// ─── Kerberos encryption types ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EncryptionType {
    #[serde(rename = "RC4")]
    Rc4,
    #[serde(rename = "AES128")]
    Aes128,
    #[serde(rename = "AES256")]
    Aes256,
}

impl EncryptionType {
    pub fn parse(s: &str) -> AdResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RC4" => Ok(Self::Rc4),
            "AES128" => Ok(Self::Aes128),
            "AES256" => Ok(Self::Aes256),
            other => Err(AdError::validation(format!(
                "unknown Kerberos encryption type '{}'",
                other
            ))),
        }
    }

    pub fn bit(&self) -> u32 {
        match self {
            Self::Rc4 => 4,
            Self::Aes128 => 8,
            Self::Aes256 => 16,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rc4 => "RC4",
            Self::Aes128 => "AES128",
            Self::Aes256 => "AES256",
        }
    }
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type EncryptionTypes = BTreeSet<EncryptionType>;

pub fn encode_encryption_types(set: &EncryptionTypes) -> u32 {
    set.iter().fold(0, |acc, t| acc | t.bit())
}

/// Decode the RC4/AES bits; DES and feature bits are not represented.
pub fn decode_encryption_types(value: u32) -> EncryptionTypes {
    [EncryptionType::Rc4, EncryptionType::Aes128, EncryptionType::Aes256]
        .into_iter()
        .filter(|t| value & t.bit() != 0)
        .collect()
}

/// Value accepted by `-KerberosEncryptionType`.
pub fn encryption_types_ps(set: &EncryptionTypes) -> String {
    if set.is_empty() {
        return "None".to_string();
    }
    set.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(",")
}
