//! The GPO security template (`GptTmpl.inf`).
//!
//! Two kinds of section: keyed sections with a fixed key schema, and list
//! sections whose body is an ordered list of raw records. Both render
//! through [`IniSection`]. The file is UTF-16LE with a BOM and CRLF line
//! breaks.

use adp_core::{AdError, AdResult};
use log::debug;
use serde::{Deserialize, Serialize};

pub const CRLF: &str = "\r\n";
const BOM_LE: [u8; 2] = [0xFF, 0xFE];
const BOM_BE: [u8; 2] = [0xFE, 0xFF];
const BOM_UTF8: [u8; 3] = [0xEF, 0xBB, 0xBF];
const SIGNATURE: &str = "$CHICAGO$";

// ─── Section rendering ───────────────────────────────────────────────────────

/// Something that renders as one `[Header]` block.
pub trait IniSection {
    fn header(&self) -> &str;

    /// Body lines, without terminators.
    fn body(&self) -> Vec<String>;

    fn write_to(&self, out: &mut String) {
        out.push('[');
        out.push_str(self.header());
        out.push(']');
        out.push_str(CRLF);
        for line in self.body() {
            out.push_str(&line);
            out.push_str(CRLF);
        }
    }
}

/// `key=value` lines; empty values are skipped.
pub struct KeyedBlock<'a> {
    header: &'static str,
    entries: Vec<(&'static str, &'a str)>,
}

impl IniSection for KeyedBlock<'_> {
    fn header(&self) -> &str {
        self.header
    }

    fn body(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }
}

/// Raw record lines, in order.
pub struct ListBlock {
    header: &'static str,
    records: Vec<String>,
}

impl IniSection for ListBlock {
    fn header(&self) -> &str {
        self.header
    }

    fn body(&self) -> Vec<String> {
        self.records.clone()
    }
}

// ─── Keyed sections ──────────────────────────────────────────────────────────

/// A section whose keys come from a fixed schema.
pub trait KeyedSection: Default {
    const KEYS: &'static [&'static str];

    fn entries(&self) -> Vec<(&'static str, &str)>;

    /// Assign `key` (case-insensitive); false when the key is not part of
    /// the schema.
    fn set(&mut self, key: &str, value: String) -> bool;

    fn has_key(key: &str) -> bool {
        Self::KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
    }
}

macro_rules! keyed_section {
    ($(#[$meta:meta])* $name:ident { $($field:ident => $key:literal),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct $name {
            $(pub $field: String,)*
        }

        impl KeyedSection for $name {
            const KEYS: &'static [&'static str] = &[$($key),*];

            fn entries(&self) -> Vec<(&'static str, &str)> {
                vec![$(($key, self.$field.as_str())),*]
            }

            fn set(&mut self, key: &str, value: String) -> bool {
                $(
                    if key.eq_ignore_ascii_case($key) {
                        self.$field = value;
                        return true;
                    }
                )*
                false
            }
        }
    };
}

keyed_section!(
    /// `[System Access]` password keys.
    PasswordPolicies {
        minimum_password_age => "MinimumPasswordAge",
        maximum_password_age => "MaximumPasswordAge",
        minimum_password_length => "MinimumPasswordLength",
        password_complexity => "PasswordComplexity",
        password_history_size => "PasswordHistorySize",
        clear_text_password => "ClearTextPassword",
    }
);

keyed_section!(
    /// `[System Access]` lockout keys.
    AccountLockout {
        lockout_bad_count => "LockoutBadCount",
        reset_lockout_count => "ResetLockoutCount",
        lockout_duration => "LockoutDuration",
        force_logoff_when_hour_expire => "ForceLogoffWhenHourExpire",
    }
);

keyed_section!(
    KerberosPolicy {
        max_ticket_age => "MaxTicketAge",
        max_renew_age => "MaxRenewAge",
        max_service_age => "MaxServiceAge",
        max_clock_skew => "MaxClockSkew",
        ticket_validate_client => "TicketValidateClient",
    }
);

keyed_section!(
    EventAudit {
        audit_system_events => "AuditSystemEvents",
        audit_logon_events => "AuditLogonEvents",
        audit_object_access => "AuditObjectAccess",
        audit_privilege_use => "AuditPrivilegeUse",
        audit_policy_change => "AuditPolicyChange",
        audit_account_manage => "AuditAccountManage",
        audit_process_tracking => "AuditProcessTracking",
        audit_ds_access => "AuditDSAccess",
        audit_account_logon => "AuditAccountLogon",
    }
);

keyed_section!(
    /// Shared by the system, security and application event logs.
    LogSettings {
        maximum_log_size => "MaximumLogSize",
        audit_log_retention_period => "AuditLogRetentionPeriod",
        retention_days => "RetentionDays",
        restrict_guest_access => "RestrictGuestAccess",
    }
);

// ─── List records ────────────────────────────────────────────────────────────

/// `[Group Membership]`: restricted group with its members and parents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestrictedGroup {
    pub group_name: String,
    /// Comma-separated, as written in the template.
    pub group_members: String,
    pub group_memberof: String,
}

/// `"<name>",<mode>,"<acl>"` records (registry keys, services, files).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AclRecord {
    pub name: String,
    /// Propagation mode for keys and files, startup mode for services.
    pub mode: String,
    pub acl: String,
}

impl AclRecord {
    fn emit(&self) -> String {
        format!("\"{}\",{},\"{}\"", self.name, self.mode, self.acl)
    }

    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (name, rest) = if let Some(stripped) = line.strip_prefix('"') {
            let end = stripped.find('"')?;
            (&stripped[..end], stripped[end + 1..].trim_start().strip_prefix(',')?)
        } else {
            line.split_once(',')?
        };
        let (mode, acl) = match rest.split_once(',') {
            Some((m, a)) => (m, a),
            None => (rest, ""),
        };
        Some(Self {
            name: name.trim().to_string(),
            mode: mode.trim().to_string(),
            acl: strip_quotes(acl.trim()).to_string(),
        })
    }
}

/// `[Registry Values]`: `<key>=<type>,<value>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryValue {
    pub key_name: String,
    pub value_type: String,
    pub value: String,
}

impl RegistryValue {
    fn emit(&self) -> String {
        format!("{}={},{}", self.key_name, self.value_type, self.value)
    }

    fn parse(line: &str) -> Option<Self> {
        let (key, rest) = line.split_once('=')?;
        let (value_type, value) = rest.split_once(',').unwrap_or((rest, ""));
        Some(Self {
            key_name: key.trim().to_string(),
            value_type: value_type.trim().to_string(),
            value: value.trim().to_string(),
        })
    }
}

fn strip_quotes(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

// ─── The template ────────────────────────────────────────────────────────────

/// Section headers.
pub mod headers {
    pub const UNICODE: &str = "Unicode";
    pub const VERSION: &str = "Version";
    pub const SYSTEM_ACCESS: &str = "System Access";
    pub const KERBEROS_POLICY: &str = "Kerberos Policy";
    pub const EVENT_AUDIT: &str = "Event Audit";
    pub const SYSTEM_LOG: &str = "System Log";
    pub const SECURITY_LOG: &str = "Security Log";
    pub const APPLICATION_LOG: &str = "Application Log";
    pub const GROUP_MEMBERSHIP: &str = "Group Membership";
    pub const REGISTRY_KEYS: &str = "Registry Keys";
    pub const REGISTRY_VALUES: &str = "Registry Values";
    pub const SERVICE_GENERAL_SETTING: &str = "Service General Setting";
    pub const FILE_SECURITY: &str = "File Security";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub password_policies: Option<PasswordPolicies>,
    pub account_lockout: Option<AccountLockout>,
    pub kerberos_policy: Option<KerberosPolicy>,
    pub event_audit: Option<EventAudit>,
    pub system_log: Option<LogSettings>,
    /// Written under `[Security Log]`.
    pub audit_log: Option<LogSettings>,
    pub application_log: Option<LogSettings>,
    pub restricted_groups: Vec<RestrictedGroup>,
    pub registry_keys: Vec<AclRecord>,
    pub registry_values: Vec<RegistryValue>,
    pub system_services: Vec<AclRecord>,
    pub filesystem: Vec<AclRecord>,
}

fn keyed<'a, S: KeyedSection>(header: &'static str, section: &'a Option<S>) -> Option<KeyedBlock<'a>> {
    section.as_ref().map(|s| KeyedBlock {
        header,
        entries: s.entries(),
    })
}

fn list(header: &'static str, records: Vec<String>) -> Option<ListBlock> {
    if records.is_empty() {
        None
    } else {
        Some(ListBlock { header, records })
    }
}

impl SecuritySettings {
    /// Every present section in emission order.
    fn sections(&self) -> Vec<Box<dyn IniSection + '_>> {
        let mut out: Vec<Box<dyn IniSection + '_>> = Vec::new();

        if self.password_policies.is_some() || self.account_lockout.is_some() {
            let mut entries = Vec::new();
            if let Some(p) = &self.password_policies {
                entries.extend(p.entries());
            }
            if let Some(l) = &self.account_lockout {
                entries.extend(l.entries());
            }
            out.push(Box::new(KeyedBlock {
                header: headers::SYSTEM_ACCESS,
                entries,
            }));
        }
        let keyed_blocks = [
            keyed(headers::KERBEROS_POLICY, &self.kerberos_policy),
            keyed(headers::EVENT_AUDIT, &self.event_audit),
            keyed(headers::SYSTEM_LOG, &self.system_log),
            keyed(headers::SECURITY_LOG, &self.audit_log),
            keyed(headers::APPLICATION_LOG, &self.application_log),
        ];
        for block in keyed_blocks.into_iter().flatten() {
            out.push(Box::new(block));
        }

        let list_blocks = [
            list(
                headers::GROUP_MEMBERSHIP,
                self.restricted_groups
                    .iter()
                    .flat_map(|g| {
                        [
                            format!("{}__Members={}", g.group_name, g.group_members),
                            format!("{}__Memberof={}", g.group_name, g.group_memberof),
                        ]
                    })
                    .collect(),
            ),
            list(headers::REGISTRY_KEYS, self.registry_keys.iter().map(AclRecord::emit).collect()),
            list(headers::REGISTRY_VALUES, self.registry_values.iter().map(RegistryValue::emit).collect()),
            list(
                headers::SERVICE_GENERAL_SETTING,
                self.system_services.iter().map(AclRecord::emit).collect(),
            ),
            list(headers::FILE_SECURITY, self.filesystem.iter().map(AclRecord::emit).collect()),
        ];
        for block in list_blocks.into_iter().flatten() {
            out.push(Box::new(block));
        }
        out
    }

    /// The form [`parse`](Self::parse) reads back. `[System Access]` carries
    /// both password and lockout keys, so a bare header reads as empty
    /// password policies and lockout settings exist only with a value set.
    pub fn normalized(&self) -> SecuritySettings {
        let mut out = self.clone();
        let has_system_access = out.password_policies.is_some() || out.account_lockout.is_some();
        if out
            .account_lockout
            .as_ref()
            .is_some_and(|l| l.entries().iter().all(|(_, v)| v.is_empty()))
        {
            out.account_lockout = None;
        }
        if has_system_access && out.password_policies.is_none() {
            out.password_policies = Some(PasswordPolicies::default());
        }
        out
    }

    /// The template text with CRLF line breaks.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str("[Unicode]\r\nUnicode=yes\r\n");
        out.push_str("[Version]\r\nsignature=\"$CHICAGO$\"\r\nRevision=1\r\n");
        for section in self.sections() {
            section.write_to(&mut out);
        }
        out
    }

    /// The file as written to SYSVOL: BOM + UTF-16LE.
    pub fn emit(&self) -> Vec<u8> {
        encode_utf16le(&self.to_text())
    }

    pub fn parse(bytes: &[u8]) -> AdResult<SecuritySettings> {
        Self::parse_text(&decode_text(bytes)?)
    }

    pub fn parse_text(text: &str) -> AdResult<SecuritySettings> {
        let mut s = SecuritySettings::default();
        let mut signature_seen = false;
        let mut current = String::new();

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(h) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                current = h.trim().to_string();
                match current.as_str() {
                    headers::SYSTEM_ACCESS => mark_present(&mut s.password_policies),
                    headers::KERBEROS_POLICY => mark_present(&mut s.kerberos_policy),
                    headers::EVENT_AUDIT => mark_present(&mut s.event_audit),
                    headers::SYSTEM_LOG => mark_present(&mut s.system_log),
                    headers::SECURITY_LOG => mark_present(&mut s.audit_log),
                    headers::APPLICATION_LOG => mark_present(&mut s.application_log),
                    _ => {}
                }
                continue;
            }
            let (key, value) = match line.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (line, ""),
            };

            match current.as_str() {
                headers::VERSION if key.eq_ignore_ascii_case("signature") => {
                    if strip_quotes(value).eq_ignore_ascii_case(SIGNATURE) {
                        signature_seen = true;
                    }
                }
                headers::SYSTEM_ACCESS => {
                    if PasswordPolicies::has_key(key) {
                        s.password_policies.get_or_insert_with(Default::default).set(key, value.to_string());
                    } else if AccountLockout::has_key(key) {
                        s.account_lockout.get_or_insert_with(Default::default).set(key, value.to_string());
                    } else {
                        debug!("Ignoring [System Access] key {}", key);
                    }
                }
                headers::KERBEROS_POLICY => set_keyed(&mut s.kerberos_policy, key, value),
                headers::EVENT_AUDIT => set_keyed(&mut s.event_audit, key, value),
                headers::SYSTEM_LOG => set_keyed(&mut s.system_log, key, value),
                headers::SECURITY_LOG => set_keyed(&mut s.audit_log, key, value),
                headers::APPLICATION_LOG => set_keyed(&mut s.application_log, key, value),
                headers::GROUP_MEMBERSHIP => parse_group_line(&mut s.restricted_groups, key, value),
                headers::REGISTRY_KEYS => s.registry_keys.extend(AclRecord::parse(line)),
                headers::REGISTRY_VALUES => s.registry_values.extend(RegistryValue::parse(line)),
                headers::SERVICE_GENERAL_SETTING => s.system_services.extend(AclRecord::parse(line)),
                headers::FILE_SECURITY => s.filesystem.extend(AclRecord::parse(line)),
                _ => {}
            }
        }

        if !signature_seen {
            return Err(AdError::parse("security template has no [Version] signature"));
        }
        Ok(s)
    }
}

/// A keyed section that appears only as a header is still present.
fn mark_present<S: KeyedSection>(slot: &mut Option<S>) {
    slot.get_or_insert_with(S::default);
}

fn set_keyed<S: KeyedSection>(slot: &mut Option<S>, key: &str, value: &str) {
    if !slot.get_or_insert_with(S::default).set(key, value.to_string()) {
        debug!("Ignoring unknown security template key {}", key);
    }
}

fn parse_group_line(groups: &mut Vec<RestrictedGroup>, key: &str, value: &str) {
    let lower = key.to_ascii_lowercase();
    let (name, is_members) = if lower.ends_with("__members") {
        (&key[..key.len() - "__members".len()], true)
    } else if lower.ends_with("__memberof") {
        (&key[..key.len() - "__memberof".len()], false)
    } else {
        debug!("Ignoring [Group Membership] key {}", key);
        return;
    };
    let idx = match groups.iter().position(|g| g.group_name == name) {
        Some(i) => i,
        None => {
            groups.push(RestrictedGroup {
                group_name: name.to_string(),
                ..Default::default()
            });
            groups.len() - 1
        }
    };
    if is_members {
        groups[idx].group_members = value.to_string();
    } else {
        groups[idx].group_memberof = value.to_string();
    }
}

// ─── Encoding ────────────────────────────────────────────────────────────────

pub fn encode_utf16le(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + text.len() * 2);
    out.extend_from_slice(&BOM_LE);
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Decode UTF-16 (either byte order, BOM or not) or UTF-8 content.
pub fn decode_text(bytes: &[u8]) -> AdResult<String> {
    let utf16 = |data: &[u8], le: bool| -> AdResult<String> {
        if data.len() % 2 != 0 {
            return Err(AdError::parse("odd number of bytes in UTF-16 content"));
        }
        let units: Vec<u16> = data
            .chunks_exact(2)
            .map(|c| if le { u16::from_le_bytes([c[0], c[1]]) } else { u16::from_be_bytes([c[0], c[1]]) })
            .collect();
        String::from_utf16(&units).map_err(|e| AdError::parse(format!("invalid UTF-16 content: {}", e)))
    };

    if let Some(rest) = bytes.strip_prefix(&BOM_LE) {
        return utf16(rest, true);
    }
    if let Some(rest) = bytes.strip_prefix(&BOM_BE) {
        return utf16(rest, false);
    }
    // BOM-less UTF-16LE: ASCII text with every second byte zero.
    if bytes.len() >= 2 && bytes[0] != 0 && bytes[1] == 0 {
        return utf16(bytes, true);
    }
    let rest = bytes.strip_prefix(&BOM_UTF8).unwrap_or(bytes);
    String::from_utf8(rest.to_vec()).map_err(|e| AdError::parse(format!("invalid UTF-8 content: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SecuritySettings {
        SecuritySettings {
            password_policies: Some(PasswordPolicies {
                maximum_password_age: "42".into(),
                minimum_password_length: "14".into(),
                ..Default::default()
            }),
            account_lockout: Some(AccountLockout {
                lockout_bad_count: "5".into(),
                ..Default::default()
            }),
            kerberos_policy: Some(KerberosPolicy {
                max_clock_skew: "5".into(),
                ..Default::default()
            }),
            event_audit: Some(EventAudit {
                audit_ds_access: "3".into(),
                ..Default::default()
            }),
            audit_log: Some(LogSettings {
                maximum_log_size: "4194240".into(),
                retention_days: "7".into(),
                ..Default::default()
            }),
            restricted_groups: vec![RestrictedGroup {
                group_name: "*S-1-5-32-544".into(),
                group_members: "*S-1-5-21-1-2-3-512,*S-1-5-21-1-2-3-1104".into(),
                group_memberof: String::new(),
            }],
            registry_keys: vec![AclRecord {
                name: "MACHINE\\SOFTWARE\\Contoso".into(),
                mode: "0".into(),
                acl: "D:PAR(A;CI;KA;;;BA)(A;CIIO;KA;;;CO)".into(),
            }],
            registry_values: vec![RegistryValue {
                key_name: "MACHINE\\System\\CurrentControlSet\\Control\\Lsa\\NoLMHash".into(),
                value_type: "4".into(),
                value: "1".into(),
            }],
            system_services: vec![AclRecord {
                name: "Spooler".into(),
                mode: "4".into(),
                acl: "D:AR(A;;CCLCSWRPWPDTLOCRRC;;;SY)".into(),
            }],
            filesystem: vec![AclRecord {
                name: "%SystemRoot%\\Temp".into(),
                mode: "2".into(),
                acl: "D:PAR(A;OICI;FA;;;BA)".into(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn maximum_password_age_line() {
        let s = SecuritySettings {
            password_policies: Some(PasswordPolicies {
                maximum_password_age: "42".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let bytes = s.emit();
        let text = decode_text(&bytes).unwrap();
        assert!(text.contains("[System Access]\r\nMaximumPasswordAge=42\r\n"));
    }

    #[test]
    fn bom_and_crlf() {
        let bytes = sample().emit();
        assert_eq!(&bytes[..2], &[0xFF, 0xFE]);
        let text = decode_text(&bytes).unwrap();
        assert!(text.starts_with("[Unicode]\r\nUnicode=yes\r\n[Version]\r\nsignature=\"$CHICAGO$\"\r\nRevision=1\r\n"));
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                assert_eq!(text.as_bytes()[i - 1], b'\r', "bare LF at {}", i);
            }
        }
        assert!(text.ends_with("\r\n"));
    }

    #[test]
    fn round_trip() {
        let s = sample();
        assert_eq!(SecuritySettings::parse(&s.emit()).unwrap(), s);
        let empty = SecuritySettings::default();
        assert_eq!(SecuritySettings::parse(&empty.emit()).unwrap(), empty);
    }

    #[test]
    fn empty_sections_survive_a_round_trip() {
        let s = SecuritySettings {
            password_policies: Some(PasswordPolicies::default()),
            kerberos_policy: Some(KerberosPolicy::default()),
            ..Default::default()
        };
        assert!(s.to_text().contains("[System Access]\r\n[Kerberos Policy]\r\n"));
        assert_eq!(SecuritySettings::parse(&s.emit()).unwrap(), s);
    }

    #[test]
    fn system_access_reads_back_normalized() {
        let lockout_only = SecuritySettings {
            account_lockout: Some(AccountLockout {
                lockout_duration: "30".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let empty_lockout = SecuritySettings {
            account_lockout: Some(AccountLockout::default()),
            ..Default::default()
        };
        for s in [lockout_only, empty_lockout, sample()] {
            let parsed = SecuritySettings::parse(&s.emit()).unwrap();
            assert_eq!(parsed, s.normalized());
            assert_eq!(parsed.normalized(), parsed);
        }
        assert_eq!(
            SecuritySettings {
                account_lockout: Some(AccountLockout::default()),
                ..Default::default()
            }
            .normalized(),
            SecuritySettings {
                password_policies: Some(PasswordPolicies::default()),
                ..Default::default()
            }
        );
    }

    #[test]
    fn audit_log_is_written_as_security_log() {
        let text = sample().to_text();
        assert!(text.contains("[Security Log]\r\nMaximumLogSize=4194240\r\nRetentionDays=7\r\n"));
        assert!(!text.contains("[Audit Log]"));
    }

    #[test]
    fn lockout_merges_under_system_access() {
        let text = sample().to_text();
        assert_eq!(text.matches("[System Access]").count(), 1);
        assert!(text.contains("MinimumPasswordLength=14\r\nLockoutBadCount=5\r\n"));
    }

    #[test]
    fn group_membership_records() {
        let text = sample().to_text();
        assert!(text.contains(
            "[Group Membership]\r\n*S-1-5-32-544__Members=*S-1-5-21-1-2-3-512,*S-1-5-21-1-2-3-1104\r\n*S-1-5-32-544__Memberof=\r\n"
        ));
    }

    #[test]
    fn parses_windows_template() {
        let text = "[Unicode]\r\nUnicode=yes\r\n[System Access]\r\nMinimumPasswordAge = 1\r\nLockoutBadCount = 0\r\n\
                    [Service General Setting]\r\n\"W32Time\",2,\"\"\r\n\
                    [Version]\r\nsignature=\"$CHICAGO$\"\r\nRevision=1\r\n[Privilege Rights]\r\nSeDenyNetworkLogonRight = *S-1-5-32-546\r\n";
        let s = SecuritySettings::parse_text(text).unwrap();
        assert_eq!(s.password_policies.unwrap().minimum_password_age, "1");
        assert_eq!(s.account_lockout.unwrap().lockout_bad_count, "0");
        assert_eq!(
            s.system_services,
            vec![AclRecord {
                name: "W32Time".into(),
                mode: "2".into(),
                acl: String::new()
            }]
        );
        assert!(s.kerberos_policy.is_none());
    }

    #[test]
    fn missing_signature_is_rejected() {
        assert!(SecuritySettings::parse_text("[Unicode]\r\nUnicode=yes\r\n").is_err());
    }

    #[test]
    fn decodes_other_encodings() {
        assert_eq!(decode_text(b"\xEF\xBB\xBFab").unwrap(), "ab");
        assert_eq!(decode_text(b"a\0b\0").unwrap(), "ab");
        assert_eq!(decode_text(b"\xFE\xFF\0a").unwrap(), "a");
        assert!(decode_text(b"\xFF\xFEa").is_err());
    }
}
