//! Users and groups managed directly over LDAP.

use crate::client::{first_bytes, first_value, Attrs, DirectoryOps};
use crate::encoding::{build_dn, container_dn, encode_password, escape_rdn_value, guid_filter, guid_from_bytes};
use adp_core::flags::{decode_group_type, encode_group_type, group_type_to_ldap, UacFlags};
use adp_core::ids::container_from_dn;
use adp_core::{AdError, AdResult};
use adp_objects::{Group, User};
use ldap3::{Mod, Scope, SearchEntry};
use log::{debug, info};
use std::collections::HashSet;

pub const UAC_SMARTCARD_REQUIRED: u32 = 0x4_0000;
pub const UAC_TRUSTED_FOR_DELEGATION: u32 = 0x8_0000;

/// Container for new users and groups when none is given.
pub const DEFAULT_CONTAINER: &str = "Users";

const ALL_ATTRS: &[&str] = &["*"];

/// User string attributes and their LDAP names.
macro_rules! user_ldap_attrs {
    ($m:ident) => {
        $m!(display_name, "displayName");
        $m!(given_name, "givenName");
        $m!(surname, "sn");
        $m!(initials, "initials");
        $m!(description, "description");
        $m!(email_address, "mail");
        $m!(title, "title");
        $m!(department, "department");
        $m!(company, "company");
        $m!(office, "physicalDeliveryOfficeName");
        $m!(office_phone, "telephoneNumber");
        $m!(mobile_phone, "mobile");
        $m!(home_phone, "homePhone");
        $m!(street_address, "streetAddress");
        $m!(city, "l");
        $m!(state, "st");
        $m!(postal_code, "postalCode");
        $m!(country, "c");
        $m!(home_directory, "homeDirectory");
        $m!(home_drive, "homeDrive");
        $m!(employee_id, "employeeID");
        $m!(employee_number, "employeeNumber");
    };
}

fn text(value: &str) -> Vec<Vec<u8>> {
    vec![value.as_bytes().to_vec()]
}

fn replace(attr: &str, value: &str) -> Mod<Vec<u8>> {
    let values: HashSet<Vec<u8>> = if value.is_empty() {
        HashSet::new()
    } else {
        HashSet::from([value.as_bytes().to_vec()])
    };
    Mod::Replace(attr.as_bytes().to_vec(), values)
}

fn replace_bytes(attr: &str, value: Vec<u8>) -> Mod<Vec<u8>> {
    Mod::Replace(attr.as_bytes().to_vec(), HashSet::from([value]))
}

fn value(entry: &SearchEntry, attr: &str) -> String {
    first_value(entry, attr).unwrap_or_default()
}

fn entry_guid(entry: &SearchEntry) -> AdResult<String> {
    let raw = first_bytes(entry, "objectGUID")
        .ok_or_else(|| AdError::invariant(format!("{} has no objectGUID", entry.dn)))?;
    guid_from_bytes(&raw)
}

// ─── Users ───────────────────────────────────────────────────────────────────

fn user_cn(user: &User) -> &str {
    if user.name.is_empty() {
        &user.principal_name
    } else {
        &user.name
    }
}

/// `userAccountControl` for the user's flags.
pub fn user_account_control(user: &User) -> u32 {
    let mut uac = UacFlags {
        disabled: !user.enabled,
        password_never_expires: user.password_never_expires,
        cannot_change_password: user.cannot_change_password,
    }
    .encode();
    if user.smart_card_logon_required {
        uac |= UAC_SMARTCARD_REQUIRED;
    }
    if user.trusted_for_delegation {
        uac |= UAC_TRUSTED_FOR_DELEGATION;
    }
    uac
}

/// Attributes of an add request for `user`.
pub fn user_attributes(user: &User) -> Attrs {
    let mut attrs: Attrs = vec![
        ("objectClass".into(), vec![b"top".to_vec(), b"person".to_vec(), b"organizationalPerson".to_vec(), b"user".to_vec()]),
        ("cn".into(), text(user_cn(user))),
    ];
    if !user.sam_account_name.is_empty() {
        attrs.push(("sAMAccountName".into(), text(&user.sam_account_name)));
    }
    if !user.principal_name.is_empty() {
        attrs.push(("userPrincipalName".into(), text(&user.principal_name)));
    }
    macro_rules! push_attr {
        ($field:ident, $attr:literal) => {
            if !user.$field.is_empty() {
                attrs.push(($attr.into(), text(&user.$field)));
            }
        };
    }
    user_ldap_attrs!(push_attr);
    if !user.initial_password.is_empty() {
        attrs.push(("unicodePwd".into(), vec![encode_password(&user.initial_password)]));
    }
    attrs.push((
        "userAccountControl".into(),
        text(&user_account_control(user).to_string()),
    ));
    attrs
}

/// Attribute changes from `prior` to `desired`; identity changes (name,
/// container) are a modify-DN and are not included.
pub fn user_modifications(prior: &User, desired: &User) -> Vec<Mod<Vec<u8>>> {
    let mut mods = Vec::new();
    if prior.sam_account_name != desired.sam_account_name && !desired.sam_account_name.is_empty() {
        mods.push(replace("sAMAccountName", &desired.sam_account_name));
    }
    if prior.principal_name != desired.principal_name {
        mods.push(replace("userPrincipalName", &desired.principal_name));
    }
    macro_rules! diff_attr {
        ($field:ident, $attr:literal) => {
            if prior.$field != desired.$field {
                mods.push(replace($attr, &desired.$field));
            }
        };
    }
    user_ldap_attrs!(diff_attr);
    let uac = user_account_control(desired);
    if user_account_control(prior) != uac {
        mods.push(replace("userAccountControl", &uac.to_string()));
    }
    if !desired.initial_password.is_empty() && prior.initial_password != desired.initial_password {
        mods.push(replace_bytes("unicodePwd", encode_password(&desired.initial_password)));
    }
    mods
}

pub fn user_from_entry(entry: &SearchEntry) -> AdResult<User> {
    let uac: u32 = value(entry, "userAccountControl").parse().unwrap_or(0);
    let flags = UacFlags::decode(uac);
    let mut user = User {
        id: entry_guid(entry)?,
        dn: entry.dn.clone(),
        name: value(entry, "cn"),
        container: container_from_dn(&entry.dn),
        principal_name: value(entry, "userPrincipalName"),
        sam_account_name: value(entry, "sAMAccountName"),
        enabled: !flags.disabled,
        password_never_expires: flags.password_never_expires,
        cannot_change_password: flags.cannot_change_password,
        smart_card_logon_required: uac & UAC_SMARTCARD_REQUIRED != 0,
        trusted_for_delegation: uac & UAC_TRUSTED_FOR_DELEGATION != 0,
        ..Default::default()
    };
    macro_rules! read_attr {
        ($field:ident, $attr:literal) => {
            user.$field = value(entry, $attr);
        };
    }
    user_ldap_attrs!(read_attr);
    Ok(user)
}

// ─── Groups ──────────────────────────────────────────────────────────────────

fn group_sam(group: &Group) -> &str {
    if group.sam_account_name.is_empty() {
        &group.name
    } else {
        &group.sam_account_name
    }
}

fn group_type(group: &Group) -> String {
    group_type_to_ldap(encode_group_type(group.scope, group.category)).to_string()
}

pub fn group_attributes(group: &Group) -> Attrs {
    let mut attrs: Attrs = vec![
        ("objectClass".into(), vec![b"top".to_vec(), b"group".to_vec()]),
        ("cn".into(), text(&group.name)),
        ("sAMAccountName".into(), text(group_sam(group))),
        ("groupType".into(), text(&group_type(group))),
    ];
    if !group.description.is_empty() {
        attrs.push(("description".into(), text(&group.description)));
    }
    attrs
}

pub fn group_modifications(prior: &Group, desired: &Group) -> Vec<Mod<Vec<u8>>> {
    let mut mods = Vec::new();
    if group_sam(prior) != group_sam(desired) {
        mods.push(replace("sAMAccountName", group_sam(desired)));
    }
    if group_type(prior) != group_type(desired) {
        mods.push(replace("groupType", &group_type(desired)));
    }
    if prior.description != desired.description {
        mods.push(replace("description", &desired.description));
    }
    mods
}

pub fn group_from_entry(entry: &SearchEntry) -> AdResult<Group> {
    let raw = value(entry, "groupType");
    let bits: i64 = raw
        .parse()
        .map_err(|_| AdError::parse(format!("invalid groupType '{}' on {}", raw, entry.dn)))?;
    let (scope, category) = decode_group_type(bits)?;
    Ok(Group {
        id: entry_guid(entry)?,
        dn: entry.dn.clone(),
        name: value(entry, "cn"),
        container: container_from_dn(&entry.dn),
        sam_account_name: value(entry, "sAMAccountName"),
        scope,
        category,
        description: value(entry, "description"),
    })
}

// ─── Back-end ────────────────────────────────────────────────────────────────

/// User and group CRUD against one domain.
pub struct LdapDirectory<D> {
    ops: D,
    domain_dn: String,
    tls: bool,
}

impl<D: DirectoryOps> LdapDirectory<D> {
    /// `tls` tells whether the connection is encrypted; AD only accepts
    /// password writes over TLS.
    pub fn new(ops: D, domain_dn: impl Into<String>, tls: bool) -> Self {
        Self {
            ops,
            domain_dn: domain_dn.into(),
            tls,
        }
    }

    /// Use `domain_dn` when given, else the directory's default naming
    /// context.
    pub async fn discover(ops: D, domain_dn: Option<&str>, tls: bool) -> AdResult<Self> {
        let domain_dn = match domain_dn {
            Some(dn) if !dn.is_empty() => dn.to_string(),
            _ => ops.default_naming_context().await?,
        };
        debug!("LDAP back-end using base {}", domain_dn);
        Ok(Self::new(ops, domain_dn, tls))
    }

    pub fn domain_dn(&self) -> &str {
        &self.domain_dn
    }

    fn parent_dn(&self, container: &str) -> String {
        if container.trim().is_empty() {
            container_dn(DEFAULT_CONTAINER, &self.domain_dn)
        } else {
            container_dn(container, &self.domain_dn)
        }
    }

    fn check_password_transport(&self, password: &str) -> AdResult<()> {
        if !password.is_empty() && !self.tls {
            return Err(AdError::validation(
                "setting a password over LDAP requires ldaps",
            ));
        }
        Ok(())
    }

    async fn find(&self, guid: &str) -> AdResult<SearchEntry> {
        let filter = guid_filter(guid)?;
        self.ops
            .search_one(&self.domain_dn, Scope::Subtree, &filter, ALL_ATTRS)
            .await
    }

    async fn entry_at(&self, dn: &str) -> AdResult<SearchEntry> {
        self.ops
            .search_one(dn, Scope::Base, "(objectClass=*)", ALL_ATTRS)
            .await
    }

    /// Modify DN when the name or the container changed. Returns the DN the
    /// object has afterwards.
    async fn relocate(&self, dn: &str, old: (&str, &str), new: (&str, &str)) -> AdResult<String> {
        let (old_name, old_container) = old;
        let (new_name, new_container) = new;
        let renamed = !new_name.is_empty() && old_name != new_name;
        let moved = !new_container.trim().is_empty()
            && !self.parent_dn(old_container).eq_ignore_ascii_case(&self.parent_dn(new_container));
        if !renamed && !moved {
            return Ok(dn.to_string());
        }
        let name = if renamed { new_name } else { old_name };
        let rdn = format!("CN={}", escape_rdn_value(name));
        let parent = if moved {
            self.parent_dn(new_container)
        } else {
            container_from_dn(dn)
        };
        self.ops
            .rename(dn, &rdn, if moved { Some(parent.as_str()) } else { None })
            .await?;
        Ok(format!("{},{}", rdn, parent))
    }

    pub async fn create_user(&self, user: &User) -> AdResult<User> {
        self.check_password_transport(&user.initial_password)?;
        let dn = build_dn(user_cn(user), &self.parent_dn(&user.container), &self.domain_dn);
        self.ops.add(&dn, user_attributes(user)).await?;
        info!("Created user {}", dn);
        user_from_entry(&self.entry_at(&dn).await?)
    }

    pub async fn read_user(&self, guid: &str) -> AdResult<User> {
        user_from_entry(&self.find(guid).await?)
    }

    pub async fn update_user(&self, prior: &User, desired: &User) -> AdResult<User> {
        if prior.initial_password != desired.initial_password {
            self.check_password_transport(&desired.initial_password)?;
        }
        let current = self.read_user(&prior.id).await?;
        self.ops
            .modify(&current.dn, user_modifications(prior, desired))
            .await?;
        self.relocate(
            &current.dn,
            (&current.name, &current.container),
            (&desired.name, &desired.container),
        )
        .await?;
        self.read_user(&prior.id).await
    }

    pub async fn delete_user(&self, guid: &str) -> AdResult<()> {
        let entry = self.find(guid).await?;
        self.ops.delete(&entry.dn).await?;
        info!("Deleted user {}", entry.dn);
        Ok(())
    }

    pub async fn create_group(&self, group: &Group) -> AdResult<Group> {
        if group.name.is_empty() {
            return Err(AdError::validation("group name must not be empty"));
        }
        let dn = build_dn(&group.name, &self.parent_dn(&group.container), &self.domain_dn);
        self.ops.add(&dn, group_attributes(group)).await?;
        info!("Created group {}", dn);
        group_from_entry(&self.entry_at(&dn).await?)
    }

    pub async fn read_group(&self, guid: &str) -> AdResult<Group> {
        group_from_entry(&self.find(guid).await?)
    }

    pub async fn update_group(&self, prior: &Group, desired: &Group) -> AdResult<Group> {
        let current = self.read_group(&prior.id).await?;
        self.ops
            .modify(&current.dn, group_modifications(&current, desired))
            .await?;
        self.relocate(
            &current.dn,
            (&current.name, &current.container),
            (&desired.name, &desired.container),
        )
        .await?;
        self.read_group(&prior.id).await
    }

    pub async fn delete_group(&self, guid: &str) -> AdResult<()> {
        let entry = self.find(guid).await?;
        self.ops.delete(&entry.dn).await?;
        info!("Deleted group {}", entry.dn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{escape_filter_bytes, guid_to_bytes};
    use adp_core::flags::{GroupCategory, GroupScope};
    use std::collections::HashMap;
    use std::sync::Mutex;

    const DOMAIN: &str = "DC=x,DC=com";

    /// A flat in-memory directory keyed by lowercased DN.
    #[derive(Default)]
    struct MemoryDirectory {
        entries: Mutex<HashMap<String, (String, HashMap<String, Vec<Vec<u8>>>)>>,
        next: Mutex<u8>,
    }

    fn to_entry(dn: &str, attrs: &HashMap<String, Vec<Vec<u8>>>) -> SearchEntry {
        let mut entry = SearchEntry {
            dn: dn.to_string(),
            attrs: HashMap::new(),
            bin_attrs: HashMap::new(),
        };
        for (k, values) in attrs {
            if k == "objectGUID" || k == "unicodePwd" {
                entry.bin_attrs.insert(k.clone(), values.clone());
            } else {
                entry.attrs.insert(
                    k.clone(),
                    values.iter().map(|v| String::from_utf8_lossy(v).into_owned()).collect(),
                );
            }
        }
        entry
    }

    #[async_trait::async_trait]
    impl DirectoryOps for MemoryDirectory {
        async fn search(&self, base: &str, scope: Scope, filter: &str, _attrs: &[&str]) -> AdResult<Vec<SearchEntry>> {
            let entries = self.entries.lock().unwrap();
            Ok(match scope {
                Scope::Base => entries
                    .get(&base.to_lowercase())
                    .map(|(dn, attrs)| vec![to_entry(dn, attrs)])
                    .unwrap_or_default(),
                _ => entries
                    .values()
                    .filter(|(_, attrs)| {
                        attrs
                            .get("objectGUID")
                            .map(|g| filter.contains(&escape_filter_bytes(&g[0])))
                            .unwrap_or(false)
                    })
                    .map(|(dn, attrs)| to_entry(dn, attrs))
                    .collect(),
            })
        }

        async fn add(&self, dn: &str, attrs: Attrs) -> AdResult<()> {
            let mut entries = self.entries.lock().unwrap();
            if entries.contains_key(&dn.to_lowercase()) {
                return Err(AdError::conflict(format!("object already exists: {}", dn)));
            }
            let mut next = self.next.lock().unwrap();
            *next += 1;
            let mut map: HashMap<String, Vec<Vec<u8>>> = attrs.into_iter().collect();
            map.insert("objectGUID".into(), vec![vec![*next; 16]]);
            entries.insert(dn.to_lowercase(), (dn.to_string(), map));
            Ok(())
        }

        async fn modify(&self, dn: &str, mods: Vec<Mod<Vec<u8>>>) -> AdResult<()> {
            let mut entries = self.entries.lock().unwrap();
            let (_, attrs) = entries
                .get_mut(&dn.to_lowercase())
                .ok_or_else(|| AdError::not_found(dn.to_string()))?;
            for m in mods {
                if let Mod::Replace(attr, values) = m {
                    let attr = String::from_utf8(attr).unwrap();
                    if values.is_empty() {
                        attrs.remove(&attr);
                    } else {
                        attrs.insert(attr, values.into_iter().collect());
                    }
                }
            }
            Ok(())
        }

        async fn rename(&self, dn: &str, new_rdn: &str, new_parent: Option<&str>) -> AdResult<()> {
            let mut entries = self.entries.lock().unwrap();
            let (_, mut attrs) = entries
                .remove(&dn.to_lowercase())
                .ok_or_else(|| AdError::not_found(dn.to_string()))?;
            let parent = new_parent.map(str::to_string).unwrap_or_else(|| container_from_dn(dn));
            let new_dn = format!("{},{}", new_rdn, parent);
            attrs.insert("cn".into(), vec![new_rdn.trim_start_matches("CN=").as_bytes().to_vec()]);
            entries.insert(new_dn.to_lowercase(), (new_dn, attrs));
            Ok(())
        }

        async fn delete(&self, dn: &str) -> AdResult<()> {
            self.entries
                .lock()
                .unwrap()
                .remove(&dn.to_lowercase())
                .map(|_| ())
                .ok_or_else(|| AdError::not_found(dn.to_string()))
        }
    }

    fn directory(tls: bool) -> LdapDirectory<MemoryDirectory> {
        LdapDirectory::new(MemoryDirectory::default(), DOMAIN, tls)
    }

    fn alice() -> User {
        User {
            principal_name: "alice@x.com".into(),
            sam_account_name: "alice".into(),
            display_name: "Alice".into(),
            enabled: true,
            initial_password: "P@ss".into(),
            ..Default::default()
        }
    }

    #[test]
    fn uac_composition() {
        let mut u = alice();
        assert_eq!(user_account_control(&u), 0x200);
        u.enabled = false;
        u.password_never_expires = true;
        u.smart_card_logon_required = true;
        assert_eq!(user_account_control(&u), 0x200 | 0x2 | 0x1_0000 | 0x4_0000);
    }

    #[test]
    fn user_add_request() {
        let attrs: HashMap<String, Vec<Vec<u8>>> = user_attributes(&alice()).into_iter().collect();
        assert_eq!(attrs["cn"], vec![b"alice@x.com".to_vec()]);
        assert_eq!(attrs["userAccountControl"], vec![b"512".to_vec()]);
        assert_eq!(attrs["unicodePwd"], vec![encode_password("P@ss")]);
        assert!(!attrs.contains_key("mail"));
    }

    #[test]
    fn group_type_attribute_is_signed() {
        let g = Group {
            id: String::new(),
            dn: String::new(),
            name: "ops".into(),
            container: String::new(),
            sam_account_name: String::new(),
            scope: GroupScope::Global,
            category: GroupCategory::Security,
            description: String::new(),
        };
        let attrs: HashMap<String, Vec<Vec<u8>>> = group_attributes(&g).into_iter().collect();
        assert_eq!(attrs["groupType"], vec![b"-2147483646".to_vec()]);
        assert_eq!(attrs["sAMAccountName"], vec![b"ops".to_vec()]);
    }

    #[tokio::test]
    async fn password_needs_tls() {
        let err = directory(false).create_user(&alice()).await.unwrap_err();
        assert_eq!(err.kind, adp_core::AdErrorKind::Validation);
    }

    #[tokio::test]
    async fn user_lifecycle() {
        let dir = directory(true);
        let created = dir.create_user(&alice()).await.unwrap();
        assert_eq!(created.dn, "CN=alice@x.com,CN=Users,DC=x,DC=com");
        assert_eq!(created.id, guid_from_bytes(&[1; 16]).unwrap());
        assert!(created.enabled);
        assert_eq!(created.display_name, "Alice");
        assert!(created.initial_password.is_empty());

        let mut desired = created.clone();
        desired.display_name = "Alice B".into();
        desired.enabled = false;
        desired.name = "alice".into();
        desired.container = "OU=Staff,DC=x,DC=com".into();
        let updated = dir.update_user(&created, &desired).await.unwrap();
        assert_eq!(updated.dn, "CN=alice,OU=Staff,DC=x,DC=com");
        assert_eq!(updated.display_name, "Alice B");
        assert!(!updated.enabled);

        dir.delete_user(&created.id).await.unwrap();
        assert!(dir.read_user(&created.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn group_lifecycle() {
        let dir = directory(false);
        let g = Group {
            id: String::new(),
            dn: String::new(),
            name: "ops".into(),
            container: String::new(),
            sam_account_name: String::new(),
            scope: GroupScope::Global,
            category: GroupCategory::Security,
            description: "Operators".into(),
        };
        let created = dir.create_group(&g).await.unwrap();
        assert_eq!((created.scope, created.category), (GroupScope::Global, GroupCategory::Security));
        assert_eq!(created.description, "Operators");

        let mut desired = created.clone();
        desired.scope = GroupScope::Universal;
        desired.description = String::new();
        let updated = dir.update_group(&created, &desired).await.unwrap();
        assert_eq!(updated.scope, GroupScope::Universal);
        assert!(updated.description.is_empty());

        assert_eq!(
            dir.create_group(&g).await.unwrap_err().kind,
            adp_core::AdErrorKind::Conflict
        );
        dir.delete_group(&created.id).await.unwrap();
        assert!(dir.delete_group(&created.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn duplicate_guid_matches_are_rejected() {
        let dir = directory(false);
        let ops = &dir.ops;
        for dn in ["CN=a,DC=x,DC=com", "CN=b,DC=x,DC=com"] {
            ops.add(dn, vec![("cn".into(), text("a"))]).await.unwrap();
        }
        for (_, attrs) in ops.entries.lock().unwrap().values_mut() {
            attrs.insert("objectGUID".into(), vec![guid_to_bytes("01234567-89ab-cdef-0123-456789abcdef").unwrap().to_vec()]);
        }
        let err = dir.read_user("01234567-89ab-cdef-0123-456789abcdef").await.unwrap_err();
        assert_eq!(err.kind, adp_core::AdErrorKind::InvariantViolation);
    }
}
