//! User accounts (`New-ADUser` / `Set-ADUser` / `Get-ADUser`).

use crate::json::{de_bool, de_opt_bool, de_opt_i64, de_string, from_ps, require_guid};
use crate::params::{relocate, Params};
use adp_core::flags::UacFlags;
use adp_core::ids::{container_from_dn, validate_guid};
use adp_core::AdResult;
use adp_winrm::{CommandOptions, PsCommand};
use serde::{Deserialize, Serialize};

/// String attributes beyond the identity ones: (struct accessor, cmdlet
/// parameter). Shared by create and update so both stay in step.
macro_rules! user_string_attrs {
    ($m:ident) => {
        $m!(given_name, "GivenName");
        $m!(surname, "Surname");
        $m!(initials, "Initials");
        $m!(description, "Description");
        $m!(email_address, "EmailAddress");
        $m!(title, "Title");
        $m!(department, "Department");
        $m!(company, "Company");
        $m!(office, "Office");
        $m!(office_phone, "OfficePhone");
        $m!(mobile_phone, "MobilePhone");
        $m!(home_phone, "HomePhone");
        $m!(street_address, "StreetAddress");
        $m!(city, "City");
        $m!(state, "State");
        $m!(postal_code, "PostalCode");
        $m!(country, "Country");
        $m!(home_directory, "HomeDirectory");
        $m!(home_drive, "HomeDrive");
        $m!(employee_id, "EmployeeID");
        $m!(employee_number, "EmployeeNumber");
    };
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: String,
    pub dn: String,
    /// CN of the object; defaults to the principal name.
    pub name: String,
    pub container: String,
    pub principal_name: String,
    pub sam_account_name: String,
    pub display_name: String,
    pub given_name: String,
    pub surname: String,
    pub initials: String,
    pub description: String,
    pub email_address: String,
    pub title: String,
    pub department: String,
    pub company: String,
    pub office: String,
    pub office_phone: String,
    pub mobile_phone: String,
    pub home_phone: String,
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub home_directory: String,
    pub home_drive: String,
    pub employee_id: String,
    pub employee_number: String,
    pub enabled: bool,
    pub password_never_expires: bool,
    pub cannot_change_password: bool,
    pub smart_card_logon_required: bool,
    pub trusted_for_delegation: bool,
    /// Write-only; never read back.
    #[serde(skip_serializing)]
    pub initial_password: String,
}

/// `Get-ADUser -Properties *` as serialised by `ConvertTo-Json`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct RawUser {
    #[serde(rename = "ObjectGUID", deserialize_with = "de_string")]
    object_guid: String,
    #[serde(deserialize_with = "de_string")]
    distinguished_name: String,
    #[serde(deserialize_with = "de_string")]
    name: String,
    #[serde(deserialize_with = "de_string")]
    user_principal_name: String,
    #[serde(deserialize_with = "de_string")]
    sam_account_name: String,
    #[serde(deserialize_with = "de_string")]
    display_name: String,
    #[serde(deserialize_with = "de_string")]
    given_name: String,
    #[serde(deserialize_with = "de_string")]
    surname: String,
    #[serde(deserialize_with = "de_string")]
    initials: String,
    #[serde(deserialize_with = "de_string")]
    description: String,
    #[serde(deserialize_with = "de_string")]
    email_address: String,
    #[serde(deserialize_with = "de_string")]
    title: String,
    #[serde(deserialize_with = "de_string")]
    department: String,
    #[serde(deserialize_with = "de_string")]
    company: String,
    #[serde(deserialize_with = "de_string")]
    office: String,
    #[serde(deserialize_with = "de_string")]
    office_phone: String,
    #[serde(deserialize_with = "de_string")]
    mobile_phone: String,
    #[serde(deserialize_with = "de_string")]
    home_phone: String,
    #[serde(deserialize_with = "de_string")]
    street_address: String,
    #[serde(deserialize_with = "de_string")]
    city: String,
    #[serde(deserialize_with = "de_string")]
    state: String,
    #[serde(deserialize_with = "de_string")]
    postal_code: String,
    #[serde(deserialize_with = "de_string")]
    country: String,
    #[serde(deserialize_with = "de_string")]
    home_directory: String,
    #[serde(deserialize_with = "de_string")]
    home_drive: String,
    #[serde(rename = "EmployeeID", deserialize_with = "de_string")]
    employee_id: String,
    #[serde(deserialize_with = "de_string")]
    employee_number: String,
    #[serde(deserialize_with = "de_bool")]
    enabled: bool,
    #[serde(deserialize_with = "de_bool")]
    password_never_expires: bool,
    #[serde(deserialize_with = "de_opt_bool")]
    cannot_change_password: Option<bool>,
    #[serde(deserialize_with = "de_bool")]
    smartcard_logon_required: bool,
    #[serde(deserialize_with = "de_bool")]
    trusted_for_delegation: bool,
    #[serde(rename = "userAccountControl", deserialize_with = "de_opt_i64")]
    user_account_control: Option<i64>,
}

impl User {
    fn cn(&self) -> &str {
        if self.name.is_empty() {
            &self.principal_name
        } else {
            &self.name
        }
    }

    /// `New-ADUser -Passthru ...`, JSON output.
    pub fn build_create(&self, options: &CommandOptions) -> AdResult<PsCommand> {
        let mut p = Params::new("New-ADUser")
            .raw("-Passthru")
            .string("Name", self.cn())
            .flag("CannotChangePassword", self.cannot_change_password)
            .flag("PasswordNeverExpires", self.password_never_expires)
            .flag("Enabled", self.enabled)
            .opt("SamAccountName", &self.sam_account_name)
            .opt("UserPrincipalName", &self.principal_name)
            .secret("AccountPassword", &self.initial_password)
            .opt("DisplayName", &self.display_name)
            .opt("Path", &self.container);

        macro_rules! emit {
            ($field:ident, $param:literal) => {
                p = p.opt($param, &self.$field);
            };
        }
        user_string_attrs!(emit);

        p = p
            .flag("SmartcardLogonRequired", self.smart_card_logon_required)
            .flag("TrustedForDelegation", self.trusted_for_delegation);
        Ok(p.into_command(&options.clone().json()))
    }

    /// Commands turning `prior` (observed) into `self`, in submission order.
    pub fn build_update(&self, prior: &User, options: &CommandOptions) -> AdResult<Vec<PsCommand>> {
        let id = validate_guid(&prior.id)?;
        let mut cmds = Vec::new();

        let mut p = Params::for_identity("Set-ADUser", &id)?
            .changed("SamAccountName", &prior.sam_account_name, &self.sam_account_name)
            .changed("UserPrincipalName", &prior.principal_name, &self.principal_name)
            .changed("DisplayName", &prior.display_name, &self.display_name);

        macro_rules! diff {
            ($field:ident, $param:literal) => {
                p = p.changed($param, &prior.$field, &self.$field);
            };
        }
        user_string_attrs!(diff);

        p = p
            .changed_flag("Enabled", prior.enabled, self.enabled)
            .changed_flag("PasswordNeverExpires", prior.password_never_expires, self.password_never_expires)
            .changed_flag("CannotChangePassword", prior.cannot_change_password, self.cannot_change_password)
            .changed_flag(
                "SmartcardLogonRequired",
                prior.smart_card_logon_required,
                self.smart_card_logon_required,
            )
            .changed_flag("TrustedForDelegation", prior.trusted_for_delegation, self.trusted_for_delegation);
        if !p.is_bare() {
            cmds.push(p.into_command(options));
        }

        if !self.initial_password.is_empty() && self.initial_password != prior.initial_password {
            cmds.push(
                Params::for_identity("Set-ADAccountPassword", &id)?
                    .raw("-Reset")
                    .secret("NewPassword", &self.initial_password)
                    .into_command(options),
            );
        }

        cmds.extend(relocate(
            &id,
            (prior.cn(), self.cn()),
            (&prior.container, &self.container),
            options,
        )?);
        Ok(cmds)
    }

    pub fn build_delete(id: &str, options: &CommandOptions) -> AdResult<PsCommand> {
        Ok(Params::for_identity("Remove-ADUser", id)?
            .raw("-Confirm:$false")
            .into_command(options))
    }

    pub fn build_read(id: &str, options: &CommandOptions) -> AdResult<PsCommand> {
        Ok(Params::for_identity("Get-ADUser", id)?
            .raw("-Properties *")
            .into_command(&options.clone().json()))
    }

    pub fn parse(json: &str) -> AdResult<User> {
        let raw: RawUser = from_ps(json)?;
        let id = require_guid(&raw.object_guid, "user")?;

        // Account flags come from userAccountControl when it was selected;
        // the ACL-backed CannotChangePassword property wins over its bit.
        let (enabled, password_never_expires, uac_cant_change) = match raw.user_account_control {
            Some(v) => {
                let f = UacFlags::decode(v as u32);
                (!f.disabled, f.password_never_expires, f.cannot_change_password)
            }
            None => (raw.enabled, raw.password_never_expires, false),
        };

        Ok(User {
            id,
            container: container_from_dn(&raw.distinguished_name),
            dn: raw.distinguished_name,
            name: raw.name,
            principal_name: raw.user_principal_name,
            sam_account_name: raw.sam_account_name,
            display_name: raw.display_name,
            given_name: raw.given_name,
            surname: raw.surname,
            initials: raw.initials,
            description: raw.description,
            email_address: raw.email_address,
            title: raw.title,
            department: raw.department,
            company: raw.company,
            office: raw.office,
            office_phone: raw.office_phone,
            mobile_phone: raw.mobile_phone,
            home_phone: raw.home_phone,
            street_address: raw.street_address,
            city: raw.city,
            state: raw.state,
            postal_code: raw.postal_code,
            country: raw.country,
            home_directory: raw.home_directory,
            home_drive: raw.home_drive,
            employee_id: raw.employee_id,
            employee_number: raw.employee_number,
            enabled,
            password_never_expires,
            cannot_change_password: raw.cannot_change_password.unwrap_or(uac_cant_change),
            smart_card_logon_required: raw.smartcard_logon_required,
            trusted_for_delegation: raw.trusted_for_delegation,
            initial_password: String::new(),
        })
    }

    /// Carry write-only inputs over from the desired state.
    pub fn with_write_only(mut self, desired: &User) -> User {
        self.initial_password = desired.initial_password.clone();
        self
    }
}
