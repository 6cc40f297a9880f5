//! Parameter fragment builder shared by the object codecs.

use adp_core::ids::validate_guid;
use adp_core::AdResult;
use adp_winrm::{ps_bool, quote, CommandOptions, PsCommand};

/// Ordered `-Name value` fragments for one cmdlet invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Params {
    fragments: Vec<String>,
    secrets: Vec<String>,
    /// Number of fragments that make up the cmdlet head (name, identity).
    head: usize,
}

impl Params {
    pub fn new(cmdlet: &str) -> Self {
        Self {
            fragments: vec![cmdlet.to_string()],
            secrets: Vec::new(),
            head: 1,
        }
    }

    /// `<cmdlet> -Identity "<guid>"`; the GUID is validated first.
    pub fn for_identity(cmdlet: &str, guid: &str) -> AdResult<Self> {
        let guid = validate_guid(guid)?;
        let mut p = Self::new(cmdlet);
        p.fragments.push(format!("-Identity {}", quote(&guid)));
        p.head = 2;
        Ok(p)
    }

    /// A verbatim fragment (switches like `-Passthru`, pre-built values).
    pub fn raw(mut self, fragment: impl Into<String>) -> Self {
        self.fragments.push(fragment.into());
        self
    }

    /// Emitted even when empty.
    pub fn string(self, name: &str, value: &str) -> Self {
        let f = format!("-{} {}", name, quote(value));
        self.raw(f)
    }

    /// Emitted only when non-empty.
    pub fn opt(self, name: &str, value: &str) -> Self {
        if value.is_empty() {
            self
        } else {
            self.string(name, value)
        }
    }

    pub fn flag(self, name: &str, value: bool) -> Self {
        let f = format!("-{} {}", name, ps_bool(value));
        self.raw(f)
    }

    /// A secure-string parameter whose plain value is hidden from logs.
    pub fn secret(mut self, name: &str, value: &str) -> Self {
        if value.is_empty() {
            return self;
        }
        self.secrets.push(value.to_string());
        self.raw(format!("-{} {}", name, adp_winrm::secure_string(value)))
    }

    /// Update form of a string attribute: nothing when unchanged, `$null`
    /// when cleared.
    pub fn changed(self, name: &str, old: &str, new: &str) -> Self {
        if old == new {
            self
        } else if new.is_empty() {
            let f = format!("-{} $null", name);
            self.raw(f)
        } else {
            self.string(name, new)
        }
    }

    pub fn changed_flag(self, name: &str, old: bool, new: bool) -> Self {
        if old == new {
            self
        } else {
            self.flag(name, new)
        }
    }

    /// True when nothing beyond the cmdlet head was added.
    pub fn is_bare(&self) -> bool {
        self.fragments.len() <= self.head
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn into_command(self, options: &CommandOptions) -> PsCommand {
        let mut cmd = PsCommand::new(options.clone()).args(self.fragments);
        for s in self.secrets {
            cmd = cmd.redact(s);
        }
        cmd
    }
}

/// `Rename-ADObject -Identity "<guid>" -NewName "<name>"`
pub fn rename_object(guid: &str, new_name: &str, options: &CommandOptions) -> AdResult<PsCommand> {
    Ok(Params::for_identity("Rename-ADObject", guid)?
        .string("NewName", new_name)
        .into_command(options))
}

/// `Move-ADObject -Identity "<guid>" -TargetPath "<container>"`
pub fn move_object(guid: &str, container: &str, options: &CommandOptions) -> AdResult<PsCommand> {
    Ok(Params::for_identity("Move-ADObject", guid)?
        .string("TargetPath", container)
        .into_command(options))
}

/// Rename and/or move commands for a directory object whose CN or parent
/// changed, in that order.
pub fn relocate(
    guid: &str,
    (old_name, new_name): (&str, &str),
    (old_container, new_container): (&str, &str),
    options: &CommandOptions,
) -> AdResult<Vec<PsCommand>> {
    let mut cmds = Vec::new();
    if old_name != new_name && !new_name.is_empty() {
        cmds.push(rename_object(guid, new_name, options)?);
    }
    if !old_container.eq_ignore_ascii_case(new_container) && !new_container.is_empty() {
        cmds.push(move_object(guid, new_container, options)?);
    }
    Ok(cmds)
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: &str = "5f1c3b8e-2d4a-4c6e-9b1f-0a2b3c4d5e6f";

    #[test]
    fn optional_values_are_skipped() {
        let p = Params::new("New-ADGroup").opt("Description", "").opt("Path", "OU=x");
        assert_eq!(p.fragments(), ["New-ADGroup", "-Path \"OU=x\""]);
    }

    #[test]
    fn cleared_values_become_null() {
        let p = Params::for_identity("Set-ADUser", G)
            .unwrap()
            .changed("Title", "a", "a")
            .changed("Office", "a", "")
            .changed("City", "", "Oslo");
        assert_eq!(
            p.fragments()[1..],
            [format!("-Identity \"{}\"", G), "-Office $null".into(), "-City \"Oslo\"".into()]
        );
    }

    #[test]
    fn bare_update_is_detected() {
        let p = Params::for_identity("Set-ADUser", G).unwrap().changed_flag("Enabled", true, true);
        assert!(p.is_bare());
        assert!(!p.changed_flag("Enabled", true, false).is_bare());
    }

    #[test]
    fn identity_must_be_a_guid() {
        assert!(Params::for_identity("Remove-ADUser", "CN=x").is_err());
    }

    #[test]
    fn secrets_are_redacted() {
        let cmd = Params::new("New-ADUser")
            .secret("AccountPassword", "Hunter2!")
            .into_command(&CommandOptions::default());
        let r = cmd.render();
        assert!(r.script.contains("Hunter2!"));
        assert!(!r.redacted.contains("Hunter2!"));
    }

    #[test]
    fn relocation_order() {
        let cmds = relocate(G, ("a", "b"), ("OU=x", "OU=y"), &CommandOptions::default()).unwrap();
        assert_eq!(cmds.len(), 2);
        assert!(cmds[0].render().script.starts_with("Rename-ADObject"));
        assert!(cmds[1].render().script.starts_with("Move-ADObject"));
        let none = relocate(G, ("a", "a"), ("OU=x", "ou=X"), &CommandOptions::default()).unwrap();
        assert!(none.is_empty());
    }
}
