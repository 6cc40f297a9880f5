//! PowerShell command construction.
//!
//! A [`PsCommand`] is an ordered list of script fragments plus rendering
//! options. Every caller-supplied string must go through [`escape`] (or one
//! of the quoting helpers built on it) before it becomes a fragment.

use adp_core::Settings;
use base64::Engine;

pub const REDACTED: &str = "<REDACTED>";

/// Rendering options.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CommandOptions {
    /// Run through a local PowerShell process instead of the pool.
    pub exec_locally: bool,
    /// Wrap single-object JSON output in an array.
    pub force_array: bool,
    /// Wrap the script in `Invoke-Command` (only with `pass_credentials`).
    pub invoke_command: bool,
    /// Append `| ConvertTo-Json`.
    pub json_output: bool,
    /// Inject a `PSCredential` built from `username`/`password`.
    pub pass_credentials: bool,
    pub skip_cred_prefix: bool,
    pub skip_cred_suffix: bool,
    /// Target of `-Server`/`-ComputerName`.
    pub server: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for CommandOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandOptions")
            .field("exec_locally", &self.exec_locally)
            .field("force_array", &self.force_array)
            .field("invoke_command", &self.invoke_command)
            .field("json_output", &self.json_output)
            .field("pass_credentials", &self.pass_credentials)
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &REDACTED)
            .finish()
    }
}

impl CommandOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            exec_locally: settings.is_local(),
            pass_credentials: settings.pass_credentials,
            server: settings.target_server().to_string(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            ..Default::default()
        }
    }

    pub fn json(mut self) -> Self {
        self.json_output = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.force_array = true;
        self
    }

    pub fn invoke(mut self) -> Self {
        self.invoke_command = true;
        self
    }

    pub fn without_cred_prefix(mut self) -> Self {
        self.skip_cred_prefix = true;
        self
    }

    pub fn without_cred_suffix(mut self) -> Self {
        self.skip_cred_suffix = true;
        self
    }
}

/// A script and its log-safe copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCommand {
    pub script: String,
    pub redacted: String,
}

/// Immutable PowerShell command.
#[derive(Debug, Clone)]
pub struct PsCommand {
    fragments: Vec<String>,
    options: CommandOptions,
    secrets: Vec<String>,
}

impl PsCommand {
    pub fn new(options: CommandOptions) -> Self {
        Self {
            fragments: Vec::new(),
            options,
            secrets: Vec::new(),
        }
    }

    /// Append a fragment verbatim.
    pub fn arg(mut self, fragment: impl Into<String>) -> Self {
        self.fragments.push(fragment.into());
        self
    }

    pub fn args<I, S>(mut self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fragments.extend(fragments.into_iter().map(Into::into));
        self
    }

    /// Hide `secret` from the log copy in addition to the credential password.
    pub fn redact(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    pub fn options(&self) -> &CommandOptions {
        &self.options
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn render(&self) -> RenderedCommand {
        let o = &self.options;
        let mut frags = self.fragments.clone();

        if o.invoke_command && o.pass_credentials {
            if o.json_output {
                frags.push("| ConvertTo-Json".to_string());
            }
            frags = vec![format!(
                "Invoke-Command -Authentication Kerberos -ScriptBlock {{ {} }}",
                frags.join(" ")
            )];
        }

        if o.pass_credentials && !o.skip_cred_prefix {
            let mut prefixed = vec![
                format!(
                    "$Password = ConvertTo-SecureString -String {} -AsPlainText -Force;",
                    quote(&o.password)
                ),
                format!("$Username = {};", quote(&o.username)),
                "$Credential = New-Object System.Management.Automation.PSCredential -ArgumentList $Username, $Password;"
                    .to_string(),
            ];
            prefixed.append(&mut frags);
            frags = prefixed;
        }

        if o.pass_credentials && !o.skip_cred_suffix {
            frags.push("-Credential $Credential".to_string());
        }

        if o.pass_credentials && !o.server.is_empty() {
            if o.invoke_command {
                frags.push(format!("-Computername {}", quote(&o.server)));
            } else {
                frags.push(format!("-Server {}", quote(&o.server)));
            }
        }

        if !o.invoke_command && o.json_output {
            frags.push("| ConvertTo-Json".to_string());
        }

        let script = frags.join(" ");
        let mut redacted = script.clone();
        for secret in std::iter::once(&o.password).chain(self.secrets.iter()) {
            if secret.is_empty() {
                continue;
            }
            redacted = redacted.replace(&escape(secret), REDACTED);
            redacted = redacted.replace(secret.as_str(), REDACTED);
        }

        RenderedCommand { script, redacted }
    }
}

// ─── Escaping helpers ────────────────────────────────────────────────────────

/// Escape a value for the inside of a double-quoted PowerShell string.
///
/// Backtick escapes and `$([char]0xNN)` subexpressions are only expanded
/// between double quotes; in a single-quoted string they stay literal.
/// Private so every caller goes through [`quote`], which adds the quotes.
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '`' => out.push_str("``"),
            '"' => out.push_str("`\""),
            '$' => out.push_str("`$"),
            // PowerShell also closes strings on typographic double quotes.
            '\u{201C}' | '\u{201D}' | '\u{201E}' => {
                out.push('`');
                out.push(c);
            }
            '\0' => out.push_str("`0"),
            '\x07' => out.push_str("`a"),
            '\x08' => out.push_str("`b"),
            '\x0c' => out.push_str("`f"),
            '\n' => out.push_str("`n"),
            '\r' => out.push_str("`r"),
            '\t' => out.push_str("`t"),
            '\x0b' => out.push_str("`v"),
            c if c.is_control() => out.push_str(&format!("$([char]0x{:x})", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// `"<escaped>"`
pub fn quote(s: &str) -> String {
    format!("\"{}\"", escape(s))
}

/// `@("a","b")`
pub fn ps_array<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let quoted: Vec<String> = items.into_iter().map(|s| quote(s.as_ref())).collect();
    format!("@({})", quoted.join(","))
}

pub fn ps_bool(b: bool) -> &'static str {
    if b {
        "$true"
    } else {
        "$false"
    }
}

/// `(ConvertTo-SecureString -AsPlainText "<pw>" -Force)`
pub fn secure_string(password: &str) -> String {
    format!("(ConvertTo-SecureString -AsPlainText {} -Force)", quote(password))
}

/// UTF-16LE + base64, the form `-EncodedCommand` expects.
pub fn encode_powershell(script: &str) -> String {
    let utf16: Vec<u8> = script
        .encode_utf16()
        .flat_map(|c| c.to_le_bytes())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&utf16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> CommandOptions {
        CommandOptions {
            pass_credentials: true,
            server: "dc1".into(),
            username: "CORP\\admin".into(),
            password: "S3cr\"t$".into(),
            ..Default::default()
        }
    }

    #[test]
    fn plain_json_command() {
        let cmd = PsCommand::new(CommandOptions::default().json())
            .arg("Get-ADUser")
            .arg("-Identity")
            .arg(quote("abc"));
        assert_eq!(cmd.render().script, "Get-ADUser -Identity \"abc\" | ConvertTo-Json");
    }

    #[test]
    fn credential_prefix_suffix_and_server() {
        let cmd = PsCommand::new(creds().json()).arg("Get-ADGroup -Identity \"g\"");
        let script = cmd.render().script;
        assert_eq!(
            script,
            "$Password = ConvertTo-SecureString -String \"S3cr`\"t`$\" -AsPlainText -Force; \
             $Username = \"CORP\\admin\"; \
             $Credential = New-Object System.Management.Automation.PSCredential -ArgumentList $Username, $Password; \
             Get-ADGroup -Identity \"g\" -Credential $Credential -Server \"dc1\" | ConvertTo-Json"
        );
    }

    #[test]
    fn invoke_command_wrapping() {
        let cmd = PsCommand::new(creds().json().invoke()).arg("Get-GPO -Guid \"x\"");
        let script = cmd.render().script;
        assert!(script.contains(
            "Invoke-Command -Authentication Kerberos -ScriptBlock { Get-GPO -Guid \"x\" | ConvertTo-Json } -Credential $Credential -Computername \"dc1\""
        ));
        assert!(!script.ends_with("| ConvertTo-Json"));
    }

    #[test]
    fn invoke_without_credentials_is_plain() {
        let cmd = PsCommand::new(CommandOptions::default().invoke()).arg("Get-GPO");
        assert_eq!(cmd.render().script, "Get-GPO");
    }

    #[test]
    fn skip_flags() {
        let cmd = PsCommand::new(creds().without_cred_prefix().without_cred_suffix()).arg("Remove-Item x");
        assert_eq!(cmd.render().script, "Remove-Item x -Server \"dc1\"");
    }

    #[test]
    fn redaction_hides_passwords() {
        let cmd = PsCommand::new(creds())
            .arg(format!("-AccountPassword {}", secure_string("Init!al$1")))
            .redact("Init!al$1");
        let rendered = cmd.render();
        assert!(rendered.script.contains("S3cr`\"t`$"));
        for secret in ["S3cr\"t$", "S3cr`\"t`$", "Init!al$1", "Init!al`$1"] {
            assert!(!rendered.redacted.contains(secret), "{}", secret);
        }
        assert!(rendered.redacted.contains(REDACTED));
    }

    #[test]
    fn redaction_of_plain_password() {
        for password in ["password", "p\"a`$b", "`$x\"", "tab\there"] {
            let opts = CommandOptions {
                pass_credentials: true,
                password: password.into(),
                ..Default::default()
            };
            let rendered = PsCommand::new(opts).arg("Get-ADUser x").render();
            assert!(rendered.script.contains(&quote(password)), "{}", password);
            assert!(!rendered.redacted.contains(password), "{}", password);
            assert!(!rendered.redacted.contains(&escape(password)), "{}", password);
            assert!(
                rendered.redacted.contains(&format!("-String \"{}\" -AsPlainText", REDACTED)),
                "{}",
                rendered.redacted
            );
        }
    }

    #[test]
    fn escape_rules() {
        assert_eq!(escape("a`b"), "a``b");
        assert_eq!(escape("say \"hi\""), "say `\"hi`\"");
        assert_eq!(escape("$env:PATH"), "`$env:PATH");
        assert_eq!(escape("a\nb\r\tc"), "a`nb`r`tc");
        assert_eq!(escape("\0\x07\x08\x0c\x0b"), "`0`a`b`f`v");
        assert_eq!(escape("\x1f"), "$([char]0x1f)");
        assert_eq!(escape("\u{201C}x\u{201D}"), "`\u{201C}x`\u{201D}");
        assert_eq!(escape("plain name"), "plain name");
    }

    #[test]
    fn quoting_always_uses_double_quotes() {
        assert_eq!(quote("\x1f"), "\"$([char]0x1f)\"");
        assert_eq!(quote("it's"), "\"it's\"");
        assert_eq!(ps_array(["a\x01", "b"]), "@(\"$([char]0x1)\",\"b\")");
        assert!(secure_string("\x02").contains("\"$([char]0x2)\""));
    }

    #[test]
    fn escaped_output_has_no_raw_specials() {
        let nasty = "x\"; Remove-ADUser -Identity $admin `n \x00\x1f\r\n";
        let escaped = escape(nasty);
        assert!(!escaped.chars().any(|c| c.is_control()));
        let chars: Vec<char> = escaped.chars().collect();
        let mut backticks = 0usize;
        for (i, c) in chars.iter().enumerate() {
            match c {
                '`' => backticks += 1,
                '"' => assert!(backticks % 2 == 1, "unescaped quote at {}", i),
                '$' => assert!(
                    backticks % 2 == 1 || escaped[..].chars().skip(i).collect::<String>().starts_with("$([char]0x"),
                    "unescaped dollar at {}",
                    i
                ),
                _ => {}
            }
            if *c != '`' {
                backticks = 0;
            }
        }
    }

    #[test]
    fn helpers() {
        assert_eq!(ps_array(["a", "b\"c"]), "@(\"a\",\"b`\"c\")");
        assert_eq!(ps_array(Vec::<String>::new()), "@()");
        assert_eq!(ps_bool(true), "$true");
        assert_eq!(ps_bool(false), "$false");
        assert_eq!(
            secure_string("P@ss"),
            "(ConvertTo-SecureString -AsPlainText \"P@ss\" -Force)"
        );
    }

    #[test]
    fn encodes_utf16le_base64() {
        // "hi" -> 68 00 69 00
        assert_eq!(encode_powershell("hi"), "aABpAA==");
    }

    #[test]
    fn options_from_settings() {
        let settings = Settings {
            host: "dc1".into(),
            username: "u".into(),
            password: "p".into(),
            pass_credentials: true,
            domain_controller: "dc2".into(),
            ..Default::default()
        };
        let o = CommandOptions::from_settings(&settings);
        assert!(o.pass_credentials);
        assert!(!o.exec_locally);
        assert_eq!(o.server, "dc2");
        assert!(!format!("{:?}", o).contains("\"p\""));
    }
}
