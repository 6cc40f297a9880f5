//! Security settings stored in a GPO's SYSVOL folder.
//!
//! Writing the template alone is not enough for clients to pick it up: the
//! computer-side version in `GPT.INI` and on the GPO object must move
//! forward, and the security client-side extension must be registered in
//! `gPCMachineExtensionNames`.

use crate::gptini::GptIni;
use crate::inf::SecuritySettings;
use adp_core::{AdError, AdResult};
use adp_objects::params::Params;
use adp_objects::Gpo;
use adp_winrm::{quote, CommandOptions, PsRunner};
use log::{debug, info};

/// Security CSE and its snap-in, in the form `gPCMachineExtensionNames` takes.
pub const SECURITY_EXTENSION_NAMES: &str =
    "[{827D319E-6EAC-11D2-A4EA-00C04F79F83A}{803E14A0-B4FB-11D0-A0D0-00A0C90F574B}]";

pub const TEMPLATE_RELATIVE_PATH: &str = "Machine\\Microsoft\\Windows NT\\SecEdit\\GptTmpl.inf";

pub fn template_path(gpo: &Gpo) -> String {
    format!("{}\\{}", gpo.sysvol_path(), TEMPLATE_RELATIVE_PATH)
}

pub fn gpt_ini_path(gpo: &Gpo) -> String {
    format!("{}\\GPT.INI", gpo.sysvol_path())
}

/// `Set-ADObject` on the GPO container with the new version, optionally
/// registering the security extension.
pub fn build_version_update(gpo: &Gpo, version: u32, register_extension: bool, options: &CommandOptions) -> AdResult<adp_winrm::PsCommand> {
    if gpo.dn.is_empty() {
        return Err(AdError::invariant(format!("GPO {} has no distinguished name", gpo.id)));
    }
    let replace = if register_extension {
        format!(
            "-Replace @{{versionNumber={}; gPCMachineExtensionNames={}}}",
            version,
            quote(SECURITY_EXTENSION_NAMES)
        )
    } else {
        format!("-Replace @{{versionNumber={}}}", version)
    };
    Ok(Params::new("Set-ADObject")
        .string("Identity", &gpo.dn)
        .raw(replace)
        .into_command(options))
}

/// Reads and writes `GptTmpl.inf` for one GPO at a time.
#[derive(Clone)]
pub struct GpoSecurity {
    runner: PsRunner,
    options: CommandOptions,
}

impl GpoSecurity {
    pub fn new(runner: PsRunner, options: CommandOptions) -> Self {
        Self { runner, options }
    }

    /// Resolve the GPO; fails with `NotFound` when it does not exist.
    pub async fn lookup(&self, gpo_id: &str, domain: &str) -> AdResult<Gpo> {
        let cmd = Gpo::build_read(gpo_id, domain, &self.options)?;
        let out = self.runner.run_ok(&cmd).await?;
        Gpo::parse(&out.stdout)
    }

    /// The parsed template; `None` when the GPO has none.
    pub async fn read(&self, gpo: &Gpo) -> AdResult<Option<SecuritySettings>> {
        let path = template_path(gpo);
        let data = {
            let mut files = self.runner.pool().acquire_file().await?;
            files.download(&path).await?
        };
        match data {
            None => {
                debug!("No security template at {}", path);
                Ok(None)
            }
            Some(bytes) => SecuritySettings::parse(&bytes).map(Some),
        }
    }

    /// Upload the template and publish a new computer version. Returns the
    /// new version number.
    pub async fn write(&self, gpo: &Gpo, settings: &SecuritySettings) -> AdResult<u32> {
        let path = template_path(gpo);
        {
            let mut files = self.runner.pool().acquire_file().await?;
            files.upload(&settings.emit(), &path).await?;
        }
        info!("Wrote security template for GPO {}", gpo.id);
        self.bump_version(gpo, true).await
    }

    /// Delete the template, then publish a new computer version. Removing an
    /// absent template is not an error. Returns the new version number.
    pub async fn remove(&self, gpo: &Gpo) -> AdResult<u32> {
        let removed = {
            let mut files = self.runner.pool().acquire_file().await?;
            files.remove(&template_path(gpo)).await?
        };
        if removed {
            info!("Removed security template for GPO {}", gpo.id);
        } else {
            debug!("GPO {} had no security template to remove", gpo.id);
        }
        self.bump_version(gpo, false).await
    }

    async fn bump_version(&self, gpo: &Gpo, register_extension: bool) -> AdResult<u32> {
        let ini_path = gpt_ini_path(gpo);
        let version = {
            let mut files = self.runner.pool().acquire_file().await?;
            let mut ini = match files.download(&ini_path).await? {
                Some(bytes) => GptIni::parse(&bytes)?,
                None => GptIni::default(),
            };
            let version = ini.bump_computer()?;
            files.upload(&ini.emit(), &ini_path).await?;
            version
        };
        let cmd = build_version_update(gpo, version, register_extension, &self.options)?;
        self.runner.run_void(&cmd).await?;
        debug!("GPO {} is now at version {}", gpo.id, version);
        Ok(version)
    }
}
