//! Security settings of one GPO, identified as `<gpoID>_securitysettings`.

use super::Resource;
use crate::provider::Provider;
use adp_core::ids::{parse_security_settings_id, security_settings_id, validate_guid};
use adp_core::{absent_on_not_found, AdResult};
use adp_gpo::{GpoSecurity, SecuritySettings};
use adp_objects::Gpo;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpoSecurityState {
    #[serde(default)]
    pub id: String,
    pub gpo_id: String,
    /// Domain of the GPO; the provider's default domain when empty.
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub settings: SecuritySettings,
}

pub struct GpoSecurityResource {
    provider: Arc<Provider>,
}

impl GpoSecurityResource {
    pub fn new(provider: Arc<Provider>) -> Self {
        Self { provider }
    }

    fn store(&self) -> GpoSecurity {
        self.provider.gpo_security()
    }

    async fn lookup(&self, state: &GpoSecurityState) -> AdResult<Option<Gpo>> {
        let gpo_id = validate_guid(&state.gpo_id)?;
        absent_on_not_found(self.store().lookup(&gpo_id, &state.domain).await)
    }

    /// Write `desired` and return it as the new observed state.
    async fn apply(&self, gpo: &Gpo, desired: &GpoSecurityState) -> AdResult<GpoSecurityState> {
        let version = self.store().write(gpo, &desired.settings).await?;
        info!("GPO {} security settings applied (version {})", gpo.id, version);
        Ok(GpoSecurityState {
            id: security_settings_id(&gpo.id),
            gpo_id: gpo.id.clone(),
            domain: desired.domain.clone(),
            settings: desired.settings.normalized(),
        })
    }
}

#[async_trait::async_trait]
impl Resource for GpoSecurityResource {
    type State = GpoSecurityState;

    fn type_name(&self) -> String {
        "ad_gpo_security".to_string()
    }

    async fn create(&self, desired: &GpoSecurityState) -> AdResult<GpoSecurityState> {
        let gpo = self.store().lookup(&validate_guid(&desired.gpo_id)?, &desired.domain).await?;
        self.apply(&gpo, desired).await
    }

    async fn read(&self, current: &GpoSecurityState) -> AdResult<Option<GpoSecurityState>> {
        let gpo = match self.lookup(current).await? {
            Some(gpo) => gpo,
            None => {
                debug!("GPO {} is gone", current.gpo_id);
                return Ok(None);
            }
        };
        Ok(self.store().read(&gpo).await?.map(|settings| GpoSecurityState {
            id: security_settings_id(&gpo.id),
            gpo_id: gpo.id.clone(),
            domain: current.domain.clone(),
            settings,
        }))
    }

    async fn update(&self, prior: &GpoSecurityState, desired: &GpoSecurityState) -> AdResult<Option<GpoSecurityState>> {
        let target = GpoSecurityState {
            gpo_id: prior.gpo_id.clone(),
            ..desired.clone()
        };
        match self.lookup(&target).await? {
            Some(gpo) => self.apply(&gpo, &target).await.map(Some),
            None => Ok(None),
        }
    }

    async fn delete(&self, current: &GpoSecurityState) -> AdResult<()> {
        match self.lookup(current).await? {
            Some(gpo) => {
                let version = self.store().remove(&gpo).await?;
                info!("GPO {} security settings removed (version {})", gpo.id, version);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn import(&self, id: &str) -> AdResult<GpoSecurityState> {
        let gpo_id = parse_security_settings_id(id.trim())?;
        Ok(GpoSecurityState {
            id: security_settings_id(&gpo_id),
            gpo_id,
            ..Default::default()
        })
    }
}
