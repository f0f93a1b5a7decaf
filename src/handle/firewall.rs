use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::Result;
use crate::services::ServiceTable;
use crate::store::RuleStore;
use crate::types::policy::{DefaultAction, Policy};

use super::model::FirewallModel;

pub struct FirewallHandle<'a, S: RuleStore> {
    pub store: &'a mut S,
    services: Arc<ServiceTable>,
}

impl<S: RuleStore> Deref for FirewallHandle<'_, S> {
    type Target = S;

    fn deref(&self) -> &Self::Target {
        self.store
    }
}

impl<S: RuleStore> DerefMut for FirewallHandle<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.store
    }
}

impl<'a, S: RuleStore> FirewallHandle<'a, S> {
    pub fn new(store: &'a mut S, services: Arc<ServiceTable>) -> Self {
        Self { store, services }
    }

    /// Reads and decodes the firewall of `vm`.
    pub fn load(&self, vm: &str) -> Result<FirewallModel> {
        let rules = self.rules(vm)?;
        let policy = Policy::decode(&rules).inspect_err(|err| {
            warn!(vm, error = %err, "firewall cannot be shown as an allow-list");
        })?;

        Ok(FirewallModel::new(vm, policy, self.services.clone()))
    }

    /// Writes `model` back if anything changed. Returns whether the store
    /// was written.
    pub fn apply(
        &mut self,
        model: &mut FirewallModel,
        default_action: DefaultAction,
        temp_access_minutes: Option<u32>,
    ) -> Result<bool> {
        self.apply_at(model, default_action, temp_access_minutes, Utc::now())
    }

    pub fn apply_at(
        &mut self,
        model: &mut FirewallModel,
        default_action: DefaultAction,
        temp_access_minutes: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(rules) = model.prepare_apply(default_action, temp_access_minutes, now) else {
            return Ok(false);
        };

        self.replace_rules(model.vm(), rules)?;
        model.mark_saved();

        info!(
            vm = model.vm(),
            ?default_action,
            specific = model.len(),
            temp_expire = ?model.temp_full_access_expire_time(),
            "applied firewall policy"
        );
        Ok(true)
    }
}
