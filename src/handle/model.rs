use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::RuleError;
use crate::services::ServiceTable;
use crate::types::policy::{DefaultAction, Policy};
use crate::types::rule::Rule;

use super::projection::{column_string, sort_rules, Column, SortOrder};

/// Change notifications for whatever displays the rule rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelEvent {
    RowsInserted { first: usize, last: usize },
    RowsRemoved { first: usize, last: usize },
    DataChanged { first: usize, last: usize },
}

pub type Observer = Box<dyn FnMut(&ModelEvent)>;

/// Editable firewall of one VM: the decoded policy, the rows shown to the
/// user, and whether anything needs to be written back.
pub struct FirewallModel {
    vm: String,
    policy: Policy,
    services: Arc<ServiceTable>,
    changed: bool,
    observers: Vec<Observer>,
}

impl FirewallModel {
    pub fn new(vm: impl Into<String>, policy: Policy, services: Arc<ServiceTable>) -> Self {
        Self {
            vm: vm.into(),
            policy,
            services,
            changed: false,
            observers: Vec::new(),
        }
    }

    pub fn vm(&self) -> &str {
        &self.vm
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn rules(&self) -> &[Rule] {
        &self.policy.specific_rules
    }

    pub fn len(&self) -> usize {
        self.policy.specific_rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policy.specific_rules.is_empty()
    }

    pub fn default_action(&self) -> DefaultAction {
        self.policy.default_action
    }

    pub fn temp_full_access_expire_time(&self) -> Option<i64> {
        self.policy.temp_full_access_expire_time
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn services(&self) -> &ServiceTable {
        &self.services
    }

    pub fn headers(&self) -> [&'static str; 3] {
        Column::ALL.map(Column::title)
    }

    pub fn data(&self, row: usize, column: Column) -> Option<String> {
        self.policy
            .specific_rules
            .get(row)
            .map(|rule| column_string(&self.services, column, rule))
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&ModelEvent) + 'static) {
        self.observers.push(Box::new(observer));
    }

    fn notify(&mut self, event: ModelEvent) {
        for observer in &mut self.observers {
            observer(&event);
        }
    }

    pub fn append(&mut self, rule: Rule) -> Result<(), RuleError> {
        if !rule.is_specific() {
            return Err(RuleError::NotSpecific);
        }

        let row = self.len();
        self.policy.specific_rules.push(rule);
        self.changed = true;
        self.notify(ModelEvent::RowsInserted { first: row, last: row });
        Ok(())
    }

    /// Removes a row; out of range rows are ignored.
    pub fn remove(&mut self, row: usize) -> Option<Rule> {
        if row >= self.len() {
            return None;
        }

        let rule = self.policy.specific_rules.remove(row);
        self.changed = true;
        self.notify(ModelEvent::RowsRemoved { first: row, last: row });
        Some(rule)
    }

    /// Replaces a row and returns the previous rule.
    pub fn replace(&mut self, row: usize, rule: Rule) -> Result<Option<Rule>, RuleError> {
        if !rule.is_specific() {
            return Err(RuleError::NotSpecific);
        }
        let Some(slot) = self.policy.specific_rules.get_mut(row) else {
            return Ok(None);
        };

        let old = std::mem::replace(slot, rule);
        self.changed = true;
        self.notify(ModelEvent::DataChanged { first: row, last: row });
        Ok(Some(old))
    }

    /// Re-sorts the rows by a column. A sort that moves anything becomes the
    /// new stored order.
    pub fn sort(&mut self, column: Column, order: SortOrder) {
        if self.is_empty() {
            return;
        }

        let before = self.policy.specific_rules.clone();
        sort_rules(&self.services, &mut self.policy.specific_rules, column, order);
        if before != self.policy.specific_rules {
            self.changed = true;
        }

        let last = self.len() - 1;
        self.notify(ModelEvent::DataChanged { first: 0, last });
    }

    /// Settles the default action and temporary access for an apply.
    ///
    /// Returns the rule list to store, or `None` when nothing changed since
    /// the policy was loaded or last saved. A fresh temporary access window
    /// of `temp_access_minutes` from `now` is only opened under
    /// [`DefaultAction::Deny`]; under allow the request is ignored.
    pub fn prepare_apply(
        &mut self,
        default_action: DefaultAction,
        temp_access_minutes: Option<u32>,
        now: DateTime<Utc>,
    ) -> Option<Vec<Rule>> {
        let wants_temp_access =
            default_action == DefaultAction::Deny && temp_access_minutes.is_some();
        if self.policy.default_action != default_action
            || self.policy.temp_full_access() != wants_temp_access
        {
            self.changed = true;
        }
        if !self.changed {
            debug!(vm = %self.vm, "firewall unchanged; nothing to apply");
            return None;
        }

        self.policy.default_action = default_action;
        self.policy.temp_full_access_expire_time = match (default_action, temp_access_minutes) {
            (DefaultAction::Deny, Some(minutes)) => {
                Some(now.timestamp() + i64::from(minutes) * 60)
            }
            _ => None,
        };

        Some(self.policy.encode())
    }

    /// Clears the change flag after the encoded list has been stored.
    pub fn mark_saved(&mut self) {
        self.changed = false;
    }
}
