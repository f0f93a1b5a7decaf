//! Per-VM firewall policy as an ordered allow-list plus a default action.
//!
//! A VM firewall is stored as a flat rule list that is evaluated top to
//! bottom. [`Policy::decode`] turns such a list into the simpler model
//! (specific allow rules, default action, optional temporary full access)
//! and [`Policy::encode`] turns it back, re-adding the DNS and ICMP
//! exceptions a deny policy needs. [`FirewallHandle`] ties both to a
//! [`RuleStore`] and the editable [`FirewallModel`].

pub mod config;
pub mod error;
pub mod handle;
pub mod services;
pub mod store;
pub mod types;

pub use config::{Settings, SettingsBuilder};
pub use error::{Error, Inconsistency, PolicyError, Result, RuleError, StoreError};
pub use handle::firewall::FirewallHandle;
pub use handle::input::{ProtocolChoice, RuleInput};
pub use handle::model::{FirewallModel, ModelEvent};
pub use handle::projection::{Column, SortOrder};
pub use services::ServiceTable;
pub use store::{FileStore, MemoryStore, RuleStore};
pub use types::policy::{DefaultAction, Policy};
pub use types::rule::{Action, DstHost, PortRange, Proto, Rule, RuleBuilder, SpecialTarget};
