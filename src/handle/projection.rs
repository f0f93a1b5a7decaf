use std::cmp::Reverse;

use crate::services::ServiceTable;
use crate::types::rule::{DstHost, Rule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Address,
    Service,
    Protocol,
}

impl Column {
    pub const ALL: [Column; 3] = [Column::Address, Column::Service, Column::Protocol];

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Address => "Address",
            Self::Service => "Port/Service",
            Self::Protocol => "Protocol",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Display text of one column of a rule.
pub fn column_string(services: &ServiceTable, column: Column, rule: &Rule) -> String {
    match column {
        Column::Address => match &rule.dsthost {
            None => "*".to_string(),
            Some(host @ DstHost::Net(net)) if host.is_single_host() => net.addr().to_string(),
            Some(host) => host.to_string(),
        },
        Column::Service => match rule.dstports {
            None => "any".to_string(),
            Some(ports) if ports.is_range() => ports.to_string(),
            Some(ports) => services.describe_port(ports.start),
        },
        Column::Protocol => match rule.proto {
            None => "any".to_string(),
            Some(proto) => proto.to_string(),
        },
    }
}

/// Stable sort by the display text of `column`.
pub fn sort_rules(services: &ServiceTable, rules: &mut [Rule], column: Column, order: SortOrder) {
    match order {
        SortOrder::Ascending => {
            rules.sort_by_cached_key(|rule| column_string(services, column, rule))
        }
        SortOrder::Descending => {
            rules.sort_by_cached_key(|rule| Reverse(column_string(services, column, rule)))
        }
    }
}
