use std::sync::LazyLock;

use regex::Regex;

use crate::error::RuleError;
use crate::services::ServiceTable;
use crate::types::rule::{Action, DstHost, PortRange, Proto, Rule, RuleBuilder};

use super::projection::{column_string, Column};

// "80 (http)", as produced by the service column.
static DESCRIBED_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d*) \([a-zA-Z0-9-]*\)$").expect("port pattern is valid"));

static PORT_OR_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(-\d+)?$").expect("range pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolChoice {
    #[default]
    Any,
    Tcp,
    Udp,
}

/// What a user typed into the add/edit rule form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleInput {
    pub address: String,
    pub service: String,
    pub protocol: ProtocolChoice,
}

fn parse_service(services: &ServiceTable, service: &str) -> Result<PortRange, RuleError> {
    if PORT_OR_RANGE.is_match(service) {
        return service.parse();
    }
    let service = match DESCRIBED_PORT.captures(service) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => service,
    };
    if let Ok(ports) = service.parse() {
        return Ok(ports);
    }
    services
        .port_for_name(service)
        .ok_or_else(|| RuleError::UnknownService(service.to_string()))
        .and_then(PortRange::single)
}

impl RuleInput {
    /// Prefills the form from an existing rule.
    pub fn from_rule(services: &ServiceTable, rule: &Rule) -> Self {
        let service = match column_string(services, Column::Service, rule) {
            any if any == "any" => String::new(),
            service => service,
        };
        let protocol = match rule.proto {
            Some(Proto::Tcp) => ProtocolChoice::Tcp,
            Some(Proto::Udp) => ProtocolChoice::Udp,
            _ => ProtocolChoice::Any,
        };

        Self {
            address: column_string(services, Column::Address, rule),
            service,
            protocol,
        }
    }

    /// Builds a specific rule. The service is ignored when the protocol is
    /// [`ProtocolChoice::Any`].
    pub fn to_rule(&self, services: &ServiceTable) -> Result<Rule, RuleError> {
        let address = self.address.trim();
        let service = self.service.trim();

        let mut builder = RuleBuilder::default();
        builder.action(Action::Accept);

        if !address.is_empty() && address != "*" {
            builder.dsthost(address.parse::<DstHost>()?);
        }

        let proto = match self.protocol {
            ProtocolChoice::Any => None,
            ProtocolChoice::Tcp => Some(Proto::Tcp),
            ProtocolChoice::Udp => Some(Proto::Udp),
        };
        if let Some(proto) = proto {
            if service.is_empty() {
                return Err(RuleError::MissingService);
            }
            builder.proto(proto);
            builder.dstports(parse_service(services, service)?);
        }

        let rule = builder.build()?;
        if !rule.is_specific() {
            return Err(RuleError::NotSpecific);
        }
        Ok(rule)
    }
}
