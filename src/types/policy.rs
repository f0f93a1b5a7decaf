use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Inconsistency, PolicyError};

use super::rule::{Action, Rule};

/// Catch-all behavior when no specific rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultAction {
    Allow,
    Deny,
}

impl DefaultAction {
    /// Recognizes a bare accept-all or drop-all rule.
    pub fn from_terminal(rule: &Rule) -> Option<Self> {
        if *rule == Rule::accept_all() {
            Some(Self::Allow)
        } else if *rule == Rule::drop_all() {
            Some(Self::Deny)
        } else {
            None
        }
    }

    pub fn terminal_rule(self) -> Rule {
        match self {
            Self::Allow => Rule::accept_all(),
            Self::Deny => Rule::drop_all(),
        }
    }
}

/// Allow-list view of a VM firewall.
///
/// The backend list it stands for is laid out as
/// `specific rules, [temporary access], [dns, icmp], terminal`, where the
/// bracketed parts only exist under [`DefaultAction::Deny`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub default_action: DefaultAction,
    pub specific_rules: Vec<Rule>,
    pub temp_full_access_expire_time: Option<i64>,
}

enum Entry {
    DnsException,
    IcmpException,
    TemporaryAccess(i64),
    Specific,
}

fn classify(rule: &Rule) -> Result<Entry, Inconsistency> {
    if *rule == Rule::dns_exception() {
        return Ok(Entry::DnsException);
    }
    if *rule == Rule::icmp_exception() {
        return Ok(Entry::IcmpException);
    }
    if rule.specialtarget.is_some() || rule.icmptype.is_some() {
        return Err(Inconsistency::UnknownRuleType);
    }

    let matches_traffic = rule.dsthost.is_some() || rule.proto.is_some();
    match (rule.expire, matches_traffic) {
        (None, true) if rule.action == Action::Accept => Ok(Entry::Specific),
        (None, true) => Err(Inconsistency::NoBlacklistSupport),
        (Some(expire), false) if rule.action == Action::Accept => {
            Ok(Entry::TemporaryAccess(expire))
        }
        // A timed drop-all would otherwise come back as timed accept-all.
        (Some(_), false) => Err(Inconsistency::NoBlacklistSupport),
        _ => Err(Inconsistency::Unrecognized),
    }
}

impl Policy {
    pub fn new(default_action: DefaultAction) -> Self {
        Self {
            default_action,
            specific_rules: Vec::new(),
            temp_full_access_expire_time: None,
        }
    }

    pub fn temp_full_access(&self) -> bool {
        self.temp_full_access_expire_time.is_some()
    }

    /// Rebuilds the policy from a backend rule list.
    ///
    /// The list is walked from the end: the terminal rule first, then the
    /// exception and temporary access rules, then the specific rules. DNS
    /// and ICMP exceptions may come in either order and may repeat; a second
    /// temporary access rule, or any of these placed before a specific rule,
    /// is rejected.
    pub fn decode(rules: &[Rule]) -> Result<Self, PolicyError> {
        let mut reversed = rules.iter().rev();

        let last = reversed.next().ok_or(Inconsistency::Empty)?;
        let default_action =
            DefaultAction::from_terminal(last).ok_or(Inconsistency::BadTerminalRule)?;

        let mut allow_dns = false;
        let mut allow_icmp = false;
        let mut temp_full_access_expire_time = None;
        let mut specific_rules = VecDeque::new();

        for rule in reversed {
            let entry = classify(rule)?;

            if !matches!(entry, Entry::Specific) && !specific_rules.is_empty() {
                return Err(Inconsistency::ExceptionAmongSpecificRules.into());
            }

            match entry {
                Entry::DnsException => allow_dns = true,
                Entry::IcmpException => allow_icmp = true,
                Entry::TemporaryAccess(expire) => {
                    if temp_full_access_expire_time.replace(expire).is_some() {
                        return Err(Inconsistency::DuplicateTemporaryAccess.into());
                    }
                }
                Entry::Specific => specific_rules.push_front(rule.clone()),
            }
        }

        if default_action == DefaultAction::Deny {
            if !allow_icmp {
                return Err(Inconsistency::IcmpNotAllowed.into());
            }
            if !allow_dns {
                return Err(Inconsistency::DnsNotAllowed.into());
            }
        }

        debug!(
            ?default_action,
            specific = specific_rules.len(),
            temp_expire = ?temp_full_access_expire_time,
            "decoded firewall policy"
        );

        Ok(Self {
            default_action,
            specific_rules: specific_rules.into(),
            temp_full_access_expire_time,
        })
    }

    /// Produces the backend rule list, re-adding the exceptions a deny
    /// policy needs. Temporary access is dropped under an allow policy.
    pub fn encode(&self) -> Vec<Rule> {
        let mut rules = Vec::with_capacity(self.specific_rules.len() + 4);
        rules.extend(self.specific_rules.iter().cloned());

        if self.default_action == DefaultAction::Deny {
            if let Some(expire) = self.temp_full_access_expire_time {
                rules.push(Rule::temporary_access(expire));
            }
            rules.push(Rule::dns_exception());
            rules.push(Rule::icmp_exception());
        }
        rules.push(self.default_action.terminal_rule());

        debug!(rules = rules.len(), "encoded firewall policy");
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::rule::{DstHost, PortRange, Proto, RuleBuilder};

    fn parse(lines: &[&str]) -> Vec<Rule> {
        lines.iter().map(|l| l.parse().unwrap()).collect()
    }

    fn inconsistency(lines: &[&str]) -> Inconsistency {
        match Policy::decode(&parse(lines)).unwrap_err() {
            PolicyError::Inconsistent(reason) => reason,
        }
    }

    #[test]
    fn test_decode_empty() {
        assert_eq!(
            Policy::decode(&[]).unwrap_err(),
            PolicyError::Inconsistent(Inconsistency::Empty)
        );
    }

    #[test]
    fn test_decode_deny_with_exceptions_swapped() {
        let policy = Policy::decode(&parse(&[
            "action=accept dst4=10.0.0.0/8",
            "action=accept proto=icmp",
            "action=accept specialtarget=dns",
            "action=drop",
        ]))
        .unwrap();

        assert_eq!(policy.default_action, DefaultAction::Deny);
        assert_eq!(policy.specific_rules.len(), 1);
    }

    #[test]
    fn test_decode_keeps_specific_order() {
        let lines = [
            "action=accept dsthost=b.example.com",
            "action=accept proto=udp dstports=53-53",
            "action=accept dst6=2001:db8::1/128 proto=tcp dstports=1024-2048",
            "action=accept",
        ];
        let policy = Policy::decode(&parse(&lines)).unwrap();

        assert_eq!(policy.specific_rules, parse(&lines[..3]));
    }

    #[test]
    fn test_decode_temporary_access() {
        let policy = Policy::decode(&parse(&[
            "action=accept proto=tcp",
            "action=accept expire=1700000000",
            "action=accept specialtarget=dns",
            "action=accept proto=icmp",
            "action=drop",
        ]))
        .unwrap();

        assert_eq!(policy.temp_full_access_expire_time, Some(1_700_000_000));
        assert!(policy.temp_full_access());
    }

    #[test]
    fn test_decode_rejections() {
        assert_eq!(
            inconsistency(&["action=accept proto=tcp"]),
            Inconsistency::BadTerminalRule
        );
        assert_eq!(
            inconsistency(&["action=accept specialtarget=dns", "action=drop"]),
            Inconsistency::IcmpNotAllowed
        );
        assert_eq!(
            inconsistency(&["action=accept proto=icmp", "action=drop"]),
            Inconsistency::DnsNotAllowed
        );
        assert_eq!(
            inconsistency(&["action=accept proto=icmp icmptype=8", "action=accept"]),
            Inconsistency::UnknownRuleType
        );
        assert_eq!(
            inconsistency(&["action=drop dst4=1.1.1.1/32", "action=accept"]),
            Inconsistency::NoBlacklistSupport
        );
        assert_eq!(
            inconsistency(&["action=drop expire=10", "action=accept"]),
            Inconsistency::NoBlacklistSupport
        );
        assert_eq!(
            inconsistency(&["action=accept dst4=1.1.1.1/32 expire=10", "action=accept"]),
            Inconsistency::Unrecognized
        );
        assert_eq!(
            inconsistency(&["action=accept expire=10", "action=accept expire=20", "action=accept"]),
            Inconsistency::DuplicateTemporaryAccess
        );
        assert_eq!(
            inconsistency(&[
                "action=accept specialtarget=dns",
                "action=accept proto=tcp",
                "action=accept proto=icmp",
                "action=drop",
            ]),
            Inconsistency::ExceptionAmongSpecificRules
        );
    }

    #[test]
    fn test_timed_drop_all_is_not_temporary_access() {
        assert_eq!(
            inconsistency(&[
                "action=drop expire=1700000000",
                "action=accept specialtarget=dns",
                "action=accept proto=icmp",
                "action=drop",
            ]),
            Inconsistency::NoBlacklistSupport
        );
    }

    #[test]
    fn test_encode_allow_has_no_exceptions() {
        let mut policy = Policy::new(DefaultAction::Allow);
        policy.specific_rules.push(
            RuleBuilder::default()
                .dsthost("10.1.1.1".parse::<DstHost>().unwrap())
                .proto(Proto::Tcp)
                .dstports(PortRange::single(22).unwrap())
                .build()
                .unwrap(),
        );
        policy.temp_full_access_expire_time = Some(99);

        let rules = policy.encode();

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1], Rule::accept_all());
    }

    #[test]
    fn test_encode_deny_empty() {
        let rules = Policy::new(DefaultAction::Deny).encode();

        assert_eq!(
            rules,
            vec![Rule::dns_exception(), Rule::icmp_exception(), Rule::drop_all()]
        );
        assert_eq!(Policy::decode(&rules).unwrap(), Policy::new(DefaultAction::Deny));
    }
}
