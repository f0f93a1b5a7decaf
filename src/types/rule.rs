use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use derive_builder::Builder;
use ipnet::IpNet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RuleError;

const MAX_HOST_NAME_LEN: usize = 253;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Action {
    #[default]
    Accept,
    Drop,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Accept => "accept",
            Self::Drop => "drop",
        })
    }
}

impl FromStr for Action {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(Self::Accept),
            "drop" => Ok(Self::Drop),
            _ => Err(RuleError::InvalidAction(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Proto {
    Tcp,
    Udp,
    Icmp,
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmp => "icmp",
        })
    }
}

impl FromStr for Proto {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "icmp" => Ok(Self::Icmp),
            _ => Err(RuleError::InvalidProtocol(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialTarget {
    Dns,
}

impl fmt::Display for SpecialTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dns => "dns",
        })
    }
}

impl FromStr for SpecialTarget {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dns" => Ok(Self::Dns),
            _ => Err(RuleError::InvalidSpecialTarget(s.to_string())),
        }
    }
}

/// Destination of a rule: an IPv4/IPv6 network or a host name left for
/// the enforcing side to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DstHost {
    Net(IpNet),
    Name(String),
}

impl DstHost {
    /// True for a /32 IPv4 or /128 IPv6 network.
    pub fn is_single_host(&self) -> bool {
        match self {
            Self::Net(net) => net.prefix_len() == net.max_prefix_len(),
            Self::Name(_) => false,
        }
    }

    /// Key used for this destination in the rule text form.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Net(IpNet::V4(_)) => "dst4",
            Self::Net(IpNet::V6(_)) => "dst6",
            Self::Name(_) => "dsthost",
        }
    }
}

impl From<IpNet> for DstHost {
    fn from(net: IpNet) -> Self {
        Self::Net(net)
    }
}

impl From<IpAddr> for DstHost {
    fn from(addr: IpAddr) -> Self {
        Self::Net(IpNet::from(addr))
    }
}

impl fmt::Display for DstHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Net(net) => write!(f, "{net}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl FromStr for DstHost {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(net) = s.parse::<IpNet>() {
            return Ok(Self::Net(net));
        }
        if let Ok(addr) = s.parse::<IpAddr>() {
            return Ok(addr.into());
        }
        if is_host_name(s) {
            return Ok(Self::Name(s.to_ascii_lowercase()));
        }
        Err(RuleError::InvalidAddress(s.to_string()))
    }
}

// Anything that looks numeric or carries a prefix but failed to parse as an
// address is rejected instead of being taken for a name.
fn is_host_name(s: &str) -> bool {
    if s.is_empty() || s.len() > MAX_HOST_NAME_LEN || s.contains('/') {
        return false;
    }
    if s.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return false;
    }
    s.trim_end_matches('.').split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self, RuleError> {
        if start == 0 || start > end {
            return Err(RuleError::InvalidPort(format!("{start}-{end}")));
        }
        Ok(Self { start, end })
    }

    pub fn single(port: u16) -> Result<Self, RuleError> {
        Self::new(port, port)
    }

    pub fn is_range(&self) -> bool {
        self.start != self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for PortRange {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RuleError::InvalidPort(s.to_string());
        let port = |p: &str| p.parse::<u16>().map_err(|_| invalid());

        match s.split_once('-') {
            Some((start, end)) => Self::new(port(start)?, port(end)?).map_err(|_| invalid()),
            None => Self::single(port(s)?).map_err(|_| invalid()),
        }
    }
}

/// A single backend firewall rule. Every unset field matches anything.
///
/// Equality is field-wise, which is how the well-known templates below are
/// recognized in a rule list.
#[derive(Builder, Debug, Clone, PartialEq, Eq, Default)]
#[builder(default, build_fn(validate = "Self::validate", error = "RuleError"))]
pub struct Rule {
    pub action: Action,
    #[builder(setter(strip_option))]
    pub dsthost: Option<DstHost>,
    #[builder(setter(strip_option))]
    pub dstports: Option<PortRange>,
    #[builder(setter(strip_option))]
    pub proto: Option<Proto>,
    #[builder(setter(strip_option))]
    pub specialtarget: Option<SpecialTarget>,
    #[builder(setter(strip_option))]
    pub icmptype: Option<u8>,
    /// UNIX timestamp after which the rule is void.
    #[builder(setter(strip_option))]
    pub expire: Option<i64>,
}

impl RuleBuilder {
    fn validate(&self) -> Result<(), RuleError> {
        let proto = self.proto.flatten();

        if self.dstports.flatten().is_some() && !matches!(proto, Some(Proto::Tcp | Proto::Udp)) {
            return Err(RuleError::PortsWithoutProtocol);
        }
        if self.icmptype.flatten().is_some() && proto != Some(Proto::Icmp) {
            return Err(RuleError::IcmpTypeWithoutIcmp);
        }
        Ok(())
    }
}

impl Rule {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            ..Default::default()
        }
    }

    pub fn accept_all() -> Self {
        Self::new(Action::Accept)
    }

    pub fn drop_all() -> Self {
        Self::new(Action::Drop)
    }

    /// Always-on DNS exception kept in front of a drop-all rule.
    pub fn dns_exception() -> Self {
        Self {
            specialtarget: Some(SpecialTarget::Dns),
            ..Self::accept_all()
        }
    }

    /// Always-on ICMP exception kept in front of a drop-all rule.
    pub fn icmp_exception() -> Self {
        Self {
            proto: Some(Proto::Icmp),
            ..Self::accept_all()
        }
    }

    /// Accept-all rule that stops matching at `expire`.
    pub fn temporary_access(expire: i64) -> Self {
        Self {
            expire: Some(expire),
            ..Self::accept_all()
        }
    }

    /// Whether the rule may appear in the allow-list of a policy. The bare
    /// ICMP exception is excluded since it would decode as the exception.
    pub fn is_specific(&self) -> bool {
        self.action == Action::Accept
            && self.expire.is_none()
            && self.specialtarget.is_none()
            && self.icmptype.is_none()
            && (self.dsthost.is_some() || self.proto.is_some())
            && *self != Self::icmp_exception()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action={}", self.action)?;
        if let Some(dsthost) = &self.dsthost {
            write!(f, " {}={}", dsthost.key(), dsthost)?;
        }
        if let Some(proto) = self.proto {
            write!(f, " proto={proto}")?;
        }
        if let Some(dstports) = self.dstports {
            write!(f, " dstports={dstports}")?;
        }
        if let Some(icmptype) = self.icmptype {
            write!(f, " icmptype={icmptype}")?;
        }
        if let Some(specialtarget) = self.specialtarget {
            write!(f, " specialtarget={specialtarget}")?;
        }
        if let Some(expire) = self.expire {
            write!(f, " expire={expire}")?;
        }
        Ok(())
    }
}

fn set_once<T>(slot: &mut Option<T>, key: &str, value: T) -> Result<(), RuleError> {
    if slot.replace(value).is_some() {
        return Err(RuleError::DuplicateKey(key.to_string()));
    }
    Ok(())
}

impl FromStr for Rule {
    type Err = RuleError;

    /// Parses the `key=value` text form, e.g. `action=accept dst4=10.0.0.0/8 proto=tcp dstports=443-443`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut action = None;
        let mut dsthost = None;
        let mut proto = None;
        let mut dstports = None;
        let mut icmptype = None;
        let mut specialtarget = None;
        let mut expire = None;

        for token in s.split_whitespace() {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| RuleError::MalformedToken(token.to_string()))?;

            match key {
                "action" => set_once(&mut action, key, value.parse::<Action>()?)?,
                "dst4" | "dst6" | "dsthost" => {
                    let host = value.parse::<DstHost>()?;
                    // `dsthost` takes literal addresses too; they are written
                    // back under their family key.
                    if key != "dsthost" && host.key() != key {
                        return Err(RuleError::InvalidAddress(value.to_string()));
                    }
                    set_once(&mut dsthost, "dsthost", host)?
                }
                "proto" => set_once(&mut proto, key, value.parse::<Proto>()?)?,
                "dstports" => set_once(&mut dstports, key, value.parse::<PortRange>()?)?,
                "icmptype" => {
                    let ty = value
                        .parse::<u8>()
                        .map_err(|_| RuleError::InvalidIcmpType(value.to_string()))?;
                    set_once(&mut icmptype, key, ty)?
                }
                "specialtarget" => {
                    set_once(&mut specialtarget, key, value.parse::<SpecialTarget>()?)?
                }
                "expire" => {
                    let ts = value
                        .parse::<i64>()
                        .map_err(|_| RuleError::InvalidExpire(value.to_string()))?;
                    set_once(&mut expire, key, ts)?
                }
                _ => return Err(RuleError::UnknownKey(key.to_string())),
            }
        }

        let mut builder = RuleBuilder::default();
        builder.action(action.ok_or(RuleError::MissingAction)?);
        if let Some(dsthost) = dsthost {
            builder.dsthost(dsthost);
        }
        if let Some(proto) = proto {
            builder.proto(proto);
        }
        if let Some(dstports) = dstports {
            builder.dstports(dstports);
        }
        if let Some(icmptype) = icmptype {
            builder.icmptype(icmptype);
        }
        if let Some(specialtarget) = specialtarget {
            builder.specialtarget(specialtarget);
        }
        if let Some(expire) = expire {
            builder.expire(expire);
        }
        builder.build()
    }
}

impl Serialize for Rule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Rule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_specific_rule() {
        let rule: Rule = "action=accept dst4=10.0.0.1/32 proto=tcp dstports=80-80"
            .parse()
            .unwrap();

        assert_eq!(rule.action, Action::Accept);
        assert_eq!(rule.dsthost, Some(DstHost::Net("10.0.0.1/32".parse().unwrap())));
        assert_eq!(rule.proto, Some(Proto::Tcp));
        assert_eq!(rule.dstports, Some(PortRange::single(80).unwrap()));
        assert!(rule.is_specific());
    }

    #[test]
    fn test_parse_any_token_order() {
        let a: Rule = "proto=udp dstports=53 action=accept".parse().unwrap();
        let b: Rule = "action=accept proto=udp dstports=53-53".parse().unwrap();

        assert_eq!(a, b);
        assert_eq!(a.to_string(), "action=accept proto=udp dstports=53-53");
    }

    #[test]
    fn test_dsthost_key_accepts_addresses() {
        let v4: Rule = "action=accept dsthost=10.0.0.1".parse().unwrap();
        let v6: Rule = "action=accept dsthost=2001:db8::/32".parse().unwrap();

        assert_eq!(v4, "action=accept dst4=10.0.0.1/32".parse().unwrap());
        assert_eq!(v4.to_string(), "action=accept dst4=10.0.0.1/32");
        assert_eq!(v6.to_string(), "action=accept dst6=2001:db8::/32");
    }

    #[test]
    fn test_display_uses_family_key() {
        let v6 = RuleBuilder::default()
            .dsthost("2001:db8::/32".parse::<DstHost>().unwrap())
            .build()
            .unwrap();
        let name = RuleBuilder::default()
            .dsthost("www.example.com".parse::<DstHost>().unwrap())
            .build()
            .unwrap();

        assert_eq!(v6.to_string(), "action=accept dst6=2001:db8::/32");
        assert_eq!(name.to_string(), "action=accept dsthost=www.example.com");
    }

    #[test]
    fn test_bare_address_is_single_host() {
        let host: DstHost = "192.168.1.100".parse().unwrap();
        let v6: DstHost = "fe80::1".parse().unwrap();
        let net: DstHost = "192.168.0.0/16".parse().unwrap();

        assert!(host.is_single_host());
        assert!(v6.is_single_host());
        assert!(!net.is_single_host());
        assert_eq!(host.to_string(), "192.168.1.100/32");
    }

    #[test]
    fn test_templates() {
        assert_eq!(Rule::dns_exception().to_string(), "action=accept specialtarget=dns");
        assert_eq!(Rule::icmp_exception().to_string(), "action=accept proto=icmp");
        assert_eq!(Rule::drop_all().to_string(), "action=drop");
        assert_eq!(
            Rule::temporary_access(1_700_000_000).to_string(),
            "action=accept expire=1700000000"
        );
        assert!(!Rule::accept_all().is_specific());
        assert!(!Rule::icmp_exception().is_specific());
    }

    #[test]
    fn test_reject_invalid_rules() {
        let cases = [
            ("proto=tcp", RuleError::MissingAction),
            ("action=reject", RuleError::InvalidAction("reject".into())),
            ("action=accept dstports=80", RuleError::PortsWithoutProtocol),
            ("action=accept proto=icmp dstports=80", RuleError::PortsWithoutProtocol),
            ("action=accept proto=tcp icmptype=8", RuleError::IcmpTypeWithoutIcmp),
            ("action=accept proto=tcp dstports=90-80", RuleError::InvalidPort("90-80".into())),
            ("action=accept proto=tcp dstports=0", RuleError::InvalidPort("0".into())),
            ("action=accept proto=sctp", RuleError::InvalidProtocol("sctp".into())),
            ("action=accept dst4=::1", RuleError::InvalidAddress("::1".into())),
            ("action=accept dst4=300.1.1.1", RuleError::InvalidAddress("300.1.1.1".into())),
            ("action=accept comment=x", RuleError::UnknownKey("comment".into())),
            ("action=accept action=drop", RuleError::DuplicateKey("action".into())),
            ("action=accept proto", RuleError::MalformedToken("proto".into())),
        ];

        for (text, expected) in cases {
            assert_eq!(text.parse::<Rule>().unwrap_err(), expected, "{text}");
        }
    }

    #[test]
    fn test_builder_validates() {
        let err = RuleBuilder::default()
            .dstports(PortRange::single(22).unwrap())
            .build()
            .unwrap_err();

        assert_eq!(err, RuleError::PortsWithoutProtocol);
    }

    #[test]
    fn test_serde_uses_text_form() {
        let rule = Rule::icmp_exception();
        let json = serde_json::to_string(&rule).unwrap();

        assert_eq!(json, "\"action=accept proto=icmp\"");
        assert_eq!(serde_json::from_str::<Rule>(&json).unwrap(), rule);
    }
}
