use std::path::PathBuf;

use derive_builder::UninitializedFieldError;
use thiserror::Error;

/// Ways a backend rule list can fail to fit the allow-list policy model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Inconsistency {
    #[error("at least one rule must exist")]
    Empty,
    #[error("last rule must be either drop all or accept all")]
    BadTerminalRule,
    #[error("rule type unknown")]
    UnknownRuleType,
    #[error("no blacklist support")]
    NoBlacklistSupport,
    #[error("ICMP must be allowed")]
    IcmpNotAllowed,
    #[error("DNS must be allowed")]
    DnsNotAllowed,
    #[error("more than one temporary full access rule")]
    DuplicateTemporaryAccess,
    #[error("exception rule placed among specific rules")]
    ExceptionAmongSpecificRules,
    #[error("rules do not add up")]
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The firewall was modified by another tool in a way this model cannot express.
    #[error("firewall has been modified outside of this tool: {0}")]
    Inconsistent(#[from] Inconsistency),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("address '{0}' is invalid")]
    InvalidAddress(String),
    #[error("port number or service '{0}' is invalid")]
    InvalidPort(String),
    #[error("protocol '{0}' is invalid")]
    InvalidProtocol(String),
    #[error("action '{0}' is invalid")]
    InvalidAction(String),
    #[error("special target '{0}' is invalid")]
    InvalidSpecialTarget(String),
    #[error("ICMP type '{0}' is invalid")]
    InvalidIcmpType(String),
    #[error("expiry '{0}' is invalid")]
    InvalidExpire(String),
    #[error("unknown service '{0}'")]
    UnknownService(String),
    #[error("service name/port is required for a TCP/UDP rule")]
    MissingService,
    #[error("destination ports require protocol tcp or udp")]
    PortsWithoutProtocol,
    #[error("ICMP type requires protocol icmp")]
    IcmpTypeWithoutIcmp,
    #[error("rule must be a permanent accept rule with an address or protocol")]
    NotSpecific,
    #[error("malformed token '{0}', expected key=value")]
    MalformedToken(String),
    #[error("unknown rule key '{0}'")]
    UnknownKey(String),
    #[error("duplicate rule key '{0}'")]
    DuplicateKey(String),
    #[error("rule has no action")]
    MissingAction,
    #[error("uninitialized field: {0}")]
    Uninitialized(String),
}

impl From<UninitializedFieldError> for RuleError {
    fn from(err: UninitializedFieldError) -> Self {
        Self::Uninitialized(err.field_name().to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no firewall stored for VM '{0}'")]
    UnknownVm(String),
    #[error("invalid VM name '{0}'")]
    InvalidVmName(String),
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: RuleError,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<Inconsistency> for Error {
    fn from(err: Inconsistency) -> Self {
        Self::Policy(err.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
