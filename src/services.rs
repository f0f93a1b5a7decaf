use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

pub const SYSTEM_SERVICES: &str = "/etc/services";

static SERVICE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<name>[a-z][a-z0-9-]+)\s+(?P<port>[0-9]+)/(?P<protocol>[a-z]+)")
        .expect("service line pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub name: String,
    pub port: u16,
    pub protocol: String,
}

/// Well-known service names, in the `/etc/services` format.
///
/// Loaded once and shared read-only; lookups return the first entry in file
/// order, so `http 80/tcp` wins over a later `www 80/tcp` alias line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceTable {
    services: Vec<Service>,
}

impl ServiceTable {
    pub fn parse(text: &str) -> Self {
        let services = text
            .lines()
            .filter_map(|line| {
                let caps = SERVICE_LINE.captures(line)?;
                Some(Service {
                    name: caps["name"].to_string(),
                    port: caps["port"].parse().ok()?,
                    protocol: caps["protocol"].to_ascii_lowercase(),
                })
            })
            .collect();

        Self { services }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read services file: {}", path.display()))?;
        let table = Self::parse(&text);

        debug!(path = %path.display(), entries = table.len(), "loaded service table");
        Ok(table)
    }

    /// The host's `/etc/services`.
    pub fn system() -> Result<Self> {
        Self::load(SYSTEM_SERVICES)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Service> {
        self.services.iter()
    }

    pub fn name_for_port(&self, port: u16) -> Option<&str> {
        self.services
            .iter()
            .find(|s| s.port == port)
            .map(|s| s.name.as_str())
    }

    pub fn port_for_name(&self, name: &str) -> Option<u16> {
        self.services.iter().find(|s| s.name == name).map(|s| s.port)
    }

    /// `"80 (http)"` when the port has a name, the bare number otherwise.
    pub fn describe_port(&self, port: u16) -> String {
        match self.name_for_port(port) {
            Some(name) => format!("{port} ({name})"),
            None => port.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICES: &str = "\
# Network services, Internet style
tcpmux          1/tcp                           # TCP port service multiplexer
ssh             22/tcp                          # SSH Remote Login Protocol
domain          53/tcp                          # Domain Name Server
domain          53/udp
http            80/tcp          www             # WorldWideWeb HTTP
www             80/tcp
https           443/tcp
bogus           70000/tcp
x               99/tcp
";

    #[test]
    fn test_parse_skips_comments_and_invalid() {
        let table = ServiceTable::parse(SERVICES);

        assert_eq!(table.len(), 7);
        assert!(table.iter().all(|s| s.name != "bogus" && s.name != "x"));
    }

    #[test]
    fn test_lookups() {
        let table = ServiceTable::parse(SERVICES);

        assert_eq!(table.name_for_port(80), Some("http"));
        assert_eq!(table.port_for_name("https"), Some(443));
        assert_eq!(table.port_for_name("gopher"), None);
        assert_eq!(table.describe_port(22), "22 (ssh)");
        assert_eq!(table.describe_port(8080), "8080");
    }

    #[test]
    fn test_system_matches_load() {
        let path = Path::new(SYSTEM_SERVICES);
        if !path.exists() {
            assert!(ServiceTable::system().is_err());
            return;
        }

        assert_eq!(ServiceTable::system().unwrap(), ServiceTable::load(path).unwrap());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("services");
        std::fs::write(&path, SERVICES).unwrap();

        let table = ServiceTable::load(&path).unwrap();

        assert_eq!(table, ServiceTable::parse(SERVICES));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ServiceTable::load("/does/not/exist").unwrap_err();

        assert!(
            err.to_string().contains("failed to read services file"),
            "unexpected error: {err}"
        );
    }
}
