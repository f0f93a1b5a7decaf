use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::types::rule::Rule;

const RULES_EXTENSION: &str = "rules";

static VM_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9_.-]{0,30}$").expect("VM name pattern is valid")
});

/// Backend holding the ordered rule list of each VM.
///
/// Lists are only ever read or replaced as a whole.
pub trait RuleStore {
    fn rules(&self, vm: &str) -> Result<Vec<Rule>, StoreError>;

    fn replace_rules(&mut self, vm: &str, rules: Vec<Rule>) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    vms: BTreeMap<String, Vec<Rule>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vm(mut self, vm: impl Into<String>, rules: Vec<Rule>) -> Self {
        self.vms.insert(vm.into(), rules);
        self
    }
}

impl RuleStore for MemoryStore {
    fn rules(&self, vm: &str) -> Result<Vec<Rule>, StoreError> {
        self.vms
            .get(vm)
            .cloned()
            .ok_or_else(|| StoreError::UnknownVm(vm.to_string()))
    }

    fn replace_rules(&mut self, vm: &str, rules: Vec<Rule>) -> Result<(), StoreError> {
        self.vms.insert(vm.to_string(), rules);
        Ok(())
    }
}

/// One `<vm>.rules` file per VM, a rule per line in its text form.
/// Blank lines and `#` comments are ignored on read.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, vm: &str) -> Result<PathBuf, StoreError> {
        if !VM_NAME.is_match(vm) {
            return Err(StoreError::InvalidVmName(vm.to_string()));
        }
        Ok(self.dir.join(format!("{vm}.{RULES_EXTENSION}")))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl RuleStore for FileStore {
    fn rules(&self, vm: &str) -> Result<Vec<Rule>, StoreError> {
        let path = self.path(vm)?;
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::UnknownVm(vm.to_string()))
            }
            Err(err) => return Err(io_error(&path)(err)),
        };

        let mut rules = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let rule = line.parse().map_err(|source| StoreError::Parse {
                path: path.clone(),
                line: idx + 1,
                source,
            })?;
            rules.push(rule);
        }

        debug!(vm, rules = rules.len(), "read firewall rules");
        Ok(rules)
    }

    /// Writes to a temporary file in the same directory and renames it over
    /// the old list, so readers see either the old or the new list.
    fn replace_rules(&mut self, vm: &str, rules: Vec<Rule>) -> Result<(), StoreError> {
        let path = self.path(vm)?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(io_error(&self.dir))?;
        for rule in &rules {
            writeln!(tmp, "{rule}").map_err(io_error(tmp.path()))?;
        }
        tmp.as_file().sync_all().map_err(io_error(tmp.path()))?;
        tmp.persist(&path).map_err(|err| io_error(&path)(err.error))?;

        info!(vm, rules = rules.len(), path = %path.display(), "replaced firewall rules");
        Ok(())
    }
}
