use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use derive_builder::Builder;
use serde::Deserialize;
use tracing::warn;

use crate::services::{ServiceTable, SYSTEM_SERVICES};

#[derive(Builder, Debug, Clone, PartialEq, Eq, Deserialize)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct Settings {
    /// Well-known services table used to name ports.
    pub services_path: PathBuf,
    /// Suggested length of a temporary full access window.
    pub temp_access_minutes: u32,
    /// Directory holding one rule file per VM.
    pub store_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            services_path: PathBuf::from(SYSTEM_SERVICES),
            temp_access_minutes: 5,
            store_dir: PathBuf::from("/var/lib/vmfw"),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "settings file not found; using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file: {}", path.display()))?;
        Self::from_yaml(&contents)
            .with_context(|| format!("failed to parse settings file: {}", path.display()))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yml::from_str(yaml).context("YAML deserialization failed")
    }

    pub fn services(&self) -> Result<ServiceTable> {
        ServiceTable::load(&self.services_path)
    }
}
