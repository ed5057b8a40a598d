//! Project configuration (`lockseal.json`).
//!
//! The file is optional: without it every group lives under `requirements/`
//! and resolves with pip-compile. Loading validates the schema version and
//! the values the seal and validate paths depend on.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
pub const CONFIG_FILE_NAME: &str = "lockseal.json";

/// Environment override for the resolver command.
pub const RESOLVER_ENV: &str = "LOCKSEAL_RESOLVER";

const DEFAULT_SPEC_DIR: &str = "requirements";
const DEFAULT_RESOLVER_COMMAND: &str = "pip-compile --quiet --output-file=- {spec}";
const DEFAULT_RESOLVER_TIMEOUT_SECS: u64 = 120;
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub schema_version: u32,
    /// Directory scanned for `<group>.in` specifications.
    #[serde(default = "default_spec_dir")]
    pub spec_dir: String,
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Bounded wait for the per-artifact write lock.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_seconds: u64,
    /// Groups whose files do not follow the `<spec_dir>/<group>.{in,txt}` layout.
    #[serde(default)]
    pub groups: BTreeMap<String, GroupConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub command: String,
    #[serde(default = "default_resolver_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub spec: String,
    pub lock: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_RESOLVER_COMMAND.to_string(),
            timeout_seconds: DEFAULT_RESOLVER_TIMEOUT_SECS,
        }
    }
}

impl ProjectConfig {
    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_secs(self.resolver.timeout_seconds)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds)
    }
}

fn default_spec_dir() -> String {
    DEFAULT_SPEC_DIR.to_string()
}

fn default_resolver_timeout() -> u64 {
    DEFAULT_RESOLVER_TIMEOUT_SECS
}

fn default_lock_timeout() -> u64 {
    DEFAULT_LOCK_TIMEOUT_SECS
}

/// Config used when the project has no `lockseal.json`.
pub fn default_config() -> ProjectConfig {
    ProjectConfig {
        schema_version: CONFIG_SCHEMA_VERSION,
        spec_dir: default_spec_dir(),
        resolver: ResolverConfig::default(),
        lock_timeout_seconds: DEFAULT_LOCK_TIMEOUT_SECS,
        groups: BTreeMap::new(),
    }
}

/// Pretty JSON for `init`.
pub fn config_stub() -> Result<String> {
    let mut text =
        serde_json::to_string_pretty(&default_config()).context("serialize config stub")?;
    text.push('\n');
    Ok(text)
}

/// Load and validate `<root>/lockseal.json`, falling back to defaults.
pub fn load_config(root: &Path) -> Result<ProjectConfig> {
    let path = root.join(CONFIG_FILE_NAME);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(default_config());
        }
        Err(err) => return Err(err).with_context(|| format!("read config {}", path.display())),
    };
    let config: ProjectConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    validate_config(&config).with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

pub fn validate_config(config: &ProjectConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {}",
            config.schema_version
        ));
    }
    if config.spec_dir.trim().is_empty() {
        return Err(anyhow!("spec_dir must not be empty"));
    }
    if config.resolver.timeout_seconds == 0 {
        return Err(anyhow!("resolver.timeout_seconds must be > 0"));
    }
    if config.lock_timeout_seconds == 0 {
        return Err(anyhow!("lock_timeout_seconds must be > 0"));
    }
    for (name, group) in &config.groups {
        validate_group_name(name)?;
        if group.spec.trim().is_empty() || group.lock.trim().is_empty() {
            return Err(anyhow!("group {name:?} needs both spec and lock paths"));
        }
        if group.spec == group.lock {
            return Err(anyhow!("group {name:?} uses the same file as spec and lock"));
        }
    }
    Ok(())
}

/// Group names become file stems, so separators and dot-only names are refused.
pub fn validate_group_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed != name {
        return Err(anyhow!("invalid group name {name:?}"));
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(anyhow!("group name {name:?} must not contain path separators"));
    }
    Ok(())
}

/// Pick the resolver command: CLI flag, then environment, then config.
pub fn resolver_command<'a>(
    config: &'a ProjectConfig,
    flag: Option<&'a str>,
    env_value: Option<&'a str>,
) -> &'a str {
    [flag, env_value]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or(config.resolver.command.as_str())
}
