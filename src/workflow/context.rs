use crate::atomic::AtomicWriter;
use crate::config::{self, ProjectConfig, RESOLVER_ENV};
use crate::paths::{GroupPaths, ProjectPaths};
use crate::resolver::{CommandResolver, ResolveError};
use anyhow::{Context, Result};
use std::path::Path;

/// Project root, its config, and the collaborators built from them.
pub(crate) struct ProjectContext {
    pub(crate) paths: ProjectPaths,
    pub(crate) config: ProjectConfig,
}

impl ProjectContext {
    pub(crate) fn load(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("resolve project root {}", root.display()))?;
        let config = config::load_config(&root)?;
        Ok(Self {
            paths: ProjectPaths::new(root),
            config,
        })
    }

    /// Context with default config, for `init` over a missing or broken config.
    pub(crate) fn load_unchecked(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("resolve project root {}", root.display()))?;
        Ok(Self {
            paths: ProjectPaths::new(root),
            config: config::default_config(),
        })
    }

    pub(crate) fn group(&self, name: &str) -> Result<GroupPaths> {
        self.paths.group(&self.config, name)
    }

    pub(crate) fn writer(&self) -> AtomicWriter {
        AtomicWriter::new(self.config.lock_timeout())
    }

    /// Resolver from `--resolver`, `LOCKSEAL_RESOLVER`, or the config, in that order.
    pub(crate) fn resolver(&self, flag: Option<&str>) -> Result<CommandResolver, ResolveError> {
        let env_value = std::env::var(RESOLVER_ENV).ok();
        let command = config::resolver_command(&self.config, flag, env_value.as_deref());
        tracing::debug!(command, "resolver selected");
        CommandResolver::new(command, self.config.resolver_timeout(), self.paths.root())
    }
}
