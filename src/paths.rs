//! Typed paths into a project.
//!
//! Group names map to a specification and a lock artifact either through
//! `lockseal.json` or the default `<spec_dir>/<group>.in` ->
//! `<spec_dir>/<group>.txt` layout.
use crate::config::{validate_group_name, ProjectConfig, CONFIG_FILE_NAME};
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const SPEC_EXTENSION: &str = "in";
pub const LOCK_EXTENSION: &str = "txt";

#[derive(Debug, Clone)]
pub struct ProjectPaths {
    root: PathBuf,
}

/// Files owned by one dependency group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPaths {
    pub name: String,
    pub spec: PathBuf,
    pub lock: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the `lockseal.json` path.
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    pub fn spec_dir(&self, config: &ProjectConfig) -> PathBuf {
        self.root.join(&config.spec_dir)
    }

    /// Resolve a group name to its spec and lock paths.
    pub fn group(&self, config: &ProjectConfig, name: &str) -> Result<GroupPaths> {
        validate_group_name(name)?;
        if let Some(group) = config.groups.get(name) {
            return Ok(GroupPaths {
                name: name.to_string(),
                spec: self.root.join(&group.spec),
                lock: self.root.join(&group.lock),
            });
        }
        let dir = self.spec_dir(config);
        Ok(GroupPaths {
            name: name.to_string(),
            spec: dir.join(format!("{name}.{SPEC_EXTENSION}")),
            lock: dir.join(format!("{name}.{LOCK_EXTENSION}")),
        })
    }

    /// Configured groups plus every `<spec_dir>/*.in`, sorted by name.
    pub fn tracked_groups(&self, config: &ProjectConfig) -> Result<Vec<GroupPaths>> {
        let mut names: BTreeSet<String> = config.groups.keys().cloned().collect();
        let dir = self.spec_dir(config);
        if dir.is_dir() {
            for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
                let path = entry?.path();
                if !path.is_file()
                    || path.extension().and_then(|ext| ext.to_str()) != Some(SPEC_EXTENSION)
                {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    names.insert(stem.to_string());
                }
            }
        }
        names
            .iter()
            .filter(|name| validate_group_name(name).is_ok())
            .map(|name| self.group(config, name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_config, GroupConfig};

    #[test]
    fn default_layout_uses_spec_dir() {
        let paths = ProjectPaths::new(PathBuf::from("/repo"));
        let group = paths.group(&default_config(), "base").expect("group");
        assert_eq!(group.spec, PathBuf::from("/repo/requirements/base.in"));
        assert_eq!(group.lock, PathBuf::from("/repo/requirements/base.txt"));
    }

    #[test]
    fn configured_group_overrides_layout() {
        let mut config = default_config();
        config.groups.insert(
            "docs".to_string(),
            GroupConfig {
                spec: "docs/requirements.in".to_string(),
                lock: "docs/requirements.lock".to_string(),
            },
        );
        let paths = ProjectPaths::new(PathBuf::from("/repo"));
        let group = paths.group(&config, "docs").expect("group");
        assert_eq!(group.lock, PathBuf::from("/repo/docs/requirements.lock"));
    }

    #[test]
    fn group_name_with_separator_is_rejected() {
        let paths = ProjectPaths::new(PathBuf::from("/repo"));
        assert!(paths.group(&default_config(), "../etc/passwd").is_err());
    }

    #[test]
    fn tracked_groups_merge_config_and_discovery() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec_dir = dir.path().join("requirements");
        fs::create_dir_all(&spec_dir).expect("mkdir");
        fs::write(spec_dir.join("base.in"), "pkg\n").expect("write");
        fs::write(spec_dir.join("dev.in"), "pytest\n").expect("write");
        fs::write(spec_dir.join("base.txt"), "pkg==1\n").expect("write");
        let mut config = default_config();
        config.groups.insert(
            "docs".to_string(),
            GroupConfig {
                spec: "docs/req.in".to_string(),
                lock: "docs/req.txt".to_string(),
            },
        );
        let paths = ProjectPaths::new(dir.path().to_path_buf());
        let names: Vec<String> = paths
            .tracked_groups(&config)
            .expect("tracked")
            .into_iter()
            .map(|group| group.name)
            .collect();
        assert_eq!(names, vec!["base", "dev", "docs"]);
    }

    #[test]
    fn tracked_groups_without_spec_dir_is_config_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(dir.path().to_path_buf());
        assert!(paths
            .tracked_groups(&default_config())
            .expect("tracked")
            .is_empty());
    }
}
