//! The two files a dependency group owns: the hand-edited specification and
//! the sealed lock artifact generated from it.
use crate::digest::{self, CanonicalDigest};
use crate::normalize::meaningful_lines;
use crate::seal::{self, SealError};
use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Human-edited dependency list; read once per run.
#[derive(Debug, Clone)]
pub struct InputSpecification {
    pub path: PathBuf,
    pub text: String,
}

impl InputSpecification {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read specification {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            text,
        })
    }

    pub fn digest(&self) -> CanonicalDigest {
        digest::compute(&self.text)
    }
}

/// Resolver-generated pins plus the embedded seal.
#[derive(Debug, Clone)]
pub struct LockArtifact {
    pub path: PathBuf,
    pub text: String,
}

impl LockArtifact {
    /// `Ok(None)` when the artifact has never been written.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(Self {
                path: path.to_path_buf(),
                text,
            })),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("read lock artifact {}", path.display()))
            }
        }
    }

    pub fn seal(&self) -> Result<Option<CanonicalDigest>, SealError> {
        seal::decode(&self.text)
    }

    /// Pinned entries in file order, comments and the seal excluded.
    pub fn entries(&self) -> Vec<String> {
        meaningful_lines(&seal::strip(&self.text))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_lock_artifact_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = LockArtifact::load(&dir.path().join("absent.txt")).expect("load");
        assert!(loaded.is_none());
    }

    #[test]
    fn entries_skip_banner_seal_and_annotations() {
        let digest = digest::compute("httpx");
        let text = seal::inject(
            "# generated\nanyio==4.2.0\n    # via httpx\nhttpx==0.26.0\n",
            &digest,
        );
        let artifact = LockArtifact {
            path: PathBuf::from("base.txt"),
            text,
        };
        assert_eq!(artifact.entries(), vec!["anyio==4.2.0", "httpx==0.26.0"]);
        assert_eq!(artifact.seal(), Ok(Some(digest)));
    }

    #[test]
    fn specification_digest_matches_compute() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("base.in");
        fs::write(&path, "pkg==1.0.0\n# note\n").expect("write");
        let spec = InputSpecification::load(&path).expect("load");
        assert_eq!(spec.digest(), digest::compute("pkg==1.0.0"));
    }

    #[test]
    fn missing_specification_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(InputSpecification::load(&dir.path().join("absent.in")).is_err());
    }
}
