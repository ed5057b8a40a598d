//! Workflow seal step.
//!
//! Sealing is the only path that writes a lock artifact. The write lock is
//! taken before the specification is read so a writer that waited on another
//! never seals stale input.
use super::ProjectContext;
use crate::artifact::InputSpecification;
use crate::atomic::AtomicWriter;
use crate::cli::SealArgs;
use crate::digest::CanonicalDigest;
use crate::paths::GroupPaths;
use crate::resolver::Resolver;
use crate::seal;
use crate::util::display_path;
use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// What a seal run committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealReceipt {
    pub group: String,
    pub lock: PathBuf,
    pub digest: CanonicalDigest,
    /// False when the artifact already held exactly this content.
    pub changed: bool,
}

/// Run `seal <name>` and return the process exit code.
pub fn run_seal(ctx: &ProjectContext, args: &SealArgs) -> Result<i32> {
    let group = ctx.group(&args.name)?;
    let resolver = ctx
        .resolver(args.resolver.as_deref())
        .context("configure resolver")?;
    let receipt = seal_group(&group, &ctx.writer(), &resolver)?;
    let shown = display_path(&receipt.lock, Some(ctx.paths.root()));
    if receipt.changed {
        println!("sealed {} -> {} (sha256={})", receipt.group, shown, receipt.digest);
    } else {
        println!("{} already sealed at {} (sha256={})", receipt.group, shown, receipt.digest);
    }
    Ok(0)
}

/// Resolve the group's specification and commit the sealed lock artifact.
pub fn seal_group<R: Resolver + ?Sized>(
    group: &GroupPaths,
    writer: &AtomicWriter,
    resolver: &R,
) -> Result<SealReceipt> {
    let guard = writer.lock(&group.lock)?;
    let spec = InputSpecification::load(&group.spec)?;
    let digest = spec.digest();
    let resolved = resolver
        .resolve(&spec)
        .with_context(|| format!("resolve group {}", group.name))?;
    let sealed = seal::inject(&resolved, &digest);

    let previous = previous_bytes(guard.target())?;
    let changed = previous.as_deref() != Some(sealed.as_bytes());
    if changed {
        guard.commit(&sealed)?;
    }
    tracing::info!(
        group = %group.name,
        lock = %group.lock.display(),
        digest = %digest,
        changed,
        "lock artifact sealed"
    );
    Ok(SealReceipt {
        group: group.name.clone(),
        lock: group.lock.clone(),
        digest,
        changed,
    })
}

/// Raw current content; any bytes are accepted so a corrupt artifact can be resealed.
fn previous_bytes(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read lock artifact {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::LockArtifact;
    use crate::atomic::LockError;
    use crate::digest;
    use crate::resolver::ResolveError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Pins every spec line to `==1.0.0`, with a pip-compile style banner.
    struct PinningResolver {
        calls: AtomicUsize,
    }

    impl PinningResolver {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Resolver for PinningResolver {
        fn resolve(&self, spec: &InputSpecification) -> Result<String, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = String::from("#\n# generated by test resolver\n#\n");
            for line in crate::normalize::meaningful_lines(&spec.text) {
                let name = line.split(['=', '<', '>']).next().unwrap_or(line);
                out.push_str(&format!("{name}==1.0.0\n"));
            }
            Ok(out)
        }
    }

    struct BrokenResolver;

    impl Resolver for BrokenResolver {
        fn resolve(&self, _spec: &InputSpecification) -> Result<String, ResolveError> {
            Err(ResolveError::Failed {
                status: "exit status: 1".to_string(),
                stderr: "no matching distribution".to_string(),
            })
        }
    }

    fn group_in(dir: &tempfile::TempDir, spec: &str) -> GroupPaths {
        let group = GroupPaths {
            name: "base".to_string(),
            spec: dir.path().join("base.in"),
            lock: dir.path().join("base.txt"),
        };
        fs::write(&group.spec, spec).expect("write spec");
        group
    }

    fn writer() -> AtomicWriter {
        AtomicWriter::new(Duration::from_secs(10))
    }

    #[test]
    fn seal_embeds_digest_of_input_not_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = group_in(&dir, "pkg==1.0.0\n# note\n");
        let receipt = seal_group(&group, &writer(), &PinningResolver::new()).expect("seal");
        assert!(receipt.changed);
        assert_eq!(receipt.digest, digest::compute("pkg==1.0.0"));

        let artifact = LockArtifact::load(&group.lock).expect("load").expect("present");
        assert_eq!(artifact.seal(), Ok(Some(receipt.digest)));
        assert_eq!(artifact.entries(), vec!["pkg==1.0.0"]);
        let lines: Vec<&str> = artifact.text.lines().collect();
        assert!(lines[3].starts_with(seal::SEAL_PREFIX), "{lines:?}");
    }

    #[test]
    fn resealing_unchanged_input_rewrites_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = group_in(&dir, "pkg\n");
        let resolver = PinningResolver::new();
        seal_group(&group, &writer(), &resolver).expect("first seal");
        let before = fs::read_to_string(&group.lock).expect("read");
        let again = seal_group(&group, &writer(), &resolver).expect("second seal");
        assert!(!again.changed);
        assert_eq!(fs::read_to_string(&group.lock).expect("read"), before);
    }

    #[test]
    fn resolver_failure_leaves_artifact_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = group_in(&dir, "pkg\n");
        fs::write(&group.lock, "pkg==0.9\n").expect("seed lock");
        let err = seal_group(&group, &writer(), &BrokenResolver).expect_err("seal fails");
        assert!(err.downcast_ref::<ResolveError>().is_some());
        assert_eq!(fs::read_to_string(&group.lock).expect("read"), "pkg==0.9\n");
    }

    #[test]
    fn corrupt_non_utf8_artifact_is_repaired_by_reseal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = group_in(&dir, "pkg==1.0.0\n");
        fs::write(&group.lock, [0xff, 0xfe, b'\n']).expect("corrupt lock");
        let receipt = seal_group(&group, &writer(), &PinningResolver::new()).expect("reseal");
        assert!(receipt.changed);
        let artifact = LockArtifact::load(&group.lock).expect("load").expect("present");
        assert_eq!(artifact.seal(), Ok(Some(digest::compute("pkg==1.0.0"))));
        assert_eq!(artifact.entries(), vec!["pkg==1.0.0"]);
    }

    #[test]
    fn missing_specification_fails_without_resolving() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = group_in(&dir, "pkg\n");
        fs::remove_file(&group.spec).expect("remove spec");
        let resolver = PinningResolver::new();
        assert!(seal_group(&group, &writer(), &resolver).is_err());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert!(!group.lock.exists());
    }

    #[test]
    fn contention_surfaces_lock_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = group_in(&dir, "pkg\n");
        let _held = writer().lock(&group.lock).expect("hold lock");
        let impatient = AtomicWriter::new(Duration::from_millis(50));
        let err = seal_group(&group, &impatient, &PinningResolver::new()).expect_err("contended");
        assert!(matches!(
            err.downcast_ref::<LockError>(),
            Some(LockError::Contention { .. })
        ));
    }

    #[test]
    fn concurrent_seals_leave_a_decodable_artifact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = Arc::new(group_in(&dir, "pkg\nother\n"));
        let resolver = Arc::new(PinningResolver::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let group = Arc::clone(&group);
                let resolver = Arc::clone(&resolver);
                std::thread::spawn(move || {
                    if i % 2 == 0 {
                        fs::write(&group.spec, format!("pkg\nother\nextra{i}\n")).expect("edit");
                    }
                    seal_group(&group, &writer(), resolver.as_ref()).expect("seal")
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        let artifact = LockArtifact::load(&group.lock).expect("load").expect("present");
        let embedded = artifact.seal().expect("decodable").expect("sealed");
        let spec = InputSpecification::load(&group.spec).expect("spec");
        assert_eq!(embedded, spec.digest());
    }
}
