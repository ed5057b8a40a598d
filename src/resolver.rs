//! External dependency resolver.
//!
//! Resolution is delegated to a user-configured command (for example
//! `pip-compile --quiet --output-file=- {spec}`) that prints lock text on
//! stdout. The command is split with shell-words; a `{spec}` argument is
//! replaced with the specification path, or the path is appended when the
//! token is absent. Every run is bounded by a timeout, and nothing is written
//! to disk by this side.
use crate::artifact::InputSpecification;
use crate::util::truncate_string;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Placeholder replaced by the specification path.
pub const SPEC_PLACEHOLDER: &str = "{spec}";

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const MAX_STDERR_BYTES: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("resolver command is empty")]
    EmptyCommand,
    #[error("parse resolver command {command:?}: {reason}")]
    BadCommand { command: String, reason: String },
    #[error("resolver {program:?} is not available: {reason}")]
    Unavailable { program: String, reason: String },
    #[error("spawn resolver {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("resolver timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("resolver exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("resolver output is not valid UTF-8")]
    InvalidUtf8,
    #[error("resolver i/o: {0}")]
    Io(#[from] io::Error),
    #[error("resolver is misconfigured: {0}")]
    Misconfigured(String),
}

/// Produces lock text for a specification, in memory.
pub trait Resolver {
    fn resolve(&self, spec: &InputSpecification) -> Result<String, ResolveError>;
}

/// Stands in for a resolver whose command could not be set up, so a deep
/// check reports the problem per group instead of aborting the run.
#[derive(Debug, Clone)]
pub struct MisconfiguredResolver {
    reason: String,
}

impl MisconfiguredResolver {
    pub fn new(err: &ResolveError) -> Self {
        Self {
            reason: err.to_string(),
        }
    }
}

impl Resolver for MisconfiguredResolver {
    fn resolve(&self, _spec: &InputSpecification) -> Result<String, ResolveError> {
        Err(ResolveError::Misconfigured(self.reason.clone()))
    }
}

/// Resolver backed by an external command.
#[derive(Debug, Clone)]
pub struct CommandResolver {
    argv: Vec<String>,
    timeout: Duration,
    cwd: PathBuf,
}

impl CommandResolver {
    pub fn new(command: &str, timeout: Duration, cwd: &Path) -> Result<Self, ResolveError> {
        let argv = shell_words::split(command).map_err(|err| ResolveError::BadCommand {
            command: command.to_string(),
            reason: err.to_string(),
        })?;
        if argv.is_empty() {
            return Err(ResolveError::EmptyCommand);
        }
        Ok(Self {
            argv,
            timeout,
            cwd: cwd.to_path_buf(),
        })
    }

    fn argv_for(&self, spec_path: &Path) -> Vec<String> {
        let spec = spec_path.display().to_string();
        let mut substituted = false;
        let mut argv: Vec<String> = self
            .argv
            .iter()
            .map(|arg| {
                if arg.contains(SPEC_PLACEHOLDER) {
                    substituted = true;
                    arg.replace(SPEC_PLACEHOLDER, &spec)
                } else {
                    arg.clone()
                }
            })
            .collect();
        if !substituted {
            argv.push(spec);
        }
        argv
    }
}

impl Resolver for CommandResolver {
    fn resolve(&self, spec: &InputSpecification) -> Result<String, ResolveError> {
        let argv = self.argv_for(&spec.path);
        let program = &argv[0];
        let resolved = which::which_in(program, std::env::var_os("PATH"), &self.cwd).map_err(
            |err| ResolveError::Unavailable {
                program: program.clone(),
                reason: err.to_string(),
            },
        )?;

        let start = Instant::now();
        let mut child = Command::new(&resolved)
            .args(&argv[1..])
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ResolveError::Spawn {
                program: program.clone(),
                source,
            })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match wait_with_timeout(&mut child, self.timeout)? {
            Some(status) => status,
            None => {
                tracing::warn!(
                    program = %program,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "resolver timed out"
                );
                return Err(ResolveError::Timeout(self.timeout));
            }
        };
        let stdout = join_output(stdout)?;
        let stderr = join_output(stderr)?;
        tracing::info!(
            program = %program,
            elapsed_ms = start.elapsed().as_millis() as u64,
            stdout_bytes = stdout.len(),
            "resolver finished"
        );

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(ResolveError::Failed {
                status: status.to_string(),
                stderr: truncate_string(stderr.trim(), MAX_STDERR_BYTES),
            });
        }
        String::from_utf8(stdout).map_err(|_| ResolveError::InvalidUtf8)
    }
}

/// Wait for `child`, killing it once `timeout` elapses. `None` means it was killed.
fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> Result<Option<std::process::ExitStatus>, ResolveError> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

// Pipes are drained on threads so a chatty resolver cannot fill them and stall.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<io::Result<Vec<u8>>>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf)?;
            Ok(buf)
        })
    })
}

fn join_output(handle: Option<JoinHandle<io::Result<Vec<u8>>>>) -> Result<Vec<u8>, ResolveError> {
    let Some(handle) = handle else {
        return Ok(Vec::new());
    };
    handle
        .join()
        .map_err(|_| io::Error::other("resolver output reader panicked"))?
        .map_err(ResolveError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_in(dir: &Path, text: &str) -> InputSpecification {
        let path = dir.join("base.in");
        std::fs::write(&path, text).expect("write spec");
        InputSpecification::load(&path).expect("load spec")
    }

    #[test]
    fn placeholder_is_substituted_or_appended() {
        let cwd = Path::new(".");
        let spec = Path::new("requirements/base.in");
        let with = CommandResolver::new("tool --in={spec} -q", Duration::from_secs(1), cwd)
            .expect("parse");
        assert_eq!(
            with.argv_for(spec),
            vec!["tool", "--in=requirements/base.in", "-q"]
        );
        let without =
            CommandResolver::new("tool -q", Duration::from_secs(1), cwd).expect("parse");
        assert_eq!(
            without.argv_for(spec),
            vec!["tool", "-q", "requirements/base.in"]
        );
    }

    #[test]
    fn empty_and_unbalanced_commands_are_rejected() {
        let cwd = Path::new(".");
        assert!(matches!(
            CommandResolver::new("   ", Duration::from_secs(1), cwd),
            Err(ResolveError::EmptyCommand)
        ));
        assert!(matches!(
            CommandResolver::new("tool 'unterminated", Duration::from_secs(1), cwd),
            Err(ResolveError::BadCommand { .. })
        ));
    }

    #[test]
    fn misconfigured_resolver_always_fails_with_reason() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = spec_in(dir.path(), "pkg\n");
        let err = CommandResolver::new("cat 'unterminated", Duration::from_secs(1), dir.path())
            .expect_err("unbalanced quote");
        let resolver = MisconfiguredResolver::new(&err);
        match resolver.resolve(&spec) {
            Err(ResolveError::Misconfigured(reason)) => {
                assert!(reason.contains("cat 'unterminated"), "{reason}");
            }
            other => panic!("expected misconfiguration, got {other:?}"),
        }
    }

    #[test]
    fn missing_program_is_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = spec_in(dir.path(), "pkg\n");
        let resolver = CommandResolver::new(
            "lockseal-no-such-resolver-xyz",
            Duration::from_secs(1),
            dir.path(),
        )
        .expect("parse");
        assert!(matches!(
            resolver.resolve(&spec),
            Err(ResolveError::Unavailable { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_of_successful_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = spec_in(dir.path(), "pkg==1.0.0\n");
        let resolver =
            CommandResolver::new("cat {spec}", Duration::from_secs(10), dir.path()).expect("parse");
        assert_eq!(resolver.resolve(&spec).expect("resolve"), "pkg==1.0.0\n");
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_failure_with_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = spec_in(dir.path(), "pkg\n");
        let resolver = CommandResolver::new(
            "sh -c 'echo index offline >&2; exit 3' resolver",
            Duration::from_secs(10),
            dir.path(),
        )
        .expect("parse");
        match resolver.resolve(&spec) {
            Err(ResolveError::Failed { stderr, .. }) => assert_eq!(stderr, "index offline"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn slow_resolver_times_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = spec_in(dir.path(), "pkg\n");
        let resolver = CommandResolver::new(
            "sh -c 'exec sleep 5' resolver",
            Duration::from_millis(200),
            dir.path(),
        )
        .expect("parse");
        let start = Instant::now();
        assert!(matches!(
            resolver.resolve(&spec),
            Err(ResolveError::Timeout(_))
        ));
        assert!(start.elapsed() < Duration::from_secs(4));
    }
}
