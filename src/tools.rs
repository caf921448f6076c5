//! External tool collaborators.
//!
//! The orchestration core never talks to a host environment directly: the
//! packer, the signer, key creation, and test-target lookup all sit behind
//! traits. The process-backed implementations here shell out to executables
//! resolved on PATH; tests substitute in-memory fakes.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::BuildConfig;
use crate::error::PipelineError;
use crate::pipeline::{BuildEvent, Reporter};

/// Environment variable naming the locally installed test target directory.
pub const TEST_TARGET_ENV: &str = "MODMAKE_TEST_DIR";

/// One packer invocation for a single module.
#[derive(Debug)]
pub struct BuildRequest<'a> {
    /// Absolute module source directory.
    pub source: &'a Path,
    /// Shared output directory the artifact is written into.
    pub out_dir: &'a Path,
    /// Pack without binarizing (no-binarize marker present).
    pub pack_only: bool,
    /// Scratch file listing include patterns, when one was written.
    pub include_file: Option<&'a Path>,
    /// Suppress the backend's console output.
    pub quiet: bool,
}

/// Turns a module source tree into a distributable artifact.
pub trait BuildBackend {
    fn build(&self, request: &BuildRequest) -> Result<(), PipelineError>;
}

/// Signs a built artifact with a private key.
pub trait Signer {
    fn sign(&self, key: &Path, artifact: &Path) -> Result<(), PipelineError>;
}

/// Creates a signing key pair in a working directory.
pub trait KeyCreator {
    fn create_key(&self, work_dir: &Path, name: &str) -> Result<()>;
}

/// Locates the locally installed target runtime for test deployment.
pub trait TestTargetResolver {
    fn resolve(&self) -> Result<PathBuf>;
}

/// Resolved absolute paths of the external build tools.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub packer: PathBuf,
    /// Present only when signing was requested.
    pub signer: Option<PathBuf>,
    /// Present only when signing was requested.
    pub key_tool: Option<PathBuf>,
}

impl Toolchain {
    /// Locate the configured executables on PATH.
    ///
    /// A missing packer is always fatal; the signing tools are only required
    /// when a key was requested.
    pub fn resolve(config: &BuildConfig, need_signing: bool) -> Result<Self> {
        let packer = which::which(&config.build_tool).with_context(|| {
            format!("build tool '{}' not found on PATH", config.build_tool)
        })?;

        let (signer, key_tool) = if need_signing {
            let signer = which::which(&config.sign_tool).with_context(|| {
                format!("sign tool '{}' not found on PATH", config.sign_tool)
            })?;
            let key_tool = which::which(&config.key_tool).with_context(|| {
                format!("key tool '{}' not found on PATH", config.key_tool)
            })?;
            (Some(signer), Some(key_tool))
        } else {
            (None, None)
        };

        Ok(Self {
            packer,
            signer,
            key_tool,
        })
    }
}

/// Packer invoked as an external process.
///
/// Called as `<packer> [-include=<file>] [-packonly] <source> <out_dir>`.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    program: PathBuf,
}

impl ProcessBackend {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

impl BuildBackend for ProcessBackend {
    fn build(&self, request: &BuildRequest) -> Result<(), PipelineError> {
        let mut cmd = Command::new(&self.program);
        if let Some(include_file) = request.include_file {
            cmd.arg(format!("-include={}", include_file.display()));
        }
        if request.pack_only {
            cmd.arg("-packonly");
        }
        cmd.arg(request.source).arg(request.out_dir);
        if request.quiet {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let status = cmd.status().map_err(|e| PipelineError::Backend {
            reason: format!("spawning '{}': {e}", self.program.display()),
        })?;
        if !status.success() {
            return Err(PipelineError::Backend {
                reason: format!("exit status {status}"),
            });
        }
        Ok(())
    }
}

/// Signer invoked as an external process: `<signer> <key> <artifact>`.
#[derive(Debug, Clone)]
pub struct ProcessSigner {
    program: PathBuf,
    quiet: bool,
}

impl ProcessSigner {
    pub fn new(program: PathBuf, quiet: bool) -> Self {
        Self { program, quiet }
    }
}

impl Signer for ProcessSigner {
    fn sign(&self, key: &Path, artifact: &Path) -> Result<(), PipelineError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(key).arg(artifact);
        if self.quiet {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let status = cmd.status().map_err(|e| PipelineError::Sign {
            artifact: artifact.to_path_buf(),
            reason: format!("spawning '{}': {e}", self.program.display()),
        })?;
        if !status.success() {
            return Err(PipelineError::Sign {
                artifact: artifact.to_path_buf(),
                reason: format!("exit status {status}"),
            });
        }
        Ok(())
    }
}

/// Key creator invoked as an external process, run in the working root:
/// `<key_tool> <name>` writes `<name>.privatekey` and `<name>.pubkey`.
#[derive(Debug, Clone)]
pub struct ProcessKeyCreator {
    program: PathBuf,
    quiet: bool,
}

impl ProcessKeyCreator {
    pub fn new(program: PathBuf, quiet: bool) -> Self {
        Self { program, quiet }
    }
}

impl KeyCreator for ProcessKeyCreator {
    fn create_key(&self, work_dir: &Path, name: &str) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(name).current_dir(work_dir);
        if self.quiet {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let status = cmd
            .status()
            .with_context(|| format!("spawning key tool '{}'", self.program.display()))?;
        if !status.success() {
            bail!("key tool '{}' exited with {status}", self.program.display());
        }
        Ok(())
    }
}

/// Test-target lookup via the `MODMAKE_TEST_DIR` environment variable.
#[derive(Debug, Clone, Default)]
pub struct EnvTestTarget;

impl TestTargetResolver for EnvTestTarget {
    fn resolve(&self) -> Result<PathBuf> {
        let raw = std::env::var(TEST_TARGET_ENV).with_context(|| {
            format!("test target not configured; set {TEST_TARGET_ENV} to the install directory")
        })?;
        let dir = PathBuf::from(raw);
        if !dir.is_dir() {
            bail!(
                "{TEST_TARGET_ENV} points at '{}', which is not a directory",
                dir.display()
            );
        }
        Ok(dir)
    }
}

/// Ensure the named signing key exists and return its private key path.
///
/// When `<root>/<name>.privatekey` is absent, the key tool is invoked to
/// create the pair and the public key is copied into `<release_dir>/keys/`.
/// A failed public-key copy is reported but does not fail key preparation.
pub fn prepare_key(
    root: &Path,
    release_dir: &Path,
    name: &str,
    creator: &dyn KeyCreator,
    reporter: &mut dyn Reporter,
) -> Result<PathBuf> {
    let private_key = root.join(format!("{name}.privatekey"));
    if private_key.is_file() {
        return Ok(private_key);
    }

    creator
        .create_key(root, name)
        .with_context(|| format!("creating signing key '{name}'"))?;
    if !private_key.is_file() {
        bail!(
            "key tool reported success but '{}' is missing",
            private_key.display()
        );
    }
    reporter.report(&BuildEvent::KeyCreated {
        path: private_key.clone(),
    });

    let public_key = root.join(format!("{name}.pubkey"));
    let keys_dir = release_dir.join("keys");
    let copy = fs::create_dir_all(&keys_dir)
        .map_err(anyhow::Error::from)
        .and_then(|()| {
            fs::copy(&public_key, keys_dir.join(format!("{name}.pubkey")))
                .map_err(anyhow::Error::from)
        });
    if let Err(e) = copy {
        reporter.report(&BuildEvent::Warning(format!(
            "could not copy public key '{}' to '{}': {e}",
            public_key.display(),
            keys_dir.display()
        )));
    }

    Ok(private_key)
}
