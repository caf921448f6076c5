//! Per-module build pipeline.
//!
//! Each module runs through skip/build/sign independently; a failure is
//! converted into a [`BuildOutcome::Failed`] at this boundary and never
//! aborts the run. On success the module's fresh fingerprint is committed to
//! the cache and the cache is persisted immediately, so partial progress
//! survives a kill between modules.

use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::BuildCache;
use crate::config::BuildConfig;
use crate::discover::Module;
use crate::error::PipelineError;
use crate::fingerprint::{fingerprint_dir, Fingerprint};
use crate::tools::{BuildBackend, BuildRequest, Signer};

/// Lines of backend log surfaced after a failure.
const LOG_TAIL_LINES: usize = 5;

/// Terminal state of one module's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Built,
    Skipped,
    Failed,
}

/// Observable progress signal, one stream per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    Started { module: String },
    Skipped { module: String },
    Built { module: String, artifact: PathBuf },
    Failed { module: String, reason: String },
    BackendLog { module: String, lines: Vec<String> },
    KeyCreated { path: PathBuf },
    Archived { path: PathBuf },
    Deployed { dest: PathBuf },
    Warning(String),
    Summary { built: usize, skipped: usize, failed: usize },
}

/// Sink for [`BuildEvent`]s.
pub trait Reporter {
    fn report(&mut self, event: &BuildEvent);
}

/// Default reporter: tagged console lines, failures on stderr.
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn report(&mut self, event: &BuildEvent) {
        match event {
            BuildEvent::Started { module } => println!("[make:{module}] building"),
            BuildEvent::Skipped { module } => println!("[make:{module}] unchanged; skipping"),
            BuildEvent::Built { module, artifact } => {
                println!("[make:{module}] built {}", artifact.display());
            }
            BuildEvent::Failed { module, reason } => {
                eprintln!("[make:{module}] ERROR: {reason}");
            }
            BuildEvent::BackendLog { module, lines } => {
                eprintln!("[make:{module}] last {} lines of build log:", lines.len());
                for line in lines {
                    eprintln!("  {line}");
                }
            }
            BuildEvent::KeyCreated { path } => {
                println!("[make] created signing key {}", path.display());
            }
            BuildEvent::Archived { path } => {
                println!("[make] release archive {}", path.display());
            }
            BuildEvent::Deployed { dest } => {
                println!("[make] deployed to {}", dest.display());
            }
            BuildEvent::Warning(msg) => eprintln!("[make] WARNING: {msg}"),
            BuildEvent::Summary {
                built,
                skipped,
                failed,
            } => {
                println!("[make] built {built}, skipped {skipped} unchanged, {failed} failed");
            }
        }
    }
}

/// Reporter that records every event; for callers and test harnesses that
/// inspect the run instead of printing it.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub events: Vec<BuildEvent>,
}

impl Reporter for RecordingReporter {
    fn report(&mut self, event: &BuildEvent) {
        self.events.push(event.clone());
    }
}

/// Shared collaborators and run-wide state borrowed by each module's pipeline.
pub struct PipelineContext<'a> {
    pub config: &'a BuildConfig,
    pub backend: &'a dyn BuildBackend,
    /// Signer plus resolved private key path, when signing was requested.
    pub signing: Option<(&'a dyn Signer, &'a Path)>,
    pub cache: &'a mut BuildCache,
    /// Bypass the fingerprint check and rebuild unconditionally.
    pub force: bool,
    /// Scratch include-list file, when one was written for this run.
    pub include_file: Option<&'a Path>,
}

/// Run one module through the pipeline. Never propagates an error: every
/// failure is reported and folded into the returned outcome.
pub fn run_module(
    ctx: &mut PipelineContext,
    module: &Module,
    reporter: &mut dyn Reporter,
) -> BuildOutcome {
    if !module.source.is_dir() {
        let error = PipelineError::ModuleMissing(module.source.clone());
        reporter.report(&BuildEvent::Failed {
            module: module.id.clone(),
            reason: error.to_string(),
        });
        return BuildOutcome::Failed;
    }

    // Change detection. A fingerprint failure is not fatal to the module:
    // the build proceeds, it just cannot be cached this run.
    let mut new_fingerprint: Option<Fingerprint> = None;
    if !ctx.force {
        match fingerprint_dir(&module.source) {
            Ok(fingerprint) => {
                if ctx.cache.get(&module.id) == Some(fingerprint.as_str()) {
                    reporter.report(&BuildEvent::Skipped {
                        module: module.id.clone(),
                    });
                    return BuildOutcome::Skipped;
                }
                new_fingerprint = Some(fingerprint);
            }
            Err(e) => {
                reporter.report(&BuildEvent::Warning(format!(
                    "could not fingerprint '{}': {e}; building without cache update",
                    module.id
                )));
            }
        }
    }

    reporter.report(&BuildEvent::Started {
        module: module.id.clone(),
    });

    match build_module(ctx, module, new_fingerprint, reporter) {
        Ok(artifact) => {
            reporter.report(&BuildEvent::Built {
                module: module.id.clone(),
                artifact,
            });
            BuildOutcome::Built
        }
        Err(error) => {
            if matches!(error, PipelineError::Backend { .. }) {
                surface_backend_log(ctx.config, module, reporter);
            }
            reporter.report(&BuildEvent::Failed {
                module: module.id.clone(),
                reason: error.to_string(),
            });
            BuildOutcome::Failed
        }
    }
}

/// The `BUILDING` state: clean stale outputs, invoke the backend, rename and
/// sign the artifact, then commit the cache entry.
fn build_module(
    ctx: &mut PipelineContext,
    module: &Module,
    new_fingerprint: Option<Fingerprint>,
    reporter: &mut dyn Reporter,
) -> Result<PathBuf, PipelineError> {
    let out_dir = ctx.config.addons_dir();
    let artifact_name = format!("{}.{}", module.name(), ctx.config.artifact_ext);

    remove_stale_outputs(&out_dir, &artifact_name, ctx.config.name_prefix.as_deref())?;

    fs::create_dir_all(&out_dir).map_err(|source| PipelineError::OutputDir {
        path: out_dir.clone(),
        source,
    })?;

    ctx.backend.build(&BuildRequest {
        source: &module.source,
        out_dir: &out_dir,
        pack_only: module.pack_only,
        include_file: ctx.include_file,
        quiet: ctx.config.quiet,
    })?;

    let mut artifact = out_dir.join(&artifact_name);
    if !artifact.is_file() {
        return Err(PipelineError::ArtifactMissing(artifact));
    }

    if let Some(prefix) = ctx.config.name_prefix.as_deref() {
        let renamed = out_dir.join(format!("{prefix}{artifact_name}"));
        fs::rename(&artifact, &renamed).map_err(|source| PipelineError::Rename {
            from: artifact.clone(),
            to: renamed.clone(),
            source,
        })?;
        artifact = renamed;
    }

    if let Some((signer, key)) = ctx.signing {
        signer.sign(key, &artifact)?;
    }

    // Commit only after build+sign succeeded, and persist right away.
    if let Some(fingerprint) = new_fingerprint {
        ctx.cache.put(module.id.clone(), fingerprint);
        if let Err(e) = ctx.cache.persist(&ctx.config.cache_path()) {
            reporter.report(&BuildEvent::Warning(format!(
                "could not persist build cache: {e:#}"
            )));
        }
    }

    Ok(artifact)
}

/// Remove a previous artifact and its signature/log siblings: any file in
/// the output directory whose name starts with the artifact name, prefixed
/// or not.
fn remove_stale_outputs(
    out_dir: &Path,
    artifact_name: &str,
    prefix: Option<&str>,
) -> Result<(), PipelineError> {
    if !out_dir.is_dir() {
        return Ok(());
    }

    let prefixed = prefix.map(|p| format!("{p}{artifact_name}"));
    let entries = fs::read_dir(out_dir).map_err(|source| PipelineError::ArtifactRemoval {
        path: out_dir.to_path_buf(),
        source,
    })?;

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let stale = name.starts_with(artifact_name)
            || prefixed.as_deref().is_some_and(|p| name.starts_with(p));
        if !stale {
            continue;
        }
        fs::remove_file(entry.path()).map_err(|source| PipelineError::ArtifactRemoval {
            path: entry.path(),
            source,
        })?;
    }

    Ok(())
}

fn surface_backend_log(config: &BuildConfig, module: &Module, reporter: &mut dyn Reporter) {
    let log_path = config
        .build_log_dir()
        .join(format!("{}_packing.log", module.name()));
    let Ok(contents) = fs::read_to_string(&log_path) else {
        return;
    };

    let lines: Vec<&str> = contents.lines().collect();
    let tail = lines
        .iter()
        .skip(lines.len().saturating_sub(LOG_TAIL_LINES))
        .map(|line| line.to_string())
        .collect::<Vec<_>>();
    if tail.is_empty() {
        return;
    }

    reporter.report(&BuildEvent::BackendLog {
        module: module.id.clone(),
        lines: tail,
    });
}
