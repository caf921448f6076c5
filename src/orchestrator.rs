//! Run-level orchestration: discovery, cache, the per-module loop, the
//! final report, and optional release packaging / test deployment.
//!
//! Only configuration and toolchain problems abort a run. Per-module errors
//! become counter updates; packaging and deployment failures at the end of
//! the run are reported and swallowed so the run always finishes having
//! attempted every module.

use anyhow::Result;
use std::fs;

use crate::cache::BuildCache;
use crate::config::BuildConfig;
use crate::discover::{self, Module};
use crate::pipeline::{run_module, BuildEvent, BuildOutcome, PipelineContext, Reporter};
use crate::release;
use crate::tools::{prepare_key, BuildBackend, KeyCreator, Signer, TestTargetResolver};

/// Run modes selected on the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Ignore the cache and rebuild every targeted module.
    pub force: bool,
    /// Deploy the built tree to the local test target after building.
    pub test: bool,
    /// Archive the release directory with this version after building.
    pub release: Option<String>,
    /// Explicit module names; when non-empty, discovery is skipped.
    pub modules: Vec<String>,
}

/// Counts folded from per-module outcomes; the run's final report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub built: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunCounters {
    fn record(&mut self, outcome: BuildOutcome) {
        match outcome {
            BuildOutcome::Built => self.built += 1,
            BuildOutcome::Skipped => self.skipped += 1,
            BuildOutcome::Failed => self.failed += 1,
        }
    }

    pub fn attempted(&self) -> usize {
        self.built + self.skipped + self.failed
    }
}

/// External collaborators injected into a run.
pub struct Collaborators<'a> {
    pub backend: &'a dyn BuildBackend,
    /// Signer, key creator, and key name, when signing was requested.
    pub signing: Option<SigningTools<'a>>,
    pub test_target: &'a dyn TestTargetResolver,
}

pub struct SigningTools<'a> {
    pub signer: &'a dyn Signer,
    pub key_creator: &'a dyn KeyCreator,
    pub key_name: String,
}

/// Drive a full build run and return the counters.
pub fn run(
    config: &BuildConfig,
    options: &RunOptions,
    collaborators: &Collaborators,
    reporter: &mut dyn Reporter,
) -> Result<RunCounters> {
    // Signing key preparation is up-front and fatal: per-module signing
    // without a usable key would fail every module anyway.
    let signing = match &collaborators.signing {
        Some(tools) => {
            let key = prepare_key(
                &config.root,
                &config.release_dir,
                &tools.key_name,
                tools.key_creator,
                reporter,
            )?;
            Some((tools.signer, key))
        }
        None => None,
    };

    let mut cache = BuildCache::load(&config.cache_path());
    let modules = select_modules(config, options, reporter)?;

    let include_file = write_include_file(config, reporter);

    let mut counters = RunCounters::default();
    for module in &modules {
        let mut ctx = PipelineContext {
            config,
            backend: collaborators.backend,
            signing: signing
                .as_ref()
                .map(|(signer, key)| (*signer, key.as_path())),
            cache: &mut cache,
            force: options.force,
            include_file: include_file.as_deref(),
        };
        counters.record(run_module(&mut ctx, module, reporter));
    }

    reporter.report(&BuildEvent::Summary {
        built: counters.built,
        skipped: counters.skipped,
        failed: counters.failed,
    });

    // Packaging and deployment are best-effort and run even after
    // per-module failures.
    if let Some(version) = &options.release {
        match release::scrub_logs(&config.release_dir)
            .and_then(|_| release::archive(&config.release_dir, &config.root, &config.project, version))
        {
            Ok(path) => reporter.report(&BuildEvent::Archived { path }),
            Err(e) => reporter.report(&BuildEvent::Warning(format!(
                "release packaging failed: {e:#}"
            ))),
        }
    }

    if options.test {
        match release::deploy_to_test_target(
            &config.release_dir,
            &config.project,
            collaborators.test_target,
        ) {
            Ok(dest) => reporter.report(&BuildEvent::Deployed { dest }),
            Err(e) => {
                reporter.report(&BuildEvent::Warning(format!("test deployment failed: {e:#}")))
            }
        }
    }

    // Scratch cleanup happens regardless of how the run went.
    if let Some(path) = include_file {
        let _ = fs::remove_file(path);
    }

    Ok(counters)
}

/// Explicit CLI modules win; otherwise discovery when autodetection is
/// enabled; the configured default list only applies with autodetection off.
fn select_modules(
    config: &BuildConfig,
    options: &RunOptions,
    reporter: &mut dyn Reporter,
) -> Result<Vec<Module>> {
    if !options.modules.is_empty() {
        return Ok(resolve_named(config, &options.modules));
    }

    if config.module_autodetect {
        return discover::discover(
            &config.project_root,
            &config.module_root,
            &config.marker,
            &config.ignore,
        );
    }

    if !config.modules.is_empty() {
        return Ok(resolve_named(config, &config.modules));
    }

    reporter.report(&BuildEvent::Warning(
        "no modules named and autodetection is disabled; nothing to build".to_string(),
    ));
    Ok(Vec::new())
}

fn resolve_named(config: &BuildConfig, names: &[String]) -> Vec<Module> {
    names
        .iter()
        .map(|name| Module::from_name(&config.project_root, &config.module_root, name))
        .collect()
}

/// Write the scratch include-list file for the packer. Best-effort: on
/// failure the backend is invoked without one.
fn write_include_file(
    config: &BuildConfig,
    reporter: &mut dyn Reporter,
) -> Option<std::path::PathBuf> {
    if config.include_patterns.is_empty() {
        return None;
    }
    let path = config.include_file();
    let mut contents = config.include_patterns.join(";");
    contents.push(';');
    match fs::write(&path, contents) {
        Ok(()) => Some(path),
        Err(e) => {
            reporter.report(&BuildEvent::Warning(format!(
                "could not write include list '{}': {e}",
                path.display()
            )));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_fold_outcomes() {
        let mut counters = RunCounters::default();
        counters.record(BuildOutcome::Built);
        counters.record(BuildOutcome::Built);
        counters.record(BuildOutcome::Skipped);
        counters.record(BuildOutcome::Failed);

        assert_eq!(counters.built, 2);
        assert_eq!(counters.skipped, 1);
        assert_eq!(counters.failed, 1);
        assert_eq!(counters.attempted(), 4);
    }
}
