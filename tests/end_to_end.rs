//! Full-run scenarios: discovery, incremental rebuilds, failure isolation,
//! and release archiving, with fake collaborators standing in for the
//! external tools.

use std::cell::RefCell;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::Result;
use modmake::error::PipelineError;
use modmake::orchestrator::{self, Collaborators, RunOptions};
use modmake::pipeline::RecordingReporter;
use modmake::tools::{BuildBackend, BuildRequest, TestTargetResolver};
use modmake::{BuildConfig, BuildEvent};
use tempfile::TempDir;

/// Packer fake: writes `<source dir name>.pbo` into the output directory and
/// remembers which sources it was invoked for.
#[derive(Default)]
struct FakeBackend {
    invoked: RefCell<Vec<PathBuf>>,
    fail_for: Option<String>,
}

impl BuildBackend for FakeBackend {
    fn build(&self, request: &BuildRequest) -> Result<(), PipelineError> {
        self.invoked.borrow_mut().push(request.source.to_path_buf());
        let name = request
            .source
            .file_name()
            .and_then(|part| part.to_str())
            .unwrap_or("module");
        if self.fail_for.as_deref() == Some(name) {
            return Err(PipelineError::Backend {
                reason: "exit status 1".to_string(),
            });
        }
        fs::write(request.out_dir.join(format!("{name}.pbo")), name).unwrap();
        Ok(())
    }
}

struct FixedTarget(PathBuf);

impl TestTargetResolver for FixedTarget {
    fn resolve(&self) -> Result<PathBuf> {
        Ok(self.0.clone())
    }
}

struct NoTarget;

impl TestTargetResolver for NoTarget {
    fn resolve(&self) -> Result<PathBuf> {
        anyhow::bail!("no test target installed")
    }
}

fn make_modules(root: &Path) {
    for name in ["alpha", "beta"] {
        let dir = root.join("addons").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.cpp"), format!("class {name} {{}};")).unwrap();
        fs::write(dir.join("script.sqf"), "hint \"hello\";").unwrap();
    }
}

fn setup_project(root: &Path) -> BuildConfig {
    fs::write(
        root.join("make.toml"),
        "[make]\nproject = \"@demo\"\n",
    )
    .unwrap();
    make_modules(root);
    BuildConfig::load(root, "make").unwrap()
}

fn run_once(
    config: &BuildConfig,
    backend: &FakeBackend,
    options: &RunOptions,
) -> (orchestrator::RunCounters, RecordingReporter) {
    let mut reporter = RecordingReporter::default();
    let collaborators = Collaborators {
        backend,
        signing: None,
        test_target: &NoTarget,
    };
    let counters = orchestrator::run(config, options, &collaborators, &mut reporter).unwrap();
    (counters, reporter)
}

#[test]
fn incremental_rebuild_cycle() {
    let tmp = TempDir::new().unwrap();
    let config = setup_project(tmp.path());
    let backend = FakeBackend::default();

    // First run: empty cache, both modules build.
    let (counters, _) = run_once(&config, &backend, &RunOptions::default());
    assert_eq!((counters.built, counters.skipped, counters.failed), (2, 0, 0));
    assert!(config.addons_dir().join("alpha.pbo").is_file());
    assert!(config.addons_dir().join("beta.pbo").is_file());

    // Second run: nothing changed, both skip and the backend stays idle.
    let (counters, _) = run_once(&config, &backend, &RunOptions::default());
    assert_eq!((counters.built, counters.skipped, counters.failed), (0, 2, 0));
    assert_eq!(backend.invoked.borrow().len(), 2);

    // Touch one byte in alpha: only alpha rebuilds.
    fs::write(
        tmp.path().join("addons/alpha/script.sqf"),
        "hint \"hellp\";",
    )
    .unwrap();
    let (counters, reporter) = run_once(&config, &backend, &RunOptions::default());
    assert_eq!((counters.built, counters.skipped, counters.failed), (1, 1, 0));
    assert!(reporter.events.iter().any(|e| matches!(
        e,
        BuildEvent::Built { module, .. } if module == "addons/alpha"
    )));
    assert!(reporter.events.iter().any(|e| matches!(
        e,
        BuildEvent::Skipped { module } if module == "addons/beta"
    )));
}

#[test]
fn force_rebuilds_everything() {
    let tmp = TempDir::new().unwrap();
    let config = setup_project(tmp.path());
    let backend = FakeBackend::default();

    run_once(&config, &backend, &RunOptions::default());
    let (counters, _) = run_once(
        &config,
        &backend,
        &RunOptions {
            force: true,
            ..Default::default()
        },
    );
    assert_eq!((counters.built, counters.skipped, counters.failed), (2, 0, 0));
    assert_eq!(backend.invoked.borrow().len(), 4);
}

#[test]
fn one_failure_does_not_stop_the_run() {
    let tmp = TempDir::new().unwrap();
    let config = setup_project(tmp.path());
    let backend = FakeBackend {
        fail_for: Some("alpha".to_string()),
        ..Default::default()
    };

    let (counters, reporter) = run_once(&config, &backend, &RunOptions::default());
    assert_eq!((counters.built, counters.skipped, counters.failed), (1, 0, 1));
    assert_eq!(counters.attempted(), 2);
    assert!(config.addons_dir().join("beta.pbo").is_file());
    assert!(reporter.events.iter().any(|e| matches!(
        e,
        BuildEvent::Failed { module, .. } if module == "addons/alpha"
    )));

    // The failed module is rebuilt next run; the good one is cached.
    let backend = FakeBackend::default();
    let (counters, _) = run_once(&config, &backend, &RunOptions::default());
    assert_eq!((counters.built, counters.skipped, counters.failed), (1, 1, 0));
}

#[test]
fn explicit_module_names_skip_discovery() {
    let tmp = TempDir::new().unwrap();
    let config = setup_project(tmp.path());
    let backend = FakeBackend::default();

    let (counters, _) = run_once(
        &config,
        &backend,
        &RunOptions {
            modules: vec!["alpha".to_string()],
            ..Default::default()
        },
    );
    assert_eq!(counters.attempted(), 1);
    assert!(config.addons_dir().join("alpha.pbo").is_file());
    assert!(!config.addons_dir().join("beta.pbo").exists());
}

#[test]
fn discovery_overrides_configured_module_list() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("make.toml"),
        "[make]\nproject = \"@demo\"\nmodules = [\"alpha\"]\n",
    )
    .unwrap();
    make_modules(tmp.path());
    let config = BuildConfig::load(tmp.path(), "make").unwrap();
    let backend = FakeBackend::default();

    // With autodetection on (the default) the configured list is ignored
    // and every discoverable module is built.
    let (counters, _) = run_once(&config, &backend, &RunOptions::default());
    assert_eq!(counters.attempted(), 2);
    assert!(config.addons_dir().join("alpha.pbo").is_file());
    assert!(config.addons_dir().join("beta.pbo").is_file());
}

#[test]
fn configured_module_list_applies_when_autodetect_disabled() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("make.toml"),
        "[make]\nproject = \"@demo\"\nmodule_autodetect = false\nmodules = [\"alpha\"]\n",
    )
    .unwrap();
    make_modules(tmp.path());
    let config = BuildConfig::load(tmp.path(), "make").unwrap();
    let backend = FakeBackend::default();

    let (counters, _) = run_once(&config, &backend, &RunOptions::default());
    assert_eq!(counters.attempted(), 1);
    assert!(config.addons_dir().join("alpha.pbo").is_file());
    assert!(!config.addons_dir().join("beta.pbo").exists());
}

#[test]
fn missing_explicit_module_counts_as_failure() {
    let tmp = TempDir::new().unwrap();
    let config = setup_project(tmp.path());
    let backend = FakeBackend::default();

    let (counters, _) = run_once(
        &config,
        &backend,
        &RunOptions {
            modules: vec!["ghost".to_string()],
            ..Default::default()
        },
    );
    assert_eq!((counters.built, counters.skipped, counters.failed), (0, 0, 1));
    assert!(backend.invoked.borrow().is_empty());
}

#[test]
fn release_archive_contains_artifacts_and_no_logs() {
    let tmp = TempDir::new().unwrap();
    let config = setup_project(tmp.path());
    let backend = FakeBackend::default();

    // Simulate a backend log left behind in the output tree.
    let log_dir = config.build_log_dir();
    fs::create_dir_all(&log_dir).unwrap();
    fs::write(log_dir.join("alpha_packing.log"), "noise").unwrap();

    let (counters, reporter) = run_once(
        &config,
        &backend,
        &RunOptions {
            release: Some("1.2".to_string()),
            ..Default::default()
        },
    );
    assert_eq!(counters.built, 2);

    let archive_path = tmp.path().join("@demo-1.2.tar.zst");
    assert!(archive_path.is_file());
    assert!(reporter.events.iter().any(|e| matches!(
        e,
        BuildEvent::Archived { path } if path == &archive_path
    )));

    let file = File::open(&archive_path).unwrap();
    let decoder = zstd::stream::Decoder::new(file).unwrap();
    let mut archive = tar::Archive::new(decoder);
    let names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect();
    assert!(names.contains(&"@demo/addons/alpha.pbo".to_string()));
    assert!(names.iter().all(|n| !n.to_lowercase().ends_with(".log")));
}

#[test]
fn test_mode_deploys_built_tree() {
    let tmp = TempDir::new().unwrap();
    let config = setup_project(tmp.path());
    let backend = FakeBackend::default();
    let target = tmp.path().join("game");
    fs::create_dir_all(&target).unwrap();

    let mut reporter = RecordingReporter::default();
    let resolver = FixedTarget(target.clone());
    let collaborators = Collaborators {
        backend: &backend,
        signing: None,
        test_target: &resolver,
    };
    let options = RunOptions {
        test: true,
        ..Default::default()
    };
    orchestrator::run(&config, &options, &collaborators, &mut reporter).unwrap();

    assert!(target.join("mods/@demo/addons/alpha.pbo").is_file());
    assert!(reporter
        .events
        .iter()
        .any(|e| matches!(e, BuildEvent::Deployed { .. })));
}

#[test]
fn failed_deployment_is_reported_not_fatal() {
    let tmp = TempDir::new().unwrap();
    let config = setup_project(tmp.path());
    let backend = FakeBackend::default();

    let mut reporter = RecordingReporter::default();
    let collaborators = Collaborators {
        backend: &backend,
        signing: None,
        test_target: &NoTarget,
    };
    let options = RunOptions {
        test: true,
        ..Default::default()
    };
    let counters = orchestrator::run(&config, &options, &collaborators, &mut reporter).unwrap();

    assert_eq!(counters.built, 2);
    assert!(reporter
        .events
        .iter()
        .any(|e| matches!(e, BuildEvent::Warning(msg) if msg.contains("deployment"))));
}

#[test]
fn scratch_include_file_is_cleaned_up() {
    let tmp = TempDir::new().unwrap();
    let config = setup_project(tmp.path());
    let backend = FakeBackend::default();

    run_once(&config, &backend, &RunOptions::default());
    assert!(!config.include_file().exists());
}
