//! Build configuration loaded from `make.toml`.
//!
//! The file holds one table per named target; `[make]` is the default.
//! Every field has a fallback, so a minimal target table is valid. The
//! resolved [`BuildConfig`] is constructed once and passed by reference into
//! every component; there is no ambient global state.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Config file name in the working root.
pub const CONFIG_FILE: &str = "make.toml";

/// Target table used when none is selected on the command line.
pub const DEFAULT_TARGET: &str = "make";

/// File patterns handed to the packer for plain (non-binarized) inclusion.
pub const DEFAULT_INCLUDE_PATTERNS: &[&str] = &[
    "*.pac", "*.paa", "*.sqf", "*.sqs", "*.bikb", "*.fsm", "*.wss", "*.ogg", "*.wav", "*.fxy",
    "*.csv", "*.html", "*.lip", "*.txt", "*.wrp", "*.bisurf", "*.xml", "*.hqf", "*.rtm",
    "*.rvmat", "*.shp",
];

/// Resolved settings for the active target. Read-only after loading.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Working root: where `make.toml`, the cache, and scratch files live.
    pub root: PathBuf,
    /// Project display name, e.g. `@my_mod`.
    pub project: String,
    /// Root that module identifiers are relative to.
    pub project_root: PathBuf,
    /// Location of module directories.
    pub module_root: PathBuf,
    /// Signing key name configured for this target.
    pub key: Option<String>,
    /// Run discovery when no module list was given.
    pub module_autodetect: bool,
    /// Module list used when the command line names none and
    /// autodetection is disabled.
    pub modules: Vec<String>,
    /// Directory names excluded from discovery.
    pub ignore: Vec<String>,
    /// Packer program name, resolved on PATH.
    pub build_tool: String,
    /// Signing program name, resolved on PATH.
    pub sign_tool: String,
    /// Key-creation program name, resolved on PATH.
    pub key_tool: String,
    /// Output/release directory.
    pub release_dir: PathBuf,
    /// Optional prefix applied to artifact file names after the build.
    pub name_prefix: Option<String>,
    /// Artifact file extension, without the dot.
    pub artifact_ext: String,
    /// Marker file that qualifies a directory as a module.
    pub marker: String,
    /// Include patterns written to the scratch include-list file.
    pub include_patterns: Vec<String>,
    /// Suppress backend console output.
    pub quiet: bool,
}

#[derive(Debug, Default, Deserialize)]
struct TargetToml {
    project: Option<String>,
    project_root: Option<PathBuf>,
    module_root: Option<PathBuf>,
    key: Option<String>,
    module_autodetect: Option<bool>,
    modules: Option<Vec<String>>,
    ignore: Option<Vec<String>>,
    build_tool: Option<String>,
    sign_tool: Option<String>,
    key_tool: Option<String>,
    release_dir: Option<PathBuf>,
    name_prefix: Option<String>,
    artifact_ext: Option<String>,
    marker: Option<String>,
    include_patterns: Option<Vec<String>>,
    quiet: Option<bool>,
}

impl BuildConfig {
    /// Load the `[target]` table from `<root>/make.toml`.
    ///
    /// A missing file or missing target table is fatal: without a usable
    /// target the run cannot proceed.
    pub fn load(root: &Path, target: &str) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        let tables: BTreeMap<String, TargetToml> = toml::from_str(&raw)
            .with_context(|| format!("parsing config '{}'", path.display()))?;

        let Some(section) = tables.get(target) else {
            let known = tables.keys().cloned().collect::<Vec<_>>().join(", ");
            bail!(
                "no [{}] table in '{}'; available targets: {}",
                target,
                path.display(),
                if known.is_empty() { "(none)" } else { known.as_str() }
            );
        };

        Ok(Self::resolve(root, section))
    }

    fn resolve(root: &Path, section: &TargetToml) -> Self {
        let default_project = || {
            let dir_name = root
                .file_name()
                .and_then(|part| part.to_str())
                .unwrap_or("project");
            format!("@{dir_name}")
        };

        let project_root = absolutize(root, section.project_root.as_deref(), root);
        let module_root = absolutize(root, section.module_root.as_deref(), &project_root);
        let release_dir = absolutize(root, section.release_dir.as_deref(), &root.join("release"));

        Self {
            root: root.to_path_buf(),
            project: section.project.clone().unwrap_or_else(default_project),
            project_root,
            module_root,
            key: section.key.clone(),
            module_autodetect: section.module_autodetect.unwrap_or(true),
            modules: section.modules.clone().unwrap_or_default(),
            ignore: section
                .ignore
                .clone()
                .unwrap_or_else(|| vec!["release".to_string()]),
            build_tool: section
                .build_tool
                .clone()
                .unwrap_or_else(|| "addonbuilder".to_string()),
            sign_tool: section
                .sign_tool
                .clone()
                .unwrap_or_else(|| "dssignfile".to_string()),
            key_tool: section
                .key_tool
                .clone()
                .unwrap_or_else(|| "dscreatekey".to_string()),
            release_dir,
            name_prefix: section.name_prefix.clone(),
            artifact_ext: section
                .artifact_ext
                .clone()
                .unwrap_or_else(|| "pbo".to_string()),
            marker: section
                .marker
                .clone()
                .unwrap_or_else(|| "config.cpp".to_string()),
            include_patterns: section.include_patterns.clone().unwrap_or_else(|| {
                DEFAULT_INCLUDE_PATTERNS
                    .iter()
                    .map(|p| p.to_string())
                    .collect()
            }),
            quiet: section.quiet.unwrap_or(false),
        }
    }

    /// Directory the packer writes artifacts into.
    pub fn addons_dir(&self) -> PathBuf {
        self.release_dir.join(&self.project).join("addons")
    }

    /// Directory the packer writes per-module build logs into.
    pub fn build_log_dir(&self) -> PathBuf {
        self.release_dir.join(&self.project).join("temp")
    }

    /// Persisted build cache location.
    pub fn cache_path(&self) -> PathBuf {
        self.root.join(crate::cache::CACHE_FILE)
    }

    /// Scratch include-list file handed to the packer, removed after the run.
    pub fn include_file(&self) -> PathBuf {
        self.root.join("~make.includes")
    }
}

fn absolutize(root: &Path, value: Option<&Path>, fallback: &Path) -> PathBuf {
    let chosen = value.unwrap_or(fallback);
    if chosen.is_absolute() {
        chosen.to_path_buf()
    } else {
        root.join(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn minimal_target_gets_defaults() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE), "[make]\n").unwrap();

        let config = BuildConfig::load(tmp.path(), DEFAULT_TARGET).unwrap();
        assert!(config.project.starts_with('@'));
        assert_eq!(config.project_root, tmp.path());
        assert_eq!(config.module_root, tmp.path());
        assert_eq!(config.release_dir, tmp.path().join("release"));
        assert_eq!(config.artifact_ext, "pbo");
        assert_eq!(config.marker, "config.cpp");
        assert!(config.module_autodetect);
        assert_eq!(config.ignore, vec!["release".to_string()]);
        assert!(!config.include_patterns.is_empty());
    }

    #[test]
    fn named_target_overrides() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILE),
            r#"
[make]
project = "@default"

[ci]
project = "@ci_build"
module_root = "source"
release_dir = "out"
name_prefix = "myproj_"
quiet = true
modules = ["alpha", "beta"]
"#,
        )
        .unwrap();

        let config = BuildConfig::load(tmp.path(), "ci").unwrap();
        assert_eq!(config.project, "@ci_build");
        assert_eq!(config.module_root, tmp.path().join("source"));
        assert_eq!(config.release_dir, tmp.path().join("out"));
        assert_eq!(config.name_prefix.as_deref(), Some("myproj_"));
        assert!(config.quiet);
        assert_eq!(config.modules, vec!["alpha", "beta"]);
    }

    #[test]
    fn missing_config_is_fatal() {
        let tmp = TempDir::new().unwrap();
        assert!(BuildConfig::load(tmp.path(), DEFAULT_TARGET).is_err());
    }

    #[test]
    fn missing_target_table_is_fatal() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE), "[make]\n").unwrap();
        let err = BuildConfig::load(tmp.path(), "nope").unwrap_err();
        assert!(err.to_string().contains("no [nope] table"));
    }
}
