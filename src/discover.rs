//! Module discovery.
//!
//! A directory directly under the module root (or under its `addons/` or
//! `modules/` subdirectories) is a buildable module when it directly
//! contains the configured marker file and its name is not ignored. Only
//! one directory level is scanned per location. Module identifiers are
//! expressed relative to the project root so the rest of the pipeline can
//! resolve them uniformly regardless of which location produced them.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Marker file that requests pack-only mode (no binarization) for a module.
pub const NOBIN_MARKER: &str = "$NOBIN$";

/// Directory names never treated as modules, on top of the configured list.
pub const BUILTIN_IGNORES: &[&str] = &[".git", ".svn", ".cvs", ".darcs", ".DS_Store"];

/// Subdirectories of the module root that are also searched.
const SEARCH_SUBDIRS: &[&str] = &["addons", "modules"];

/// One buildable unit, immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Identifier relative to the project root (also the cache key).
    pub id: String,
    /// Absolute source directory.
    pub source: PathBuf,
    /// True when the no-binarize marker is present in the module directory.
    pub pack_only: bool,
}

impl Module {
    fn from_dir(project_root: &Path, dir: &Path) -> Self {
        let id = dir
            .strip_prefix(project_root)
            .unwrap_or(dir)
            .to_string_lossy()
            .replace('\\', "/");
        Self {
            id,
            pack_only: dir.join(NOBIN_MARKER).is_file(),
            source: dir.to_path_buf(),
        }
    }

    /// Resolve an explicitly named module against the search locations.
    ///
    /// The name may be a plain directory name or a path like `addons/alpha`.
    /// A name that resolves to no existing directory still yields a Module;
    /// the pipeline reports it as missing.
    pub fn from_name(project_root: &Path, module_root: &Path, name: &str) -> Self {
        let direct = module_root.join(name);
        if direct.is_dir() {
            return Self::from_dir(project_root, &direct);
        }
        for sub in SEARCH_SUBDIRS {
            let candidate = module_root.join(sub).join(name);
            if candidate.is_dir() {
                return Self::from_dir(project_root, &candidate);
            }
        }
        Self::from_dir(project_root, &direct)
    }

    /// Last path segment of the identifier; names the output artifact.
    pub fn name(&self) -> &str {
        self.id.rsplit('/').next().unwrap_or(&self.id)
    }
}

/// Scan the module root (and its `addons/` and `modules/` subdirectories)
/// for module directories, sorted by identifier.
pub fn discover(
    project_root: &Path,
    module_root: &Path,
    marker: &str,
    ignore: &[String],
) -> Result<Vec<Module>> {
    let mut modules = Vec::new();

    let mut locations = vec![module_root.to_path_buf()];
    locations.extend(SEARCH_SUBDIRS.iter().map(|sub| module_root.join(sub)));

    for location in locations {
        if !location.is_dir() {
            continue;
        }
        let entries = fs::read_dir(&location)
            .with_context(|| format!("reading module location '{}'", location.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| {
                format!("reading entry under '{}'", location.display())
            })?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|part| part.to_str()) else {
                continue;
            };
            if is_ignored(name, ignore) {
                continue;
            }
            if !path.join(marker).is_file() {
                continue;
            }
            modules.push(Module::from_dir(project_root, &path));
        }
    }

    modules.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(modules)
}

fn is_ignored(name: &str, ignore: &[String]) -> bool {
    BUILTIN_IGNORES.contains(&name) || ignore.iter().any(|entry| entry == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MARKER: &str = "config.cpp";

    fn make_module(root: &Path, rel: &str) {
        let dir = root.join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MARKER), "class CfgPatches {};").unwrap();
    }

    #[test]
    fn finds_modules_in_all_three_locations() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        make_module(root, "top_level");
        make_module(root, "addons/alpha");
        make_module(root, "modules/beta");

        let found = discover(root, root, MARKER, &[]).unwrap();
        let ids: Vec<&str> = found.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["addons/alpha", "modules/beta", "top_level"]);
    }

    #[test]
    fn requires_marker_file() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        make_module(root, "addons/alpha");
        fs::create_dir_all(root.join("addons/not_a_module")).unwrap();

        let found = discover(root, root, MARKER, &[]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "addons/alpha");
    }

    #[test]
    fn no_recursive_discovery() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        make_module(root, "addons/alpha/nested");

        let found = discover(root, root, MARKER, &[]).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn honors_ignore_list_and_builtins() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        make_module(root, "addons/alpha");
        make_module(root, "addons/release");
        make_module(root, "addons/.git");

        let ignore = vec!["release".to_string()];
        let found = discover(root, root, MARKER, &ignore).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "addons/alpha");
    }

    #[test]
    fn detects_pack_only_marker() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        make_module(root, "addons/alpha");
        make_module(root, "addons/beta");
        fs::write(root.join("addons/beta").join(NOBIN_MARKER), "").unwrap();

        let found = discover(root, root, MARKER, &[]).unwrap();
        assert!(!found[0].pack_only);
        assert!(found[1].pack_only);
    }

    #[test]
    fn ids_are_relative_to_project_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let module_root = root.join("source");
        make_module(&module_root, "addons/alpha");

        let found = discover(root, &module_root, MARKER, &[]).unwrap();
        assert_eq!(found[0].id, "source/addons/alpha");
        assert_eq!(found[0].name(), "alpha");
        assert!(found[0].source.starts_with(root));
    }

    #[test]
    fn from_name_resolves_search_locations() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        make_module(root, "addons/alpha");

        let module = Module::from_name(root, root, "alpha");
        assert_eq!(module.id, "addons/alpha");

        let missing = Module::from_name(root, root, "ghost");
        assert_eq!(missing.id, "ghost");
        assert!(!missing.source.is_dir());
    }
}
