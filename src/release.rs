//! Release packaging and test deployment.
//!
//! Archiving scrubs build logs out of the completed output tree, then writes
//! a deterministic `tar.zst` of the release directory (entries sorted,
//! mtimes zeroed) named `<project>-<version>.tar.zst`. Test deployment
//! replaces any previous copy of the project under the resolved target's
//! `mods/` directory.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tar::Builder as TarBuilder;
use walkdir::WalkDir;

use crate::tools::TestTargetResolver;

/// Zstd compression level for release archives.
const ZSTD_LEVEL: i32 = 3;

/// Recursively delete `*.log` files (case-insensitive) under `dir`.
/// Returns the number of files removed. A missing directory removes nothing.
pub fn scrub_logs(dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }

    let mut removed = 0usize;
    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let is_log = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("log"));
        if !is_log {
            continue;
        }
        fs::remove_file(entry.path())
            .with_context(|| format!("removing build log '{}'", entry.path().display()))?;
        removed += 1;
    }
    Ok(removed)
}

/// Archive the contents of `release_dir` into
/// `<dest_dir>/<project>-<version>.tar.zst` and return the archive path.
pub fn archive(
    release_dir: &Path,
    dest_dir: &Path,
    project: &str,
    version: &str,
) -> Result<PathBuf> {
    if !release_dir.is_dir() {
        anyhow::bail!(
            "release directory '{}' does not exist; nothing to archive",
            release_dir.display()
        );
    }

    let archive_path = dest_dir.join(format!("{project}-{version}.tar.zst"));
    create_tar_zst(release_dir, &archive_path)
        .with_context(|| format!("creating release archive '{}'", archive_path.display()))?;
    Ok(archive_path)
}

/// Copy the built project tree to `<target>/mods/<project>`, replacing any
/// previous copy.
pub fn deploy_to_test_target(
    release_dir: &Path,
    project: &str,
    resolver: &dyn TestTargetResolver,
) -> Result<PathBuf> {
    let target = resolver.resolve().context("resolving test target")?;
    let source = release_dir.join(project);
    if !source.is_dir() {
        anyhow::bail!(
            "built project tree '{}' does not exist; nothing to deploy",
            source.display()
        );
    }

    let dest = target.join("mods").join(project);
    if dest.exists() {
        fs::remove_dir_all(&dest)
            .with_context(|| format!("removing previous deployment '{}'", dest.display()))?;
    }
    copy_dir_recursive(&source, &dest)
        .with_context(|| format!("copying release tree to '{}'", dest.display()))?;
    Ok(dest)
}

/// Recursively copy a directory, preserving symlinks (not followed).
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    if !dst.exists() {
        fs::create_dir_all(dst)
            .with_context(|| format!("creating directory '{}'", dst.display()))?;
    }

    for entry in
        fs::read_dir(src).with_context(|| format!("reading directory '{}'", src.display()))?
    {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path)?;
            if dst_path.exists() || dst_path.is_symlink() {
                fs::remove_file(&dst_path)?;
            }
            std::os::unix::fs::symlink(&target, &dst_path)
                .with_context(|| format!("creating symlink '{}'", dst_path.display()))?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)
                .with_context(|| format!("copying file '{}'", src_path.display()))?;
        }
    }

    Ok(())
}

/// Deterministic tar.zst of a directory: entries sorted by relative path,
/// mtime/uid/gid zeroed.
fn create_tar_zst(src_dir: &Path, out_path: &Path) -> Result<()> {
    let out = File::create(out_path)
        .with_context(|| format!("creating '{}'", out_path.display()))?;
    let encoder = zstd::stream::Encoder::new(out, ZSTD_LEVEL)?;
    let mut builder = TarBuilder::new(encoder);

    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(src_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
    {
        if entry.path() == src_dir {
            continue;
        }
        entries.push(entry.path().to_path_buf());
    }

    entries.sort_by(|a, b| {
        let ra = a.strip_prefix(src_dir).unwrap_or(a).to_string_lossy();
        let rb = b.strip_prefix(src_dir).unwrap_or(b).to_string_lossy();
        ra.cmp(&rb)
    });

    for path in entries {
        let rel = path
            .strip_prefix(src_dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");

        let md = fs::symlink_metadata(&path)?;
        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            header.set_mode(md.permissions().mode());
        }

        if md.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_cksum();
            builder.append_data(&mut header, rel, std::io::empty())?;
        } else if md.file_type().is_symlink() {
            let target = fs::read_link(&path)?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            header.set_link_name(target.to_string_lossy().as_ref())?;
            header.set_cksum();
            builder.append_data(&mut header, rel, std::io::empty())?;
        } else if md.is_file() {
            let mut file = File::open(&path)?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(md.len());
            header.set_cksum();
            builder.append_data(&mut header, rel, &mut file)?;
        }
    }

    let encoder = builder
        .into_inner()
        .context("finalizing release archive tar stream")?;
    encoder.finish()?;
    Ok(())
}
