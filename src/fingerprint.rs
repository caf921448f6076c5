//! Content fingerprinting for change detection.
//!
//! A module's fingerprint is a sha256 over its file contents, visited in a
//! stable order (entries sorted by path relative to the module root). Each
//! file contributes its relative path followed by the digests of its content
//! chunks, so renaming a file changes the fingerprint even when the bytes
//! are identical. Fingerprints are only compared against values computed on
//! the same machine; they are not a cross-machine reproducibility guarantee.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::FingerprintError;

/// Opaque content digest for a directory tree.
pub type Fingerprint = String;

const CHUNK_SIZE: usize = 64 * 1024;

/// Compute the fingerprint of every regular file under `dir`.
///
/// Files that cannot be opened are skipped. Read failures mid-file and walk
/// failures abort the whole computation; a partial digest is never returned.
pub fn fingerprint_dir(dir: &Path) -> Result<Fingerprint, FingerprintError> {
    if !dir.is_dir() {
        return Err(FingerprintError::DirectoryNotFound(dir.to_path_buf()));
    }

    // Collect paths first so the fold order is stable run-to-run.
    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| dir.to_path_buf());
            match e.into_io_error() {
                Some(source) => FingerprintError::Io { path, source },
                None => FingerprintError::DirectoryNotFound(dir.to_path_buf()),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        files.push((rel, entry.path().to_path_buf()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut tree = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    for (rel, path) in files {
        let mut file = match File::open(&path) {
            Ok(f) => f,
            // Unreadable file: not part of the fingerprint.
            Err(_) => continue,
        };

        tree.update(rel.as_bytes());
        tree.update([0u8]);

        loop {
            let n = file
                .read(&mut buf)
                .map_err(|source| FingerprintError::Io {
                    path: path.clone(),
                    source,
                })?;
            if n == 0 {
                break;
            }
            let chunk = Sha256::digest(&buf[..n]);
            tree.update(chunk);
        }
    }

    Ok(format!("{:x}", tree.finalize()))
}
