//! Typed errors for the per-module pipeline.
//!
//! Only configuration and toolchain problems abort a run (those surface as
//! `anyhow::Error` from the loaders). Everything here is caught at the
//! pipeline boundary, turned into a counter update and a diagnostic event,
//! and the run moves on to the next module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from fingerprinting a module's source tree.
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("I/O failure while fingerprinting {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-module, non-fatal build errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("module source directory missing: {0}")]
    ModuleMissing(PathBuf),

    #[error("could not remove stale artifact {path}: {source}")]
    ArtifactRemoval {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("build backend failed: {reason}")]
    Backend { reason: String },

    #[error("backend reported success but artifact is missing: {0}")]
    ArtifactMissing(PathBuf),

    #[error("could not rename artifact {from} -> {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("signing {artifact} failed: {reason}")]
    Sign { artifact: PathBuf, reason: String },
}
