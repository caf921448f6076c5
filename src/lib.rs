//! Incremental build orchestrator for multi-module addon projects.
//!
//! Discovers buildable modules under a project tree, decides which ones need
//! rebuilding from content fingerprints, invokes an external packer per
//! module, optionally signs and renames the results, and persists build
//! state between runs.
//!
//! - **Fingerprinting** - sha256 over file contents and relative paths,
//!   stable walk order
//! - **Build cache** - flat JSON map of module id to fingerprint, rewritten
//!   after every module
//! - **Discovery** - marker-file scan of the module root and its `addons/`
//!   and `modules/` subdirectories
//! - **Pipeline** - skip/build/rename/sign per module with failure isolation
//! - **Release** - log scrub plus deterministic tar.zst archive, optional
//!   deployment to a local test target
//!
//! Modules are built independently, sequentially, in source order; a single
//! module's failure never aborts the run. The external packer, signer, key
//! creator, and test-target lookup are trait collaborators so callers and
//! tests can substitute their own.

pub mod cache;
pub mod config;
pub mod discover;
pub mod error;
pub mod fingerprint;
pub mod orchestrator;
pub mod pipeline;
pub mod release;
pub mod tools;

pub use cache::BuildCache;
pub use config::BuildConfig;
pub use discover::Module;
pub use error::{FingerprintError, PipelineError};
pub use orchestrator::{run, Collaborators, RunCounters, RunOptions, SigningTools};
pub use pipeline::{BuildEvent, BuildOutcome, ConsoleReporter, RecordingReporter, Reporter};
