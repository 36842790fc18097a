//! hylaunch engine
//!
//! Instance lifecycle and download orchestration for the Hytale launcher:
//! version selection, download/install/launch progress, game process
//! supervision, the "latest" update gate and batch mod installs.
//!
//! The native side is abstracted as [`ExecutionBackend`]; the host feeds its
//! push events and user commands into [`Orchestrator::run`] and renders the
//! published [`EngineSnapshot`].

pub mod backend;
pub mod config;
pub mod instances;
pub mod launch;
pub mod logging;
pub mod mod_batch;
pub mod orchestrator;
pub mod retry;

pub use backend::{accepted, ExecutionBackend};
pub use config::EngineConfig;
pub use instances::{normalize_versions, InstanceCatalog, Selection, VersionResolver};
pub use launch::{
    DownloadBucket, DownloadController, LaunchSupervisor, PendingUpdateChoice, PendingUpdateGate,
    RunState,
};
pub use logging::{cleanup_old_logs, setup_logging};
pub use mod_batch::{BatchReport, BatchSnapshot, ModBatchInstaller};
pub use orchestrator::{EngineCommand, EngineSnapshot, Orchestrator, PlayOutcome};
pub use retry::RetryPolicy;

// Re-export shared types so hosts depend on one crate
pub use hylaunch_core::*;
pub use hylaunch_db::{CrashRecord, ModInstallRecord, SessionHistory, SessionOutcome, SessionRecord};
