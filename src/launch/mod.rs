// Download session, game process supervision and the "latest" update gate
pub mod download;
pub mod pending_update;
pub mod supervisor;

pub use download::{ActiveSession, DownloadBucket, DownloadController, ProgressFields, Transition};
pub use pending_update::{GateDecision, PendingUpdateChoice, PendingUpdateGate};
pub use supervisor::{
    Confirmation, CrashReport, LaunchSupervisor, PollOutcome, RunState, StopOutcome,
};
