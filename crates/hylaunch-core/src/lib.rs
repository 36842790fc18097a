pub mod error;
pub mod i18n;
pub mod types;

// Re-export commonly used items
pub use error::{ErrorKind, LauncherError, Result, UserError};
pub use i18n::Language;
pub use types::{
    // Instance types
    Branch,
    Instance,
    ValidationStatus,
    LATEST_VERSION,
    // Version types
    VersionState,
    VersionStatus,
    // Backend event types
    BackendErrorEvent,
    BackendEvent,
    DownloadProgressEvent,
    GameState,
    GameStateEvent,
    LauncherUpdateInfo,
    ProgressState,
    // Launch types
    LaunchOptions,
    PendingUpdateInfo,
    PendingUpdateRequest,
    SessionKind,
    // Mod types
    DownloadJob,
    InstalledMod,
    JobStatus,
    ModListing,
    ModQueueItem,
};
