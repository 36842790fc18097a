pub mod db;
pub mod history;
pub mod migrations;

// Re-export commonly used items
pub use db::{init_db, open_db, open_in_memory};
pub use history::{
    CrashRecord, ModInstallRecord, SessionHistory, SessionOutcome, SessionRecord,
};
