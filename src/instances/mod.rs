// Instance catalog and version resolution
pub mod catalog;
pub mod versions;

pub use catalog::InstanceCatalog;
pub use versions::{normalize_versions, Selection, VersionResolver};
