//! Collaborators that read the local filesystem
//!
//! - [`FileInfoProvider`]: size, modification time and content fingerprint
//! - [`SeriesOverrideProvider`]: folder-level series definitions
//! - [`MetadataProvider`]: per-file series metadata

pub mod file_info;
pub mod metadata;
pub mod series_override;

pub use file_info::{FileInfoProvider, FileStat, FsFileInfoProvider};
pub use metadata::{JsonSidecarMetadataProvider, MetadataProvider};
pub use series_override::{JsonSeriesOverrideProvider, SeriesOverrideProvider, SERIES_DEFINITION_FILE};
