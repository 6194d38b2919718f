//! Per-file metadata sidecars
//!
//! `Batman 001.cbz` reads `Batman 001.json` from the same folder, holding a
//! [`FileMetadata`] object. Embedders with an archive reader plug in their
//! own [`MetadataProvider`].

use std::io;
use std::path::Path;

use super::series_override::SERIES_DEFINITION_FILE;
use crate::models::FileMetadata;

pub const SIDECAR_EXTENSION: &str = "json";

/// Metadata source for comic files
///
/// Synchronous: the scanner calls it from blocking worker threads.
pub trait MetadataProvider: Send + Sync {
    /// `Ok(None)` when the file carries no metadata
    fn read(&self, path: &Path) -> io::Result<Option<FileMetadata>>;
}

#[derive(Debug, Clone, Default)]
pub struct JsonSidecarMetadataProvider;

impl JsonSidecarMetadataProvider {
    pub fn new() -> Self {
        Self
    }
}

impl MetadataProvider for JsonSidecarMetadataProvider {
    fn read(&self, path: &Path) -> io::Result<Option<FileMetadata>> {
        let sidecar = path.with_extension(SIDECAR_EXTENSION);
        // `series.cbz` would otherwise pick up the folder definition
        if sidecar.file_name().map_or(true, |name| name == SERIES_DEFINITION_FILE) {
            return Ok(None);
        }

        let raw = match std::fs::read_to_string(&sidecar) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_sidecar_next_to_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Saga 001.json"),
            r#"{"series": "Saga", "publisher": "Image", "year": 2012, "genres": ["Sci-Fi"]}"#,
        )
        .unwrap();

        let metadata = JsonSidecarMetadataProvider::new()
            .read(&dir.path().join("Saga 001.cbz"))
            .unwrap()
            .unwrap();
        assert_eq!(metadata.series.as_deref(), Some("Saga"));
        assert_eq!(metadata.publisher.as_deref(), Some("Image"));
        assert_eq!(metadata.year, Some(2012));
    }

    #[test]
    fn test_missing_sidecar_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let provider = JsonSidecarMetadataProvider::new();
        assert!(provider.read(&dir.path().join("Saga 001.cbz")).unwrap().is_none());
    }

    #[test]
    fn test_folder_definition_is_not_a_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SERIES_DEFINITION_FILE), r#"{"name": "Saga"}"#).unwrap();
        let provider = JsonSidecarMetadataProvider::new();
        assert!(provider.read(&dir.path().join("series.cbz")).unwrap().is_none());
    }

    #[test]
    fn test_malformed_sidecar_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Saga 001.json"), "{not json").unwrap();
        let err = JsonSidecarMetadataProvider::new()
            .read(&dir.path().join("Saga 001.cbz"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
