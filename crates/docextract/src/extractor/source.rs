//! Resolving a stored document path into its bytes.

use std::io::ErrorKind;
use std::path::Path;

use crate::error::ExtractError;

/// Upstream boundary: storage that hands out document bytes.
pub trait SourceResolver: Send + Sync {
    fn resolve(&self, path: &Path) -> Result<Vec<u8>, ExtractError>;
}

/// Reads documents straight from the local filesystem.
///
/// Missing files, directories and permission problems are permanent
/// (`SourceUnreadable`). Any other I/O error is reported as transient.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSourceResolver;

impl FsSourceResolver {
    pub fn new() -> Self {
        Self
    }
}

impl SourceResolver for FsSourceResolver {
    fn resolve(&self, path: &Path) -> Result<Vec<u8>, ExtractError> {
        if path.is_dir() {
            return Err(ExtractError::SourceUnreadable {
                path: path.to_path_buf(),
                reason: "path is a directory".to_string(),
            });
        }

        std::fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidInput => {
                ExtractError::SourceUnreadable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            }
            _ => ExtractError::Transient(format!("Failed to read '{}': {}", path.display(), e)),
        })
    }
}
