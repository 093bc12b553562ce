//! File location resolution for downloads and uploads.

use crate::error::HttpError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Symbolic base directory for transferred files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Directory {
    Documents,
    Data,
    Library,
    Cache,
    External,
    ExternalStorage,
}

/// Maps a caller-supplied path (plus optional symbolic directory) to a file
/// location, and gates access to it.
///
/// Implementations return [`HttpError::PermissionDenied`] when the location
/// may not be touched.
pub trait PathResolver: Send + Sync {
    /// Resolve `path` against `directory`.
    ///
    /// # Errors
    /// Returns `HttpError::PermissionDenied` if access is not allowed.
    fn resolve(&self, path: &str, directory: Option<Directory>) -> Result<PathBuf, HttpError>;
}

/// Resolver backed by the platform's well-known directories.
///
/// Absolute paths and `file://` URLs without a directory are used as given.
/// A relative path without a directory lands under [`Directory::Documents`].
/// Relative paths may not escape their directory.
#[derive(Debug, Clone, Default)]
pub struct PlatformPathResolver {
    /// Overrides every symbolic directory (useful for sandboxes and tests)
    root: Option<PathBuf>,
}

impl PlatformPathResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every symbolic directory under `root` instead of the platform locations.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn base_dir(&self, directory: Directory) -> Option<PathBuf> {
        if let Some(root) = &self.root {
            return Some(root.join(directory_name(directory)));
        }
        match directory {
            Directory::Documents => dirs::document_dir(),
            Directory::Data | Directory::Library => dirs::data_dir(),
            Directory::Cache => dirs::cache_dir(),
            Directory::External | Directory::ExternalStorage => dirs::home_dir(),
        }
    }
}

impl PathResolver for PlatformPathResolver {
    fn resolve(&self, path: &str, directory: Option<Directory>) -> Result<PathBuf, HttpError> {
        let path = path.strip_prefix("file://").unwrap_or(path);

        let directory = match directory {
            Some(directory) => directory,
            None if Path::new(path).is_absolute() => return Ok(PathBuf::from(path)),
            None => Directory::Documents,
        };

        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(HttpError::PermissionDenied(relative.to_path_buf()));
        }

        let base = self
            .base_dir(directory)
            .ok_or_else(|| HttpError::PermissionDenied(relative.to_path_buf()))?;
        Ok(base.join(relative))
    }
}

fn directory_name(directory: Directory) -> &'static str {
    match directory {
        Directory::Documents => "documents",
        Directory::Data => "data",
        Directory::Library => "library",
        Directory::Cache => "cache",
        Directory::External => "external",
        Directory::ExternalStorage => "external-storage",
    }
}
