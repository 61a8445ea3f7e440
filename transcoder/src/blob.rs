//! A tiny blob namespace abstraction over `file://` URIs.
//!
//! Source and destination job fields are plain URIs (see [`crate::queue::JobMeta`]);
//! today only the `file://` scheme is implemented, but keeping [`BlobStore`] as
//! a trait means adding an object-store-backed namespace later doesn't touch
//! [`crate::pipeline`] or [`crate::worker`].

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tempfile::NamedTempFile;
use thiserror::Error;
use walkdir::WalkDir;

/// Errors raised by blob namespace operations.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The URI scheme is not supported.
    #[error("unsupported blob namespace scheme: {0}")]
    UnsupportedScheme(String),
    /// The URI had no scheme and could not be normalized to an absolute path.
    #[error("could not resolve {0:?} to an absolute path")]
    UnresolvedPath(String),
    /// An underlying filesystem operation failed.
    #[error("{path}: {source}")]
    Io {
        /// Path the failing operation touched.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Normalizes a bare path or `file://` URI into an absolute `file://` URI.
///
/// Mirrors the CLI's historical behavior of treating any path without a
/// recognized scheme as a local path relative to the current directory.
pub fn normalize_uri(raw: &str) -> Result<String, BlobError> {
    if let Some(rest) = raw.strip_prefix("file://") {
        let abs = std::path::absolute(rest).map_err(|_| BlobError::UnresolvedPath(raw.to_string()))?;
        return Ok(format!("file://{}", abs.display()));
    }
    if raw.contains("://") {
        let scheme = raw.split("://").next().unwrap_or_default();
        return Err(BlobError::UnsupportedScheme(scheme.to_string()));
    }
    let abs = std::path::absolute(raw).map_err(|_| BlobError::UnresolvedPath(raw.to_string()))?;
    Ok(format!("file://{}", abs.display()))
}

/// A namespace of named blobs, addressed by filename relative to some root.
pub trait BlobStore {
    /// Lists every filename under the namespace, optionally filtered by a
    /// comma-separated, case-insensitive list of extensions (e.g. `"png,tif"`).
    fn list(&self, ext_filter: Option<&str>) -> Result<Vec<String>, BlobError>;
    /// Reads the full contents of `filename`.
    fn get(&self, filename: &str) -> Result<Vec<u8>, BlobError>;
    /// Writes `data` to `filename`, replacing any existing contents
    /// atomically (write to a temp file, then rename).
    fn put(&self, filename: &str, data: &[u8]) -> Result<(), BlobError>;
    /// Removes `filename`. Not an error if it does not exist.
    fn delete(&self, filename: &str) -> Result<(), BlobError>;
    /// Relocates `filename` to `dest/filename`, creating parent directories
    /// as needed. Used by [`crate::resin::ResinMode::Move`].
    fn move_to(&self, filename: &str, dest: &dyn BlobStore) -> Result<(), BlobError>;
    /// Joins `filename` onto this namespace's root, for diagnostics.
    fn join(&self, filename: &str) -> String;
}

/// A [`BlobStore`] rooted at a local directory.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Builds a store rooted at the path portion of a `file://` URI (or a
    /// bare path, normalized via [`normalize_uri`]).
    pub fn new(uri: &str) -> Result<Self, BlobError> {
        let normalized = normalize_uri(uri)?;
        let root = normalized
            .strip_prefix("file://")
            .expect("normalize_uri always returns a file:// URI")
            .into();
        Ok(Self { root })
    }

    fn resolve(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }
}

impl BlobStore for FileStore {
    fn list(&self, ext_filter: Option<&str>) -> Result<Vec<String>, BlobError> {
        let ext_filters: Option<Vec<String>> = ext_filter.map(|raw| {
            raw.split(',')
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect()
        });
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .expect("walkdir yields paths under root")
                .to_string_lossy()
                .replace('\\', "/");

            if let Some(ext_filters) = &ext_filters {
                let matches = entry
                    .path()
                    .extension()
                    .map(|e| {
                        let e = e.to_string_lossy().to_ascii_lowercase();
                        ext_filters.iter().any(|f| *f == e)
                    })
                    .unwrap_or(false);
                if !matches {
                    continue;
                }
            }
            names.push(rel);
        }
        names.sort();
        Ok(names)
    }

    fn get(&self, filename: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.resolve(filename);
        fs::read(&path).map_err(|source| BlobError::Io { path, source })
    }

    fn put(&self, filename: &str, data: &[u8]) -> Result<(), BlobError> {
        let path = self.resolve(filename);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| BlobError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let parent = path.parent().unwrap_or(&self.root);
        let mut tmp = NamedTempFile::new_in(parent).map_err(|source| BlobError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
        tmp.write_all(data).map_err(|source| BlobError::Io {
            path: path.clone(),
            source,
        })?;
        tmp.persist(&path).map_err(|e| BlobError::Io {
            path: path.clone(),
            source: e.error,
        })?;
        Ok(())
    }

    fn delete(&self, filename: &str) -> Result<(), BlobError> {
        let path = self.resolve(filename);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BlobError::Io { path, source }),
        }
    }

    fn move_to(&self, filename: &str, dest: &dyn BlobStore) -> Result<(), BlobError> {
        let data = self.get(filename)?;
        dest.put(filename, &data)?;
        self.delete(filename)
    }

    fn join(&self, filename: &str) -> String {
        format!("file://{}", self.root.join(filename).display())
    }
}

/// A [`BlobStore`] rooted at `<store's parent>/resin/`, the directory
/// [`crate::resin::ResinMode::Move`] relocates non-tissue tiles into, as a
/// sibling of the source directory rather than a subdirectory of it.
pub fn resin_sibling(store: &FileStore) -> Result<FileStore, BlobError> {
    let parent = store.root.parent().unwrap_or(&store.root);
    let root = parent.join("resin");
    fs::create_dir_all(&root).map_err(|source| BlobError::Io {
        path: root.clone(),
        source,
    })?;
    Ok(FileStore { root })
}
