//! Storage capability consumed by the extraction core
//!
//! The core never touches `std::fs` directly: every read, write and listing
//! goes through a [`Storage`] handed in at construction time. [`FsStorage`]
//! is the desktop/CLI implementation; tests use the in-memory one from
//! `test_utils`.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use log::debug;
use walkdir::WalkDir;

const APP_NAME: &str = "supernote-viewer";

/// Where a path is resolved
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Relative to the app-private storage root
    App,
    /// Arbitrary user-chosen path, used as given
    User,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: not found")]
    NotFound { path: PathBuf },
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { path }
        } else {
            Self::Io { path, source }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Kind of entry shown in the folder browser
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    Note,
    Pdf,
    Directory,
    Unknown,
}

impl FileType {
    pub fn from_name(name: &str) -> Self {
        match Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .as_deref()
        {
            Some("note") => FileType::Note,
            Some("pdf") => FileType::Pdf,
            _ => FileType::Unknown,
        }
    }
}

/// One directory listing entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub is_directory: bool,
    pub byte_size: u64,
    /// Modification time in epoch milliseconds
    pub modified: i64,
}

impl FileEntry {
    pub fn file_type(&self) -> FileType {
        if self.is_directory {
            FileType::Directory
        } else {
            FileType::from_name(&self.name)
        }
    }
}

pub trait Storage: Send + Sync {
    fn read(&self, path: &Path, scope: Scope) -> Result<Vec<u8>, StorageError>;

    /// Write `bytes` atomically, creating parent directories as needed
    fn write(&self, path: &Path, bytes: &[u8], scope: Scope) -> Result<(), StorageError>;

    fn exists(&self, path: &Path, scope: Scope) -> bool;

    /// Delete a file; a missing file is not an error
    fn delete(&self, path: &Path, scope: Scope) -> Result<(), StorageError>;

    fn create_dir(&self, path: &Path, scope: Scope) -> Result<(), StorageError>;

    /// Non-recursive listing sorted by name
    fn list_files(&self, dir: &Path) -> Result<Vec<FileEntry>, StorageError>;

    /// Modification time in epoch milliseconds
    fn modified(&self, path: &Path) -> Result<i64, StorageError>;

    /// Canonical absolute form of `path`, used as the cache key
    fn canonicalize(&self, path: &Path) -> Result<PathBuf, StorageError>;
}

/// Local filesystem storage
pub struct FsStorage {
    app_root: PathBuf,
}

impl FsStorage {
    pub fn new(app_root: PathBuf) -> Self {
        Self { app_root }
    }

    /// Storage rooted at the platform data directory
    pub fn with_default_root() -> Self {
        let root = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_NAME);
        Self::new(root)
    }

    pub fn app_root(&self) -> &Path {
        &self.app_root
    }

    fn resolve(&self, path: &Path, scope: Scope) -> PathBuf {
        match scope {
            Scope::App => self.app_root.join(path),
            Scope::User => path.to_path_buf(),
        }
    }
}

impl Storage for FsStorage {
    fn read(&self, path: &Path, scope: Scope) -> Result<Vec<u8>, StorageError> {
        let resolved = self.resolve(path, scope);
        debug!("Reading file {}", resolved.display());
        fs::read(&resolved).map_err(|e| StorageError::io(resolved, e))
    }

    fn write(&self, path: &Path, bytes: &[u8], scope: Scope) -> Result<(), StorageError> {
        let resolved = self.resolve(path, scope);
        debug!("Writing file {} ({} bytes)", resolved.display(), bytes.len());
        let parent = match resolved.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| StorageError::io(&parent, e))?;

        let mut tmp =
            tempfile::NamedTempFile::new_in(&parent).map_err(|e| StorageError::io(&parent, e))?;
        tmp.write_all(bytes)
            .map_err(|e| StorageError::io(tmp.path(), e))?;
        tmp.persist(&resolved)
            .map_err(|e| StorageError::io(&resolved, e.error))?;
        Ok(())
    }

    fn exists(&self, path: &Path, scope: Scope) -> bool {
        self.resolve(path, scope).exists()
    }

    fn delete(&self, path: &Path, scope: Scope) -> Result<(), StorageError> {
        let resolved = self.resolve(path, scope);
        debug!("Deleting file {}", resolved.display());
        match fs::remove_file(&resolved) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(resolved, e)),
        }
    }

    fn create_dir(&self, path: &Path, scope: Scope) -> Result<(), StorageError> {
        let resolved = self.resolve(path, scope);
        fs::create_dir_all(&resolved).map_err(|e| StorageError::io(resolved, e))
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<FileEntry>, StorageError> {
        debug!("Listing files from {}", dir.display());
        if !dir.is_dir() {
            return Err(StorageError::NotFound {
                path: dir.to_path_buf(),
            });
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                StorageError::io(path, e.into())
            })?;
            let metadata = entry
                .metadata()
                .map_err(|e| StorageError::io(entry.path(), e.into()))?;
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_directory: metadata.is_dir(),
                byte_size: metadata.len(),
                modified: system_time_millis(metadata.modified().ok()),
            });
        }
        Ok(entries)
    }

    fn modified(&self, path: &Path) -> Result<i64, StorageError> {
        let metadata = fs::metadata(path).map_err(|e| StorageError::io(path, e))?;
        Ok(system_time_millis(metadata.modified().ok()))
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf, StorageError> {
        fs::canonicalize(path).map_err(|e| StorageError::io(path, e))
    }
}

fn system_time_millis(time: Option<std::time::SystemTime>) -> i64 {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_millis() as i64)
}

/// Lexically normalize `path` against `cwd`, resolving `.` and `..`
/// without touching the filesystem.
pub fn normalize_path(cwd: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Human readable byte size, e.g. `1.5 MB`
pub fn byte_size_to_string(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
