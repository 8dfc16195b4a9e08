//! Filesystem trait definitions
//!
//! [`FileSystem`] is the only contract a backing store has to satisfy to be
//! used by the interpreter or mounted into a [`MountableFs`](super::MountableFs).
//! Every failure is an [`FsError`] tagged with a POSIX error kind so builtins
//! can map it to conventional messages and exit codes.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Result type for filesystem operations.
pub type FsResult<T> = std::result::Result<T, FsError>;

/// Async filesystem trait.
///
/// All paths handed to an implementation are absolute and normalized
/// (no `.` or `..` components).
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read a file's contents, following symlinks.
    async fn read_file(&self, path: &Path) -> FsResult<Vec<u8>>;

    /// Write contents to a file, truncating it. The parent must exist.
    async fn write_file(&self, path: &Path, content: &[u8]) -> FsResult<()>;

    /// Append contents to a file, creating it if missing.
    async fn append_file(&self, path: &Path, content: &[u8]) -> FsResult<()>;

    /// Create a directory, optionally creating missing parents.
    async fn mkdir(&self, path: &Path, recursive: bool) -> FsResult<()>;

    /// Remove a file or directory.
    async fn remove(&self, path: &Path, options: RemoveOptions) -> FsResult<()>;

    /// Get metadata, following symlinks.
    async fn stat(&self, path: &Path) -> FsResult<Metadata>;

    /// Get metadata without following a final symlink.
    async fn lstat(&self, path: &Path) -> FsResult<Metadata>;

    /// Read directory entries.
    async fn read_dir(&self, path: &Path) -> FsResult<Vec<DirEntry>>;

    /// Check if a path exists.
    async fn exists(&self, path: &Path) -> FsResult<bool>;

    /// Rename/move a file or directory.
    async fn rename(&self, from: &Path, to: &Path) -> FsResult<()>;

    /// Copy a file, or a directory tree when `recursive` is set.
    async fn copy(&self, from: &Path, to: &Path, recursive: bool) -> FsResult<()>;

    /// Create a symbolic link at `link` pointing to `target`.
    async fn symlink(&self, target: &Path, link: &Path) -> FsResult<()>;

    /// Read a symbolic link's target.
    async fn read_link(&self, path: &Path) -> FsResult<PathBuf>;

    /// Change file permissions.
    async fn chmod(&self, path: &Path, mode: u32) -> FsResult<()>;
}

/// Options for [`FileSystem::remove`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Remove directories and their contents.
    pub recursive: bool,
    /// Ignore missing paths.
    pub force: bool,
}

impl RemoveOptions {
    /// Remove a single entry (file, symlink or empty directory).
    pub const fn single() -> Self {
        Self {
            recursive: false,
            force: false,
        }
    }

    /// Remove a whole tree.
    pub const fn recursive() -> Self {
        Self {
            recursive: true,
            force: false,
        }
    }
}

/// File metadata.
#[derive(Debug, Clone)]
pub struct Metadata {
    /// File type
    pub file_type: FileType,
    /// File size in bytes
    pub size: u64,
    /// File permissions (Unix mode)
    pub mode: u32,
    /// Last modification time
    pub modified: SystemTime,
}

impl Metadata {
    /// Metadata for a fresh file of `size` bytes.
    pub fn file(size: u64) -> Self {
        Self {
            file_type: FileType::File,
            size,
            mode: 0o644,
            modified: SystemTime::now(),
        }
    }

    /// Metadata for a fresh directory.
    pub fn directory() -> Self {
        Self {
            file_type: FileType::Directory,
            size: 0,
            mode: 0o755,
            modified: SystemTime::now(),
        }
    }

    /// Metadata for a fresh symlink.
    pub fn symlink() -> Self {
        Self {
            file_type: FileType::Symlink,
            size: 0,
            mode: 0o777,
            modified: SystemTime::now(),
        }
    }
}

/// File type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
}

impl FileType {
    /// Check if this is a file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Check if this is a symlink.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// Directory entry.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Entry name (not full path)
    pub name: String,
    /// Entry metadata (not following symlinks)
    pub metadata: Metadata,
}

/// POSIX error kinds surfaced by filesystem operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsErrorKind {
    /// No such file or directory
    NotFound,
    /// File exists
    AlreadyExists,
    /// Is a directory
    IsADirectory,
    /// Not a directory
    NotADirectory,
    /// Directory not empty
    NotEmpty,
    /// Invalid argument
    InvalidInput,
    /// Device or resource busy (mount point in use)
    Busy,
    /// Too many levels of symbolic links
    Loop,
    /// Cross-device link
    CrossDevice,
    /// Operation not permitted
    PermissionDenied,
}

impl FsErrorKind {
    /// Conventional errno symbol, e.g. `ENOENT`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "ENOENT",
            Self::AlreadyExists => "EEXIST",
            Self::IsADirectory => "EISDIR",
            Self::NotADirectory => "ENOTDIR",
            Self::NotEmpty => "ENOTEMPTY",
            Self::InvalidInput => "EINVAL",
            Self::Busy => "EBUSY",
            Self::Loop => "ELOOP",
            Self::CrossDevice => "EXDEV",
            Self::PermissionDenied => "EPERM",
        }
    }

    /// Message in the phrasing coreutils uses.
    pub fn message(&self) -> &'static str {
        match self {
            Self::NotFound => "No such file or directory",
            Self::AlreadyExists => "File exists",
            Self::IsADirectory => "Is a directory",
            Self::NotADirectory => "Not a directory",
            Self::NotEmpty => "Directory not empty",
            Self::InvalidInput => "Invalid argument",
            Self::Busy => "Device or resource busy",
            Self::Loop => "Too many levels of symbolic links",
            Self::CrossDevice => "Invalid cross-device link",
            Self::PermissionDenied => "Operation not permitted",
        }
    }
}

impl fmt::Display for FsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A filesystem failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {}, '{}'", .kind.message(), .path.display())]
pub struct FsError {
    /// What went wrong.
    pub kind: FsErrorKind,
    /// The path the operation failed on.
    pub path: PathBuf,
}

impl FsError {
    /// Create an error of `kind` for `path`.
    pub fn new(kind: FsErrorKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::new(FsErrorKind::NotFound, path)
    }

    pub fn already_exists(path: impl Into<PathBuf>) -> Self {
        Self::new(FsErrorKind::AlreadyExists, path)
    }

    pub fn is_a_directory(path: impl Into<PathBuf>) -> Self {
        Self::new(FsErrorKind::IsADirectory, path)
    }

    pub fn not_a_directory(path: impl Into<PathBuf>) -> Self {
        Self::new(FsErrorKind::NotADirectory, path)
    }

    pub fn not_empty(path: impl Into<PathBuf>) -> Self {
        Self::new(FsErrorKind::NotEmpty, path)
    }

    pub fn invalid(path: impl Into<PathBuf>) -> Self {
        Self::new(FsErrorKind::InvalidInput, path)
    }

    /// Message in the form builtins print: `PATH: No such file or directory`.
    pub fn describe(&self, shown_path: &str) -> String {
        format!("{}: {}", shown_path, self.kind.message())
    }
}
