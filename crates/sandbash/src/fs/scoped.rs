//! Directory-scoped view of a filesystem.
//!
//! [`ScopedFs`] exposes one directory of a backing store as its `/`. It is
//! what a named volume with a `:/prefix` or a `mount --bind` source becomes,
//! and it lets several tenants share one store without seeing each other.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::normalize_path;
use super::traits::{DirEntry, FileSystem, FsError, FsResult, Metadata, RemoveOptions};

/// A backing filesystem confined to a root prefix.
///
/// Paths are normalized before being joined to the prefix, so `..` can never
/// climb out of it. Symlink targets are stored as absolute paths inside the
/// prefix for the same reason.
///
/// ```rust
/// use sandbash::{FileSystem, InMemoryFs, ScopedFs};
/// use std::path::Path;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> sandbash::Result<()> {
/// let store = Arc::new(InMemoryFs::new());
/// let a = ScopedFs::create(store.clone(), "/mnt/a").await?;
/// let b = ScopedFs::create(store.clone(), "/mnt/b").await?;
///
/// a.write_file(Path::new("/file.txt"), b"tenant a").await?;
/// assert!(!b.exists(Path::new("/file.txt")).await?);
/// assert!(store.exists(Path::new("/mnt/a/file.txt")).await?);
/// # Ok(())
/// # }
/// ```
pub struct ScopedFs {
    inner: Arc<dyn FileSystem>,
    root: PathBuf,
}

impl ScopedFs {
    /// Scope `inner` to `root`. The prefix directory must already exist for
    /// writes to succeed; see [`ScopedFs::create`].
    pub fn new(inner: Arc<dyn FileSystem>, root: impl AsRef<Path>) -> Self {
        Self {
            inner,
            root: normalize_path(root.as_ref()),
        }
    }

    /// Scope `inner` to `root`, creating the prefix directory if needed.
    pub async fn create(inner: Arc<dyn FileSystem>, root: impl AsRef<Path>) -> FsResult<Self> {
        let scoped = Self::new(inner, root);
        scoped.inner.mkdir(&scoped.root, true).await?;
        Ok(scoped)
    }

    /// The prefix inside the backing store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn inner_path(&self, path: &Path) -> PathBuf {
        let path = normalize_path(path);
        match path.strip_prefix("/") {
            Ok(rel) if !rel.as_os_str().is_empty() => self.root.join(rel),
            _ => self.root.clone(),
        }
    }

    fn outer_path(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.root) {
            Ok(rel) => Path::new("/").join(rel),
            Err(_) => PathBuf::from("/"),
        }
    }

    /// Report backing-store errors with scoped paths.
    fn unscope(&self, err: FsError) -> FsError {
        let path = self.outer_path(&err.path);
        FsError::new(err.kind, path)
    }
}

#[async_trait]
impl FileSystem for ScopedFs {
    async fn read_file(&self, path: &Path) -> FsResult<Vec<u8>> {
        self.inner
            .read_file(&self.inner_path(path))
            .await
            .map_err(|e| self.unscope(e))
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> FsResult<()> {
        self.inner
            .write_file(&self.inner_path(path), content)
            .await
            .map_err(|e| self.unscope(e))
    }

    async fn append_file(&self, path: &Path, content: &[u8]) -> FsResult<()> {
        self.inner
            .append_file(&self.inner_path(path), content)
            .await
            .map_err(|e| self.unscope(e))
    }

    async fn mkdir(&self, path: &Path, recursive: bool) -> FsResult<()> {
        self.inner
            .mkdir(&self.inner_path(path), recursive)
            .await
            .map_err(|e| self.unscope(e))
    }

    async fn remove(&self, path: &Path, options: RemoveOptions) -> FsResult<()> {
        let inner = self.inner_path(path);
        if inner == self.root {
            return Err(FsError::new(super::FsErrorKind::Busy, "/"));
        }
        self.inner
            .remove(&inner, options)
            .await
            .map_err(|e| self.unscope(e))
    }

    async fn stat(&self, path: &Path) -> FsResult<Metadata> {
        self.inner
            .stat(&self.inner_path(path))
            .await
            .map_err(|e| self.unscope(e))
    }

    async fn lstat(&self, path: &Path) -> FsResult<Metadata> {
        self.inner
            .lstat(&self.inner_path(path))
            .await
            .map_err(|e| self.unscope(e))
    }

    async fn read_dir(&self, path: &Path) -> FsResult<Vec<DirEntry>> {
        self.inner
            .read_dir(&self.inner_path(path))
            .await
            .map_err(|e| self.unscope(e))
    }

    async fn exists(&self, path: &Path) -> FsResult<bool> {
        self.inner
            .exists(&self.inner_path(path))
            .await
            .map_err(|e| self.unscope(e))
    }

    async fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        self.inner
            .rename(&self.inner_path(from), &self.inner_path(to))
            .await
            .map_err(|e| self.unscope(e))
    }

    async fn copy(&self, from: &Path, to: &Path, recursive: bool) -> FsResult<()> {
        self.inner
            .copy(&self.inner_path(from), &self.inner_path(to), recursive)
            .await
            .map_err(|e| self.unscope(e))
    }

    async fn symlink(&self, target: &Path, link: &Path) -> FsResult<()> {
        // Pin the target inside the prefix: relative targets are resolved
        // against the link's directory first.
        let link = normalize_path(link);
        let virtual_target = if target.is_absolute() {
            normalize_path(target)
        } else {
            let parent = link.parent().unwrap_or(Path::new("/"));
            normalize_path(&parent.join(target))
        };
        self.inner
            .symlink(&self.inner_path(&virtual_target), &self.inner_path(&link))
            .await
            .map_err(|e| self.unscope(e))
    }

    async fn read_link(&self, path: &Path) -> FsResult<PathBuf> {
        let target = self
            .inner
            .read_link(&self.inner_path(path))
            .await
            .map_err(|e| self.unscope(e))?;
        Ok(self.outer_path(&target))
    }

    async fn chmod(&self, path: &Path, mode: u32) -> FsResult<()> {
        self.inner
            .chmod(&self.inner_path(path), mode)
            .await
            .map_err(|e| self.unscope(e))
    }
}
