//! Overlay filesystem implementation.
//!
//! [`OverlayFs`] provides copy-on-write semantics by layering a writable upper
//! filesystem on top of a read-only lower (base) filesystem.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use super::memory::InMemoryFs;
use super::traits::{
    DirEntry, FileSystem, FileType, FsError, FsErrorKind, FsResult, Metadata, RemoveOptions,
};
use super::{copy_tree, normalize_path};

/// Copy-on-write overlay filesystem.
///
/// - **Reads**: check the upper layer first, fall back to the lower layer
/// - **Writes**: always go to the upper layer
/// - **Deletes**: recorded as whiteouts; the lower layer is never modified
///
/// A whiteout hides the lower entry and everything below it, so a directory
/// removed and then re-created starts empty.
///
/// ```rust
/// use sandbash::{Bash, FileSystem, InMemoryFs, OverlayFs};
/// use std::path::Path;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> sandbash::Result<()> {
/// let base = Arc::new(InMemoryFs::new());
/// base.mkdir(Path::new("/config"), false).await?;
/// base.write_file(Path::new("/config/app.conf"), b"debug=false").await?;
///
/// let overlay = Arc::new(OverlayFs::new(base.clone()));
/// let mut bash = Bash::builder().fs(overlay.clone()).build();
///
/// bash.exec("echo 'debug=true' > /config/app.conf").await?;
/// let result = bash.exec("cat /config/app.conf").await?;
/// assert_eq!(result.stdout, "debug=true\n");
///
/// // Base is unchanged
/// let original = base.read_file(Path::new("/config/app.conf")).await?;
/// assert_eq!(original, b"debug=false");
/// # Ok(())
/// # }
/// ```
pub struct OverlayFs {
    /// Lower (read-only base) filesystem
    lower: Arc<dyn FileSystem>,
    /// Upper (writable) layer
    upper: InMemoryFs,
    /// Lower-layer paths hidden by deletions
    whiteouts: RwLock<HashSet<PathBuf>>,
}

impl OverlayFs {
    /// Create a new overlay over `lower`. All changes land in a fresh
    /// in-memory upper layer.
    pub fn new(lower: Arc<dyn FileSystem>) -> Self {
        Self {
            lower,
            upper: InMemoryFs::empty(),
            whiteouts: RwLock::new(HashSet::new()),
        }
    }

    /// Whether the lower entry at `path` (or one of its ancestors) is hidden.
    fn is_whiteout(&self, path: &Path) -> bool {
        let whiteouts = self.whiteouts.read().unwrap_or_else(|e| e.into_inner());
        path.ancestors().any(|p| whiteouts.contains(p))
    }

    fn add_whiteout(&self, path: &Path) {
        let mut whiteouts = self.whiteouts.write().unwrap_or_else(|e| e.into_inner());
        whiteouts.insert(path.to_path_buf());
    }

    async fn lower_visible(&self, path: &Path) -> bool {
        !self.is_whiteout(path) && self.lower.exists(path).await.unwrap_or(false)
    }

    async fn in_upper(&self, path: &Path) -> bool {
        self.upper.lstat(path).await.is_ok()
    }

    /// Make sure the parent of `path` exists in the upper layer, creating it
    /// when it only exists below.
    async fn prepare_parent(&self, path: &Path) -> FsResult<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        match self.stat(parent).await {
            Ok(meta) if meta.file_type.is_dir() => {}
            Ok(_) => return Err(FsError::not_a_directory(path)),
            Err(e) => return Err(FsError::new(e.kind, path)),
        }
        if !self.in_upper(parent).await {
            self.upper.mkdir(parent, true).await?;
        }
        Ok(())
    }

    /// Copy a lower-only file into the upper layer.
    async fn copy_up(&self, path: &Path) -> FsResult<()> {
        if self.in_upper(path).await {
            return Ok(());
        }
        let meta = self.lower.lstat(path).await?;
        self.prepare_parent(path).await?;
        match meta.file_type {
            FileType::Directory => self.upper.mkdir(path, true).await?,
            FileType::File => {
                let content = self.lower.read_file(path).await?;
                self.upper.write_file(path, &content).await?;
            }
            FileType::Symlink => {
                let target = self.lower.read_link(path).await?;
                self.upper.symlink(&target, path).await?;
            }
        }
        self.upper.chmod(path, meta.mode).await
    }
}

#[async_trait]
impl FileSystem for OverlayFs {
    async fn read_file(&self, path: &Path) -> FsResult<Vec<u8>> {
        let path = normalize_path(path);
        if self.in_upper(&path).await {
            return self.upper.read_file(&path).await;
        }
        if self.is_whiteout(&path) {
            return Err(FsError::not_found(path));
        }
        self.lower.read_file(&path).await
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> FsResult<()> {
        let path = normalize_path(path);
        if let Ok(meta) = self.stat(&path).await
            && meta.file_type.is_dir()
        {
            return Err(FsError::is_a_directory(path));
        }
        self.prepare_parent(&path).await?;
        self.upper.write_file(&path, content).await
    }

    async fn append_file(&self, path: &Path, content: &[u8]) -> FsResult<()> {
        let path = normalize_path(path);
        if !self.in_upper(&path).await && self.lower_visible(&path).await {
            self.copy_up(&path).await?;
        } else {
            self.prepare_parent(&path).await?;
        }
        self.upper.append_file(&path, content).await
    }

    async fn mkdir(&self, path: &Path, recursive: bool) -> FsResult<()> {
        let path = normalize_path(path);

        if !recursive {
            if self.exists(&path).await? {
                return Err(FsError::already_exists(path));
            }
            self.prepare_parent(&path).await?;
            return self.upper.mkdir(&path, false).await;
        }

        let mut ancestors: Vec<&Path> = path.ancestors().collect();
        ancestors.reverse();
        for dir in ancestors {
            match self.stat(dir).await {
                Ok(meta) if meta.file_type.is_dir() => {}
                Ok(_) => return Err(FsError::not_a_directory(&path)),
                Err(e) if e.kind == FsErrorKind::NotFound => {
                    self.prepare_parent(dir).await?;
                    self.upper.mkdir(dir, false).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn remove(&self, path: &Path, options: RemoveOptions) -> FsResult<()> {
        let path = normalize_path(path);
        let in_upper = self.in_upper(&path).await;
        let in_lower = self.lower_visible(&path).await;

        if !in_upper && !in_lower {
            return if options.force {
                Ok(())
            } else {
                Err(FsError::not_found(path))
            };
        }

        if !options.recursive && self.lstat(&path).await?.file_type.is_dir() {
            let children = self.read_dir(&path).await?;
            if !children.is_empty() {
                return Err(FsError::not_empty(path));
            }
        }

        if in_upper {
            self.upper
                .remove(
                    &path,
                    RemoveOptions {
                        recursive: true,
                        force: true,
                    },
                )
                .await?;
        }
        if in_lower {
            self.add_whiteout(&path);
        }
        Ok(())
    }

    async fn stat(&self, path: &Path) -> FsResult<Metadata> {
        let path = normalize_path(path);
        match self.upper.stat(&path).await {
            Ok(meta) => Ok(meta),
            Err(_) if !self.is_whiteout(&path) => self.lower.stat(&path).await,
            Err(_) => Err(FsError::not_found(path)),
        }
    }

    async fn lstat(&self, path: &Path) -> FsResult<Metadata> {
        let path = normalize_path(path);
        match self.upper.lstat(&path).await {
            Ok(meta) => Ok(meta),
            Err(_) if !self.is_whiteout(&path) => self.lower.lstat(&path).await,
            Err(_) => Err(FsError::not_found(path)),
        }
    }

    async fn read_dir(&self, path: &Path) -> FsResult<Vec<DirEntry>> {
        let path = normalize_path(path);
        let meta = self.stat(&path).await?;
        if !meta.file_type.is_dir() {
            return Err(FsError::not_a_directory(path));
        }

        let mut entries: BTreeMap<String, DirEntry> = BTreeMap::new();
        if !self.is_whiteout(&path)
            && let Ok(lower_entries) = self.lower.read_dir(&path).await
        {
            for entry in lower_entries {
                if !self.is_whiteout(&path.join(&entry.name)) {
                    entries.insert(entry.name.clone(), entry);
                }
            }
        }
        if let Ok(upper_entries) = self.upper.read_dir(&path).await {
            for entry in upper_entries {
                entries.insert(entry.name.clone(), entry);
            }
        }

        Ok(entries.into_values().collect())
    }

    async fn exists(&self, path: &Path) -> FsResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind, FsErrorKind::NotFound | FsErrorKind::NotADirectory) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        let from = normalize_path(from);
        let to = normalize_path(to);
        if to.starts_with(&from) && to != from {
            return Err(FsError::invalid(to));
        }
        if let (Ok(src), Ok(dst)) = (self.lstat(&from).await, self.stat(&to).await) {
            match (src.file_type.is_dir(), dst.file_type.is_dir()) {
                (false, true) => return Err(FsError::is_a_directory(to)),
                (true, false) => return Err(FsError::not_a_directory(to)),
                _ => {}
            }
        }
        copy_tree(self, &from, self, &to).await?;
        self.remove(&from, RemoveOptions::recursive()).await
    }

    async fn copy(&self, from: &Path, to: &Path, recursive: bool) -> FsResult<()> {
        let from = normalize_path(from);
        let to = normalize_path(to);
        let meta = self.stat(&from).await?;
        if meta.file_type.is_dir() {
            if !recursive {
                return Err(FsError::is_a_directory(from));
            }
            if to.starts_with(&from) {
                return Err(FsError::invalid(to));
            }
            return copy_tree(self, &from, self, &to).await;
        }
        let content = self.read_file(&from).await?;
        self.write_file(&to, &content).await
    }

    async fn symlink(&self, target: &Path, link: &Path) -> FsResult<()> {
        let link = normalize_path(link);
        if self.lstat(&link).await.is_ok() {
            return Err(FsError::already_exists(link));
        }
        self.prepare_parent(&link).await?;
        self.upper.symlink(target, &link).await
    }

    async fn read_link(&self, path: &Path) -> FsResult<PathBuf> {
        let path = normalize_path(path);
        if self.in_upper(&path).await {
            return self.upper.read_link(&path).await;
        }
        if self.is_whiteout(&path) {
            return Err(FsError::not_found(path));
        }
        self.lower.read_link(&path).await
    }

    async fn chmod(&self, path: &Path, mode: u32) -> FsResult<()> {
        let path = normalize_path(path);
        if !self.in_upper(&path).await {
            if !self.lower_visible(&path).await {
                return Err(FsError::not_found(path));
            }
            self.copy_up(&path).await?;
        }
        self.upper.chmod(&path, mode).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn base_with(path: &str, content: &[u8]) -> Arc<InMemoryFs> {
        let lower = Arc::new(InMemoryFs::new());
        let path = Path::new(path);
        if let Some(parent) = path.parent() {
            lower.mkdir(parent, true).await.unwrap();
        }
        lower.write_file(path, content).await.unwrap();
        lower
    }

    #[tokio::test]
    async fn test_read_from_lower() {
        let overlay = OverlayFs::new(base_with("/tmp/test.txt", b"hello").await);
        let content = overlay.read_file(Path::new("/tmp/test.txt")).await.unwrap();
        assert_eq!(content, b"hello");
    }

    #[tokio::test]
    async fn test_write_to_upper() {
        let lower = Arc::new(InMemoryFs::new());
        let overlay = OverlayFs::new(lower.clone());

        overlay
            .write_file(Path::new("/tmp/new.txt"), b"new file")
            .await
            .unwrap();

        assert_eq!(
            overlay.read_file(Path::new("/tmp/new.txt")).await.unwrap(),
            b"new file"
        );
        assert!(!lower.exists(Path::new("/tmp/new.txt")).await.unwrap());
    }

    #[tokio::test]
    async fn test_append_copies_up() {
        let lower = base_with("/tmp/log", b"one\n").await;
        let overlay = OverlayFs::new(lower.clone());

        overlay
            .append_file(Path::new("/tmp/log"), b"two\n")
            .await
            .unwrap();

        assert_eq!(
            overlay.read_file(Path::new("/tmp/log")).await.unwrap(),
            b"one\ntwo\n"
        );
        assert_eq!(lower.read_file(Path::new("/tmp/log")).await.unwrap(), b"one\n");
    }

    #[tokio::test]
    async fn test_delete_with_whiteout() {
        let lower = base_with("/tmp/test.txt", b"hello").await;
        let overlay = OverlayFs::new(lower.clone());

        overlay
            .remove(Path::new("/tmp/test.txt"), RemoveOptions::single())
            .await
            .unwrap();

        assert!(!overlay.exists(Path::new("/tmp/test.txt")).await.unwrap());
        assert!(lower.exists(Path::new("/tmp/test.txt")).await.unwrap());
    }

    #[tokio::test]
    async fn test_recreated_directory_starts_empty() {
        let lower = base_with("/tmp/d/old.txt", b"").await;
        let overlay = OverlayFs::new(lower);

        let err = overlay
            .remove(Path::new("/tmp/d"), RemoveOptions::single())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FsErrorKind::NotEmpty);

        overlay
            .remove(Path::new("/tmp/d"), RemoveOptions::recursive())
            .await
            .unwrap();
        overlay.mkdir(Path::new("/tmp/d"), false).await.unwrap();

        assert!(overlay.read_dir(Path::new("/tmp/d")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_dir_merged() {
        let overlay = OverlayFs::new(base_with("/tmp/lower.txt", b"lower").await);
        overlay
            .write_file(Path::new("/tmp/upper.txt"), b"upper")
            .await
            .unwrap();

        let names: Vec<_> = overlay
            .read_dir(Path::new("/tmp"))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["lower.txt", "upper.txt"]);
    }

    #[tokio::test]
    async fn test_rename_lower_file() {
        let lower = base_with("/tmp/a", b"x").await;
        let overlay = OverlayFs::new(lower.clone());

        overlay
            .rename(Path::new("/tmp/a"), Path::new("/tmp/b"))
            .await
            .unwrap();

        assert!(!overlay.exists(Path::new("/tmp/a")).await.unwrap());
        assert_eq!(overlay.read_file(Path::new("/tmp/b")).await.unwrap(), b"x");
        assert!(lower.exists(Path::new("/tmp/a")).await.unwrap());
    }
}
