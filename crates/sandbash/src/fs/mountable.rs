//! Mountable filesystem implementation.
//!
//! [`MountableFs`] allows mounting multiple filesystems at different paths,
//! similar to Unix mount semantics, and reads `fstab`-style mount tables.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::memory::InMemoryFs;
use super::scoped::ScopedFs;
use super::traits::{
    DirEntry, FileSystem, FileType, FsError, FsErrorKind, FsResult, Metadata, RemoveOptions,
};
use super::{copy_tree, normalize_path};
use crate::error::{Error, Result};

/// Named backing stores that `mount VOLUME TARGET` and fstab lines can refer to.
pub type Volumes = HashMap<String, Arc<dyn FileSystem>>;

/// Filesystem with Unix-style mount points.
///
/// `MountableFs` routes every operation to the filesystem mounted at the
/// longest matching prefix of the path, or to the base filesystem when no
/// mount matches.
///
/// - **Nested mounts**: `/mnt` and `/mnt/data` can both be mounted
/// - **Dynamic mounting**: add and remove mounts at runtime
/// - **Cross-mount operations**: copy and move between mounted filesystems
///
/// # Example
///
/// ```rust
/// use sandbash::{Bash, FileSystem, InMemoryFs, MountableFs};
/// use std::path::Path;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> sandbash::Result<()> {
/// let data_fs = Arc::new(InMemoryFs::empty());
/// data_fs.write_file(Path::new("/users.json"), br#"["alice", "bob"]"#).await?;
///
/// let mountable = MountableFs::new(Arc::new(InMemoryFs::new()));
/// mountable.mount("/mnt/data", data_fs)?;
///
/// let content = mountable.read_file(Path::new("/mnt/data/users.json")).await?;
/// assert!(String::from_utf8_lossy(&content).contains("alice"));
///
/// mountable.unmount("/mnt/data")?;
/// assert!(!mountable.exists(Path::new("/mnt/data/users.json")).await?);
/// # Ok(())
/// # }
/// ```
///
/// # Path Resolution
///
/// With mounts at `/mnt` and `/mnt/data`:
///
/// - `/mnt/file.txt` → resolves to `/mnt` mount
/// - `/mnt/data/file.txt` → resolves to `/mnt/data` mount (longer prefix wins)
/// - `/other/file.txt` → resolves to the base filesystem
pub struct MountableFs {
    /// Base filesystem (for paths not covered by any mount)
    root: Arc<dyn FileSystem>,
    /// Mount points: normalized path -> mount
    mounts: RwLock<BTreeMap<PathBuf, Mount>>,
}

struct Mount {
    fs: Arc<dyn FileSystem>,
    source: String,
    fs_type: String,
}

/// One row of the mount table, as listed by `mount`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    /// Where the filesystem came from (`tmpfs`, a volume name, a bind source).
    pub source: String,
    /// Mount point.
    pub target: PathBuf,
    /// Filesystem type (`tmpfs`, `volume`, `bind`, `vfs`).
    pub fs_type: String,
}

/// A parsed `fstab` line: `SOURCE TARGET TYPE [OPTIONS]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    pub source: String,
    pub target: PathBuf,
    pub fs_type: String,
    pub options: Vec<String>,
}

impl FstabEntry {
    /// Build an entry without options.
    pub fn new(source: impl Into<String>, target: impl Into<PathBuf>, fs_type: &str) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            fs_type: fs_type.to_string(),
            options: Vec::new(),
        }
    }

    fn is_bind(&self) -> bool {
        self.fs_type == "bind" || self.options.iter().any(|o| o == "bind")
    }
}

/// Parse fstab text.
///
/// Blank lines and `#` comments are skipped. Each remaining line needs at
/// least `SOURCE TARGET TYPE`; an optional fourth column holds
/// comma-separated options. Further columns (dump/pass) are ignored.
pub fn parse_fstab(text: &str) -> Result<Vec<FstabEntry>> {
    let mut entries = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            return Err(Error::Shell(format!(
                "fstab: line {}: expected SOURCE TARGET TYPE",
                index + 1
            )));
        }
        if !fields[1].starts_with('/') {
            return Err(Error::Shell(format!(
                "fstab: line {}: mount point must be absolute: {}",
                index + 1,
                fields[1]
            )));
        }
        let options = fields
            .get(3)
            .map(|opts| {
                opts.split(',')
                    .filter(|o| !o.is_empty() && *o != "defaults")
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        entries.push(FstabEntry {
            source: fields[0].to_string(),
            target: normalize_path(Path::new(fields[1])),
            fs_type: fields[2].to_string(),
            options,
        });
    }
    Ok(entries)
}

impl MountableFs {
    /// Create a new `MountableFs` with the given base filesystem.
    pub fn new(root: Arc<dyn FileSystem>) -> Self {
        Self {
            root,
            mounts: RwLock::new(BTreeMap::new()),
        }
    }

    fn read_mounts(&self) -> RwLockReadGuard<'_, BTreeMap<PathBuf, Mount>> {
        self.mounts.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_mounts(&self) -> RwLockWriteGuard<'_, BTreeMap<PathBuf, Mount>> {
        self.mounts.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Mount a filesystem at the given path.
    ///
    /// Fails with `EBUSY` if something is already mounted at exactly that
    /// path, or if the path is `/`.
    pub fn mount(&self, path: impl AsRef<Path>, fs: Arc<dyn FileSystem>) -> FsResult<()> {
        self.mount_with_source(path, fs, "none", "vfs")
    }

    /// Mount with the source and type shown in the mount table.
    pub fn mount_with_source(
        &self,
        path: impl AsRef<Path>,
        fs: Arc<dyn FileSystem>,
        source: &str,
        fs_type: &str,
    ) -> FsResult<()> {
        let path = normalize_path(path.as_ref());
        if path == Path::new("/") {
            return Err(FsError::new(FsErrorKind::Busy, path));
        }

        let mut mounts = self.write_mounts();
        if mounts.contains_key(&path) {
            return Err(FsError::new(FsErrorKind::Busy, path));
        }

        #[cfg(feature = "logging")]
        tracing::debug!(mount_point = %path.display(), source, fs_type, "mount");

        mounts.insert(
            path,
            Mount {
                fs,
                source: source.to_string(),
                fs_type: fs_type.to_string(),
            },
        );
        Ok(())
    }

    /// Unmount the filesystem at the given path.
    ///
    /// Only routing is removed; the backing store keeps its data. Fails with
    /// `EINVAL` when nothing is mounted there.
    pub fn unmount(&self, path: impl AsRef<Path>) -> FsResult<()> {
        let path = normalize_path(path.as_ref());
        let mut mounts = self.write_mounts();
        match mounts.remove(&path) {
            Some(_) => {
                #[cfg(feature = "logging")]
                tracing::debug!(mount_point = %path.display(), "umount");
                Ok(())
            }
            None => Err(FsError::invalid(path)),
        }
    }

    /// List the current mounts, ordered by mount point.
    pub fn mounts(&self) -> Vec<MountInfo> {
        self.read_mounts()
            .iter()
            .map(|(target, mount)| MountInfo {
                source: mount.source.clone(),
                target: target.clone(),
                fs_type: mount.fs_type.clone(),
            })
            .collect()
    }

    /// Whether `path` is exactly a mount point.
    pub fn is_mount_point(&self, path: &Path) -> bool {
        self.read_mounts().contains_key(&normalize_path(path))
    }

    /// Build the filesystem an fstab entry (or a `mount` invocation) names.
    ///
    /// - type `tmpfs`: a fresh empty [`InMemoryFs`]
    /// - type `bind` (or option `bind`): the directory `source` of this
    ///   filesystem, as currently routed
    /// - anything else: the named volume `NAME` or `NAME:/prefix`
    pub async fn resolve_source(
        &self,
        entry: &FstabEntry,
        volumes: &Volumes,
    ) -> FsResult<Arc<dyn FileSystem>> {
        if entry.fs_type == "tmpfs" {
            return Ok(Arc::new(InMemoryFs::empty()));
        }

        if entry.is_bind() {
            let source = normalize_path(Path::new(&entry.source));
            let (fs, inner) = self.resolve(&source);
            let meta = fs.stat(&inner).await.map_err(|e| FsError::new(e.kind, &source))?;
            if !meta.file_type.is_dir() {
                return Err(FsError::not_a_directory(source));
            }
            return Ok(Arc::new(ScopedFs::new(fs, inner)));
        }

        let (name, prefix) = match entry.source.split_once(':') {
            Some((name, prefix)) => (name, Some(prefix)),
            None => (entry.source.as_str(), None),
        };
        let volume = volumes
            .get(name)
            .cloned()
            .ok_or_else(|| FsError::not_found(&entry.source))?;
        match prefix {
            Some(prefix) if !prefix.is_empty() && prefix != "/" => {
                Ok(Arc::new(ScopedFs::create(volume, prefix).await?))
            }
            _ => Ok(volume),
        }
    }

    /// Resolve and mount every entry, in order.
    pub async fn apply_fstab(&self, entries: &[FstabEntry], volumes: &Volumes) -> FsResult<()> {
        for entry in entries {
            let fs = self.resolve_source(entry, volumes).await?;
            let fs_type = if entry.is_bind() {
                "bind"
            } else {
                entry.fs_type.as_str()
            };
            self.mount_with_source(&entry.target, fs, &entry.source, fs_type)?;
        }
        Ok(())
    }

    /// Resolve a path to the appropriate filesystem and the path within it.
    fn resolve(&self, path: &Path) -> (Arc<dyn FileSystem>, PathBuf) {
        let path = normalize_path(path);
        let mounts = self.read_mounts();

        // Deepest mount point that is a component-wise prefix wins.
        let best = mounts
            .iter()
            .filter(|(mount_path, _)| path.starts_with(mount_path))
            .max_by_key(|(mount_path, _)| mount_path.components().count());

        match best {
            Some((mount_path, mount)) => {
                let relative = path.strip_prefix(mount_path).unwrap_or(Path::new(""));
                (Arc::clone(&mount.fs), Path::new("/").join(relative))
            }
            None => (Arc::clone(&self.root), path),
        }
    }

    /// Names of entries that mounts below `dir` contribute to its listing.
    fn mount_children(&self, dir: &Path) -> BTreeSet<String> {
        self.read_mounts()
            .keys()
            .filter_map(|mount_path| {
                let rest = mount_path.strip_prefix(dir).ok()?;
                let first = rest.components().next()?;
                Some(first.as_os_str().to_string_lossy().into_owned())
            })
            .collect()
    }

    /// Whether some mount lives strictly below `dir`.
    fn has_mounts_below(&self, dir: &Path) -> bool {
        !self.mount_children(dir).is_empty()
    }

    fn ensure_not_mount_point(&self, path: &Path) -> FsResult<()> {
        if path == Path::new("/") || self.is_mount_point(path) {
            return Err(FsError::new(FsErrorKind::Busy, path));
        }
        Ok(())
    }
}

#[async_trait]
impl FileSystem for MountableFs {
    async fn read_file(&self, path: &Path) -> FsResult<Vec<u8>> {
        let (fs, resolved) = self.resolve(path);
        fs.read_file(&resolved).await
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> FsResult<()> {
        let (fs, resolved) = self.resolve(path);
        fs.write_file(&resolved, content).await
    }

    async fn append_file(&self, path: &Path, content: &[u8]) -> FsResult<()> {
        let (fs, resolved) = self.resolve(path);
        fs.append_file(&resolved, content).await
    }

    async fn mkdir(&self, path: &Path, recursive: bool) -> FsResult<()> {
        let path = normalize_path(path);
        if self.is_mount_point(&path) || self.has_mounts_below(&path) {
            return if recursive {
                Ok(())
            } else {
                Err(FsError::already_exists(path))
            };
        }
        let (fs, resolved) = self.resolve(&path);
        fs.mkdir(&resolved, recursive).await
    }

    async fn remove(&self, path: &Path, options: RemoveOptions) -> FsResult<()> {
        let path = normalize_path(path);
        self.ensure_not_mount_point(&path)?;
        if options.recursive && self.has_mounts_below(&path) {
            return Err(FsError::new(FsErrorKind::Busy, path));
        }
        let (fs, resolved) = self.resolve(&path);
        fs.remove(&resolved, options).await
    }

    async fn stat(&self, path: &Path) -> FsResult<Metadata> {
        let path = normalize_path(path);
        let (fs, resolved) = self.resolve(&path);
        match fs.stat(&resolved).await {
            Err(e) if e.kind == FsErrorKind::NotFound && self.has_mounts_below(&path) => {
                Ok(Metadata::directory())
            }
            other => other,
        }
    }

    async fn lstat(&self, path: &Path) -> FsResult<Metadata> {
        let path = normalize_path(path);
        let (fs, resolved) = self.resolve(&path);
        match fs.lstat(&resolved).await {
            Err(e) if e.kind == FsErrorKind::NotFound && self.has_mounts_below(&path) => {
                Ok(Metadata::directory())
            }
            other => other,
        }
    }

    async fn read_dir(&self, path: &Path) -> FsResult<Vec<DirEntry>> {
        let path = normalize_path(path);
        let (fs, resolved) = self.resolve(&path);
        let extra = self.mount_children(&path);

        let mut entries = match fs.read_dir(&resolved).await {
            Ok(entries) => entries,
            Err(e) if e.kind == FsErrorKind::NotFound && !extra.is_empty() => Vec::new(),
            Err(e) => return Err(e),
        };

        for name in extra {
            match entries.iter_mut().find(|e| e.name == name) {
                // A mount shadows whatever the parent store has there.
                Some(existing) => existing.metadata = Metadata::directory(),
                None => entries.push(DirEntry {
                    name,
                    metadata: Metadata::directory(),
                }),
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn exists(&self, path: &Path) -> FsResult<bool> {
        let path = normalize_path(path);
        if self.is_mount_point(&path) || self.has_mounts_below(&path) {
            return Ok(true);
        }
        let (fs, resolved) = self.resolve(&path);
        fs.exists(&resolved).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        let from = normalize_path(from);
        self.ensure_not_mount_point(&from)?;
        let (from_fs, from_resolved) = self.resolve(&from);
        let (to_fs, to_resolved) = self.resolve(to);

        if Arc::ptr_eq(&from_fs, &to_fs) {
            from_fs.rename(&from_resolved, &to_resolved).await
        } else {
            copy_tree(&*from_fs, &from_resolved, &*to_fs, &to_resolved).await?;
            from_fs
                .remove(&from_resolved, RemoveOptions::recursive())
                .await
        }
    }

    async fn copy(&self, from: &Path, to: &Path, recursive: bool) -> FsResult<()> {
        let (from_fs, from_resolved) = self.resolve(from);
        let (to_fs, to_resolved) = self.resolve(to);

        if Arc::ptr_eq(&from_fs, &to_fs) {
            return from_fs.copy(&from_resolved, &to_resolved, recursive).await;
        }

        let meta = from_fs.stat(&from_resolved).await?;
        match meta.file_type {
            FileType::Directory if !recursive => Err(FsError::is_a_directory(from)),
            FileType::Directory => {
                copy_tree(&*from_fs, &from_resolved, &*to_fs, &to_resolved).await
            }
            _ => {
                let content = from_fs.read_file(&from_resolved).await?;
                to_fs.write_file(&to_resolved, &content).await
            }
        }
    }

    async fn symlink(&self, target: &Path, link: &Path) -> FsResult<()> {
        let (fs, resolved) = self.resolve(link);
        fs.symlink(target, &resolved).await
    }

    async fn read_link(&self, path: &Path) -> FsResult<PathBuf> {
        let (fs, resolved) = self.resolve(path);
        fs.read_link(&resolved).await
    }

    async fn chmod(&self, path: &Path, mode: u32) -> FsResult<()> {
        let (fs, resolved) = self.resolve(path);
        fs.chmod(&resolved, mode).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_mount_and_access() {
        let root = Arc::new(InMemoryFs::new());
        let mounted = Arc::new(InMemoryFs::empty());

        mounted
            .write_file(Path::new("/data.txt"), b"mounted data")
            .await
            .unwrap();

        let mfs = MountableFs::new(root);
        mfs.mount("/mnt/data", mounted).unwrap();

        let content = mfs
            .read_file(Path::new("/mnt/data/data.txt"))
            .await
            .unwrap();
        assert_eq!(content, b"mounted data");
    }

    #[tokio::test]
    async fn test_write_to_mount() {
        let mounted = Arc::new(InMemoryFs::empty());
        let mfs = MountableFs::new(Arc::new(InMemoryFs::new()));
        mfs.mount("/mnt", mounted.clone()).unwrap();

        mfs.mkdir(Path::new("/mnt/subdir"), false).await.unwrap();
        mfs.write_file(Path::new("/mnt/subdir/test.txt"), b"hello")
            .await
            .unwrap();

        let content = mounted
            .read_file(Path::new("/subdir/test.txt"))
            .await
            .unwrap();
        assert_eq!(content, b"hello");
    }

    #[tokio::test]
    async fn test_nested_mounts() {
        let outer = Arc::new(InMemoryFs::empty());
        let inner = Arc::new(InMemoryFs::empty());
        outer
            .write_file(Path::new("/outer.txt"), b"outer")
            .await
            .unwrap();
        inner
            .write_file(Path::new("/inner.txt"), b"inner")
            .await
            .unwrap();

        let mfs = MountableFs::new(Arc::new(InMemoryFs::new()));
        mfs.mount("/mnt", outer).unwrap();
        mfs.mount("/mnt/nested", inner).unwrap();

        let content = mfs.read_file(Path::new("/mnt/outer.txt")).await.unwrap();
        assert_eq!(content, b"outer");
        let content = mfs
            .read_file(Path::new("/mnt/nested/inner.txt"))
            .await
            .unwrap();
        assert_eq!(content, b"inner");
    }

    #[tokio::test]
    async fn test_duplicate_mount_is_busy() {
        let mfs = MountableFs::new(Arc::new(InMemoryFs::new()));
        mfs.mount("/mnt", Arc::new(InMemoryFs::empty())).unwrap();
        let err = mfs
            .mount("/mnt/", Arc::new(InMemoryFs::empty()))
            .unwrap_err();
        assert_eq!(err.kind, FsErrorKind::Busy);
    }

    #[tokio::test]
    async fn test_mount_points_are_listed_and_stat_as_dirs() {
        let mfs = MountableFs::new(Arc::new(InMemoryFs::new()));
        mfs.mount("/mnt/deep/data", Arc::new(InMemoryFs::empty()))
            .unwrap();

        let names: Vec<_> = mfs
            .read_dir(Path::new("/"))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert!(names.contains(&"mnt".to_string()));

        assert!(mfs.stat(Path::new("/mnt")).await.unwrap().file_type.is_dir());
        assert!(
            mfs.stat(Path::new("/mnt/deep/data"))
                .await
                .unwrap()
                .file_type
                .is_dir()
        );
        let err = mfs
            .remove(Path::new("/mnt/deep/data"), RemoveOptions::recursive())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FsErrorKind::Busy);
    }

    #[tokio::test]
    async fn test_unmount_keeps_backing_data() {
        let mounted = Arc::new(InMemoryFs::empty());
        mounted
            .write_file(Path::new("/data.txt"), b"data")
            .await
            .unwrap();

        let mfs = MountableFs::new(Arc::new(InMemoryFs::new()));
        mfs.mount("/mnt", mounted.clone()).unwrap();
        assert!(mfs.exists(Path::new("/mnt/data.txt")).await.unwrap());

        mfs.unmount("/mnt").unwrap();
        assert!(!mfs.exists(Path::new("/mnt/data.txt")).await.unwrap());
        assert!(mounted.exists(Path::new("/data.txt")).await.unwrap());

        let err = mfs.unmount("/mnt").unwrap_err();
        assert_eq!(err.kind, FsErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_cross_mount_rename_directory() {
        let mfs = MountableFs::new(Arc::new(InMemoryFs::new()));
        let other = Arc::new(InMemoryFs::empty());
        mfs.mount("/mnt", other.clone()).unwrap();

        mfs.mkdir(Path::new("/tmp/proj"), false).await.unwrap();
        mfs.write_file(Path::new("/tmp/proj/a.txt"), b"a")
            .await
            .unwrap();
        mfs.rename(Path::new("/tmp/proj"), Path::new("/mnt/proj"))
            .await
            .unwrap();

        assert!(!mfs.exists(Path::new("/tmp/proj")).await.unwrap());
        assert_eq!(other.read_file(Path::new("/proj/a.txt")).await.unwrap(), b"a");
    }

    #[test]
    fn test_parse_fstab() {
        let entries = parse_fstab(
            "# scratch space\n\
             tmpfs /scratch tmpfs defaults 0 0\n\
             \n\
             data:/shared /srv volume ro\n\
             /tmp /mnt/tmp none bind\n",
        )
        .unwrap();

        assert_eq!(
            entries,
            vec![
                FstabEntry::new("tmpfs", "/scratch", "tmpfs"),
                FstabEntry {
                    options: vec!["ro".to_string()],
                    ..FstabEntry::new("data:/shared", "/srv", "volume")
                },
                FstabEntry {
                    options: vec!["bind".to_string()],
                    ..FstabEntry::new("/tmp", "/mnt/tmp", "none")
                },
            ]
        );

        assert!(parse_fstab("tmpfs relative tmpfs").is_err());
        assert!(parse_fstab("tmpfs /x").is_err());
    }

    #[tokio::test]
    async fn test_apply_fstab_with_volumes() {
        let volume: Arc<dyn FileSystem> = Arc::new(InMemoryFs::empty());
        volume.mkdir(Path::new("/shared"), false).await.unwrap();
        volume
            .write_file(Path::new("/shared/readme"), b"hi")
            .await
            .unwrap();
        let mut volumes = Volumes::new();
        volumes.insert("data".to_string(), volume);

        let mfs = MountableFs::new(Arc::new(InMemoryFs::new()));
        let entries = parse_fstab(
            "tmpfs /scratch tmpfs\n\
             data:/shared /srv volume\n\
             /srv /mnt/view none bind\n",
        )
        .unwrap();
        mfs.apply_fstab(&entries, &volumes).await.unwrap();

        assert_eq!(mfs.read_file(Path::new("/srv/readme")).await.unwrap(), b"hi");
        assert_eq!(
            mfs.read_file(Path::new("/mnt/view/readme")).await.unwrap(),
            b"hi"
        );
        let listed: Vec<_> = mfs.mounts().into_iter().map(|m| m.fs_type).collect();
        assert_eq!(listed, vec!["bind", "tmpfs", "volume"]);

        let missing = vec![FstabEntry::new("nope", "/x", "volume")];
        let err = mfs.apply_fstab(&missing, &volumes).await.unwrap_err();
        assert_eq!(err.kind, FsErrorKind::NotFound);
    }
}
