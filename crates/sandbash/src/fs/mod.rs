//! Virtual filesystem for Sandbash
//!
//! Provides an async filesystem trait and implementations:
//! - `InMemoryFs`: tree-shaped in-memory store
//! - `OverlayFs`: copy-on-write overlay with whiteouts
//! - `MountableFs`: multiple filesystems at mount points
//! - `ScopedFs`: a backing store confined to one directory

mod memory;
mod mountable;
mod overlay;
mod scoped;
mod traits;

pub use memory::InMemoryFs;
pub use mountable::{FstabEntry, MountInfo, MountableFs, Volumes, parse_fstab};
pub use overlay::OverlayFs;
pub use scoped::ScopedFs;
pub use traits::{
    DirEntry, FileSystem, FileType, FsError, FsErrorKind, FsResult, Metadata, RemoveOptions,
};

use futures_util::future::BoxFuture;
use std::path::{Component, Path, PathBuf};

/// Normalize a path lexically: resolve `.` and `..`, collapse separators.
///
/// `..` never climbs above `/`. Relative inputs are treated as rooted.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::from("/");

    for component in path.components() {
        match component {
            Component::Normal(name) => result.push(name),
            Component::ParentDir => {
                result.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }

    result
}

/// Copy `from` (in `from_fs`) to `to` (in `to_fs`), recursing into
/// directories. Symlinks are copied as links, file modes are preserved.
pub(crate) fn copy_tree<'a>(
    from_fs: &'a dyn FileSystem,
    from: &'a Path,
    to_fs: &'a dyn FileSystem,
    to: &'a Path,
) -> BoxFuture<'a, FsResult<()>> {
    Box::pin(async move {
        let meta = from_fs.lstat(from).await?;
        match meta.file_type {
            FileType::Symlink => {
                let target = from_fs.read_link(from).await?;
                to_fs.symlink(&target, to).await
            }
            FileType::File => {
                let data = from_fs.read_file(from).await?;
                to_fs.write_file(to, &data).await?;
                to_fs.chmod(to, meta.mode).await
            }
            FileType::Directory => {
                match to_fs.mkdir(to, false).await {
                    Ok(()) => {}
                    Err(e) if e.kind == FsErrorKind::AlreadyExists => {}
                    Err(e) => return Err(e),
                }
                for entry in from_fs.read_dir(from).await? {
                    let child_from = from.join(&entry.name);
                    let child_to = to.join(&entry.name);
                    copy_tree(from_fs, &child_from, to_fs, &child_to).await?;
                }
                Ok(())
            }
        }
    })
}
