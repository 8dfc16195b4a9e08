//! In-memory filesystem implementation
//!
//! Entries form a tree: every directory exclusively owns its children, so a
//! path resolves to exactly one entry or to nothing.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use super::normalize_path;
use super::traits::{
    DirEntry, FileSystem, FsError, FsErrorKind, FsResult, Metadata, RemoveOptions,
};

/// Symlink hops allowed while resolving one path.
const MAX_SYMLINK_HOPS: usize = 40;

/// In-memory filesystem.
///
/// The default filesystem of a [`Bash`](crate::Bash) instance. Comes with
/// `/tmp`, `/home/user`, `/dev` and `/bin` already created.
pub struct InMemoryFs {
    root: RwLock<FsEntry>,
}

#[derive(Debug, Clone)]
enum FsEntry {
    File {
        content: Vec<u8>,
        metadata: Metadata,
    },
    Directory {
        entries: BTreeMap<String, FsEntry>,
        metadata: Metadata,
    },
    Symlink {
        target: PathBuf,
        metadata: Metadata,
    },
}

impl FsEntry {
    fn empty_dir() -> Self {
        FsEntry::Directory {
            entries: BTreeMap::new(),
            metadata: Metadata::directory(),
        }
    }

    fn metadata(&self) -> Metadata {
        match self {
            FsEntry::File { content, metadata } => Metadata {
                size: content.len() as u64,
                ..metadata.clone()
            },
            FsEntry::Directory { metadata, .. } => metadata.clone(),
            FsEntry::Symlink { target, metadata } => Metadata {
                size: target.as_os_str().len() as u64,
                ..metadata.clone()
            },
        }
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        match self {
            FsEntry::File { metadata, .. }
            | FsEntry::Directory { metadata, .. }
            | FsEntry::Symlink { metadata, .. } => metadata,
        }
    }

    fn child(&self, name: &str) -> Option<&FsEntry> {
        match self {
            FsEntry::Directory { entries, .. } => entries.get(name),
            _ => None,
        }
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFs {
    /// Create a new in-memory filesystem with the standard directories.
    pub fn new() -> Self {
        let fs = Self::empty();
        {
            let mut root = fs.write_root();
            for dir in ["tmp", "home", "dev", "bin"] {
                if let FsEntry::Directory { entries, .. } = &mut *root {
                    entries.insert(dir.to_string(), FsEntry::empty_dir());
                }
            }
            if let Some(FsEntry::Directory { entries, .. }) = lookup_mut(&mut root, &["home".into()])
            {
                entries.insert("user".to_string(), FsEntry::empty_dir());
            }
        }
        fs
    }

    /// Create a filesystem containing only `/`.
    pub fn empty() -> Self {
        Self {
            root: RwLock::new(FsEntry::empty_dir()),
        }
    }

    // Lock poisoning only happens after a panic while mutating; the tree is
    // still structurally valid, so keep serving it.
    fn read_root(&self) -> RwLockReadGuard<'_, FsEntry> {
        self.root.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_root(&self) -> RwLockWriteGuard<'_, FsEntry> {
        self.root.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn components(path: &Path) -> Vec<String> {
    normalize_path(path)
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

fn to_path(parts: &[String]) -> PathBuf {
    let mut path = PathBuf::from("/");
    for part in parts {
        path.push(part);
    }
    path
}

fn lookup<'a>(root: &'a FsEntry, parts: &[String]) -> Option<&'a FsEntry> {
    parts.iter().try_fold(root, |entry, name| entry.child(name))
}

fn lookup_mut<'a>(root: &'a mut FsEntry, parts: &[String]) -> Option<&'a mut FsEntry> {
    let mut current = root;
    for name in parts {
        current = match current {
            FsEntry::Directory { entries, .. } => entries.get_mut(name)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Resolve `path` to its physical location, following symlinks in every
/// component (and in the last one when `follow_last` is set). The final
/// component does not need to exist.
fn resolve(root: &FsEntry, path: &Path, follow_last: bool) -> FsResult<Vec<String>> {
    let mut pending: VecDeque<String> = components(path).into();
    let mut resolved: Vec<String> = Vec::new();
    let mut hops = 0;

    while let Some(name) = pending.pop_front() {
        let is_last = pending.is_empty();
        let dir = match lookup(root, &resolved) {
            Some(dir @ FsEntry::Directory { .. }) => dir,
            Some(_) => return Err(FsError::not_a_directory(path)),
            None => return Err(FsError::not_found(path)),
        };

        match dir.child(&name) {
            Some(FsEntry::Symlink { target, .. }) if !is_last || follow_last => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(FsError::new(FsErrorKind::Loop, path));
                }
                let absolute = if target.is_absolute() {
                    target.clone()
                } else {
                    to_path(&resolved).join(target)
                };
                for part in components(&absolute).into_iter().rev() {
                    pending.push_front(part);
                }
                resolved.clear();
            }
            _ => resolved.push(name),
        }
    }

    Ok(resolved)
}

/// Split resolved parts into (parent directory entries, final name).
fn parent_dir<'a>(
    root: &'a mut FsEntry,
    parts: &[String],
    path: &Path,
) -> FsResult<(&'a mut BTreeMap<String, FsEntry>, String)> {
    let Some((name, parent)) = parts.split_last() else {
        return Err(FsError::is_a_directory(path));
    };
    match lookup_mut(root, parent) {
        Some(FsEntry::Directory { entries, .. }) => Ok((entries, name.clone())),
        Some(_) => Err(FsError::not_a_directory(path)),
        None => Err(FsError::not_found(path)),
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read_file(&self, path: &Path) -> FsResult<Vec<u8>> {
        let root = self.read_root();
        let parts = resolve(&root, path, true)?;
        match lookup(&root, &parts) {
            Some(FsEntry::File { content, .. }) => Ok(content.clone()),
            Some(FsEntry::Directory { .. }) => Err(FsError::is_a_directory(path)),
            _ => Err(FsError::not_found(path)),
        }
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> FsResult<()> {
        let mut root = self.write_root();
        let parts = resolve(&root, path, true)?;
        let (entries, name) = parent_dir(&mut root, &parts, path)?;
        match entries.get_mut(&name) {
            Some(FsEntry::Directory { .. }) => Err(FsError::is_a_directory(path)),
            Some(FsEntry::File {
                content: existing,
                metadata,
            }) => {
                *existing = content.to_vec();
                metadata.modified = SystemTime::now();
                Ok(())
            }
            _ => {
                entries.insert(
                    name,
                    FsEntry::File {
                        content: content.to_vec(),
                        metadata: Metadata::file(content.len() as u64),
                    },
                );
                Ok(())
            }
        }
    }

    async fn append_file(&self, path: &Path, content: &[u8]) -> FsResult<()> {
        let mut root = self.write_root();
        let parts = resolve(&root, path, true)?;
        let (entries, name) = parent_dir(&mut root, &parts, path)?;
        match entries.get_mut(&name) {
            Some(FsEntry::Directory { .. }) => Err(FsError::is_a_directory(path)),
            Some(FsEntry::File {
                content: existing,
                metadata,
            }) => {
                existing.extend_from_slice(content);
                metadata.modified = SystemTime::now();
                Ok(())
            }
            _ => {
                entries.insert(
                    name,
                    FsEntry::File {
                        content: content.to_vec(),
                        metadata: Metadata::file(content.len() as u64),
                    },
                );
                Ok(())
            }
        }
    }

    async fn mkdir(&self, path: &Path, recursive: bool) -> FsResult<()> {
        let mut root = self.write_root();

        if !recursive {
            let parts = resolve(&root, path, false)?;
            let (entries, name) = parent_dir(&mut root, &parts, path)
                .map_err(|e| match e.kind {
                    // mkdir of "/" itself
                    FsErrorKind::IsADirectory => FsError::already_exists(path),
                    _ => e,
                })?;
            if entries.contains_key(&name) {
                return Err(FsError::already_exists(path));
            }
            entries.insert(name, FsEntry::empty_dir());
            return Ok(());
        }

        let wanted = components(path);
        for depth in 1..=wanted.len() {
            let prefix = to_path(&wanted[..depth]);
            let parts = resolve(&root, &prefix, true)?;
            match lookup(&root, &parts) {
                Some(FsEntry::Directory { .. }) => continue,
                Some(_) if depth == wanted.len() => return Err(FsError::already_exists(path)),
                Some(_) => return Err(FsError::not_a_directory(path)),
                None => {
                    let (entries, name) = parent_dir(&mut root, &parts, path)?;
                    entries.insert(name, FsEntry::empty_dir());
                }
            }
        }
        Ok(())
    }

    async fn remove(&self, path: &Path, options: RemoveOptions) -> FsResult<()> {
        let mut root = self.write_root();
        let parts = match resolve(&root, path, false) {
            Ok(parts) => parts,
            Err(e) if options.force && e.kind == FsErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if parts.is_empty() {
            return Err(FsError::new(FsErrorKind::Busy, path));
        }
        let (entries, name) = parent_dir(&mut root, &parts, path)?;
        match entries.get(&name) {
            None if options.force => Ok(()),
            None => Err(FsError::not_found(path)),
            Some(FsEntry::Directory { entries: children, .. })
                if !children.is_empty() && !options.recursive =>
            {
                Err(FsError::not_empty(path))
            }
            Some(_) => {
                entries.remove(&name);
                Ok(())
            }
        }
    }

    async fn stat(&self, path: &Path) -> FsResult<Metadata> {
        let root = self.read_root();
        let parts = resolve(&root, path, true)?;
        lookup(&root, &parts)
            .map(FsEntry::metadata)
            .ok_or_else(|| FsError::not_found(path))
    }

    async fn lstat(&self, path: &Path) -> FsResult<Metadata> {
        let root = self.read_root();
        let parts = resolve(&root, path, false)?;
        lookup(&root, &parts)
            .map(FsEntry::metadata)
            .ok_or_else(|| FsError::not_found(path))
    }

    async fn read_dir(&self, path: &Path) -> FsResult<Vec<DirEntry>> {
        let root = self.read_root();
        let parts = resolve(&root, path, true)?;
        match lookup(&root, &parts) {
            Some(FsEntry::Directory { entries, .. }) => Ok(entries
                .iter()
                .map(|(name, entry)| DirEntry {
                    name: name.clone(),
                    metadata: entry.metadata(),
                })
                .collect()),
            Some(_) => Err(FsError::not_a_directory(path)),
            None => Err(FsError::not_found(path)),
        }
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
        let mut root = self.write_root();
        let from_parts = resolve(&root, from, false)?;
        let to_parts = resolve(&root, to, false)?;

        if from_parts.is_empty() {
            return Err(FsError::new(FsErrorKind::Busy, from));
        }
        if from_parts == to_parts {
            return lookup(&root, &from_parts)
                .map(|_| ())
                .ok_or_else(|| FsError::not_found(from));
        }
        if to_parts.starts_with(&from_parts) {
            return Err(FsError::invalid(to));
        }

        let source_is_dir = match lookup(&root, &from_parts) {
            Some(entry) => matches!(entry, FsEntry::Directory { .. }),
            None => return Err(FsError::not_found(from)),
        };
        match lookup(&root, &to_parts) {
            Some(FsEntry::Directory { entries, .. }) if source_is_dir && !entries.is_empty() => {
                return Err(FsError::not_empty(to));
            }
            Some(FsEntry::Directory { .. }) if !source_is_dir => {
                return Err(FsError::is_a_directory(to));
            }
            Some(FsEntry::File { .. } | FsEntry::Symlink { .. }) if source_is_dir => {
                return Err(FsError::not_a_directory(to));
            }
            _ => {}
        }
        // Destination parent must exist before detaching the source.
        parent_dir(&mut root, &to_parts, to)?;

        let (from_entries, from_name) = parent_dir(&mut root, &from_parts, from)?;
        let Some(mut entry) = from_entries.remove(&from_name) else {
            return Err(FsError::not_found(from));
        };
        entry.metadata_mut().modified = SystemTime::now();
        let (to_entries, to_name) = parent_dir(&mut root, &to_parts, to)?;
        to_entries.insert(to_name, entry);
        Ok(())
    }

    async fn copy(&self, from: &Path, to: &Path, recursive: bool) -> FsResult<()> {
        let mut root = self.write_root();
        let from_parts = resolve(&root, from, true)?;
        let to_parts = resolve(&root, to, true)?;

        let entry = match lookup(&root, &from_parts) {
            Some(FsEntry::Directory { .. }) if !recursive => {
                return Err(FsError::is_a_directory(from));
            }
            Some(FsEntry::Directory { .. }) if to_parts.starts_with(&from_parts) => {
                return Err(FsError::invalid(to));
            }
            Some(entry) => entry.clone(),
            None => return Err(FsError::not_found(from)),
        };

        let (entries, name) = parent_dir(&mut root, &to_parts, to)?;
        match (entries.get(&name), &entry) {
            (Some(FsEntry::Directory { .. }), FsEntry::File { .. }) => {
                Err(FsError::is_a_directory(to))
            }
            (Some(FsEntry::File { .. }), FsEntry::Directory { .. }) => {
                Err(FsError::not_a_directory(to))
            }
            _ => {
                entries.insert(name, entry);
                Ok(())
            }
        }
    }

    async fn symlink(&self, target: &Path, link: &Path) -> FsResult<()> {
        let mut root = self.write_root();
        let parts = resolve(&root, link, false)?;
        let (entries, name) = parent_dir(&mut root, &parts, link)?;
        if entries.contains_key(&name) {
            return Err(FsError::already_exists(link));
        }
        entries.insert(
            name,
            FsEntry::Symlink {
                target: target.to_path_buf(),
                metadata: Metadata::symlink(),
            },
        );
        Ok(())
    }

    async fn read_link(&self, path: &Path) -> FsResult<PathBuf> {
        let root = self.read_root();
        let parts = resolve(&root, path, false)?;
        match lookup(&root, &parts) {
            Some(FsEntry::Symlink { target, .. }) => Ok(target.clone()),
            Some(_) => Err(FsError::invalid(path)),
            None => Err(FsError::not_found(path)),
        }
    }

    async fn chmod(&self, path: &Path, mode: u32) -> FsResult<()> {
        let mut root = self.write_root();
        let parts = resolve(&root, path, true)?;
        match lookup_mut(&mut root, &parts) {
            Some(entry) => {
                entry.metadata_mut().mode = mode & 0o7777;
                Ok(())
            }
            None => Err(FsError::not_found(path)),
        }
    }
}
