//! mount and umount builtins
//!
//! Both work on the session's [`MountableFs`](crate::MountableFs). Without
//! one (a custom root filesystem that is not mountable) they fail.

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::error::Result;
use crate::fs::{FsErrorKind, FstabEntry};
use crate::interpreter::ExecResult;

/// The mount builtin.
///
/// Usage:
///   mount                          list mounts
///   mount -t tmpfs NAME TARGET     fresh empty filesystem
///   mount --bind SOURCE TARGET     expose a directory at a second path
///   mount VOLUME[:/prefix] TARGET  attach a named volume
pub struct Mount;

#[async_trait]
impl Builtin for Mount {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let Some(mounts) = ctx.mounts else {
            return Ok(ExecResult::err("mount: mounting is not supported\n", 1));
        };

        if ctx.args.is_empty() {
            let listing: String = mounts
                .mounts()
                .iter()
                .map(|m| format!("{} on {} type {}\n", m.source, m.target.display(), m.fs_type))
                .collect();
            return Ok(ExecResult::ok(listing));
        }

        let mut fs_type = "volume".to_string();
        let mut operands = Vec::new();
        let mut args = ctx.args.iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-t" => match args.next() {
                    Some(t) => fs_type = t.clone(),
                    None => {
                        return Ok(ExecResult::err(
                            "mount: option requires an argument -- 't'\n",
                            1,
                        ));
                    }
                },
                "--bind" | "-B" => fs_type = "bind".to_string(),
                a if a.starts_with('-') && a.len() > 1 => {
                    return Ok(ExecResult::err(format!("mount: unrecognized option '{a}'\n"), 1));
                }
                _ => operands.push(arg.clone()),
            }
        }
        let [source, target] = operands.as_slice() else {
            return Ok(ExecResult::err("mount: usage: mount [-t TYPE] SOURCE TARGET\n", 1));
        };
        if !matches!(fs_type.as_str(), "tmpfs" | "bind" | "volume") {
            return Ok(ExecResult::err(
                format!("mount: unknown filesystem type '{fs_type}'\n"),
                32,
            ));
        }

        let source_path = if fs_type == "bind" {
            ctx.resolve(source).to_string_lossy().into_owned()
        } else {
            source.clone()
        };
        let entry = FstabEntry::new(source_path, ctx.resolve(target), &fs_type);
        let fs = match mounts.resolve_source(&entry, ctx.volumes).await {
            Ok(fs) => fs,
            Err(e) if e.kind == FsErrorKind::NotFound && fs_type == "volume" => {
                return Ok(ExecResult::err(
                    format!("mount: {source}: no such volume\n"),
                    32,
                ));
            }
            Err(e) => {
                return Ok(ExecResult::err(format!("mount: {}\n", e.describe(source)), 32));
            }
        };
        match mounts.mount_with_source(&entry.target, fs, &entry.source, &fs_type) {
            Ok(()) => Ok(ExecResult::ok("")),
            Err(e) => Ok(ExecResult::err(format!("mount: {}\n", e.describe(target)), 32)),
        }
    }
}

/// The umount builtin: detach the filesystem mounted at each TARGET.
pub struct Umount;

#[async_trait]
impl Builtin for Umount {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let Some(mounts) = ctx.mounts else {
            return Ok(ExecResult::err("umount: mounting is not supported\n", 1));
        };
        if ctx.args.is_empty() {
            return Ok(ExecResult::err("umount: usage: umount TARGET...\n", 1));
        }

        let mut stderr = String::new();
        for target in ctx.args {
            if mounts.unmount(ctx.resolve(target)).is_err() {
                stderr.push_str(&format!("umount: {target}: not mounted\n"));
            }
        }
        let code = if stderr.is_empty() { 0 } else { 32 };
        Ok(ExecResult::err(stderr, code))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, InMemoryFs, MountableFs, Volumes};
    use std::path::Path;
    use std::sync::Arc;

    struct Setup {
        mountable: Arc<MountableFs>,
        volumes: Volumes,
    }

    async fn setup() -> Setup {
        let root = Arc::new(InMemoryFs::new());
        root.mkdir(Path::new("/srv/site"), true).await.unwrap();
        root.write_file(Path::new("/srv/site/index.html"), b"<h1>hi</h1>")
            .await
            .unwrap();
        let data: Arc<dyn FileSystem> = Arc::new(InMemoryFs::empty());
        data.mkdir(Path::new("/reports"), true).await.unwrap();
        data.write_file(Path::new("/reports/q1.csv"), b"a,b\n")
            .await
            .unwrap();
        let mut volumes = Volumes::new();
        volumes.insert("data".to_string(), data);
        Setup {
            mountable: Arc::new(MountableFs::new(root)),
            volumes,
        }
    }

    async fn run(builtin: &dyn Builtin, setup: &Setup, args: &[&str]) -> ExecResult {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let mut ctx = Context::new_for_test(&args, setup.mountable.clone(), None);
        ctx.mounts = Some(&setup.mountable);
        ctx.volumes = &setup.volumes;
        builtin.execute(ctx).await.unwrap()
    }

    #[tokio::test]
    async fn test_mount_kinds_and_listing() {
        let setup = setup().await;
        let fs = &setup.mountable;

        assert_eq!(run(&Mount, &setup, &["-t", "tmpfs", "scratch", "/scratch"]).await.exit_code, 0);
        assert_eq!(run(&Mount, &setup, &["--bind", "/srv/site", "/www"]).await.exit_code, 0);
        assert_eq!(run(&Mount, &setup, &["data:/reports", "/mnt/reports"]).await.exit_code, 0);

        assert_eq!(
            fs.read_file(Path::new("/www/index.html")).await.unwrap(),
            b"<h1>hi</h1>"
        );
        assert_eq!(
            fs.read_file(Path::new("/mnt/reports/q1.csv")).await.unwrap(),
            b"a,b\n"
        );

        let listing = run(&Mount, &setup, &[]).await.stdout;
        assert_eq!(
            listing,
            "data:/reports on /mnt/reports type volume\n\
             scratch on /scratch type tmpfs\n\
             /srv/site on /www type bind\n"
        );
    }

    #[tokio::test]
    async fn test_mount_errors() {
        let setup = setup().await;
        let result = run(&Mount, &setup, &["nope", "/mnt/x"]).await;
        assert_eq!(result.exit_code, 32);
        assert_eq!(result.stderr, "mount: nope: no such volume\n");

        run(&Mount, &setup, &["-t", "tmpfs", "t", "/busy"]).await;
        let result = run(&Mount, &setup, &["-t", "tmpfs", "t", "/busy"]).await;
        assert_eq!(result.exit_code, 32);

        let result = run(&Mount, &setup, &["-t", "tmpfs", "t", "/"]).await;
        assert_eq!(result.exit_code, 32);

        let result = run(&Mount, &setup, &["-t", "nfs", "srv", "/n"]).await;
        assert_eq!(result.stderr, "mount: unknown filesystem type 'nfs'\n");
    }

    #[tokio::test]
    async fn test_umount() {
        let setup = setup().await;
        run(&Mount, &setup, &["-t", "tmpfs", "t", "/scratch"]).await;
        setup
            .mountable
            .write_file(Path::new("/scratch/f"), b"x")
            .await
            .unwrap();

        assert_eq!(run(&Umount, &setup, &["/scratch"]).await.exit_code, 0);
        assert!(!setup.mountable.exists(Path::new("/scratch/f")).await.unwrap());

        let result = run(&Umount, &setup, &["/scratch"]).await;
        assert_eq!(result.exit_code, 32);
        assert_eq!(result.stderr, "umount: /scratch: not mounted\n");
    }

    #[tokio::test]
    async fn test_without_mount_table() {
        let args: Vec<String> = vec![];
        let ctx = Context::new_for_test(&args, Arc::new(InMemoryFs::new()), None);
        let result = Mount.execute(ctx).await.unwrap();
        assert_eq!(result.exit_code, 1);
    }
}
