//! Mount composition and isolation tests
//!
//! Scoped views, overlays, fstab and the mount builtins, checked through
//! both the `FileSystem` API and shell scripts.

use pretty_assertions::assert_eq;
use sandbash::{Bash, FileSystem, FsErrorKind, InMemoryFs, OverlayFs, ScopedFs};
use std::path::Path;
use std::sync::Arc;

#[tokio::test]
async fn scoped_views_never_see_each_other() {
    let store: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
    let a = ScopedFs::create(store.clone(), "/mnt/a").await.unwrap();
    let b = ScopedFs::create(store.clone(), "/mnt/b").await.unwrap();

    a.write_file(Path::new("/file.txt"), b"from a").await.unwrap();
    b.write_file(Path::new("/file.txt"), b"from b").await.unwrap();

    assert_eq!(a.read_file(Path::new("/file.txt")).await.unwrap(), b"from a");
    assert_eq!(b.read_file(Path::new("/file.txt")).await.unwrap(), b"from b");

    let escaped = a.read_file(Path::new("/../b/file.txt")).await.unwrap_err();
    assert_eq!(escaped.kind, FsErrorKind::NotFound);
}

#[tokio::test]
async fn scoped_views_mounted_in_a_shell() {
    let store: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
    let a = Arc::new(ScopedFs::create(store.clone(), "/mnt/a").await.unwrap());
    let b = Arc::new(ScopedFs::create(store.clone(), "/mnt/b").await.unwrap());

    let mut bash = Bash::builder().mount("/a", a).mount("/b", b).build();
    let result = bash
        .exec("echo secret > /a/file.txt; cat /b/file.txt; ls /a")
        .await
        .unwrap();
    assert_eq!(result.stdout, "file.txt\n");
    assert_eq!(result.stderr, "cat: /b/file.txt: No such file or directory\n");
    assert!(store.exists(Path::new("/mnt/a/file.txt")).await.unwrap());
}

#[tokio::test]
async fn mount_points_are_listed_by_parent() {
    let mut bash = Bash::builder()
        .mount("/data/cache", Arc::new(InMemoryFs::empty()))
        .build();
    let result = bash.exec("ls /data; [ -d /data/cache ] && echo dir").await.unwrap();
    assert_eq!(result.stdout, "cache\ndir\n");
}

#[tokio::test]
async fn nested_mounts_use_longest_prefix() {
    let outer: Arc<dyn FileSystem> = Arc::new(InMemoryFs::empty());
    let inner: Arc<dyn FileSystem> = Arc::new(InMemoryFs::empty());
    let mut bash = Bash::builder()
        .mount("/mnt", outer.clone())
        .mount("/mnt/inner", inner.clone())
        .build();
    bash.exec("echo o > /mnt/o.txt; echo i > /mnt/inner/i.txt")
        .await
        .unwrap();
    assert!(outer.exists(Path::new("/o.txt")).await.unwrap());
    assert!(inner.exists(Path::new("/i.txt")).await.unwrap());
    assert!(!outer.exists(Path::new("/inner/i.txt")).await.unwrap());
}

#[tokio::test]
async fn cross_mount_move_copies() {
    let mut bash = Bash::builder()
        .mount("/vol", Arc::new(InMemoryFs::empty()))
        .build();
    let result = bash
        .exec("mkdir -p /tmp/src/sub; echo x > /tmp/src/sub/f; mv /tmp/src /vol/dst; cat /vol/dst/sub/f; ls /tmp")
        .await
        .unwrap();
    assert_eq!(result.stdout, "x\n");
    assert_eq!(result.exit_code, 0);
}

#[tokio::test]
async fn unmount_keeps_backing_data() {
    let volume: Arc<dyn FileSystem> = Arc::new(InMemoryFs::empty());
    let mut bash = Bash::builder().mount("/v", volume.clone()).build();
    bash.exec("echo kept > /v/f").await.unwrap();
    bash.unmount("/v").unwrap();
    let result = bash.exec("cat /v/f").await.unwrap();
    assert_eq!(result.exit_code, 1);
    assert_eq!(volume.read_file(Path::new("/f")).await.unwrap(), b"kept\n");
}

#[tokio::test]
async fn mount_builtins() {
    let volume: Arc<dyn FileSystem> = Arc::new(InMemoryFs::empty());
    volume.mkdir(Path::new("/project"), false).await.unwrap();
    volume
        .write_file(Path::new("/project/readme"), b"hello\n")
        .await
        .unwrap();

    let mut bash = Bash::builder().volume("shared", volume).build();
    let script = r#"
        mount -t tmpfs scratch /scratch
        echo tmp > /scratch/t
        mount shared:/project /work
        cat /work/readme
        mount
        umount /scratch
        cat /scratch/t
    "#;
    let result = bash.exec(script).await.unwrap();
    assert_eq!(
        result.stdout,
        "hello\nscratch on /scratch type tmpfs\nshared:/project on /work type volume\n"
    );
    assert_eq!(result.exit_code, 1);
}

#[tokio::test]
async fn mount_twice_is_busy() {
    let mut bash = Bash::new();
    let result = bash
        .exec("mount -t tmpfs a /m; mount -t tmpfs b /m; echo $?")
        .await
        .unwrap();
    assert_ne!(result.stdout, "0\n");
    assert!(!result.stderr.is_empty());
}

#[tokio::test]
async fn fstab_at_startup() {
    let data: Arc<dyn FileSystem> = Arc::new(InMemoryFs::empty());
    let fstab = "# scratch space\ntmpfs /scratch tmpfs\ndata /data volume ro\n";
    let mut bash = Bash::builder()
        .volume("data", data.clone())
        .fstab(fstab)
        .unwrap()
        .build();
    let result = bash
        .exec("echo a > /scratch/a; echo b > /data/b; cat /scratch/a /data/b")
        .await
        .unwrap();
    assert_eq!(result.stdout, "a\nb\n");
    assert!(data.exists(Path::new("/b")).await.unwrap());
}

#[tokio::test]
async fn overlay_protects_lower_layer() {
    let base: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
    base.write_file(Path::new("/tmp/keep"), b"original\n")
        .await
        .unwrap();
    let mut bash = Bash::builder()
        .fs(Arc::new(OverlayFs::new(base.clone())))
        .build();
    let result = bash
        .exec("rm /tmp/keep; [ -e /tmp/keep ] || echo gone; echo new > /tmp/keep; cat /tmp/keep")
        .await
        .unwrap();
    assert_eq!(result.stdout, "gone\nnew\n");
    assert_eq!(
        base.read_file(Path::new("/tmp/keep")).await.unwrap(),
        b"original\n"
    );
}
