//! High-level `Sandbox` API tests
//!
//! Per-call overrides, log streams, file helpers and JSON options.

use pretty_assertions::assert_eq;
use sandbash::{Encoding, LogStream, MkDirOptions, RunOptions, Sandbox, SandboxOptions};
use std::collections::BTreeMap;

#[tokio::test]
async fn cwd_override_is_restored() {
    let mut sandbox = Sandbox::create(SandboxOptions::default()).await.unwrap();
    sandbox.mk_dir("/app", MkDirOptions::default()).await.unwrap();

    let first = sandbox
        .run_command("pwd", RunOptions::default().cwd("/app"))
        .await
        .unwrap();
    let second = sandbox.run_command("pwd", RunOptions::default()).await.unwrap();

    assert_eq!(first.stdout(), "/app\n");
    assert_eq!(second.stdout(), "/home/user\n");
}

#[tokio::test]
async fn env_override_is_restored() {
    let mut options = SandboxOptions::default();
    options.env.insert("STAGE".to_string(), "base".to_string());
    let mut sandbox = Sandbox::create(options).await.unwrap();

    let run = sandbox
        .run_command(
            "echo $STAGE $EXTRA; printenv STAGE",
            RunOptions::default().env("STAGE", "override").env("EXTRA", "x"),
        )
        .await
        .unwrap();
    assert_eq!(run.stdout(), "override x\noverride\n");

    let run = sandbox
        .run_command("echo \"$STAGE [$EXTRA]\"", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(run.stdout(), "base []\n");
}

#[tokio::test]
async fn overrides_restored_after_errors() {
    let mut sandbox = Sandbox::create(SandboxOptions::default()).await.unwrap();
    let failed = sandbox
        .run_command("if then", RunOptions::default().cwd("/tmp"))
        .await
        .unwrap();
    assert_eq!(failed.wait().await, 2);
    assert!(failed.stderr().contains("syntax error"));

    let run = sandbox.run_command("pwd", RunOptions::default()).await.unwrap();
    assert_eq!(run.stdout(), "/home/user\n");
}

#[tokio::test]
async fn limit_errors_become_exit_codes() {
    let options = SandboxOptions::from_json(r#"{"limits": {"max_loop_iterations": 2}}"#).unwrap();
    let mut sandbox = Sandbox::create(options).await.unwrap();
    let run = sandbox
        .run_command("for i in 1 2 3; do echo $i; done", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(run.exit_code(), 1);
    assert!(run.stdout().starts_with("1\n2\n"));
    assert!(run.stderr().contains("maximum loop iterations"));
}

#[tokio::test]
async fn logs_are_ordered_and_one_shot() {
    let mut sandbox = Sandbox::create(SandboxOptions::default()).await.unwrap();
    let mut run = sandbox
        .run_command("echo a; echo b >&2; echo c", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(run.output(), "a\nb\nc\n");

    let entries: Vec<_> = run.logs().map(|e| (e.stream, e.data)).collect();
    assert_eq!(
        entries,
        vec![
            (LogStream::Stdout, "a\n".to_string()),
            (LogStream::Stderr, "b\n".to_string()),
            (LogStream::Stdout, "c\n".to_string()),
        ]
    );
    assert_eq!(run.logs().count(), 0);
    assert_eq!(run.stdout(), "a\nc\n");
    run.kill().await;
    assert_eq!(run.wait().await, 0);
}

#[tokio::test]
async fn files_round_trip() {
    let mut files = BTreeMap::new();
    files.insert("/data/input.txt".to_string(), "one\ntwo\n".to_string());
    files.insert("relative.txt".to_string(), "rel".to_string());
    let options = SandboxOptions {
        files,
        ..SandboxOptions::default()
    };
    let mut sandbox = Sandbox::create(options).await.unwrap();

    let run = sandbox
        .run_command("wc -l < /data/input.txt; cat relative.txt > /tmp/out", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(run.stdout().trim(), "2");

    assert_eq!(sandbox.read_file("/tmp/out", Encoding::Utf8).await.unwrap(), "rel");
    assert_eq!(
        sandbox.read_file("/home/user/relative.txt", Encoding::Base64).await.unwrap(),
        "cmVs"
    );
    assert!(sandbox.read_file("/missing", Encoding::Utf8).await.is_err());
    sandbox.stop().await;
}

#[tokio::test]
async fn mk_dir_recursive() {
    let mut sandbox = Sandbox::create(SandboxOptions::default()).await.unwrap();
    assert!(
        sandbox
            .mk_dir("/a/b/c", MkDirOptions::default())
            .await
            .is_err()
    );
    sandbox
        .mk_dir("/a/b/c", MkDirOptions { recursive: true })
        .await
        .unwrap();
    let run = sandbox.run_command("[ -d /a/b/c ] && echo yes", RunOptions::default()).await.unwrap();
    assert_eq!(run.stdout(), "yes\n");
}

#[tokio::test]
async fn options_from_json() {
    let json = r#"{
        "cwd": "/work",
        "env": {"MODE": "ci"},
        "mounts": "tmpfs /scratch tmpfs",
        "files": {"/work/hello.sh": "echo hello from $MODE"}
    }"#;
    let mut sandbox = Sandbox::create(SandboxOptions::from_json(json).unwrap())
        .await
        .unwrap();
    let run = sandbox
        .run_command("pwd; source hello.sh; mount", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(
        run.stdout(),
        "/work\nhello from ci\ntmpfs on /scratch type tmpfs\n"
    );
}

#[tokio::test]
async fn unknown_option_rejected() {
    assert!(SandboxOptions::from_json(r#"{"cwdd": "/x"}"#).is_err());
}
