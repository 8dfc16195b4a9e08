//! Sandbox session example
//!
//! The process-style API: JSON options, per-command overrides, ordered
//! output logs and file helpers.
//!
//! Run with: cargo run --example sandbox_session

use sandbash::{Encoding, LogStream, RunOptions, Sandbox, SandboxOptions};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let options = SandboxOptions::from_json(
        r#"{
            "cwd": "/workspace",
            "env": {"PROJECT": "demo"},
            "limits": {"max_commands": 1000, "timeout_ms": 5000},
            "mounts": "tmpfs /scratch tmpfs",
            "files": {"/workspace/build.sh": "echo building $PROJECT in $(pwd)\necho warn >&2\n"}
        }"#,
    )?;
    let mut sandbox = Sandbox::create(options).await?;

    let mut run = sandbox
        .run_command("source build.sh; echo done", RunOptions::default())
        .await?;
    for entry in run.logs() {
        let tag = match entry.stream {
            LogStream::Stdout => "out",
            LogStream::Stderr => "err",
        };
        print!("[{} {tag}] {}", entry.timestamp.format("%H:%M:%S%.3f"), entry.data);
    }
    println!("exit: {}", run.wait().await);

    // Overrides apply to one command only
    sandbox.mk_dir("/srv", Default::default()).await?;
    let run = sandbox
        .run_command("pwd; echo $PROJECT", RunOptions::default().cwd("/srv").env("PROJECT", "other"))
        .await?;
    print!("{}", run.stdout());
    let run = sandbox.run_command("pwd; echo $PROJECT", RunOptions::default()).await?;
    print!("{}", run.stdout());

    sandbox
        .run_command("printf 'binary\\001' > /scratch/blob", RunOptions::default())
        .await?;
    println!("blob: {}", sandbox.read_file("/scratch/blob", Encoding::Base64).await?);

    sandbox.stop().await;
    Ok(())
}
