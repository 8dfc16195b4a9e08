//! Resource limits example
//!
//! Runaway scripts are stopped by the governor and the output produced so
//! far is kept.
//!
//! Run with: cargo run --example resource_limits

use sandbash::{Bash, ExecutionLimits};
use std::time::Duration;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let attacks = [
        ("command flood", ExecutionLimits::new().max_commands(3), "echo 1; echo 2; echo 3; echo 4"),
        (
            "infinite loop",
            ExecutionLimits::new().max_loop_iterations(5),
            "while true; do echo tick; done",
        ),
        (
            "unbounded recursion",
            ExecutionLimits::new().max_function_depth(5),
            "recurse() { echo \"depth $1\"; recurse $(($1 + 1)); }; recurse 1",
        ),
        (
            "memory growth",
            ExecutionLimits::new().max_string_length(1024),
            "s=x; while true; do s=$s$s; done",
        ),
        (
            "slow script",
            ExecutionLimits::new().timeout(Duration::from_millis(200)),
            "echo waiting; sleep 10",
        ),
    ];

    for (name, limits, script) in attacks {
        let mut bash = Bash::builder().limits(limits).build();
        match bash.exec(script).await {
            Ok(result) => println!("{name}: unexpectedly finished with {}", result.exit_code),
            Err(e) => {
                let partial = e.partial_output().map(|r| r.stdout.lines().count()).unwrap_or(0);
                println!("{name}: blocked ({e}), {partial} lines kept");
            }
        }
    }

    // Limits reset on every exec
    let mut bash = Bash::builder()
        .limits(ExecutionLimits::new().max_commands(100))
        .build();
    for _ in 0..3 {
        let result = bash.exec("for i in $(seq 10); do :; done; echo ok").await?;
        print!("{}", result.stdout);
    }
    Ok(())
}
