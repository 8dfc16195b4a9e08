//! Custom builtins example
//!
//! Host commands see the arguments, exported variables, working directory,
//! stdin and filesystem of the script that calls them.
//!
//! Run with: cargo run --example custom_builtins

use sandbash::{Bash, Builtin, BuiltinContext, ExecResult, async_trait};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

struct Greet {
    default_name: String,
}

#[async_trait]
impl Builtin for Greet {
    async fn execute(&self, ctx: BuiltinContext<'_>) -> sandbash::Result<ExecResult> {
        let name = ctx
            .args
            .first()
            .map(String::as_str)
            .unwrap_or(&self.default_name);
        Ok(ExecResult::ok(format!("Hello, {name}!\n")))
    }
}

/// Upper-cases stdin or file operands.
struct Upper;

#[async_trait]
impl Builtin for Upper {
    async fn execute(&self, ctx: BuiltinContext<'_>) -> sandbash::Result<ExecResult> {
        let (text, errors) = ctx.read_inputs("upper", ctx.args).await?;
        if !errors.is_empty() {
            return Ok(ExecResult::err(errors, 1));
        }
        Ok(ExecResult::ok(text.to_uppercase()))
    }

    fn reads_stdin(&self) -> bool {
        true
    }
}

/// Host-side state shared across calls.
struct Counter {
    count: Arc<AtomicU64>,
}

#[async_trait]
impl Builtin for Counter {
    async fn execute(&self, ctx: BuiltinContext<'_>) -> sandbash::Result<ExecResult> {
        let step: u64 = ctx.args.first().and_then(|s| s.parse().ok()).unwrap_or(1);
        let total = self.count.fetch_add(step, Ordering::SeqCst) + step;
        Ok(ExecResult::ok(format!("{total}\n")))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let count = Arc::new(AtomicU64::new(0));
    let mut bash = Bash::builder()
        .builtin(
            "greet",
            Arc::new(Greet {
                default_name: "World".into(),
            }),
        )
        .builtin("upper", Arc::new(Upper))
        .builtin("counter", Arc::new(Counter { count: count.clone() }))
        .build();

    let result = bash.exec("greet; greet Sandbash | upper").await?;
    print!("{}", result.stdout);

    let result = bash
        .exec("echo 'quiet words' > /tmp/in.txt; upper /tmp/in.txt /tmp/missing.txt")
        .await?;
    print!("{}{}", result.stdout, result.stderr);

    let result = bash.exec("for i in 1 2 3; do counter 5; done").await?;
    print!("{}", result.stdout);
    println!("host sees {}", count.load(Ordering::SeqCst));

    Ok(())
}
