//! The tee builtin

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::ExecResult;

/// The tee builtin - read from stdin and write to stdout and files.
///
/// Usage: tee [-a] [FILE...]
///
/// Options:
///   -a   Append to files instead of overwriting
///
/// A file that cannot be written is reported and the rest still are.
pub struct Tee;

#[async_trait]
impl Builtin for Tee {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut append = false;
        let mut files: Vec<&String> = Vec::new();

        for arg in ctx.args {
            if arg == "-a" || arg == "--append" {
                append = true;
            } else if arg.starts_with('-') && arg != "-" {
                return Ok(ExecResult::err(
                    format!("tee: invalid option -- '{}'\n", &arg[1..]),
                    1,
                ));
            } else {
                files.push(arg);
            }
        }

        let input = ctx.stdin.unwrap_or_default();
        let mut result = ExecResult::ok(input);
        for file in files {
            let path = ctx.resolve(file);
            let written = if append {
                ctx.fs.append_file(&path, input.as_bytes()).await
            } else {
                ctx.fs.write_file(&path, input.as_bytes()).await
            };
            if let Err(e) = written {
                result.stderr.push_str(&format!("tee: {}\n", e.describe(file)));
                result.exit_code = 1;
            }
        }
        Ok(result)
    }

    fn reads_stdin(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, InMemoryFs};
    use std::path::Path;
    use std::sync::Arc;

    async fn run_tee(fs: &Arc<InMemoryFs>, args: &[&str], stdin: &str) -> ExecResult {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let ctx = Context::new_for_test(&args, fs.clone(), Some(stdin));
        Tee.execute(ctx).await.unwrap()
    }

    #[tokio::test]
    async fn test_tee_writes_every_file() {
        let fs = Arc::new(InMemoryFs::new());
        let result = run_tee(&fs, &["a", "/tmp/b"], "data\n").await;
        assert_eq!(result.stdout, "data\n");
        assert_eq!(fs.read_file(Path::new("/home/user/a")).await.unwrap(), b"data\n");
        assert_eq!(fs.read_file(Path::new("/tmp/b")).await.unwrap(), b"data\n");
    }

    #[tokio::test]
    async fn test_tee_append() {
        let fs = Arc::new(InMemoryFs::new());
        run_tee(&fs, &["log"], "one\n").await;
        run_tee(&fs, &["-a", "log"], "two\n").await;
        assert_eq!(
            fs.read_file(Path::new("/home/user/log")).await.unwrap(),
            b"one\ntwo\n"
        );
    }

    #[tokio::test]
    async fn test_tee_reports_unwritable_target() {
        let fs = Arc::new(InMemoryFs::new());
        let result = run_tee(&fs, &["/missing/dir/f", "ok"], "x").await;
        assert_eq!(result.stdout, "x");
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.starts_with("tee: /missing/dir/f: "));
        assert!(fs.exists(Path::new("/home/user/ok")).await.unwrap());
        assert_eq!(run_tee(&fs, &["-x"], "").await.exit_code, 1);
    }
}
