//! Path builtins - basename, dirname, pwd
//!
//! `basename` and `dirname` are pure string operations; they never consult
//! the filesystem.

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::ExecResult;

/// The basename builtin - strip directory and suffix from filenames.
///
/// Usage: `basename NAME [SUFFIX]`, `basename -a NAME...`,
/// `basename -s SUFFIX NAME...`
pub struct Basename;

#[async_trait]
impl Builtin for Basename {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut suffix: Option<&str> = None;
        let mut multiple = false;
        let mut names = Vec::new();
        let mut args = ctx.args.iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-a" => multiple = true,
                "-s" => {
                    suffix = args.next().map(String::as_str);
                    multiple = true;
                }
                _ => names.push(arg.as_str()),
            }
        }

        if names.is_empty() {
            return Ok(ExecResult::err("basename: missing operand\n", 1));
        }
        if !multiple && names.len() == 2 {
            suffix = Some(names[1]);
            names.truncate(1);
        } else if !multiple && names.len() > 2 {
            return Ok(ExecResult::err(
                format!("basename: extra operand '{}'\n", names[2]),
                1,
            ));
        }

        let output: String = names
            .iter()
            .map(|name| format!("{}\n", base_name(name, suffix)))
            .collect();
        Ok(ExecResult::ok(output))
    }
}

fn base_name(name: &str, suffix: Option<&str>) -> String {
    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty() {
        return if name.is_empty() { String::new() } else { "/".into() };
    }
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
    match suffix {
        Some(suffix) if base != suffix => base.strip_suffix(suffix).unwrap_or(base).to_string(),
        _ => base.to_string(),
    }
}

/// The dirname builtin - strip last component from file name.
///
/// A NAME without slashes gives `.`.
pub struct Dirname;

#[async_trait]
impl Builtin for Dirname {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        if ctx.args.is_empty() {
            return Ok(ExecResult::err("dirname: missing operand\n", 1));
        }
        let output: String = ctx
            .args
            .iter()
            .map(|name| format!("{}\n", dir_name(name)))
            .collect();
        Ok(ExecResult::ok(output))
    }
}

fn dir_name(name: &str) -> &str {
    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty() {
        return if name.starts_with('/') { "/" } else { "." };
    }
    match trimmed.rfind('/') {
        Some(idx) => {
            let parent = trimmed[..idx].trim_end_matches('/');
            if parent.is_empty() { "/" } else { parent }
        }
        None => ".",
    }
}

/// The pwd builtin - print the working directory.
pub struct Pwd;

#[async_trait]
impl Builtin for Pwd {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        Ok(ExecResult::ok(format!("{}\n", ctx.cwd.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use std::sync::Arc;

    async fn run<B: Builtin>(builtin: &B, args: &[&str]) -> ExecResult {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let ctx = Context::new_for_test(&args, Arc::new(InMemoryFs::new()), None);
        builtin.execute(ctx).await.unwrap()
    }

    #[tokio::test]
    async fn test_basename() {
        assert_eq!(run(&Basename, &["/usr/bin/sort"]).await.stdout, "sort\n");
        assert_eq!(run(&Basename, &["file.txt", ".txt"]).await.stdout, "file\n");
        assert_eq!(run(&Basename, &["/a/b/"]).await.stdout, "b\n");
        assert_eq!(run(&Basename, &["/"]).await.stdout, "/\n");
        assert_eq!(run(&Basename, &[".txt", ".txt"]).await.stdout, ".txt\n");
        assert_eq!(
            run(&Basename, &["-s", ".sh", "a/x.sh", "y.sh"]).await.stdout,
            "x\ny\n"
        );
        assert_eq!(run(&Basename, &[]).await.exit_code, 1);
    }

    #[tokio::test]
    async fn test_dirname() {
        assert_eq!(run(&Dirname, &["/usr/bin/sort"]).await.stdout, "/usr/bin\n");
        assert_eq!(run(&Dirname, &["file"]).await.stdout, ".\n");
        assert_eq!(run(&Dirname, &["/file"]).await.stdout, "/\n");
        assert_eq!(run(&Dirname, &["/a/b/"]).await.stdout, "/a\n");
        assert_eq!(run(&Dirname, &["/"]).await.stdout, "/\n");
        assert_eq!(run(&Dirname, &["a/b", "c"]).await.stdout, "a\n.\n");
    }

    #[tokio::test]
    async fn test_pwd() {
        assert_eq!(run(&Pwd, &[]).await.stdout, "/home/user\n");
    }
}
