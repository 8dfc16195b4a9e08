//! Environment builtins - env, printenv

use async_trait::async_trait;
use std::collections::BTreeMap;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::ExecResult;

/// The env builtin - print the environment, optionally modified.
///
/// Usage: env [-i] [-u NAME]... [NAME=VALUE]...
///
/// Options:
///   -i   Start with empty environment
///   -u   Remove NAME from the printed environment
///
/// Running a COMMAND under a modified environment is not supported; use
/// `NAME=VALUE command` instead.
pub struct Env;

#[async_trait]
impl Builtin for Env {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut vars: BTreeMap<&str, &str> = BTreeMap::new();
        let mut ignore_env = false;
        let mut overrides: Vec<(&str, &str)> = Vec::new();
        let mut removed: Vec<&str> = Vec::new();

        let mut args = ctx.args.iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-i" | "--ignore-environment" | "-" => ignore_env = true,
                "-u" | "--unset" => match args.next() {
                    Some(name) => removed.push(name),
                    None => {
                        return Ok(ExecResult::err("env: option requires an argument -- 'u'\n", 125));
                    }
                },
                a if a.starts_with('-') => {
                    return Ok(ExecResult::err(format!("env: invalid option -- '{}'\n", &a[1..]), 125));
                }
                a => match a.split_once('=') {
                    Some((name, value)) => overrides.push((name, value)),
                    None => {
                        return Ok(ExecResult::err(
                            format!("env: '{a}': running commands is not supported\n"),
                            126,
                        ));
                    }
                },
            }
        }

        if !ignore_env {
            vars.extend(ctx.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        for name in removed {
            vars.remove(name);
        }
        vars.extend(overrides);

        let output: String = vars.iter().map(|(k, v)| format!("{k}={v}\n")).collect();
        Ok(ExecResult::ok(output))
    }
}

/// The printenv builtin - print environment variables.
///
/// Usage: printenv [VARIABLE...]
///
/// With no arguments prints every exported variable as `NAME=value`.
/// Exits 1 if any named variable is unset.
pub struct Printenv;

#[async_trait]
impl Builtin for Printenv {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        if ctx.args.is_empty() {
            let sorted: BTreeMap<_, _> = ctx.env.iter().collect();
            let output: String = sorted.iter().map(|(k, v)| format!("{k}={v}\n")).collect();
            return Ok(ExecResult::ok(output));
        }

        let mut output = String::new();
        let mut missing = false;
        for name in ctx.args {
            match ctx.env.get(name) {
                Some(value) => {
                    output.push_str(value);
                    output.push('\n');
                }
                None => missing = true,
            }
        }
        Ok(ExecResult::with_code(output, i32::from(missing)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Arc;

    async fn run<B: Builtin>(builtin: &B, args: &[&str]) -> ExecResult {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let env: HashMap<String, String> = [("HOME", "/home/user"), ("A", "1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut ctx = Context::new_for_test(&args, Arc::new(InMemoryFs::new()), None);
        ctx.env = &env;
        ctx.cwd = Path::new("/");
        builtin.execute(ctx).await.unwrap()
    }

    #[tokio::test]
    async fn test_env_listing() {
        assert_eq!(run(&Env, &[]).await.stdout, "A=1\nHOME=/home/user\n");
        assert_eq!(run(&Env, &["-i", "X=y"]).await.stdout, "X=y\n");
        assert_eq!(run(&Env, &["-u", "A", "A2=z"]).await.stdout, "A2=z\nHOME=/home/user\n");
    }

    #[tokio::test]
    async fn test_env_refuses_commands() {
        let result = run(&Env, &["ls"]).await;
        assert_eq!(result.exit_code, 126);
        assert_eq!(run(&Env, &["-z"]).await.exit_code, 125);
    }

    #[tokio::test]
    async fn test_printenv() {
        assert_eq!(run(&Printenv, &[]).await.stdout, "A=1\nHOME=/home/user\n");
        assert_eq!(run(&Printenv, &["HOME"]).await.stdout, "/home/user\n");
        let result = run(&Printenv, &["A", "NOPE"]).await;
        assert_eq!((result.stdout.as_str(), result.exit_code), ("1\n", 1));
    }
}
