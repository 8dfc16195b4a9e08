//! cat builtin command

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::ExecResult;

/// The cat builtin command.
///
/// Supports `-n` (number lines) and `-v`/`-A`-style visible control
/// characters. `-` names stdin.
pub struct Cat;

#[async_trait]
impl Builtin for Cat {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut show_nonprinting = false;
        let mut number_lines = false;
        let mut files = Vec::new();

        for arg in ctx.args {
            match arg.strip_prefix('-') {
                Some(flags) if !flags.is_empty() && !arg.starts_with("--") => {
                    for flag in flags.chars() {
                        match flag {
                            'n' => number_lines = true,
                            'v' | 'A' | 'e' | 't' => show_nonprinting = true,
                            other => {
                                return Ok(ExecResult::err(
                                    format!("cat: invalid option -- '{other}'\n"),
                                    1,
                                ));
                            }
                        }
                    }
                }
                _ => files.push(arg.clone()),
            }
        }

        let (raw, errors) = ctx.read_inputs("cat", &files).await?;

        let mut output = if show_nonprinting {
            make_visible(&raw)
        } else {
            raw
        };
        if number_lines {
            output = number(&output);
        }

        Ok(ExecResult {
            stdout: output,
            exit_code: i32::from(!errors.is_empty()),
            stderr: errors,
            ..Default::default()
        })
    }

    fn reads_stdin(&self) -> bool {
        true
    }
}

fn make_visible(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\n' | '\t' => out.push(ch),
            '\x7f' => out.push_str("^?"),
            c if (c as u32) < 32 => {
                out.push('^');
                out.push(char::from(c as u8 + 64));
            }
            c => out.push(c),
        }
    }
    out
}

fn number(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    for (i, line) in text.split_inclusive('\n').enumerate() {
        out.push_str(&format!("{:>6}\t{line}", i + 1));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, InMemoryFs};
    use std::path::Path;
    use std::sync::Arc;

    async fn run(args: &[&str], stdin: Option<&str>) -> ExecResult {
        let fs = Arc::new(InMemoryFs::new());
        fs.write_file(Path::new("/home/user/a.txt"), b"one\ntwo\n")
            .await
            .unwrap();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let ctx = Context::new_for_test(&args, fs, stdin);
        Cat.execute(ctx).await.unwrap()
    }

    #[tokio::test]
    async fn test_cat_file_and_stdin() {
        let result = run(&["a.txt", "-"], Some("three\n")).await;
        assert_eq!(result.stdout, "one\ntwo\nthree\n");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_cat_missing_file_keeps_going() {
        let result = run(&["nope", "a.txt"], None).await;
        assert_eq!(result.stdout, "one\ntwo\n");
        assert_eq!(result.stderr, "cat: nope: No such file or directory\n");
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_cat_number_and_visible() {
        let result = run(&["-n"], Some("a\nb")).await;
        assert_eq!(result.stdout, "     1\ta\n     2\tb");
        let result = run(&["-v"], Some("x\x01\n")).await;
        assert_eq!(result.stdout, "x^A\n");
    }
}
