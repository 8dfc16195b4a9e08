//! Head and tail builtins - output first/last lines of input

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::error::{Error, Result};
use crate::interpreter::ExecResult;

/// Default number of lines to output
const DEFAULT_LINES: usize = 10;

/// What part of each input to keep.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Count {
    Lines(usize),
    Bytes(usize),
    /// `tail -n +N`: everything from line N on.
    FromLine(usize),
}

struct Args {
    count: Count,
    quiet: bool,
    files: Vec<String>,
}

/// Parse `-n NUM`, `-nNUM`, `-NUM`, `-c NUM` and `-q`.
fn parse_args(cmd: &str, args: &[String]) -> std::result::Result<Args, ExecResult> {
    let mut parsed = Args {
        count: Count::Lines(DEFAULT_LINES),
        quiet: false,
        files: Vec::new(),
    };
    let invalid = |what: &str, value: &str| {
        ExecResult::err(format!("{cmd}: invalid number of {what}: '{value}'\n"), 1)
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.as_str() {
            "-q" => {
                parsed.quiet = true;
                continue;
            }
            "-n" | "-c" => (arg.as_str(), None),
            a if a.starts_with("-n") || a.starts_with("-c") => (&a[..2], Some(&a[2..])),
            a if a.len() > 1 && a.starts_with('-') && a[1..].bytes().all(|b| b.is_ascii_digit()) => {
                ("-n", Some(&a[1..]))
            }
            a if a.starts_with('-') && a.len() > 1 => {
                return Err(ExecResult::err(
                    format!("{cmd}: invalid option -- '{}'\n", &a[1..]),
                    1,
                ));
            }
            _ => {
                parsed.files.push(arg.clone());
                continue;
            }
        };
        let Some(value) = inline.or_else(|| iter.next().map(String::as_str)) else {
            return Err(ExecResult::err(
                format!("{cmd}: option requires an argument -- '{}'\n", &flag[1..]),
                1,
            ));
        };
        let what = if flag == "-c" { "bytes" } else { "lines" };
        let (from_start, digits) = match value.strip_prefix('+') {
            Some(rest) if cmd == "tail" && flag == "-n" => (true, rest),
            _ => (false, value),
        };
        let n: usize = digits.parse().map_err(|_| invalid(what, value))?;
        parsed.count = match (flag, from_start) {
            ("-c", _) => Count::Bytes(n),
            (_, true) => Count::FromLine(n),
            _ => Count::Lines(n),
        };
    }
    Ok(parsed)
}

async fn run(cmd: &str, ctx: Context<'_>, take: fn(&str, Count) -> String) -> Result<ExecResult> {
    let args = match parse_args(cmd, ctx.args) {
        Ok(args) => args,
        Err(result) => return Ok(result),
    };

    if args.files.is_empty() {
        return Ok(ExecResult::ok(take(ctx.stdin.unwrap_or_default(), args.count)));
    }

    let headers = args.files.len() > 1 && !args.quiet;
    let mut result = ExecResult::default();
    let mut printed = false;
    for file in &args.files {
        match ctx.read_to_string(file).await {
            Ok(text) => {
                if headers {
                    if printed {
                        result.stdout.push('\n');
                    }
                    result.stdout.push_str(&format!("==> {file} <==\n"));
                }
                printed = true;
                result.stdout.push_str(&take(&text, args.count));
            }
            Err(Error::Fs(e)) => {
                result
                    .stderr
                    .push_str(&format!("{cmd}: cannot open {}\n", e.describe(file)));
                result.exit_code = 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(result)
}

/// The head builtin - output the first N lines of input.
///
/// Usage: head [-n NUM | -NUM | -c BYTES] [-q] [FILE...]
pub struct Head;

#[async_trait]
impl Builtin for Head {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        run("head", ctx, head).await
    }

    fn reads_stdin(&self) -> bool {
        true
    }
}

/// The tail builtin - output the last N lines of input.
///
/// Usage: tail [-n NUM | -n +NUM | -NUM | -c BYTES] [-q] [FILE...]
pub struct Tail;

#[async_trait]
impl Builtin for Tail {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        run("tail", ctx, tail).await
    }

    fn reads_stdin(&self) -> bool {
        true
    }
}

fn head(text: &str, count: Count) -> String {
    match count {
        Count::Bytes(n) => byte_prefix(text, n).to_string(),
        Count::Lines(n) | Count::FromLine(n) => text.split_inclusive('\n').take(n).collect(),
    }
}

fn tail(text: &str, count: Count) -> String {
    match count {
        Count::Bytes(n) => {
            let mut start = text.len().saturating_sub(n);
            while !text.is_char_boundary(start) {
                start += 1;
            }
            text[start..].to_string()
        }
        Count::Lines(n) => {
            let lines: Vec<&str> = text.split_inclusive('\n').collect();
            lines[lines.len().saturating_sub(n)..].concat()
        }
        Count::FromLine(n) => text
            .split_inclusive('\n')
            .skip(n.saturating_sub(1))
            .collect(),
    }
}

fn byte_prefix(text: &str, n: usize) -> &str {
    let mut end = n.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
