//! grep - Pattern matching builtin
//!
//! Implements grep functionality using the regex crate. Basic regular
//! expressions (the default) are translated to the crate's syntax; `-E`
//! patterns are passed through.
//!
//! Usage:
//!   grep pattern file
//!   echo "text" | grep pattern
//!   grep -i pattern file        # case insensitive
//!   grep -v pattern file        # invert match
//!   grep -n pattern file        # show line numbers
//!   grep -c pattern file        # count matches
//!   grep -o pattern file        # only show matching part
//!   grep -l pattern file1 file2 # list matching files
//!   grep -r pattern dir         # walk a directory tree
//!   grep -q pattern file        # status only

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use regex::{Regex, RegexBuilder};
use std::path::PathBuf;

use super::{Builtin, Context};
use crate::error::{Error, Result};
use crate::interpreter::ExecResult;

/// grep command - pattern matching
pub struct Grep;

#[derive(Default)]
struct GrepOptions {
    patterns: Vec<String>,
    files: Vec<String>,
    ignore_case: bool,
    invert_match: bool,
    line_numbers: bool,
    count_only: bool,
    files_with_matches: bool,
    fixed_strings: bool,
    extended: bool,
    only_matching: bool,
    word_regex: bool,
    line_regex: bool,
    quiet: bool,
    no_messages: bool,
    recursive: bool,
    with_filename: Option<bool>,
}

impl GrepOptions {
    fn parse(args: &[String]) -> std::result::Result<Self, String> {
        let mut opts = Self::default();
        let mut positional = Vec::new();
        let mut i = 0;

        while i < args.len() {
            let arg = &args[i];
            if arg == "--" {
                positional.extend(args[i + 1..].iter().cloned());
                break;
            }
            if arg.starts_with('-') && arg.len() > 1 && !arg.starts_with("--") {
                let flags: Vec<char> = arg[1..].chars().collect();
                for (pos, &c) in flags.iter().enumerate() {
                    match c {
                        'i' | 'y' => opts.ignore_case = true,
                        'v' => opts.invert_match = true,
                        'n' => opts.line_numbers = true,
                        'c' => opts.count_only = true,
                        'l' => opts.files_with_matches = true,
                        'o' => opts.only_matching = true,
                        'w' => opts.word_regex = true,
                        'x' => opts.line_regex = true,
                        'q' => opts.quiet = true,
                        's' => opts.no_messages = true,
                        'r' | 'R' => opts.recursive = true,
                        'h' => opts.with_filename = Some(false),
                        'H' => opts.with_filename = Some(true),
                        'F' => opts.fixed_strings = true,
                        'E' => opts.extended = true,
                        'G' => opts.extended = false,
                        'e' => {
                            // -ePATTERN or -e PATTERN
                            let rest: String = flags[pos + 1..].iter().collect();
                            if rest.is_empty() {
                                i += 1;
                                let pattern = args
                                    .get(i)
                                    .ok_or("option requires an argument -- 'e'")?;
                                opts.patterns.push(pattern.clone());
                            } else {
                                opts.patterns.push(rest);
                            }
                            break;
                        }
                        other => return Err(format!("invalid option -- '{other}'")),
                    }
                }
            } else if let Some(long) = arg.strip_prefix("--") {
                match long {
                    "ignore-case" => opts.ignore_case = true,
                    "invert-match" => opts.invert_match = true,
                    "count" => opts.count_only = true,
                    "quiet" | "silent" => opts.quiet = true,
                    "recursive" => opts.recursive = true,
                    "fixed-strings" => opts.fixed_strings = true,
                    "extended-regexp" => opts.extended = true,
                    _ => return Err(format!("unrecognized option '{arg}'")),
                }
            } else {
                positional.push(arg.clone());
            }
            i += 1;
        }

        if opts.patterns.is_empty() {
            if positional.is_empty() {
                return Err("missing pattern".to_string());
            }
            opts.patterns.push(positional.remove(0));
        }
        opts.files = positional;
        Ok(opts)
    }

    fn build_regex(&self) -> std::result::Result<Regex, regex::Error> {
        let alternatives: Vec<String> = self
            .patterns
            .iter()
            .flat_map(|p| p.split('\n'))
            .map(|p| {
                if self.fixed_strings {
                    regex::escape(p)
                } else if self.extended {
                    p.to_string()
                } else {
                    basic_to_extended(p)
                }
            })
            .map(|p| format!("(?:{p})"))
            .collect();
        let mut pattern = alternatives.join("|");
        if self.word_regex {
            pattern = format!(r"\b(?:{pattern})\b");
        }
        if self.line_regex {
            pattern = format!("^(?:{pattern})$");
        }
        RegexBuilder::new(&pattern)
            .case_insensitive(self.ignore_case)
            .size_limit(1 << 20)
            .build()
    }
}

/// Translate a POSIX basic regular expression into the regex crate's
/// syntax: `\(`, `\{`, `\|`, `\+`, `\?` become operators and their bare
/// forms become literals.
fn basic_to_extended(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars().peekable();
    let mut in_bracket = false;
    while let Some(c) = chars.next() {
        if in_bracket {
            out.push(c);
            if c == ']' {
                in_bracket = false;
            }
            continue;
        }
        match c {
            '\\' => match chars.next() {
                Some(op @ ('(' | ')' | '{' | '}' | '|' | '+' | '?')) => out.push(op),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push_str(r"\\"),
            },
            '(' | ')' | '{' | '}' | '|' | '+' | '?' => {
                out.push('\\');
                out.push(c);
            }
            '[' => {
                in_bracket = true;
                out.push(c);
                // a leading `]` (or `^]`) is literal
                if chars.peek() == Some(&'^') {
                    out.push('^');
                    chars.next();
                }
                if chars.peek() == Some(&']') {
                    out.push_str(r"\]");
                    chars.next();
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Per-input matching outcome.
struct Scan {
    output: String,
    count: usize,
}

fn scan(opts: &GrepOptions, regex: &Regex, name: Option<&str>, content: &str) -> Scan {
    let mut scan = Scan {
        output: String::new(),
        count: 0,
    };
    let prefix = |line_num: usize| {
        let mut p = String::new();
        if let Some(name) = name {
            p.push_str(name);
            p.push(':');
        }
        if opts.line_numbers {
            p.push_str(&format!("{line_num}:"));
        }
        p
    };
    let listing = opts.count_only || opts.files_with_matches || opts.quiet;

    for (idx, line) in content.lines().enumerate() {
        let matched = regex.is_match(line) != opts.invert_match;
        if !matched {
            continue;
        }
        scan.count += 1;
        if opts.files_with_matches || opts.quiet {
            break;
        }
        if listing {
            continue;
        }
        if opts.only_matching && !opts.invert_match {
            for m in regex.find_iter(line).filter(|m| !m.as_str().is_empty()) {
                scan.output.push_str(&prefix(idx + 1));
                scan.output.push_str(m.as_str());
                scan.output.push('\n');
            }
        } else {
            scan.output.push_str(&prefix(idx + 1));
            scan.output.push_str(line);
            scan.output.push('\n');
        }
    }
    scan
}

/// Collect regular files under `path`, sorted, for `-r`.
fn collect_files<'a>(
    ctx: &'a Context<'_>,
    path: PathBuf,
    shown: String,
    out: &'a mut Vec<(String, PathBuf)>,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        ctx.check_deadline()?;
        let mut entries = ctx.fs.read_dir(&path).await?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        for entry in entries {
            let child_shown = format!("{}/{}", shown.trim_end_matches('/'), entry.name);
            let child = path.join(&entry.name);
            if entry.metadata.file_type.is_dir() {
                collect_files(ctx, child, child_shown, out).await?;
            } else if entry.metadata.file_type.is_file() {
                out.push((child_shown, child));
            }
        }
        Ok(())
    })
}

#[async_trait]
impl Builtin for Grep {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let opts = match GrepOptions::parse(ctx.args) {
            Ok(opts) => opts,
            Err(msg) => return Ok(ExecResult::err(format!("grep: {msg}\n"), 2)),
        };
        let regex = match opts.build_regex() {
            Ok(regex) => regex,
            Err(e) => {
                return Ok(ExecResult::err(format!("grep: invalid pattern: {e}\n"), 2));
            }
        };

        let mut errors = String::new();
        let mut inputs: Vec<(String, String)> = Vec::new();
        let operands = if opts.files.is_empty() && opts.recursive {
            vec![".".to_string()]
        } else {
            opts.files.clone()
        };

        if operands.is_empty() {
            inputs.push(("(standard input)".to_string(), ctx.stdin.unwrap_or_default().to_string()));
        }
        for operand in &operands {
            let path = ctx.resolve(operand);
            let is_dir = operand != "-"
                && ctx.fs.stat(&path).await.is_ok_and(|m| m.file_type.is_dir());
            if is_dir {
                if opts.recursive {
                    let mut files = Vec::new();
                    collect_files(&ctx, path, operand.clone(), &mut files).await?;
                    for (shown, file) in files {
                        match ctx.fs.read_file(&file).await {
                            Ok(data) => {
                                ctx.counters.check_string_length(data.len(), ctx.limits)?;
                                inputs.push((shown, String::from_utf8_lossy(&data).into_owned()));
                            }
                            Err(e) => errors.push_str(&format!("grep: {}\n", e.describe(&shown))),
                        }
                    }
                } else {
                    errors.push_str(&format!("grep: {operand}: Is a directory\n"));
                }
                continue;
            }
            match ctx.read_to_string(operand).await {
                Ok(text) => {
                    let shown = if operand == "-" { "(standard input)" } else { operand };
                    inputs.push((shown.to_string(), text));
                }
                Err(Error::Fs(e)) => errors.push_str(&format!("grep: {}\n", e.describe(operand))),
                Err(e) => return Err(e),
            }
        }

        let show_names = opts
            .with_filename
            .unwrap_or(operands.len() > 1 || opts.recursive);
        let mut stdout = String::new();
        let mut any_match = false;
        for (name, content) in &inputs {
            ctx.check_deadline()?;
            let scan = scan(&opts, &regex, show_names.then_some(name.as_str()), content);
            any_match |= scan.count > 0;
            if opts.quiet && any_match {
                return Ok(ExecResult::ok(""));
            }
            if opts.files_with_matches {
                if scan.count > 0 {
                    stdout.push_str(&format!("{name}\n"));
                }
            } else if opts.count_only {
                if show_names {
                    stdout.push_str(&format!("{name}:{}\n", scan.count));
                } else {
                    stdout.push_str(&format!("{}\n", scan.count));
                }
            } else {
                stdout.push_str(&scan.output);
            }
        }

        let exit_code = if !errors.is_empty() && !(opts.quiet && any_match) {
            2
        } else if any_match {
            0
        } else {
            1
        };
        if opts.no_messages {
            errors.clear();
        }
        Ok(ExecResult {
            stdout,
            stderr: errors,
            exit_code,
            ..Default::default()
        })
    }

    fn reads_stdin(&self) -> bool {
        true
    }
}
