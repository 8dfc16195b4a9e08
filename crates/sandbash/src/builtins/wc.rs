//! Word count builtin - count lines, words, bytes, and characters

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::error::{Error, Result};
use crate::interpreter::ExecResult;

/// The wc builtin - print newline, word, and byte counts.
///
/// Usage: wc [-lwcmL] [FILE...]
///
/// With no options, prints lines, words, and bytes. A single count read
/// from stdin is printed bare, the way scripts expect from `$(wc -l)`.
pub struct Wc;

/// Which columns to print, in output order.
#[derive(Default)]
struct Columns {
    lines: bool,
    words: bool,
    chars: bool,
    bytes: bool,
    max_line_length: bool,
}

impl Columns {
    fn enable(&mut self, flag: char) -> bool {
        match flag {
            'l' => self.lines = true,
            'w' => self.words = true,
            'm' => self.chars = true,
            'c' => self.bytes = true,
            'L' => self.max_line_length = true,
            _ => return false,
        }
        true
    }

    fn pick(&self, counts: &Counts) -> Vec<usize> {
        [
            (self.lines, counts.lines),
            (self.words, counts.words),
            (self.chars, counts.chars),
            (self.bytes, counts.bytes),
            (self.max_line_length, counts.max_line_length),
        ]
        .into_iter()
        .filter_map(|(on, n)| on.then_some(n))
        .collect()
    }
}

#[derive(Default)]
struct Counts {
    lines: usize,
    words: usize,
    chars: usize,
    bytes: usize,
    max_line_length: usize,
}

impl Counts {
    fn of(text: &str) -> Self {
        Self {
            lines: text.bytes().filter(|&b| b == b'\n').count(),
            words: text.split_whitespace().count(),
            chars: text.chars().count(),
            bytes: text.len(),
            max_line_length: text.lines().map(|l| l.chars().count()).max().unwrap_or(0),
        }
    }

    fn add(&mut self, other: &Self) {
        self.lines += other.lines;
        self.words += other.words;
        self.chars += other.chars;
        self.bytes += other.bytes;
        self.max_line_length = self.max_line_length.max(other.max_line_length);
    }
}

#[async_trait]
impl Builtin for Wc {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut columns = Columns::default();
        let mut files = Vec::new();
        for arg in ctx.args {
            let known = match arg.as_str() {
                "--lines" => columns.enable('l'),
                "--words" => columns.enable('w'),
                "--chars" => columns.enable('m'),
                "--bytes" => columns.enable('c'),
                "--max-line-length" => columns.enable('L'),
                "-" => {
                    files.push(arg.clone());
                    true
                }
                a if a.starts_with('-') => a[1..].chars().all(|c| columns.enable(c)),
                _ => {
                    files.push(arg.clone());
                    true
                }
            };
            if !known {
                return Ok(ExecResult::err(format!("wc: unrecognized option '{arg}'\n"), 1));
            }
        }
        let explicit = columns.pick(&Counts::default()).len();
        if explicit == 0 {
            columns.lines = true;
            columns.words = true;
            columns.bytes = true;
        }

        if files.is_empty() {
            let values = columns.pick(&Counts::of(ctx.stdin.unwrap_or_default()));
            let line = if values.len() == 1 {
                values[0].to_string()
            } else {
                values.iter().map(|n| format!("{n:>7}")).collect::<Vec<_>>().join(" ")
            };
            return Ok(ExecResult::ok(format!("{line}\n")));
        }

        let mut result = ExecResult::default();
        let mut total = Counts::default();
        for file in &files {
            match ctx.read_to_string(file).await {
                Ok(text) => {
                    let counts = Counts::of(&text);
                    result.stdout.push_str(&row(&columns.pick(&counts), file));
                    total.add(&counts);
                }
                Err(Error::Fs(e)) => {
                    result
                        .stderr
                        .push_str(&format!("wc: {}\n", e.describe(file)));
                    result.exit_code = 1;
                }
                Err(e) => return Err(e),
            }
        }
        if files.len() > 1 {
            result.stdout.push_str(&row(&columns.pick(&total), "total"));
        }
        Ok(result)
    }

    fn reads_stdin(&self) -> bool {
        true
    }
}

fn row(values: &[usize], name: &str) -> String {
    let mut line: String = values.iter().map(|n| format!("{n:>7} ")).collect();
    line.push_str(name);
    line.push('\n');
    line
}
