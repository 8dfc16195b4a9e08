//! Cut and tr builtins - extract fields and translate characters

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::ExecResult;

/// A 1-indexed inclusive range from a cut list like `1,3-5,7-`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Range {
    start: usize,
    end: usize,
}

fn parse_list(spec: &str) -> std::result::Result<Vec<Range>, String> {
    let mut ranges = Vec::new();
    for part in spec.split(',') {
        let bound = |s: &str, default: usize| -> std::result::Result<usize, String> {
            if s.is_empty() {
                return Ok(default);
            }
            match s.parse::<usize>() {
                Ok(0) => Err("fields and positions are numbered from 1".to_string()),
                Ok(n) => Ok(n),
                Err(_) => Err(format!("invalid field value '{s}'")),
            }
        };
        let range = match part.split_once('-') {
            Some((a, b)) => Range {
                start: bound(a, 1)?,
                end: bound(b, usize::MAX)?,
            },
            None => {
                let n = bound(part, 0)?;
                if n == 0 {
                    return Err(format!("invalid field value '{part}'"));
                }
                Range { start: n, end: n }
            }
        };
        if range.start > range.end {
            return Err("invalid decreasing range".to_string());
        }
        ranges.push(range);
    }
    Ok(ranges)
}

fn selected(ranges: &[Range], index: usize) -> bool {
    ranges.iter().any(|r| r.start <= index && index <= r.end)
}

enum CutMode {
    Fields(Vec<Range>),
    Chars(Vec<Range>),
}

/// The cut builtin - remove sections from each line.
///
/// Usage: cut -f LIST [-d DELIM] [-s] [FILE...] | cut -c LIST [FILE...]
pub struct Cut;

#[async_trait]
impl Builtin for Cut {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut delimiter = '\t';
        let mut only_delimited = false;
        let mut mode = None;
        let mut files = Vec::new();

        let mut iter = ctx.args.iter();
        while let Some(arg) = iter.next() {
            let (flag, inline) = match arg.as_str() {
                "-s" => {
                    only_delimited = true;
                    continue;
                }
                "-d" | "-f" | "-c" | "-b" => (arg.as_str(), None),
                a if a.len() > 2 && ["-d", "-f", "-c", "-b"].contains(&&a[..2]) => {
                    (&a[..2], Some(&a[2..]))
                }
                a if a.starts_with('-') && a != "-" => {
                    return Ok(ExecResult::err(
                        format!("cut: invalid option -- '{}'\n", &a[1..]),
                        1,
                    ));
                }
                _ => {
                    files.push(arg.clone());
                    continue;
                }
            };
            let Some(value) = inline.or_else(|| iter.next().map(String::as_str)) else {
                return Ok(ExecResult::err(
                    format!("cut: option requires an argument -- '{}'\n", &flag[1..]),
                    1,
                ));
            };
            if flag == "-d" {
                let mut chars = value.chars();
                match (chars.next(), chars.next()) {
                    (Some(d), None) => delimiter = d,
                    _ => {
                        return Ok(ExecResult::err(
                            "cut: the delimiter must be a single character\n",
                            1,
                        ));
                    }
                }
                continue;
            }
            let ranges = match parse_list(value) {
                Ok(ranges) => ranges,
                Err(msg) => return Ok(ExecResult::err(format!("cut: {msg}\n"), 1)),
            };
            mode = Some(if flag == "-f" {
                CutMode::Fields(ranges)
            } else {
                CutMode::Chars(ranges)
            });
        }

        let Some(mode) = mode else {
            return Ok(ExecResult::err(
                "cut: you must specify a list of bytes, characters, or fields\n",
                1,
            ));
        };

        let (text, errors) = ctx.read_inputs("cut", &files).await?;
        let mut output = String::new();
        for line in text.lines() {
            match &mode {
                CutMode::Chars(ranges) => {
                    output.extend(
                        line.chars()
                            .enumerate()
                            .filter(|(i, _)| selected(ranges, i + 1))
                            .map(|(_, c)| c),
                    );
                }
                CutMode::Fields(ranges) => {
                    if !line.contains(delimiter) {
                        if only_delimited {
                            continue;
                        }
                        output.push_str(line);
                    } else {
                        let picked: Vec<&str> = line
                            .split(delimiter)
                            .enumerate()
                            .filter(|(i, _)| selected(ranges, i + 1))
                            .map(|(_, f)| f)
                            .collect();
                        output.push_str(&picked.join(&delimiter.to_string()));
                    }
                }
            }
            output.push('\n');
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

/// The tr builtin - translate, squeeze or delete characters.
///
/// Usage: tr [-c] [-d] [-s] SET1 [SET2]
///
/// Sets accept ranges (`a-z`), classes (`[:upper:]`) and the escapes
/// `\n`, `\t`, `\r`, `\\`.
pub struct Tr;

#[async_trait]
impl Builtin for Tr {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut delete = false;
        let mut squeeze = false;
        let mut complement = false;
        let mut sets = Vec::new();
        for arg in ctx.args {
            match arg.strip_prefix('-') {
                Some(flags) if !flags.is_empty() && sets.is_empty() => {
                    for c in flags.chars() {
                        match c {
                            'd' => delete = true,
                            's' => squeeze = true,
                            'c' | 'C' => complement = true,
                            other => {
                                return Ok(ExecResult::err(
                                    format!("tr: invalid option -- '{other}'\n"),
                                    1,
                                ));
                            }
                        }
                    }
                }
                _ => sets.push(expand_set(arg)),
            }
        }

        // -d or -s alone take one set; translating or -ds take two
        let needed = if delete == squeeze { 2 } else { 1 };
        if sets.len() < needed {
            return Ok(ExecResult::err("tr: missing operand\n", 1));
        }

        let set1 = &sets[0];
        let in_set1 = |c: char| set1.contains(&c) != complement;
        let input = ctx.stdin.unwrap_or_default();
        let mut output = String::with_capacity(input.len());

        if delete {
            let squeeze_set = sets.get(1);
            let mut last: Option<char> = None;
            for c in input.chars().filter(|&c| !in_set1(c)) {
                if squeeze_set.is_some_and(|s| s.contains(&c)) && last == Some(c) {
                    continue;
                }
                output.push(c);
                last = Some(c);
            }
            return Ok(ExecResult::ok(output));
        }

        let translate = sets.get(1).filter(|s| !s.is_empty());
        let mut last: Option<char> = None;
        for c in input.chars() {
            let mapped = match translate {
                Some(set2) if in_set1(c) => {
                    let idx = if complement {
                        set2.len() - 1
                    } else {
                        set1.iter().rposition(|&x| x == c).unwrap_or(0)
                    };
                    set2.get(idx).or(set2.last()).copied().unwrap_or(c)
                }
                _ => c,
            };
            if squeeze {
                let squeeze_set = translate.unwrap_or(set1);
                let squeezable = if translate.is_some() {
                    squeeze_set.contains(&mapped)
                } else {
                    in_set1(mapped)
                };
                if squeezable && last == Some(mapped) {
                    continue;
                }
            }
            output.push(mapped);
            last = Some(mapped);
        }
        Ok(ExecResult::ok(output))
    }

    fn reads_stdin(&self) -> bool {
        true
    }
}

/// Expand a tr set into its characters.
fn expand_set(spec: &str) -> Vec<char> {
    let mut chars: Vec<char> = Vec::new();
    let mut raw = spec.chars().peekable();
    let mut pending: Vec<char> = Vec::new();
    while let Some(c) = raw.next() {
        match c {
            '\\' => pending.push(match raw.next() {
                Some('n') => '\n',
                Some('t') => '\t',
                Some('r') => '\r',
                Some(other) => other,
                None => '\\',
            }),
            '[' if raw.peek() == Some(&':') => {
                let rest: String = raw.clone().collect();
                if let Some(end) = rest.find(":]") {
                    let class = &rest[1..end];
                    pending.extend(class_chars(class));
                    for _ in 0..end + 2 {
                        raw.next();
                    }
                } else {
                    pending.push('[');
                }
            }
            _ => pending.push(c),
        }
    }

    // ranges are resolved after escapes so `\n-\r` works
    let mut i = 0;
    while i < pending.len() {
        if i + 2 < pending.len() && pending[i + 1] == '-' && pending[i] <= pending[i + 2] {
            chars.extend(pending[i]..=pending[i + 2]);
            i += 3;
        } else {
            chars.push(pending[i]);
            i += 1;
        }
    }
    chars
}

fn class_chars(class: &str) -> Vec<char> {
    match class {
        "lower" => ('a'..='z').collect(),
        "upper" => ('A'..='Z').collect(),
        "alpha" => ('A'..='Z').chain('a'..='z').collect(),
        "digit" => ('0'..='9').collect(),
        "alnum" => ('0'..='9').chain('A'..='Z').chain('a'..='z').collect(),
        "space" => vec![' ', '\t', '\n', '\r', '\x0b', '\x0c'],
        "blank" => vec![' ', '\t'],
        "punct" => (33u8..=126)
            .map(char::from)
            .filter(char::is_ascii_punctuation)
            .collect(),
        "xdigit" => ('0'..='9').chain('A'..='F').chain('a'..='f').collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use std::sync::Arc;

    async fn run<B: Builtin>(builtin: &B, args: &[&str], stdin: &str) -> ExecResult {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let ctx = Context::new_for_test(&args, Arc::new(InMemoryFs::new()), Some(stdin));
        builtin.execute(ctx).await.unwrap()
    }

    #[tokio::test]
    async fn test_cut_fields() {
        assert_eq!(run(&Cut, &["-d", ",", "-f", "2"], "a,b,c\n").await.stdout, "b\n");
        assert_eq!(run(&Cut, &["-d,", "-f1,3"], "a,b,c\n").await.stdout, "a,c\n");
        assert_eq!(run(&Cut, &["-d:", "-f2-"], "a:b:c\n").await.stdout, "b:c\n");
        assert_eq!(run(&Cut, &["-f2"], "x\ty\n").await.stdout, "y\n");
        assert_eq!(run(&Cut, &["-d,", "-f2"], "nodelim\n").await.stdout, "nodelim\n");
        assert_eq!(run(&Cut, &["-s", "-d,", "-f2"], "nodelim\n").await.stdout, "");
    }

    #[tokio::test]
    async fn test_cut_chars_and_errors() {
        assert_eq!(run(&Cut, &["-c", "1-3"], "abcdef\n").await.stdout, "abc\n");
        assert_eq!(run(&Cut, &["-c", "-2,5"], "abcdef\n").await.stdout, "abe\n");
        assert_eq!(run(&Cut, &[], "x").await.exit_code, 1);
        assert_eq!(run(&Cut, &["-f", "0"], "x").await.exit_code, 1);
        assert_eq!(run(&Cut, &["-f", "3-1"], "x").await.exit_code, 1);
    }

    #[tokio::test]
    async fn test_tr_translate() {
        assert_eq!(run(&Tr, &["a-z", "A-Z"], "hello\n").await.stdout, "HELLO\n");
        assert_eq!(
            run(&Tr, &["[:lower:]", "[:upper:]"], "abc").await.stdout,
            "ABC"
        );
        assert_eq!(run(&Tr, &["abc", "x"], "aabbcc").await.stdout, "xxxxxx");
        assert_eq!(run(&Tr, &["\\n", " "], "a\nb\n").await.stdout, "a b ");
    }

    #[tokio::test]
    async fn test_tr_delete_squeeze_complement() {
        assert_eq!(run(&Tr, &["-d", "aeiou"], "education").await.stdout, "dctn");
        assert_eq!(run(&Tr, &["-s", " "], "a   b  c").await.stdout, "a b c");
        assert_eq!(run(&Tr, &["-cd", "0-9"], "a1b2c3\n").await.stdout, "123");
        assert_eq!(run(&Tr, &["-d"], "x").await.exit_code, 1);
    }

    #[test]
    fn test_expand_set() {
        assert_eq!(expand_set("a-e"), vec!['a', 'b', 'c', 'd', 'e']);
        assert_eq!(expand_set("[:digit:]").len(), 10);
        assert_eq!(expand_set("a-"), vec!['a', '-']);
    }
}
