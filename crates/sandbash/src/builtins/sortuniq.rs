//! Sort and uniq builtins - sort lines and filter duplicates

use async_trait::async_trait;
use std::cmp::Ordering;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::ExecResult;

/// The sort builtin - sort lines of text.
///
/// Usage: sort [-fnrusc] [-t DELIM] [-k FIELD[,FIELD]] [-o FILE] [FILE...]
///
/// Options:
///   -f   Fold lower case to upper case characters (case insensitive)
///   -n   Compare according to string numerical value
///   -r   Reverse the result of comparisons
///   -u   Output only the first of equal lines
///   -t   Field delimiter character
///   -k   Sort key definition (e.g., -k2 or -k2,3)
///   -s   Stable sort (no last-resort whole-line comparison)
///   -c   Check if input is sorted; exit 1 if not
///   -o   Write output to FILE
pub struct Sort;

#[derive(Default)]
struct SortOptions {
    fold_case: bool,
    numeric: bool,
    reverse: bool,
    unique: bool,
    stable: bool,
    check: bool,
    delimiter: Option<char>,
    key: Option<(usize, Option<usize>)>,
    output: Option<String>,
    files: Vec<String>,
}

impl SortOptions {
    fn parse(args: &[String]) -> std::result::Result<Self, String> {
        let mut opts = Self::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == "-" || !arg.starts_with('-') {
                opts.files.push(arg.clone());
                continue;
            }
            let flags: Vec<char> = arg[1..].chars().collect();
            for (pos, &c) in flags.iter().enumerate() {
                match c {
                    'f' => opts.fold_case = true,
                    'n' => opts.numeric = true,
                    'r' => opts.reverse = true,
                    'u' => opts.unique = true,
                    's' => opts.stable = true,
                    'c' => opts.check = true,
                    'b' => {}
                    't' | 'k' | 'o' => {
                        let inline: String = flags[pos + 1..].iter().collect();
                        let value = if inline.is_empty() {
                            iter.next()
                                .cloned()
                                .ok_or_else(|| format!("option requires an argument -- '{c}'"))?
                        } else {
                            inline
                        };
                        match c {
                            't' => {
                                let mut chars = value.chars();
                                match (chars.next(), chars.next()) {
                                    (Some(d), None) => opts.delimiter = Some(d),
                                    _ => return Err("multi-character tab".to_string()),
                                }
                            }
                            'k' => opts.key = Some(parse_key(&value)?),
                            _ => opts.output = Some(value),
                        }
                        break;
                    }
                    other => return Err(format!("invalid option -- '{other}'")),
                }
            }
        }
        Ok(opts)
    }

    fn key<'l>(&self, line: &'l str) -> &'l str {
        let Some((start, end)) = self.key else {
            return line;
        };
        let fields = field_spans(line, self.delimiter);
        let Some(&(from, _)) = fields.get(start - 1) else {
            return "";
        };
        let to = match end {
            Some(end) => fields
                .get(end.max(start) - 1)
                .or(fields.last())
                .map_or(line.len(), |&(_, e)| e),
            None => line.len(),
        };
        &line[from..to]
    }

    fn compare(&self, a: &str, b: &str) -> Ordering {
        let (ka, kb) = (self.key(a), self.key(b));
        let ord = if self.numeric {
            leading_number(ka)
                .partial_cmp(&leading_number(kb))
                .unwrap_or(Ordering::Equal)
        } else if self.fold_case {
            ka.to_uppercase().cmp(&kb.to_uppercase())
        } else {
            ka.cmp(kb)
        };
        if self.reverse { ord.reverse() } else { ord }
    }

    fn compare_full(&self, a: &str, b: &str) -> Ordering {
        let ord = self.compare(a, b);
        if ord != Ordering::Equal || self.stable || self.unique {
            return ord;
        }
        let tie = a.cmp(b);
        if self.reverse { tie.reverse() } else { tie }
    }
}

fn parse_key(spec: &str) -> std::result::Result<(usize, Option<usize>), String> {
    let field = |s: &str| -> std::result::Result<usize, String> {
        // character offsets and modifiers (`2.3n`) are accepted but only the
        // field number is used
        let digits: String = s.chars().take_while(char::is_ascii_digit).collect();
        match digits.parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(format!("invalid number at field start: invalid count at start of '{spec}'")),
        }
    };
    match spec.split_once(',') {
        Some((start, end)) => Ok((field(start)?, Some(field(end)?))),
        None => Ok((field(spec)?, None)),
    }
}

/// Byte spans of each field. Blank-separated fields keep their leading
/// blanks, as POSIX sort does.
fn field_spans(line: &str, delimiter: Option<char>) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    match delimiter {
        Some(d) => {
            let mut start = 0;
            for (i, c) in line.char_indices() {
                if c == d {
                    spans.push((start, i));
                    start = i + c.len_utf8();
                }
            }
            spans.push((start, line.len()));
        }
        None => {
            let bytes = line.as_bytes();
            let mut i = 0;
            while i < bytes.len() {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                spans.push((start, i));
            }
        }
    }
    spans
}

fn leading_number(s: &str) -> f64 {
    let s = s.trim_start();
    let end = s
        .char_indices()
        .take_while(|&(i, c)| c.is_ascii_digit() || c == '.' || (i == 0 && c == '-'))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    s[..end].parse().unwrap_or(0.0)
}

#[async_trait]
impl Builtin for Sort {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let opts = match SortOptions::parse(ctx.args) {
            Ok(opts) => opts,
            Err(msg) => return Ok(ExecResult::err(format!("sort: {msg}\n"), 2)),
        };
        let (text, errors) = ctx.read_inputs("sort", &opts.files).await?;
        if !errors.is_empty() {
            return Ok(ExecResult::err(errors, 2));
        }
        let mut lines: Vec<&str> = text.lines().collect();

        if opts.check {
            for (i, pair) in lines.windows(2).enumerate() {
                let ord = opts.compare_full(pair[0], pair[1]);
                if ord == Ordering::Greater || (opts.unique && ord == Ordering::Equal) {
                    return Ok(ExecResult::err(
                        format!("sort: -:{}: disorder: {}\n", i + 2, pair[1]),
                        1,
                    ));
                }
            }
            return Ok(ExecResult::ok(""));
        }

        ctx.check_deadline()?;
        lines.sort_by(|a, b| opts.compare_full(a, b));
        if opts.unique {
            lines.dedup_by(|a, b| opts.compare(*a, *b) == Ordering::Equal);
        }

        let mut output = lines.join("\n");
        if !lines.is_empty() {
            output.push('\n');
        }

        if let Some(target) = &opts.output {
            let path = ctx.resolve(target);
            if let Err(e) = ctx.fs.write_file(&path, output.as_bytes()).await {
                return Ok(ExecResult::err(format!("sort: {}\n", e.describe(target)), 2));
            }
            return Ok(ExecResult::ok(""));
        }
        Ok(ExecResult::ok(output))
    }

    fn reads_stdin(&self) -> bool {
        true
    }
}

/// The uniq builtin - report or filter out repeated adjacent lines.
///
/// Usage: uniq [-c] [-d] [-u] [-i] [INPUT]
///
/// Options:
///   -c   Prefix lines by the number of occurrences
///   -d   Only print duplicate lines
///   -u   Only print unique lines
///   -i   Ignore case when comparing
pub struct Uniq;

#[async_trait]
impl Builtin for Uniq {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut count = false;
        let mut repeated = false;
        let mut unique = false;
        let mut ignore_case = false;
        let mut files = Vec::new();
        for arg in ctx.args {
            match arg.strip_prefix('-') {
                Some(flags) if !flags.is_empty() => {
                    for c in flags.chars() {
                        match c {
                            'c' => count = true,
                            'd' => repeated = true,
                            'u' => unique = true,
                            'i' => ignore_case = true,
                            other => {
                                return Ok(ExecResult::err(
                                    format!("uniq: invalid option -- '{other}'\n"),
                                    1,
                                ));
                            }
                        }
                    }
                }
                _ => files.push(arg.clone()),
            }
        }
        // uniq takes a single input; a second operand would be the output file
        files.truncate(1);

        let (text, errors) = ctx.read_inputs("uniq", &files).await?;
        if !errors.is_empty() {
            return Ok(ExecResult::err(errors, 1));
        }

        let same = |a: &str, b: &str| {
            if ignore_case {
                a.eq_ignore_ascii_case(b)
            } else {
                a == b
            }
        };
        let mut groups: Vec<(&str, usize)> = Vec::new();
        for line in text.lines() {
            match groups.last_mut() {
                Some((prev, n)) if same(prev, line) => *n += 1,
                _ => groups.push((line, 1)),
            }
        }

        let mut output = String::new();
        for (line, n) in groups {
            if (repeated && n < 2) || (unique && n > 1) {
                continue;
            }
            if count {
                output.push_str(&format!("{n:>7} {line}\n"));
            } else {
                output.push_str(line);
                output.push('\n');
            }
        }
        Ok(ExecResult::ok(output))
    }

    fn reads_stdin(&self) -> bool {
        true
    }
}
