//! printf builtin - formatted output
//!
//! `printf -v NAME` assigns to a shell variable, so the interpreter handles
//! that form itself through [`render`].

use async_trait::async_trait;

use super::echo::expand_escapes;
use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::ExecResult;

/// printf builtin - formatted string output
pub struct Printf;

#[async_trait]
impl Builtin for Printf {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let args = match ctx.args.first().map(String::as_str) {
            Some("--") => &ctx.args[1..],
            Some("-v") => {
                return Ok(ExecResult::err("printf: -v: cannot assign here\n", 2));
            }
            _ => ctx.args,
        };
        let Some((format, rest)) = args.split_first() else {
            return Ok(ExecResult::err("printf: usage: printf format [arguments]\n", 2));
        };
        let rendered = render(format, rest);
        ctx.counters
            .check_string_length(rendered.output.len(), ctx.limits)?;
        Ok(ExecResult {
            stdout: rendered.output,
            exit_code: i32::from(!rendered.errors.is_empty()),
            stderr: rendered.errors,
            ..Default::default()
        })
    }
}

/// Result of formatting: text plus `printf: ...` diagnostics for bad
/// numeric arguments.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Rendered {
    pub output: String,
    pub errors: String,
}

/// Format `args` with `format`, reusing the format until every argument is
/// consumed.
pub(crate) fn render(format: &str, args: &[String]) -> Rendered {
    let mut rendered = Rendered::default();
    let mut index = 0;
    loop {
        let start = index;
        let stop = format_once(format, args, &mut index, &mut rendered);
        if stop || index == start || index >= args.len() {
            break;
        }
    }
    rendered
}

/// Flags, width and precision of one conversion.
#[derive(Debug, Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alternate: bool,
    width: usize,
    precision: Option<usize>,
}

impl Spec {
    fn pad(&self, body: String, numeric: bool) -> String {
        let len = body.chars().count();
        if len >= self.width {
            return body;
        }
        let fill = self.width - len;
        if self.left {
            format!("{body}{}", " ".repeat(fill))
        } else if self.zero && numeric && self.precision.is_none() {
            let sign_len = usize::from(body.starts_with(['-', '+', ' ']));
            let (sign, digits) = body.split_at(sign_len);
            format!("{sign}{}{digits}", "0".repeat(fill))
        } else {
            format!("{}{body}", " ".repeat(fill))
        }
    }

    fn signed(&self, n: i64) -> String {
        let mut digits = n.unsigned_abs().to_string();
        if let Some(p) = self.precision
            && digits.len() < p
        {
            digits = format!("{}{digits}", "0".repeat(p - digits.len()));
        }
        let sign = if n < 0 {
            "-"
        } else if self.plus {
            "+"
        } else if self.space {
            " "
        } else {
            ""
        };
        self.pad(format!("{sign}{digits}"), true)
    }

    fn float(&self, conv: char, n: f64) -> String {
        let precision = self.precision.unwrap_or(6);
        let body = match conv {
            'e' | 'E' => exponent(n, precision, conv == 'E'),
            'g' | 'G' => general(n, precision.max(1), conv == 'G'),
            _ => format!("{n:.precision$}"),
        };
        let body = if !body.starts_with('-') && self.plus {
            format!("+{body}")
        } else {
            body
        };
        self.pad(body, true)
    }
}

fn exponent(n: f64, precision: usize, upper: bool) -> String {
    // Rust prints `1.5e2`; C wants `1.500000e+02`
    let raw = format!("{n:.precision$e}");
    let (mantissa, exp) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    let out = format!("{mantissa}e{sign}{:02}", exp.abs());
    if upper { out.to_uppercase() } else { out }
}

fn general(n: f64, precision: usize, upper: bool) -> String {
    if n == 0.0 {
        return "0".to_string();
    }
    let exp = n.abs().log10().floor() as i32;
    if exp < -4 || exp >= precision as i32 {
        let raw = exponent(n, precision - 1, upper);
        let (mantissa, rest) = raw.split_at(raw.find(['e', 'E']).unwrap_or(raw.len()));
        let mantissa = if mantissa.contains('.') {
            mantissa.trim_end_matches('0').trim_end_matches('.')
        } else {
            mantissa
        };
        format!("{mantissa}{rest}")
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        let raw = format!("{n:.decimals$}");
        if raw.contains('.') {
            raw.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            raw
        }
    }
}

/// Parse a numeric argument the way the shell does: decimal, `0x` hex,
/// leading-zero octal, or `'c` for a character code.
fn integer_arg(arg: &str, errors: &mut String) -> i64 {
    let trimmed = arg.trim();
    if trimmed.is_empty() {
        return 0;
    }
    if let Some(c) = trimmed.strip_prefix(['\'', '"']) {
        return c.chars().next().map_or(0, |c| i64::from(u32::from(c)));
    }
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let parsed = if let Some(hex) = digits.strip_prefix("0x").or(digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8)
    } else {
        digits.parse()
    };
    match parsed {
        Ok(n) if negative => -n,
        Ok(n) => n,
        Err(_) => {
            errors.push_str(&format!("printf: {arg}: invalid number\n"));
            0
        }
    }
}

fn float_arg(arg: &str, errors: &mut String) -> f64 {
    let trimmed = arg.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if trimmed.starts_with(['\'', '"']) {
        return integer_arg(trimmed, errors) as f64;
    }
    trimmed.parse().unwrap_or_else(|_| {
        errors.push_str(&format!("printf: {arg}: invalid number\n"));
        0.0
    })
}

/// Quote a string for reuse as shell input (`%q`).
fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    let safe = |c: char| c.is_ascii_alphanumeric() || "_/.:-=+@,%^".contains(c);
    if s.chars().all(safe) {
        return s.to_string();
    }
    if s.chars().any(|c| c.is_ascii_control()) {
        let mut out = String::from("$'");
        for c in s.chars() {
            match c {
                '\'' => out.push_str("\\'"),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                '\r' => out.push_str("\\r"),
                c if c.is_ascii_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
                c => out.push(c),
            }
        }
        out.push('\'');
        return out;
    }
    s.chars()
        .flat_map(|c| {
            let escape = (!safe(c)).then_some('\\');
            escape.into_iter().chain(std::iter::once(c))
        })
        .collect()
}

fn next_arg<'a>(args: &'a [String], index: &mut usize) -> &'a str {
    let arg = args.get(*index).map_or("", String::as_str);
    *index += 1;
    arg
}

/// One pass over the format. Returns true when `\c` (via `%b` or the
/// format itself) ended all output.
fn format_once(format: &str, args: &[String], index: &mut usize, out: &mut Rendered) -> bool {
    let mut literal = String::new();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            literal.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            literal.push('%');
            continue;
        }

        let (text, stop) = expand_escapes(&std::mem::take(&mut literal));
        out.output.push_str(&text);
        if stop {
            return true;
        }

        let mut spec = Spec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '#' => spec.alternate = true,
                _ => break,
            }
            chars.next();
        }
        if chars.peek() == Some(&'*') {
            chars.next();
            let w = integer_arg(next_arg(args, index), &mut out.errors);
            spec.left |= w < 0;
            spec.width = w.unsigned_abs() as usize;
        } else {
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                spec.width = spec.width * 10 + d as usize;
                chars.next();
            }
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            if chars.peek() == Some(&'*') {
                chars.next();
                spec.precision = Some(integer_arg(next_arg(args, index), &mut out.errors).max(0) as usize);
            } else {
                let mut p = 0;
                while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                    p = p * 10 + d as usize;
                    chars.next();
                }
                spec.precision = Some(p);
            }
        }
        // length modifiers are accepted and ignored
        while chars.peek().is_some_and(|c| matches!(c, 'h' | 'l' | 'L' | 'j' | 'z' | 't')) {
            chars.next();
        }

        let Some(conv) = chars.next() else {
            out.output.push('%');
            break;
        };
        let piece = match conv {
            's' => {
                let arg = next_arg(args, index);
                let arg = match spec.precision {
                    Some(p) => arg.chars().take(p).collect(),
                    None => arg.to_string(),
                };
                spec.pad(arg, false)
            }
            'b' => {
                let (text, stop) = expand_escapes(next_arg(args, index));
                out.output.push_str(&spec.pad(text, false));
                if stop {
                    return true;
                }
                continue;
            }
            'q' => spec.pad(shell_quote(next_arg(args, index)), false),
            'c' => spec.pad(next_arg(args, index).chars().take(1).collect(), false),
            'd' | 'i' => spec.signed(integer_arg(next_arg(args, index), &mut out.errors)),
            'u' | 'o' | 'x' | 'X' => {
                let n = integer_arg(next_arg(args, index), &mut out.errors) as u64;
                let body = match conv {
                    'o' if spec.alternate && n != 0 => format!("0{n:o}"),
                    'o' => format!("{n:o}"),
                    'x' if spec.alternate && n != 0 => format!("0x{n:x}"),
                    'x' => format!("{n:x}"),
                    'X' if spec.alternate && n != 0 => format!("0X{n:X}"),
                    'X' => format!("{n:X}"),
                    _ => n.to_string(),
                };
                spec.pad(body, true)
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                spec.float(conv, float_arg(next_arg(args, index), &mut out.errors))
            }
            other => {
                out.errors
                    .push_str(&format!("printf: %{other}: invalid format character\n"));
                return true;
            }
        };
        out.output.push_str(&piece);
    }
    let (text, stop) = expand_escapes(&literal);
    out.output.push_str(&text);
    stop
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fmt(format: &str, args: &[&str]) -> String {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        render(format, &args).output
    }

    #[test]
    fn test_strings_and_width() {
        assert_eq!(fmt("%s\n", &["hi"]), "hi\n");
        assert_eq!(fmt("[%5s]", &["ab"]), "[   ab]");
        assert_eq!(fmt("[%-5s]", &["ab"]), "[ab   ]");
        assert_eq!(fmt("[%.2s]", &["abcdef"]), "[ab]");
        assert_eq!(fmt("[%*s]", &["4", "x"]), "[   x]");
        assert_eq!(fmt("%c", &["xyz"]), "x");
    }

    #[test]
    fn test_integers() {
        assert_eq!(fmt("%05d", &["42"]), "00042");
        assert_eq!(fmt("%05d", &["-42"]), "-0042");
        assert_eq!(fmt("%+d %d", &["5", "-5"]), "+5 -5");
        assert_eq!(fmt("%x %X %o", &["255", "255", "8"]), "ff FF 10");
        assert_eq!(fmt("%#x", &["255"]), "0xff");
        assert_eq!(fmt("%d", &["0x10"]), "16");
        assert_eq!(fmt("%d", &["'A"]), "65");
        assert_eq!(fmt("%.3d", &["7"]), "007");
    }

    #[test]
    fn test_floats() {
        assert_eq!(fmt("%.2f", &["3.14159"]), "3.14");
        assert_eq!(fmt("%f", &["1"]), "1.000000");
        assert_eq!(fmt("%8.3f", &["2.5"]), "   2.500");
        assert_eq!(fmt("%e", &["1500"]), "1.500000e+03");
        assert_eq!(fmt("%g", &["0.5"]), "0.5");
        assert_eq!(fmt("%g", &["1500000"]), "1.5e+06");
        assert_eq!(fmt("%g", &["2.50"]), "2.5");
    }

    #[test]
    fn test_format_reuse_and_missing_args() {
        assert_eq!(fmt("%s=%s\n", &["a", "1", "b", "2"]), "a=1\nb=2\n");
        assert_eq!(fmt("%s-%s|", &["x"]), "x-|");
        assert_eq!(fmt("%d\n", &[]), "0\n");
        assert_eq!(fmt("no args\n", &["ignored"]), "no args\n");
    }

    #[test]
    fn test_escapes() {
        assert_eq!(fmt("a\\tb\\n", &[]), "a\tb\n");
        assert_eq!(fmt("%b", &["x\\ny"]), "x\ny");
        assert_eq!(fmt("%s", &["x\\ny"]), "x\\ny");
        assert_eq!(fmt("%b%s", &["stop\\cnever", "x"]), "stop");
        assert_eq!(fmt("100%%\n", &[]), "100%\n");
        assert_eq!(fmt("\\u00e9", &[]), "é");
    }

    #[test]
    fn test_quote() {
        assert_eq!(fmt("%q", &["safe-word"]), "safe-word");
        assert_eq!(fmt("%q", &["a b"]), "a\\ b");
        assert_eq!(fmt("%q", &["a\nb"]), "$'a\\nb'");
        assert_eq!(fmt("%q", &[""]), "''");
    }

    #[test]
    fn test_invalid_number_reports() {
        let args = vec!["abc".to_string()];
        let rendered = render("%d\n", &args);
        assert_eq!(rendered.output, "0\n");
        assert_eq!(rendered.errors, "printf: abc: invalid number\n");
    }
}
