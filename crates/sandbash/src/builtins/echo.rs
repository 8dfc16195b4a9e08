//! echo builtin command

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::ExecResult;

/// The echo builtin command.
///
/// Leading `-n`, `-e` and `-E` (also combined, as in `-ne`) are options;
/// anything else starts the operands.
pub struct Echo;

#[async_trait]
impl Builtin for Echo {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut newline = true;
        let mut escapes = false;
        let mut operands = ctx.args;

        while let Some((first, rest)) = operands.split_first() {
            let Some(flags) = first.strip_prefix('-') else {
                break;
            };
            if flags.is_empty() || !flags.chars().all(|c| matches!(c, 'n' | 'e' | 'E')) {
                break;
            }
            for flag in flags.chars() {
                match flag {
                    'n' => newline = false,
                    'e' => escapes = true,
                    _ => escapes = false,
                }
            }
            operands = rest;
        }

        let mut output = String::new();
        for (i, arg) in operands.iter().enumerate() {
            if i > 0 {
                output.push(' ');
            }
            if escapes {
                let (text, stop) = expand_escapes(arg);
                output.push_str(&text);
                if stop {
                    return Ok(ExecResult::ok(output));
                }
            } else {
                output.push_str(arg);
            }
        }

        if newline {
            output.push('\n');
        }
        Ok(ExecResult::ok(output))
    }
}

/// Interpret `echo -e` escapes. The flag is set when `\c` cut the output.
///
/// Also used by `printf` for its format string and `%b`.
pub(super) fn expand_escapes(s: &str) -> (String, bool) {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('\\') => result.push('\\'),
            Some('a') => result.push('\x07'),
            Some('b') => result.push('\x08'),
            Some('e' | 'E') => result.push('\x1b'),
            Some('f') => result.push('\x0c'),
            Some('v') => result.push('\x0b'),
            Some('c') => return (result, true),
            Some('0') => {
                let value = take_digits(&mut chars, 8, 3);
                result.push(char::from(value as u8));
            }
            Some('x') if chars.peek().is_some_and(char::is_ascii_hexdigit) => {
                let value = take_digits(&mut chars, 16, 2);
                result.push(char::from(value as u8));
            }
            Some(u @ ('u' | 'U')) if chars.peek().is_some_and(char::is_ascii_hexdigit) => {
                let max = if u == 'u' { 4 } else { 8 };
                let value = take_digits(&mut chars, 16, max);
                result.push(char::from_u32(value).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }

    (result, false)
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, radix: u32, max: usize) -> u32 {
    let mut value = 0;
    for _ in 0..max {
        match chars.peek().and_then(|c| c.to_digit(radix)) {
            Some(digit) => {
                value = value * radix + digit;
                chars.next();
            }
            None => break,
        }
    }
    value
}
