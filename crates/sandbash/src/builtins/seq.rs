//! seq builtin - print a sequence of numbers

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::ExecResult;

/// The seq builtin - print a sequence of numbers.
///
/// Usage: seq [OPTION]... LAST
///        seq [OPTION]... FIRST LAST
///        seq [OPTION]... FIRST INCREMENT LAST
///
/// Options:
///   -s STRING  Use STRING as separator (default: newline)
///   -w         Equalize width by padding with leading zeroes
///
/// Output is printed with as many decimals as the most precise operand.
pub struct Seq;

fn decimals(operand: &str) -> usize {
    operand.split_once('.').map_or(0, |(_, frac)| frac.len())
}

#[async_trait]
impl Builtin for Seq {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut separator = "\n".to_string();
        let mut equal_width = false;
        let mut operands: Vec<&str> = Vec::new();

        let mut args = ctx.args.iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-s" => separator = args.next().cloned().unwrap_or_default(),
                "-w" => equal_width = true,
                a if a.starts_with("-s") => separator = a[2..].to_string(),
                // negative numbers are operands, not options
                a if a.starts_with('-') && a[1..].parse::<f64>().is_err() => {
                    return Ok(ExecResult::err(
                        format!("seq: invalid option -- '{}'\n", &a[1..]),
                        1,
                    ));
                }
                a => operands.push(a),
            }
        }

        let mut values = Vec::with_capacity(3);
        for operand in &operands {
            match operand.parse::<f64>() {
                Ok(v) if v.is_finite() => values.push(v),
                _ => {
                    return Ok(ExecResult::err(
                        format!("seq: invalid floating point argument: '{operand}'\n"),
                        1,
                    ));
                }
            }
        }
        let (first, step, last) = match values[..] {
            [last] => (1.0, 1.0, last),
            [first, last] => (first, 1.0, last),
            [first, step, last] => (first, step, last),
            [] => return Ok(ExecResult::err("seq: missing operand\n", 1)),
            _ => {
                return Ok(ExecResult::err(
                    format!("seq: extra operand '{}'\n", operands[3]),
                    1,
                ));
            }
        };
        if step == 0.0 {
            return Ok(ExecResult::err("seq: zero increment\n", 1));
        }

        let precision = operands[..operands.len() - 1]
            .iter()
            .map(|o| decimals(o))
            .max()
            .unwrap_or(0);
        let format = |v: f64| format!("{v:.precision$}");
        let width = if equal_width {
            format(first).len().max(format(last).len())
        } else {
            0
        };

        let mut output = String::new();
        let mut i: u64 = 0;
        loop {
            let value = first + step * i as f64;
            if (step > 0.0 && value > last + 1e-10) || (step < 0.0 && value < last - 1e-10) {
                break;
            }
            if i > 0 {
                output.push_str(&separator);
            }
            let text = format(value);
            if text.len() < width {
                let (sign, digits) = text.split_at(usize::from(text.starts_with('-')));
                output.push_str(sign);
                output.push_str(&"0".repeat(width - text.len()));
                output.push_str(digits);
            } else {
                output.push_str(&text);
            }
            i += 1;
            if i % 4096 == 0 {
                ctx.check_deadline()?;
                ctx.counters.check_string_length(output.len(), ctx.limits)?;
            }
        }
        if i > 0 {
            output.push('\n');
        }
        ctx.counters.check_string_length(output.len(), ctx.limits)?;
        Ok(ExecResult::ok(output))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use std::sync::Arc;

    async fn run_seq(args: &[&str]) -> ExecResult {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let ctx = Context::new_for_test(&args, Arc::new(InMemoryFs::new()), None);
        Seq.execute(ctx).await.unwrap()
    }

    #[tokio::test]
    async fn test_seq_forms() {
        assert_eq!(run_seq(&["3"]).await.stdout, "1\n2\n3\n");
        assert_eq!(run_seq(&["2", "4"]).await.stdout, "2\n3\n4\n");
        assert_eq!(run_seq(&["10", "-3", "4"]).await.stdout, "10\n7\n4\n");
        assert_eq!(run_seq(&["-1", "1"]).await.stdout, "-1\n0\n1\n");
        assert_eq!(run_seq(&["0"]).await.stdout, "");
    }

    #[tokio::test]
    async fn test_seq_options() {
        assert_eq!(run_seq(&["-s", ",", "3"]).await.stdout, "1,2,3\n");
        assert_eq!(run_seq(&["-w", "8", "10"]).await.stdout, "08\n09\n10\n");
        assert_eq!(run_seq(&["0", "0.5", "1"]).await.stdout, "0.0\n0.5\n1.0\n");
    }

    #[tokio::test]
    async fn test_seq_errors() {
        assert_eq!(run_seq(&[]).await.stderr, "seq: missing operand\n");
        assert_eq!(run_seq(&["1", "0", "3"]).await.stderr, "seq: zero increment\n");
        assert_eq!(
            run_seq(&["x"]).await.stderr,
            "seq: invalid floating point argument: 'x'\n"
        );
    }
}
