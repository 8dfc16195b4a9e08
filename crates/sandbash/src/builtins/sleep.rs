//! Sleep builtin - pause execution for specified duration

use async_trait::async_trait;
use std::time::Duration;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::ExecResult;

/// The sleep builtin - pause execution for a number of seconds.
///
/// Usage: sleep NUMBER[SUFFIX]...
///
/// NUMBER may be fractional; SUFFIX is `s`, `m`, `h` or `d`. Operands add
/// up. A sleep that would outlast the execution deadline sleeps until the
/// deadline and then fails with a timeout.
pub struct Sleep;

fn parse_interval(arg: &str) -> Option<f64> {
    let (number, scale) = match arg.chars().last()? {
        's' => (&arg[..arg.len() - 1], 1.0),
        'm' => (&arg[..arg.len() - 1], 60.0),
        'h' => (&arg[..arg.len() - 1], 3600.0),
        'd' => (&arg[..arg.len() - 1], 86400.0),
        _ => (arg, 1.0),
    };
    number
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n * scale)
}

#[async_trait]
impl Builtin for Sleep {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        if ctx.args.is_empty() {
            return Ok(ExecResult::err("sleep: missing operand\n", 1));
        }
        let mut seconds = 0.0;
        for arg in ctx.args {
            match parse_interval(arg) {
                Some(s) => seconds += s,
                None => {
                    return Ok(ExecResult::err(
                        format!("sleep: invalid time interval '{arg}'\n"),
                        1,
                    ));
                }
            }
        }

        let requested = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX);
        let duration = match ctx.counters.remaining() {
            Some(remaining) => requested.min(remaining),
            None => requested,
        };
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
        if duration < requested {
            ctx.check_deadline()?;
        }
        Ok(ExecResult::default())
    }
}
