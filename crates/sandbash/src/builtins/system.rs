//! System identity builtins (hostname, whoami)
//!
//! Both report configured sandbox values; the host's real identity is
//! never consulted.

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::ExecResult;

/// Hostname reported when none is configured.
pub const DEFAULT_HOSTNAME: &str = "sandbash";

/// Username reported when none is configured.
pub const DEFAULT_USERNAME: &str = "user";

/// The hostname builtin - prints the sandbox hostname.
pub struct Hostname {
    name: String,
}

impl Hostname {
    pub fn new(name: Option<&str>) -> Self {
        Self {
            name: name.unwrap_or(DEFAULT_HOSTNAME).to_string(),
        }
    }
}

#[async_trait]
impl Builtin for Hostname {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        if !ctx.args.is_empty() {
            return Ok(ExecResult::err(
                "hostname: cannot set hostname in sandbox\n",
                1,
            ));
        }
        Ok(ExecResult::ok(format!("{}\n", self.name)))
    }
}

/// The whoami builtin - prints the sandbox username.
pub struct Whoami {
    name: String,
}

impl Whoami {
    pub fn new(name: Option<&str>) -> Self {
        Self {
            name: name.unwrap_or(DEFAULT_USERNAME).to_string(),
        }
    }
}

#[async_trait]
impl Builtin for Whoami {
    async fn execute(&self, _ctx: Context<'_>) -> Result<ExecResult> {
        Ok(ExecResult::ok(format!("{}\n", self.name)))
    }
}
