//! Sandbash CLI - Command line interface for sandboxed shell execution
//!
//! Usage:
//!   sandbash -c 'echo hello'              # Execute a command string
//!   sandbash script.sh arg1 arg2          # Execute a script file (read from the host)
//!   sandbash --config sandbox.json -c ... # Start from sandbox options
//!
//! Logging goes to stderr, filtered by `RUST_LOG` (e.g. `RUST_LOG=sandbash=debug`).

use anyhow::{Context, Result, bail};
use clap::Parser;
use sandbash::{ExecutionLimits, Sandbox, SandboxOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sandbash - Sandboxed shell interpreter
#[derive(Parser, Debug)]
#[command(name = "sandbash")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Execute the given command string
    #[arg(short = 'c')]
    command: Option<String>,

    /// Sandbox options as JSON (cwd, env, limits, mounts, files, network)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long)]
    max_commands: Option<usize>,

    /// Maximum iterations of a single loop
    #[arg(long)]
    max_loop_iterations: Option<usize>,

    /// Maximum function/subshell nesting depth
    #[arg(long)]
    max_depth: Option<usize>,

    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Allow curl to reach URLs under PREFIX (repeatable)
    #[arg(long = "allow-url", value_name = "PREFIX")]
    allow_urls: Vec<String>,

    /// Allow curl to reach any URL
    #[arg(long)]
    allow_all_network: bool,

    /// Script file to execute
    #[arg()]
    script: Option<PathBuf>,

    /// Arguments to pass to the script
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

impl Args {
    /// Sandbox options: the config file, then command-line overrides.
    fn sandbox_options(&self) -> Result<SandboxOptions> {
        let mut options = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config: {}", path.display()))?;
                SandboxOptions::from_json(&text)
                    .with_context(|| format!("Invalid config: {}", path.display()))?
            }
            None => SandboxOptions::default(),
        };

        let mut limits = options.limits.take().unwrap_or_else(ExecutionLimits::new);
        if let Some(n) = self.max_commands {
            limits = limits.max_commands(n);
        }
        if let Some(n) = self.max_loop_iterations {
            limits = limits.max_loop_iterations(n);
        }
        if let Some(n) = self.max_depth {
            limits = limits.max_function_depth(n);
        }
        if let Some(ms) = self.timeout_ms {
            limits = limits.timeout(Duration::from_millis(ms));
        }
        options.limits = Some(limits);

        options.allowed_url_prefixes.extend(self.allow_urls.iter().cloned());
        options.dangerously_allow_full_internet_access |= self.allow_all_network;
        Ok(options)
    }
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script: {}", path.display()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    // with -c, a trailing operand only names $0
    let (script, name) = match (&args.command, &args.script) {
        (Some(command), Some(path)) => (command.clone(), path.display().to_string()),
        (Some(command), None) => (command.clone(), "sandbash".to_string()),
        (None, Some(path)) => (load_script(path)?, path.display().to_string()),
        (None, None) => bail!("usage: sandbash -c 'command' | sandbash script.sh [args...]"),
    };

    let mut sandbox = Sandbox::create(args.sandbox_options()?)
        .await
        .context("Failed to create sandbox")?;
    let bash = sandbox.bash();
    let state = bash.shell_state_mut();
    state.script_name = name;
    state.positional = args.args.clone();

    let outcome = bash
        .exec_streaming(&script, |stdout, stderr| {
            print!("{stdout}");
            let _ = std::io::stdout().flush();
            eprint!("{stderr}");
        })
        .await;
    match outcome {
        Ok(result) => std::process::exit(result.exit_code),
        Err(e) => {
            eprintln!("sandbash: {e}");
            std::process::exit(if matches!(e, sandbash::Error::Syntax { .. }) { 2 } else { 1 });
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_limit_flags_override_config() {
        let mut config = tempfile::NamedTempFile::new().unwrap();
        write!(config, r#"{{"limits": {{"max_commands": 10, "max_loop_iterations": 7}}}}"#).unwrap();
        let path = config.path().to_str().unwrap();

        let args = Args::try_parse_from([
            "sandbash",
            "--config",
            path,
            "--max-commands",
            "99",
            "--allow-url",
            "https://a.example/",
            "-c",
            "true",
        ])
        .unwrap();
        let options = args.sandbox_options().unwrap();
        let limits = options.limits.unwrap();
        assert_eq!(limits.max_commands, 99);
        assert_eq!(limits.max_loop_iterations, 7);
        assert_eq!(options.allowed_url_prefixes, vec!["https://a.example/"]);
    }

    #[test]
    fn test_script_with_args() {
        let args = Args::try_parse_from(["sandbash", "run.sh", "one", "--two"]).unwrap();
        assert_eq!(args.script.as_deref(), Some(Path::new("run.sh")));
        assert_eq!(args.args, vec!["one", "--two"]);
    }

    #[test]
    fn test_load_script_reports_path() {
        let err = load_script(Path::new("/definitely/not/here.sh")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.sh"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "echo hi").unwrap();
        assert_eq!(load_script(file.path()).unwrap(), "echo hi\n");
    }
}
