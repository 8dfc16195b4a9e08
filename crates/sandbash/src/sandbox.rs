//! Process-like sandbox API
//!
//! [`Sandbox`] wraps a [`Bash`] session behind the surface agent hosts
//! expect from a remote sandbox: run a command and get a handle with its
//! output, exit code and an ordered log stream, plus file helpers.
//!
//! ```
//! use sandbash::{RunOptions, Sandbox, SandboxOptions};
//!
//! # tokio_test::block_on(async {
//! let options = SandboxOptions::from_json(r#"{"cwd": "/app", "files": {"/app/in.txt": "b\na\n"}}"#).unwrap();
//! let mut sandbox = Sandbox::create(options).await.unwrap();
//!
//! let handle = sandbox.run_command("sort in.txt", RunOptions::default()).await.unwrap();
//! assert_eq!(handle.stdout(), "a\nb\n");
//! assert_eq!(handle.wait().await, 0);
//! # });
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::builtins::resolve_path;
use crate::error::{Error, Result};
use crate::interpreter::{ExecResult, Variable};
use crate::limits::ExecutionLimits;
use crate::network::NetworkAllowlist;
use crate::{Bash, BashBuilder};

/// Sandbox configuration, usually read from JSON.
///
/// Every field is optional. Unknown fields are rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxOptions {
    /// Starting directory (created if missing)
    pub cwd: Option<String>,
    /// Exported variables
    pub env: BTreeMap<String, String>,
    pub limits: Option<ExecutionLimits>,
    /// URL prefixes `curl` may reach
    pub allowed_url_prefixes: Vec<String>,
    /// Allow every URL. Overrides `allowed_url_prefixes`.
    pub dangerously_allow_full_internet_access: bool,
    /// Mounts in fstab format
    pub mounts: Option<String>,
    /// Initial files, path to UTF-8 content
    pub files: BTreeMap<String, String>,
}

impl SandboxOptions {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Shell(format!("invalid sandbox options: {e}")))
    }

    /// The [`BashBuilder`] these options describe, for further
    /// customization (transports, builtins) before [`Sandbox::from_bash`].
    pub fn into_builder(self) -> Result<BashBuilder> {
        let mut builder = Bash::builder();
        if let Some(cwd) = &self.cwd {
            builder = builder.cwd(cwd);
        }
        for (name, value) in &self.env {
            builder = builder.env(name, value);
        }
        if let Some(limits) = self.limits {
            builder = builder.limits(limits);
        }
        if self.dangerously_allow_full_internet_access {
            builder = builder.network(NetworkAllowlist::allow_all());
        } else if !self.allowed_url_prefixes.is_empty() {
            builder = builder.network(NetworkAllowlist::new().allow_many(&self.allowed_url_prefixes));
        }
        if let Some(fstab) = &self.mounts {
            builder = builder.fstab(fstab)?;
        }
        Ok(builder)
    }
}

/// Per-command overrides, undone when the command finishes.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl RunOptions {
    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// One chunk of command output.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub stream: LogStream,
    pub data: String,
    pub timestamp: DateTime<Utc>,
}

/// How [`Sandbox::read_file`] returns content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// Lossy UTF-8
    #[default]
    Utf8,
    Base64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MkDirOptions {
    pub recursive: bool,
}

/// A finished command.
///
/// Execution is synchronous, so the handle is complete when returned; the
/// process-style methods exist for hosts written against remote sandboxes.
#[derive(Debug)]
pub struct CommandHandle {
    result: ExecResult,
    logs: Vec<LogEntry>,
}

impl CommandHandle {
    pub fn stdout(&self) -> &str {
        &self.result.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.result.stderr
    }

    /// stdout and stderr interleaved in the order they were produced.
    pub fn output(&self) -> String {
        self.logs.iter().map(|entry| entry.data.as_str()).collect()
    }

    pub fn exit_code(&self) -> i32 {
        self.result.exit_code
    }

    /// Wait for the command and return its exit code.
    pub async fn wait(&self) -> i32 {
        self.result.exit_code
    }

    /// Output chunks in order. The stream is consumed: a second call yields
    /// nothing.
    pub fn logs(&mut self) -> std::vec::IntoIter<LogEntry> {
        std::mem::take(&mut self.logs).into_iter()
    }

    /// No-op: the command has already finished.
    pub async fn kill(&self) {}
}

/// A shell session with a process-style interface.
pub struct Sandbox {
    bash: Bash,
}

impl Sandbox {
    /// Build a session from `options` and write its initial files.
    pub async fn create(mut options: SandboxOptions) -> Result<Self> {
        let files = std::mem::take(&mut options.files);
        let mut sandbox = Self::from_bash(options.into_builder()?.build());
        // mounts and the working directory are set up by the first exec
        sandbox.bash.exec("true").await?;
        sandbox.write_files(&files).await?;
        Ok(sandbox)
    }

    pub fn from_bash(bash: Bash) -> Self {
        Self { bash }
    }

    pub fn bash(&mut self) -> &mut Bash {
        &mut self.bash
    }

    /// Run `command` with `options` applied for its duration only.
    ///
    /// Syntax errors and resource limits do not fail the call: they end the
    /// command with status 2 and 1 respectively, keeping partial output.
    pub async fn run_command(&mut self, command: &str, options: RunOptions) -> Result<CommandHandle> {
        let state = self.bash.shell_state_mut();
        let saved_cwd = options.cwd.as_ref().map(|cwd| {
            let saved = (
                state.cwd().to_path_buf(),
                state.variable("PWD").cloned(),
                state.variable("OLDPWD").cloned(),
            );
            let target = resolve_path(state.cwd(), cwd);
            state.set_cwd(target);
            saved
        });
        let saved_env: Vec<(String, Option<Variable>)> = options
            .env
            .into_iter()
            .map(|(name, value)| {
                let var = Variable {
                    value,
                    exported: true,
                    readonly: false,
                };
                let old = state.replace_variable(&name, Some(var));
                (name, old)
            })
            .collect();

        let mut logs = Vec::new();
        let outcome = self
            .bash
            .exec_streaming(command, |stdout, stderr| {
                let now = Utc::now();
                for (stream, data) in [(LogStream::Stdout, stdout), (LogStream::Stderr, stderr)] {
                    if !data.is_empty() {
                        logs.push(LogEntry {
                            stream,
                            data: data.to_string(),
                            timestamp: now,
                        });
                    }
                }
            })
            .await;

        let state = self.bash.shell_state_mut();
        for (name, old) in saved_env.into_iter().rev() {
            state.replace_variable(&name, old);
        }
        if let Some((cwd, pwd, oldpwd)) = saved_cwd {
            state.set_cwd(cwd);
            state.replace_variable("PWD", pwd);
            state.replace_variable("OLDPWD", oldpwd);
        }

        let result = match outcome {
            Ok(result) => result,
            Err(error) => {
                let (code, mut result) = match &error {
                    Error::Syntax { .. } => (2, ExecResult::default()),
                    _ => (1, error.partial_output().cloned().unwrap_or_default()),
                };
                let message = format!("sandbash: {error}\n");
                logs.push(LogEntry {
                    stream: LogStream::Stderr,
                    data: message.clone(),
                    timestamp: Utc::now(),
                });
                result.stderr.push_str(&message);
                result.exit_code = code;
                result
            }
        };
        Ok(CommandHandle { result, logs })
    }

    /// Write UTF-8 files, creating parent directories.
    pub async fn write_files(&self, files: &BTreeMap<String, String>) -> Result<()> {
        let fs = self.bash.fs();
        for (path, content) in files {
            let path = self.absolute(path);
            if let Some(parent) = path.parent()
                && !fs.exists(parent).await?
            {
                fs.mkdir(parent, true).await?;
            }
            fs.write_file(&path, content.as_bytes()).await?;
        }
        Ok(())
    }

    pub async fn read_file(&self, path: &str, encoding: Encoding) -> Result<String> {
        let data = self.bash.fs().read_file(&self.absolute(path)).await?;
        Ok(match encoding {
            Encoding::Utf8 => String::from_utf8_lossy(&data).into_owned(),
            Encoding::Base64 => BASE64.encode(data),
        })
    }

    pub async fn mk_dir(&self, path: &str, options: MkDirOptions) -> Result<()> {
        self.bash
            .fs()
            .mkdir(&self.absolute(path), options.recursive)
            .await?;
        Ok(())
    }

    /// No-op: nothing runs between commands.
    pub async fn stop(&self) {}

    fn absolute(&self, path: &str) -> PathBuf {
        resolve_path(self.bash.shell_state().cwd(), path)
    }
}
