//! Sandbash - Sandboxed shell interpreter for untrusted scripts
//!
//! Scripts run against a virtual, mountable filesystem under command,
//! loop, recursion, size and wall-clock limits. No OS process is ever
//! spawned and no network request leaves without passing the allowlist.
//!
//! # Example
//!
//! ```rust
//! use sandbash::Bash;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let mut bash = Bash::new();
//!     let result = bash.exec("echo hello").await?;
//!     assert_eq!(result.stdout, "hello\n");
//!     assert_eq!(result.exit_code, 0);
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! ```rust
//! use sandbash::{Bash, ExecutionLimits, InMemoryFs, NetworkAllowlist};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> sandbash::Result<()> {
//! let mut bash = Bash::builder()
//!     .env("APP_ENV", "test")
//!     .cwd("/tmp")
//!     .limits(ExecutionLimits::new().max_commands(500))
//!     .mount("/data", Arc::new(InMemoryFs::empty()))
//!     .network(NetworkAllowlist::new().allow("https://api.example.com/v1/"))
//!     .build();
//! let result = bash.exec("echo $APP_ENV > /data/env; cat /data/env; pwd").await?;
//! assert_eq!(result.stdout, "test\n/tmp\n");
//! # Ok(())
//! # }
//! ```

mod builtins;
mod error;
mod fs;
mod interpreter;
mod limits;
mod logging_impl;
mod network;
pub mod parser;
mod sandbox;

pub use async_trait::async_trait;
pub use builtins::{
    Builtin, CommandRegistry, Context as BuiltinContext, DEFAULT_HOSTNAME, DEFAULT_USERNAME,
};
pub use error::{Error, Result};
pub use fs::{
    DirEntry, FileSystem, FileType, FsError, FsErrorKind, FsResult, FstabEntry, InMemoryFs,
    Metadata, MountInfo, MountableFs, OverlayFs, RemoveOptions, ScopedFs, Volumes,
    normalize_path, parse_fstab,
};
pub use interpreter::{ControlFlow, ExecResult, JobTable, ShellOptions, ShellState, Variable};
pub use limits::{ExecutionCounters, ExecutionLimits, LimitExceeded};
pub use logging_impl::{LogConfig, format_script_for_log, sanitize_for_log};
pub use network::{
    DEFAULT_MAX_RESPONSE_BYTES, DEFAULT_TIMEOUT, HttpClient, HttpRequest, HttpResponse,
    HttpTransport, MAX_REDIRECTS, Method, NetworkAllowlist, UrlMatch,
};
#[cfg(feature = "http_client")]
pub use network::ReqwestTransport;
pub use sandbox::{
    CommandHandle, Encoding, LogEntry, LogStream, MkDirOptions, RunOptions, Sandbox,
    SandboxOptions,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use interpreter::{Interpreter, InterpreterParts, OutputCallback};
use parser::Parser;

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Main entry point for Sandbash.
///
/// One `Bash` is one shell session: variables, functions, the working
/// directory and mounts persist across [`exec`](Self::exec) calls. Execution
/// counters and the deadline reset on every call.
pub struct Bash {
    fs: Arc<dyn FileSystem>,
    mounts: Arc<MountableFs>,
    interpreter: Interpreter,
    log_config: LogConfig,
    /// Work that needs the filesystem; done on the first exec
    setup: Option<Setup>,
}

/// Deferred startup: fstab entries and directories to create.
struct Setup {
    fstab: Vec<FstabEntry>,
    volumes: Volumes,
    dirs: Vec<PathBuf>,
    error: Option<Error>,
}

impl Default for Bash {
    fn default() -> Self {
        Self::new()
    }
}

impl Bash {
    /// Create a new Bash instance with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a new BashBuilder for customized configuration.
    pub fn builder() -> BashBuilder {
        BashBuilder::default()
    }

    /// Execute a bash script and return the result.
    ///
    /// Only syntax errors and resource limits are returned as `Err`; a
    /// failing command is an `Ok` result with a non-zero exit code.
    pub async fn exec(&mut self, script: &str) -> Result<ExecResult> {
        self.run(script, None).await
    }

    /// Like [`exec`](Self::exec), calling `on_output(stdout, stderr)` after
    /// each top-level command with the output it produced.
    pub async fn exec_streaming<F>(&mut self, script: &str, mut on_output: F) -> Result<ExecResult>
    where
        F: FnMut(&str, &str) + Send,
    {
        let callback: OutputCallback<'_> = &mut on_output;
        self.run(script, Some(callback)).await
    }

    async fn run(&mut self, script: &str, on_output: Option<OutputCallback<'_>>) -> Result<ExecResult> {
        self.prepare().await?;

        #[cfg(feature = "logging")]
        tracing::info!(
            target: "sandbash::session",
            script = %format_script_for_log(script, &self.log_config),
            "exec start"
        );

        let ast = Parser::new(script).parse()?;
        let outcome = self.interpreter.execute(&ast, on_output).await;

        #[cfg(feature = "logging")]
        match &outcome {
            Ok(result) => tracing::info!(
                target: "sandbash::session",
                exit_code = result.exit_code,
                commands = self.interpreter.counters().commands,
                "exec end"
            ),
            Err(e) => tracing::warn!(target: "sandbash::session", error = %e, "exec aborted"),
        }

        outcome
    }

    async fn prepare(&mut self) -> Result<()> {
        let Some(mut setup) = self.setup.take() else {
            return Ok(());
        };
        if let Some(error) = setup.error.take() {
            return Err(error);
        }
        // a read-only root may refuse; scripts then see the missing dir
        for dir in &setup.dirs {
            if !self.fs.exists(dir).await.unwrap_or(true) {
                let _ = self.fs.mkdir(dir, true).await;
            }
        }
        self.mounts.apply_fstab(&setup.fstab, &setup.volumes).await?;
        Ok(())
    }

    /// The filesystem scripts see, mounts included.
    pub fn fs(&self) -> Arc<dyn FileSystem> {
        Arc::clone(&self.fs)
    }

    /// The session's mount table.
    pub fn mounts(&self) -> &MountableFs {
        &self.mounts
    }

    /// Attach `fs` at `path` for subsequent executions.
    pub fn mount(&self, path: impl AsRef<Path>, fs: Arc<dyn FileSystem>) -> FsResult<()> {
        self.mounts.mount(path, fs)
    }

    pub fn unmount(&self, path: impl AsRef<Path>) -> FsResult<()> {
        self.mounts.unmount(path)
    }

    /// Shell state: variables, functions, cwd, options.
    pub fn shell_state(&self) -> &ShellState {
        self.interpreter.state()
    }

    pub fn shell_state_mut(&mut self) -> &mut ShellState {
        self.interpreter.state_mut()
    }

    pub fn limits(&self) -> &ExecutionLimits {
        self.interpreter.limits()
    }

    pub fn log_config(&self) -> &LogConfig {
        &self.log_config
    }
}

/// Builder for customized Bash configuration.
///
/// ```rust
/// use sandbash::{Bash, Builtin, BuiltinContext, ExecResult, async_trait};
/// use std::sync::Arc;
///
/// struct Greet;
///
/// #[async_trait]
/// impl Builtin for Greet {
///     async fn execute(&self, ctx: BuiltinContext<'_>) -> sandbash::Result<ExecResult> {
///         let who = ctx.args.first().map(String::as_str).unwrap_or("world");
///         Ok(ExecResult::ok(format!("hello, {who}\n")))
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> sandbash::Result<()> {
/// let mut bash = Bash::builder().builtin("greet", Arc::new(Greet)).build();
/// assert_eq!(bash.exec("greet sandbox").await?.stdout, "hello, sandbox\n");
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct BashBuilder {
    fs: Option<Arc<dyn FileSystem>>,
    env: Vec<(String, String)>,
    cwd: Option<PathBuf>,
    limits: ExecutionLimits,
    network: Option<NetworkAllowlist>,
    http_transport: Option<Arc<dyn HttpTransport>>,
    builtins: Vec<(String, Arc<dyn Builtin>)>,
    mounts: Vec<(PathBuf, Arc<dyn FileSystem>)>,
    volumes: Volumes,
    fstab: Vec<FstabEntry>,
    log_config: Option<LogConfig>,
    username: Option<String>,
    hostname: Option<String>,
}

impl BashBuilder {
    /// Root filesystem. Defaults to a fresh [`InMemoryFs`].
    pub fn fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    /// Set an exported environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Starting directory. Defaults to `$HOME`.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Enable `curl` for URLs matching `allowlist`.
    ///
    /// Requests go through the transport set with
    /// [`http_transport`](Self::http_transport), or reqwest with the
    /// `http_client` feature.
    pub fn network(mut self, allowlist: NetworkAllowlist) -> Self {
        self.network = Some(allowlist);
        self
    }

    pub fn http_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.http_transport = Some(transport);
        self
    }

    /// Register a custom command, replacing any builtin of the same name.
    pub fn builtin(mut self, name: impl Into<String>, builtin: Arc<dyn Builtin>) -> Self {
        self.builtins.push((name.into(), builtin));
        self
    }

    /// Attach `fs` at `path`.
    pub fn mount(mut self, path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        self.mounts.push((path.into(), fs));
        self
    }

    /// Register a named volume for fstab entries and the `mount` builtin.
    pub fn volume(mut self, name: impl Into<String>, fs: Arc<dyn FileSystem>) -> Self {
        self.volumes.insert(name.into(), fs);
        self
    }

    /// Mounts to apply at startup, in fstab format.
    ///
    /// ```rust
    /// use sandbash::Bash;
    ///
    /// let builder = Bash::builder().fstab("scratch /scratch tmpfs\n").unwrap();
    /// assert!(Bash::builder().fstab("only-one-field\n").is_err());
    /// # drop(builder);
    /// ```
    pub fn fstab(mut self, text: &str) -> Result<Self> {
        self.fstab.extend(parse_fstab(text)?);
        Ok(self)
    }

    pub fn log_config(mut self, config: LogConfig) -> Self {
        self.log_config = Some(config);
        self
    }

    /// Name reported by `whoami`; also sets `$USER` and `$HOME`.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Name reported by `hostname` and `$HOSTNAME`.
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Build the Bash instance.
    pub fn build(self) -> Bash {
        let log_config = self.log_config.unwrap_or_default();
        let root = self.fs.unwrap_or_else(|| Arc::new(InMemoryFs::new()));
        let mounts = Arc::new(MountableFs::new(root));
        let mut error = None;
        for (path, fs) in self.mounts {
            if let Err(e) = mounts.mount(&path, fs) {
                error.get_or_insert(Error::Fs(e));
            }
        }

        let username = self.username.unwrap_or_else(|| DEFAULT_USERNAME.to_string());
        let hostname = self.hostname.unwrap_or_else(|| DEFAULT_HOSTNAME.to_string());
        let home = PathBuf::from("/home").join(&username);
        let cwd = normalize_path(&self.cwd.unwrap_or_else(|| home.clone()));

        let mut state = ShellState::new(cwd.clone());
        let home_str = home.to_string_lossy().into_owned();
        let defaults = [
            ("HOME", home_str.as_str()),
            ("USER", username.as_str()),
            ("HOSTNAME", hostname.as_str()),
            ("PATH", DEFAULT_PATH),
            ("SHELL", "/bin/sh"),
        ];
        for (name, value) in defaults {
            let _ = state.export(name, Some(value.to_string()));
        }
        for (name, value) in &self.env {
            #[cfg(feature = "logging")]
            tracing::debug!(
                target: "sandbash::session",
                name = %name,
                value = %log_config.redact_env_value(name, value),
                "env"
            );
            let _ = state.export(name, Some(value.clone()));
        }

        let mut registry = CommandRegistry::with_defaults(Some(&username), Some(&hostname));
        for (name, builtin) in self.builtins {
            registry.register(name, builtin);
        }

        let http_client = build_http_client(self.network, self.http_transport);
        let fs: Arc<dyn FileSystem> = mounts.clone();
        let interpreter = Interpreter::new(InterpreterParts {
            fs: Arc::clone(&fs),
            mounts: Some(Arc::clone(&mounts)),
            volumes: self.volumes.clone(),
            registry: Arc::new(registry),
            http_client,
            limits: self.limits,
            state,
        });

        Bash {
            fs,
            mounts,
            interpreter,
            log_config,
            setup: Some(Setup {
                fstab: self.fstab,
                volumes: self.volumes,
                dirs: vec![home, cwd],
                error,
            }),
        }
    }
}

/// A client exists when either a policy or a transport was configured; a
/// transport without a policy gets a deny-all allowlist.
fn build_http_client(
    allowlist: Option<NetworkAllowlist>,
    transport: Option<Arc<dyn HttpTransport>>,
) -> Option<HttpClient> {
    if allowlist.is_none() && transport.is_none() {
        return None;
    }
    let allowlist = allowlist.unwrap_or_default();
    let transport = match transport {
        Some(transport) => transport,
        None => default_transport()?,
    };
    Some(HttpClient::new(allowlist, transport))
}

#[cfg(feature = "http_client")]
fn default_transport() -> Option<Arc<dyn HttpTransport>> {
    match ReqwestTransport::new() {
        Ok(transport) => Some(Arc::new(transport)),
        Err(_e) => {
            #[cfg(feature = "logging")]
            tracing::warn!(target: "sandbash::network", error = %_e, "http transport unavailable");
            None
        }
    }
}

#[cfg(not(feature = "http_client"))]
fn default_transport() -> Option<Arc<dyn HttpTransport>> {
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_echo_hello() {
        let mut bash = Bash::new();
        let result = bash.exec("echo hello").await.unwrap();
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_defaults() {
        let mut bash = Bash::new();
        let result = bash.exec("pwd; echo $HOME $USER; whoami; hostname").await.unwrap();
        assert_eq!(result.stdout, "/home/user\n/home/user user\nuser\nsandbash\n");
    }

    #[tokio::test]
    async fn test_builder_identity_creates_home() {
        let mut bash = Bash::builder().username("ada").hostname("box").build();
        let result = bash.exec("pwd; whoami; echo $HOSTNAME").await.unwrap();
        assert_eq!(result.stdout, "/home/ada\nada\nbox\n");
    }

    #[tokio::test]
    async fn test_state_persists_between_execs() {
        let mut bash = Bash::new();
        bash.exec("greet() { echo \"hi $1\"; }; NAME=ada; cd /tmp").await.unwrap();
        let result = bash.exec("greet $NAME; pwd").await.unwrap();
        assert_eq!(result.stdout, "hi ada\n/tmp\n");
    }

    #[tokio::test]
    async fn test_syntax_error_is_err() {
        let mut bash = Bash::new();
        let err = bash.exec("if true; then echo").await.unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
        // the session survives
        assert_eq!(bash.exec("echo ok").await.unwrap().stdout, "ok\n");
    }

    #[tokio::test]
    async fn test_exec_streaming_chunks() {
        let mut bash = Bash::new();
        let mut chunks = Vec::new();
        let result = bash
            .exec_streaming("echo one; echo two >&2; echo three", |out, err| {
                chunks.push((out.to_string(), err.to_string()));
            })
            .await
            .unwrap();
        assert_eq!(result.stdout, "one\nthree\n");
        assert_eq!(
            chunks,
            vec![
                ("one\n".to_string(), String::new()),
                (String::new(), "two\n".to_string()),
                ("three\n".to_string(), String::new()),
            ]
        );
    }

    #[tokio::test]
    async fn test_fstab_applied_on_first_exec() {
        let mut bash = Bash::builder()
            .fstab("scratch /scratch tmpfs\n")
            .unwrap()
            .build();
        let result = bash
            .exec("echo x > /scratch/f; cat /scratch/f; mount")
            .await
            .unwrap();
        assert_eq!(result.stdout, "x\nscratch on /scratch type tmpfs\n");
    }

    #[tokio::test]
    async fn test_duplicate_builder_mount_reported() {
        let mut bash = Bash::builder()
            .mount("/data", Arc::new(InMemoryFs::empty()))
            .mount("/data", Arc::new(InMemoryFs::empty()))
            .build();
        let err = bash.exec("true").await.unwrap_err();
        assert!(matches!(err, Error::Fs(ref e) if e.kind == FsErrorKind::Busy));
    }

    #[tokio::test]
    async fn test_curl_without_network() {
        let mut bash = Bash::new();
        let result = bash.exec("curl -s https://example.com").await.unwrap();
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stderr, "curl: network access not configured\n");
    }
}
