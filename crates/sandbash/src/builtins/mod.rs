//! Built-in shell commands
//!
//! This module provides the [`Builtin`] trait for implementing custom commands,
//! the [`Context`] struct they run with, and the [`CommandRegistry`] the
//! interpreter dispatches through.
//!
//! Commands that change shell state (`cd`, `export`, `read`, `set`, ...) are
//! not builtins in this sense; the interpreter handles them itself.
//!
//! # Custom Builtins
//!
//! ```rust
//! use sandbash::{Builtin, BuiltinContext, ExecResult, async_trait};
//!
//! struct MyCommand;
//!
//! #[async_trait]
//! impl Builtin for MyCommand {
//!     async fn execute(&self, ctx: BuiltinContext<'_>) -> sandbash::Result<ExecResult> {
//!         Ok(ExecResult::ok("Hello!\n"))
//!     }
//! }
//! ```
//!
//! Register via [`BashBuilder::builtin`](crate::BashBuilder::builtin).

mod cat;
mod curl;
mod cuttr;
mod echo;
mod environ;
mod fileops;
mod flow;
mod grep;
mod headtail;
mod ls;
mod mount;
mod path;
mod pipeline;
mod printf;
mod seq;
mod sleep;
mod sortuniq;
mod system;
mod test;
mod wc;

pub use cat::Cat;
pub use curl::Curl;
pub use cuttr::{Cut, Tr};
pub use echo::Echo;
pub use environ::{Env, Printenv};
pub use fileops::{Chmod, Cp, Ln, Mkdir, Mv, Rm, Touch};
pub use flow::{Colon, False, True};
pub use grep::Grep;
pub use headtail::{Head, Tail};
pub use ls::{Find, Ls, Rmdir};
pub use mount::{Mount, Umount};
pub use path::{Basename, Dirname, Pwd};
pub use pipeline::Tee;
pub use printf::Printf;
pub use seq::Seq;
pub use sleep::Sleep;
pub use sortuniq::{Sort, Uniq};
pub use system::{DEFAULT_HOSTNAME, DEFAULT_USERNAME, Hostname, Whoami};
pub use test::{Bracket, Test};
pub use wc::Wc;

pub(crate) use printf::render as render_printf;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::fs::{FileSystem, MountableFs, Volumes, normalize_path};
use crate::interpreter::ExecResult;
use crate::limits::{ExecutionCounters, ExecutionLimits};
use crate::network::HttpClient;

/// Resolve a path relative to the current working directory.
///
/// Absolute paths are kept; either way `.` and `..` are resolved lexically.
///
/// ```ignore
/// assert_eq!(resolve_path(Path::new("/home"), "../etc"), PathBuf::from("/etc"));
/// ```
pub fn resolve_path(cwd: &Path, path: &str) -> PathBuf {
    normalize_path(&cwd.join(path))
}

/// Execution context for builtin commands.
///
/// Everything here is read-only: a builtin reports its effect through the
/// returned [`ExecResult`] and the filesystem, never by touching shell state.
///
/// ```rust
/// use sandbash::{Builtin, BuiltinContext, ExecResult, async_trait};
///
/// struct Shout;
///
/// #[async_trait]
/// impl Builtin for Shout {
///     async fn execute(&self, ctx: BuiltinContext<'_>) -> sandbash::Result<ExecResult> {
///         let text = match ctx.stdin {
///             Some(stdin) => stdin.to_string(),
///             None => format!("{}\n", ctx.args.join(" ")),
///         };
///         Ok(ExecResult::ok(text.to_uppercase()))
///     }
/// }
/// ```
pub struct Context<'a> {
    /// Command arguments, not including the command name.
    pub args: &'a [String],

    /// Exported variables.
    pub env: &'a HashMap<String, String>,

    /// Current working directory.
    pub cwd: &'a Path,

    /// Filesystem the script sees (mounts included).
    pub fs: Arc<dyn FileSystem>,

    /// Pipeline or redirection input. `None` when stdin is a terminal-less
    /// void, which most commands treat as empty.
    pub stdin: Option<&'a str>,

    pub limits: &'a ExecutionLimits,
    pub counters: &'a ExecutionCounters,

    /// The mount table, when the filesystem is mountable.
    pub mounts: Option<&'a MountableFs>,

    /// Named volumes `mount` can attach.
    pub volumes: &'a Volumes,

    /// Policy-checked HTTP client. `None` when networking is not configured.
    pub http_client: Option<&'a HttpClient>,
}

impl<'a> Context<'a> {
    /// Absolute form of a path operand.
    pub fn resolve(&self, path: &str) -> PathBuf {
        resolve_path(self.cwd, path)
    }

    /// Fail once the execution deadline has passed. Long-running builtins
    /// poll this between units of work.
    pub fn check_deadline(&self) -> Result<()> {
        self.counters.check_deadline().map_err(Error::from)
    }

    /// Read a file operand as text; `-` is stdin.
    ///
    /// Filesystem failures come back as [`Error::Fs`] with the path as the
    /// user wrote it, ready for [`FsError::describe`](crate::FsError::describe).
    pub async fn read_to_string(&self, operand: &str) -> Result<String> {
        if operand == "-" {
            return Ok(self.stdin.unwrap_or_default().to_string());
        }
        let data = self
            .fs
            .read_file(&self.resolve(operand))
            .await
            .map_err(|mut e| {
                e.path = PathBuf::from(operand);
                e
            })?;
        self.counters
            .check_string_length(data.len(), self.limits)?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// Concatenated inputs of a filter command (`cat`, `sort`, ...).
    ///
    /// No operands means stdin. Unreadable operands are reported as
    /// `CMD: PATH: reason` lines in the second element.
    pub async fn read_inputs(&self, cmd: &str, operands: &[String]) -> Result<(String, String)> {
        let mut text = String::new();
        let mut errors = String::new();
        if operands.is_empty() {
            text.push_str(self.stdin.unwrap_or_default());
            return Ok((text, errors));
        }
        for operand in operands {
            match self.read_to_string(operand).await {
                Ok(content) => text.push_str(&content),
                Err(Error::Fs(e)) => {
                    errors.push_str(&format!("{cmd}: {}\n", e.describe(operand)));
                }
                Err(e) => return Err(e),
            }
        }
        Ok((text, errors))
    }

    /// Create a Context for unit tests with defaults for everything but the
    /// arguments, filesystem and stdin.
    #[cfg(test)]
    pub(crate) fn new_for_test(
        args: &'a [String],
        fs: Arc<dyn FileSystem>,
        stdin: Option<&'a str>,
    ) -> Self {
        use std::sync::LazyLock;
        static ENV: LazyLock<HashMap<String, String>> = LazyLock::new(HashMap::new);
        static LIMITS: LazyLock<ExecutionLimits> = LazyLock::new(ExecutionLimits::default);
        static COUNTERS: LazyLock<ExecutionCounters> = LazyLock::new(ExecutionCounters::default);
        static VOLUMES: LazyLock<Volumes> = LazyLock::new(HashMap::new);
        Self {
            args,
            env: &ENV,
            cwd: Path::new("/home/user"),
            fs,
            stdin,
            limits: &LIMITS,
            counters: &COUNTERS,
            mounts: None,
            volumes: &VOLUMES,
            http_client: None,
        }
    }
}

/// Trait for implementing builtin commands.
///
/// Builtins are stateless handlers shared across executions, so they must be
/// `Send + Sync`.
///
/// ```rust
/// use sandbash::{Bash, Builtin, BuiltinContext, ExecResult, async_trait};
/// use std::sync::Arc;
///
/// struct Greet {
///     default_name: String,
/// }
///
/// #[async_trait]
/// impl Builtin for Greet {
///     async fn execute(&self, ctx: BuiltinContext<'_>) -> sandbash::Result<ExecResult> {
///         let name = ctx.args.first().map(|s| s.as_str()).unwrap_or(&self.default_name);
///         Ok(ExecResult::ok(format!("Hello, {}!\n", name)))
///     }
/// }
///
/// let bash = Bash::builder()
///     .builtin("greet", Arc::new(Greet { default_name: "World".into() }))
///     .build();
/// ```
///
/// Return [`ExecResult::err`](crate::ExecResult::err) for ordinary failures.
/// An `Err` is reserved for resource limits and unexpected conditions; the
/// interpreter turns non-fatal errors into `sandbash: MESSAGE` on stderr.
#[async_trait]
pub trait Builtin: Send + Sync {
    /// Execute the builtin command.
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult>;

    /// Whether the command consumes all of its standard input.
    ///
    /// In `while read l; do cat; done < file` the inner `cat` swallows the
    /// rest of the file, ending the loop. Commands returning `false` leave
    /// stdin for later `read`s.
    fn reads_stdin(&self) -> bool {
        false
    }
}

/// Name-keyed table of builtins, shared read-only by every execution.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<dyn Builtin>>,
}

impl CommandRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard command set.
    pub fn with_defaults(username: Option<&str>, hostname: Option<&str>) -> Self {
        let mut registry = Self::new();
        let defaults: Vec<(&str, Arc<dyn Builtin>)> = vec![
            ("echo", Arc::new(Echo)),
            ("printf", Arc::new(Printf)),
            ("cat", Arc::new(Cat)),
            ("true", Arc::new(True)),
            ("false", Arc::new(False)),
            (":", Arc::new(Colon)),
            ("pwd", Arc::new(Pwd)),
            ("ls", Arc::new(Ls)),
            ("mkdir", Arc::new(Mkdir)),
            ("rm", Arc::new(Rm)),
            ("rmdir", Arc::new(Rmdir)),
            ("cp", Arc::new(Cp)),
            ("mv", Arc::new(Mv)),
            ("touch", Arc::new(Touch)),
            ("ln", Arc::new(Ln)),
            ("chmod", Arc::new(Chmod)),
            ("find", Arc::new(Find)),
            ("head", Arc::new(Head)),
            ("tail", Arc::new(Tail)),
            ("wc", Arc::new(Wc)),
            ("grep", Arc::new(Grep)),
            ("sort", Arc::new(Sort)),
            ("uniq", Arc::new(Uniq)),
            ("tr", Arc::new(Tr)),
            ("cut", Arc::new(Cut)),
            ("tee", Arc::new(Tee)),
            ("basename", Arc::new(Basename)),
            ("dirname", Arc::new(Dirname)),
            ("env", Arc::new(Env)),
            ("printenv", Arc::new(Printenv)),
            ("whoami", Arc::new(Whoami::new(username))),
            ("hostname", Arc::new(Hostname::new(hostname))),
            ("seq", Arc::new(Seq)),
            ("sleep", Arc::new(Sleep)),
            ("test", Arc::new(Test)),
            ("[", Arc::new(Bracket)),
            ("mount", Arc::new(Mount)),
            ("umount", Arc::new(Umount)),
            ("curl", Arc::new(Curl)),
        ];
        for (name, builtin) in defaults {
            registry.commands.insert(name.to_string(), builtin);
        }
        registry
    }

    /// Add or replace a command.
    pub fn register(&mut self, name: impl Into<String>, builtin: Arc<dyn Builtin>) {
        self.commands.insert(name.into(), builtin);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Builtin>> {
        self.commands.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;

    #[test]
    fn test_resolve_path() {
        let cwd = PathBuf::from("/home/user");
        assert_eq!(resolve_path(&cwd, "/tmp/f"), PathBuf::from("/tmp/f"));
        assert_eq!(resolve_path(&cwd, "dl/f"), PathBuf::from("/home/user/dl/f"));
        assert_eq!(resolve_path(&cwd, "."), PathBuf::from("/home/user"));
        assert_eq!(resolve_path(Path::new("/"), ".."), PathBuf::from("/"));
        assert_eq!(
            resolve_path(&cwd, "./a/../b/./c"),
            PathBuf::from("/home/user/b/c")
        );
    }

    #[test]
    fn test_registry_defaults() {
        let registry = CommandRegistry::with_defaults(None, None);
        for name in ["echo", "[", ":", "find", "mount", "curl"] {
            assert!(registry.contains(name), "missing {name}");
        }
        assert!(!registry.contains("cd"));
        let names = registry.names();
        assert!(names.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_read_inputs_reports_missing_files() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
        fs.write_file(Path::new("/home/user/a"), b"A\n").await.unwrap();
        let args = vec!["a".to_string(), "missing".to_string()];
        let ctx = Context::new_for_test(&args, fs, None);

        let (text, errors) = ctx.read_inputs("cat", &args).await.unwrap();
        assert_eq!(text, "A\n");
        assert_eq!(errors, "cat: missing: No such file or directory\n");
    }
}
