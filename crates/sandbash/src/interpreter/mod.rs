//! Interpreter for executing bash scripts
//!
//! Walks the AST with a mutable [`ShellState`]. Every await is sequential:
//! pipeline stages, background jobs and substitutions run one after another
//! with their output buffered. Only fatal errors (resource limits) travel as
//! `Err`; everything else becomes stderr text and an exit code at the
//! command that failed.

mod arithmetic;
mod expansion;
mod jobs;
pub(crate) mod pattern;
mod specials;
mod state;

pub use jobs::JobTable;
pub use state::{ControlFlow, ExecResult, ShellOptions, ShellState, Variable};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;

use crate::builtins::{Builtin, CommandRegistry, Context, resolve_path};
use crate::error::{Error, Result};
use crate::fs::{FileSystem, MountableFs, Volumes};
use crate::limits::{ExecutionCounters, ExecutionLimits};
use crate::network::HttpClient;
use crate::parser::{
    self, CaseTerminator, Command, CommandList, CompoundCommand, FunctionDef, ListOperator,
    Pipeline, Redirect, RedirectKind, Script, SimpleCommand, Word, WordPart,
};
use expansion::{ExpandError, ExpandResult};

/// Builtins whose `NAME=value` arguments are not field-split.
const DECLARATION_BUILTINS: &[&str] = &["export", "local", "readonly", "declare", "typeset"];

/// Free stack below which a command's poll moves to a fresh segment.
const STACK_RED_ZONE: usize = 512 * 1024;
/// Size of each extra stack segment.
const STACK_SEGMENT: usize = 4 * 1024 * 1024;

/// Callback receiving each top-level command's `(stdout, stderr)`.
pub type OutputCallback<'a> = &'a mut (dyn FnMut(&str, &str) + Send);

/// Standard input of the running command: the unread rest of a buffer.
///
/// `read` consumes it line by line; commands that read all of stdin drain it.
#[derive(Debug, Clone, Default)]
struct Input {
    data: String,
    pos: usize,
}

impl Input {
    fn new(data: String) -> Self {
        Self { data, pos: 0 }
    }

    fn rest(&self) -> &str {
        &self.data[self.pos..]
    }

    fn drain(&mut self) {
        self.pos = self.data.len();
    }

    /// Text up to `delim` (excluded) and whether the delimiter was found.
    /// `None` at end of input.
    fn read_until(&mut self, delim: char) -> Option<(String, bool)> {
        let rest = self.rest();
        if rest.is_empty() {
            return None;
        }
        let (line, consumed, found) = match rest.find(delim) {
            Some(i) => (rest[..i].to_string(), i + delim.len_utf8(), true),
            None => (rest.to_string(), rest.len(), false),
        };
        self.pos += consumed;
        Some((line, found))
    }

    /// Up to `count` characters, stopping after `delim`.
    fn read_chars(&mut self, count: usize, delim: char) -> Option<(String, bool)> {
        let rest = self.rest();
        if rest.is_empty() {
            return None;
        }
        let mut text = String::new();
        let mut consumed = 0;
        let mut found = false;
        for c in rest.chars().take(count) {
            consumed += c.len_utf8();
            if c == delim {
                found = true;
                break;
            }
            text.push(c);
        }
        self.pos += consumed;
        let full = found || text.chars().count() == count;
        Some((text, full))
    }
}

/// Polls a nested command on a grown stack when the current one runs low.
///
/// Each function call, subshell or substitution nests several poll frames.
struct GrowStack<'a, T> {
    inner: BoxFuture<'a, T>,
}

impl<T> Future for GrowStack<'_, T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<T> {
        let inner = &mut self.inner;
        stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || inner.as_mut().poll(cx))
    }
}

fn grow_stack<'a, T: 'a>(inner: BoxFuture<'a, T>) -> BoxFuture<'a, T> {
    Box::pin(GrowStack { inner })
}

/// Where a file descriptor's output ends up.
#[derive(Debug, Clone, PartialEq)]
enum Sink {
    /// The caller's stdout
    Stdout,
    /// The caller's stderr
    Stderr,
    /// Appended to a file (already created or truncated)
    File(PathBuf),
    Discard,
}

/// The effect of a command's redirections.
#[derive(Debug, Clone)]
struct Routing {
    fds: BTreeMap<u32, Sink>,
    stdin: Option<Input>,
}

impl Default for Routing {
    fn default() -> Self {
        Self {
            fds: BTreeMap::from([(1, Sink::Stdout), (2, Sink::Stderr)]),
            stdin: None,
        }
    }
}

/// Everything an [`Interpreter`] is built from.
pub(crate) struct InterpreterParts {
    pub fs: Arc<dyn FileSystem>,
    pub mounts: Option<Arc<MountableFs>>,
    pub volumes: Volumes,
    pub registry: Arc<CommandRegistry>,
    pub http_client: Option<HttpClient>,
    pub limits: ExecutionLimits,
    pub state: ShellState,
}

/// Interpreter state.
pub struct Interpreter {
    fs: Arc<dyn FileSystem>,
    mounts: Option<Arc<MountableFs>>,
    volumes: Volumes,
    registry: Arc<CommandRegistry>,
    http_client: Option<HttpClient>,
    limits: ExecutionLimits,
    counters: ExecutionCounters,
    state: ShellState,
    stdin: Option<Input>,
    /// stderr of command substitutions in the words being expanded
    expansion_stderr: String,
    /// Status of the last command substitution of the current command
    last_subst_status: Option<i32>,
    loop_depth: usize,
    /// Nesting of `if`/`while` tests, `&&`/`||` left sides and `!`
    condition_depth: usize,
    source_depth: usize,
    random_state: u32,
}

impl Interpreter {
    pub(crate) fn new(parts: InterpreterParts) -> Self {
        Self {
            fs: parts.fs,
            mounts: parts.mounts,
            volumes: parts.volumes,
            registry: parts.registry,
            http_client: parts.http_client,
            limits: parts.limits,
            counters: ExecutionCounters::new(),
            state: parts.state,
            stdin: None,
            expansion_stderr: String::new(),
            last_subst_status: None,
            loop_depth: 0,
            condition_depth: 0,
            source_depth: 0,
            random_state: 0x2545_f491,
        }
    }

    pub fn state(&self) -> &ShellState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ShellState {
        &mut self.state
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Counters of the last (or running) execution.
    pub fn counters(&self) -> &ExecutionCounters {
        &self.counters
    }

    /// Execute a parsed script with fresh counters.
    ///
    /// `on_output` receives the output of each top-level command as it
    /// completes.
    pub async fn execute(
        &mut self,
        script: &Script,
        mut on_output: Option<OutputCallback<'_>>,
    ) -> Result<ExecResult> {
        self.counters.start(&self.limits);
        self.stdin = None;
        self.loop_depth = 0;
        self.condition_depth = 0;
        self.source_depth = 0;

        let mut acc = ExecResult::default();
        for command in &script.commands {
            let result = self
                .execute_command(command)
                .await
                .map_err(|e| e.with_prior_output(&acc.stdout, &acc.stderr))?;
            if let Some(callback) = on_output.as_deref_mut() {
                callback(&result.stdout, &result.stderr);
            }
            acc.absorb(result);
            if let ControlFlow::Exit(code) = acc.control_flow {
                acc.exit_code = code;
                break;
            }
        }
        acc.control_flow = ControlFlow::Normal;
        self.state.last_status = acc.exit_code;
        Ok(acc)
    }

    fn resolve(&self, path: &str) -> PathBuf {
        resolve_path(self.state.cwd(), path)
    }

    pub(crate) fn execute_commands<'a>(
        &'a mut self,
        commands: &'a [Command],
    ) -> BoxFuture<'a, Result<ExecResult>> {
        Box::pin(async move {
            let mut acc = ExecResult::default();
            for command in commands {
                let result = self
                    .execute_command(command)
                    .await
                    .map_err(|e| e.with_prior_output(&acc.stdout, &acc.stderr))?;
                acc.absorb(result);
                if acc.control_flow != ControlFlow::Normal {
                    break;
                }
            }
            Ok(acc)
        })
    }

    /// Run commands as a test: failures there never trigger `set -e`.
    async fn execute_condition(&mut self, commands: &[Command]) -> Result<ExecResult> {
        self.condition_depth += 1;
        let result = self.execute_commands(commands).await;
        self.condition_depth -= 1;
        result
    }

    fn execute_command<'a>(&'a mut self, command: &'a Command) -> BoxFuture<'a, Result<ExecResult>> {
        grow_stack(Box::pin(async move {
            let mut result = match command {
                Command::Simple(cmd) => self.execute_simple(cmd).await?,
                Command::Pipeline(pipeline) => self.execute_pipeline(pipeline).await?,
                Command::List(list) => self.execute_list(list).await?,
                Command::Compound(compound, redirects) => {
                    self.execute_compound_redirected(compound, redirects).await?
                }
                Command::Function(def) => {
                    self.state
                        .functions
                        .insert(def.name.clone(), Arc::new(def.clone()));
                    ExecResult::default()
                }
            };
            self.state.last_status = result.exit_code;

            let errexit_applies = match command {
                Command::Simple(_) => true,
                Command::Pipeline(p) => !p.negated,
                Command::Compound(c, _) => {
                    matches!(c, CompoundCommand::Subshell(_) | CompoundCommand::Arithmetic(_))
                }
                _ => false,
            };
            if errexit_applies
                && self.state.options.errexit
                && self.condition_depth == 0
                && result.exit_code != 0
                && result.control_flow == ControlFlow::Normal
            {
                result.control_flow = ControlFlow::Exit(result.exit_code);
            }
            Ok(result)
        }))
    }

    /// Turn an expansion or redirection failure into the command's result.
    fn expansion_failure(&mut self, error: ExpandError) -> Result<ExecResult> {
        let prior = std::mem::take(&mut self.expansion_stderr);
        match error {
            ExpandError::Failed(msg) => Ok(ExecResult::err(format!("{prior}sandbash: {msg}\n"), 1)),
            ExpandError::Abort(msg) => Ok(ExecResult {
                stderr: format!("{prior}sandbash: {msg}\n"),
                exit_code: 1,
                control_flow: ControlFlow::Exit(1),
                ..ExecResult::default()
            }),
            ExpandError::Fatal(e) if e.is_fatal() => Err(e.with_prior_output("", &prior)),
            ExpandError::Fatal(e) => Ok(ExecResult::err(format!("{prior}sandbash: {e}\n"), 1)),
        }
    }

    // -- simple commands ---------------------------------------------------

    async fn execute_simple(&mut self, cmd: &SimpleCommand) -> Result<ExecResult> {
        self.counters.tick_command(&self.limits)?;
        self.last_subst_status = None;
        self.expansion_stderr.clear();

        let fields = match self.expand_command_words(cmd).await {
            Ok(fields) => fields,
            Err(e) => return self.expansion_failure(e),
        };
        let mut assigned = Vec::with_capacity(cmd.assignments.len());
        for assignment in &cmd.assignments {
            match self.expand_word_to_string(&assignment.value).await {
                Ok(value) => {
                    let value = if assignment.append {
                        format!("{}{value}", self.state.get(&assignment.name).unwrap_or_default())
                    } else {
                        value
                    };
                    self.counters
                        .check_string_length(value.len(), &self.limits)?;
                    assigned.push((assignment.name.as_str(), value));
                }
                Err(e) => return self.expansion_failure(e),
            }
        }
        let routing = match self.open_redirects(&cmd.redirects).await {
            Ok(routing) => routing,
            Err(e) => return self.expansion_failure(e),
        };
        let mut prior = std::mem::take(&mut self.expansion_stderr);

        if fields.is_empty() {
            let mut result = ExecResult::with_code("", self.last_subst_status.unwrap_or(0));
            for (name, value) in assigned {
                if self.state.options.xtrace {
                    prior.push_str(&format!("+ {name}={}\n", trace_word(&value)));
                }
                if let Err(msg) = self.state.set(name, value) {
                    result = ExecResult::err(format!("sandbash: {msg}\n"), 1);
                    break;
                }
            }
            let mut result = self.route(&routing, result).await?;
            result.stderr.insert_str(0, &prior);
            return Ok(result);
        }

        // `NAME=value cmd`: visible to cmd only
        let mut saved_vars = Vec::with_capacity(assigned.len());
        for (name, value) in assigned {
            if self.state.variable(name).is_some_and(|v| v.readonly) {
                self.restore_variables(saved_vars);
                return Ok(ExecResult::err(
                    format!("{prior}sandbash: {name}: readonly variable\n"),
                    1,
                ));
            }
            let var = Variable {
                value,
                exported: true,
                readonly: false,
            };
            saved_vars.push((name.to_string(), self.state.replace_variable(name, Some(var))));
        }

        if self.state.options.xtrace {
            let line: Vec<String> = fields.iter().map(|f| trace_word(f)).collect();
            prior.push_str(&format!("+ {}\n", line.join(" ")));
        }

        let saved_stdin = routing
            .stdin
            .clone()
            .map(|input| std::mem::replace(&mut self.stdin, Some(input)));
        let outcome = self.dispatch(&fields, false).await;
        if let Some(previous) = saved_stdin {
            self.stdin = previous;
        }
        self.restore_variables(saved_vars);

        let result = outcome.map_err(|e| e.with_prior_output("", &prior))?;
        let mut result = self.route(&routing, result).await?;
        result.stderr.insert_str(0, &prior);
        Ok(result)
    }

    fn restore_variables(&mut self, saved: Vec<(String, Option<Variable>)>) {
        for (name, old) in saved.into_iter().rev() {
            self.state.replace_variable(&name, old);
        }
    }

    async fn expand_command_words(&mut self, cmd: &SimpleCommand) -> ExpandResult<Vec<String>> {
        let Some(name) = &cmd.name else {
            return Ok(Vec::new());
        };
        let mut fields = self.expand_word(name).await?;
        let declaration = fields
            .first()
            .is_some_and(|n| DECLARATION_BUILTINS.contains(&n.as_str()));
        for arg in &cmd.args {
            if declaration && is_assignment_word(arg) {
                fields.push(self.expand_word_to_string(arg).await?);
            } else {
                fields.extend(self.expand_word(arg).await?);
            }
        }
        Ok(fields)
    }

    /// Find and run a command: functions, then shell builtins, then the
    /// registry, then scripts by path.
    fn dispatch<'a>(
        &'a mut self,
        fields: &'a [String],
        skip_functions: bool,
    ) -> BoxFuture<'a, Result<ExecResult>> {
        Box::pin(async move {
            let Some((name, args)) = fields.split_first() else {
                return Ok(ExecResult::default());
            };

            #[cfg(feature = "logging")]
            tracing::debug!(target: "sandbash::interpreter", command = %name, args = args.len(), "dispatch");

            if !skip_functions && let Some(def) = self.state.functions.get(name).cloned() {
                return self.call_function(def, args).await;
            }
            if let Some(result) = self.run_special(name, args).await? {
                return Ok(result);
            }
            if let Some(builtin) = self.registry.get(name) {
                return self.run_builtin(name, builtin, args).await;
            }
            if name.contains('/') {
                return self.run_script_file(name, args).await;
            }
            Ok(ExecResult::err(
                format!("sandbash: {name}: command not found\n"),
                127,
            ))
        })
    }

    async fn run_builtin(
        &mut self,
        name: &str,
        builtin: Arc<dyn Builtin>,
        args: &[String],
    ) -> Result<ExecResult> {
        let env = self.state.env();
        let ctx = Context {
            args,
            env: &env,
            cwd: self.state.cwd(),
            fs: Arc::clone(&self.fs),
            stdin: self.stdin.as_ref().map(Input::rest),
            limits: &self.limits,
            counters: &self.counters,
            mounts: self.mounts.as_deref(),
            volumes: &self.volumes,
            http_client: self.http_client.as_ref(),
        };
        let outcome = AssertUnwindSafe(builtin.execute(ctx)).catch_unwind().await;
        if builtin.reads_stdin()
            && let Some(input) = self.stdin.as_mut()
        {
            input.drain();
        }

        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) if e.is_fatal() => {
                #[cfg(feature = "logging")]
                tracing::warn!(target: "sandbash::limits", command = %name, error = %e, "limit exceeded");
                Err(e)
            }
            Ok(Err(Error::Fs(e))) => Ok(ExecResult::err(
                format!("{name}: {}\n", e.describe(&e.path.to_string_lossy())),
                1,
            )),
            Ok(Err(e)) => Ok(ExecResult::err(format!("{name}: {e}\n"), 1)),
            Err(_) => {
                #[cfg(feature = "logging")]
                tracing::error!(target: "sandbash::interpreter", command = %name, "builtin panicked");
                let error = Error::Internal(format!("{name} crashed"));
                Ok(ExecResult::err(format!("sandbash: {error}\n"), 1))
            }
        }
    }

    async fn call_function(&mut self, def: Arc<FunctionDef>, args: &[String]) -> Result<ExecResult> {
        self.counters.push_function(&self.limits)?;
        self.state.push_frame();
        let saved_positional = std::mem::replace(&mut self.state.positional, args.to_vec());

        let result = self.execute_command(&def.body).await;

        self.state.positional = saved_positional;
        self.state.pop_frame();
        self.counters.pop_function();

        let mut result = result?;
        if let ControlFlow::Return(code) = result.control_flow {
            result.exit_code = code;
            result.control_flow = ControlFlow::Normal;
        }
        Ok(result)
    }

    /// `./script.sh args`: read from the filesystem and run in a subshell.
    async fn run_script_file(&mut self, name: &str, args: &[String]) -> Result<ExecResult> {
        let path = self.resolve(name);
        match self.fs.stat(&path).await {
            Ok(meta) if meta.file_type.is_dir() => {
                return Ok(ExecResult::err(format!("sandbash: {name}: Is a directory\n"), 126));
            }
            Ok(_) => {}
            Err(e) => {
                return Ok(ExecResult::err(format!("sandbash: {}\n", e.describe(name)), 127));
            }
        }
        let text = match self.fs.read_file(&path).await {
            Ok(data) => {
                self.counters
                    .check_string_length(data.len(), &self.limits)?;
                String::from_utf8_lossy(&data).into_owned()
            }
            Err(e) => return Ok(ExecResult::err(format!("sandbash: {}\n", e.describe(name)), 126)),
        };
        let script = match parser::Parser::new(&text).parse() {
            Ok(script) => script,
            Err(e) => return Ok(ExecResult::err(format!("sandbash: {name}: {e}\n"), 2)),
        };

        self.counters.push_function(&self.limits)?;
        let saved = self.state.clone();
        let saved_loops = std::mem::take(&mut self.loop_depth);
        self.state.positional = args.to_vec();
        self.state.script_name = name.to_string();
        let result = self.execute_commands(&script.commands).await;
        self.state = saved;
        self.loop_depth = saved_loops;
        self.counters.pop_function();

        Ok(leave_subshell(result?))
    }

    // -- pipelines and lists -----------------------------------------------

    async fn execute_pipeline(&mut self, pipeline: &Pipeline) -> Result<ExecResult> {
        if pipeline.negated {
            self.condition_depth += 1;
        }
        let result = self.run_pipeline_stages(&pipeline.commands).await;
        if pipeline.negated {
            self.condition_depth -= 1;
        }
        let mut result = result?;
        if pipeline.negated {
            result.exit_code = i32::from(result.exit_code == 0);
        }
        Ok(result)
    }

    async fn run_pipeline_stages(&mut self, stages: &[Command]) -> Result<ExecResult> {
        if let [only] = stages {
            return self.execute_command(only).await;
        }

        let mut stderr = String::new();
        let mut piped = String::new();
        let mut statuses = Vec::with_capacity(stages.len());
        let mut outer_stdin = None;

        for (i, stage) in stages.iter().enumerate() {
            let last = i + 1 == stages.len();
            if i > 0 {
                self.stdin = Some(Input::new(std::mem::take(&mut piped)));
            }
            let outcome = if last {
                self.execute_command(stage).await
            } else {
                // every stage but the last sees a copy of the shell state
                let saved = self.state.clone();
                let outcome = self.execute_command(stage).await;
                self.state = saved;
                outcome
            };
            if i == 0 {
                outer_stdin = self.stdin.take();
            }
            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    self.stdin = outer_stdin;
                    return Err(e.with_prior_output("", &stderr));
                }
            };
            let result = leave_subshell(result);
            stderr.push_str(&result.stderr);
            statuses.push(result.exit_code);
            piped = result.stdout;
        }
        self.stdin = outer_stdin;

        let last_status = statuses.last().copied().unwrap_or(0);
        let exit_code = if self.state.options.pipefail {
            statuses.iter().copied().find(|s| *s != 0).unwrap_or(0)
        } else {
            last_status
        };
        Ok(ExecResult {
            stdout: piped,
            stderr,
            exit_code,
            control_flow: ControlFlow::Normal,
        })
    }

    async fn execute_list(&mut self, list: &CommandList) -> Result<ExecResult> {
        if !list.background {
            return self.run_and_or(list).await;
        }
        // `cmd &` completes before the next command; only the job record
        // survives the subshell
        let saved = self.state.clone();
        let saved_loops = std::mem::take(&mut self.loop_depth);
        let outcome = self.run_and_or(list).await;
        self.state = saved;
        self.loop_depth = saved_loops;
        let result = leave_subshell(outcome?);
        let job = self.state.jobs.record(result.exit_code);

        #[cfg(feature = "logging")]
        tracing::debug!(target: "sandbash::interpreter", job, status = result.exit_code, "background job finished");
        #[cfg(not(feature = "logging"))]
        let _ = job;

        Ok(ExecResult {
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: 0,
            control_flow: ControlFlow::Normal,
        })
    }

    async fn run_and_or(&mut self, list: &CommandList) -> Result<ExecResult> {
        let mut acc = if list.rest.is_empty() {
            self.execute_command(&list.first).await?
        } else {
            self.execute_condition(std::slice::from_ref(list.first.as_ref()))
                .await?
        };
        for (i, (op, command)) in list.rest.iter().enumerate() {
            if acc.control_flow != ControlFlow::Normal {
                break;
            }
            let run = match op {
                ListOperator::And => acc.exit_code == 0,
                ListOperator::Or => acc.exit_code != 0,
            };
            if !run {
                continue;
            }
            let outcome = if i + 1 == list.rest.len() {
                self.execute_command(command).await
            } else {
                self.execute_condition(std::slice::from_ref(command)).await
            };
            let result = outcome.map_err(|e| e.with_prior_output(&acc.stdout, &acc.stderr))?;
            acc.absorb(result);
        }
        Ok(acc)
    }

    // -- compound commands -------------------------------------------------

    async fn execute_compound_redirected(
        &mut self,
        compound: &CompoundCommand,
        redirects: &[Redirect],
    ) -> Result<ExecResult> {
        if redirects.is_empty() {
            return self.execute_compound(compound).await;
        }
        let routing = match self.open_redirects(redirects).await {
            Ok(routing) => routing,
            Err(e) => return self.expansion_failure(e),
        };
        let prior = std::mem::take(&mut self.expansion_stderr);
        let saved_stdin = routing
            .stdin
            .clone()
            .map(|input| std::mem::replace(&mut self.stdin, Some(input)));
        let outcome = self.execute_compound(compound).await;
        if let Some(previous) = saved_stdin {
            self.stdin = previous;
        }
        let mut result = self.route(&routing, outcome?).await?;
        result.stderr.insert_str(0, &prior);
        Ok(result)
    }

    async fn execute_compound(&mut self, compound: &CompoundCommand) -> Result<ExecResult> {
        match compound {
            CompoundCommand::If(cmd) => {
                let mut acc = ExecResult::default();
                let branches = std::iter::once((&cmd.condition, &cmd.then_branch))
                    .chain(cmd.elif_branches.iter().map(|(c, b)| (c, b)));
                for (condition, body) in branches {
                    let test = self.execute_condition(condition).await?;
                    append_output(&mut acc, &test);
                    if test.control_flow != ControlFlow::Normal {
                        acc.control_flow = test.control_flow;
                        acc.exit_code = test.exit_code;
                        return Ok(acc);
                    }
                    if test.exit_code == 0 {
                        let result = self
                            .execute_commands(body)
                            .await
                            .map_err(|e| e.with_prior_output(&acc.stdout, &acc.stderr))?;
                        acc.absorb(result);
                        return Ok(acc);
                    }
                }
                if let Some(body) = &cmd.else_branch {
                    let result = self
                        .execute_commands(body)
                        .await
                        .map_err(|e| e.with_prior_output(&acc.stdout, &acc.stderr))?;
                    acc.absorb(result);
                }
                Ok(acc)
            }
            CompoundCommand::For(cmd) => {
                let items = match &cmd.words {
                    Some(words) => match self.expand_words(words).await {
                        Ok(items) => items,
                        Err(e) => return self.expansion_failure(e),
                    },
                    None => self.state.positional.clone(),
                };
                let saved = self.enter_loop();
                let result = self.run_for(&cmd.variable, items, &cmd.body).await;
                self.exit_loop(saved);
                result
            }
            CompoundCommand::ArithFor(cmd) => {
                let saved = self.enter_loop();
                let result = self
                    .run_arith_for(&cmd.init, &cmd.condition, &cmd.step, &cmd.body)
                    .await;
                self.exit_loop(saved);
                result
            }
            CompoundCommand::While(cmd) => {
                let saved = self.enter_loop();
                let result = self.run_while(&cmd.condition, &cmd.body, false).await;
                self.exit_loop(saved);
                result
            }
            CompoundCommand::Until(cmd) => {
                let saved = self.enter_loop();
                let result = self.run_while(&cmd.condition, &cmd.body, true).await;
                self.exit_loop(saved);
                result
            }
            CompoundCommand::Case(cmd) => {
                let subject = match self.expand_word_to_string(&cmd.word).await {
                    Ok(subject) => subject,
                    Err(e) => return self.expansion_failure(e),
                };
                let mut acc = ExecResult::default();
                let mut fall_through = false;
                for item in &cmd.cases {
                    if !fall_through {
                        let mut matched = false;
                        for pattern in &item.patterns {
                            match self.expand_pattern(pattern).await {
                                Ok(p) if pattern::matches(&p, &subject) => {
                                    matched = true;
                                    break;
                                }
                                Ok(_) => {}
                                Err(e) => return self.expansion_failure(e),
                            }
                        }
                        if !matched {
                            continue;
                        }
                    }
                    let result = self
                        .execute_commands(&item.commands)
                        .await
                        .map_err(|e| e.with_prior_output(&acc.stdout, &acc.stderr))?;
                    acc.absorb(result);
                    if acc.control_flow != ControlFlow::Normal {
                        break;
                    }
                    match item.terminator {
                        CaseTerminator::Break => break,
                        CaseTerminator::FallThrough => fall_through = true,
                        CaseTerminator::Continue => fall_through = false,
                    }
                }
                Ok(acc)
            }
            CompoundCommand::Subshell(commands) => {
                self.counters.push_function(&self.limits)?;
                let saved = self.state.clone();
                let saved_loops = std::mem::take(&mut self.loop_depth);
                let result = self.execute_commands(commands).await;
                self.state = saved;
                self.loop_depth = saved_loops;
                self.counters.pop_function();
                Ok(leave_subshell(result?))
            }
            CompoundCommand::BraceGroup(commands) => self.execute_commands(commands).await,
            CompoundCommand::Arithmetic(expr) => {
                self.counters.tick_command(&self.limits)?;
                match self.eval_arithmetic(expr).await {
                    Ok(value) => Ok(ExecResult::with_code("", i32::from(value == 0))),
                    Err(e) => self.expansion_failure(e),
                }
            }
        }
    }

    /// Start a loop with its own iteration count.
    fn enter_loop(&mut self) -> usize {
        self.loop_depth += 1;
        self.counters.enter_loop()
    }

    /// Restore the enclosing loop's iteration count.
    fn exit_loop(&mut self, saved: usize) {
        self.loop_depth -= 1;
        self.counters.exit_loop(saved);
    }

    async fn run_for(&mut self, variable: &str, items: Vec<String>, body: &[Command]) -> Result<ExecResult> {
        let mut acc = ExecResult::default();
        for item in items {
            self.tick_loop(&acc)?;
            if let Err(msg) = self.state.set(variable, item) {
                acc.stderr.push_str(&format!("sandbash: {msg}\n"));
                acc.exit_code = 1;
                break;
            }
            if self.loop_body(body, &mut acc).await? {
                break;
            }
        }
        Ok(acc)
    }

    async fn run_arith_for(
        &mut self,
        init: &str,
        condition: &str,
        step: &str,
        body: &[Command],
    ) -> Result<ExecResult> {
        let mut acc = ExecResult::default();
        if let Err(e) = self.eval_arithmetic(init).await {
            return self.expansion_failure(e);
        }
        loop {
            self.tick_loop(&acc)?;
            if !condition.trim().is_empty() {
                match self.eval_arithmetic(condition).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => return self.loop_failure(acc, e),
                }
            }
            if self.loop_body(body, &mut acc).await? {
                break;
            }
            if let Err(e) = self.eval_arithmetic(step).await {
                return self.loop_failure(acc, e);
            }
        }
        Ok(acc)
    }

    async fn run_while(&mut self, condition: &[Command], body: &[Command], until: bool) -> Result<ExecResult> {
        let mut acc = ExecResult::default();
        loop {
            self.tick_loop(&acc)?;
            let test = self
                .execute_condition(condition)
                .await
                .map_err(|e| e.with_prior_output(&acc.stdout, &acc.stderr))?;
            append_output(&mut acc, &test);
            if test.control_flow != ControlFlow::Normal {
                let mut test = test;
                test.stdout.clear();
                test.stderr.clear();
                if self.loop_control(&mut test) {
                    acc.control_flow = test.control_flow;
                    break;
                }
                continue;
            }
            if (test.exit_code == 0) == until {
                break;
            }
            if self.loop_body(body, &mut acc).await? {
                break;
            }
        }
        Ok(acc)
    }

    fn tick_loop(&mut self, acc: &ExecResult) -> Result<()> {
        self.counters.tick_loop(&self.limits).map_err(|limit| {
            #[cfg(feature = "logging")]
            tracing::warn!(target: "sandbash::limits", %limit, "loop limit exceeded");
            Error::from(limit).with_prior_output(&acc.stdout, &acc.stderr)
        })
    }

    fn loop_failure(&mut self, mut acc: ExecResult, error: ExpandError) -> Result<ExecResult> {
        let failure = self.expansion_failure(error)?;
        acc.absorb(failure);
        Ok(acc)
    }

    /// Run one iteration. Returns true when the loop must stop.
    async fn loop_body(&mut self, body: &[Command], acc: &mut ExecResult) -> Result<bool> {
        let mut result = self
            .execute_commands(body)
            .await
            .map_err(|e| e.with_prior_output(&acc.stdout, &acc.stderr))?;
        let stop = self.loop_control(&mut result);
        acc.absorb(result);
        Ok(stop)
    }

    /// Consume the loop's share of a `break`/`continue`. Returns true when
    /// the loop must stop.
    fn loop_control(&mut self, result: &mut ExecResult) -> bool {
        match result.control_flow {
            ControlFlow::Normal => false,
            ControlFlow::Break(n) => {
                result.control_flow = if n > 1 {
                    ControlFlow::Break(n - 1)
                } else {
                    ControlFlow::Normal
                };
                true
            }
            ControlFlow::Continue(n) if n > 1 => {
                result.control_flow = ControlFlow::Continue(n - 1);
                true
            }
            ControlFlow::Continue(_) => {
                result.control_flow = ControlFlow::Normal;
                false
            }
            ControlFlow::Return(_) | ControlFlow::Exit(_) => true,
        }
    }

    // -- redirections ------------------------------------------------------

    async fn open_redirects(&mut self, redirects: &[Redirect]) -> ExpandResult<Routing> {
        let mut routing = Routing::default();
        for redirect in redirects {
            match &redirect.kind {
                RedirectKind::Output(word) | RedirectKind::Clobber(word) | RedirectKind::Append(word) => {
                    let append = matches!(redirect.kind, RedirectKind::Append(_));
                    let target = self.expand_word_to_string(word).await?;
                    let sink = self.open_sink(&target, append, &routing).await?;
                    routing.fds.insert(redirect.fd.unwrap_or(1), sink);
                }
                RedirectKind::OutputBoth(word) | RedirectKind::AppendBoth(word) => {
                    let append = matches!(redirect.kind, RedirectKind::AppendBoth(_));
                    let target = self.expand_word_to_string(word).await?;
                    let sink = self.open_sink(&target, append, &routing).await?;
                    routing.fds.insert(1, sink.clone());
                    routing.fds.insert(2, sink);
                }
                RedirectKind::DupOutput(word) => {
                    let fd = redirect.fd.unwrap_or(1);
                    let target = self.expand_word_to_string(word).await?;
                    if target == "-" {
                        routing.fds.insert(fd, Sink::Discard);
                    } else if let Ok(source) = target.parse::<u32>() {
                        let sink = routing
                            .fds
                            .get(&source)
                            .cloned()
                            .ok_or_else(|| ExpandError::Failed(format!("{source}: Bad file descriptor")))?;
                        routing.fds.insert(fd, sink);
                    } else if redirect.fd.is_none() {
                        // `>&file` is `&>file`
                        let sink = self.open_sink(&target, false, &routing).await?;
                        routing.fds.insert(1, sink.clone());
                        routing.fds.insert(2, sink);
                    } else {
                        return Err(ExpandError::Failed(format!("{target}: ambiguous redirect")));
                    }
                }
                RedirectKind::Input(word) => {
                    let target = self.expand_word_to_string(word).await?;
                    let text = match target.as_str() {
                        "/dev/stdin" => continue,
                        "/dev/null" => String::new(),
                        _ => {
                            let data = self
                                .fs
                                .read_file(&self.resolve(&target))
                                .await
                                .map_err(|e| ExpandError::Failed(e.describe(&target)))?;
                            self.counters
                                .check_string_length(data.len(), &self.limits)?;
                            String::from_utf8_lossy(&data).into_owned()
                        }
                    };
                    if redirect.fd.unwrap_or(0) == 0 {
                        routing.stdin = Some(Input::new(text));
                    }
                }
                RedirectKind::DupInput(word) => {
                    let target = self.expand_word_to_string(word).await?;
                    if target == "-" && redirect.fd.unwrap_or(0) == 0 {
                        routing.stdin = Some(Input::default());
                    }
                }
                RedirectKind::HereString(word) => {
                    let mut text = self.expand_word_to_string(word).await?;
                    text.push('\n');
                    if redirect.fd.unwrap_or(0) == 0 {
                        routing.stdin = Some(Input::new(text));
                    }
                }
                RedirectKind::HereDoc(doc) => {
                    let text = if doc.quoted {
                        doc.body
                            .parts
                            .iter()
                            .map(|part| match part {
                                WordPart::Literal(s) | WordPart::Quoted(s) => s.as_str(),
                                _ => "",
                            })
                            .collect()
                    } else {
                        self.expand_heredoc(&doc.body).await?
                    };
                    if redirect.fd.unwrap_or(0) == 0 {
                        routing.stdin = Some(Input::new(text));
                    }
                }
            }
        }
        Ok(routing)
    }

    /// Create or truncate an output target.
    async fn open_sink(&mut self, target: &str, append: bool, routing: &Routing) -> ExpandResult<Sink> {
        match target {
            "" => Err(ExpandError::Failed(": No such file or directory".into())),
            "/dev/null" => Ok(Sink::Discard),
            "/dev/stdout" => Ok(routing.fds.get(&1).cloned().unwrap_or(Sink::Discard)),
            "/dev/stderr" => Ok(routing.fds.get(&2).cloned().unwrap_or(Sink::Discard)),
            _ => {
                let path = self.resolve(target);
                let opened = if append {
                    self.fs.append_file(&path, b"").await
                } else {
                    self.fs.write_file(&path, b"").await
                };
                opened.map_err(|e| ExpandError::Failed(e.describe(target)))?;
                Ok(Sink::File(path))
            }
        }
    }

    /// Deliver a command's output according to its redirections.
    async fn route(&mut self, routing: &Routing, result: ExecResult) -> Result<ExecResult> {
        let ExecResult {
            stdout,
            stderr,
            exit_code,
            control_flow,
        } = result;
        let mut out = ExecResult {
            exit_code,
            control_flow,
            ..ExecResult::default()
        };
        for (fd, text) in [(1, stdout), (2, stderr)] {
            if text.is_empty() {
                continue;
            }
            match routing.fds.get(&fd).unwrap_or(&Sink::Discard) {
                Sink::Stdout => out.stdout.push_str(&text),
                Sink::Stderr => out.stderr.push_str(&text),
                Sink::Discard => {}
                Sink::File(path) => {
                    self.counters
                        .check_string_length(text.len(), &self.limits)?;
                    if let Err(e) = self.fs.append_file(path, text.as_bytes()).await {
                        let shown = path.to_string_lossy();
                        out.stderr.push_str(&format!("sandbash: {}\n", e.describe(&shown)));
                        out.exit_code = 1;
                    }
                }
            }
        }
        Ok(out)
    }
}

/// A subshell's `exit` ends only the subshell; loop and function unwinding
/// stops at its boundary too.
fn leave_subshell(mut result: ExecResult) -> ExecResult {
    match result.control_flow {
        ControlFlow::Exit(code) | ControlFlow::Return(code) => result.exit_code = code,
        _ => {}
    }
    result.control_flow = ControlFlow::Normal;
    result
}

fn append_output(acc: &mut ExecResult, other: &ExecResult) {
    acc.stdout.push_str(&other.stdout);
    acc.stderr.push_str(&other.stderr);
}

/// `NAME=...` or `NAME+=...` with a literal name.
fn is_assignment_word(word: &Word) -> bool {
    let Some(WordPart::Literal(text)) = word.parts.first() else {
        return false;
    };
    match text.find('=') {
        Some(eq) => parser::is_identifier(text[..eq].strip_suffix('+').unwrap_or(&text[..eq])),
        None => false,
    }
}

/// Quote a field for `set -x` output.
fn trace_word(field: &str) -> String {
    let plain = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%^".contains(c));
    if plain {
        field.to_string()
    } else {
        expansion::single_quote(field)
    }
}
