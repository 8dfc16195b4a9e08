//! Interpreter state types

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::jobs::JobTable;
use crate::parser::FunctionDef;

/// How a command finished, beyond its exit code.
///
/// Travels with [`ExecResult`] up the call stack until the construct it
/// targets (a loop, a function, the script) consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlFlow {
    #[default]
    Normal,
    /// `break N`: unwind N enclosing loops
    Break(u32),
    /// `continue N`
    Continue(u32),
    /// `return N` from a function or sourced file
    Return(i32),
    /// `exit N` from the script or the enclosing subshell
    Exit(i32),
}

/// Result of executing a bash script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecResult {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code
    pub exit_code: i32,
    /// Pending control-flow unwinding
    pub control_flow: ControlFlow,
}

impl ExecResult {
    /// Create a successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// Create a failed result with the given stderr.
    pub fn err(stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code,
            ..Self::default()
        }
    }

    /// Create a result with stdout and an explicit exit code.
    pub fn with_code(stdout: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code,
            ..Self::default()
        }
    }

    /// Check if the result indicates success.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Append another result's output, taking over its status.
    pub(crate) fn absorb(&mut self, other: ExecResult) {
        self.stdout.push_str(&other.stdout);
        self.stderr.push_str(&other.stderr);
        self.exit_code = other.exit_code;
        self.control_flow = other.control_flow;
    }
}

/// A shell variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub value: String,
    pub exported: bool,
    pub readonly: bool,
}

impl Variable {
    fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            exported: false,
            readonly: false,
        }
    }
}

/// `set -e`, `set -o pipefail` and friends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShellOptions {
    pub errexit: bool,
    pub nounset: bool,
    pub pipefail: bool,
    pub xtrace: bool,
    pub noglob: bool,
}

impl ShellOptions {
    /// Toggle a single-letter option. Returns false for unknown letters.
    pub fn set_short(&mut self, flag: char, on: bool) -> bool {
        match flag {
            'e' => self.errexit = on,
            'u' => self.nounset = on,
            'x' => self.xtrace = on,
            'f' => self.noglob = on,
            _ => return false,
        }
        true
    }

    /// Toggle a `set -o NAME` option. Returns false for unknown names.
    pub fn set_long(&mut self, name: &str, on: bool) -> bool {
        match name {
            "errexit" => self.errexit = on,
            "nounset" => self.nounset = on,
            "pipefail" => self.pipefail = on,
            "xtrace" => self.xtrace = on,
            "noglob" => self.noglob = on,
            _ => return false,
        }
        true
    }

    /// Value of `$-`.
    pub fn flags(&self) -> String {
        let mut flags = String::from("h");
        for (on, ch) in [
            (self.errexit, 'e'),
            (self.noglob, 'f'),
            (self.nounset, 'u'),
            (self.xtrace, 'x'),
        ] {
            if on {
                flags.push(ch);
            }
        }
        flags.push('B');
        flags
    }

    /// `set -o` listing.
    pub fn listing(&self) -> String {
        [
            ("errexit", self.errexit),
            ("noglob", self.noglob),
            ("nounset", self.nounset),
            ("pipefail", self.pipefail),
            ("xtrace", self.xtrace),
        ]
        .iter()
        .map(|(name, on)| format!("{name:<15}\t{}\n", if *on { "on" } else { "off" }))
        .collect()
    }
}

/// Everything a script can change: variables, functions, cwd, options.
///
/// Subshells, command substitutions and non-final pipeline stages run on a
/// clone that is dropped afterwards.
#[derive(Debug, Clone)]
pub struct ShellState {
    cwd: PathBuf,
    variables: BTreeMap<String, Variable>,
    /// Saved outer values, one frame per active function call
    local_frames: Vec<HashMap<String, Option<Variable>>>,
    pub positional: Vec<String>,
    /// `$0`
    pub script_name: String,
    pub functions: HashMap<String, Arc<FunctionDef>>,
    /// `$?`
    pub last_status: i32,
    pub options: ShellOptions,
    pub jobs: JobTable,
}

fn readonly_error(name: &str) -> String {
    format!("{name}: readonly variable")
}

impl ShellState {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        let cwd = cwd.into();
        let mut state = Self {
            cwd: PathBuf::new(),
            variables: BTreeMap::new(),
            local_frames: Vec::new(),
            positional: Vec::new(),
            script_name: "sandbash".to_string(),
            functions: HashMap::new(),
            last_status: 0,
            options: ShellOptions::default(),
            jobs: JobTable::default(),
        };
        state.variables.insert("IFS".into(), Variable::new(" \t\n"));
        state.set_cwd(cwd);
        state
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Change directory, keeping `PWD` and `OLDPWD` in step.
    pub fn set_cwd(&mut self, cwd: PathBuf) {
        let old = std::mem::replace(&mut self.cwd, cwd);
        if !old.as_os_str().is_empty() {
            self.force("OLDPWD", old.to_string_lossy().into_owned());
        }
        let pwd = self.cwd.to_string_lossy().into_owned();
        self.force("PWD", pwd);
    }

    fn force(&mut self, name: &str, value: String) {
        match self.variables.get_mut(name) {
            Some(var) => var.value = value,
            None => {
                let mut var = Variable::new(value);
                var.exported = true;
                self.variables.insert(name.to_string(), var);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(|v| v.value.as_str())
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.variables.iter()
    }

    /// Assign a value, keeping the variable's export flag.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<(), String> {
        match self.variables.get_mut(name) {
            Some(var) if var.readonly => Err(readonly_error(name)),
            Some(var) => {
                var.value = value.into();
                Ok(())
            }
            None => {
                self.variables.insert(name.to_string(), Variable::new(value));
                Ok(())
            }
        }
    }

    /// `export NAME[=VALUE]`
    pub fn export(&mut self, name: &str, value: Option<String>) -> Result<(), String> {
        if let Some(value) = value {
            self.set(name, value)?;
        }
        self.variables
            .entry(name.to_string())
            .or_insert_with(|| Variable::new(""))
            .exported = true;
        Ok(())
    }

    /// `readonly NAME[=VALUE]`
    pub fn set_readonly(&mut self, name: &str, value: Option<String>) -> Result<(), String> {
        if let Some(value) = value {
            self.set(name, value)?;
        }
        self.variables
            .entry(name.to_string())
            .or_insert_with(|| Variable::new(""))
            .readonly = true;
        Ok(())
    }

    pub fn unset(&mut self, name: &str) -> Result<(), String> {
        if self.variables.get(name).is_some_and(|v| v.readonly) {
            return Err(format!("unset: {name}: cannot unset: readonly variable"));
        }
        self.variables.remove(name);
        Ok(())
    }

    /// Replace a variable wholesale, ignoring flags. Returns the old entry.
    ///
    /// Used to apply and later undo `NAME=value cmd` prefixes.
    pub fn replace_variable(&mut self, name: &str, var: Option<Variable>) -> Option<Variable> {
        match var {
            Some(var) => self.variables.insert(name.to_string(), var),
            None => self.variables.remove(name),
        }
    }

    /// Exported variables, as a command's environment.
    pub fn env(&self) -> HashMap<String, String> {
        self.variables
            .iter()
            .filter(|(_, v)| v.exported)
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    pub fn push_frame(&mut self) {
        self.local_frames.push(HashMap::new());
    }

    /// Leave a function call, restoring every variable it made local.
    pub fn pop_frame(&mut self) {
        if let Some(frame) = self.local_frames.pop() {
            for (name, saved) in frame {
                self.replace_variable(&name, saved);
            }
        }
    }

    pub fn in_function(&self) -> bool {
        !self.local_frames.is_empty()
    }

    /// `local NAME[=VALUE]`
    pub fn declare_local(&mut self, name: &str, value: Option<String>) -> Result<(), String> {
        let Some(frame) = self.local_frames.last_mut() else {
            return Err("local: can only be used in a function".to_string());
        };
        if self.variables.get(name).is_some_and(|v| v.readonly) {
            return Err(readonly_error(name));
        }
        if !frame.contains_key(name) {
            frame.insert(name.to_string(), self.variables.get(name).cloned());
        }
        match value {
            Some(value) => {
                self.variables.insert(name.to_string(), Variable::new(value));
            }
            None => {
                self.variables.remove(name);
            }
        }
        Ok(())
    }
}
