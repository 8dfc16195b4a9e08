//! Builtins that change shell state
//!
//! These need the interpreter itself (variables, positional parameters,
//! control flow, stdin position), so they never go through the
//! [`CommandRegistry`](crate::builtins::CommandRegistry).

use super::expansion::single_quote;
use super::{ControlFlow, ExecResult, Interpreter, Variable};
use crate::builtins::render_printf;
use crate::error::Result;
use crate::parser::{self, Parser};

/// Names handled here, in lookup order after functions.
pub(crate) const SPECIAL_BUILTINS: &[&str] = &[
    "break", "continue", "return", "exit", "eval", "source", ".", "local", "export", "unset",
    "readonly", "declare", "typeset", "set", "shift", "read", "cd", "wait", "exec", "let",
    "command", "type",
];

const KEYWORDS: &[&str] = &[
    "if", "then", "elif", "else", "fi", "for", "while", "until", "do", "done", "case", "esac",
    "in", "function", "{", "}", "!", "[[", "]]",
];

fn failure(message: impl std::fmt::Display, code: i32) -> ExecResult {
    ExecResult::err(format!("sandbash: {message}\n"), code)
}

/// `declare -x NAME="value"`
fn declare_line(name: &str, var: &Variable) -> String {
    let mut flags = String::new();
    if var.readonly {
        flags.push('r');
    }
    if var.exported {
        flags.push('x');
    }
    if flags.is_empty() {
        flags.push('-');
    }
    let mut escaped = String::with_capacity(var.value.len());
    for c in var.value.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("declare -{flags} {name}=\"{escaped}\"\n")
}

/// `NAME=value` or `NAME`.
fn split_assignment(arg: &str) -> (&str, Option<String>) {
    match arg.split_once('=') {
        Some((name, value)) => (name, Some(value.to_string())),
        None => (arg, None),
    }
}

/// Split a line read by `read` into `count` values; the last one keeps the
/// rest of the line.
fn split_fields(line: &str, ifs: &str, count: usize) -> Vec<String> {
    let is_ifs = |c: char| ifs.contains(c);
    let is_ws = |c: char| ifs.contains(c) && c.is_whitespace();
    let mut rest = line.trim_start_matches(is_ws);
    let mut values = Vec::with_capacity(count);
    while values.len() + 1 < count && !rest.is_empty() {
        let end = rest.find(is_ifs).unwrap_or(rest.len());
        values.push(rest[..end].to_string());
        rest = rest[end..].trim_start_matches(is_ws);
        if let Some(c) = rest.chars().next()
            && is_ifs(c)
        {
            rest = rest[c.len_utf8()..].trim_start_matches(is_ws);
        }
    }
    values.push(rest.trim_end_matches(is_ws).to_string());
    values.resize(count, String::new());
    values
}

/// Strip `read` backslash escapes.
fn unescape_read(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn ends_with_odd_backslashes(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

impl Interpreter {
    /// Run a state-changing builtin. `None` when `name` is not one.
    pub(super) async fn run_special(&mut self, name: &str, args: &[String]) -> Result<Option<ExecResult>> {
        let result = match name {
            "cd" => self.builtin_cd(args).await,
            "export" => self.builtin_export(args),
            "readonly" => self.builtin_readonly(args),
            "declare" | "typeset" => self.builtin_declare(name, args),
            "local" => self.builtin_local(args),
            "unset" => self.builtin_unset(args),
            "set" => self.builtin_set(args),
            "shift" => self.builtin_shift(args),
            "read" => self.builtin_read(args),
            "wait" => self.builtin_wait(args),
            "break" | "continue" => self.builtin_loop_control(name, args),
            "return" => self.builtin_return(args),
            "exit" => self.builtin_exit(args),
            "type" => self.builtin_type(args),
            "printf" if args.first().is_some_and(|a| a == "-v") => self.builtin_printf_var(args)?,
            "let" => self.builtin_let(args).await?,
            "eval" => self.builtin_eval(args).await?,
            "source" | "." => self.builtin_source(name, args).await?,
            "exec" => self.builtin_exec(args).await?,
            "command" => self.builtin_command(args).await?,
            _ => return Ok(None),
        };
        Ok(Some(result))
    }

    async fn builtin_cd(&mut self, args: &[String]) -> ExecResult {
        let args: Vec<&str> = args
            .iter()
            .map(String::as_str)
            .skip_while(|a| matches!(*a, "-L" | "-P"))
            .collect();
        let (target, print) = match args.as_slice() {
            [] => match self.state.get("HOME") {
                Some(home) => (home.to_string(), false),
                None => return failure("cd: HOME not set", 1),
            },
            ["-"] => match self.state.get("OLDPWD") {
                Some(old) => (old.to_string(), true),
                None => return failure("cd: OLDPWD not set", 1),
            },
            [dir] => (dir.to_string(), false),
            _ => return failure("cd: too many arguments", 1),
        };
        let path = self.resolve(&target);
        match self.fs.stat(&path).await {
            Ok(meta) if meta.file_type.is_dir() => {
                let shown = format!("{}\n", path.display());
                self.state.set_cwd(path);
                ExecResult::ok(if print { shown } else { String::new() })
            }
            Ok(_) => failure(format!("cd: {target}: Not a directory"), 1),
            Err(e) => failure(format!("cd: {}", e.describe(&target)), 1),
        }
    }

    fn listing(&self, filter: impl Fn(&Variable) -> bool) -> ExecResult {
        let text: String = self
            .state
            .variables()
            .filter(|(_, var)| filter(var))
            .map(|(name, var)| declare_line(name, var))
            .collect();
        ExecResult::ok(text)
    }

    fn builtin_export(&mut self, args: &[String]) -> ExecResult {
        let mut unexport = false;
        let mut operands = Vec::new();
        for arg in args {
            match arg.as_str() {
                "-p" => {}
                "-n" => unexport = true,
                _ => operands.push(arg),
            }
        }
        if operands.is_empty() {
            return self.listing(|var| var.exported);
        }

        let mut result = ExecResult::default();
        for arg in operands {
            let (name, value) = split_assignment(arg);
            if !parser::is_identifier(name) {
                result.stderr.push_str(&format!("sandbash: export: `{arg}': not a valid identifier\n"));
                result.exit_code = 1;
                continue;
            }
            let outcome = if unexport {
                match self.state.variable(name).cloned() {
                    Some(var) => {
                        self.state.replace_variable(name, Some(Variable { exported: false, ..var }));
                        Ok(())
                    }
                    None => Ok(()),
                }
            } else {
                self.state.export(name, value)
            };
            if let Err(msg) = outcome {
                result.stderr.push_str(&format!("sandbash: {msg}\n"));
                result.exit_code = 1;
            }
        }
        result
    }

    fn builtin_readonly(&mut self, args: &[String]) -> ExecResult {
        let operands: Vec<&String> = args.iter().filter(|a| *a != "-p").collect();
        if operands.is_empty() {
            return self.listing(|var| var.readonly);
        }
        let mut result = ExecResult::default();
        for arg in operands {
            let (name, value) = split_assignment(arg);
            if !parser::is_identifier(name) {
                result.stderr.push_str(&format!("sandbash: readonly: `{arg}': not a valid identifier\n"));
                result.exit_code = 1;
                continue;
            }
            if let Err(msg) = self.state.set_readonly(name, value) {
                result.stderr.push_str(&format!("sandbash: {msg}\n"));
                result.exit_code = 1;
            }
        }
        result
    }

    fn builtin_declare(&mut self, cmd: &str, args: &[String]) -> ExecResult {
        let (mut export, mut readonly, mut print, mut global, mut functions) =
            (false, false, false, false, false);
        let mut operands = Vec::new();
        for arg in args {
            match arg.strip_prefix('-') {
                Some(flags) if !flags.is_empty() && operands.is_empty() => {
                    for flag in flags.chars() {
                        match flag {
                            'x' => export = true,
                            'r' => readonly = true,
                            'p' => print = true,
                            'g' => global = true,
                            'f' | 'F' => functions = true,
                            other => return failure(format!("{cmd}: -{other}: invalid option"), 2),
                        }
                    }
                }
                _ => operands.push(arg.as_str()),
            }
        }

        if functions {
            let mut names: Vec<&String> = self.state.functions.keys().collect();
            names.sort();
            let wanted = |n: &str| operands.is_empty() || operands.contains(&n);
            let text: String = names
                .into_iter()
                .filter(|n| wanted(n))
                .map(|n| format!("declare -f {n}\n"))
                .collect();
            return ExecResult::ok(text);
        }
        if operands.is_empty() {
            return self.listing(|var| (!export || var.exported) && (!readonly || var.readonly));
        }
        if print {
            let mut result = ExecResult::default();
            for name in operands {
                match self.state.variable(name) {
                    Some(var) => result.stdout.push_str(&declare_line(name, var)),
                    None => {
                        result.stderr.push_str(&format!("sandbash: {cmd}: {name}: not found\n"));
                        result.exit_code = 1;
                    }
                }
            }
            return result;
        }

        let local = self.state.in_function() && !global;
        let mut result = ExecResult::default();
        for arg in operands {
            let (name, value) = split_assignment(arg);
            if !parser::is_identifier(name) {
                result.stderr.push_str(&format!("sandbash: {cmd}: `{arg}': not a valid identifier\n"));
                result.exit_code = 1;
                continue;
            }
            let outcome = if local {
                self.state.declare_local(name, value)
            } else if let Some(value) = value {
                self.state.set(name, value)
            } else {
                Ok(())
            };
            let outcome = outcome
                .and_then(|()| if export { self.state.export(name, None) } else { Ok(()) })
                .and_then(|()| if readonly { self.state.set_readonly(name, None) } else { Ok(()) });
            if let Err(msg) = outcome {
                result.stderr.push_str(&format!("sandbash: {msg}\n"));
                result.exit_code = 1;
            }
        }
        result
    }

    fn builtin_local(&mut self, args: &[String]) -> ExecResult {
        if !self.state.in_function() {
            return failure("local: can only be used in a function", 1);
        }
        let mut result = ExecResult::default();
        for arg in args.iter().filter(|a| !a.starts_with('-')) {
            let (name, value) = split_assignment(arg);
            if !parser::is_identifier(name) {
                result.stderr.push_str(&format!("sandbash: local: `{arg}': not a valid identifier\n"));
                result.exit_code = 1;
                continue;
            }
            if let Err(msg) = self.state.declare_local(name, value) {
                result.stderr.push_str(&format!("sandbash: {msg}\n"));
                result.exit_code = 1;
            }
        }
        result
    }

    fn builtin_unset(&mut self, args: &[String]) -> ExecResult {
        let mut functions_only = false;
        let mut variables_only = false;
        let mut result = ExecResult::default();
        for arg in args {
            match arg.as_str() {
                "-f" => functions_only = true,
                "-v" => variables_only = true,
                name if functions_only => {
                    self.state.functions.remove(name);
                }
                name => {
                    if self.state.variable(name).is_none() && !variables_only {
                        self.state.functions.remove(name);
                    } else if let Err(msg) = self.state.unset(name) {
                        result.stderr.push_str(&format!("sandbash: {msg}\n"));
                        result.exit_code = 1;
                    }
                }
            }
        }
        result
    }

    fn builtin_set(&mut self, args: &[String]) -> ExecResult {
        if args.is_empty() {
            let text: String = self
                .state
                .variables()
                .map(|(name, var)| format!("{name}={}\n", single_quote(&var.value)))
                .collect();
            return ExecResult::ok(text);
        }

        let mut iter = args.iter().enumerate();
        while let Some((i, arg)) = iter.next() {
            let (on, flags) = match arg.as_bytes().first() {
                Some(b'-') => (true, &arg[1..]),
                Some(b'+') => (false, &arg[1..]),
                _ => {
                    self.state.positional = args[i..].to_vec();
                    return ExecResult::default();
                }
            };
            if flags.is_empty() || flags == "-" {
                self.state.positional = args[i + 1..].to_vec();
                return ExecResult::default();
            }
            for flag in flags.chars() {
                if flag == 'o' {
                    match iter.next() {
                        Some((_, name)) => {
                            if !self.state.options.set_long(name, on) {
                                return failure(format!("set: {name}: invalid option name"), 1);
                            }
                        }
                        None => return ExecResult::ok(self.state.options.listing()),
                    }
                } else if !self.state.options.set_short(flag, on) {
                    return failure(format!("set: -{flag}: invalid option"), 2);
                }
            }
        }
        ExecResult::default()
    }

    fn builtin_shift(&mut self, args: &[String]) -> ExecResult {
        let count = match args.first() {
            None => 1,
            Some(arg) => match arg.parse::<usize>() {
                Ok(n) => n,
                Err(_) => return failure(format!("shift: {arg}: numeric argument required"), 1),
            },
        };
        if count > self.state.positional.len() {
            return ExecResult::with_code("", 1);
        }
        self.state.positional.drain(..count);
        ExecResult::default()
    }

    fn builtin_read(&mut self, args: &[String]) -> ExecResult {
        let mut raw = false;
        let mut delim = '\n';
        let mut count = None;
        let mut names = Vec::new();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-r" => raw = true,
                "-s" => {}
                "-p" | "-t" | "-u" => {
                    // prompt, timeout and fd: no terminal, input is buffered
                    iter.next();
                }
                "-d" => delim = iter.next().and_then(|d| d.chars().next()).unwrap_or('\0'),
                "-n" | "-N" => match iter.next().and_then(|n| n.parse::<usize>().ok()) {
                    Some(n) => count = Some(n),
                    None => return failure("read: invalid number of characters", 1),
                },
                "-a" => return failure("read: -a: arrays are not supported", 2),
                opt if opt.starts_with('-') && opt.len() > 1 && names.is_empty() => {
                    return failure(format!("read: {opt}: invalid option"), 2);
                }
                name => {
                    if !parser::is_identifier(name) {
                        return failure(format!("read: `{name}': not a valid identifier"), 1);
                    }
                    names.push(name.to_string());
                }
            }
        }

        let Some(input) = self.stdin.as_mut() else {
            return self.assign_read(&names, "", 1);
        };
        let read = match count {
            Some(n) => input.read_chars(n, delim),
            None => input.read_until(delim),
        };
        let Some((mut line, mut complete)) = read else {
            return self.assign_read(&names, "", 1);
        };
        if !raw {
            // backslash-newline continues the line
            while count.is_none() && complete && delim == '\n' && ends_with_odd_backslashes(&line) {
                line.pop();
                match input.read_until(delim) {
                    Some((next, found)) => {
                        line.push_str(&next);
                        complete = found;
                    }
                    None => complete = false,
                }
            }
            line = unescape_read(&line);
        }
        self.assign_read(&names, &line, i32::from(!complete))
    }

    fn assign_read(&mut self, names: &[String], line: &str, status: i32) -> ExecResult {
        let outcome = if names.is_empty() {
            self.state.set("REPLY", line)
        } else {
            let ifs = self.state.get("IFS").unwrap_or(" \t\n").to_string();
            split_fields(line, &ifs, names.len())
                .into_iter()
                .zip(names)
                .try_for_each(|(value, name)| self.state.set(name, value))
        };
        match outcome {
            Ok(()) => ExecResult::with_code("", status),
            Err(msg) => failure(msg, 1),
        }
    }

    fn builtin_wait(&mut self, args: &[String]) -> ExecResult {
        if args.is_empty() {
            return ExecResult::with_code("", self.state.jobs.wait_all());
        }
        let mut result = ExecResult::default();
        for arg in args {
            let id = arg.trim_start_matches('%').parse::<usize>().ok();
            match id.and_then(|id| self.state.jobs.wait_for(id)) {
                Some(code) => result.exit_code = code,
                None => {
                    result.stderr.push_str(&format!(
                        "sandbash: wait: pid {arg} is not a child of this shell\n"
                    ));
                    result.exit_code = 127;
                }
            }
        }
        result
    }

    fn builtin_loop_control(&mut self, name: &str, args: &[String]) -> ExecResult {
        let count = match args.first() {
            None => 1,
            Some(arg) => match arg.parse::<u32>() {
                Ok(0) => return failure(format!("{name}: {arg}: loop count out of range"), 1),
                Ok(n) => n,
                Err(_) => return failure(format!("{name}: {arg}: numeric argument required"), 1),
            },
        };
        if self.loop_depth == 0 {
            return ExecResult::err(
                format!("sandbash: {name}: only meaningful in a `for', `while', or `until' loop\n"),
                0,
            );
        }
        let count = count.min(u32::try_from(self.loop_depth).unwrap_or(u32::MAX));
        ExecResult {
            control_flow: if name == "break" {
                ControlFlow::Break(count)
            } else {
                ControlFlow::Continue(count)
            },
            ..ExecResult::default()
        }
    }

    fn exit_status_arg(&self, name: &str, args: &[String]) -> std::result::Result<i32, ExecResult> {
        match args.first() {
            None => Ok(self.state.last_status),
            Some(arg) => arg
                .parse::<i64>()
                .map(|n| n.rem_euclid(256) as i32)
                .map_err(|_| failure(format!("{name}: {arg}: numeric argument required"), 2)),
        }
    }

    fn builtin_return(&mut self, args: &[String]) -> ExecResult {
        if !self.state.in_function() && self.source_depth == 0 {
            return failure("return: can only `return' from a function or sourced script", 1);
        }
        let code = match self.exit_status_arg("return", args) {
            Ok(code) => code,
            Err(result) => result.exit_code,
        };
        ExecResult {
            exit_code: code,
            control_flow: ControlFlow::Return(code),
            ..ExecResult::default()
        }
    }

    fn builtin_exit(&mut self, args: &[String]) -> ExecResult {
        let (mut result, code) = match self.exit_status_arg("exit", args) {
            Ok(code) => (ExecResult::default(), code),
            Err(result) => {
                let code = result.exit_code;
                (result, code)
            }
        };
        result.exit_code = code;
        result.control_flow = ControlFlow::Exit(code);
        result
    }

    fn builtin_type(&self, args: &[String]) -> ExecResult {
        let short = args.first().is_some_and(|a| a == "-t");
        let names = if short { &args[1..] } else { args };
        let mut result = ExecResult::default();
        for name in names {
            let kind = if KEYWORDS.contains(&name.as_str()) {
                Some(("keyword", format!("{name} is a shell keyword")))
            } else if self.state.functions.contains_key(name) {
                Some(("function", format!("{name} is a function")))
            } else if SPECIAL_BUILTINS.contains(&name.as_str()) || self.registry.contains(name) {
                Some(("builtin", format!("{name} is a shell builtin")))
            } else {
                None
            };
            match kind {
                Some((tag, _)) if short => result.stdout.push_str(&format!("{tag}\n")),
                Some((_, text)) => result.stdout.push_str(&format!("{text}\n")),
                None => {
                    if !short {
                        result.stderr.push_str(&format!("sandbash: type: {name}: not found\n"));
                    }
                    result.exit_code = 1;
                }
            }
        }
        result
    }

    /// `printf -v NAME FORMAT [ARGS...]`
    fn builtin_printf_var(&mut self, args: &[String]) -> Result<ExecResult> {
        let [_, name, format, rest @ ..] = args else {
            return Ok(failure("printf: -v: option requires an argument", 2));
        };
        if !parser::is_identifier(name) {
            return Ok(failure(format!("printf: `{name}': not a valid identifier"), 2));
        }
        let rendered = render_printf(format, rest);
        self.counters
            .check_string_length(rendered.output.len(), &self.limits)?;
        if let Err(msg) = self.state.set(name, rendered.output) {
            return Ok(failure(msg, 1));
        }
        Ok(ExecResult::err(
            rendered.errors.clone(),
            i32::from(!rendered.errors.is_empty()),
        ))
    }

    async fn builtin_let(&mut self, args: &[String]) -> Result<ExecResult> {
        if args.is_empty() {
            return Ok(failure("let: expression expected", 1));
        }
        let mut last = 0;
        for expr in args {
            match self.eval_arithmetic(expr).await {
                Ok(value) => last = value,
                Err(e) => return self.expansion_failure(e),
            }
        }
        Ok(ExecResult::with_code("", i32::from(last == 0)))
    }

    async fn builtin_eval(&mut self, args: &[String]) -> Result<ExecResult> {
        let text = args.join(" ");
        if text.trim().is_empty() {
            return Ok(ExecResult::default());
        }
        let script = match Parser::new(&text).parse() {
            Ok(script) => script,
            Err(e) => return Ok(failure(format!("eval: {e}"), 2)),
        };
        self.counters.push_function(&self.limits)?;
        let result = self.execute_commands(&script.commands).await;
        self.counters.pop_function();
        result
    }

    async fn builtin_source(&mut self, name: &str, args: &[String]) -> Result<ExecResult> {
        let Some((file, rest)) = args.split_first() else {
            return Ok(failure(format!("{name}: filename argument required"), 2));
        };
        let data = match self.fs.read_file(&self.resolve(file)).await {
            Ok(data) => data,
            Err(e) => return Ok(failure(e.describe(file), 1)),
        };
        self.counters
            .check_string_length(data.len(), &self.limits)?;
        let text = String::from_utf8_lossy(&data);
        let script = match Parser::new(&text).parse() {
            Ok(script) => script,
            Err(e) => return Ok(failure(format!("{file}: {e}"), 2)),
        };

        self.counters.push_function(&self.limits)?;
        let saved_positional =
            (!rest.is_empty()).then(|| std::mem::replace(&mut self.state.positional, rest.to_vec()));
        self.source_depth += 1;
        let result = self.execute_commands(&script.commands).await;
        self.source_depth -= 1;
        if let Some(saved) = saved_positional {
            self.state.positional = saved;
        }
        self.counters.pop_function();

        let mut result = result?;
        if let ControlFlow::Return(code) = result.control_flow {
            result.exit_code = code;
            result.control_flow = ControlFlow::Normal;
        }
        Ok(result)
    }

    /// `exec cmd`: run cmd, then end the shell with its status.
    async fn builtin_exec(&mut self, args: &[String]) -> Result<ExecResult> {
        if args.is_empty() {
            return Ok(ExecResult::default());
        }
        let mut result = self.dispatch(args, false).await?;
        result.control_flow = ControlFlow::Exit(result.exit_code);
        Ok(result)
    }

    async fn builtin_command(&mut self, args: &[String]) -> Result<ExecResult> {
        match args.first().map(String::as_str) {
            Some("-v") | Some("-V") => {
                let verbose = args[0] == "-V";
                let mut result = ExecResult::default();
                for name in &args[1..] {
                    let known = self.state.functions.contains_key(name)
                        || SPECIAL_BUILTINS.contains(&name.as_str())
                        || self.registry.contains(name)
                        || KEYWORDS.contains(&name.as_str());
                    if known && verbose {
                        result.stdout.push_str(&self.builtin_type(std::slice::from_ref(name)).stdout);
                    } else if known {
                        result.stdout.push_str(&format!("{name}\n"));
                    } else if name.contains('/') && self.fs.exists(&self.resolve(name)).await.unwrap_or(false) {
                        result.stdout.push_str(&format!("{name}\n"));
                    } else {
                        if verbose {
                            result.stderr.push_str(&format!("sandbash: command: {name}: not found\n"));
                        }
                        result.exit_code = 1;
                    }
                }
                Ok(result)
            }
            Some(_) => self.dispatch(args, true).await,
            None => Ok(ExecResult::default()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_fields_keeps_rest_in_last() {
        assert_eq!(split_fields("  a b   c d ", " \t\n", 2), vec!["a", "b   c d"]);
        assert_eq!(split_fields("one", " \t\n", 3), vec!["one", "", ""]);
        assert_eq!(split_fields("a:b:c", ":", 2), vec!["a", "b:c"]);
        assert_eq!(split_fields("a::c", ":", 3), vec!["a", "", "c"]);
    }

    #[test]
    fn test_declare_line_escapes() {
        let var = Variable {
            value: "say \"$hi\"".to_string(),
            exported: true,
            readonly: false,
        };
        assert_eq!(declare_line("X", &var), "declare -x X=\"say \\\"\\$hi\\\"\"\n");
    }

    #[test]
    fn test_read_unescape() {
        assert_eq!(unescape_read(r"a\ b\\c"), r"a b\c");
        assert!(ends_with_odd_backslashes("line\\"));
        assert!(!ends_with_odd_backslashes("line\\\\"));
    }
}
