//! Word expansion
//!
//! Order: brace, tilde, parameter/command/arithmetic, field splitting,
//! pathname expansion, quote removal. Quote removal is implicit: every
//! piece of text carries whether it was quoted, and a parallel glob pattern
//! keeps quoted characters escaped.

use futures_util::future::BoxFuture;
use std::path::PathBuf;

use super::Interpreter;
use super::arithmetic::{self, ArithEnv};
use super::pattern::{self, Anchor};
use super::state::ShellState;
use crate::error::Error;
use crate::limits::LimitExceeded;
use crate::parser::{self, ParameterExpansion, ParameterOp, ReplaceMode, Script, Word, WordPart};

/// Upper bound on the words one brace expression may produce.
const MAX_BRACE_WORDS: usize = 65_536;

/// Value of `$$`. There is no real process behind the shell.
pub(crate) const VIRTUAL_PID: u32 = 1;

/// Why a word could not be expanded.
#[derive(Debug)]
pub(crate) enum ExpandError {
    /// The command fails with status 1 and the script goes on.
    Failed(String),
    /// `${name:?}` and `set -u`: the message is printed and the shell exits
    /// with status 1.
    Abort(String),
    /// Propagated as is (resource limits).
    Fatal(Error),
}

impl From<Error> for ExpandError {
    fn from(e: Error) -> Self {
        Self::Fatal(e)
    }
}

impl From<LimitExceeded> for ExpandError {
    fn from(e: LimitExceeded) -> Self {
        Self::Fatal(e.into())
    }
}

pub(crate) type ExpandResult<T> = std::result::Result<T, ExpandError>;

impl ArithEnv for ShellState {
    fn get(&self, name: &str) -> Option<String> {
        ShellState::get(self, name).map(str::to_string)
    }

    fn set(&mut self, name: &str, value: i64) -> Result<(), String> {
        ShellState::set(self, name, value.to_string())
    }
}

/// One field under construction.
#[derive(Debug, Default)]
struct Field {
    text: String,
    /// `text` as a glob pattern: quoted characters escaped
    pattern: String,
    /// Contains an unquoted glob character
    glob: bool,
}

/// Accumulates expanded text into fields.
struct Fields {
    done: Vec<Field>,
    current: Field,
    /// The current field exists even if empty (`""`, `x$empty`)
    exists: bool,
    split: bool,
    ifs: String,
}

impl Fields {
    fn new(ifs: &str, split: bool) -> Self {
        Self {
            done: Vec::new(),
            current: Field::default(),
            exists: false,
            split,
            ifs: ifs.to_string(),
        }
    }

    /// Unquoted text from the script itself.
    fn literal(&mut self, s: &str) {
        self.current.text.push_str(s);
        self.current.pattern.push_str(s);
        self.current.glob |= pattern::has_glob_chars(s);
        self.exists |= !s.is_empty();
    }

    fn quoted(&mut self, s: &str) {
        self.current.text.push_str(s);
        self.current.pattern.push_str(&pattern::escape(s));
        self.exists = true;
    }

    /// Result of an unquoted expansion: split on IFS, glob characters live.
    fn expanded(&mut self, s: &str) {
        if !self.split || self.ifs.is_empty() {
            self.literal(s);
            return;
        }
        let mut ws_pending = false;
        let mut buf = [0u8; 4];
        for c in s.chars() {
            if !self.ifs.contains(c) {
                if ws_pending {
                    self.boundary();
                    ws_pending = false;
                }
                self.literal(c.encode_utf8(&mut buf));
            } else if c.is_whitespace() {
                ws_pending = true;
            } else {
                self.force_boundary();
                ws_pending = false;
            }
        }
        if ws_pending {
            self.boundary();
        }
    }

    /// End the current field if it exists.
    fn boundary(&mut self) {
        if self.exists {
            self.force_boundary();
        }
    }

    /// End the current field, keeping it even when empty.
    fn force_boundary(&mut self) {
        self.done.push(std::mem::take(&mut self.current));
        self.exists = false;
    }

    fn finish(mut self) -> Vec<Field> {
        self.boundary();
        self.done
    }
}

/// A word flattened for brace expansion: unquoted characters are visible,
/// everything else is opaque.
#[derive(Debug, Clone)]
enum Atom<'a> {
    Char(char),
    Part(&'a WordPart),
}

fn brace_expand(word: &Word) -> ExpandResult<Vec<Word>> {
    let has_brace = word
        .parts
        .iter()
        .any(|p| matches!(p, WordPart::Literal(s) if s.contains('{')));
    if !has_brace {
        return Ok(vec![word.clone()]);
    }

    let mut atoms = Vec::new();
    for part in &word.parts {
        match part {
            WordPart::Literal(s) => atoms.extend(s.chars().map(Atom::Char)),
            other => atoms.push(Atom::Part(other)),
        }
    }
    let mut out = Vec::new();
    expand_atoms(atoms, &mut out)?;
    Ok(out.into_iter().map(atoms_to_word).collect())
}

fn atoms_to_word(atoms: Vec<Atom<'_>>) -> Word {
    let mut word = Word::default();
    for atom in atoms {
        match atom {
            Atom::Char(c) => word.push(WordPart::Literal(c.to_string())),
            Atom::Part(part) => word.push(part.clone()),
        }
    }
    word
}

fn expand_atoms<'a>(atoms: Vec<Atom<'a>>, out: &mut Vec<Vec<Atom<'a>>>) -> ExpandResult<()> {
    let Some((open, close, alternatives)) = find_brace(&atoms) else {
        out.push(atoms);
        return Ok(());
    };
    for alternative in alternatives {
        let mut combined = atoms[..open].to_vec();
        combined.extend(alternative);
        combined.extend_from_slice(&atoms[close + 1..]);
        expand_atoms(combined, out)?;
        if out.len() > MAX_BRACE_WORDS {
            return Err(ExpandError::Failed("brace expansion: too many words".into()));
        }
    }
    Ok(())
}

/// First `{...}` that is a comma list or a sequence, with its alternatives.
#[allow(clippy::type_complexity)]
fn find_brace<'a>(atoms: &[Atom<'a>]) -> Option<(usize, usize, Vec<Vec<Atom<'a>>>)> {
    for (open, atom) in atoms.iter().enumerate() {
        if !matches!(atom, Atom::Char('{')) {
            continue;
        }
        let mut depth = 0;
        let mut commas = Vec::new();
        let mut close = None;
        for (i, atom) in atoms.iter().enumerate().skip(open + 1) {
            match atom {
                Atom::Char('{') => depth += 1,
                Atom::Char('}') if depth == 0 => {
                    close = Some(i);
                    break;
                }
                Atom::Char('}') => depth -= 1,
                Atom::Char(',') if depth == 0 => commas.push(i),
                _ => {}
            }
        }
        let Some(close) = close else { continue };

        if !commas.is_empty() {
            let mut alternatives = Vec::new();
            let mut start = open + 1;
            for comma in commas.into_iter().chain(std::iter::once(close)) {
                alternatives.push(atoms[start..comma].to_vec());
                start = comma + 1;
            }
            return Some((open, close, alternatives));
        }

        let inner: Option<String> = atoms[open + 1..close]
            .iter()
            .map(|a| match a {
                Atom::Char(c) => Some(*c),
                Atom::Part(_) => None,
            })
            .collect();
        if let Some(items) = inner.as_deref().and_then(sequence) {
            let alternatives = items
                .into_iter()
                .map(|s| s.chars().map(Atom::Char).collect())
                .collect();
            return Some((open, close, alternatives));
        }
    }
    None
}

/// `1..5`, `5..1`, `a..e`, `1..10..2`, `01..10`.
fn sequence(text: &str) -> Option<Vec<String>> {
    let parts: Vec<&str> = text.split("..").collect();
    let (start, end, step) = match parts.as_slice() {
        [start, end] => (*start, *end, None),
        [start, end, step] => (*start, *end, Some(step.parse::<i64>().ok()?)),
        _ => return None,
    };
    let step = step.map(|s| s.unsigned_abs().max(1)).unwrap_or(1) as usize;

    if let (Ok(a), Ok(b)) = (start.parse::<i64>(), end.parse::<i64>()) {
        let padded = |s: &str| s.trim_start_matches('-').len() > 1 && s.trim_start_matches('-').starts_with('0');
        let width = if padded(start) || padded(end) {
            start.len().max(end.len())
        } else {
            0
        };
        let count = (a.abs_diff(b) as usize) / step + 1;
        if count > MAX_BRACE_WORDS {
            return None;
        }
        let values = (0..count).map(|i| {
            let offset = (i * step) as i64;
            if a <= b { a + offset } else { a - offset }
        });
        return Some(values.map(|n| format!("{n:0width$}")).collect());
    }

    let (mut a_chars, mut b_chars) = (start.chars(), end.chars());
    match (a_chars.next(), a_chars.next(), b_chars.next(), b_chars.next()) {
        (Some(a), None, Some(b), None) if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() => {
            let (a, b) = (a as u8, b as u8);
            let range: Vec<u8> = if a <= b {
                (a..=b).step_by(step).collect()
            } else {
                (b..=a).rev().step_by(step).collect()
            };
            Some(range.into_iter().map(|c| (c as char).to_string()).collect())
        }
        _ => None,
    }
}

/// `'...'` quoting for `${name@Q}` and xtrace.
pub(crate) fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn upper_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn lower_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) => c.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn is_special_param(name: &str) -> bool {
    matches!(name, "?" | "#" | "$" | "!" | "-" | "@" | "*") || name.chars().all(|c| c.is_ascii_digit())
}

impl Interpreter {
    /// Fully expand command words into fields.
    pub(crate) async fn expand_words(&mut self, words: &[Word]) -> ExpandResult<Vec<String>> {
        let mut out = Vec::new();
        for word in words {
            out.extend(self.expand_word(word).await?);
        }
        Ok(out)
    }

    /// Expand one word into zero or more fields.
    pub(crate) async fn expand_word(&mut self, word: &Word) -> ExpandResult<Vec<String>> {
        let mut out = Vec::new();
        for word in brace_expand(word)? {
            let word = self.expand_tilde(&word);
            let mut fields = Fields::new(&self.ifs(), true);
            self.expand_into(&word.parts, false, false, &mut fields).await?;
            for field in fields.finish() {
                self.counters
                    .check_string_length(field.text.len(), &self.limits)?;
                if field.glob && !self.state.options.noglob {
                    let matches = self.glob(&field.pattern).await?;
                    if !matches.is_empty() {
                        out.extend(matches);
                        continue;
                    }
                }
                out.push(field.text);
            }
        }
        Ok(out)
    }

    /// Expand without splitting or globbing (assignments, redirection
    /// targets, `case` subjects).
    pub(crate) async fn expand_word_to_string(&mut self, word: &Word) -> ExpandResult<String> {
        let word = self.expand_tilde(word);
        let mut fields = Fields::new(&self.ifs(), false);
        self.expand_into(&word.parts, false, false, &mut fields).await?;
        let text = fields
            .finish()
            .into_iter()
            .map(|f| f.text)
            .collect::<Vec<_>>()
            .join(" ");
        self.counters.check_string_length(text.len(), &self.limits)?;
        Ok(text)
    }

    /// Expand a word into a glob pattern: quoted parts match literally.
    pub(crate) async fn expand_pattern(&mut self, word: &Word) -> ExpandResult<String> {
        let mut fields = Fields::new(&self.ifs(), false);
        self.expand_into(&word.parts, false, true, &mut fields).await?;
        Ok(fields
            .finish()
            .into_iter()
            .map(|f| f.pattern)
            .collect::<Vec<_>>()
            .join(" "))
    }

    /// Expand an unquoted here-document body: parameters, substitutions and
    /// arithmetic only, as inside double quotes.
    pub(crate) async fn expand_heredoc(&mut self, body: &Word) -> ExpandResult<String> {
        let mut fields = Fields::new(&self.ifs(), false);
        self.expand_into(&body.parts, true, false, &mut fields).await?;
        let text = fields
            .finish()
            .into_iter()
            .map(|f| f.text)
            .collect::<Vec<_>>()
            .join(" ");
        self.counters.check_string_length(text.len(), &self.limits)?;
        Ok(text)
    }

    /// Expand the text of an arithmetic expression, then evaluate it.
    pub(crate) async fn eval_arithmetic(&mut self, expr: &str) -> ExpandResult<i64> {
        let expanded = if expr.contains('$') || expr.contains('`') {
            let word = parser::parse_template(expr)
                .map_err(|_| ExpandError::Failed(format!("{expr}: bad substitution")))?;
            self.expand_word_to_string(&word).await?
        } else {
            expr.to_string()
        };
        arithmetic::evaluate(&expanded, &mut self.state)
            .map_err(|e| ExpandError::Failed(format!("{}: {e}", expanded.trim())))
    }

    fn ifs(&self) -> String {
        self.state.get("IFS").unwrap_or(" \t\n").to_string()
    }

    fn expand_tilde(&self, word: &Word) -> Word {
        let Some(WordPart::Literal(first)) = word.parts.first() else {
            return word.clone();
        };
        let Some(rest) = first.strip_prefix('~') else {
            return word.clone();
        };
        let (user, tail) = match rest.find('/') {
            Some(i) => rest.split_at(i),
            None => (rest, ""),
        };
        // `~user` only makes sense when the prefix is the whole literal or
        // followed by a slash
        if tail.is_empty() && word.parts.len() > 1 && !user.is_empty() {
            return word.clone();
        }
        let replacement = match user {
            "" => self.state.get("HOME"),
            "+" => self.state.get("PWD"),
            "-" => self.state.get("OLDPWD"),
            name if Some(name) == self.state.get("USER") => self.state.get("HOME"),
            _ => None,
        };
        let Some(replacement) = replacement else {
            return word.clone();
        };
        let mut expanded = Word::quoted(replacement);
        if !tail.is_empty() {
            expanded.push(WordPart::Literal(tail.to_string()));
        }
        for part in &word.parts[1..] {
            expanded.push(part.clone());
        }
        expanded
    }

    /// Value of a parameter by name, specials included.
    pub(crate) fn param_value(&mut self, name: &str) -> Option<String> {
        match name {
            "?" => Some(self.state.last_status.to_string()),
            "#" => Some(self.state.positional.len().to_string()),
            "$" => Some(VIRTUAL_PID.to_string()),
            "!" => self.state.jobs.last_job_id().map(|id| id.to_string()),
            "-" => Some(self.state.options.flags()),
            "0" => Some(self.state.script_name.clone()),
            "@" | "*" => {
                (!self.state.positional.is_empty()).then(|| self.state.positional.join(" "))
            }
            "RANDOM" => Some(self.next_random().to_string()),
            n if n.chars().all(|c| c.is_ascii_digit()) => {
                let index: usize = n.parse().ok()?;
                self.state.positional.get(index.checked_sub(1)?).cloned()
            }
            _ => self.state.get(name).map(str::to_string),
        }
    }

    fn unbound(&self, name: &str) -> ExpandError {
        ExpandError::Abort(format!("{name}: unbound variable"))
    }

    fn expand_into<'a>(
        &'a mut self,
        parts: &'a [WordPart],
        quoted: bool,
        operand: bool,
        out: &'a mut Fields,
    ) -> BoxFuture<'a, ExpandResult<()>> {
        Box::pin(async move {
            for part in parts {
                match part {
                    WordPart::Literal(s) if quoted => out.quoted(s),
                    WordPart::Literal(s) if operand => out.expanded(s),
                    WordPart::Literal(s) => out.literal(s),
                    WordPart::Quoted(s) => out.quoted(s),
                    WordPart::DoubleQuoted(inner) => {
                        let lone_at = inner.iter().any(|p| match p {
                            WordPart::Variable(n) => n == "@",
                            WordPart::Parameter(p) => p.name == "@",
                            _ => false,
                        });
                        if !lone_at {
                            out.quoted("");
                        }
                        self.expand_into(inner, true, false, out).await?;
                    }
                    WordPart::Variable(name) => self.expand_variable(name, quoted, out)?,
                    WordPart::Parameter(param) => {
                        self.expand_parameter(param, quoted, out).await?;
                    }
                    WordPart::CommandSubstitution(script) => {
                        let value = self.command_substitution(script).await?;
                        push_value(out, &value, quoted);
                    }
                    WordPart::Arithmetic(expr) => {
                        let value = self.eval_arithmetic(expr).await?;
                        push_value(out, &value.to_string(), quoted);
                    }
                }
            }
            Ok(())
        })
    }

    fn expand_variable(&mut self, name: &str, quoted: bool, out: &mut Fields) -> ExpandResult<()> {
        match name {
            "@" | "*" => {
                let params = self.state.positional.clone();
                self.push_positional(&params, name == "@", quoted, out);
                Ok(())
            }
            _ => {
                let value = match self.param_value(name) {
                    Some(value) => value,
                    None if self.state.options.nounset && name != "!" => {
                        return Err(self.unbound(name));
                    }
                    None => String::new(),
                };
                push_value(out, &value, quoted);
                Ok(())
            }
        }
    }

    /// `$@`, `$*` and their quoted forms.
    fn push_positional(&self, params: &[String], at: bool, quoted: bool, out: &mut Fields) {
        if quoted && !at {
            let sep = match self.state.get("IFS") {
                Some(ifs) => ifs.chars().next().map(String::from).unwrap_or_default(),
                None => " ".to_string(),
            };
            out.quoted(&params.join(&sep));
            return;
        }
        if quoted && !out.split {
            out.quoted(&params.join(" "));
            return;
        }
        for (i, param) in params.iter().enumerate() {
            if quoted {
                if i > 0 {
                    out.force_boundary();
                }
                out.quoted(param);
            } else {
                if i > 0 {
                    out.boundary();
                }
                out.expanded(param);
            }
        }
    }

    async fn expand_parameter(
        &mut self,
        param: &ParameterExpansion,
        quoted: bool,
        out: &mut Fields,
    ) -> ExpandResult<()> {
        let name = param.name.as_str();
        let value = self.param_value(name);
        let positional_list = matches!(name, "@" | "*");

        match &param.op {
            ParameterOp::Length => {
                let len = if positional_list {
                    self.state.positional.len()
                } else {
                    match &value {
                        Some(v) => v.chars().count(),
                        None if self.state.options.nounset => return Err(self.unbound(name)),
                        None => 0,
                    }
                };
                push_value(out, &len.to_string(), quoted);
            }
            ParameterOp::Indirect => {
                let target = value.unwrap_or_default();
                if target.is_empty() || !(parser::is_identifier(&target) || is_special_param(&target)) {
                    return Err(ExpandError::Failed(format!("{name}: invalid indirect expansion")));
                }
                let resolved = self.param_value(&target).unwrap_or_default();
                push_value(out, &resolved, quoted);
            }
            ParameterOp::Default { word, colon }
            | ParameterOp::Alternative { word, colon } => {
                let set = value.as_ref().is_some_and(|v| !(*colon && v.is_empty()));
                let use_word = match &param.op {
                    ParameterOp::Default { .. } => !set,
                    _ => set,
                };
                if use_word {
                    self.expand_into(&word.parts, quoted, true, out).await?;
                } else if matches!(param.op, ParameterOp::Default { .. }) {
                    if positional_list {
                        let params = self.state.positional.clone();
                        self.push_positional(&params, name == "@", quoted, out);
                    } else {
                        push_value(out, &value.unwrap_or_default(), quoted);
                    }
                }
            }
            ParameterOp::Assign { word, colon } => {
                let set = value.as_ref().is_some_and(|v| !(*colon && v.is_empty()));
                if set {
                    push_value(out, &value.unwrap_or_default(), quoted);
                } else {
                    if is_special_param(name) {
                        return Err(ExpandError::Failed(format!(
                            "${name}: cannot assign in this way"
                        )));
                    }
                    let assigned = self.expand_word_to_string(word).await?;
                    self.state.set(name, assigned.clone()).map_err(ExpandError::Failed)?;
                    push_value(out, &assigned, quoted);
                }
            }
            ParameterOp::Error { word, colon } => {
                let set = value.as_ref().is_some_and(|v| !(*colon && v.is_empty()));
                if !set {
                    let message = if word.is_empty() {
                        if *colon {
                            "parameter null or not set".to_string()
                        } else {
                            "parameter not set".to_string()
                        }
                    } else {
                        self.expand_word_to_string(word).await?
                    };
                    return Err(ExpandError::Abort(format!("{name}: {message}")));
                }
                push_value(out, &value.unwrap_or_default(), quoted);
            }
            ParameterOp::Substring { offset, length } if positional_list => {
                // `${@:2}` slices the parameter list; `$0` sits at offset 0
                let mut params = vec![self.state.script_name.clone()];
                params.extend(self.state.positional.iter().cloned());
                let slice = self.slice(&params, offset, length.as_deref()).await?;
                self.push_positional(&slice, name == "@", quoted, out);
            }
            op => {
                let value = match value {
                    Some(value) => value,
                    None if self.state.options.nounset => return Err(self.unbound(name)),
                    None => String::new(),
                };
                let result = self.apply_operator(name, &value, op).await?;
                self.counters
                    .check_string_length(result.len(), &self.limits)?;
                push_value(out, &result, quoted);
            }
        }
        Ok(())
    }

    async fn apply_operator(&mut self, name: &str, value: &str, op: &ParameterOp) -> ExpandResult<String> {
        Ok(match op {
            ParameterOp::RemovePrefix { pattern, longest } => {
                let pat = self.expand_pattern(pattern).await?;
                pattern::remove_prefix(value, &pat, *longest)
            }
            ParameterOp::RemoveSuffix { pattern, longest } => {
                let pat = self.expand_pattern(pattern).await?;
                pattern::remove_suffix(value, &pat, *longest)
            }
            ParameterOp::Replace {
                pattern,
                replacement,
                mode,
            } => {
                let pat = self.expand_pattern(pattern).await?;
                let rep = self.expand_word_to_string(replacement).await?;
                let anchor = match mode {
                    ReplaceMode::First => Anchor::First,
                    ReplaceMode::All => Anchor::All,
                    ReplaceMode::Prefix => Anchor::Start,
                    ReplaceMode::Suffix => Anchor::End,
                };
                pattern::replace(value, &pat, &rep, anchor)
            }
            ParameterOp::Case { upper, all } => match (upper, all) {
                (true, true) => value.to_uppercase(),
                (false, true) => value.to_lowercase(),
                (true, false) => upper_first(value),
                (false, false) => lower_first(value),
            },
            ParameterOp::Substring { offset, length } => {
                let chars: Vec<char> = value.chars().collect();
                let slice = self.slice(&chars, offset, length.as_deref()).await?;
                slice.into_iter().collect()
            }
            ParameterOp::Transform(op) => match op {
                'Q' => single_quote(value),
                'U' => value.to_uppercase(),
                'L' => value.to_lowercase(),
                'u' => upper_first(value),
                'A' => format!("{name}={}", single_quote(value)),
                'a' => {
                    let mut flags = String::new();
                    if let Some(var) = self.state.variable(name) {
                        if var.readonly {
                            flags.push('r');
                        }
                        if var.exported {
                            flags.push('x');
                        }
                    }
                    flags
                }
                other => {
                    return Err(ExpandError::Failed(format!(
                        "${{{name}@{other}}}: bad substitution"
                    )));
                }
            },
            _ => value.to_string(),
        })
    }

    /// `${x:offset:length}` over chars or list items.
    async fn slice<T: Clone>(
        &mut self,
        items: &[T],
        offset: &str,
        length: Option<&str>,
    ) -> ExpandResult<Vec<T>> {
        let len = items.len() as i64;
        let offset = self.eval_arithmetic(offset).await?;
        let start = if offset < 0 { len.saturating_add(offset).max(0) } else { offset.min(len) };
        let end = match length {
            None => len,
            Some(expr) => {
                let length = self.eval_arithmetic(expr).await?;
                if length < 0 {
                    let end = len.saturating_add(length);
                    if end < start {
                        return Err(ExpandError::Failed(format!("{length}: substring expression < 0")));
                    }
                    end
                } else {
                    start.saturating_add(length).min(len)
                }
            }
        };
        Ok(items[start as usize..end as usize].to_vec())
    }

    /// `$(...)`: run on a copy of the shell state and capture stdout.
    pub(crate) async fn command_substitution(&mut self, script: &Script) -> ExpandResult<String> {
        self.counters.push_function(&self.limits)?;
        let saved = self.state.clone();
        let result = self.execute_commands(&script.commands).await;
        self.state = saved;
        self.counters.pop_function();

        let result = result?;
        let status = match result.control_flow {
            super::ControlFlow::Exit(code) => code,
            _ => result.exit_code,
        };
        self.state.last_status = status;
        self.last_subst_status = Some(status);
        self.expansion_stderr.push_str(&result.stderr);

        let mut stdout = result.stdout;
        let trimmed = stdout.trim_end_matches('\n').len();
        stdout.truncate(trimmed);
        Ok(stdout)
    }

    /// Pathname expansion against the virtual filesystem. Returns sorted
    /// matches, or nothing when no path matches.
    async fn glob(&mut self, pattern: &str) -> ExpandResult<Vec<String>> {
        let absolute = pattern.starts_with('/');
        let dir_only = pattern.ends_with('/');
        let components: Vec<&str> = pattern.split('/').filter(|c| !c.is_empty()).collect();

        let root = if absolute {
            PathBuf::from("/")
        } else {
            self.state.cwd().to_path_buf()
        };
        let prefix = if absolute { "/" } else { "" };
        // (shown path, real path, needs an existence check)
        let mut candidates = vec![(prefix.to_string(), root, false)];

        for component in components {
            let mut next = Vec::new();
            for (shown, real, unchecked) in candidates {
                let join = |name: &str| {
                    if shown.is_empty() || shown.ends_with('/') {
                        format!("{shown}{name}")
                    } else {
                        format!("{shown}/{name}")
                    }
                };
                if !pattern::has_glob_chars(component) {
                    let name = pattern::unescape(component);
                    next.push((join(&name), real.join(&name), true));
                    continue;
                }
                if unchecked && !self.fs.exists(&real).await.unwrap_or(false) {
                    continue;
                }
                self.counters.check_deadline()?;
                let Ok(entries) = self.fs.read_dir(&real).await else {
                    continue;
                };
                let show_hidden = component.starts_with('.') || component.starts_with("\\.");
                let mut names: Vec<String> = entries
                    .into_iter()
                    .map(|e| e.name)
                    .filter(|n| (show_hidden || !n.starts_with('.')) && pattern::matches(component, n))
                    .collect();
                names.sort();
                for name in names {
                    next.push((join(&name), real.join(&name), false));
                }
            }
            candidates = next;
        }

        let mut matches = Vec::new();
        for (shown, real, unchecked) in candidates {
            if dir_only {
                match self.fs.stat(&real).await {
                    Ok(meta) if meta.file_type.is_dir() => matches.push(format!("{shown}/")),
                    _ => {}
                }
            } else if !unchecked || self.fs.exists(&real).await.unwrap_or(false) {
                matches.push(shown);
            }
        }
        Ok(matches)
    }

    fn next_random(&mut self) -> u32 {
        // xorshift32
        let mut x = self.random_state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.random_state = x;
        x % 32768
    }
}

fn push_value(out: &mut Fields, value: &str, quoted: bool) {
    if quoted {
        out.quoted(value);
    } else {
        out.expanded(value);
    }
}
