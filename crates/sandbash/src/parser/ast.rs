//! AST types for parsed shell scripts
//!
//! Every node implements `Display`, producing shell text that parses back to
//! a structurally equal tree. Commands in a sequence are printed one per
//! line so here-document bodies can follow the line that introduced them.

use std::fmt;

/// A complete script.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Script {
    pub commands: Vec<Command>,
}

/// A single command in the script.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// A simple command (e.g., `echo hello`)
    Simple(SimpleCommand),

    /// A pipeline (e.g., `ls | grep foo`)
    Pipeline(Pipeline),

    /// A command list (e.g., `a && b || c`, `job &`)
    List(CommandList),

    /// A compound command with the redirections applied to all of it
    Compound(CompoundCommand, Vec<Redirect>),

    /// A function definition
    Function(FunctionDef),
}

/// A simple command with arguments and redirections.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimpleCommand {
    /// Command name; `None` for assignment-only or redirect-only commands
    pub name: Option<Word>,
    /// Command arguments
    pub args: Vec<Word>,
    /// Variable assignments before the command
    pub assignments: Vec<Assignment>,
    /// Redirections
    pub redirects: Vec<Redirect>,
}

/// A pipeline of commands.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    /// Whether the pipeline is negated (!)
    pub negated: bool,
    /// Commands in the pipeline
    pub commands: Vec<Command>,
}

/// An `&&`/`||` chain, optionally run as a background job.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandList {
    /// First command
    pub first: Box<Command>,
    /// Remaining commands with their operators
    pub rest: Vec<(ListOperator, Command)>,
    /// Terminated by `&`
    pub background: bool,
}

/// Operators for command lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOperator {
    /// && - execute next if previous succeeded
    And,
    /// || - execute next if previous failed
    Or,
}

/// Compound commands (control structures).
#[derive(Debug, Clone, PartialEq)]
pub enum CompoundCommand {
    If(IfCommand),
    For(ForCommand),
    /// C-style `for ((init; cond; step))`
    ArithFor(ArithForCommand),
    While(WhileCommand),
    Until(WhileCommand),
    Case(CaseCommand),
    /// Commands in parentheses, run on a copy of the shell state
    Subshell(Vec<Command>),
    /// Commands in braces
    BraceGroup(Vec<Command>),
    /// `(( expr ))`
    Arithmetic(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfCommand {
    pub condition: Vec<Command>,
    pub then_branch: Vec<Command>,
    pub elif_branches: Vec<(Vec<Command>, Vec<Command>)>,
    pub else_branch: Option<Vec<Command>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForCommand {
    pub variable: String,
    /// `None` iterates over the positional parameters
    pub words: Option<Vec<Word>>,
    pub body: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArithForCommand {
    pub init: String,
    pub condition: String,
    pub step: String,
    pub body: Vec<Command>,
}

/// Body shared by `while` and `until`.
#[derive(Debug, Clone, PartialEq)]
pub struct WhileCommand {
    pub condition: Vec<Command>,
    pub body: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseCommand {
    pub word: Word,
    pub cases: Vec<CaseItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseItem {
    pub patterns: Vec<Word>,
    pub commands: Vec<Command>,
    pub terminator: CaseTerminator,
}

/// How a case arm ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseTerminator {
    /// `;;` stop matching
    Break,
    /// `;&` run the next arm's body unconditionally
    FallThrough,
    /// `;;&` keep testing the following patterns
    Continue,
}

/// Function definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub body: Box<Command>,
}

/// A word (potentially with expansions).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Word {
    pub parts: Vec<WordPart>,
}

/// Parts of a word.
#[derive(Debug, Clone, PartialEq)]
pub enum WordPart {
    /// Unquoted text: subject to brace, tilde, splitting and globbing
    Literal(String),
    /// Single-quoted or backslash-escaped text, taken verbatim
    Quoted(String),
    /// `"..."`; inner `Literal` parts are plain text
    DoubleQuoted(Vec<WordPart>),
    /// `$name`, `${name}`, `$1`, `$@`, ...
    Variable(String),
    /// `${name<op>...}`
    Parameter(ParameterExpansion),
    /// `$(...)` or backticks
    CommandSubstitution(Box<Script>),
    /// `$(( expr ))`, unevaluated
    Arithmetic(String),
}

/// `${...}` with an operator.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterExpansion {
    pub name: String,
    pub op: ParameterOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterOp {
    /// `${#name}`
    Length,
    /// `${!name}`
    Indirect,
    /// `${name:-word}` / `${name-word}`
    Default { word: Word, colon: bool },
    /// `${name:=word}` / `${name=word}`
    Assign { word: Word, colon: bool },
    /// `${name:?word}` / `${name?word}`
    Error { word: Word, colon: bool },
    /// `${name:+word}` / `${name+word}`
    Alternative { word: Word, colon: bool },
    /// `${name#pat}` / `${name##pat}`
    RemovePrefix { pattern: Word, longest: bool },
    /// `${name%pat}` / `${name%%pat}`
    RemoveSuffix { pattern: Word, longest: bool },
    /// `${name/pat/rep}` and friends
    Replace {
        pattern: Word,
        replacement: Word,
        mode: ReplaceMode,
    },
    /// `${name^}` `${name^^}` `${name,}` `${name,,}`
    Case { upper: bool, all: bool },
    /// `${name:offset}` / `${name:offset:length}`, arithmetic text
    Substring {
        offset: String,
        length: Option<String>,
    },
    /// `${name@Q}` and other single-letter transforms
    Transform(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceMode {
    /// `/` first match
    First,
    /// `//` every match
    All,
    /// `/#` anchored at the start
    Prefix,
    /// `/%` anchored at the end
    Suffix,
}

/// I/O redirection.
#[derive(Debug, Clone, PartialEq)]
pub struct Redirect {
    /// Explicit file descriptor (`2>`), if any
    pub fd: Option<u32>,
    pub kind: RedirectKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RedirectKind {
    /// `>`
    Output(Word),
    /// `>>`
    Append(Word),
    /// `>|`
    Clobber(Word),
    /// `<`
    Input(Word),
    /// `&>`
    OutputBoth(Word),
    /// `&>>`
    AppendBoth(Word),
    /// `>&` (fd number or `-`)
    DupOutput(Word),
    /// `<&`
    DupInput(Word),
    /// `<<<`
    HereString(Word),
    /// `<<` / `<<-`
    HereDoc(HereDoc),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HereDoc {
    pub delimiter: String,
    /// Delimiter was quoted: the body is not expanded
    pub quoted: bool,
    /// `<<-`: leading tabs were stripped
    pub strip_tabs: bool,
    /// Body text; a single `Quoted` part when `quoted`
    pub body: Word,
}

/// Variable assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub name: String,
    pub value: Word,
    /// `+=`
    pub append: bool,
}

impl Word {
    /// Create a simple unquoted word.
    pub fn literal(s: impl Into<String>) -> Self {
        Self {
            parts: vec![WordPart::Literal(s.into())],
        }
    }

    /// Create a fully quoted word.
    pub fn quoted(s: impl Into<String>) -> Self {
        Self {
            parts: vec![WordPart::Quoted(s.into())],
        }
    }

    /// Append a part, merging adjacent literal and adjacent quoted text.
    pub fn push(&mut self, part: WordPart) {
        match (self.parts.last_mut(), part) {
            (Some(WordPart::Literal(prev)), WordPart::Literal(next)) => prev.push_str(&next),
            (Some(WordPart::Quoted(prev)), WordPart::Quoted(next)) => prev.push_str(&next),
            (_, part) => self.parts.push(part),
        }
    }

    /// The text of an entirely unquoted, expansion-free word.
    ///
    /// Reserved words and function names are only recognized in this form.
    pub fn as_literal(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [WordPart::Literal(s)] => Some(s),
            _ => None,
        }
    }

    /// Whether any part involves quoting.
    pub fn has_quotes(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, WordPart::Quoted(_) | WordPart::DoubleQuoted(_)))
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl From<&str> for Word {
    fn from(s: &str) -> Self {
        Word::literal(s)
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum WordContext {
    /// Top-level shell word
    Normal,
    /// Inside `"..."`
    DoubleQuoted,
    /// Operand of `${name<op>...}`
    Parameter,
    /// Unquoted here-document body
    HereDoc,
}

/// Renders nodes, holding here-document bodies until the current line ends.
#[derive(Default)]
struct Printer {
    out: String,
    pending_heredocs: Vec<String>,
    wrote_heredoc: bool,
}

impl Printer {
    fn finish(mut self) -> String {
        if !self.pending_heredocs.is_empty() {
            self.newline();
        }
        self.out
    }

    fn newline(&mut self) {
        self.out.push('\n');
        for body in self.pending_heredocs.drain(..) {
            self.out.push_str(&body);
        }
    }

    fn push(&mut self, s: &str) {
        self.out.push_str(s);
    }

    fn commands(&mut self, commands: &[Command]) {
        for command in commands {
            self.command(command);
            self.newline();
        }
    }

    fn command(&mut self, command: &Command) {
        match command {
            Command::Simple(cmd) => self.simple(cmd),
            Command::Pipeline(pipeline) => {
                if pipeline.negated {
                    self.push("! ");
                }
                for (i, stage) in pipeline.commands.iter().enumerate() {
                    if i > 0 {
                        self.push(" | ");
                    }
                    self.command(stage);
                }
            }
            Command::List(list) => {
                self.command(&list.first);
                for (op, cmd) in &list.rest {
                    self.push(match op {
                        ListOperator::And => " && ",
                        ListOperator::Or => " || ",
                    });
                    self.command(cmd);
                }
                if list.background {
                    self.push(" &");
                }
            }
            Command::Compound(compound, redirects) => {
                self.compound(compound);
                for redirect in redirects {
                    self.push(" ");
                    self.redirect(redirect);
                }
            }
            Command::Function(func) => {
                self.push(&func.name);
                self.push("() ");
                self.command(&func.body);
            }
        }
    }

    fn simple(&mut self, cmd: &SimpleCommand) {
        let mut first = true;
        let mut sep = |p: &mut Printer| {
            if !first {
                p.push(" ");
            }
            first = false;
        };
        for assignment in &cmd.assignments {
            sep(self);
            self.push(&assignment.name);
            self.push(if assignment.append { "+=" } else { "=" });
            self.word(&assignment.value, WordContext::Normal);
        }
        if let Some(name) = &cmd.name {
            sep(self);
            self.word(name, WordContext::Normal);
        }
        for arg in &cmd.args {
            sep(self);
            self.word(arg, WordContext::Normal);
        }
        for redirect in &cmd.redirects {
            sep(self);
            self.redirect(redirect);
        }
    }

    fn compound(&mut self, compound: &CompoundCommand) {
        match compound {
            CompoundCommand::If(cmd) => {
                self.push("if");
                self.newline();
                self.commands(&cmd.condition);
                self.push("then");
                self.newline();
                self.commands(&cmd.then_branch);
                for (cond, body) in &cmd.elif_branches {
                    self.push("elif");
                    self.newline();
                    self.commands(cond);
                    self.push("then");
                    self.newline();
                    self.commands(body);
                }
                if let Some(body) = &cmd.else_branch {
                    self.push("else");
                    self.newline();
                    self.commands(body);
                }
                self.push("fi");
            }
            CompoundCommand::For(cmd) => {
                self.push("for ");
                self.push(&cmd.variable);
                if let Some(words) = &cmd.words {
                    self.push(" in");
                    for word in words {
                        self.push(" ");
                        self.word(word, WordContext::Normal);
                    }
                }
                self.newline();
                self.loop_body(&cmd.body);
            }
            CompoundCommand::ArithFor(cmd) => {
                self.push(&format!(
                    "for (({}; {}; {}))",
                    cmd.init, cmd.condition, cmd.step
                ));
                self.newline();
                self.loop_body(&cmd.body);
            }
            CompoundCommand::While(cmd) | CompoundCommand::Until(cmd) => {
                self.push(if matches!(compound, CompoundCommand::While(_)) {
                    "while"
                } else {
                    "until"
                });
                self.newline();
                self.commands(&cmd.condition);
                self.loop_body(&cmd.body);
            }
            CompoundCommand::Case(cmd) => {
                self.push("case ");
                self.word(&cmd.word, WordContext::Normal);
                self.push(" in");
                self.newline();
                for item in &cmd.cases {
                    for (i, pattern) in item.patterns.iter().enumerate() {
                        if i > 0 {
                            self.push("|");
                        }
                        self.word(pattern, WordContext::Normal);
                    }
                    self.push(")");
                    self.newline();
                    self.commands(&item.commands);
                    self.push(match item.terminator {
                        CaseTerminator::Break => ";;",
                        CaseTerminator::FallThrough => ";&",
                        CaseTerminator::Continue => ";;&",
                    });
                    self.newline();
                }
                self.push("esac");
            }
            CompoundCommand::Subshell(commands) => {
                self.push("(");
                self.newline();
                self.commands(commands);
                self.push(")");
            }
            CompoundCommand::BraceGroup(commands) => {
                self.push("{");
                self.newline();
                self.commands(commands);
                self.push("}");
            }
            CompoundCommand::Arithmetic(expr) => {
                self.push("((");
                self.push(expr);
                self.push("))");
            }
        }
    }

    fn loop_body(&mut self, body: &[Command]) {
        self.push("do");
        self.newline();
        self.commands(body);
        self.push("done");
    }

    fn redirect(&mut self, redirect: &Redirect) {
        if let Some(fd) = redirect.fd {
            self.push(&fd.to_string());
        }
        let (op, target) = match &redirect.kind {
            RedirectKind::Output(w) => (">", w),
            RedirectKind::Append(w) => (">>", w),
            RedirectKind::Clobber(w) => (">|", w),
            RedirectKind::Input(w) => ("<", w),
            RedirectKind::OutputBoth(w) => ("&>", w),
            RedirectKind::AppendBoth(w) => ("&>>", w),
            RedirectKind::DupOutput(w) => (">&", w),
            RedirectKind::DupInput(w) => ("<&", w),
            RedirectKind::HereString(w) => ("<<< ", w),
            RedirectKind::HereDoc(doc) => {
                self.heredoc(doc);
                return;
            }
        };
        self.push(op);
        self.word(target, WordContext::Normal);
    }

    fn heredoc(&mut self, doc: &HereDoc) {
        self.push(if doc.strip_tabs { "<<-" } else { "<<" });
        if doc.quoted {
            self.push("'");
            self.push(&doc.delimiter);
            self.push("'");
        } else {
            self.push(&doc.delimiter);
        }

        let mut body = Printer::default();
        if doc.quoted {
            for part in &doc.body.parts {
                if let WordPart::Quoted(text) | WordPart::Literal(text) = part {
                    body.push(text);
                }
            }
        } else {
            body.word(&doc.body, WordContext::HereDoc);
        }
        let mut text = body.out;
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&doc.delimiter);
        text.push('\n');
        self.pending_heredocs.push(text);
        self.wrote_heredoc = true;
    }

    fn word(&mut self, word: &Word, ctx: WordContext) {
        for part in &word.parts {
            self.part(part, ctx);
        }
    }

    fn part(&mut self, part: &WordPart, ctx: WordContext) {
        match part {
            WordPart::Literal(text) => self.literal(text, ctx),
            WordPart::Quoted(text) => match ctx {
                WordContext::DoubleQuoted | WordContext::HereDoc => self.literal(text, ctx),
                _ => {
                    self.push("'");
                    self.push(&text.replace('\'', r"'\''"));
                    self.push("'");
                }
            },
            WordPart::DoubleQuoted(parts) => {
                self.push("\"");
                for inner in parts {
                    self.part(inner, WordContext::DoubleQuoted);
                }
                self.push("\"");
            }
            WordPart::Variable(name) => {
                self.push("${");
                self.push(name);
                self.push("}");
            }
            WordPart::Parameter(param) => self.parameter(param),
            WordPart::CommandSubstitution(script) => {
                let mut inner = Printer::default();
                inner.commands(&script.commands);
                let wrote_heredoc = inner.wrote_heredoc;
                let mut text = inner.finish();
                if !wrote_heredoc {
                    while text.ends_with('\n') {
                        text.pop();
                    }
                }
                self.push("$(");
                // `$((` would start arithmetic
                if text.starts_with('(') {
                    self.push(" ");
                }
                self.push(&text);
                self.push(")");
            }
            WordPart::Arithmetic(expr) => {
                self.push("$((");
                self.push(expr);
                self.push("))");
            }
        }
    }

    fn literal(&mut self, text: &str, ctx: WordContext) {
        for ch in text.chars() {
            let escape = match ctx {
                WordContext::Normal => matches!(
                    ch,
                    ' ' | '\t' | '\n' | '|' | '&' | ';' | '<' | '>' | '(' | ')' | '\\' | '"'
                        | '\'' | '`'
                ),
                WordContext::DoubleQuoted | WordContext::HereDoc => {
                    matches!(ch, '$' | '`' | '\\') || (ch == '"' && ctx == WordContext::DoubleQuoted)
                }
                WordContext::Parameter => matches!(ch, '}' | '\\' | '"' | '\'' | '`'),
            };
            if escape {
                self.out.push('\\');
            }
            self.out.push(ch);
        }
    }

    fn parameter(&mut self, param: &ParameterExpansion) {
        let name = &param.name;
        self.push("${");
        match &param.op {
            ParameterOp::Length => {
                self.push("#");
                self.push(name);
            }
            ParameterOp::Indirect => {
                self.push("!");
                self.push(name);
            }
            ParameterOp::Default { word, colon }
            | ParameterOp::Assign { word, colon }
            | ParameterOp::Error { word, colon }
            | ParameterOp::Alternative { word, colon } => {
                self.push(name);
                if *colon {
                    self.push(":");
                }
                self.push(match &param.op {
                    ParameterOp::Default { .. } => "-",
                    ParameterOp::Assign { .. } => "=",
                    ParameterOp::Error { .. } => "?",
                    _ => "+",
                });
                self.word(word, WordContext::Parameter);
            }
            ParameterOp::RemovePrefix { pattern, longest } => {
                self.push(name);
                self.push(if *longest { "##" } else { "#" });
                self.word(pattern, WordContext::Parameter);
            }
            ParameterOp::RemoveSuffix { pattern, longest } => {
                self.push(name);
                self.push(if *longest { "%%" } else { "%" });
                self.word(pattern, WordContext::Parameter);
            }
            ParameterOp::Replace {
                pattern,
                replacement,
                mode,
            } => {
                self.push(name);
                self.push(match mode {
                    ReplaceMode::First => "/",
                    ReplaceMode::All => "//",
                    ReplaceMode::Prefix => "/#",
                    ReplaceMode::Suffix => "/%",
                });
                self.word(pattern, WordContext::Parameter);
                self.push("/");
                self.word(replacement, WordContext::Parameter);
            }
            ParameterOp::Case { upper, all } => {
                self.push(name);
                let ch = if *upper { "^" } else { "," };
                self.push(ch);
                if *all {
                    self.push(ch);
                }
            }
            ParameterOp::Substring { offset, length } => {
                self.push(name);
                self.push(":");
                // `${x:-1}` would read as a default value
                if offset.starts_with('-') {
                    self.push(" ");
                }
                self.push(offset);
                if let Some(length) = length {
                    self.push(":");
                    self.push(length);
                }
            }
            ParameterOp::Transform(op) => {
                self.push(name);
                self.push("@");
                self.out.push(*op);
            }
        }
        self.push("}");
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut printer = Printer::default();
        printer.commands(&self.commands);
        f.write_str(&printer.finish())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut printer = Printer::default();
        printer.command(self);
        f.write_str(&printer.finish())
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut printer = Printer::default();
        printer.word(self, WordContext::Normal);
        f.write_str(&printer.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_push_merges() {
        let mut word = Word::default();
        word.push(WordPart::Literal("a".into()));
        word.push(WordPart::Literal("b".into()));
        word.push(WordPart::Quoted("c".into()));
        word.push(WordPart::Quoted("d".into()));
        word.push(WordPart::Variable("x".into()));
        assert_eq!(
            word.parts,
            vec![
                WordPart::Literal("ab".into()),
                WordPart::Quoted("cd".into()),
                WordPart::Variable("x".into()),
            ]
        );
    }

    #[test]
    fn test_word_display_quotes() {
        let word = Word {
            parts: vec![
                WordPart::Quoted("it's".into()),
                WordPart::DoubleQuoted(vec![
                    WordPart::Literal("cost: $".into()),
                    WordPart::Variable("n".into()),
                ]),
            ],
        };
        assert_eq!(word.to_string(), r#"'it'\''s'"cost: \$${n}""#);
    }

    #[test]
    fn test_simple_command_display() {
        let cmd = Command::Simple(SimpleCommand {
            name: Some(Word::literal("echo")),
            args: vec![Word::literal("hi")],
            assignments: vec![Assignment {
                name: "A".into(),
                value: Word::literal("1"),
                append: false,
            }],
            redirects: vec![Redirect {
                fd: Some(2),
                kind: RedirectKind::DupOutput(Word::literal("1")),
            }],
        });
        assert_eq!(cmd.to_string(), "A=1 echo hi 2>&1");
    }
}
