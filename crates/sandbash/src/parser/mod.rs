//! Parser module for Sandbash
//!
//! Implements a recursive descent parser for shell scripts. The lexer hands
//! over fully structured words and complete here-documents, so the grammar
//! here only deals with commands, operators and reserved words.

mod ast;
mod lexer;
mod span;
mod tokens;

pub use ast::*;
pub use lexer::{Lexer, SpannedToken, parse_template};
pub use span::{Position, Span};
pub use tokens::{RedirectOp, Token, is_reserved};

use std::sync::Arc;

use crate::error::{Error, Result};

/// Nesting limit for compound commands within one parser.
const MAX_COMMAND_NESTING: usize = 200;

/// Parser for shell scripts.
pub struct Parser {
    lexer: Lexer,
    lookahead: Option<SpannedToken>,
    at_eof: bool,
    nesting: usize,
}

impl Parser {
    /// Create a new parser for the given input.
    pub fn new(input: &str) -> Self {
        Self::from_lexer(Lexer::new(input))
    }

    /// Parser for text nested in another word (backticks).
    pub(crate) fn with_depth(input: &str, depth: usize) -> Self {
        Self::from_lexer(Lexer::at(
            input.chars().collect(),
            0,
            Position::new(),
            depth,
        ))
    }

    fn from_lexer(lexer: Lexer) -> Self {
        Self {
            lexer,
            lookahead: None,
            at_eof: false,
            nesting: 0,
        }
    }

    /// Parse the input and return the AST.
    pub fn parse(mut self) -> Result<Script> {
        let commands = self.compound_list(&[])?;
        if let Some(token) = self.next()? {
            return Err(unexpected(&token));
        }
        Ok(Script { commands })
    }

    /// Parse the body of `$(...)` starting at `index`, through the closing
    /// parenthesis. Returns where the outer lexer resumes.
    pub(crate) fn parse_substitution(
        chars: Arc<[char]>,
        index: usize,
        position: Position,
        depth: usize,
    ) -> Result<(Script, usize, Position)> {
        let mut parser = Self::from_lexer(Lexer::at(chars, index, position, depth));
        let commands = parser.compound_list(&[])?;
        match parser.next()? {
            Some(SpannedToken {
                token: Token::RightParen,
                ..
            }) => {}
            Some(token) => return Err(unexpected(&token)),
            None => {
                return Err(parser.error("unexpected end of file while looking for matching `)'"));
            }
        }
        Ok((
            Script { commands },
            parser.lexer.index(),
            parser.lexer.position(),
        ))
    }

    // -- token plumbing ----------------------------------------------------

    fn fill(&mut self) -> Result<()> {
        if self.lookahead.is_none() && !self.at_eof {
            self.lookahead = self.lexer.next_token()?;
            self.at_eof = self.lookahead.is_none();
        }
        Ok(())
    }

    fn peek(&mut self) -> Result<Option<&Token>> {
        self.fill()?;
        Ok(self.lookahead.as_ref().map(|t| &t.token))
    }

    fn peek_keyword(&mut self) -> Result<Option<&'static str>> {
        Ok(self.peek()?.and_then(Token::keyword))
    }

    fn next(&mut self) -> Result<Option<SpannedToken>> {
        self.fill()?;
        Ok(self.lookahead.take())
    }

    /// Take the next token if it is a word.
    fn next_word(&mut self) -> Result<Option<Word>> {
        self.fill()?;
        match self.lookahead.take() {
            Some(SpannedToken {
                token: Token::Word(word),
                ..
            }) => Ok(Some(word)),
            other => {
                self.lookahead = other;
                Ok(None)
            }
        }
    }

    fn skip_newlines(&mut self) -> Result<()> {
        while matches!(self.peek()?, Some(Token::Newline)) {
            self.next()?;
        }
        Ok(())
    }

    fn error(&self, message: impl Into<String>) -> Error {
        let position = self.lexer.position();
        Error::syntax(message, position.line, position.column)
    }

    /// Error for whatever token comes next (or end of input).
    fn unexpected_next(&mut self) -> Error {
        match self.next() {
            Ok(Some(token)) => unexpected(&token),
            Ok(None) => self.error("syntax error: unexpected end of file"),
            Err(err) => err,
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.peek_keyword()? == Some(keyword) {
            self.next()?;
            Ok(())
        } else {
            Err(self.unexpected_next())
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        if self.peek()? == Some(expected) {
            self.next()?;
            Ok(())
        } else {
            Err(self.unexpected_next())
        }
    }

    // -- grammar -------------------------------------------------------------

    /// Commands separated by `;`, `&` or newlines, up to one of `terminators`
    /// (reserved words in command position), `)`, a case terminator or EOF.
    fn compound_list(&mut self, terminators: &[&str]) -> Result<Vec<Command>> {
        let mut commands = Vec::new();
        loop {
            self.skip_newlines()?;
            match self.peek()? {
                None
                | Some(
                    Token::RightParen
                    | Token::DoubleSemicolon
                    | Token::SemiAmp
                    | Token::DoubleSemiAmp,
                ) => break,
                Some(token) if token.keyword().is_some_and(|k| terminators.contains(&k)) => break,
                _ => {}
            }

            let command = self.and_or()?;
            match self.peek()? {
                Some(Token::Semicolon | Token::Newline) => {
                    self.next()?;
                    commands.push(command);
                }
                Some(Token::Background) => {
                    self.next()?;
                    commands.push(into_background(command));
                }
                _ => {
                    commands.push(command);
                    break;
                }
            }
        }
        Ok(commands)
    }

    /// Pipelines joined by `&&` / `||`.
    fn and_or(&mut self) -> Result<Command> {
        let first = self.pipeline()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek()? {
                Some(Token::And) => ListOperator::And,
                Some(Token::Or) => ListOperator::Or,
                _ => break,
            };
            self.next()?;
            self.skip_newlines()?;
            rest.push((op, self.pipeline()?));
        }

        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Command::List(CommandList {
                first: Box::new(first),
                rest,
                background: false,
            }))
        }
    }

    fn pipeline(&mut self) -> Result<Command> {
        let negated = self.peek_keyword()? == Some("!");
        if negated {
            self.next()?;
        }

        let mut commands = vec![self.command()?];
        while matches!(self.peek()?, Some(Token::Pipe)) {
            self.next()?;
            self.skip_newlines()?;
            commands.push(self.command()?);
        }

        if !negated && commands.len() == 1 {
            if let Some(command) = commands.pop() {
                return Ok(command);
            }
        }
        Ok(Command::Pipeline(Pipeline { negated, commands }))
    }

    fn command(&mut self) -> Result<Command> {
        self.nesting += 1;
        if self.nesting > MAX_COMMAND_NESTING {
            return Err(self.error("commands nested too deeply"));
        }
        let result = self.command_inner();
        self.nesting -= 1;
        result
    }

    fn command_inner(&mut self) -> Result<Command> {
        let compound = match self.peek()? {
            None => return Err(self.error("syntax error: unexpected end of file")),
            Some(Token::LeftParen) => {
                self.next()?;
                let commands = self.compound_list(&[])?;
                self.expect(&Token::RightParen)?;
                CompoundCommand::Subshell(commands)
            }
            Some(Token::Arithmetic(_)) => match self.next()? {
                Some(SpannedToken {
                    token: Token::Arithmetic(expr),
                    ..
                }) => CompoundCommand::Arithmetic(expr),
                _ => return Err(self.error("syntax error: unexpected end of file")),
            },
            Some(token) => match token.keyword() {
                Some("if") => self.if_command()?,
                Some("for") => self.for_command()?,
                Some("while") => CompoundCommand::While(self.while_command()?),
                Some("until") => CompoundCommand::Until(self.while_command()?),
                Some("case") => self.case_command()?,
                Some("{") => {
                    self.next()?;
                    let commands = self.compound_list(&["}"])?;
                    self.expect_keyword("}")?;
                    CompoundCommand::BraceGroup(commands)
                }
                Some("function") => {
                    self.next()?;
                    let Some(name) = self.next_word()? else {
                        return Err(self.unexpected_next());
                    };
                    let name = match name.as_literal() {
                        Some(name) if is_function_name(name) => name.to_string(),
                        _ => return Err(self.error(format!("`{name}': not a valid identifier"))),
                    };
                    if matches!(self.peek()?, Some(Token::LeftParen)) {
                        self.next()?;
                        self.expect(&Token::RightParen)?;
                    }
                    return self.function_body(name);
                }
                Some(keyword @ ("then" | "elif" | "else" | "fi" | "do" | "done" | "esac" | "}"
                | "in" | "!")) => {
                    return Err(self.error(format!(
                        "syntax error near unexpected token `{keyword}'"
                    )));
                }
                _ => return self.simple_command(),
            },
        };

        let mut redirects = Vec::new();
        while let Some(redirect) = self.redirect()? {
            redirects.push(redirect);
        }
        Ok(Command::Compound(compound, redirects))
    }

    fn function_body(&mut self, name: String) -> Result<Command> {
        self.skip_newlines()?;
        let body = self.command()?;
        if !matches!(body, Command::Compound(..)) {
            return Err(self.error(format!(
                "syntax error: function body of `{name}' must be a compound command"
            )));
        }
        Ok(Command::Function(FunctionDef {
            name,
            body: Box::new(body),
        }))
    }

    fn simple_command(&mut self) -> Result<Command> {
        let mut cmd = SimpleCommand::default();
        loop {
            if let Some(redirect) = self.redirect()? {
                cmd.redirects.push(redirect);
                continue;
            }
            let Some(word) = self.next_word()? else {
                break;
            };

            if cmd.name.is_some() {
                cmd.args.push(word);
                continue;
            }
            if let Some(assignment) = split_assignment(&word) {
                cmd.assignments.push(assignment);
                continue;
            }
            // name() compound-command
            if cmd.assignments.is_empty()
                && cmd.redirects.is_empty()
                && matches!(self.peek()?, Some(Token::LeftParen))
                && let Some(name) = word.as_literal().filter(|n| is_function_name(n))
            {
                let name = name.to_string();
                self.next()?;
                self.expect(&Token::RightParen)?;
                return self.function_body(name);
            }
            cmd.name = Some(word);
        }

        if cmd.name.is_none() && cmd.assignments.is_empty() && cmd.redirects.is_empty() {
            return Err(self.unexpected_next());
        }
        Ok(Command::Simple(cmd))
    }

    fn redirect(&mut self) -> Result<Option<Redirect>> {
        self.fill()?;
        match self.lookahead.take() {
            Some(SpannedToken {
                token: Token::HereDoc { fd, doc },
                ..
            }) => Ok(Some(Redirect {
                fd,
                kind: RedirectKind::HereDoc(doc),
            })),
            Some(SpannedToken {
                token: Token::Redirect { fd, op },
                ..
            }) => {
                let Some(target) = self.next_word()? else {
                    return Err(self.unexpected_next());
                };
                let kind = match op {
                    RedirectOp::Output => RedirectKind::Output(target),
                    RedirectOp::Append => RedirectKind::Append(target),
                    RedirectOp::Clobber => RedirectKind::Clobber(target),
                    RedirectOp::Input => RedirectKind::Input(target),
                    RedirectOp::OutputBoth => RedirectKind::OutputBoth(target),
                    RedirectOp::AppendBoth => RedirectKind::AppendBoth(target),
                    RedirectOp::DupOutput => RedirectKind::DupOutput(target),
                    RedirectOp::DupInput => RedirectKind::DupInput(target),
                    RedirectOp::HereString => RedirectKind::HereString(target),
                };
                Ok(Some(Redirect { fd, kind }))
            }
            other => {
                self.lookahead = other;
                Ok(None)
            }
        }
    }

    fn if_command(&mut self) -> Result<CompoundCommand> {
        self.expect_keyword("if")?;
        let condition = self.compound_list(&["then"])?;
        self.expect_keyword("then")?;
        let then_branch = self.compound_list(&["elif", "else", "fi"])?;

        let mut elif_branches = Vec::new();
        let mut else_branch = None;
        loop {
            match self.peek_keyword()? {
                Some("elif") => {
                    self.next()?;
                    let cond = self.compound_list(&["then"])?;
                    self.expect_keyword("then")?;
                    let body = self.compound_list(&["elif", "else", "fi"])?;
                    elif_branches.push((cond, body));
                }
                Some("else") => {
                    self.next()?;
                    else_branch = Some(self.compound_list(&["fi"])?);
                    self.expect_keyword("fi")?;
                    break;
                }
                _ => {
                    self.expect_keyword("fi")?;
                    break;
                }
            }
        }

        Ok(CompoundCommand::If(IfCommand {
            condition,
            then_branch,
            elif_branches,
            else_branch,
        }))
    }

    fn loop_body(&mut self) -> Result<Vec<Command>> {
        self.skip_newlines()?;
        self.expect_keyword("do")?;
        let body = self.compound_list(&["done"])?;
        self.expect_keyword("done")?;
        Ok(body)
    }

    fn for_command(&mut self) -> Result<CompoundCommand> {
        self.expect_keyword("for")?;

        if matches!(self.peek()?, Some(Token::Arithmetic(_))) {
            let Some(SpannedToken {
                token: Token::Arithmetic(header),
                ..
            }) = self.next()?
            else {
                return Err(self.error("syntax error: unexpected end of file"));
            };
            let clauses = split_arith_for(&header)
                .ok_or_else(|| self.error(format!("syntax error in for header: (({header}))")))?;
            if matches!(self.peek()?, Some(Token::Semicolon)) {
                self.next()?;
            }
            let body = self.loop_body()?;
            let [init, condition, step] = clauses;
            return Ok(CompoundCommand::ArithFor(ArithForCommand {
                init,
                condition,
                step,
                body,
            }));
        }

        let variable = match self.next_word()? {
            Some(word) => match word.as_literal() {
                Some(name) if is_identifier(name) => name.to_string(),
                _ => return Err(self.error(format!("`{word}': not a valid identifier"))),
            },
            None => return Err(self.unexpected_next()),
        };

        self.skip_newlines()?;
        let mut words = None;
        if self.peek_keyword()? == Some("in") {
            self.next()?;
            let mut list = Vec::new();
            while let Some(word) = self.next_word()? {
                list.push(word);
            }
            words = Some(list);
        }
        if matches!(self.peek()?, Some(Token::Semicolon | Token::Newline)) {
            self.next()?;
        }
        let body = self.loop_body()?;

        Ok(CompoundCommand::For(ForCommand {
            variable,
            words,
            body,
        }))
    }

    /// `while` and `until` share a shape.
    fn while_command(&mut self) -> Result<WhileCommand> {
        self.next()?;
        let condition = self.compound_list(&["do"])?;
        let body = self.loop_body()?;
        Ok(WhileCommand { condition, body })
    }

    fn case_command(&mut self) -> Result<CompoundCommand> {
        self.expect_keyword("case")?;
        let Some(word) = self.next_word()? else {
            return Err(self.unexpected_next());
        };
        self.skip_newlines()?;
        self.expect_keyword("in")?;

        let mut cases = Vec::new();
        loop {
            self.skip_newlines()?;
            if self.peek_keyword()? == Some("esac") {
                self.next()?;
                break;
            }
            if matches!(self.peek()?, Some(Token::LeftParen)) {
                self.next()?;
            }

            let mut patterns = Vec::new();
            loop {
                let Some(pattern) = self.next_word()? else {
                    return Err(self.unexpected_next());
                };
                patterns.push(pattern);
                if matches!(self.peek()?, Some(Token::Pipe)) {
                    self.next()?;
                } else {
                    break;
                }
            }
            self.expect(&Token::RightParen)?;

            let commands = self.compound_list(&["esac"])?;
            let terminator = match self.peek()? {
                Some(Token::DoubleSemicolon) => Some(CaseTerminator::Break),
                Some(Token::SemiAmp) => Some(CaseTerminator::FallThrough),
                Some(Token::DoubleSemiAmp) => Some(CaseTerminator::Continue),
                _ => None,
            };
            if terminator.is_some() {
                self.next()?;
            } else if self.peek_keyword()? != Some("esac") {
                return Err(self.unexpected_next());
            }
            cases.push(CaseItem {
                patterns,
                commands,
                terminator: terminator.unwrap_or(CaseTerminator::Break),
            });
        }

        Ok(CompoundCommand::Case(CaseCommand { word, cases }))
    }
}

fn unexpected(token: &SpannedToken) -> Error {
    Error::syntax(
        format!(
            "syntax error near unexpected token `{}'",
            token.token.describe()
        ),
        token.span.start.line,
        token.span.start.column,
    )
}

/// `a && b &` backgrounds the whole and-or list.
fn into_background(command: Command) -> Command {
    match command {
        Command::List(mut list) => {
            list.background = true;
            Command::List(list)
        }
        other => Command::List(CommandList {
            first: Box::new(other),
            rest: Vec::new(),
            background: true,
        }),
    }
}

/// Whether `name` is a valid variable name.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_function_name(name: &str) -> bool {
    !name.is_empty()
        && !is_reserved(name)
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '@'))
}

/// Recognize `NAME=value` / `NAME+=value` at the start of a word.
fn split_assignment(word: &Word) -> Option<Assignment> {
    let Some(WordPart::Literal(head)) = word.parts.first() else {
        return None;
    };
    let eq = head.find('=')?;
    let (name, append) = match head[..eq].strip_suffix('+') {
        Some(name) => (name, true),
        None => (&head[..eq], false),
    };
    if !is_identifier(name) {
        return None;
    }

    let mut value = Word::default();
    let rest = &head[eq + 1..];
    if !rest.is_empty() {
        value.push(WordPart::Literal(rest.to_string()));
    }
    for part in &word.parts[1..] {
        value.push(part.clone());
    }
    Some(Assignment {
        name: name.to_string(),
        value,
        append,
    })
}

/// Split `init; cond; step` at top-level semicolons.
fn split_arith_for(header: &str) -> Option<[String; 3]> {
    let mut clauses = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in header.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ';' if depth == 0 => {
                clauses.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    clauses.push(current.trim().to_string());
    clauses.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(input: &str) -> Script {
        Parser::new(input).parse().unwrap()
    }

    fn parse_err(input: &str) -> String {
        match Parser::new(input).parse() {
            Err(Error::Syntax { message, .. }) => message,
            other => panic!("expected syntax error for {input:?}, got {other:?}"),
        }
    }

    fn simple(cmd: &Command) -> &SimpleCommand {
        match cmd {
            Command::Simple(cmd) => cmd,
            other => panic!("expected simple command, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_simple_command() {
        let script = parse("echo hello world");
        assert_eq!(script.commands.len(), 1);
        let cmd = simple(&script.commands[0]);
        assert_eq!(cmd.name, Some(Word::literal("echo")));
        assert_eq!(cmd.args, vec![Word::literal("hello"), Word::literal("world")]);
    }

    #[test]
    fn test_parse_assignments_and_redirects() {
        let script = parse("A=1 B+=x cmd arg 2>&1 >/tmp/out");
        let cmd = simple(&script.commands[0]);
        assert_eq!(cmd.assignments.len(), 2);
        assert!(cmd.assignments[1].append);
        assert_eq!(cmd.assignments[1].value, Word::literal("x"));
        assert_eq!(cmd.redirects.len(), 2);
        assert_eq!(
            cmd.redirects[0],
            Redirect {
                fd: Some(2),
                kind: RedirectKind::DupOutput(Word::literal("1")),
            }
        );
    }

    #[test]
    fn test_parse_pipeline_and_lists() {
        let script = parse("! a | b && c || d &\ne");
        assert_eq!(script.commands.len(), 2);
        let Command::List(list) = &script.commands[0] else {
            panic!("expected list");
        };
        assert!(list.background);
        assert_eq!(list.rest.len(), 2);
        assert!(matches!(&*list.first, Command::Pipeline(p) if p.negated && p.commands.len() == 2));
    }

    #[test]
    fn test_parse_control_flow() {
        let script = parse(
            "if true; then echo a; elif false; then echo b; else echo c; fi\n\
             for x in 1 2; do echo $x; done\n\
             while false; do :; done\n\
             case $v in a|b) echo ab;; *) echo other;& esac",
        );
        assert_eq!(script.commands.len(), 4);
        match &script.commands[0] {
            Command::Compound(CompoundCommand::If(cmd), _) => {
                assert_eq!(cmd.elif_branches.len(), 1);
                assert!(cmd.else_branch.is_some());
            }
            other => panic!("expected if, got {other:?}"),
        }
        match &script.commands[3] {
            Command::Compound(CompoundCommand::Case(cmd), _) => {
                assert_eq!(cmd.cases.len(), 2);
                assert_eq!(cmd.cases[0].patterns.len(), 2);
                assert_eq!(cmd.cases[1].terminator, CaseTerminator::FallThrough);
            }
            other => panic!("expected case, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_functions() {
        let script = parse("greet() { echo hi; }\nfunction bye { echo bye; } > /dev/null");
        let Command::Function(def) = &script.commands[0] else {
            panic!("expected function");
        };
        assert_eq!(def.name, "greet");
        let Command::Function(def) = &script.commands[1] else {
            panic!("expected function");
        };
        assert!(matches!(&*def.body, Command::Compound(CompoundCommand::BraceGroup(_), r) if r.len() == 1));
    }

    #[test]
    fn test_parse_arith_for_and_command() {
        let script = parse("for ((i=0; i<3; i++)); do echo $i; done\n(( x += 1 ))");
        assert_eq!(
            script.commands[0],
            Command::Compound(
                CompoundCommand::ArithFor(ArithForCommand {
                    init: "i=0".into(),
                    condition: "i<3".into(),
                    step: "i++".into(),
                    body: parse("echo $i").commands,
                }),
                vec![],
            )
        );
        assert!(matches!(
            &script.commands[1],
            Command::Compound(CompoundCommand::Arithmetic(e), _) if e == " x += 1 "
        ));
    }

    #[test]
    fn test_parse_command_substitution() {
        let script = parse("echo $(echo a; echo b) `echo c`");
        let cmd = simple(&script.commands[0]);
        let WordPart::CommandSubstitution(inner) = &cmd.args[0].parts[0] else {
            panic!("expected substitution");
        };
        assert_eq!(inner.commands.len(), 2);
        assert!(matches!(&cmd.args[1].parts[0], WordPart::CommandSubstitution(_)));
    }

    #[test]
    fn test_parse_heredoc_then_next_command() {
        let script = parse("cat <<EOF\nhello\nEOF\necho after");
        assert_eq!(script.commands.len(), 2);
        let cmd = simple(&script.commands[0]);
        assert!(matches!(&cmd.redirects[0].kind, RedirectKind::HereDoc(doc) if doc.delimiter == "EOF"));
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(parse_err("if true; then echo"), "syntax error: unexpected end of file");
        assert_eq!(parse_err("echo a; fi"), "syntax error near unexpected token `fi'");
        assert_eq!(parse_err("a | | b"), "syntax error near unexpected token `|'");
        assert_eq!(parse_err("echo \"open"), "unterminated double quote");
        assert_eq!(parse_err("( echo"), "syntax error: unexpected end of file");
    }

    #[test]
    fn test_round_trip_examples() {
        for src in [
            "echo \"a $b ${c:-d e}\" 'x y' \\$z",
            "f() { local n=$1; return $((n + 1)); }",
            "for w in $VAR; do echo $w; done | sort > out.txt",
            "case $x in (a) ;; *.txt|b) echo t ;;& esac",
            "cat <<-EOF | wc -l\n\tline $HOME\n\tEOF\necho done",
            "x=$(cat <<'E'\n$raw\nE\n) && echo ${x//a/b} ${#x} ${x: -2:1}",
            "(cd /tmp && ls) || { echo fail; exit 1; }",
        ] {
            let first = parse(src);
            let printed = first.to_string();
            let second = Parser::new(&printed)
                .parse()
                .unwrap_or_else(|e| panic!("reparse of {printed:?} failed: {e}"));
            assert_eq!(first, second, "printed form:\n{printed}");
        }
    }
}
