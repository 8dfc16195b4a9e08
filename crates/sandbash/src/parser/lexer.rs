//! Lexer for shell scripts
//!
//! Tokenizes input into a stream of tokens with source position tracking.
//! Words come out already structured: quoting is resolved into
//! [`WordPart`]s and command substitutions are parsed recursively, so the
//! parser never looks inside a word again.

use std::sync::Arc;

use super::Parser;
use super::ast::{
    HereDoc, ParameterExpansion, ParameterOp, ReplaceMode, Word, WordPart,
};
use super::span::{Position, Span};
use super::tokens::{RedirectOp, Token};
use crate::error::{Error, Result};

/// Nesting limit for `$(...)`, backticks and `${...}` inside each other.
pub(crate) const MAX_NESTING: usize = 64;

/// A token with its source location span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Where pending here-document bodies live: the rest of the current line is
/// still to be lexed, then lexing resumes after the bodies.
#[derive(Debug, Clone, Copy)]
struct HeredocSkip {
    line_end: usize,
    resume: usize,
}

/// Lexer for shell scripts.
pub struct Lexer {
    chars: Arc<[char]>,
    index: usize,
    position: Position,
    heredoc_skip: Option<HeredocSkip>,
    depth: usize,
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_metachar(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '|' | '&' | ';' | '<' | '>' | '(' | ')')
}

impl Lexer {
    /// Create a new lexer for the given input.
    pub fn new(input: &str) -> Self {
        Self::at(input.chars().collect(), 0, Position::new(), 0)
    }

    /// Continue lexing shared input from `index` (nested substitutions).
    pub(crate) fn at(chars: Arc<[char]>, index: usize, position: Position, depth: usize) -> Self {
        Self {
            chars,
            index,
            position,
            heredoc_skip: None,
            depth,
        }
    }

    /// Get the current position in the input.
    pub fn position(&self) -> Position {
        self.position
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.index + ahead).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.index += 1;
        self.position.advance(ch);

        if ch == '\n'
            && let Some(skip) = self.heredoc_skip
            && self.index == skip.line_end + 1
        {
            // Jump over the here-document bodies read ahead of time.
            while self.index < skip.resume {
                let skipped = self.chars[self.index];
                self.position.advance(skipped);
                self.index += 1;
            }
            self.heredoc_skip = None;
        }
        Some(ch)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::syntax(message, self.position.line, self.position.column)
    }

    /// Get the next token with its source span.
    pub fn next_token(&mut self) -> Result<Option<SpannedToken>> {
        self.skip_blanks();
        let start = self.position;
        let Some(ch) = self.peek() else {
            return Ok(None);
        };

        let token = match ch {
            '\n' => {
                self.advance();
                Token::Newline
            }
            ';' => {
                self.advance();
                if self.eat(';') {
                    if self.eat('&') {
                        Token::DoubleSemiAmp
                    } else {
                        Token::DoubleSemicolon
                    }
                } else if self.eat('&') {
                    Token::SemiAmp
                } else {
                    Token::Semicolon
                }
            }
            '|' => {
                self.advance();
                if self.eat('|') { Token::Or } else { Token::Pipe }
            }
            '&' => {
                self.advance();
                if self.eat('&') {
                    Token::And
                } else if self.eat('>') {
                    let op = if self.eat('>') {
                        RedirectOp::AppendBoth
                    } else {
                        RedirectOp::OutputBoth
                    };
                    Token::Redirect { fd: None, op }
                } else {
                    Token::Background
                }
            }
            '(' => {
                self.advance();
                if self.peek() == Some('(') {
                    self.advance();
                    Token::Arithmetic(self.read_arithmetic_body()?)
                } else {
                    Token::LeftParen
                }
            }
            ')' => {
                self.advance();
                Token::RightParen
            }
            '<' | '>' => self.read_redirect(None)?,
            c if c.is_ascii_digit() && self.digits_before_redirect() => {
                let mut digits = String::new();
                while let Some(d) = self.peek().filter(char::is_ascii_digit) {
                    digits.push(d);
                    self.advance();
                }
                let fd = digits
                    .parse::<u32>()
                    .map_err(|_| self.error(format!("bad file descriptor: {digits}")))?;
                self.read_redirect(Some(fd))?
            }
            _ => Token::Word(self.read_word()?),
        };

        Ok(Some(SpannedToken {
            token,
            span: Span {
                start,
                end: self.position,
            },
        }))
    }

    fn skip_blanks(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => {
                    self.advance();
                }
                Some('\\') if self.peek_at(1) == Some('\n') => {
                    self.advance();
                    self.advance();
                }
                Some('#') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn digits_before_redirect(&self) -> bool {
        let mut i = self.index;
        while self.chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        matches!(self.chars.get(i), Some('<' | '>'))
    }

    fn read_redirect(&mut self, fd: Option<u32>) -> Result<Token> {
        let op = match self.advance() {
            Some('>') => {
                if self.eat('>') {
                    RedirectOp::Append
                } else if self.eat('&') {
                    RedirectOp::DupOutput
                } else if self.eat('|') {
                    RedirectOp::Clobber
                } else {
                    RedirectOp::Output
                }
            }
            _ => {
                if self.eat('<') {
                    if self.eat('<') {
                        RedirectOp::HereString
                    } else {
                        let strip = self.eat('-');
                        return self.read_heredoc(fd, strip);
                    }
                } else if self.eat('&') {
                    RedirectOp::DupInput
                } else {
                    // `<>` opens read-write; reading is all a virtual file needs
                    self.eat('>');
                    RedirectOp::Input
                }
            }
        };
        Ok(Token::Redirect { fd, op })
    }

    /// Read `DELIM` after `<<` and the body lines that follow the current line.
    fn read_heredoc(&mut self, fd: Option<u32>, strip_tabs: bool) -> Result<Token> {
        while matches!(self.peek(), Some(' ' | '\t')) {
            self.advance();
        }

        let mut delimiter = String::new();
        let mut quoted = false;
        while let Some(c) = self.peek() {
            if is_metachar(c) {
                break;
            }
            self.advance();
            match c {
                '\'' | '"' => {
                    quoted = true;
                    loop {
                        match self.advance() {
                            Some(q) if q == c => break,
                            Some(q) => delimiter.push(q),
                            None => return Err(self.error("unterminated here-document delimiter")),
                        }
                    }
                }
                '\\' => {
                    quoted = true;
                    if let Some(next) = self.advance() {
                        delimiter.push(next);
                    }
                }
                _ => delimiter.push(c),
            }
        }
        if delimiter.is_empty() && !quoted {
            return Err(self.error("missing here-document delimiter"));
        }

        let len = self.chars.len();
        let (line_end, body_start) = match self.heredoc_skip {
            Some(skip) => (skip.line_end, skip.resume),
            None => {
                let line_end = (self.index..len)
                    .find(|&i| self.chars[i] == '\n')
                    .unwrap_or(len);
                (line_end, (line_end + 1).min(len))
            }
        };

        let mut lines = Vec::new();
        let mut i = body_start;
        while i < len {
            let line_start = i;
            while i < len && self.chars[i] != '\n' {
                i += 1;
            }
            let line: String = self.chars[line_start..i].iter().collect();
            i = (i + 1).min(len);
            let line = if strip_tabs {
                line.trim_start_matches('\t').to_string()
            } else {
                line
            };
            if line == delimiter {
                break;
            }
            lines.push(line);
        }
        self.heredoc_skip = Some(HeredocSkip {
            line_end,
            resume: i,
        });

        let mut text = lines.join("\n");
        if !lines.is_empty() {
            text.push('\n');
        }
        let body = if quoted {
            Word::quoted(text)
        } else {
            parse_template_at_depth(&text, self.depth)?
        };

        Ok(Token::HereDoc {
            fd,
            doc: HereDoc {
                delimiter,
                quoted,
                strip_tabs,
                body,
            },
        })
    }

    /// Read up to the `))` that closes an arithmetic expression. The opening
    /// `((` has been consumed.
    fn read_arithmetic_body(&mut self) -> Result<String> {
        let mut text = String::new();
        let mut depth = 0usize;
        loop {
            match self.advance() {
                Some('(') => {
                    depth += 1;
                    text.push('(');
                }
                Some(')') if depth == 0 => {
                    if self.eat(')') {
                        return Ok(text);
                    }
                    return Err(self.error("expected `))' to close arithmetic expression"));
                }
                Some(')') => {
                    depth -= 1;
                    text.push(')');
                }
                Some(c) => text.push(c),
                None => return Err(self.error("unterminated arithmetic expression")),
            }
        }
    }

    /// Read one shell word.
    fn read_word(&mut self) -> Result<Word> {
        let mut word = Word::default();
        while let Some(c) = self.peek() {
            match c {
                c if is_metachar(c) => break,
                '\\' => {
                    self.advance();
                    match self.advance() {
                        Some('\n') => {}
                        Some(next) => word.push(WordPart::Quoted(next.to_string())),
                        None => word.push(WordPart::Literal("\\".to_string())),
                    }
                }
                '\'' => {
                    self.advance();
                    word.push(WordPart::Quoted(self.read_single_quoted()?));
                }
                '"' => {
                    self.advance();
                    word.push(self.read_double_quoted()?);
                }
                '$' => word.push(self.read_dollar(false)?),
                '`' => {
                    self.advance();
                    word.push(self.read_backtick()?);
                }
                c => {
                    self.advance();
                    word.push(WordPart::Literal(c.to_string()));
                }
            }
        }
        Ok(word)
    }

    fn read_single_quoted(&mut self) -> Result<String> {
        let mut text = String::new();
        loop {
            match self.advance() {
                Some('\'') => return Ok(text),
                Some(c) => text.push(c),
                None => return Err(self.error("unterminated single quote")),
            }
        }
    }

    /// Body of `"..."`, opening quote consumed.
    fn read_double_quoted(&mut self) -> Result<WordPart> {
        let mut inner = Word::default();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated double quote")),
                Some('"') => {
                    self.advance();
                    return Ok(WordPart::DoubleQuoted(inner.parts));
                }
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some('\n') => {}
                        Some(c @ ('$' | '`' | '"' | '\\')) => {
                            inner.push(WordPart::Literal(c.to_string()))
                        }
                        Some(c) => inner.push(WordPart::Literal(format!("\\{c}"))),
                        None => return Err(self.error("unterminated double quote")),
                    }
                }
                Some('$') => inner.push(self.read_dollar(true)?),
                Some('`') => {
                    self.advance();
                    inner.push(self.read_backtick()?);
                }
                Some(c) => {
                    self.advance();
                    inner.push(WordPart::Literal(c.to_string()));
                }
            }
        }
    }

    /// `$'...'` with C escapes, opening `$'` consumed.
    fn read_ansi_c(&mut self) -> Result<String> {
        let mut text = String::new();
        loop {
            match self.advance() {
                Some('\'') => return Ok(text),
                Some('\\') => match self.advance() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('a') => text.push('\x07'),
                    Some('b') => text.push('\x08'),
                    Some('e' | 'E') => text.push('\x1b'),
                    Some('0') => text.push('\0'),
                    Some(c @ ('\\' | '\'' | '"')) => text.push(c),
                    Some(c) => {
                        text.push('\\');
                        text.push(c);
                    }
                    None => return Err(self.error("unterminated quote")),
                },
                Some(c) => text.push(c),
                None => return Err(self.error("unterminated quote")),
            }
        }
    }

    /// Everything introduced by `$`. The `$` has not been consumed.
    fn read_dollar(&mut self, in_double_quotes: bool) -> Result<WordPart> {
        self.advance();
        match self.peek() {
            Some('(') if self.peek_at(1) == Some('(') => {
                self.advance();
                self.advance();
                Ok(WordPart::Arithmetic(self.read_arithmetic_body()?))
            }
            Some('(') => {
                self.advance();
                self.read_command_substitution()
            }
            Some('{') => {
                self.advance();
                self.read_braced_parameter()
            }
            Some('\'') if !in_double_quotes => {
                self.advance();
                Ok(WordPart::Quoted(self.read_ansi_c()?))
            }
            Some('"') if !in_double_quotes => {
                self.advance();
                self.read_double_quoted()
            }
            Some(c) if is_name_start(c) => {
                let mut name = String::new();
                while let Some(c) = self.peek().filter(|c| is_name_char(*c)) {
                    name.push(c);
                    self.advance();
                }
                Ok(WordPart::Variable(name))
            }
            Some(c) if c.is_ascii_digit() || matches!(c, '@' | '*' | '#' | '?' | '-' | '$' | '!') => {
                self.advance();
                Ok(WordPart::Variable(c.to_string()))
            }
            _ => Ok(WordPart::Literal("$".to_string())),
        }
    }

    fn nested_depth(&self) -> Result<usize> {
        let depth = self.depth + 1;
        if depth > MAX_NESTING {
            return Err(self.error("expansions nested too deeply"));
        }
        Ok(depth)
    }

    /// `$(...)`, opening `$(` consumed.
    fn read_command_substitution(&mut self) -> Result<WordPart> {
        let depth = self.nested_depth()?;
        let (script, index, position) =
            Parser::parse_substitution(self.chars.clone(), self.index, self.position, depth)?;
        self.index = index;
        self.position = position;
        Ok(WordPart::CommandSubstitution(Box::new(script)))
    }

    /// `` `...` ``, opening backtick consumed.
    fn read_backtick(&mut self) -> Result<WordPart> {
        let depth = self.nested_depth()?;
        let mut inner = String::new();
        loop {
            match self.advance() {
                Some('`') => break,
                Some('\\') => match self.advance() {
                    Some(c @ ('`' | '\\' | '$')) => inner.push(c),
                    Some(c) => {
                        inner.push('\\');
                        inner.push(c);
                    }
                    None => return Err(self.error("unterminated backquote")),
                },
                Some(c) => inner.push(c),
                None => return Err(self.error("unterminated backquote")),
            }
        }
        let script = Parser::with_depth(&inner, depth).parse()?;
        Ok(WordPart::CommandSubstitution(Box::new(script)))
    }

    fn read_parameter_name(&mut self) -> String {
        match self.peek() {
            Some(c) if is_name_start(c) => {
                let mut name = String::new();
                while let Some(c) = self.peek().filter(|c| is_name_char(*c)) {
                    name.push(c);
                    self.advance();
                }
                name
            }
            Some(c) if c.is_ascii_digit() => {
                let mut name = String::new();
                while let Some(c) = self.peek().filter(char::is_ascii_digit) {
                    name.push(c);
                    self.advance();
                }
                name
            }
            Some(c @ ('@' | '*' | '#' | '?' | '-' | '$' | '!')) => {
                self.advance();
                c.to_string()
            }
            _ => String::new(),
        }
    }

    fn expect_close_brace(&mut self) -> Result<()> {
        if self.eat('}') {
            Ok(())
        } else {
            Err(self.error("bad substitution"))
        }
    }

    /// `${...}`, opening `${` consumed.
    fn read_braced_parameter(&mut self) -> Result<WordPart> {
        self.nested_depth()?;

        // ${#name} / ${!name}, but ${#} and ${!} are the specials themselves
        if let Some(prefix @ ('#' | '!')) = self.peek()
            && self.peek_at(1) != Some('}')
        {
            self.advance();
            let name = self.read_parameter_name();
            if name.is_empty() {
                return Err(self.error("bad substitution"));
            }
            self.expect_close_brace()?;
            let op = if prefix == '#' {
                ParameterOp::Length
            } else {
                ParameterOp::Indirect
            };
            return Ok(WordPart::Parameter(ParameterExpansion { name, op }));
        }

        let name = self.read_parameter_name();
        if name.is_empty() {
            return Err(self.error("bad substitution"));
        }

        let op = match self.advance() {
            Some('}') => return Ok(WordPart::Variable(name)),
            Some(':') => match self.peek() {
                Some(c @ ('-' | '=' | '?' | '+')) => {
                    self.advance();
                    let word = self.read_parameter_operand(false)?;
                    default_op(c, word, true)
                }
                _ => {
                    let offset = self.read_raw_until(&[':', '}'])?;
                    let length = if self.eat(':') {
                        Some(self.read_raw_until(&['}'])?)
                    } else {
                        None
                    };
                    ParameterOp::Substring { offset, length }
                }
            },
            Some(c @ ('-' | '=' | '?' | '+')) => {
                let word = self.read_parameter_operand(false)?;
                default_op(c, word, false)
            }
            Some('#') => {
                let longest = self.eat('#');
                ParameterOp::RemovePrefix {
                    pattern: self.read_parameter_operand(false)?,
                    longest,
                }
            }
            Some('%') => {
                let longest = self.eat('%');
                ParameterOp::RemoveSuffix {
                    pattern: self.read_parameter_operand(false)?,
                    longest,
                }
            }
            Some('/') => {
                let mode = if self.eat('/') {
                    ReplaceMode::All
                } else if self.eat('#') {
                    ReplaceMode::Prefix
                } else if self.eat('%') {
                    ReplaceMode::Suffix
                } else {
                    ReplaceMode::First
                };
                let pattern = self.read_parameter_operand(true)?;
                let replacement = if self.eat('/') {
                    self.read_parameter_operand(false)?
                } else {
                    Word::default()
                };
                ParameterOp::Replace {
                    pattern,
                    replacement,
                    mode,
                }
            }
            Some(c @ ('^' | ',')) => {
                let all = self.eat(c);
                ParameterOp::Case {
                    upper: c == '^',
                    all,
                }
            }
            Some('@') => match self.advance() {
                Some(op @ ('Q' | 'U' | 'L' | 'u' | 'E')) => ParameterOp::Transform(op),
                _ => return Err(self.error("bad substitution")),
            },
            _ => return Err(self.error("bad substitution")),
        };

        self.expect_close_brace()?;
        Ok(WordPart::Parameter(ParameterExpansion { name, op }))
    }

    /// Raw text (for arithmetic offsets) up to one of `stops` at paren depth 0.
    fn read_raw_until(&mut self, stops: &[char]) -> Result<String> {
        let mut text = String::new();
        let mut depth = 0usize;
        loop {
            match self.peek() {
                None => return Err(self.error("bad substitution")),
                Some(c) if depth == 0 && stops.contains(&c) => return Ok(text),
                Some(c) => {
                    match c {
                        '(' => depth += 1,
                        ')' => depth = depth.saturating_sub(1),
                        _ => {}
                    }
                    text.push(c);
                    self.advance();
                }
            }
        }
    }

    /// Operand word inside `${...}`. Whitespace is literal here; stops
    /// (without consuming) at `}` and, for replace patterns, at `/`.
    fn read_parameter_operand(&mut self, stop_at_slash: bool) -> Result<Word> {
        let mut word = Word::default();
        loop {
            match self.peek() {
                None => return Err(self.error("bad substitution")),
                Some('}') => return Ok(word),
                Some('/') if stop_at_slash => return Ok(word),
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some('\n') => {}
                        Some(c) => word.push(WordPart::Quoted(c.to_string())),
                        None => return Err(self.error("bad substitution")),
                    }
                }
                Some('\'') => {
                    self.advance();
                    word.push(WordPart::Quoted(self.read_single_quoted()?));
                }
                Some('"') => {
                    self.advance();
                    word.push(self.read_double_quoted()?);
                }
                Some('$') => word.push(self.read_dollar(false)?),
                Some('`') => {
                    self.advance();
                    word.push(self.read_backtick()?);
                }
                Some(c) => {
                    self.advance();
                    word.push(WordPart::Literal(c.to_string()));
                }
            }
        }
    }

    /// Text where only `$`, backticks and backslashes are special: here-doc
    /// bodies and arithmetic expressions.
    fn read_template(&mut self) -> Result<Word> {
        let mut word = Word::default();
        while let Some(c) = self.peek() {
            match c {
                '\\' => {
                    self.advance();
                    match self.advance() {
                        Some('\n') => {}
                        Some(c @ ('$' | '`' | '\\')) => word.push(WordPart::Literal(c.to_string())),
                        Some(c) => word.push(WordPart::Literal(format!("\\{c}"))),
                        None => word.push(WordPart::Literal("\\".to_string())),
                    }
                }
                '$' => word.push(self.read_dollar(true)?),
                '`' => {
                    self.advance();
                    word.push(self.read_backtick()?);
                }
                c => {
                    self.advance();
                    word.push(WordPart::Literal(c.to_string()));
                }
            }
        }
        Ok(word)
    }
}

fn default_op(c: char, word: Word, colon: bool) -> ParameterOp {
    match c {
        '-' => ParameterOp::Default { word, colon },
        '=' => ParameterOp::Assign { word, colon },
        '?' => ParameterOp::Error { word, colon },
        _ => ParameterOp::Alternative { word, colon },
    }
}

fn parse_template_at_depth(text: &str, depth: usize) -> Result<Word> {
    Lexer::at(text.chars().collect(), 0, Position::new(), depth).read_template()
}

/// Parse text in which only `$...`, backticks and backslash escapes are
/// interpreted, as in an unquoted here-document body.
pub fn parse_template(text: &str) -> Result<Word> {
    parse_template_at_depth(text, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(input: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        while let Some(tok) = lexer.next_token().unwrap() {
            out.push(tok.token);
        }
        out
    }

    fn word(input: &str) -> Word {
        match tokens(input).remove(0) {
            Token::Word(w) => w,
            other => panic!("expected word, got {other:?}"),
        }
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokens("a && b || c | d; e & ;; ;& ;;&"),
            vec![
                Token::Word(Word::literal("a")),
                Token::And,
                Token::Word(Word::literal("b")),
                Token::Or,
                Token::Word(Word::literal("c")),
                Token::Pipe,
                Token::Word(Word::literal("d")),
                Token::Semicolon,
                Token::Word(Word::literal("e")),
                Token::Background,
                Token::DoubleSemicolon,
                Token::SemiAmp,
                Token::DoubleSemiAmp,
            ]
        );
    }

    #[test]
    fn test_redirect_tokens() {
        assert_eq!(
            tokens("2>&1 >>log &>all <in"),
            vec![
                Token::Redirect {
                    fd: Some(2),
                    op: RedirectOp::DupOutput
                },
                Token::Word(Word::literal("1")),
                Token::Redirect {
                    fd: None,
                    op: RedirectOp::Append
                },
                Token::Word(Word::literal("log")),
                Token::Redirect {
                    fd: None,
                    op: RedirectOp::OutputBoth
                },
                Token::Word(Word::literal("all")),
                Token::Redirect {
                    fd: None,
                    op: RedirectOp::Input
                },
                Token::Word(Word::literal("in")),
            ]
        );
    }

    #[test]
    fn test_quoting_parts() {
        assert_eq!(
            word(r#"a'b c'\ d"e $x""#).parts,
            vec![
                WordPart::Literal("a".into()),
                WordPart::Quoted("b c ".into()),
                WordPart::Literal("d".into()),
                WordPart::DoubleQuoted(vec![
                    WordPart::Literal("e ".into()),
                    WordPart::Variable("x".into()),
                ]),
            ]
        );
    }

    #[test]
    fn test_parameter_forms() {
        let w = word("${x:-a b}");
        assert_eq!(
            w.parts,
            vec![WordPart::Parameter(ParameterExpansion {
                name: "x".into(),
                op: ParameterOp::Default {
                    word: Word::literal("a b"),
                    colon: true
                },
            })]
        );
        assert_eq!(word("${#}").parts, vec![WordPart::Variable("#".into())]);
        assert!(matches!(
            word("${#name}").parts[0],
            WordPart::Parameter(ParameterExpansion {
                op: ParameterOp::Length,
                ..
            })
        ));
        assert!(matches!(
            word("${p//a/b}").parts[0],
            WordPart::Parameter(ParameterExpansion {
                op: ParameterOp::Replace {
                    mode: ReplaceMode::All,
                    ..
                },
                ..
            })
        ));
    }

    #[test]
    fn test_comments_and_continuation() {
        assert_eq!(
            tokens("echo a \\\n b # trailing\n"),
            vec![
                Token::Word(Word::literal("echo")),
                Token::Word(Word::literal("a")),
                Token::Word(Word::literal("b")),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn test_heredoc_body_follows_line() {
        let toks = tokens("cat <<EOF | wc -l\nline $x\nEOF\necho done\n");
        let Token::HereDoc { doc, .. } = &toks[1] else {
            panic!("expected heredoc, got {:?}", toks[1]);
        };
        assert_eq!(doc.delimiter, "EOF");
        assert!(!doc.quoted);
        assert_eq!(
            doc.body.parts,
            vec![
                WordPart::Literal("line ".into()),
                WordPart::Variable("x".into()),
                WordPart::Literal("\n".into()),
            ]
        );
        assert_eq!(toks[2], Token::Pipe);
        assert_eq!(toks[5], Token::Newline);
        assert_eq!(toks[6], Token::Word(Word::literal("echo")));
    }

    #[test]
    fn test_quoted_heredoc_with_tab_strip() {
        let toks = tokens("cat <<-'END'\n\t$keep\n\tEND\n");
        let Token::HereDoc { doc, .. } = &toks[1] else {
            panic!("expected heredoc");
        };
        assert!(doc.quoted && doc.strip_tabs);
        assert_eq!(doc.body, Word::quoted("$keep\n"));
    }

    #[test]
    fn test_unterminated_quote_reports_position() {
        let mut lexer = Lexer::new("echo 'oops");
        lexer.next_token().unwrap();
        match lexer.next_token() {
            Err(Error::Syntax { message, line, .. }) => {
                assert_eq!(message, "unterminated single quote");
                assert_eq!(line, 1);
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }
}
