//! Token types for the lexer

use super::ast::{HereDoc, Word};

/// Token types produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A word, already split into quoted/unquoted/expansion parts.
    /// Reserved words (`if`, `{`, `!`, ...) arrive as plain words too.
    Word(Word),

    /// Newline character
    Newline,

    /// Semicolon (;)
    Semicolon,

    /// Case arm terminators (;; ;& ;;&)
    DoubleSemicolon,
    SemiAmp,
    DoubleSemiAmp,

    /// Pipe (|)
    Pipe,

    /// And (&&)
    And,

    /// Or (||)
    Or,

    /// Background (&)
    Background,

    /// Left parenthesis (()
    LeftParen,

    /// Right parenthesis ())
    RightParen,

    /// `(( ... ))` in command position, with its raw expression
    Arithmetic(String),

    /// A redirection operator; its target is the next word
    Redirect { fd: Option<u32>, op: RedirectOp },

    /// A complete here-document (`<<` / `<<-`) with its body
    HereDoc { fd: Option<u32>, doc: HereDoc },
}

/// Redirection operators that take a word operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOp {
    /// >
    Output,
    /// >>
    Append,
    /// >|
    Clobber,
    /// <
    Input,
    /// &>
    OutputBoth,
    /// &>>
    AppendBoth,
    /// >&
    DupOutput,
    /// <&
    DupInput,
    /// <<<
    HereString,
}

impl Token {
    /// How the token is shown in "unexpected token" messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Word(word) => word.to_string(),
            Token::Newline => "newline".to_string(),
            Token::Semicolon => ";".to_string(),
            Token::DoubleSemicolon => ";;".to_string(),
            Token::SemiAmp => ";&".to_string(),
            Token::DoubleSemiAmp => ";;&".to_string(),
            Token::Pipe => "|".to_string(),
            Token::And => "&&".to_string(),
            Token::Or => "||".to_string(),
            Token::Background => "&".to_string(),
            Token::LeftParen => "(".to_string(),
            Token::RightParen => ")".to_string(),
            Token::Arithmetic(_) => "((".to_string(),
            Token::Redirect { op, .. } => match op {
                RedirectOp::Output => ">",
                RedirectOp::Append => ">>",
                RedirectOp::Clobber => ">|",
                RedirectOp::Input => "<",
                RedirectOp::OutputBoth => "&>",
                RedirectOp::AppendBoth => "&>>",
                RedirectOp::DupOutput => ">&",
                RedirectOp::DupInput => "<&",
                RedirectOp::HereString => "<<<",
            }
            .to_string(),
            Token::HereDoc { doc, .. } => {
                if doc.strip_tabs {
                    "<<-".to_string()
                } else {
                    "<<".to_string()
                }
            }
        }
    }

    /// The reserved word this token spells, if it is an unquoted literal.
    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            Token::Word(word) => word
                .as_literal()
                .and_then(|w| RESERVED.iter().copied().find(|k| *k == w)),
            _ => None,
        }
    }
}

/// Words with special meaning in command position.
const RESERVED: &[&str] = &[
    "if", "then", "elif", "else", "fi", "for", "in", "while", "until", "do", "done", "case",
    "esac", "function", "{", "}", "!",
];

/// Whether `word` is reserved in command position.
pub fn is_reserved(word: &str) -> bool {
    RESERVED.contains(&word)
}
