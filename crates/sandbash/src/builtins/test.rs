//! test builtin command ([ and test)
//!
//! Expressions are parsed into a small tree first and evaluated against the
//! virtual filesystem afterwards. Up to four arguments follow the POSIX
//! argument-count rules; longer expressions use `!`, `-a`, `-o` and
//! parentheses with the usual precedence.

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::ExecResult;

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    /// A lone string: true when non-empty.
    Str(String),
    Unary(String, String),
    Binary(String, String, String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

const UNARY: &[&str] = &[
    "-e", "-a", "-f", "-d", "-L", "-h", "-s", "-r", "-w", "-x", "-n", "-z", "-p", "-S", "-b",
    "-c", "-t", "-g", "-u", "-k", "-O", "-G",
];

const BINARY: &[&str] = &[
    "=", "==", "!=", "<", ">", "-eq", "-ne", "-lt", "-le", "-gt", "-ge", "-nt", "-ot", "-ef",
];

fn is_unary(op: &str) -> bool {
    UNARY.contains(&op)
}

fn is_binary(op: &str) -> bool {
    BINARY.contains(&op)
}

type ParseResult = std::result::Result<Expr, String>;

fn parse(args: &[String]) -> ParseResult {
    let s = |i: usize| args[i].as_str();
    match args.len() {
        1 => Ok(Expr::Str(args[0].clone())),
        2 if s(0) == "!" => Ok(Expr::Not(Box::new(Expr::Str(args[1].clone())))),
        2 if is_unary(s(0)) => Ok(Expr::Unary(args[0].clone(), args[1].clone())),
        2 => Err(format!("{}: unary operator expected", s(0))),
        3 if is_binary(s(1)) => Ok(Expr::Binary(
            args[0].clone(),
            args[1].clone(),
            args[2].clone(),
        )),
        3 if s(0) == "!" => Ok(Expr::Not(Box::new(parse(&args[1..])?))),
        3 if s(0) == "(" && s(2) == ")" => Ok(Expr::Str(args[1].clone())),
        4 if s(0) == "!" => Ok(Expr::Not(Box::new(parse(&args[1..])?))),
        4 if s(0) == "(" && s(3) == ")" => parse(&args[1..3]),
        _ => {
            let mut parser = Parser { args, pos: 0 };
            let expr = parser.or()?;
            match parser.args.get(parser.pos) {
                Some(extra) => Err(format!("{extra}: unexpected argument")),
                None => Ok(expr),
            }
        }
    }
}

struct Parser<'a> {
    args: &'a [String],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self, offset: usize) -> Option<&str> {
        self.args.get(self.pos + offset).map(String::as_str)
    }

    fn take(&mut self) -> Option<String> {
        let arg = self.args.get(self.pos).cloned();
        self.pos += 1;
        arg
    }

    fn or(&mut self) -> ParseResult {
        let mut left = self.and()?;
        while self.peek(0) == Some("-o") {
            self.pos += 1;
            left = Expr::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> ParseResult {
        let mut left = self.not()?;
        while self.peek(0) == Some("-a") {
            self.pos += 1;
            left = Expr::And(Box::new(left), Box::new(self.not()?));
        }
        Ok(left)
    }

    fn not(&mut self) -> ParseResult {
        if self.peek(0) == Some("!") && self.peek(1).is_some_and(|next| !is_binary(next)) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> ParseResult {
        if self.peek(1).is_some_and(is_binary) {
            let left = self.take().unwrap_or_default();
            let op = self.take().unwrap_or_default();
            let right = self.take().ok_or_else(|| format!("{op}: argument expected"))?;
            return Ok(Expr::Binary(left, op, right));
        }
        match self.take() {
            Some(open) if open == "(" => {
                let inner = self.or()?;
                if self.take().as_deref() != Some(")") {
                    return Err("')' expected".to_string());
                }
                Ok(inner)
            }
            Some(op) if is_unary(&op) && self.peek(0).is_some() => {
                let operand = self.take().unwrap_or_default();
                Ok(Expr::Unary(op, operand))
            }
            Some(word) => Ok(Expr::Str(word)),
            None => Err("argument expected".to_string()),
        }
    }
}

fn integer(s: &str) -> std::result::Result<i64, String> {
    s.trim()
        .parse()
        .map_err(|_| format!("{s}: integer expression expected"))
}

fn evaluate<'a>(
    expr: &'a Expr,
    ctx: &'a Context<'_>,
) -> BoxFuture<'a, std::result::Result<bool, String>> {
    Box::pin(async move {
        Ok(match expr {
            Expr::Str(s) => !s.is_empty(),
            Expr::Not(inner) => !evaluate(inner, ctx).await?,
            Expr::And(a, b) => evaluate(a, ctx).await? && evaluate(b, ctx).await?,
            Expr::Or(a, b) => evaluate(a, ctx).await? || evaluate(b, ctx).await?,
            Expr::Unary(op, arg) => unary(op, arg, ctx).await,
            Expr::Binary(left, op, right) => binary(left, op, right, ctx).await?,
        })
    })
}

async fn unary(op: &str, arg: &str, ctx: &Context<'_>) -> bool {
    match op {
        "-z" => return arg.is_empty(),
        "-n" => return !arg.is_empty(),
        _ => {}
    }
    if arg.is_empty() {
        return false;
    }
    let path = ctx.resolve(arg);
    if matches!(op, "-L" | "-h") {
        return ctx
            .fs
            .lstat(&path)
            .await
            .is_ok_and(|m| m.file_type.is_symlink());
    }
    let Ok(meta) = ctx.fs.stat(&path).await else {
        return false;
    };
    match op {
        "-e" | "-a" => true,
        "-f" => meta.file_type.is_file(),
        "-d" => meta.file_type.is_dir(),
        "-s" => meta.size > 0,
        "-r" => meta.mode & 0o444 != 0,
        "-w" => meta.mode & 0o222 != 0,
        "-x" => meta.mode & 0o111 != 0,
        "-u" => meta.mode & 0o4000 != 0,
        "-g" => meta.mode & 0o2000 != 0,
        "-k" => meta.mode & 0o1000 != 0,
        // everything is owned by the sandbox user
        "-O" | "-G" => true,
        // no devices, pipes, sockets or terminals exist
        _ => false,
    }
}

async fn binary(
    left: &str,
    op: &str,
    right: &str,
    ctx: &Context<'_>,
) -> std::result::Result<bool, String> {
    Ok(match op {
        "=" | "==" => left == right,
        "!=" => left != right,
        "<" => left < right,
        ">" => left > right,
        "-eq" => integer(left)? == integer(right)?,
        "-ne" => integer(left)? != integer(right)?,
        "-lt" => integer(left)? < integer(right)?,
        "-le" => integer(left)? <= integer(right)?,
        "-gt" => integer(left)? > integer(right)?,
        "-ge" => integer(left)? >= integer(right)?,
        "-nt" | "-ot" => {
            let l = ctx.fs.stat(&ctx.resolve(left)).await.ok();
            let r = ctx.fs.stat(&ctx.resolve(right)).await.ok();
            match (l, r, op) {
                (Some(l), Some(r), "-nt") => l.modified > r.modified,
                (Some(l), Some(r), _) => l.modified < r.modified,
                (Some(_), None, "-nt") | (None, Some(_), "-ot") => true,
                _ => false,
            }
        }
        // no inodes; the same resolved path is the same file
        "-ef" => {
            let (l, r) = (ctx.resolve(left), ctx.resolve(right));
            l == r && ctx.fs.exists(&l).await.unwrap_or(false)
        }
        _ => false,
    })
}

async fn run(name: &str, args: &[String], ctx: &Context<'_>) -> ExecResult {
    if args.is_empty() {
        return ExecResult::with_code("", 1);
    }
    let outcome = match parse(args) {
        Ok(expr) => evaluate(&expr, ctx).await,
        Err(msg) => Err(msg),
    };
    match outcome {
        Ok(true) => ExecResult::default(),
        Ok(false) => ExecResult::with_code("", 1),
        Err(msg) => ExecResult::err(format!("{name}: {msg}\n"), 2),
    }
}

/// The test builtin command.
pub struct Test;

#[async_trait]
impl Builtin for Test {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        Ok(run("test", ctx.args, &ctx).await)
    }
}

/// The `[` builtin: `test` with a mandatory closing `]`.
pub struct Bracket;

#[async_trait]
impl Builtin for Bracket {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        match ctx.args.split_last() {
            Some((last, rest)) if last == "]" => Ok(run("[", rest, &ctx).await),
            _ => Ok(ExecResult::err("[: missing `]'\n", 2)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, InMemoryFs};
    use std::path::Path;
    use std::sync::Arc;

    async fn check(args: &[&str]) -> i32 {
        let fs = Arc::new(InMemoryFs::new());
        fs.write_file(Path::new("/home/user/file"), b"data").await.unwrap();
        fs.write_file(Path::new("/home/user/empty"), b"").await.unwrap();
        fs.symlink(Path::new("/home/user/file"), Path::new("/home/user/link"))
            .await
            .unwrap();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let ctx = Context::new_for_test(&args, fs, None);
        Test.execute(ctx).await.unwrap().exit_code
    }

    #[tokio::test]
    async fn test_strings() {
        assert_eq!(check(&[]).await, 1);
        assert_eq!(check(&["x"]).await, 0);
        assert_eq!(check(&[""]).await, 1);
        assert_eq!(check(&["-z", ""]).await, 0);
        assert_eq!(check(&["-n", ""]).await, 1);
        assert_eq!(check(&["a", "=", "a"]).await, 0);
        assert_eq!(check(&["a", "!=", "a"]).await, 1);
        assert_eq!(check(&["a", "<", "b"]).await, 0);
        assert_eq!(check(&["-n"]).await, 0);
    }

    #[tokio::test]
    async fn test_integers() {
        assert_eq!(check(&["3", "-lt", "10"]).await, 0);
        assert_eq!(check(&["3", "-ge", "10"]).await, 1);
        assert_eq!(check(&[" 7", "-eq", "7"]).await, 0);
        assert_eq!(check(&["x", "-eq", "1"]).await, 2);
    }

    #[tokio::test]
    async fn test_files() {
        assert_eq!(check(&["-e", "file"]).await, 0);
        assert_eq!(check(&["-f", "/home/user/file"]).await, 0);
        assert_eq!(check(&["-d", "/home"]).await, 0);
        assert_eq!(check(&["-f", "/home"]).await, 1);
        assert_eq!(check(&["-s", "empty"]).await, 1);
        assert_eq!(check(&["-s", "file"]).await, 0);
        assert_eq!(check(&["-L", "link"]).await, 0);
        assert_eq!(check(&["-L", "file"]).await, 1);
        assert_eq!(check(&["-e", "missing"]).await, 1);
        assert_eq!(check(&["file", "-ef", "./file"]).await, 0);
    }

    #[tokio::test]
    async fn test_connectives() {
        assert_eq!(check(&["!", "-e", "missing"]).await, 0);
        assert_eq!(check(&["-e", "file", "-a", "-e", "missing"]).await, 1);
        assert_eq!(check(&["-e", "file", "-o", "-e", "missing"]).await, 0);
        assert_eq!(
            check(&["(", "a", "=", "b", "-o", "c", "=", "c", ")", "-a", "x"]).await,
            0
        );
        assert_eq!(check(&["!", "=", "x"]).await, 1);
        assert_eq!(check(&["a", "b"]).await, 2);
    }

    #[tokio::test]
    async fn test_bracket_requires_closing() {
        let fs: Arc<InMemoryFs> = Arc::new(InMemoryFs::new());
        let args: Vec<String> = vec!["1".into(), "-eq".into(), "1".into()];
        let ctx = Context::new_for_test(&args, fs.clone(), None);
        let result = Bracket.execute(ctx).await.unwrap();
        assert_eq!(result.exit_code, 2);
        assert_eq!(result.stderr, "[: missing `]'\n");

        let args: Vec<String> = vec!["1".into(), "-eq".into(), "1".into(), "]".into()];
        let ctx = Context::new_for_test(&args, fs, None);
        assert_eq!(Bracket.execute(ctx).await.unwrap().exit_code, 0);
    }
}
