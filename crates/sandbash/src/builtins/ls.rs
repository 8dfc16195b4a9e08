//! Directory listing builtins - ls, find, rmdir

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use std::path::{Path, PathBuf};

use super::{Builtin, Context};
use crate::error::Result;
use crate::fs::{FileType, Metadata, RemoveOptions};
use crate::interpreter::ExecResult;
use crate::interpreter::pattern;

/// Options for ls command
#[derive(Default)]
struct LsOptions {
    long: bool,
    all: bool,
    human: bool,
    recursive: bool,
    directory: bool,
}

/// The ls builtin - list directory contents.
///
/// Usage: ls [-l] [-a] [-h] [-1] [-R] [-d] [PATH...]
///
/// Output is always one entry per line.
pub struct Ls;

#[async_trait]
impl Builtin for Ls {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut opts = LsOptions::default();
        let mut paths: Vec<&str> = Vec::new();
        for arg in ctx.args {
            match arg.strip_prefix('-') {
                Some(flags) if !flags.is_empty() => {
                    for c in flags.chars() {
                        match c {
                            'l' => opts.long = true,
                            'a' | 'A' => opts.all = true,
                            'h' => opts.human = true,
                            'R' => opts.recursive = true,
                            'd' => opts.directory = true,
                            '1' => {}
                            _ => {
                                return Ok(ExecResult::err(
                                    format!("ls: invalid option -- '{c}'\n"),
                                    2,
                                ));
                            }
                        }
                    }
                }
                _ => paths.push(arg),
            }
        }
        if paths.is_empty() {
            paths.push(".");
        }

        let mut result = ExecResult::default();
        let mut files = String::new();
        let mut dirs = Vec::new();
        for operand in &paths {
            let path = ctx.resolve(operand);
            match ctx.fs.stat(&path).await {
                Ok(meta) if meta.file_type.is_dir() && !opts.directory => {
                    dirs.push((path, operand.to_string()));
                }
                Ok(meta) => files.push_str(&entry_line(operand, &meta, &opts)),
                Err(e) => {
                    result.stderr.push_str(&format!(
                        "ls: cannot access '{operand}': {}\n",
                        e.kind.message()
                    ));
                    result.exit_code = 2;
                }
            }
        }

        result.stdout.push_str(&files);
        let headers = paths.len() > 1 || opts.recursive;
        for (i, (path, shown)) in dirs.iter().enumerate() {
            if i > 0 || !files.is_empty() {
                result.stdout.push('\n');
            }
            list_directory(&ctx, path, shown, &opts, headers, &mut result).await?;
        }
        Ok(result)
    }
}

fn list_directory<'a>(
    ctx: &'a Context<'_>,
    path: &'a Path,
    shown: &'a str,
    opts: &'a LsOptions,
    header: bool,
    result: &'a mut ExecResult,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        ctx.check_deadline()?;
        let mut entries = match ctx.fs.read_dir(path).await {
            Ok(entries) => entries,
            Err(e) => {
                result.stderr.push_str(&format!(
                    "ls: cannot open directory '{shown}': {}\n",
                    e.kind.message()
                ));
                result.exit_code = 2;
                return Ok(());
            }
        };
        entries.retain(|e| opts.all || !e.name.starts_with('.'));
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        if header {
            result.stdout.push_str(&format!("{shown}:\n"));
        }
        if opts.long {
            let blocks: u64 = entries.iter().map(|e| e.metadata.size.div_ceil(1024)).sum();
            result.stdout.push_str(&format!("total {blocks}\n"));
        }
        for entry in &entries {
            result
                .stdout
                .push_str(&entry_line(&entry.name, &entry.metadata, opts));
        }

        if opts.recursive {
            for entry in entries.iter().filter(|e| e.metadata.file_type.is_dir()) {
                result.stdout.push('\n');
                let child = path.join(&entry.name);
                let child_shown = format!("{}/{}", shown.trim_end_matches('/'), entry.name);
                list_directory(ctx, &child, &child_shown, opts, true, result).await?;
            }
        }
        Ok(())
    })
}

fn entry_line(name: &str, meta: &Metadata, opts: &LsOptions) -> String {
    if !opts.long {
        return format!("{name}\n");
    }
    let kind = match meta.file_type {
        FileType::Directory => 'd',
        FileType::Symlink => 'l',
        FileType::File => '-',
    };
    let perms: String = (0..9)
        .map(|bit| {
            let on = meta.mode & (0o400 >> bit) != 0;
            match (on, bit % 3) {
                (false, _) => '-',
                (true, 0) => 'r',
                (true, 1) => 'w',
                (true, _) => 'x',
            }
        })
        .collect();
    let size = if opts.human {
        human_size(meta.size)
    } else {
        meta.size.to_string()
    };
    let modified: DateTime<Utc> = meta.modified.into();
    format!(
        "{kind}{perms} 1 user user {size:>8} {} {name}\n",
        modified.format("%b %e %H:%M")
    )
}

fn human_size(size: u64) -> String {
    const UNITS: [&str; 4] = ["K", "M", "G", "T"];
    if size < 1024 {
        return size.to_string();
    }
    let mut value = size as f64;
    let mut unit = "";
    for u in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = u;
    }
    format!("{value:.1}{unit}")
}

/// A parsed `find` expression.
#[derive(Debug, Clone, PartialEq)]
enum FindExpr {
    Name { pattern: String, ignore_case: bool },
    Path(String),
    Type(char),
    Empty,
    Prune,
    Print,
    True,
    Not(Box<FindExpr>),
    And(Box<FindExpr>, Box<FindExpr>),
    Or(Box<FindExpr>, Box<FindExpr>),
}

impl FindExpr {
    fn has_action(&self) -> bool {
        match self {
            Self::Print => true,
            Self::Not(inner) => inner.has_action(),
            Self::And(a, b) | Self::Or(a, b) => a.has_action() || b.has_action(),
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
struct FindQuery {
    expr: Option<FindExpr>,
    min_depth: usize,
    max_depth: Option<usize>,
}

/// Recursive-descent parser over find's primaries.
struct FindParser<'a> {
    args: &'a [String],
    pos: usize,
    query: FindQuery,
}

impl<'a> FindParser<'a> {
    fn parse(args: &'a [String]) -> std::result::Result<FindQuery, String> {
        let mut parser = Self {
            args,
            pos: 0,
            query: FindQuery::default(),
        };
        if !args.is_empty() {
            let expr = parser.or()?;
            if let Some(extra) = parser.peek() {
                return Err(format!("unexpected argument '{extra}'"));
            }
            parser.query.expr = Some(expr);
        }
        Ok(parser.query)
    }

    fn peek(&self) -> Option<&'a str> {
        self.args.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Option<&'a str> {
        let arg = self.peek();
        self.pos += 1;
        arg
    }

    fn value(&mut self, primary: &str) -> std::result::Result<&'a str, String> {
        self.next()
            .ok_or_else(|| format!("missing argument to '{primary}'"))
    }

    fn or(&mut self) -> std::result::Result<FindExpr, String> {
        let mut left = self.and()?;
        while matches!(self.peek(), Some("-o" | "-or")) {
            self.pos += 1;
            let right = self.and()?;
            left = FindExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> std::result::Result<FindExpr, String> {
        let mut left = self.unary()?;
        loop {
            match self.peek() {
                Some("-a" | "-and") => self.pos += 1,
                Some("-o" | "-or" | ")") | None => return Ok(left),
                Some(_) => {}
            }
            let right = self.unary()?;
            left = FindExpr::And(Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> std::result::Result<FindExpr, String> {
        match self.peek() {
            Some("!" | "-not") => {
                self.pos += 1;
                Ok(FindExpr::Not(Box::new(self.unary()?)))
            }
            Some("(") => {
                self.pos += 1;
                let inner = self.or()?;
                if self.next() != Some(")") {
                    return Err("missing ')'".to_string());
                }
                Ok(inner)
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> std::result::Result<FindExpr, String> {
        let Some(primary) = self.next() else {
            return Err("expected an expression".to_string());
        };
        let expr = match primary {
            "-name" | "-iname" => FindExpr::Name {
                pattern: self.value(primary)?.to_string(),
                ignore_case: primary == "-iname",
            },
            "-path" | "-wholename" => FindExpr::Path(self.value(primary)?.to_string()),
            "-type" => match self.value(primary)? {
                t @ ("f" | "d" | "l") => FindExpr::Type(t.chars().next().unwrap_or('f')),
                t => return Err(format!("Unknown argument to -type: {t}")),
            },
            "-maxdepth" | "-mindepth" => {
                let raw = self.value(primary)?;
                let depth: usize = raw
                    .parse()
                    .map_err(|_| format!("Expected a positive decimal integer argument to {primary}, but got '{raw}'"))?;
                if primary == "-maxdepth" {
                    self.query.max_depth = Some(depth);
                } else {
                    self.query.min_depth = depth;
                }
                FindExpr::True
            }
            "-empty" => FindExpr::Empty,
            "-prune" => FindExpr::Prune,
            "-print" => FindExpr::Print,
            "-true" => FindExpr::True,
            "-false" => FindExpr::Not(Box::new(FindExpr::True)),
            other => return Err(format!("unknown predicate '{other}'")),
        };
        Ok(expr)
    }
}

/// One visited path during the walk.
struct Visit<'a> {
    shown: &'a str,
    meta: &'a Metadata,
    empty: bool,
}

/// Per-entry evaluation state: output and whether to skip descending.
#[derive(Default)]
struct Outcome {
    printed: String,
    prune: bool,
}

fn evaluate(expr: &FindExpr, visit: &Visit<'_>, out: &mut Outcome) -> bool {
    match expr {
        FindExpr::Name {
            pattern: pat,
            ignore_case,
        } => {
            let name = visit
                .shown
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or(visit.shown);
            let name = if name.is_empty() { "/" } else { name };
            if *ignore_case {
                pattern::matches_ignore_case(pat, name)
            } else {
                pattern::matches(pat, name)
            }
        }
        FindExpr::Path(pat) => pattern::matches(pat, visit.shown),
        FindExpr::Type(t) => match t {
            'd' => visit.meta.file_type.is_dir(),
            'l' => visit.meta.file_type.is_symlink(),
            _ => visit.meta.file_type.is_file(),
        },
        FindExpr::Empty => visit.empty,
        FindExpr::Prune => {
            out.prune = true;
            true
        }
        FindExpr::Print => {
            out.printed.push_str(visit.shown);
            out.printed.push('\n');
            true
        }
        FindExpr::True => true,
        FindExpr::Not(inner) => !evaluate(inner, visit, out),
        FindExpr::And(a, b) => evaluate(a, visit, out) && evaluate(b, visit, out),
        FindExpr::Or(a, b) => evaluate(a, visit, out) || evaluate(b, visit, out),
    }
}

/// The find builtin - search for files.
///
/// Usage: `find [PATH...] [EXPRESSION]`
///
/// Primaries: `-name`, `-iname`, `-path`, `-type f|d|l`, `-empty`,
/// `-maxdepth N`, `-mindepth N`, `-prune`, `-print`, `-true`, `-false`.
/// Operators: `!`/`-not`, `-a`/`-and` (or juxtaposition), `-o`/`-or`,
/// `( ... )`. Without an explicit `-print` the whole expression gets one.
/// Symlinks are not followed.
pub struct Find;

#[async_trait]
impl Builtin for Find {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let split = ctx
            .args
            .iter()
            .position(|a| a.starts_with('-') || a == "(" || a == "!")
            .unwrap_or(ctx.args.len());
        let (starts, expr_args) = ctx.args.split_at(split);

        let mut query = match FindParser::parse(expr_args) {
            Ok(query) => query,
            Err(msg) => return Ok(ExecResult::err(format!("find: {msg}\n"), 1)),
        };
        query.expr = match query.expr.take() {
            Some(expr) if expr.has_action() => Some(expr),
            Some(expr) => Some(FindExpr::And(Box::new(expr), Box::new(FindExpr::Print))),
            None => Some(FindExpr::Print),
        };

        let starts: Vec<&str> = if starts.is_empty() {
            vec!["."]
        } else {
            starts.iter().map(String::as_str).collect()
        };

        let mut result = ExecResult::default();
        for start in starts {
            let path = ctx.resolve(start);
            match ctx.fs.lstat(&path).await {
                Ok(meta) => {
                    walk(&ctx, &query, path, start.to_string(), meta, 0, &mut result).await?;
                }
                Err(e) => {
                    result
                        .stderr
                        .push_str(&format!("find: '{start}': {}\n", e.kind.message()));
                    result.exit_code = 1;
                }
            }
        }
        Ok(result)
    }
}

fn walk<'a>(
    ctx: &'a Context<'_>,
    query: &'a FindQuery,
    path: PathBuf,
    shown: String,
    meta: Metadata,
    depth: usize,
    result: &'a mut ExecResult,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        ctx.check_deadline()?;

        let mut children = Vec::new();
        if meta.file_type.is_dir() {
            match ctx.fs.read_dir(&path).await {
                Ok(entries) => children = entries,
                Err(e) => {
                    result
                        .stderr
                        .push_str(&format!("find: '{shown}': {}\n", e.kind.message()));
                    result.exit_code = 1;
                }
            }
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));

        let mut outcome = Outcome::default();
        let within_max = query.max_depth.is_none_or(|max| depth <= max);
        if depth >= query.min_depth
            && within_max
            && let Some(expr) = &query.expr
        {
            let visit = Visit {
                shown: &shown,
                meta: &meta,
                empty: if meta.file_type.is_dir() {
                    children.is_empty()
                } else {
                    meta.size == 0
                },
            };
            evaluate(expr, &visit, &mut outcome);
            result.stdout.push_str(&outcome.printed);
        }

        let descend = !outcome.prune && query.max_depth.is_none_or(|max| depth < max);
        if descend {
            for child in children {
                let child_shown = if shown.ends_with('/') {
                    format!("{shown}{}", child.name)
                } else {
                    format!("{shown}/{}", child.name)
                };
                walk(
                    ctx,
                    query,
                    path.join(&child.name),
                    child_shown,
                    child.metadata,
                    depth + 1,
                    result,
                )
                .await?;
            }
        }
        Ok(())
    })
}

/// The rmdir builtin - remove empty directories.
///
/// Usage: rmdir [-p] DIRECTORY...
pub struct Rmdir;

#[async_trait]
impl Builtin for Rmdir {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let parents = ctx.args.iter().any(|a| a == "-p");
        let dirs: Vec<&String> = ctx.args.iter().filter(|a| !a.starts_with('-')).collect();
        if dirs.is_empty() {
            return Ok(ExecResult::err("rmdir: missing operand\n", 1));
        }

        let mut result = ExecResult::default();
        for dir in dirs {
            let path = ctx.resolve(dir);
            let failure = match ctx.fs.lstat(&path).await {
                Ok(meta) if !meta.file_type.is_dir() => Some("Not a directory"),
                Ok(_) => ctx
                    .fs
                    .remove(&path, RemoveOptions::single())
                    .await
                    .err()
                    .map(|e| e.kind.message()),
                Err(e) => Some(e.kind.message()),
            };
            if let Some(reason) = failure {
                result
                    .stderr
                    .push_str(&format!("rmdir: failed to remove '{dir}': {reason}\n"));
                result.exit_code = 1;
                continue;
            }

            if parents {
                // only the components the operand spelled out
                let mut remaining = Path::new(dir.as_str()).parent();
                while let Some(rel) = remaining.filter(|p| !p.as_os_str().is_empty() && *p != Path::new("/")) {
                    if ctx
                        .fs
                        .remove(&ctx.resolve(&rel.to_string_lossy()), RemoveOptions::single())
                        .await
                        .is_err()
                    {
                        break;
                    }
                    remaining = rel.parent();
                }
            }
        }
        Ok(result)
    }
}
