//! File operation builtins - mkdir, rm, cp, mv, touch, chmod, ln
//!
//! Each command keeps going after a failing operand, reports every failure
//! as `CMD: ...` on stderr and exits 1 if any operand failed.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{Builtin, Context};
use crate::error::Result;
use crate::fs::{FsError, FsErrorKind, RemoveOptions};
use crate::interpreter::ExecResult;

/// Split short options from operands. `--` ends options; a lone `-` is an
/// operand. Unknown letters produce the error result to return.
fn parse_flags(
    cmd: &str,
    args: &[String],
    allowed: &str,
) -> std::result::Result<(Vec<char>, Vec<String>), ExecResult> {
    let mut flags = Vec::new();
    let mut operands = Vec::new();
    let mut args = args.iter();
    while let Some(arg) = args.next() {
        if arg == "--" {
            operands.extend(args.cloned());
            break;
        }
        match arg.strip_prefix('-') {
            Some(letters) if !letters.is_empty() => {
                for letter in letters.chars() {
                    if !allowed.contains(letter) {
                        return Err(ExecResult::err(
                            format!("{cmd}: invalid option -- '{letter}'\n"),
                            1,
                        ));
                    }
                    flags.push(letter);
                }
            }
            _ => operands.push(arg.clone()),
        }
    }
    Ok((flags, operands))
}

/// Collected per-operand failures.
#[derive(Default)]
struct Failures(String);

impl Failures {
    fn push(&mut self, line: String) {
        self.0.push_str(&line);
        self.0.push('\n');
    }

    fn into_result(self) -> ExecResult {
        if self.0.is_empty() {
            ExecResult::default()
        } else {
            ExecResult::err(self.0, 1)
        }
    }
}

fn file_name(operand: &str) -> &str {
    operand
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(operand)
}

/// The mkdir builtin - create directories.
///
/// Usage: mkdir [-p] DIRECTORY...
pub struct Mkdir;

#[async_trait]
impl Builtin for Mkdir {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let (flags, dirs) = match parse_flags("mkdir", ctx.args, "pv") {
            Ok(parsed) => parsed,
            Err(result) => return Ok(result),
        };
        if dirs.is_empty() {
            return Ok(ExecResult::err("mkdir: missing operand\n", 1));
        }
        let parents = flags.contains(&'p');

        let mut failures = Failures::default();
        for dir in &dirs {
            let path = ctx.resolve(dir);
            let outcome = match ctx.fs.stat(&path).await {
                Ok(meta) if meta.file_type.is_dir() && parents => Ok(()),
                Ok(_) => Err(FsError::already_exists(&path)),
                Err(_) => ctx.fs.mkdir(&path, parents).await,
            };
            if let Err(e) = outcome {
                failures.push(format!(
                    "mkdir: cannot create directory '{dir}': {}",
                    e.kind.message()
                ));
            }
        }
        Ok(failures.into_result())
    }
}

/// The rm builtin - remove files or directories.
///
/// Usage: rm [-rRf] FILE...
pub struct Rm;

#[async_trait]
impl Builtin for Rm {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let (flags, files) = match parse_flags("rm", ctx.args, "rRfdv") {
            Ok(parsed) => parsed,
            Err(result) => return Ok(result),
        };
        let options = RemoveOptions {
            recursive: flags.iter().any(|f| matches!(f, 'r' | 'R')),
            force: flags.contains(&'f'),
        };
        if files.is_empty() {
            return Ok(if options.force {
                ExecResult::default()
            } else {
                ExecResult::err("rm: missing operand\n", 1)
            });
        }

        let mut failures = Failures::default();
        for file in &files {
            let path = ctx.resolve(file);
            if path == Path::new("/") {
                failures.push("rm: it is dangerous to operate recursively on '/'".into());
                continue;
            }
            let meta = match ctx.fs.lstat(&path).await {
                Ok(meta) => meta,
                Err(_) if options.force => continue,
                Err(e) => {
                    failures.push(format!("rm: cannot remove '{file}': {}", e.kind.message()));
                    continue;
                }
            };
            if meta.file_type.is_dir() && !options.recursive {
                failures.push(format!("rm: cannot remove '{file}': Is a directory"));
                continue;
            }
            if let Err(e) = ctx.fs.remove(&path, options).await {
                failures.push(format!("rm: cannot remove '{file}': {}", e.kind.message()));
            }
        }
        Ok(failures.into_result())
    }
}

/// Where each source lands: inside DEST when it is a directory, else DEST.
async fn plan_targets(
    cmd: &str,
    ctx: &Context<'_>,
    operands: &[String],
) -> std::result::Result<Vec<(String, PathBuf)>, ExecResult> {
    let Some((dest, sources)) = operands.split_last() else {
        return Err(ExecResult::err(format!("{cmd}: missing file operand\n"), 1));
    };
    if sources.is_empty() {
        return Err(ExecResult::err(
            format!("{cmd}: missing destination file operand after '{dest}'\n"),
            1,
        ));
    }
    let dest_path = ctx.resolve(dest);
    let dest_is_dir = ctx
        .fs
        .stat(&dest_path)
        .await
        .is_ok_and(|meta| meta.file_type.is_dir());
    if sources.len() > 1 && !dest_is_dir {
        return Err(ExecResult::err(
            format!("{cmd}: target '{dest}' is not a directory\n"),
            1,
        ));
    }
    Ok(sources
        .iter()
        .map(|source| {
            let target = if dest_is_dir {
                dest_path.join(file_name(source))
            } else {
                dest_path.clone()
            };
            (source.clone(), target)
        })
        .collect())
}

/// The cp builtin - copy files and directories.
///
/// Usage: cp [-r] SOURCE... DEST
pub struct Cp;

#[async_trait]
impl Builtin for Cp {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let (flags, operands) = match parse_flags("cp", ctx.args, "rRafpv") {
            Ok(parsed) => parsed,
            Err(result) => return Ok(result),
        };
        let recursive = flags.iter().any(|f| matches!(f, 'r' | 'R' | 'a'));
        let plan = match plan_targets("cp", &ctx, &operands).await {
            Ok(plan) => plan,
            Err(result) => return Ok(result),
        };

        let mut failures = Failures::default();
        for (source, target) in plan {
            let src = ctx.resolve(&source);
            match ctx.fs.stat(&src).await {
                Ok(meta) if meta.file_type.is_dir() && !recursive => {
                    failures.push(format!("cp: -r not specified; omitting directory '{source}'"));
                }
                Ok(_) => {
                    if let Err(e) = ctx.fs.copy(&src, &target, recursive).await {
                        failures.push(format!("cp: cannot copy '{source}': {}", e.kind.message()));
                    }
                }
                Err(e) => failures.push(format!("cp: cannot stat '{source}': {}", e.kind.message())),
            }
        }
        Ok(failures.into_result())
    }
}

/// The mv builtin - move (rename) files.
///
/// Usage: mv [-f] SOURCE... DEST
pub struct Mv;

#[async_trait]
impl Builtin for Mv {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let (_, operands) = match parse_flags("mv", ctx.args, "fnv") {
            Ok(parsed) => parsed,
            Err(result) => return Ok(result),
        };
        let plan = match plan_targets("mv", &ctx, &operands).await {
            Ok(plan) => plan,
            Err(result) => return Ok(result),
        };

        let mut failures = Failures::default();
        for (source, target) in plan {
            let src = ctx.resolve(&source);
            if target.starts_with(&src) && target != src {
                failures.push(format!(
                    "mv: cannot move '{source}' to a subdirectory of itself"
                ));
                continue;
            }
            if let Err(e) = ctx.fs.rename(&src, &target).await {
                failures.push(format!("mv: cannot move '{source}': {}", e.kind.message()));
            }
        }
        Ok(failures.into_result())
    }
}

/// The touch builtin - create empty files or bump their mtime.
///
/// Usage: touch [-c] FILE...
pub struct Touch;

#[async_trait]
impl Builtin for Touch {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let (flags, files) = match parse_flags("touch", ctx.args, "cam") {
            Ok(parsed) => parsed,
            Err(result) => return Ok(result),
        };
        if files.is_empty() {
            return Ok(ExecResult::err("touch: missing file operand\n", 1));
        }
        let no_create = flags.contains(&'c');

        let mut failures = Failures::default();
        for file in &files {
            let path = ctx.resolve(file);
            let outcome = match ctx.fs.stat(&path).await {
                // appending nothing refreshes the modification time
                Ok(meta) if meta.file_type.is_file() => ctx.fs.append_file(&path, b"").await,
                Ok(_) => Ok(()),
                Err(_) if no_create => Ok(()),
                Err(_) => ctx.fs.write_file(&path, b"").await,
            };
            if let Err(e) = outcome {
                failures.push(format!("touch: cannot touch '{file}': {}", e.kind.message()));
            }
        }
        Ok(failures.into_result())
    }
}

/// The chmod builtin - change file mode bits.
///
/// Usage: chmod MODE FILE...
///
/// MODE is octal (`755`) or symbolic clauses (`u+x,go-w`, `a=r`, `+x`).
pub struct Chmod;

/// Apply comma-separated `[ugoa]*[+-=][rwxX]*` clauses to `mode`.
fn apply_symbolic_mode(spec: &str, mode: u32, is_dir: bool) -> Option<u32> {
    let mut mode = mode;
    for clause in spec.split(',') {
        let op_at = clause.find(['+', '-', '='])?;
        let (who, rest) = clause.split_at(op_at);
        let mut rest = rest.chars();
        let op = rest.next()?;

        let mut mask = 0;
        for w in who.chars() {
            mask |= match w {
                'u' => 0o700,
                'g' => 0o070,
                'o' => 0o007,
                'a' => 0o777,
                _ => return None,
            };
        }
        if mask == 0 {
            mask = 0o777;
        }

        let mut perms = 0;
        for p in rest {
            perms |= match p {
                'r' => 0o444,
                'w' => 0o222,
                'x' => 0o111,
                'X' if is_dir || mode & 0o111 != 0 => 0o111,
                'X' | 's' | 't' => 0,
                _ => return None,
            };
        }

        let bits = perms & mask;
        mode = match op {
            '+' => mode | bits,
            '-' => mode & !bits,
            _ => (mode & !mask) | bits,
        };
    }
    Some(mode)
}

#[async_trait]
impl Builtin for Chmod {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let args: Vec<&String> = ctx.args.iter().filter(|a| *a != "-R").collect();
        let Some((mode_spec, files)) = args.split_first() else {
            return Ok(ExecResult::err("chmod: missing operand\n", 1));
        };
        if files.is_empty() {
            return Ok(ExecResult::err(
                format!("chmod: missing operand after '{mode_spec}'\n"),
                1,
            ));
        }
        let octal = u32::from_str_radix(mode_spec, 8).ok().filter(|m| *m <= 0o7777);

        let mut failures = Failures::default();
        for file in files {
            let path = ctx.resolve(file);
            let meta = match ctx.fs.stat(&path).await {
                Ok(meta) => meta,
                Err(e) => {
                    failures.push(format!("chmod: cannot access '{file}': {}", e.kind.message()));
                    continue;
                }
            };
            let mode = match octal {
                Some(mode) => mode,
                None => match apply_symbolic_mode(mode_spec, meta.mode, meta.file_type.is_dir()) {
                    Some(mode) => mode,
                    None => return Ok(ExecResult::err(format!("chmod: invalid mode: '{mode_spec}'\n"), 1)),
                },
            };
            if let Err(e) = ctx.fs.chmod(&path, mode).await {
                failures.push(format!(
                    "chmod: changing permissions of '{file}': {}",
                    e.kind.message()
                ));
            }
        }
        Ok(failures.into_result())
    }
}

/// The ln builtin - create links.
///
/// Usage: `ln [-s] [-f] TARGET [LINK_NAME]`, `ln -s TARGET... DIRECTORY`
///
/// The virtual filesystem has no hard links, so every link is symbolic.
pub struct Ln;

#[async_trait]
impl Builtin for Ln {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let (flags, mut operands) = match parse_flags("ln", ctx.args, "sfnv") {
            Ok(parsed) => parsed,
            Err(result) => return Ok(result),
        };
        let force = flags.contains(&'f');
        if operands.len() == 1 {
            operands.push(file_name(&operands[0]).to_string());
        }
        let plan = match plan_targets("ln", &ctx, &operands).await {
            Ok(plan) => plan,
            Err(result) => return Ok(result),
        };

        let mut failures = Failures::default();
        for (target, link) in plan {
            if force && ctx.fs.lstat(&link).await.is_ok() {
                let _ = ctx.fs.remove(&link, RemoveOptions::default()).await;
            }
            if let Err(e) = ctx.fs.symlink(Path::new(&target), &link).await {
                let reason = if e.kind == FsErrorKind::AlreadyExists {
                    "File exists"
                } else {
                    e.kind.message()
                };
                failures.push(format!(
                    "ln: failed to create symbolic link '{}': {reason}",
                    link.display()
                ));
            }
        }
        Ok(failures.into_result())
    }
}
