//! Shell arithmetic: `$(( ))`, `(( ))` and `for (( ))`
//!
//! C-like integer expressions over `i64` with checked operations. The
//! expression is parsed into a small tree first so `&&`, `||` and `?:` only
//! evaluate (and assign in) the branch that is taken.

use std::fmt;

/// Variable access for the evaluator.
pub trait ArithEnv {
    /// Raw value of a variable, if set.
    fn get(&self, name: &str) -> Option<String>;
    /// Store an integer result.
    fn set(&mut self, name: &str, value: i64) -> Result<(), String>;
}

/// Nested evaluation limit for variables whose values are expressions.
const MAX_RECURSION: usize = 32;

/// Arithmetic failure; the message is shown after the expression text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArithError(pub String);

impl fmt::Display for ArithError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type ArithResult<T> = std::result::Result<T, ArithError>;

fn err<T>(msg: impl Into<String>) -> ArithResult<T> {
    Err(ArithError(msg.into()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Mul,
    Div,
    Rem,
    Pow,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(i64),
    Var(String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    BitNot(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Assign(String, Option<BinOp>, Box<Expr>),
    /// `++x` / `--x`
    PreStep(String, i64),
    /// `x++` / `x--`
    PostStep(String, i64),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Comma(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(i64),
    Ident(String),
    Op(&'static str),
}

const OPERATORS: &[&str] = &[
    "<<=", ">>=", "**", "++", "--", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+=", "-=",
    "*=", "/=", "%=", "&=", "^=", "|=", "+", "-", "*", "/", "%", "<", ">", "=", "!", "~", "&",
    "^", "|", "?", ":", ",", "(", ")",
];

fn parse_number(text: &str) -> ArithResult<i64> {
    let invalid = || ArithError(format!("{text}: value too great for base"));
    let malformed = || {
        ArithError(format!(
            "{text}: invalid integer constant (error token is \"{text}\")"
        ))
    };
    if let Some((base, digits)) = text.split_once('#') {
        let base: u32 = base
            .parse()
            .ok()
            .filter(|b| (2..=64).contains(b))
            .ok_or_else(|| ArithError(format!("{text}: invalid arithmetic base")))?;
        if digits.is_empty() {
            return Err(malformed());
        }
        let mut value: i64 = 0;
        for ch in digits.chars() {
            let digit = match ch {
                '0'..='9' => ch as u32 - '0' as u32,
                'a'..='z' => ch as u32 - 'a' as u32 + 10,
                'A'..='Z' if base <= 36 => ch as u32 - 'A' as u32 + 10,
                'A'..='Z' => ch as u32 - 'A' as u32 + 36,
                '@' => 62,
                '_' => 63,
                _ => return Err(invalid()),
            };
            if digit >= base {
                return Err(invalid());
            }
            value = value
                .checked_mul(base as i64)
                .and_then(|v| v.checked_add(digit as i64))
                .ok_or_else(|| ArithError("integer overflow".into()))?;
        }
        return Ok(value);
    }
    let (digits, radix) = if let Some(hex) = text.strip_prefix("0x").or(text.strip_prefix("0X")) {
        (hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8)
    } else {
        (text, 10)
    };
    if digits.is_empty() {
        return Err(malformed());
    }
    i64::from_str_radix(digits, radix).map_err(|_| {
        if digits.chars().all(|c| c.is_digit(radix)) {
            ArithError("integer overflow".into())
        } else {
            invalid()
        }
    })
}

fn tokenize(input: &str) -> ArithResult<Vec<Tok>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if ch.is_whitespace() {
            i += 1;
            continue;
        }
        if ch.is_ascii_digit() {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '#' | '@' | '_'))
            {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            tokens.push(Tok::Num(parse_number(&text)?));
            continue;
        }
        if ch.is_ascii_alphabetic() || ch == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Tok::Ident(chars[start..i].iter().collect()));
            continue;
        }
        // `$x` inside (( )) reads the same as `x`
        if ch == '$' && chars.get(i + 1).is_some_and(|c| c.is_ascii_alphabetic() || *c == '_') {
            i += 1;
            continue;
        }
        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            Some(&op) => {
                tokens.push(Tok::Op(op));
                i += op.len();
            }
            None => {
                let remaining: String = chars[i..].iter().collect();
                return err(format!(
                    "syntax error: invalid arithmetic operator (error token is \"{remaining}\")"
                ));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

fn binary_op(op: &str) -> Option<(BinOp, u8)> {
    // (operator, precedence); higher binds tighter
    Some(match op {
        "||" => (BinOp::Or, 1),
        "&&" => (BinOp::And, 2),
        "|" => (BinOp::BitOr, 3),
        "^" => (BinOp::BitXor, 4),
        "&" => (BinOp::BitAnd, 5),
        "==" => (BinOp::Eq, 6),
        "!=" => (BinOp::Ne, 6),
        "<" => (BinOp::Lt, 7),
        "<=" => (BinOp::Le, 7),
        ">" => (BinOp::Gt, 7),
        ">=" => (BinOp::Ge, 7),
        "<<" => (BinOp::Shl, 8),
        ">>" => (BinOp::Shr, 8),
        "+" => (BinOp::Add, 9),
        "-" => (BinOp::Sub, 9),
        "*" => (BinOp::Mul, 10),
        "/" => (BinOp::Div, 10),
        "%" => (BinOp::Rem, 10),
        _ => return None,
    })
}

fn assign_op(op: &str) -> Option<Option<BinOp>> {
    Some(match op {
        "=" => None,
        "+=" => Some(BinOp::Add),
        "-=" => Some(BinOp::Sub),
        "*=" => Some(BinOp::Mul),
        "/=" => Some(BinOp::Div),
        "%=" => Some(BinOp::Rem),
        "<<=" => Some(BinOp::Shl),
        ">>=" => Some(BinOp::Shr),
        "&=" => Some(BinOp::BitAnd),
        "^=" => Some(BinOp::BitXor),
        "|=" => Some(BinOp::BitOr),
        _ => return None,
    })
}

impl Parser {
    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Tok::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn expect(&mut self, op: &str) -> ArithResult<()> {
        if self.peek_op() == Some(op) {
            self.pos += 1;
            Ok(())
        } else {
            err(format!("syntax error: `{op}' expected"))
        }
    }

    fn comma(&mut self) -> ArithResult<Expr> {
        let mut expr = self.assignment()?;
        while self.peek_op() == Some(",") {
            self.pos += 1;
            let rhs = self.assignment()?;
            expr = Expr::Comma(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn assignment(&mut self) -> ArithResult<Expr> {
        if let Some(Tok::Ident(name)) = self.tokens.get(self.pos)
            && let Some(op) = self.tokens.get(self.pos + 1).and_then(|t| match t {
                Tok::Op(op) => assign_op(op),
                _ => None,
            })
        {
            let name = name.clone();
            self.pos += 2;
            let value = self.assignment()?;
            return Ok(Expr::Assign(name, op, Box::new(value)));
        }
        self.ternary()
    }

    fn ternary(&mut self) -> ArithResult<Expr> {
        let cond = self.binary(1)?;
        if self.peek_op() == Some("?") {
            self.pos += 1;
            let then = self.assignment()?;
            self.expect(":")?;
            let otherwise = self.assignment()?;
            return Ok(Expr::Ternary(
                Box::new(cond),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(cond)
    }

    fn binary(&mut self, min_prec: u8) -> ArithResult<Expr> {
        let mut lhs = self.power()?;
        while let Some((op, prec)) = self.peek_op().and_then(binary_op) {
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    /// `**` is right-associative and binds tighter than `*`.
    fn power(&mut self) -> ArithResult<Expr> {
        let base = self.unary()?;
        if self.peek_op() == Some("**") {
            self.pos += 1;
            let exp = self.power()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn unary(&mut self) -> ArithResult<Expr> {
        match self.peek_op() {
            Some("-") => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some("+") => {
                self.pos += 1;
                self.unary()
            }
            Some("!") => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.unary()?)))
            }
            Some("~") => {
                self.pos += 1;
                Ok(Expr::BitNot(Box::new(self.unary()?)))
            }
            Some(op @ ("++" | "--")) => {
                self.pos += 1;
                match self.tokens.get(self.pos) {
                    Some(Tok::Ident(name)) => {
                        let name = name.clone();
                        self.pos += 1;
                        Ok(Expr::PreStep(name, if op == "++" { 1 } else { -1 }))
                    }
                    _ => err("syntax error: operand expected"),
                }
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> ArithResult<Expr> {
        match self.tokens.get(self.pos).cloned() {
            Some(Tok::Num(n)) => {
                self.pos += 1;
                Ok(Expr::Num(n))
            }
            Some(Tok::Ident(name)) => {
                self.pos += 1;
                match self.peek_op() {
                    Some("++") => {
                        self.pos += 1;
                        Ok(Expr::PostStep(name, 1))
                    }
                    Some("--") => {
                        self.pos += 1;
                        Ok(Expr::PostStep(name, -1))
                    }
                    _ => Ok(Expr::Var(name)),
                }
            }
            Some(Tok::Op("(")) => {
                self.pos += 1;
                let inner = self.comma()?;
                self.expect(")")?;
                Ok(inner)
            }
            Some(Tok::Op(op)) => err(format!(
                "syntax error: operand expected (error token is \"{op}\")"
            )),
            None => err("syntax error: operand expected"),
        }
    }
}

fn parse(input: &str) -> ArithResult<Option<Expr>> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Ok(None);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.comma()?;
    if let Some(tok) = parser.tokens.get(parser.pos) {
        let shown = match tok {
            Tok::Num(n) => n.to_string(),
            Tok::Ident(name) => name.clone(),
            Tok::Op(op) => op.to_string(),
        };
        return err(format!("syntax error in expression (error token is \"{shown}\")"));
    }
    Ok(Some(expr))
}

fn overflow() -> ArithError {
    ArithError("integer overflow".into())
}

fn apply(op: BinOp, a: i64, b: i64) -> ArithResult<i64> {
    let value = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div | BinOp::Rem if b == 0 => return err("division by 0"),
        BinOp::Div => a.checked_div(b).ok_or_else(overflow)?,
        BinOp::Rem => a.checked_rem(b).ok_or_else(overflow)?,
        BinOp::Pow => {
            if b < 0 {
                return err("exponent less than 0");
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
        BinOp::Shl | BinOp::Shr => {
            let shift = u32::try_from(b).ok().filter(|s| *s < 64).ok_or_else(overflow)?;
            if op == BinOp::Shl {
                a.wrapping_shl(shift)
            } else {
                a >> shift
            }
        }
        BinOp::Lt => (a < b) as i64,
        BinOp::Le => (a <= b) as i64,
        BinOp::Gt => (a > b) as i64,
        BinOp::Ge => (a >= b) as i64,
        BinOp::Eq => (a == b) as i64,
        BinOp::Ne => (a != b) as i64,
        BinOp::BitAnd => a & b,
        BinOp::BitXor => a ^ b,
        BinOp::BitOr => a | b,
        BinOp::And => (a != 0 && b != 0) as i64,
        BinOp::Or => (a != 0 || b != 0) as i64,
    };
    Ok(value)
}

struct Evaluator<'e> {
    env: &'e mut dyn ArithEnv,
    depth: usize,
}

impl Evaluator<'_> {
    fn var(&mut self, name: &str) -> ArithResult<i64> {
        let Some(raw) = self.env.get(name) else {
            return Ok(0);
        };
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(0);
        }
        if let Ok(n) = raw.parse::<i64>() {
            return Ok(n);
        }
        // The value is itself an expression
        if self.depth >= MAX_RECURSION {
            return err(format!("{name}: expression recursion level exceeded"));
        }
        self.depth += 1;
        let value = match parse(raw)? {
            Some(expr) => self.eval(&expr),
            None => Ok(0),
        };
        self.depth -= 1;
        value
    }

    fn store(&mut self, name: &str, value: i64) -> ArithResult<i64> {
        self.env.set(name, value).map_err(ArithError)?;
        Ok(value)
    }

    fn eval(&mut self, expr: &Expr) -> ArithResult<i64> {
        match expr {
            Expr::Num(n) => Ok(*n),
            Expr::Var(name) => self.var(name),
            Expr::Neg(inner) => self.eval(inner)?.checked_neg().ok_or_else(overflow),
            Expr::Not(inner) => Ok((self.eval(inner)? == 0) as i64),
            Expr::BitNot(inner) => Ok(!self.eval(inner)?),
            Expr::Binary(BinOp::And, lhs, rhs) => {
                if self.eval(lhs)? == 0 {
                    return Ok(0);
                }
                Ok((self.eval(rhs)? != 0) as i64)
            }
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                if self.eval(lhs)? != 0 {
                    return Ok(1);
                }
                Ok((self.eval(rhs)? != 0) as i64)
            }
            Expr::Binary(op, lhs, rhs) => {
                let a = self.eval(lhs)?;
                let b = self.eval(rhs)?;
                apply(*op, a, b)
            }
            Expr::Assign(name, op, value) => {
                let rhs = self.eval(value)?;
                let result = match op {
                    Some(op) => {
                        let current = self.var(name)?;
                        apply(*op, current, rhs)?
                    }
                    None => rhs,
                };
                self.store(name, result)
            }
            Expr::PreStep(name, delta) => {
                let value = self.var(name)?.checked_add(*delta).ok_or_else(overflow)?;
                self.store(name, value)
            }
            Expr::PostStep(name, delta) => {
                let old = self.var(name)?;
                let value = old.checked_add(*delta).ok_or_else(overflow)?;
                self.store(name, value)?;
                Ok(old)
            }
            Expr::Ternary(cond, then, otherwise) => {
                if self.eval(cond)? != 0 {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Comma(first, second) => {
                self.eval(first)?;
                self.eval(second)
            }
        }
    }
}

/// Evaluate an expression. Empty input evaluates to 0.
pub fn evaluate(input: &str, env: &mut dyn ArithEnv) -> ArithResult<i64> {
    match parse(input)? {
        Some(expr) => Evaluator { env, depth: 0 }.eval(&expr),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Vars(HashMap<String, String>);

    impl ArithEnv for Vars {
        fn get(&self, name: &str) -> Option<String> {
            self.0.get(name).cloned()
        }
        fn set(&mut self, name: &str, value: i64) -> Result<(), String> {
            self.0.insert(name.to_string(), value.to_string());
            Ok(())
        }
    }

    fn eval(input: &str) -> ArithResult<i64> {
        evaluate(input, &mut Vars::default())
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("1 + 2 * 3"), Ok(7));
        assert_eq!(eval("(1 + 2) * 3"), Ok(9));
        assert_eq!(eval("2 ** 3 ** 2"), Ok(512));
        assert_eq!(eval("-2 ** 2"), Ok(4));
        assert_eq!(eval("1 < 2 && 3 > 4 || 5"), Ok(1));
        assert_eq!(eval("7 % 3 << 2"), Ok(4));
        assert_eq!(eval("1 ? 2 : 3"), Ok(2));
        assert_eq!(eval("~0"), Ok(-1));
        assert_eq!(eval(""), Ok(0));
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval("0x1F"), Ok(31));
        assert_eq!(eval("010"), Ok(8));
        assert_eq!(eval("2#101"), Ok(5));
        assert_eq!(eval("16#ff"), Ok(255));
        assert!(eval("08").is_err());
        assert_eq!(
            eval("0x"),
            err("0x: invalid integer constant (error token is \"0x\")")
        );
        assert_eq!(
            eval("16#"),
            err("16#: invalid integer constant (error token is \"16#\")")
        );
    }

    #[test]
    fn test_assignment_and_steps() {
        let mut vars = Vars::default();
        assert_eq!(evaluate("x = 5", &mut vars), Ok(5));
        assert_eq!(evaluate("x += 2", &mut vars), Ok(7));
        assert_eq!(evaluate("x++", &mut vars), Ok(7));
        assert_eq!(evaluate("++x", &mut vars), Ok(9));
        assert_eq!(evaluate("y = x-- , y", &mut vars), Ok(9));
        assert_eq!(vars.get("x").as_deref(), Some("8"));
        assert_eq!(evaluate("$x * 2", &mut vars), Ok(16));
    }

    #[test]
    fn test_short_circuit_skips_assignment() {
        let mut vars = Vars::default();
        assert_eq!(evaluate("0 && (z = 1)", &mut vars), Ok(0));
        assert_eq!(evaluate("1 ? 2 : (z = 3)", &mut vars), Ok(2));
        assert_eq!(vars.get("z"), None);
    }

    #[test]
    fn test_errors() {
        assert_eq!(eval("1 / 0"), err("division by 0"));
        assert_eq!(eval("5 % 0"), err("division by 0"));
        assert_eq!(eval("9223372036854775807 + 1"), err("integer overflow"));
        assert!(eval("1 +").is_err());
        assert!(eval("2 ** -1").is_err());
    }

    #[test]
    fn test_variable_holding_expression() {
        let mut vars = Vars::default();
        vars.0.insert("a".into(), "b + 1".into());
        vars.0.insert("b".into(), "2".into());
        assert_eq!(evaluate("a * 3", &mut vars), Ok(9));

        vars.0.insert("loop".into(), "loop".into());
        assert!(evaluate("loop", &mut vars).is_err());
    }
}
