//! Shell pattern matching
//!
//! Used by `case`, `[[ == ]]`-style tests, `${var#pat}` and friends,
//! `find -name` and pathname expansion. Backslash escapes a single
//! character; quoted text reaches here already escaped via [`escape`].

/// Whether `pattern` contains an unescaped `*`, `?` or `[`.
pub fn has_glob_chars(pattern: &str) -> bool {
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                chars.next();
            }
            '*' | '?' | '[' => return true,
            _ => {}
        }
    }
    false
}

/// Escape pattern metacharacters so `text` only matches itself.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Remove backslash escapes, giving the literal text a pattern stands for.
pub fn unescape(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(ch);
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Char(char),
    Any,
    Star,
    Class { negated: bool, items: Vec<ClassItem> },
}

#[derive(Debug, Clone, PartialEq)]
enum ClassItem {
    Char(char),
    Range(char, char),
    Named(String),
}

fn compile(pattern: &str) -> Vec<Token> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                tokens.push(Token::Char(chars[i + 1]));
                i += 2;
            }
            '*' => {
                // consecutive stars are one star
                if tokens.last() != Some(&Token::Star) {
                    tokens.push(Token::Star);
                }
                i += 1;
            }
            '?' => {
                tokens.push(Token::Any);
                i += 1;
            }
            '[' => match compile_class(&chars, i) {
                Some((token, next)) => {
                    tokens.push(token);
                    i = next;
                }
                None => {
                    tokens.push(Token::Char('['));
                    i += 1;
                }
            },
            ch => {
                tokens.push(Token::Char(ch));
                i += 1;
            }
        }
    }
    tokens
}

/// Parse `[...]` starting at `start`; `None` if it is not closed.
fn compile_class(chars: &[char], start: usize) -> Option<(Token, usize)> {
    let mut i = start + 1;
    let negated = matches!(chars.get(i), Some('!' | '^'));
    if negated {
        i += 1;
    }

    let mut items = Vec::new();
    let mut first = true;
    loop {
        let ch = *chars.get(i)?;
        if ch == ']' && !first {
            return Some((Token::Class { negated, items }, i + 1));
        }
        first = false;

        if ch == '[' && chars.get(i + 1) == Some(&':') {
            let rest: String = chars[i + 2..].iter().collect();
            if let Some(end) = rest.find(":]") {
                items.push(ClassItem::Named(rest[..end].to_string()));
                i += 2 + rest[..end].chars().count() + 2;
                continue;
            }
        }

        let ch = if ch == '\\' {
            i += 1;
            *chars.get(i)?
        } else {
            ch
        };

        if chars.get(i + 1) == Some(&'-') && chars.get(i + 2).is_some_and(|c| *c != ']') {
            let end = chars[i + 2];
            items.push(ClassItem::Range(ch, end));
            i += 3;
        } else {
            items.push(ClassItem::Char(ch));
            i += 1;
        }
    }
}

fn class_matches(items: &[ClassItem], ch: char) -> bool {
    items.iter().any(|item| match item {
        ClassItem::Char(c) => *c == ch,
        ClassItem::Range(lo, hi) => *lo <= ch && ch <= *hi,
        ClassItem::Named(name) => match name.as_str() {
            "alpha" => ch.is_alphabetic(),
            "digit" => ch.is_ascii_digit(),
            "alnum" => ch.is_alphanumeric(),
            "upper" => ch.is_uppercase(),
            "lower" => ch.is_lowercase(),
            "space" => ch.is_whitespace(),
            "blank" => ch == ' ' || ch == '\t',
            "punct" => ch.is_ascii_punctuation(),
            "xdigit" => ch.is_ascii_hexdigit(),
            "cntrl" => ch.is_control(),
            "print" => !ch.is_control(),
            "graph" => !ch.is_control() && !ch.is_whitespace(),
            _ => false,
        },
    })
}

fn token_matches(token: &Token, ch: char) -> bool {
    match token {
        Token::Char(c) => *c == ch,
        Token::Any => true,
        Token::Class { negated, items } => class_matches(items, ch) != *negated,
        Token::Star => true,
    }
}

fn match_tokens(tokens: &[Token], text: &[char]) -> bool {
    // Iterative matcher with single-star backtracking
    let (mut t, mut s) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while s < text.len() {
        match tokens.get(t) {
            Some(Token::Star) => {
                star = Some((t, s));
                t += 1;
            }
            Some(token) if token_matches(token, text[s]) => {
                t += 1;
                s += 1;
            }
            _ => match star {
                Some((star_t, star_s)) => {
                    t = star_t + 1;
                    s = star_s + 1;
                    star = Some((star_t, star_s + 1));
                }
                None => return false,
            },
        }
    }
    tokens[t..].iter().all(|tok| *tok == Token::Star)
}

/// Whether `text` matches the whole of `pattern`.
pub fn matches(pattern: &str, text: &str) -> bool {
    let tokens = compile(pattern);
    let chars: Vec<char> = text.chars().collect();
    match_tokens(&tokens, &chars)
}

/// Case-insensitive [`matches`] (for `find -iname`).
pub fn matches_ignore_case(pattern: &str, text: &str) -> bool {
    matches(&pattern.to_lowercase(), &text.to_lowercase())
}

/// `${var#pat}` / `${var##pat}`.
pub fn remove_prefix(value: &str, pattern: &str, longest: bool) -> String {
    let tokens = compile(pattern);
    let chars: Vec<char> = value.chars().collect();
    let mut cut = None;
    for end in 0..=chars.len() {
        if match_tokens(&tokens, &chars[..end]) {
            cut = Some(end);
            if !longest {
                break;
            }
        }
    }
    match cut {
        Some(end) => chars[end..].iter().collect(),
        None => value.to_string(),
    }
}

/// `${var%pat}` / `${var%%pat}`.
pub fn remove_suffix(value: &str, pattern: &str, longest: bool) -> String {
    let tokens = compile(pattern);
    let chars: Vec<char> = value.chars().collect();
    let mut cut = None;
    for start in (0..=chars.len()).rev() {
        if match_tokens(&tokens, &chars[start..]) {
            cut = Some(start);
            if !longest {
                break;
            }
        }
    }
    match cut {
        Some(start) => chars[..start].iter().collect(),
        None => value.to_string(),
    }
}

/// Longest match of `tokens` starting exactly at `start`.
fn longest_match_at(tokens: &[Token], chars: &[char], start: usize) -> Option<usize> {
    (start..=chars.len())
        .rev()
        .find(|&end| match_tokens(tokens, &chars[start..end]))
}

/// Replacement modes of `${var/pat/rep}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    First,
    All,
    Start,
    End,
}

/// `${var/pat/rep}` and its `//`, `/#` and `/%` forms.
pub fn replace(value: &str, pattern: &str, replacement: &str, anchor: Anchor) -> String {
    if pattern.is_empty() {
        return value.to_string();
    }
    let tokens = compile(pattern);
    let chars: Vec<char> = value.chars().collect();

    match anchor {
        Anchor::Start => match longest_match_at(&tokens, &chars, 0) {
            Some(end) => format!("{replacement}{}", chars[end..].iter().collect::<String>()),
            None => value.to_string(),
        },
        Anchor::End => {
            for start in 0..=chars.len() {
                if match_tokens(&tokens, &chars[start..]) {
                    return format!("{}{replacement}", chars[..start].iter().collect::<String>());
                }
            }
            value.to_string()
        }
        Anchor::First | Anchor::All => {
            let mut out = String::new();
            let mut i = 0;
            let mut replaced = false;
            while i < chars.len() {
                if !(replaced && anchor == Anchor::First)
                    && let Some(end) = longest_match_at(&tokens, &chars, i).filter(|e| *e > i)
                {
                    out.push_str(replacement);
                    i = end;
                    replaced = true;
                    continue;
                }
                out.push(chars[i]);
                i += 1;
            }
            out
        }
    }
}
