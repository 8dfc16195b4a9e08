//! Property-based tests for the parser
//!
//! Generated scripts must survive parse → display → parse unchanged, and
//! arbitrary input must never panic the parser or the interpreter.

use proptest::prelude::*;
use sandbash::Bash;
use sandbash::parser::Parser;

/// Strategies for generating shell-like input
mod strategies {
    use proptest::prelude::*;

    pub fn identifier() -> impl Strategy<Value = String> {
        prop::string::string_regex("[a-zA-Z_][a-zA-Z0-9_]{0,8}")
            .unwrap()
            .prop_filter("reserved word", |s| !sandbash::parser::is_reserved(s))
    }

    pub fn literal() -> impl Strategy<Value = String> {
        prop::string::string_regex("[a-zA-Z0-9_./-]{1,10}")
            .unwrap()
            .prop_filter("reserved word", |s| !sandbash::parser::is_reserved(s))
    }

    /// A single word in one of the quoting forms.
    pub fn word() -> impl Strategy<Value = String> {
        prop_oneof![
            literal(),
            literal().prop_map(|w| format!("'{w} x'")),
            (literal(), identifier()).prop_map(|(w, v)| format!("\"{w} ${v}\"")),
            identifier().prop_map(|v| format!("${{{v}:-def}}")),
            identifier().prop_map(|v| format!("${{#{v}}}")),
            identifier().prop_map(|v| format!("$(({v} + 1))")),
            literal().prop_map(|w| format!("$(echo {w})")),
        ]
    }

    pub fn simple_command() -> impl Strategy<Value = String> {
        (
            prop::option::of((identifier(), word())),
            prop::sample::select(vec!["echo", "cat", "printf", "test", "grep"]),
            prop::collection::vec(word(), 0..4),
            prop::option::of(prop::sample::select(vec![
                "> /tmp/out",
                ">> /tmp/out",
                "2>&1",
                "< /tmp/in",
                "2>/dev/null",
            ])),
        )
            .prop_map(|(assign, name, args, redirect)| {
                let mut parts = Vec::new();
                if let Some((var, value)) = assign {
                    parts.push(format!("{var}={value}"));
                }
                parts.push(name.to_string());
                parts.extend(args);
                if let Some(r) = redirect {
                    parts.push(r.to_string());
                }
                parts.join(" ")
            })
    }

    pub fn pipeline() -> impl Strategy<Value = String> {
        (
            any::<bool>(),
            prop::collection::vec(simple_command(), 1..4),
        )
            .prop_map(|(negated, stages)| {
                let joined = stages.join(" | ");
                if negated { format!("! {joined}") } else { joined }
            })
    }

    pub fn and_or() -> impl Strategy<Value = String> {
        (
            pipeline(),
            prop::collection::vec((prop::sample::select(vec!["&&", "||"]), pipeline()), 0..3),
        )
            .prop_map(|(first, rest)| {
                rest.into_iter()
                    .fold(first, |acc, (op, p)| format!("{acc} {op} {p}"))
            })
    }

    pub fn compound() -> impl Strategy<Value = String> {
        let body = prop::collection::vec(and_or(), 1..3)
            .prop_map(|cmds| cmds.join("; "))
            .boxed();
        prop_oneof![
            (and_or(), body.clone()).prop_map(|(c, b)| format!("if {c}; then {b}; fi")),
            (and_or(), body.clone(), body.clone())
                .prop_map(|(c, b, e)| format!("if {c}; then {b}; else {e}; fi")),
            (identifier(), prop::collection::vec(word(), 0..3), body.clone())
                .prop_map(|(v, ws, b)| format!("for {v} in {}; do {b}; done", ws.join(" "))),
            (and_or(), body.clone()).prop_map(|(c, b)| format!("while {c}; do {b}; done")),
            body.clone().prop_map(|b| format!("{{ {b}; }}")),
            body.clone().prop_map(|b| format!("( {b} )")),
            (identifier(), body.clone()).prop_map(|(n, b)| format!("{n}() {{ {b}; }}")),
            (word(), literal(), body)
                .prop_map(|(s, p, b)| format!("case {s} in {p}|*) {b} ;; esac")),
        ]
    }

    pub fn script() -> impl Strategy<Value = String> {
        prop::collection::vec(prop_oneof![and_or(), compound()], 1..4)
            .prop_map(|cmds| cmds.join("\n"))
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn display_round_trips(script in strategies::script()) {
        let first = Parser::new(&script).parse().unwrap();
        let printed = first.to_string();
        let second = Parser::new(&printed).parse();
        prop_assert!(second.is_ok(), "reparse failed for {:?}: {:?}", printed, second.err());
        prop_assert_eq!(first, second.unwrap());
    }

    #[test]
    fn parser_never_panics(input in ".{0,200}") {
        let _ = Parser::new(&input).parse();
    }

    #[test]
    fn parser_never_panics_on_shell_punctuation(input in "[a-z $(){}|&;<>'\"`\\\\\n#=*?!-]{0,80}") {
        let _ = Parser::new(&input).parse();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn interpreter_never_panics(script in strategies::script()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let mut bash = Bash::new();
            // failures are fine, panics are not
            let _ = bash.exec(&script).await;
        });
    }
}
