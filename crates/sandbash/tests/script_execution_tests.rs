//! End-to-end script execution tests
//!
//! Each test runs a small script through a fresh `Bash` and checks
//! stdout, stderr and exit status the way a POSIX shell would produce them.

use sandbash::{Bash, Error};

async fn run(script: &str) -> sandbash::ExecResult {
    let mut bash = Bash::new();
    bash.exec(script).await.unwrap()
}

async fn stdout(script: &str) -> String {
    run(script).await.stdout
}

mod quoting {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn unquoted_variable_is_split() {
        let out = stdout(r#"VAR="a b"; for w in $VAR; do echo $w; done"#).await;
        assert_eq!(out, "a\nb\n");
    }

    #[tokio::test]
    async fn quoted_variable_is_one_field() {
        let out = stdout(r#"VAR="a b"; for w in "$VAR"; do echo $w; done"#).await;
        assert_eq!(out, "a b\n");
    }

    #[tokio::test]
    async fn quoted_at_keeps_arguments() {
        let out = stdout(r#"f() { for a in "$@"; do echo "[$a]"; done; }; f "x y" z"#).await;
        assert_eq!(out, "[x y]\n[z]\n");
    }

    #[tokio::test]
    async fn single_quotes_are_literal() {
        let out = stdout(r#"x=1; echo '$x' "$x" \$x"#).await;
        assert_eq!(out, "$x 1 $x\n");
    }

    #[tokio::test]
    async fn custom_ifs() {
        let out = stdout(r#"IFS=:; line="a:b:c"; for p in $line; do echo $p; done"#).await;
        assert_eq!(out, "a\nb\nc\n");
    }
}

mod pipelines {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn status_is_last_stage() {
        assert_eq!(run("false | true").await.exit_code, 0);
        assert_eq!(run("true | false").await.exit_code, 1);
    }

    #[tokio::test]
    async fn pipefail_reports_failing_stage() {
        assert_eq!(run("set -o pipefail; false | true").await.exit_code, 1);
        assert_eq!(run("set -o pipefail; true | true").await.exit_code, 0);
    }

    #[tokio::test]
    async fn negation() {
        assert_eq!(run("! false").await.exit_code, 0);
        assert_eq!(run("! true").await.exit_code, 1);
    }

    #[tokio::test]
    async fn data_flows_between_stages() {
        let out = stdout("printf 'b\\na\\nb\\n' | sort | uniq -c | wc -l").await;
        assert_eq!(out.trim(), "2");
    }

    #[tokio::test]
    async fn assignments_in_stages_do_not_leak() {
        let out = stdout("x=1; x=2 | true; echo $x").await;
        assert_eq!(out, "1\n");
    }
}

mod control_flow {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn if_elif_else() {
        let script = r#"
            n=5
            if [ $n -lt 3 ]; then echo small
            elif [ $n -lt 10 ]; then echo medium
            else echo large
            fi
        "#;
        assert_eq!(stdout(script).await, "medium\n");
    }

    #[tokio::test]
    async fn while_and_until() {
        let out = stdout("i=0; while [ $i -lt 3 ]; do echo $i; i=$((i+1)); done").await;
        assert_eq!(out, "0\n1\n2\n");
        let out = stdout("i=3; until [ $i -eq 0 ]; do echo $i; i=$((i-1)); done").await;
        assert_eq!(out, "3\n2\n1\n");
    }

    #[tokio::test]
    async fn arithmetic_for() {
        let out = stdout("for ((i=0; i<3; i++)); do printf '%s,' $i; done; echo").await;
        assert_eq!(out, "0,1,2,\n");
    }

    #[tokio::test]
    async fn nested_break_and_continue() {
        let script = r#"
            for i in 1 2 3; do
              for j in a b c; do
                [ $j = b ] && continue
                [ $i = 2 ] && break 2
                echo $i$j
              done
            done
        "#;
        assert_eq!(stdout(script).await, "1a\n1c\n");
    }

    #[tokio::test]
    async fn break_outside_loop_is_harmless() {
        let result = run("break; echo after").await;
        assert_eq!(result.stdout, "after\n");
        assert!(result.stderr.contains("only meaningful"));
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn case_alternatives_and_fallthrough() {
        let script = r#"
            for f in a.txt b.md c; do
              case $f in
                *.txt|*.md) echo "doc $f" ;;
                *) echo "other $f" ;;
              esac
            done
            case x in x) echo one ;& y) echo two ;; z) echo three ;; esac
        "#;
        assert_eq!(
            stdout(script).await,
            "doc a.txt\ndoc b.md\nother c\none\ntwo\n"
        );
    }

    #[tokio::test]
    async fn functions_locals_and_return() {
        let script = r#"
            x=global
            f() { local x=inner; echo "$1 $x"; return 3; }
            f arg
            echo "$? $x"
        "#;
        assert_eq!(stdout(script).await, "arg inner\n3 global\n");
    }

    #[tokio::test]
    async fn exit_stops_script() {
        let result = run("echo one; exit 4; echo two").await;
        assert_eq!(result.stdout, "one\n");
        assert_eq!(result.exit_code, 4);
    }

    #[tokio::test]
    async fn exit_in_subshell_only_leaves_subshell() {
        let result = run("(echo in; exit 2); echo \"out $?\"").await;
        assert_eq!(result.stdout, "in\nout 2\n");
    }

    #[tokio::test]
    async fn errexit() {
        let result = run("set -e; echo a; false; echo b").await;
        assert_eq!(result.stdout, "a\n");
        assert_eq!(result.exit_code, 1);

        let result = run("set -e; if false; then :; fi; false || echo handled").await;
        assert_eq!(result.stdout, "handled\n");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn background_jobs_and_wait() {
        let result = run("(exit 3) & wait $!; echo $?").await;
        assert_eq!(result.stdout, "3\n");
    }
}

mod expansion {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn parameter_modifiers() {
        let script = r#"
            unset u; e=""; v=value; p=/a/b/file.tar.gz
            echo ${u:-def} ${e:-empty} ${v:+set} ${#v}
            echo ${p##*/} ${p%.*} ${p%%.*} ${p#/a/}
            echo ${v/a/A} ${v//[aeu]/_} ${v^^} ${v:1:3}
        "#;
        assert_eq!(
            stdout(script).await,
            "def empty set 5\nfile.tar.gz /a/b/file.tar /a/b/file b/file.tar.gz\nvAlue v_l__ VALUE alu\n"
        );
    }

    #[tokio::test]
    async fn substring_with_huge_bounds() {
        let script = "x=abc; echo ${x:1:9223372036854775807}; echo ${x: -9223372036854775807}; \
                      set -- a b c; echo ${@:2:9223372036854775807}";
        assert_eq!(stdout(script).await, "bc\nabc\nb c\n");
    }

    #[tokio::test]
    async fn assign_default_persists() {
        assert_eq!(stdout("echo ${x:=7}; echo $x").await, "7\n7\n");
    }

    #[tokio::test]
    async fn error_modifier_aborts() {
        let result = run("echo start; echo ${missing:?is required}; echo never").await;
        assert_eq!(result.stdout, "start\n");
        assert!(result.stderr.contains("missing: is required"));
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn nounset() {
        let result = run("set -u; echo $nope").await;
        assert!(result.stderr.contains("nope: unbound variable"));
        assert_ne!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn brace_expansion() {
        assert_eq!(stdout("echo {a,b}{1..3}").await, "a1 a2 a3 b1 b2 b3\n");
        assert_eq!(stdout("echo {5..1..2} {c..a}").await, "5 3 1 c b a\n");
        assert_eq!(stdout("echo \"{a,b}\"").await, "{a,b}\n");
    }

    #[tokio::test]
    async fn arithmetic() {
        assert_eq!(stdout("echo $((2 + 3 * 4)) $((2 ** 10)) $((0x10 + 010))").await, "14 1024 24\n");
        assert_eq!(stdout("x=5; ((x += 2)); echo $x").await, "7\n");
    }

    #[tokio::test]
    async fn division_by_zero_is_not_fatal() {
        let result = run("echo $((1 / 0)); echo next").await;
        assert!(result.stderr.contains("division by 0"));
        assert!(result.stdout.ends_with("next\n"));
    }

    #[tokio::test]
    async fn command_substitution() {
        let out = stdout("x=$(echo hi; echo there); echo \"[$x]\"; echo `echo back`").await;
        assert_eq!(out, "[hi\nthere]\nback\n");
    }

    #[tokio::test]
    async fn command_substitution_is_a_subshell() {
        assert_eq!(stdout("x=1; y=$(x=2; echo $x); echo $x $y").await, "1 2\n");
    }

    #[tokio::test]
    async fn globbing() {
        let script = r#"
            mkdir -p /g && cd /g
            touch b.txt a.txt .hidden c.md
            echo *.txt
            echo *
            echo .h*
            echo *.none
        "#;
        assert_eq!(
            stdout(script).await,
            "a.txt b.txt\na.txt b.txt c.md\n.hidden\n*.none\n"
        );
    }

    #[tokio::test]
    async fn tilde() {
        assert_eq!(stdout("echo ~ ~/x").await, "/home/user /home/user/x\n");
    }
}

mod redirection {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn write_append_read() {
        let script = r#"
            echo one > /tmp/f
            echo two >> /tmp/f
            cat < /tmp/f
        "#;
        assert_eq!(stdout(script).await, "one\ntwo\n");
    }

    #[tokio::test]
    async fn stderr_routing() {
        let result = run("ls /missing 2>/dev/null; echo err >&2").await;
        assert_eq!(result.stderr, "err\n");

        let result = run("{ echo out; echo err >&2; } > /tmp/all 2>&1; cat /tmp/all").await;
        assert_eq!(result.stdout, "out\nerr\n");

        let result = run("{ echo out; echo err >&2; } &> /tmp/both; wc -l < /tmp/both").await;
        assert_eq!(result.stdout.trim(), "2");
    }

    #[tokio::test]
    async fn heredocs() {
        let script = "name=world\ncat <<EOF\nhello $name\nEOF\ncat <<'EOF'\nhello $name\nEOF\ncat <<-EOF\n\tindented\n\tEOF\n";
        assert_eq!(
            stdout(script).await,
            "hello world\nhello $name\nindented\n"
        );
    }

    #[tokio::test]
    async fn here_string() {
        assert_eq!(stdout("tr a-z A-Z <<< hello").await, "HELLO\n");
    }

    #[tokio::test]
    async fn redirect_failure_skips_command() {
        let result = run("echo hi > /nope/file; echo $?").await;
        assert_eq!(result.stdout, "1\n");
        assert!(result.stderr.contains("/nope/file"));
    }

    #[tokio::test]
    async fn while_read_from_file() {
        let script = r#"
            printf 'a 1\nb 2\n' > /tmp/pairs
            while read k v; do echo "$v=$k"; done < /tmp/pairs
        "#;
        assert_eq!(stdout(script).await, "1=a\n2=b\n");
    }
}

mod commands {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn not_found() {
        let result = run("no_such_cmd arg").await;
        assert_eq!(result.exit_code, 127);
        assert_eq!(result.stderr, "sandbash: no_such_cmd: command not found\n");
    }

    #[tokio::test]
    async fn printf_quotes_for_reuse() {
        let script = r#"
            printf '%q\n' safe-word 'a b'
            printf -v quoted '%q' 'x y'
            echo "$quoted"
        "#;
        assert_eq!(stdout(script).await, "safe-word\na\\ b\nx\\ y\n");
    }

    #[tokio::test]
    async fn missing_file_message() {
        let result = run("cat /x").await;
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stderr, "cat: /x: No such file or directory\n");
    }

    #[tokio::test]
    async fn prefix_assignment_is_temporary() {
        let out = stdout("FOO=outer; FOO=inner printenv FOO; echo $FOO").await;
        assert_eq!(out, "inner\nouter\n");
    }

    #[tokio::test]
    async fn scripts_by_path() {
        let script = r#"
            printf 'echo "args: $# $1"\nexit 5\n' > /tmp/s.sh
            /tmp/s.sh first second
            echo "status $?"
            /tmp/missing.sh
            echo "status $?"
            /tmp
            echo "status $?"
        "#;
        let result = run(script).await;
        assert_eq!(result.stdout, "args: 2 first\nstatus 5\nstatus 127\nstatus 126\n");
    }

    #[tokio::test]
    async fn source_and_eval() {
        let script = r#"
            echo 'greet() { echo "hi $1"; }; loaded=yes' > /tmp/lib.sh
            source /tmp/lib.sh
            greet bob
            cmd='echo $loaded'
            eval "$cmd"
        "#;
        assert_eq!(stdout(script).await, "hi bob\nyes\n");
    }

    #[tokio::test]
    async fn eval_syntax_error_is_status_2() {
        let result = run("eval 'if'; echo $?").await;
        assert_eq!(result.stdout, "2\n");
    }

    #[tokio::test]
    async fn find_prune() {
        let script = r#"
            mkdir -p /dir/include /dir/skip
            echo a > /dir/include/file.txt
            echo b > /dir/skip/hidden.txt
            find /dir -name skip -prune -o -type f -print
        "#;
        assert_eq!(stdout(script).await, "/dir/include/file.txt\n");
    }

    #[tokio::test]
    async fn xtrace() {
        let result = run("set -x; x=1; echo \"$x two\"").await;
        assert_eq!(result.stdout, "1 two\n");
        assert!(result.stderr.contains("+ echo '1 two'"), "{}", result.stderr);
    }

    #[tokio::test]
    async fn cd_and_pwd() {
        assert_eq!(stdout("cd /tmp; pwd; cd ..; pwd; cd -").await, "/tmp\n/\n/tmp\n");
    }

    #[tokio::test]
    async fn text_utilities() {
        let script = r#"
            printf 'name,age\nbob,30\nann,25\n' > /tmp/people.csv
            tail -n +2 /tmp/people.csv | cut -d, -f1 | sort
            grep -c bob /tmp/people.csv
            head -1 /tmp/people.csv | tr , ' '
            basename /a/b/c.txt .txt; dirname /a/b/c.txt
            seq 3 | tee /tmp/seq | wc -l
        "#;
        assert_eq!(
            stdout(script).await,
            "ann\nbob\n1\nname age\nc\n/a/b\n3\n"
        );
    }
}

#[tokio::test]
async fn syntax_error_is_returned() {
    let mut bash = Bash::new();
    let err = bash.exec("if true; then echo").await.unwrap_err();
    assert!(matches!(err, Error::Syntax { .. }));
    assert!(err.to_string().starts_with("syntax error at line"));
}

#[tokio::test]
async fn state_persists_between_execs() {
    let mut bash = Bash::new();
    bash.exec("count=1; inc() { count=$((count + 1)); }").await.unwrap();
    bash.exec("inc; inc").await.unwrap();
    let result = bash.exec("echo $count; cd /tmp").await.unwrap();
    assert_eq!(result.stdout, "3\n");
    assert_eq!(bash.exec("pwd").await.unwrap().stdout, "/tmp\n");
}
