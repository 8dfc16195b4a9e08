//! Threat model tests
//!
//! Untrusted scripts must not exhaust CPU, memory or stack, reach the host
//! filesystem, or escape the network policy. Every category below pairs an
//! attack script with the limit or isolation boundary that stops it.
//!
//! Run with: `cargo test --test threat_model_tests`

use sandbash::{Bash, Error, ExecutionLimits};
use std::time::{Duration, Instant};

fn limited(limits: ExecutionLimits) -> Bash {
    Bash::builder().limits(limits).build()
}

fn limit_message(result: sandbash::Result<sandbash::ExecResult>) -> String {
    match result {
        Err(e @ Error::ResourceLimit { .. }) => e.to_string(),
        other => panic!("expected a resource limit error, got {other:?}"),
    }
}

// =============================================================================
// 1. RESOURCE EXHAUSTION
// =============================================================================

mod resource_exhaustion {
    use super::*;

    #[tokio::test]
    async fn threat_unbounded_recursion_blocked() {
        let mut bash = limited(ExecutionLimits::new().max_function_depth(5));
        let started = Instant::now();
        let message = limit_message(bash.exec("recurse(){ recurse; }; recurse").await);
        assert!(message.contains("maximum recursion depth"), "{message}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn threat_recursive_subshells_blocked() {
        let mut bash = limited(ExecutionLimits::new().max_function_depth(8));
        let message = limit_message(bash.exec("f(){ ( f ); }; f").await);
        assert!(message.contains("maximum recursion depth"), "{message}");
    }

    #[tokio::test]
    async fn threat_eval_recursion_blocked() {
        let mut bash = limited(ExecutionLimits::new().max_function_depth(10));
        let message = limit_message(bash.exec(r#"s='eval "$s"'; eval "$s""#).await);
        assert!(message.contains("maximum recursion depth"), "{message}");
    }

    #[tokio::test]
    async fn threat_recursion_at_default_depth_is_stack_safe() {
        let mut bash = Bash::new();
        let script = "f(){ if [ $1 -gt 0 ]; then f $(( $1 - 1 )); else echo bottom; fi; }; f 95";
        assert_eq!(bash.exec(script).await.unwrap().stdout, "bottom\n");

        for script in [
            "recurse(){ recurse; }; recurse",
            "g(){ echo $(g); }; g",
            "e(){ eval e; }; e",
            "echo 'source /tmp/r.sh' > /tmp/r.sh; source /tmp/r.sh",
            "s(){ ( s ); }; s",
        ] {
            let message = limit_message(bash.exec(script).await);
            assert!(
                message.contains("maximum recursion depth exceeded (100)"),
                "{script}: {message}"
            );
        }
    }

    #[tokio::test]
    async fn threat_infinite_loop_blocked() {
        let mut bash = limited(ExecutionLimits::new().max_loop_iterations(100));
        let message = limit_message(bash.exec("while true; do :; done").await);
        assert!(message.contains("maximum loop iterations"), "{message}");
    }

    #[tokio::test]
    async fn threat_nested_loops_share_total_budget() {
        let limits = ExecutionLimits::new()
            .max_loop_iterations(100)
            .max_total_loop_iterations(500)
            .max_commands(1_000_000);
        let mut bash = limited(limits);
        let script = "for i in $(seq 50); do for j in $(seq 50); do :; done; done";
        let message = limit_message(bash.exec(script).await);
        assert!(message.contains("total loop iterations"), "{message}");
    }

    #[tokio::test]
    async fn threat_command_flood_blocked() {
        let mut bash = limited(ExecutionLimits::new().max_commands(10));
        let script = "true; ".repeat(20);
        let message = limit_message(bash.exec(&script).await);
        assert!(message.contains("maximum command count"), "{message}");
    }

    #[tokio::test]
    async fn threat_string_doubling_blocked() {
        let mut bash = limited(ExecutionLimits::new().max_string_length(4096));
        let script = "s=x; for i in $(seq 20); do s=$s$s; done";
        let message = limit_message(bash.exec(script).await);
        assert!(message.contains("maximum string length"), "{message}");
    }

    #[tokio::test]
    async fn threat_sleep_past_deadline_blocked() {
        let mut bash = limited(ExecutionLimits::new().timeout(Duration::from_millis(100)));
        let started = Instant::now();
        let message = limit_message(bash.exec("sleep 30").await);
        assert!(message.contains("timeout"), "{message}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn threat_partial_output_kept() {
        let mut bash = limited(ExecutionLimits::new().max_loop_iterations(3));
        let err = bash
            .exec("echo before; for i in 1 2 3 4 5; do echo $i; done")
            .await
            .unwrap_err();
        let partial = err.partial_output().expect("partial output");
        assert!(partial.stdout.starts_with("before\n1\n2\n3\n"), "{:?}", partial.stdout);
    }

    #[tokio::test]
    async fn threat_limits_reset_between_execs() {
        let mut bash = limited(ExecutionLimits::new().max_commands(5));
        assert!(bash.exec("true; true; true").await.is_ok());
        assert!(bash.exec("true; true; true").await.is_ok());
    }

    #[tokio::test]
    async fn threat_depth_restored_after_errors() {
        let mut bash = limited(ExecutionLimits::new().max_function_depth(3));
        // a failing function must not leak its depth slot
        let script = "f(){ return 1; }; for i in 1 2 3 4 5 6; do f; done; echo ok";
        assert_eq!(bash.exec(script).await.unwrap().stdout, "ok\n");
    }
}

// =============================================================================
// 2. FILESYSTEM ESCAPE
// =============================================================================

mod filesystem_escape {
    use super::*;

    #[tokio::test]
    async fn threat_host_files_invisible() {
        let mut bash = Bash::new();
        let result = bash.exec("cat /etc/passwd").await.unwrap();
        assert_eq!(result.exit_code, 1);
        assert!(result.stdout.is_empty());
    }

    #[tokio::test]
    async fn threat_parent_traversal_stays_virtual() {
        let mut bash = Bash::new();
        let result = bash
            .exec("cd /tmp; cd ../../../..; pwd; ls /")
            .await
            .unwrap();
        assert!(result.stdout.starts_with("/\n"));
        assert!(!result.stdout.contains("proc"));
    }

    #[tokio::test]
    async fn threat_symlink_loop_bounded() {
        let mut bash = Bash::new();
        let result = bash
            .exec("ln -s /tmp/b /tmp/a; ln -s /tmp/a /tmp/b; cat /tmp/a")
            .await
            .unwrap();
        assert_eq!(result.exit_code, 1);
        assert!(!result.stderr.is_empty());
    }
}

// =============================================================================
// 3. NETWORK
// =============================================================================

mod network {
    use super::*;

    #[tokio::test]
    async fn threat_no_network_by_default() {
        let mut bash = Bash::new();
        let result = bash.exec("curl https://example.com").await.unwrap();
        assert_ne!(result.exit_code, 0);
        assert!(result.stderr.contains("network access not configured"));
    }
}

// =============================================================================
// 4. ROBUSTNESS
// =============================================================================

mod robustness {
    use super::*;

    #[tokio::test]
    async fn threat_deeply_nested_input_rejected_cleanly() {
        let mut bash = Bash::new();
        let script = format!("{}echo x{}", "$(".repeat(50), ")".repeat(50));
        // either runs or fails with a governed error, but never panics
        let _ = bash.exec(&script).await;
    }

    #[tokio::test]
    async fn threat_unterminated_constructs_are_syntax_errors() {
        let mut bash = Bash::new();
        for script in ["echo 'open", "if true; then", "case x in", "f() {", "echo $((1 +"] {
            match bash.exec(script).await {
                Err(Error::Syntax { .. }) => {}
                other => panic!("{script:?}: expected syntax error, got {other:?}"),
            }
        }
    }
}
