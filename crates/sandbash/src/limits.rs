//! Resource limits for sandboxed execution
//!
//! These limits keep runaway scripts from consuming unbounded CPU time,
//! memory or stack. The interpreter consults [`ExecutionCounters`] at every
//! command dispatch, loop iteration, function/subshell entry and expansion.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::{Duration, Instant};

/// Resource limits for script execution
///
/// Deserializes from JSON with every field optional; `timeout_ms` is the
/// timeout in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Maximum number of commands that can be executed (fuel model)
    /// Default: 10,000
    pub max_commands: usize,

    /// Maximum iterations for a single loop
    /// Default: 10,000
    pub max_loop_iterations: usize,

    /// Maximum iterations across all loops in one execution
    /// Default: 1,000,000
    pub max_total_loop_iterations: usize,

    /// Maximum function/subshell nesting depth (recursion limit)
    /// Default: 100
    pub max_function_depth: usize,

    /// Maximum length in bytes of any single expanded value or file read
    /// Default: 10 MiB
    pub max_string_length: usize,

    /// Execution timeout
    /// Default: 30 seconds
    #[serde(
        rename = "timeout_ms",
        serialize_with = "serialize_millis",
        deserialize_with = "deserialize_millis"
    )]
    pub timeout: Duration,
}

fn serialize_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
}

fn deserialize_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_commands: 10_000,
            max_loop_iterations: 10_000,
            max_total_loop_iterations: 1_000_000,
            max_function_depth: 100,
            max_string_length: 10 * 1024 * 1024,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ExecutionLimits {
    /// Create new limits with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum command count
    pub fn max_commands(mut self, count: usize) -> Self {
        self.max_commands = count;
        self
    }

    /// Set maximum loop iterations
    pub fn max_loop_iterations(mut self, count: usize) -> Self {
        self.max_loop_iterations = count;
        self
    }

    /// Set maximum cumulative loop iterations
    pub fn max_total_loop_iterations(mut self, count: usize) -> Self {
        self.max_total_loop_iterations = count;
        self
    }

    /// Set maximum function depth
    pub fn max_function_depth(mut self, depth: usize) -> Self {
        self.max_function_depth = depth;
        self
    }

    /// Set maximum string length
    pub fn max_string_length(mut self, len: usize) -> Self {
        self.max_string_length = len;
        self
    }

    /// Set execution timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Execution counters for tracking resource usage
#[derive(Debug, Clone, Default)]
pub struct ExecutionCounters {
    /// Number of commands executed
    pub commands: usize,

    /// Current function call depth
    pub function_depth: usize,

    /// Number of iterations in the innermost running loop
    pub loop_iterations: usize,

    /// Iterations across every loop since the execution started
    pub total_loop_iterations: usize,

    deadline: Option<Instant>,
    timeout: Duration,
}

impl ExecutionCounters {
    /// Create new counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset per-execution counters and arm the wall-clock deadline.
    pub fn start(&mut self, limits: &ExecutionLimits) {
        self.commands = 0;
        self.function_depth = 0;
        self.loop_iterations = 0;
        self.total_loop_iterations = 0;
        self.timeout = limits.timeout;
        self.deadline = Instant::now().checked_add(limits.timeout);
    }

    /// Fail if the wall-clock deadline has passed.
    pub fn check_deadline(&self) -> Result<(), LimitExceeded> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(LimitExceeded::Timeout(self.timeout))
            }
            _ => Ok(()),
        }
    }

    /// Time left before the deadline, if one is armed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Increment command counter, returns error if limit exceeded
    pub fn tick_command(&mut self, limits: &ExecutionLimits) -> Result<(), LimitExceeded> {
        self.commands += 1;
        if self.commands > limits.max_commands {
            return Err(LimitExceeded::MaxCommands(limits.max_commands));
        }
        self.check_deadline()
    }

    /// Increment loop iteration counters, returns error if a limit is exceeded
    pub fn tick_loop(&mut self, limits: &ExecutionLimits) -> Result<(), LimitExceeded> {
        self.loop_iterations += 1;
        self.total_loop_iterations += 1;
        if self.loop_iterations > limits.max_loop_iterations {
            return Err(LimitExceeded::MaxLoopIterations(limits.max_loop_iterations));
        }
        if self.total_loop_iterations > limits.max_total_loop_iterations {
            return Err(LimitExceeded::MaxTotalLoopIterations(
                limits.max_total_loop_iterations,
            ));
        }
        self.check_deadline()
    }

    /// Start counting a new loop. Returns the enclosing loop's count, to be
    /// handed back to [`exit_loop`](Self::exit_loop).
    pub fn enter_loop(&mut self) -> usize {
        std::mem::take(&mut self.loop_iterations)
    }

    /// Restore the enclosing loop's iteration count.
    pub fn exit_loop(&mut self, saved: usize) {
        self.loop_iterations = saved;
    }

    /// Push function call, returns error if depth exceeded
    pub fn push_function(&mut self, limits: &ExecutionLimits) -> Result<(), LimitExceeded> {
        // Check before incrementing so we don't leave invalid state on failure
        if self.function_depth >= limits.max_function_depth {
            return Err(LimitExceeded::MaxCallDepth(limits.max_function_depth));
        }
        self.function_depth += 1;
        Ok(())
    }

    /// Pop function call
    pub fn pop_function(&mut self) {
        self.function_depth = self.function_depth.saturating_sub(1);
    }

    /// Fail if a produced value is longer than allowed.
    pub fn check_string_length(
        &self,
        len: usize,
        limits: &ExecutionLimits,
    ) -> Result<(), LimitExceeded> {
        if len > limits.max_string_length {
            return Err(LimitExceeded::MaxStringLength(limits.max_string_length));
        }
        Ok(())
    }
}

/// Error returned when a resource limit is exceeded
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LimitExceeded {
    #[error("maximum command count exceeded ({0})")]
    MaxCommands(usize),

    #[error("maximum loop iterations exceeded ({0})")]
    MaxLoopIterations(usize),

    #[error("maximum total loop iterations exceeded ({0})")]
    MaxTotalLoopIterations(usize),

    #[error("maximum recursion depth exceeded ({0})")]
    MaxCallDepth(usize),

    #[error("maximum string length exceeded ({0} bytes)")]
    MaxStringLength(usize),

    #[error("execution timeout ({0:?})")]
    Timeout(Duration),
}
