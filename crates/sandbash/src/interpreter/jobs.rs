//! Job table for background execution
//!
//! `cmd &` runs to completion before the next command starts; the table
//! only remembers the outcome so `$!` and `wait` behave as scripts expect.

use std::collections::BTreeMap;

/// Finished background jobs awaiting `wait`.
#[derive(Debug, Clone)]
pub struct JobTable {
    /// Exit codes of jobs not yet waited for, by job ID
    jobs: BTreeMap<usize, i32>,
    /// Next job ID to assign
    next_id: usize,
    /// Last started job ID (for $!)
    last_job_id: Option<usize>,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    /// Create a new empty job table
    pub fn new() -> Self {
        Self {
            jobs: BTreeMap::new(),
            next_id: 1,
            last_job_id: None,
        }
    }

    /// Record a finished background job and return its ID.
    pub fn record(&mut self, exit_code: i32) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.jobs.insert(id, exit_code);
        self.last_job_id = Some(id);
        id
    }

    /// Get the last started job ID (for $!)
    pub fn last_job_id(&self) -> Option<usize> {
        self.last_job_id
    }

    /// Collect one job's status. `None` if the ID is unknown or already
    /// waited for.
    pub fn wait_for(&mut self, job_id: usize) -> Option<i32> {
        self.jobs.remove(&job_id)
    }

    /// Collect every job. Returns the exit code of the last one, or 0.
    pub fn wait_all(&mut self) -> i32 {
        let last = self.jobs.values().next_back().copied().unwrap_or(0);
        self.jobs.clear();
        last
    }

    /// Check if there are any jobs not yet waited for
    pub fn has_jobs(&self) -> bool {
        !self.jobs.is_empty()
    }

    /// Get the number of jobs not yet waited for
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}
