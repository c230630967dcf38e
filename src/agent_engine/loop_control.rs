use crate::agent_engine::state::LoopConfig;

/// Iteration bookkeeping and the consecutive-failure escalation rule.
pub struct LoopController {
    config: LoopConfig,
    start_time: std::time::Instant,
    iterations: u64,
    failure_count: u32,
}

impl LoopController {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            start_time: std::time::Instant::now(),
            iterations: 0,
            failure_count: 0,
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Returns the 1-based number of the iteration about to run.
    pub fn begin_iteration(&mut self) -> u64 {
        self.iterations += 1;
        self.iterations
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn record_success(&mut self) {
        if self.failure_count > 0 {
            tracing::info!(after = self.failure_count, "cycle succeeded, failure streak reset");
        }
        self.failure_count = 0;
    }

    /// Returns the length of the current failure streak.
    pub fn record_failure(&mut self) -> u32 {
        self.failure_count += 1;
        self.failure_count
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failure_count
    }

    pub fn should_escalate(&self) -> bool {
        let limit = self.config.max_consecutive_failures;
        limit > 0 && self.failure_count >= limit
    }

    pub fn iteration_limit_reached(&self) -> bool {
        self.config
            .max_iterations
            .is_some_and(|max| self.iterations >= max)
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}
