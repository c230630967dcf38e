use serde::Serialize;

use crate::errors::BotError;
use crate::executor::action::ActionContext;
use crate::executor::retry::RetryPolicy;
use crate::registry::StateDefinition;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActionReport {
    pub action: String,
    pub attempts: u32,
    pub success: bool,
    /// Last error message, if the final attempt raised one.
    pub error: Option<String>,
    /// The final attempt could not reach the device.
    pub device_lost: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    PartialFailure { failed_action: String },
}

/// Result of dispatching one state's action list.
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub state: String,
    /// One entry per action that was started, in order.
    pub reports: Vec<ActionReport>,
    pub status: OutcomeStatus,
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }

    /// The sequence was abandoned because the device stopped answering.
    pub fn device_lost(&self) -> bool {
        !self.is_success() && self.reports.last().is_some_and(|r| r.device_lost)
    }
}

/// Runs a state's actions in order, retrying each one per the policy and
/// abandoning the rest of the list once an action exhausts its attempts.
pub struct ActionExecutor {
    policy: RetryPolicy,
}

impl ActionExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn run(&self, state: &StateDefinition, ctx: &ActionContext<'_>) -> ActionOutcome {
        let mut reports = Vec::with_capacity(state.actions.len());

        for action in &state.actions {
            let name = action.name().to_string();
            let mut attempts = 0;
            let mut last_error = None;
            let mut device_lost;
            let mut success = false;

            loop {
                attempts += 1;
                let attempt_ctx = ActionContext { attempt: attempts, ..*ctx };
                device_lost = false;
                match action.execute(&attempt_ctx).await {
                    Ok(true) => {
                        success = true;
                        last_error = None;
                    }
                    Ok(false) => {
                        tracing::warn!(state = %state.name, action = %name, attempt = attempts, "action returned failure");
                    }
                    Err(e) => {
                        tracing::warn!(state = %state.name, action = %name, attempt = attempts, error = %e, "action raised");
                        device_lost = matches!(e, BotError::DeviceUnavailable(_));
                        last_error = Some(e.to_string());
                    }
                }
                if success {
                    break;
                }
                match self.policy.delay_after(attempts) {
                    Some(delay) => {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    None => break,
                }
            }

            tracing::info!(state = %state.name, action = %name, attempts, success, "action finished");
            reports.push(ActionReport {
                action: name.clone(),
                attempts,
                success,
                error: last_error,
                device_lost,
            });

            if !success {
                tracing::error!(
                    state = %state.name,
                    action = %name,
                    skipped = state.actions.len() - reports.len(),
                    "action failed after retries, abandoning remaining actions this cycle"
                );
                return ActionOutcome {
                    state: state.name.clone(),
                    reports,
                    status: OutcomeStatus::PartialFailure { failed_action: name },
                };
            }
        }

        ActionOutcome {
            state: state.name.clone(),
            reports,
            status: OutcomeStatus::Completed,
        }
    }
}
