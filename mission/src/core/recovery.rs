//! Pure state transitions for the execute, verify, recover loop.

use std::fmt;

use crate::core::signals::ExitSentinels;
use crate::core::types::Classification;

/// Where a mission is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionState {
    Running,
    Verifying,
    Recovering,
    Success,
    Aborted,
    Interrupted,
}

impl MissionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MissionState::Success | MissionState::Aborted | MissionState::Interrupted
        )
    }
}

/// Why the loop gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    RetriesExhausted { retries: u32 },
    NoRecoveryPrompt(String),
    RepeatedClassification(Classification),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::RetriesExhausted { retries } => {
                write!(f, "retry budget exhausted after {retries} recovery attempt(s)")
            }
            AbortReason::NoRecoveryPrompt(reason) => {
                write!(f, "strategist produced no recovery prompt: {reason}")
            }
            AbortReason::RepeatedClassification(classification) => write!(
                f,
                "recovery repeated classification {classification}; stopping to avoid a loop"
            ),
        }
    }
}

/// State after the agent process exits.
pub fn after_agent_exit(exit_code: i32, interrupted: bool, sentinels: &ExitSentinels) -> MissionState {
    if interrupted || exit_code == sentinels.interrupted {
        MissionState::Interrupted
    } else if exit_code == 0 {
        MissionState::Verifying
    } else {
        MissionState::Recovering
    }
}

/// State after a verification pass.
pub fn after_verification(all_passed: bool) -> MissionState {
    if all_passed {
        MissionState::Success
    } else {
        MissionState::Recovering
    }
}

/// Bounded retry budget counting recovery attempts, not the initial run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Decide whether another recovery may be requested.
    pub fn check(&self, recoveries_used: u32) -> Result<(), AbortReason> {
        if recoveries_used < self.max_retries {
            Ok(())
        } else {
            Err(AbortReason::RetriesExhausted {
                retries: recoveries_used,
            })
        }
    }
}

/// Stop when two consecutive recoveries land on the same classification.
pub fn check_repeated_classification(
    previous: Option<Classification>,
    current: Classification,
) -> Result<(), AbortReason> {
    if previous == Some(current) {
        Err(AbortReason::RepeatedClassification(current))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_exit_transitions() {
        let sentinels = ExitSentinels::default();
        assert_eq!(after_agent_exit(0, false, &sentinels), MissionState::Verifying);
        assert_eq!(after_agent_exit(2, false, &sentinels), MissionState::Recovering);
        assert_eq!(after_agent_exit(130, false, &sentinels), MissionState::Interrupted);
        assert_eq!(after_agent_exit(0, true, &sentinels), MissionState::Interrupted);
    }

    #[test]
    fn verification_transitions() {
        assert_eq!(after_verification(true), MissionState::Success);
        assert_eq!(after_verification(false), MissionState::Recovering);
        assert!(MissionState::Success.is_terminal());
        assert!(!MissionState::Recovering.is_terminal());
    }

    #[test]
    fn zero_retries_never_recovers() {
        let policy = RetryPolicy::new(0);
        assert_eq!(
            policy.check(0),
            Err(AbortReason::RetriesExhausted { retries: 0 })
        );
    }

    #[test]
    fn retry_budget_counts_recoveries() {
        let policy = RetryPolicy::new(2);
        assert!(policy.check(0).is_ok());
        assert!(policy.check(1).is_ok());
        assert!(policy.check(2).is_err());
    }

    #[test]
    fn repeated_classification_aborts() {
        assert!(check_repeated_classification(None, Classification::Logic).is_ok());
        assert!(
            check_repeated_classification(Some(Classification::Tooling), Classification::Logic)
                .is_ok()
        );
        assert_eq!(
            check_repeated_classification(Some(Classification::Logic), Classification::Logic),
            Err(AbortReason::RepeatedClassification(Classification::Logic))
        );
    }
}
