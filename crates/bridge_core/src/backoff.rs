use std::time::Duration;

use tokio::time::Instant;

use crate::collaborators::BridgeStateEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay used for the first disconnect and after every quiet period.
    pub initial: Duration,
    /// A disconnect further than this from the previous one starts over at `initial`.
    pub quiet_period: Duration,
    /// Once the delay grows past this, disconnects are reported as severe.
    pub escalation_threshold: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(4),
            quiet_period: Duration::from_secs(60),
            escalation_threshold: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Transient,
    Severe,
}

impl Severity {
    pub fn state_event(self) -> BridgeStateEvent {
        match self {
            Self::Transient => BridgeStateEvent::TransientDisconnect,
            Self::Severe => BridgeStateEvent::UnknownError,
        }
    }

    pub fn is_important(self) -> bool {
        self == Self::Severe
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffStep {
    pub delay: Duration,
    pub severity: Severity,
}

/// Reconnect delay bookkeeping for one supervisor loop.
///
/// Delays are whole seconds and grow by 1.5x (truncated) for every disconnect
/// that follows the previous one within the quiet period. Severity escalates
/// once the delay passes the threshold and stays escalated until a quiet
/// period resets the delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    delay_secs: u64,
    severity: Severity,
    last_disconnect: Option<Instant>,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            delay_secs: policy.initial.as_secs(),
            severity: Severity::Transient,
            last_disconnect: None,
        }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    pub fn current_delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    pub fn on_disconnect(&mut self, now: Instant) -> BackoffStep {
        // a quiet period too long to represent never elapses
        let quiet = match self.last_disconnect {
            None => true,
            Some(last) => last
                .checked_add(self.policy.quiet_period)
                .is_some_and(|quiet_until| quiet_until < now),
        };

        if quiet {
            self.delay_secs = self.policy.initial.as_secs();
            self.severity = Severity::Transient;
        } else {
            self.delay_secs =
                u64::try_from(u128::from(self.delay_secs) * 3 / 2).unwrap_or(u64::MAX);
            if self.delay_secs > self.policy.escalation_threshold.as_secs() {
                self.severity = Severity::Severe;
            }
        }
        self.last_disconnect = Some(now);

        BackoffStep {
            delay: self.current_delay(),
            severity: self.severity,
        }
    }
}

#[cfg(test)]
#[path = "tests/backoff_tests.rs"]
mod tests;
