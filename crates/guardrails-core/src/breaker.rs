// Closed   --failure_threshold consecutive failures--> Open
// Open     --cooldown elapsed, next should_execute---> HalfOpen
// HalfOpen --success_threshold consecutive successes-> Closed
// HalfOpen --any failure----------------------------> Open

use crate::error::StoreError;
use crate::humanize::format_duration;
use crate::store::{StateBackend, StateStore, StoreSettings, Transition};
use chrono::{DateTime, Utc};
use guardrails_config::CircuitBreakerConfig;
use guardrails_types::{CircuitState, HookRecord};
use serde::Serialize;
use tracing::{info, warn};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Execute,
    Skip,
    ExecuteAsTrial,
}

impl Decision {
    pub fn should_run(self) -> bool {
        !matches!(self, Decision::Skip)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionDecision {
    pub decision: Decision,
    pub state: CircuitState,
    pub message: String,
    // Excluded hook or breaker switched off: run without any bookkeeping.
    pub bypassed: bool,
}

impl ExecutionDecision {
    fn new(decision: Decision, state: CircuitState, message: impl Into<String>) -> Self {
        Self {
            decision,
            state,
            message: message.into(),
            bypassed: false,
        }
    }

    fn bypass(message: &str) -> Self {
        Self {
            bypassed: true,
            ..Self::new(Decision::Execute, CircuitState::Closed, message)
        }
    }
}

pub struct CircuitBreaker {
    store: StateStore,
    config: CircuitBreakerConfig,
    clock: Box<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(backend: Box<dyn StateBackend>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(backend, config, Box::new(SystemClock))
    }

    pub fn with_clock(
        backend: Box<dyn StateBackend>,
        config: CircuitBreakerConfig,
        clock: Box<dyn Clock>,
    ) -> Self {
        let store = StateStore::new(backend, StoreSettings::from_config(&config));
        Self {
            store,
            config,
            clock,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn should_execute(&self, hook_id: &str) -> Result<ExecutionDecision, StoreError> {
        if self.config.is_excluded(hook_id) {
            return Ok(ExecutionDecision::bypass(
                "hook is excluded from the circuit breaker",
            ));
        }
        if !self.config.enabled {
            return Ok(ExecutionDecision::bypass("circuit breaker is disabled"));
        }

        let now = self.clock.now();
        let record = self.store.get_hook_state(hook_id)?;
        if let Some(decision) = settled(hook_id, &record, now) {
            return Ok(decision);
        }

        let trial = self.store.begin_trial(hook_id, now)?;
        if trial.state_changed {
            info!(
                hook = hook_id,
                from = %trial.previous,
                to = %CircuitState::HalfOpen,
                reason = "cooldown elapsed",
                "circuit transition"
            );
            return Ok(ExecutionDecision::new(
                Decision::ExecuteAsTrial,
                CircuitState::HalfOpen,
                "cooldown elapsed; running recovery trial",
            ));
        }
        // The record changed between the snapshot and the update.
        Ok(settled(hook_id, &trial.record, now).unwrap_or_else(trial_in_progress))
    }

    pub fn record_success(&self, hook_id: &str) -> Result<Transition, StoreError> {
        let transition = self.store.record_success(hook_id, self.clock.now())?;
        if transition.state_changed {
            info!(
                hook = hook_id,
                from = %transition.previous,
                to = %transition.record.state,
                reason = "recovery trial succeeded",
                consecutive_successes = transition.record.consecutive_successes,
                "circuit transition"
            );
        }
        Ok(transition)
    }

    pub fn record_failure(&self, hook_id: &str, error: &str) -> Result<Transition, StoreError> {
        let transition = self.store.record_failure(
            hook_id,
            error,
            self.config.failure_threshold,
            self.clock.now(),
        )?;
        let record = &transition.record;
        if transition.previous != record.state {
            let reason = if transition.previous == CircuitState::HalfOpen {
                "recovery trial failed"
            } else {
                "failure threshold reached"
            };
            warn!(
                hook = hook_id,
                from = %transition.previous,
                to = %record.state,
                reason,
                consecutive_failures = record.consecutive_failures,
                failure_count = record.failure_count,
                error,
                "circuit transition"
            );
        }
        Ok(transition)
    }
}

fn trial_in_progress() -> ExecutionDecision {
    ExecutionDecision::new(
        Decision::ExecuteAsTrial,
        CircuitState::HalfOpen,
        "recovery trial in progress",
    )
}

// None only for an open record whose cooldown has run out. A hand-edited
// record may lack retry_after; that counts as run out.
fn settled(hook_id: &str, record: &HookRecord, now: DateTime<Utc>) -> Option<ExecutionDecision> {
    match record.state {
        CircuitState::Closed => Some(ExecutionDecision::new(
            Decision::Execute,
            CircuitState::Closed,
            "circuit closed",
        )),
        CircuitState::HalfOpen => Some(trial_in_progress()),
        CircuitState::Open => {
            let retry_after = record.retry_after.filter(|at| now < *at)?;
            let remaining = (retry_after - now).num_seconds().max(1);
            info!(
                hook = hook_id,
                failure_count = record.failure_count,
                retry_in_secs = remaining,
                "skipping disabled hook"
            );
            Some(ExecutionDecision::new(
                Decision::Skip,
                CircuitState::Open,
                format!(
                    "Hook disabled by circuit breaker after {} failures; retry in {} (at {})",
                    record.failure_count,
                    format_duration(remaining),
                    retry_after.to_rfc3339()
                ),
            ))
        }
    }
}
