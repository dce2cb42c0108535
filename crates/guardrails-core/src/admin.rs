use crate::error::AdminError;
use crate::store::StateStore;
use chrono::{DateTime, Utc};
use guardrails_types::{CircuitState, HookRecord};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

pub fn find_matches(hooks: &BTreeMap<String, HookRecord>, pattern: &str) -> Vec<String> {
    hooks
        .keys()
        .filter(|id| id.contains(pattern))
        .cloned()
        .collect()
}

/// Resolves `pattern` to exactly one tracked id. An exact id wins even when
/// it is also a substring of other ids.
pub fn resolve(hooks: &BTreeMap<String, HookRecord>, pattern: &str) -> Result<String, AdminError> {
    if hooks.contains_key(pattern) {
        return Ok(pattern.to_string());
    }
    let mut matches = find_matches(hooks, pattern);
    match matches.len() {
        0 => Err(AdminError::NoMatch(pattern.to_string())),
        1 => Ok(matches.remove(0)),
        _ => Err(AdminError::Ambiguous {
            pattern: pattern.to_string(),
            matches,
        }),
    }
}

pub fn reset(store: &StateStore, pattern: &str, now: DateTime<Utc>) -> Result<String, AdminError> {
    let hook = resolve(&store.get_all_hooks()?, pattern)?;
    store.reset_hook(&hook, now)?;
    info!(hook = %hook, "hook reset");
    Ok(hook)
}

pub fn reset_all(store: &StateStore, now: DateTime<Utc>) -> Result<usize, AdminError> {
    let removed = store.reset_all(now)?;
    info!(removed, "all hooks reset");
    Ok(removed)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnableOutcome {
    Reset { hook: String, previous: CircuitState },
    NotDisabled { hook: String, state: CircuitState },
}

pub fn enable(
    store: &StateStore,
    pattern: &str,
    force: bool,
    now: DateTime<Utc>,
) -> Result<EnableOutcome, AdminError> {
    let hooks = store.get_all_hooks()?;
    let hook = resolve(&hooks, pattern)?;
    let state = hooks.get(&hook).map(|r| r.state).unwrap_or_default();
    if state != CircuitState::Open && !force {
        return Ok(EnableOutcome::NotDisabled { hook, state });
    }
    store.reset_hook(&hook, now)?;
    info!(hook = %hook, previous = %state, force, "hook enabled");
    Ok(EnableOutcome::Reset {
        hook,
        previous: state,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DisableOutcome {
    Disabled { hook: String, record: HookRecord },
    AlreadyDisabled { hook: String, record: HookRecord },
}

// An unmatched pattern containing `/` or `.` is taken as a literal hook id,
// so a hook can be disabled before it has ever run.
pub fn disable(
    store: &StateStore,
    pattern: &str,
    failure_threshold: u32,
    now: DateTime<Utc>,
) -> Result<DisableOutcome, AdminError> {
    let hooks = store.get_all_hooks()?;
    let hook = match resolve(&hooks, pattern) {
        Ok(hook) => hook,
        Err(AdminError::NoMatch(_)) if pattern.contains('/') || pattern.contains('.') => {
            pattern.to_string()
        }
        Err(err) => return Err(err),
    };

    if let Some(record) = hooks.get(&hook).filter(|r| r.is_open()) {
        return Ok(DisableOutcome::AlreadyDisabled {
            hook,
            record: record.clone(),
        });
    }

    // A closed hook needs `failure_threshold` failures; a half-open one opens
    // on the first. The extra iteration bounds the loop either way.
    let mut record = HookRecord::default();
    for _ in 0..=failure_threshold {
        record = store
            .record_failure(&hook, "manually disabled", failure_threshold, now)?
            .record;
        if record.is_open() {
            break;
        }
    }
    info!(hook = %hook, state = %record.state, "hook disabled");
    Ok(DisableOutcome::Disabled { hook, record })
}
