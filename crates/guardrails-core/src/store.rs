use crate::error::StoreError;
use crate::io::{atomic_write, FileLock, LockMode};
use chrono::{DateTime, Duration, Utc};
use guardrails_config::CircuitBreakerConfig;
use guardrails_types::{timestamp, CircuitState, GlobalStats, HookRecord, StateFile};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

pub trait StateBackend: Send + Sync {
    fn read(&self) -> Result<StateFile, StoreError>;

    // One exclusive read-modify-write; returns the state as written.
    fn update(
        &self,
        apply: &mut dyn FnMut(&mut StateFile),
        now: DateTime<Utc>,
    ) -> Result<StateFile, StoreError>;

    fn location(&self) -> String;
}

// The lock lives on a sidecar because the state file is replaced by rename.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    lock_path: PathBuf,
    guard: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.clone().into_os_string();
        lock_name.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_name),
            guard: Mutex::new(()),
        }
    }

    fn lock(&self, mode: LockMode) -> Result<FileLock, StoreError> {
        FileLock::acquire(&self.lock_path, mode).map_err(|source| StoreError::Io {
            action: "lock",
            path: self.lock_path.clone(),
            source,
        })
    }

    fn load(&self) -> Result<StateFile, StoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(StateFile::default()),
            Err(source) => {
                return Err(StoreError::Io {
                    action: "read",
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(StateFile::default());
        }
        serde_json::from_slice(&raw).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }
}

impl StateBackend for FileBackend {
    fn read(&self) -> Result<StateFile, StoreError> {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let _lock = self.lock(LockMode::Shared)?;
        self.load()
    }

    fn update(
        &self,
        apply: &mut dyn FnMut(&mut StateFile),
        now: DateTime<Utc>,
    ) -> Result<StateFile, StoreError> {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let _lock = self.lock(LockMode::Exclusive)?;
        let mut state = self.load()?;
        apply(&mut state);
        state.refresh_stats(now);
        let body = serde_json::to_vec_pretty(&state).map_err(StoreError::Serialize)?;
        atomic_write(&self.path, &body).map_err(|source| StoreError::Io {
            action: "write",
            path: self.path.clone(),
            source,
        })?;
        Ok(state)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<StateFile>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateBackend for MemoryBackend {
    fn read(&self) -> Result<StateFile, StoreError> {
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn update(
        &self,
        apply: &mut dyn FnMut(&mut StateFile),
        now: DateTime<Utc>,
    ) -> Result<StateFile, StoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        apply(&mut state);
        state.refresh_stats(now);
        Ok(state.clone())
    }

    fn location(&self) -> String {
        "<memory>".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    pub cooldown: Duration,
    pub success_threshold: u32,
}

impl StoreSettings {
    pub fn from_config(cfg: &CircuitBreakerConfig) -> Self {
        Self {
            cooldown: Duration::seconds(cfg.cooldown_seconds as i64),
            success_threshold: cfg.success_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub previous: CircuitState,
    pub record: HookRecord,
    pub state_changed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisabledHook {
    pub hook: String,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    #[serde(with = "timestamp::option")]
    pub disabled_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp::option")]
    pub retry_after: Option<DateTime<Utc>>,
    pub seconds_until_retry: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub total_hooks: usize,
    pub closed: usize,
    pub half_open: usize,
    pub disabled: usize,
    pub disabled_hooks: Vec<DisabledHook>,
    pub global_stats: GlobalStats,
}

pub struct StateStore {
    backend: Box<dyn StateBackend>,
    settings: StoreSettings,
}

impl StateStore {
    pub fn new(backend: Box<dyn StateBackend>, settings: StoreSettings) -> Self {
        Self { backend, settings }
    }

    pub fn open(path: impl Into<PathBuf>, settings: StoreSettings) -> Self {
        Self::new(Box::new(FileBackend::new(path)), settings)
    }

    pub fn in_memory(settings: StoreSettings) -> Self {
        Self::new(Box::new(MemoryBackend::new()), settings)
    }

    pub fn location(&self) -> String {
        self.backend.location()
    }

    pub fn get_hook_state(&self, hook_id: &str) -> Result<HookRecord, StoreError> {
        Ok(self
            .backend
            .read()?
            .hooks
            .get(hook_id)
            .cloned()
            .unwrap_or_default())
    }

    pub fn record_success(
        &self,
        hook_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        let success_threshold = self.settings.success_threshold;
        self.mutate(hook_id, now, |stats, record| {
            stats.total_executions += 1;
            apply_success(record, success_threshold, now)
        })
    }

    pub fn record_failure(
        &self,
        hook_id: &str,
        error: &str,
        failure_threshold: u32,
        now: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        let cooldown = self.settings.cooldown;
        self.mutate(hook_id, now, |stats, record| {
            stats.total_executions += 1;
            stats.total_failures += 1;
            apply_failure(record, error, failure_threshold, cooldown, now)
        })
    }

    // Keeps disabled_at/retry_after; those clear only when a trial closes the
    // circuit.
    pub fn transition_to_half_open(
        &self,
        hook_id: &str,
        now: DateTime<Utc>,
    ) -> Result<HookRecord, StoreError> {
        let transition = self.mutate(hook_id, now, |_, record| {
            enter_half_open(record);
            false
        })?;
        Ok(transition.record)
    }

    /// Moves an open record whose cooldown has elapsed to half-open, checking
    /// and flipping under the same exclusive update. Any other record comes
    /// back as stored; a missing one is not created.
    pub fn begin_trial(&self, hook_id: &str, now: DateTime<Utc>) -> Result<Transition, StoreError> {
        let mut previous = CircuitState::Closed;
        let mut current = None;
        let mut started = false;
        self.backend.update(
            &mut |state| {
                let Some(record) = state.hooks.get_mut(hook_id) else {
                    return;
                };
                previous = record.state;
                started = record.is_open() && record.retry_after.map_or(true, |at| now >= at);
                if started {
                    enter_half_open(record);
                }
                current = Some(record.clone());
            },
            now,
        )?;
        Ok(Transition {
            previous,
            record: current.unwrap_or_default(),
            state_changed: started,
        })
    }

    pub fn reset_hook(&self, hook_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut removed = false;
        self.backend.update(
            &mut |state| removed = state.hooks.remove(hook_id).is_some(),
            now,
        )?;
        Ok(removed)
    }

    pub fn reset_all(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut removed = 0;
        self.backend.update(
            &mut |state| {
                removed = state.hooks.len();
                state.hooks.clear();
            },
            now,
        )?;
        Ok(removed)
    }

    pub fn get_all_hooks(&self) -> Result<BTreeMap<String, HookRecord>, StoreError> {
        Ok(self.backend.read()?.hooks)
    }

    pub fn get_disabled_hooks(&self) -> Result<BTreeMap<String, HookRecord>, StoreError> {
        let mut hooks = self.get_all_hooks()?;
        hooks.retain(|_, record| record.is_open());
        Ok(hooks)
    }

    pub fn get_health_report(&self, now: DateTime<Utc>) -> Result<HealthReport, StoreError> {
        let state = self.backend.read()?;
        let count = |wanted: CircuitState| state.hooks.values().filter(|r| r.state == wanted).count();
        let disabled_hooks = state
            .hooks
            .iter()
            .filter(|(_, record)| record.is_open())
            .map(|(hook, record)| DisabledHook {
                hook: hook.clone(),
                failure_count: record.failure_count,
                consecutive_failures: record.consecutive_failures,
                last_error: record.last_error.clone(),
                disabled_at: record.disabled_at,
                retry_after: record.retry_after,
                seconds_until_retry: record
                    .retry_after
                    .map(|at| (at - now).num_seconds().max(0))
                    .unwrap_or(0),
            })
            .collect();

        Ok(HealthReport {
            total_hooks: state.hooks.len(),
            closed: count(CircuitState::Closed),
            half_open: count(CircuitState::HalfOpen),
            disabled: count(CircuitState::Open),
            disabled_hooks,
            global_stats: state.global_stats.clone(),
        })
    }

    fn mutate<F>(
        &self,
        hook_id: &str,
        now: DateTime<Utc>,
        mut change: F,
    ) -> Result<Transition, StoreError>
    where
        F: FnMut(&mut GlobalStats, &mut HookRecord) -> bool,
    {
        let mut previous = CircuitState::Closed;
        let mut state_changed = false;
        let written = self.backend.update(
            &mut |state| {
                let record = state.hooks.entry(hook_id.to_string()).or_default();
                previous = record.state;
                state_changed = change(&mut state.global_stats, record);
            },
            now,
        )?;
        Ok(Transition {
            previous,
            record: written.hooks.get(hook_id).cloned().unwrap_or_default(),
            state_changed,
        })
    }
}

fn apply_success(record: &mut HookRecord, success_threshold: u32, now: DateTime<Utc>) -> bool {
    record.consecutive_successes = record.consecutive_successes.saturating_add(1);
    record.consecutive_failures = 0;
    record.last_success_at = Some(now);

    if record.is_half_open() && record.consecutive_successes >= success_threshold {
        record.state = CircuitState::Closed;
        record.failure_count = 0;
        record.last_error = None;
        record.disabled_at = None;
        record.retry_after = None;
        return true;
    }
    false
}

fn apply_failure(
    record: &mut HookRecord,
    error: &str,
    failure_threshold: u32,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> bool {
    if record.failure_count == 0 {
        record.first_failure_at = Some(now);
    }
    record.failure_count = record.failure_count.saturating_add(1);
    record.consecutive_failures = record.consecutive_failures.saturating_add(1);
    record.consecutive_successes = 0;
    record.last_failure_at = Some(now);
    record.last_error = Some(error.to_string());

    match record.state {
        // The hook was already unavailable going into the trial, so
        // reopening is not reported as a change.
        CircuitState::HalfOpen => {
            open(record, cooldown, now);
            false
        }
        CircuitState::Closed if record.consecutive_failures >= failure_threshold => {
            open(record, cooldown, now);
            true
        }
        _ => false,
    }
}

fn enter_half_open(record: &mut HookRecord) {
    record.state = CircuitState::HalfOpen;
    record.consecutive_failures = 0;
    record.consecutive_successes = 0;
}

fn open(record: &mut HookRecord, cooldown: Duration, now: DateTime<Utc>) {
    record.state = CircuitState::Open;
    record.disabled_at = Some(now);
    record.retry_after = Some(now + cooldown);
}
