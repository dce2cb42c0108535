pub mod admin;
pub mod breaker;
mod error;
pub mod humanize;
mod io;
pub mod logging;
pub mod runner;
pub mod store;
pub mod wrapper;

pub use breaker::{CircuitBreaker, Clock, Decision, ExecutionDecision, SystemClock};
pub use error::{AdminError, StoreError};
pub use store::{
    DisabledHook, FileBackend, HealthReport, MemoryBackend, StateBackend, StateStore,
    StoreSettings, Transition,
};
pub use wrapper::{WrapRequest, DEFAULT_TIMEOUT};
