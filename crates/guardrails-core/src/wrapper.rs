use crate::breaker::{CircuitBreaker, Decision};
use crate::runner::{run_hook, HookCommand, HookRun};
use crate::store::FileBackend;
use guardrails_config::GuardrailsConfig;
use guardrails_types::HookResponse;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct WrapRequest {
    pub command: HookCommand,
    pub stdin: Option<Vec<u8>>,
}

impl WrapRequest {
    pub fn new(argv: Vec<String>, stdin: Option<Vec<u8>>) -> Self {
        Self {
            command: HookCommand::new(argv),
            stdin,
        }
    }
}

pub fn execute(request: &WrapRequest, config: &GuardrailsConfig) -> HookResponse {
    let breaker = CircuitBreaker::new(
        Box::new(FileBackend::new(&config.state_file)),
        config.circuit_breaker.clone(),
    );
    execute_with(
        &breaker,
        request,
        Duration::from_secs(config.wrapper.timeout_seconds),
    )
}

pub fn execute_with(
    breaker: &CircuitBreaker,
    request: &WrapRequest,
    timeout: Duration,
) -> HookResponse {
    let hook_id = request.command.id();
    let decision = match breaker.should_execute(&hook_id) {
        Ok(decision) => decision,
        Err(err) => {
            error!(
                hook = %hook_id,
                error = %err,
                "circuit breaker unavailable; running hook in passthrough mode"
            );
            return passthrough(request, timeout);
        }
    };

    if !decision.decision.should_run() {
        return HookResponse::Continue {
            message: decision.message,
        };
    }
    if decision.bypassed {
        debug!(hook = %hook_id, reason = %decision.message, "running hook outside the breaker");
        return passthrough(request, timeout);
    }
    debug!(hook = %hook_id, decision = ?decision.decision, "running hook");

    let run = run_hook(&request.command, request.stdin.as_deref(), timeout);
    let recorded = match run.failure_reason() {
        None => breaker.record_success(&hook_id).map(drop),
        Some(reason) => {
            warn!(
                hook = %hook_id,
                exit_code = run.exit_code(),
                elapsed_ms = run.elapsed.as_millis() as u64,
                trial = decision.decision == Decision::ExecuteAsTrial,
                reason = %reason,
                "hook failed"
            );
            breaker.record_failure(&hook_id, &reason).map(drop)
        }
    };
    if let Err(err) = recorded {
        error!(hook = %hook_id, error = %err, "failed to record hook outcome");
    }

    into_response(run)
}

pub fn passthrough(request: &WrapRequest, timeout: Duration) -> HookResponse {
    let run = run_hook(&request.command, request.stdin.as_deref(), timeout);
    if let Some(reason) = run.failure_reason() {
        warn!(hook = %request.command.id(), reason = %reason, "hook failed in passthrough mode");
    }
    into_response(run)
}

fn into_response(run: HookRun) -> HookResponse {
    HookResponse::Passthrough {
        exit_code: run.exit_code(),
        stdout: run.stdout,
        stderr: run.stderr,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{MemoryBackend, StateBackend};
    use chrono::{DateTime, Utc};
    use guardrails_config::CircuitBreakerConfig;
    use guardrails_types::StateFile;
    use std::io;
    use std::path::PathBuf;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn breaker(failure_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            Box::new(MemoryBackend::new()),
            CircuitBreakerConfig {
                failure_threshold,
                ..CircuitBreakerConfig::default()
            },
        )
    }

    fn request(line: &str) -> WrapRequest {
        WrapRequest::new(vec![line.to_string()], None)
    }

    struct BrokenBackend;

    impl BrokenBackend {
        fn error() -> StoreError {
            StoreError::Io {
                action: "read",
                path: PathBuf::from("/unreadable/hook_state.json"),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
            }
        }
    }

    impl StateBackend for BrokenBackend {
        fn read(&self) -> Result<StateFile, StoreError> {
            Err(Self::error())
        }

        fn update(
            &self,
            _apply: &mut dyn FnMut(&mut StateFile),
            _now: DateTime<Utc>,
        ) -> Result<StateFile, StoreError> {
            Err(Self::error())
        }

        fn location(&self) -> String {
            "<broken>".to_string()
        }
    }

    #[test]
    fn success_passes_output_through_and_records() {
        let cb = breaker(3);

        let response = execute_with(&cb, &request("echo ok"), TIMEOUT);

        assert_eq!(
            response,
            HookResponse::Passthrough {
                exit_code: 0,
                stdout: b"ok\n".to_vec(),
                stderr: Vec::new(),
            }
        );
        let record = cb.store().get_hook_state("echo ok").expect("get");
        assert!(record.last_success_at.is_some());
    }

    #[test]
    fn failure_keeps_child_exit_code_and_records_error() {
        let cb = breaker(3);

        let response = execute_with(&cb, &request("echo bad >&2; exit 4"), TIMEOUT);

        assert_eq!(response.exit_code(), 4);
        let record = cb
            .store()
            .get_hook_state("echo bad >&2; exit 4")
            .expect("get");
        assert_eq!(record.failure_count, 1);
        assert_eq!(record.last_error.as_deref(), Some("exit code 4: bad"));
    }

    #[test]
    fn open_circuit_skips_without_running() {
        let cb = breaker(2);
        let req = request("exit 1");
        execute_with(&cb, &req, TIMEOUT);
        execute_with(&cb, &req, TIMEOUT);

        let response = execute_with(&cb, &req, TIMEOUT);

        match response {
            HookResponse::Continue { message } => {
                assert!(message.contains("after 2 failures"))
            }
            other => panic!("expected continue, got {other:?}"),
        }
        let record = cb.store().get_hook_state("exit 1").expect("get");
        assert_eq!(record.failure_count, 2);
    }

    #[test]
    fn excluded_hook_is_never_tracked() {
        let cb = CircuitBreaker::new(
            Box::new(MemoryBackend::new()),
            CircuitBreakerConfig {
                failure_threshold: 2,
                exclude: vec!["damage-control".to_string()],
                ..CircuitBreakerConfig::default()
            },
        );
        let req = request("echo damage-control >&2; exit 3");

        for _ in 0..4 {
            let response = execute_with(&cb, &req, TIMEOUT);
            assert_eq!(response.exit_code(), 3);
        }

        let report = cb.store().get_health_report(Utc::now()).expect("report");
        assert_eq!(report.total_hooks, 0);
        assert_eq!(report.global_stats.total_executions, 0);
    }

    #[test]
    fn disabled_breaker_records_nothing() {
        let cb = CircuitBreaker::new(
            Box::new(MemoryBackend::new()),
            CircuitBreakerConfig {
                enabled: false,
                failure_threshold: 1,
                ..CircuitBreakerConfig::default()
            },
        );

        execute_with(&cb, &request("exit 1"), TIMEOUT);
        let response = execute_with(&cb, &request("exit 1"), TIMEOUT);

        assert_eq!(response.exit_code(), 1);
        assert!(cb.store().get_all_hooks().expect("all").is_empty());
    }

    #[test]
    fn broken_store_still_runs_the_hook() {
        let cb = CircuitBreaker::new(Box::new(BrokenBackend), CircuitBreakerConfig::default());

        let response = execute_with(&cb, &request("echo still; exit 5"), TIMEOUT);

        assert_eq!(
            response,
            HookResponse::Passthrough {
                exit_code: 5,
                stdout: b"still\n".to_vec(),
                stderr: Vec::new(),
            }
        );
    }

    #[test]
    fn stdin_reaches_the_hook() {
        let cb = breaker(3);
        let req = WrapRequest::new(vec!["cat".to_string()], Some(b"{\"event\":1}".to_vec()));

        let response = execute_with(&cb, &req, TIMEOUT);

        assert_eq!(
            response,
            HookResponse::Passthrough {
                exit_code: 0,
                stdout: b"{\"event\":1}".to_vec(),
                stderr: Vec::new(),
            }
        );
    }

    #[test]
    fn timeout_counts_as_failure() {
        let cb = breaker(3);

        let response = execute_with(&cb, &request("sleep 20"), Duration::from_millis(200));

        assert_eq!(response.exit_code(), 1);
        let record = cb.store().get_hook_state("sleep 20").expect("get");
        assert_eq!(record.last_error.as_deref(), Some("timed out after 0.2s"));
    }
}
