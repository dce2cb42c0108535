use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: tempdir().expect("tempdir"),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn state_file(&self) -> PathBuf {
        self.path("hook_state.json")
    }

    fn config_file(&self) -> PathBuf {
        self.path("guardrails.yaml")
    }

    fn write_config(&self, body: &str) {
        fs::write(self.config_file(), body).expect("write config");
    }

    fn isolate(&self, mut cmd: Command) -> Command {
        cmd.env("HOME", self.dir.path())
            .env_remove("RUST_LOG")
            .env_remove("GUARDRAILS_CIRCUIT_BREAKER_ENABLED")
            .env_remove("GUARDRAILS_CIRCUIT_BREAKER_FAILURE_THRESHOLD")
            .env_remove("GUARDRAILS_STATE_FILE")
            .arg("--config")
            .arg(self.config_file())
            .arg("--state-file")
            .arg(self.state_file());
        cmd
    }

    fn wrapper(&self) -> Command {
        self.isolate(Command::new(env!("CARGO_BIN_EXE_hook-wrapper")))
    }

    fn health(&self) -> Command {
        self.isolate(Command::new(env!("CARGO_BIN_EXE_hook-health")))
    }

    fn wrap(&self, command: &[&str]) -> assert_cmd::assert::Assert {
        self.wrapper().arg("--").args(command).assert()
    }

    fn health_json(&self, args: &[&str]) -> Value {
        let output = self
            .health()
            .arg("--json")
            .args(args)
            .output()
            .expect("run hook-health");
        assert!(output.status.success(), "hook-health {args:?} failed");
        serde_json::from_slice(&output.stdout).expect("json output")
    }
}

fn read_state(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).expect("state file")).expect("state json")
}

#[test]
fn wrapper_passes_output_through_and_records_success() {
    let sb = Sandbox::new();

    sb.wrap(&["echo", "hello"])
        .success()
        .stdout("hello\n");

    let state = read_state(&sb.state_file());
    assert_eq!(state["hooks"]["echo hello"]["state"], "closed");
    assert_eq!(state["global_stats"]["total_executions"], 1);
}

#[test]
fn wrapper_propagates_child_exit_code() {
    let sb = Sandbox::new();

    sb.wrap(&["sh", "-c", "echo broken >&2; exit 7"])
        .code(7)
        .stderr("broken\n");

    let state = read_state(&sb.state_file());
    let record = &state["hooks"]["sh -c echo broken >&2; exit 7"];
    assert_eq!(record["failure_count"], 1);
    assert_eq!(record["last_error"], "exit code 7: broken");
}

#[test]
fn wrapper_forwards_stdin() {
    let sb = Sandbox::new();
    let event = r#"{"hook_event_name":"PreToolUse"}"#;

    sb.wrapper()
        .args(["--", "cat"])
        .write_stdin(event)
        .assert()
        .success()
        .stdout(event);
}

#[test]
fn wrapper_skips_after_threshold_with_continue_response() {
    let sb = Sandbox::new();
    sb.write_config("circuit_breaker:\n  failure_threshold: 2\n");

    sb.wrap(&["false"]).code(1);
    sb.wrap(&["false"]).code(1);
    let output = sb
        .wrapper()
        .args(["--", "false"])
        .output()
        .expect("run wrapper");

    assert_eq!(output.status.code(), Some(0));
    let response: Value = serde_json::from_slice(&output.stdout).expect("continue json");
    assert_eq!(response["result"], "continue");
    assert_eq!(response["success"], true);
    assert!(response["message"]
        .as_str()
        .expect("message")
        .contains("Hook disabled by circuit breaker"));
    assert_eq!(read_state(&sb.state_file())["hooks"]["false"]["state"], "open");
}

#[test]
fn excluded_hook_keeps_running_and_is_never_disabled() {
    let sb = Sandbox::new();
    sb.write_config(
        "circuit_breaker:\n  failure_threshold: 1\n  exclude:\n    - damage-control\n",
    );

    for _ in 0..3 {
        sb.wrap(&["sh", "-c", "echo damage-control >&2; exit 2"])
            .code(2)
            .stderr("damage-control\n");
    }

    let report = sb.health_json(&["health"]);
    assert_eq!(report["total_hooks"], 0);
    assert_eq!(report["disabled"], 0);
}

#[test]
fn wrapper_runs_hook_despite_invalid_config() {
    let sb = Sandbox::new();
    sb.write_config("circuit_breaker:\n  failure_threshold: 0\n");

    sb.wrap(&["echo", "still runs"])
        .success()
        .stdout("still runs\n");

    assert!(!sb.state_file().exists());
}

#[test]
fn wrapper_runs_hook_despite_corrupt_state() {
    let sb = Sandbox::new();
    fs::write(sb.state_file(), "{ not json").expect("corrupt state");

    sb.wrap(&["echo", "ok"]).success().stdout("ok\n");

    assert_eq!(
        fs::read_to_string(sb.state_file()).expect("state"),
        "{ not json"
    );
}

#[test]
fn wrapper_requires_a_command() {
    let sb = Sandbox::new();

    sb.wrapper().assert().code(2);
    sb.wrapper().args(["--bogus", "--", "true"]).assert().code(2);
}

#[test]
fn health_reports_disabled_hooks() {
    let sb = Sandbox::new();
    sb.write_config("circuit_breaker:\n  failure_threshold: 1\n");
    sb.wrap(&["false"]).code(1);
    sb.wrap(&["true"]).success();

    let report = sb.health_json(&["health"]);

    assert_eq!(report["total_hooks"], 2);
    assert_eq!(report["closed"], 1);
    assert_eq!(report["disabled"], 1);
    assert_eq!(report["disabled_hooks"][0]["hook"], "false");
    assert_eq!(report["disabled_hooks"][0]["last_error"], "exit code 1");

    sb.health()
        .arg("health")
        .assert()
        .success()
        .stdout(contains("Disabled hooks:"))
        .stdout(contains("retry in"));
}

#[test]
fn list_shows_every_tracked_hook() {
    let sb = Sandbox::new();
    sb.wrap(&["true"]).success();
    sb.wrap(&["echo", "x"]).success();

    let hooks = sb.health_json(&["list"]);

    assert_eq!(hooks.as_object().expect("map").len(), 2);
    sb.health()
        .arg("list")
        .assert()
        .success()
        .stdout(contains("HOOK"))
        .stdout(contains("echo x"));
}

#[test]
fn disable_enable_and_reset_by_pattern() {
    let sb = Sandbox::new();
    sb.wrap(&["sh", "-c", "exit 0"]).success();

    let disabled = sb.health_json(&["disable", "exit 0"]);
    assert_eq!(disabled["outcome"], "disabled");
    assert_eq!(disabled["record"]["state"], "open");

    let skipped = sb
        .wrapper()
        .args(["--", "sh", "-c", "exit 0"])
        .output()
        .expect("run wrapper");
    assert!(String::from_utf8_lossy(&skipped.stdout).contains("\"result\":\"continue\""));

    let enabled = sb.health_json(&["enable", "exit"]);
    assert_eq!(enabled["outcome"], "reset");
    assert_eq!(enabled["previous"], "open");

    sb.wrap(&["true"]).success();
    let reset = sb.health_json(&["reset", "--all"]);
    assert_eq!(reset["reset_all"], 1);
}

#[test]
fn disable_accepts_unknown_path_as_literal_id() {
    let sb = Sandbox::new();

    let disabled = sb.health_json(&["disable", "hooks/new_hook.py"]);

    assert_eq!(disabled["hook"], "hooks/new_hook.py");
    assert_eq!(
        read_state(&sb.state_file())["hooks"]["hooks/new_hook.py"]["state"],
        "open"
    );
}

#[test]
fn ambiguous_pattern_fails_with_candidates() {
    let sb = Sandbox::new();
    sb.wrap(&["echo", "one"]).success();
    sb.wrap(&["echo", "two"]).success();

    sb.health()
        .args(["reset", "echo"])
        .assert()
        .code(1)
        .stderr(contains("matches 2 hooks"))
        .stderr(contains("echo one"))
        .stderr(contains("echo two"));

    sb.health()
        .args(["reset", "nothing-like-this"])
        .assert()
        .code(1)
        .stderr(contains("no tracked hook matches"));
}

#[test]
fn config_validate_lists_every_invalid_field() {
    let sb = Sandbox::new();
    sb.write_config("circuit_breaker:\n  failure_threshold: 0\n  cooldown_seconds: -1\nlogging:\n  level: loud\n");

    sb.health()
        .args(["config", "--validate"])
        .assert()
        .code(1)
        .stderr(contains("circuit_breaker.failure_threshold"))
        .stderr(contains("circuit_breaker.cooldown_seconds"))
        .stderr(contains("logging.level"));
}

#[test]
fn config_init_then_dump() {
    let sb = Sandbox::new();

    sb.health().args(["config", "--init"]).assert().success();
    assert!(sb.config_file().exists());
    sb.health().args(["config", "--init"]).assert().code(1);
    sb.health()
        .args(["config", "--init", "--force"])
        .assert()
        .success();
    sb.health()
        .args(["config", "--validate"])
        .assert()
        .success();

    let config = sb.health_json(&["config"]);
    assert_eq!(config["circuit_breaker"]["failure_threshold"], 3);
    let state_file = sb.state_file();
    assert_eq!(config["state_file"], state_file.to_str().expect("utf-8 path"));
}
