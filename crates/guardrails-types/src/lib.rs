use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct HookRecord {
    pub state: CircuitState,
    /// Lifetime total; only cleared when a half-open circuit recovers.
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    #[serde(rename = "first_failure", with = "timestamp::option")]
    pub first_failure_at: Option<DateTime<Utc>>,
    #[serde(rename = "last_failure", with = "timestamp::option")]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(rename = "last_success", with = "timestamp::option")]
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    #[serde(with = "timestamp::option")]
    pub disabled_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp::option")]
    pub retry_after: Option<DateTime<Utc>>,
}

impl HookRecord {
    pub fn is_open(&self) -> bool {
        matches!(self.state, CircuitState::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, CircuitState::Closed)
    }

    pub fn is_half_open(&self) -> bool {
        matches!(self.state, CircuitState::HalfOpen)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct GlobalStats {
    pub total_executions: u64,
    pub total_failures: u64,
    pub hooks_disabled: u32,
    #[serde(with = "timestamp::option")]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct StateFile {
    pub hooks: BTreeMap<String, HookRecord>,
    pub global_stats: GlobalStats,
}

impl StateFile {
    pub fn refresh_stats(&mut self, now: DateTime<Utc>) {
        self.global_stats.hooks_disabled =
            self.hooks.values().filter(|r| r.is_open()).count() as u32;
        self.global_stats.last_updated = Some(now);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookResponse {
    Continue { message: String },
    Passthrough {
        exit_code: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
}

#[derive(Serialize)]
struct ContinueBody<'a> {
    result: &'static str,
    message: &'a str,
    success: bool,
}

impl HookResponse {
    pub fn exit_code(&self) -> i32 {
        match self {
            HookResponse::Continue { .. } => 0,
            HookResponse::Passthrough { exit_code, .. } => *exit_code,
        }
    }

    pub fn emit(&self, out: &mut dyn Write, err: &mut dyn Write) -> io::Result<()> {
        match self {
            HookResponse::Continue { message } => {
                let body = ContinueBody {
                    result: "continue",
                    message,
                    success: true,
                };
                serde_json::to_writer(&mut *out, &body)?;
                out.write_all(b"\n")?;
            }
            HookResponse::Passthrough { stdout, stderr, .. } => {
                out.write_all(stdout)?;
                err.write_all(stderr)?;
            }
        }
        out.flush()?;
        err.flush()
    }
}

/// RFC 3339 timestamps with an explicit `+00:00` offset.
pub mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339()
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(ts) => serializer.serialize_some(&format(ts)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw: Option<String> = Option::deserialize(deserializer)?;
            match raw {
                Some(s) => parse(&s).map(Some).map_err(de::Error::custom),
                None => Ok(None),
            }
        }
    }
}
