mod env;
mod error;

pub use error::{ConfigError, FieldError};

use serde::Serialize;
use serde_yaml::Value;
use std::collections::HashMap;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Hook guardrails configuration.
#
# Every key can be overridden from the environment with the GUARDRAILS_
# prefix, e.g. GUARDRAILS_CIRCUIT_BREAKER_FAILURE_THRESHOLD=5.

circuit_breaker:
  # Set to false to run every hook unconditionally.
  enabled: true
  # Consecutive failures before a hook is disabled (1-100).
  failure_threshold: 3
  # Seconds a disabled hook waits before a recovery trial (0-86400).
  cooldown_seconds: 300
  # Consecutive successes in recovery needed to re-enable a hook (1-100).
  success_threshold: 2
  # Hook commands containing any of these substrings are never disabled.
  exclude: []

logging:
  file: "~/.claude/logs/guardrails.log"
  # debug, info, warning, error or critical
  level: info
  # text or json
  format: text

state_file: "~/.claude/hook_state.json"

wrapper:
  # Hard limit in seconds on a single wrapped hook run (1-3600).
  timeout_seconds: 300
"#;

const THRESHOLD_RANGE: RangeInclusive<i64> = 1..=100;
const COOLDOWN_RANGE: RangeInclusive<i64> = 0..=86_400;
const TIMEOUT_RANGE: RangeInclusive<i64> = 1..=3_600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warning" | "warn" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            "critical" => Some(LogLevel::Critical),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub cooldown_seconds: u64,
    pub success_threshold: u32,
    pub exclude: Vec<String>,
}

impl CircuitBreakerConfig {
        pub fn is_excluded(&self, hook_id: &str) -> bool {
        self.exclude
            .iter()
            .any(|pattern| !pattern.is_empty() && hook_id.contains(pattern.as_str()))
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 3,
            cooldown_seconds: 300,
            success_threshold: 2,
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggingConfig {
    pub file: PathBuf,
    pub level: LogLevel,
    pub format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrapperConfig {
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardrailsConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub logging: LoggingConfig,
    pub state_file: PathBuf,
    pub wrapper: WrapperConfig,
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    home::home_dir()
        .map(|home| home.join(".claude").join("guardrails.yaml"))
        .ok_or(ConfigError::HomeNotFound)
}

/// Loads defaults, then the YAML file (if present), then `GUARDRAILS_*`
/// variables from the process environment.
pub fn load(path: Option<&Path>) -> Result<GuardrailsConfig, ConfigError> {
    load_with_env(path, std::env::vars())
}

pub fn load_with_env<I>(path: Option<&Path>, env: I) -> Result<GuardrailsConfig, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let vars: HashMap<String, String> = env.into_iter().collect();
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => home_dir(&vars)
            .map(|home| home.join(".claude").join("guardrails.yaml"))
            .ok_or(ConfigError::HomeNotFound)?,
    };

    let mut merged = parse_yaml(DEFAULT_CONFIG_TEMPLATE, Path::new("<defaults>"))?;
    if path.exists() {
        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        env::merge(&mut merged, parse_yaml(&raw, &path)?);
    }
    env::merge(&mut merged, env::overrides(&vars));

    extract(&merged, &vars)
}

pub fn defaults() -> Result<GuardrailsConfig, ConfigError> {
    let vars: HashMap<String, String> = std::env::vars().collect();
    let root = parse_yaml(DEFAULT_CONFIG_TEMPLATE, Path::new("<defaults>"))?;
    extract(&root, &vars)
}

pub fn validate(path: &Path) -> Result<GuardrailsConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    load(Some(path))
}

pub fn create_default_config_file(path: &Path, force: bool) -> Result<(), ConfigError> {
    if path.exists() && !force {
        return Err(ConfigError::AlreadyExists(path.to_path_buf()));
    }
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, DEFAULT_CONFIG_TEMPLATE).map_err(io_err)
}

fn parse_yaml(raw: &str, path: &Path) -> Result<Value, ConfigError> {
    let value: Value = serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Null => Ok(Value::Mapping(Default::default())),
        Value::Mapping(_) => Ok(value),
        _ => Err(ConfigError::NotAMapping(path.to_path_buf())),
    }
}

fn extract(root: &Value, env: &HashMap<String, String>) -> Result<GuardrailsConfig, ConfigError> {
    let mut fields = Fields {
        root,
        env,
        errors: Vec::new(),
    };

    let circuit_breaker = CircuitBreakerConfig {
        enabled: fields.boolean(&["circuit_breaker", "enabled"]),
        failure_threshold: fields.integer(&["circuit_breaker", "failure_threshold"], THRESHOLD_RANGE)
            as u32,
        cooldown_seconds: fields.integer(&["circuit_breaker", "cooldown_seconds"], COOLDOWN_RANGE)
            as u64,
        success_threshold: fields.integer(&["circuit_breaker", "success_threshold"], THRESHOLD_RANGE)
            as u32,
        exclude: fields.strings(&["circuit_breaker", "exclude"]),
    };
    let logging = LoggingConfig {
        file: fields.path(&["logging", "file"]),
        level: fields.log_level(&["logging", "level"]),
        format: fields.log_format(&["logging", "format"]),
    };
    let state_file = fields.path(&["state_file"]);
    let wrapper = WrapperConfig {
        timeout_seconds: fields.integer(&["wrapper", "timeout_seconds"], TIMEOUT_RANGE) as u64,
    };

    if !fields.errors.is_empty() {
        return Err(ConfigError::Invalid(fields.errors));
    }
    Ok(GuardrailsConfig {
        circuit_breaker,
        logging,
        state_file,
        wrapper,
    })
}

// Each accessor records a FieldError and returns a placeholder, so one pass
// reports every invalid field.
struct Fields<'a> {
    root: &'a Value,
    env: &'a HashMap<String, String>,
    errors: Vec<FieldError>,
}

impl<'a> Fields<'a> {
    fn lookup(&self, path: &[&str]) -> &'a Value {
        let root: &'a Value = self.root;
        path.iter().fold(root, |node, key| &node[*key])
    }

    fn fail(&mut self, path: &[&str], reason: impl Into<String>) {
        self.errors.push(FieldError::new(path.join("."), reason));
    }

    fn boolean(&mut self, path: &[&str]) -> bool {
        match self.lookup(path) {
            Value::Bool(b) => *b,
            Value::String(s) => match env::parse_bool(s) {
                Some(b) => b,
                None => {
                    self.fail(path, format!("expected a boolean, got '{s}'"));
                    false
                }
            },
            other => {
                let found = describe(other);
                self.fail(path, format!("expected a boolean, got {found}"));
                false
            }
        }
    }

    fn integer(&mut self, path: &[&str], range: RangeInclusive<i64>) -> i64 {
        let parsed = match self.lookup(path) {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        let Some(value) = parsed else {
            let found = describe(self.lookup(path));
            self.fail(path, format!("expected an integer, got {found}"));
            return *range.start();
        };
        if !range.contains(&value) {
            self.fail(
                path,
                format!(
                    "{value} is out of range ({}..={})",
                    range.start(),
                    range.end()
                ),
            );
            return *range.start();
        }
        value
    }

    fn string(&mut self, path: &[&str]) -> Option<String> {
        match self.lookup(path) {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            other => {
                let found = describe(other);
                self.fail(path, format!("expected a non-empty string, got {found}"));
                None
            }
        }
    }

    fn strings(&mut self, path: &[&str]) -> Vec<String> {
        match self.lookup(path) {
            Value::Null => Vec::new(),
            Value::String(s) => s
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(ToString::to_string)
                .collect(),
            Value::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                let mut bad = Vec::new();
                for (idx, item) in items.iter().enumerate() {
                    match item {
                        Value::String(s) => out.push(s.clone()),
                        Value::Number(n) => out.push(n.to_string()),
                        other => bad.push(format!("item {idx} is {}", describe(other))),
                    }
                }
                for reason in bad {
                    self.fail(path, format!("expected strings, {reason}"));
                }
                out
            }
            other => {
                let found = describe(other);
                self.fail(path, format!("expected a list of strings, got {found}"));
                Vec::new()
            }
        }
    }

    fn path(&mut self, path: &[&str]) -> PathBuf {
        let Some(raw) = self.string(path) else {
            return PathBuf::new();
        };
        match expand_path(&raw, self.env) {
            Some(expanded) => expanded,
            None => {
                self.fail(path, "cannot expand '~': home directory not found");
                PathBuf::new()
            }
        }
    }

    fn log_level(&mut self, path: &[&str]) -> LogLevel {
        let Some(raw) = self.string(path) else {
            return LogLevel::Info;
        };
        LogLevel::parse(&raw).unwrap_or_else(|| {
            self.fail(
                path,
                format!("'{raw}' is not one of debug, info, warning, error, critical"),
            );
            LogLevel::Info
        })
    }

    fn log_format(&mut self, path: &[&str]) -> LogFormat {
        let Some(raw) = self.string(path) else {
            return LogFormat::Text;
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            _ => {
                self.fail(path, format!("'{raw}' is not one of text, json"));
                LogFormat::Text
            }
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "nothing".to_string(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("'{s}'"),
        Value::Sequence(_) => "a list".to_string(),
        Value::Mapping(_) => "a mapping".to_string(),
        Value::Tagged(_) => "a tagged value".to_string(),
    }
}

fn home_dir(env: &HashMap<String, String>) -> Option<PathBuf> {
    env.get("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
        .or_else(home::home_dir)
}

/// Expands `$VAR` / `${VAR}` from `env`, then a leading `~`. Unknown
/// variables stay verbatim. Returns `None` only when `~` has no home to expand to.
pub fn expand_path(raw: &str, env: &HashMap<String, String>) -> Option<PathBuf> {
    let expanded = expand_vars(raw, env);
    if expanded == "~" {
        return home_dir(env);
    }
    if let Some(rest) = expanded.strip_prefix("~/") {
        return home_dir(env).map(|home| home.join(rest));
    }
    Some(PathBuf::from(expanded))
}

fn expand_vars(raw: &str, env: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };
        match env.get(name).filter(|_| !name.is_empty()) {
            Some(value) => out.push_str(value),
            None => {
                out.push('$');
                out.push_str(&after[..consumed]);
            }
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);
    out
}
