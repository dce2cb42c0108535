use serde_yaml::{Mapping, Value};
use std::collections::HashMap;

const ENV_PREFIX: &str = "GUARDRAILS_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Bool,
    Int,
    List,
    Str,
}

// Section and leaf names are matched whole, never split on their inner
// underscores: CIRCUIT_BREAKER_FAILURE_THRESHOLD is circuit_breaker.failure_threshold.
const KNOWN_KEYS: &[(&[&str], Kind)] = &[
    (&["circuit_breaker", "enabled"], Kind::Bool),
    (&["circuit_breaker", "failure_threshold"], Kind::Int),
    (&["circuit_breaker", "cooldown_seconds"], Kind::Int),
    (&["circuit_breaker", "success_threshold"], Kind::Int),
    (&["circuit_breaker", "exclude"], Kind::List),
    (&["logging", "file"], Kind::Str),
    (&["logging", "level"], Kind::Str),
    (&["logging", "format"], Kind::Str),
    (&["state_file"], Kind::Str),
    (&["wrapper", "timeout_seconds"], Kind::Int),
];

pub fn overrides(env: &HashMap<String, String>) -> Value {
    let mut root = Value::Mapping(Mapping::new());
    for (path, kind) in KNOWN_KEYS {
        let name = env_name(path);
        if let Some(raw) = env.get(&name) {
            insert_at(&mut root, path, coerce(raw, *kind));
        }
    }
    root
}

fn env_name(path: &[&str]) -> String {
    format!("{}{}", ENV_PREFIX, path.join("_").to_ascii_uppercase())
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn coerce(raw: &str, kind: Kind) -> Value {
    match kind {
        Kind::Bool => parse_bool(raw)
            .map(Value::Bool)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        Kind::Int => raw
            .trim()
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        Kind::List => Value::Sequence(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        ),
        Kind::Str => Value::String(raw.to_string()),
    }
}

fn insert_at(node: &mut Value, path: &[&str], value: Value) {
    let Value::Mapping(map) = node else {
        return;
    };
    match path {
        [] => {}
        [leaf] => {
            map.insert(Value::String(leaf.to_string()), value);
        }
        [section, rest @ ..] => {
            let key = Value::String(section.to_string());
            if !matches!(map.get(&key), Some(Value::Mapping(_))) {
                map.insert(key.clone(), Value::Mapping(Mapping::new()));
            }
            if let Some(child) = map.get_mut(&key) {
                insert_at(child, rest, value);
            }
        }
    }
}

pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn multi_word_keys_stay_whole() {
        let layer = overrides(&env(&[("GUARDRAILS_CIRCUIT_BREAKER_FAILURE_THRESHOLD", "5")]));
        assert_eq!(
            layer["circuit_breaker"]["failure_threshold"],
            Value::Number(5.into())
        );
    }

    #[test]
    fn bool_words_are_case_insensitive() {
        for (raw, expected) in [("YES", true), ("Off", false), ("1", true), ("false", false)] {
            let layer = overrides(&env(&[("GUARDRAILS_CIRCUIT_BREAKER_ENABLED", raw)]));
            assert_eq!(layer["circuit_breaker"]["enabled"], Value::Bool(expected));
        }
    }

    #[test]
    fn unparseable_values_are_kept_as_strings() {
        let layer = overrides(&env(&[("GUARDRAILS_CIRCUIT_BREAKER_COOLDOWN_SECONDS", "soon")]));
        assert_eq!(
            layer["circuit_breaker"]["cooldown_seconds"],
            Value::String("soon".to_string())
        );
    }

    #[test]
    fn exclude_splits_on_commas() {
        let layer = overrides(&env(&[(
            "GUARDRAILS_CIRCUIT_BREAKER_EXCLUDE",
            "damage-control, pre_tool_use.py,,",
        )]));
        let list = layer["circuit_breaker"]["exclude"]
            .as_sequence()
            .expect("sequence");
        assert_eq!(list.len(), 2);
        assert_eq!(list[1], Value::String("pre_tool_use.py".to_string()));
    }

    #[test]
    fn unknown_variables_are_ignored() {
        let layer = overrides(&env(&[("GUARDRAILS_CIRCUIT_FAILURE", "1"), ("HOME", "/h")]));
        assert_eq!(layer, Value::Mapping(Mapping::new()));
    }

    #[test]
    fn merge_keeps_sibling_fields() {
        let mut base: Value =
            serde_yaml::from_str("a:\n  x: 1\n  y: 2\nb: 3\n").expect("base yaml");
        let overlay: Value = serde_yaml::from_str("a:\n  y: 20\n").expect("overlay yaml");

        merge(&mut base, overlay);

        assert_eq!(base["a"]["x"], Value::Number(1.into()));
        assert_eq!(base["a"]["y"], Value::Number(20.into()));
        assert_eq!(base["b"], Value::Number(3.into()));
    }
}
