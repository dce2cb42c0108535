use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to {action} {path}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("state file {path} is corrupt; repair or remove it to start fresh")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize hook state")]
    Serialize(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("no tracked hook matches '{0}'")]
    NoMatch(String),

    #[error("'{pattern}' matches {} hooks:\n{}", .matches.len(), render_matches(.matches))]
    Ambiguous {
        pattern: String,
        matches: Vec<String>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn render_matches(matches: &[String]) -> String {
    matches
        .iter()
        .map(|m| format!("  - {m}"))
        .collect::<Vec<_>>()
        .join("\n")
}
