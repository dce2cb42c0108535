use anyhow::{Context, Result};
use clap::Parser;
use guardrails_config::GuardrailsConfig;
use guardrails_core::logging;
use guardrails_core::wrapper::{self, WrapRequest, DEFAULT_TIMEOUT};
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::process;
use tracing::error;

#[derive(Debug, Parser)]
#[command(
    name = "hook-wrapper",
    about = "Run a hook command under its circuit breaker",
    version
)]
struct Cli {
    /// Configuration file (default ~/.claude/guardrails.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// State file, overriding the configured one
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// The hook command, after `--`
    #[arg(last = true, required = true, num_args = 1..)]
    command: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    let config = load_config(&cli);
    let request = WrapRequest::new(cli.command, read_stdin());
    let response = match config {
        Ok(config) => {
            logging::init(&config.logging);
            wrapper::execute(&request, &config)
        }
        Err(err) => {
            if let Ok(defaults) = guardrails_config::defaults() {
                logging::init(&defaults.logging);
            }
            error!(
                error = %format!("{err:#}"),
                "configuration unusable; running hook in passthrough mode"
            );
            wrapper::passthrough(&request, DEFAULT_TIMEOUT)
        }
    };

    let code = response.exit_code();
    if let Err(err) = response.emit(&mut io::stdout().lock(), &mut io::stderr().lock()) {
        error!(error = %err, "failed to write hook output");
    }
    process::exit(code);
}

fn load_config(cli: &Cli) -> Result<GuardrailsConfig> {
    let mut config =
        guardrails_config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(state_file) = &cli.state_file {
        config.state_file = state_file.clone();
    }
    Ok(config)
}

/// The host pipes the hook event in; an interactive run has nothing to forward.
fn read_stdin() -> Option<Vec<u8>> {
    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return None;
    }
    let mut buf = Vec::new();
    match stdin.read_to_end(&mut buf) {
        Ok(_) => Some(buf),
        Err(_) => None,
    }
}
