mod output;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use crossterm::style::Color;
use guardrails_config::GuardrailsConfig;
use guardrails_core::admin::{self, DisableOutcome, EnableOutcome};
use guardrails_core::humanize::relative;
use guardrails_core::{logging, HealthReport, StateStore, StoreSettings};
use guardrails_types::HookRecord;
use output::{print_json, print_table, Palette};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Debug, Parser)]
#[command(
    name = "hook-health",
    about = "Inspect and manage hook circuit breakers",
    version
)]
struct Cli {
    /// Configuration file (default ~/.claude/guardrails.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State file, overriding the configured one
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Summary of tracked hooks and details of disabled ones
    Health,
    /// Every tracked hook with its state and counters
    List,
    Reset(ResetCommand),
    Enable(EnableCommand),
    Disable(DisableCommand),
    Config(ConfigCommand),
}

/// Forget a hook's circuit state
#[derive(Debug, clap::Args)]
struct ResetCommand {
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pattern: Option<String>,

    #[arg(long)]
    all: bool,
}

/// Re-enable a disabled hook
#[derive(Debug, clap::Args)]
struct EnableCommand {
    pattern: String,

    /// Reset the hook even if it is not disabled
    #[arg(long)]
    force: bool,
}

/// Open a hook's circuit so it is skipped
#[derive(Debug, clap::Args)]
struct DisableCommand {
    pattern: String,
}

/// Show, validate or create the configuration
#[derive(Debug, clap::Args)]
struct ConfigCommand {
    #[arg(long, conflicts_with = "init")]
    validate: bool,

    /// Write the commented default configuration file
    #[arg(long)]
    init: bool,

    /// Overwrite an existing file with --init
    #[arg(long, requires = "init")]
    force: bool,
}

struct Output {
    json: bool,
    palette: Palette,
    now: DateTime<Utc>,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = ctrlc::set_handler(|| process::exit(130)) {
        eprintln!("warning: failed to install interrupt handler: {err}");
    }

    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let out = Output {
        json: cli.json,
        palette: Palette::detect(cli.no_color),
        now: Utc::now(),
    };

    if let Commands::Config(cmd) = &cli.command {
        if cmd.validate || cmd.init {
            return config_file_command(cmd, cli.config.as_deref(), &out);
        }
    }

    let config = load_config(cli.config.as_deref(), cli.state_file)?;
    logging::init(&config.logging);
    let store = StateStore::open(
        &config.state_file,
        StoreSettings::from_config(&config.circuit_breaker),
    );

    match cli.command {
        Commands::Health => health_command(&store, &out),
        Commands::List => list_command(&store, &out),
        Commands::Reset(cmd) => reset_command(&store, cmd, &out),
        Commands::Enable(cmd) => enable_command(&store, cmd, &out),
        Commands::Disable(cmd) => disable_command(
            &store,
            cmd,
            config.circuit_breaker.failure_threshold,
            &out,
        ),
        Commands::Config(_) => show_config(&config, &out),
    }
}

fn load_config(path: Option<&Path>, state_file: Option<PathBuf>) -> Result<GuardrailsConfig> {
    let mut config = guardrails_config::load(path).context("failed to load configuration")?;
    if let Some(state_file) = state_file {
        config.state_file = state_file;
    }
    Ok(config)
}

fn health_command(store: &StateStore, out: &Output) -> Result<i32> {
    let report = store
        .get_health_report(out.now)
        .context("failed to read hook state")?;
    if out.json {
        print_json(&report)?;
    } else {
        print_health(&report, &store.location(), out);
    }
    Ok(0)
}

fn print_health(report: &HealthReport, location: &str, out: &Output) {
    let p = out.palette;
    println!("{} ({location})", p.bold("Hook health"));
    println!(
        "  tracked: {}  closed: {}  half-open: {}  disabled: {}",
        report.total_hooks,
        p.paint(&report.closed.to_string(), Color::Green),
        p.paint(&report.half_open.to_string(), Color::Yellow),
        p.paint(&report.disabled.to_string(), Color::Red),
    );
    let stats = &report.global_stats;
    println!(
        "  executions: {}  failures: {}  last updated: {}",
        stats.total_executions,
        stats.total_failures,
        stats
            .last_updated
            .map(|ts| relative(ts, out.now))
            .unwrap_or_else(|| "never".to_string()),
    );

    if report.disabled_hooks.is_empty() {
        println!("\n{}", p.paint("No hooks are disabled.", Color::Green));
        return;
    }
    println!("\n{}", p.bold("Disabled hooks:"));
    for hook in &report.disabled_hooks {
        println!("  {}", p.paint(&hook.hook, Color::Red));
        println!(
            "    failures: {} ({} consecutive)",
            hook.failure_count, hook.consecutive_failures
        );
        if let Some(error) = &hook.last_error {
            println!("    last error: {error}");
        }
        let disabled = hook
            .disabled_at
            .map(|ts| format!("disabled {}", relative(ts, out.now)))
            .unwrap_or_else(|| "disabled".to_string());
        let retry = match hook.retry_after {
            Some(ts) if hook.seconds_until_retry > 0 => format!("retry {}", relative(ts, out.now)),
            _ => "retry pending".to_string(),
        };
        println!("    {disabled}, {retry}");
    }
}

fn list_command(store: &StateStore, out: &Output) -> Result<i32> {
    let hooks = store.get_all_hooks().context("failed to read hook state")?;
    if out.json {
        print_json(&hooks)?;
    } else if hooks.is_empty() {
        println!("No hooks tracked yet.");
    } else {
        print_hook_table(&hooks, out);
    }
    Ok(0)
}

fn print_hook_table(hooks: &BTreeMap<String, HookRecord>, out: &Output) {
    let states: Vec<_> = hooks.values().map(|r| r.state).collect();
    let rows: Vec<Vec<String>> = hooks
        .iter()
        .map(|(id, record)| {
            vec![
                id.clone(),
                record.state.to_string(),
                record.failure_count.to_string(),
                record.consecutive_failures.to_string(),
                record.consecutive_successes.to_string(),
                record
                    .last_failure_at
                    .map(|ts| relative(ts, out.now))
                    .unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    let palette = out.palette;
    print_table(
        &[
            "HOOK",
            "STATE",
            "FAILURES",
            "CONSEC FAIL",
            "CONSEC OK",
            "LAST FAILURE",
        ],
        &rows,
        |row, col, cell| match (col, states.get(row)) {
            (1, Some(state)) => palette.state(*state, &cell),
            _ => cell,
        },
    );
}

fn reset_command(store: &StateStore, cmd: ResetCommand, out: &Output) -> Result<i32> {
    match cmd.pattern {
        Some(pattern) if !cmd.all => {
            let hook = admin::reset(store, &pattern, out.now)?;
            if out.json {
                print_json(&json!({ "reset": [hook] }))?;
            } else {
                println!("{} {hook}", out.palette.paint("reset", Color::Green));
            }
        }
        _ => {
            let removed = admin::reset_all(store, out.now)?;
            if out.json {
                print_json(&json!({ "reset_all": removed }))?;
            } else {
                println!(
                    "{} {removed} tracked hook(s)",
                    out.palette.paint("reset", Color::Green)
                );
            }
        }
    }
    Ok(0)
}

fn enable_command(store: &StateStore, cmd: EnableCommand, out: &Output) -> Result<i32> {
    let outcome = admin::enable(store, &cmd.pattern, cmd.force, out.now)?;
    if out.json {
        print_json(&outcome)?;
        return Ok(0);
    }
    match outcome {
        EnableOutcome::Reset { hook, previous } => println!(
            "{} {hook} (was {})",
            out.palette.paint("enabled", Color::Green),
            out.palette.state(previous, previous.as_str())
        ),
        EnableOutcome::NotDisabled { hook, state } => println!(
            "{hook} is {}, not disabled; use --force to reset it anyway",
            out.palette.state(state, state.as_str())
        ),
    }
    Ok(0)
}

fn disable_command(
    store: &StateStore,
    cmd: DisableCommand,
    failure_threshold: u32,
    out: &Output,
) -> Result<i32> {
    let outcome = admin::disable(store, &cmd.pattern, failure_threshold, out.now)?;
    if out.json {
        print_json(&outcome)?;
        return Ok(0);
    }
    match outcome {
        DisableOutcome::Disabled { hook, record } => {
            let retry = record
                .retry_after
                .map(|ts| format!("; retry {}", relative(ts, out.now)))
                .unwrap_or_default();
            println!(
                "{} {hook}{retry}",
                out.palette.paint("disabled", Color::Red)
            );
        }
        DisableOutcome::AlreadyDisabled { hook, .. } => println!("{hook} is already disabled"),
    }
    Ok(0)
}

fn show_config(config: &GuardrailsConfig, out: &Output) -> Result<i32> {
    if out.json {
        print_json(config)?;
    } else {
        let yaml = serde_yaml::to_string(config).context("failed to render configuration")?;
        print!("{yaml}");
    }
    Ok(0)
}

fn config_file_command(cmd: &ConfigCommand, path: Option<&Path>, out: &Output) -> Result<i32> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => guardrails_config::default_config_path()?,
    };

    if cmd.init {
        guardrails_config::create_default_config_file(&path, cmd.force)
            .context("failed to write default configuration")?;
        if out.json {
            print_json(&json!({ "created": path }))?;
        } else {
            println!("wrote default configuration to {}", path.display());
        }
        return Ok(0);
    }

    match guardrails_config::validate(&path) {
        Ok(_) => {
            if out.json {
                print_json(&json!({ "valid": true, "path": path }))?;
            } else {
                println!(
                    "{} {}",
                    out.palette.paint("valid", Color::Green),
                    path.display()
                );
            }
            Ok(0)
        }
        Err(err) => {
            if out.json {
                print_json(&json!({
                    "valid": false,
                    "path": path,
                    "error": err.to_string(),
                    "errors": err.field_errors(),
                }))?;
            } else {
                eprintln!("error: {err}");
            }
            Ok(1)
        }
    }
}
