use guardrails_config::{LogFormat, LogLevel, LoggingConfig};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

pub fn level_for(level: LogLevel) -> Level {
    match level {
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warning => Level::WARN,
        LogLevel::Error | LogLevel::Critical => Level::ERROR,
    }
}

// Never writes to stdio. Returns whether the log file is in use.
pub fn init(config: &LoggingConfig) -> bool {
    let (writer, to_file) = match open_log(&config.file) {
        Ok(file) => (BoxMakeWriter::new(Mutex::new(file)), true),
        Err(_) => (BoxMakeWriter::new(io::sink), false),
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level_for(config.level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false);
    // A subscriber may already be installed (tests, repeated init); keep it.
    let _ = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    to_file
}

fn open_log(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
