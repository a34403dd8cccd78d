//! Minimal stderr logger for the simulator.

use chrono::Local;
use colored::Colorize;
use log::{Level, LevelFilter, Log, Metadata, Record};

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = match record.level() {
            Level::Error => "ERROR".bright_red().bold(),
            Level::Warn => "WARN ".bright_yellow(),
            Level::Info => "INFO ".bright_green(),
            Level::Debug => "DEBUG".bright_blue(),
            Level::Trace => "TRACE".dimmed(),
        };
        let thread = std::thread::current();
        eprintln!(
            "{} {} {:24} {}",
            Local::now().format("%H:%M:%S%.3f").to_string().dimmed(),
            level,
            thread.name().unwrap_or("host").cyan(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Installs the logger. `verbosity` counts `-v` flags on top of `info`.
pub fn init(verbosity: u8) -> Result<(), log::SetLoggerError> {
    let level = match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
