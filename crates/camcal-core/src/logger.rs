//! Minimal stderr logger for the CLI.
//!
//! Lines look like `[  0.123s  INFO camcal::pipeline] message`. Records from
//! crates outside the workspace are capped at `warn` so dependency chatter
//! does not drown the calibration log at `-v`. Library code only uses the
//! `log` macros and never installs a backend itself.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

const OWN_PREFIX: &str = "camcal";
const OWN_CRATES: [&str; 4] = ["camcal", "camcal_core", "camcal_chessboard", "camcal_intrinsics"];

struct StderrLogger {
    level: LevelFilter,
    started: Instant,
}

impl StderrLogger {
    fn max_level_for(&self, target: &str) -> LevelFilter {
        if target.starts_with(OWN_PREFIX) {
            self.level
        } else {
            self.level.min(LevelFilter::Warn)
        }
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level_for(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let mut stderr = std::io::stderr().lock();
        let _ = match record.level() {
            Level::Error | Level::Warn | Level::Info => writeln!(
                stderr,
                "[{elapsed:7.3}s {:>5} {}] {}",
                record.level(),
                record.target(),
                record.args()
            ),
            // Debug output is mostly per-view numbers; keep the line short.
            Level::Debug | Level::Trace => writeln!(
                stderr,
                "[{elapsed:7.3}s {:>5}] {}",
                record.level(),
                record.args()
            ),
        };
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger with the provided level filter.
///
/// Calling this more than once is a no-op after the first successful
/// initialization.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| StderrLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Filter directives logging the workspace crates at `level` and everything
/// else at `warn` or below.
pub fn default_directives(level: LevelFilter) -> String {
    let own = level.to_string().to_lowercase();
    let deps = level.min(LevelFilter::Warn).to_string().to_lowercase();
    let mut out = deps;
    for krate in OWN_CRATES {
        out.push_str(&format!(",{krate}={own}"));
    }
    out
}

/// Install a `tracing` subscriber filtered by `RUST_LOG`.
///
/// Without `RUST_LOG` the filter is [`default_directives`] for `level`.
/// Span close events carry their duration, which is what the
/// `#[instrument]`ed pipeline stages are for.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, level: LevelFilter) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}
