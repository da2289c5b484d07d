//! The handles issued by the console backend. These are implementation details not exposed in the
//! public API.

use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use termcolor::{Color, ColorSpec};
use time::macros::format_description;
use time::OffsetDateTime;

use crate::backend::LoggerHandle;
use crate::config::Level;
use crate::target::AppenderTarget;

/// An appender shared between every handle that writes to it.
pub type SharedTarget = Arc<Mutex<AppenderTarget>>;

/// A console backend logger for a single category. The level and targets are a snapshot of the
/// configuration that was active when the handle was created.
#[derive(Debug)]
pub struct ConsoleLogger {
    pub category: String,
    pub level: Level,
    pub targets: Vec<SharedTarget>,
}

impl LoggerHandle for ConsoleLogger {
    fn category(&self) -> &str {
        &self.category
    }

    fn level(&self) -> Level {
        self.level
    }

    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        if !self.is_enabled(level) {
            return;
        }

        let timestamp = format_timestamp();
        for target in &self.targets {
            let mut target = target.lock().unwrap_or_else(PoisonError::into_inner);
            // There's nowhere to report a failing appender to, so write errors are dropped
            let _ = self.write_line(&mut target, &timestamp, level, args);
        }
    }
}

impl ConsoleLogger {
    fn write_line(
        &self,
        target: &mut AppenderTarget,
        timestamp: &str,
        level: Level,
        args: fmt::Arguments<'_>,
    ) -> std::io::Result<()> {
        if let AppenderTarget::Facade = target {
            log::logger().log(
                &log::Record::builder()
                    .args(args)
                    .level(facade_level(level))
                    .target(&self.category)
                    .build(),
            );
            return Ok(());
        }

        if let Some(color_writer) = target.color_writer() {
            write!(color_writer, "[{timestamp}] ")?;
            color_writer.set_color(ColorSpec::new().set_fg(Some(level_color(level))))?;
            write!(color_writer, "[{level}]")?;
            color_writer.reset()?;
            writeln!(color_writer, " {} - {args}", self.category)?;
            return color_writer.flush();
        }

        if let Some(writer) = target.writer() {
            writeln!(writer, "[{timestamp}] [{level}] {} - {args}", self.category)?;
            writer.flush()?;
        }

        Ok(())
    }
}

/// The current local time, or UTC if the local offset cannot be determined.
fn format_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
    ))
    .unwrap_or_default()
}

fn level_color(level: Level) -> Color {
    match level {
        Level::All | Level::Trace => Color::Blue,
        Level::Debug => Color::Cyan,
        Level::Info => Color::Green,
        Level::Warn => Color::Yellow,
        Level::Error | Level::Fatal => Color::Red,
        Level::Mark | Level::Off => Color::Magenta,
    }
}

fn facade_level(level: Level) -> log::Level {
    match level {
        Level::All | Level::Trace => log::Level::Trace,
        Level::Debug => log::Level::Debug,
        Level::Info => log::Level::Info,
        Level::Warn => log::Level::Warn,
        Level::Error | Level::Fatal | Level::Mark | Level::Off => log::Level::Error,
    }
}
