//! The console backend's output targets, one per configured appender.

use serde_json::Value;
use std::fmt::Debug;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use termcolor::{ColorChoice, StandardStream, WriteColor};

use crate::error::BackendError;

/// The appender types the console backend understands.
pub const APPENDER_TYPES: [&str; 4] = ["stdout", "stderr", "file", "log"];

/// An opened appender.
pub enum AppenderTarget {
    /// Writes to STDOUT. May use colors depending on the environment.
    Stdout(StandardStream),
    /// Writes to STDERR. May use colors depending on the environment.
    Stderr(StandardStream),
    /// Appends to a file.
    File(BufWriter<File>),
    /// Forwards records to whatever logger is installed through the `log` facade.
    Facade,
}

impl Debug for AppenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stream = |stream: &StandardStream| {
            if stream.supports_color() {
                "<stream with color support>"
            } else {
                "<stream>"
            }
        };

        match self {
            AppenderTarget::Stdout(stdout) => {
                f.debug_tuple("Stdout").field(&stream(stdout)).finish()
            }
            AppenderTarget::Stderr(stderr) => {
                f.debug_tuple("Stderr").field(&stream(stderr)).finish()
            }
            AppenderTarget::File(file) => f.debug_tuple("File").field(file).finish(),
            AppenderTarget::Facade => f.write_str("Facade"),
        }
    }
}

impl AppenderTarget {
    /// Open the target described by an appender descriptor. The descriptor needs a `type` field,
    /// and `file` appenders also need a `filename`.
    pub fn from_descriptor(name: &str, descriptor: &Value) -> Result<Self, BackendError> {
        let invalid = |reason: String| BackendError::InvalidAppender {
            appender: name.to_owned(),
            reason,
        };

        let appender_type = descriptor
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(String::from("missing 'type'")))?;

        match appender_type {
            "stdout" => Ok(Self::new_stdout()),
            "stderr" => Ok(Self::new_stderr()),
            "log" => Ok(AppenderTarget::Facade),
            "file" => {
                let path = descriptor
                    .get("filename")
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid(String::from("file appenders need a 'filename'")))?;

                Self::new_file_path(path).map_err(|error| BackendError::AppenderIo {
                    appender: name.to_owned(),
                    path: path.to_owned(),
                    error,
                })
            }
            other => Err(invalid(format!(
                "unsupported type '{other}', expected one of {}",
                APPENDER_TYPES.join(", ")
            ))),
        }
    }

    /// Construct an [`AppenderTarget`] that writes to STDOUT with optional color support
    /// determined by the environment.
    pub fn new_stdout() -> Self {
        AppenderTarget::Stdout(StandardStream::stdout(stream_color_support(
            atty::Stream::Stdout,
        )))
    }

    /// Construct an [`AppenderTarget`] that writes to STDERR with optional color support
    /// determined by the environment.
    pub fn new_stderr() -> Self {
        AppenderTarget::Stderr(StandardStream::stderr(stream_color_support(
            atty::Stream::Stderr,
        )))
    }

    /// Construct an [`AppenderTarget`] for doing buffered writes to a file.
    pub fn new_file_path<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let file = File::options().create(true).append(true).open(path)?;

        Ok(Self::File(BufWriter::with_capacity(1024, file)))
    }

    /// A writer that can be written to using the [`write!()`] and [`writeln!()`] macros. Returns
    /// `None` for the facade target, which does not write anything itself.
    pub fn writer(&mut self) -> Option<&mut dyn Write> {
        match self {
            AppenderTarget::Stdout(ref mut stdout) => Some(stdout),
            AppenderTarget::Stderr(ref mut stderr) => Some(stderr),
            AppenderTarget::File(ref mut file) => Some(file),
            AppenderTarget::Facade => None,
        }
    }

    /// The color writer for writing terminal colors. Returns `None` for anything other than a
    /// terminal stream.
    pub fn color_writer(&mut self) -> Option<&mut dyn WriteColor> {
        match self {
            AppenderTarget::Stdout(ref mut stdout) => Some(stdout),
            AppenderTarget::Stderr(ref mut stderr) => Some(stderr),
            AppenderTarget::File(_) | AppenderTarget::Facade => None,
        }
    }
}

/// Whether to use colors when outputting to a terminal stream. Considers the `CLICOLOR`,
/// `CLICOLOR_FORCE`, and `NO_COLOR` environment variables, and whether or not the stream is
/// attached to a real TTY.
fn stream_color_support(stream: atty::Stream) -> ColorChoice {
    if let Ok(value) = std::env::var("CLICOLOR_FORCE") {
        if value.trim() != "0" {
            return ColorChoice::Always;
        }
    }

    if let Ok(value) = std::env::var("NO_COLOR") {
        if value.trim() != "0" {
            return ColorChoice::Never;
        }
    }

    if let Ok(value) = std::env::var("CLICOLOR") {
        if value.trim() == "0" {
            return ColorChoice::Never;
        }
    }

    // If `CLICOLOR` is unset or set to a truthy value, and colors aren't forced, then terminal
    // support determines whether or not colors are used
    if atty::is(stream) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}
