//! In-memory log ring
//!
//! Embedders poll [`get_log`] or register a callback instead of attaching a
//! console, so the last 100 entries are kept in a bounded ring. The crate
//! itself logs through `tracing`; [`RingLayer`] bridges those events into
//! the ring so both sinks observe the same stream.

use chrono::Local;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Maximum number of entries retained in the ring
pub const MAX_LOG_ENTRIES: usize = 100;

/// Log severity, ordered
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Diagnostic detail
    Debug,
    /// Normal operation
    #[default]
    Info,
    /// Recoverable problems
    Warn,
    /// Failures
    Error,
}

impl LogLevel {
    /// Five-character tag used in formatted log lines.
    pub fn tag(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO ",
            LogLevel::Warn => "WARN ",
            LogLevel::Error => "ERROR",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("unknown log level '{}'", s)),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag().trim_end())
    }
}

/// One stored log entry
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Local time, `YYYY-MM-DD HH:MM:SS.mmm` (23 characters)
    pub timestamp: String,
    /// Severity
    pub level: LogLevel,
    /// Formatted message
    pub message: String,
}

/// Per-entry callback type
pub type LogCallback = Arc<dyn Fn(&LogEntry) + Send + Sync>;

struct LogRing {
    entries: VecDeque<LogEntry>,
    min_level: LogLevel,
    callback: Option<LogCallback>,
}

lazy_static! {
    static ref RING: Mutex<LogRing> = Mutex::new(LogRing {
        entries: VecDeque::with_capacity(MAX_LOG_ENTRIES),
        min_level: LogLevel::Info,
        callback: None,
    });
}

/// Set the minimum level stored in the ring.
pub fn set_min_level(level: LogLevel) {
    RING.lock().unwrap().min_level = level;
}

/// Register a callback fired synchronously for every stored entry.
pub fn set_callback<F>(callback: F)
where
    F: Fn(&LogEntry) + Send + Sync + 'static,
{
    RING.lock().unwrap().callback = Some(Arc::new(callback));
}

/// Remove the callback.
pub fn clear_callback() {
    RING.lock().unwrap().callback = None;
}

/// Append an entry if it passes the level filter.
///
/// The callback runs on the logging thread with the ring lock released.
pub fn log(level: LogLevel, message: &str) {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();
    let entry = LogEntry {
        timestamp,
        level,
        message: message.to_string(),
    };

    let callback = {
        let mut ring = RING.lock().unwrap();
        if level < ring.min_level {
            return;
        }
        if ring.entries.len() >= MAX_LOG_ENTRIES {
            ring.entries.pop_front();
        }
        ring.entries.push_back(entry.clone());
        ring.callback.clone()
    };

    if let Some(cb) = callback {
        cb(&entry);
    }
}

/// Copy of the current ring contents, oldest first.
pub fn snapshot() -> Vec<LogEntry> {
    RING.lock().unwrap().entries.iter().cloned().collect()
}

/// The ring formatted as text, oldest first.
///
/// Line format: `YYYY-MM-DD HH:MM:SS.mmm [LEVEL] message\n`.
pub fn get_log() -> String {
    let entries = snapshot();
    let mut out = String::with_capacity(entries.len() * 80);
    for e in &entries {
        out.push_str(&e.timestamp);
        out.push_str(" [");
        out.push_str(e.level.tag());
        out.push_str("] ");
        out.push_str(&e.message);
        out.push('\n');
    }
    out
}

/// Drop all stored entries.
pub fn clear() {
    RING.lock().unwrap().entries.clear();
}

/// `tracing` layer that mirrors events into the ring.
///
/// Stack it under the usual fmt subscriber:
///
/// ```ignore
/// tracing_subscriber::registry()
///     .with(tracing_subscriber::fmt::layer())
///     .with(RingLayer)
///     .init();
/// ```
pub struct RingLayer;

impl<S: Subscriber> Layer<S> for RingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = match *event.metadata().level() {
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::INFO => LogLevel::Info,
            _ => LogLevel::Debug,
        };

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        log(level, &visitor.rendered);
    }
}

/// Collects an event's fields into one display string.
#[derive(Default)]
struct MessageVisitor {
    rendered: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            if self.rendered.is_empty() {
                self.rendered = format!("{:?}", value);
            } else {
                self.rendered = format!("{:?} {}", value, self.rendered);
            }
        } else {
            if !self.rendered.is_empty() {
                self.rendered.push(' ');
            }
            self.rendered
                .push_str(&format!("{}={:?}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.rendered = value.to_string();
        } else {
            if !self.rendered.is_empty() {
                self.rendered.push(' ');
            }
            self.rendered
                .push_str(&format!("{}={}", field.name(), value));
        }
    }
}

#[cfg(test)]
mod tests {
    // The ring itself is process-global; its behavior is exercised in the
    // dedicated `log_ring` integration test where nothing else logs.
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("INFO".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_level_tags() {
        assert_eq!(LogLevel::Debug.tag(), "DEBUG");
        assert_eq!(LogLevel::Info.tag(), "INFO ");
        assert_eq!(LogLevel::Warn.tag(), "WARN ");
        assert_eq!(LogLevel::Error.tag(), "ERROR");
        assert_eq!(LogLevel::Info.to_string(), "INFO");
    }
}
