use std::borrow::Cow;
use std::sync::Arc;
use tracing::Level;

/// Anything that can record a leveled log line.
///
/// Implementations must be safe to call from several tasks at once and must
/// write each line as a unit.
pub trait LogSink: Send + Sync {
    fn write(&self, level: Level, prefix: &str, message: &str);
}

/// Production sink that forwards every line to the global tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, level: Level, prefix: &str, message: &str) {
        // tracing macros need the level as a constant
        match level {
            Level::DEBUG => tracing::debug!(prefix = prefix, "{}", message),
            Level::INFO => tracing::info!(prefix = prefix, "{}", message),
            Level::WARN => tracing::warn!(prefix = prefix, "{}", message),
            Level::ERROR => tracing::error!(prefix = prefix, "{}", message),
            _ => tracing::trace!(prefix = prefix, "{}", message),
        }
    }
}

/// Cheaply cloneable logging handle given to each component
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    prefix: Cow<'static, str>,
}

impl Logger {
    pub fn new(sink: Arc<dyn LogSink>, prefix: impl Into<Cow<'static, str>>) -> Self {
        Self {
            sink,
            prefix: prefix.into(),
        }
    }

    /// Logger that writes to tracing
    pub fn tracing(prefix: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Arc::new(TracingSink), prefix)
    }

    /// Same sink, different prefix
    pub fn scoped(&self, prefix: impl Into<Cow<'static, str>>) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            prefix: prefix.into(),
        }
    }

    pub fn log(&self, level: Level, message: impl AsRef<str>) {
        self.sink.write(level, &self.prefix, message.as_ref());
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(Level::DEBUG, message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::INFO, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(Level::WARN, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::ERROR, message);
    }
}

/// In-memory sink for asserting on log output in tests
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSink {
    lines: std::sync::Mutex<Vec<(Level, String, String)>>,
}

#[cfg(test)]
impl RecordingSink {
    /// Recorded `(level, prefix, message)` triples in write order
    pub fn lines(&self) -> Vec<(Level, String, String)> {
        self.lines.lock().unwrap().clone()
    }

    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(l, _, _)| *l == level)
            .map(|(_, _, m)| m)
            .collect()
    }
}

#[cfg(test)]
impl LogSink for RecordingSink {
    fn write(&self, level: Level, prefix: &str, message: &str) {
        self.lines
            .lock()
            .unwrap()
            .push((level, prefix.to_string(), message.to_string()));
    }
}
