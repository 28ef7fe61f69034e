/// Severity of a diagnostic message. Levels are totally ordered so sinks
/// can filter on a minimum severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Diagnostic sink for the messaging layer.
///
/// Embedding applications implement this trait to route diagnostics
/// however they prefer; the library never assumes a logging framework.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Default sink: writes to standard error, dropping anything below its
/// minimum severity (warnings and errors by default).
#[derive(Clone)]
pub struct StderrLogger {
    min_level: LogLevel,
}

impl StderrLogger {
    pub fn new() -> Self {
        Self::with_min_level(LogLevel::Warn)
    }

    pub fn with_min_level(min_level: LogLevel) -> Self {
        Self { min_level }
    }

    fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }
}

impl Default for StderrLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for StderrLogger {
    fn log(&self, level: LogLevel, message: &str) {
        if self.enabled(level) {
            eprintln!("{}", message);
        }
    }
}

/// Sink that drops every message, whatever its severity.
#[derive(Default, Clone)]
pub struct SilentLogger;

impl Logger for SilentLogger {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered_by_severity() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert_eq!(LogLevel::Warn.as_str(), "warn");
    }

    #[test]
    fn test_stderr_logger_filters_below_its_minimum() {
        let sink = StderrLogger::new();
        assert!(!sink.enabled(LogLevel::Debug));
        assert!(!sink.enabled(LogLevel::Info));
        assert!(sink.enabled(LogLevel::Warn));
        assert!(sink.enabled(LogLevel::Error));

        let verbose = StderrLogger::with_min_level(LogLevel::Debug);
        assert!(verbose.enabled(LogLevel::Debug));
    }
}
