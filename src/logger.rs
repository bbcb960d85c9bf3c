use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

/// One output destination with its own severity threshold.
struct Sink {
    writer: Box<dyn Write + Send>,
    threshold: LevelFilter,
}

/// Logger that fans records out to stderr plus any number of file sinks,
/// each filtered independently. The sink list is serialized behind a mutex
/// so interleaved lines stay whole.
pub struct MultiLogger {
    sinks: Mutex<Vec<Sink>>,
    max_level: LevelFilter,
}

impl MultiLogger {
    pub fn new(stderr_level: LevelFilter) -> Self {
        let stderr_sink = Sink {
            writer: Box::new(io::stderr()),
            threshold: stderr_level,
        };
        Self {
            sinks: Mutex::new(vec![stderr_sink]),
            max_level: stderr_level,
        }
    }

    /// Silence the default stderr sink (file sinks keep working).
    pub fn quiet(mut self) -> Self {
        if let Ok(mut sinks) = self.sinks.lock() {
            if let Some(first) = sinks.first_mut() {
                first.threshold = LevelFilter::Off;
            }
        }
        self
    }

    pub fn add_file(mut self, path: &Path, threshold: LevelFilter) -> io::Result<Self> {
        let file = File::create(path)?;
        if threshold > self.max_level {
            self.max_level = threshold;
        }
        if let Ok(mut sinks) = self.sinks.lock() {
            sinks.push(Sink {
                writer: Box::new(file),
                threshold,
            });
        }
        Ok(self)
    }

    /// Install as the process-wide logger. May only succeed once.
    pub fn install(self) -> Result<(), log::SetLoggerError> {
        let max_level = self.max_level;
        log::set_boxed_logger(Box::new(self)).map(|()| log::set_max_level(max_level))
    }
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

impl Log for MultiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format!(
            "[{level}][{target}] {message}",
            level = level_tag(record.level()),
            target = record.target(),
            message = record.args()
        );

        let Ok(mut sinks) = self.sinks.lock() else {
            return;
        };
        for sink in sinks.iter_mut() {
            if record.level() <= sink.threshold {
                let _ = writeln!(sink.writer, "{line}");
            }
        }
    }

    fn flush(&self) {
        if let Ok(mut sinks) = self.sinks.lock() {
            for sink in sinks.iter_mut() {
                let _ = sink.writer.flush();
            }
        }
    }
}

/// Map `-v` occurrences to a stderr threshold.
pub fn verbosity_filter(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_mapping() {
        assert_eq!(verbosity_filter(0), LevelFilter::Info);
        assert_eq!(verbosity_filter(1), LevelFilter::Debug);
        assert_eq!(verbosity_filter(2), LevelFilter::Trace);
        assert_eq!(verbosity_filter(9), LevelFilter::Trace);
    }

    #[test]
    fn stderr_sink_respects_threshold() {
        let logger = MultiLogger::new(LevelFilter::Warn);
        let info = Metadata::builder().level(Level::Info).build();
        let warn = Metadata::builder().level(Level::Warn).build();
        assert!(!logger.enabled(&info));
        assert!(logger.enabled(&warn));
    }

    #[test]
    fn quiet_disables_stderr_only() {
        let logger = MultiLogger::new(LevelFilter::Debug).quiet();
        let sinks = logger.sinks.lock().expect("sink lock");
        assert_eq!(sinks[0].threshold, LevelFilter::Off);
    }
}
