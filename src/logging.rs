// Logging sink
//
// An explicitly constructed handle around any `log::Log` implementation.
// Components receive a clone at construction instead of reaching for the
// process-wide facade, so tests can capture what the renderer reports.

use log::{Level, LevelFilter, Log, Record};
use std::fmt;
use std::sync::Arc;

/// `sink_info!(log, "Created {}", name)`: leveled logging through a `LogSink`,
/// shaped like the `log` crate macros.
#[macro_export]
macro_rules! sink_error {
    ($sink:expr, $($arg:tt)+) => {
        $sink.error(format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! sink_warn {
    ($sink:expr, $($arg:tt)+) => {
        $sink.warn(format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! sink_info {
    ($sink:expr, $($arg:tt)+) => {
        $sink.info(format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! sink_debug {
    ($sink:expr, $($arg:tt)+) => {
        $sink.debug(format_args!($($arg)+))
    };
}

const DEFAULT_TARGET: &str = "vk_frame_loop";

/// Leveled message sink shared by the device, swapchain, renderer and shell.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<dyn Log>,
    target: &'static str,
}

impl LogSink {
    /// Wrap an arbitrary logger.
    pub fn new(inner: Arc<dyn Log>) -> Self {
        Self {
            inner,
            target: DEFAULT_TARGET,
        }
    }

    /// env_logger backed sink writing to stderr.
    ///
    /// `level` is the default filter; `RUST_LOG` still overrides it.
    pub fn stderr(level: LevelFilter) -> Self {
        let logger = env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .build();
        Self::new(Arc::new(logger))
    }

    /// Same sink, different target (e.g. "vulkan" for validation messages).
    pub fn with_target(&self, target: &'static str) -> Self {
        Self {
            inner: self.inner.clone(),
            target,
        }
    }

    pub fn target(&self) -> &'static str {
        self.target
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        self.inner.log(
            &Record::builder()
                .args(args)
                .level(level)
                .target(self.target)
                .build(),
        );
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    pub fn flush(&self) {
        self.inner.flush();
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink").field("target", &self.target).finish()
    }
}

/// Parse a level name from config ("info", "DEBUG", ...). Unknown names
/// fall back to `Info`.
pub fn parse_level(name: &str) -> LevelFilter {
    name.parse().unwrap_or(LevelFilter::Info)
}

#[cfg(test)]
pub(crate) mod capture {
    use log::{Level, Log, Metadata, Record};
    use std::sync::Mutex;

    /// Test sink that keeps every record it is handed.
    #[derive(Default)]
    pub struct CaptureLog {
        pub records: Mutex<Vec<(Level, &'static str, String)>>,
    }

    impl Log for CaptureLog {
        fn enabled(&self, _: &Metadata<'_>) -> bool {
            true
        }

        fn log(&self, record: &Record<'_>) {
            let target: &'static str = match record.target() {
                "vulkan" => "vulkan",
                _ => "vk_frame_loop",
            };
            if let Ok(mut records) = self.records.lock() {
                records.push((record.level(), target, record.args().to_string()));
            }
        }

        fn flush(&self) {}
    }
}
