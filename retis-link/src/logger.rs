use std::{
    env,
    io::{stderr, IsTerminal, Write},
    sync::Mutex,
};

use anyhow::Result;
use log::{LevelFilter, Metadata, Record};
use termcolor::{BufferedStandardStream, Color, ColorChoice, ColorSpec, WriteColor};
use time::{macros::format_description, OffsetDateTime};

/// Logger of the retis-link tool. Messages go to stderr, stdout being
/// reserved for command output.
pub(crate) struct Logger {
    max_level: LevelFilter,
    stderr: Mutex<BufferedStandardStream>,
    use_colors: bool,
}

impl Logger {
    pub(crate) fn init(max_level: LevelFilter) -> Result<()> {
        let use_colors = Self::use_colors();
        let logger = Logger {
            max_level,
            stderr: Mutex::new(BufferedStandardStream::stderr(if use_colors {
                ColorChoice::Auto
            } else {
                ColorChoice::Never
            })),
            use_colors,
        };

        log::set_max_level(max_level);
        log::set_boxed_logger(Box::new(logger))?;
        Ok(())
    }

    fn try_log(&self, record: &Record) -> Result<()> {
        let color = match record.level() {
            log::Level::Error => Some(Color::Red),
            log::Level::Warn => Some(Color::Yellow),
            log::Level::Info => Some(Color::Blue),
            log::Level::Debug => Some(Color::Cyan),
            log::Level::Trace => Some(Color::White),
        };
        let verbose = self.max_level >= LevelFilter::Debug;
        let stderr: &mut BufferedStandardStream = &mut self.stderr.lock().unwrap();

        if verbose {
            OffsetDateTime::now_utc().format_into(
                &mut *stderr,
                format_description!("[hour]:[minute]:[second].[subsecond digits:6] "),
            )?;
        }

        if record.level() <= LevelFilter::Warn || verbose {
            if self.use_colors {
                stderr.set_color(ColorSpec::new().set_fg(color))?;
            }
            write!(stderr, "{:5} ", record.level())?;
            if self.use_colors {
                stderr.reset()?;
            }
        }

        // Library messages are easier to follow with their origin.
        if verbose {
            write!(stderr, "[{}] ", record.target())?;
        }
        writeln!(stderr, "{}", record.args())?;

        stderr.flush()?;
        Ok(())
    }

    fn use_colors() -> bool {
        stderr().is_terminal() && matches!(env::var("TERM"), Ok(x) if x != "dumb")
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Not much we can do to report the error...
        let _ = self.try_log(record);
    }

    fn flush(&self) {
        let _ = self.stderr.lock().unwrap().flush();
    }
}
