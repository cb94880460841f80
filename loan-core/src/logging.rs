use slog::{o, Drain, Level, Logger, OwnedKVList, Record};
use slog_async::Async;
use slog_envlogger::LogBuilder;
use slog_scope::GlobalLoggerGuard;
use slog_term::{Decorator, TermDecorator};
use std::io;

/// The channel size for async logging.
const BUFFER_SIZE: usize = 1024;

/// Sets up the global logger and routes the `log` crate macros to it.
///
/// `filter` uses the `slog-envlogger` syntax, e.g. `warn,loan_core=debug`.
/// Keep the returned guard alive for as long as logging is needed.
pub fn init(filter: impl AsRef<str>) -> (Logger, GlobalLoggerGuard) {
    // Errors go to stderr and everything else to stdout.
    let format = SplitFormatter {
        stderr: TermDecorator::new().stderr().build(),
        stdout: TermDecorator::new().stdout().build(),
    }
    .fuse();
    let drain = Async::new(LogBuilder::new(format).parse(filter.as_ref()).build())
        .chan_size(BUFFER_SIZE)
        .build();
    let logger = Logger::root(drain.fuse(), o!());

    let guard = slog_scope::set_global_logger(logger.clone());
    if let Err(err) = slog_stdlog::init() {
        slog::warn!(logger, "log crate already has a logger: {}", err);
    }

    (logger, guard)
}

struct SplitFormatter<E, O> {
    stderr: E,
    stdout: O,
}

impl<E: Decorator, O: Decorator> Drain for SplitFormatter<E, O> {
    type Ok = ();
    type Err = io::Error;

    fn log(&self, record: &Record, values: &OwnedKVList) -> io::Result<()> {
        match record.level() {
            Level::Error | Level::Critical => write_record(&self.stderr, record, values),
            _ => write_record(&self.stdout, record, values),
        }
    }
}

/// `<utc timestamp> <level> [<module>] <message>`
fn write_record(
    decorator: &impl Decorator,
    record: &Record,
    values: &OwnedKVList,
) -> io::Result<()> {
    decorator.with_record(record, values, |mut decorator| {
        decorator.start_timestamp()?;
        slog_term::timestamp_utc(&mut decorator)?;

        decorator.start_whitespace()?;
        write!(decorator, " ")?;

        decorator.start_level()?;
        write!(decorator, "{}", record.level())?;

        decorator.start_whitespace()?;
        write!(decorator, " ")?;

        write!(decorator, "[{}]", record.module())?;

        decorator.start_whitespace()?;
        write!(decorator, " ")?;

        decorator.start_msg()?;
        writeln!(decorator, "{}", record.msg())?;
        decorator.flush()?;

        Ok(())
    })
}
