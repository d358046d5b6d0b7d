use std::{io, sync::Once};

use log::LevelFilter;

static LOGGER_INIT: Once = Once::new();

// Route log lines from every test in the binary to stdout. The cores under test all run on the
// test thread, so lines are prefixed with the log level and the emitting module rather than a
// thread id.
pub(crate) fn setup_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{:<5} {}: {}",
                    record.level(),
                    record.target(),
                    message
                ))
            })
            .level(level)
            .chain(io::stdout())
            .apply()
            .expect("the logger is only initialized once");
    })
}
