use crate::port::PortSink;
use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `log` backend writing `"[LEVEL] target: message"` lines to the port.
///
/// Stateless. Level filtering is left to `log::max_level`.
pub struct DebugconLogger;

static LOGGER: DebugconLogger = DebugconLogger;

impl DebugconLogger {
    /// Installs the logger. Call once during early init.
    ///
    /// # Errors
    /// Fails if another logger was installed first.
    pub fn install(max_level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_logger(&LOGGER)?;
        log::set_max_level(max_level);
        Ok(())
    }
}

/// Formats one record as a single line.
///
/// # Errors
/// Propagates errors from the writer.
pub fn write_record<W: Write>(out: &mut W, record: &Record) -> fmt::Result {
    writeln!(out, "[{}] {}: {}", record.level(), record.target(), record.args())
}

impl Log for DebugconLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = write_record(&mut PortSink, record);
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn records_are_single_tagged_lines() {
        let mut out = String::new();
        let record = Record::builder()
            .level(Level::Warn)
            .target("xen::gnttab")
            .args(format_args!("grant 9 still in use"))
            .build();
        write_record(&mut out, &record).expect("string sink");
        assert_eq!(out, "[WARN] xen::gnttab: grant 9 still in use\n");
    }
}
