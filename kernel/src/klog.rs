//! Kernel logging backend
//!
//! Routes the `log` facade to the COM1 serial sink, stamped with the
//! timer's uptime. Installed once during boot; host test builds leave
//! the facade uninstalled (the macros become no-ops).

use log::{LevelFilter, Log, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        #[cfg(target_arch = "x86")]
        crate::arch::x86::serial::write_fmt(format_args!(
            "[{:>6}.{:02}] {:>5} {}: {}\n",
            crate::timer::uptime_ms() / 1000,
            (crate::timer::uptime_ms() % 1000) / 10,
            record.level(),
            record.target(),
            record.args(),
        ));
        #[cfg(not(target_arch = "x86"))]
        let _ = record;
    }

    fn flush(&self) {}
}

/// Install the logger at the given filter level.
pub fn init(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
