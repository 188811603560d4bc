//! Shared helpers for the integration tests.

use log::{Level, LevelFilter, Log, Metadata, Record};
use std::sync::{Arc, Mutex, Once};

use render_mutex::{Executor, RenderMutex, ThreadExecutor};

/// A `log` backend that keeps warnings in memory so tests can assert
/// on the lock's skip-and-warn behavior.
struct CaptureLogger {
    records: Mutex<Vec<String>>,
}

impl Log for CaptureLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Warn
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.records
                .lock()
                .unwrap()
                .push(record.args().to_string());
        }
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger {
    records: Mutex::new(Vec::new()),
};

/// Installs the capture logger. Safe to call from every test; only
/// the first call does anything.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        log::set_logger(&LOGGER).unwrap();
        log::set_max_level(LevelFilter::Warn);
    });
}

/// All warnings captured so far, across the whole test binary.
pub fn warnings() -> Vec<String> {
    LOGGER.records.lock().unwrap().clone()
}

/// A mutex wired to a fresh main queue, plus the queue itself.
pub fn mutex_with_main_queue() -> (Arc<RenderMutex>, Arc<ThreadExecutor>) {
    init_logging();
    let main_queue = Arc::new(ThreadExecutor::new("main"));
    let mutex = Arc::new(RenderMutex::new(
        Arc::clone(&main_queue) as Arc<dyn Executor>,
        None,
    ));
    (mutex, main_queue)
}
