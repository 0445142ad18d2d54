//! A tiny internal event logger, modeled on rayon-core's `log` module.
//!
//! Unlike application-facing logging (an external collaborator's job,
//! not this crate's), this is scheduler telemetry for understanding
//! *this crate's* behavior: which worker ran
//! what, when a task migrated, when a worker parked. With the
//! `internal-log` feature off (the default), `Logger::log` compiles down
//! to nothing but the cost of calling the closure's discriminant through
//! a never-taken branch; the test suite turns the feature on to assert on
//! scheduling order without instrumenting the code under test.

#[derive(Debug, Clone)]
pub(crate) enum Event {
    TaskCreated { pool: usize },
    TaskScheduled { worker: usize, task: usize },
    TaskMigrated { task: usize, from: usize, to: usize },
    TaskCompleted { task: usize },
    WorkerParked { pool: usize, worker: usize },
    WorkerWoken { pool: usize, worker: usize },
    WorkerStopped { pool: usize, worker: usize },
}

/// The process-wide event log. A single instance is shared by every task
/// and pool so tests can observe cross-pool ordering in one place, the
/// same way rayon-core's registries all log through one static `Logger`.
pub(crate) fn logger() -> &'static Logger {
    static LOGGER: std::sync::OnceLock<Logger> = std::sync::OnceLock::new();
    LOGGER.get_or_init(Logger::new)
}

#[cfg(feature = "internal-log")]
pub(crate) struct Logger {
    events: std::sync::Mutex<Vec<Event>>,
}

#[cfg(feature = "internal-log")]
impl Logger {
    pub(crate) fn new() -> Self {
        Logger {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    #[inline]
    pub(crate) fn log(&self, event: impl FnOnce() -> Event) {
        self.events.lock().unwrap().push(event());
    }

    #[cfg(test)]
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(not(feature = "internal-log"))]
pub(crate) struct Logger;

#[cfg(not(feature = "internal-log"))]
impl Logger {
    pub(crate) fn new() -> Self {
        Logger
    }

    #[inline(always)]
    pub(crate) fn log(&self, _event: impl FnOnce() -> Event) {}
}
