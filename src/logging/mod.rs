//! Logging infrastructure for structured console and file output.

mod logger;
mod subscriber;
mod types;
mod utils;

pub use logger::Logger;
pub use subscriber::init_subscriber;
pub use types::{ActionEntry, ActionStatus, Log};

/// Serializes `XDG_CACHE_HOME` manipulation across parallel test threads.
#[cfg(test)]
pub(crate) static TEST_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Logger with no backing file and no subscriber requirement.
///
/// Display output is discarded unless a dispatcher is installed; recorded
/// actions remain available per instance for assertions.
#[cfg(test)]
pub(crate) fn isolated_logger() -> Logger {
    Logger::isolated()
}
