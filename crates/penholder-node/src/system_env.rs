//! Production `Environment` backed by the system clock and tokio timers.

use std::time::Duration;

use penholder_core::Environment;

/// Production environment using system time.
///
/// - `now()` is `std::time::Instant::now()`
/// - `sleep()` is `tokio::time::sleep()`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> std::time::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
