//! Simulated environments.
//!
//! Two clocks for two kinds of simulation:
//!
//! - [`SimEnv`] reads tokio's clock. Inside a turmoil simulation that clock is
//!   virtual, so node drivers running on simulated TCP see simulated time.
//! - [`ManualEnv`] only moves when told to. [`SimWorld`](crate::SimWorld)
//!   steps coordinators by hand and uses it to expire joins on demand.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use penholder_core::Environment;

/// Environment on tokio's (possibly simulated) clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimEnv;

impl SimEnv {
    /// Create a new simulated environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Hand-advanced clock shared by every clone.
///
/// `sleep` advances the clock instead of waiting, so code that sleeps in a
/// loop still makes progress under a synchronous test.
#[derive(Debug, Clone)]
pub struct ManualEnv {
    now: Arc<Mutex<Instant>>,
}

impl ManualEnv {
    /// Start a clock at the current wall time.
    pub fn new() -> Self {
        Self { now: Arc::new(Mutex::new(Instant::now())) }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }
}

impl Default for ManualEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for ManualEnv {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }
}
