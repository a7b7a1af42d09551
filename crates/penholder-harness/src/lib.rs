//! Deterministic simulation harness.
//!
//! ```text
//! penholder-harness
//!   ├─ SimEnv / ManualEnv   (tokio-virtual and hand-advanced clocks)
//!   ├─ SimNetwork           (seeded loss, duplication, link interleaving)
//!   ├─ SimWorld             (coordinators wired through a SimNetwork)
//!   └─ model                (reference session for property tests)
//! ```
//!
//! Two levels of simulation are covered. [`SimWorld`] drives sans-IO
//! coordinators directly and is fully deterministic for a given seed.
//! Whole node drivers are exercised over simulated TCP with `turmoil` and
//! [`SimEnv`] in the integration tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
mod sim_env;
mod sim_network;
mod sim_world;

pub use model::{ModelWorld, Operation, OperationResult, PeerView};
pub use sim_env::{ManualEnv, SimEnv};
pub use sim_network::{FaultConfig, NetworkStats, SimNetwork};
pub use sim_world::{SimWorld, Topology};
