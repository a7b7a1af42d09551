//! Reference model of a session for model-based testing.
//!
//! [`ModelWorld`] is the obviously-correct version: one shared session value
//! that every operation updates in place. Property tests run the same random
//! [`Operation`] sequence against the model and against coordinators on a
//! simulated network, settling the network after each step, then compare
//! results and what every peer shows.

mod operation;
mod world;

pub use operation::{NAMES, NameChoice, Operation, OperationError, OperationResult, PeerIndex};
pub use world::{HOST_NAME, ModelWorld, PeerView};
