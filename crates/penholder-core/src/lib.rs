//! Session membership and write-token coordination.
//!
//! This crate holds the protocol logic, free of I/O:
//!
//! ```text
//! penholder-core
//!   ├─ Environment        (time abstraction)
//!   ├─ SessionState       (replicated state, idempotent apply)
//!   ├─ Relay              (HostRelay / MeshRelay broadcast strategies)
//!   ├─ Coordinator        (host/join/give/request/force/leave/end)
//!   └─ Enforcer           (violation detection, warning throttle)
//! ```
//!
//! Drivers feed transport events and user commands into the [`Coordinator`]
//! and execute the [`CoordinatorAction`]s it returns.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod coordinator;
pub mod enforce;
pub mod env;
pub mod error;
pub mod relay;
pub mod state;

pub use coordinator::{
    CloseReason, Coordinator, CoordinatorAction, CoordinatorConfig, NoticeLevel, PromptOutcome,
};
pub use enforce::{
    AttributionStrategy, ContentChange, EnforcementConfig, EnforcementContext,
    EnforcementStrategy, Enforcer, Judgement, SaveIntent, SaveVerdict, Verdict, WarningThrottle,
};
pub use env::Environment;
pub use error::{CoordinatorError, RelayError};
pub use relay::{HostRelay, MeshRelay, Relay, RelayAction, Role};
pub use state::{Applied, SessionEvent, SessionState};
