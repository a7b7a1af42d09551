//! Single-machine variant: write-token coordination through a shared file.
//!
//! Instead of a relayed event stream, every participant reads and rewrites
//! one JSON record at a well-known path:
//!
//! ```text
//! <root>/.penholder/lock.json
//!   { "owner": "alice", "users": ["alice", "bob"], "requests": ["bob"] }
//! ```
//!
//! Enforcement is symmetric ([`LockFileStrategy`]): each peer checks whether
//! it holds the lock before accepting its own edits. That is strictly
//! stronger than transport attribution, at the price of needing a shared
//! filesystem. Concurrent read-modify-write cycles are not locked; the
//! [`LockWatcher`] only makes the outcome visible.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod record;
mod session;
mod store;
mod strategy;
mod watcher;

pub use error::LockError;
pub use record::LockRecord;
pub use session::LockSession;
pub use store::{LOCK_DIR, LOCK_FILE, LockFile};
pub use strategy::LockFileStrategy;
pub use watcher::{LockChange, LockWatcher, LockWatcherConfig};
