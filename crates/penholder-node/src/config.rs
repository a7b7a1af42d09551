//! Runtime configuration for the node binary.

use std::{path::PathBuf, time::Duration};

use penholder_core::{CoordinatorConfig, EnforcementConfig};
use penholder_lockfile::LockWatcherConfig;

/// How this node takes part in the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRole {
    /// Listen for guests and host the session.
    Host {
        /// Address to bind to (e.g., "0.0.0.0:7420")
        bind: String,
    },
    /// Connect to a host and join its session.
    Join {
        /// Host address (e.g., "10.0.0.5:7420")
        address: String,
    },
}

/// Configuration for a networked session node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Display name of the local user.
    pub username: String,
    /// Host or guest.
    pub role: NodeRole,
    /// Coordinator timeouts.
    pub coordinator: CoordinatorConfig,
    /// Violation handling.
    pub enforcement: EnforcementConfig,
    /// How often the driver ticks the coordinator when otherwise idle.
    pub tick_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            role: NodeRole::Host { bind: "0.0.0.0:7420".to_string() },
            coordinator: CoordinatorConfig::default(),
            enforcement: EnforcementConfig::default(),
            tick_interval: Duration::from_millis(250),
        }
    }
}

/// Configuration for the shared-lock-file variant.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Display name of the local user.
    pub username: String,
    /// Directory the participants share. The lock lives under it.
    pub root: PathBuf,
    /// Lock file polling.
    pub watcher: LockWatcherConfig,
    /// Violation handling.
    pub enforcement: EnforcementConfig,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            root: PathBuf::from("."),
            watcher: LockWatcherConfig::default(),
            enforcement: EnforcementConfig::default(),
        }
    }
}
