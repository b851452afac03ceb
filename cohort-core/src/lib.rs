//! Cohort Core - Cluster coordination for partitioned change-stream consumers
//!
//! This crate provides the coordination layer for a group of workers that
//! jointly consume a partitioned change stream:
//! - Membership change propagation
//! - Leader and follower health checking
//! - Periodic ordinal rebalancing
//! - Peer-to-peer coordination transport

pub mod bus;
pub mod coordinator;
pub mod error;
pub mod membership;
pub mod metrics;
pub mod runtime;
pub mod transport;

pub use bus::{EventBus, MembershipBus, MEMBERSHIP_CHANGED_TOPIC};
pub use coordinator::{InfoHandler, InfoModel, Registry};
pub use error::{CohortError, Result};
pub use membership::{MemberIdentity, Membership, MembershipModel};
pub use transport::WorkerHandle;

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Default health-check interval in seconds
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 10;

/// Default rebalance interval in seconds
pub const DEFAULT_REBALANCE_INTERVAL_SECS: u64 = 10;

/// Default membership heartbeat interval in seconds
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// Default coordination RPC port
pub const DEFAULT_RPC_PORT: u16 = 8081;
