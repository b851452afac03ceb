//! Cluster membership providers
//!
//! A membership provider answers "who belongs to the group" and publishes
//! membership snapshots on the change bus. Variants cover static
//! configuration, a platform-orchestrator watch feed, and a shared
//! coordination store with heartbeats. Providers never touch the registry
//! directly; the registry's listener subscribes to the bus on its own.

pub mod fixed;
pub mod orchestrator;
pub mod store;

pub use fixed::FixedMembership;
pub use orchestrator::OrchestratorMembership;
pub use store::{CoordinationStore, InstanceDocument, MemoryCoordinationStore, StoreMembership};

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{CohortError, Result};
use crate::DEFAULT_HEARTBEAT_INTERVAL_SECS;

/// Identity of one group member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberIdentity {
    /// Unique member name
    pub name: String,
    /// Coordination RPC address, when the backend knows it
    pub address: Option<SocketAddr>,
}

impl MemberIdentity {
    /// Identity without a dialable address
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
        }
    }

    /// Attach a coordination RPC address
    pub fn with_address(mut self, address: SocketAddr) -> Self {
        self.address = Some(address);
        self
    }
}

/// Point-in-time membership snapshot.
///
/// Published on the change bus and never mutated afterward; consumers
/// detect staleness only by replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipModel {
    /// Every known member, including the local node
    pub members: Vec<MemberIdentity>,
    /// Name of the current leader, when the backend elects one
    pub leader: Option<String>,
    /// Ordinal of the local node, 1-based
    pub member_number: u32,
    /// Size of the group
    pub total_members: u32,
    /// How long consumers should damp re-partitioning after a change
    pub rebalance_delay: Duration,
}

impl Default for MembershipModel {
    fn default() -> Self {
        Self {
            members: Vec::new(),
            leader: None,
            member_number: 1,
            total_members: 1,
            rebalance_delay: Duration::ZERO,
        }
    }
}

/// Membership backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipKind {
    /// Static member number and total from configuration
    Fixed,
    /// Platform-orchestrator watch feed
    Orchestrator,
    /// Shared coordination store with heartbeats
    Store,
}

impl FromStr for MembershipKind {
    type Err = CohortError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" | "static" => Ok(Self::Fixed),
            "orchestrator" => Ok(Self::Orchestrator),
            "store" => Ok(Self::Store),
            other => Err(CohortError::InvalidConfig {
                reason: format!("unknown membership kind: {other}"),
            }),
        }
    }
}

/// Configuration for membership backends
#[derive(Debug, Clone)]
pub struct MembershipConfig {
    /// Backend kind
    pub kind: MembershipKind,
    /// Static member number (fixed backend)
    pub member_number: u32,
    /// Static total members (fixed backend)
    pub total_members: u32,
    /// Re-partition damping hint carried in published models
    pub rebalance_delay: Duration,
    /// Store backend: how often this instance re-announces itself
    pub heartbeat_interval: Duration,
    /// Store backend: heartbeats older than this mark an instance dead
    pub heartbeat_tolerance: Duration,
    /// Store backend: how often the live set is re-evaluated
    pub monitor_interval: Duration,
    /// Store backend: store-side document expiry
    pub expiry: Duration,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        let heartbeat_interval = Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS);
        Self {
            kind: MembershipKind::Store,
            member_number: 1,
            total_members: 1,
            rebalance_delay: Duration::from_secs(30),
            heartbeat_interval,
            // a member survives missing five heartbeats before it is dropped
            heartbeat_tolerance: heartbeat_interval * 6,
            monitor_interval: Duration::from_secs(20),
            expiry: Duration::from_secs(120),
        }
    }
}

impl MembershipConfig {
    /// Validate invariants before a backend is built
    pub fn validate(&self) -> Result<()> {
        if self.total_members == 0 {
            return Err(CohortError::InvalidConfig {
                reason: "total_members must be at least 1".into(),
            });
        }
        if self.member_number == 0 || self.member_number > self.total_members {
            return Err(CohortError::InvalidConfig {
                reason: format!(
                    "member_number {} must be within 1..={}",
                    self.member_number, self.total_members
                ),
            });
        }
        if self.heartbeat_interval.is_zero() {
            return Err(CohortError::InvalidConfig {
                reason: "heartbeat_interval must be non-zero".into(),
            });
        }
        if self.heartbeat_tolerance <= self.heartbeat_interval {
            return Err(CohortError::InvalidConfig {
                reason: "heartbeat_tolerance must exceed heartbeat_interval".into(),
            });
        }
        Ok(())
    }
}

/// Membership provider, selected once at startup
pub enum Membership {
    /// Static configuration, no dynamic change
    Fixed(FixedMembership),
    /// Platform-orchestrator watch feed
    Orchestrator(OrchestratorMembership),
    /// Shared coordination store with heartbeats
    Store(StoreMembership),
}

impl Membership {
    /// Current membership model; awaits the first known model
    pub async fn get_info(&self) -> Result<MembershipModel> {
        match self {
            Membership::Fixed(m) => m.get_info().await,
            Membership::Orchestrator(m) => m.get_info().await,
            Membership::Store(m) => m.get_info().await,
        }
    }

    /// Stop background tasks and leave the group. Idempotent.
    pub async fn close(&self) {
        match self {
            Membership::Fixed(m) => m.close().await,
            Membership::Orchestrator(m) => m.close().await,
            Membership::Store(m) => m.close().await,
        }
    }

    /// Backend kind of this provider
    pub fn kind(&self) -> MembershipKind {
        match self {
            Membership::Fixed(_) => MembershipKind::Fixed,
            Membership::Orchestrator(_) => MembershipKind::Orchestrator,
            Membership::Store(_) => MembershipKind::Store,
        }
    }
}

/// Wait on a cached-model watch until a model is present.
pub(crate) async fn await_model(
    latest: &watch::Receiver<Option<MembershipModel>>,
) -> Result<MembershipModel> {
    let mut latest = latest.clone();
    loop {
        if let Some(model) = latest.borrow_and_update().clone() {
            return Ok(model);
        }
        latest
            .changed()
            .await
            .map_err(|_| CohortError::MembershipClosed)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_str() {
        assert_eq!("fixed".parse::<MembershipKind>().unwrap(), MembershipKind::Fixed);
        assert_eq!("static".parse::<MembershipKind>().unwrap(), MembershipKind::Fixed);
        assert_eq!(
            "Orchestrator".parse::<MembershipKind>().unwrap(),
            MembershipKind::Orchestrator
        );
        assert_eq!("store".parse::<MembershipKind>().unwrap(), MembershipKind::Store);
        assert!("zookeeper".parse::<MembershipKind>().is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config = MembershipConfig::default();
        assert_eq!(config.kind, MembershipKind::Store);
        assert_eq!(config.member_number, 1);
        assert_eq!(config.total_members, 1);
        assert_eq!(config.rebalance_delay, Duration::from_secs(30));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.heartbeat_tolerance, Duration::from_secs(60));
        assert_eq!(config.expiry, Duration::from_secs(120));
        config.validate().unwrap();
    }

    #[test]
    fn test_config_validation() {
        let mut config = MembershipConfig::default();
        config.total_members = 0;
        assert!(config.validate().is_err());

        let mut config = MembershipConfig::default();
        config.member_number = 3;
        config.total_members = 2;
        assert!(config.validate().is_err());

        let mut config = MembershipConfig::default();
        config.heartbeat_tolerance = config.heartbeat_interval;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_model_equality_is_structural() {
        let a = MembershipModel {
            members: vec![MemberIdentity::new("a")],
            member_number: 1,
            total_members: 2,
            ..MembershipModel::default()
        };
        let mut b = a.clone();
        assert_eq!(a, b);

        b.total_members = 3;
        assert_ne!(a, b);
    }
}
