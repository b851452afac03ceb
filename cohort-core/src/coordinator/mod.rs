//! Coordination core
//!
//! Registry of remote peers, placement info plumbing, and the listener
//! that applies membership snapshots to the registry.

pub mod info;
pub mod listener;
pub mod registry;

pub use info::{InfoHandler, InfoModel, LoggingInfoHandler};
pub use listener::MembershipListener;
pub use registry::{Registry, RegistryConfig};

use std::str::FromStr;

use crate::error::CohortError;
use crate::DEFAULT_RPC_PORT;

/// How group leadership is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionKind {
    /// Leadership follows the platform-orchestrator feed
    Orchestrator,
}

impl FromStr for ElectionKind {
    type Err = CohortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "orchestrator" => Ok(ElectionKind::Orchestrator),
            other => Err(CohortError::InvalidConfig {
                reason: format!("unknown election kind {other}"),
            }),
        }
    }
}

/// Configuration for leader election
#[derive(Debug, Clone)]
pub struct LeaderElectionConfig {
    /// Whether this node campaigns for group leadership
    pub enabled: bool,
    /// Election backend
    pub kind: ElectionKind,
    /// Port the peer RPC server listens on
    pub rpc_port: u16,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: ElectionKind::Orchestrator,
            rpc_port: DEFAULT_RPC_PORT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_election_kind_from_str() {
        assert_eq!(
            "orchestrator".parse::<ElectionKind>().unwrap(),
            ElectionKind::Orchestrator
        );
        assert!("raft".parse::<ElectionKind>().is_err());
    }

    #[test]
    fn test_election_defaults_are_off() {
        let config = LeaderElectionConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.rpc_port, 8081);
    }
}
