//! Peer transport
//!
//! Length-prefixed TCP protocol between group members. The registry only
//! sees the `WorkerHandle` trait, so tests swap the wire out for fakes.

pub mod client;
pub mod message;
pub mod server;

pub use client::{ClientConfig, PeerClient, TcpPeerConnector};
pub use message::{PeerRequest, PeerResponse, MAX_FRAME_LEN};
pub use server::{PeerServer, ServerConfig};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::membership::MemberIdentity;

/// Remote peer as the registry sees it
#[async_trait]
pub trait WorkerHandle: Send + Sync {
    /// Liveness probe
    async fn ping(&self) -> Result<()>;

    /// Re-establish the underlying connection
    async fn reconnect(&self) -> Result<()>;

    /// Introduce the local member to the peer
    async fn register(&self) -> Result<()>;

    /// Push a placement to the peer
    async fn rebalance(&self, member_number: u32, total_members: u32) -> Result<()>;

    /// Release the connection. Must be idempotent.
    async fn close(&self) -> Result<()>;
}

/// Dials peers on behalf of the membership listener
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, member: &MemberIdentity) -> Result<Arc<dyn WorkerHandle>>;
}
