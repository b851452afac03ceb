//! Peer client
//!
//! TCP client for one remote member. One request is in flight at a time;
//! the connection is dropped on any transport error and stays down until
//! `reconnect` succeeds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::message::{read_frame, write_frame, PeerRequest, PeerResponse};
use super::{PeerConnector, WorkerHandle};
use crate::error::{CohortError, Result};
use crate::membership::MemberIdentity;

/// Configuration for a peer client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Peer address
    pub address: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Request timeout
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8081".into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Connection to one remote member
pub struct PeerClient {
    config: ClientConfig,
    /// Local identity, announced on register so the peer can dial back
    identity: MemberIdentity,
    conn: Mutex<Option<TcpStream>>,
}

impl PeerClient {
    /// Create a client without connecting
    pub fn new(config: ClientConfig, identity: MemberIdentity) -> Self {
        Self {
            config,
            identity,
            conn: Mutex::new(None),
        }
    }

    /// Connect to the peer and return a ready client
    pub async fn connect(config: ClientConfig, identity: MemberIdentity) -> Result<Self> {
        let client = Self::new(config, identity);
        let stream = client.dial().await?;
        *client.conn.lock().await = Some(stream);
        Ok(client)
    }

    async fn dial(&self) -> Result<TcpStream> {
        let connect = TcpStream::connect(&self.config.address);
        match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(CohortError::ConnectionFailed {
                endpoint: self.config.address.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(CohortError::ConnectionFailed {
                endpoint: self.config.address.clone(),
                reason: "connect timed out".into(),
            }),
        }
    }

    /// One request/response exchange. Drops the connection on failure.
    async fn call(&self, request: PeerRequest) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Err(CohortError::TransportFailure {
                peer: self.config.address.clone(),
                message: "not connected".into(),
            });
        };

        let exchange = async {
            write_frame(stream, &self.config.address, &request).await?;
            read_frame::<_, PeerResponse>(stream, &self.config.address).await
        };
        let response = match tokio::time::timeout(self.config.request_timeout, exchange).await {
            Ok(Ok(Some(response))) => response,
            Ok(Ok(None)) => {
                *guard = None;
                return Err(CohortError::TransportFailure {
                    peer: self.config.address.clone(),
                    message: "connection closed by peer".into(),
                });
            }
            Ok(Err(e)) => {
                *guard = None;
                return Err(e);
            }
            Err(_) => {
                *guard = None;
                return Err(CohortError::TransportFailure {
                    peer: self.config.address.clone(),
                    message: "request timed out".into(),
                });
            }
        };

        match response {
            PeerResponse::Ok => Ok(()),
            PeerResponse::Error { message } => Err(CohortError::TransportFailure {
                peer: self.config.address.clone(),
                message,
            }),
        }
    }
}

#[async_trait]
impl WorkerHandle for PeerClient {
    async fn ping(&self) -> Result<()> {
        debug!("Pinging peer at {}", self.config.address);
        self.call(PeerRequest::Ping).await
    }

    async fn reconnect(&self) -> Result<()> {
        info!("Connecting to peer at {}", self.config.address);
        let stream = self.dial().await?;
        *self.conn.lock().await = Some(stream);
        Ok(())
    }

    async fn register(&self) -> Result<()> {
        self.call(PeerRequest::Register {
            member: self.identity.clone(),
        })
        .await
    }

    async fn rebalance(&self, member_number: u32, total_members: u32) -> Result<()> {
        self.call(PeerRequest::Rebalance {
            member_number,
            total_members,
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let Some(mut stream) = guard.take() else {
            return Ok(());
        };

        // goodbye is best effort, the socket is going away either way
        let sent = write_frame(&mut stream, &self.config.address, &PeerRequest::Close).await;
        let _ = stream.shutdown().await;
        sent.map_err(|e| CohortError::CloseFailure {
            peer: self.config.address.clone(),
            message: e.to_string(),
        })
    }
}

/// Connector that dials members over TCP
pub struct TcpPeerConnector {
    local: MemberIdentity,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl TcpPeerConnector {
    pub fn new(local: MemberIdentity) -> Self {
        let defaults = ClientConfig::default();
        Self {
            local,
            connect_timeout: defaults.connect_timeout,
            request_timeout: defaults.request_timeout,
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }
}

#[async_trait]
impl PeerConnector for TcpPeerConnector {
    async fn connect(&self, member: &MemberIdentity) -> Result<Arc<dyn WorkerHandle>> {
        let address = member.address.ok_or_else(|| CohortError::ConnectionFailed {
            endpoint: member.name.clone(),
            reason: "member has no address".into(),
        })?;

        let config = ClientConfig {
            address: address.to_string(),
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
        };
        let client = PeerClient::connect(config, self.local.clone()).await?;
        Ok(Arc::new(client))
    }
}
