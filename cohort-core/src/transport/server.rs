//! Peer server
//!
//! Serves the inbound half of the worker-handle contract over framed TCP:
//! answers pings, dials registering members back and adds them to the
//! registry, applies pushed placements, and prunes the caller's entry when
//! its connection ends.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::message::{read_frame, write_frame, PeerRequest, PeerResponse};
use super::PeerConnector;
use crate::coordinator::Registry;
use crate::error::{CohortError, Result};
use crate::membership::MemberIdentity;
use crate::runtime::ShutdownSignal;

/// Configuration for the peer server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", crate::DEFAULT_RPC_PORT),
        }
    }
}

/// Framed-TCP server peers register against
pub struct PeerServer {
    registry: Arc<Registry>,
    connector: Arc<dyn PeerConnector>,
}

impl PeerServer {
    pub fn new(registry: Arc<Registry>, connector: Arc<dyn PeerConnector>) -> Self {
        Self {
            registry,
            connector,
        }
    }

    /// Bind and serve until `shutdown` fires. Returns the bound address and
    /// the accept-loop handle.
    pub async fn serve(
        self,
        config: &ServerConfig,
        shutdown: &ShutdownSignal,
    ) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(&config.bind_addr).await.map_err(|e| {
            CohortError::ConnectionFailed {
                endpoint: config.bind_addr.clone(),
                reason: e.to_string(),
            }
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| CohortError::ConnectionFailed {
                endpoint: config.bind_addr.clone(),
                reason: e.to_string(),
            })?;
        info!("Peer server listening on {}", local_addr);

        let server = Arc::new(self);
        let mut accept_shutdown = shutdown.subscribe();
        let conn_signal = shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_shutdown.recv() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer_addr)) => {
                            debug!("Peer connection from {}", peer_addr);
                            let server = server.clone();
                            let mut shutdown = conn_signal.subscribe();
                            tokio::spawn(async move {
                                tokio::select! {
                                    _ = shutdown.recv() => {}
                                    _ = server.handle_connection(stream, peer_addr) => {}
                                }
                            });
                        }
                        Err(e) => error!("Accept failed: {}", e),
                    }
                }
            }
            info!("Peer server stopped");
        });

        Ok((local_addr, handle))
    }

    /// Serve one connection until close, EOF, or a protocol violation
    async fn handle_connection(&self, mut stream: TcpStream, peer_addr: SocketAddr) {
        let peer = peer_addr.to_string();
        let mut registered: Option<String> = None;

        loop {
            let request = match read_frame::<_, PeerRequest>(&mut stream, &peer).await {
                Ok(Some(request)) => request,
                // clean close at a frame boundary
                Ok(None) => break,
                Err(err) if err.is_protocol_violation() => {
                    warn!("Dropping peer {}: {}", peer, err);
                    break;
                }
                Err(err) => {
                    debug!("Peer {} read failed: {}", peer, err);
                    break;
                }
            };

            let (response, done) = self.dispatch(request, &peer, &mut registered).await;
            if let Err(err) = write_frame(&mut stream, &peer, &response).await {
                debug!("Peer {} write failed: {}", peer, err);
                break;
            }
            if done {
                break;
            }
        }

        if let Some(name) = registered {
            self.registry.remove(&name).await;
        }
    }

    async fn dispatch(
        &self,
        request: PeerRequest,
        peer: &str,
        registered: &mut Option<String>,
    ) -> (PeerResponse, bool) {
        match request {
            PeerRequest::Ping => (PeerResponse::Ok, false),
            PeerRequest::Register { member } => match self.register(member).await {
                Ok(name) => {
                    if let Some(old) = registered.take() {
                        if old != name {
                            self.registry.remove(&old).await;
                        }
                    }
                    info!("Peer {} registered as {}", peer, name);
                    *registered = Some(name);
                    (PeerResponse::Ok, false)
                }
                Err(err) => {
                    warn!("Register from {} rejected: {}", peer, err);
                    (
                        PeerResponse::Error {
                            message: err.to_string(),
                        },
                        false,
                    )
                }
            },
            PeerRequest::Rebalance {
                member_number,
                total_members,
            } => {
                self.registry.set_info(member_number, total_members).await;
                (PeerResponse::Ok, false)
            }
            PeerRequest::Close => (PeerResponse::Ok, true),
        }
    }

    /// Dial the registering member back and track it as a follower
    async fn register(&self, member: MemberIdentity) -> Result<String> {
        if member.address.is_none() {
            return Err(CohortError::InvalidMessage {
                reason: format!("member {} has no dial-back address", member.name),
            });
        }
        let handle = self.connector.connect(&member).await?;
        self.registry.add(member.name.clone(), handle).await;
        Ok(member.name)
    }
}
