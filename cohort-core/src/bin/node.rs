//! Coordination node binary

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use cohort_core::bus::MembershipBus;
use cohort_core::coordinator::{
    LeaderElectionConfig, LoggingInfoHandler, MembershipListener, Registry, RegistryConfig,
};
use cohort_core::membership::{
    FixedMembership, MemberIdentity, Membership, MembershipConfig, MembershipKind,
    MemoryCoordinationStore, StoreMembership,
};
use cohort_core::runtime::ShutdownSignal;
use cohort_core::transport::{PeerServer, ServerConfig, TcpPeerConnector};

/// Per-call timeout for the dial-back clients this node creates
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    info!("Starting Cohort node");

    let node_name = std::env::var("NODE_NAME")
        .unwrap_or_else(|_| format!("node-{}", uuid::Uuid::new_v4()));
    let bind_addr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| format!("0.0.0.0:{}", cohort_core::DEFAULT_RPC_PORT));
    let advertise_addr: SocketAddr = std::env::var("ADVERTISE_ADDR")
        .unwrap_or_else(|_| format!("127.0.0.1:{}", cohort_core::DEFAULT_RPC_PORT))
        .parse()?;

    let mut membership_config = MembershipConfig {
        kind: std::env::var("MEMBERSHIP")
            .unwrap_or_else(|_| "store".into())
            .parse()?,
        ..Default::default()
    };
    let member_number_override = std::env::var("MEMBER_NUMBER").ok();
    if let Some(value) = &member_number_override {
        membership_config.member_number = value.parse()?;
    }
    if let Ok(value) = std::env::var("TOTAL_MEMBERS") {
        membership_config.total_members = value.parse()?;
    }

    let election = LeaderElectionConfig {
        enabled: std::env::var("LEADER_ELECTION")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false),
        ..Default::default()
    };

    let shutdown = ShutdownSignal::new();
    let bus = MembershipBus::membership_changed();

    let local_identity = MemberIdentity::new(&node_name).with_address(advertise_addr);
    let connector = Arc::new(
        TcpPeerConnector::new(local_identity)
            .with_timeouts(HEALTH_CHECK_TIMEOUT, HEALTH_CHECK_TIMEOUT),
    );

    info!("Node {} using {:?} membership", node_name, membership_config.kind);
    let membership = match membership_config.kind {
        MembershipKind::Fixed => {
            // with no explicit ordinal, derive it from the node name suffix
            let fixed = if member_number_override.is_some() {
                FixedMembership::new(&node_name, &membership_config)?
            } else {
                FixedMembership::from_ordinal_name(
                    &node_name,
                    membership_config.total_members,
                    membership_config.rebalance_delay,
                )?
            };
            Membership::Fixed(fixed)
        }
        MembershipKind::Store => {
            let store = Arc::new(MemoryCoordinationStore::new(membership_config.expiry));
            Membership::Store(
                StoreMembership::start(&node_name, store, &membership_config, bus.clone())
                    .await?,
            )
        }
        MembershipKind::Orchestrator => {
            error!("Orchestrator membership needs an embedding integration to feed it");
            return Err("orchestrator membership is not runnable standalone".into());
        }
    };

    let registry = Arc::new(Registry::new(
        RegistryConfig::default(),
        Arc::new(LoggingInfoHandler),
    ));

    let listener = MembershipListener::new(registry.clone(), connector.clone(), &node_name);
    let listener_handle = listener.spawn(&bus, &shutdown);

    let server_config = ServerConfig {
        bind_addr: bind_addr.clone(),
    };
    let (server_addr, server_handle) = PeerServer::new(registry.clone(), connector)
        .serve(&server_config, &shutdown)
        .await?;
    info!("Node {} serving peers on {}", node_name, server_addr);

    // seed the placement before any rebalance can overwrite it
    let model = membership.get_info().await?;
    registry
        .set_info(model.member_number, model.total_members)
        .await;

    registry.start_health_check().await;
    if election.enabled {
        registry.start_rebalance().await;
        info!("Leader election enabled ({:?})", election.kind);
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    shutdown.shutdown();
    membership.close().await;
    registry.shutdown().await;
    let _ = listener_handle.await;
    let _ = server_handle.await;

    info!("Node stopped");
    Ok(())
}
