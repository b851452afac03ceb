//! Membership listener
//!
//! Applies published membership models to the registry. Providers never
//! touch the registry themselves; every membership-driven mutation flows
//! through this one subscriber.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::Registry;
use crate::bus::MembershipBus;
use crate::error::Result;
use crate::membership::{MemberIdentity, MembershipModel};
use crate::runtime::ShutdownSignal;
use crate::transport::{PeerConnector, WorkerHandle};

/// Bridges membership snapshots onto registry state
pub struct MembershipListener {
    registry: Arc<Registry>,
    connector: Arc<dyn PeerConnector>,
    local_name: String,
    /// peers this listener dialed, as opposed to dial-back registrations
    managed: HashSet<String>,
}

impl MembershipListener {
    pub fn new(
        registry: Arc<Registry>,
        connector: Arc<dyn PeerConnector>,
        local_name: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            connector,
            local_name: local_name.into(),
            managed: HashSet::new(),
        }
    }

    /// Consume models from the bus until shutdown or bus close
    pub fn spawn(mut self, bus: &MembershipBus, shutdown: &ShutdownSignal) -> JoinHandle<()> {
        let mut updates = bus.subscribe();
        let mut shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    update = updates.recv() => match update {
                        Ok(model) => self.apply(model).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Membership listener lagged, skipped {} models", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            info!("Membership listener stopped");
        })
    }

    /// Apply one snapshot: placement first, then the leader statement,
    /// then the peer diff.
    async fn apply(&mut self, model: MembershipModel) {
        debug!(
            "Applying membership model: member {} of {}",
            model.member_number, model.total_members
        );
        self.registry
            .set_info(model.member_number, model.total_members)
            .await;

        match model.leader.as_deref() {
            Some(name) if name == self.local_name => self.become_leader().await,
            Some(name) => self.follow_leader(name, &model).await,
            // providers without elections make no leader statement
            None => {}
        }

        self.sync_peers(&model).await;
    }

    async fn become_leader(&self) {
        // a leader follows no one
        self.registry.remove_leader().await;
        self.registry.be_leader().await;
    }

    async fn follow_leader(&mut self, leader: &str, model: &MembershipModel) {
        if self.registry.is_leader().await {
            // stepping down releases the followers this node was driving
            self.registry.remove_all().await;
            self.managed.clear();
        }
        self.registry.dont_be_leader().await;

        if self.registry.leader_name().await.as_deref() == Some(leader) {
            return;
        }

        let Some(member) = model.members.iter().find(|m| m.name == leader) else {
            warn!("Leader {} not present in membership model", leader);
            return;
        };

        match self.connect_and_register(member).await {
            Ok(handle) => {
                self.registry.remove_leader().await;
                self.registry.assign_leader(leader, handle).await;
            }
            Err(err) => {
                // keep whatever leader we had; the health check keeps probing it
                warn!("Could not reach new leader {}: {}", leader, err);
            }
        }
    }

    /// Dial the leader and introduce ourselves so it adds us as a follower
    async fn connect_and_register(&self, member: &MemberIdentity) -> Result<Arc<dyn WorkerHandle>> {
        let handle = self.connector.connect(member).await?;
        handle.register().await?;
        Ok(handle)
    }

    /// Reconcile dialed peers with the model's addressable members. The
    /// model's leader is excluded; the leader entry already tracks it.
    async fn sync_peers(&mut self, model: &MembershipModel) {
        let desired: HashMap<&str, &MemberIdentity> = model
            .members
            .iter()
            .filter(|m| {
                m.name != self.local_name
                    && Some(m.name.as_str()) != model.leader.as_deref()
                    && m.address.is_some()
            })
            .map(|m| (m.name.as_str(), m))
            .collect();

        let vanished: Vec<String> = self
            .managed
            .iter()
            .filter(|name| !desired.contains_key(name.as_str()))
            .cloned()
            .collect();
        for name in vanished {
            self.registry.remove(&name).await;
            self.managed.remove(&name);
        }

        let current: HashSet<String> = self.registry.get_all().await.into_iter().collect();
        for (name, member) in desired {
            if self.managed.contains(name) {
                continue;
            }
            if current.contains(name) {
                // a dial-back registration beat us to it; adopt the entry
                self.managed.insert(name.to_string());
                continue;
            }
            match self.connector.connect(member).await {
                Ok(handle) => {
                    self.registry.add(name, handle).await;
                    self.managed.insert(name.to_string());
                }
                Err(err) => warn!("Could not connect to member {}: {}", name, err),
            }
        }
    }
}
