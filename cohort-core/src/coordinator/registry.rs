//! Peer registry
//!
//! Tracks the remote members this node talks to: at most one leader and any
//! number of followers, keyed by name. All operations and both periodic
//! loops serialize on one mutex, held across the awaits of a whole tick, so
//! a tick observes and mutates a consistent group.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::info::{InfoHandler, InfoModel};
use crate::error::{CohortError, Result};
use crate::metrics;
use crate::runtime::PeriodicTask;
use crate::transport::WorkerHandle;
use crate::{DEFAULT_HEALTH_CHECK_INTERVAL_SECS, DEFAULT_REBALANCE_INTERVAL_SECS};

/// Configuration for the registry loops
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How often every known peer is pinged
    pub health_check_interval: Duration,
    /// How often the leader pushes placements
    pub rebalance_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(DEFAULT_HEALTH_CHECK_INTERVAL_SECS),
            rebalance_interval: Duration::from_secs(DEFAULT_REBALANCE_INTERVAL_SECS),
        }
    }
}

#[derive(Clone)]
struct PeerEntry {
    name: String,
    handle: Arc<dyn WorkerHandle>,
}

struct RegistryState {
    peers: HashMap<String, PeerEntry>,
    leader: Option<PeerEntry>,
    am_i_leader: bool,
    info: Option<InfoModel>,
}

/// Registry of remote members
pub struct Registry {
    state: Mutex<RegistryState>,
    info_handler: Arc<dyn InfoHandler>,
    config: RegistryConfig,
    health_task: Mutex<Option<PeriodicTask>>,
    rebalance_task: Mutex<Option<PeriodicTask>>,
}

impl Registry {
    /// Create a registry that reports placement changes to `info_handler`
    pub fn new(config: RegistryConfig, info_handler: Arc<dyn InfoHandler>) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                peers: HashMap::new(),
                leader: None,
                am_i_leader: false,
                info: None,
            }),
            info_handler,
            config,
            health_task: Mutex::new(None),
            rebalance_task: Mutex::new(None),
        }
    }

    /// Register a follower under `name`, replacing and releasing any
    /// previous entry with that name
    pub async fn add(&self, name: impl Into<String>, handle: Arc<dyn WorkerHandle>) {
        let name = name.into();
        let mut state = self.state.lock().await;
        let entry = PeerEntry {
            name: name.clone(),
            handle,
        };
        if let Some(old) = state.peers.insert(name.clone(), entry) {
            debug!("Peer {} re-registered, releasing old handle", old.name);
            close_entry(&old).await;
        }
        metrics::standard::ACTIVE_PEERS.set(state.peers.len() as i64);
        info!("Registered peer {}", name);
    }

    /// Remove and release the follower `name`. No-op when absent.
    pub async fn remove(&self, name: &str) {
        let mut state = self.state.lock().await;
        match state.peers.remove(name) {
            Some(entry) => {
                close_entry(&entry).await;
                metrics::standard::PEERS_REMOVED.inc();
                metrics::standard::ACTIVE_PEERS.set(state.peers.len() as i64);
                info!("Removed peer {}", name);
            }
            None => debug!("Peer {} not registered, nothing to remove", name),
        }
    }

    /// Remove and release every follower
    pub async fn remove_all(&self) {
        let mut state = self.state.lock().await;
        self.remove_all_locked(&mut state).await;
    }

    /// Set the upstream leader this node follows, replacing any previous one
    pub async fn assign_leader(&self, name: impl Into<String>, handle: Arc<dyn WorkerHandle>) {
        let name = name.into();
        let mut state = self.state.lock().await;
        state.leader = Some(PeerEntry {
            name: name.clone(),
            handle,
        });
        info!("Assigned leader {}", name);
    }

    /// Release and clear the current leader. No-op when none is set.
    pub async fn remove_leader(&self) {
        let mut state = self.state.lock().await;
        self.remove_leader_locked(&mut state).await;
    }

    /// Reconnect to the current leader and register with it again.
    ///
    /// The first failing step wins; the leader entry itself is left alone.
    pub async fn reassign_leader(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.reassign_leader_locked(&mut state).await
    }

    /// Names of all registered followers, lexicographically sorted
    pub async fn get_all(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.peers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Record this node's placement; the handler fires only on change
    pub async fn set_info(&self, member_number: u32, total_members: u32) {
        let mut state = self.state.lock().await;
        self.set_info_locked(&mut state, member_number, total_members);
    }

    /// Current placement, if one was ever set
    pub async fn info(&self) -> Option<InfoModel> {
        self.state.lock().await.info
    }

    /// Mark this node as the group leader
    pub async fn be_leader(&self) {
        let mut state = self.state.lock().await;
        if !state.am_i_leader {
            state.am_i_leader = true;
            info!("Became group leader");
        }
    }

    /// Mark this node as a follower
    pub async fn dont_be_leader(&self) {
        let mut state = self.state.lock().await;
        if state.am_i_leader {
            state.am_i_leader = false;
            info!("Stepped down as group leader");
        }
    }

    /// Whether this node currently acts as the group leader
    pub async fn is_leader(&self) -> bool {
        self.state.lock().await.am_i_leader
    }

    /// Name of the upstream leader, if one is assigned
    pub async fn leader_name(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .leader
            .as_ref()
            .map(|entry| entry.name.clone())
    }

    /// Start the periodic health check loop. No-op if already running.
    pub async fn start_health_check(self: &Arc<Self>) {
        let mut slot = self.health_task.lock().await;
        if slot.is_some() {
            debug!("Health check loop already running");
            return;
        }
        let weak = Arc::downgrade(self);
        *slot = Some(PeriodicTask::spawn(
            "health-check",
            self.config.health_check_interval,
            move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(registry) => {
                            registry.health_check_tick().await;
                            true
                        }
                        None => false,
                    }
                }
            },
        ));
        info!("Health check loop started");
    }

    /// Stop the health check loop, waiting for an in-flight tick
    pub async fn stop_health_check(&self) {
        if let Some(task) = self.health_task.lock().await.take() {
            task.stop().await;
            info!("Health check loop stopped");
        }
    }

    /// Start the periodic rebalance loop. Ticks are leader-only; on a
    /// follower the loop idles. No-op if already running.
    pub async fn start_rebalance(self: &Arc<Self>) {
        let mut slot = self.rebalance_task.lock().await;
        if slot.is_some() {
            debug!("Rebalance loop already running");
            return;
        }
        let weak = Arc::downgrade(self);
        *slot = Some(PeriodicTask::spawn(
            "rebalance",
            self.config.rebalance_interval,
            move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(registry) => {
                            registry.rebalance_tick().await;
                            true
                        }
                        None => false,
                    }
                }
            },
        ));
        info!("Rebalance loop started");
    }

    /// Stop the rebalance loop, waiting for an in-flight tick
    pub async fn stop_rebalance(&self) {
        if let Some(task) = self.rebalance_task.lock().await.take() {
            task.stop().await;
            info!("Rebalance loop stopped");
        }
    }

    /// Stop both loops, then release the leader and every follower
    pub async fn shutdown(&self) {
        self.stop_health_check().await;
        self.stop_rebalance().await;

        let mut state = self.state.lock().await;
        self.remove_leader_locked(&mut state).await;
        self.remove_all_locked(&mut state).await;
        info!("Registry shut down");
    }

    /// One health check round: leader first, then every follower.
    async fn health_check_tick(&self) {
        let started = Instant::now();
        let mut state = self.state.lock().await;

        if let Some(leader) = state.leader.clone() {
            if let Err(err) = leader.handle.ping().await {
                warn!("Leader {} failed health check: {}", leader.name, err);
                if let Err(err) = self.reassign_leader_locked(&mut state).await {
                    let unchanged = state
                        .leader
                        .as_ref()
                        .is_some_and(|current| Arc::ptr_eq(&current.handle, &leader.handle));
                    if unchanged {
                        warn!("Reassigning leader {} failed, removing it: {}", leader.name, err);
                        self.remove_leader_locked(&mut state).await;
                    } else {
                        // someone swapped the leader mid-tick; only release
                        // the handle we actually probed
                        debug!("Leader changed during reassign, releasing stale handle");
                        close_entry(&leader).await;
                    }
                }
            }
        }

        let followers: Vec<PeerEntry> = state.peers.values().cloned().collect();
        for entry in followers {
            if entry.handle.ping().await.is_ok() {
                continue;
            }
            warn!("Peer {} failed health check", entry.name);
            if state.peers.remove(&entry.name).is_some() {
                close_entry(&entry).await;
                metrics::standard::PEERS_REMOVED.inc();
            }
        }

        metrics::standard::ACTIVE_PEERS.set(state.peers.len() as i64);
        metrics::standard::HEALTH_CHECK_DURATION.observe(started.elapsed().as_secs_f64());
    }

    /// One rebalance round: number the sorted followers after ourselves.
    async fn rebalance_tick(&self) {
        let started = Instant::now();
        let mut state = self.state.lock().await;
        if !state.am_i_leader {
            return;
        }

        let mut names: Vec<String> = state.peers.keys().cloned().collect();
        names.sort();
        let total_members = names.len() as u32 + 1;

        // the leader always takes slot one
        self.set_info_locked(&mut state, 1, total_members);

        for (index, name) in names.iter().enumerate() {
            let Some(entry) = state.peers.get(name).cloned() else {
                continue;
            };
            let member_number = index as u32 + 2;
            match entry.handle.rebalance(member_number, total_members).await {
                Ok(()) => {
                    metrics::standard::REBALANCE_PUSHES.inc();
                    debug!(
                        "Pushed placement {}/{} to peer {}",
                        member_number, total_members, name
                    );
                }
                Err(err) => {
                    metrics::standard::REBALANCE_PUSH_FAILURES.inc();
                    warn!("Rebalance push to {} failed: {}", name, err);
                }
            }
        }

        metrics::standard::REBALANCE_DURATION.observe(started.elapsed().as_secs_f64());
    }

    async fn reassign_leader_locked(&self, state: &mut RegistryState) -> Result<()> {
        let leader = state.leader.clone().ok_or(CohortError::NoLeaderAssigned)?;
        leader.handle.reconnect().await?;
        leader.handle.register().await?;
        metrics::standard::LEADER_REASSIGNMENTS.inc();
        info!("Reassigned leader {}", leader.name);
        Ok(())
    }

    async fn remove_leader_locked(&self, state: &mut RegistryState) {
        if let Some(leader) = state.leader.take() {
            close_entry(&leader).await;
            metrics::standard::LEADER_REMOVALS.inc();
            info!("Removed leader {}", leader.name);
        }
    }

    async fn remove_all_locked(&self, state: &mut RegistryState) {
        let entries: Vec<PeerEntry> = state.peers.drain().map(|(_, entry)| entry).collect();
        for entry in &entries {
            close_entry(entry).await;
            metrics::standard::PEERS_REMOVED.inc();
        }
        metrics::standard::ACTIVE_PEERS.set(0);
        if !entries.is_empty() {
            info!("Removed all {} peers", entries.len());
        }
    }

    fn set_info_locked(&self, state: &mut RegistryState, member_number: u32, total_members: u32) {
        let model = InfoModel::new(member_number, total_members);
        if state.info == Some(model) {
            return;
        }
        state.info = Some(model);
        metrics::standard::INFO_CHANGES.inc();
        self.info_handler.on_model_change(&model);
    }
}

/// Release a peer handle. Close failures are logged, never propagated;
/// the entry counts as released either way.
async fn close_entry(entry: &PeerEntry) {
    if let Err(err) = entry.handle.close().await {
        warn!("Closing peer {} failed: {}", entry.name, err);
    }
}
