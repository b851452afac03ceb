//! Store-backed membership
//!
//! Members announce themselves into a shared coordination store and derive
//! ordinals from the join order of live instances. A heartbeat loop keeps
//! this instance's document fresh; a monitor loop recomputes the live set
//! and publishes a model whenever it changes. No leader is elected here —
//! the store's join order alone determines the numbering.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::MembershipBus;
use crate::error::{CohortError, Result};
use crate::metrics;
use crate::runtime::PeriodicTask;

use super::{await_model, MemberIdentity, MembershipConfig, MembershipModel};

/// Record one member keeps alive in the coordination store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDocument {
    /// Unique instance id
    pub id: String,
    /// Member name
    pub name: String,
    /// When the instance joined the group
    pub joined_at: DateTime<Utc>,
    /// Last heartbeat
    pub heartbeat_at: DateTime<Utc>,
}

/// Shared store the group coordinates through
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Insert or refresh an instance document
    async fn announce(&self, instance: InstanceDocument) -> Result<()>;

    /// All stored instance documents
    async fn instances(&self) -> Result<Vec<InstanceDocument>>;

    /// Remove an instance document
    async fn withdraw(&self, id: &str) -> Result<()>;
}

/// In-memory coordination store for tests and single-process runs
pub struct MemoryCoordinationStore {
    docs: RwLock<HashMap<String, InstanceDocument>>,
    expiry: chrono::Duration,
}

impl MemoryCoordinationStore {
    /// Store whose documents expire `expiry` after their last heartbeat
    pub fn new(expiry: Duration) -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            expiry: chrono::Duration::from_std(expiry)
                .unwrap_or_else(|_| chrono::Duration::seconds(120)),
        }
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn announce(&self, instance: InstanceDocument) -> Result<()> {
        self.docs.write().await.insert(instance.id.clone(), instance);
        Ok(())
    }

    async fn instances(&self) -> Result<Vec<InstanceDocument>> {
        let now = Utc::now();
        Ok(self
            .docs
            .read()
            .await
            .values()
            .filter(|doc| now.signed_duration_since(doc.heartbeat_at) <= self.expiry)
            .cloned()
            .collect())
    }

    async fn withdraw(&self, id: &str) -> Result<()> {
        self.docs.write().await.remove(id);
        Ok(())
    }
}

/// Membership derived from a shared coordination store
pub struct StoreMembership {
    name: String,
    instance_id: String,
    store: Arc<dyn CoordinationStore>,
    latest: watch::Receiver<Option<MembershipModel>>,
    tasks: Mutex<Vec<PeriodicTask>>,
}

impl StoreMembership {
    /// Announce this member and start the heartbeat and monitor loops.
    ///
    /// The live set is evaluated once before returning, so `get_info` does
    /// not wait a full monitor interval on a fresh group.
    pub async fn start(
        name: impl Into<String>,
        store: Arc<dyn CoordinationStore>,
        config: &MembershipConfig,
        bus: MembershipBus,
    ) -> Result<Self> {
        config.validate()?;
        let name = name.into();
        let instance_id = Uuid::new_v4().to_string();
        let tolerance = chrono::Duration::from_std(config.heartbeat_tolerance).map_err(|_| {
            CohortError::InvalidConfig {
                reason: "heartbeat_tolerance out of range".into(),
            }
        })?;

        let now = Utc::now();
        let doc = InstanceDocument {
            id: instance_id.clone(),
            name: name.clone(),
            joined_at: now,
            heartbeat_at: now,
        };
        store.announce(doc.clone()).await?;
        info!("Announced instance {} for member {}", instance_id, name);

        let (latest_tx, latest) = watch::channel(None);
        let latest_tx = Arc::new(latest_tx);

        evaluate(
            &store,
            &instance_id,
            tolerance,
            config.rebalance_delay,
            &latest_tx,
            &bus,
        )
        .await;

        let heartbeat = {
            let store = store.clone();
            PeriodicTask::spawn(
                "membership-heartbeat",
                config.heartbeat_interval,
                move || {
                    let store = store.clone();
                    let mut doc = doc.clone();
                    async move {
                        doc.heartbeat_at = Utc::now();
                        if let Err(err) = store.announce(doc).await {
                            warn!("Heartbeat announce failed: {}", err);
                        }
                        true
                    }
                },
            )
        };

        let monitor = {
            let store = store.clone();
            let instance_id = instance_id.clone();
            let rebalance_delay = config.rebalance_delay;
            PeriodicTask::spawn("membership-monitor", config.monitor_interval, move || {
                let store = store.clone();
                let instance_id = instance_id.clone();
                let latest_tx = latest_tx.clone();
                let bus = bus.clone();
                async move {
                    evaluate(
                        &store,
                        &instance_id,
                        tolerance,
                        rebalance_delay,
                        &latest_tx,
                        &bus,
                    )
                    .await;
                    true
                }
            })
        };

        Ok(Self {
            name,
            instance_id,
            store,
            latest,
            tasks: Mutex::new(vec![heartbeat, monitor]),
        })
    }

    /// Latest computed model; awaits the first when none is known yet
    pub async fn get_info(&self) -> Result<MembershipModel> {
        await_model(&self.latest).await
    }

    /// Stop both loops and withdraw this instance. Idempotent.
    pub async fn close(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_empty() {
            return;
        }
        for task in tasks.drain(..) {
            task.stop().await;
        }
        if let Err(err) = self.store.withdraw(&self.instance_id).await {
            warn!("Withdraw of instance {} failed: {}", self.instance_id, err);
        }
        info!(
            "Member {} withdrew instance {}",
            self.name, self.instance_id
        );
    }
}

/// Recompute the live set and publish a model if it changed.
async fn evaluate(
    store: &Arc<dyn CoordinationStore>,
    instance_id: &str,
    tolerance: chrono::Duration,
    rebalance_delay: Duration,
    latest: &watch::Sender<Option<MembershipModel>>,
    bus: &MembershipBus,
) {
    let instances = match store.instances().await {
        Ok(instances) => instances,
        Err(err) => {
            warn!("Failed to read instances: {}", err);
            return;
        }
    };

    let now = Utc::now();
    let mut live: Vec<InstanceDocument> = instances
        .into_iter()
        .filter(|doc| now.signed_duration_since(doc.heartbeat_at) <= tolerance)
        .collect();
    live.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));

    let Some(position) = live.iter().position(|doc| doc.id == instance_id) else {
        // the heartbeat loop re-announces us; skip this round
        warn!("Own instance {} missing from store", instance_id);
        return;
    };

    let model = MembershipModel {
        members: live
            .iter()
            .map(|doc| MemberIdentity::new(doc.name.clone()))
            .collect(),
        leader: None,
        member_number: (position + 1) as u32,
        total_members: live.len() as u32,
        rebalance_delay,
    };

    if latest.borrow().as_ref() == Some(&model) {
        return;
    }

    info!(
        "Membership changed: member {} of {}",
        model.member_number, model.total_members
    );
    latest.send_replace(Some(model.clone()));
    metrics::standard::MODELS_PUBLISHED.inc();
    bus.publish(model);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MembershipConfig {
        MembershipConfig {
            heartbeat_interval: Duration::from_millis(20),
            heartbeat_tolerance: Duration::from_millis(400),
            monitor_interval: Duration::from_millis(30),
            expiry: Duration::from_secs(5),
            ..MembershipConfig::default()
        }
    }

    fn ghost(name: &str, age: chrono::Duration) -> InstanceDocument {
        let then = Utc::now() - age;
        InstanceDocument {
            id: format!("ghost-{name}"),
            name: name.into(),
            joined_at: then,
            heartbeat_at: then,
        }
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryCoordinationStore::new(Duration::from_secs(60));
        store.announce(ghost("a", chrono::Duration::zero())).await.unwrap();
        assert_eq!(store.instances().await.unwrap().len(), 1);

        store.withdraw("ghost-a").await.unwrap();
        assert!(store.instances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_expires_stale_documents() {
        let store = MemoryCoordinationStore::new(Duration::from_secs(60));
        store.announce(ghost("old", chrono::Duration::minutes(5))).await.unwrap();
        store.announce(ghost("new", chrono::Duration::zero())).await.unwrap();

        let live = store.instances().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].name, "new");
    }

    #[tokio::test]
    async fn test_single_member_is_one_of_one() {
        let store = Arc::new(MemoryCoordinationStore::new(Duration::from_secs(60)));
        let bus = MembershipBus::membership_changed();
        let membership = StoreMembership::start("solo", store, &test_config(), bus)
            .await
            .unwrap();

        let model = membership.get_info().await.unwrap();
        assert_eq!(model.member_number, 1);
        assert_eq!(model.total_members, 1);
        assert_eq!(model.members[0].name, "solo");
        membership.close().await;
    }

    #[tokio::test]
    async fn test_ordinals_follow_join_order() {
        let store: Arc<dyn CoordinationStore> =
            Arc::new(MemoryCoordinationStore::new(Duration::from_secs(60)));
        let config = test_config();

        let first = StoreMembership::start(
            "first",
            store.clone(),
            &config,
            MembershipBus::membership_changed(),
        )
        .await
        .unwrap();

        // joined_at must differ between the two instances
        tokio::time::sleep(Duration::from_millis(5)).await;

        let second = StoreMembership::start(
            "second",
            store.clone(),
            &config,
            MembershipBus::membership_changed(),
        )
        .await
        .unwrap();

        // both monitors need a tick to observe the other instance
        tokio::time::sleep(Duration::from_millis(120)).await;

        let first_model = first.get_info().await.unwrap();
        let second_model = second.get_info().await.unwrap();
        assert_eq!(first_model.member_number, 1);
        assert_eq!(first_model.total_members, 2);
        assert_eq!(second_model.member_number, 2);
        assert_eq!(second_model.total_members, 2);

        first.close().await;
        second.close().await;
    }

    #[tokio::test]
    async fn test_stale_member_disappears_from_total() {
        let store: Arc<dyn CoordinationStore> =
            Arc::new(MemoryCoordinationStore::new(Duration::from_secs(60)));
        // a member that joined earlier but stopped heartbeating long ago
        store
            .announce(ghost("dead", chrono::Duration::minutes(1)))
            .await
            .unwrap();

        let bus = MembershipBus::membership_changed();
        let membership = StoreMembership::start("live", store, &test_config(), bus)
            .await
            .unwrap();

        let model = membership.get_info().await.unwrap();
        assert_eq!(model.total_members, 1);
        assert_eq!(model.member_number, 1);
        membership.close().await;
    }

    #[tokio::test]
    async fn test_change_is_published_on_bus() {
        let store: Arc<dyn CoordinationStore> =
            Arc::new(MemoryCoordinationStore::new(Duration::from_secs(60)));
        let bus = MembershipBus::membership_changed();
        let mut updates = bus.subscribe();

        let membership =
            StoreMembership::start("watched", store.clone(), &test_config(), bus)
                .await
                .unwrap();

        let initial = updates.recv().await.unwrap();
        assert_eq!(initial.total_members, 1);

        // a newcomer heartbeats into the store; the monitor publishes the change
        store
            .announce(ghost("late", chrono::Duration::zero()))
            .await
            .unwrap();

        let grown = updates.recv().await.unwrap();
        assert_eq!(grown.total_members, 2);

        membership.close().await;
    }

    #[tokio::test]
    async fn test_close_withdraws_instance() {
        let store: Arc<dyn CoordinationStore> =
            Arc::new(MemoryCoordinationStore::new(Duration::from_secs(60)));
        let bus = MembershipBus::membership_changed();
        let membership = StoreMembership::start("leaver", store.clone(), &test_config(), bus)
            .await
            .unwrap();
        assert_eq!(store.instances().await.unwrap().len(), 1);

        membership.close().await;
        assert!(store.instances().await.unwrap().is_empty());

        // second close is a no-op
        membership.close().await;
    }
}
