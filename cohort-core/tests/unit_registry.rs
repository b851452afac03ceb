//! Unit tests for the peer registry and its membership listener
//!
//! Exercises registry bookkeeping, the health-check and rebalance loops,
//! and the bus-to-registry path through the public API with fake peers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use cohort_core::bus::MembershipBus;
use cohort_core::coordinator::{InfoHandler, InfoModel, MembershipListener, Registry, RegistryConfig};
use cohort_core::membership::{MemberIdentity, MembershipModel};
use cohort_core::runtime::ShutdownSignal;
use cohort_core::transport::{PeerConnector, WorkerHandle};
use cohort_core::Result;

#[derive(Default)]
struct FakeHandle {
    pings: AtomicUsize,
    reconnects: AtomicUsize,
    registers: AtomicUsize,
    closes: AtomicUsize,
    rebalances: Mutex<Vec<(u32, u32)>>,
    fail_ping: AtomicBool,
    ping_delay: Option<Duration>,
}

impl FakeHandle {
    fn failing_ping() -> Self {
        let handle = Self::default();
        handle.fail_ping.store(true, Ordering::SeqCst);
        handle
    }

    fn slow_ping(delay: Duration) -> Self {
        Self {
            ping_delay: Some(delay),
            ..Self::default()
        }
    }
}

#[async_trait]
impl WorkerHandle for FakeHandle {
    async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.ping_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(cohort_core::CohortError::TransportFailure {
                peer: "fake".into(),
                message: "ping refused".into(),
            });
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn register(&self) -> Result<()> {
        self.registers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rebalance(&self, member_number: u32, total_members: u32) -> Result<()> {
        self.rebalances
            .lock()
            .unwrap()
            .push((member_number, total_members));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct CountingHandler {
    calls: AtomicUsize,
    last: Mutex<Option<InfoModel>>,
}

impl InfoHandler for CountingHandler {
    fn on_model_change(&self, model: &InfoModel) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(*model);
    }
}

#[derive(Default)]
struct FakeConnector {
    handles: Mutex<HashMap<String, Arc<FakeHandle>>>,
}

impl FakeConnector {
    fn handle_for(&self, name: &str) -> Arc<FakeHandle> {
        self.handles
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .expect("peer was never dialed")
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(&self, member: &MemberIdentity) -> Result<Arc<dyn WorkerHandle>> {
        let handle = self
            .handles
            .lock()
            .unwrap()
            .entry(member.name.clone())
            .or_default()
            .clone();
        Ok(handle)
    }
}

fn registry_with(config: RegistryConfig) -> (Arc<Registry>, Arc<CountingHandler>) {
    let handler = Arc::new(CountingHandler::default());
    let registry = Arc::new(Registry::new(config, handler.clone()));
    (registry, handler)
}

fn registry() -> (Arc<Registry>, Arc<CountingHandler>) {
    registry_with(RegistryConfig::default())
}

fn fast_config() -> RegistryConfig {
    RegistryConfig {
        health_check_interval: Duration::from_millis(20),
        rebalance_interval: Duration::from_millis(20),
    }
}

fn addressed(name: &str) -> MemberIdentity {
    MemberIdentity::new(name).with_address("127.0.0.1:1".parse().unwrap())
}

#[tokio::test]
async fn test_add_and_remove_maintain_sorted_names() {
    let (registry, _) = registry();

    for name in ["gamma", "alpha", "delta", "beta"] {
        registry.add(name, Arc::new(FakeHandle::default())).await;
    }
    assert_eq!(
        registry.get_all().await,
        vec!["alpha", "beta", "delta", "gamma"],
        "Peer names should come back sorted"
    );

    registry.remove("delta").await;
    assert_eq!(registry.get_all().await, vec!["alpha", "beta", "gamma"]);
}

#[tokio::test]
async fn test_replaced_peer_handle_is_released() {
    let (registry, _) = registry();
    let old = Arc::new(FakeHandle::default());
    let new = Arc::new(FakeHandle::default());

    registry.add("peer", old.clone()).await;
    registry.add("peer", new.clone()).await;

    assert_eq!(old.closes.load(Ordering::SeqCst), 1, "Displaced handle should be closed");
    assert_eq!(new.closes.load(Ordering::SeqCst), 0);
    assert_eq!(registry.get_all().await, vec!["peer"]);
}

#[tokio::test]
async fn test_info_handler_fires_only_on_change() {
    let (registry, handler) = registry();

    registry.set_info(1, 3).await;
    registry.set_info(1, 3).await;
    registry.set_info(2, 3).await;

    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    assert_eq!(*handler.last.lock().unwrap(), Some(InfoModel::new(2, 3)));
    assert_eq!(registry.info().await, Some(InfoModel::new(2, 3)));
}

#[tokio::test]
async fn test_health_check_loop_prunes_failing_peers() {
    let (registry, _) = registry_with(fast_config());
    let healthy = Arc::new(FakeHandle::default());
    let dead = Arc::new(FakeHandle::failing_ping());

    registry.add("healthy", healthy.clone()).await;
    registry.add("dead", dead.clone()).await;
    registry.start_health_check().await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    registry.stop_health_check().await;

    assert_eq!(registry.get_all().await, vec!["healthy"]);
    assert_eq!(dead.closes.load(Ordering::SeqCst), 1, "Dead peer should be closed once");
    assert!(healthy.pings.load(Ordering::SeqCst) >= 2, "Healthy peer should keep being pinged");
}

#[tokio::test]
async fn test_stop_health_check_waits_for_inflight_probe() {
    let (registry, _) = registry_with(fast_config());
    let slow = Arc::new(FakeHandle::slow_ping(Duration::from_millis(60)));

    registry.add("slow", slow.clone()).await;
    registry.start_health_check().await;

    // land inside the first probe, then stop while it is in flight
    tokio::time::sleep(Duration::from_millis(35)).await;
    registry.stop_health_check().await;

    let after_stop = slow.pings.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        slow.pings.load(Ordering::SeqCst),
        after_stop,
        "No probes should start after stop returns"
    );
}

#[tokio::test]
async fn test_rebalance_loop_numbers_followers_in_name_order() {
    let (registry, handler) = registry_with(fast_config());
    let handles: HashMap<&str, Arc<FakeHandle>> = ["beta", "alpha", "gamma"]
        .into_iter()
        .map(|name| (name, Arc::new(FakeHandle::default())))
        .collect();

    registry.be_leader().await;
    for (name, handle) in &handles {
        registry.add(*name, handle.clone()).await;
    }
    registry.start_rebalance().await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    registry.stop_rebalance().await;

    // the leader holds slot one; followers get slots in name order
    assert_eq!(*handler.last.lock().unwrap(), Some(InfoModel::new(1, 4)));
    let expected: [(&str, u32); 3] = [("alpha", 2), ("beta", 3), ("gamma", 4)];
    for (name, member_number) in expected {
        let pushes = handles[name].rebalances.lock().unwrap().clone();
        assert!(!pushes.is_empty(), "Follower {} never saw a placement", name);
        assert_eq!(*pushes.last().unwrap(), (member_number, 4));
    }
}

#[tokio::test]
async fn test_followers_do_not_run_rebalance() {
    let (registry, handler) = registry_with(fast_config());
    let follower = Arc::new(FakeHandle::default());

    registry.add("peer", follower.clone()).await;
    registry.start_rebalance().await;

    tokio::time::sleep(Duration::from_millis(80)).await;
    registry.stop_rebalance().await;

    assert!(follower.rebalances.lock().unwrap().is_empty());
    assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_reassign_leader_recovers_the_session() {
    let (registry, _) = registry();
    let leader = Arc::new(FakeHandle::default());

    registry.assign_leader("boss", leader.clone()).await;
    registry.reassign_leader().await.unwrap();

    assert_eq!(leader.reconnects.load(Ordering::SeqCst), 1);
    assert_eq!(leader.registers.load(Ordering::SeqCst), 1);
    assert_eq!(registry.leader_name().await, Some("boss".into()));
}

#[tokio::test]
async fn test_reassign_without_leader_fails_cleanly() {
    let (registry, _) = registry();
    assert!(registry.reassign_leader().await.is_err());
}

#[tokio::test]
async fn test_shutdown_releases_leader_and_peers() {
    let (registry, _) = registry_with(fast_config());
    let leader = Arc::new(FakeHandle::default());
    let follower = Arc::new(FakeHandle::default());

    registry.assign_leader("boss", leader.clone()).await;
    registry.add("peer", follower.clone()).await;
    registry.start_health_check().await;
    registry.start_rebalance().await;

    registry.shutdown().await;

    assert_eq!(leader.closes.load(Ordering::SeqCst), 1);
    assert_eq!(follower.closes.load(Ordering::SeqCst), 1);
    assert!(registry.get_all().await.is_empty());
    assert_eq!(registry.leader_name().await, None);
}

#[tokio::test]
async fn test_listener_drives_registry_from_bus() {
    let handler = Arc::new(CountingHandler::default());
    let registry = Arc::new(Registry::new(RegistryConfig::default(), handler.clone()));
    let connector = Arc::new(FakeConnector::default());
    let listener = MembershipListener::new(registry.clone(), connector.clone(), "local");

    let bus = MembershipBus::membership_changed();
    let shutdown = ShutdownSignal::new();
    let task = listener.spawn(&bus, &shutdown);

    // follow a remote leader alongside one plain peer
    bus.publish(MembershipModel {
        members: vec![addressed("boss"), addressed("peer"), MemberIdentity::new("local")],
        leader: Some("boss".into()),
        member_number: 2,
        total_members: 3,
        rebalance_delay: Duration::ZERO,
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!registry.is_leader().await);
    assert_eq!(registry.leader_name().await, Some("boss".into()));
    assert_eq!(registry.get_all().await, vec!["peer"]);
    assert_eq!(registry.info().await, Some(InfoModel::new(2, 3)));
    assert_eq!(connector.handle_for("boss").registers.load(Ordering::SeqCst), 1);

    // the group shrinks and this node takes over
    bus.publish(MembershipModel {
        members: vec![MemberIdentity::new("local")],
        leader: Some("local".into()),
        member_number: 1,
        total_members: 1,
        rebalance_delay: Duration::ZERO,
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(registry.is_leader().await);
    assert_eq!(registry.leader_name().await, None, "A leader follows no one");
    assert!(registry.get_all().await.is_empty());
    assert_eq!(connector.handle_for("peer").closes.load(Ordering::SeqCst), 1);
    assert_eq!(*handler.last.lock().unwrap(), Some(InfoModel::new(1, 1)));

    shutdown.shutdown();
    task.await.unwrap();
}
