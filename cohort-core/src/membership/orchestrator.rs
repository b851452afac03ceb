//! Orchestrator-fed membership
//!
//! Observes a platform orchestrator's notion of group membership through a
//! watch feed, republishes every observed model on the change bus, and
//! caches the latest model so `get_info` answers immediately once anything
//! has been observed. The orchestrator client itself lives outside this
//! crate; it hands models in through the feed channel.

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bus::MembershipBus;
use crate::error::Result;
use crate::metrics;

use super::{await_model, MembershipModel};

/// Membership driven by an external orchestrator watch
pub struct OrchestratorMembership {
    latest: watch::Receiver<Option<MembershipModel>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl OrchestratorMembership {
    /// Start forwarding models from `feed` onto `bus`
    pub fn new(bus: MembershipBus, mut feed: mpsc::Receiver<MembershipModel>) -> Self {
        let (latest_tx, latest) = watch::channel(None);
        let forwarder = tokio::spawn(async move {
            while let Some(model) = feed.recv().await {
                debug!(
                    "Observed membership model: member {} of {}",
                    model.member_number, model.total_members
                );
                latest_tx.send_replace(Some(model.clone()));
                metrics::standard::MODELS_PUBLISHED.inc();
                bus.publish(model);
            }
            debug!("Orchestrator feed ended");
        });
        Self {
            latest,
            forwarder: Mutex::new(Some(forwarder)),
        }
    }

    /// Latest observed model; awaits the first when none has arrived yet
    pub async fn get_info(&self) -> Result<MembershipModel> {
        await_model(&self.latest).await
    }

    /// Stop the forwarder. Idempotent.
    pub async fn close(&self) {
        if let Some(forwarder) = self.forwarder.lock().await.take() {
            forwarder.abort();
            let _ = forwarder.await;
            info!("Orchestrator membership closed");
        }
    }
}
