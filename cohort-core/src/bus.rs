//! Change notification bus
//!
//! Process-wide typed publish/subscribe decoupling membership providers
//! from membership consumers. Publishing never blocks on subscriber
//! progress; a slow subscriber observes `Lagged` and continues with newer
//! events.

use tokio::sync::broadcast;
use tracing::trace;

use crate::membership::MembershipModel;

/// Topic name for membership change notifications
pub const MEMBERSHIP_CHANGED_TOPIC: &str = "membership changed";

/// Buffered events per subscriber before lagging
const BUS_CAPACITY: usize = 256;

/// Typed publish/subscribe channel keyed by a fixed topic name
#[derive(Clone)]
pub struct EventBus<T: Clone> {
    topic: &'static str,
    sender: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    /// Create a bus for `topic` buffering up to `capacity` events per subscriber
    pub fn new(topic: &'static str, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { topic, sender }
    }

    /// Topic this bus carries
    pub fn topic(&self) -> &'static str {
        self.topic
    }

    /// Publish an event to every current subscriber.
    ///
    /// Returns the number of subscribers the event reached; zero when
    /// nobody is subscribed, which is not an error.
    pub fn publish(&self, event: T) -> usize {
        trace!(topic = self.topic, "Publishing event");
        self.sender.send(event).unwrap_or(0)
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Bus carrying membership change notifications
pub type MembershipBus = EventBus<MembershipModel>;

impl EventBus<MembershipModel> {
    /// Bus for the fixed "membership changed" topic
    pub fn membership_changed() -> Self {
        Self::new(MEMBERSHIP_CHANGED_TOPIC, BUS_CAPACITY)
    }
}
