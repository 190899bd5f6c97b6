//! Defines an abstraction over the event sending mechanism.

use super::events::UserEvent;
use crate::core::{NodeEvent, NodeObserver};
use tokio::sync::mpsc;

/// A trait that abstracts the sending of user events.
/// This is "fire-and-forget" and doesn't return a result, simplifying its use.
pub trait EventProxy: Send + Sync + Clone + 'static {
    fn send_event(&self, event: UserEvent);
}

/// The channel feeding the presentation consumer.
impl EventProxy for mpsc::UnboundedSender<UserEvent> {
    fn send_event(&self, event: UserEvent) {
        // A closed consumer only means nobody is watching anymore.
        if let Err(e) = self.send(event) {
            tracing::warn!("Failed to send event to presentation consumer: {}", e);
        }
    }
}

/// Forwards tree mutations from any task to the presentation consumer.
pub struct ProxyObserver<P: EventProxy> {
    proxy: P,
}

impl<P: EventProxy> ProxyObserver<P> {
    pub fn new(proxy: P) -> Self {
        Self { proxy }
    }
}

impl<P: EventProxy> NodeObserver for ProxyObserver<P> {
    fn on_node_event(&self, event: NodeEvent) {
        self.proxy.send_event(UserEvent::Tree(event));
    }
}
