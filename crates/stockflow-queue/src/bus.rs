// Progress bus: per-merchant pub/sub topics over the broker
//
// Four topics per merchant (progress, stage, completion, error). Publishing
// is fire-and-forget — a broken bus must never fail the stage that tried to
// report on it. There is no replay: a subscriber that disconnects misses
// whatever was published meanwhile.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use stockflow_core::{EventKind, ProgressEvent};

use crate::broker::{Broker, BusMessage};

#[derive(Clone)]
pub struct ProgressBus {
    broker: Arc<dyn Broker>,
}

impl ProgressBus {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Publish an event on the merchant's topic for `kind`. Failures are
    /// logged and swallowed.
    pub async fn publish(&self, merchant_id: Uuid, kind: EventKind, event: &ProgressEvent) {
        let topic = kind.topic(merchant_id);
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(topic, error = %e, "progress event not serializable");
                return;
            }
        };
        if let Err(e) = self.broker.publish(&topic, &payload).await {
            warn!(topic, error = %e, "progress event publish failed");
        }
    }

    /// Subscribe to all four topics of one merchant
    pub fn subscribe(&self, merchant_id: Uuid) -> MerchantSubscription {
        MerchantSubscription {
            rx: self.broker.subscribe(),
            topics: [
                EventKind::Progress.topic(merchant_id),
                EventKind::Stage.topic(merchant_id),
                EventKind::Completion.topic(merchant_id),
                EventKind::Error.topic(merchant_id),
            ],
        }
    }
}

/// A filtered view of the pub/sub plane for one merchant
pub struct MerchantSubscription {
    rx: broadcast::Receiver<BusMessage>,
    topics: [String; 4],
}

impl MerchantSubscription {
    /// Next message on any of the merchant's topics; None once the bus is
    /// gone. Messages dropped under backpressure are skipped — clients must
    /// tolerate gaps.
    pub async fn next(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if self.topics.contains(&msg.topic) => return Some(msg),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged, events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The short topic suffix (progress/stage/completion/error) used as the
    /// SSE event name
    pub fn event_name(topic: &str) -> &str {
        topic.rsplit(':').next().unwrap_or(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;

    #[tokio::test]
    async fn subscribers_only_see_their_merchant() {
        let broker = Arc::new(InMemoryBroker::new());
        let bus = ProgressBus::new(broker);
        let merchant = Uuid::now_v7();
        let other = Uuid::now_v7();
        let mut sub = bus.subscribe(merchant);

        let event = ProgressEvent::new("stage_started", "ai_parsing", 5).with_message("parsing");
        bus.publish(other, EventKind::Progress, &event).await;
        bus.publish(merchant, EventKind::Stage, &event).await;

        let msg = sub.next().await.unwrap();
        assert_eq!(msg.topic, format!("{merchant}:stage"));
        assert_eq!(MerchantSubscription::event_name(&msg.topic), "stage");
        let parsed: ProgressEvent = serde_json::from_str(&msg.payload).unwrap();
        assert_eq!(parsed.event_type, "stage_started");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let broker = Arc::new(InMemoryBroker::new());
        let bus = ProgressBus::new(broker);
        let event = ProgressEvent::new("completion", "status_update", 100);
        bus.publish(Uuid::now_v7(), EventKind::Completion, &event).await;
    }
}
