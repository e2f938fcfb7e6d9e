//! Fan-out of scoring results to every connected WebSocket subscriber.

use ml_core::ScoreResult;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

pub const GREETING: &str = "Connected to WebSocket";

/// Text frames sent to WebSocket clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    /// Plain notice, currently only the connect greeting.
    Message { data: String },
    PoseFeedback(ScoreResult),
}

impl HubMessage {
    pub fn greeting() -> Self {
        HubMessage::Message {
            data: GREETING.to_string(),
        }
    }
}

/// Single-producer, many-consumer feedback channel. Publishing never waits on
/// subscribers; one that falls behind by more than the capacity loses the
/// oldest events.
#[derive(Clone)]
pub struct FeedbackBroadcaster {
    tx: broadcast::Sender<ScoreResult>,
}

impl FeedbackBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver `result` to all current subscribers and return how many there
    /// were.
    pub fn publish(&self, result: ScoreResult) -> usize {
        metrics::counter!("pose_coach_feedback_published_total").increment(1);
        match self.tx.send(result) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("feedback published with no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScoreResult> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    use super::*;

    fn result(score: u8) -> ScoreResult {
        ScoreResult {
            pose_name: "tree_pose".into(),
            score,
            feedback_text: "Needs Improvement!!".into(),
            positive: false,
        }
    }

    #[test]
    fn every_subscriber_gets_every_event() {
        let hub = FeedbackBroadcaster::new(8);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        assert_eq!(hub.publish(result(75)), 2);
        assert_eq!(a.try_recv().unwrap(), result(75));
        assert_eq!(b.try_recv().unwrap(), result(75));
        assert!(matches!(a.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let hub = FeedbackBroadcaster::new(8);
        assert_eq!(hub.publish(result(10)), 0);
        assert_eq!(hub.receiver_count(), 0);
    }

    #[test]
    fn slow_subscriber_lags_without_blocking_the_producer() {
        let hub = FeedbackBroadcaster::new(2);
        let mut slow = hub.subscribe();
        for score in 0..5 {
            hub.publish(result(score));
        }
        assert!(matches!(slow.try_recv(), Err(TryRecvError::Lagged(3))));
        assert_eq!(slow.try_recv().unwrap().score, 3);
        assert_eq!(slow.try_recv().unwrap().score, 4);
    }

    #[actix_web::test]
    async fn async_receivers_see_published_events() {
        let hub = FeedbackBroadcaster::new(4);
        let mut rx = hub.subscribe();
        hub.publish(result(42));
        assert_eq!(rx.recv().await.unwrap().score, 42);
        drop(hub);
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
    }

    #[test]
    fn wire_format() {
        let greeting = serde_json::to_value(HubMessage::greeting()).unwrap();
        assert_eq!(
            greeting,
            serde_json::json!({"type": "message", "data": {"data": "Connected to WebSocket"}})
        );

        let feedback = serde_json::to_value(HubMessage::PoseFeedback(result(75))).unwrap();
        assert_eq!(
            feedback,
            serde_json::json!({
                "type": "pose_feedback",
                "data": {"pose": "tree_pose", "score": 75, "feedback": "Needs Improvement!!"}
            })
        );
    }
}
