//! Event types for the Agora event system
//!
//! Provides shared event definitions and the EventBus used by the
//! deliberation engine and its SSE surface.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Agora engine events
///
/// Events are broadcast via EventBus and can be serialized for SSE
/// transmission. All events use this central enum for type safety and
/// exhaustive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgoraEvent {
    /// A deliberation was created and is accepting submissions
    DeliberationCreated {
        deliberation_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A user joined the deliberation's member pool
    MemberJoined {
        deliberation_id: String,
        user_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An idea entered the deliberation
    ///
    /// Triggers:
    /// - Continuous flow: may spawn a new tier-1 cell
    /// - Accumulation: may reach the challenge quorum
    IdeaSubmitted {
        deliberation_id: String,
        idea_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Submission phase ended and tier 1 was allocated
    VotingStarted {
        deliberation_id: String,
        cell_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The continuous-flow submission window was closed
    SubmissionsClosed {
        deliberation_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A cell was opened for discussion or voting
    CellOpened {
        deliberation_id: String,
        cell_id: String,
        tier: i64,
        idea_count: usize,
        member_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A vote was recorded or replaced
    VoteRecorded {
        cell_id: String,
        user_id: String,
        idea_id: String,
        points: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A cell finished and its results were applied
    ///
    /// `winner_idea_id` is None when the cell closed without votes.
    CellCompleted {
        deliberation_id: String,
        cell_id: String,
        tier: i64,
        winner_idea_id: Option<String>,
        timed_out: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// All cells at a tier completed and the next tier was allocated
    TierAdvanced {
        deliberation_id: String,
        tier: i64,
        cell_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A single idea survived the ladder and became champion
    ChampionCrowned {
        deliberation_id: String,
        idea_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Pending challengers reached quorum and a challenge round began
    ChallengeRoundStarted {
        deliberation_id: String,
        round: i64,
        challenger_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A challenge round ended
    ///
    /// `replaced` is true when a challenger unseated the champion.
    ChallengeResolved {
        deliberation_id: String,
        champion_idea_id: String,
        replaced: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A late joiner was seated into an open cell
    SeatTaken {
        cell_id: String,
        user_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An unvoted seat was released
    SeatReleased {
        cell_id: String,
        user_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A revision was proposed for an idea in an open cell
    RevisionProposed {
        revision_id: String,
        idea_id: String,
        cell_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A revision reached consensus or was rejected
    RevisionResolved {
        revision_id: String,
        idea_id: String,
        approved: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The deliberation reached its terminal phase
    DeliberationCompleted {
        deliberation_id: String,
        champion_idea_id: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl AgoraEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            AgoraEvent::DeliberationCreated { .. } => "DeliberationCreated",
            AgoraEvent::MemberJoined { .. } => "MemberJoined",
            AgoraEvent::IdeaSubmitted { .. } => "IdeaSubmitted",
            AgoraEvent::VotingStarted { .. } => "VotingStarted",
            AgoraEvent::SubmissionsClosed { .. } => "SubmissionsClosed",
            AgoraEvent::CellOpened { .. } => "CellOpened",
            AgoraEvent::VoteRecorded { .. } => "VoteRecorded",
            AgoraEvent::CellCompleted { .. } => "CellCompleted",
            AgoraEvent::TierAdvanced { .. } => "TierAdvanced",
            AgoraEvent::ChampionCrowned { .. } => "ChampionCrowned",
            AgoraEvent::ChallengeRoundStarted { .. } => "ChallengeRoundStarted",
            AgoraEvent::ChallengeResolved { .. } => "ChallengeResolved",
            AgoraEvent::SeatTaken { .. } => "SeatTaken",
            AgoraEvent::SeatReleased { .. } => "SeatReleased",
            AgoraEvent::RevisionProposed { .. } => "RevisionProposed",
            AgoraEvent::RevisionResolved { .. } => "RevisionResolved",
            AgoraEvent::DeliberationCompleted { .. } => "DeliberationCompleted",
        }
    }
}

/// Central event distribution bus for application-wide events
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgoraEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<AgoraEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: AgoraEvent,
    ) -> Result<usize, broadcast::error::SendError<AgoraEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// The engine uses this everywhere: event delivery is fire-and-forget
    /// and never affects transaction outcomes.
    pub fn emit_lossy(&self, event: AgoraEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_emit() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        bus.emit(AgoraEvent::DeliberationCreated {
            deliberation_id: "d-1".to_string(),
            timestamp: chrono::Utc::now(),
        })
        .expect("emit should succeed");

        let received = rx.try_recv().expect("Should receive event");
        assert_eq!(received.event_type(), "DeliberationCreated");
    }

    #[test]
    fn test_eventbus_emit_lossy_without_subscribers() {
        let bus = EventBus::new(2);

        // No subscribers; must not panic or error
        bus.emit_lossy(AgoraEvent::SubmissionsClosed {
            deliberation_id: "d-1".to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    #[test]
    fn test_event_serialization_carries_type_tag() {
        let event = AgoraEvent::CellCompleted {
            deliberation_id: "d-1".to_string(),
            cell_id: "c-1".to_string(),
            tier: 1,
            winner_idea_id: Some("i-1".to_string()),
            timed_out: false,
            timestamp: chrono::Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"CellCompleted\""));
        assert!(json.contains("\"winner_idea_id\":\"i-1\""));

        let back: AgoraEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type(), "CellCompleted");
    }

    #[test]
    fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(AgoraEvent::TierAdvanced {
            deliberation_id: "d-1".to_string(),
            tier: 2,
            cell_count: 3,
            timestamp: chrono::Utc::now(),
        })
        .unwrap();

        assert_eq!(rx1.try_recv().unwrap().event_type(), "TierAdvanced");
        assert_eq!(rx2.try_recv().unwrap().event_type(), "TierAdvanced");
    }
}
