use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::state::{game::Team, state_machine::GamePhase};

/// Notification sent to presentation adapters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusEvent {
    /// Main status line.
    Status {
        /// Sequence number, increasing with every status line.
        seq: u64,
        /// Text to display.
        text: String,
    },
    /// Secondary line describing the ball.
    Ball {
        /// Text to display; empty clears the line.
        text: String,
    },
    /// Progress of the team whose turn it is.
    Progress {
        /// Team concerned.
        team: Team,
        /// Completed target count.
        completed: usize,
        /// Total target count.
        total: u8,
        /// Target to hit next, if any.
        next_target: Option<u8>,
    },
    /// A photo is ready to be shown.
    PhotoReady {
        /// Photo handle.
        id: Uuid,
        /// File backing the photo.
        path: PathBuf,
        /// Short caption (`hit`, `chug`).
        caption: String,
    },
    /// The displayed photo should be removed.
    PhotoCleared,
    /// The state machine changed phase.
    Phase {
        /// New phase.
        phase: GamePhase,
        /// State machine version after the change.
        version: usize,
    },
}

/// Broadcast hub fanning notifications out to presentation adapters.
pub struct StatusHub {
    sender: broadcast::Sender<StatusEvent>,
}

impl StatusHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: StatusEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new(64)
    }
}
