//! Serial event queue owning the game service.
//!
//! Sensor loops, the console, timers and capture tasks only ever hold a [`Dispatcher`]. Every
//! message goes through one unbounded channel and is handled by [`run`] in enqueue order, so
//! game state has a single writer.

use std::time::Duration;

use tokio::{
    sync::{mpsc, oneshot},
    time::sleep,
};
use tracing::{debug, info};

use crate::{
    services::{
        capture_service::{Photo, PhotoPurpose},
        commands::Command,
        game_service::{GameService, GameSnapshot},
    },
    state::state_machine::GamePhase,
};

/// Session position a timer was scheduled from. A timer whose tag no longer matches the live
/// session is dropped when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTag {
    /// Game counter, bumped on every start.
    pub epoch: u64,
    /// Turn counter, bumped on every coin flip and turn change.
    pub turn: u64,
    /// Phase at scheduling time.
    pub phase: GamePhase,
}

/// What a timer does when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    /// Pick the starting team.
    FinishCoinFlip,
    /// Prompt the operator to launch.
    ReadyToLaunch,
    /// Hand the turn to the other team.
    NextTurn,
    /// Put back the last lasting status line once a transient message expires.
    RevertStatus {
        /// Sequence number of the transient status.
        seq: u64,
    },
    /// Take the chug photo.
    CaptureChugPhoto,
}

/// A delayed message for the game loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTimer {
    /// Expected session position.
    pub tag: TimerTag,
    /// Action.
    pub kind: TimerKind,
}

/// Everything the game loop consumes.
#[derive(Debug)]
pub enum GameMessage {
    /// Operator or sensor command.
    Command(Command),
    /// A timer fired.
    Timer(ScheduledTimer),
    /// A background capture finished.
    PhotoCaptured {
        /// Why the photo was taken.
        purpose: PhotoPurpose,
        /// Session position at capture request.
        tag: TimerTag,
        /// The photo, possibly a placeholder.
        photo: Photo,
    },
    /// Read-only snapshot request.
    Query(oneshot::Sender<GameSnapshot>),
    /// Stop the loop.
    Shutdown,
}

/// Cloneable enqueue handle.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    sender: mpsc::UnboundedSender<GameMessage>,
}

/// Receiving end consumed by [`run`].
pub struct DispatchQueue {
    receiver: mpsc::UnboundedReceiver<GameMessage>,
}

impl Dispatcher {
    /// Create a connected handle and queue.
    pub fn channel() -> (Dispatcher, DispatchQueue) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Dispatcher { sender }, DispatchQueue { receiver })
    }

    /// Enqueue a command. Returns `false` once the loop has stopped.
    pub fn enqueue(&self, command: Command) -> bool {
        self.deliver(GameMessage::Command(command))
    }

    /// Enqueue any message. Returns `false` once the loop has stopped.
    pub fn deliver(&self, message: GameMessage) -> bool {
        match self.sender.send(message) {
            Ok(()) => true,
            Err(err) => {
                debug!(message = ?err.0, "game loop stopped; message dropped");
                false
            }
        }
    }

    /// Enqueue `timer` after `delay`.
    pub fn schedule(&self, delay: Duration, timer: ScheduledTimer) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            dispatcher.deliver(GameMessage::Timer(timer));
        });
    }

    /// Ask the loop for a snapshot, answered after every message enqueued before it.
    pub async fn snapshot(&self) -> Option<GameSnapshot> {
        let (reply, answer) = oneshot::channel();
        if !self.deliver(GameMessage::Query(reply)) {
            return None;
        }
        answer.await.ok()
    }

    /// Ask the loop to stop after the messages already queued.
    pub fn shutdown(&self) {
        self.deliver(GameMessage::Shutdown);
    }

    /// Whether the loop is gone.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl DispatchQueue {
    /// Next message, waiting if none is queued.
    pub async fn recv(&mut self) -> Option<GameMessage> {
        self.receiver.recv().await
    }

    /// Next message if one is already queued.
    pub fn try_next(&mut self) -> Option<GameMessage> {
        self.receiver.try_recv().ok()
    }
}

/// Handle messages one at a time until a shutdown request, then hand the service back.
pub async fn run(mut service: GameService, mut queue: DispatchQueue) -> GameService {
    info!("game loop started");
    while let Some(message) = queue.recv().await {
        if matches!(message, GameMessage::Shutdown) {
            break;
        }
        service.handle(message);
    }
    info!("game loop stopped");
    service
}
