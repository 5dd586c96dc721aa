use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Phases the game can be in. Exactly one is active at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Process started, no game yet.
    WaitingStart,
    /// Waiting for the coin flip to pick the starting team.
    CoinFlip,
    /// The current team throws at the castle.
    PlayerTurn,
    /// A target was hit; the ball must now pass the tunnel.
    AwaitingTunnel,
    /// The ball is in the launcher, waiting for the plunger.
    AwaitingLaunch,
    /// The ball was launched without a credited target; waiting for its return.
    BallLaunched,
    /// The team chugs until the ball comes back.
    Chug,
    /// A team completed every target.
    GameOver,
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GamePhase::WaitingStart => "waiting for start",
            GamePhase::CoinFlip => "coin flip",
            GamePhase::PlayerTurn => "player turn",
            GamePhase::AwaitingTunnel => "awaiting tunnel",
            GamePhase::AwaitingLaunch => "awaiting launch",
            GamePhase::BallLaunched => "ball launched",
            GamePhase::Chug => "chug",
            GamePhase::GameOver => "game over",
        };
        f.write_str(label)
    }
}

/// Events that move the state machine between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// Operator starts or resets the game.
    Start,
    /// The coin flip picked the starting team.
    CoinFlipFinished,
    /// A target hit was registered, credited or not.
    TargetRegistered,
    /// The current team completed its last target.
    Won,
    /// The ball passed the tunnel sensor.
    TunnelPassed,
    /// The plunger fired with no credited target pending.
    BallLaunched,
    /// The plunger fired after a credited target; the chug begins.
    ChugStarted,
    /// The turn passes to the other team.
    TurnPassed,
}

/// Error returned when an event cannot be applied in the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the event was received.
    pub from: GamePhase,
    /// The event that cannot be applied from this phase.
    pub event: GameEvent,
}

/// Snapshot of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// Current phase.
    pub phase: GamePhase,
    /// Number of transitions applied since process start.
    pub version: usize,
}

/// Phase table of the game. The game service is its only writer.
#[derive(Debug, Clone)]
pub struct GameStateMachine {
    phase: GamePhase,
    version: usize,
}

impl Default for GameStateMachine {
    fn default() -> Self {
        Self {
            phase: GamePhase::WaitingStart,
            version: 0,
        }
    }
}

impl GameStateMachine {
    /// Create a new state machine waiting for the first start.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Create a snapshot of the current state machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            version: self.version,
        }
    }

    /// Validate `event` without applying it, returning the phase it would lead to.
    pub fn check(&self, event: GameEvent) -> Result<GamePhase, InvalidTransition> {
        self.compute_transition(event)
    }

    /// Apply `event`, returning the new phase.
    pub fn apply(&mut self, event: GameEvent) -> Result<GamePhase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        self.phase = next;
        self.version += 1;
        Ok(next)
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: GameEvent) -> Result<GamePhase, InvalidTransition> {
        use GamePhase::*;

        let next = match (self.phase, event) {
            (_, GameEvent::Start) => CoinFlip,
            (CoinFlip, GameEvent::CoinFlipFinished) => PlayerTurn,
            // The self-loop on AwaitingTunnel only serves the relaxed watchtower gate.
            (PlayerTurn | AwaitingTunnel, GameEvent::TargetRegistered) => AwaitingTunnel,
            (PlayerTurn | AwaitingTunnel, GameEvent::Won) => GameOver,
            (AwaitingTunnel | BallLaunched | PlayerTurn, GameEvent::TunnelPassed) => {
                AwaitingLaunch
            }
            (AwaitingLaunch, GameEvent::BallLaunched) => BallLaunched,
            (AwaitingLaunch, GameEvent::ChugStarted) => Chug,
            (
                PlayerTurn | AwaitingTunnel | AwaitingLaunch | BallLaunched | Chug,
                GameEvent::TurnPassed,
            ) => PlayerTurn,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}
