//! Control vocabulary of the game and the operator console reading it.

use tokio::io::AsyncBufRead;
use tokio_stream::{StreamExt, wrappers::LinesStream};
use tracing::{info, warn};

use crate::{
    config::InputRole,
    error::CommandParseError,
    services::dispatcher::Dispatcher,
    state::game::Team,
};

/// A control command, each mapped onto one game operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start or restart the game.
    Start,
    /// Hand the turn to the other team.
    ForceNextTurn,
    /// Pour a beer for a team.
    Dispense(Team),
    /// A numbered target registered a hit.
    HitTarget(u8),
    /// The ball passed the tunnel sensor.
    TunnelTriggered,
    /// The ball came back through the return chute.
    BallReturned,
    /// Fire the plunger.
    LaunchBall,
    /// The watchtower pressure trigger fired.
    SpecialSensorHit,
    /// The watchtower light sensor confirmed.
    SpecialConfirm,
    /// Sweep the tube clear.
    ClearTube,
}

impl From<InputRole> for Command {
    fn from(role: InputRole) -> Self {
        match role {
            InputRole::Tunnel => Command::TunnelTriggered,
            InputRole::BallReturn => Command::BallReturned,
            InputRole::Target(target) => Command::HitTarget(target),
            InputRole::SpecialConfirm => Command::SpecialConfirm,
            InputRole::Start => Command::Start,
            InputRole::Launch => Command::LaunchBall,
            InputRole::NextTurn => Command::ForceNextTurn,
        }
    }
}

/// A parsed console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleInput {
    /// Forward to the game.
    Command(Command),
    /// Stop the controller.
    Quit,
}

/// Parse one console line: a single key (`s`, `3`, `t`...) or a long name (`hit 3`,
/// `dispense red`...).
pub fn parse_input(line: &str, target_count: u8) -> Result<ConsoleInput, CommandParseError> {
    let line = line.trim().to_ascii_lowercase();
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err(CommandParseError::Empty);
    };
    let arg = words.next();

    let command = match (head, arg) {
        ("q" | "quit" | "exit", None) => return Ok(ConsoleInput::Quit),
        ("s" | "start" | "reset", None) => Command::Start,
        ("n" | "next", None) => Command::ForceNextTurn,
        ("r", None) => Command::Dispense(Team::Red),
        ("g", None) => Command::Dispense(Team::Green),
        ("d" | "dispense", Some(team)) => Command::Dispense(parse_team(team)?),
        ("t" | "tunnel", None) => Command::TunnelTriggered,
        ("b" | "return" | "returned", None) => Command::BallReturned,
        ("l" | "launch", None) => Command::LaunchBall,
        ("w" | "watchtower", None) => Command::SpecialSensorHit,
        ("c" | "confirm", None) => Command::SpecialConfirm,
        ("x" | "clear", None) => Command::ClearTube,
        ("hit", Some(target)) => Command::HitTarget(parse_target(target, target_count)?),
        (key, None) if key.bytes().all(|b| b.is_ascii_digit()) => {
            Command::HitTarget(parse_target(key, target_count)?)
        }
        _ => return Err(CommandParseError::Unknown(line.clone())),
    };
    Ok(ConsoleInput::Command(command))
}

fn parse_team(word: &str) -> Result<Team, CommandParseError> {
    match word {
        "r" | "red" => Ok(Team::Red),
        "g" | "green" => Ok(Team::Green),
        other => Err(CommandParseError::UnknownTeam(other.to_string())),
    }
}

fn parse_target(word: &str, target_count: u8) -> Result<u8, CommandParseError> {
    let out_of_range = |target| CommandParseError::TargetOutOfRange {
        target,
        max: target_count,
    };
    let target = word
        .parse::<u8>()
        .map_err(|_| out_of_range(u8::MAX))?;
    if (1..=target_count).contains(&target) {
        Ok(target)
    } else {
        Err(out_of_range(target))
    }
}

/// Forward console lines to the game until `q` or end of input.
///
/// Returns `true` when the operator asked to quit.
pub async fn run_console<R>(reader: R, dispatcher: Dispatcher, target_count: u8) -> bool
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = LinesStream::new(tokio::io::AsyncBufReadExt::lines(reader));
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "console read failed");
                return false;
            }
        };
        match parse_input(&line, target_count) {
            Ok(ConsoleInput::Quit) => {
                info!("quit requested from console");
                return true;
            }
            Ok(ConsoleInput::Command(command)) => {
                if !dispatcher.enqueue(command) {
                    return false;
                }
            }
            Err(CommandParseError::Empty) => {}
            Err(err) => warn!(error = %err, "ignoring console input"),
        }
    }
    false
}
