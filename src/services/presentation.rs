//! Console presentation: renders status notifications as log lines.

use tokio::sync::broadcast;
use tokio_stream::{
    StreamExt,
    wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};
use tracing::{info, warn};

use crate::state::status::StatusEvent;

/// Human-readable rendering of a notification.
pub fn render(event: &StatusEvent) -> String {
    match event {
        StatusEvent::Status { text, .. } => text.clone(),
        StatusEvent::Ball { text } if text.is_empty() => "(ball line cleared)".to_string(),
        StatusEvent::Ball { text } => format!("ball: {text}"),
        StatusEvent::Progress {
            team,
            completed,
            total,
            next_target,
        } => {
            let dots: String = (0..usize::from(*total))
                .map(|i| if i < *completed { '●' } else { '○' })
                .collect();
            match next_target {
                Some(target) => format!("{team} {dots} next target: {target}"),
                None => format!("{team} {dots}"),
            }
        }
        StatusEvent::PhotoReady { path, caption, .. } => {
            format!("photo ({caption}): {}", path.display())
        }
        StatusEvent::PhotoCleared => "(photo cleared)".to_string(),
        StatusEvent::Phase { phase, version } => format!("phase: {phase} (v{version})"),
    }
}

/// Log every notification until the hub goes away.
pub async fn run_console_presenter(receiver: broadcast::Receiver<StatusEvent>) {
    let mut events = BroadcastStream::new(receiver);
    while let Some(event) = events.next().await {
        match event {
            Ok(event) => info!(target: "castles_cans::display", "{}", render(&event)),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "presenter lagging; notifications dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::state::{game::Team, state_machine::GamePhase};

    use super::*;

    #[test]
    fn progress_renders_as_dots() {
        let line = render(&StatusEvent::Progress {
            team: Team::Red,
            completed: 2,
            total: 5,
            next_target: Some(4),
        });
        assert_eq!(line, "Red ●●○○○ next target: 4");
    }

    #[test]
    fn phase_and_ball_lines_render() {
        assert_eq!(
            render(&StatusEvent::Phase {
                phase: GamePhase::AwaitingLaunch,
                version: 3
            }),
            "phase: awaiting launch (v3)"
        );
        assert_eq!(
            render(&StatusEvent::Ball {
                text: "Ball returned".into()
            }),
            "ball: Ball returned"
        );
    }
}
