use tracing::debug;

use crate::{
    services::capture_service::Photo,
    state::{
        game::{Team, TeamProgress},
        state_machine::Snapshot,
        status::{StatusEvent, StatusHub},
    },
};

/// Broadcast the main status line.
pub fn broadcast_status(hub: &StatusHub, seq: u64, text: &str) {
    send_event(
        hub,
        StatusEvent::Status {
            seq,
            text: text.to_string(),
        },
    );
}

/// Broadcast the secondary line describing the ball; an empty text clears it.
pub fn broadcast_ball(hub: &StatusHub, text: &str) {
    send_event(
        hub,
        StatusEvent::Ball {
            text: text.to_string(),
        },
    );
}

/// Broadcast the progress of the team whose turn it is.
pub fn broadcast_progress(hub: &StatusHub, team: Team, progress: &TeamProgress, total: u8) {
    send_event(
        hub,
        StatusEvent::Progress {
            team,
            completed: progress.completed_count(),
            total,
            next_target: progress.current_target(),
        },
    );
}

/// Broadcast that a photo is ready to be shown.
pub fn broadcast_photo_ready(hub: &StatusHub, photo: &Photo, caption: &str) {
    send_event(
        hub,
        StatusEvent::PhotoReady {
            id: photo.id,
            path: photo.path.clone(),
            caption: caption.to_string(),
        },
    );
}

/// Broadcast that the displayed photo should be removed.
pub fn broadcast_photo_cleared(hub: &StatusHub) {
    send_event(hub, StatusEvent::PhotoCleared);
}

/// Broadcast a phase change.
pub fn broadcast_phase(hub: &StatusHub, snapshot: Snapshot) {
    send_event(
        hub,
        StatusEvent::Phase {
            phase: snapshot.phase,
            version: snapshot.version,
        },
    );
}

fn send_event(hub: &StatusHub, event: StatusEvent) {
    debug!(?event, "status event");
    hub.broadcast(event);
}
