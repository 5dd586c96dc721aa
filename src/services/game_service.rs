//! Turn, target and phase logic of the game.
//!
//! [`GameService`] is the only writer of the session and the phase table. It runs inside the
//! dispatcher loop: every operation runs to completion, issues fire-and-forget actuator
//! commands, and schedules timers instead of waiting.

use std::sync::Arc;

use rand::{Rng, rngs::StdRng};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config::AppConfig,
    hardware::{
        Cue,
        actuators::{ActuatorDriver, IndicatorState},
    },
    services::{
        capture_service::{CaptureService, Photo, PhotoPurpose},
        commands::Command,
        dispatcher::{Dispatcher, GameMessage, ScheduledTimer, TimerKind, TimerTag},
        status_events,
    },
    state::{
        game::{GameSession, Team},
        state_machine::{GameEvent, GamePhase, GameStateMachine},
        status::StatusHub,
    },
};

/// Read-only view of one team's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    /// Completed targets, ascending.
    pub completed: Vec<u8>,
    /// Target to hit next.
    pub current_target: Option<u8>,
}

/// Read-only view of the whole game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameSnapshot {
    /// Active phase.
    pub phase: GamePhase,
    /// Transitions applied since process start.
    pub version: usize,
    /// Team whose turn it is.
    pub current_team: Option<Team>,
    /// Red team progress.
    pub red: ProgressSnapshot,
    /// Green team progress.
    pub green: ProgressSnapshot,
    /// A credited hit still needs the tunnel pass.
    pub awaiting_tunnel: bool,
    /// The ball is out of the launcher.
    pub ball_in_play: bool,
    /// The watchtower objective is armed.
    pub special_feature_active: bool,
    /// A chug photo waits for the ball return.
    pub chug_photo_stored: bool,
    /// Main status line.
    pub status: String,
}

impl GameSnapshot {
    /// Progress of `team`.
    pub fn progress(&self, team: Team) -> &ProgressSnapshot {
        match team {
            Team::Red => &self.red,
            Team::Green => &self.green,
        }
    }
}

/// Owner of the game session and its phase table.
pub struct GameService {
    config: Arc<AppConfig>,
    machine: GameStateMachine,
    session: GameSession,
    actuators: ActuatorDriver,
    hub: Arc<StatusHub>,
    capture: CaptureService,
    dispatcher: Dispatcher,
    rng: StdRng,
    status_seq: u64,
    status_text: String,
    /// Last status that is not a transient message; what a transient message reverts to.
    base_status: String,
}

impl GameService {
    /// Fresh service waiting for the first start.
    pub fn new(
        config: Arc<AppConfig>,
        actuators: ActuatorDriver,
        hub: Arc<StatusHub>,
        capture: CaptureService,
        dispatcher: Dispatcher,
        mut rng: StdRng,
    ) -> Self {
        let session = GameSession::new(config.target_count, &mut rng);
        Self {
            config,
            machine: GameStateMachine::new(),
            session,
            actuators,
            hub,
            capture,
            dispatcher,
            rng,
            status_seq: 0,
            status_text: String::new(),
            base_status: String::new(),
        }
    }

    /// Active phase.
    pub fn phase(&self) -> GamePhase {
        self.machine.phase()
    }

    /// Live session.
    pub fn session(&self) -> &GameSession {
        &self.session
    }

    /// Handle one message from the dispatcher queue.
    pub fn handle(&mut self, message: GameMessage) {
        match message {
            GameMessage::Command(command) => self.execute(command),
            GameMessage::Timer(timer) => self.fire(timer),
            GameMessage::PhotoCaptured {
                purpose,
                tag,
                photo,
            } => self.photo_captured(purpose, tag, photo),
            GameMessage::Query(reply) => {
                let _ = reply.send(self.snapshot());
            }
            GameMessage::Shutdown => {}
        }
    }

    /// Run a control command.
    pub fn execute(&mut self, command: Command) {
        debug!(?command, phase = %self.machine.phase(), "command");
        match command {
            Command::Start => self.start(),
            Command::ForceNextTurn => self.next_turn(),
            Command::Dispense(team) => self.dispense_beer(team),
            Command::HitTarget(target) => self.register_target_hit(target),
            Command::TunnelTriggered => self.tunnel_triggered(),
            Command::BallReturned => self.ball_returned(),
            Command::LaunchBall => self.launch_ball(),
            Command::SpecialSensorHit => self.special_sensor_hit(),
            Command::SpecialConfirm => self.special_confirm(),
            Command::ClearTube => self.clear_tube(),
        }
    }

    /// Start or restart the game. Accepted in every phase.
    pub fn start(&mut self) {
        info!(epoch = self.session.epoch + 1, "starting game");
        self.session
            .reset(self.config.target_count, &mut self.rng);
        self.actuators.reset_to_rest();
        self.transition(GameEvent::Start);

        self.set_status("Flipping coin...");
        self.set_ball_line("");
        status_events::broadcast_photo_cleared(&self.hub);
        self.schedule(self.config.timings.coin_flip, TimerKind::FinishCoinFlip);
    }

    /// Pick the starting team at random and open its turn.
    pub fn finish_coin_flip(&mut self) {
        if let Err(err) = self.machine.check(GameEvent::CoinFlipFinished) {
            debug!(error = %err, "coin flip result ignored");
            return;
        }

        let team = if self.rng.random_bool(0.5) {
            Team::Red
        } else {
            Team::Green
        };
        info!(%team, "coin flip");
        self.session.current_team = Some(team);
        self.session.turn += 1;
        self.transition(GameEvent::CoinFlipFinished);
        self.open_turn(team, "starts");
    }

    /// Register a hit on `target`, whatever the phase.
    pub fn register_target_hit(&mut self, target: u8) {
        if !self.config.is_valid_target(target) {
            warn!(target, "ignoring hit on unknown target");
            return;
        }

        self.actuators.acknowledge_hit(target);
        self.capture_photo(PhotoPurpose::Hit);

        let team = self
            .session
            .current_team
            .filter(|_| self.machine.phase() == GamePhase::PlayerTurn);
        let Some(team) = team else {
            self.set_status(&format!("Target {target} hit (not your turn)"));
            return;
        };

        if self.session.progress(team).current_target() == Some(target) {
            self.complete_target(team, target);
        } else {
            info!(%team, target, "target hit out of order");
            self.actuators.play_cue(Cue::Neutral);
            self.session.awaiting_tunnel = false;
            self.transition(GameEvent::TargetRegistered);
            self.set_status(&format!("Target {target} hit out of order - await tunnel"));
        }
    }

    /// Credit `target` to `team`, winning the game on the last one.
    fn complete_target(&mut self, team: Team, target: u8) {
        let target_count = self.config.target_count;
        if !self.session.progress_mut(team).complete(target, target_count) {
            warn!(%team, target, "target already completed");
            return;
        }
        self.actuators
            .set_indicator(target, IndicatorState::Lit(team));

        if self.session.progress(team).is_complete(target_count) {
            self.publish_progress();
            self.win_game(team);
            return;
        }

        let next = self
            .session
            .progress_mut(team)
            .draw_next(target_count, &mut self.rng);
        info!(%team, target, next_target = ?next, "target completed");
        self.publish_progress();
        self.session.awaiting_tunnel = true;
        self.transition(GameEvent::TargetRegistered);
        self.set_status(&format!("Target {target} hit! Await tunnel"));
    }

    fn win_game(&mut self, team: Team) {
        info!(%team, "game won");
        self.transition(GameEvent::Won);
        self.session.ball_in_play = false;
        self.session.awaiting_tunnel = false;
        self.session.special_feature_active = false;
        self.actuators.victory();
        self.set_status(&format!("{team} WINS!"));
        self.set_ball_line("");
    }

    /// Fire the plunger. Ignored outside [`GamePhase::AwaitingLaunch`].
    pub fn launch_ball(&mut self) {
        if self.machine.phase() != GamePhase::AwaitingLaunch {
            debug!(phase = %self.machine.phase(), "launch ignored");
            return;
        }

        self.actuators.launch_plunger();
        self.session.ball_in_play = true;
        if self.session.awaiting_tunnel {
            self.start_chug_phase();
        } else {
            self.transition(GameEvent::BallLaunched);
            self.set_ball_line("Ball launched - waiting for return");
            self.set_status("Ball launched");
        }
        status_events::broadcast_photo_cleared(&self.hub);
    }

    fn start_chug_phase(&mut self) {
        self.transition(GameEvent::ChugStarted);
        if let Some(team) = self.session.current_team {
            self.actuators.start_chug(team);
            self.set_status(&format!("{team} CHUG!"));
        }
        self.set_ball_line("Ball launched - chug!");
        self.schedule(self.config.timings.chug_photo, TimerKind::CaptureChugPhoto);
    }

    /// The ball passed the tunnel sensor.
    pub fn tunnel_triggered(&mut self) {
        if let Err(err) = self.machine.check(GameEvent::TunnelPassed) {
            debug!(error = %err, "tunnel trigger ignored");
            return;
        }

        self.actuators.activate_tunnel();
        self.session.ball_in_play = false;
        self.transition(GameEvent::TunnelPassed);

        match self.session.current_team {
            Some(team) if self.session.awaiting_tunnel => {
                self.set_status(&format!("{team} target cleared! Preparing launch"));
            }
            _ => {
                self.set_status("Ball entered tunnel");
            }
        }
        self.schedule(self.config.timings.launch_ready, TimerKind::ReadyToLaunch);
    }

    /// The ball came back through the return chute.
    pub fn ball_returned(&mut self) {
        if self.machine.phase() == GamePhase::Chug {
            if let Some(team) = self.session.current_team {
                self.actuators.stop_chug(team);
            }
            self.session.ball_in_play = false;
            self.set_ball_line("Ball returned! Stop chugging");
            if let Some(photo) = self.session.chug_photo.clone() {
                status_events::broadcast_photo_ready(&self.hub, &photo, PhotoPurpose::Chug.prefix());
            }
            self.schedule(self.config.timings.chug_turn, TimerKind::NextTurn);
        } else if self.session.ball_in_play {
            self.session.ball_in_play = false;
            self.set_ball_line("Ball returned");
            if self.machine.phase() != GamePhase::GameOver {
                self.schedule(self.config.timings.return_turn, TimerKind::NextTurn);
            }
        } else {
            debug!(phase = %self.machine.phase(), "ball return ignored");
        }
    }

    /// Hand the turn to the other team. Ignored before the first coin flip and after a win.
    pub fn next_turn(&mut self) {
        let Some(team) = self.session.current_team else {
            debug!("no team has played yet; next turn ignored");
            return;
        };
        if let Err(err) = self.machine.check(GameEvent::TurnPassed) {
            debug!(error = %err, "next turn ignored");
            return;
        }

        if self.machine.phase() == GamePhase::Chug {
            self.actuators.stop_chug(team);
        }

        let next = team.other();
        self.session.current_team = Some(next);
        self.session.turn += 1;
        self.session
            .progress_mut(next)
            .draw_next(self.config.target_count, &mut self.rng);
        self.session.awaiting_tunnel = false;
        self.session.ball_in_play = false;
        self.session.special_feature_active = false;
        self.session.chug_photo = None;
        self.transition(GameEvent::TurnPassed);

        status_events::broadcast_photo_cleared(&self.hub);
        self.open_turn(next, "turn");
    }

    /// Pour a beer for `team`. Accepted in every phase.
    pub fn dispense_beer(&mut self, team: Team) {
        self.actuators.dispense(team);
        let seq = self.publish_status(&format!("Dispensing beer for {team}"));
        self.schedule(
            self.config.timings.status_revert,
            TimerKind::RevertStatus { seq },
        );
    }

    /// Pressure trigger of the watchtower objective.
    pub fn special_sensor_hit(&mut self) {
        if self.session.special_feature_active {
            debug!("watchtower already armed");
            return;
        }
        let Some((team, special)) = self.special_target_open() else {
            debug!(phase = %self.machine.phase(), "watchtower trigger ignored");
            return;
        };

        info!(%team, target = special, "watchtower armed");
        self.session.special_feature_active = true;
        self.actuators.play_cue(Cue::Armed);
        self.set_ball_line("Watchtower armed - confirm the light");
    }

    /// Light sensor confirming the watchtower objective.
    pub fn special_confirm(&mut self) {
        if !self.session.special_feature_active {
            debug!("watchtower not armed; confirm ignored");
            return;
        }
        let Some((team, special)) = self.special_target_open() else {
            debug!(phase = %self.machine.phase(), "watchtower confirm ignored");
            return;
        };

        info!(%team, target = special, "watchtower confirmed");
        self.session.special_feature_active = false;
        self.complete_target(team, special);
    }

    /// Sweep the tube clear. Accepted in every phase.
    pub fn clear_tube(&mut self) {
        self.actuators.clear_tube();
        self.set_ball_line("Clearing tube");
    }

    /// Snapshot of the live game.
    pub fn snapshot(&self) -> GameSnapshot {
        let progress = |team| {
            let progress = self.session.progress(team);
            ProgressSnapshot {
                completed: progress.completed().iter().copied().collect(),
                current_target: progress.current_target(),
            }
        };
        let machine = self.machine.snapshot();

        GameSnapshot {
            phase: machine.phase,
            version: machine.version,
            current_team: self.session.current_team,
            red: progress(Team::Red),
            green: progress(Team::Green),
            awaiting_tunnel: self.session.awaiting_tunnel,
            ball_in_play: self.session.ball_in_play,
            special_feature_active: self.session.special_feature_active,
            chug_photo_stored: self.session.chug_photo.is_some(),
            status: self.status_text.clone(),
        }
    }

    /// The team and special target when the watchtower objective may progress.
    fn special_target_open(&self) -> Option<(Team, u8)> {
        let special = self.config.special_target?;
        let team = self.session.current_team?;
        let phase_open = match self.machine.phase() {
            GamePhase::PlayerTurn => true,
            GamePhase::AwaitingTunnel => self.config.special_arm_outside_turn,
            _ => false,
        };
        let on_special = self.session.progress(team).current_target() == Some(special);
        (phase_open && on_special).then_some((team, special))
    }

    fn fire(&mut self, timer: ScheduledTimer) {
        let ScheduledTimer { tag, kind } = timer;
        let current = self.tag();
        match kind {
            TimerKind::RevertStatus { seq } => {
                if seq == self.status_seq {
                    let text = self.base_status.clone();
                    self.publish_status(&text);
                } else {
                    debug!(seq, current = self.status_seq, "status replaced meanwhile; not reverting");
                }
            }
            kind if tag != current => {
                debug!(?kind, ?tag, ?current, "dropping stale timer");
            }
            TimerKind::FinishCoinFlip => self.finish_coin_flip(),
            TimerKind::ReadyToLaunch => {
                self.set_status("Ready to launch - press L");
            }
            TimerKind::NextTurn => self.next_turn(),
            TimerKind::CaptureChugPhoto => self.capture_photo(PhotoPurpose::Chug),
        }
    }

    fn photo_captured(&mut self, purpose: PhotoPurpose, tag: TimerTag, photo: Photo) {
        if tag.epoch != self.session.epoch || tag.turn != self.session.turn {
            debug!(?purpose, path = %photo.path.display(), "photo from an earlier turn discarded");
            return;
        }

        match purpose {
            PhotoPurpose::Hit => {
                status_events::broadcast_photo_ready(&self.hub, &photo, purpose.prefix());
            }
            PhotoPurpose::Chug => {
                // The ball may already be back; show the photo as soon as it exists.
                if self.machine.phase() == GamePhase::Chug && !self.session.ball_in_play {
                    status_events::broadcast_photo_ready(&self.hub, &photo, purpose.prefix());
                }
                self.session.chug_photo = Some(photo);
            }
        }
    }

    fn open_turn(&mut self, team: Team, verb: &str) {
        let progress = self.session.progress(team);
        self.actuators
            .restore_targets(team, progress.completed(), self.config.target_count);
        let status = match progress.current_target() {
            Some(target) => format!("{team} {verb} - hit target {target}"),
            None => format!("{team} {verb}"),
        };
        self.set_status(&status);
        self.publish_progress();
        self.set_ball_line("Throw ball at the castle");
    }

    fn transition(&mut self, event: GameEvent) -> bool {
        match self.machine.apply(event) {
            Ok(phase) => {
                info!(%phase, ?event, "phase changed");
                status_events::broadcast_phase(&self.hub, self.machine.snapshot());
                true
            }
            Err(err) => {
                debug!(error = %err, "transition rejected");
                false
            }
        }
    }

    fn tag(&self) -> TimerTag {
        TimerTag {
            epoch: self.session.epoch,
            turn: self.session.turn,
            phase: self.machine.phase(),
        }
    }

    fn schedule(&self, delay: std::time::Duration, kind: TimerKind) {
        self.dispatcher.schedule(
            delay,
            ScheduledTimer {
                tag: self.tag(),
                kind,
            },
        );
    }

    fn capture_photo(&self, purpose: PhotoPurpose) {
        self.capture
            .spawn_capture(purpose, self.tag(), self.dispatcher.clone());
    }

    fn set_status(&mut self, text: &str) -> u64 {
        self.base_status = text.to_string();
        self.publish_status(text)
    }

    /// Show `text` without making it the status a transient message reverts to.
    fn publish_status(&mut self, text: &str) -> u64 {
        self.status_seq += 1;
        self.status_text = text.to_string();
        info!(seq = self.status_seq, status = text, "status");
        status_events::broadcast_status(&self.hub, self.status_seq, text);
        self.status_seq
    }

    fn set_ball_line(&self, text: &str) {
        status_events::broadcast_ball(&self.hub, text);
    }

    fn publish_progress(&self) {
        if let Some(team) = self.session.current_team {
            status_events::broadcast_progress(
                &self.hub,
                team,
                self.session.progress(team),
                self.config.target_count,
            );
        }
    }
}
