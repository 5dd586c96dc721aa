use std::{collections::BTreeSet, fmt};

use rand::{Rng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};

use crate::services::capture_service::Photo;

/// One of the two competing teams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    /// Red team.
    Red,
    /// Green team.
    Green,
}

impl Team {
    /// Both teams, in a fixed order.
    pub const ALL: [Team; 2] = [Team::Red, Team::Green];

    /// The opposing team.
    pub fn other(self) -> Self {
        match self {
            Team::Red => Team::Green,
            Team::Green => Team::Red,
        }
    }

    /// Display name used in status lines.
    pub fn label(self) -> &'static str {
        match self {
            Team::Red => "Red",
            Team::Green => "Green",
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Targets a team has completed and the one it must hit next.
///
/// `current_target` is never part of `completed`, and is `None` only once every target has
/// been completed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamProgress {
    completed: BTreeSet<u8>,
    current_target: Option<u8>,
}

impl TeamProgress {
    /// Fresh progress with a randomly drawn first target.
    pub fn new<R: Rng + ?Sized>(target_count: u8, rng: &mut R) -> Self {
        let mut progress = Self::default();
        progress.draw_next(target_count, rng);
        progress
    }

    /// Targets completed so far, in ascending order.
    pub fn completed(&self) -> &BTreeSet<u8> {
        &self.completed
    }

    /// Number of completed targets.
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// The target the team must hit next.
    pub fn current_target(&self) -> Option<u8> {
        self.current_target
    }

    /// Whether every one of the `target_count` targets is completed.
    pub fn is_complete(&self, target_count: u8) -> bool {
        self.completed.len() >= usize::from(target_count)
    }

    /// Targets not completed yet.
    pub fn remaining(&self, target_count: u8) -> Vec<u8> {
        (1..=target_count)
            .filter(|target| !self.completed.contains(target))
            .collect()
    }

    /// Draw a new current target uniformly among the remaining ones.
    ///
    /// Returns `None` (and clears the current target) when nothing is left.
    pub fn draw_next<R: Rng + ?Sized>(&mut self, target_count: u8, rng: &mut R) -> Option<u8> {
        self.current_target = self.remaining(target_count).choose(rng).copied();
        self.current_target
    }

    /// Mark `target` completed. Returns `false` if it was already completed or out of range.
    pub fn complete(&mut self, target: u8, target_count: u8) -> bool {
        if !(1..=target_count).contains(&target) || !self.completed.insert(target) {
            return false;
        }
        if self.current_target == Some(target) {
            self.current_target = None;
        }
        true
    }
}

/// Aggregated state of the game in progress. Owned by the game service only.
#[derive(Debug, Clone)]
pub struct GameSession {
    /// Team whose turn it is; `None` until the coin flip of the current game.
    pub current_team: Option<Team>,
    red: TeamProgress,
    green: TeamProgress,
    /// The ball must pass the tunnel to credit the target just hit.
    pub awaiting_tunnel: bool,
    /// The ball is travelling after a launch or a throw.
    pub ball_in_play: bool,
    /// The watchtower objective has been armed and awaits its light sensor.
    pub special_feature_active: bool,
    /// Chug photo taken during the current turn, shown when the ball comes back.
    pub chug_photo: Option<Photo>,
    /// Incremented on every reset; stale timers compare against it.
    pub epoch: u64,
    /// Incremented on every turn hand-over within an epoch.
    pub turn: u64,
}

impl GameSession {
    /// Session as it exists at process start, before any game.
    pub fn new<R: Rng + ?Sized>(target_count: u8, rng: &mut R) -> Self {
        Self {
            current_team: None,
            red: TeamProgress::new(target_count, rng),
            green: TeamProgress::new(target_count, rng),
            awaiting_tunnel: false,
            ball_in_play: false,
            special_feature_active: false,
            chug_photo: None,
            epoch: 0,
            turn: 0,
        }
    }

    /// Re-initialise for a new game, invalidating every timer scheduled for the previous one.
    pub fn reset<R: Rng + ?Sized>(&mut self, target_count: u8, rng: &mut R) {
        let epoch = self.epoch + 1;
        *self = Self::new(target_count, rng);
        self.epoch = epoch;
    }

    /// Progress of `team`.
    pub fn progress(&self, team: Team) -> &TeamProgress {
        match team {
            Team::Red => &self.red,
            Team::Green => &self.green,
        }
    }

    /// Mutable progress of `team`.
    pub fn progress_mut(&mut self, team: Team) -> &mut TeamProgress {
        match team {
            Team::Red => &mut self.red,
            Team::Green => &mut self.green,
        }
    }

    /// Current target of the team whose turn it is.
    pub fn current_target(&self) -> Option<u8> {
        self.current_team
            .and_then(|team| self.progress(team).current_target())
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn other_team_alternates() {
        assert_eq!(Team::Red.other(), Team::Green);
        assert_eq!(Team::Green.other(), Team::Red);
        assert_eq!(Team::Red.to_string(), "Red");
    }

    #[test]
    fn new_progress_draws_a_target_in_range() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let progress = TeamProgress::new(7, &mut rng);
            let target = progress.current_target().unwrap();
            assert!((1..=7).contains(&target));
            assert_eq!(progress.completed_count(), 0);
        }
    }

    #[test]
    fn completing_every_target_exhausts_the_draw() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut progress = TeamProgress::new(5, &mut rng);

        for _ in 0..5 {
            let target = progress.current_target().unwrap();
            assert!(progress.complete(target, 5));
            assert!(!progress.completed().contains(&progress.current_target().unwrap_or(0)));
            if progress.is_complete(5) {
                break;
            }
            let next = progress.draw_next(5, &mut rng).unwrap();
            assert!(!progress.completed().contains(&next));
        }

        assert!(progress.is_complete(5));
        assert_eq!(progress.current_target(), None);
        assert_eq!(progress.draw_next(5, &mut rng), None);
    }

    #[test]
    fn complete_rejects_duplicates_and_out_of_range() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut progress = TeamProgress::new(5, &mut rng);

        assert!(progress.complete(2, 5));
        assert!(!progress.complete(2, 5));
        assert!(!progress.complete(0, 5));
        assert!(!progress.complete(6, 5));
        assert_eq!(progress.completed_count(), 1);
    }

    #[test]
    fn reset_bumps_epoch_and_clears_state() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut session = GameSession::new(5, &mut rng);
        session.current_team = Some(Team::Green);
        session.ball_in_play = true;
        session.turn = 6;
        session.progress_mut(Team::Green).complete(1, 5);

        session.reset(5, &mut rng);

        assert_eq!(session.epoch, 1);
        assert_eq!(session.turn, 0);
        assert_eq!(session.current_team, None);
        assert!(!session.ball_in_play);
        assert_eq!(session.progress(Team::Green).completed_count(), 0);
        assert!(session.progress(Team::Red).current_target().is_some());
    }
}
