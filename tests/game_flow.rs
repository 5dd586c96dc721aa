//! Integration tests driving the whole controller: sensors and commands go through the
//! dispatcher into the game loop, actuator commands land on recording peripherals.

use std::{fs, sync::Arc, time::Duration};

use castles_cans::{
    config::{AppConfig, SERVO_GATE, SERVO_PLATFORM},
    hardware::{
        Cue, positions::PositionStore, simulated::SimulatedPeripherals,
        testing::RecordingPeripherals,
    },
    services::{capture_service::CaptureService, commands::Command, game_service::GameSnapshot},
    state::{AppContext, RunningGame, game::Team, state_machine::GamePhase},
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tempfile::TempDir;
use tokio::time::sleep;

struct Rig {
    hw: Arc<RecordingPeripherals>,
    config: AppConfig,
    _dir: TempDir,
}

impl Rig {
    fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let mut config = AppConfig::default();
        config.positions_path = dir.path().join("servo_positions.json");
        config.capture_dir = dir.path().join("captures");

        let hw = Arc::new(RecordingPeripherals::new());
        // Pull-up inputs idle high.
        for input in &config.digital_inputs {
            hw.set_digital(input.pin, input.active_low);
        }
        Self {
            hw,
            config,
            _dir: dir,
        }
    }

    fn start(&self, seed: u64) -> RunningGame {
        let positions =
            PositionStore::load(&self.config.positions_path, &self.config.rest_angles());
        let capture = CaptureService::placeholder_only(self.config.capture_dir.clone());
        AppContext::new(self.config.clone(), self.hw.clone(), positions, capture)
            .start_with_rng(StdRng::seed_from_u64(seed))
    }

    async fn press_pad(&self, channel: u8) {
        self.hw.set_analog(channel, 900);
        sleep(Duration::from_millis(120)).await;
        self.hw.set_analog(channel, 0);
        sleep(Duration::from_millis(120)).await;
    }

    async fn trigger_input(&self, pin: u8) {
        self.hw.set_digital(pin, false);
        sleep(Duration::from_millis(120)).await;
        self.hw.set_digital(pin, true);
        sleep(Duration::from_millis(120)).await;
    }
}

async fn snapshot(game: &RunningGame) -> GameSnapshot {
    game.dispatcher
        .snapshot()
        .await
        .expect("game loop should be running")
}

async fn started(game: &RunningGame) -> GameSnapshot {
    game.dispatcher.enqueue(Command::Start);
    sleep(Duration::from_millis(1100)).await;
    let snap = snapshot(game).await;
    assert_eq!(snap.phase, GamePhase::PlayerTurn);
    snap
}

/// Hit, tunnel, launch, chug and return: the turn passes to the other team.
#[tokio::test(start_paused = true)]
async fn chug_round_driven_by_sensors() {
    let rig = Rig::new();
    let game = rig.start(11);

    let snap = started(&game).await;
    let team = snap.current_team.expect("coin flip picks a team");
    let target = snap.progress(team).current_target.expect("a target to hit");

    rig.press_pad(target - 1).await;
    let snap = snapshot(&game).await;
    assert_eq!(snap.phase, GamePhase::AwaitingTunnel);
    assert_eq!(snap.progress(team).completed, vec![target]);
    assert!(snap.awaiting_tunnel);

    rig.trigger_input(16).await;
    assert_eq!(snapshot(&game).await.phase, GamePhase::AwaitingLaunch);

    game.dispatcher.enqueue(Command::LaunchBall);
    let snap = snapshot(&game).await;
    assert_eq!(snap.phase, GamePhase::Chug);
    assert!(snap.ball_in_play);

    rig.trigger_input(20).await;
    let snap = snapshot(&game).await;
    assert_eq!(snap.phase, GamePhase::Chug);
    assert!(!snap.ball_in_play);

    sleep(Duration::from_millis(2100)).await;
    let snap = snapshot(&game).await;
    assert_eq!(snap.phase, GamePhase::PlayerTurn);
    assert_eq!(snap.current_team, Some(team.other()));

    let chug_pin = match team {
        Team::Red => rig.config.outputs.chug_red,
        Team::Green => rig.config.outputs.chug_green,
    };
    let beacon = rig.hw.digital_writes(chug_pin);
    assert!(beacon.contains(&true));
    assert_eq!(beacon.last(), Some(&false));
    assert!(rig.hw.cues().contains(&Cue::Chug));

    game.shutdown().await.expect("clean shutdown");
}

/// A target that is not the current one leaves progress untouched.
#[tokio::test(start_paused = true)]
async fn out_of_order_hit_requires_only_the_tunnel() {
    let rig = Rig::new();
    let game = rig.start(5);

    let snap = started(&game).await;
    let team = snap.current_team.expect("coin flip picks a team");
    let target = snap.progress(team).current_target.expect("a target to hit");
    let wrong = (1..=rig.config.target_count)
        .find(|candidate| *candidate != target)
        .expect("more than one target");

    game.dispatcher.enqueue(Command::HitTarget(wrong));
    let snap = snapshot(&game).await;
    assert_eq!(snap.phase, GamePhase::AwaitingTunnel);
    assert!(!snap.awaiting_tunnel);
    assert!(snap.progress(team).completed.is_empty());
    assert!(rig.hw.cues().contains(&Cue::Neutral));

    game.dispatcher.enqueue(Command::TunnelTriggered);
    game.dispatcher.enqueue(Command::LaunchBall);
    game.dispatcher.enqueue(Command::LaunchBall);
    let snap = snapshot(&game).await;
    assert_eq!(snap.phase, GamePhase::BallLaunched);
    let plunger_pulses = rig
        .hw
        .digital_writes(rig.config.outputs.plunger)
        .into_iter()
        .filter(|level| *level)
        .count();
    assert_eq!(plunger_pulses, 1);

    game.shutdown().await.expect("clean shutdown");
}

/// Five straight hits by one team end the game and move the victory servos.
#[tokio::test(start_paused = true)]
async fn five_hits_win_and_persist_victory_servos() {
    let rig = Rig::new();
    let game = rig.start(3);

    let snap = started(&game).await;
    let team = snap.current_team.expect("coin flip picks a team");

    for hit in 1..=5 {
        let snap = snapshot(&game).await;
        let target = snap.progress(team).current_target.expect("a target to hit");
        game.dispatcher.enqueue(Command::HitTarget(target));
        if hit < 5 {
            game.dispatcher.enqueue(Command::ForceNextTurn);
            game.dispatcher.enqueue(Command::ForceNextTurn);
        }
    }

    let snap = snapshot(&game).await;
    assert_eq!(snap.phase, GamePhase::GameOver);
    assert_eq!(snap.progress(team).completed, vec![1, 2, 3, 4, 5]);
    assert_eq!(snap.progress(team).current_target, None);
    assert_eq!(snap.status, format!("{team} WINS!"));
    assert!(rig.hw.cues().contains(&Cue::Victory));

    game.dispatcher.enqueue(Command::ForceNextTurn);
    assert_eq!(snapshot(&game).await.phase, GamePhase::GameOver);

    game.shutdown().await.expect("clean shutdown");
    let record: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(&rig.config.positions_path).expect("position record written"),
    )
    .expect("position record is JSON");
    assert_eq!(record[SERVO_GATE], 90.0);
    assert_eq!(record[SERVO_PLATFORM], 120.0);
}

/// Servos left away from rest by a previous run are swept back exactly once.
#[tokio::test(start_paused = true)]
async fn startup_recovers_displaced_servos() {
    let rig = Rig::new();
    fs::write(
        &rig.config.positions_path,
        r#"{ "gate": 90.0, "platform": 0.0, "tube": 10.0 }"#,
    )
    .expect("seed position record");

    let game = rig.start(1);
    let gate = rig.config.servos[SERVO_GATE];
    let platform = rig.config.servos[SERVO_PLATFORM];
    assert_eq!(rig.hw.servo_writes(gate.pwm_channel), vec![gate.rest_angle]);
    assert!(rig.hw.servo_writes(platform.pwm_channel).is_empty());
    game.shutdown().await.expect("clean shutdown");

    rig.hw.clear_calls();
    let game = rig.start(1);
    assert!(rig.hw.servo_writes(gate.pwm_channel).is_empty());
    game.shutdown().await.expect("clean shutdown");
}

/// A turn change scheduled by a chug in the previous game never fires into the new one.
#[tokio::test(start_paused = true)]
async fn restart_discards_pending_turn_change() {
    let rig = Rig::new();
    let game = rig.start(9);

    let snap = started(&game).await;
    let team = snap.current_team.expect("coin flip picks a team");
    let target = snap.progress(team).current_target.expect("a target to hit");
    game.dispatcher.enqueue(Command::HitTarget(target));
    game.dispatcher.enqueue(Command::TunnelTriggered);
    game.dispatcher.enqueue(Command::LaunchBall);
    game.dispatcher.enqueue(Command::BallReturned);
    assert_eq!(snapshot(&game).await.phase, GamePhase::Chug);

    // The chug turn change is due after the new coin flip has opened a turn.
    let snap = started(&game).await;
    let team = snap.current_team;
    assert!(snap.red.completed.is_empty());
    assert!(snap.green.completed.is_empty());

    sleep(Duration::from_millis(3000)).await;
    let snap = snapshot(&game).await;
    assert_eq!(snap.phase, GamePhase::PlayerTurn);
    assert_eq!(snap.current_team, team);

    game.shutdown().await.expect("clean shutdown");
}

/// Random command sequences never give a team more than N targets or the same target twice.
#[tokio::test(start_paused = true)]
async fn random_play_keeps_progress_consistent() {
    let rig = Rig::new();
    let target_count = rig.config.target_count;
    let game = rig.start(17);
    let mut rng = StdRng::seed_from_u64(4242);
    started(&game).await;

    for step in 0..400 {
        let command = match rng.random_range(0..12) {
            0..=4 => Command::HitTarget(rng.random_range(1..=target_count)),
            5 => Command::TunnelTriggered,
            6 => Command::LaunchBall,
            7 => Command::BallReturned,
            8 => Command::ForceNextTurn,
            9 => Command::SpecialSensorHit,
            10 => Command::SpecialConfirm,
            _ if rng.random_bool(0.1) => Command::Start,
            _ => Command::Dispense(Team::Red),
        };
        game.dispatcher.enqueue(command);
        if rng.random_bool(0.3) {
            sleep(Duration::from_millis(rng.random_range(0..2500))).await;
        }

        let snap = snapshot(&game).await;
        for team in [Team::Red, Team::Green] {
            let progress = snap.progress(team);
            assert!(
                progress.completed.len() <= usize::from(target_count),
                "step {step}: {team} completed {:?}",
                progress.completed
            );
            assert!(
                progress.completed.windows(2).all(|pair| pair[0] < pair[1]),
                "step {step}: {team} completed {:?}",
                progress.completed
            );
            assert!(
                progress
                    .completed
                    .iter()
                    .all(|target| (1..=target_count).contains(target)),
                "step {step}: {team} completed {:?}",
                progress.completed
            );
            if let Some(target) = progress.current_target {
                assert!(!progress.completed.contains(&target), "step {step}: {team}");
            }
        }
        if snap.phase == GamePhase::GameOver {
            let winners = [Team::Red, Team::Green]
                .into_iter()
                .filter(|team| snap.progress(*team).completed.len() == usize::from(target_count))
                .count();
            assert_eq!(winners, 1, "step {step}: game over without a single winner");
        }
    }

    game.shutdown().await.expect("clean shutdown");
}

/// Without hardware every command still runs and the game logic is unchanged.
#[tokio::test(start_paused = true)]
async fn simulated_hardware_runs_the_same_game() {
    let dir = TempDir::new().expect("temp dir");
    let mut config = AppConfig::default();
    config.positions_path = dir.path().join("servo_positions.json");
    let positions = PositionStore::load(&config.positions_path, &config.rest_angles());
    let capture = CaptureService::placeholder_only(dir.path().join("captures"));
    let game = AppContext::new(config, Arc::new(SimulatedPeripherals), positions, capture)
        .start_with_rng(StdRng::seed_from_u64(2));
    assert!(!game.actuators.available());
    assert_eq!(game.actuators.read_analog_channel(0).expect("valid channel"), 0);

    let snap = started(&game).await;
    let team = snap.current_team.expect("coin flip picks a team");
    let target = snap.progress(team).current_target.expect("a target to hit");

    game.dispatcher.enqueue(Command::Dispense(team));
    game.dispatcher.enqueue(Command::ClearTube);
    game.dispatcher.enqueue(Command::HitTarget(target));
    game.dispatcher.enqueue(Command::TunnelTriggered);
    let snap = snapshot(&game).await;
    assert_eq!(snap.phase, GamePhase::AwaitingLaunch);
    assert_eq!(snap.status, format!("{team} target cleared! Preparing launch"));

    game.shutdown().await.expect("clean shutdown");
}
