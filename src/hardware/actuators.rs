//! Fire-and-forget actuator commands: relays, servos, indicators and cues.
//!
//! Nothing here knows the game rules. Every command returns immediately; timed parts
//! (relay pulses, servo holds) finish in background tasks. Peripheral failures are logged
//! and swallowed so a missing board never changes what the game does.

use std::{
    collections::BTreeSet,
    sync::{Arc, atomic::AtomicBool},
    time::Duration,
};

use dashmap::DashMap;
use indexmap::IndexMap;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    config::{AppConfig, OutputPins, SERVO_GATE, SERVO_PLATFORM, SERVO_TUBE, ServoConfig, Timings},
    error::HardwareError,
    hardware::{Cue, Peripherals, positions::PositionStore, read_analog_channel},
    state::game::Team,
};

/// How long a digital output keeps the commanded level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hold {
    /// Revert to the opposite level after the duration.
    Pulse(Duration),
    /// Keep the level until commanded otherwise.
    Latch,
}

/// State of a target indicator light.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorState {
    /// Target still to be completed.
    Off,
    /// Target completed by the team.
    Lit(Team),
}

/// Command sink for every actuator of the cabinet.
#[derive(Clone)]
pub struct ActuatorDriver {
    inner: Arc<DriverInner>,
}

struct DriverInner {
    peripherals: Arc<dyn Peripherals>,
    outputs: OutputPins,
    indicator_pins: Vec<u8>,
    servos: IndexMap<String, ServoConfig>,
    positions: PositionStore,
    timings: Timings,
    analog_channels: u8,
    analog_degraded: AtomicBool,
    /// Bumped on every write to a pin; a pulse only releases a pin nobody drove since.
    pin_generations: DashMap<u8, u64>,
}

impl ActuatorDriver {
    /// Build the driver over `peripherals`, using `positions` as the servo angle record.
    pub fn new(
        peripherals: Arc<dyn Peripherals>,
        config: &AppConfig,
        positions: PositionStore,
    ) -> Self {
        Self {
            inner: Arc::new(DriverInner {
                peripherals,
                outputs: config.outputs,
                indicator_pins: config.indicator_pins.clone(),
                servos: config.servos.clone(),
                positions,
                timings: config.timings,
                analog_channels: config.analog_channels,
                analog_degraded: AtomicBool::new(false),
                pin_generations: DashMap::new(),
            }),
        }
    }

    /// Whether real hardware backs the driver.
    pub fn available(&self) -> bool {
        self.inner.peripherals.available()
    }

    /// Persisted servo angles.
    pub fn positions(&self) -> &PositionStore {
        &self.inner.positions
    }

    /// Drive `pin` to `level`. A pulse reverts in a background task after its duration,
    /// unless the pin was driven again in the meantime.
    pub fn set_digital_output(&self, pin: u8, level: bool, hold: Hold) {
        let generation = self.next_generation(pin);
        drive(self.inner.peripherals.as_ref(), pin, level);

        if let Hold::Pulse(duration) = hold {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                sleep(duration).await;
                let current = inner
                    .pin_generations
                    .get(&pin)
                    .is_some_and(|entry| *entry.value() == generation);
                if current {
                    drive(inner.peripherals.as_ref(), pin, !level);
                } else {
                    debug!(pin, "pulse release superseded by a later write");
                }
            });
        }
    }

    fn next_generation(&self, pin: u8) -> u64 {
        let mut entry = self.inner.pin_generations.entry(pin).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Move `servo` to `angle` and persist the new angle.
    pub fn set_rotational_position(&self, servo: &str, angle: f32) {
        let Some(config) = self.inner.servos.get(servo) else {
            warn!(servo, "unknown servo; ignoring move");
            return;
        };

        move_servo(self.inner.peripherals.as_ref(), servo, config.pwm_channel, angle);
        self.inner.positions.record(servo, angle);
    }

    /// Move `servo` to `angle`, hold, then move it to `return_angle`.
    ///
    /// `return_angle` is persisted as soon as the sweep is issued, so a restart mid-sweep
    /// records the servo as already back at rest.
    pub fn sweep_and_return(&self, servo: &str, angle: f32, hold: Duration, return_angle: f32) {
        let Some(config) = self.inner.servos.get(servo) else {
            warn!(servo, "unknown servo; ignoring sweep");
            return;
        };

        let pwm_channel = config.pwm_channel;
        move_servo(self.inner.peripherals.as_ref(), servo, pwm_channel, angle);
        self.inner.positions.record(servo, return_angle);

        let peripherals = Arc::clone(&self.inner.peripherals);
        let servo = servo.to_string();
        tokio::spawn(async move {
            sleep(hold).await;
            move_servo(peripherals.as_ref(), &servo, pwm_channel, return_angle);
        });
    }

    /// Read one analog channel; `0` when the multiplexer is unreachable.
    pub fn read_analog_channel(&self, channel: u8) -> Result<u16, HardwareError> {
        read_analog_channel(
            self.inner.peripherals.as_ref(),
            channel,
            self.inner.analog_channels,
            &self.inner.analog_degraded,
        )
    }

    /// Play a feedback cue.
    pub fn play_cue(&self, cue: Cue) {
        info!(%cue, "cue");
        if let Err(err) = self.inner.peripherals.play_cue(cue) {
            debug!(%cue, error = %err, "cue not played");
        }
    }

    /// Light or clear the indicator of `target`.
    pub fn set_indicator(&self, target: u8, state: IndicatorState) {
        let pin = usize::from(target)
            .checked_sub(1)
            .and_then(|index| self.inner.indicator_pins.get(index).copied());
        let Some(pin) = pin else {
            debug!(target, "no indicator wired for target");
            return;
        };
        self.set_digital_output(pin, state != IndicatorState::Off, Hold::Latch);
    }

    /// Switch the ambient lighting to a team color, or off.
    pub fn set_ambient(&self, team: Option<Team>) {
        let outputs = self.inner.outputs;
        self.set_digital_output(outputs.ambient_red, team == Some(Team::Red), Hold::Latch);
        self.set_digital_output(
            outputs.ambient_green,
            team == Some(Team::Green),
            Hold::Latch,
        );
    }

    /// Switch the cabinet fan.
    pub fn set_fan(&self, on: bool) {
        self.set_digital_output(self.inner.outputs.fan, on, Hold::Latch);
    }

    /// Acknowledge a target sensor hit.
    pub fn acknowledge_hit(&self, target: u8) {
        info!(target, "target hit");
        self.play_cue(Cue::Hit);
    }

    /// Return every servo, indicator and relay to its idle state.
    pub fn reset_to_rest(&self) {
        info!("resetting actuators to rest");
        for (name, servo) in &self.inner.servos {
            self.set_rotational_position(name, servo.rest_angle);
        }
        for target in 1..=self.indicator_count() {
            self.set_indicator(target, IndicatorState::Off);
        }
        let outputs = self.inner.outputs;
        for pin in [outputs.chug_red, outputs.chug_green] {
            self.set_digital_output(pin, false, Hold::Latch);
        }
        self.set_ambient(None);
        self.set_fan(true);
    }

    /// Show `team`'s progress on the target indicators.
    pub fn restore_targets(&self, team: Team, completed: &BTreeSet<u8>, target_count: u8) {
        info!(%team, hits = completed.len(), "restoring targets");
        for target in 1..=target_count {
            let state = if completed.contains(&target) {
                IndicatorState::Lit(team)
            } else {
                IndicatorState::Off
            };
            self.set_indicator(target, state);
        }
        self.set_ambient(Some(team));
    }

    /// Victory sequence: cue, gate drop, platform raise, lights off.
    pub fn victory(&self) {
        self.play_cue(Cue::Victory);
        self.move_to_active(SERVO_GATE);
        self.move_to_active(SERVO_PLATFORM);
        self.set_ambient(None);
        self.set_fan(false);
    }

    /// Fire the plunger.
    pub fn launch_plunger(&self) {
        info!("launching plunger");
        self.set_digital_output(
            self.inner.outputs.plunger,
            true,
            Hold::Pulse(self.inner.timings.plunger_pulse),
        );
    }

    /// Tunnel effect after the ball passed the tunnel sensor.
    pub fn activate_tunnel(&self) {
        self.play_cue(Cue::Tunnel);
        self.set_digital_output(
            self.inner.outputs.tunnel,
            true,
            Hold::Pulse(self.inner.timings.tunnel_pulse),
        );
    }

    /// Turn on `team`'s chug beacon.
    pub fn start_chug(&self, team: Team) {
        info!(%team, "start chug");
        self.play_cue(Cue::Chug);
        self.set_digital_output(self.chug_pin(team), true, Hold::Latch);
    }

    /// Turn off `team`'s chug beacon.
    pub fn stop_chug(&self, team: Team) {
        info!(%team, "stop chug");
        self.set_digital_output(self.chug_pin(team), false, Hold::Latch);
    }

    /// Open `team`'s beer valve for the configured pulse.
    pub fn dispense(&self, team: Team) {
        info!(%team, "dispensing");
        let pin = match team {
            Team::Red => self.inner.outputs.dispense_red,
            Team::Green => self.inner.outputs.dispense_green,
        };
        self.set_digital_output(pin, true, Hold::Pulse(self.inner.timings.dispense_pulse));
    }

    /// Sweep the tube servo to push a stuck ball through.
    pub fn clear_tube(&self) {
        let Some(servo) = self.inner.servos.get(SERVO_TUBE).copied() else {
            warn!("no tube servo configured");
            return;
        };
        info!("clearing tube");
        self.sweep_and_return(
            SERVO_TUBE,
            servo.active_angle,
            self.inner.timings.sweep_hold,
            servo.rest_angle,
        );
    }

    /// Sweep back to rest every servo whose persisted angle is not its rest angle.
    ///
    /// Returns how many servos were moved.
    pub fn recover_positions(&self) -> usize {
        let mut moved = 0;
        for (name, servo) in &self.inner.servos {
            let Some(angle) = self.inner.positions.get(name) else {
                continue;
            };
            if (angle - servo.rest_angle).abs() > f32::EPSILON {
                info!(servo = %name, from = angle, to = servo.rest_angle, "recovering servo to rest");
                self.set_rotational_position(name, servo.rest_angle);
                moved += 1;
            }
        }
        moved
    }

    fn move_to_active(&self, servo: &str) {
        match self.inner.servos.get(servo) {
            Some(config) => self.set_rotational_position(servo, config.active_angle),
            None => warn!(servo, "servo not configured"),
        }
    }

    fn chug_pin(&self, team: Team) -> u8 {
        match team {
            Team::Red => self.inner.outputs.chug_red,
            Team::Green => self.inner.outputs.chug_green,
        }
    }

    fn indicator_count(&self) -> u8 {
        u8::try_from(self.inner.indicator_pins.len()).unwrap_or(u8::MAX)
    }
}

fn drive(peripherals: &dyn Peripherals, pin: u8, level: bool) {
    if let Err(err) = peripherals.write_digital(pin, level) {
        debug!(pin, level, error = %err, "digital output not applied");
    }
}

fn move_servo(peripherals: &dyn Peripherals, servo: &str, pwm_channel: u8, angle: f32) {
    debug!(servo, angle, "moving servo");
    if let Err(err) = peripherals.write_servo(pwm_channel, angle) {
        debug!(servo, angle, error = %err, "servo move not applied");
    }
}

#[cfg(test)]
mod tests {
    use crate::hardware::{simulated::SimulatedPeripherals, testing::RecordingPeripherals};

    use super::*;

    fn driver(hw: Arc<RecordingPeripherals>) -> (ActuatorDriver, AppConfig) {
        let config = AppConfig::default();
        let positions = PositionStore::in_memory(&config.rest_angles());
        (ActuatorDriver::new(hw, &config, positions), config)
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_releases_after_duration() {
        let hw = Arc::new(RecordingPeripherals::new());
        let (driver, config) = driver(hw.clone());

        driver.launch_plunger();
        assert_eq!(hw.digital_writes(config.outputs.plunger), vec![true]);

        sleep(config.timings.plunger_pulse + Duration::from_millis(10)).await;
        assert_eq!(hw.digital_writes(config.outputs.plunger), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_pour_keeps_the_valve_open_for_the_full_pulse() {
        let hw = Arc::new(RecordingPeripherals::new());
        let (driver, config) = driver(hw.clone());
        let valve = config.outputs.dispense_red;
        let pour = config.timings.dispense_pulse;

        driver.dispense(Team::Red);
        sleep(Duration::from_secs(2)).await;
        driver.dispense(Team::Red);

        // The first pour's release time passes without closing the valve.
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(hw.digital_writes(valve), vec![true, true]);

        sleep(pour).await;
        assert_eq!(hw.digital_writes(valve), vec![true, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn latch_after_pulse_is_not_released() {
        let hw = Arc::new(RecordingPeripherals::new());
        let (driver, config) = driver(hw.clone());
        let pin = config.outputs.tunnel;

        driver.set_digital_output(pin, true, Hold::Pulse(Duration::from_millis(500)));
        driver.set_digital_output(pin, true, Hold::Latch);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(hw.digital_writes(pin), vec![true, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_persists_return_angle_immediately() {
        let hw = Arc::new(RecordingPeripherals::new());
        let (driver, config) = driver(hw.clone());
        let tube = config.servos[SERVO_TUBE];

        driver.clear_tube();
        assert_eq!(driver.positions().get(SERVO_TUBE), Some(tube.rest_angle));
        assert_eq!(hw.servo_writes(tube.pwm_channel), vec![tube.active_angle]);

        sleep(config.timings.sweep_hold + Duration::from_millis(10)).await;
        assert_eq!(
            hw.servo_writes(tube.pwm_channel),
            vec![tube.active_angle, tube.rest_angle]
        );
    }

    #[tokio::test]
    async fn victory_moves_gate_and_platform_and_persists() {
        let hw = Arc::new(RecordingPeripherals::new());
        let (driver, config) = driver(hw.clone());

        driver.victory();

        let gate = config.servos[SERVO_GATE];
        let platform = config.servos[SERVO_PLATFORM];
        assert_eq!(hw.servo_writes(gate.pwm_channel), vec![gate.active_angle]);
        assert_eq!(driver.positions().get(SERVO_PLATFORM), Some(platform.active_angle));
        assert_eq!(hw.cues(), vec![Cue::Victory]);
        assert_eq!(hw.digital_writes(config.outputs.ambient_red), vec![false]);
    }

    #[tokio::test]
    async fn recovery_moves_only_displaced_servos_once() {
        let hw = Arc::new(RecordingPeripherals::new());
        let (driver, config) = driver(hw.clone());
        driver.positions().record(SERVO_GATE, 90.0);
        hw.clear_calls();

        assert_eq!(driver.recover_positions(), 1);
        let gate = config.servos[SERVO_GATE];
        assert_eq!(hw.servo_writes(gate.pwm_channel), vec![gate.rest_angle]);
        assert_eq!(driver.recover_positions(), 0);
    }

    #[tokio::test]
    async fn restore_targets_lights_completed_indicators() {
        let hw = Arc::new(RecordingPeripherals::new());
        let (driver, config) = driver(hw.clone());

        driver.restore_targets(Team::Green, &BTreeSet::from([2, 4]), 5);

        let pins = &config.indicator_pins;
        assert_eq!(hw.digital_writes(pins[0]), vec![false]);
        assert_eq!(hw.digital_writes(pins[1]), vec![true]);
        assert_eq!(hw.digital_writes(pins[3]), vec![true]);
        assert_eq!(hw.digital_writes(config.outputs.ambient_green), vec![true]);
    }

    #[test]
    fn analog_read_rejects_missing_channel() {
        let hw = Arc::new(RecordingPeripherals::new());
        hw.set_analog(3, 700);
        let (driver, config) = driver(hw);

        assert_eq!(driver.read_analog_channel(3).unwrap(), 700);
        let err = driver.read_analog_channel(config.analog_channels).unwrap_err();
        assert!(matches!(err, HardwareError::InvalidChannel { .. }));
    }

    #[tokio::test]
    async fn simulated_hardware_degrades_silently() {
        let config = AppConfig::default();
        let positions = PositionStore::in_memory(&config.rest_angles());
        let driver = ActuatorDriver::new(Arc::new(SimulatedPeripherals), &config, positions);

        assert!(!driver.available());
        assert_eq!(driver.read_analog_channel(0).unwrap(), 0);
        driver.reset_to_rest();
        driver.dispense(Team::Red);
        driver.set_rotational_position(SERVO_GATE, 45.0);
        assert_eq!(driver.positions().get(SERVO_GATE), Some(45.0));
        assert!(driver.read_analog_channel(200).is_err());
    }
}
