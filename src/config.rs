//! Application-level configuration loading: target layout, timings, pin maps and servo rest angles.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ConfigError;

/// Default location on disk where the controller looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "CASTLES_CANS_CONFIG_PATH";
/// Environment variable naming the rclone remote used for photo uploads.
const RCLONE_REMOTE_ENV: &str = "RCLONE_REMOTE";

/// Servo names the game logic drives directly.
pub const SERVO_GATE: &str = "gate";
/// Servo raising the victory platform.
pub const SERVO_PLATFORM: &str = "platform";
/// Servo sweeping the ball tube clear.
pub const SERVO_TUBE: &str = "tube";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the controller.
pub struct AppConfig {
    /// Number of targets each team must complete (N).
    pub target_count: u8,
    /// Reserved target id unlocked through the two-stage watchtower objective.
    pub special_target: Option<u8>,
    /// Allow the watchtower objective to arm while the ball is heading for the tunnel.
    pub special_arm_outside_turn: bool,
    /// Fixed delays used by the state machine and the actuator sequences.
    pub timings: Timings,
    /// Analog intensity at or above which a pressure pad counts as pressed.
    pub pressure_threshold: u16,
    /// Number of channels on the analog multiplexer.
    pub analog_channels: u8,
    /// Pressure pads wired to the analog multiplexer.
    pub pressure_pads: Vec<PressurePad>,
    /// Edge-triggered digital sensors and buttons.
    pub digital_inputs: Vec<DigitalInput>,
    /// Relay-style outputs.
    pub outputs: OutputPins,
    /// One indicator pin per target, index 0 being target 1.
    pub indicator_pins: Vec<u8>,
    /// Rotational actuators keyed by name.
    pub servos: IndexMap<String, ServoConfig>,
    /// Where the last commanded servo angles are persisted.
    pub positions_path: PathBuf,
    /// Directory receiving captured photos.
    pub capture_dir: PathBuf,
    /// Directory holding one `<cue>.wav` per feedback cue.
    pub sounds_dir: PathBuf,
    /// Root of the sysfs tree used by the on-device peripherals.
    pub sysfs_root: PathBuf,
    /// rclone remote receiving captured photos, if uploads are enabled.
    pub rclone_remote: Option<String>,
}

/// Fixed delays, all expressed as [`Duration`]s once loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Delay between `start` and the coin flip result.
    pub coin_flip: Duration,
    /// Delay between the tunnel trigger and the "ready to launch" prompt.
    pub launch_ready: Duration,
    /// Delay between the ball return ending a chug and the next turn.
    pub chug_turn: Duration,
    /// Delay between a plain ball return and the next turn.
    pub return_turn: Duration,
    /// How long a transient status (e.g. dispensing) stays before reverting.
    pub status_revert: Duration,
    /// Delay before the chug photo is taken.
    pub chug_photo: Duration,
    /// Interval of the sensor polling loop.
    pub poll_interval: Duration,
    /// Plunger relay pulse length.
    pub plunger_pulse: Duration,
    /// Tunnel relay pulse length.
    pub tunnel_pulse: Duration,
    /// Beer dispenser relay pulse length.
    pub dispense_pulse: Duration,
    /// How long a swept servo holds before returning.
    pub sweep_hold: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        RawTimings::default().into()
    }
}

/// Role of a pressure pad on the analog multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PadRole {
    /// Pad sitting behind a numbered target.
    Target(u8),
    /// Pressure trigger arming the watchtower objective.
    Special,
}

/// A pressure pad bound to one analog channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PressurePad {
    /// Multiplexer channel.
    pub channel: u8,
    /// What a press on this pad means.
    pub role: PadRole,
    /// Minimum spacing between two accepted presses, in milliseconds.
    #[serde(default = "default_bounce_ms")]
    pub bounce_ms: u64,
}

/// Role of an edge-triggered digital input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputRole {
    /// Ball entered the tunnel.
    Tunnel,
    /// Ball came back through the return chute.
    BallReturn,
    /// Dedicated sensor behind a numbered target.
    Target(u8),
    /// Light sensor confirming the watchtower objective.
    SpecialConfirm,
    /// Physical start/reset button.
    Start,
    /// Physical launch button.
    Launch,
    /// Physical "force next turn" button.
    NextTurn,
}

/// A digital input pin and its bounce suppression window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DigitalInput {
    /// GPIO line number.
    pub pin: u8,
    /// What an edge on this pin means.
    pub role: InputRole,
    /// Minimum spacing between two accepted edges, in milliseconds.
    #[serde(default = "default_bounce_ms")]
    pub bounce_ms: u64,
    /// The input reads low when triggered (pull-up wiring).
    #[serde(default)]
    pub active_low: bool,
}

/// Relay-style output pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OutputPins {
    /// Solenoid firing the plunger.
    pub plunger: u8,
    /// Tunnel effect relay.
    pub tunnel: u8,
    /// Red team beer valve.
    pub dispense_red: u8,
    /// Green team beer valve.
    pub dispense_green: u8,
    /// Red team chug beacon.
    pub chug_red: u8,
    /// Green team chug beacon.
    pub chug_green: u8,
    /// Red ambient lighting.
    pub ambient_red: u8,
    /// Green ambient lighting.
    pub ambient_green: u8,
    /// Cabinet fan.
    pub fan: u8,
}

impl Default for OutputPins {
    fn default() -> Self {
        Self {
            plunger: 17,
            tunnel: 27,
            dispense_red: 22,
            dispense_green: 23,
            chug_red: 24,
            chug_green: 25,
            ambient_red: 5,
            ambient_green: 6,
            fan: 26,
        }
    }
}

/// A rotational actuator driven through a PWM channel.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ServoConfig {
    /// PWM channel on the first PWM chip.
    pub pwm_channel: u8,
    /// Angle the servo returns to between actions and at startup.
    pub rest_angle: f32,
    /// Angle the servo moves to when the game actuates it.
    pub active_angle: f32,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to the built-in layout.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        targets = config.target_count,
                        servos = config.servos.len(),
                        "loaded controller config"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to load config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        config.rclone_remote = env::var(RCLONE_REMOTE_ENV)
            .ok()
            .filter(|remote| !remote.trim().is_empty());
        config
    }

    /// Parse and validate a JSON document.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let raw = serde_json::from_str::<RawConfig>(contents)?;
        raw.try_into()
    }

    /// Servo rest angles in configuration order.
    pub fn rest_angles(&self) -> IndexMap<String, f32> {
        self.servos
            .iter()
            .map(|(name, servo)| (name.clone(), servo.rest_angle))
            .collect()
    }

    /// Whether `target` names one of the configured targets.
    pub fn is_valid_target(&self, target: u8) -> bool {
        (1..=self.target_count).contains(&target)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_raw(RawConfig::default())
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    target_count: u8,
    special_target: Option<u8>,
    special_arm_outside_turn: bool,
    timings: RawTimings,
    pressure_threshold: u16,
    analog_channels: u8,
    pressure_pads: Vec<PressurePad>,
    digital_inputs: Vec<DigitalInput>,
    outputs: OutputPins,
    indicator_pins: Vec<u8>,
    servos: IndexMap<String, ServoConfig>,
    positions_path: PathBuf,
    capture_dir: PathBuf,
    sounds_dir: PathBuf,
    sysfs_root: PathBuf,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            target_count: 5,
            special_target: Some(1),
            special_arm_outside_turn: false,
            timings: RawTimings::default(),
            pressure_threshold: 512,
            analog_channels: 8,
            pressure_pads: (1..=5)
                .map(|target| PressurePad {
                    channel: target - 1,
                    role: PadRole::Target(target),
                    bounce_ms: default_bounce_ms(),
                })
                .chain(std::iter::once(PressurePad {
                    channel: 5,
                    role: PadRole::Special,
                    bounce_ms: default_bounce_ms(),
                }))
                .collect(),
            digital_inputs: vec![
                DigitalInput {
                    pin: 16,
                    role: InputRole::Tunnel,
                    bounce_ms: 300,
                    active_low: true,
                },
                DigitalInput {
                    pin: 20,
                    role: InputRole::BallReturn,
                    bounce_ms: 300,
                    active_low: true,
                },
                DigitalInput {
                    pin: 21,
                    role: InputRole::SpecialConfirm,
                    bounce_ms: default_bounce_ms(),
                    active_low: false,
                },
                DigitalInput {
                    pin: 12,
                    role: InputRole::Start,
                    bounce_ms: default_bounce_ms(),
                    active_low: true,
                },
                DigitalInput {
                    pin: 13,
                    role: InputRole::Launch,
                    bounce_ms: default_bounce_ms(),
                    active_low: true,
                },
            ],
            outputs: OutputPins::default(),
            indicator_pins: vec![4, 18, 19, 9, 11],
            servos: IndexMap::from([
                (
                    SERVO_GATE.to_string(),
                    ServoConfig {
                        pwm_channel: 0,
                        rest_angle: 0.0,
                        active_angle: 90.0,
                    },
                ),
                (
                    SERVO_PLATFORM.to_string(),
                    ServoConfig {
                        pwm_channel: 1,
                        rest_angle: 0.0,
                        active_angle: 120.0,
                    },
                ),
                (
                    SERVO_TUBE.to_string(),
                    ServoConfig {
                        pwm_channel: 2,
                        rest_angle: 10.0,
                        active_angle: 170.0,
                    },
                ),
            ]),
            positions_path: PathBuf::from("state/servo_positions.json"),
            capture_dir: PathBuf::from("captures"),
            sounds_dir: PathBuf::from("sounds"),
            sysfs_root: PathBuf::from("/sys"),
        }
    }
}

impl TryFrom<RawConfig> for AppConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        if raw.target_count == 0 {
            return Err(ConfigError::Invalid(
                "target_count must be at least 1".into(),
            ));
        }
        let in_range = |target: u8| (1..=raw.target_count).contains(&target);

        if let Some(special) = raw.special_target.filter(|special| !in_range(*special)) {
            return Err(ConfigError::Invalid(format!(
                "special_target {special} is outside 1..={}",
                raw.target_count
            )));
        }

        for pad in &raw.pressure_pads {
            if pad.channel >= raw.analog_channels {
                return Err(ConfigError::Invalid(format!(
                    "pressure pad channel {} exceeds the {} analog channels",
                    pad.channel, raw.analog_channels
                )));
            }
            match pad.role {
                PadRole::Target(target) if !in_range(target) => {
                    return Err(ConfigError::Invalid(format!(
                        "pressure pad target {target} is outside 1..={}",
                        raw.target_count
                    )));
                }
                _ => {}
            }
        }

        for input in &raw.digital_inputs {
            if let InputRole::Target(target) = input.role {
                if !in_range(target) {
                    return Err(ConfigError::Invalid(format!(
                        "digital input target {target} is outside 1..={}",
                        raw.target_count
                    )));
                }
            }
        }

        Ok(Self::from_raw(raw))
    }
}

impl AppConfig {
    /// Convert an already validated raw document.
    fn from_raw(raw: RawConfig) -> Self {
        Self {
            target_count: raw.target_count,
            special_target: raw.special_target,
            special_arm_outside_turn: raw.special_arm_outside_turn,
            timings: raw.timings.into(),
            pressure_threshold: raw.pressure_threshold,
            analog_channels: raw.analog_channels,
            pressure_pads: raw.pressure_pads,
            digital_inputs: raw.digital_inputs,
            outputs: raw.outputs,
            indicator_pins: raw.indicator_pins,
            servos: raw.servos,
            positions_path: raw.positions_path,
            capture_dir: raw.capture_dir,
            sounds_dir: raw.sounds_dir,
            sysfs_root: raw.sysfs_root,
            rclone_remote: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
/// JSON representation of the timings block, in milliseconds.
struct RawTimings {
    coin_flip_ms: u64,
    launch_ready_ms: u64,
    chug_turn_ms: u64,
    return_turn_ms: u64,
    status_revert_ms: u64,
    chug_photo_ms: u64,
    poll_interval_ms: u64,
    plunger_pulse_ms: u64,
    tunnel_pulse_ms: u64,
    dispense_pulse_ms: u64,
    sweep_hold_ms: u64,
}

impl Default for RawTimings {
    fn default() -> Self {
        Self {
            coin_flip_ms: 1_000,
            launch_ready_ms: 2_000,
            chug_turn_ms: 2_000,
            return_turn_ms: 1_000,
            status_revert_ms: 2_000,
            chug_photo_ms: 2_000,
            poll_interval_ms: 50,
            plunger_pulse_ms: 500,
            tunnel_pulse_ms: 1_000,
            dispense_pulse_ms: 3_000,
            sweep_hold_ms: 1_000,
        }
    }
}

impl From<RawTimings> for Timings {
    fn from(value: RawTimings) -> Self {
        Self {
            coin_flip: Duration::from_millis(value.coin_flip_ms),
            launch_ready: Duration::from_millis(value.launch_ready_ms),
            chug_turn: Duration::from_millis(value.chug_turn_ms),
            return_turn: Duration::from_millis(value.return_turn_ms),
            status_revert: Duration::from_millis(value.status_revert_ms),
            chug_photo: Duration::from_millis(value.chug_photo_ms),
            // A zero interval would make the poller spin.
            poll_interval: Duration::from_millis(value.poll_interval_ms.max(1)),
            plunger_pulse: Duration::from_millis(value.plunger_pulse_ms),
            tunnel_pulse: Duration::from_millis(value.tunnel_pulse_ms),
            dispense_pulse: Duration::from_millis(value.dispense_pulse_ms),
            sweep_hold: Duration::from_millis(value.sweep_hold_ms),
        }
    }
}

fn default_bounce_ms() -> u64 {
    200
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_five_targets_with_watchtower() {
        let config = AppConfig::default();
        assert_eq!(config.target_count, 5);
        assert_eq!(config.special_target, Some(1));
        assert!(!config.special_arm_outside_turn);
        assert_eq!(config.timings.coin_flip, Duration::from_secs(1));
        assert_eq!(config.timings.launch_ready, Duration::from_secs(2));
        assert_eq!(config.indicator_pins.len(), 5);
        assert!(config.servos.contains_key(SERVO_GATE));
        assert!(config.servos.contains_key(SERVO_PLATFORM));
        assert!(config.servos.contains_key(SERVO_TUBE));
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let config = AppConfig::from_json(
            r#"{ "target_count": 7, "timings": { "coin_flip_ms": 250 } }"#,
        )
        .unwrap();
        assert_eq!(config.target_count, 7);
        assert_eq!(config.timings.coin_flip, Duration::from_millis(250));
        assert_eq!(config.timings.chug_turn, Duration::from_secs(2));
        assert!(config.is_valid_target(7));
        assert!(!config.is_valid_target(8));
        assert!(!config.is_valid_target(0));
    }

    #[test]
    fn rejects_zero_targets() {
        let err = AppConfig::from_json(r#"{ "target_count": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_special_target_out_of_range() {
        let err =
            AppConfig::from_json(r#"{ "target_count": 3, "special_target": 4, "pressure_pads": [] }"#)
                .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_pad_on_missing_channel() {
        let err = AppConfig::from_json(
            r#"{ "analog_channels": 4, "pressure_pads": [ { "channel": 4, "role": "special" } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn parses_roles_and_servos() {
        let config = AppConfig::from_json(
            r#"{
                "pressure_pads": [ { "channel": 2, "role": { "target": 3 } } ],
                "digital_inputs": [ { "pin": 5, "role": "ball_return", "bounce_ms": 50, "active_low": true } ],
                "servos": { "gate": { "pwm_channel": 0, "rest_angle": 5.0, "active_angle": 95.0 } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.pressure_pads[0].role, PadRole::Target(3));
        assert_eq!(config.pressure_pads[0].bounce_ms, 200);
        assert_eq!(config.digital_inputs[0].role, InputRole::BallReturn);
        assert_eq!(config.rest_angles().get(SERVO_GATE), Some(&5.0));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = AppConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
