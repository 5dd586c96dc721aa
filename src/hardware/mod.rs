//! Peripheral access: the capability interface, its on-device and simulated variants,
//! and the drivers built on top of it.

pub mod actuators;
pub mod positions;
pub mod sensors;
pub mod simulated;
#[cfg(feature = "sysfs")]
pub mod sysfs;
pub mod testing;

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::Serialize;
use tracing::warn;

use crate::{config::AppConfig, error::HardwareError};

/// Feedback cues played through the cabinet speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cue {
    /// A target registered a hit.
    Hit,
    /// A target was hit out of order.
    Neutral,
    /// The ball passed the tunnel.
    Tunnel,
    /// A team starts chugging.
    Chug,
    /// The watchtower objective armed.
    Armed,
    /// A team won.
    Victory,
}

impl Cue {
    /// File stem of the sound played for this cue.
    pub fn sound_name(self) -> &'static str {
        match self {
            Cue::Hit => "hit",
            Cue::Neutral => "neutral",
            Cue::Tunnel => "tunnel",
            Cue::Chug => "chug",
            Cue::Armed => "armed",
            Cue::Victory => "victory",
        }
    }
}

impl fmt::Display for Cue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sound_name())
    }
}

/// Capability interface over the cabinet peripherals.
///
/// Selected once at startup: the sysfs variant on the device, the simulated variant anywhere
/// else. Implementations are synchronous and short; the drivers decide what runs in
/// background tasks.
pub trait Peripherals: Send + Sync {
    /// Whether real hardware backs this implementation.
    fn available(&self) -> bool;
    /// Drive a digital output line.
    fn write_digital(&self, pin: u8, level: bool) -> Result<(), HardwareError>;
    /// Sample a digital input line.
    fn read_digital(&self, pin: u8) -> Result<bool, HardwareError>;
    /// Sample one channel of the analog multiplexer.
    fn read_analog(&self, channel: u8) -> Result<u16, HardwareError>;
    /// Move the servo on `pwm_channel` to `angle` degrees.
    fn write_servo(&self, pwm_channel: u8, angle: f32) -> Result<(), HardwareError>;
    /// Start playing a feedback cue without waiting for it to finish.
    fn play_cue(&self, cue: Cue) -> Result<(), HardwareError>;
}

/// Pick the peripheral implementation for this process.
pub fn select_peripherals(config: &AppConfig) -> Arc<dyn Peripherals> {
    #[cfg(feature = "sysfs")]
    {
        let sysfs = sysfs::SysfsPeripherals::new(&config.sysfs_root, &config.sounds_dir);
        if sysfs.available() {
            tracing::info!(root = %config.sysfs_root.display(), "using sysfs peripherals");
            return Arc::new(sysfs);
        }
    }

    warn!(
        root = %config.sysfs_root.display(),
        "peripherals unavailable; running with simulated hardware"
    );
    Arc::new(simulated::SimulatedPeripherals)
}

/// Read one analog channel, rejecting channels the multiplexer does not have.
///
/// An unreachable peripheral reads as `0`; only an out-of-range channel is an error. The first
/// failed read is logged, later ones are silent until a read succeeds again.
pub(crate) fn read_analog_channel(
    peripherals: &dyn Peripherals,
    channel: u8,
    channel_count: u8,
    degraded: &AtomicBool,
) -> Result<u16, HardwareError> {
    if channel >= channel_count {
        return Err(HardwareError::InvalidChannel {
            channel,
            available: channel_count,
        });
    }

    match peripherals.read_analog(channel) {
        Ok(value) => {
            degraded.store(false, Ordering::Relaxed);
            Ok(value)
        }
        Err(err) => {
            if !degraded.swap(true, Ordering::Relaxed) {
                warn!(channel, error = %err, "analog read failed; reporting no signal");
            }
            Ok(0)
        }
    }
}
