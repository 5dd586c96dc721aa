//! Recording peripherals for exercising the drivers and the game loop without hardware.
//!
//! [`RecordingPeripherals`] keeps every command it receives and serves input levels that
//! tests set explicitly.
//!
//! ```
//! use castles_cans::hardware::{Peripherals, testing::{HardwareCall, RecordingPeripherals}};
//!
//! let hw = RecordingPeripherals::new();
//! hw.set_analog(2, 900);
//! assert_eq!(hw.read_analog(2).unwrap(), 900);
//! hw.write_digital(17, true).unwrap();
//! assert_eq!(hw.calls(), vec![HardwareCall::Digital { pin: 17, level: true }]);
//! ```

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use crate::{
    error::HardwareError,
    hardware::{Cue, Peripherals},
};

/// A command received by [`RecordingPeripherals`].
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareCall {
    /// `write_digital`.
    Digital {
        /// Output line.
        pin: u8,
        /// Level written.
        level: bool,
    },
    /// `write_servo`.
    Servo {
        /// PWM channel.
        pwm_channel: u8,
        /// Commanded angle.
        angle: f32,
    },
    /// `play_cue`.
    Cue(Cue),
}

#[derive(Default)]
struct Recorded {
    calls: Vec<HardwareCall>,
    analog: HashMap<u8, u16>,
    digital: HashMap<u8, bool>,
}

/// Peripherals that remember every command and serve scripted input levels.
#[derive(Default)]
pub struct RecordingPeripherals {
    inner: Mutex<Recorded>,
}

impl RecordingPeripherals {
    /// Empty recorder; inputs read low and zero until set.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set the value served for an analog channel.
    pub fn set_analog(&self, channel: u8, value: u16) {
        self.lock().analog.insert(channel, value);
    }

    /// Set the level served for a digital input.
    pub fn set_digital(&self, pin: u8, level: bool) {
        self.lock().digital.insert(pin, level);
    }

    /// Every command received so far.
    pub fn calls(&self) -> Vec<HardwareCall> {
        self.lock().calls.clone()
    }

    /// Levels written to `pin`, in order.
    pub fn digital_writes(&self, pin: u8) -> Vec<bool> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                HardwareCall::Digital { pin: p, level } if *p == pin => Some(*level),
                _ => None,
            })
            .collect()
    }

    /// Angles written to `pwm_channel`, in order.
    pub fn servo_writes(&self, pwm_channel: u8) -> Vec<f32> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                HardwareCall::Servo {
                    pwm_channel: channel,
                    angle,
                } if *channel == pwm_channel => Some(*angle),
                _ => None,
            })
            .collect()
    }

    /// Cues played, in order.
    pub fn cues(&self) -> Vec<Cue> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                HardwareCall::Cue(cue) => Some(*cue),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded commands, keeping input levels.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

impl Peripherals for RecordingPeripherals {
    fn available(&self) -> bool {
        true
    }

    fn write_digital(&self, pin: u8, level: bool) -> Result<(), HardwareError> {
        self.lock().calls.push(HardwareCall::Digital { pin, level });
        Ok(())
    }

    fn read_digital(&self, pin: u8) -> Result<bool, HardwareError> {
        Ok(self.lock().digital.get(&pin).copied().unwrap_or(false))
    }

    fn read_analog(&self, channel: u8) -> Result<u16, HardwareError> {
        Ok(self.lock().analog.get(&channel).copied().unwrap_or(0))
    }

    fn write_servo(&self, pwm_channel: u8, angle: f32) -> Result<(), HardwareError> {
        self.lock()
            .calls
            .push(HardwareCall::Servo { pwm_channel, angle });
        Ok(())
    }

    fn play_cue(&self, cue: Cue) -> Result<(), HardwareError> {
        self.lock().calls.push(HardwareCall::Cue(cue));
        Ok(())
    }
}
