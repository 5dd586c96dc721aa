//! Stand-in peripherals for running off-device: every command is logged, every read reports
//! the peripheral as unavailable.

use tracing::info;

use crate::{
    error::HardwareError,
    hardware::{Cue, Peripherals},
};

/// Peripherals used when no hardware is reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedPeripherals;

impl Peripherals for SimulatedPeripherals {
    fn available(&self) -> bool {
        false
    }

    fn write_digital(&self, pin: u8, level: bool) -> Result<(), HardwareError> {
        info!(pin, level, "[hw] digital output");
        Ok(())
    }

    fn read_digital(&self, _pin: u8) -> Result<bool, HardwareError> {
        Err(HardwareError::Unavailable { what: "gpio" })
    }

    fn read_analog(&self, _channel: u8) -> Result<u16, HardwareError> {
        Err(HardwareError::Unavailable { what: "adc" })
    }

    fn write_servo(&self, pwm_channel: u8, angle: f32) -> Result<(), HardwareError> {
        info!(pwm_channel, angle, "[hw] servo");
        Ok(())
    }

    fn play_cue(&self, cue: Cue) -> Result<(), HardwareError> {
        info!(%cue, "[hw] cue");
        Ok(())
    }
}
