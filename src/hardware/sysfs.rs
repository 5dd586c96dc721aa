//! Linux sysfs peripherals: GPIO lines under `class/gpio`, the ADC multiplexer through its IIO
//! driver, servos on `class/pwm/pwmchip0`, and cues played with `aplay`.

use std::{
    collections::{HashMap, HashSet},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use tracing::{debug, warn};

use crate::{
    error::HardwareError,
    hardware::{Cue, Peripherals},
};

const SERVO_PERIOD_NS: u32 = 20_000_000;
const SERVO_MIN_PULSE_NS: f32 = 500_000.0;
const SERVO_PULSE_SPAN_NS: f32 = 2_000_000.0;
const ADC_DEVICE: &str = "bus/iio/devices/iio:device0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    In,
    Out,
}

/// Peripherals reached through the sysfs tree rooted at `root` (normally `/sys`).
pub struct SysfsPeripherals {
    root: PathBuf,
    sounds_dir: PathBuf,
    gpio_lines: Mutex<HashMap<u8, Direction>>,
    pwm_channels: Mutex<HashSet<u8>>,
}

impl SysfsPeripherals {
    /// Bind to the sysfs tree at `root`; nothing is touched until the first command.
    pub fn new(root: &Path, sounds_dir: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            sounds_dir: sounds_dir.to_path_buf(),
            gpio_lines: Mutex::new(HashMap::new()),
            pwm_channels: Mutex::new(HashSet::new()),
        }
    }

    fn gpio_dir(&self, pin: u8) -> PathBuf {
        self.root.join("class/gpio").join(format!("gpio{pin}"))
    }

    fn pwm_dir(&self, channel: u8) -> PathBuf {
        self.root
            .join("class/pwm/pwmchip0")
            .join(format!("pwm{channel}"))
    }

    /// Export `pin` and set its direction the first time it is used that way.
    fn ensure_gpio(&self, pin: u8, direction: Direction) -> Result<PathBuf, HardwareError> {
        let dir = self.gpio_dir(pin);
        let mut lines = lock(&self.gpio_lines);
        if lines.get(&pin) == Some(&direction) {
            return Ok(dir);
        }

        if !dir.exists() {
            write_attr(&self.root.join("class/gpio/export"), &pin.to_string())?;
        }
        let value = match direction {
            Direction::In => "in",
            Direction::Out => "out",
        };
        write_attr(&dir.join("direction"), value)?;
        lines.insert(pin, direction);
        debug!(pin, direction = value, "configured gpio line");
        Ok(dir)
    }

    fn ensure_pwm(&self, channel: u8) -> Result<PathBuf, HardwareError> {
        let dir = self.pwm_dir(channel);
        let mut channels = lock(&self.pwm_channels);
        if channels.contains(&channel) {
            return Ok(dir);
        }

        if !dir.exists() {
            write_attr(
                &self.root.join("class/pwm/pwmchip0/export"),
                &channel.to_string(),
            )?;
        }
        write_attr(&dir.join("period"), &SERVO_PERIOD_NS.to_string())?;
        write_attr(&dir.join("enable"), "1")?;
        channels.insert(channel);
        debug!(channel, "configured pwm channel");
        Ok(dir)
    }
}

impl Peripherals for SysfsPeripherals {
    fn available(&self) -> bool {
        self.root.join("class/gpio/export").exists()
    }

    fn write_digital(&self, pin: u8, level: bool) -> Result<(), HardwareError> {
        let dir = self.ensure_gpio(pin, Direction::Out)?;
        write_attr(&dir.join("value"), if level { "1" } else { "0" })
    }

    fn read_digital(&self, pin: u8) -> Result<bool, HardwareError> {
        let dir = self.ensure_gpio(pin, Direction::In)?;
        let raw = read_attr(&dir.join("value"))?;
        match raw.as_str() {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(HardwareError::Malformed {
                path: dir.join("value"),
                raw,
            }),
        }
    }

    fn read_analog(&self, channel: u8) -> Result<u16, HardwareError> {
        let path = self
            .root
            .join(ADC_DEVICE)
            .join(format!("in_voltage{channel}_raw"));
        let raw = read_attr(&path)?;
        raw.parse::<u16>()
            .map_err(|_| HardwareError::Malformed { path, raw })
    }

    fn write_servo(&self, pwm_channel: u8, angle: f32) -> Result<(), HardwareError> {
        let dir = self.ensure_pwm(pwm_channel)?;
        write_attr(&dir.join("duty_cycle"), &servo_duty_ns(angle).to_string())
    }

    fn play_cue(&self, cue: Cue) -> Result<(), HardwareError> {
        let path = self.sounds_dir.join(format!("{}.wav", cue.sound_name()));
        if !path.exists() {
            return Err(HardwareError::Unavailable { what: "cue sound" });
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(HardwareError::Unavailable { what: "audio runtime" });
        }

        // The child is reaped by the runtime once it exits.
        tokio::process::Command::new("aplay")
            .arg("-q")
            .arg(&path)
            .spawn()
            .map(drop)
            .map_err(|source| {
                warn!(%cue, error = %source, "failed to start aplay");
                HardwareError::io(path, source)
            })
    }
}

/// Pulse width in nanoseconds for `angle`, clamped to the 0..=180 degree range.
fn servo_duty_ns(angle: f32) -> u32 {
    let ratio = angle.clamp(0.0, 180.0) / 180.0;
    (SERVO_MIN_PULSE_NS + ratio * SERVO_PULSE_SPAN_NS).round() as u32
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_attr(path: &Path, value: &str) -> Result<(), HardwareError> {
    fs::write(path, value).map_err(|source| HardwareError::io(path, source))
}

fn read_attr(path: &Path) -> Result<String, HardwareError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(raw.trim().to_string()),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            Err(HardwareError::Unavailable { what: "sysfs attribute" })
        }
        Err(source) => Err(HardwareError::io(path, source)),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn fake_sysfs() -> TempDir {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("class/gpio")).unwrap();
        fs::write(root.path().join("class/gpio/export"), "").unwrap();
        fs::create_dir_all(root.path().join("class/pwm/pwmchip0/pwm0")).unwrap();
        fs::create_dir_all(root.path().join(ADC_DEVICE)).unwrap();
        root
    }

    #[test]
    fn servo_duty_spans_half_to_two_and_a_half_ms() {
        assert_eq!(servo_duty_ns(0.0), 500_000);
        assert_eq!(servo_duty_ns(90.0), 1_500_000);
        assert_eq!(servo_duty_ns(180.0), 2_500_000);
        assert_eq!(servo_duty_ns(-20.0), 500_000);
        assert_eq!(servo_duty_ns(400.0), 2_500_000);
    }

    #[test]
    fn available_only_with_gpio_export() {
        let root = TempDir::new().unwrap();
        let hw = SysfsPeripherals::new(root.path(), root.path());
        assert!(!hw.available());

        let root = fake_sysfs();
        let hw = SysfsPeripherals::new(root.path(), root.path());
        assert!(hw.available());
    }

    #[test]
    fn digital_write_lands_in_value_file() {
        let root = fake_sysfs();
        fs::create_dir_all(root.path().join("class/gpio/gpio17")).unwrap();
        let hw = SysfsPeripherals::new(root.path(), root.path());

        hw.write_digital(17, true).unwrap();
        let dir = root.path().join("class/gpio/gpio17");
        assert_eq!(fs::read_to_string(dir.join("direction")).unwrap(), "out");
        assert_eq!(fs::read_to_string(dir.join("value")).unwrap(), "1");
    }

    #[test]
    fn analog_read_parses_raw_value() {
        let root = fake_sysfs();
        fs::write(root.path().join(ADC_DEVICE).join("in_voltage3_raw"), "734\n").unwrap();
        let hw = SysfsPeripherals::new(root.path(), root.path());

        assert_eq!(hw.read_analog(3).unwrap(), 734);
        assert!(matches!(
            hw.read_analog(4),
            Err(HardwareError::Unavailable { .. })
        ));
    }

    #[test]
    fn servo_write_sets_period_and_duty() {
        let root = fake_sysfs();
        let hw = SysfsPeripherals::new(root.path(), root.path());

        hw.write_servo(0, 90.0).unwrap();
        let dir = root.path().join("class/pwm/pwmchip0/pwm0");
        assert_eq!(fs::read_to_string(dir.join("period")).unwrap(), "20000000");
        assert_eq!(fs::read_to_string(dir.join("duty_cycle")).unwrap(), "1500000");
        assert_eq!(fs::read_to_string(dir.join("enable")).unwrap(), "1");
    }

    #[test]
    fn missing_cue_sound_is_unavailable() {
        let root = fake_sysfs();
        let hw = SysfsPeripherals::new(root.path(), root.path());
        assert!(matches!(
            hw.play_cue(Cue::Victory),
            Err(HardwareError::Unavailable { .. })
        ));
    }
}
