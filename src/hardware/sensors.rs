//! Edge detection over the pressure pads and the digital inputs.
//!
//! A channel reports once on `inactive -> active`, stays latched while the signal is held,
//! and re-arms when it drops. A per-channel bounce window collapses chatter that crosses the
//! threshold several times into a single edge.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    config::{DigitalInput, InputRole, PadRole, PressurePad},
    hardware::{Peripherals, actuators::ActuatorDriver},
};

/// Last reported level of one channel and how many edges it produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorDebounceState {
    is_active: bool,
    hits: u64,
}

impl SensorDebounceState {
    /// Feed the current level; `true` on a rising edge.
    pub fn update(&mut self, active: bool) -> bool {
        let rising = active && !self.is_active;
        self.is_active = active;
        rising
    }

    /// Count an edge that made it through the bounce window.
    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    /// Last reported level.
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Edges accepted so far.
    pub fn hits(&self) -> u64 {
        self.hits
    }
}

/// Minimum spacing between two accepted edges.
#[derive(Debug, Clone, Copy)]
pub struct BounceFilter {
    window: Duration,
    last_accepted: Option<Instant>,
}

impl BounceFilter {
    /// Filter rejecting edges closer than `window` to the last accepted one.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: None,
        }
    }

    /// Whether an edge at `now` counts.
    pub fn accept(&mut self, now: Instant) -> bool {
        let accepted = self
            .last_accepted
            .is_none_or(|last| now.saturating_duration_since(last) >= self.window);
        if accepted {
            self.last_accepted = Some(now);
        }
        accepted
    }
}

/// One accepted press on a pressure pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadEdge {
    /// Multiplexer channel.
    pub channel: u8,
    /// What the pad means.
    pub role: PadRole,
    /// Intensity that crossed the threshold.
    pub intensity: u16,
}

struct PadChannel {
    pad: PressurePad,
    state: SensorDebounceState,
    filter: BounceFilter,
}

/// The pressure pads behind the multiplexer.
pub struct SensorArray {
    actuators: ActuatorDriver,
    threshold: u16,
    pads: Vec<PadChannel>,
}

impl SensorArray {
    /// Watch `pads`, reading them through the driver's analog channel access.
    pub fn new(actuators: ActuatorDriver, threshold: u16, pads: &[PressurePad]) -> Self {
        Self {
            actuators,
            threshold,
            pads: pads
                .iter()
                .map(|pad| PadChannel {
                    pad: *pad,
                    state: SensorDebounceState::default(),
                    filter: BounceFilter::new(Duration::from_millis(pad.bounce_ms)),
                })
                .collect(),
        }
    }

    /// Scan every pad once and return the presses that started since the last scan.
    pub fn poll_once(&mut self, now: Instant) -> Vec<PadEdge> {
        let mut edges = Vec::new();
        for channel in &mut self.pads {
            let intensity = match self.actuators.read_analog_channel(channel.pad.channel) {
                Ok(intensity) => intensity,
                Err(err) => {
                    warn!(channel = channel.pad.channel, error = %err, "skipping pressure pad");
                    continue;
                }
            };

            if !channel.state.update(intensity >= self.threshold) {
                continue;
            }
            if !channel.filter.accept(now) {
                debug!(channel = channel.pad.channel, intensity, "pad bounce suppressed");
                continue;
            }

            channel.state.record_hit();
            debug!(
                channel = channel.pad.channel,
                intensity,
                hits = channel.state.hits(),
                "pad pressed"
            );
            edges.push(PadEdge {
                channel: channel.pad.channel,
                role: channel.pad.role,
                intensity,
            });
        }
        edges
    }

    /// Debounce state of the pad on `channel`.
    pub fn state(&self, channel: u8) -> Option<SensorDebounceState> {
        self.pads
            .iter()
            .find(|pad| pad.pad.channel == channel)
            .map(|pad| pad.state)
    }
}

struct InputLine {
    input: DigitalInput,
    state: SensorDebounceState,
    filter: BounceFilter,
}

/// Edge-triggered digital sensors and buttons.
pub struct DigitalInputs {
    peripherals: Arc<dyn Peripherals>,
    lines: Vec<InputLine>,
    degraded: AtomicBool,
}

impl DigitalInputs {
    /// Watch `inputs` on `peripherals`.
    pub fn new(peripherals: Arc<dyn Peripherals>, inputs: &[DigitalInput]) -> Self {
        Self {
            peripherals,
            lines: inputs
                .iter()
                .map(|input| InputLine {
                    input: *input,
                    state: SensorDebounceState::default(),
                    filter: BounceFilter::new(Duration::from_millis(input.bounce_ms)),
                })
                .collect(),
            degraded: AtomicBool::new(false),
        }
    }

    /// Sample every line and return the roles whose edge was accepted, in wiring order.
    pub fn sample(&mut self, now: Instant) -> Vec<InputRole> {
        let mut fired = Vec::new();
        for line in &mut self.lines {
            let level = match self.peripherals.read_digital(line.input.pin) {
                Ok(level) => {
                    self.degraded.store(false, Ordering::Relaxed);
                    level
                }
                Err(err) => {
                    if !self.degraded.swap(true, Ordering::Relaxed) {
                        warn!(pin = line.input.pin, error = %err, "digital inputs unavailable");
                    }
                    continue;
                }
            };

            let active = level != line.input.active_low;
            if line.state.update(active) && line.filter.accept(now) {
                line.state.record_hit();
                debug!(pin = line.input.pin, role = ?line.input.role, "input edge");
                fired.push(line.input.role);
            }
        }
        fired
    }
}
