//! Background polling loop feeding sensor edges to the game loop.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info};

use crate::{
    config::PadRole,
    hardware::sensors::{DigitalInputs, SensorArray},
    services::{commands::Command, dispatcher::Dispatcher},
};

/// Command produced by a press on a pad with `role`.
pub fn pad_command(role: PadRole) -> Command {
    match role {
        PadRole::Target(target) => Command::HitTarget(target),
        PadRole::Special => Command::SpecialSensorHit,
    }
}

/// Polls the pressure pads and digital inputs at a fixed interval.
pub struct SensorService {
    pads: SensorArray,
    inputs: DigitalInputs,
    dispatcher: Dispatcher,
    poll_interval: Duration,
}

impl SensorService {
    /// Build the loop; nothing is read until [`SensorService::run`] or
    /// [`SensorService::poll`].
    pub fn new(
        pads: SensorArray,
        inputs: DigitalInputs,
        dispatcher: Dispatcher,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pads,
            inputs,
            dispatcher,
            poll_interval,
        }
    }

    /// Scan everything once and enqueue the resulting commands. Returns how many were sent.
    pub fn poll(&mut self, now: Instant) -> usize {
        let pad_commands = self
            .pads
            .poll_once(now)
            .into_iter()
            .map(|edge| pad_command(edge.role));
        let input_commands = self.inputs.sample(now).into_iter().map(Command::from);

        let mut sent = 0;
        for command in pad_commands.chain(input_commands) {
            debug!(?command, "sensor command");
            if self.dispatcher.enqueue(command) {
                sent += 1;
            }
        }
        sent
    }

    /// Poll until the game loop goes away.
    pub async fn run(mut self) {
        info!(interval_ms = self.poll_interval.as_millis() as u64, "sensor polling started");
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if self.dispatcher.is_closed() {
                break;
            }
            self.poll(Instant::now());
        }
        info!("sensor polling stopped");
    }
}
