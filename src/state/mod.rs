pub mod game;
pub mod state_machine;
pub mod status;

use std::sync::Arc;

use rand::{SeedableRng, rngs::StdRng};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    hardware::{
        Peripherals,
        actuators::ActuatorDriver,
        positions::PositionStore,
        select_peripherals,
        sensors::{DigitalInputs, SensorArray},
    },
    services::{
        capture_service::CaptureService,
        dispatcher::{self, Dispatcher},
        game_service::GameService,
        sensor_service::SensorService,
    },
};

pub use self::status::{StatusEvent, StatusHub};

/// Everything the controller owns, built once at startup and handed to the game loop.
pub struct AppContext {
    config: Arc<AppConfig>,
    peripherals: Arc<dyn Peripherals>,
    actuators: ActuatorDriver,
    hub: Arc<StatusHub>,
    capture: CaptureService,
}

/// Handles on a running game loop.
pub struct RunningGame {
    /// Enqueue handle for commands.
    pub dispatcher: Dispatcher,
    /// Notification hub.
    pub hub: Arc<StatusHub>,
    /// Actuator driver shared with the game loop.
    pub actuators: ActuatorDriver,
    game: JoinHandle<GameService>,
    sensors: Option<JoinHandle<()>>,
    position_writer: Option<JoinHandle<()>>,
}

impl AppContext {
    /// Detect peripherals and adapters and load the persisted servo positions.
    pub fn from_config(config: AppConfig) -> Self {
        let peripherals = select_peripherals(&config);
        let positions = PositionStore::load(&config.positions_path, &config.rest_angles());
        let capture = CaptureService::from_config(&config);
        Self::new(config, peripherals, positions, capture)
    }

    /// Assemble a context from explicit parts.
    pub fn new(
        config: AppConfig,
        peripherals: Arc<dyn Peripherals>,
        positions: PositionStore,
        capture: CaptureService,
    ) -> Self {
        let actuators = ActuatorDriver::new(peripherals.clone(), &config, positions);
        Self {
            config: Arc::new(config),
            peripherals,
            actuators,
            hub: Arc::new(StatusHub::default()),
            capture,
        }
    }

    /// Shared configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Notification hub; subscribe before [`AppContext::start`] to see every event.
    pub fn hub(&self) -> Arc<StatusHub> {
        self.hub.clone()
    }

    /// Start with an OS-seeded random source.
    pub fn start(self) -> RunningGame {
        self.start_with_rng(StdRng::from_os_rng())
    }

    /// Recover servo positions, then spawn the game loop and, on real hardware, the sensor
    /// polling loop.
    pub fn start_with_rng(self, rng: StdRng) -> RunningGame {
        let position_writer = self.actuators.positions().spawn_writer();
        let recovered = self.actuators.recover_positions();
        if recovered > 0 {
            info!(recovered, "servos swept back to rest");
        }

        let (dispatcher, queue) = Dispatcher::channel();
        let service = GameService::new(
            self.config.clone(),
            self.actuators.clone(),
            self.hub.clone(),
            self.capture,
            dispatcher.clone(),
            rng,
        );
        let game = tokio::spawn(dispatcher::run(service, queue));

        let sensors = if self.peripherals.available() {
            let pads = SensorArray::new(
                self.actuators.clone(),
                self.config.pressure_threshold,
                &self.config.pressure_pads,
            );
            let inputs = DigitalInputs::new(self.peripherals.clone(), &self.config.digital_inputs);
            let poller = SensorService::new(
                pads,
                inputs,
                dispatcher.clone(),
                self.config.timings.poll_interval,
            );
            Some(tokio::spawn(poller.run()))
        } else {
            warn!("no sensors to poll; use the console to drive the game");
            None
        };

        RunningGame {
            dispatcher,
            hub: self.hub,
            actuators: self.actuators,
            game,
            sensors,
            position_writer,
        }
    }
}

impl RunningGame {
    /// Stop the sensor loop and the game loop, write the servo positions one last time and
    /// return the final game service.
    pub async fn shutdown(self) -> Option<GameService> {
        if let Some(sensors) = self.sensors {
            sensors.abort();
        }
        self.dispatcher.shutdown();
        let service = match self.game.await {
            Ok(service) => Some(service),
            Err(err) => {
                warn!(error = %err, "game loop ended abnormally");
                None
            }
        };

        if let Some(writer) = self.position_writer {
            writer.abort();
        }
        if let Err(err) = self.actuators.positions().flush().await {
            warn!(error = %err, "failed to persist servo positions on shutdown");
        }
        service
    }
}
