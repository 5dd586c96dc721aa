/// Photo capture and upload adapters.
pub mod capture_service;
/// Control commands and the operator console.
pub mod commands;
/// Serial event queue owning the game service.
pub mod dispatcher;
/// Turn, target and phase logic.
pub mod game_service;
/// Console rendering of status notifications.
pub mod presentation;
/// Sensor polling loop.
pub mod sensor_service;
/// Status notification helpers.
pub mod status_events;
