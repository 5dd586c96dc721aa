//! Library crate for the Castles & Cans cabinet controller, shared by the binary and the
//! integration tests.

pub mod config;
pub mod error;
pub mod hardware;
pub mod services;
pub mod state;
