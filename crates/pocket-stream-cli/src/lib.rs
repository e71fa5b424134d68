pub mod commands;
pub mod models;
pub mod server;

#[cfg(feature = "device")]
pub mod device;
