pub mod backend;
pub mod config;
pub mod config_io;
pub mod overlays;
pub mod state;
