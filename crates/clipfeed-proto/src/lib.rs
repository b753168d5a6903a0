pub mod config;
pub mod platform;
pub mod protocol;
pub mod sequencer;
pub mod state;
