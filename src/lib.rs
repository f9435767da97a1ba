pub mod config;
pub mod error;
pub mod frame_slot;
pub mod logging;
pub mod pipeline;
pub mod pose;
pub mod protocol;
pub mod render;
pub mod server;
pub mod tracker;
