// src/lib.rs
//! Band-power trend engine for EEG streams served by a FieldTrip buffer.
pub mod config;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod events;
pub mod playback;
pub mod recorder;
pub mod session;
pub mod types;
pub use config::EngineConfig;
pub use engine::{spawn_controller, Engine};
pub use error::EngineError;
pub use events::{CancelToken, EventReceiver, EventSender};
