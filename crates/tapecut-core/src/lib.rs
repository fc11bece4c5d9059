//! Tapecut Core - real-time sample playback/record engine and tempo clock
//!
//! Six voices read and write variable-rate, looped, crossfaded audio from
//! two shared mono PCM buffers while an audio driver calls
//! [`engine::SamplerEngine::process`] per block. All control flows through
//! lock-free queues owned by [`control::Controller`]; the audio thread
//! never locks, allocates for its own state, or blocks. The
//! [`clock::Clock`] runs beside it on the control side, scheduling
//! cooperative tasks against a tempo-driven beat grid.

pub mod clock;
pub mod config;
pub mod control;
pub mod engine;
pub mod types;

pub use clock::{Cancelled, Clock, TaskHandle, TaskId};
pub use config::EngineConfig;
pub use control::{create_engine, ControlError, Controller};
pub use engine::SamplerEngine;
