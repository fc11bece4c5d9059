//! Real-time sample engine
//!
//! Six playback/record voices over two shared mono PCM buffers, driven by
//! an audio callback through [`SamplerEngine::process`] and controlled
//! exclusively through the lock-free command queue.

mod buffer;
mod command;
mod engine;
pub mod gc;
mod voice;

pub use buffer::PcmBuffer;
pub use command::{command_channel, event_channel, Command, Event};
pub use engine::SamplerEngine;
pub use voice::{Voice, DEFAULT_FADE_TIME};
