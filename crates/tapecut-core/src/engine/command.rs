//! Lock-free command and event queues for real-time engine control
//!
//! The control thread sends commands via a wait-free SPSC ring buffer and
//! the audio thread drains them at block boundaries. Events flow the other
//! way through a second ring. Neither side ever blocks:
//!
//! - Control pushes a command in ~50ns; a full queue makes the *submitter*
//!   wait, never the audio thread.
//! - Audio pops commands and pushes events in O(1) with no syscalls.
//!
//! `Phase` events are redundant samples of a continuous signal, so the
//! audio side drops them when the event queue is full. `BufferData` events
//! are never dropped; the engine parks them and retries (see
//! [`super::SamplerEngine`]).

use crate::types::Sample;
use basedrop::Owned;

/// Commands sent from the control thread to the audio thread
///
/// Each variant is one atomic operation on the engine, applied before the
/// voice kernels run in the next `process` call. Voice and buffer indices
/// are 0-based here; the control facade translates from the 1-based
/// public API.
pub enum Command {
    // ─────────────────────────────────────────────────────────────
    // Voice topology and transport
    // ─────────────────────────────────────────────────────────────
    /// Idle <-> active. A disabled voice produces and records nothing.
    Enable { voice: usize, on: bool },
    /// Transport on/off. A stopped voice holds its head position.
    Play { voice: usize, on: bool },
    /// Record on/off. Recording shares the playback head.
    Record { voice: usize, on: bool },
    /// Choose the source/destination buffer for a voice
    BufferSelect { voice: usize, buffer: usize },
    /// Signed playback rate; magnitude may exceed 1
    Rate { voice: usize, rate: f64 },
    /// Set the head position in seconds
    Position { voice: usize, seconds: f64 },

    // ─────────────────────────────────────────────────────────────
    // Loop configuration
    // ─────────────────────────────────────────────────────────────
    Loop { voice: usize, on: bool },
    LoopStart { voice: usize, seconds: f64 },
    LoopEnd { voice: usize, seconds: f64 },
    /// Crossfade length at the loop boundary, in seconds
    FadeTime { voice: usize, seconds: f64 },

    // ─────────────────────────────────────────────────────────────
    // Amplitude, pan, record mix
    // ─────────────────────────────────────────────────────────────
    /// Output level target; snaps when the slew time is zero
    Level { voice: usize, level: f32 },
    /// Seconds for the level to traverse one unit of amplitude
    LevelSlewTime { voice: usize, seconds: f64 },
    /// Equal-power pan position in [-1, 1]
    Pan { voice: usize, pan: f32 },
    /// Gain applied to the input sample being written
    RecLevel { voice: usize, level: f32 },
    /// Gain applied to the existing buffer sample before summing
    PreLevel { voice: usize, level: f32 },

    // ─────────────────────────────────────────────────────────────
    // Phase reporting
    // ─────────────────────────────────────────────────────────────
    /// Per-voice report granularity in seconds; 0 disables the voice
    PhaseQuant { voice: usize, seconds: f64 },
    /// Engine-wide reporting gate
    PollStartPhase,
    PollStopPhase,

    // ─────────────────────────────────────────────────────────────
    // Buffer management
    // ─────────────────────────────────────────────────────────────
    /// Zero both buffers
    BufferClear,
    /// Zero one buffer
    BufferClearChannel { buffer: usize },
    /// Zero a time region in *both* buffers. Matches the reference
    /// device: the region clear is global, unlike the channel clear.
    BufferClearRegion { start: f64, duration: f64 },
    /// Copy samples into a buffer starting at `start` seconds
    ///
    /// Ownership of the data transfers into the engine. The payload is a
    /// `basedrop::Owned` so the audio thread's drop of the spent
    /// allocation defers to the collector thread instead of freeing
    /// inline (see [`super::gc`]).
    BufferLoad {
        buffer: usize,
        start: f64,
        data: Owned<Vec<Sample>>,
    },
    /// Copy a region out of a buffer and post it as [`Event::BufferData`]
    BufferRead {
        buffer: usize,
        start: f64,
        duration: f64,
    },

    // ─────────────────────────────────────────────────────────────
    // Global
    // ─────────────────────────────────────────────────────────────
    /// Re-initialise all voices to defaults and zero both buffers
    Reset,
}

/// Events emitted by the engine toward the control thread
pub enum Event {
    /// Quantised head-position report for one voice
    Phase { voice: usize, seconds: f64 },
    /// Reply to a `BufferRead` command
    BufferData {
        buffer: usize,
        start_sample: usize,
        samples: Vec<Sample>,
    },
}

/// Create the command channel (control-side producer, audio-side consumer)
pub fn command_channel(capacity: usize) -> (rtrb::Producer<Command>, rtrb::Consumer<Command>) {
    rtrb::RingBuffer::new(capacity)
}

/// Create the event channel (audio-side producer, control-side consumer)
pub fn event_channel(capacity: usize) -> (rtrb::Producer<Event>, rtrb::Consumer<Event>) {
    rtrb::RingBuffer::new(capacity)
}
