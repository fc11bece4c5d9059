//! Public control API
//!
//! A thin facade over the command and event queues. It validates
//! arguments, translates the 1-based voice/buffer indices of the public
//! API into the engine's 0-based indices, and dispatches incoming events
//! to registered callbacks. It holds no audio state of its own; reading
//! playback position means subscribing to phase events, never peeking at
//! voice state across threads.

mod error;

pub use error::{ControlError, ControlResult};

use crate::config::EngineConfig;
use crate::engine::{command_channel, event_channel, gc, Command, Event, SamplerEngine};
use crate::types::{BufferId, Sample, VoiceId};
use basedrop::Owned;

/// Callback for quantised phase reports: `(voice, position_seconds)`
pub type PhaseHandler = Box<dyn FnMut(usize, f64) + Send>;

/// Callback for buffer read replies: `(buffer, start_seconds, samples)`
pub type BufferDataHandler = Box<dyn FnMut(usize, f64, &[Sample]) + Send>;

/// Create a paired engine and controller
///
/// The engine end goes to the audio driver; the controller stays on the
/// control thread. Each owns exactly one end of each queue.
pub fn create_engine(config: &EngineConfig) -> (SamplerEngine, Controller) {
    let (cmd_tx, cmd_rx) = command_channel(config.command_queue_capacity);
    let (ev_tx, ev_rx) = event_channel(config.event_queue_capacity);
    let engine = SamplerEngine::new(config, cmd_rx, ev_tx);
    let controller = Controller {
        commands: cmd_tx,
        events: ev_rx,
        sample_rate: config.sample_rate as f64,
        pending_reads: 0,
        max_pending_reads: config.max_pending_reads,
        phase_handler: None,
        buffer_data_handler: None,
        gc: gc::gc_handle(),
    };
    (engine, controller)
}

/// Control-thread handle to the sample engine
pub struct Controller {
    commands: rtrb::Producer<Command>,
    events: rtrb::Consumer<Event>,
    sample_rate: f64,
    pending_reads: usize,
    max_pending_reads: usize,
    phase_handler: Option<PhaseHandler>,
    buffer_data_handler: Option<BufferDataHandler>,
    gc: basedrop::Handle,
}

impl Controller {
    /// Submit a command, waiting out a momentarily full queue
    ///
    /// The queue only fills during command bursts; the audio thread
    /// drains it every block, so the yield loop is short-lived. A dropped
    /// engine is reported instead of spinning forever.
    fn send(&mut self, cmd: Command) -> ControlResult<()> {
        let mut cmd = cmd;
        let mut logged_full = false;
        loop {
            if self.commands.is_abandoned() {
                log::warn!("command not sent: engine side of the queue is gone");
                return Err(ControlError::NotReady);
            }
            match self.commands.push(cmd) {
                Ok(()) => return Ok(()),
                Err(rtrb::PushError::Full(returned)) => {
                    if !logged_full {
                        log::debug!("command queue full, waiting for the audio thread to drain");
                        logged_full = true;
                    }
                    cmd = returned;
                    std::thread::yield_now();
                }
            }
        }
    }

    fn voice(index: usize) -> ControlResult<usize> {
        VoiceId::from_user(index)
            .map(|v| v.0)
            .ok_or(ControlError::VoiceOutOfRange(index))
    }

    fn buffer(index: usize) -> ControlResult<usize> {
        BufferId::from_user(index)
            .map(|b| b.0)
            .ok_or(ControlError::BufferOutOfRange(index))
    }

    fn non_negative(value: f64, what: &'static str) -> ControlResult<f64> {
        if value < 0.0 {
            Err(ControlError::InvalidArgument(what))
        } else {
            Ok(value)
        }
    }

    // --- Voice topology and transport ---

    /// Idle <-> active
    pub fn enable(&mut self, voice: usize, on: bool) -> ControlResult<()> {
        let voice = Self::voice(voice)?;
        self.send(Command::Enable { voice, on })
    }

    /// Transport on/off
    pub fn play(&mut self, voice: usize, on: bool) -> ControlResult<()> {
        let voice = Self::voice(voice)?;
        self.send(Command::Play { voice, on })
    }

    /// Record on/off
    pub fn rec(&mut self, voice: usize, on: bool) -> ControlResult<()> {
        let voice = Self::voice(voice)?;
        self.send(Command::Record { voice, on })
    }

    /// Choose the source/destination buffer (1-2) for a voice
    pub fn buffer_select(&mut self, voice: usize, buffer: usize) -> ControlResult<()> {
        let voice = Self::voice(voice)?;
        let buffer = Self::buffer(buffer)?;
        self.send(Command::BufferSelect { voice, buffer })
    }

    /// Signed playback rate
    pub fn rate(&mut self, voice: usize, rate: f64) -> ControlResult<()> {
        let voice = Self::voice(voice)?;
        self.send(Command::Rate { voice, rate })
    }

    /// Set the head position in seconds
    pub fn position(&mut self, voice: usize, seconds: f64) -> ControlResult<()> {
        let voice = Self::voice(voice)?;
        let seconds = Self::non_negative(seconds, "position must be non-negative")?;
        self.send(Command::Position { voice, seconds })
    }

    // --- Loop configuration ---

    /// Loop on/off
    pub fn set_loop(&mut self, voice: usize, on: bool) -> ControlResult<()> {
        let voice = Self::voice(voice)?;
        self.send(Command::Loop { voice, on })
    }

    pub fn loop_start(&mut self, voice: usize, seconds: f64) -> ControlResult<()> {
        let voice = Self::voice(voice)?;
        let seconds = Self::non_negative(seconds, "loop start must be non-negative")?;
        self.send(Command::LoopStart { voice, seconds })
    }

    pub fn loop_end(&mut self, voice: usize, seconds: f64) -> ControlResult<()> {
        let voice = Self::voice(voice)?;
        let seconds = Self::non_negative(seconds, "loop end must be non-negative")?;
        self.send(Command::LoopEnd { voice, seconds })
    }

    /// Crossfade length at the loop boundary
    pub fn fade_time(&mut self, voice: usize, seconds: f64) -> ControlResult<()> {
        let voice = Self::voice(voice)?;
        let seconds = Self::non_negative(seconds, "fade time must be non-negative")?;
        self.send(Command::FadeTime { voice, seconds })
    }

    // --- Amplitude, pan, record mix ---

    /// Output level
    pub fn level(&mut self, voice: usize, level: f32) -> ControlResult<()> {
        let voice = Self::voice(voice)?;
        if level < 0.0 {
            return Err(ControlError::InvalidArgument("level must be non-negative"));
        }
        self.send(Command::Level { voice, level })
    }

    /// Seconds for the level to traverse one unit of amplitude
    pub fn level_slew_time(&mut self, voice: usize, seconds: f64) -> ControlResult<()> {
        let voice = Self::voice(voice)?;
        let seconds = Self::non_negative(seconds, "slew time must be non-negative")?;
        self.send(Command::LevelSlewTime { voice, seconds })
    }

    /// Equal-power pan; values outside [-1, 1] are clamped
    pub fn pan(&mut self, voice: usize, pan: f32) -> ControlResult<()> {
        let voice = Self::voice(voice)?;
        self.send(Command::Pan { voice, pan: pan.clamp(-1.0, 1.0) })
    }

    /// Gain applied to the input sample being recorded, clamped to [0, 1]
    pub fn rec_level(&mut self, voice: usize, level: f32) -> ControlResult<()> {
        let voice = Self::voice(voice)?;
        self.send(Command::RecLevel { voice, level: level.clamp(0.0, 1.0) })
    }

    /// Gain applied to existing buffer content under the record head,
    /// clamped to [0, 1]: 0 overwrites, 1 overdubs indefinitely
    pub fn pre_level(&mut self, voice: usize, level: f32) -> ControlResult<()> {
        let voice = Self::voice(voice)?;
        self.send(Command::PreLevel { voice, level: level.clamp(0.0, 1.0) })
    }

    // --- Phase reporting ---

    /// Per-voice report granularity in seconds of head travel; 0 disables
    pub fn phase_quant(&mut self, voice: usize, seconds: f64) -> ControlResult<()> {
        let voice = Self::voice(voice)?;
        let seconds = Self::non_negative(seconds, "phase quantum must be non-negative")?;
        self.send(Command::PhaseQuant { voice, seconds })
    }

    /// Open the engine-wide phase reporting gate
    pub fn poll_start_phase(&mut self) -> ControlResult<()> {
        self.send(Command::PollStartPhase)
    }

    /// Close the engine-wide phase reporting gate
    pub fn poll_stop_phase(&mut self) -> ControlResult<()> {
        self.send(Command::PollStopPhase)
    }

    // --- Buffer management ---

    /// Zero both buffers
    pub fn buffer_clear(&mut self) -> ControlResult<()> {
        self.send(Command::BufferClear)
    }

    /// Zero one buffer (1-2)
    pub fn buffer_clear_channel(&mut self, buffer: usize) -> ControlResult<()> {
        let buffer = Self::buffer(buffer)?;
        self.send(Command::BufferClearChannel { buffer })
    }

    /// Zero a time region in *both* buffers
    ///
    /// The region clear is global, matching the reference device, even
    /// though [`Controller::buffer_clear_channel`] is per-buffer.
    pub fn buffer_clear_region(&mut self, start: f64, duration: f64) -> ControlResult<()> {
        let start = Self::non_negative(start, "region start must be non-negative")?;
        let duration = Self::non_negative(duration, "region duration must be non-negative")?;
        self.send(Command::BufferClearRegion { start, duration })
    }

    /// Copy samples into a buffer (1-2) starting at `start` seconds
    ///
    /// Ownership of `data` transfers to the engine; data past the end of
    /// the buffer is silently truncated.
    pub fn buffer_load(&mut self, buffer: usize, start: f64, data: Vec<Sample>) -> ControlResult<()> {
        let buffer = Self::buffer(buffer)?;
        let start = Self::non_negative(start, "load start must be non-negative")?;
        let data = Owned::new(&self.gc, data);
        self.send(Command::BufferLoad { buffer, start, data })
    }

    /// Request a copy of a buffer region, delivered via `on_buffer_data`
    ///
    /// At most `max_pending_reads` requests may be in flight; past that
    /// the call fails with [`ControlError::Capacity`] and nothing is
    /// enqueued. Poll events to free slots.
    pub fn buffer_read(&mut self, buffer: usize, start: f64, duration: f64) -> ControlResult<()> {
        let buffer = Self::buffer(buffer)?;
        let start = Self::non_negative(start, "read start must be non-negative")?;
        let duration = Self::non_negative(duration, "read duration must be non-negative")?;
        if self.pending_reads >= self.max_pending_reads {
            return Err(ControlError::Capacity);
        }
        self.send(Command::BufferRead { buffer, start, duration })?;
        self.pending_reads += 1;
        Ok(())
    }

    /// Restore factory defaults and zero both buffers
    pub fn reset(&mut self) -> ControlResult<()> {
        self.send(Command::Reset)
    }

    // --- Event subscription and dispatch ---

    /// Register the phase report callback: `(voice, position_seconds)`
    /// with a 1-based voice number
    pub fn on_phase(&mut self, handler: impl FnMut(usize, f64) + Send + 'static) {
        self.phase_handler = Some(Box::new(handler));
    }

    /// Register the buffer read callback: `(buffer, start_seconds,
    /// samples)` with a 1-based buffer number
    pub fn on_buffer_data(&mut self, handler: impl FnMut(usize, f64, &[Sample]) + Send + 'static) {
        self.buffer_data_handler = Some(Box::new(handler));
    }

    /// Drain queued events and dispatch them to the registered callbacks
    ///
    /// Returns the number of events handled. Call this from the control
    /// loop at whatever cadence the application refreshes.
    pub fn poll_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.pop() {
            handled += 1;
            match event {
                Event::Phase { voice, seconds } => {
                    if let Some(handler) = self.phase_handler.as_mut() {
                        handler(VoiceId(voice).display_number(), seconds);
                    }
                }
                Event::BufferData { buffer, start_sample, samples } => {
                    self.pending_reads = self.pending_reads.saturating_sub(1);
                    if let Some(handler) = self.buffer_data_handler.as_mut() {
                        let start = start_sample as f64 / self.sample_rate;
                        handler(BufferId(buffer).display_number(), start, &samples);
                    }
                }
            }
        }
        handled
    }
}
