//! Sample engine - owns the buffers and voices, processes audio blocks
//!
//! `process` is the realtime entry point. It clears the block outputs,
//! drains pending commands in arrival order, runs the kernel of every
//! enabled voice, and posts events toward the control thread. It never
//! allocates for its own state, never locks, and never blocks; the only
//! allocations on this path are the rare control-initiated buffer reads.

use super::buffer::PcmBuffer;
use super::command::{Command, Event};
use super::voice::Voice;
use crate::config::EngineConfig;
use crate::types::{buffer_frames, Sample, NUM_BUFFERS, NUM_VOICES};

/// The sample playback/record engine
///
/// All mutation goes through the command queue; the audio thread is the
/// sole owner of buffer and voice state while `process` runs.
pub struct SamplerEngine {
    sample_rate: f64,
    buffers: [PcmBuffer; NUM_BUFFERS],
    voices: [Voice; NUM_VOICES],
    phase_polling: bool,
    commands: rtrb::Consumer<Command>,
    events: rtrb::Producer<Event>,
    /// Undelivered `BufferData` events, retried each block. Preallocated;
    /// the control facade bounds reads in flight to this capacity.
    pending: Vec<Event>,
}

impl SamplerEngine {
    pub(crate) fn new(
        config: &EngineConfig,
        commands: rtrb::Consumer<Command>,
        events: rtrb::Producer<Event>,
    ) -> Self {
        let sample_rate = config.sample_rate as f64;
        let frames = buffer_frames(config.sample_rate);
        log::info!(
            "sampler engine: {} voices, {} buffers of {} frames at {} Hz",
            NUM_VOICES,
            NUM_BUFFERS,
            frames,
            config.sample_rate
        );
        Self {
            sample_rate,
            buffers: std::array::from_fn(|_| PcmBuffer::new(frames)),
            voices: std::array::from_fn(|i| Voice::new(i, sample_rate)),
            phase_polling: false,
            commands,
            events,
            pending: Vec::with_capacity(config.max_pending_reads),
        }
    }

    /// Process one block of audio
    ///
    /// `input` is one mono frame per sample slot; `out_l`/`out_r` are
    /// cleared here and voices accumulate additively. The three slices
    /// must have equal length; the kernel runs over the shortest.
    pub fn process(&mut self, input: &[Sample], out_l: &mut [Sample], out_r: &mut [Sample]) {
        debug_assert_eq!(input.len(), out_l.len());
        debug_assert_eq!(out_l.len(), out_r.len());

        out_l.fill(0.0);
        out_r.fill(0.0);

        self.flush_pending();
        self.process_commands();

        let Self {
            buffers,
            voices,
            phase_polling,
            events,
            ..
        } = self;

        for voice in voices.iter_mut() {
            if !voice.enabled {
                continue;
            }
            let buf = &mut buffers[voice.buffer.min(NUM_BUFFERS - 1)];
            voice.process_block(buf, input, out_l, out_r, *phase_polling, events);
        }
    }

    /// Retry parked `BufferData` events in emission order
    fn flush_pending(&mut self) {
        while !self.pending.is_empty() {
            let event = self.pending.remove(0);
            match self.events.push(event) {
                Ok(()) => {}
                Err(rtrb::PushError::Full(event)) => {
                    self.pending.insert(0, event);
                    break;
                }
            }
        }
    }

    /// Post an event that must not be dropped
    fn post_or_park(&mut self, event: Event) {
        match self.events.push(event) {
            Ok(()) => {}
            Err(rtrb::PushError::Full(event)) => {
                if self.pending.len() < self.pending.capacity() {
                    self.pending.push(event);
                } else {
                    log::warn!("buffer read reply dropped: event queue and pending slots full");
                }
            }
        }
    }

    #[inline]
    fn to_frames(&self, seconds: f64) -> usize {
        (seconds.max(0.0) * self.sample_rate).round() as usize
    }

    /// Drain and apply all pending commands in arrival order
    fn process_commands(&mut self) {
        while let Ok(cmd) = self.commands.pop() {
            match cmd {
                // Voice topology and transport
                Command::Enable { voice, on } => {
                    if let Some(v) = self.voices.get_mut(voice) {
                        v.enabled = on;
                    }
                }
                Command::Play { voice, on } => {
                    if let Some(v) = self.voices.get_mut(voice) {
                        v.playing = on;
                    }
                }
                Command::Record { voice, on } => {
                    if let Some(v) = self.voices.get_mut(voice) {
                        v.recording = on;
                    }
                }
                Command::BufferSelect { voice, buffer } => {
                    if let Some(v) = self.voices.get_mut(voice) {
                        if buffer < NUM_BUFFERS {
                            v.buffer = buffer;
                        }
                    }
                }
                Command::Rate { voice, rate } => {
                    if let Some(v) = self.voices.get_mut(voice) {
                        v.set_rate(rate);
                    }
                }
                Command::Position { voice, seconds } => {
                    if let Some(v) = self.voices.get_mut(voice) {
                        v.set_position(seconds);
                    }
                }

                // Loop configuration
                Command::Loop { voice, on } => {
                    if let Some(v) = self.voices.get_mut(voice) {
                        v.set_loop(on);
                    }
                }
                Command::LoopStart { voice, seconds } => {
                    if let Some(v) = self.voices.get_mut(voice) {
                        v.set_loop_start(seconds);
                    }
                }
                Command::LoopEnd { voice, seconds } => {
                    if let Some(v) = self.voices.get_mut(voice) {
                        v.set_loop_end(seconds);
                    }
                }
                Command::FadeTime { voice, seconds } => {
                    if let Some(v) = self.voices.get_mut(voice) {
                        v.set_fade_time(seconds);
                    }
                }

                // Amplitude, pan, record mix
                Command::Level { voice, level } => {
                    if let Some(v) = self.voices.get_mut(voice) {
                        v.set_level(level);
                    }
                }
                Command::LevelSlewTime { voice, seconds } => {
                    if let Some(v) = self.voices.get_mut(voice) {
                        v.set_level_slew(seconds);
                    }
                }
                Command::Pan { voice, pan } => {
                    if let Some(v) = self.voices.get_mut(voice) {
                        v.set_pan(pan);
                    }
                }
                Command::RecLevel { voice, level } => {
                    if let Some(v) = self.voices.get_mut(voice) {
                        v.set_rec_level(level);
                    }
                }
                Command::PreLevel { voice, level } => {
                    if let Some(v) = self.voices.get_mut(voice) {
                        v.set_pre_level(level);
                    }
                }

                // Phase reporting
                Command::PhaseQuant { voice, seconds } => {
                    if let Some(v) = self.voices.get_mut(voice) {
                        v.set_phase_quant(seconds);
                    }
                }
                Command::PollStartPhase => {
                    self.phase_polling = true;
                }
                Command::PollStopPhase => {
                    self.phase_polling = false;
                }

                // Buffer management
                Command::BufferClear => {
                    for buf in &mut self.buffers {
                        buf.clear();
                    }
                }
                Command::BufferClearChannel { buffer } => {
                    if let Some(buf) = self.buffers.get_mut(buffer) {
                        buf.clear();
                    }
                }
                Command::BufferClearRegion { start, duration } => {
                    // Region clears are global across both buffers,
                    // unlike the per-channel clear.
                    let start = self.to_frames(start);
                    let frames = self.to_frames(duration);
                    for buf in &mut self.buffers {
                        buf.clear_region(start, frames);
                    }
                }
                Command::BufferLoad { buffer, start, data } => {
                    let start = self.to_frames(start);
                    if let Some(buf) = self.buffers.get_mut(buffer) {
                        buf.load(start, &data);
                    }
                    // Dropping the spent payload defers to the collector
                    drop(data);
                }
                Command::BufferRead { buffer, start, duration } => {
                    let start_sample = self.to_frames(start);
                    let frames = self.to_frames(duration);
                    if let Some(buf) = self.buffers.get(buffer) {
                        let samples = buf.read_region(start_sample, frames);
                        self.post_or_park(Event::BufferData {
                            buffer,
                            start_sample,
                            samples,
                        });
                    }
                }

                // Global
                Command::Reset => {
                    for voice in &mut self.voices {
                        voice.reset();
                    }
                    for buf in &mut self.buffers {
                        buf.clear();
                    }
                    self.phase_polling = false;
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn voice(&self, index: usize) -> &Voice {
        &self.voices[index]
    }

    #[cfg(test)]
    pub(crate) fn buffer(&self, index: usize) -> &PcmBuffer {
        &self.buffers[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::command::{command_channel, event_channel};
    use crate::engine::gc::gc_handle;
    use basedrop::Owned;

    const SR: f64 = 48000.0;
    const BLOCK: usize = 256;

    struct Rig {
        engine: SamplerEngine,
        tx: rtrb::Producer<Command>,
        rx: rtrb::Consumer<Event>,
    }

    fn rig() -> Rig {
        let config = EngineConfig::default();
        let (tx, cmd_rx) = command_channel(config.command_queue_capacity);
        let (ev_tx, rx) = event_channel(config.event_queue_capacity);
        Rig {
            engine: SamplerEngine::new(&config, cmd_rx, ev_tx),
            tx,
            rx,
        }
    }

    fn run_frames(rig: &mut Rig, input: &[Sample], frames: usize) -> (Vec<Sample>, Vec<Sample>) {
        let mut all_l = Vec::with_capacity(frames);
        let mut all_r = Vec::with_capacity(frames);
        let mut out_l = [0.0; BLOCK];
        let mut out_r = [0.0; BLOCK];
        let silent = [0.0; BLOCK];
        let mut offset = 0;
        while offset < frames {
            let n = BLOCK.min(frames - offset);
            let block_in: &[Sample] = if input.is_empty() {
                &silent[..n]
            } else {
                &input[offset..offset + n]
            };
            rig.engine.process(block_in, &mut out_l[..n], &mut out_r[..n]);
            all_l.extend_from_slice(&out_l[..n]);
            all_r.extend_from_slice(&out_r[..n]);
            offset += n;
        }
        (all_l, all_r)
    }

    fn drain_events(rig: &mut Rig) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(ev) = rig.rx.pop() {
            events.push(ev);
        }
        events
    }

    #[test]
    fn test_silent_engine_outputs_silence() {
        let mut rig = rig();
        let (l, r) = run_frames(&mut rig, &[], 1024);
        assert!(l.iter().all(|&s| s == 0.0));
        assert!(r.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_sine_loop_rms() {
        // Two seconds of a 440 Hz sine into buffer 0, voice 0 looping it
        // at level 0.8, centre pan.
        let mut rig = rig();
        let sine: Vec<Sample> = (0..96000)
            .map(|i| (2.0 * std::f64::consts::PI * 440.0 * i as f64 / SR).sin() as f32 * 0.5)
            .collect();
        let data = Owned::new(&gc_handle(), sine);
        rig.tx.push(Command::BufferLoad { buffer: 0, start: 0.0, data }).unwrap();
        for cmd in [
            Command::Enable { voice: 0, on: true },
            Command::BufferSelect { voice: 0, buffer: 0 },
            Command::Level { voice: 0, level: 0.8 },
            Command::Pan { voice: 0, pan: 0.0 },
            Command::Rate { voice: 0, rate: 1.0 },
            Command::Loop { voice: 0, on: true },
            Command::LoopStart { voice: 0, seconds: 0.0 },
            Command::LoopEnd { voice: 0, seconds: 2.0 },
            Command::FadeTime { voice: 0, seconds: 0.01 },
            Command::Position { voice: 0, seconds: 0.0 },
            Command::Play { voice: 0, on: true },
        ] {
            rig.tx.push(cmd).unwrap();
        }

        let frames = 480_000;
        let (l, _r) = run_frames(&mut rig, &[], frames);

        let phase = rig.engine.voice(0).phase();
        assert!(phase >= 0.0 && phase < 96000.0, "phase {} outside loop", phase);

        let rms = (l.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / frames as f64).sqrt();
        // 0.5 amplitude * 0.8 level * cos(pi/4) pan / sqrt(2)
        assert!((rms - 0.2).abs() < 0.01, "rms {}", rms);
    }

    #[test]
    fn test_record_round_trip() {
        let mut rig = rig();
        for cmd in [
            Command::Enable { voice: 1, on: true },
            Command::BufferSelect { voice: 1, buffer: 0 },
            Command::Record { voice: 1, on: true },
            Command::RecLevel { voice: 1, level: 1.0 },
            Command::PreLevel { voice: 1, level: 0.0 },
            Command::Rate { voice: 1, rate: 1.0 },
            Command::Position { voice: 1, seconds: 0.0 },
            Command::Play { voice: 1, on: true },
        ] {
            rig.tx.push(cmd).unwrap();
        }

        let input: Vec<Sample> = (0..512).map(|i| ((i % 64) as f32 / 64.0) - 0.5).collect();
        run_frames(&mut rig, &input, 512);

        rig.tx.push(Command::BufferRead { buffer: 0, start: 0.0, duration: 512.0 / SR }).unwrap();
        run_frames(&mut rig, &[], BLOCK);

        let events = drain_events(&mut rig);
        let data = events
            .iter()
            .find_map(|e| match e {
                Event::BufferData { samples, .. } => Some(samples),
                _ => None,
            })
            .expect("no buffer data event");
        assert_eq!(data.len(), 512);
        for (got, want) in data.iter().zip(input.iter()) {
            assert!((got - want).abs() < 1e-7);
        }
    }

    #[test]
    fn test_overdub_converges_geometrically() {
        // Constant 0.4 input with pre-level 0.5 approaches 0.8 over
        // repeated passes of the loop.
        let mut rig = rig();
        for cmd in [
            Command::Enable { voice: 2, on: true },
            Command::BufferSelect { voice: 2, buffer: 1 },
            Command::Loop { voice: 2, on: true },
            Command::LoopStart { voice: 2, seconds: 0.0 },
            Command::LoopEnd { voice: 2, seconds: 0.1 },
            Command::FadeTime { voice: 2, seconds: 0.0 },
            Command::Record { voice: 2, on: true },
            Command::RecLevel { voice: 2, level: 1.0 },
            Command::PreLevel { voice: 2, level: 0.5 },
            Command::Rate { voice: 2, rate: 1.0 },
            Command::Position { voice: 2, seconds: 0.0 },
            Command::Play { voice: 2, on: true },
        ] {
            rig.tx.push(cmd).unwrap();
        }

        let loop_frames = (0.1 * SR) as usize;
        let passes = 6;
        let input = vec![0.4; loop_frames * passes];
        run_frames(&mut rig, &input, loop_frames * passes);

        // After n passes: 0.8 * (1 - 0.5^n)
        let expected = 0.8 * (1.0 - 0.5f32.powi(passes as i32));
        let mid = rig.engine.buffer(1).as_slice()[loop_frames / 2];
        assert!((mid - expected).abs() < 1e-3, "mid {} expected {}", mid, expected);
    }

    #[test]
    fn test_phase_events_halve_with_rate() {
        let mut rig = rig();
        for cmd in [
            Command::Enable { voice: 0, on: true },
            Command::Loop { voice: 0, on: true },
            Command::LoopStart { voice: 0, seconds: 0.0 },
            Command::LoopEnd { voice: 0, seconds: 2.0 },
            Command::PhaseQuant { voice: 0, seconds: 0.01 },
            Command::PollStartPhase,
            Command::Play { voice: 0, on: true },
        ] {
            rig.tx.push(cmd).unwrap();
        }

        run_frames(&mut rig, &[], 48000);
        let full_rate = drain_events(&mut rig)
            .iter()
            .filter(|e| matches!(e, Event::Phase { .. }))
            .count();

        rig.tx.push(Command::Rate { voice: 0, rate: 0.5 }).unwrap();
        run_frames(&mut rig, &[], 48000);
        let half_rate = drain_events(&mut rig)
            .iter()
            .filter(|e| matches!(e, Event::Phase { .. }))
            .count();

        assert!((full_rate as i64 - 100).abs() <= 1, "full rate {}", full_rate);
        assert!((half_rate as i64 - 50).abs() <= 1, "half rate {}", half_rate);
    }

    #[test]
    fn test_poll_stop_gates_phase_events() {
        let mut rig = rig();
        for cmd in [
            Command::Enable { voice: 0, on: true },
            Command::Loop { voice: 0, on: true },
            Command::LoopEnd { voice: 0, seconds: 2.0 },
            Command::PhaseQuant { voice: 0, seconds: 0.01 },
            Command::PollStartPhase,
            Command::Play { voice: 0, on: true },
        ] {
            rig.tx.push(cmd).unwrap();
        }
        run_frames(&mut rig, &[], 4800);
        assert!(!drain_events(&mut rig).is_empty());

        rig.tx.push(Command::PollStopPhase).unwrap();
        run_frames(&mut rig, &[], 4800);
        assert!(drain_events(&mut rig).is_empty());
    }

    #[test]
    fn test_reset_restores_defaults_and_zeros_buffers() {
        let mut rig = rig();
        let data = Owned::new(&gc_handle(), vec![0.7f32; 1000]);
        rig.tx.push(Command::BufferLoad { buffer: 0, start: 0.0, data }).unwrap();
        rig.tx.push(Command::Enable { voice: 0, on: true }).unwrap();
        rig.tx.push(Command::Rate { voice: 0, rate: -2.0 }).unwrap();
        run_frames(&mut rig, &[], BLOCK);

        rig.tx.push(Command::Reset).unwrap();
        run_frames(&mut rig, &[], BLOCK);

        assert!(rig.engine.buffer(0).as_slice()[..1000].iter().all(|&s| s == 0.0));
        assert!(!rig.engine.voice(0).is_playing());

        // Reset is idempotent
        rig.tx.push(Command::Reset).unwrap();
        run_frames(&mut rig, &[], BLOCK);
        assert!(rig.engine.buffer(0).as_slice()[..1000].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_clear_region_hits_both_buffers() {
        let mut rig = rig();
        for buffer in 0..2 {
            let data = Owned::new(&gc_handle(), vec![1.0f32; 4800]);
            rig.tx.push(Command::BufferLoad { buffer, start: 0.0, data }).unwrap();
        }
        run_frames(&mut rig, &[], BLOCK);

        rig.tx.push(Command::BufferClearRegion { start: 0.0, duration: 0.05 }).unwrap();
        run_frames(&mut rig, &[], BLOCK);

        let cleared = (0.05 * SR) as usize;
        for buffer in 0..2 {
            let data = rig.engine.buffer(buffer).as_slice();
            assert!(data[..cleared].iter().all(|&s| s == 0.0));
            assert!(data[cleared..4800].iter().all(|&s| s == 1.0));
        }
    }

    #[test]
    fn test_buffer_clear_then_read_is_all_zeros() {
        let mut rig = rig();
        let data = Owned::new(&gc_handle(), vec![0.3f32; 480]);
        rig.tx.push(Command::BufferLoad { buffer: 1, start: 0.0, data }).unwrap();
        rig.tx.push(Command::BufferClear).unwrap();
        rig.tx.push(Command::BufferRead { buffer: 1, start: 0.0, duration: 0.01 }).unwrap();
        run_frames(&mut rig, &[], BLOCK);

        let events = drain_events(&mut rig);
        match events.first() {
            Some(Event::BufferData { samples, .. }) => {
                assert!(samples.iter().all(|&s| s == 0.0));
            }
            _ => panic!("expected buffer data"),
        }
    }

    #[test]
    fn test_output_bounded_by_enabled_voices() {
        let mut rig = rig();
        let data = Owned::new(&gc_handle(), vec![1.0f32; 48000]);
        rig.tx.push(Command::BufferLoad { buffer: 0, start: 0.0, data }).unwrap();
        for voice in 0..NUM_VOICES {
            for cmd in [
                Command::Enable { voice, on: true },
                Command::BufferSelect { voice, buffer: 0 },
                Command::Loop { voice, on: true },
                Command::LoopEnd { voice, seconds: 0.5 },
                Command::FadeTime { voice, seconds: 0.0 },
                Command::Level { voice, level: 1.0 },
                Command::Play { voice, on: true },
            ] {
                rig.tx.push(cmd).unwrap();
            }
        }

        let (l, r) = run_frames(&mut rig, &[], 4800);
        let bound = NUM_VOICES as f32 + 1e-4;
        assert!(l.iter().chain(r.iter()).all(|&s| s.abs() <= bound));
    }
}
