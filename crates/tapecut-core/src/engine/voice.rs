//! Voice - a single playback/record head over a shared PCM buffer
//!
//! Each voice owns a fractional head position driven at a signed rate.
//! Playback reads with linear interpolation, applies a loop-boundary
//! crossfade and an equal-power pan, and accumulates into the block
//! outputs. Recording writes through the same head, mixing the input with
//! the existing buffer contents. Everything here runs on the audio thread;
//! out-of-range positions read silence and skip writes instead of faulting.

use super::buffer::PcmBuffer;
use super::command::Event;
use crate::types::Sample;

/// Default crossfade length at the loop boundary, in seconds
pub const DEFAULT_FADE_TIME: f64 = 0.01;

/// A single voice
///
/// Constructed once at engine creation and never destroyed; `enabled`
/// is the idle state. Parameters arrive in seconds and are cached in
/// sample units so the per-frame kernel does no conversions.
pub struct Voice {
    index: usize,
    sample_rate: f64,

    // Topology
    pub(super) enabled: bool,
    pub(super) playing: bool,
    pub(super) recording: bool,
    pub(super) buffer: usize,

    // Transport. The head may go slightly negative mid-wrap.
    phase: f64,
    rate: f64,

    // Loop geometry, seconds and cached samples
    loop_on: bool,
    loop_start: f64,
    loop_end: f64,
    fade_time: f64,
    loop_start_smp: f64,
    loop_end_smp: f64,
    fade_smp: f64,

    // Amplitude
    level: f32,
    level_target: f32,
    level_slew: f64,

    // Pan, with cached equal-power gains
    pan: f32,
    gain_l: f32,
    gain_r: f32,

    // Record mix
    rec_level: f32,
    pre_level: f32,

    // Phase reporting
    phase_quant: f64,
    phase_quant_smp: f64,
    phase_accum: f64,
}

impl Voice {
    /// Create a voice with factory defaults
    ///
    /// Voices 0-2 default to buffer 0, voices 3-5 to buffer 1.
    pub fn new(index: usize, sample_rate: f64) -> Self {
        let mut voice = Self {
            index,
            sample_rate,
            enabled: false,
            playing: false,
            recording: false,
            buffer: 0,
            phase: 0.0,
            rate: 1.0,
            loop_on: false,
            loop_start: 0.0,
            loop_end: crate::types::MAX_BUFFER_SECS,
            fade_time: DEFAULT_FADE_TIME,
            loop_start_smp: 0.0,
            loop_end_smp: 0.0,
            fade_smp: 0.0,
            level: 1.0,
            level_target: 1.0,
            level_slew: 0.0,
            pan: 0.0,
            gain_l: 0.0,
            gain_r: 0.0,
            rec_level: 0.0,
            pre_level: 0.0,
            phase_quant: 0.0,
            phase_quant_smp: 0.0,
            phase_accum: 0.0,
        };
        voice.reset();
        voice
    }

    /// Restore factory defaults
    pub fn reset(&mut self) {
        self.enabled = false;
        self.playing = false;
        self.recording = false;
        self.buffer = if self.index < 3 { 0 } else { 1 };
        self.phase = 0.0;
        self.rate = 1.0;
        self.loop_on = false;
        self.set_loop_start(0.0);
        self.set_loop_end(crate::types::MAX_BUFFER_SECS);
        self.set_fade_time(DEFAULT_FADE_TIME);
        self.level = 1.0;
        self.level_target = 1.0;
        self.level_slew = 0.0;
        self.set_pan(0.0);
        self.rec_level = 0.0;
        self.pre_level = 0.0;
        self.phase_quant = 0.0;
        self.phase_quant_smp = 0.0;
        self.phase_accum = 0.0;
    }

    // --- Parameter setters (called from command dispatch) ---

    pub fn set_rate(&mut self, rate: f64) {
        self.rate = rate;
    }

    pub fn set_position(&mut self, seconds: f64) {
        self.phase = seconds * self.sample_rate;
    }

    pub fn set_loop(&mut self, on: bool) {
        self.loop_on = on;
    }

    pub fn set_loop_start(&mut self, seconds: f64) {
        self.loop_start = seconds;
        self.loop_start_smp = seconds * self.sample_rate;
    }

    pub fn set_loop_end(&mut self, seconds: f64) {
        self.loop_end = seconds;
        self.loop_end_smp = seconds * self.sample_rate;
    }

    pub fn set_fade_time(&mut self, seconds: f64) {
        self.fade_time = seconds;
        self.fade_smp = seconds * self.sample_rate;
    }

    /// Set the level target; snaps immediately when slew time is zero
    pub fn set_level(&mut self, level: f32) {
        self.level_target = level;
        if self.level_slew <= 0.0 {
            self.level = level;
        }
    }

    pub fn set_level_slew(&mut self, seconds: f64) {
        self.level_slew = seconds;
    }

    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan.clamp(-1.0, 1.0);
        let norm = (self.pan + 1.0) * 0.5;
        let angle = norm * std::f32::consts::FRAC_PI_2;
        self.gain_l = angle.cos();
        self.gain_r = angle.sin();
    }

    pub fn set_rec_level(&mut self, level: f32) {
        self.rec_level = level;
    }

    pub fn set_pre_level(&mut self, level: f32) {
        self.pre_level = level;
    }

    pub fn set_phase_quant(&mut self, seconds: f64) {
        self.phase_quant = seconds;
        self.phase_quant_smp = seconds * self.sample_rate;
        self.phase_accum = 0.0;
    }

    // --- State accessors ---

    #[inline]
    pub fn phase(&self) -> f64 {
        self.phase
    }

    #[inline]
    pub fn phase_seconds(&self) -> f64 {
        self.phase / self.sample_rate
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    #[inline]
    pub fn level(&self) -> f32 {
        self.level
    }

    #[inline]
    pub fn pan_gains(&self) -> (f32, f32) {
        (self.gain_l, self.gain_r)
    }

    /// Crossfade gain at a given head position
    ///
    /// Linear ramp from 0 to 1 over `fade_time` at both loop edges;
    /// unity elsewhere, and whenever the loop or fade is inactive.
    pub fn fade_gain(&self, phase: f64) -> f64 {
        if !self.loop_on || self.fade_smp <= 0.0 {
            return 1.0;
        }
        if self.loop_end_smp - self.loop_start_smp <= 0.0 {
            return 1.0;
        }
        let d_start = phase - self.loop_start_smp;
        let d_end = self.loop_end_smp - phase;
        if (0.0..self.fade_smp).contains(&d_start) {
            d_start / self.fade_smp
        } else if (0.0..self.fade_smp).contains(&d_end) {
            d_end / self.fade_smp
        } else {
            1.0
        }
    }

    /// Run the per-frame kernel over one block
    ///
    /// Reads from and (when recording) writes into `buf`, accumulates into
    /// the pre-cleared `out_l`/`out_r`, and pushes quantised phase reports
    /// when `phase_polling` is on. A full event queue drops the report;
    /// the next quantum replaces it.
    #[allow(clippy::too_many_arguments)]
    pub fn process_block(
        &mut self,
        buf: &mut PcmBuffer,
        input: &[Sample],
        out_l: &mut [Sample],
        out_r: &mut [Sample],
        phase_polling: bool,
        events: &mut rtrb::Producer<Event>,
    ) {
        let frames = out_l.len().min(out_r.len()).min(input.len());
        let len = buf.len();
        let data = buf.as_mut_slice();

        for i in 0..frames {
            // Level slew: fixed slope of one amplitude unit per slew period
            if self.level != self.level_target {
                if self.level_slew <= 0.0 {
                    self.level = self.level_target;
                } else {
                    let step = (1.0 / (self.level_slew * self.sample_rate)) as f32;
                    if self.level < self.level_target {
                        self.level = (self.level + step).min(self.level_target);
                    } else {
                        self.level = (self.level - step).max(self.level_target);
                    }
                }
            }

            // A stopped voice holds its head; only the slew above runs.
            if !self.playing {
                continue;
            }

            // Linear-interpolated read; out-of-range head reads silence
            let p = self.phase;
            let i0 = p.floor();
            let idx = i0 as isize;
            let sample = if idx >= 0 && idx + 1 < len as isize {
                let frac = (p - i0) as f32;
                let a = data[idx as usize];
                let b = data[idx as usize + 1];
                a * (1.0 - frac) + b * frac
            } else if idx >= 0 && idx < len as isize {
                data[idx as usize]
            } else {
                0.0
            };

            let fade = self.fade_gain(p) as f32;
            let out = sample * self.level * fade;
            out_l[i] += out * self.gain_l;
            out_r[i] += out * self.gain_r;

            // Record through the same head, before it advances
            if self.recording {
                let ri = p.floor() as isize;
                if ri >= 0 && (ri as usize) < len {
                    let ri = ri as usize;
                    data[ri] = self.rec_level * input[i] + self.pre_level * data[ri];
                }
            }

            self.phase += self.rate;

            // Boundary policy: single-step wrap inside the loop, stop at
            // the buffer edge in one-shot mode
            if self.loop_on {
                if self.rate > 0.0 && self.phase >= self.loop_end_smp {
                    self.phase = self.loop_start_smp + (self.phase - self.loop_end_smp);
                } else if self.rate < 0.0 && self.phase < self.loop_start_smp {
                    self.phase = self.loop_end_smp - (self.loop_start_smp - self.phase);
                }
            } else if self.phase >= len as f64 || self.phase < 0.0 {
                self.playing = false;
            }

            if phase_polling && self.phase_quant_smp > 0.0 {
                self.phase_accum += self.rate.abs();
                while self.phase_accum >= self.phase_quant_smp {
                    self.phase_accum -= self.phase_quant_smp;
                    let _ = events.push(Event::Phase {
                        voice: self.index,
                        seconds: self.phase / self.sample_rate,
                    });
                }
            }
        }
    }
}
