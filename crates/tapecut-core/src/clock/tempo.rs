//! Tempo and transport state
//!
//! A monotonic beat counter referenced to `std::time::Instant`. While the
//! transport runs, the current beat is extrapolated from a reference point
//! at the configured tempo; stopping freezes the counter. Tempo changes
//! rebase the reference so the beat position never jumps.

use std::time::Instant;

/// Tempo clamp range in beats per minute
pub const MIN_TEMPO: f64 = 1.0;
pub const MAX_TEMPO: f64 = 300.0;

/// Default tempo
pub const DEFAULT_TEMPO: f64 = 120.0;

/// Beat counter state
///
/// Invariant: while running, `beats() = ref_beats + elapsed * bpm / 60`;
/// while stopped, `beats() = ref_beats`.
#[derive(Debug, Clone)]
pub struct TempoState {
    bpm: f64,
    running: bool,
    ref_instant: Instant,
    ref_beats: f64,
}

impl TempoState {
    pub fn new() -> Self {
        Self {
            bpm: DEFAULT_TEMPO,
            running: false,
            ref_instant: Instant::now(),
            ref_beats: 0.0,
        }
    }

    /// Current tempo in beats per minute
    #[inline]
    pub fn tempo(&self) -> f64 {
        self.bpm
    }

    /// Whether the transport is running
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Seconds per beat at the current tempo
    #[inline]
    pub fn beat_seconds(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Current beat position
    pub fn beats(&self) -> f64 {
        if self.running {
            self.ref_beats + self.ref_instant.elapsed().as_secs_f64() * self.bpm / 60.0
        } else {
            self.ref_beats
        }
    }

    /// Change tempo, preserving the current beat position
    ///
    /// Returns the clamped tempo actually applied.
    pub fn set_tempo(&mut self, bpm: f64) -> f64 {
        let clamped = bpm.clamp(MIN_TEMPO, MAX_TEMPO);
        self.ref_beats = self.beats();
        self.ref_instant = Instant::now();
        self.bpm = clamped;
        clamped
    }

    /// Start the transport; a no-op if already running
    pub fn start(&mut self) {
        if !self.running {
            self.ref_instant = Instant::now();
            self.running = true;
        }
    }

    /// Stop the transport, freezing the beat counter; a no-op if stopped
    pub fn stop(&mut self) {
        if self.running {
            self.ref_beats = self.beats();
            self.running = false;
        }
    }
}

impl Default for TempoState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_stopped_clock_holds_position() {
        let tempo = TempoState::new();
        assert!(!tempo.is_running());
        let before = tempo.beats();
        sleep(Duration::from_millis(20));
        assert_eq!(tempo.beats(), before);
    }

    #[test]
    fn test_running_clock_advances_at_tempo() {
        let mut tempo = TempoState::new();
        tempo.set_tempo(120.0);
        tempo.start();
        sleep(Duration::from_millis(250));
        // 120 bpm is 2 beats per second
        let beats = tempo.beats();
        assert!((beats - 0.5).abs() < 0.1, "beats {}", beats);
    }

    #[test]
    fn test_tempo_clamps() {
        let mut tempo = TempoState::new();
        assert_eq!(tempo.set_tempo(0.0), MIN_TEMPO);
        assert_eq!(tempo.set_tempo(1000.0), MAX_TEMPO);
        assert_eq!(tempo.set_tempo(87.5), 87.5);
    }

    #[test]
    fn test_tempo_change_preserves_beats() {
        let mut tempo = TempoState::new();
        tempo.start();
        sleep(Duration::from_millis(100));
        let before = tempo.beats();
        tempo.set_tempo(240.0);
        let after = tempo.beats();
        assert!(after >= before, "beat counter went backwards");
        assert!(after - before < 0.05, "beat counter jumped: {} -> {}", before, after);
    }

    #[test]
    fn test_start_stop_idempotent() {
        let mut tempo = TempoState::new();
        tempo.start();
        tempo.start();
        sleep(Duration::from_millis(50));
        tempo.stop();
        let frozen = tempo.beats();
        tempo.stop();
        assert_eq!(tempo.beats(), frozen);

        // Restart continues from the frozen position
        tempo.start();
        sleep(Duration::from_millis(20));
        assert!(tempo.beats() > frozen);
    }

    #[test]
    fn test_beat_seconds() {
        let mut tempo = TempoState::new();
        tempo.set_tempo(120.0);
        assert!((tempo.beat_seconds() - 0.5).abs() < 1e-12);
        tempo.set_tempo(60.0);
        assert!((tempo.beat_seconds() - 1.0).abs() < 1e-12);
    }
}
