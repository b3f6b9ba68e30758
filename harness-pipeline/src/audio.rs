//! Duplex-mode audio plumbing: resampling the client's capture rate to
//! whatever the provider advertises, plus a minimal client-side
//! voice-activity detector driving `TurnDetection`.
//!
//! Two concrete pieces: a resampler between capture and provider sample
//! rates, and silence/duration-threshold turn detection. Real endpoint
//! detection models are an external collaborator — this VAD is the
//! simple energy-threshold fallback a harness runs client-side fixtures
//! through.

use harness_core::scenario::VadConfig;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Resample a mono `f32` PCM buffer from `from_rate` to `to_rate`.
///
/// Returns the input unchanged when the rates already match — `rubato`
/// errors on a 1:1 ratio for some resampler configurations, and there's
/// no work to do anyway.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, String> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let ratio = to_rate as f64 / from_rate as f64;
    let mut resampler = FastFixedIn::<f32>::new(ratio, 10.0, PolynomialDegree::Cubic, samples.len(), 1)
        .map_err(|e| e.to_string())?;
    let output = resampler
        .process(&[samples], None)
        .map_err(|e| e.to_string())?;
    Ok(output.into_iter().next().unwrap_or_default())
}

/// Energy-threshold voice-activity detector tracking one duplex turn's
/// accumulated silence/speech duration against a scenario's
/// [`VadConfig`].
///
/// This is intentionally simple: RMS energy above `ACTIVITY_THRESHOLD`
/// counts as speech, anything else as silence. A production endpoint
/// detector would replace this wholesale; the contract it must honor
/// (`should_end_turn`) is what the duplex executor depends on.
pub struct VoiceActivityDetector {
    config: VadConfig,
    silence_ms: u32,
    speech_ms: u32,
    turn_ms: u32,
}

/// RMS amplitude above which a frame counts as speech, on a `[-1.0, 1.0]`
/// normalized PCM scale.
const ACTIVITY_THRESHOLD: f32 = 0.02;

impl VoiceActivityDetector {
    /// A fresh detector for one turn, against `config`.
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            silence_ms: 0,
            speech_ms: 0,
            turn_ms: 0,
        }
    }

    /// Feed one frame of mono PCM samples, `frame_ms` long, and update
    /// the accumulated silence/speech/turn duration.
    pub fn observe_frame(&mut self, samples: &[f32], frame_ms: u32) {
        let rms = rms_energy(samples);
        if rms >= ACTIVITY_THRESHOLD {
            self.speech_ms += frame_ms;
            self.silence_ms = 0;
        } else {
            self.silence_ms += frame_ms;
        }
        self.turn_ms += frame_ms;
    }

    /// Whether the turn should end now: either trailing silence has
    /// exceeded the configured threshold after enough speech was heard,
    /// or the hard per-turn duration cap was reached.
    pub fn should_end_turn(&self) -> bool {
        if self.turn_ms >= self.config.max_turn_duration_s.saturating_mul(1000) {
            return true;
        }
        self.speech_ms >= self.config.min_speech_ms && self.silence_ms >= self.config.silence_threshold_ms
    }

    /// Reset all accumulators for the next turn.
    pub fn reset(&mut self) {
        self.silence_ms = 0;
        self.speech_ms = 0;
        self.turn_ms = 0;
    }
}

fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
