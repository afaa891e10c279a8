use crate::config::{FALLBACK_BEAT_COUNT, FALLBACK_BEAT_SPACING};
use crate::core::decode::{self, DecodeError};
use log::{info, warn};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::f32::consts::PI;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("could not decode audio: {0}")]
    Decode(#[from] DecodeError),
    #[error("audio too short for beat analysis ({seconds:.2}s)")]
    TooShort { seconds: f32 },
    #[error("no onsets found")]
    NoOnsets,
}

/// The audio-analysis collaborator: approximate beat times in seconds, in
/// any order.
pub trait BeatAnalyzer {
    fn analyze(&self, path: &Path) -> Result<Vec<f32>, AnalysisError>;
}

/// `[0.0, 0.5, ..., 14.5]`, used whenever analysis fails.
pub fn fallback_beats() -> Vec<f32> {
    (0..FALLBACK_BEAT_COUNT)
        .map(|i| i as f32 * FALLBACK_BEAT_SPACING)
        .collect()
}

/// Runs the analyzer and returns sorted, de-duplicated, non-negative beat
/// times. Never fails: errors and empty results yield `fallback_beats()`.
pub fn extract(analyzer: &dyn BeatAnalyzer, path: &Path) -> Vec<f32> {
    match analyzer.analyze(path) {
        Ok(raw) => {
            let beats = sanitize(raw);
            if beats.is_empty() {
                warn!(
                    "No beats detected in '{}'; using {} fallback beats.",
                    path.display(),
                    FALLBACK_BEAT_COUNT
                );
                return fallback_beats();
            }
            info!("Detected {} beats in '{}'.", beats.len(), path.display());
            beats
        }
        Err(e) => {
            warn!(
                "Beat analysis failed for '{}': {}; using {} fallback beats.",
                path.display(),
                e,
                FALLBACK_BEAT_COUNT
            );
            fallback_beats()
        }
    }
}

fn sanitize(mut beats: Vec<f32>) -> Vec<f32> {
    beats.retain(|t| t.is_finite() && *t >= 0.0);
    beats.sort_by(|a, b| a.total_cmp(b));
    beats.dedup();
    beats
}

// --- Spectral-flux analyzer ---

const WINDOW: usize = 1024;
const HOP: usize = 512;
const MIN_BPM: f32 = 60.0;
const MAX_BPM: f32 = 200.0;
const PRIOR_BPM: f32 = 120.0;
const LOG_COMPRESSION: f32 = 100.0;
const SILENCE_FLUX: f32 = 1e-4;
/// Fraction of the strongest onset a refined beat must reach.
const PEAK_THRESHOLD: f32 = 0.1;

/// Onset-envelope beat tracker: log-magnitude spectral flux, tempo by FFT
/// autocorrelation with a prior around 120 BPM, then a beat grid that snaps
/// to nearby onset peaks as it goes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpectralFluxAnalyzer;

impl BeatAnalyzer for SpectralFluxAnalyzer {
    fn analyze(&self, path: &Path) -> Result<Vec<f32>, AnalysisError> {
        let audio = decode::decode_file(path)?;
        detect_beats(&audio.to_mono(), audio.sample_rate)
    }
}

/// Beat times in seconds for a mono signal.
pub fn detect_beats(mono: &[f32], sample_rate: u32) -> Result<Vec<f32>, AnalysisError> {
    let seconds = if sample_rate == 0 { 0.0 } else { mono.len() as f32 / sample_rate as f32 };
    let envelope = onset_envelope(mono);
    let frame_rate = sample_rate as f32 / HOP as f32;

    let min_lag = ((frame_rate * 60.0 / MAX_BPM).floor() as usize).max(1);
    let max_lag = (frame_rate * 60.0 / MIN_BPM).ceil() as usize;
    if envelope.len() < max_lag * 2 || min_lag >= max_lag {
        return Err(AnalysisError::TooShort { seconds });
    }

    let peak = envelope.iter().copied().fold(0.0f32, f32::max);
    if peak < SILENCE_FLUX {
        return Err(AnalysisError::NoOnsets);
    }

    let acf = autocorrelation(&envelope, max_lag + 1);
    let coarse = estimate_period(&acf, min_lag, max_lag, frame_rate);
    let (period, phase) = refine_grid(&envelope, coarse);
    let frames = track(&envelope, period, phase, peak * PEAK_THRESHOLD);

    Ok(frames
        .into_iter()
        .map(|f| frame_time(f, sample_rate))
        .collect())
}

fn hann(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / len as f32).cos())
        .collect()
}

/// Positive log-magnitude flux between consecutive Hann-windowed spectra,
/// averaged over bins. Pitch changes register even at constant loudness.
fn onset_envelope(mono: &[f32]) -> Vec<f32> {
    if mono.len() < WINDOW {
        return Vec::new();
    }
    let frames = (mono.len() - WINDOW) / HOP + 1;
    let bins = WINDOW / 2;
    let fft = FftPlanner::<f32>::new().plan_fft_forward(WINDOW);
    let window = hann(WINDOW);
    // A full-scale sine peaks at WINDOW / 4 under a Hann window.
    let scale = 4.0 / WINDOW as f32;

    let mut buffer = vec![Complex::new(0.0f32, 0.0); WINDOW];
    let mut prev = vec![0.0f32; bins];
    let mut current = vec![0.0f32; bins];
    let mut envelope = Vec::with_capacity(frames);

    for i in 0..frames {
        let start = i * HOP;
        for ((slot, &s), &w) in buffer.iter_mut().zip(&mono[start..start + WINDOW]).zip(&window) {
            *slot = Complex::new(s * w, 0.0);
        }
        fft.process(&mut buffer);
        for (mag, c) in current.iter_mut().zip(&buffer[1..=bins]) {
            *mag = (1.0 + LOG_COMPRESSION * c.norm() * scale).ln();
        }

        let flux = if i == 0 {
            0.0
        } else {
            current
                .iter()
                .zip(&prev)
                .map(|(c, p)| (c - p).max(0.0))
                .sum::<f32>()
                / bins as f32
        };
        envelope.push(flux);
        std::mem::swap(&mut prev, &mut current);
    }
    envelope
}

// An onset in frame i first entered its window in the newest hop.
#[inline(always)]
fn frame_time(frame: f32, sample_rate: u32) -> f32 {
    (frame * HOP as f32 + (WINDOW - HOP / 2) as f32) / sample_rate as f32
}

#[inline(always)]
fn near_max(envelope: &[f32], center: usize) -> f32 {
    let lo = center.saturating_sub(1);
    let hi = (center + 1).min(envelope.len() - 1);
    envelope[lo..=hi].iter().copied().fold(0.0, f32::max)
}

/// Unbiased autocorrelation of the mean-removed envelope for lags
/// `0..=max_lag`: zero-pad, forward FFT, power spectrum, inverse FFT.
fn autocorrelation(envelope: &[f32], max_lag: usize) -> Vec<f32> {
    let n = envelope.len();
    let size = (2 * n).next_power_of_two();
    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(size);
    let inverse = planner.plan_fft_inverse(size);

    let mean = envelope.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let mut buffer = vec![Complex::new(0.0f64, 0.0); size];
    for (slot, &v) in buffer.iter_mut().zip(envelope) {
        *slot = Complex::new(v as f64 - mean, 0.0);
    }

    forward.process(&mut buffer);
    for c in buffer.iter_mut() {
        *c = Complex::new(c.norm_sqr(), 0.0);
    }
    inverse.process(&mut buffer);

    // rustfft does not normalize.
    let scale = 1.0 / size as f64;
    (0..=max_lag.min(n - 1))
        .map(|lag| (buffer[lag].re * scale / (n - lag) as f64) as f32)
        .collect()
}

/// Coarse beat period in frames. Neighbouring lags share the score so a
/// period between two integer lags is not split in half, and each lag is
/// weighted by a log-normal prior (one octave wide) around 120 BPM.
fn estimate_period(acf: &[f32], min_lag: usize, max_lag: usize, frame_rate: f32) -> f32 {
    let mut best_lag = min_lag;
    let mut best_score = f32::MIN;
    for lag in min_lag..=max_lag.min(acf.len().saturating_sub(2)) {
        let raw = acf[lag] + 0.5 * (acf[lag - 1] + acf[lag + 1]);
        let bpm = frame_rate * 60.0 / lag as f32;
        let octaves = (bpm / PRIOR_BPM).log2();
        let score = raw * (-0.5 * octaves * octaves).exp();
        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }
    best_lag as f32
}

/// Searches fractional periods within one frame of `coarse`, together with
/// their best phase. Returns `(period, phase)` in frames.
fn refine_grid(envelope: &[f32], coarse: f32) -> (f32, f32) {
    const STEPS: usize = 40;
    let mut best = (coarse, 0.0, f32::MIN);
    for s in 0..=STEPS {
        let period = coarse - 1.0 + 2.0 * s as f32 / STEPS as f32;
        if period < 1.0 {
            continue;
        }
        let (phase, score) = best_phase(envelope, period);
        if score > best.2 {
            best = (period, phase, score);
        }
    }
    (best.0, best.1)
}

/// Offset in [0, period) whose comb collects the most onset energy, and
/// that energy.
fn best_phase(envelope: &[f32], period: f32) -> (f32, f32) {
    let n = envelope.len();
    let mut best = 0usize;
    let mut best_score = f32::MIN;
    for phase in 0..(period.ceil() as usize).min(n) {
        let mut score = 0.0;
        let mut t = phase as f32;
        while (t.round() as usize) < n {
            score += near_max(envelope, t.round() as usize);
            t += period;
        }
        if score > best_score {
            best_score = score;
            best = phase;
        }
    }
    (best as f32, best_score)
}

/// Walks the grid from `phase`, snapping each beat to the strongest onset
/// near its prediction so small period errors never accumulate.
fn track(envelope: &[f32], period: f32, phase: f32, threshold: f32) -> Vec<f32> {
    let n = envelope.len();
    let radius = ((period * 0.15).round() as usize).max(2);
    let mut beats: Vec<f32> = Vec::new();
    let mut predicted = phase;

    while (predicted.round() as usize) < n {
        let center = predicted.round() as usize;
        let lo = center.saturating_sub(radius);
        let hi = (center + radius).min(n - 1);
        let (idx, value) = (lo..=hi)
            .map(|i| (i, envelope[i]))
            .fold((center, f32::MIN), |acc, x| if x.1 > acc.1 { x } else { acc });

        let beat = if value >= threshold { idx as f32 } else { predicted };
        if beats.last().is_none_or(|last| beat > *last) {
            beats.push(beat);
        }
        predicted = beat + period;
    }
    beats
}
