//! Frequency analyzer fed from a PCM tap.
//!
//! Keeps the last `fft_size` mono samples; on demand runs a Hann-windowed
//! FFT and converts magnitudes to bytes the way a WebAudio `AnalyserNode`
//! does: per-bin exponential smoothing, then a linear map of
//! `[min_decibels, max_decibels]` onto `0..=255`.

use std::sync::{Arc, Mutex, MutexGuard};

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyzerSettings {
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl AnalyzerSettings {
    pub fn from_config(cfg: &clipfeed_proto::config::PlaybackConfig) -> Self {
        Self {
            fft_size: cfg.fft_size.next_power_of_two().clamp(32, 32768),
            smoothing: cfg.smoothing.clamp(0.0, 1.0),
            min_decibels: cfg.min_decibels,
            max_decibels: cfg.max_decibels,
        }
    }
}

pub type AnalyzerHandle = Arc<Analyzer>;

pub struct Analyzer {
    settings: AnalyzerSettings,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    inner: Mutex<Inner>,
}

struct Inner {
    ring: Vec<f32>,
    write_pos: usize,
    smoothed: Vec<f32>,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("settings", &self.settings)
            .finish()
    }
}

impl Analyzer {
    pub fn new(settings: AnalyzerSettings) -> AnalyzerHandle {
        let n = settings.fft_size.max(2);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n);
        let window = (0..n)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / n as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect();
        Arc::new(Self {
            settings: AnalyzerSettings { fft_size: n, ..settings },
            fft,
            window,
            inner: Mutex::new(Inner {
                ring: vec![0.0; n],
                write_pos: 0,
                smoothed: vec![0.0; n / 2],
            }),
        })
    }

    pub fn settings(&self) -> AnalyzerSettings {
        self.settings
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.settings.fft_size / 2
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain numbers behind; keep going.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append mono samples in `-1.0..=1.0`.
    pub fn push_samples(&self, samples: &[f32]) {
        let mut inner = self.lock();
        let n = inner.ring.len();
        for &s in samples {
            let pos = inner.write_pos;
            inner.ring[pos] = s;
            inner.write_pos = (pos + 1) % n;
        }
    }

    /// Forget buffered audio, e.g. after a pause.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.ring.iter_mut().for_each(|s| *s = 0.0);
        inner.smoothed.iter_mut().for_each(|s| *s = 0.0);
        inner.write_pos = 0;
    }

    /// Current spectrum, one byte per bin (`fft_size / 2` bins).
    pub fn byte_frequency_data(&self) -> Vec<u8> {
        let n = self.settings.fft_size;
        let mut inner = self.lock();

        // oldest sample first
        let start = inner.write_pos;
        let mut buffer: Vec<Complex<f32>> = (0..n)
            .map(|i| {
                let s = inner.ring[(start + i) % n];
                Complex::new(s * self.window[i], 0.0)
            })
            .collect();
        self.fft.process(&mut buffer);

        let tau = self.settings.smoothing;
        let range = (self.settings.max_decibels - self.settings.min_decibels).max(f32::EPSILON);
        let mut out = Vec::with_capacity(n / 2);
        for (bin, value) in buffer.iter().take(n / 2).enumerate() {
            let magnitude = value.norm() / n as f32;
            let smoothed = tau * inner.smoothed[bin] + (1.0 - tau) * magnitude;
            inner.smoothed[bin] = smoothed;

            let db = if smoothed > 0.0 {
                20.0 * smoothed.log10()
            } else {
                f32::NEG_INFINITY
            };
            let scaled = 255.0 * (db - self.settings.min_decibels) / range;
            out.push(scaled.clamp(0.0, 255.0) as u8);
        }
        out
    }
}
