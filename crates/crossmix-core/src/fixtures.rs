//! Synthetic clips and deterministic oracle stand-ins for tests and demos.

use std::{
    f64::consts::TAU,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Result, bail};

use crate::{
    oracle::{DownbeatOracle, Oracles, StretchOracle, TempoOracle},
    time::{SAMPLE_RATE, beats_to_seconds, seconds_to_samples, stretched_len},
    track::Track,
};

pub const BEATS_PER_BAR: usize = 4;

const CLICK_SECONDS: f64 = 0.03;
const CLICK_DECAY_SECONDS: f64 = 0.006;
const DOWNBEAT_AMPLITUDE: f64 = 0.9;
const BEAT_AMPLITUDE: f64 = 0.35;

/// Metronome clicks at `bpm` in 4/4 with accented downbeats.
#[must_use]
pub fn click_samples(bpm: f64, bars: usize) -> Vec<f32> {
    let beats = bars * BEATS_PER_BAR;
    let total = seconds_to_samples(beats_to_seconds(beats as f64, bpm));
    let click_len = seconds_to_samples(CLICK_SECONDS);
    let mut samples = vec![0.0_f32; total];

    for beat in 0..beats {
        let start = seconds_to_samples(beats_to_seconds(beat as f64, bpm));
        let (amplitude, frequency) = if beat % BEATS_PER_BAR == 0 {
            (DOWNBEAT_AMPLITUDE, 1_600.0)
        } else {
            (BEAT_AMPLITUDE, 1_000.0)
        };

        let end = start.saturating_add(click_len).min(total);
        for (offset, sample) in samples[start.min(end)..end].iter_mut().enumerate() {
            let t = offset as f64 / f64::from(SAMPLE_RATE);
            let envelope = (-t / CLICK_DECAY_SECONDS).exp();
            *sample = (amplitude * envelope * (TAU * frequency * t).sin()) as f32;
        }
    }
    samples
}

#[must_use]
pub fn click_track(name: &str, bpm: f64, bars: usize) -> Track {
    Track::new(name, click_samples(bpm, bars))
}

/// Samples a buffer of `beats` beats needs to play at `bpm`.
#[must_use]
pub fn samples_for_beats(beats: usize, bpm: f64) -> usize {
    seconds_to_samples(beats_to_seconds(beats as f64, bpm))
}

/// Non-silent buffer sized so [`LengthTempoOracle`] reports `bpm`.
#[must_use]
pub fn tone_samples(beats: usize, bpm: f64) -> Vec<f32> {
    (0..samples_for_beats(beats, bpm))
        .map(|index| (0.5 * (TAU * 220.0 * index as f64 / f64::from(SAMPLE_RATE)).sin()) as f32)
        .collect()
}

/// Treats every buffer as exactly `beats` beats long.
///
/// Stretching by a factor scales the reported tempo by the same factor, so
/// retiming converges in one step. Silent buffers are rejected.
#[derive(Debug, Clone, Copy)]
pub struct LengthTempoOracle {
    pub beats: usize,
}

impl TempoOracle for LengthTempoOracle {
    fn estimate_tempo(&self, samples: &[f32], sample_rate: u32) -> Result<f64> {
        if samples.iter().all(|sample| *sample == 0.0) {
            bail!("no onsets in silent buffer");
        }
        let seconds = samples.len() as f64 / f64::from(sample_rate);
        Ok(self.beats as f64 * 60.0 / seconds)
    }
}

/// Spreads `beats / beats_per_bar` downbeats evenly over the buffer, starting at zero.
#[derive(Debug, Clone, Copy)]
pub struct EvenBarsDownbeatOracle {
    pub beats: usize,
    pub beats_per_bar: usize,
}

impl DownbeatOracle for EvenBarsDownbeatOracle {
    fn estimate_downbeats(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<f64>> {
        let bars = self.beats / self.beats_per_bar.max(1);
        if bars < 2 {
            bail!("buffer holds fewer than two bars");
        }
        let seconds = samples.len() as f64 / f64::from(sample_rate);
        let bar_seconds = seconds / bars as f64;
        Ok((0..bars).map(|bar| bar as f64 * bar_seconds).collect())
    }
}

/// Fails every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingOracle;

impl TempoOracle for FailingOracle {
    fn estimate_tempo(&self, _samples: &[f32], _sample_rate: u32) -> Result<f64> {
        bail!("tempo back-end unavailable")
    }
}

impl DownbeatOracle for FailingOracle {
    fn estimate_downbeats(&self, _samples: &[f32], _sample_rate: u32) -> Result<Vec<f64>> {
        bail!("downbeat back-end unavailable")
    }
}

impl StretchOracle for FailingOracle {
    fn stretch(&self, _samples: &[f32], _sample_rate: u32, _factor: f64) -> Result<Vec<f32>> {
        bail!("stretch back-end unavailable")
    }
}

/// Linear-interpolation resampler. Pitch follows tempo, but output is exact
/// and a unit factor returns the input untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct VarispeedStretchOracle;

impl StretchOracle for VarispeedStretchOracle {
    fn stretch(&self, samples: &[f32], _sample_rate: u32, stretch_factor: f64) -> Result<Vec<f32>> {
        if !stretch_factor.is_finite() || stretch_factor <= 0.0 {
            bail!("stretch factor must be positive, got {stretch_factor}");
        }
        let Some(&last) = samples.last() else {
            return Ok(Vec::new());
        };

        let stretched = (0..stretched_len(samples.len(), stretch_factor))
            .map(|index| {
                let position = index as f64 * stretch_factor;
                let base = position.floor() as usize;
                let frac = (position - base as f64) as f32;
                let current = samples.get(base).copied().unwrap_or(last);
                let next = samples.get(base + 1).copied().unwrap_or(last);
                current + (next - current) * frac
            })
            .collect();
        Ok(stretched)
    }
}

/// Stalls for `delay` on buffers shorter than `stall_below`, otherwise defers to `inner`.
#[derive(Debug, Clone, Copy)]
pub struct StallingTempoOracle {
    pub inner: LengthTempoOracle,
    pub delay: Duration,
    pub stall_below: usize,
}

impl TempoOracle for StallingTempoOracle {
    fn estimate_tempo(&self, samples: &[f32], sample_rate: u32) -> Result<f64> {
        if samples.len() < self.stall_below {
            thread::sleep(self.delay);
        }
        self.inner.estimate_tempo(samples, sample_rate)
    }
}

/// Counts downbeat estimations before delegating.
pub struct CountingDownbeatOracle {
    inner: Arc<dyn DownbeatOracle>,
    calls: AtomicUsize,
}

impl CountingDownbeatOracle {
    #[must_use]
    pub fn new(inner: Arc<dyn DownbeatOracle>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DownbeatOracle for CountingDownbeatOracle {
    fn estimate_downbeats(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.estimate_downbeats(samples, sample_rate)
    }
}

/// Length-derived tempo, evenly spaced bars, varispeed stretching.
#[must_use]
pub fn stub_oracles(beats: usize) -> Oracles {
    Oracles::new(
        Arc::new(LengthTempoOracle { beats }),
        Arc::new(EvenBarsDownbeatOracle {
            beats,
            beats_per_bar: BEATS_PER_BAR,
        }),
        Arc::new(VarispeedStretchOracle),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_track_accents_downbeats() {
        let samples = click_samples(120.0, 2);
        assert_eq!(samples.len(), samples_for_beats(8, 120.0));

        let beat = samples_for_beats(1, 120.0);
        let window = seconds_to_samples(CLICK_SECONDS);
        let peak = |start: usize| {
            samples[start..start + window]
                .iter()
                .fold(0.0_f32, |acc, sample| acc.max(sample.abs()))
        };
        assert!(peak(0) > 0.7);
        assert!(peak(beat) < 0.4);
        assert!(peak(4 * beat) > 0.7);
    }

    #[test]
    fn length_tempo_tracks_buffer_length() {
        let oracle = LengthTempoOracle { beats: 32 };
        let bpm = oracle
            .estimate_tempo(&tone_samples(32, 124.0), SAMPLE_RATE)
            .expect("tempo");
        assert!((bpm - 124.0).abs() < 0.01);
        assert!(oracle.estimate_tempo(&[0.0; 64], SAMPLE_RATE).is_err());
    }

    #[test]
    fn varispeed_scales_length_inversely_to_factor() {
        let samples: Vec<f32> = (0..1_000).map(|i| (i as f32 * 0.01).sin()).collect();
        let faster = VarispeedStretchOracle
            .stretch(&samples, SAMPLE_RATE, 1.25)
            .expect("stretch should work");
        let slower = VarispeedStretchOracle
            .stretch(&samples, SAMPLE_RATE, 0.5)
            .expect("stretch should work");
        assert_eq!(faster.len(), 800);
        assert_eq!(slower.len(), 2_000);
        assert_eq!(faster[0], samples[0]);
        assert_eq!(
            VarispeedStretchOracle
                .stretch(&samples, SAMPLE_RATE, 1.0)
                .expect("stretch should work"),
            samples
        );
    }

    #[test]
    fn even_bars_start_at_zero_and_stay_inside_buffer() {
        let oracle = EvenBarsDownbeatOracle {
            beats: 32,
            beats_per_bar: 4,
        };
        let samples = tone_samples(32, 120.0);
        let downbeats = oracle
            .estimate_downbeats(&samples, SAMPLE_RATE)
            .expect("downbeats");
        assert_eq!(downbeats.len(), 8);
        assert_eq!(downbeats[0], 0.0);
        assert!((downbeats[1] - 2.0).abs() < 1e-6);
    }
}
