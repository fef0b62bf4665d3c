//! Reference tempo, downbeat and stretch back-ends.
//!
//! Plain signal-processing estimators that let the mixer run end to end
//! without an external model. Stronger back-ends plug in through the traits in
//! [`crate::oracle`].

use anyhow::{anyhow, bail};
use realfft::{RealFftPlanner, num_complex::Complex};
use signalsmith_stretch::Stretch;
use tracing::{debug, instrument};

use crate::{
    oracle::{DownbeatOracle, StretchOracle, TempoOracle},
    time::stretched_len,
};

const HOP: usize = 256;
const SMOOTHING_KERNEL: [f32; 5] = [1.0, 2.0, 3.0, 2.0, 1.0];

fn frames_per_second(sample_rate: u32) -> f64 {
    f64::from(sample_rate) / HOP as f64
}

/// Smoothed, half-wave rectified log-energy flux, one value per hop.
pub(crate) fn onset_envelope(samples: &[f32]) -> Vec<f32> {
    let energies: Vec<f32> = samples
        .chunks(HOP)
        .map(|chunk| {
            let mean_square =
                chunk.iter().map(|sample| sample * sample).sum::<f32>() / chunk.len() as f32;
            (1000.0 * mean_square).ln_1p()
        })
        .collect();

    let mut previous = 0.0_f32;
    let flux: Vec<f32> = energies
        .iter()
        .map(|&energy| {
            let rise = (energy - previous).max(0.0);
            previous = energy;
            rise
        })
        .collect();

    let half = SMOOTHING_KERNEL.len() / 2;
    let norm: f32 = SMOOTHING_KERNEL.iter().sum();
    (0..flux.len())
        .map(|center| {
            SMOOTHING_KERNEL
                .iter()
                .enumerate()
                .filter_map(|(tap, weight)| {
                    (center + tap)
                        .checked_sub(half)
                        .and_then(|index| flux.get(index))
                        .map(|value| value * weight)
                })
                .sum::<f32>()
                / norm
        })
        .collect()
}

/// `sum(x[i] * x[i + lag])` for every lag below `signal.len()`, computed
/// through the power spectrum of the zero-padded signal.
pub(crate) fn autocorrelation(signal: &[f32]) -> anyhow::Result<Vec<f64>> {
    if signal.is_empty() {
        return Ok(Vec::new());
    }
    let fft_len = (2 * signal.len()).next_power_of_two();
    let mut planner = RealFftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(fft_len);
    let inverse = planner.plan_fft_inverse(fft_len);

    let mut frame = forward.make_input_vec();
    for (slot, value) in frame.iter_mut().zip(signal) {
        *slot = f64::from(*value);
    }
    let mut spectrum = forward.make_output_vec();
    forward
        .process(&mut frame, &mut spectrum)
        .map_err(|error| anyhow!("forward FFT failed: {error:?}"))?;

    for bin in &mut spectrum {
        *bin = Complex::new(bin.norm_sqr(), 0.0);
    }
    inverse
        .process(&mut spectrum, &mut frame)
        .map_err(|error| anyhow!("inverse FFT failed: {error:?}"))?;

    let scale = fft_len as f64;
    Ok(frame[..signal.len()].iter().map(|value| value / scale).collect())
}

#[derive(Debug, Clone, Copy)]
pub struct OnsetTempoOracle {
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Centre of the log-normal tempo prior used to settle octave ambiguity.
    pub prior_bpm: f64,
}

impl Default for OnsetTempoOracle {
    fn default() -> Self {
        Self {
            min_bpm: 70.0,
            max_bpm: 180.0,
            prior_bpm: 120.0,
        }
    }
}

impl OnsetTempoOracle {
    /// Mean lagged product at `lag`, weighted by the log-normal tempo prior.
    fn prior_weighted(&self, lagged_sum: f64, frames: usize, lag: usize, fps: f64) -> f64 {
        let correlation = lagged_sum / (frames - lag) as f64;
        let bpm = 60.0 * fps / lag as f64;
        let octaves = (bpm / self.prior_bpm).log2();
        correlation * (-0.5 * octaves * octaves).exp()
    }
}

impl TempoOracle for OnsetTempoOracle {
    #[instrument(skip(self, samples), fields(samples = samples.len()))]
    fn estimate_tempo(&self, samples: &[f32], sample_rate: u32) -> anyhow::Result<f64> {
        let envelope = onset_envelope(samples);
        if envelope.iter().all(|value| *value <= f32::EPSILON) {
            bail!("no onsets detected");
        }

        let fps = frames_per_second(sample_rate);
        let lag_min = ((60.0 * fps / self.max_bpm).floor() as usize).max(1);
        let lag_max = (60.0 * fps / self.min_bpm).ceil() as usize;
        if lag_max + 1 >= envelope.len() {
            bail!(
                "buffer of {} frames too short for tempo range {}-{} bpm",
                envelope.len(),
                self.min_bpm,
                self.max_bpm
            );
        }

        let lagged = autocorrelation(&envelope)?;
        let scores: Vec<f64> = (lag_min..=lag_max)
            .map(|lag| self.prior_weighted(lagged[lag], envelope.len(), lag, fps))
            .collect();
        let (best, best_score) = scores
            .iter()
            .copied()
            .enumerate()
            .max_by(|(_, left), (_, right)| left.total_cmp(right))
            .unwrap_or((0, 0.0));
        if best_score <= 0.0 {
            bail!("no periodicity found in onset envelope");
        }

        let mut lag = (lag_min + best) as f64;
        if best > 0 && best + 1 < scores.len() {
            let (left, right) = (scores[best - 1], scores[best + 1]);
            let curvature = left - 2.0 * best_score + right;
            if curvature < 0.0 {
                lag += (0.5 * (left - right) / curvature).clamp(-0.5, 0.5);
            }
        }

        let bpm = 60.0 * fps / lag;
        debug!(bpm, lag, "tempo estimated");
        Ok(bpm)
    }
}

/// Fixed-interval bar grid phased onto the strongest onsets.
#[derive(Debug, Clone, Copy)]
pub struct GridDownbeatOracle {
    pub beats_per_bar: u32,
    pub tempo: OnsetTempoOracle,
}

impl Default for GridDownbeatOracle {
    fn default() -> Self {
        Self {
            beats_per_bar: 4,
            tempo: OnsetTempoOracle::default(),
        }
    }
}

impl DownbeatOracle for GridDownbeatOracle {
    #[instrument(skip(self, samples), fields(samples = samples.len()))]
    fn estimate_downbeats(&self, samples: &[f32], sample_rate: u32) -> anyhow::Result<Vec<f64>> {
        if self.beats_per_bar == 0 {
            bail!("beats_per_bar must be greater than zero");
        }

        let bpm = self.tempo.estimate_tempo(samples, sample_rate)?;
        let envelope = onset_envelope(samples);
        let fps = frames_per_second(sample_rate);
        let bar_frames = f64::from(self.beats_per_bar) * 60.0 * fps / bpm;

        let search = (bar_frames.ceil() as usize).min(envelope.len());
        let phase_score = |offset: usize| -> f32 {
            (0_u32..)
                .map(|bar| (offset as f64 + f64::from(bar) * bar_frames).round() as usize)
                .take_while(|frame| *frame < envelope.len())
                .map(|frame| envelope[frame])
                .sum()
        };
        let offset = (0..search)
            .map(|offset| (offset, phase_score(offset)))
            .max_by(|(_, left), (_, right)| left.total_cmp(right))
            .map_or(0, |(offset, _)| offset);

        let duration = samples.len() as f64 / f64::from(sample_rate);
        let first = (offset * HOP) as f64 / f64::from(sample_rate);
        let bar_seconds = f64::from(self.beats_per_bar) * 60.0 / bpm;
        let downbeats: Vec<f64> = (0_u32..)
            .map(|bar| first + f64::from(bar) * bar_seconds)
            .take_while(|time| *time < duration)
            .collect();

        if downbeats.len() < 2 {
            bail!(
                "only {} downbeat(s) fit in {duration:.2}s at {bpm:.2} bpm",
                downbeats.len()
            );
        }
        debug!(count = downbeats.len(), first, bar_seconds, "downbeat grid placed");
        Ok(downbeats)
    }
}

/// Phase-vocoder stretcher backed by signalsmith-stretch. Tempo changes while
/// pitch holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalsmithStretchOracle;

impl StretchOracle for SignalsmithStretchOracle {
    #[instrument(skip(self, samples), fields(samples = samples.len()))]
    fn stretch(
        &self,
        samples: &[f32],
        sample_rate: u32,
        stretch_factor: f64,
    ) -> anyhow::Result<Vec<f32>> {
        if !stretch_factor.is_finite() || stretch_factor <= 0.0 {
            bail!("stretch factor must be positive, got {stretch_factor}");
        }
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        if (stretch_factor - 1.0).abs() < f64::EPSILON {
            return Ok(samples.to_vec());
        }

        let mut stretcher = Stretch::preset_default(1, sample_rate);
        let output_len = stretched_len(samples.len(), stretch_factor);
        // Both latencies are expressed on the output side and skipped afterwards.
        let delay = stretcher.output_latency()
            + (stretcher.input_latency() as f64 / stretch_factor).round() as usize;

        let mut output = vec![0.0_f32; output_len + delay];
        let input_len = (output.len() as f64 * stretch_factor).round() as usize;
        let mut input = samples.to_vec();
        input.resize(input_len.max(samples.len()), 0.0);

        stretcher.process(&input[..], &mut output[..]);
        output.drain(..delay);
        output.truncate(output_len);
        debug!(output = output.len(), delay, "stretched");
        Ok(output)
    }
}
