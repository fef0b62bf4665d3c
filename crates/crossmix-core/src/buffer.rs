//! Pure helpers over mono sample buffers: fade envelopes, length matching and summing.

use serde::{Deserialize, Serialize};

use crate::error::MixError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeDirection {
    In,
    Out,
}

/// Applies a linear ramp in place over `duration_samples`.
///
/// `In` ramps 0 to 1 across the head of the buffer, `Out` ramps 1 to 0 across
/// its tail. Both endpoints are hit exactly; a one-sample window keeps the
/// start value of the ramp and an empty window leaves the buffer untouched.
pub fn fade(
    buffer: &mut [f32],
    duration_samples: usize,
    direction: FadeDirection,
) -> Result<(), MixError> {
    if duration_samples > buffer.len() {
        return Err(MixError::validation(format!(
            "fade of {duration_samples} samples exceeds buffer of {} samples",
            buffer.len()
        )));
    }
    if duration_samples == 0 {
        return Ok(());
    }

    let span = duration_samples.saturating_sub(1).max(1) as f32;
    let window = match direction {
        FadeDirection::In => &mut buffer[..duration_samples],
        FadeDirection::Out => {
            let start = buffer.len() - duration_samples;
            &mut buffer[start..]
        }
    };

    for (index, sample) in window.iter_mut().enumerate() {
        let ramp = index as f32 / span;
        let gain = match direction {
            FadeDirection::In => ramp,
            FadeDirection::Out => 1.0 - ramp,
        };
        *sample *= gain.clamp(0.0, 1.0);
    }
    Ok(())
}

/// Pads the shorter buffer with trailing silence so both share the longer length.
pub fn equalize_length(a: &mut Vec<f32>, b: &mut Vec<f32>) {
    let len = a.len().max(b.len());
    a.resize(len, 0.0);
    b.resize(len, 0.0);
}

#[must_use]
pub fn peak(buffer: &[f32]) -> f32 {
    buffer.iter().copied().map(f32::abs).fold(0.0_f32, f32::max)
}

/// Sums two equal-length buffers sample by sample.
///
/// With `normalize`, a result whose peak exceeds 1.0 is scaled down by that
/// peak; quieter results are returned untouched.
pub fn combine(a: &[f32], b: &[f32], normalize: bool) -> Result<Vec<f32>, MixError> {
    if a.len() != b.len() {
        return Err(MixError::validation(format!(
            "cannot combine buffers of {} and {} samples",
            a.len(),
            b.len()
        )));
    }

    let mut combined: Vec<f32> = a.iter().zip(b).map(|(left, right)| left + right).collect();
    if normalize {
        let peak = peak(&combined);
        if peak > 1.0 {
            for sample in &mut combined {
                *sample /= peak;
            }
        }
    }
    Ok(combined)
}
