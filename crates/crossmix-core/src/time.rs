pub const SAMPLE_RATE: u32 = 44_100;

/// Sample offset of a timestamp, truncated toward zero.
#[must_use]
pub fn seconds_to_samples(seconds: f64) -> usize {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }

    (seconds * f64::from(SAMPLE_RATE)) as usize
}

#[must_use]
pub fn samples_to_seconds(samples: usize) -> f64 {
    samples as f64 / f64::from(SAMPLE_RATE)
}

#[must_use]
pub fn beats_to_seconds(beats: f64, bpm: f64) -> f64 {
    if bpm <= 0.0 {
        return 0.0;
    }

    beats * (60.0 / bpm)
}

/// Factor handed to the stretch oracle to move audio from `current_bpm` to `target_bpm`.
#[must_use]
pub fn stretch_factor(current_bpm: f64, target_bpm: f64) -> f64 {
    if current_bpm <= 0.0 {
        return 1.0;
    }

    target_bpm / current_bpm
}

#[must_use]
pub fn stretched_len(len: usize, factor: f64) -> usize {
    if factor <= 0.0 || !factor.is_finite() {
        return len;
    }

    (len as f64 / factor).round() as usize
}
