use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    error::MixError,
    oracle::{Oracles, validate_timeline},
    time::{SAMPLE_RATE, samples_to_seconds, seconds_to_samples, stretch_factor},
};

/// Tempo and downbeat timeline of one buffer, as returned by the analysis boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackAnalysis {
    pub tempo: f64,
    pub downbeats: Vec<f64>,
    pub sample_count: usize,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone)]
struct Timeline {
    downbeats: Vec<f64>,
    generation: u64,
}

/// One clip of audio plus its lazily computed tempo and downbeats.
///
/// The buffer is only ever replaced wholesale. Every replacement bumps the
/// audio generation, and a downbeat timeline computed for an older generation
/// is treated as absent: [`Track::downbeats`] hides it and
/// [`Track::downbeats_or_calculate`] recomputes it.
#[derive(Debug, Clone)]
pub struct Track {
    id: Uuid,
    name: String,
    audio: Arc<Vec<f32>>,
    generation: u64,
    tempo: Option<f64>,
    timeline: Option<Timeline>,
}

impl Track {
    #[must_use]
    pub fn new(name: impl Into<String>, samples: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            audio: Arc::new(samples),
            generation: 0,
            tempo: None,
            timeline: None,
        }
    }

    /// Restores a track whose analysis was computed earlier, e.g. from the cache.
    pub fn from_analysis(
        name: impl Into<String>,
        samples: Vec<f32>,
        analysis: &TrackAnalysis,
    ) -> Result<Self, MixError> {
        if analysis.sample_count != samples.len() {
            return Err(MixError::validation(format!(
                "analysis covers {} samples but audio has {}",
                analysis.sample_count,
                samples.len()
            )));
        }
        if !analysis.tempo.is_finite() || analysis.tempo <= 0.0 {
            return Err(MixError::validation(format!(
                "analysis tempo must be positive, got {}",
                analysis.tempo
            )));
        }
        validate_timeline(&analysis.downbeats).map_err(MixError::Validation)?;

        let mut track = Self::new(name, samples);
        track.tempo = Some(analysis.tempo);
        track.timeline = Some(Timeline {
            downbeats: analysis.downbeats.clone(),
            generation: track.generation,
        });
        Ok(track)
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn audio(&self) -> &[f32] {
        &self.audio
    }

    #[must_use]
    pub fn shared_audio(&self) -> &Arc<Vec<f32>> {
        &self.audio
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.audio.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.audio.is_empty()
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        samples_to_seconds(self.audio.len())
    }

    #[must_use]
    pub fn tempo(&self) -> Option<f64> {
        self.tempo
    }

    /// Downbeats computed for the current buffer; empty when absent or stale.
    #[must_use]
    pub fn downbeats(&self) -> &[f64] {
        match &self.timeline {
            Some(timeline) if timeline.generation == self.generation => &timeline.downbeats,
            _ => &[],
        }
    }

    #[must_use]
    pub fn has_fresh_downbeats(&self) -> bool {
        matches!(&self.timeline, Some(timeline) if timeline.generation == self.generation)
    }

    #[must_use]
    pub fn analysis(&self) -> Option<TrackAnalysis> {
        let tempo = self.tempo?;
        if !self.has_fresh_downbeats() {
            return None;
        }

        Some(TrackAnalysis {
            tempo,
            downbeats: self.downbeats().to_vec(),
            sample_count: self.len(),
            duration_seconds: self.duration_seconds(),
        })
    }

    #[instrument(skip(self, oracles), fields(track = %self.name))]
    pub fn calculate_tempo(&mut self, oracles: &Oracles) -> Result<f64, MixError> {
        if self.audio.is_empty() {
            return Err(MixError::validation(format!(
                "cannot estimate tempo of empty track {}",
                self.name
            )));
        }

        let bpm = oracles.tempo(&self.audio)?;
        self.tempo = Some(bpm);
        debug!(bpm, "tempo calculated");
        Ok(bpm)
    }

    pub fn tempo_or_calculate(&mut self, oracles: &Oracles) -> Result<f64, MixError> {
        match self.tempo {
            Some(bpm) => Ok(bpm),
            None => self.calculate_tempo(oracles),
        }
    }

    #[instrument(skip(self, oracles), fields(track = %self.name))]
    pub fn calculate_downbeats(&mut self, oracles: &Oracles) -> Result<&[f64], MixError> {
        if self.audio.is_empty() {
            return Err(MixError::precondition(format!(
                "track {} has no audio to find downbeats in",
                self.name
            )));
        }

        let downbeats = oracles.downbeats(&self.audio)?;
        debug!(count = downbeats.len(), "downbeats calculated");
        self.timeline = Some(Timeline {
            downbeats,
            generation: self.generation,
        });
        Ok(self.downbeats())
    }

    pub fn downbeats_or_calculate(&mut self, oracles: &Oracles) -> Result<&[f64], MixError> {
        if self.has_fresh_downbeats() {
            return Ok(self.downbeats());
        }
        self.calculate_downbeats(oracles)
    }

    /// Stretches the audio to `target_bpm` and returns the re-measured tempo.
    ///
    /// The downbeat timeline is left as it was and becomes stale; callers that
    /// cue off downbeats must recompute them.
    #[instrument(skip(self, oracles), fields(track = %self.name))]
    pub fn retime(&mut self, target_bpm: f64, oracles: &Oracles) -> Result<f64, MixError> {
        if !target_bpm.is_finite() || target_bpm <= 0.0 {
            return Err(MixError::validation(format!(
                "target tempo must be positive, got {target_bpm}"
            )));
        }

        let current_bpm = self.tempo_or_calculate(oracles)?;
        let factor = stretch_factor(current_bpm, target_bpm);
        let stretched = oracles.stretch(&self.audio, factor)?;
        if stretched.is_empty() {
            return Err(MixError::Oracle {
                oracle: crate::error::OracleKind::Stretch,
                reason: format!("returned no audio for track {}", self.name),
            });
        }

        self.replace_audio(stretched);
        let measured_bpm = self.calculate_tempo(oracles)?;
        info!(
            from_bpm = current_bpm,
            target_bpm,
            measured_bpm,
            factor,
            samples = self.len(),
            "track retimed"
        );
        Ok(measured_bpm)
    }

    /// Keeps the audio from downbeat `offset_beat` through downbeat
    /// `offset_beat + length_beat`, both boundary samples included.
    #[instrument(skip(self, oracles), fields(track = %self.name))]
    pub fn crop(
        &mut self,
        offset_beat: usize,
        length_beat: usize,
        oracles: &Oracles,
    ) -> Result<(), MixError> {
        let end_beat = offset_beat.saturating_add(length_beat);
        let (start_time, end_time) = {
            let downbeats = self.downbeats_or_calculate(oracles)?;
            if end_beat >= downbeats.len() {
                return Err(MixError::CropOutOfRange {
                    requested: end_beat,
                    available: downbeats.len(),
                });
            }
            (downbeats[offset_beat], downbeats[end_beat])
        };

        let start_sample = seconds_to_samples(start_time);
        let end_sample = seconds_to_samples(end_time);
        let end_exclusive = end_sample.saturating_add(1).min(self.audio.len());
        if start_sample >= end_exclusive {
            return Err(MixError::validation(format!(
                "crop of beats {offset_beat}..={end_beat} leaves no audio in {}",
                self.name
            )));
        }

        let cropped = self.audio[start_sample..end_exclusive].to_vec();
        self.replace_audio(cropped);
        info!(
            offset_beat,
            end_beat,
            samples = self.len(),
            sample_rate = SAMPLE_RATE,
            "track cropped"
        );
        Ok(())
    }

    fn replace_audio(&mut self, samples: Vec<f32>) {
        self.audio = Arc::new(samples);
        self.generation += 1;
    }
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
