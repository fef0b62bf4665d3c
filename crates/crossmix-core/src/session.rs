//! Entry points used by the surrounding application.
//!
//! `analyze` turns raw clip bytes into a tempo and downbeat timeline; `mix`
//! folds an ordered, cued track list into one composite buffer; `assemble`
//! runs the whole group-select-retime-mix flow on a batch of analyzed tracks.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    assets::decode_audio_bytes_mono,
    cache::AnalysisCache,
    error::MixError,
    events::EventSink,
    group::{DEFAULT_TOLERANCE_BPM, TrackGroup, largest_index, partition},
    mix::{CueSpec, DEFAULT_OVERLAP_BEATS, Mix},
    oracle::Oracles,
    pipeline::{AnalysisFailure, BatchOptions, BatchOutcome, analyze_tracks},
    track::{Track, TrackAnalysis},
};

/// Raw bytes of one clip as handed over by the storage layer.
#[derive(Debug, Clone)]
pub struct ClipSource {
    pub name: String,
    pub bytes: Vec<u8>,
    pub extension: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropSpec {
    pub offset_bars: usize,
    pub length_bars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssembleOptions {
    pub tolerance_bpm: f64,
    pub overlap_beats: usize,
    /// Overrides the selected group's average tempo.
    pub target_bpm: Option<f64>,
    pub crop: Option<CropSpec>,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            tolerance_bpm: DEFAULT_TOLERANCE_BPM,
            overlap_beats: DEFAULT_OVERLAP_BEATS,
            target_bpm: None,
            crop: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub index: usize,
    pub members: Vec<String>,
    pub anchor_tempo: f64,
    pub average_tempo: f64,
}

impl GroupSummary {
    fn from_group(index: usize, group: &TrackGroup) -> Self {
        Self {
            index,
            members: group
                .tracks()
                .iter()
                .map(|track| track.name().to_string())
                .collect(),
            anchor_tempo: group.anchor_tempo().unwrap_or_default(),
            average_tempo: group.average_tempo().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MixPlan {
    pub groups: Vec<GroupSummary>,
    pub selected_group: usize,
    pub target_bpm: f64,
    pub cues: Vec<(String, CueSpec)>,
}

#[derive(Debug, Clone)]
pub struct MixOutcome {
    pub plan: MixPlan,
    pub audio: Vec<f32>,
}

/// Decodes a clip and estimates its tempo and downbeats.
#[instrument(skip(track_bytes, oracles), fields(bytes = track_bytes.len()))]
pub fn analyze(
    track_bytes: &[u8],
    extension: Option<&str>,
    oracles: &Oracles,
) -> Result<TrackAnalysis, MixError> {
    let samples = decode_audio_bytes_mono(track_bytes, extension)?.into_mix_samples()?;
    let mut track = Track::new("clip", samples);
    analyze_track(&mut track, oracles)
}

/// Like [`analyze`], but serves repeated clips from `cache`.
#[instrument(skip(track_bytes, oracles, cache), fields(bytes = track_bytes.len()))]
pub fn analyze_cached(
    track_bytes: &[u8],
    extension: Option<&str>,
    oracles: &Oracles,
    cache: &AnalysisCache,
) -> Result<TrackAnalysis, MixError> {
    let key = AnalysisCache::key(track_bytes);
    if let Some(analysis) = cache.get(&key) {
        return Ok(analysis);
    }

    let analysis = analyze(track_bytes, extension, oracles)?;
    if let Err(error) = cache.put(&key, &analysis) {
        warn!(?error, "failed to cache analysis");
    }
    Ok(analysis)
}

pub fn analyze_track(track: &mut Track, oracles: &Oracles) -> Result<TrackAnalysis, MixError> {
    track.tempo_or_calculate(oracles)?;
    track.downbeats_or_calculate(oracles)?;
    track
        .analysis()
        .ok_or_else(|| MixError::precondition(format!("analysis of {track} is incomplete")))
}

/// Decodes every clip and analyzes the ones the cache does not already cover.
///
/// Clips that fail to decode are reported alongside analysis failures and
/// never reach the grouper.
#[instrument(skip_all, fields(clips = clips.len()))]
pub fn prepare_clips(
    clips: Vec<ClipSource>,
    oracles: &Oracles,
    options: &BatchOptions,
    cache: Option<&AnalysisCache>,
    sink: &dyn EventSink,
) -> Result<BatchOutcome, MixError> {
    let mut tracks = Vec::with_capacity(clips.len());
    let mut keys = Vec::with_capacity(clips.len());
    let mut decode_failures = Vec::new();

    for clip in clips {
        let decoded = decode_audio_bytes_mono(&clip.bytes, clip.extension.as_deref())
            .map_err(MixError::from)
            .and_then(|decoded| decoded.into_mix_samples());
        let samples = match decoded {
            Ok(samples) => samples,
            Err(error) => {
                warn!(clip = %clip.name, %error, "clip could not be decoded");
                decode_failures.push(AnalysisFailure {
                    track: clip.name,
                    kind: error.kind(),
                    reason: error.to_string(),
                });
                continue;
            }
        };

        let key = AnalysisCache::key(&clip.bytes);
        let cached = cache.and_then(|cache| cache.get(&key));
        let track = match cached {
            Some(analysis) => Track::from_analysis(clip.name.clone(), samples.clone(), &analysis)
                .unwrap_or_else(|error| {
                    warn!(clip = %clip.name, %error, "cached analysis rejected");
                    Track::new(clip.name.clone(), samples)
                }),
            None => Track::new(clip.name, samples),
        };
        keys.push((track.id(), key));
        tracks.push(track);
    }

    let mut outcome = analyze_tracks(tracks, oracles, options, sink)?;
    outcome.failures.splice(0..0, decode_failures);

    if let Some(cache) = cache {
        for track in &outcome.analyzed {
            let Some((_, key)) = keys.iter().find(|(id, _)| *id == track.id()) else {
                continue;
            };
            if cache.get(key).is_some() {
                continue;
            }
            if let Some(analysis) = track.analysis() {
                if let Err(error) = cache.put(key, &analysis) {
                    warn!(track = %track.name(), ?error, "failed to cache analysis");
                }
            }
        }
    }
    Ok(outcome)
}

/// Folds `tracks` into one buffer at `target_bpm`, one cue per track, in order.
///
/// `cancel` is checked before each join; a raised flag stops the session
/// without returning any audio.
#[instrument(skip_all, fields(tracks = tracks.len(), target_bpm))]
pub fn mix(
    tracks: &[Track],
    target_bpm: f64,
    cues: &[CueSpec],
    oracles: &Oracles,
    sink: Arc<dyn EventSink>,
    cancel: Option<&AtomicBool>,
) -> Result<Vec<f32>, MixError> {
    if tracks.is_empty() {
        return Err(MixError::validation("no tracks to mix"));
    }
    if cues.len() != tracks.len() {
        return Err(MixError::validation(format!(
            "{} cues given for {} tracks",
            cues.len(),
            tracks.len()
        )));
    }

    let mut session = Mix::new(target_bpm, oracles.clone(), sink)?;
    for (completed, (track, cue)) in tracks.iter().zip(cues).enumerate() {
        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            info!(completed, "mix cancelled before next join");
            return Err(MixError::Cancelled { completed });
        }
        session.add_cued(track, *cue)?;
    }
    session.into_audio()
}

/// Groups analyzed tracks by tempo, picks the largest group and mixes it.
#[instrument(skip_all, fields(tracks = tracks.len()))]
pub fn assemble(
    tracks: &[Arc<Track>],
    options: &AssembleOptions,
    oracles: &Oracles,
    sink: Arc<dyn EventSink>,
    cancel: Option<&AtomicBool>,
) -> Result<MixOutcome, MixError> {
    let groups = partition(tracks, options.tolerance_bpm, sink.as_ref())?;
    let selected_group = largest_index(&groups)
        .ok_or_else(|| MixError::validation("no track with a known tempo to mix"))?;
    let group = &groups[selected_group];
    let target_bpm = match options.target_bpm {
        Some(bpm) => bpm,
        None => group
            .average_tempo()
            .ok_or_else(|| MixError::precondition("selected group has no average tempo"))?,
    };
    info!(
        selected_group,
        members = group.len(),
        target_bpm,
        "group selected for mixing"
    );

    let mut prepared = Vec::with_capacity(group.len());
    let mut cues = Vec::with_capacity(group.len());
    for member in group.tracks() {
        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Err(MixError::Cancelled { completed: 0 });
        }
        let (track, cue) = prepare_member(member, target_bpm, options, oracles)?;
        prepared.push(track);
        cues.push(cue);
    }

    let audio = mix(&prepared, target_bpm, &cues, oracles, sink, cancel)?;
    let plan = MixPlan {
        groups: groups
            .iter()
            .enumerate()
            .map(|(index, group)| GroupSummary::from_group(index, group))
            .collect(),
        selected_group,
        target_bpm,
        cues: prepared
            .iter()
            .map(|track| track.name().to_string())
            .zip(cues)
            .collect(),
    };
    Ok(MixOutcome { plan, audio })
}

/// Retimes and crops one group member and cues it across all of its bars.
///
/// The last bar is held back from the cue: the mixer stretches the track
/// again by the small residual between target and measured tempo, and the
/// recomputed timeline may lose a trailing downbeat.
fn prepare_member(
    member: &Track,
    target_bpm: f64,
    options: &AssembleOptions,
    oracles: &Oracles,
) -> Result<(Track, CueSpec), MixError> {
    let mut track = member.clone();
    track.retime(target_bpm, oracles)?;
    track.calculate_downbeats(oracles)?;
    if let Some(crop) = options.crop {
        track.crop(crop.offset_bars, crop.length_bars, oracles)?;
    }

    let bars = track.downbeats_or_calculate(oracles)?.len();
    let cue = CueSpec::new(0, bars.saturating_sub(1)).with_overlap(options.overlap_beats);
    Ok((track, cue))
}
