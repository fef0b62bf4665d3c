//! Sequential crossfade assembler.
//!
//! A [`Mix`] folds tracks into one composite buffer. Each join is a pure
//! transition of [`MixState`]: the outgoing composite is faded out over the
//! last `overlap` bars of the previous track, the incoming slice is faded in
//! over its first `overlap` bars, and the two are summed so the faded regions
//! line up exactly.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    buffer::{self, FadeDirection},
    error::MixError,
    events::{EventSink, MixEvent},
    oracle::Oracles,
    time::seconds_to_samples,
    track::Track,
};

pub const DEFAULT_OVERLAP_BEATS: usize = 16;

/// Downbeat window and crossfade length for one track of a mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CueSpec {
    pub cue_in: usize,
    pub cue_out: usize,
    #[serde(default = "default_overlap_beats")]
    pub overlap_beats: usize,
}

fn default_overlap_beats() -> usize {
    DEFAULT_OVERLAP_BEATS
}

impl CueSpec {
    #[must_use]
    pub fn new(cue_in: usize, cue_out: usize) -> Self {
        Self {
            cue_in,
            cue_out,
            overlap_beats: DEFAULT_OVERLAP_BEATS,
        }
    }

    #[must_use]
    pub fn with_overlap(mut self, overlap_beats: usize) -> Self {
        self.overlap_beats = overlap_beats;
        self
    }
}

/// Rebased downbeats of the most recently joined slice.
///
/// `marks` are the downbeats as sample offsets into the slice; the last mark
/// equals the slice length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JoinState {
    pub downbeats: Vec<f64>,
    pub marks: Vec<usize>,
}

impl JoinState {
    #[must_use]
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Samples between the downbeat `overlap` bars before the end and the end.
    fn tail_window(&self, overlap: usize) -> Result<usize, MixError> {
        let count = self.marks.len();
        if overlap == 0 || overlap >= count {
            return Err(MixError::validation(format!(
                "overlap of {overlap} bars needs more than {count} outgoing downbeats"
            )));
        }
        Ok(self.marks[count - 1] - self.marks[count - 1 - overlap])
    }

    /// Samples between the first downbeat and the one `overlap` bars later.
    fn head_window(&self, overlap: usize) -> Result<usize, MixError> {
        let count = self.marks.len();
        if overlap == 0 || overlap >= count {
            return Err(MixError::validation(format!(
                "overlap of {overlap} bars needs more than {count} incoming downbeats"
            )));
        }
        Ok(self.marks[overlap] - self.marks[0])
    }
}

/// Audio of one track between two cue downbeats, with its rebased timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct CueSlice {
    pub audio: Vec<f32>,
    pub join: JoinState,
}

impl CueSlice {
    /// Cuts `audio` at downbeats `[cue_in, cue_out)` of `downbeats`.
    pub fn cut(
        audio: &[f32],
        downbeats: &[f64],
        cue_in: usize,
        cue_out: usize,
    ) -> Result<Self, MixError> {
        if cue_in >= cue_out {
            return Err(MixError::validation(format!(
                "cue range {cue_in}..{cue_out} is empty"
            )));
        }
        if cue_out > downbeats.len() {
            return Err(MixError::BeatOutOfRange {
                requested: cue_out,
                available: downbeats.len(),
            });
        }
        let retained = &downbeats[cue_in..cue_out];
        if retained.len() < 2 {
            return Err(MixError::validation(format!(
                "cue range {cue_in}..{cue_out} keeps a single downbeat and no audio"
            )));
        }

        let absolute: Vec<usize> = retained
            .iter()
            .map(|time| seconds_to_samples(*time).min(audio.len()))
            .collect();
        let start = absolute[0];
        let end = absolute[absolute.len() - 1];
        if end <= start {
            return Err(MixError::validation(format!(
                "cue range {cue_in}..{cue_out} covers no audio"
            )));
        }

        let first_time = retained[0];
        Ok(Self {
            audio: audio[start..end].to_vec(),
            join: JoinState {
                downbeats: retained.iter().map(|time| time - first_time).collect(),
                marks: absolute.iter().map(|mark| mark - start).collect(),
            },
        })
    }
}

/// Composite built so far, with the join state needed for the next crossfade.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveMix {
    pub audio: Vec<f32>,
    pub join: JoinState,
    pub track_count: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum MixState {
    #[default]
    Empty,
    Active(ActiveMix),
}

/// Fade lengths used by one join; both zero for the first track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct JoinReport {
    pub fade_out_samples: usize,
    pub fade_in_samples: usize,
    pub offset_samples: usize,
}

impl MixState {
    #[must_use]
    pub fn track_count(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Active(active) => active.track_count,
        }
    }

    #[must_use]
    pub fn audio(&self) -> &[f32] {
        match self {
            Self::Empty => &[],
            Self::Active(active) => &active.audio,
        }
    }

    #[must_use]
    pub fn join_state(&self) -> Option<&JoinState> {
        match self {
            Self::Empty => None,
            Self::Active(active) => Some(&active.join),
        }
    }

    /// Returns the state after appending `slice`; `self` is left untouched.
    pub fn join(&self, slice: CueSlice, overlap_beats: usize) -> Result<(Self, JoinReport), MixError> {
        let active = match self {
            Self::Empty => {
                let next = ActiveMix {
                    audio: slice.audio,
                    join: slice.join,
                    track_count: 1,
                };
                return Ok((Self::Active(next), JoinReport::default()));
            }
            Self::Active(active) => active,
        };

        let fade_out_samples = active.join.tail_window(overlap_beats)?;
        let fade_in_samples = slice.join.head_window(overlap_beats)?;
        if fade_out_samples == 0 || fade_in_samples == 0 {
            return Err(MixError::validation(format!(
                "overlap of {overlap_beats} bars spans no audio"
            )));
        }

        let mut outgoing = active.audio.clone();
        buffer::fade(&mut outgoing, fade_out_samples, FadeDirection::Out)?;

        let CueSlice { audio: mut incoming, join } = slice;
        buffer::fade(&mut incoming, fade_in_samples, FadeDirection::In)?;

        let offset_samples = outgoing.len() - fade_out_samples;
        let mut shifted = vec![0.0_f32; offset_samples];
        shifted.extend_from_slice(&incoming);

        buffer::equalize_length(&mut outgoing, &mut shifted);
        let audio = buffer::combine(&outgoing, &shifted, true)?;

        let next = ActiveMix {
            audio,
            join,
            track_count: active.track_count + 1,
        };
        Ok((
            Self::Active(next),
            JoinReport {
                fade_out_samples,
                fade_in_samples,
                offset_samples,
            },
        ))
    }
}

/// Append-only mix session at a fixed target tempo.
///
/// A failed [`Mix::add_track`] poisons the session; every later call fails and
/// the caller is expected to discard it.
pub struct Mix {
    target_bpm: f64,
    state: MixState,
    oracles: Oracles,
    sink: Arc<dyn EventSink>,
    poisoned: bool,
}

impl std::fmt::Debug for Mix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mix")
            .field("target_bpm", &self.target_bpm)
            .field("track_count", &self.state.track_count())
            .field("samples", &self.state.audio().len())
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl Mix {
    pub fn new(
        target_bpm: f64,
        oracles: Oracles,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, MixError> {
        if !target_bpm.is_finite() || target_bpm <= 0.0 {
            return Err(MixError::validation(format!(
                "mix tempo must be positive, got {target_bpm}"
            )));
        }

        Ok(Self {
            target_bpm,
            state: MixState::Empty,
            oracles,
            sink,
            poisoned: false,
        })
    }

    #[must_use]
    pub fn target_bpm(&self) -> f64 {
        self.target_bpm
    }

    #[must_use]
    pub fn track_count(&self) -> usize {
        self.state.track_count()
    }

    #[must_use]
    pub fn state(&self) -> &MixState {
        &self.state
    }

    #[must_use]
    pub fn audio(&self) -> &[f32] {
        self.state.audio()
    }

    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Retimes `track` to the mix tempo, cues it at downbeats
    /// `[cue_in_beat, cue_out_beat)` and crossfades it onto the composite.
    ///
    /// `track` itself is not modified; the join works on a retimed copy whose
    /// downbeats are always recomputed after the stretch.
    #[instrument(skip(self, track), fields(track = %track.name(), target_bpm = self.target_bpm))]
    pub fn add_track(
        &mut self,
        track: &Track,
        cue_in_beat: usize,
        cue_out_beat: usize,
        overlap_beats: usize,
    ) -> Result<JoinReport, MixError> {
        if self.poisoned {
            return Err(MixError::precondition(
                "mix was poisoned by an earlier failed join and must be discarded",
            ));
        }

        match self.try_join(track, cue_in_beat, cue_out_beat, overlap_beats) {
            Ok(report) => Ok(report),
            Err(error) => {
                self.poisoned = true;
                warn!(%error, "join failed, mix poisoned");
                self.sink.record(MixEvent::JoinRejected {
                    track: track.name().to_string(),
                    reason: error.to_string(),
                });
                Err(error)
            }
        }
    }

    pub fn add_cued(&mut self, track: &Track, cue: CueSpec) -> Result<JoinReport, MixError> {
        self.add_track(track, cue.cue_in, cue.cue_out, cue.overlap_beats)
    }

    fn try_join(
        &mut self,
        track: &Track,
        cue_in_beat: usize,
        cue_out_beat: usize,
        overlap_beats: usize,
    ) -> Result<JoinReport, MixError> {
        let mut working = track.clone();
        let from_bpm = working.tempo_or_calculate(&self.oracles)?;
        let measured_bpm = working.retime(self.target_bpm, &self.oracles)?;
        self.sink.record(MixEvent::TrackRetimed {
            track: working.name().to_string(),
            from_bpm,
            target_bpm: self.target_bpm,
            measured_bpm,
        });

        working.calculate_downbeats(&self.oracles)?;
        let slice = CueSlice::cut(
            working.audio(),
            working.downbeats(),
            cue_in_beat,
            cue_out_beat,
        )?;

        let (next, report) = self.state.join(slice, overlap_beats)?;
        self.state = next;

        let composite_samples = self.state.audio().len();
        info!(
            track_count = self.state.track_count(),
            composite_samples,
            fade_out_samples = report.fade_out_samples,
            fade_in_samples = report.fade_in_samples,
            "track joined"
        );
        self.sink.record(MixEvent::TrackJoined {
            track: working.name().to_string(),
            track_count: self.state.track_count(),
            composite_samples,
            fade_out_samples: report.fade_out_samples,
            fade_in_samples: report.fade_in_samples,
        });
        Ok(report)
    }

    /// Hands over the composite buffer.
    pub fn into_audio(self) -> Result<Vec<f32>, MixError> {
        if self.poisoned {
            return Err(MixError::precondition(
                "mix was poisoned by an earlier failed join and holds no trusted audio",
            ));
        }

        Ok(match self.state {
            MixState::Empty => Vec::new(),
            MixState::Active(active) => active.audio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice(len: usize, marks: &[usize]) -> CueSlice {
        CueSlice {
            audio: vec![0.5; len],
            join: JoinState {
                downbeats: marks.iter().map(|mark| *mark as f64 / 44_100.0).collect(),
                marks: marks.to_vec(),
            },
        }
    }

    #[test]
    fn first_join_keeps_slice_verbatim() {
        let incoming = slice(100, &[0, 50, 100]);
        let (state, report) = MixState::Empty
            .join(incoming.clone(), 1)
            .expect("first join");
        assert_eq!(state.audio(), incoming.audio.as_slice());
        assert_eq!(state.track_count(), 1);
        assert_eq!(report, JoinReport::default());
    }

    #[test]
    fn second_join_overlaps_faded_regions() {
        let (first, _) = MixState::Empty
            .join(slice(100, &[0, 50, 100]), 1)
            .expect("first join");
        let (second, report) = first
            .join(slice(80, &[0, 40, 80]), 1)
            .expect("second join");

        assert_eq!(report.fade_out_samples, 50);
        assert_eq!(report.fade_in_samples, 40);
        assert_eq!(report.offset_samples, 50);
        assert_eq!(second.audio().len(), 100 + 80 - 50);
        assert_eq!(second.track_count(), 2);
        assert_eq!(second.join_state().map(JoinState::len), Some(3));
        assert_eq!(first.track_count(), 1, "previous state is untouched");
    }

    #[test]
    fn overlap_must_leave_room_on_both_sides() {
        let (first, _) = MixState::Empty
            .join(slice(100, &[0, 50, 100]), 1)
            .expect("first join");

        let too_long = first.join(slice(80, &[0, 40, 80]), 3).expect_err("overlap");
        assert_eq!(too_long.kind(), crate::error::ErrorKind::Validation);

        let zero = first.join(slice(80, &[0, 40, 80]), 0).expect_err("zero overlap");
        assert_eq!(zero.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn cut_rebases_timeline_and_marks() {
        let audio: Vec<f32> = (0..44_100).map(|i| i as f32).collect();
        let downbeats = [0.1, 0.3, 0.5, 0.7];
        let cut = CueSlice::cut(&audio, &downbeats, 1, 4).expect("cut");

        assert_eq!(cut.join.marks[0], 0);
        assert!((cut.join.downbeats[0]).abs() < f64::EPSILON);
        assert!((cut.join.downbeats[2] - 0.4).abs() < 1e-9);
        assert_eq!(cut.audio.len(), *cut.join.marks.last().expect("marks"));
        assert_eq!(cut.audio[0], audio[seconds_to_samples(0.3)]);
    }

    #[test]
    fn cut_rejects_bad_ranges() {
        let audio = vec![0.0_f32; 44_100];
        let downbeats = [0.1, 0.3, 0.5];
        assert!(CueSlice::cut(&audio, &downbeats, 2, 2).is_err());
        assert!(CueSlice::cut(&audio, &downbeats, 2, 3).is_err());
        assert!(matches!(
            CueSlice::cut(&audio, &downbeats, 0, 4),
            Err(MixError::BeatOutOfRange {
                requested: 4,
                available: 3
            })
        ));
    }
}
