//! Tempo-proximity grouping of analyzed tracks.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{
    error::MixError,
    events::{EventSink, MixEvent},
    track::Track,
};

pub const DEFAULT_TOLERANCE_BPM: f64 = 10.0;

/// Tempo-compatible tracks sharing audio with their owners, plus their mean tempo.
#[derive(Debug, Clone, Default)]
pub struct TrackGroup {
    tracks: Vec<Arc<Track>>,
    average_tempo: Option<f64>,
}

impl TrackGroup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a track with a known tempo and refreshes the group average.
    pub fn push(&mut self, track: Arc<Track>) -> Result<(), MixError> {
        if track.tempo().is_none() {
            return Err(MixError::precondition(format!(
                "track {} has no tempo and cannot join a group",
                track.name()
            )));
        }

        self.tracks.push(track);
        self.recalculate_average();
        Ok(())
    }

    #[must_use]
    pub fn tracks(&self) -> &[Arc<Track>] {
        &self.tracks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Mean member tempo; `None` for an empty group.
    #[must_use]
    pub fn average_tempo(&self) -> Option<f64> {
        self.average_tempo
    }

    /// Tempo of the first member, which every other member is measured against.
    #[must_use]
    pub fn anchor_tempo(&self) -> Option<f64> {
        self.tracks.first().and_then(|track| track.tempo())
    }

    fn recalculate_average(&mut self) {
        let tempos: Vec<f64> = self.tracks.iter().filter_map(|track| track.tempo()).collect();
        self.average_tempo = if tempos.is_empty() {
            None
        } else {
            Some(tempos.iter().sum::<f64>() / tempos.len() as f64)
        };
    }
}

/// Splits tracks into ascending-tempo groups.
///
/// A group stays open while each new track is within `tolerance_bpm` of the
/// group's first member. Tracks without a tempo are skipped and reported.
#[instrument(skip(tracks, sink), fields(tracks = tracks.len()))]
pub fn partition(
    tracks: &[Arc<Track>],
    tolerance_bpm: f64,
    sink: &dyn EventSink,
) -> Result<Vec<TrackGroup>, MixError> {
    if !tolerance_bpm.is_finite() || tolerance_bpm < 0.0 {
        return Err(MixError::validation(format!(
            "tempo tolerance must be a non-negative number, got {tolerance_bpm}"
        )));
    }

    let mut known: Vec<(f64, &Arc<Track>)> = Vec::with_capacity(tracks.len());
    for track in tracks {
        match track.tempo() {
            Some(tempo) => known.push((tempo, track)),
            None => sink.record(MixEvent::TrackSkipped {
                track: track.name().to_string(),
                reason: "tempo unknown".to_string(),
            }),
        }
    }
    known.sort_by(|(left, _), (right, _)| left.total_cmp(right));

    let mut groups: Vec<TrackGroup> = Vec::new();
    for (tempo, track) in known {
        let open_new = groups
            .last()
            .and_then(TrackGroup::anchor_tempo)
            .is_none_or(|anchor| tempo - anchor > tolerance_bpm);
        if open_new {
            if let Some(previous) = groups.last() {
                close_group(groups.len() - 1, previous, sink);
            }
            sink.record(MixEvent::GroupOpened {
                index: groups.len(),
                anchor_tempo: tempo,
            });
            groups.push(TrackGroup::new());
        }

        if let Some(group) = groups.last_mut() {
            group.push(Arc::clone(track))?;
        }
    }
    if let Some(last) = groups.last() {
        close_group(groups.len() - 1, last, sink);
    }

    debug!(groups = groups.len(), "tracks partitioned by tempo");
    Ok(groups)
}

fn close_group(index: usize, group: &TrackGroup, sink: &dyn EventSink) {
    sink.record(MixEvent::GroupClosed {
        index,
        members: group.len(),
        average_tempo: group.average_tempo().unwrap_or_default(),
    });
}

/// Index of the group with the most members; the earliest one wins a tie.
#[must_use]
pub fn largest_index(groups: &[TrackGroup]) -> Option<usize> {
    groups
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, usize)>, (index, group)| match best {
            Some((_, size)) if size >= group.len() => best,
            _ => Some((index, group.len())),
        })
        .map(|(index, _)| index)
}

#[must_use]
pub fn select_largest(groups: &[TrackGroup]) -> Option<&TrackGroup> {
    largest_index(groups).map(|index| &groups[index])
}
