//! Parallel per-track analysis.
//!
//! Tempo and downbeat estimation are independent per track, so they run on a
//! bounded rayon pool. A failing or timed-out track is reported and dropped;
//! it never aborts the batch.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use anyhow::Context;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, instrument};

use crate::{
    error::{ErrorKind, MixError},
    events::{EventSink, MixEvent},
    oracle::Oracles,
    track::Track,
};

pub const MAX_WORKERS: usize = 16;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub workers: usize,
    pub cancel: Arc<AtomicBool>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl BatchOptions {
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisFailure {
    pub track: String,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub analyzed: Vec<Track>,
    pub failures: Vec<AnalysisFailure>,
    pub cancelled: usize,
}

enum TrackResult {
    Analyzed(Track),
    Failed(AnalysisFailure),
    Cancelled,
}

/// Computes tempo and downbeats for every track, in parallel.
///
/// Tracks that already carry both are passed through untouched. Output order
/// follows input order. Tracks not yet started when `options.cancel` is raised
/// are counted in [`BatchOutcome::cancelled`].
#[instrument(skip_all, fields(tracks = tracks.len(), workers = options.workers))]
pub fn analyze_tracks(
    tracks: Vec<Track>,
    oracles: &Oracles,
    options: &BatchOptions,
    sink: &dyn EventSink,
) -> Result<BatchOutcome, MixError> {
    let started = Instant::now();
    let workers = options.workers.clamp(1, MAX_WORKERS);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|index| format!("crossmix-analysis-{index}"))
        .build()
        .context("failed to build analysis thread pool")?;

    let results: Vec<TrackResult> = pool.install(|| {
        tracks
            .into_par_iter()
            .map(|track| {
                if options.cancel.load(Ordering::Relaxed) {
                    return TrackResult::Cancelled;
                }
                analyze_one(track, oracles, sink)
            })
            .collect()
    });

    let mut outcome = BatchOutcome::default();
    for result in results {
        match result {
            TrackResult::Analyzed(track) => outcome.analyzed.push(track),
            TrackResult::Failed(failure) => outcome.failures.push(failure),
            TrackResult::Cancelled => outcome.cancelled += 1,
        }
    }

    if outcome.cancelled > 0 {
        sink.record(MixEvent::BatchCancelled {
            completed: outcome.analyzed.len() + outcome.failures.len(),
            remaining: outcome.cancelled,
        });
    }
    info!(
        analyzed = outcome.analyzed.len(),
        failed = outcome.failures.len(),
        cancelled = outcome.cancelled,
        elapsed_ms = started.elapsed().as_millis(),
        "batch analysis complete"
    );
    Ok(outcome)
}

fn analyze_one(mut track: Track, oracles: &Oracles, sink: &dyn EventSink) -> TrackResult {
    let analyzed = track.tempo_or_calculate(oracles).and_then(|tempo| {
        let count = track.downbeats_or_calculate(oracles)?.len();
        Ok((tempo, count))
    });

    match analyzed {
        Ok((tempo, downbeats)) => {
            sink.record(MixEvent::AnalysisCompleted {
                track: track.name().to_string(),
                tempo,
                downbeats,
            });
            TrackResult::Analyzed(track)
        }
        Err(error) => {
            sink.record(MixEvent::AnalysisFailed {
                track: track.name().to_string(),
                reason: error.to_string(),
            });
            TrackResult::Failed(AnalysisFailure {
                track: track.name().to_string(),
                kind: error.kind(),
                reason: error.to_string(),
            })
        }
    }
}
