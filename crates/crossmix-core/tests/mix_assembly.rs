use std::sync::{Arc, atomic::AtomicBool};

use crossmix_core::{
    CueSpec, ErrorKind, MemorySink, Mix, MixError, MixEvent, NullSink, Oracles, Track,
    buffer::peak,
    fixtures::{
        BEATS_PER_BAR, CountingDownbeatOracle, EvenBarsDownbeatOracle, LengthTempoOracle,
        VarispeedStretchOracle, stub_oracles, tone_samples,
    },
    mix,
};

const BEATS: usize = 32;

fn tone_track(name: &str, bpm: f64) -> Track {
    Track::new(name, tone_samples(BEATS, bpm))
}

#[test]
fn single_track_mix_is_its_cued_slice() {
    let oracles = stub_oracles(BEATS);
    let track = tone_track("solo", 120.0);

    let audio = mix(
        std::slice::from_ref(&track),
        120.0,
        &[CueSpec::new(0, 7).with_overlap(2)],
        &oracles,
        Arc::new(NullSink),
        None,
    )
    .expect("single track mix should succeed");

    // Eight bars of two seconds each; the cue keeps bars 0 through 5.
    assert_eq!(audio.len(), 6 * 88_200);
    assert_eq!(audio.as_slice(), &track.audio()[..6 * 88_200]);
}

#[test]
fn two_track_mix_overlaps_by_the_crossfade() {
    let oracles = stub_oracles(BEATS);
    let sink = Arc::new(MemorySink::new());
    let tracks = [tone_track("a", 120.0), tone_track("b", 124.0)];
    let cues = [
        CueSpec::new(0, 7).with_overlap(2),
        CueSpec::new(0, 7).with_overlap(2),
    ];

    let audio = mix(&tracks, 120.0, &cues, &oracles, sink.clone(), None)
        .expect("two track mix should succeed");

    let joins: Vec<(usize, usize)> = sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            MixEvent::TrackJoined {
                composite_samples,
                fade_out_samples,
                ..
            } => Some((composite_samples, fade_out_samples)),
            _ => None,
        })
        .collect();
    assert_eq!(joins.len(), 2);

    let first_len = joins[0].0;
    let fade_out = joins[1].1;
    assert_eq!(first_len, 6 * 88_200);
    assert_eq!(fade_out, 2 * 88_200);

    // The retimed second slice is within a sample or two of the first one.
    let expected = first_len + 6 * 88_200 - fade_out;
    assert!(audio.len().abs_diff(expected) <= 2, "len {}", audio.len());
    assert!(peak(&audio) <= 1.0 + 1e-6);

    let retimed = sink
        .events()
        .iter()
        .filter(|event| matches!(event, MixEvent::TrackRetimed { .. }))
        .count();
    assert_eq!(retimed, 2);
}

#[test]
fn failed_join_poisons_the_mix() {
    let oracles = stub_oracles(BEATS);
    let sink = Arc::new(MemorySink::new());
    let mut session = Mix::new(120.0, oracles, sink.clone()).expect("mix should be creatable");
    let track = tone_track("a", 120.0);

    let error = session
        .add_track(&track, 0, 20, 2)
        .expect_err("cue beyond the timeline should fail");
    assert!(matches!(
        error,
        MixError::BeatOutOfRange {
            requested: 20,
            available: 8
        }
    ));
    assert!(session.is_poisoned());
    assert!(
        sink.events()
            .iter()
            .any(|event| matches!(event, MixEvent::JoinRejected { .. }))
    );

    let error = session
        .add_track(&track, 0, 7, 2)
        .expect_err("poisoned mix should refuse new tracks");
    assert_eq!(error.kind(), ErrorKind::Precondition);
    assert!(session.into_audio().is_err());
}

#[test]
fn overlap_longer_than_previous_slice_is_rejected() {
    let oracles = stub_oracles(BEATS);
    let mut session = Mix::new(120.0, oracles, Arc::new(NullSink)).expect("mix");
    let track = tone_track("a", 120.0);

    session.add_track(&track, 0, 3, 2).expect("first join");
    let error = session
        .add_track(&track, 0, 7, 3)
        .expect_err("three-downbeat slice cannot fade over three bars");
    assert_eq!(error.kind(), ErrorKind::Validation);
}

#[test]
fn downbeats_are_recomputed_after_retiming() {
    let counting = Arc::new(CountingDownbeatOracle::new(Arc::new(EvenBarsDownbeatOracle {
        beats: BEATS,
        beats_per_bar: BEATS_PER_BAR,
    })));
    let oracles = Oracles::new(
        Arc::new(LengthTempoOracle { beats: BEATS }),
        counting.clone(),
        Arc::new(VarispeedStretchOracle),
    );

    let mut track = tone_track("a", 128.0);
    track
        .calculate_downbeats(&oracles)
        .expect("downbeats should compute");
    assert_eq!(counting.calls(), 1);

    let mut session = Mix::new(120.0, oracles.clone(), Arc::new(NullSink)).expect("mix");
    session.add_track(&track, 0, 7, 2).expect("join");
    assert_eq!(counting.calls(), 2, "join must not reuse pre-stretch downbeats");
    assert!(track.has_fresh_downbeats(), "caller's track is left untouched");

    track.retime(120.0, &oracles).expect("retime");
    assert!(track.downbeats().is_empty());
    assert!(!track.has_fresh_downbeats());
    let recomputed = track
        .downbeats_or_calculate(&oracles)
        .expect("downbeats")
        .len();
    assert_eq!(recomputed, 8);
    assert_eq!(counting.calls(), 3);
}

#[test]
fn crop_keeps_inclusive_downbeat_range() {
    let oracles = stub_oracles(BEATS);
    let mut track = tone_track("a", 120.0);

    track.crop(1, 2, &oracles).expect("crop");
    assert_eq!(track.len(), 2 * 88_200 + 1);
    assert!(track.downbeats().is_empty());

    let mut short = tone_track("b", 120.0);
    let error = short.crop(6, 2, &oracles).expect_err("crop past the last downbeat");
    assert!(matches!(
        error,
        MixError::CropOutOfRange {
            requested: 8,
            available: 8
        }
    ));
    assert_eq!(error.kind(), ErrorKind::Precondition);
    assert_eq!(short.len(), tone_track("b", 120.0).len());
}

#[test]
fn mix_validates_inputs_and_honours_cancellation() {
    let oracles = stub_oracles(BEATS);
    let track = tone_track("a", 120.0);

    let empty = mix(&[], 120.0, &[], &oracles, Arc::new(NullSink), None)
        .expect_err("empty input should fail");
    assert_eq!(empty.kind(), ErrorKind::Validation);

    let mismatched = mix(
        std::slice::from_ref(&track),
        120.0,
        &[],
        &oracles,
        Arc::new(NullSink),
        None,
    )
    .expect_err("cue count mismatch should fail");
    assert_eq!(mismatched.kind(), ErrorKind::Validation);

    let cancel = AtomicBool::new(true);
    let cancelled = mix(
        std::slice::from_ref(&track),
        120.0,
        &[CueSpec::new(0, 7)],
        &oracles,
        Arc::new(NullSink),
        Some(&cancel),
    )
    .expect_err("raised flag should cancel");
    assert!(matches!(cancelled, MixError::Cancelled { completed: 0 }));
}
