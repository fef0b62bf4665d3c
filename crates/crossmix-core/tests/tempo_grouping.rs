use std::sync::Arc;

use crossmix_core::{
    AssembleOptions, ErrorKind, MemorySink, MixEvent, Track, TrackAnalysis, assemble,
    buffer::peak,
    fixtures::{stub_oracles, tone_samples},
    partition, select_largest,
};

fn analyzed(name: &str, tempo: f64) -> Arc<Track> {
    let samples = vec![0.0_f32; 64];
    let analysis = TrackAnalysis {
        tempo,
        downbeats: vec![0.0, 0.0005],
        sample_count: samples.len(),
        duration_seconds: samples.len() as f64 / 44_100.0,
    };
    Arc::new(Track::from_analysis(name, samples, &analysis).expect("analysis should be valid"))
}

fn tone(name: &str, bpm: f64) -> Arc<Track> {
    Arc::new(Track::new(name, tone_samples(32, bpm)))
}

#[test]
fn nearby_tempos_share_a_group() {
    let tracks = vec![
        analyzed("fast", 150.0),
        analyzed("a", 120.0),
        analyzed("b", 122.0),
    ];
    let sink = MemorySink::new();
    let groups = partition(&tracks, 10.0, &sink).expect("partition should succeed");

    assert_eq!(groups.len(), 2);
    let names = |index: usize| -> Vec<&str> {
        groups[index]
            .tracks()
            .iter()
            .map(|track| track.name())
            .collect()
    };
    assert_eq!(names(0), vec!["a", "b"]);
    assert_eq!(names(1), vec!["fast"]);

    let largest = select_largest(&groups).expect("groups are not empty");
    assert_eq!(largest.average_tempo(), Some(121.0));

    let opened = sink
        .events()
        .iter()
        .filter(|event| matches!(event, MixEvent::GroupOpened { .. }))
        .count();
    assert_eq!(opened, 2);
}

#[test]
fn assemble_mixes_the_largest_group_at_its_average_tempo() {
    let oracles = stub_oracles(32);
    let mut tracks = vec![tone("a", 120.0), tone("b", 122.0), tone("fast", 150.0)];
    for track in &mut tracks {
        let track = Arc::get_mut(track).expect("track is not shared yet");
        track.calculate_tempo(&oracles).expect("tempo");
    }

    let options = AssembleOptions {
        overlap_beats: 2,
        ..AssembleOptions::default()
    };
    let sink = Arc::new(MemorySink::new());
    let outcome =
        assemble(&tracks, &options, &oracles, sink.clone(), None).expect("assemble should work");

    assert_eq!(outcome.plan.groups.len(), 2);
    assert_eq!(outcome.plan.selected_group, 0);
    assert_eq!(outcome.plan.groups[0].members, vec!["a", "b"]);
    assert!((outcome.plan.target_bpm - 121.0).abs() < 0.01);
    assert_eq!(outcome.plan.cues.len(), 2);
    assert!(
        outcome
            .plan
            .cues
            .iter()
            .all(|(_, cue)| cue.cue_in == 0 && cue.cue_out == 7 && cue.overlap_beats == 2)
    );
    assert!(!outcome.audio.is_empty());
    assert!(peak(&outcome.audio) <= 1.0 + 1e-6);

    let joined = sink
        .events()
        .iter()
        .filter(|event| matches!(event, MixEvent::TrackJoined { .. }))
        .count();
    assert_eq!(joined, 2);

    // Source tracks keep their own audio.
    assert_eq!(tracks[0].len(), tone_samples(32, 120.0).len());
}

#[test]
fn target_override_replaces_group_average() {
    let oracles = stub_oracles(32);
    let mut track = Track::new("solo", tone_samples(32, 126.0));
    track.calculate_tempo(&oracles).expect("tempo");

    let options = AssembleOptions {
        overlap_beats: 2,
        target_bpm: Some(128.0),
        ..AssembleOptions::default()
    };
    let outcome = assemble(
        &[Arc::new(track)],
        &options,
        &oracles,
        Arc::new(MemorySink::new()),
        None,
    )
    .expect("assemble");
    assert_eq!(outcome.plan.target_bpm, 128.0);
}

#[test]
fn assemble_without_known_tempos_is_a_validation_error() {
    let oracles = stub_oracles(32);
    let sink = MemorySink::new();
    let unknown = Arc::new(Track::new("mystery", tone_samples(32, 120.0)));

    let error = assemble(
        &[unknown],
        &AssembleOptions::default(),
        &oracles,
        Arc::new(sink),
        None,
    )
    .expect_err("no tempo, no group");
    assert_eq!(error.kind(), ErrorKind::Validation);
}
