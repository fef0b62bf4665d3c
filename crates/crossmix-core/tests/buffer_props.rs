use std::sync::Arc;

use crossmix_core::{
    FadeDirection, NullSink, Track, TrackAnalysis,
    buffer::{combine, equalize_length, fade, peak},
    partition,
};
use proptest::prelude::*;

fn samples() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-2.0_f32..2.0, 0..512)
}

fn analyzed(index: usize, tempo: f64) -> Arc<Track> {
    let analysis = TrackAnalysis {
        tempo,
        downbeats: vec![0.0],
        sample_count: 8,
        duration_seconds: 8.0 / 44_100.0,
    };
    Arc::new(
        Track::from_analysis(format!("t{index}"), vec![0.0; 8], &analysis)
            .expect("fixture analysis should be valid"),
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn equalized_buffers_share_the_longer_length(mut a in samples(), mut b in samples()) {
        let longest = a.len().max(b.len());
        let original_a = a.clone();
        equalize_length(&mut a, &mut b);

        prop_assert_eq!(a.len(), longest);
        prop_assert_eq!(b.len(), longest);
        prop_assert_eq!(&a[..original_a.len()], original_a.as_slice());
        prop_assert!(a[original_a.len()..].iter().all(|sample| *sample == 0.0));
    }

    #[test]
    fn normalized_sum_never_clips(mut a in samples(), mut b in samples()) {
        equalize_length(&mut a, &mut b);
        let combined = combine(&a, &b, true).expect("equal lengths combine");
        prop_assert_eq!(combined.len(), a.len());
        prop_assert!(peak(&combined) <= 1.0 + 1e-6);
    }

    #[test]
    fn quiet_sums_are_left_unscaled(
        a in prop::collection::vec(-0.5_f32..0.5, 0..256),
        b in prop::collection::vec(-0.5_f32..0.5, 0..256),
    ) {
        let len = a.len().min(b.len());
        let combined = combine(&a[..len], &b[..len], true).expect("equal lengths combine");
        let expected: Vec<f32> = a[..len].iter().zip(&b[..len]).map(|(x, y)| x + y).collect();
        prop_assert_eq!(combined, expected);
    }

    #[test]
    fn fade_in_then_out_is_not_identity(
        buffer in prop::collection::vec(0.1_f32..1.0, 2..256),
        fraction in 0.0_f64..1.0,
    ) {
        let duration = (((buffer.len() - 1) as f64 * fraction) as usize).max(1);
        let mut faded = buffer.clone();
        fade(&mut faded, duration, FadeDirection::In).expect("window fits");
        fade(&mut faded, duration, FadeDirection::Out).expect("window fits");
        prop_assert_ne!(faded, buffer);
    }

    #[test]
    fn fade_touches_only_its_window(
        buffer in prop::collection::vec(0.1_f32..1.0, 2..256),
        fraction in 0.0_f64..=1.0,
        fade_in in any::<bool>(),
    ) {
        let duration = ((buffer.len() as f64) * fraction) as usize;
        let mut faded = buffer.clone();
        let direction = if fade_in { FadeDirection::In } else { FadeDirection::Out };
        fade(&mut faded, duration, direction).expect("window fits");

        let untouched = if fade_in {
            duration..buffer.len()
        } else {
            0..buffer.len() - duration
        };
        prop_assert_eq!(&faded[untouched.clone()], &buffer[untouched]);
        prop_assert!(faded.iter().zip(&buffer).all(|(after, before)| after.abs() <= before.abs()));
        if duration >= 2 {
            let silent = if fade_in { faded[0] } else { faded[buffer.len() - 1] };
            prop_assert_eq!(silent, 0.0);
        }
    }

    #[test]
    fn oversized_fade_is_rejected(buffer in samples(), extra in 1_usize..64) {
        let mut faded = buffer.clone();
        prop_assert!(fade(&mut faded, buffer.len() + extra, FadeDirection::In).is_err());
        prop_assert_eq!(faded, buffer);
    }

    #[test]
    fn partition_places_every_track_once_within_tolerance(
        tempos in prop::collection::vec(60.0_f64..200.0, 0..40),
        tolerance in 0.0_f64..30.0,
    ) {
        let tracks: Vec<_> = tempos
            .iter()
            .enumerate()
            .map(|(index, tempo)| analyzed(index, *tempo))
            .collect();
        let groups = partition(&tracks, tolerance, &NullSink).expect("partition");

        let placed: usize = groups.iter().map(|group| group.len()).sum();
        prop_assert_eq!(placed, tracks.len());

        let mut previous_anchor: Option<f64> = None;
        for group in &groups {
            let anchor = group.anchor_tempo().expect("groups are never empty");
            for track in group.tracks() {
                let tempo = track.tempo().expect("grouped tracks have a tempo");
                prop_assert!(tempo >= anchor);
                prop_assert!(tempo - anchor <= tolerance);
            }
            if let Some(previous) = previous_anchor {
                prop_assert!(anchor - previous > tolerance);
            }
            previous_anchor = Some(anchor);
        }
    }
}
