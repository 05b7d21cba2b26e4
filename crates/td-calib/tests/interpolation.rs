//! End-to-end interpolation of synthetic tracks.

mod common;

use approx::assert_relative_eq;
use common::*;
use td_calib::{
    EngineConfig, Estimate, GateConfig, OutputMode, Record, RejectReason, Schema,
    TrackInterpolation, TrackOutcome, quantize,
};
use td_hist::{HistogramKind, ReferenceCombination, ResidualComponent};

fn emitted(outcome: TrackOutcome) -> TrackInterpolation {
    match outcome {
        TrackOutcome::Emitted(t) => *t,
        TrackOutcome::Rejected(reason) => panic!("track rejected: {reason:?}"),
    }
}

fn fused_chi2(estimate: &Estimate) -> f64 {
    match estimate {
        Estimate::Valid { gate_chi2: Some(chi2), .. } | Estimate::Rejected { chi2, .. } => *chi2,
        other => panic!("no gated estimate: {other:?}"),
    }
}

#[test]
fn inner_only_track_fills_only_inner_accumulators() {
    let engine = engine(EngineConfig::default());
    let track = emitted(engine.process_track(&inner_only_track()).unwrap());

    assert!(track.fits.inner.valid);
    assert_eq!(track.fits.inner.n_points, INNER.len());
    assert!(!track.fits.transition.valid);
    assert!(!track.fits.timing.valid);
    assert_relative_eq!(track.curvature, 0.5, epsilon = 1e-6);

    assert_eq!(track.layers.len(), N_CLUSTERS);
    for (i, layer) in track.layers.iter().enumerate() {
        assert_eq!(layer.layer, i);
        let state = layer.inner.valid_state().expect("inner estimate at every layer");
        assert_relative_eq!(state.x, cluster_radius(i), epsilon = 1e-6);
        assert_relative_eq!(state.y(), expected_dy(i), epsilon = 1e-6);
        assert_relative_eq!(
            layer.residual(ReferenceCombination::Inner, ResidualComponent::Z).unwrap(),
            expected_dz(i),
            epsilon = 1e-6
        );
        assert!(!layer.inner_transition.is_valid());
        assert!(!layer.inner_timing.is_valid());
        assert_eq!(layer.transition, Estimate::Unattempted);
    }

    let mut set = engine.new_histogram_set().unwrap();
    let out = engine.process_event(&event(1, vec![inner_only_track()]), Some(&mut set)).unwrap();
    assert_eq!((out.accepted, out.rejected), (1, 0));
    assert_eq!(out.samples, 2 * N_CLUSTERS);
    for kind in HistogramKind::ALL {
        let entries = set.get(kind).unwrap().entries();
        if kind.combination == ReferenceCombination::Inner {
            assert_eq!(entries, N_CLUSTERS as u64, "{}", kind.name());
        } else {
            assert_eq!(entries, 0, "{}", kind.name());
        }
    }
}

#[test]
fn consistent_transition_track_is_fused_everywhere() {
    let engine = engine(EngineConfig::default());
    let track = emitted(engine.process_track(&track_with_transition(0.0)).unwrap());
    assert!(track.fits.transition.valid);
    assert_eq!(track.fits.transition.n_points, TRANSITION.len());
    assert!(track.fits.transition.chi2 < 1e-6);

    for layer in &track.layers {
        let fused = layer.inner_transition.valid_state().expect("fused estimate");
        assert_relative_eq!(fused.y(), expected_dy(layer.layer), epsilon = 1e-6);
        assert!(fused_chi2(&layer.inner_transition) < 1e-6);
        // The fused state is at least as precise as the inner-only one.
        let inner = layer.inner.valid_state().unwrap();
        assert!(fused.sigma_y2() <= inner.sigma_y2() + 1e-15);
    }
}

#[test]
fn gate_threshold_is_inclusive() {
    let tilted = track_with_transition(0.2);
    let outermost = N_CLUSTERS - 1;

    let reference = emitted(engine(EngineConfig::default()).process_track(&tilted).unwrap());
    let chi2 = fused_chi2(&reference.layers[outermost].inner_transition);
    assert!(chi2 > 0.0);

    let with_gate = |max_chi2: f64| {
        let config = EngineConfig {
            gate: GateConfig { max_chi2, ..GateConfig::default() },
            ..EngineConfig::default()
        };
        engine(config)
    };

    let at = emitted(with_gate(chi2).process_track(&tilted).unwrap());
    assert!(at.layers[outermost].inner_transition.is_valid());

    let below = emitted(with_gate(chi2 * (1.0 - 1e-12)).process_track(&tilted).unwrap());
    assert!(matches!(below.layers[outermost].inner_transition, Estimate::Rejected { .. }));
    // The inner-only estimate is untouched by the gate.
    assert!(below.layers[outermost].inner.is_valid());

    // In an event, only gated-in layers with a non-zero residual reach the fused accumulators.
    let engine = with_gate(chi2 * (1.0 - 1e-12));
    let quantum = engine.config().residual_quantum;
    let good = emitted(engine.process_track(&track_with_transition(0.0)).unwrap());
    let expected = [&good, &below]
        .iter()
        .flat_map(|t| &t.layers)
        .filter_map(|l| {
            l.residual(ReferenceCombination::InnerTransition, ResidualComponent::Y)
        })
        .filter(|&dy| quantize(dy, quantum) != 0.0)
        .count() as u64;
    let mut set = engine.new_histogram_set().unwrap();
    let ev = event(3, vec![track_with_transition(0.0), tilted]);
    engine.process_event(&ev, Some(&mut set)).unwrap();
    let y_fused = set.get(HistogramKind::ALL[1]).unwrap();
    assert!(y_fused.entries() >= N_CLUSTERS as u64);
    assert_eq!(y_fused.entries() + y_fused.dropped(), expected);
    assert!(expected < 2 * N_CLUSTERS as u64);
    assert_eq!(set.get(HistogramKind::ALL[0]).unwrap().entries(), 2 * N_CLUSTERS as u64);
}

#[test]
fn rejected_tracks_leave_no_trace() {
    let engine = engine(EngineConfig::default());
    let mut short = inner_only_track();
    short.points.truncate(3);
    assert_eq!(
        engine.process_track(&short).unwrap(),
        TrackOutcome::Rejected(RejectReason::TooFewInnerPoints(3))
    );

    let mut set = engine.new_histogram_set().unwrap();
    let out = engine.process_event(&event(4, vec![short]), Some(&mut set)).unwrap();
    assert_eq!((out.accepted, out.rejected), (0, 1));
    assert_eq!(set.total_entries(), 0);
    assert_eq!(out.records.len(), 1);
    assert_eq!(out.records[0].schema(), Schema::EventInfo);
}

#[test]
fn records_carry_quantised_residuals() {
    let config = EngineConfig { debug_every: Some(2), ..EngineConfig::default() };
    let engine = engine(config);
    let tracks = vec![track_with_transition(0.0), inner_only_track(), inner_only_track()];
    let out = engine.process_event(&event(9, tracks), None).unwrap();
    assert_eq!(out.accepted, 3);
    assert_eq!(out.samples, 0);

    let count = |schema: Schema| out.records.iter().filter(|r| r.schema() == schema).count();
    assert_eq!(count(Schema::EventInfo), 1);
    assert_eq!(count(Schema::Delta), 3);
    // Tracks 0 and 2.
    assert_eq!(count(Schema::Interpolation), 2);

    let Record::Event(summary) = &out.records[0] else {
        panic!("event summary first");
    };
    assert_eq!((summary.event_id, summary.n_tracks), (9, 3));
    assert_eq!(summary.inner_multiplicity, [40, 30, 20]);

    let first = out.records.iter().find_map(Record::as_track).unwrap();
    assert_eq!(first.track_index, 0);
    assert!(first.transition.ok);
    assert_eq!(first.timing_difference, Some(0.25));
    assert_eq!(first.layers.len(), N_CLUSTERS);
    let quantum = engine.config().residual_quantum;
    for layer in &first.layers {
        let [dy, dz] = layer.inner.unwrap();
        assert_relative_eq!(dy, quantize(expected_dy(layer.row), quantum), epsilon = 1e-12);
        assert_relative_eq!(dz, quantize(expected_dz(layer.row), quantum), epsilon = 1e-12);
        assert!(dy != 0.0 && dz != 0.0);
        assert!(layer.inner_transition.is_some());
        assert!(layer.inner_timing.is_none());
    }
}

#[test]
fn debug_dump_follows_record_output() {
    let config = EngineConfig {
        debug_every: Some(1),
        output: OutputMode { records: false, on_the_fly: true },
        ..EngineConfig::default()
    };
    let engine = engine(config);
    let mut set = engine.new_histogram_set().unwrap();
    let out = engine
        .process_event(&event(5, vec![inner_only_track(), inner_only_track()]), Some(&mut set))
        .unwrap();
    assert_eq!(out.accepted, 2);
    assert!(out.records.is_empty());
    assert_eq!(out.samples, 4 * N_CLUSTERS);
    assert_eq!(set.total_entries(), out.samples as u64);
}
