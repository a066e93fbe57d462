use std::collections::BTreeMap;

use morph_basis::{
    enumerate_components, optimize_basis, Benchmark, CancelToken, Components, MorphingBasis,
    Objective, OptimizerConfig, ParameterRange, ParameterRegistry, ParameterSpec, PowerSpec,
    GENERATED_PREFIX,
};
use morph_core::{Level, MemorySink, MorphError, NullSink};

fn values(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn plane() -> (ParameterRegistry, Components) {
    let registry = ParameterRegistry::from_specs(&[
        ParameterSpec::new("x", 2, ParameterRange::bounded(-1.0, 1.0)),
        ParameterSpec::new("y", 2, ParameterRange::bounded(-1.0, 1.0)),
    ])
    .unwrap();
    let components = enumerate_components(&registry, &PowerSpec::scalar(2)).unwrap();
    (registry, components)
}

fn fast_config(seed: u64) -> OptimizerConfig {
    OptimizerConfig {
        seed,
        n_trials: 4,
        n_test_points: 25,
        refine_sweeps: 2,
        ..OptimizerConfig::default()
    }
}

fn explicit_benchmarks(points: &[(f64, f64)]) -> Vec<Benchmark> {
    points
        .iter()
        .enumerate()
        .map(|(idx, &(x, y))| Benchmark::new(format!("explicit_{idx}"), values(&[("x", x), ("y", y)])))
        .collect()
}

// These five points share the conic y * (y - 1) = 0, so the sixth point
// must lie off both lines for the basis to be regular.
const KEPT: [(f64, f64); 5] = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0), (-1.0, 0.0)];

#[test]
fn kept_benchmarks_lead_the_basis_and_one_is_added() {
    let (registry, components) = plane();
    let existing = explicit_benchmarks(&KEPT);
    let sink = MemorySink::new();
    let result = optimize_basis(
        &registry,
        &components,
        &existing,
        true,
        &fast_config(7),
        &sink,
        None,
    )
    .unwrap();

    assert_eq!(result.benchmarks.len(), 6);
    assert_eq!(result.n_fixed, 5);
    assert_eq!(&result.benchmarks[..5], existing.as_slice());
    assert_eq!(result.benchmarks[5].name, format!("{GENERATED_PREFIX}5"));
    let y = result.benchmarks[5].values["y"];
    assert!(y.abs() > 1e-6 && (y - 1.0).abs() > 1e-6);
    assert!(!result.cancelled);
    assert_eq!(result.trials_completed, 4);
    // Weights sum to one, so the mean squared sum is at least 1/n.
    assert!(result.expected_error >= 1.0 / 6.0 - 1e-12);

    let basis = MorphingBasis::new(registry, vec![2], components, result.benchmarks, 1e-12).unwrap();
    assert!(basis.is_square());

    let messages: Vec<String> = sink
        .events_for("optimizer")
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert!(messages.contains(&"basis search started".to_string()));
    assert!(messages.contains(&"basis search finished".to_string()));
}

#[test]
fn search_is_reproducible_for_a_seed_regardless_of_threads() {
    let (registry, components) = plane();
    let mut single = fast_config(42);
    single.concurrency = 1;
    let mut pooled = fast_config(42);
    pooled.concurrency = 4;

    let a = optimize_basis(&registry, &components, &[], true, &single, &NullSink, None).unwrap();
    let b = optimize_basis(&registry, &components, &[], true, &pooled, &NullSink, None).unwrap();
    assert_eq!(a, b);

    let c = optimize_basis(&registry, &components, &[], true, &fast_config(43), &NullSink, None)
        .unwrap();
    assert_ne!(a.benchmarks, c.benchmarks);
}

#[test]
fn discarding_existing_benchmarks_searches_every_slot() {
    let (registry, components) = plane();
    let existing = explicit_benchmarks(&KEPT);
    let result = optimize_basis(
        &registry,
        &components,
        &existing,
        false,
        &fast_config(3),
        &NullSink,
        None,
    )
    .unwrap();
    assert_eq!(result.n_fixed, 0);
    assert_eq!(result.benchmarks.len(), 6);
    assert!(result
        .benchmarks
        .iter()
        .all(|b| b.name.starts_with(GENERATED_PREFIX)));
    for benchmark in &result.benchmarks {
        for value in benchmark.values.values() {
            assert!((-1.0..=1.0).contains(value));
        }
    }
}

#[test]
fn cancelled_search_returns_the_first_trial() {
    let (registry, components) = plane();
    let token = CancelToken::new();
    token.cancel();
    let mut config = fast_config(11);
    config.n_trials = 16;
    let result = optimize_basis(&registry, &components, &[], true, &config, &NullSink, Some(&token))
        .unwrap();
    assert!(result.cancelled);
    assert_eq!(result.trials_completed, 1);
    assert_eq!(result.benchmarks.len(), 6);
}

#[test]
fn overcomplete_basis_can_be_requested() {
    let (registry, components) = plane();
    let mut config = fast_config(5);
    config.n_benchmarks = Some(8);
    config.objective = Objective::Max;
    let result = optimize_basis(&registry, &components, &[], true, &config, &NullSink, None).unwrap();
    assert_eq!(result.benchmarks.len(), 8);
    let basis = MorphingBasis::new(registry, vec![2], components, result.benchmarks, 1e-12).unwrap();
    assert!(!basis.is_square());
    let weights = basis.weights_at(&values(&[("x", 0.1), ("y", -0.4)])).unwrap();
    assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
}

#[test]
fn kept_benchmarks_that_fill_the_basis_are_used_as_is() {
    let (registry, components) = plane();
    let full = explicit_benchmarks(&[
        (0.0, 0.0),
        (1.0, 0.0),
        (0.0, 1.0),
        (1.0, 1.0),
        (-1.0, 0.0),
        (0.0, -1.0),
    ]);
    let result =
        optimize_basis(&registry, &components, &full, true, &fast_config(1), &NullSink, None).unwrap();
    assert_eq!(result.benchmarks, full);
    assert_eq!(result.trials_completed, 0);

    let mut singular = explicit_benchmarks(&KEPT);
    singular.push(Benchmark::new("explicit_5", values(&[("x", 2.0), ("y", 0.0)])));
    let err = optimize_basis(&registry, &components, &singular, true, &fast_config(1), &NullSink, None)
        .unwrap_err();
    assert!(matches!(err, MorphError::SingularBasis(_)));
}

#[test]
fn too_few_distinct_values_is_a_hard_error() {
    let registry = ParameterRegistry::from_specs(&[ParameterSpec::new(
        "g",
        2,
        ParameterRange::bounded(-1.0, 1.0),
    )])
    .unwrap();
    let components = enumerate_components(&registry, &PowerSpec::scalar(2)).unwrap();
    let same: Vec<Benchmark> = (0..3)
        .map(|idx| Benchmark::new(format!("same_{idx}"), values(&[("g", 0.5)])))
        .collect();
    let err = optimize_basis(&registry, &components, &same, true, &fast_config(2), &NullSink, None)
        .unwrap_err();
    match err {
        MorphError::InsufficientParameterSpace(info) => {
            assert_eq!(info.context["parameter"], "g");
            assert_eq!(info.context["needed"], "3");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn negligible_range_only_warns() {
    let registry = ParameterRegistry::from_specs(&[
        ParameterSpec::new("wide", 1, ParameterRange::bounded(-1.0, 1.0)),
        // Below the warning width but still separable at the solver tolerance.
        ParameterSpec::new("narrow", 1, ParameterRange::bounded(0.0, 1e-10)),
    ])
    .unwrap();
    let components = enumerate_components(&registry, &PowerSpec::scalar(1)).unwrap();
    let sink = MemorySink::new();
    let result =
        optimize_basis(&registry, &components, &[], true, &fast_config(9), &sink, None).unwrap();
    assert_eq!(result.benchmarks.len(), 3);
    assert!(result.expected_error.is_finite());
    let warnings: Vec<_> = sink
        .events_for("optimizer")
        .into_iter()
        .filter(|e| e.level == Level::Warn)
        .collect();
    assert!(warnings
        .iter()
        .any(|e| e.fields.get("parameter").map(String::as_str) == Some("narrow")));
}

#[test]
fn invalid_optimizer_settings_are_rejected() {
    let (registry, components) = plane();
    let mut config = fast_config(0);
    config.n_trials = 0;
    let err = optimize_basis(&registry, &components, &[], true, &config, &NullSink, None).unwrap_err();
    assert!(matches!(&err, MorphError::Config(info) if info.code == "optimizer-trials"));

    // Finite ends whose distance overflows cannot be sampled from.
    let mut config = fast_config(0);
    config.unbounded_window = [f64::MIN, f64::MAX];
    let err = optimize_basis(&registry, &components, &[], true, &config, &NullSink, None).unwrap_err();
    assert!(matches!(&err, MorphError::Config(info) if info.code == "optimizer-window"));
}
