use std::collections::BTreeMap;

use morph_basis::{
    BenchmarkRegistry, MorphingSession, OptimizerConfig, ParameterRange, ParameterRegistry,
    ParameterSpec, PowerSpec, GENERATED_PREFIX,
};
use morph_core::{ErrorClass, MorphError};

fn values(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn two_parameters() -> ParameterRegistry {
    ParameterRegistry::from_specs(&[
        ParameterSpec::new("cHW", 2, ParameterRange::bounded(-1.0, 1.0)).with_lha("dim6", 2),
        ParameterSpec::new("cHWtil", 2, ParameterRange::bounded(-1.0, 1.0)),
    ])
    .unwrap()
}

#[test]
fn parameter_definitions_are_validated() {
    let mut registry = two_parameters();

    let err = registry
        .add_parameter(ParameterSpec::new("cHW", 1, ParameterRange::Unbounded))
        .unwrap_err();
    assert!(matches!(&err, MorphError::DuplicateParameter(info) if info.context["parameter"] == "cHW"));

    let err = registry
        .add_parameter(ParameterSpec::new("x", 1, ParameterRange::bounded(1.0, -1.0)))
        .unwrap_err();
    assert!(matches!(&err, MorphError::InvalidRange(info) if info.code == "range-inverted"));

    let err = registry
        .add_parameter(ParameterSpec::new("x", 1, ParameterRange::bounded(0.0, f64::INFINITY)))
        .unwrap_err();
    assert!(matches!(&err, MorphError::InvalidRange(info) if info.code == "range-non-finite"));

    let err = registry
        .add_parameter(ParameterSpec::new("x", 1, ParameterRange::bounded(-1e308, 1e308)))
        .unwrap_err();
    assert!(matches!(&err, MorphError::InvalidRange(info) if info.code == "range-width"));

    let mut negative = ParameterSpec::new("x", 1, ParameterRange::Unbounded);
    negative.max_power = PowerSpec::Scalar(-2);
    let err = registry.add_parameter(negative).unwrap_err();
    assert!(matches!(&err, MorphError::InvalidPower(info) if info.code == "power-negative"));

    let err = registry
        .add_parameter(
            ParameterSpec::new("x", 1, ParameterRange::Unbounded).with_power_classes(&[1, 1]),
        )
        .unwrap_err();
    assert!(matches!(&err, MorphError::InvalidPower(info) if info.code == "power-classes"));

    let err = registry
        .add_parameter(ParameterSpec::new("  ", 1, ParameterRange::Unbounded))
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Configuration);

    // Failed registrations leave the registry untouched.
    assert_eq!(registry.names().collect::<Vec<_>>(), vec!["cHW", "cHWtil"]);
    assert_eq!(registry.index_of("cHWtil"), Some(1));
    assert_eq!(registry.get("cHW").unwrap().lha_block.as_deref(), Some("dim6"));
}

#[test]
fn transforms_must_parse_and_be_monotonic_on_the_range() {
    let mut registry = ParameterRegistry::new();
    let err = registry
        .add_parameter(
            ParameterSpec::new("g", 2, ParameterRange::bounded(-1.0, 1.0)).with_transform("exp(theta)"),
        )
        .unwrap_err();
    assert!(matches!(err, MorphError::InvalidTransform(_)));

    let err = registry
        .add_parameter(
            ParameterSpec::new("g", 2, ParameterRange::bounded(-1.0, 1.0)).with_transform("theta**2"),
        )
        .unwrap_err();
    assert!(matches!(&err, MorphError::InvalidTransform(info) if info.code == "transform-not-monotonic"));

    registry
        .add_parameter(
            ParameterSpec::new("g", 2, ParameterRange::bounded(0.5, 2.0)).with_transform("theta**2"),
        )
        .unwrap();
    let external = registry.to_external(&[1.5]);
    assert_eq!(external["g"], 2.25);
}

#[test]
fn unbounded_parameters_need_transforms_monotonic_everywhere() {
    let mut registry = ParameterRegistry::new();
    let err = registry
        .add_parameter(ParameterSpec::new("h", 1, ParameterRange::Unbounded).with_transform("theta**2"))
        .unwrap_err();
    assert!(matches!(&err, MorphError::InvalidTransform(info) if info.code == "transform-not-monotonic"));
    assert!(registry.is_empty());

    registry
        .add_parameter(
            ParameterSpec::new("h", 1, ParameterRange::Unbounded).with_transform("theta**3 + theta"),
        )
        .unwrap();
    assert_eq!(registry.to_external(&[-1.0])["h"], -2.0);
}

#[test]
fn wiggles_between_grid_points_are_not_monotonic() {
    let mut registry = ParameterRegistry::new();
    let err = registry
        .add_parameter(
            ParameterSpec::new("g", 1, ParameterRange::bounded(-1.0, 1.0))
                .with_transform("theta**3 - 1e-4*theta"),
        )
        .unwrap_err();
    assert!(matches!(&err, MorphError::InvalidTransform(info) if info.code == "transform-not-monotonic"));
}

#[test]
fn benchmark_values_are_checked_against_parameter_names() {
    let parameters = two_parameters();
    let mut benchmarks = BenchmarkRegistry::new();

    benchmarks
        .add_benchmark(&parameters, values(&[("cHW", 0.0), ("cHWtil", 0.0)]), "sm")
        .unwrap();

    let err = benchmarks
        .add_benchmark(&parameters, values(&[("cHW", 1.0), ("cHWtil", 0.0)]), "sm")
        .unwrap_err();
    assert!(matches!(err, MorphError::DuplicateBenchmark(_)));

    let err = benchmarks
        .add_benchmark(
            &parameters,
            values(&[("cHW", 1.0), ("cHWtil", 0.0), ("cWW", 0.0)]),
            "extra",
        )
        .unwrap_err();
    assert!(matches!(&err, MorphError::UnknownParameter(info)
        if info.context["parameter"] == "cWW" && info.context["benchmark"] == "extra"));

    let err = benchmarks
        .add_benchmark(&parameters, values(&[("cHW", 1.0)]), "partial")
        .unwrap_err();
    assert!(matches!(&err, MorphError::MissingParameter(info) if info.context["parameter"] == "cHWtil"));

    let err = benchmarks
        .add_benchmark(&parameters, values(&[("cHW", f64::NAN), ("cHWtil", 0.0)]), "nan")
        .unwrap_err();
    assert!(matches!(err, MorphError::InvalidValue(_)));

    // Ranges steer the optimizer only; points outside them are accepted.
    benchmarks
        .add_benchmark(&parameters, values(&[("cHW", 12.0), ("cHWtil", -7.5)]), "far")
        .unwrap();
    let names: Vec<&str> = benchmarks.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["sm", "far"]);
}

#[test]
fn parameters_freeze_after_setup_but_benchmarks_do_not() {
    let mut session = MorphingSession::new();
    session
        .add_parameter(ParameterSpec::new("g", 2, ParameterRange::bounded(-1.0, 1.0)))
        .unwrap();
    let config = OptimizerConfig {
        n_trials: 2,
        n_test_points: 10,
        refine_sweeps: 0,
        ..OptimizerConfig::default()
    };
    session
        .set_up_morphing(&PowerSpec::scalar(2), true, &config, None)
        .unwrap();
    assert!(session.parameters().is_frozen());

    let err = session
        .add_parameter(ParameterSpec::new("h", 1, ParameterRange::Unbounded))
        .unwrap_err();
    assert!(matches!(&err, MorphError::Frozen(info) if info.code == "parameters-frozen"));

    session.add_benchmark(values(&[("g", 0.25)]), "late").unwrap();
    assert!(session.benchmarks().contains("late"));
    let basis = session.basis().unwrap();
    assert!(basis.benchmarks().iter().all(|b| b.name != "late"));
}

fn quick_optimizer() -> OptimizerConfig {
    OptimizerConfig {
        n_trials: 2,
        n_test_points: 10,
        refine_sweeps: 0,
        ..OptimizerConfig::default()
    }
}

fn session_with_user_benchmarks() -> MorphingSession {
    let mut session = MorphingSession::new();
    session
        .add_parameter(ParameterSpec::new("g", 2, ParameterRange::bounded(-1.0, 1.0)))
        .unwrap();
    session.add_benchmark(values(&[("g", 0.0)]), "sm").unwrap();
    session.add_benchmark(values(&[("g", 1.0)]), "bsm").unwrap();
    session
}

#[test]
fn setup_without_keeping_discards_registered_benchmarks() {
    let mut session = session_with_user_benchmarks();
    let basis = session
        .set_up_morphing(&PowerSpec::scalar(2), false, &quick_optimizer(), None)
        .unwrap();
    assert_eq!(basis.benchmarks().len(), 3);
    assert!(basis
        .benchmarks()
        .iter()
        .all(|b| b.name.starts_with(GENERATED_PREFIX)));

    assert!(!session.benchmarks().contains("sm"));
    assert!(!session.benchmarks().contains("bsm"));
    let registered: Vec<&str> = session.benchmarks().iter().map(|b| b.name.as_str()).collect();
    let committed: Vec<&str> = session
        .basis()
        .unwrap()
        .benchmarks()
        .iter()
        .map(|b| b.name.as_str())
        .collect();
    assert_eq!(registered, committed);
}

#[test]
fn rerunning_setup_picks_up_late_benchmarks() {
    let mut session = session_with_user_benchmarks();
    session
        .set_up_morphing(&PowerSpec::scalar(2), true, &quick_optimizer(), None)
        .unwrap();
    let first: Vec<String> = session
        .basis()
        .unwrap()
        .benchmarks()
        .iter()
        .map(|b| b.name.clone())
        .collect();
    assert_eq!(&first[..2], ["sm", "bsm"]);

    session.add_benchmark(values(&[("g", -0.5)]), "late").unwrap();
    assert!(!session.basis().unwrap().benchmarks().iter().any(|b| b.name == "late"));

    // The previous basis already fills every slot, so the rerun keeps the
    // registered benchmarks in order and grows the basis to hold them.
    let basis = session
        .set_up_morphing(&PowerSpec::scalar(2), true, &quick_optimizer(), None)
        .unwrap();
    let names: Vec<&str> = basis.benchmarks().iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names.len(), 4);
    assert_eq!(&names[..3], &first[..]);
    assert_eq!(names[3], "late");
    assert!(!basis.is_square());
}

#[test]
fn queries_before_setup_are_configuration_errors() {
    let mut session = MorphingSession::new();
    session
        .add_parameter(ParameterSpec::new("g", 1, ParameterRange::Unbounded))
        .unwrap();
    let err = session.weights_at(&values(&[("g", 0.0)])).unwrap_err();
    assert!(matches!(&err, MorphError::Config(info) if info.code == "no-basis"));
}
