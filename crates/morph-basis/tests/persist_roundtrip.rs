use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use morph_basis::{
    load_basis, load_config, BasisFile, BenchmarkSpec, MorphingConfig, MorphingSession,
    OptimizerConfig, ParameterRange, ParameterSpec, PowerSpec, BASIS_SCHEMA,
};
use morph_core::{MemorySink, MorphError, NullSink};
use serde_json::Value;
use tempfile::tempdir;

fn values(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn sample_config() -> MorphingConfig {
    MorphingConfig {
        parameters: vec![
            ParameterSpec::new("cHW", 2, ParameterRange::bounded(-1.0, 1.0))
                .with_lha("dim6", 2)
                .with_transform("0.5 * theta"),
            ParameterSpec::new("cHWtil", 2, ParameterRange::Unbounded),
        ],
        benchmarks: vec![BenchmarkSpec {
            name: "sm".to_string(),
            values: values(&[("cHW", 0.0), ("cHWtil", 0.0)]),
        }],
        max_overall_power: PowerSpec::scalar(2),
        keep_existing: true,
        optimizer: OptimizerConfig {
            n_trials: 3,
            n_test_points: 20,
            refine_sweeps: 1,
            unbounded_window: [-2.0, 2.0],
            ..OptimizerConfig::default()
        },
    }
}

fn committed_session() -> MorphingSession {
    let config = sample_config();
    let mut session = MorphingSession::from_config(&config, Arc::new(NullSink)).unwrap();
    session
        .set_up_morphing(
            &config.max_overall_power,
            config.keep_existing,
            &config.optimizer,
            None,
        )
        .unwrap();
    session
}

fn edit_json(path: &Path, edit: impl FnOnce(&mut Value)) {
    let mut value: Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
    edit(&mut value);
    fs::write(path, serde_json::to_vec_pretty(&value).unwrap()).unwrap();
}

#[test]
fn saved_basis_reloads_with_identical_weights() {
    let session = committed_session();
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("basis.json");
    let file = session.save(&path).unwrap();
    assert_eq!(file.schema, BASIS_SCHEMA);
    assert_eq!(file.content_hash.len(), 64);

    let sink = Arc::new(MemorySink::new());
    let restored = MorphingSession::load(&path, sink.clone()).unwrap();
    assert_eq!(sink.events_for("session").len(), 1);

    let original = session.basis().unwrap();
    let reloaded = restored.basis().unwrap();
    assert_eq!(original.benchmarks(), reloaded.benchmarks());
    assert_eq!(original.components(), reloaded.components());
    assert_eq!(reloaded.benchmarks()[0].name, "sm");
    assert!(restored.parameters().is_frozen());

    for query in [
        values(&[("cHW", 0.3), ("cHWtil", -0.7)]),
        values(&[("cHW", -1.0), ("cHWtil", 2.5)]),
    ] {
        assert_eq!(
            session.weights_at(&query).unwrap(),
            restored.weights_at(&query).unwrap()
        );
    }
    assert_eq!(session.provenance(), restored.provenance());
    assert_eq!(restored.provenance().unwrap().trials, 3);
    assert_eq!(restored.provenance().unwrap().unbounded_window, Some([-2.0, 2.0]));
}

#[test]
fn external_values_apply_the_transform() {
    let session = committed_session();
    let external = session.external_benchmarks().unwrap();
    let basis = session.basis().unwrap();
    assert_eq!(external.len(), basis.benchmarks().len());
    for ((name, mapped), benchmark) in external.iter().zip(basis.benchmarks()) {
        assert_eq!(name, &benchmark.name);
        assert_eq!(mapped["cHW"], 0.5 * benchmark.values["cHW"]);
        assert_eq!(mapped["cHWtil"], benchmark.values["cHWtil"]);
    }
}

#[test]
fn edited_components_make_the_basis_stale() {
    let session = committed_session();
    let dir = tempdir().unwrap();
    let path = dir.path().join("basis.json");
    session.save(&path).unwrap();

    edit_json(&path, |value| {
        let components = value["components"].as_array_mut().unwrap();
        components.swap(1, 2);
    });
    let err = load_basis(&path).unwrap_err();
    match err {
        MorphError::StaleBasis(info) => {
            assert_eq!(info.code, "component-mismatch");
            assert_eq!(info.context["first_difference"], "1");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn changed_parameter_powers_make_the_basis_stale() {
    let session = committed_session();
    let dir = tempdir().unwrap();
    let path = dir.path().join("basis.json");
    session.save(&path).unwrap();

    edit_json(&path, |value| {
        value["parameters"][1]["max_power"] = Value::from(1);
    });
    let err = load_basis(&path).unwrap_err();
    assert!(matches!(&err, MorphError::StaleBasis(info) if info.code == "component-mismatch"));
}

#[test]
fn edited_benchmarks_fail_the_content_hash() {
    let session = committed_session();
    let dir = tempdir().unwrap();
    let path = dir.path().join("basis.json");
    session.save(&path).unwrap();

    edit_json(&path, |value| {
        value["benchmarks"][0]["values"]["cHW"] = Value::from(0.25);
    });
    let err = load_basis(&path).unwrap_err();
    assert!(matches!(&err, MorphError::StaleBasis(info) if info.code == "content-hash"));
}

#[test]
fn unsupported_schema_and_missing_files_are_io_errors() {
    let session = committed_session();
    let dir = tempdir().unwrap();
    let path = dir.path().join("basis.json");
    let file = session.save(&path).unwrap();

    let mut future = file.clone();
    future.schema.major = 2;
    let err = future.into_basis().unwrap_err();
    assert!(matches!(&err, MorphError::Serde(info) if info.code == "basis-schema"));

    let err = BasisFile::load(&dir.path().join("missing.json")).unwrap_err();
    assert!(matches!(&err, MorphError::Serde(info) if info.code == "basis-read"));
}

#[test]
fn config_survives_a_yaml_roundtrip() {
    let config = sample_config();
    let dir = tempdir().unwrap();
    let path = dir.path().join("morph.yaml");
    fs::write(&path, config.to_yaml_string().unwrap()).unwrap();
    let loaded = load_config(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn handwritten_config_uses_defaults() {
    let yaml = r#"
parameters:
  - name: g
    max_power: [2, 1]
    range: { type: bounded, min: -2.0, max: 2.0 }
  - name: h
    max_power: [1, 1]
    range: { type: unbounded }
    transform: "theta ** 3"
max_overall_power: 2
optimizer:
  n_trials: 5
"#;
    let dir = tempdir().unwrap();
    let path = dir.path().join("morph.yaml");
    fs::write(&path, yaml).unwrap();
    let config = load_config(&path).unwrap();
    assert_eq!(config.parameters.len(), 2);
    assert_eq!(config.parameters[1].range, ParameterRange::Unbounded);
    assert!(config.keep_existing);
    assert!(config.benchmarks.is_empty());
    assert_eq!(config.optimizer.n_trials, 5);
    assert_eq!(config.optimizer.n_test_points, OptimizerConfig::default().n_test_points);

    let session = config.build_session(Arc::new(NullSink)).unwrap();
    let components = session.components(&config.max_overall_power).unwrap();
    assert!(components.len() > 1);
}

#[test]
fn invalid_optimizer_section_is_rejected_on_load() {
    let yaml = r#"
parameters:
  - name: g
    max_power: 1
    range: { type: unbounded }
max_overall_power: 1
optimizer:
  refine_step: 0.0
"#;
    let dir = tempdir().unwrap();
    let path = dir.path().join("morph.yaml");
    fs::write(&path, yaml).unwrap();
    let err = load_config(&path).unwrap_err();
    assert!(matches!(&err, MorphError::Config(info) if info.code == "optimizer-refine-step"));
}
