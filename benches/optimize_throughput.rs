use criterion::{black_box, criterion_group, criterion_main, Criterion};
use morph_basis::{
    enumerate_components, optimize_basis, OptimizerConfig, ParameterRange, ParameterRegistry,
    ParameterSpec, PowerSpec,
};
use morph_core::NullSink;

fn optimize_benchmark(c: &mut Criterion) {
    let registry = ParameterRegistry::from_specs(&[
        ParameterSpec::new("cHW", 2, ParameterRange::bounded(-1.0, 1.0)),
        ParameterSpec::new("cHWtil", 2, ParameterRange::bounded(-1.0, 1.0)),
    ])
    .expect("registry");
    let components = enumerate_components(&registry, &PowerSpec::scalar(2)).expect("components");

    let mut group = c.benchmark_group("optimize");
    group.sample_size(10);
    for threads in [1usize, 4] {
        let config = OptimizerConfig {
            n_trials: 8,
            n_test_points: 50,
            refine_sweeps: 2,
            concurrency: threads,
            ..OptimizerConfig::default()
        };
        group.bench_function(format!("two_parameters/threads_{threads}"), |b| {
            b.iter(|| {
                optimize_basis(
                    black_box(&registry),
                    black_box(&components),
                    &[],
                    true,
                    black_box(&config),
                    &NullSink,
                    None,
                )
                .expect("optimize")
            });
        });
    }
    group.finish();
}

criterion_group!(benches, optimize_benchmark);
criterion_main!(benches);
