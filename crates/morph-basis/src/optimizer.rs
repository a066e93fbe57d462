use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use morph_core::errors::{ErrorInfo, MorphError};
use morph_core::events::{Event, EventSink, Level};
use morph_core::rng::RngHandle;
use rand::Rng;
use rayon::prelude::*;

use crate::benchmarks::Benchmark;
use crate::components::Components;
use crate::config::{Objective, OptimizerConfig};
use crate::design::{design_matrix, squared_weight_sum, WeightSolver};
use crate::parameters::{ParameterRange, ParameterRegistry};

const TARGET: &str = "optimizer";

/// Relative width below which a bounded range cannot usefully separate points.
const NEGLIGIBLE_WIDTH: f64 = 1e-9;

/// Prefix of generated benchmark names.
pub const GENERATED_PREFIX: &str = "morphing_basis_vector_";

/// Cooperative cancellation flag shared between a caller and the optimizer.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; running searches return their best basis so far.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a basis search. Nothing is committed until the caller does so.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedBasis {
    /// Benchmarks in basis order: kept benchmarks first, then generated ones.
    pub benchmarks: Vec<Benchmark>,
    /// Objective value (mean or max squared-weight sum) of the chosen basis.
    pub expected_error: f64,
    /// Number of kept benchmarks at the head of `benchmarks`.
    pub n_fixed: usize,
    /// Trials that produced a candidate.
    pub trials_completed: usize,
    /// Singular candidates that had to be re-sampled.
    pub singular_candidates: usize,
    /// Whether the search was cut short by cancellation or the deadline.
    pub cancelled: bool,
}

/// Row of the search state. Fixed rows are never moved or reordered.
#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Fixed(Vec<f64>),
    Free(Vec<f64>),
}

impl Slot {
    fn point(&self) -> &[f64] {
        match self {
            Slot::Fixed(point) | Slot::Free(point) => point,
        }
    }
}

struct Budget<'a> {
    deadline: Option<Instant>,
    cancel: Option<&'a CancelToken>,
    tripped: AtomicBool,
}

impl Budget<'_> {
    fn exhausted(&self) -> bool {
        let cancelled = self.cancel.map(CancelToken::is_cancelled).unwrap_or(false);
        let expired = self
            .deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false);
        if cancelled || expired {
            self.tripped.store(true, Ordering::SeqCst);
        }
        cancelled || expired
    }
}

struct SearchContext<'a> {
    parameters: &'a ParameterRegistry,
    components: &'a Components,
    config: &'a OptimizerConfig,
    bounds: Vec<(f64, f64)>,
    fixed: Vec<Vec<f64>>,
    n_free: usize,
    test_values: Vec<Vec<f64>>,
    budget: Budget<'a>,
    sink: &'a dyn EventSink,
}

struct Candidate {
    trial: usize,
    slots: Vec<Slot>,
    objective: f64,
}

enum TrialOutcome {
    Completed { candidate: Candidate, retries: usize },
    Singular { retries: usize },
    Skipped,
}

/// Chooses basis points minimising the morphing error over the parameter space.
///
/// With `keep_existing` every benchmark in `existing` stays in the basis, in
/// order, and only the remaining slots are searched; otherwise `existing`
/// is ignored. The search runs `n_trials` random initialisations in
/// parallel, refines each by coordinate descent within the declared ranges
/// and keeps the candidate with the lowest objective (ties go to the lower
/// trial index, so the result does not depend on scheduling).
pub fn optimize_basis(
    parameters: &ParameterRegistry,
    components: &Components,
    existing: &[Benchmark],
    keep_existing: bool,
    config: &OptimizerConfig,
    sink: &dyn EventSink,
    cancel: Option<&CancelToken>,
) -> Result<OptimizedBasis, MorphError> {
    config.validate()?;
    let kept: Vec<Benchmark> = if keep_existing {
        existing.to_vec()
    } else {
        if !existing.is_empty() {
            sink.emit(
                Event::new(Level::Debug, TARGET, "ignoring existing benchmarks")
                    .with_field("count", existing.len()),
            );
        }
        Vec::new()
    };
    let fixed = kept
        .iter()
        .map(|benchmark| benchmark.point(parameters))
        .collect::<Result<Vec<_>, _>>()?;

    let target = components
        .len()
        .max(config.n_benchmarks.unwrap_or(0))
        .max(fixed.len());
    let n_free = target - fixed.len();
    let bounds = sampling_bounds(parameters, config);
    check_capacity(parameters, components, &fixed, n_free, sink)?;

    sink.emit(
        Event::new(Level::Info, TARGET, "basis search started")
            .with_field("components", components.len())
            .with_field("fixed", fixed.len())
            .with_field("free", n_free)
            .with_field("trials", config.n_trials),
    );

    let mut test_rng = RngHandle::substream(config.seed, 0);
    let test_values: Vec<Vec<f64>> = (0..config.n_test_points)
        .map(|_| components.evaluate(&sample_point(&bounds, &mut test_rng)))
        .collect();

    let context = SearchContext {
        parameters,
        components,
        config,
        bounds,
        fixed,
        n_free,
        test_values,
        budget: Budget {
            deadline: config
                .deadline_ms
                .map(|ms| Instant::now() + Duration::from_millis(ms)),
            cancel,
            tripped: AtomicBool::new(false),
        },
        sink,
    };

    if n_free == 0 {
        return evaluate_fixed_only(&context, kept);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.concurrency)
        .build()
        .map_err(|err| MorphError::Config(ErrorInfo::new("thread-pool", err.to_string())))?;
    let outcomes: Vec<TrialOutcome> = pool.install(|| {
        (0..config.n_trials)
            .into_par_iter()
            .map(|trial| run_trial(&context, trial))
            .collect()
    });

    let mut best: Option<Candidate> = None;
    let mut trials_completed = 0;
    let mut singular_candidates = 0;
    let mut failed_trials = 0;
    for outcome in outcomes {
        match outcome {
            TrialOutcome::Completed { candidate, retries } => {
                trials_completed += 1;
                singular_candidates += retries;
                best = Some(match best {
                    Some(current) if !is_better(&candidate, &current) => current,
                    _ => candidate,
                });
            }
            TrialOutcome::Singular { retries } => {
                failed_trials += 1;
                singular_candidates += retries;
            }
            TrialOutcome::Skipped => {}
        }
    }
    let cancelled = context.budget.tripped.load(Ordering::SeqCst);
    if cancelled {
        sink.emit(
            Event::new(Level::Warn, TARGET, "basis search stopped early")
                .with_field("trials_completed", trials_completed),
        );
    }

    let best = best.ok_or_else(|| {
        MorphError::SingularBasis(
            ErrorInfo::new(
                "no-regular-candidate",
                "every optimizer trial produced a singular design matrix",
            )
            .with_context("trials", failed_trials.to_string())
            .with_context(
                "retries_per_trial",
                config.max_singular_retries.to_string(),
            )
            .with_hint("widen the parameter ranges or supply different fixed benchmarks"),
        )
    })?;

    let benchmarks = assemble_benchmarks(parameters, kept, &best.slots);
    sink.emit(
        Event::new(Level::Info, TARGET, "basis search finished")
            .with_field("expected_error", best.objective)
            .with_field("best_trial", best.trial)
            .with_field("trials_completed", trials_completed)
            .with_field("singular_candidates", singular_candidates),
    );
    Ok(OptimizedBasis {
        benchmarks,
        expected_error: best.objective,
        n_fixed: context.fixed.len(),
        trials_completed,
        singular_candidates,
        cancelled,
    })
}

fn evaluate_fixed_only(
    context: &SearchContext<'_>,
    kept: Vec<Benchmark>,
) -> Result<OptimizedBasis, MorphError> {
    let design = design_matrix(context.components, &context.fixed)?;
    let solver = WeightSolver::new(&design, context.config.singular_tolerance).map_err(|err| {
        match err {
            MorphError::SingularBasis(info) => MorphError::SingularBasis(
                info.with_context("fixed", context.fixed.len().to_string())
                    .with_hint("the kept benchmarks fill the basis but do not separate every component"),
            ),
            other => other,
        }
    })?;
    let expected_error = objective_for(&solver, &context.test_values, context.config.objective)
        .ok_or_else(|| {
            MorphError::SingularBasis(ErrorInfo::new(
                "objective-non-finite",
                "morphing error of the kept benchmarks is not finite",
            ))
        })?;
    context.sink.emit(
        Event::new(Level::Info, TARGET, "kept benchmarks already form a basis")
            .with_field("expected_error", expected_error),
    );
    Ok(OptimizedBasis {
        n_fixed: kept.len(),
        benchmarks: kept,
        expected_error,
        trials_completed: 0,
        singular_candidates: 0,
        cancelled: false,
    })
}

fn run_trial(context: &SearchContext<'_>, trial: usize) -> TrialOutcome {
    // Trial 0 always runs so that a cancelled search still has a candidate.
    if trial > 0 && context.budget.exhausted() {
        return TrialOutcome::Skipped;
    }
    let mut rng = RngHandle::substream(context.config.seed, trial as u64 + 1);
    let mut retries = 0;
    let mut initial = None;
    for attempt in 0..=context.config.max_singular_retries {
        let mut slots: Vec<Slot> = context.fixed.iter().cloned().map(Slot::Fixed).collect();
        slots.extend((0..context.n_free).map(|_| Slot::Free(sample_point(&context.bounds, &mut rng))));
        if let Some(objective) = evaluate(context, &slots) {
            initial = Some((slots, objective));
            break;
        }
        retries += 1;
        context.sink.emit(
            Event::new(Level::Debug, TARGET, "singular candidate re-sampled")
                .with_field("trial", trial)
                .with_field("attempt", attempt),
        );
    }
    let Some((slots, objective)) = initial else {
        return TrialOutcome::Singular { retries };
    };
    let (slots, objective) = refine(context, slots, objective);
    TrialOutcome::Completed {
        candidate: Candidate {
            trial,
            slots,
            objective,
        },
        retries,
    }
}

fn refine(context: &SearchContext<'_>, mut slots: Vec<Slot>, mut best: f64) -> (Vec<Slot>, f64) {
    let mut step_fraction = context.config.refine_step;
    let ranges: Vec<ParameterRange> = context.parameters.iter().map(|p| p.range).collect();
    for _ in 0..context.config.refine_sweeps {
        if context.budget.exhausted() {
            break;
        }
        for row in 0..slots.len() {
            let Slot::Free(point) = &slots[row] else {
                continue;
            };
            let mut point = point.clone();
            for (dim, &(low, high)) in context.bounds.iter().enumerate() {
                let step = (high - low) * step_fraction;
                for direction in [1.0, -1.0] {
                    let moved = ranges[dim].clamp(point[dim] + direction * step);
                    if moved == point[dim] {
                        continue;
                    }
                    let previous = std::mem::replace(&mut point[dim], moved);
                    slots[row] = Slot::Free(point.clone());
                    match evaluate(context, &slots) {
                        Some(objective) if objective < best => {
                            best = objective;
                            break;
                        }
                        _ => {
                            point[dim] = previous;
                            slots[row] = Slot::Free(point.clone());
                        }
                    }
                }
            }
        }
        step_fraction *= 0.5;
    }
    (slots, best)
}

fn evaluate(context: &SearchContext<'_>, slots: &[Slot]) -> Option<f64> {
    let points: Vec<Vec<f64>> = slots.iter().map(|slot| slot.point().to_vec()).collect();
    let design = design_matrix(context.components, &points).ok()?;
    let solver = WeightSolver::new(&design, context.config.singular_tolerance).ok()?;
    objective_for(&solver, &context.test_values, context.config.objective)
}

fn objective_for(solver: &WeightSolver, test_values: &[Vec<f64>], objective: Objective) -> Option<f64> {
    let mut total = 0.0;
    let mut worst = 0.0_f64;
    for values in test_values {
        let error = squared_weight_sum(&solver.solve(values).ok()?);
        if !error.is_finite() {
            return None;
        }
        total += error;
        worst = worst.max(error);
    }
    Some(match objective {
        Objective::Mean => total / test_values.len().max(1) as f64,
        Objective::Max => worst,
    })
}

fn is_better(candidate: &Candidate, current: &Candidate) -> bool {
    match candidate.objective.total_cmp(&current.objective) {
        CmpOrdering::Less => true,
        CmpOrdering::Greater => false,
        CmpOrdering::Equal => candidate.trial < current.trial,
    }
}

/// Sampling interval per parameter: the declared range, or the configured
/// window for unbounded parameters.
fn sampling_bounds(parameters: &ParameterRegistry, config: &OptimizerConfig) -> Vec<(f64, f64)> {
    let [low, high] = config.unbounded_window;
    parameters
        .iter()
        .map(|parameter| parameter.range.bounds().unwrap_or((low, high)))
        .collect()
}

fn sample_point(bounds: &[(f64, f64)], rng: &mut RngHandle) -> Vec<f64> {
    bounds
        .iter()
        .map(|&(low, high)| rng.gen_range(low..high))
        .collect()
}

fn distinct_count(values: impl Iterator<Item = f64>) -> usize {
    let mut sorted: Vec<f64> = values.collect();
    sorted.sort_by(f64::total_cmp);
    let mut count = 0;
    let mut last: Option<f64> = None;
    for value in sorted {
        let separate = match last {
            Some(previous) => (value - previous).abs() > 1e-12 * previous.abs().max(1.0),
            None => true,
        };
        if separate {
            count += 1;
            last = Some(value);
        }
    }
    count
}

/// A parameter whose highest exponent is `p` needs `p + 1` distinct values
/// across the basis. Failing that with every free slot is impossible and a
/// hard error; a range too narrow to separate points is only a warning.
fn check_capacity(
    parameters: &ParameterRegistry,
    components: &Components,
    fixed: &[Vec<f64>],
    n_free: usize,
    sink: &dyn EventSink,
) -> Result<(), MorphError> {
    for (index, parameter) in parameters.iter().enumerate() {
        let needed = components.max_exponent(index) as usize + 1;
        let distinct = distinct_count(fixed.iter().map(|point| point[index]));
        if distinct >= needed {
            continue;
        }
        if distinct + n_free < needed {
            return Err(MorphError::InsufficientParameterSpace(
                ErrorInfo::new(
                    "distinct-values",
                    "the basis cannot hold enough distinct values of a parameter",
                )
                .with_context("parameter", parameter.name.clone())
                .with_context("needed", needed.to_string())
                .with_context("distinct_fixed", distinct.to_string())
                .with_context("free_slots", n_free.to_string())
                .with_hint("drop keep_existing or request a larger basis"),
            ));
        }
        if let Some((min, max)) = parameter.range.bounds() {
            let scale = min.abs().max(max.abs()).max(1.0);
            if max - min <= NEGLIGIBLE_WIDTH * scale {
                sink.emit(
                    Event::new(
                        Level::Warn,
                        TARGET,
                        "parameter range too narrow to separate benchmarks, continuing",
                    )
                    .with_field("parameter", &parameter.name)
                    .with_field("width", max - min),
                );
            }
        }
    }
    Ok(())
}

fn assemble_benchmarks(
    parameters: &ParameterRegistry,
    kept: Vec<Benchmark>,
    slots: &[Slot],
) -> Vec<Benchmark> {
    let mut taken: BTreeSet<String> = kept.iter().map(|b| b.name.clone()).collect();
    let mut benchmarks = kept;
    for (row, slot) in slots.iter().enumerate() {
        let Slot::Free(point) = slot else {
            continue;
        };
        let mut name = format!("{GENERATED_PREFIX}{row}");
        let mut suffix = 1;
        while taken.contains(&name) {
            name = format!("{GENERATED_PREFIX}{row}_{suffix}");
            suffix += 1;
        }
        taken.insert(name.clone());
        benchmarks.push(Benchmark::from_point(name, parameters, point));
    }
    benchmarks
}
