use morph_core::errors::{ErrorInfo, MorphError};
use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};

use crate::components::Components;

/// Default relative pivot threshold below which a design matrix is singular.
pub const DEFAULT_SINGULAR_TOLERANCE: f64 = 1e-12;

/// Builds the design matrix: one row per basis point, one column per component.
///
/// Fewer points than components can never determine the component
/// coefficients and is rejected with [`MorphError::Dimension`].
pub fn design_matrix(components: &Components, points: &[Vec<f64>]) -> Result<DMatrix<f64>, MorphError> {
    let rows = points.len();
    let cols = components.len();
    if rows < cols {
        return Err(MorphError::Dimension(
            ErrorInfo::new(
                "basis-underdetermined",
                "the basis needs at least as many points as there are components",
            )
            .with_context("benchmarks", rows.to_string())
            .with_context("components", cols.to_string()),
        ));
    }
    let n_params = components.iter().next().map(|c| c.exponents().len()).unwrap_or(0);
    if let Some((row, point)) = points.iter().enumerate().find(|(_, p)| p.len() != n_params) {
        return Err(MorphError::Dimension(
            ErrorInfo::new("point-dimension", "point has the wrong number of coordinates")
                .with_context("row", row.to_string())
                .with_context("expected", n_params.to_string())
                .with_context("found", point.len().to_string()),
        ));
    }
    Ok(DMatrix::from_fn(rows, cols, |row, col| {
        components.as_slice()[col].evaluate(&points[row])
    }))
}

fn singular(message: &str, ratio: f64, tolerance: f64) -> MorphError {
    MorphError::SingularBasis(
        ErrorInfo::new("singular-design", message)
            .with_context("pivot_ratio", format!("{ratio:e}"))
            .with_context("tolerance", format!("{tolerance:e}"))
            .with_hint("choose benchmarks that separate every component"),
    )
}

fn check_pivots(diagonal: &DVector<f64>, tolerance: f64) -> Result<(), MorphError> {
    let magnitudes: Vec<f64> = diagonal.iter().map(|v| v.abs()).collect();
    let largest = magnitudes.iter().copied().fold(0.0_f64, f64::max);
    let smallest = magnitudes.iter().copied().fold(f64::INFINITY, f64::min);
    if !largest.is_finite() || !smallest.is_finite() {
        return Err(singular("design matrix contains non-finite entries", f64::NAN, tolerance));
    }
    if largest == 0.0 {
        return Err(singular("design matrix is identically zero", 0.0, tolerance));
    }
    let ratio = smallest / largest;
    if ratio <= tolerance {
        return Err(singular("design matrix is singular", ratio, tolerance));
    }
    Ok(())
}

/// Factorised design matrix solving `Dᵀ w = v` for morphing weights.
///
/// Square bases use an LU decomposition with partial pivoting of `Dᵀ`.
/// Over-complete bases use a thin QR decomposition `D = QR` and return the
/// minimum-norm solution `w = Q R⁻ᵀ v`.
#[derive(Debug, Clone)]
pub enum WeightSolver {
    /// Square design matrix.
    Square {
        /// LU decomposition of the transposed design matrix.
        lu: LU<f64, Dyn, Dyn>,
    },
    /// More basis points than components.
    Overdetermined {
        /// Orthonormal factor of the design matrix.
        q: DMatrix<f64>,
        /// Transposed triangular factor.
        r_t: DMatrix<f64>,
    },
}

impl WeightSolver {
    /// Factorises a design matrix, failing if it is singular up to `tolerance`.
    pub fn new(design: &DMatrix<f64>, tolerance: f64) -> Result<Self, MorphError> {
        let (rows, cols) = design.shape();
        if rows < cols || cols == 0 {
            return Err(MorphError::Dimension(
                ErrorInfo::new("design-shape", "design matrix must have full column dimension")
                    .with_context("rows", rows.to_string())
                    .with_context("cols", cols.to_string()),
            ));
        }
        if rows == cols {
            let lu = design.transpose().lu();
            check_pivots(&lu.u().diagonal(), tolerance)?;
            Ok(WeightSolver::Square { lu })
        } else {
            let qr = design.clone().qr();
            check_pivots(&qr.r().diagonal(), tolerance)?;
            Ok(WeightSolver::Overdetermined {
                q: qr.q(),
                r_t: qr.r().transpose(),
            })
        }
    }

    /// Number of basis points (length of every weight vector).
    pub fn n_benchmarks(&self) -> usize {
        match self {
            WeightSolver::Square { lu } => lu.u().nrows(),
            WeightSolver::Overdetermined { q, .. } => q.nrows(),
        }
    }

    /// Solves for the weights reproducing the given component values.
    pub fn solve(&self, component_values: &[f64]) -> Result<Vec<f64>, MorphError> {
        let rhs = DVector::from_column_slice(component_values);
        let weights = match self {
            WeightSolver::Square { lu } => lu.solve(&rhs),
            WeightSolver::Overdetermined { q, r_t } => {
                r_t.solve_lower_triangular(&rhs).map(|y| q * y)
            }
        };
        let weights = weights.ok_or_else(|| {
            MorphError::SingularBasis(ErrorInfo::new(
                "singular-solve",
                "triangular solve failed on the factorised design matrix",
            ))
        })?;
        Ok(weights.iter().copied().collect())
    }
}

/// Sum of squared weights, the morphing error proxy.
pub fn squared_weight_sum(weights: &[f64]) -> f64 {
    weights.iter().map(|w| w * w).sum()
}
