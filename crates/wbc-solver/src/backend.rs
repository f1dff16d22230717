//! QP backend contract.
//!
//! A backend consumes the assembled problem and produces a solution in a
//! single synchronous call: no retries, no internal state carried between
//! cycles, deterministic output for identical input matrices.

use nalgebra::{DMatrix, DVector};

use wbc_core::config::BackendKind;
use wbc_core::error::SolverError;

use crate::active_set::ActiveSetBackend;
use crate::clarabel_backend::ClarabelBackend;

// ---------------------------------------------------------------------------
// QpProblem
// ---------------------------------------------------------------------------

/// A dense QP in the form
///
/// ```text
/// minimize   1/2 xᵀ C x + dᵀ x
/// subject to A x  = b
///            G x >= h
///            lower <= x <= upper   (optional)
/// ```
///
/// `C` is symmetric positive semi-definite by construction (a weighted sum
/// of `AᵀA` terms plus a small regularization ridge).
#[derive(Clone, Debug)]
pub struct QpProblem {
    /// Cost Hessian (n x n).
    pub c: DMatrix<f64>,
    /// Cost linear term.
    pub d: DVector<f64>,
    /// Equality constraint matrix, full row rank after reduction.
    pub a_eq: DMatrix<f64>,
    /// Equality right-hand side.
    pub b_eq: DVector<f64>,
    /// Inequality constraint matrix (`G x >= h` convention).
    pub g: DMatrix<f64>,
    /// Inequality right-hand side.
    pub h: DVector<f64>,
    /// Optional explicit lower variable bounds.
    pub lower: Option<DVector<f64>>,
    /// Optional explicit upper variable bounds.
    pub upper: Option<DVector<f64>>,
}

impl QpProblem {
    /// Problem size.
    #[must_use]
    pub fn n(&self) -> usize {
        self.d.len()
    }

    /// An unconstrained problem over `n` variables (useful in tests).
    #[must_use]
    pub fn unconstrained(c: DMatrix<f64>, d: DVector<f64>) -> Self {
        let n = d.len();
        Self {
            c,
            d,
            a_eq: DMatrix::zeros(0, n),
            b_eq: DVector::zeros(0),
            g: DMatrix::zeros(0, n),
            h: DVector::zeros(0),
            lower: None,
            upper: None,
        }
    }
}

// ---------------------------------------------------------------------------
// SolveStatus / QpSolution
// ---------------------------------------------------------------------------

/// Backend-reported outcome of one solve.
///
/// The solver surfaces this unchanged; deciding what to do with a
/// non-optimal cycle (hold the last command, fail safe) is the caller's
/// responsibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveStatus {
    /// Converged to the required tolerance.
    Optimal,
    /// The constraint set admits no solution.
    Infeasible,
    /// Iteration budget exhausted before convergence.
    MaxIterations,
    /// The backend hit a numerical failure (singular system, bad scaling).
    NumericalProblem,
}

impl SolveStatus {
    /// Whether the solution vector is safe to consume.
    #[must_use]
    pub const fn is_optimal(self) -> bool {
        matches!(self, Self::Optimal)
    }
}

/// Result of one QP solve.
#[derive(Clone, Debug)]
pub struct QpSolution {
    /// Solution vector (zeros when the status is not optimal).
    pub x: DVector<f64>,
    /// Backend-reported status.
    pub status: SolveStatus,
}

impl QpSolution {
    /// A failed solution of the right dimension.
    #[must_use]
    pub fn failed(n: usize, status: SolveStatus) -> Self {
        Self {
            x: DVector::zeros(n),
            status,
        }
    }
}

// ---------------------------------------------------------------------------
// QpBackend
// ---------------------------------------------------------------------------

/// A dense QP solving strategy.
pub trait QpBackend: Send {
    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Solve one QP.
    fn solve(&mut self, problem: &QpProblem) -> QpSolution;
}

/// Construct the backend for a configured kind.
///
/// # Errors
///
/// Currently infallible for the known kinds; the `Result` keeps the
/// signature stable for backends with fallible construction.
pub fn backend_for(kind: BackendKind) -> Result<Box<dyn QpBackend>, SolverError> {
    match kind {
        BackendKind::Clarabel => Ok(Box::new(ClarabelBackend::default())),
        BackendKind::ActiveSet => Ok(Box::new(ActiveSetBackend::default())),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
