//! Per-task linear models.
//!
//! A [`LinearModel`] is the pair `(A, b)` of the residual `A·x + b` over a
//! variable span, rebuilt every cycle from the model/feature signals. Its
//! quadratic cost contribution is `P = AᵀWA`, `q = AᵀWb` for a (possibly
//! per-axis) weight `W`.

use nalgebra::{DMatrix, DVector};

use wbc_core::error::SolverError;
use wbc_core::types::{VarSpan, Weight};

// ---------------------------------------------------------------------------
// LinearModel
// ---------------------------------------------------------------------------

/// The linear(ized) residual `A·x + b` of one task over a variable span.
#[derive(Clone, Debug)]
pub struct LinearModel {
    a: DMatrix<f64>,
    b: DVector<f64>,
    span: VarSpan,
}

impl LinearModel {
    /// Create a model, checking that `A`, `b`, and the span agree in shape.
    ///
    /// # Errors
    ///
    /// [`SolverError::ShapeMismatch`] if `A` and `b` disagree on row count,
    /// [`SolverError::ColumnMismatch`] if `A` is not as wide as the span.
    pub fn new(a: DMatrix<f64>, b: DVector<f64>, span: VarSpan) -> Result<Self, SolverError> {
        check_shapes(&a, &b, span)?;
        Ok(Self { a, b, span })
    }

    /// A model of `rows` zero rows over `span` (placeholder until the first
    /// update).
    #[must_use]
    pub fn zeros(rows: usize, span: VarSpan) -> Self {
        Self {
            a: DMatrix::zeros(rows, span.len),
            b: DVector::zeros(rows),
            span,
        }
    }

    /// Residual dimension.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.a.nrows()
    }

    /// The variable span this model acts on.
    #[must_use]
    pub const fn span(&self) -> VarSpan {
        self.span
    }

    /// The matrix `A`.
    #[must_use]
    pub const fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    /// The vector `b`.
    #[must_use]
    pub const fn b(&self) -> &DVector<f64> {
        &self.b
    }

    /// Replace `(A, b)`, revalidating shapes. The row count may change
    /// between cycles; the span may not.
    pub fn set(&mut self, a: DMatrix<f64>, b: DVector<f64>) -> Result<(), SolverError> {
        check_shapes(&a, &b, self.span)?;
        self.a = a;
        self.b = b;
        Ok(())
    }

    /// Quadratic cost contribution `(P, q) = (AᵀWA, AᵀWb)`.
    ///
    /// `P` is `span.len × span.len`, placed into the global cost at the
    /// span's index range by the solver.
    #[must_use]
    pub fn weighted_cost(&self, weight: &Weight) -> (DMatrix<f64>, DVector<f64>) {
        let mut wa = self.a.clone();
        let mut wb = self.b.clone();
        for i in 0..wa.nrows() {
            let w = weight.component(i);
            wa.row_mut(i).scale_mut(w);
            wb[i] *= w;
        }
        let p = self.a.transpose() * wa;
        let q = self.a.transpose() * wb;
        (p, q)
    }
}

fn check_shapes(a: &DMatrix<f64>, b: &DVector<f64>, span: VarSpan) -> Result<(), SolverError> {
    if a.nrows() != b.len() {
        return Err(SolverError::ShapeMismatch {
            rows: a.nrows(),
            rhs: b.len(),
        });
    }
    if a.ncols() != span.len {
        return Err(SolverError::ColumnMismatch {
            cols: a.ncols(),
            span: span.len,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
