//! SVD-based equality rank reduction.
//!
//! Stacked task equality constraints are frequently rank deficient (several
//! tasks constraining overlapping directions). Feeding a rank-deficient
//! equality system into an active-set or KKT solve yields a singular or
//! badly conditioned system, so the stack is truncated to its numeric rank
//! before the backend sees it.

use log::debug;
use nalgebra::{DMatrix, DVector};

/// Reduce `A·x = b` to a full-row-rank system with the same solution set.
///
/// Decomposes `A = U·S·Vᵀ`, counts the `r` singular values strictly greater
/// than `tolerance`, and returns
///
/// ```text
/// Ar = S[0..r] · V[:, 0..r]ᵀ        br = U[:, 0..r]ᵀ · b
/// ```
///
/// `Ar` has exactly `r` rows; any `x` satisfying the original system
/// satisfies the reduced one, and conversely up to the chosen tolerance.
/// A zero-row `A` is passed through unchanged.
#[must_use]
pub fn reduce_constraints(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    tolerance: f64,
) -> (DMatrix<f64>, DVector<f64>) {
    if a.nrows() == 0 {
        return (a.clone(), b.clone());
    }

    let svd = a.clone().svd(true, true);
    let s = &svd.singular_values;
    // Singular values come back sorted in decreasing order.
    let r = s.iter().take_while(|v| **v > tolerance).count();

    let u = svd.u.as_ref().expect("SVD was computed with U");
    let v_t = svd.v_t.as_ref().expect("SVD was computed with Vᵀ");

    if r < a.nrows() {
        debug!(
            "equality stack reduced from {} to {} rows (tolerance {:e})",
            a.nrows(),
            r,
            tolerance
        );
    }

    let mut ar = v_t.rows(0, r).clone_owned();
    for i in 0..r {
        ar.row_mut(i).scale_mut(s[i]);
    }
    let br = u.columns(0, r).transpose() * b;
    (ar, br)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
