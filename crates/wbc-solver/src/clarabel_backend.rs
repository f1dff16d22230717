//! Clarabel (interior-point) QP backend.
//!
//! Clarabel consumes the constraint blocks concatenated into one sparse
//! matrix with a cone per block: equalities under a zero cone, inequalities
//! and optional variable bounds under a nonnegative cone. The internal
//! inequality convention `G x >= h` is flipped to Clarabel's
//! `A x + s = b, s >= 0` (i.e. `A x <= b`) form.

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{NonnegativeConeT, ZeroConeT},
};
use log::warn;
use nalgebra::{DMatrix, DVector};

use crate::backend::{QpBackend, QpProblem, QpSolution, SolveStatus};

/// Interior-point backend built on Clarabel.
#[derive(Clone, Debug)]
pub struct ClarabelBackend {
    /// Maximum interior-point iterations.
    pub max_iterations: u32,
    /// Absolute/relative gap and feasibility tolerance.
    pub tolerance: f64,
}

impl Default for ClarabelBackend {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-8,
        }
    }
}

impl QpBackend for ClarabelBackend {
    fn name(&self) -> &'static str {
        "clarabel"
    }

    fn solve(&mut self, problem: &QpProblem) -> QpSolution {
        let n = problem.n();
        let ne = problem.a_eq.nrows();
        let ni = problem.g.nrows();

        // Stack [A_eq; -G; bounds] with rhs [b_eq; -h; bound values].
        let mut bound_rows = 0;
        if problem.upper.is_some() {
            bound_rows += n;
        }
        if problem.lower.is_some() {
            bound_rows += n;
        }

        let mut a_all = DMatrix::zeros(ne + ni + bound_rows, n);
        let mut b_all = DVector::zeros(ne + ni + bound_rows);

        a_all.view_mut((0, 0), (ne, n)).copy_from(&problem.a_eq);
        b_all.rows_mut(0, ne).copy_from(&problem.b_eq);

        a_all.view_mut((ne, 0), (ni, n)).copy_from(&(-&problem.g));
        b_all.rows_mut(ne, ni).copy_from(&(-&problem.h));

        let mut row = ne + ni;
        if let Some(upper) = &problem.upper {
            for i in 0..n {
                a_all[(row + i, i)] = 1.0;
                b_all[row + i] = upper[i];
            }
            row += n;
        }
        if let Some(lower) = &problem.lower {
            for i in 0..n {
                a_all[(row + i, i)] = -1.0;
                b_all[row + i] = -lower[i];
            }
        }

        let p_csc = dmatrix_to_csc_upper_tri(&problem.c);
        let a_csc = dmatrix_to_csc(&a_all);
        let cones = vec![ZeroConeT(ne), NonnegativeConeT(ni + bound_rows)];

        let settings = match DefaultSettingsBuilder::default()
            .max_iter(self.max_iterations)
            .verbose(false)
            .tol_gap_abs(self.tolerance)
            .tol_gap_rel(self.tolerance)
            .tol_feas(self.tolerance)
            .build()
        {
            Ok(settings) => settings,
            Err(e) => {
                warn!("clarabel settings rejected: {e}");
                return QpSolution::failed(n, SolveStatus::NumericalProblem);
            }
        };

        let q: Vec<f64> = problem.d.iter().copied().collect();
        let b: Vec<f64> = b_all.iter().copied().collect();

        let mut solver = DefaultSolver::new(&p_csc, &q, &a_csc, &b, &cones, settings);
        solver.solve();
        let sol = &solver.solution;
        let status = map_status(sol.status);
        if status.is_optimal() {
            QpSolution {
                x: DVector::from_iterator(n, sol.x.iter().copied()),
                status,
            }
        } else {
            QpSolution::failed(n, status)
        }
    }
}

fn map_status(status: SolverStatus) -> SolveStatus {
    match status {
        SolverStatus::Solved | SolverStatus::AlmostSolved => SolveStatus::Optimal,
        SolverStatus::PrimalInfeasible
        | SolverStatus::DualInfeasible
        | SolverStatus::AlmostPrimalInfeasible
        | SolverStatus::AlmostDualInfeasible => SolveStatus::Infeasible,
        SolverStatus::MaxIterations | SolverStatus::MaxTime => SolveStatus::MaxIterations,
        _ => SolveStatus::NumericalProblem,
    }
}

/// Convert a nalgebra `DMatrix<f64>` to a Clarabel `CscMatrix<f64>` (full matrix).
fn dmatrix_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

/// Convert a symmetric nalgebra `DMatrix<f64>` to upper-triangular `CscMatrix<f64>`.
fn dmatrix_to_csc_upper_tri(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        if nrows > 0 {
            for i in 0..=j.min(nrows - 1) {
                let v = m[(i, j)];
                if v.abs() > 1e-15 {
                    rowval.push(i);
                    nzval.push(v);
                }
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scalar_problem() -> QpProblem {
        // minimize (x - 10)^2 / 2 = 1/2 x^2 - 10 x + const
        QpProblem::unconstrained(
            DMatrix::from_element(1, 1, 1.0),
            DVector::from_element(1, -10.0),
        )
    }

    #[test]
    fn unconstrained_scalar() {
        let mut backend = ClarabelBackend::default();
        let sol = backend.solve(&scalar_problem());
        assert_eq!(sol.status, SolveStatus::Optimal);
        assert_relative_eq!(sol.x[0], 10.0, epsilon = 1e-5);
    }

    #[test]
    fn equality_constrained() {
        // minimize 1/2 ||x||^2 s.t. x0 + x1 = 1  =>  x = (0.5, 0.5)
        let mut problem = QpProblem::unconstrained(DMatrix::identity(2, 2), DVector::zeros(2));
        problem.a_eq = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
        problem.b_eq = DVector::from_element(1, 1.0);

        let mut backend = ClarabelBackend::default();
        let sol = backend.solve(&problem);
        assert_eq!(sol.status, SolveStatus::Optimal);
        assert_relative_eq!(sol.x[0], 0.5, epsilon = 1e-5);
        assert_relative_eq!(sol.x[1], 0.5, epsilon = 1e-5);
    }

    #[test]
    fn active_inequality() {
        // minimize 1/2 x^2 - 10 x s.t. -x >= -4  (x <= 4)  =>  x = 4
        let mut problem = scalar_problem();
        problem.g = DMatrix::from_element(1, 1, -1.0);
        problem.h = DVector::from_element(1, -4.0);

        let mut backend = ClarabelBackend::default();
        let sol = backend.solve(&problem);
        assert_eq!(sol.status, SolveStatus::Optimal);
        assert_relative_eq!(sol.x[0], 4.0, epsilon = 1e-5);
    }

    #[test]
    fn inactive_inequality_ignored() {
        // x <= 50 does not bind; optimum stays at 10.
        let mut problem = scalar_problem();
        problem.g = DMatrix::from_element(1, 1, -1.0);
        problem.h = DVector::from_element(1, -50.0);

        let mut backend = ClarabelBackend::default();
        let sol = backend.solve(&problem);
        assert_eq!(sol.status, SolveStatus::Optimal);
        assert_relative_eq!(sol.x[0], 10.0, epsilon = 1e-4);
    }

    #[test]
    fn explicit_bounds() {
        let mut problem = scalar_problem();
        problem.lower = Some(DVector::from_element(1, -1.0));
        problem.upper = Some(DVector::from_element(1, 2.0));

        let mut backend = ClarabelBackend::default();
        let sol = backend.solve(&problem);
        assert_eq!(sol.status, SolveStatus::Optimal);
        assert_relative_eq!(sol.x[0], 2.0, epsilon = 1e-5);
    }

    #[test]
    fn infeasible_reported() {
        // x >= 1 and -x >= 0 (x <= 0) cannot both hold.
        let mut problem = QpProblem::unconstrained(DMatrix::identity(1, 1), DVector::zeros(1));
        problem.g = DMatrix::from_row_slice(2, 1, &[1.0, -1.0]);
        problem.h = DVector::from_vec(vec![1.0, 0.0]);

        let mut backend = ClarabelBackend::default();
        let sol = backend.solve(&problem);
        assert_eq!(sol.status, SolveStatus::Infeasible);
    }
}
