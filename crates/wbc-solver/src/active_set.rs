//! Dense active-set QP backend.
//!
//! A primal-dual active-set method in the Goldfarb-Idnani spirit: start from
//! the equality-constrained optimum, repeatedly add the most violated
//! inequality to the working set (solving the KKT system with the working
//! set treated as equalities), and drop working constraints whose
//! multipliers turn negative. A small ridge keeps the Hessian strictly
//! convex so every KKT system is nonsingular while the constraint rows stay
//! independent.
//!
//! Suited to the small dense problems this controller produces (tens of
//! variables, a handful of cone facets); the interior-point backend scales
//! better for large stacks.

use nalgebra::{DMatrix, DVector};

use crate::backend::{QpBackend, QpProblem, QpSolution, SolveStatus};

/// Dense active-set backend.
#[derive(Clone, Debug)]
pub struct ActiveSetBackend {
    /// Maximum working-set changes before giving up.
    pub max_iterations: usize,
    /// Constraint violation / multiplier sign tolerance.
    pub tolerance: f64,
    /// Ridge added to the Hessian diagonal.
    pub ridge: f64,
}

impl Default for ActiveSetBackend {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-9,
            ridge: 1e-10,
        }
    }
}

impl QpBackend for ActiveSetBackend {
    fn name(&self) -> &'static str {
        "active-set"
    }

    fn solve(&mut self, problem: &QpProblem) -> QpSolution {
        let n = problem.n();
        let (g, h) = fold_bounds(problem);
        let ne = problem.a_eq.nrows();
        let ni = g.nrows();

        let mut active: Vec<usize> = Vec::new();

        for _ in 0..self.max_iterations {
            let Some((x, lambda)) = self.kkt_solve(problem, &g, &h, &active) else {
                return QpSolution::failed(n, SolveStatus::NumericalProblem);
            };

            // Drop the working constraint with the most negative multiplier.
            if let Some(worst) = lambda
                .iter()
                .enumerate()
                .filter(|(_, l)| **l < -self.tolerance)
                .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i)
            {
                active.remove(worst);
                continue;
            }

            // Add the most violated inactive inequality.
            let mut worst_violation = -self.tolerance;
            let mut worst_row = None;
            for i in 0..ni {
                if active.contains(&i) {
                    continue;
                }
                let violation = g.row(i).transpose().dot(&x) - h[i];
                if violation < worst_violation {
                    worst_violation = violation;
                    worst_row = Some(i);
                }
            }

            match worst_row {
                Some(i) => active.push(i),
                None => {
                    // Feasible and dual-feasible: optimal. An infeasible
                    // equality system would have shown up as a residual here.
                    if ne > 0 && (&problem.a_eq * &x - &problem.b_eq).norm() > 1e-6 {
                        return QpSolution::failed(n, SolveStatus::Infeasible);
                    }
                    return QpSolution { x, status: SolveStatus::Optimal };
                }
            }
        }

        QpSolution::failed(n, SolveStatus::MaxIterations)
    }
}

impl ActiveSetBackend {
    /// Solve the KKT system with the working inequalities as equalities.
    ///
    /// Returns the primal point and the multipliers of the working
    /// inequalities (sign convention: nonnegative at the optimum).
    fn kkt_solve(
        &self,
        problem: &QpProblem,
        g: &DMatrix<f64>,
        h: &DVector<f64>,
        active: &[usize],
    ) -> Option<(DVector<f64>, DVector<f64>)> {
        let n = problem.n();
        let ne = problem.a_eq.nrows();
        let m = ne + active.len();

        let mut kkt = DMatrix::zeros(n + m, n + m);
        kkt.view_mut((0, 0), (n, n)).copy_from(&problem.c);
        for i in 0..n {
            kkt[(i, i)] += self.ridge;
        }

        let mut rhs = DVector::zeros(n + m);
        rhs.rows_mut(0, n).copy_from(&(-&problem.d));

        for i in 0..ne {
            for j in 0..n {
                let v = problem.a_eq[(i, j)];
                kkt[(n + i, j)] = v;
                kkt[(j, n + i)] = v;
            }
            rhs[n + i] = problem.b_eq[i];
        }
        for (k, &row) in active.iter().enumerate() {
            for j in 0..n {
                let v = g[(row, j)];
                kkt[(n + ne + k, j)] = v;
                kkt[(j, n + ne + k)] = v;
            }
            rhs[n + ne + k] = h[row];
        }

        let sol = kkt.lu().solve(&rhs)?;
        let x = sol.rows(0, n).clone_owned();
        // Stationarity reads C x + d + Aᵀν = 0, so λ = -ν.
        let lambda = -sol.rows(n + ne, active.len()).clone_owned();
        Some((x, lambda))
    }
}

/// Fold explicit variable bounds into extra `G x >= h` rows.
fn fold_bounds(problem: &QpProblem) -> (DMatrix<f64>, DVector<f64>) {
    let n = problem.n();
    let ni = problem.g.nrows();
    let extra = problem.lower.as_ref().map_or(0, |_| n)
        + problem.upper.as_ref().map_or(0, |_| n);
    if extra == 0 {
        return (problem.g.clone(), problem.h.clone());
    }

    let mut g = DMatrix::zeros(ni + extra, n);
    let mut h = DVector::zeros(ni + extra);
    g.view_mut((0, 0), (ni, n)).copy_from(&problem.g);
    h.rows_mut(0, ni).copy_from(&problem.h);

    let mut row = ni;
    if let Some(lower) = &problem.lower {
        for i in 0..n {
            g[(row, i)] = 1.0;
            h[row] = lower[i];
            row += 1;
        }
    }
    if let Some(upper) = &problem.upper {
        for i in 0..n {
            g[(row, i)] = -1.0;
            h[row] = -upper[i];
            row += 1;
        }
    }
    (g, h)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn unconstrained_matches_analytic_optimum() {
        // minimize 1/2 xᵀx + dᵀx  =>  x = -d
        let mut backend = ActiveSetBackend::default();
        let problem = QpProblem::unconstrained(
            DMatrix::identity(2, 2),
            DVector::from_vec(vec![-1.0, -2.0]),
        );
        let sol = backend.solve(&problem);
        assert_eq!(sol.status, SolveStatus::Optimal);
        assert_relative_eq!(sol.x[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(sol.x[1], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn equality_projection() {
        // minimize 1/2 ||x||^2 s.t. x0 + x1 = 1
        let mut problem = QpProblem::unconstrained(DMatrix::identity(2, 2), DVector::zeros(2));
        problem.a_eq = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
        problem.b_eq = DVector::from_element(1, 1.0);

        let mut backend = ActiveSetBackend::default();
        let sol = backend.solve(&problem);
        assert_eq!(sol.status, SolveStatus::Optimal);
        assert_relative_eq!(sol.x[0], 0.5, epsilon = 1e-6);
        assert_relative_eq!(sol.x[1], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn binding_inequality_clamps_solution() {
        // minimize 1/2 x^2 - 10x s.t. x <= 4
        let mut problem = QpProblem::unconstrained(
            DMatrix::from_element(1, 1, 1.0),
            DVector::from_element(1, -10.0),
        );
        problem.g = DMatrix::from_element(1, 1, -1.0);
        problem.h = DVector::from_element(1, -4.0);

        let mut backend = ActiveSetBackend::default();
        let sol = backend.solve(&problem);
        assert_eq!(sol.status, SolveStatus::Optimal);
        assert_relative_eq!(sol.x[0], 4.0, epsilon = 1e-6);
    }

    #[test]
    fn slack_inequality_left_inactive() {
        let mut problem = QpProblem::unconstrained(
            DMatrix::from_element(1, 1, 1.0),
            DVector::from_element(1, -10.0),
        );
        problem.g = DMatrix::from_element(1, 1, -1.0);
        problem.h = DVector::from_element(1, -50.0);

        let mut backend = ActiveSetBackend::default();
        let sol = backend.solve(&problem);
        assert_eq!(sol.status, SolveStatus::Optimal);
        assert_relative_eq!(sol.x[0], 10.0, epsilon = 1e-6);
    }

    #[test]
    fn box_constrained_corner() {
        // minimize 1/2 ||x - (3, -3)||^2 within [-1, 1]^2 => (1, -1)
        let mut problem = QpProblem::unconstrained(
            DMatrix::identity(2, 2),
            DVector::from_vec(vec![-3.0, 3.0]),
        );
        problem.lower = Some(DVector::from_element(2, -1.0));
        problem.upper = Some(DVector::from_element(2, 1.0));

        let mut backend = ActiveSetBackend::default();
        let sol = backend.solve(&problem);
        assert_eq!(sol.status, SolveStatus::Optimal);
        assert_relative_eq!(sol.x[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(sol.x[1], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn two_constraints_activated_in_sequence() {
        // minimize 1/2 ||x||^2 - (4, 4)·x s.t. x1 <= 1, x2 <= 1. The
        // unconstrained optimum (4, 4) violates both rows; each is pulled
        // into the working set on its own iteration.
        let mut problem = QpProblem::unconstrained(
            DMatrix::identity(2, 2),
            DVector::from_vec(vec![-4.0, -4.0]),
        );
        problem.g = DMatrix::from_row_slice(2, 2, &[-1.0, 0.0, 0.0, -1.0]);
        problem.h = DVector::from_vec(vec![-1.0, -1.0]);

        let mut backend = ActiveSetBackend::default();
        let sol = backend.solve(&problem);
        assert_eq!(sol.status, SolveStatus::Optimal);
        assert_relative_eq!(sol.x[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(sol.x[1], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn deterministic_across_calls() {
        let mut problem = QpProblem::unconstrained(
            DMatrix::identity(3, 3),
            DVector::from_vec(vec![-1.0, 2.0, -0.5]),
        );
        problem.g = DMatrix::from_row_slice(1, 3, &[1.0, 1.0, 1.0]);
        problem.h = DVector::from_element(1, 0.0);

        let mut backend = ActiveSetBackend::default();
        let a = backend.solve(&problem);
        let b = backend.solve(&problem);
        assert_eq!(a.status, b.status);
        assert_relative_eq!((a.x - b.x).norm(), 0.0, epsilon = 0.0);
    }
}
