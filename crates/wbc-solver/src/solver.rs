//! Objective/constraint aggregation and the per-cycle solve.
//!
//! The solver owns the shared optimization variable space and arena storage
//! for every registered contribution. Registration hands back an opaque
//! handle; callers mutate or remove their entries only through handles, so
//! there is no cross-referenced ownership between tasks and the solver.
//!
//! Per cycle: `assemble()` accumulates the weighted cost, stacks and
//! rank-reduces the equality constraints, and stacks the inequalities;
//! `solve()` hands the assembled problem to the backend and surfaces its
//! status unchanged.

use log::debug;
use nalgebra::{DMatrix, DVector};

use wbc_core::error::SolverError;
use wbc_core::types::{VarSpan, Weight};

use crate::backend::{QpBackend, QpProblem, QpSolution, SolveStatus};
use crate::linear::LinearModel;
use crate::reduce::reduce_constraints;

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Opaque handle to a registered objective.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectiveHandle(usize);

/// Which constraint set a handle refers to.
///
/// A constraint is classified by its own declared kind at registration, not
/// by the call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    /// `A·x + b = 0`.
    Equality,
    /// `A·x + b >= 0`.
    Inequality,
}

/// Opaque handle to a registered constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConstraintHandle {
    kind: ConstraintKind,
    index: usize,
}

impl ConstraintHandle {
    /// The constraint set this handle lives in.
    #[must_use]
    pub const fn kind(&self) -> ConstraintKind {
        self.kind
    }
}

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

struct ObjectiveSlot {
    model: LinearModel,
    weight: Weight,
}

/// Aggregates all active task contributions and drives the QP backend.
pub struct Solver {
    n: usize,
    tolerance: f64,
    regularization: f64,
    objectives: Vec<Option<ObjectiveSlot>>,
    equalities: Vec<Option<LinearModel>>,
    inequalities: Vec<Option<LinearModel>>,
    free_spans: Vec<VarSpan>,
    backend: Box<dyn QpBackend>,
    assembled: Option<QpProblem>,
    solution: QpSolution,
}

impl Solver {
    /// Create a solver over `n` variables.
    ///
    /// `tolerance` is the singular-value cutoff of the equality rank
    /// reduction; `regularization` is the ridge added to the cost diagonal.
    /// The backend is fixed for the solver's lifetime.
    #[must_use]
    pub fn new(n: usize, tolerance: f64, regularization: f64, backend: Box<dyn QpBackend>) -> Self {
        Self {
            n,
            tolerance,
            regularization,
            objectives: Vec::new(),
            equalities: Vec::new(),
            inequalities: Vec::new(),
            free_spans: Vec::new(),
            backend,
            assembled: None,
            solution: QpSolution::failed(n, SolveStatus::NumericalProblem),
        }
    }

    /// Current problem size.
    #[must_use]
    pub const fn variable_size(&self) -> usize {
        self.n
    }

    /// Resize the optimization variable (e.g. on a formalism switch).
    ///
    /// Invalidates the assembled matrices and the cached solution. Spans
    /// handed out by [`allocate_span`](Self::allocate_span) beyond the new
    /// size become stale; their owners must re-register.
    pub fn set_variable_size(&mut self, n: usize) {
        if n != self.n {
            debug!("problem variable resized from {} to {}", self.n, n);
        }
        self.n = n;
        self.free_spans.clear();
        self.assembled = None;
        self.solution = QpSolution::failed(n, SolveStatus::NumericalProblem);
    }

    /// Allocate `len` variables (a per-contact force sub-variable) and
    /// return their span.
    ///
    /// A released span of the same width is reused before the variable
    /// grows, so repeated activate/deactivate sequences keep the problem
    /// size bounded.
    pub fn allocate_span(&mut self, len: usize) -> VarSpan {
        self.assembled = None;
        if let Some(i) = self.free_spans.iter().position(|s| s.len == len) {
            return self.free_spans.swap_remove(i);
        }
        let span = VarSpan::new(self.n, len);
        self.n += len;
        span
    }

    /// Return a span obtained from [`allocate_span`](Self::allocate_span).
    ///
    /// A tail span shrinks the variable directly, absorbing any free spans
    /// that end up at the new tail; an interior span goes on the free list
    /// until [`allocate_span`](Self::allocate_span) hands it out again.
    pub fn release_span(&mut self, span: VarSpan) {
        self.assembled = None;
        if span.end() != self.n {
            self.free_spans.push(span);
            return;
        }
        self.n = span.offset;
        while let Some(i) = self.free_spans.iter().position(|s| s.end() == self.n) {
            self.n = self.free_spans.swap_remove(i).offset;
        }
    }

    // -- registration -------------------------------------------------------

    /// Register a weighted objective. No duplicate detection is performed
    /// here; callers enforce at-most-once registration via their handle.
    pub fn add_objective(&mut self, weight: Weight, model: LinearModel) -> ObjectiveHandle {
        self.assembled = None;
        let slot = Some(ObjectiveSlot { model, weight });
        ObjectiveHandle(store(&mut self.objectives, slot))
    }

    /// Remove an objective.
    ///
    /// # Errors
    ///
    /// [`SolverError::UnknownObjective`] if the handle is vacant (removal of
    /// a non-member).
    pub fn remove_objective(&mut self, handle: ObjectiveHandle) -> Result<(), SolverError> {
        take(&mut self.objectives, handle.0).ok_or(SolverError::UnknownObjective)?;
        self.assembled = None;
        Ok(())
    }

    /// Replace the `(A, b)` of a registered objective.
    pub fn update_objective(
        &mut self,
        handle: ObjectiveHandle,
        a: DMatrix<f64>,
        b: DVector<f64>,
    ) -> Result<(), SolverError> {
        let slot = self
            .objectives
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or(SolverError::UnknownObjective)?;
        slot.model.set(a, b)?;
        self.assembled = None;
        Ok(())
    }

    /// Replace the weight of a registered objective.
    pub fn set_objective_weight(
        &mut self,
        handle: ObjectiveHandle,
        weight: Weight,
    ) -> Result<(), SolverError> {
        let slot = self
            .objectives
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or(SolverError::UnknownObjective)?;
        slot.weight = weight;
        self.assembled = None;
        Ok(())
    }

    /// Present for interface parity with multi-level hierarchical solvers.
    /// This solver treats all objectives as one flat weighted level, so the
    /// level is ignored.
    pub fn set_objective_level(&mut self, _handle: ObjectiveHandle, _level: usize) {}

    /// Register a constraint under its declared kind.
    pub fn add_constraint(&mut self, kind: ConstraintKind, model: LinearModel) -> ConstraintHandle {
        self.assembled = None;
        let index = match kind {
            ConstraintKind::Equality => store(&mut self.equalities, Some(model)),
            ConstraintKind::Inequality => store(&mut self.inequalities, Some(model)),
        };
        ConstraintHandle { kind, index }
    }

    /// Remove a constraint.
    ///
    /// # Errors
    ///
    /// [`SolverError::UnknownConstraint`] if the handle is vacant.
    pub fn remove_constraint(&mut self, handle: ConstraintHandle) -> Result<(), SolverError> {
        let set = self.constraint_set_mut(handle.kind);
        take(set, handle.index).ok_or(SolverError::UnknownConstraint)?;
        self.assembled = None;
        Ok(())
    }

    /// Replace the `(A, b)` of a registered constraint in place (e.g. a
    /// friction-cone parameter change without re-registration).
    pub fn update_constraint(
        &mut self,
        handle: ConstraintHandle,
        a: DMatrix<f64>,
        b: DVector<f64>,
    ) -> Result<(), SolverError> {
        let model = self
            .constraint_set_mut(handle.kind)
            .get_mut(handle.index)
            .and_then(Option::as_mut)
            .ok_or(SolverError::UnknownConstraint)?;
        model.set(a, b)?;
        self.assembled = None;
        Ok(())
    }

    fn constraint_set_mut(&mut self, kind: ConstraintKind) -> &mut Vec<Option<LinearModel>> {
        match kind {
            ConstraintKind::Equality => &mut self.equalities,
            ConstraintKind::Inequality => &mut self.inequalities,
        }
    }

    /// Number of live objectives.
    #[must_use]
    pub fn objective_count(&self) -> usize {
        self.objectives.iter().flatten().count()
    }

    /// Number of live equality constraints.
    #[must_use]
    pub fn equality_count(&self) -> usize {
        self.equalities.iter().flatten().count()
    }

    /// Number of live inequality constraints.
    #[must_use]
    pub fn inequality_count(&self) -> usize {
        self.inequalities.iter().flatten().count()
    }

    // -- assembly and solve -------------------------------------------------

    /// Build the QP matrices from every live registration.
    ///
    /// # Errors
    ///
    /// [`SolverError::SpanOutOfRange`] if any registered model's span does
    /// not fit the current variable size.
    pub fn assemble(&mut self) -> Result<(), SolverError> {
        let n = self.n;

        let mut c = DMatrix::zeros(n, n);
        let mut d = DVector::zeros(n);
        for i in 0..n {
            c[(i, i)] = self.regularization;
        }

        for slot in self.objectives.iter().flatten() {
            let span = checked_span(&slot.model, n)?;
            let (p, q) = slot.model.weighted_cost(&slot.weight);
            let mut c_block = c.view_mut((span.offset, span.offset), (span.len, span.len));
            c_block += &p;
            let mut d_block = d.rows_mut(span.offset, span.len);
            d_block += &q;
        }

        // Equalities: residual A·x + b = 0 stacks as A x = -b.
        let ne: usize = self.equalities.iter().flatten().map(LinearModel::rows).sum();
        let mut a = DMatrix::zeros(ne, n);
        let mut b = DVector::zeros(ne);
        let mut row = 0;
        for model in self.equalities.iter().flatten() {
            let span = checked_span(model, n)?;
            a.view_mut((row, span.offset), (model.rows(), span.len))
                .copy_from(model.a());
            b.rows_mut(row, model.rows()).copy_from(&(-model.b()));
            row += model.rows();
        }
        let (a_eq, b_eq) = reduce_constraints(&a, &b, self.tolerance);

        // Inequalities: residual A·x + b >= 0 stacks as G x >= -b.
        let ni: usize = self.inequalities.iter().flatten().map(LinearModel::rows).sum();
        let mut g = DMatrix::zeros(ni, n);
        let mut h = DVector::zeros(ni);
        let mut row = 0;
        for model in self.inequalities.iter().flatten() {
            let span = checked_span(model, n)?;
            g.view_mut((row, span.offset), (model.rows(), span.len))
                .copy_from(model.a());
            h.rows_mut(row, model.rows()).copy_from(&(-model.b()));
            row += model.rows();
        }

        self.assembled = Some(QpProblem {
            c,
            d,
            a_eq,
            b_eq,
            g,
            h,
            lower: None,
            upper: None,
        });
        Ok(())
    }

    /// Solve the assembled problem, assembling first if needed.
    ///
    /// The backend's status is surfaced unchanged in the returned solution;
    /// the solver does not interpret infeasibility itself.
    ///
    /// # Errors
    ///
    /// Assembly errors only; a failed numeric solve is a status, not an
    /// `Err`.
    pub fn solve(&mut self) -> Result<&QpSolution, SolverError> {
        if self.assembled.is_none() {
            self.assemble()?;
        }
        if let Some(problem) = &self.assembled {
            self.solution = self.backend.solve(problem);
        }
        Ok(&self.solution)
    }

    /// The most recent solution.
    #[must_use]
    pub const fn solution(&self) -> &QpSolution {
        &self.solution
    }

    /// Read a sub-range of the most recent solution vector.
    #[must_use]
    pub fn read_span(&self, span: VarSpan) -> DVector<f64> {
        self.solution.x.rows(span.offset, span.len).clone_owned()
    }

    /// The assembled matrices of the current cycle, if any.
    #[must_use]
    pub const fn assembled(&self) -> Option<&QpProblem> {
        self.assembled.as_ref()
    }
}

fn checked_span(model: &LinearModel, n: usize) -> Result<VarSpan, SolverError> {
    let span = model.span();
    if !span.fits(n) {
        return Err(SolverError::SpanOutOfRange {
            offset: span.offset,
            end: span.end(),
            n,
        });
    }
    Ok(span)
}

/// Insert into the first vacant slot, or push.
fn store<T>(arena: &mut Vec<Option<T>>, value: Option<T>) -> usize {
    match arena.iter().position(Option::is_none) {
        Some(i) => {
            arena[i] = value;
            i
        }
        None => {
            arena.push(value);
            arena.len() - 1
        }
    }
}

/// Vacate a slot, returning its content.
fn take<T>(arena: &mut [Option<T>], index: usize) -> Option<T> {
    arena.get_mut(index).and_then(Option::take)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active_set::ActiveSetBackend;
    use crate::clarabel_backend::ClarabelBackend;
    use approx::assert_relative_eq;

    fn active_set_solver(n: usize) -> Solver {
        Solver::new(n, 1e-8, 1e-9, Box::new(ActiveSetBackend::default()))
    }

    fn model(a: &[f64], rows: usize, b: &[f64], span: VarSpan) -> LinearModel {
        LinearModel::new(
            DMatrix::from_row_slice(rows, span.len, a),
            DVector::from_row_slice(b),
            span,
        )
        .unwrap()
    }

    #[test]
    fn cost_aggregation_across_spans() {
        let mut solver = active_set_solver(4);
        // Objective 1 on x[0..2], weight 2.
        let m1 = model(&[1.0, 0.0, 0.0, 1.0], 2, &[1.0, 2.0], VarSpan::new(0, 2));
        solver.add_objective(Weight::Scalar(2.0), m1);
        // Objective 2 on x[2..4], weight 3, A = [[1, 1]].
        let m2 = model(&[1.0, 1.0], 1, &[-1.0], VarSpan::new(2, 2));
        solver.add_objective(Weight::Scalar(3.0), m2);

        solver.assemble().unwrap();
        let p = solver.assembled().unwrap();

        // C = Σ wᵢ AᵢᵀAᵢ placed block-wise (plus the ridge on the diagonal).
        assert_relative_eq!(p.c[(0, 0)], 2.0, epsilon = 1e-8);
        assert_relative_eq!(p.c[(1, 1)], 2.0, epsilon = 1e-8);
        assert_relative_eq!(p.c[(0, 1)], 0.0, epsilon = 1e-12);
        assert_relative_eq!(p.c[(2, 2)], 3.0, epsilon = 1e-8);
        assert_relative_eq!(p.c[(2, 3)], 3.0, epsilon = 1e-12);
        assert_relative_eq!(p.c[(3, 3)], 3.0, epsilon = 1e-8);
        // Cross-span blocks stay zero.
        assert_relative_eq!(p.c[(0, 2)], 0.0, epsilon = 1e-12);

        // d = Σ wᵢ Aᵢᵀbᵢ.
        assert_relative_eq!(p.d[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(p.d[1], 4.0, epsilon = 1e-12);
        assert_relative_eq!(p.d[2], -3.0, epsilon = 1e-12);
        assert_relative_eq!(p.d[3], -3.0, epsilon = 1e-12);
    }

    #[test]
    fn scalar_acceleration_scenario() {
        // J = [1], Kp = 100, e = 0.1 => acc_des = -10; model (A=[1], b=-10).
        // Sole unconstrained objective: minimizing ||x + b||² gives x = 10.
        for mut solver in [
            active_set_solver(1),
            Solver::new(1, 1e-8, 1e-9, Box::new(ClarabelBackend::default())),
        ] {
            let m = model(&[1.0], 1, &[-10.0], VarSpan::new(0, 1));
            solver.add_objective(Weight::Scalar(1.0), m);
            solver.assemble().unwrap();
            let sol = solver.solve().unwrap();
            assert_eq!(sol.status, SolveStatus::Optimal);
            assert_relative_eq!(sol.x[0], 10.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn redundant_equalities_are_reduced() {
        let mut solver = active_set_solver(2);
        // Two identical equality constraints x0 - 1 = 0.
        let c1 = model(&[1.0, 0.0], 1, &[-1.0], VarSpan::new(0, 2));
        let c2 = model(&[1.0, 0.0], 1, &[-1.0], VarSpan::new(0, 2));
        solver.add_constraint(ConstraintKind::Equality, c1);
        solver.add_constraint(ConstraintKind::Equality, c2);

        solver.assemble().unwrap();
        let p = solver.assembled().unwrap();
        assert_eq!(p.a_eq.nrows(), 1);

        let sol = solver.solve().unwrap();
        assert_eq!(sol.status, SolveStatus::Optimal);
        assert_relative_eq!(sol.x[0], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn removal_of_non_member_is_an_error() {
        let mut solver = active_set_solver(2);
        let m = model(&[1.0, 0.0], 1, &[0.0], VarSpan::new(0, 2));
        let h = solver.add_objective(Weight::Scalar(1.0), m);
        assert!(solver.remove_objective(h).is_ok());
        assert!(matches!(
            solver.remove_objective(h),
            Err(SolverError::UnknownObjective)
        ));

        let m = model(&[1.0, 0.0], 1, &[0.0], VarSpan::new(0, 2));
        let h = solver.add_constraint(ConstraintKind::Inequality, m);
        assert!(solver.remove_constraint(h).is_ok());
        assert!(matches!(
            solver.remove_constraint(h),
            Err(SolverError::UnknownConstraint)
        ));
    }

    #[test]
    fn span_out_of_range_is_caught_at_assembly() {
        let mut solver = active_set_solver(2);
        let m = model(&[1.0, 0.0, 0.0], 1, &[0.0], VarSpan::new(1, 3));
        solver.add_objective(Weight::Scalar(1.0), m);
        assert!(matches!(
            solver.assemble(),
            Err(SolverError::SpanOutOfRange { end: 4, n: 2, .. })
        ));
    }

    #[test]
    fn resizing_invalidates_assembled_state() {
        let mut solver = active_set_solver(2);
        let m = model(&[1.0, 0.0], 1, &[-1.0], VarSpan::new(0, 2));
        solver.add_objective(Weight::Scalar(1.0), m);
        solver.assemble().unwrap();
        assert!(solver.assembled().is_some());

        solver.set_variable_size(3);
        assert_eq!(solver.variable_size(), 3);
        assert!(solver.assembled().is_none());

        // The old 2-wide model still fits the enlarged problem.
        solver.assemble().unwrap();
        assert_eq!(solver.assembled().unwrap().c.nrows(), 3);
    }

    #[test]
    fn allocate_and_release_span() {
        let mut solver = active_set_solver(3);
        let f = solver.allocate_span(3);
        assert_eq!(f, VarSpan::new(3, 3));
        assert_eq!(solver.variable_size(), 6);
        solver.release_span(f);
        assert_eq!(solver.variable_size(), 3);
    }

    #[test]
    fn released_interior_span_is_reused() {
        let mut solver = active_set_solver(2);
        let a = solver.allocate_span(3);
        let b = solver.allocate_span(3);
        assert_eq!(solver.variable_size(), 8);

        // Releasing the interior span leaves a hole; the next allocation of
        // the same width fills it instead of growing the problem.
        solver.release_span(a);
        assert_eq!(solver.variable_size(), 8);
        let c = solver.allocate_span(3);
        assert_eq!(c, a);
        assert_eq!(solver.variable_size(), 8);

        solver.release_span(b);
        solver.release_span(c);
        assert_eq!(solver.variable_size(), 2);
    }

    #[test]
    fn tail_release_absorbs_free_interior_spans() {
        let mut solver = active_set_solver(2);
        let a = solver.allocate_span(3);
        let b = solver.allocate_span(3);

        solver.release_span(a);
        solver.release_span(b);
        assert_eq!(solver.variable_size(), 2);
    }

    #[test]
    fn repeated_activation_cycles_keep_size_bounded() {
        let mut solver = active_set_solver(4);
        for _ in 0..50 {
            let left = solver.allocate_span(3);
            let right = solver.allocate_span(3);
            solver.release_span(left);
            solver.release_span(right);
        }
        assert_eq!(solver.variable_size(), 4);
    }

    #[test]
    fn registrations_after_a_solve_are_not_stale() {
        let mut solver = active_set_solver(1);
        let h = solver.add_objective(
            Weight::Scalar(1.0),
            model(&[1.0], 1, &[-10.0], VarSpan::new(0, 1)),
        );
        let x = solver.solve().unwrap().x[0];
        assert_relative_eq!(x, 10.0, epsilon = 1e-6);

        // A constraint added after a solve must enter the next one.
        let pin = solver.add_constraint(
            ConstraintKind::Equality,
            model(&[1.0], 1, &[0.0], VarSpan::new(0, 1)),
        );
        let x = solver.solve().unwrap().x[0];
        assert_relative_eq!(x, 0.0, epsilon = 1e-6);

        // So must a removal and an in-place objective update.
        solver.remove_constraint(pin).unwrap();
        solver
            .update_objective(
                h,
                DMatrix::from_element(1, 1, 1.0),
                DVector::from_element(1, -2.0),
            )
            .unwrap();
        let x = solver.solve().unwrap().x[0];
        assert_relative_eq!(x, 2.0, epsilon = 1e-6);

        // And a weight change (scalar optimum is weight-invariant here, so
        // pull it off-center with a second objective first).
        solver.add_objective(
            Weight::Scalar(1.0),
            model(&[1.0], 1, &[0.0], VarSpan::new(0, 1)),
        );
        let x = solver.solve().unwrap().x[0];
        assert_relative_eq!(x, 1.0, epsilon = 1e-6);
        solver.set_objective_weight(h, Weight::Scalar(3.0)).unwrap();
        let x = solver.solve().unwrap().x[0];
        assert_relative_eq!(x, 1.5, epsilon = 1e-6);
    }

    #[test]
    fn inequality_stack_enters_solution() {
        // minimize ||x - 5||² s.t. residual -x + 2 >= 0 (x <= 2).
        let mut solver = active_set_solver(1);
        let obj = model(&[1.0], 1, &[-5.0], VarSpan::new(0, 1));
        solver.add_objective(Weight::Scalar(1.0), obj);
        let cone = model(&[-1.0], 1, &[2.0], VarSpan::new(0, 1));
        solver.add_constraint(ConstraintKind::Inequality, cone);

        solver.assemble().unwrap();
        let sol = solver.solve().unwrap();
        assert_eq!(sol.status, SolveStatus::Optimal);
        assert_relative_eq!(sol.x[0], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn backends_agree() {
        let build = |solver: &mut Solver| {
            let obj = model(
                &[1.0, 0.0, 0.0, 1.0],
                2,
                &[-3.0, 1.0],
                VarSpan::new(0, 2),
            );
            solver.add_objective(Weight::Scalar(1.0), obj);
            let eq = model(&[1.0, 1.0], 1, &[-1.0], VarSpan::new(0, 2));
            solver.add_constraint(ConstraintKind::Equality, eq);
        };

        let mut a = active_set_solver(2);
        build(&mut a);
        a.assemble().unwrap();
        let xa = a.solve().unwrap().x.clone();

        let mut b = Solver::new(2, 1e-8, 1e-9, Box::new(ClarabelBackend::default()));
        build(&mut b);
        b.assemble().unwrap();
        let xb = b.solve().unwrap().x.clone();

        assert_relative_eq!((xa - xb).norm(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn read_span_extracts_sub_solution() {
        let mut solver = active_set_solver(3);
        let obj = model(
            &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            3,
            &[-1.0, -2.0, -3.0],
            VarSpan::new(0, 3),
        );
        solver.add_objective(Weight::Scalar(1.0), obj);
        solver.assemble().unwrap();
        solver.solve().unwrap();

        let tail = solver.read_span(VarSpan::new(1, 2));
        assert_relative_eq!(tail[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(tail[1], 3.0, epsilon = 1e-6);
    }
}
