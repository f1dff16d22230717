//! Hand-rolled dynamics and feature fixtures for controller tests.
//!
//! [`PointMassModel`] is a fully actuated unit-mass model with trivial
//! dynamics quantities, just enough structure for the task linearizations to
//! produce known matrices. [`ConstantFeature`] returns whatever signals it
//! was built with, so a test controls the exact error/Jacobian a task sees.

use std::collections::HashSet;

use nalgebra::{DMatrix, DVector};

use wbc_core::model::{DynamicsModel, Feature};
use wbc_core::types::VarSpan;

// ---------------------------------------------------------------------------
// PointMassModel
// ---------------------------------------------------------------------------

/// Fully actuated point-mass dynamics model.
///
/// Variable layout: accelerations at `0..dof`, torques at `dof..2*dof`. The
/// reduced-formalism action variable aliases the torque range. Inertia is
/// identity and all bias accelerations are zero, so in the reduced formalism
/// `M^-1 J_chi^T` is the identity and the bias vector vanishes.
pub struct PointMassModel {
    dof: usize,
    contact_points: HashSet<String>,
}

impl PointMassModel {
    /// A model with `dof` fully actuated degrees of freedom.
    #[must_use]
    pub fn new(dof: usize) -> Self {
        Self {
            dof,
            contact_points: HashSet::new(),
        }
    }
}

impl DynamicsModel for PointMassModel {
    fn dof_count(&self) -> usize {
        self.dof
    }

    fn internal_dof_count(&self) -> usize {
        self.dof
    }

    fn acceleration_span(&self) -> VarSpan {
        VarSpan::new(0, self.dof)
    }

    fn torque_span(&self) -> VarSpan {
        VarSpan::new(self.dof, self.dof)
    }

    fn action_span(&self) -> VarSpan {
        VarSpan::new(0, self.dof)
    }

    fn com_angular_jacobian(&self) -> DMatrix<f64> {
        DMatrix::zeros(3, self.dof)
    }

    fn com_angular_velocity(&self) -> DVector<f64> {
        DVector::zeros(3)
    }

    fn inertia_inverse_jchi_t(&self) -> DMatrix<f64> {
        DMatrix::identity(self.dof, self.dof)
    }

    fn inertia_inverse_lin_nonlin_grav(&self) -> DVector<f64> {
        DVector::zeros(self.dof)
    }

    fn add_contact_point(&mut self, task: &str) {
        self.contact_points.insert(task.to_owned());
    }

    fn remove_contact_point(&mut self, task: &str) {
        self.contact_points.remove(task);
    }

    fn has_contact_point(&self, task: &str) -> bool {
        self.contact_points.contains(task)
    }
}

// ---------------------------------------------------------------------------
// ConstantFeature
// ---------------------------------------------------------------------------

/// A feature whose signals are fixed by the test.
///
/// Built with builder-style setters; unset signals default to zero. The
/// desired state set through [`Feature::set_desired`] is recorded and
/// subtracted from the error, which is enough to observe command plumbing.
pub struct ConstantFeature {
    dimension: usize,
    dof: usize,
    jacobian: DMatrix<f64>,
    error: DVector<f64>,
    error_dot: DVector<f64>,
    error_ddot: DVector<f64>,
    effort: DVector<f64>,
    desired: DVector<f64>,
}

impl ConstantFeature {
    /// A zero-signal feature of the given task dimension over `dof` joints,
    /// with an identity-block Jacobian.
    #[must_use]
    pub fn new(dimension: usize, dof: usize) -> Self {
        let mut jacobian = DMatrix::zeros(dimension, dof);
        for i in 0..dimension.min(dof) {
            jacobian[(i, i)] = 1.0;
        }
        Self {
            dimension,
            dof,
            jacobian,
            error: DVector::zeros(dimension),
            error_dot: DVector::zeros(dimension),
            error_ddot: DVector::zeros(dimension),
            effort: DVector::zeros(dimension),
            desired: DVector::zeros(dimension),
        }
    }

    /// Replace the Jacobian.
    #[must_use]
    pub fn with_jacobian(mut self, jacobian: DMatrix<f64>) -> Self {
        assert_eq!(jacobian.nrows(), self.dimension);
        assert_eq!(jacobian.ncols(), self.dof);
        self.jacobian = jacobian;
        self
    }

    /// Replace the error signal.
    #[must_use]
    pub fn with_error(mut self, error: &[f64]) -> Self {
        assert_eq!(error.len(), self.dimension);
        self.error = DVector::from_row_slice(error);
        self
    }

    /// Replace the error-rate signal.
    #[must_use]
    pub fn with_error_dot(mut self, error_dot: &[f64]) -> Self {
        assert_eq!(error_dot.len(), self.dimension);
        self.error_dot = DVector::from_row_slice(error_dot);
        self
    }

    /// Replace the feedforward error-acceleration signal.
    #[must_use]
    pub fn with_error_ddot(mut self, error_ddot: &[f64]) -> Self {
        assert_eq!(error_ddot.len(), self.dimension);
        self.error_ddot = DVector::from_row_slice(error_ddot);
        self
    }

    /// Replace the effort signal.
    #[must_use]
    pub fn with_effort(mut self, effort: &[f64]) -> Self {
        assert_eq!(effort.len(), self.dimension);
        self.effort = DVector::from_row_slice(effort);
        self
    }

    /// The last desired state received through [`Feature::set_desired`].
    #[must_use]
    pub fn desired(&self) -> &DVector<f64> {
        &self.desired
    }
}

impl Feature for ConstantFeature {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn jacobian(&self) -> DMatrix<f64> {
        self.jacobian.clone()
    }

    fn error(&self) -> DVector<f64> {
        &self.error - &self.desired
    }

    fn error_dot(&self) -> DVector<f64> {
        self.error_dot.clone()
    }

    fn error_ddot(&self) -> DVector<f64> {
        self.error_ddot.clone()
    }

    fn effort(&self) -> DVector<f64> {
        self.effort.clone()
    }

    fn set_desired(&mut self, state: &[f64]) {
        if state.len() == self.dimension {
            self.desired = DVector::from_row_slice(state);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_mass_layout() {
        let model = PointMassModel::new(3);
        assert_eq!(model.variable_size(false), 6);
        assert_eq!(model.variable_size(true), 3);
        assert_eq!(model.acceleration_span(), VarSpan::new(0, 3));
        assert_eq!(model.torque_span(), VarSpan::new(3, 3));
    }

    #[test]
    fn contact_points_are_idempotent() {
        let mut model = PointMassModel::new(2);
        assert!(!model.has_contact_point("foot"));
        model.add_contact_point("foot");
        model.add_contact_point("foot");
        assert!(model.has_contact_point("foot"));
        model.remove_contact_point("foot");
        assert!(!model.has_contact_point("foot"));
    }

    #[test]
    fn desired_state_shifts_error() {
        let mut feature = ConstantFeature::new(2, 2).with_error(&[0.5, 0.5]);
        feature.set_desired(&[0.5, 0.0]);
        let e = feature.error();
        assert!((e[0]).abs() < 1e-12);
        assert!((e[1] - 0.5).abs() < 1e-12);
    }
}
