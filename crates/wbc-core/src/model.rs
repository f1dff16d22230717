//! Boundary traits for the external collaborators of the controller core.
//!
//! The rigid-body dynamics model and the feature/trajectory machinery are
//! not part of this workspace; these traits specify exactly what the task
//! linearization consumes from them each cycle.

use nalgebra::{DMatrix, DVector};

use crate::types::VarSpan;

// ---------------------------------------------------------------------------
// DynamicsModel
// ---------------------------------------------------------------------------

/// Whole-body dynamics and kinematics supplied by an external model.
///
/// The model also owns the layout of the shared optimization variable for
/// the dynamic quantities: the spans of the generalized-acceleration and
/// joint-torque sub-variables (full formalism) and of the action variable
/// (reduced formalism). Contact-force variables are allocated by the solver,
/// not the model.
pub trait DynamicsModel {
    /// Total degrees of freedom (including any floating base).
    fn dof_count(&self) -> usize;

    /// Actuated (internal) degrees of freedom.
    fn internal_dof_count(&self) -> usize;

    /// Span of the generalized-acceleration sub-variable.
    fn acceleration_span(&self) -> VarSpan;

    /// Span of the joint-torque sub-variable.
    fn torque_span(&self) -> VarSpan;

    /// Span of the action variable of the reduced formalism.
    fn action_span(&self) -> VarSpan;

    /// Problem size for the chosen formalism, excluding contact forces.
    fn variable_size(&self, reduced: bool) -> usize {
        if reduced {
            self.action_span().end()
        } else {
            self.acceleration_span().end().max(self.torque_span().end())
        }
    }

    /// Centroidal angular Jacobian (3 x dof).
    fn com_angular_jacobian(&self) -> DMatrix<f64>;

    /// Centroidal angular velocity (3-vector).
    fn com_angular_velocity(&self) -> DVector<f64>;

    /// `M^-1 * J_chi^T`: maps the action variable to accelerations
    /// (reduced formalism only).
    fn inertia_inverse_jchi_t(&self) -> DMatrix<f64>;

    /// `M^-1 * (linear + nonlinear + gravity)` bias accelerations
    /// (reduced formalism only).
    fn inertia_inverse_lin_nonlin_grav(&self) -> DVector<f64>;

    /// Declare a contact point for the named task.
    ///
    /// Idempotent: declaring an already-present point is a no-op.
    fn add_contact_point(&mut self, task: &str);

    /// Remove the contact point of the named task, if present.
    fn remove_contact_point(&mut self, task: &str);

    /// Whether the named task currently has a contact point.
    fn has_contact_point(&self, task: &str) -> bool;
}

// ---------------------------------------------------------------------------
// Feature
// ---------------------------------------------------------------------------

/// Per-task error signals produced by the feature/trajectory layer.
///
/// A feature compares the current state against a desired state and exposes
/// the task-space error, its derivatives, and (for torque/force tasks) the
/// measured effort, all refreshed by the external layer before each cycle.
pub trait Feature {
    /// Task-space dimension.
    fn dimension(&self) -> usize;

    /// Task Jacobian (dimension x dof).
    fn jacobian(&self) -> DMatrix<f64>;

    /// Task-space error.
    fn error(&self) -> DVector<f64>;

    /// Task-space error rate.
    fn error_dot(&self) -> DVector<f64>;

    /// Task-space error acceleration (feedforward term).
    fn error_ddot(&self) -> DVector<f64>;

    /// Measured or reference effort (torque/force tasks).
    fn effort(&self) -> DVector<f64>;

    /// Replace the desired state the error is measured against.
    ///
    /// Features without an externally settable target ignore the call.
    fn set_desired(&mut self, _state: &[f64]) {}
}
