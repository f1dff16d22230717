//! Task lifecycle and per-type linearization.
//!
//! A task wraps one feature and turns its signals into a linear residual
//! `A·x + b` over the span of the optimization variable its type acts on.
//! The lifecycle is connect → activate (objective or constraint) → update
//! each cycle → deactivate → disconnect; every solver registration made on
//! activation is removed again on deactivation, tracked by handle.
//!
//! Force tasks carry extra machinery: activation allocates a fresh 3-vector
//! force sub-variable, declares a contact point on the dynamics model, and
//! registers a contact-side constraint that is either a zero-force equality
//! (out of contact) or a linearized friction cone (in contact).

use log::debug;
use nalgebra::{DMatrix, DVector};

use wbc_core::config::{ControllerConfig, TaskDefaults};
use wbc_core::error::{ConfigError, SolverError, TaskError};
use wbc_core::model::{DynamicsModel, Feature};
use wbc_core::types::{ActivationMode, ContactState, TaskType, VarSpan, Weight};
use wbc_solver::linear::LinearModel;
use wbc_solver::solver::{ConstraintHandle, ConstraintKind, ObjectiveHandle, Solver};

use crate::friction::FrictionCone;

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

struct ContactData {
    state: ContactState,
    cone: FrictionCone,
    /// Zero-force equality or cone inequality, depending on `state`.
    side: Option<ConstraintHandle>,
}

/// One controllable objective or constraint over the shared variable.
pub struct Task {
    name: String,
    task_type: TaskType,
    feature: Box<dyn Feature>,
    dimension: usize,
    connected: bool,
    reduced: bool,
    mode: ActivationMode,
    weight: Weight,
    kp: DMatrix<f64>,
    kd: DMatrix<f64>,
    span: Option<VarSpan>,
    objective: Option<ObjectiveHandle>,
    constraint: Option<ConstraintHandle>,
    contact: Option<ContactData>,
}

impl Task {
    /// Build a task around a feature, seeding weight and gains from the
    /// configured defaults. The type is fixed for the task's lifetime.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        task_type: TaskType,
        feature: Box<dyn Feature>,
        defaults: &TaskDefaults,
    ) -> Self {
        let dimension = feature.dimension();
        Self {
            name: name.into(),
            task_type,
            feature,
            dimension,
            connected: false,
            reduced: false,
            mode: ActivationMode::Inactive,
            weight: Weight::Scalar(defaults.weight),
            kp: DMatrix::from_diagonal_element(dimension, dimension, defaults.stiffness),
            kd: DMatrix::from_diagonal_element(dimension, dimension, defaults.damping),
            span: None,
            objective: None,
            constraint: None,
            contact: None,
        }
    }

    // -- lifecycle ----------------------------------------------------------

    /// Bind the task to a controller's variable layout.
    ///
    /// Resolves the span the task's type acts on (force tasks defer span
    /// allocation to activation) and prepares contact bookkeeping for 3-D
    /// force tasks.
    ///
    /// # Errors
    ///
    /// [`TaskError::TypeUnset`] if no type was chosen,
    /// [`TaskError::AlreadyConnected`] on a second connect, and
    /// [`TaskError::NotAContactTask`] for a force task that is not 3-D.
    pub fn connect(
        &mut self,
        model: &dyn DynamicsModel,
        config: &ControllerConfig,
    ) -> Result<(), TaskError> {
        if self.connected {
            return Err(TaskError::AlreadyConnected(self.name.clone()));
        }
        self.reduced = config.reduced_formalism;
        match self.task_type {
            TaskType::Unset => return Err(TaskError::TypeUnset(self.name.clone())),
            TaskType::Acceleration | TaskType::CoMMomentum => {
                self.span = Some(if self.reduced {
                    model.action_span()
                } else {
                    model.acceleration_span()
                });
            }
            TaskType::Torque => {
                self.span = Some(model.torque_span());
            }
            TaskType::Force => {
                if self.dimension != 3 {
                    return Err(TaskError::NotAContactTask(
                        self.name.clone(),
                        self.task_type,
                        self.dimension,
                    ));
                }
                self.contact = Some(ContactData {
                    state: ContactState::NoContact,
                    cone: FrictionCone::new(&config.friction),
                    side: None,
                });
            }
        }
        self.connected = true;
        Ok(())
    }

    /// Undo a connect, deactivating first if needed. A no-op on an already
    /// disconnected task.
    pub fn disconnect(
        &mut self,
        solver: &mut Solver,
        model: &mut dyn DynamicsModel,
    ) -> Result<(), TaskError> {
        if !self.connected {
            return Ok(());
        }
        self.deactivate(solver, model)?;
        self.connected = false;
        self.span = None;
        self.contact = None;
        Ok(())
    }

    /// Register the task as a weighted objective. Idempotent; switches mode
    /// if the task is currently a constraint.
    pub fn activate_as_objective(
        &mut self,
        solver: &mut Solver,
        model: &mut dyn DynamicsModel,
    ) -> Result<(), TaskError> {
        self.ensure_connected()?;
        if self.mode == ActivationMode::Objective {
            return Ok(());
        }
        if self.mode == ActivationMode::Constraint {
            self.deactivate(solver, model)?;
        }
        self.begin_activation(solver, model)?;
        let lm = self.linear_model(model)?;
        self.objective = Some(solver.add_objective(self.weight.clone(), lm));
        self.mode = ActivationMode::Objective;
        debug!("task '{}' activated as objective", self.name);
        Ok(())
    }

    /// Register the task as a hard equality constraint. Idempotent; switches
    /// mode if the task is currently an objective.
    pub fn activate_as_constraint(
        &mut self,
        solver: &mut Solver,
        model: &mut dyn DynamicsModel,
    ) -> Result<(), TaskError> {
        self.ensure_connected()?;
        if self.mode == ActivationMode::Constraint {
            return Ok(());
        }
        if self.mode == ActivationMode::Objective {
            self.deactivate(solver, model)?;
        }
        self.begin_activation(solver, model)?;
        let lm = self.linear_model(model)?;
        self.constraint = Some(solver.add_constraint(ConstraintKind::Equality, lm));
        self.mode = ActivationMode::Constraint;
        debug!("task '{}' activated as constraint", self.name);
        Ok(())
    }

    /// Remove every registration made on activation. Idempotent.
    pub fn deactivate(
        &mut self,
        solver: &mut Solver,
        model: &mut dyn DynamicsModel,
    ) -> Result<(), TaskError> {
        if self.mode == ActivationMode::Inactive {
            return Ok(());
        }
        let name = self.name.clone();
        if let Some(h) = self.objective.take() {
            solver
                .remove_objective(h)
                .map_err(|e| TaskError::Solver(name.clone(), e))?;
        }
        if let Some(h) = self.constraint.take() {
            solver
                .remove_constraint(h)
                .map_err(|e| TaskError::Solver(name.clone(), e))?;
        }
        if self.task_type == TaskType::Force {
            if let Some(contact) = &mut self.contact {
                if let Some(h) = contact.side.take() {
                    solver
                        .remove_constraint(h)
                        .map_err(|e| TaskError::Solver(name, e))?;
                }
            }
            if let Some(span) = self.span.take() {
                solver.release_span(span);
            }
            model.remove_contact_point(&self.name);
        }
        self.mode = ActivationMode::Inactive;
        debug!("task '{}' deactivated", self.name);
        Ok(())
    }

    /// Recompute the linear model from the current feature and dynamics
    /// signals and push it into the solver. A no-op while inactive.
    pub fn update(
        &mut self,
        solver: &mut Solver,
        model: &dyn DynamicsModel,
    ) -> Result<(), TaskError> {
        if self.mode == ActivationMode::Inactive {
            return Ok(());
        }
        let (a, b) = self.compute_model(model)?;
        let result = match (self.objective, self.constraint) {
            (Some(h), _) => solver.update_objective(h, a, b),
            (_, Some(h)) => solver.update_constraint(h, a, b),
            _ => Ok(()),
        };
        result.map_err(|e| TaskError::Solver(self.name.clone(), e))
    }

    // -- contact ------------------------------------------------------------

    /// Switch the contact side to the friction-cone inequality.
    pub fn activate_contact_mode(&mut self, solver: &mut Solver) -> Result<(), TaskError> {
        self.set_contact_state(solver, ContactState::InContact)
    }

    /// Switch the contact side back to the zero-force equality.
    pub fn deactivate_contact_mode(&mut self, solver: &mut Solver) -> Result<(), TaskError> {
        self.set_contact_state(solver, ContactState::NoContact)
    }

    fn set_contact_state(
        &mut self,
        solver: &mut Solver,
        state: ContactState,
    ) -> Result<(), TaskError> {
        self.ensure_connected()?;
        let name = self.name.clone();
        let span = self.span;
        let contact = self.contact.as_mut().ok_or(TaskError::NotAContactTask(
            name.clone(),
            self.task_type,
            self.dimension,
        ))?;
        if contact.state == state {
            return Ok(());
        }
        contact.state = state;
        // While inactive there is nothing registered; the new state takes
        // effect on the next activation.
        if let (Some(h), Some(span)) = (contact.side.take(), span) {
            solver
                .remove_constraint(h)
                .map_err(|e| TaskError::Solver(name.clone(), e))?;
            let h = register_side(solver, span, contact)
                .map_err(|e| TaskError::Solver(name, e))?;
            contact.side = Some(h);
        }
        Ok(())
    }

    /// Replace the friction coefficient, refreshing a registered cone in
    /// place. The facet count never changes here, so the row count of the
    /// registered inequality is preserved.
    pub fn set_friction_coefficient(
        &mut self,
        solver: &mut Solver,
        mu: f64,
    ) -> Result<(), TaskError> {
        self.ensure_connected()?;
        let name = self.name.clone();
        let contact = self.contact.as_mut().ok_or(TaskError::NotAContactTask(
            name.clone(),
            self.task_type,
            self.dimension,
        ))?;
        contact
            .cone
            .set_coefficient(mu)
            .map_err(|e| TaskError::Invalid(name.clone(), e))?;
        refresh_cone(solver, contact, &name)
    }

    /// Replace the friction margin, refreshing a registered cone in place.
    pub fn set_margin(&mut self, solver: &mut Solver, margin: f64) -> Result<(), TaskError> {
        self.ensure_connected()?;
        let name = self.name.clone();
        let contact = self.contact.as_mut().ok_or(TaskError::NotAContactTask(
            name.clone(),
            self.task_type,
            self.dimension,
        ))?;
        contact.cone.set_margin(margin);
        refresh_cone(solver, contact, &name)
    }

    // -- parameters ---------------------------------------------------------

    /// Replace the objective weight, live if the task is registered.
    pub fn set_weight(&mut self, solver: &mut Solver, weight: Weight) -> Result<(), TaskError> {
        weight
            .validate()
            .map_err(|e| TaskError::Invalid(self.name.clone(), e))?;
        self.weight = weight.clone();
        if let Some(h) = self.objective {
            solver
                .set_objective_weight(h, weight)
                .map_err(|e| TaskError::Solver(self.name.clone(), e))?;
        }
        Ok(())
    }

    /// Uniform proportional gain.
    pub fn set_stiffness(&mut self, kp: f64) -> Result<(), TaskError> {
        if kp < 0.0 {
            return Err(TaskError::Invalid(
                self.name.clone(),
                ConfigError::NegativeGain(kp),
            ));
        }
        self.kp = DMatrix::from_diagonal_element(self.dimension, self.dimension, kp);
        Ok(())
    }

    /// Per-axis proportional gains (diagonal).
    pub fn set_stiffness_diag(&mut self, diag: &[f64]) -> Result<(), TaskError> {
        self.kp = self.gain_matrix(diag)?;
        Ok(())
    }

    /// Uniform derivative gain.
    pub fn set_damping(&mut self, kd: f64) -> Result<(), TaskError> {
        if kd < 0.0 {
            return Err(TaskError::Invalid(
                self.name.clone(),
                ConfigError::NegativeGain(kd),
            ));
        }
        self.kd = DMatrix::from_diagonal_element(self.dimension, self.dimension, kd);
        Ok(())
    }

    /// Per-axis derivative gains (diagonal).
    pub fn set_damping_diag(&mut self, diag: &[f64]) -> Result<(), TaskError> {
        self.kd = self.gain_matrix(diag)?;
        Ok(())
    }

    fn gain_matrix(&self, diag: &[f64]) -> Result<DMatrix<f64>, TaskError> {
        if diag.len() != self.dimension {
            return Err(TaskError::Invalid(
                self.name.clone(),
                ConfigError::InvalidValue {
                    field: "gain".into(),
                    message: format!(
                        "{} entries for a {}-dimensional task",
                        diag.len(),
                        self.dimension
                    ),
                },
            ));
        }
        if let Some(bad) = diag.iter().find(|v| **v < 0.0) {
            return Err(TaskError::Invalid(
                self.name.clone(),
                ConfigError::NegativeGain(*bad),
            ));
        }
        Ok(DMatrix::from_diagonal(&DVector::from_row_slice(diag)))
    }

    /// Forward a new desired state to the feature.
    pub fn set_desired(&mut self, state: &[f64]) {
        self.feature.set_desired(state);
    }

    // -- readouts -----------------------------------------------------------

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn task_type(&self) -> TaskType {
        self.task_type
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub const fn mode(&self) -> ActivationMode {
        self.mode
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Contact state, for 3-D force tasks.
    #[must_use]
    pub fn contact_state(&self) -> Option<ContactState> {
        self.contact.as_ref().map(|c| c.state)
    }

    /// Friction coefficient of the task's cone, for 3-D force tasks.
    #[must_use]
    pub fn friction_coefficient(&self) -> Option<f64> {
        self.contact.as_ref().map(|c| c.cone.coefficient())
    }

    /// Span of the force sub-variable, while an activated force task.
    #[must_use]
    pub fn force_span(&self) -> Option<VarSpan> {
        if self.task_type == TaskType::Force {
            self.span
        } else {
            None
        }
    }

    /// Current task-space error as reported by the feature.
    #[must_use]
    pub fn error(&self) -> DVector<f64> {
        self.feature.error()
    }

    #[must_use]
    pub const fn weight(&self) -> &Weight {
        &self.weight
    }

    // -- linearization ------------------------------------------------------

    fn ensure_connected(&self) -> Result<(), TaskError> {
        if self.connected {
            Ok(())
        } else {
            Err(TaskError::NotConnected(self.name.clone()))
        }
    }

    /// Force-task activation prologue: allocate the force sub-variable,
    /// declare the contact point, register the contact-side constraint.
    fn begin_activation(
        &mut self,
        solver: &mut Solver,
        model: &mut dyn DynamicsModel,
    ) -> Result<(), TaskError> {
        if self.task_type != TaskType::Force {
            return Ok(());
        }
        let span = solver.allocate_span(3);
        self.span = Some(span);
        model.add_contact_point(&self.name);
        let name = self.name.clone();
        if let Some(contact) = &mut self.contact {
            let h = register_side(solver, span, contact)
                .map_err(|e| TaskError::Solver(name, e))?;
            contact.side = Some(h);
        }
        Ok(())
    }

    fn linear_model(&self, model: &dyn DynamicsModel) -> Result<LinearModel, TaskError> {
        let span = self
            .span
            .ok_or_else(|| TaskError::NotConnected(self.name.clone()))?;
        let (a, b) = self.compute_model(model)?;
        LinearModel::new(a, b, span).map_err(|e| TaskError::Solver(self.name.clone(), e))
    }

    /// The `(A, b)` of the residual `A·x + b` for the task's type.
    fn compute_model(
        &self,
        model: &dyn DynamicsModel,
    ) -> Result<(DMatrix<f64>, DVector<f64>), TaskError> {
        match self.task_type {
            TaskType::Acceleration => {
                let j = self.feature.jacobian();
                let acc_des = -(self.feature.error_ddot()
                    + &self.kp * self.feature.error()
                    + &self.kd * self.feature.error_dot());
                Ok(self.acceleration_rows(model, j, acc_des))
            }
            TaskType::CoMMomentum => {
                let j = model.com_angular_jacobian();
                let acc_des = -(&self.kd * model.com_angular_velocity());
                Ok(self.acceleration_rows(model, j, acc_des))
            }
            TaskType::Torque => {
                let j = self.feature.jacobian();
                let internal = model.internal_dof_count();
                // Floating-base columns come first; torque rows only cover
                // the actuated part.
                let a = if j.ncols() > internal {
                    j.columns(j.ncols() - internal, internal).clone_owned()
                } else {
                    j
                };
                Ok((a, -self.feature.effort()))
            }
            TaskType::Force => Ok((DMatrix::identity(3, 3), -self.feature.effort())),
            TaskType::Unset => Err(TaskError::TypeUnset(self.name.clone())),
        }
    }

    /// Acceleration-level rows in the chosen formalism.
    ///
    /// Full: `A = J`, `b = acc_des`. Reduced: substituting the dynamics
    /// `q_ddot = M^-1 J_chi^T chi + M^-1 (lin + nonlin + grav)` gives
    /// `A = -J M^-1 J_chi^T`, `b = acc_des + J M^-1 (lin + nonlin + grav)`.
    fn acceleration_rows(
        &self,
        model: &dyn DynamicsModel,
        j: DMatrix<f64>,
        acc_des: DVector<f64>,
    ) -> (DMatrix<f64>, DVector<f64>) {
        if self.reduced {
            let a = -(&j * model.inertia_inverse_jchi_t());
            let b = acc_des + j * model.inertia_inverse_lin_nonlin_grav();
            (a, b)
        } else {
            (j, acc_des)
        }
    }
}

fn register_side(
    solver: &mut Solver,
    span: VarSpan,
    contact: &ContactData,
) -> Result<ConstraintHandle, SolverError> {
    match contact.state {
        ContactState::NoContact => {
            let lm = LinearModel::new(DMatrix::identity(3, 3), DVector::zeros(3), span)?;
            Ok(solver.add_constraint(ConstraintKind::Equality, lm))
        }
        ContactState::InContact => {
            let (a, b) = contact.cone.rows();
            let lm = LinearModel::new(a, b, span)?;
            Ok(solver.add_constraint(ConstraintKind::Inequality, lm))
        }
    }
}

fn refresh_cone(
    solver: &mut Solver,
    contact: &ContactData,
    name: &str,
) -> Result<(), TaskError> {
    if contact.state == ContactState::InContact {
        if let Some(h) = contact.side {
            let (a, b) = contact.cone.rows();
            solver
                .update_constraint(h, a, b)
                .map_err(|e| TaskError::Solver(name.to_owned(), e))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
