//! The cycle loop.
//!
//! [`Controller`] owns the solver, the dynamics model, and every registered
//! task. One [`step`](Controller::step) runs the full cycle:
//!
//! 1. drain the command queue and apply every pending request,
//! 2. refresh each task's linear model from the current signals,
//! 3. assemble and solve the QP,
//! 4. on an optimal solve, latch the solution; otherwise hold the previous
//!    one and report the backend's status.
//!
//! Holding the last optimal solution keeps the commanded torques continuous
//! across a transiently infeasible cycle; the caller sees the failure in the
//! returned status and decides whether to keep running.

use std::collections::BTreeMap;

use log::{debug, warn};
use nalgebra::DVector;

use wbc_command::{CommandQueue, CommandSender, TaskRequest};
use wbc_core::config::ControllerConfig;
use wbc_core::error::{TaskError, WbcError};
use wbc_core::model::DynamicsModel;
use wbc_core::types::{VarSpan, Weight};
use wbc_solver::backend::{backend_for, SolveStatus};
use wbc_solver::solver::Solver;
use wbc_task::task::Task;

/// Whole-body controller over one dynamics model.
pub struct Controller {
    config: ControllerConfig,
    solver: Solver,
    dynamics: Box<dyn DynamicsModel>,
    tasks: BTreeMap<String, Task>,
    queue: CommandQueue,
    held: DVector<f64>,
    status: SolveStatus,
    cycle: u64,
}

impl Controller {
    /// Build a controller for `dynamics` under `config`.
    ///
    /// # Errors
    ///
    /// Configuration validation failures, or backend construction failures.
    pub fn new(
        config: ControllerConfig,
        dynamics: Box<dyn DynamicsModel>,
    ) -> Result<Self, WbcError> {
        config.validate()?;
        let backend = backend_for(config.backend)?;
        let n = dynamics.variable_size(config.reduced_formalism);
        let solver = Solver::new(
            n,
            config.reduction_tolerance,
            config.regularization,
            backend,
        );
        Ok(Self {
            config,
            solver,
            dynamics,
            tasks: BTreeMap::new(),
            queue: CommandQueue::new(),
            held: DVector::zeros(n),
            status: SolveStatus::Optimal,
            cycle: 0,
        })
    }

    /// A sending end of the command queue.
    #[must_use]
    pub fn sender(&self) -> CommandSender {
        self.queue.sender()
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Completed cycle count.
    #[must_use]
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    // -- task registry ------------------------------------------------------

    /// Connect `task` to this controller and register it by name.
    ///
    /// # Errors
    ///
    /// [`TaskError::AlreadyConnected`] if a task of the same name exists, or
    /// any connect-time validation failure of the task itself.
    pub fn add_task(&mut self, mut task: Task) -> Result<(), WbcError> {
        if self.tasks.contains_key(task.name()) {
            return Err(TaskError::AlreadyConnected(task.name().to_owned()).into());
        }
        task.connect(self.dynamics.as_ref(), &self.config)?;
        debug!("task '{}' connected ({:?})", task.name(), task.task_type());
        self.tasks.insert(task.name().to_owned(), task);
        Ok(())
    }

    /// Deactivate, disconnect, and drop the named task.
    pub fn remove_task(&mut self, name: &str) -> Result<(), WbcError> {
        let mut task = self
            .tasks
            .remove(name)
            .ok_or_else(|| TaskError::Unknown(name.to_owned()))?;
        task.disconnect(&mut self.solver, self.dynamics.as_mut())?;
        Ok(())
    }

    /// The named task, if registered.
    #[must_use]
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    /// Registered task names, in iteration order.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    // -- direct task control ------------------------------------------------

    /// Activate the named task as a weighted objective, immediately.
    pub fn activate_as_objective(&mut self, name: &str) -> Result<(), WbcError> {
        let task = entry(&mut self.tasks, name)?;
        Ok(task.activate_as_objective(&mut self.solver, self.dynamics.as_mut())?)
    }

    /// Activate the named task as an equality constraint, immediately.
    pub fn activate_as_constraint(&mut self, name: &str) -> Result<(), WbcError> {
        let task = entry(&mut self.tasks, name)?;
        Ok(task.activate_as_constraint(&mut self.solver, self.dynamics.as_mut())?)
    }

    /// Deactivate the named task, immediately.
    pub fn deactivate(&mut self, name: &str) -> Result<(), WbcError> {
        let task = entry(&mut self.tasks, name)?;
        Ok(task.deactivate(&mut self.solver, self.dynamics.as_mut())?)
    }

    // -- the cycle ----------------------------------------------------------

    /// Run one control cycle and return the backend's status.
    ///
    /// # Errors
    ///
    /// Command application and assembly errors. A numerically failed solve
    /// is not an `Err`: it comes back as a non-optimal [`SolveStatus`] with
    /// the previous solution held.
    pub fn step(&mut self) -> Result<SolveStatus, WbcError> {
        self.apply_commands()?;

        for task in self.tasks.values_mut() {
            task.update(&mut self.solver, self.dynamics.as_ref())?;
        }

        self.solver.assemble().map_err(WbcError::Solver)?;
        let solution = self.solver.solve().map_err(WbcError::Solver)?;
        self.status = solution.status;
        if self.status.is_optimal() {
            self.held = solution.x.clone();
        } else {
            warn!(
                "cycle {}: QP returned {:?}; holding previous solution",
                self.cycle, self.status
            );
        }
        self.cycle += 1;
        Ok(self.status)
    }

    fn apply_commands(&mut self) -> Result<(), WbcError> {
        for command in self.queue.drain() {
            let Some(task) = self.tasks.get_mut(&command.task) else {
                warn!("dropping command for unknown task '{}'", command.task);
                continue;
            };
            debug!("applying {:?} to task '{}'", command.request, command.task);
            let solver = &mut self.solver;
            let result = match command.request {
                TaskRequest::ActivateAsObjective => {
                    task.activate_as_objective(solver, self.dynamics.as_mut())
                }
                TaskRequest::ActivateAsConstraint => {
                    task.activate_as_constraint(solver, self.dynamics.as_mut())
                }
                TaskRequest::Deactivate => task.deactivate(solver, self.dynamics.as_mut()),
                TaskRequest::SetStiffness(kp) => task.set_stiffness(kp),
                TaskRequest::SetStiffnessDiag(diag) => task.set_stiffness_diag(&diag),
                TaskRequest::SetDamping(kd) => task.set_damping(kd),
                TaskRequest::SetDampingDiag(diag) => task.set_damping_diag(&diag),
                TaskRequest::SetWeight(w) => task.set_weight(solver, Weight::Scalar(w)),
                TaskRequest::SetWeightPerAxis(w) => {
                    task.set_weight(solver, Weight::PerAxis(DVector::from_vec(w)))
                }
                TaskRequest::SetDesiredState(state) => {
                    task.set_desired(&state);
                    Ok(())
                }
                TaskRequest::ActivateContactMode => task.activate_contact_mode(solver),
                TaskRequest::DeactivateContactMode => task.deactivate_contact_mode(solver),
                TaskRequest::SetFrictionCoefficient(mu) => {
                    task.set_friction_coefficient(solver, mu)
                }
                TaskRequest::SetMargin(margin) => task.set_margin(solver, margin),
            };
            result?;
        }
        Ok(())
    }

    // -- readouts -----------------------------------------------------------

    /// Status of the most recent cycle.
    #[must_use]
    pub const fn status(&self) -> SolveStatus {
        self.status
    }

    /// The latched solution vector (last optimal solve).
    #[must_use]
    pub const fn solution(&self) -> &DVector<f64> {
        &self.held
    }

    /// Latched generalized accelerations (full formalism layout).
    #[must_use]
    pub fn acceleration(&self) -> DVector<f64> {
        self.read(self.dynamics.acceleration_span())
    }

    /// Latched joint torques (full formalism layout).
    #[must_use]
    pub fn torque(&self) -> DVector<f64> {
        self.read(self.dynamics.torque_span())
    }

    /// Latched contact force of the named force task, while activated.
    #[must_use]
    pub fn computed_force(&self, name: &str) -> Option<DVector<f64>> {
        let span = self.tasks.get(name)?.force_span()?;
        Some(self.read(span))
    }

    /// Current task-space error of the named task.
    #[must_use]
    pub fn task_error(&self, name: &str) -> Option<DVector<f64>> {
        self.tasks.get(name).map(Task::error)
    }

    fn read(&self, span: VarSpan) -> DVector<f64> {
        if span.fits(self.held.len()) {
            self.held.rows(span.offset, span.len).clone_owned()
        } else {
            DVector::zeros(span.len)
        }
    }
}

fn entry<'a>(
    tasks: &'a mut BTreeMap<String, Task>,
    name: &str,
) -> Result<&'a mut Task, WbcError> {
    tasks
        .get_mut(name)
        .ok_or_else(|| TaskError::Unknown(name.to_owned()).into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wbc_core::error::ConfigError;
    use wbc_core::types::TaskType;
    use wbc_test_utils::{ConstantFeature, PointMassModel};

    fn controller(dof: usize) -> Controller {
        let mut config = ControllerConfig::default();
        config.backend = wbc_core::config::BackendKind::ActiveSet;
        Controller::new(config, Box::new(PointMassModel::new(dof))).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = ControllerConfig::default();
        config.cycle_dt = -1.0;
        let result = Controller::new(config, Box::new(PointMassModel::new(1)));
        assert!(matches!(
            result,
            Err(WbcError::Config(ConfigError::InvalidCycleDt(_)))
        ));
    }

    #[test]
    fn duplicate_task_names_are_rejected() {
        let mut controller = controller(1);
        let defaults = controller.config().task_defaults.clone();
        let mk = || {
            Task::new(
                "reach",
                TaskType::Acceleration,
                Box::new(ConstantFeature::new(1, 1)),
                &defaults,
            )
        };
        controller.add_task(mk()).unwrap();
        assert!(matches!(
            controller.add_task(mk()),
            Err(WbcError::Task(TaskError::AlreadyConnected(_)))
        ));
    }

    #[test]
    fn remove_unknown_task_errors() {
        let mut controller = controller(1);
        assert!(matches!(
            controller.remove_task("ghost"),
            Err(WbcError::Task(TaskError::Unknown(_)))
        ));
    }

    #[test]
    fn step_with_no_tasks_is_optimal() {
        let mut controller = controller(2);
        let status = controller.step().unwrap();
        assert_eq!(status, SolveStatus::Optimal);
        assert_eq!(controller.cycle(), 1);
        assert_eq!(controller.solution().len(), 4);
    }
}
