//! Top-level whole-body controller crate.
//!
//! Wires the task layer, the QP solver, and the command queue into one
//! [`Controller`](controller::Controller) driven by a fixed-rate cycle loop.

pub mod controller;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::controller::Controller;
    pub use wbc_command::{Command, CommandSender, TaskRequest};
    pub use wbc_core::config::{BackendKind, ControllerConfig};
    pub use wbc_core::error::WbcError;
    pub use wbc_core::model::{DynamicsModel, Feature};
    pub use wbc_core::types::{ActivationMode, ContactState, TaskType, Weight};
    pub use wbc_solver::backend::SolveStatus;
    pub use wbc_task::task::Task;
}
