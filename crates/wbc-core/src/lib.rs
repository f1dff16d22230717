// wbc-core: Types, traits, config, and errors for the whole-body QP controller.

pub mod config;
pub mod error;
pub mod model;
pub mod types;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::config::{BackendKind, ControllerConfig, FrictionDefaults, TaskDefaults};
    pub use crate::error::{ConfigError, SolverError, TaskError, WbcError};
    pub use crate::model::{DynamicsModel, Feature};
    pub use crate::types::{ActivationMode, ContactState, TaskType, VarSpan, Weight};
}
