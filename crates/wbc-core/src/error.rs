use thiserror::Error;

/// Top-level error type for the whole-body controller.
#[derive(Debug, Error)]
pub enum WbcError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid cycle_dt: {0} (must be > 0)")]
    InvalidCycleDt(f64),

    #[error("Invalid reduction tolerance: {0} (must be > 0)")]
    InvalidTolerance(f64),

    #[error("Negative weight: {0}")]
    NegativeWeight(f64),

    #[error("Negative gain: {0}")]
    NegativeGain(f64),

    #[error("Invalid friction coefficient: {0} (must be > 0)")]
    InvalidFrictionCoefficient(f64),

    #[error("Invalid friction facet count: {0} (must be >= 3)")]
    InvalidFacetCount(usize),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Task lifecycle errors.
///
/// `TypeUnset` and `UnknownType` are the fatal configuration errors of the
/// connect path; the remaining variants are sequencing violations (an
/// operation that requires a prior successful connect, or a contact-mode
/// operation on a task that cannot carry contact state).
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task '{0}': type has not been set; choose a task type before connecting")]
    TypeUnset(String),

    #[error("task '{0}': already connected to a controller; disconnect first")]
    AlreadyConnected(String),

    #[error("task '{0}': not connected to a controller; connect before activating or updating")]
    NotConnected(String),

    #[error("no task named '{0}' is registered")]
    Unknown(String),

    #[error("task '{0}': contact mode requires a 3-D force task (type {1:?}, dimension {2})")]
    NotAContactTask(String, crate::types::TaskType, usize),

    #[error("task '{0}': {1}")]
    Invalid(String, #[source] ConfigError),

    #[error("task '{0}': {1}")]
    Solver(String, #[source] SolverError),
}

/// Solver registration and assembly errors.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("no objective registered under this handle")]
    UnknownObjective,

    #[error("no constraint registered under this handle")]
    UnknownConstraint,

    #[error("variable span {offset}..{end} exceeds problem size {n}")]
    SpanOutOfRange { offset: usize, end: usize, n: usize },

    #[error("model has {rows} rows but its right-hand side has {rhs}")]
    ShapeMismatch { rows: usize, rhs: usize },

    #[error("model has {cols} columns but its variable span covers {span}")]
    ColumnMismatch { cols: usize, span: usize },

    #[error("unknown QP backend '{0}'")]
    UnknownBackend(String),
}
