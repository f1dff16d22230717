//! QP assembly and solving for the whole-body controller.
//!
//! Each active task contributes a linear model `A·x + b` over a sub-range of
//! the shared optimization variable. The [`Solver`](solver::Solver)
//! aggregates all registered contributions into one dense QP
//!
//! ```text
//! minimize   1/2 xᵀ C x + dᵀ x
//! subject to A x = b          (equalities, rank-reduced via SVD)
//!            G x >= h         (inequalities)
//! ```
//!
//! and dispatches it to a pluggable [`QpBackend`](backend::QpBackend):
//! either Clarabel (interior point) or a dense active-set method. The
//! backend is chosen at construction and fixed for the solver's lifetime.
//!
//! Registration returns opaque handles; tasks store handles and remove
//! their entries by handle on deactivation or disconnect, so the solver is
//! the single owner of all registration bookkeeping.

pub mod active_set;
pub mod backend;
pub mod clarabel_backend;
pub mod linear;
pub mod reduce;
pub mod solver;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::active_set::ActiveSetBackend;
    pub use crate::backend::{backend_for, QpBackend, QpProblem, QpSolution, SolveStatus};
    pub use crate::clarabel_backend::ClarabelBackend;
    pub use crate::linear::LinearModel;
    pub use crate::reduce::reduce_constraints;
    pub use crate::solver::{ConstraintHandle, ConstraintKind, ObjectiveHandle, Solver};
}
