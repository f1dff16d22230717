//! Core vocabulary types shared by the task and solver layers.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// TaskType
// ---------------------------------------------------------------------------

/// What quantity a task controls.
///
/// The type is fixed at construction and selects the linearization scheme
/// when the task is connected to a controller. Connecting a task whose type
/// is still [`TaskType::Unset`] is a configuration error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    /// Track a task-space acceleration derived from a feature error.
    Acceleration,
    /// Track an applied joint torque.
    Torque,
    /// Track (or bound) a 3-vector contact force.
    Force,
    /// Damp the centroidal angular momentum.
    CoMMomentum,
    /// Not chosen yet. Only legal before the task is connected.
    #[default]
    Unset,
}

// ---------------------------------------------------------------------------
// ActivationMode
// ---------------------------------------------------------------------------

/// How a task currently participates in the optimization.
///
/// The modes are mutually exclusive: a task is registered in the solver as
/// *either* a weighted objective *or* a hard constraint, never both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivationMode {
    /// Not registered in the solver.
    #[default]
    Inactive,
    /// Registered as a weighted least-squares objective.
    Objective,
    /// Registered as a hard equality constraint.
    Constraint,
}

// ---------------------------------------------------------------------------
// ContactState
// ---------------------------------------------------------------------------

/// Contact sub-state of a 3-D force task.
///
/// Independent of [`ActivationMode`]: an active force task out of contact has
/// its force pinned to zero by an equality constraint; in contact the force
/// is free but capped by the friction cone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ContactState {
    /// Zero-force equality constraint applies.
    #[default]
    NoContact,
    /// Friction-cone inequality applies.
    InContact,
}

// ---------------------------------------------------------------------------
// VarSpan
// ---------------------------------------------------------------------------

/// A contiguous range of the shared optimization variable.
///
/// Tasks act on sub-ranges of the problem variable (generalized
/// accelerations, joint torques, per-contact forces); a span maps a task's
/// local variable onto global column indices `offset .. offset + len`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VarSpan {
    /// First global column index.
    pub offset: usize,
    /// Local variable dimension.
    pub len: usize,
}

impl VarSpan {
    /// Create a span covering `offset .. offset + len`.
    #[must_use]
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// One past the last global column index.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + self.len
    }

    /// Whether the span fits inside a problem of `n` variables.
    #[must_use]
    pub const fn fits(&self, n: usize) -> bool {
        self.end() <= n
    }
}

// ---------------------------------------------------------------------------
// Weight
// ---------------------------------------------------------------------------

/// Objective weight: a single scalar or one value per task dimension.
///
/// All entries must be non-negative; a negative weight would make the cost
/// contribution indefinite.
#[derive(Clone, Debug, PartialEq)]
pub enum Weight {
    /// Uniform weight over all residual components.
    Scalar(f64),
    /// Per-component weight on the residual.
    PerAxis(DVector<f64>),
}

impl Default for Weight {
    fn default() -> Self {
        Self::Scalar(1.0)
    }
}

impl Weight {
    /// Validate non-negativity.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NegativeWeight`] if any entry is negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Scalar(w) => {
                if *w < 0.0 {
                    return Err(ConfigError::NegativeWeight(*w));
                }
            }
            Self::PerAxis(w) => {
                if let Some(bad) = w.iter().find(|v| **v < 0.0) {
                    return Err(ConfigError::NegativeWeight(*bad));
                }
            }
        }
        Ok(())
    }

    /// Weight applied to residual component `i` of a `dim`-dimensional task.
    ///
    /// A scalar weight applies uniformly; a per-axis weight shorter than the
    /// task dimension repeats its last entry.
    #[must_use]
    pub fn component(&self, i: usize) -> f64 {
        match self {
            Self::Scalar(w) => *w,
            Self::PerAxis(w) => {
                if w.is_empty() {
                    0.0
                } else {
                    w[i.min(w.len() - 1)]
                }
            }
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
    fn span_bounds() {
        let s = VarSpan::new(3, 4);
        assert_eq!(s.end(), 7);
        assert!(s.fits(7));
        assert!(!s.fits(6));
    }

    #[test]
    fn weight_validation() {
        assert!(Weight::Scalar(0.0).validate().is_ok());
        assert!(Weight::Scalar(-1.0).validate().is_err());
        assert!(Weight::PerAxis(DVector::from_vec(vec![1.0, 0.0])).validate().is_ok());
        assert!(Weight::PerAxis(DVector::from_vec(vec![1.0, -0.5])).validate().is_err());
    }

    #[test]
    fn weight_components() {
        let w = Weight::PerAxis(DVector::from_vec(vec![2.0, 3.0]));
        assert!((w.component(0) - 2.0).abs() < f64::EPSILON);
        assert!((w.component(1) - 3.0).abs() < f64::EPSILON);
        // Short vectors repeat their last entry.
        assert!((w.component(5) - 3.0).abs() < f64::EPSILON);

        let s = Weight::Scalar(4.0);
        assert!((s.component(9) - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn defaults() {
        assert_eq!(TaskType::default(), TaskType::Unset);
        assert_eq!(ActivationMode::default(), ActivationMode::Inactive);
        assert_eq!(ContactState::default(), ContactState::NoContact);
    }
}
