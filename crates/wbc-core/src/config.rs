//! Controller configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_cycle_dt() -> f64 {
    0.005
}
const fn default_reduction_tolerance() -> f64 {
    1e-8
}
const fn default_regularization() -> f64 {
    1e-9
}
const fn default_weight() -> f64 {
    1.0
}
const fn default_friction_coefficient() -> f64 {
    1.0
}
const fn default_facet_count() -> usize {
    6
}

// ---------------------------------------------------------------------------
// BackendKind
// ---------------------------------------------------------------------------

/// Which QP backend the solver is built with.
///
/// Fixed for the lifetime of a solver instance; switching backends means
/// constructing a new solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Clarabel interior-point solver.
    #[default]
    Clarabel,
    /// Dense active-set solver.
    ActiveSet,
}

// ---------------------------------------------------------------------------
// ControllerConfig
// ---------------------------------------------------------------------------

/// Main controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Control cycle period in seconds (default: 0.005 = 200 Hz).
    #[serde(default = "default_cycle_dt")]
    pub cycle_dt: f64,

    /// Singular values below this threshold are treated as zero during
    /// equality rank reduction (default: 1e-8).
    #[serde(default = "default_reduction_tolerance")]
    pub reduction_tolerance: f64,

    /// Tikhonov term added to the cost diagonal so variables covered by no
    /// objective stay bounded (default: 1e-9).
    #[serde(default = "default_regularization")]
    pub regularization: f64,

    /// QP backend selection.
    #[serde(default)]
    pub backend: BackendKind,

    /// Use the reduced (action-variable) dynamic formalism.
    #[serde(default)]
    pub reduced_formalism: bool,

    /// Defaults applied to newly built tasks.
    #[serde(default)]
    pub task_defaults: TaskDefaults,

    /// Defaults applied to newly built friction cones.
    #[serde(default)]
    pub friction: FrictionDefaults,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cycle_dt: default_cycle_dt(),
            reduction_tolerance: default_reduction_tolerance(),
            regularization: default_regularization(),
            backend: BackendKind::default(),
            reduced_formalism: false,
            task_defaults: TaskDefaults::default(),
            friction: FrictionDefaults::default(),
        }
    }
}

impl ControllerConfig {
    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_dt <= 0.0 {
            return Err(ConfigError::InvalidCycleDt(self.cycle_dt));
        }
        if self.reduction_tolerance <= 0.0 {
            return Err(ConfigError::InvalidTolerance(self.reduction_tolerance));
        }
        if self.regularization < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "regularization".into(),
                message: format!("{} is negative", self.regularization),
            });
        }
        self.task_defaults.validate()?;
        self.friction.validate()?;
        Ok(())
    }

    /// Control rate in Hz.
    #[must_use]
    pub fn cycle_hz(&self) -> f64 {
        1.0 / self.cycle_dt
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// TaskDefaults
// ---------------------------------------------------------------------------

/// Initial gains and weight for newly built tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefaults {
    /// Objective weight (default: 1.0).
    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Proportional gain Kp (default: 0.0).
    #[serde(default)]
    pub stiffness: f64,

    /// Derivative gain Kd (default: 0.0).
    #[serde(default)]
    pub damping: f64,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            weight: default_weight(),
            stiffness: 0.0,
            damping: 0.0,
        }
    }
}

impl TaskDefaults {
    /// Validate non-negativity of weight and gains.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.weight < 0.0 {
            return Err(ConfigError::NegativeWeight(self.weight));
        }
        if self.stiffness < 0.0 {
            return Err(ConfigError::NegativeGain(self.stiffness));
        }
        if self.damping < 0.0 {
            return Err(ConfigError::NegativeGain(self.damping));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FrictionDefaults
// ---------------------------------------------------------------------------

/// Initial parameters for the linearized Coulomb cone of force tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrictionDefaults {
    /// Coulomb friction coefficient (default: 1.0).
    #[serde(default = "default_friction_coefficient")]
    pub coefficient: f64,

    /// Number of polyhedral facets (default: 6). Fixes the inequality row
    /// count of the cone and cannot change without re-registration.
    #[serde(default = "default_facet_count")]
    pub facets: usize,

    /// Safety margin subtracted from the cone (default: 0.0).
    #[serde(default)]
    pub margin: f64,
}

impl Default for FrictionDefaults {
    fn default() -> Self {
        Self {
            coefficient: default_friction_coefficient(),
            facets: default_facet_count(),
            margin: 0.0,
        }
    }
}

impl FrictionDefaults {
    /// Validate coefficient and facet count.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coefficient <= 0.0 {
            return Err(ConfigError::InvalidFrictionCoefficient(self.coefficient));
        }
        if self.facets < 3 {
            return Err(ConfigError::InvalidFacetCount(self.facets));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn default_config_is_valid() {
        let cfg = ControllerConfig::default();
        assert!(cfg.validate().is_ok());
        assert_relative_eq!(cfg.cycle_hz(), 200.0, epsilon = 1e-9);
        assert_eq!(cfg.backend, BackendKind::Clarabel);
        assert_eq!(cfg.friction.facets, 6);
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = ControllerConfig::default();
        cfg.cycle_dt = 0.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidCycleDt(_))));

        let mut cfg = ControllerConfig::default();
        cfg.reduction_tolerance = -1e-8;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidTolerance(_))));

        let mut cfg = ControllerConfig::default();
        cfg.task_defaults.stiffness = -5.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::NegativeGain(_))));

        let mut cfg = ControllerConfig::default();
        cfg.friction.facets = 2;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidFacetCount(2))));
    }

    #[test]
    fn parse_from_toml() {
        let cfg: ControllerConfig = toml::from_str(
            r#"
            cycle_dt = 0.002
            backend = "active-set"
            reduced_formalism = true

            [task_defaults]
            weight = 10.0
            stiffness = 100.0
            damping = 20.0

            [friction]
            coefficient = 0.6
            facets = 8
            margin = 0.05
            "#,
        )
        .unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.backend, BackendKind::ActiveSet);
        assert!(cfg.reduced_formalism);
        assert_relative_eq!(cfg.task_defaults.stiffness, 100.0);
        assert_eq!(cfg.friction.facets, 8);
        assert_relative_eq!(cfg.friction.margin, 0.05);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: ControllerConfig = toml::from_str("").unwrap();
        assert_relative_eq!(cfg.cycle_dt, 0.005);
        assert_relative_eq!(cfg.reduction_tolerance, 1e-8);
        assert_relative_eq!(cfg.friction.coefficient, 1.0);
        assert!(!cfg.reduced_formalism);
    }
}
