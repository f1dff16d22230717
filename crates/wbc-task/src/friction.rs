//! Linearized Coulomb friction cones.
//!
//! The quadratic cone `sqrt(fx² + fy²) <= mu·fz` is replaced by an inscribed
//! polyhedron of `N` facets. Facet `i` sits at angle `theta_i = 2*pi*i/N` and
//! contributes the residual row
//!
//! ```text
//! -cos(theta_i)·fx - sin(theta_i)·fy + mu·cos(pi/N)·fz - margin >= 0
//! ```
//!
//! The `cos(pi/N)` factor shrinks the polyhedron inside the true cone, so
//! every force admitted by the linearization is admitted by the exact cone.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};

use wbc_core::config::FrictionDefaults;
use wbc_core::error::ConfigError;

/// A polyhedral inner approximation of a Coulomb cone.
///
/// The facet count is fixed at construction: changing it would change the
/// inequality row count of a registered cone, which the solver does not
/// allow in place. Coefficient and margin may change freely.
#[derive(Clone, Debug)]
pub struct FrictionCone {
    coefficient: f64,
    facets: usize,
    margin: f64,
}

impl FrictionCone {
    /// Build a cone from the configured defaults.
    #[must_use]
    pub fn new(defaults: &FrictionDefaults) -> Self {
        Self {
            coefficient: defaults.coefficient,
            facets: defaults.facets,
            margin: defaults.margin,
        }
    }

    /// Friction coefficient `mu`.
    #[must_use]
    pub const fn coefficient(&self) -> f64 {
        self.coefficient
    }

    /// Number of polyhedral facets (= inequality rows).
    #[must_use]
    pub const fn facets(&self) -> usize {
        self.facets
    }

    /// Safety margin subtracted from every facet.
    #[must_use]
    pub const fn margin(&self) -> f64 {
        self.margin
    }

    /// Replace the friction coefficient.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidFrictionCoefficient`] unless `mu > 0`.
    pub fn set_coefficient(&mut self, mu: f64) -> Result<(), ConfigError> {
        if mu <= 0.0 {
            return Err(ConfigError::InvalidFrictionCoefficient(mu));
        }
        self.coefficient = mu;
        Ok(())
    }

    /// Replace the safety margin.
    pub fn set_margin(&mut self, margin: f64) {
        self.margin = margin;
    }

    /// The residual rows `(A, b)` over a local 3-vector `(fx, fy, fz)`,
    /// satisfied when `A·f + b >= 0` componentwise.
    #[must_use]
    pub fn rows(&self) -> (DMatrix<f64>, DVector<f64>) {
        let n = self.facets;
        let inner = self.coefficient * (PI / n as f64).cos();
        let mut a = DMatrix::zeros(n, 3);
        for i in 0..n {
            let theta = 2.0 * PI * i as f64 / n as f64;
            a[(i, 0)] = -theta.cos();
            a[(i, 1)] = -theta.sin();
            a[(i, 2)] = inner;
        }
        let b = DVector::from_element(n, -self.margin);
        (a, b)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
