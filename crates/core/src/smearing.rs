//! Occupation smearing and the divided-difference occupation kernel.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Energy differences below this threshold are treated as degenerate and the
/// divided difference falls back to the analytic derivative.
pub const DEGENERACY_THRESHOLD: f64 = 1e-8;

/// Reduced-argument cutoff beyond which the Fermi-Dirac factors underflow.
const EXP_ARG_LIMIT: f64 = 40.0;

/// Smearing family mapping the reduced energy x = (ε - ε_F)/T to a
/// fractional occupation in [0, 1]. `None` is the zero-temperature step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Smearing {
    None,
    FermiDirac,
    Gaussian,
}

impl Smearing {
    /// Occupation s(x), monotonically decreasing from 1 to 0.
    pub fn occupation(self, x: f64) -> f64 {
        match self {
            Smearing::None => {
                if x > 0.0 {
                    0.0
                } else if x < 0.0 {
                    1.0
                } else {
                    0.5
                }
            }
            Smearing::FermiDirac => {
                if x > EXP_ARG_LIMIT {
                    0.0
                } else if x < -EXP_ARG_LIMIT {
                    1.0
                } else {
                    1.0 / (x.exp() + 1.0)
                }
            }
            Smearing::Gaussian => 0.5 * libm::erfc(x),
        }
    }

    /// Analytic derivative ds/dx, non-positive everywhere.
    pub fn occupation_derivative(self, x: f64) -> f64 {
        match self {
            Smearing::None => 0.0,
            Smearing::FermiDirac => {
                if x.abs() > EXP_ARG_LIMIT {
                    0.0
                } else {
                    let c = (0.5 * x).cosh();
                    -1.0 / (4.0 * c * c)
                }
            }
            Smearing::Gaussian => -(-x * x).exp() / PI.sqrt(),
        }
    }
}

/// Numerically stable divided difference (f_a - f_b) / (ε_a - ε_b) of the
/// occupation function.
///
/// `f_a` and `f_b` are the occupation numbers already computed for the two
/// energies (including the `filling` factor). Near-degenerate energies fall
/// back to the analytic derivative filling·s'((ε - ε_F)/T)/T instead of
/// dividing by a vanishing difference. At zero temperature the occupation is
/// a step and the degenerate limit only exists distributionally; it is
/// returned as zero and the Fermi-level-variation correction must be skipped
/// by the caller.
#[allow(clippy::too_many_arguments)]
pub fn occupation_divided_difference(
    smearing: Smearing,
    f_a: f64,
    f_b: f64,
    eps_a: f64,
    eps_b: f64,
    fermi_level: f64,
    temperature: f64,
    filling: f64,
) -> f64 {
    let delta = eps_a - eps_b;
    if temperature <= 0.0 {
        if delta.abs() < DEGENERACY_THRESHOLD {
            return 0.0;
        }
        return (f_a - f_b) / delta;
    }
    if delta.abs() < DEGENERACY_THRESHOLD {
        let x = (0.5 * (eps_a + eps_b) - fermi_level) / temperature;
        filling * smearing.occupation_derivative(x) / temperature
    } else {
        (f_a - f_b) / delta
    }
}
