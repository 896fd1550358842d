use serde::{Deserialize, Serialize};

use crate::error::{Result, SimulationError};
use crate::material::HardeningLaw;

/// Parameters of the slip-system hardening law.
///
/// All strengths are resolved shear stresses. The hardness state variable holds the
/// critical resolved shear stress for the Voce laws and the (normalized) dislocation
/// density for the dislocation density law.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "law", rename_all = "snake_case")]
pub enum HardeningParameters {
    Voce {
        initial_strength: f64,
        saturation_strength: f64,
        initial_hardening_rate: f64,
    },
    NonlinearVoce {
        initial_strength: f64,
        saturation_strength: f64,
        initial_hardening_rate: f64,
        exponent: f64,
    },
    DislocationDensity {
        lattice_friction: f64,
        taylor_coefficient: f64,
        initial_density: f64,
        storage_coefficient: f64,
        recovery_coefficient: f64,
    },
}

impl HardeningParameters {
    pub fn law(&self) -> HardeningLaw {
        match self {
            Self::Voce { .. } => HardeningLaw::Voce,
            Self::NonlinearVoce { .. } => HardeningLaw::NonlinearVoce,
            Self::DislocationDensity { .. } => HardeningLaw::DislocationDensity,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, value: f64| {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(SimulationError::configuration(format!(
                    "hardening parameter {} must be positive, got {}",
                    name, value
                )))
            }
        };
        match *self {
            Self::Voce {
                initial_strength,
                saturation_strength,
                initial_hardening_rate,
            } => {
                positive("initial_strength", initial_strength)?;
                positive("initial_hardening_rate", initial_hardening_rate)?;
                if !(saturation_strength > initial_strength) {
                    return Err(SimulationError::configuration(
                        "Voce saturation strength must exceed the initial strength",
                    ));
                }
            }
            Self::NonlinearVoce {
                initial_strength,
                saturation_strength,
                initial_hardening_rate,
                exponent,
            } => {
                positive("initial_strength", initial_strength)?;
                positive("initial_hardening_rate", initial_hardening_rate)?;
                positive("exponent", exponent)?;
                if !(saturation_strength > initial_strength) {
                    return Err(SimulationError::configuration(
                        "Voce saturation strength must exceed the initial strength",
                    ));
                }
            }
            Self::DislocationDensity {
                lattice_friction,
                taylor_coefficient,
                initial_density,
                storage_coefficient,
                recovery_coefficient,
            } => {
                positive("lattice_friction", lattice_friction)?;
                positive("taylor_coefficient", taylor_coefficient)?;
                positive("initial_density", initial_density)?;
                positive("storage_coefficient", storage_coefficient)?;
                if !(recovery_coefficient >= 0.0) {
                    return Err(SimulationError::configuration(
                        "recovery coefficient must be nonnegative",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Initial value of the hardness state variable.
    pub fn initial_hardness(&self) -> f64 {
        match *self {
            Self::Voce { initial_strength, .. } | Self::NonlinearVoce { initial_strength, .. } => initial_strength,
            Self::DislocationDensity { initial_density, .. } => initial_density,
        }
    }

    /// Critical resolved shear stress for the given hardness.
    pub fn slip_resistance(&self, hardness: f64) -> f64 {
        match *self {
            Self::Voce { .. } | Self::NonlinearVoce { .. } => hardness,
            Self::DislocationDensity {
                lattice_friction,
                taylor_coefficient,
                ..
            } => lattice_friction + taylor_coefficient * hardness.max(0.0).sqrt(),
        }
    }

    /// Hardness after an explicit update with the total slip rate `gamma_dot` over `dt`.
    pub fn evolve(&self, hardness: f64, gamma_dot: f64, dt: f64) -> f64 {
        match *self {
            Self::Voce {
                initial_strength,
                saturation_strength,
                initial_hardening_rate,
            } => {
                let rate = initial_hardening_rate * (saturation_strength - hardness)
                    / (saturation_strength - initial_strength);
                (hardness + dt * rate * gamma_dot).min(saturation_strength)
            }
            Self::NonlinearVoce {
                initial_strength,
                saturation_strength,
                initial_hardening_rate,
                exponent,
            } => {
                let ratio = ((saturation_strength - hardness) / (saturation_strength - initial_strength)).max(0.0);
                let rate = initial_hardening_rate * ratio.powf(exponent);
                (hardness + dt * rate * gamma_dot).min(saturation_strength)
            }
            Self::DislocationDensity {
                storage_coefficient,
                recovery_coefficient,
                ..
            } => {
                let rho = hardness.max(0.0);
                let rate = storage_coefficient * rho.sqrt() - recovery_coefficient * rho;
                (rho + dt * rate * gamma_dot).max(0.0)
            }
        }
    }
}
