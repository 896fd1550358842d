//! Crystal plasticity material models.
//!
//! A [`MaterialModel`] is created once from a [`MaterialVariant`] and owns the quadrature
//! field store. The operator drives it through [`MaterialModel::setup`] and the driver
//! commits accepted steps through [`MaterialModel::commit`].
use nalgebra::SMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SimulationError};
use crate::fe::{GeometricFactors, NODES_PER_ELEMENT};
use crate::quadrature_field::{QuadratureField, QuadratureFieldStore};

mod execution;
mod hardening;
mod kernel;
pub mod layout;

pub use hardening::*;
pub use kernel::{deviator, deviatoric_to_vec5, tensor_to_voigt, voigt_to_tensor, von_mises, MaterialPointError};
pub use layout::{StateLayout, StateSlot};

use execution::PointUpdate;
use kernel::PointKernel;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrystalSymmetry {
    Fcc,
    Bcc,
    Hcp,
}

impl CrystalSymmetry {
    /// Taylor factor relating the macroscopic equivalent stress to the resolved shear stress.
    pub fn taylor_factor(&self) -> f64 {
        match self {
            Self::Fcc => 3.06,
            Self::Bcc => 2.75,
            Self::Hcp => 4.0,
        }
    }

    pub fn num_slip_systems(&self) -> usize {
        match self {
            Self::Fcc | Self::Bcc => 12,
            Self::Hcp => 18,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardeningLaw {
    Voce,
    NonlinearVoce,
    DislocationDensity,
}

/// Where the per-point updates of a material model run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTarget {
    /// Sequential loop over all points.
    Cpu,
    /// Data-parallel over elements on the rayon thread pool.
    Multicore,
    /// Bulk-synchronous launches over fixed-size batches of elements.
    Device,
}

/// The tag selecting a concrete material model. Immutable once the model exists.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaterialVariant {
    pub symmetry: CrystalSymmetry,
    pub hardening: HardeningLaw,
    pub target: ExecutionTarget,
}

impl fmt::Display for MaterialVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}/{:?}", self.symmetry, self.hardening, self.target)
    }
}

impl MaterialVariant {
    pub fn new(symmetry: CrystalSymmetry, hardening: HardeningLaw, target: ExecutionTarget) -> Self {
        Self {
            symmetry,
            hardening,
            target,
        }
    }

    /// HCP crystals are only available with dislocation density hardening.
    pub fn is_supported(&self) -> bool {
        self.symmetry != CrystalSymmetry::Hcp || self.hardening == HardeningLaw::DislocationDensity
    }

    /// The state variable layout of every material point of this variant.
    pub fn state_layout(&self) -> StateLayout {
        StateLayout::from_widths(&[
            (layout::SHEAR_RATE_EFFECTIVE, 1),
            (layout::SHEAR_EFFECTIVE, 1),
            (layout::PLASTIC_WORK, 1),
            (layout::QUATERNIONS, 4),
            (layout::HARDNESS, 1),
            (layout::SHEAR_RATES, self.symmetry.num_slip_systems()),
            (layout::ELASTIC_STRAIN, 5),
            (layout::RELATIVE_VOLUME, 1),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialParameters {
    pub bulk_modulus: f64,
    pub shear_modulus: f64,
    /// Reference slip rate of the power law.
    pub reference_shear_rate: f64,
    /// Rate sensitivity exponent `m`.
    pub rate_sensitivity: f64,
    pub hardening: HardeningParameters,
    /// Initial lattice orientation as a unit quaternion `[w, x, y, z]`.
    pub initial_orientation: [f64; 4],
}

impl Default for MaterialParameters {
    fn default() -> Self {
        // Copper-like values in MPa
        Self {
            bulk_modulus: 140.0e3,
            shear_modulus: 48.0e3,
            reference_shear_rate: 1.0,
            rate_sensitivity: 0.02,
            hardening: HardeningParameters::Voce {
                initial_strength: 20.0,
                saturation_strength: 120.0,
                initial_hardening_rate: 250.0,
            },
            initial_orientation: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

impl MaterialParameters {
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("bulk_modulus", self.bulk_modulus),
            ("shear_modulus", self.shear_modulus),
            ("reference_shear_rate", self.reference_shear_rate),
            ("rate_sensitivity", self.rate_sensitivity),
        ];
        for (name, value) in checks {
            if !(value > 0.0 && value.is_finite()) {
                return Err(SimulationError::configuration(format!(
                    "material parameter {} must be positive, got {}",
                    name, value
                )));
            }
        }
        let norm = self.initial_orientation.iter().map(|q| q * q).sum::<f64>().sqrt();
        if !(norm > 0.0) || !norm.is_finite() {
            return Err(SimulationError::configuration("initial orientation must be a nonzero quaternion"));
        }
        self.hardening.validate()
    }
}

/// A material model bound to the quadrature points of a mesh.
#[derive(Debug, Clone)]
pub struct MaterialModel {
    variant: MaterialVariant,
    kernel: PointKernel,
    layout: StateLayout,
    store: QuadratureFieldStore,
    time: f64,
    dt: f64,
}

impl MaterialModel {
    /// Selects and constructs the model of the given variant.
    ///
    /// Unsupported variants and hardening parameters that do not belong to the variant's
    /// hardening law are configuration errors.
    pub fn new(
        variant: MaterialVariant,
        params: MaterialParameters,
        num_elements: usize,
        num_quadrature_points: usize,
    ) -> Result<Self> {
        if !variant.is_supported() {
            return Err(SimulationError::configuration(format!(
                "unsupported material variant {}",
                variant
            )));
        }
        if params.hardening.law() != variant.hardening {
            return Err(SimulationError::configuration(format!(
                "hardening parameters for {:?} given to a {:?} material",
                params.hardening.law(),
                variant.hardening
            )));
        }
        params.validate()?;

        let layout = variant.state_layout();
        let kernel = PointKernel::new(variant.symmetry, params, &layout)?;
        let initial_state = kernel.initial_state(layout.len());
        let store = QuadratureFieldStore::new(num_elements, num_quadrature_points, &initial_state);
        Ok(Self {
            variant,
            kernel,
            layout,
            store,
            time: 0.0,
            dt: 1.0,
        })
    }

    pub fn variant(&self) -> MaterialVariant {
        self.variant
    }

    pub fn params(&self) -> &MaterialParameters {
        self.kernel.params()
    }

    pub fn state_layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn store(&self) -> &QuadratureFieldStore {
        &self.store
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn set_dt(&mut self, dt: f64) {
        self.dt = dt;
    }

    /// Updates the end stress, end state and tangent of every quadrature point.
    ///
    /// `geometry` describes the end configuration and `velocities` holds the nodal trial
    /// velocities of each element, one column per node. The result is local to this rank
    /// and must be reduced before anybody branches on it.
    pub fn setup(
        &mut self,
        geometry: &GeometricFactors,
        velocities: &[SMatrix<f64, 3, NODES_PER_ELEMENT>],
    ) -> std::result::Result<(), MaterialPointError> {
        debug_assert_eq!(velocities.len(), geometry.num_elements());
        if !geometry.is_valid() {
            return Err(MaterialPointError::InvalidGeometry);
        }
        let update = PointUpdate {
            kernel: &self.kernel,
            dt: self.dt,
            geometry,
            velocities,
        };
        execution::run(self.variant.target, &update, &mut self.store)
    }

    /// Makes the end stress and state of the current step the committed history.
    pub fn commit(&mut self) {
        self.store.commit();
    }

    /// Plastic rate of deformation tensor (row-major 3 x 3) of every point, computed from
    /// the committed stress and state.
    pub fn plastic_rate_tensor(&self) -> QuadratureField {
        let stress = self.store.stress.begin();
        let state = self.store.state.begin();
        let mut result = QuadratureField::zeros(stress.num_elements(), stress.num_quadrature_points(), 9);
        for e in 0..stress.num_elements() {
            for q in 0..stress.num_quadrature_points() {
                self.kernel
                    .plastic_rate_tensor(stress.point(e, q), state.point(e, q), result.point_mut(e, q));
            }
        }
        result
    }
}
