//! Simulation options, loadable from TOML.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::bc::{BcStage, BoundaryConditionManager};
use crate::driver::stepping::TimeOptions;
use crate::error::{Result, SimulationError};
use crate::fe::{BoxMeshSettings, ATTRIBUTE_X_MIN, ATTRIBUTE_Y_MIN, ATTRIBUTE_Z_MAX, ATTRIBUTE_Z_MIN};
use crate::material::{CrystalSymmetry, ExecutionTarget, HardeningLaw, MaterialParameters, MaterialVariant};
use crate::operator::AssemblyMode;
use crate::output::OutputOptions;

/// Number of boundary attributes of the box meshes built from [`BoxMeshSettings`].
const BOX_MESH_ATTRIBUTES: usize = 6;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NonlinearSolverKind {
    /// Plain Newton-Raphson.
    #[serde(rename = "nr")]
    NewtonRaphson,
    /// Newton-Raphson with backtracking line search.
    #[serde(rename = "nrls")]
    NewtonRaphsonLineSearch,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KrylovSolverKind {
    Cg,
    Gmres,
    Minres,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonOptions {
    pub solver: NonlinearSolverKind,
    pub max_iter: usize,
    pub rel_tol: f64,
    pub abs_tol: f64,
}

impl Default for NewtonOptions {
    fn default() -> Self {
        Self {
            solver: NonlinearSolverKind::NewtonRaphson,
            max_iter: 25,
            rel_tol: 1e-5,
            abs_tol: 1e-10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KrylovOptions {
    pub solver: KrylovSolverKind,
    pub max_iter: usize,
    pub rel_tol: f64,
    pub abs_tol: f64,
}

impl Default for KrylovOptions {
    fn default() -> Self {
        Self {
            solver: KrylovSolverKind::Cg,
            max_iter: 2500,
            rel_tol: 1e-10,
            abs_tol: 1e-30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub assembly: AssemblyMode,
    pub newton: NewtonOptions,
    pub krylov: KrylovOptions,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            assembly: AssemblyMode::Full,
            newton: NewtonOptions::default(),
            krylov: KrylovOptions::default(),
        }
    }
}

impl SolverOptions {
    pub fn validate(&self) -> Result<()> {
        if self.newton.max_iter == 0 {
            return Err(SimulationError::configuration("Newton solver needs at least one iteration"));
        }
        if self.krylov.max_iter == 0 {
            return Err(SimulationError::configuration("Krylov solver needs at least one iteration"));
        }
        let tolerances = [
            ("newton.rel_tol", self.newton.rel_tol),
            ("newton.abs_tol", self.newton.abs_tol),
            ("krylov.rel_tol", self.krylov.rel_tol),
            ("krylov.abs_tol", self.krylov.abs_tol),
        ];
        for (name, tol) in tolerances {
            if !(tol >= 0.0 && tol.is_finite()) {
                return Err(SimulationError::configuration(format!(
                    "tolerance {} must be nonnegative, got {}",
                    name, tol
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialOptions {
    pub symmetry: CrystalSymmetry,
    pub hardening: HardeningLaw,
    pub target: ExecutionTarget,
    pub parameters: MaterialParameters,
}

impl Default for MaterialOptions {
    fn default() -> Self {
        Self {
            symmetry: CrystalSymmetry::Fcc,
            hardening: HardeningLaw::Voce,
            target: ExecutionTarget::Cpu,
            parameters: MaterialParameters::default(),
        }
    }
}

impl MaterialOptions {
    pub fn variant(&self) -> MaterialVariant {
        MaterialVariant::new(self.symmetry, self.hardening, self.target)
    }

    pub fn validate(&self) -> Result<()> {
        let variant = self.variant();
        if !variant.is_supported() {
            return Err(SimulationError::configuration(format!(
                "unsupported material variant {}",
                variant
            )));
        }
        if self.parameters.hardening.law() != self.hardening {
            return Err(SimulationError::configuration(format!(
                "material uses {:?} hardening but the hardening parameters are for {:?}",
                self.hardening,
                self.parameters.hardening.law()
            )));
        }
        self.parameters.validate()
    }
}

/// Uniaxial extension along z at the given rate: the three minimum faces are held in
/// their normal direction and the z-maximum face moves with `rate`.
pub fn uniaxial_stage(rate: f64) -> BcStage {
    BcStage {
        start_step: 1,
        essential_ids: vec![ATTRIBUTE_X_MIN, ATTRIBUTE_Y_MIN, ATTRIBUTE_Z_MIN, ATTRIBUTE_Z_MAX],
        essential_comps: vec![1, 2, 3, 3],
        essential_vals: vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, rate],
        velocity_gradient: None,
        vgrad_origin: None,
    }
}

/// All options of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationOptions {
    pub time: TimeOptions,
    pub solvers: SolverOptions,
    pub material: MaterialOptions,
    pub bcs: Vec<BcStage>,
    pub output: OutputOptions,
    pub mesh: BoxMeshSettings,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            time: TimeOptions::default(),
            solvers: SolverOptions::default(),
            material: MaterialOptions::default(),
            bcs: vec![uniaxial_stage(1e-3)],
            output: OutputOptions::default(),
            mesh: BoxMeshSettings::default(),
        }
    }
}

impl SimulationOptions {
    /// Parses and validates options from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: Self = toml::from_str(text)
            .map_err(|err| SimulationError::configuration(format!("failed to parse options: {}", err)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self)
            .map_err(|err| SimulationError::configuration(format!("failed to serialize options: {}", err)))
    }

    pub fn validate(&self) -> Result<()> {
        self.time.validate()?;
        self.solvers.validate()?;
        self.material.validate()?;
        BoundaryConditionManager::new(self.bcs.clone(), BOX_MESH_ATTRIBUTES)?;
        if self.mesh.cells.iter().any(|&n| n == 0) || self.mesh.extents.iter().any(|&l| !(l > 0.0)) {
            return Err(SimulationError::configuration("box mesh needs positive extents and cell counts"));
        }
        Ok(())
    }
}
