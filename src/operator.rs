//! The nonlinear mechanics operator.
//!
//! For a trial nodal velocity `v` the operator evaluates the internal force residual
//! `H(v) = sum_e sum_q B^T sigma(v) w det J` in the end configuration `x_begin + dt v`,
//! and exposes its Jacobian either as an assembled matrix or as a matrix-free action,
//! depending on the [`AssemblyMode`].
use log::debug;
use nalgebra::{DVector, DVectorView, DVectorViewMut, SMatrix};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::bc::BcGroup;
use crate::comm::Communicator;
use crate::error::{Result, SimulationError};
use crate::fe::{GeometricFactors, H1VectorSpace, NODES_PER_ELEMENT};
use crate::material::MaterialModel;
use crate::quadrature_field::QuadratureField;
use crate::sparse::nalgebra_sparse::CsrMatrix;
use crate::sparse::preconditioner::JacobiPreconditioner;
use crate::sparse::{InnerProduct, LinearOperator};

mod element;
mod full;
pub mod local;
mod partial;

pub use element::ElementAssembly;
pub use full::FullAssembly;
pub use partial::PartialAssembly;

use local::{assemble_element_vectors, element_internal_force};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssemblyMode {
    #[serde(rename = "full")]
    Full,
    #[serde(rename = "pa")]
    PartialAssembly,
    #[serde(rename = "ea")]
    ElementAssembly,
}

impl fmt::Display for AssemblyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::PartialAssembly => write!(f, "partial assembly"),
            Self::ElementAssembly => write!(f, "element assembly"),
        }
    }
}

/// Reference, begin and end nodal coordinates in the layout of the true DOFs.
#[derive(Debug, Clone, PartialEq)]
pub struct KinematicState {
    reference: DVector<f64>,
    begin: DVector<f64>,
    end: DVector<f64>,
}

impl KinematicState {
    pub fn new(reference: DVector<f64>) -> Self {
        Self {
            begin: reference.clone(),
            end: reference.clone(),
            reference,
        }
    }

    pub fn reference(&self) -> &DVector<f64> {
        &self.reference
    }

    pub fn begin(&self) -> &DVector<f64> {
        &self.begin
    }

    pub fn end(&self) -> &DVector<f64> {
        &self.end
    }

    /// `end = begin + dt * velocity`
    pub fn update_end(&mut self, velocity: &DVector<f64>, dt: f64) {
        self.end.copy_from(&self.begin);
        self.end.axpy(dt, velocity, 1.0);
    }

    /// Makes the end configuration the beginning of the next step.
    pub fn commit(&mut self) {
        self.begin.copy_from(&self.end);
    }
}

/// The sorted essential true DOFs together with a membership mask.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EssentialDofs {
    dofs: Vec<usize>,
    mask: Vec<bool>,
}

impl EssentialDofs {
    pub fn new(num_dofs: usize, mut dofs: Vec<usize>) -> Self {
        dofs.sort_unstable();
        dofs.dedup();
        let mut mask = vec![false; num_dofs];
        for &dof in &dofs {
            mask[dof] = true;
        }
        Self { dofs, mask }
    }

    pub fn dofs(&self) -> &[usize] {
        &self.dofs
    }

    pub fn contains(&self, dof: usize) -> bool {
        self.mask.get(dof).copied().unwrap_or(false)
    }

    pub fn zero_entries(&self, v: &mut DVector<f64>) {
        for &dof in &self.dofs {
            v[dof] = 0.0;
        }
    }
}

/// How the Jacobian of the operator is formed and applied.
///
/// A strategy is (re)built from the current geometry and material tangent by
/// [`assemble`](Self::assemble) and stays valid until the next material update.
pub trait AssemblyStrategy: fmt::Debug + Send + Sync {
    fn mode(&self) -> AssemblyMode;

    fn assemble(
        &mut self,
        space: &H1VectorSpace,
        geometry: &GeometricFactors,
        tangent: &QuadratureField,
        essential: &EssentialDofs,
    );

    /// `y = K x` without boundary conditions.
    fn apply_local(&self, space: &H1VectorSpace, x: &DVector<f64>, y: &mut DVector<f64>);

    /// `y = K x` with essential DOFs eliminated: constrained entries of `x` are treated as
    /// zero and constrained entries of `y` copy `x`.
    fn apply_eliminated(&self, space: &H1VectorSpace, essential: &EssentialDofs, x: &DVector<f64>, y: &mut DVector<f64>) {
        let mut x_free = x.clone();
        essential.zero_entries(&mut x_free);
        self.apply_local(space, &x_free, y);
        for &dof in essential.dofs() {
            y[dof] = x[dof];
        }
    }

    /// Diagonal of `K` without boundary conditions.
    fn diagonal(&self, space: &H1VectorSpace) -> DVector<f64>;

    /// The assembled matrix with essential DOFs eliminated, if the strategy forms one.
    fn eliminated_matrix(&self) -> Option<&CsrMatrix<f64>> {
        None
    }
}

pub fn create_assembly_strategy(mode: AssemblyMode, space: &H1VectorSpace) -> Result<Box<dyn AssemblyStrategy>> {
    Ok(match mode {
        AssemblyMode::Full => Box::new(FullAssembly::new(space)?),
        AssemblyMode::PartialAssembly => Box::new(PartialAssembly::new()),
        AssemblyMode::ElementAssembly => Box::new(ElementAssembly::new()),
    })
}

/// The Jacobian of the operator with essential DOFs eliminated.
#[derive(Debug, Copy, Clone)]
pub struct MechanicsJacobian<'a> {
    strategy: &'a dyn AssemblyStrategy,
    space: &'a H1VectorSpace,
    essential: &'a EssentialDofs,
}

impl MechanicsJacobian<'_> {
    pub fn mode(&self) -> AssemblyMode {
        self.strategy.mode()
    }

    /// The assembled sparse matrix for [`AssemblyMode::Full`].
    pub fn matrix(&self) -> Option<&CsrMatrix<f64>> {
        self.strategy.eliminated_matrix()
    }
}

impl LinearOperator<f64> for MechanicsJacobian<'_> {
    fn apply(&self, mut y: DVectorViewMut<f64>, x: DVectorView<f64>) -> std::result::Result<(), Box<dyn Error>> {
        let n = self.space.num_true_dofs();
        if x.len() != n || y.len() != n {
            return Err(Box::from(format!(
                "Jacobian of dimension {} applied to vector of dimension {}",
                n,
                x.len()
            )));
        }
        let x = x.clone_owned();
        let mut result = DVector::zeros(n);
        self.strategy
            .apply_eliminated(self.space, self.essential, &x, &mut result);
        y.copy_from(&result);
        Ok(())
    }
}

/// Inner product summed over all ranks.
#[derive(Clone, Copy)]
pub struct CollectiveInnerProduct<'a> {
    comm: &'a dyn Communicator,
}

impl<'a> CollectiveInnerProduct<'a> {
    pub fn new(comm: &'a dyn Communicator) -> Self {
        Self { comm }
    }
}

impl InnerProduct<f64> for CollectiveInnerProduct<'_> {
    fn dot(&self, a: DVectorView<f64>, b: DVectorView<f64>) -> f64 {
        self.comm.all_reduce_sum_scalar(a.dot(&b))
    }
}

pub struct MechanicsOperator {
    space: H1VectorSpace,
    comm: Arc<dyn Communicator>,
    material: MaterialModel,
    strategy: Box<dyn AssemblyStrategy>,
    kinematics: KinematicState,
    essential: EssentialDofs,
    reference_geometry: GeometricFactors,
    /// Geometry of the configuration used by the most recent material update.
    geometry: Option<GeometricFactors>,
    preconditioner: JacobiPreconditioner<f64>,
    dt: f64,
}

impl fmt::Debug for MechanicsOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MechanicsOperator")
            .field("mode", &self.strategy.mode())
            .field("num_true_dofs", &self.space.num_true_dofs())
            .field("num_essential_dofs", &self.essential.dofs().len())
            .field("dt", &self.dt)
            .finish()
    }
}

impl MechanicsOperator {
    pub fn new(
        space: H1VectorSpace,
        material: MaterialModel,
        mode: AssemblyMode,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self> {
        let reference = space.node_coordinates();
        let reference_geometry = GeometricFactors::compute(&space, &reference);
        if !reference_geometry.is_valid() {
            return Err(SimulationError::configuration("mesh contains inverted elements"));
        }
        let strategy = create_assembly_strategy(mode, &space)?;
        let num_dofs = space.num_true_dofs();
        Ok(Self {
            essential: EssentialDofs::new(num_dofs, Vec::new()),
            kinematics: KinematicState::new(reference),
            preconditioner: JacobiPreconditioner::from_diagonal(&DVector::repeat(num_dofs, 1.0)),
            dt: material.dt(),
            space,
            comm,
            material,
            strategy,
            reference_geometry,
            geometry: None,
        })
    }

    pub fn space(&self) -> &H1VectorSpace {
        &self.space
    }

    pub fn communicator(&self) -> &dyn Communicator {
        &*self.comm
    }

    pub fn shared_communicator(&self) -> Arc<dyn Communicator> {
        Arc::clone(&self.comm)
    }

    pub fn material(&self) -> &MaterialModel {
        &self.material
    }

    pub fn kinematics(&self) -> &KinematicState {
        &self.kinematics
    }

    pub fn mode(&self) -> AssemblyMode {
        self.strategy.mode()
    }

    pub fn essential_true_dofs(&self) -> &[usize] {
        self.essential.dofs()
    }

    pub fn dimension(&self) -> usize {
        self.space.num_true_dofs()
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn set_dt(&mut self, dt: f64) {
        self.dt = dt;
        self.material.set_dt(dt);
    }

    pub fn set_time(&mut self, time: f64) {
        self.material.set_time(time);
    }

    pub fn inner_product(&self) -> CollectiveInnerProduct<'_> {
        CollectiveInnerProduct::new(&*self.comm)
    }

    /// Global Euclidean norm of a distributed vector.
    pub fn norm(&self, v: &DVectorView<f64>) -> f64 {
        self.comm.all_reduce_sum_scalar(v.norm_squared()).sqrt()
    }

    /// Refreshes the essential true DOFs from the given boundary condition group.
    pub fn update_essential_dofs(&mut self, group: &BcGroup) -> Result<()> {
        self.space.check_attribute_mask_len(group.attributes.len())?;
        let dofs = self
            .space
            .essential_true_dofs(&group.attributes, &group.components);
        self.essential = EssentialDofs::new(self.space.num_true_dofs(), dofs);
        Ok(())
    }

    /// Runs the material update for the trial velocity `velocity` in the configuration
    /// given by `coordinates` and combines the outcome over all ranks.
    fn setup_material(&mut self, velocity: &DVector<f64>, coordinates: &DVector<f64>) -> Result<()> {
        let geometry = GeometricFactors::compute(&self.space, coordinates);
        let velocities: Vec<SMatrix<f64, 3, NODES_PER_ELEMENT>> = (0..self.space.num_elements())
            .map(|e| self.space.gather_element(e, velocity))
            .collect();
        let local = self.material.setup(&geometry, &velocities);
        self.geometry = Some(geometry);

        // Every rank takes part in the reduction before inspecting the result
        let success = self.comm.all_reduce_and(local.is_ok());
        if let Err(err) = &local {
            debug!("Material update failed on rank {}: {}", self.comm.rank(), err);
        }
        if success {
            Ok(())
        } else {
            Err(SimulationError::CollectiveMaterialFailure)
        }
    }

    fn internal_force(&self, y: &mut DVector<f64>) -> Result<()> {
        let geometry = self.current_geometry()?;
        let stress = self.material.store().stress.end();
        assemble_element_vectors(&self.space, y, |e| {
            element_internal_force(geometry.element(e), stress.element(e))
        });
        self.essential.zero_entries(y);
        Ok(())
    }

    fn current_geometry(&self) -> Result<&GeometricFactors> {
        self.geometry
            .as_ref()
            .ok_or_else(|| SimulationError::configuration("Jacobian requested before any material update"))
    }

    /// Evaluates the residual `y = H(x)` for the trial velocity `x`.
    ///
    /// Essential entries of `x` must already hold their prescribed values. Essential rows
    /// of `y` are zero.
    pub fn residual(&mut self, x: &DVector<f64>, y: &mut DVector<f64>) -> Result<()> {
        self.kinematics.update_end(x, self.dt);
        let end = self.kinematics.end().clone();
        self.setup_material(x, &end)?;
        self.internal_force(y)
    }

    fn refresh_jacobian(&mut self) -> Result<()> {
        let geometry = self
            .geometry
            .as_ref()
            .ok_or_else(|| SimulationError::configuration("Jacobian requested before any material update"))?;
        self.strategy.assemble(
            &self.space,
            geometry,
            &self.material.store().tangent,
            &self.essential,
        );
        let mut diagonal = self.strategy.diagonal(&self.space);
        for &dof in self.essential.dofs() {
            diagonal[dof] = 1.0;
        }
        self.preconditioner
            .update_diagonal(DVectorView::from(&diagonal));
        Ok(())
    }

    fn jacobian(&self) -> MechanicsJacobian<'_> {
        MechanicsJacobian {
            strategy: &*self.strategy,
            space: &self.space,
            essential: &self.essential,
        }
    }

    /// The Jacobian at the point of the most recent residual evaluation, together with a
    /// Jacobi preconditioner built from its diagonal.
    pub fn gradient(&mut self) -> Result<(MechanicsJacobian<'_>, &JacobiPreconditioner<f64>)> {
        self.refresh_jacobian()?;
        Ok((self.jacobian(), &self.preconditioner))
    }

    /// Linearized boundary condition update used to bootstrap a step.
    ///
    /// Runs the material update for the velocity `k` without moving the end configuration,
    /// then sets `y = K x + H(k)` with essential rows of both terms zeroed.
    pub fn update_bcs_action(
        &mut self,
        k: &DVector<f64>,
        x: &DVector<f64>,
        y: &mut DVector<f64>,
    ) -> Result<(MechanicsJacobian<'_>, &JacobiPreconditioner<f64>)> {
        let end = self.kinematics.end().clone();
        self.setup_material(k, &end)?;
        self.refresh_jacobian()?;

        self.strategy.apply_local(&self.space, x, y);
        self.essential.zero_entries(y);
        let mut residual = DVector::zeros(y.len());
        self.internal_force(&mut residual)?;
        *y += residual;
        Ok((self.jacobian(), &self.preconditioner))
    }

    /// Deformation gradient `F = sum_a x_a (grad_X N_a)^T` of the end configuration at every
    /// quadrature point, row-major.
    pub fn deformation_gradient(&self) -> QuadratureField {
        let nq = self.space.num_quadrature_points();
        let mut def_grad = QuadratureField::zeros(self.space.num_elements(), nq, 9);
        let end = self.kinematics.end();
        for e in 0..self.space.num_elements() {
            let x = self.space.gather_element(e, end);
            for (q, point) in self.reference_geometry.element(e).iter().enumerate() {
                let f = x * point.gradients.transpose();
                let out = def_grad.point_mut(e, q);
                for i in 0..3 {
                    for j in 0..3 {
                        out[3 * i + j] = f[(i, j)];
                    }
                }
            }
        }
        def_grad
    }

    /// Commits the material history and the end configuration of an accepted step.
    pub fn commit(&mut self) {
        self.material.commit();
        self.kinematics.commit();
        self.geometry = None;
    }

    /// Geometry of the reference configuration.
    pub fn reference_geometry(&self) -> &GeometricFactors {
        &self.reference_geometry
    }

    /// Geometry of the current (end) configuration.
    pub fn end_geometry(&self) -> GeometricFactors {
        GeometricFactors::compute(&self.space, self.kinematics.end())
    }
}
