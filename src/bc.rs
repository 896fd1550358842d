//! Essential boundary conditions on velocities.
//!
//! Boundary conditions are organized in stages. A stage becomes active at its start step
//! and stays active until the next stage starts. Each stage constrains boundary
//! attributes either to a uniform velocity or to the velocity field of a uniform velocity
//! gradient.
use nalgebra::{DVector, Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::comm::Communicator;
use crate::error::{Result, SimulationError};
use crate::fe::{ComponentMask, H1VectorSpace};

/// Decodes an integer component code: `1 = x`, `2 = y`, `3 = z`, `4 = xy`, `5 = yz`,
/// `6 = xz`, `7 = xyz` and `0` for no component.
pub fn component_mask(code: u32) -> Result<ComponentMask> {
    Ok(match code {
        0 => [false, false, false],
        1 => [true, false, false],
        2 => [false, true, false],
        3 => [false, false, true],
        4 => [true, true, false],
        5 => [false, true, true],
        6 => [true, false, true],
        7 => [true, true, true],
        _ => {
            return Err(SimulationError::configuration(format!(
                "invalid essential component code {}",
                code
            )))
        }
    })
}

/// One stage of boundary conditions, as read from the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BcStage {
    /// First (one-based) step in which the stage is active.
    pub start_step: usize,
    /// Constrained boundary attributes.
    pub essential_ids: Vec<usize>,
    /// Component code of each attribute. Negative codes put the attribute into the
    /// velocity gradient group.
    pub essential_comps: Vec<i32>,
    /// Three velocity components per attribute of the velocity group, in the order of
    /// `essential_ids`.
    #[serde(default)]
    pub essential_vals: Vec<f64>,
    /// Velocity gradient, row-major.
    #[serde(default)]
    pub velocity_gradient: Option<[[f64; 3]; 3]>,
    #[serde(default)]
    pub vgrad_origin: Option<[f64; 3]>,
}

/// Attribute and component masks of one named group. Index `i` refers to attribute `i + 1`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BcGroup {
    pub attributes: Vec<bool>,
    pub components: Vec<ComponentMask>,
}

impl BcGroup {
    pub fn new(num_attributes: usize) -> Self {
        Self {
            attributes: vec![false; num_attributes],
            components: vec![[false; 3]; num_attributes],
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.attributes.iter().any(|&active| active)
    }

    fn insert(&mut self, attribute: usize, mask: ComponentMask) {
        let idx = attribute - 1;
        self.attributes[idx] = true;
        for (existing, new) in self.components[idx].iter_mut().zip(mask) {
            *existing |= new;
        }
    }

    pub fn contains(&self, attribute: usize) -> bool {
        attribute >= 1 && self.attributes.get(attribute - 1).copied().unwrap_or(false)
    }

    pub fn mask(&self, attribute: usize) -> ComponentMask {
        self.components
            .get(attribute.wrapping_sub(1))
            .copied()
            .unwrap_or([false; 3])
    }
}

/// The essential boundary conditions of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct EssentialBcSet {
    /// Union of all groups. Determines the essential true DOFs of the operator.
    pub total: BcGroup,
    pub velocity: BcGroup,
    pub velocity_gradient: BcGroup,
    /// Prescribed velocity of each attribute of the velocity group.
    pub velocity_values: Vec<Vector3<f64>>,
    pub velocity_gradient_tensor: Matrix3<f64>,
    /// Origin of the velocity gradient field. When absent, the per-axis minimum nodal
    /// coordinate over all ranks is used.
    pub origin: Option<Point3<f64>>,
}

/// A prescribed velocity as a function of position and time, overriding the uniform
/// values of the velocity group.
pub type VelocityFunction = Arc<dyn Fn(&Point3<f64>, f64) -> Vector3<f64> + Send + Sync>;

/// Provides the boundary conditions of each step.
#[derive(Clone)]
pub struct BoundaryConditionManager {
    stages: Vec<BcStage>,
    num_attributes: usize,
    velocity_function: Option<VelocityFunction>,
}

impl fmt::Debug for BoundaryConditionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundaryConditionManager")
            .field("stages", &self.stages)
            .field("num_attributes", &self.num_attributes)
            .field("velocity_function", &self.velocity_function.is_some())
            .finish()
    }
}

impl BoundaryConditionManager {
    pub fn new(mut stages: Vec<BcStage>, num_attributes: usize) -> Result<Self> {
        if stages.is_empty() {
            return Err(SimulationError::configuration("at least one boundary condition stage is required"));
        }
        stages.sort_by_key(|stage| stage.start_step);
        if stages[0].start_step != 1 {
            return Err(SimulationError::configuration("the first boundary condition stage must start at step 1"));
        }
        if stages
            .windows(2)
            .any(|pair| pair[0].start_step == pair[1].start_step)
        {
            return Err(SimulationError::configuration("two boundary condition stages start at the same step"));
        }
        for stage in &stages {
            Self::validate_stage(stage, num_attributes)?;
        }
        Ok(Self {
            stages,
            num_attributes,
            velocity_function: None,
        })
    }

    pub fn with_velocity_function(self, function: VelocityFunction) -> Self {
        Self {
            velocity_function: Some(function),
            ..self
        }
    }

    pub fn velocity_function(&self) -> Option<&VelocityFunction> {
        self.velocity_function.as_ref()
    }

    fn validate_stage(stage: &BcStage, num_attributes: usize) -> Result<()> {
        let step = stage.start_step;
        if stage.essential_ids.len() != stage.essential_comps.len() {
            return Err(SimulationError::configuration(format!(
                "stage starting at step {}: {} essential ids but {} component codes",
                step,
                stage.essential_ids.len(),
                stage.essential_comps.len()
            )));
        }
        if let Some(&id) = stage
            .essential_ids
            .iter()
            .find(|&&id| id == 0 || id > num_attributes)
        {
            return Err(SimulationError::configuration(format!(
                "stage starting at step {}: boundary attribute {} does not exist",
                step, id
            )));
        }
        for &code in &stage.essential_comps {
            component_mask(code.unsigned_abs())?;
        }
        let num_velocity = stage.essential_comps.iter().filter(|&&c| c >= 0).count();
        if stage.essential_vals.len() != 3 * num_velocity {
            return Err(SimulationError::configuration(format!(
                "stage starting at step {}: expected {} essential values, got {}",
                step,
                3 * num_velocity,
                stage.essential_vals.len()
            )));
        }
        let has_gradient_group = stage.essential_comps.iter().any(|&c| c < 0);
        if has_gradient_group && stage.velocity_gradient.is_none() {
            return Err(SimulationError::configuration(format!(
                "stage starting at step {}: negative component codes require a velocity gradient",
                step
            )));
        }
        Ok(())
    }

    fn stage(&self, step: usize) -> &BcStage {
        let idx = self
            .stages
            .partition_point(|stage| stage.start_step <= step)
            .saturating_sub(1);
        &self.stages[idx]
    }

    /// Whether a new stage becomes active at `step`.
    pub fn bcs_changed(&self, step: usize) -> bool {
        self.stages.iter().any(|stage| stage.start_step == step)
    }

    /// The boundary conditions active at the (one-based) `step`.
    pub fn update_bc_data(&self, step: usize) -> EssentialBcSet {
        let stage = self.stage(step);
        let n = self.num_attributes;
        let mut total = BcGroup::new(n);
        let mut velocity = BcGroup::new(n);
        let mut velocity_gradient = BcGroup::new(n);
        let mut velocity_values = vec![Vector3::zeros(); n];

        let mut values = stage.essential_vals.chunks_exact(3);
        for (&id, &code) in stage.essential_ids.iter().zip(&stage.essential_comps) {
            // Codes were validated on construction
            let mask = component_mask(code.unsigned_abs()).unwrap_or([false; 3]);
            total.insert(id, mask);
            if code < 0 {
                velocity_gradient.insert(id, mask);
            } else {
                velocity.insert(id, mask);
                if let Some(v) = values.next() {
                    velocity_values[id - 1] = Vector3::new(v[0], v[1], v[2]);
                }
            }
        }

        let velocity_gradient_tensor = stage
            .velocity_gradient
            .map(|rows| Matrix3::from_fn(|i, j| rows[i][j]))
            .unwrap_or_else(Matrix3::zeros);

        EssentialBcSet {
            total,
            velocity,
            velocity_gradient,
            velocity_values,
            velocity_gradient_tensor,
            origin: stage.vgrad_origin.map(Point3::from),
        }
    }
}

/// Per-axis minimum of the nodal coordinates over all ranks.
pub fn global_minimum_corner(coordinates: &DVector<f64>, comm: &dyn Communicator) -> Point3<f64> {
    let mut min = [f64::INFINITY; 3];
    for node in coordinates.as_slice().chunks_exact(3) {
        for (m, &x) in min.iter_mut().zip(node) {
            *m = m.min(x);
        }
    }
    comm.all_reduce_min(&mut min);
    Point3::from(min)
}

/// Writes the prescribed velocities of `bcs` into the essential entries of `velocity`.
///
/// `coordinates` is the current nodal configuration. Uniform (or function) values are
/// applied first, then the velocity gradient field `L (x - x_origin)`. Returns the origin
/// used for the velocity gradient group, if that group is active.
pub fn apply_essential_velocities(
    bcs: &EssentialBcSet,
    space: &H1VectorSpace,
    coordinates: &DVector<f64>,
    time: f64,
    velocity_function: Option<&VelocityFunction>,
    comm: &dyn Communicator,
    velocity: &mut DVector<f64>,
) -> Option<Point3<f64>> {
    let node_position =
        |node: usize| Point3::new(coordinates[3 * node], coordinates[3 * node + 1], coordinates[3 * node + 2]);

    if !bcs.velocity.is_empty() {
        for face in space.mesh().boundary_faces() {
            if !bcs.velocity.contains(face.attribute) {
                continue;
            }
            let mask = bcs.velocity.mask(face.attribute);
            for &node in &face.nodes {
                let value = match velocity_function {
                    Some(function) => function(&node_position(node), time),
                    None => bcs.velocity_values[face.attribute - 1],
                };
                for c in (0..3).filter(|&c| mask[c]) {
                    velocity[3 * node + c] = value[c];
                }
            }
        }
    }

    if bcs.velocity_gradient.is_empty() {
        return None;
    }

    // The origin takes part in the reduction also when it is given
    let mut origin = match bcs.origin {
        Some(origin) => [origin.x, origin.y, origin.z],
        None => {
            let min = global_minimum_corner(coordinates, comm);
            [min.x, min.y, min.z]
        }
    };
    if bcs.origin.is_some() {
        comm.all_reduce_min(&mut origin);
    }
    let origin = Point3::from(origin);

    let dofs = space.essential_true_dofs(&bcs.velocity_gradient.attributes, &bcs.velocity_gradient.components);
    for dof in dofs {
        let (node, c) = (dof / 3, dof % 3);
        let v = bcs.velocity_gradient_tensor * (node_position(node) - origin);
        velocity[dof] = v[c];
    }
    Some(origin)
}
