//! Element-wise projections of the material state into user-facing fields.
//!
//! All projections act on element averages of the committed quadrature data and locate
//! state variables by name through the material's state layout.
use std::str::FromStr;

use crate::error::{Result, SimulationError};
use crate::fe::GeometricFactors;
use crate::homogenize::{element_average, element_centroids, element_volumes};
use crate::material::{layout, von_mises, StateLayout};
use crate::operator::MechanicsOperator;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ProjectedField {
    Stress,
    VonMises,
    Hydrostatic,
    /// Effective plastic strain rate.
    DpEff,
    /// Effective plastic strain.
    EffectivePlasticStrain,
    ShearRate,
    Orientation,
    Hardness,
    ElasticStrain,
    Volume,
    Centroid,
}

impl FromStr for ProjectedField {
    type Err = SimulationError;

    fn from_str(name: &str) -> Result<Self> {
        Ok(match name {
            "stress" => Self::Stress,
            "von_mises" => Self::VonMises,
            "hydrostatic" => Self::Hydrostatic,
            "dp_eff" => Self::DpEff,
            "eq_pl_strain" => Self::EffectivePlasticStrain,
            "shear_rate" => Self::ShearRate,
            "quats" => Self::Orientation,
            "hardness" => Self::Hardness,
            "elastic_strain" => Self::ElasticStrain,
            "volume" => Self::Volume,
            "centroid" => Self::Centroid,
            _ => {
                return Err(SimulationError::configuration(format!(
                    "unknown projection field \"{}\"",
                    name
                )))
            }
        })
    }
}

/// Values of a projection, `width` per element.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub width: usize,
    pub values: Vec<f64>,
}

impl Projection {
    pub fn element(&self, element: usize) -> &[f64] {
        &self.values[element * self.width..(element + 1) * self.width]
    }

    pub fn num_elements(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.values.len() / self.width
        }
    }
}

/// Scales a quaternion to unit length. The zero quaternion is left unchanged.
pub fn normalize_quaternion(q: &mut [f64]) {
    let norm = q.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        q.iter_mut().for_each(|v| *v /= norm);
    }
}

/// Full elastic strain `[11, 22, 33, 23, 31, 12]` from the five-component deviatoric
/// representation and the relative volume.
pub fn elastic_strain_from_deviatoric(v: &[f64], relative_volume: f64) -> [f64; 6] {
    let sqrt2_inv = 1.0 / 2.0f64.sqrt();
    let t1 = sqrt2_inv * v[0];
    let t2 = v[1] / 6.0f64.sqrt();
    let volumetric = relative_volume.ln();
    [
        t1 - t2 + volumetric,
        -t1 - t2 + volumetric,
        (2.0f64 / 3.0).sqrt() * v[1] + volumetric,
        sqrt2_inv * v[4],
        sqrt2_inv * v[3],
        sqrt2_inv * v[2],
    ]
}

/// Computes projections from element averages of the committed stress and state.
#[derive(Debug)]
pub struct FieldProjector<'a> {
    operator: &'a MechanicsOperator,
    geometry: GeometricFactors,
    stress: Vec<f64>,
    state: Vec<f64>,
}

impl<'a> FieldProjector<'a> {
    pub fn new(operator: &'a MechanicsOperator) -> Self {
        let geometry = operator.end_geometry();
        let store = operator.material().store();
        let stress = element_average(store.stress.begin(), &geometry);
        let state = element_average(store.state.begin(), &geometry);
        Self {
            operator,
            geometry,
            stress,
            state,
        }
    }

    fn layout(&self) -> &StateLayout {
        self.operator.material().state_layout()
    }

    fn num_elements(&self) -> usize {
        self.geometry.num_elements()
    }

    fn stress(&self, element: usize) -> &[f64] {
        &self.stress[6 * element..6 * (element + 1)]
    }

    fn state(&self, element: usize) -> &[f64] {
        let len = self.layout().len();
        &self.state[len * element..len * (element + 1)]
    }

    fn map_elements<F>(&self, width: usize, f: F) -> Projection
    where
        F: Fn(usize, &mut [f64]),
    {
        let mut values = vec![0.0; width * self.num_elements()];
        if width > 0 {
            for (e, out) in values.chunks_exact_mut(width).enumerate() {
                f(e, out);
            }
        }
        Projection { width, values }
    }

    /// Copies the state variable `name` of every element.
    fn state_variable(&self, name: &str) -> Result<Projection> {
        let slot = self.layout().lookup(name)?;
        Ok(self.map_elements(slot.width, |e, out| out.copy_from_slice(slot.get(self.state(e)))))
    }

    /// Projects the field with the given name. Unknown names are configuration errors.
    pub fn project_named(&self, name: &str) -> Result<Projection> {
        self.project(name.parse()?)
    }

    pub fn project(&self, field: ProjectedField) -> Result<Projection> {
        use ProjectedField::*;
        match field {
            Stress => Ok(self.map_elements(6, |e, out| out.copy_from_slice(self.stress(e)))),
            VonMises => Ok(self.map_elements(1, |e, out| out[0] = von_mises(self.stress(e)))),
            Hydrostatic => Ok(self.map_elements(1, |e, out| {
                let s = self.stress(e);
                out[0] = (s[0] + s[1] + s[2]) / 3.0;
            })),
            DpEff => self.state_variable(layout::SHEAR_RATE_EFFECTIVE),
            EffectivePlasticStrain => self.state_variable(layout::SHEAR_EFFECTIVE),
            ShearRate => self.state_variable(layout::SHEAR_RATES),
            Hardness => self.state_variable(layout::HARDNESS),
            Orientation => {
                let mut projection = self.state_variable(layout::QUATERNIONS)?;
                projection
                    .values
                    .chunks_exact_mut(4)
                    .for_each(normalize_quaternion);
                Ok(projection)
            }
            ElasticStrain => {
                let strain = self.layout().lookup(layout::ELASTIC_STRAIN)?;
                let relative_volume = self.layout().lookup(layout::RELATIVE_VOLUME)?;
                Ok(self.map_elements(6, |e, out| {
                    let state = self.state(e);
                    let full = elastic_strain_from_deviatoric(strain.get(state), relative_volume.get(state)[0]);
                    out.copy_from_slice(&full);
                }))
            }
            Volume => Ok(Projection {
                width: 1,
                values: element_volumes(&self.geometry),
            }),
            Centroid => {
                let centroids = element_centroids(
                    self.operator.space(),
                    &self.geometry,
                    self.operator.kinematics().end(),
                );
                Ok(Projection {
                    width: 3,
                    values: centroids.iter().flat_map(|c| [c.x, c.y, c.z]).collect(),
                })
            }
        }
    }
}
