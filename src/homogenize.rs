//! Volume averages of quadrature fields.
//!
//! Averages follow a reduce-then-finalize pattern: partial sums of `w det J * value` and
//! `w det J` are computed per element, summed in element order, reduced over all ranks
//! and only then divided by the total volume.
use nalgebra::{DVector, Point3, Vector3};
use rayon::prelude::*;

use crate::comm::Communicator;
use crate::error::Result;
use crate::fe::{GeometricFactors, H1VectorSpace};
use crate::material::layout;
use crate::operator::MechanicsOperator;
use crate::quadrature_field::QuadratureField;

/// Order in which the plastic rate tensor is reported: `[11, 22, 33, 23, 13, 12]` of the
/// row-major 3 x 3 tensor.
pub const DP_TENSOR_REORDER: [usize; 6] = [0, 4, 8, 5, 2, 1];

/// Weighted sum of one element and its volume.
fn element_partial_sum(field: &QuadratureField, geometry: &GeometricFactors, element: usize) -> (Vec<f64>, f64) {
    let vdim = field.vdim();
    let mut sum = vec![0.0; vdim];
    let mut volume = 0.0;
    for (point, values) in geometry
        .element(element)
        .iter()
        .zip(field.element(element).chunks_exact(vdim))
    {
        volume += point.weighted_det;
        for (s, v) in sum.iter_mut().zip(values) {
            *s += point.weighted_det * v;
        }
    }
    (sum, volume)
}

/// Volume average of `field` over the whole domain of all ranks.
pub fn volume_average(field: &QuadratureField, geometry: &GeometricFactors, comm: &dyn Communicator) -> Vec<f64> {
    let vdim = field.vdim();
    let partial: Vec<(Vec<f64>, f64)> = (0..field.num_elements())
        .into_par_iter()
        .map(|e| element_partial_sum(field, geometry, e))
        .collect();

    // The total volume travels in the last slot of the reduction buffer
    let mut buffer = vec![0.0; vdim + 1];
    for (sum, volume) in &partial {
        for (b, s) in buffer.iter_mut().zip(sum) {
            *b += s;
        }
        buffer[vdim] += volume;
    }
    comm.all_reduce_sum(&mut buffer);

    let volume = buffer[vdim];
    buffer.truncate(vdim);
    for b in &mut buffer {
        *b /= volume;
    }
    buffer
}

/// Volume average of every element, `num_elements * vdim` values.
pub fn element_average(field: &QuadratureField, geometry: &GeometricFactors) -> Vec<f64> {
    (0..field.num_elements())
        .into_par_iter()
        .flat_map_iter(|e| {
            let (sum, volume) = element_partial_sum(field, geometry, e);
            sum.into_iter().map(move |s| s / volume)
        })
        .collect()
}

pub fn element_volumes(geometry: &GeometricFactors) -> Vec<f64> {
    (0..geometry.num_elements())
        .map(|e| geometry.element_volume(e))
        .collect()
}

/// Volume-weighted centroid of every element in the configuration of `geometry`.
pub fn element_centroids(
    space: &H1VectorSpace,
    geometry: &GeometricFactors,
    coordinates: &DVector<f64>,
) -> Vec<Point3<f64>> {
    let reference = space.reference_element();
    (0..space.num_elements())
        .map(|e| {
            let x = space.gather_element(e, coordinates);
            let mut weighted = Vector3::zeros();
            let mut volume = 0.0;
            for (q, point) in geometry.element(e).iter().enumerate() {
                weighted += (x * reference.basis(q)) * point.weighted_det;
                volume += point.weighted_det;
            }
            Point3::from(weighted / volume)
        })
        .collect()
}

/// Domain averages reported after an accepted step.
#[derive(Debug, Clone, PartialEq)]
pub struct HomogenizedValues {
    /// Cauchy stress in Voigt order.
    pub stress: [f64; 6],
    pub plastic_work: Option<f64>,
    /// Deformation gradient, row-major.
    pub def_grad: Option<[f64; 9]>,
    /// Plastic rate of deformation in the order of [`DP_TENSOR_REORDER`].
    pub dp_tensor: Option<[f64; 6]>,
}

/// Averages the committed fields of the operator's material over its end configuration.
///
/// Plastic work, deformation gradient and plastic rate tensor are only computed when
/// `additional_averages` is set. Nothing here modifies solver state.
pub fn homogenize(operator: &MechanicsOperator, additional_averages: bool) -> Result<HomogenizedValues> {
    let comm = operator.communicator();
    let geometry = operator.end_geometry();
    let material = operator.material();
    let store = material.store();

    let mut stress = [0.0; 6];
    stress.copy_from_slice(&volume_average(store.stress.begin(), &geometry, comm));

    if !additional_averages {
        return Ok(HomogenizedValues {
            stress,
            plastic_work: None,
            def_grad: None,
            dp_tensor: None,
        });
    }

    let plastic_work_slot = material.state_layout().lookup(layout::PLASTIC_WORK)?;
    let state_average = volume_average(store.state.begin(), &geometry, comm);
    let plastic_work = plastic_work_slot.get(&state_average)[0];

    let mut def_grad = [0.0; 9];
    def_grad.copy_from_slice(&volume_average(&operator.deformation_gradient(), &geometry, comm));

    let dp_full = volume_average(&material.plastic_rate_tensor(), &geometry, comm);
    let dp_tensor = DP_TENSOR_REORDER.map(|i| dp_full[i]);

    Ok(HomogenizedValues {
        stress,
        plastic_work: Some(plastic_work),
        def_grad: Some(def_grad),
        dp_tensor: Some(dp_tensor),
    })
}
