use eyre::eyre;
use log::debug;
use nalgebra::{DVector, Matrix3, SMatrix};
use rayon::prelude::*;

use crate::fe::{H1VectorSpace, NODES_PER_ELEMENT, QUADRATURE_POINTS_PER_ELEMENT};

/// Geometric data at one quadrature point of a given configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadraturePointGeometry {
    /// Jacobian of the map from reference to physical coordinates.
    pub jacobian: Matrix3<f64>,
    pub det_jacobian: f64,
    /// Quadrature weight times `det_jacobian`.
    pub weighted_det: f64,
    /// Physical gradients `grad_x N_a`, one column per node.
    pub gradients: SMatrix<f64, 3, NODES_PER_ELEMENT>,
}

impl Default for QuadraturePointGeometry {
    fn default() -> Self {
        Self {
            jacobian: Matrix3::identity(),
            det_jacobian: 0.0,
            weighted_det: 0.0,
            gradients: SMatrix::zeros(),
        }
    }
}

/// Geometric factors of every quadrature point for one nodal configuration.
#[derive(Debug, Clone)]
pub struct GeometricFactors {
    points: Vec<QuadraturePointGeometry>,
    num_quadrature_points: usize,
    valid: bool,
}

fn element_geometry(
    space: &H1VectorSpace,
    element: usize,
    coordinates: &DVector<f64>,
) -> eyre::Result<[QuadraturePointGeometry; QUADRATURE_POINTS_PER_ELEMENT]> {
    let reference = space.reference_element();
    let x = space.gather_element(element, coordinates);
    let mut result = [QuadraturePointGeometry::default(); QUADRATURE_POINTS_PER_ELEMENT];
    for (q, (geometry, w)) in result.iter_mut().zip(reference.weights()).enumerate() {
        let g_ref = reference.gradients(q);
        let jacobian = x * g_ref.transpose();
        let det_jacobian = jacobian.determinant();
        if !(det_jacobian > 0.0) {
            return Err(eyre!(
                "Non-positive element Jacobian determinant {} encountered in element {}",
                det_jacobian,
                element
            ));
        }
        let j_inv_t = jacobian
            .try_inverse()
            .ok_or_else(|| eyre!("Singular element Jacobian encountered"))?
            .transpose();
        *geometry = QuadraturePointGeometry {
            jacobian,
            det_jacobian,
            weighted_det: w * det_jacobian,
            gradients: j_inv_t * g_ref,
        };
    }
    Ok(result)
}

impl GeometricFactors {
    /// Computes the geometric factors of all elements for the given nodal coordinates.
    ///
    /// Inverted or degenerate elements do not abort the computation. They mark the factors
    /// as invalid, which the caller must turn into a collective decision.
    pub fn compute(space: &H1VectorSpace, coordinates: &DVector<f64>) -> Self {
        let nq = space.num_quadrature_points();
        let per_element: Vec<_> = (0..space.num_elements())
            .into_par_iter()
            .map(|e| element_geometry(space, e, coordinates))
            .collect();

        let mut valid = true;
        let mut points = Vec::with_capacity(nq * per_element.len());
        for element_result in per_element {
            match element_result {
                Ok(element_points) => points.extend_from_slice(&element_points),
                Err(err) => {
                    if valid {
                        debug!("Invalid element geometry: {}", err);
                    }
                    valid = false;
                    points.extend_from_slice(&[QuadraturePointGeometry::default(); QUADRATURE_POINTS_PER_ELEMENT]);
                }
            }
        }

        Self {
            points,
            num_quadrature_points: nq,
            valid,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn num_quadrature_points(&self) -> usize {
        self.num_quadrature_points
    }

    pub fn num_elements(&self) -> usize {
        self.points.len() / self.num_quadrature_points
    }

    pub fn point(&self, element: usize, q: usize) -> &QuadraturePointGeometry {
        &self.points[element * self.num_quadrature_points + q]
    }

    pub fn element(&self, element: usize) -> &[QuadraturePointGeometry] {
        let nq = self.num_quadrature_points;
        &self.points[element * nq..(element + 1) * nq]
    }

    /// Volume of an element in this configuration.
    pub fn element_volume(&self, element: usize) -> f64 {
        self.element(element).iter().map(|p| p.weighted_det).sum()
    }
}
