//! Element-level kernels shared by the assembly strategies.
use nalgebra::{DVector, Matrix6, SMatrix, SVector};
use rayon::prelude::*;

use crate::fe::{H1VectorSpace, QuadraturePointGeometry, DOFS_PER_ELEMENT, NODES_PER_ELEMENT};

pub type ElementVector = SVector<f64, DOFS_PER_ELEMENT>;
pub type ElementMatrix = SMatrix<f64, DOFS_PER_ELEMENT, DOFS_PER_ELEMENT>;

/// Maps element velocities to the rate of deformation in Voigt order
/// `[11, 22, 33, 23, 13, 12]` with engineering shear components.
pub type StrainDisplacementMatrix = SMatrix<f64, 6, DOFS_PER_ELEMENT>;

pub fn strain_displacement_matrix(gradients: &SMatrix<f64, 3, NODES_PER_ELEMENT>) -> StrainDisplacementMatrix {
    let mut b = StrainDisplacementMatrix::zeros();
    for a in 0..NODES_PER_ELEMENT {
        let [dx, dy, dz] = [gradients[(0, a)], gradients[(1, a)], gradients[(2, a)]];
        let (u, v, w) = (3 * a, 3 * a + 1, 3 * a + 2);
        b[(0, u)] = dx;
        b[(1, v)] = dy;
        b[(2, w)] = dz;
        b[(3, v)] = dz;
        b[(3, w)] = dy;
        b[(4, u)] = dz;
        b[(4, w)] = dx;
        b[(5, u)] = dy;
        b[(5, v)] = dx;
    }
    b
}

/// Reads a row-major 6 x 6 tangent.
pub fn tangent_matrix(values: &[f64]) -> Matrix6<f64> {
    Matrix6::from_row_slice(&values[..36])
}

/// `sum_q B_q^T sigma_q w_q det J_q` for the stresses of one element.
pub fn element_internal_force(points: &[QuadraturePointGeometry], stress: &[f64]) -> ElementVector {
    let mut f = ElementVector::zeros();
    for (point, sigma) in points.iter().zip(stress.chunks_exact(6)) {
        let b = strain_displacement_matrix(&point.gradients);
        let sigma = SVector::<f64, 6>::from_column_slice(sigma);
        f.gemv_tr(point.weighted_det, &b, &sigma, 1.0);
    }
    f
}

/// `sum_q B_q^T T_q B_q w_q det J_q` for the tangents of one element.
pub fn element_stiffness(points: &[QuadraturePointGeometry], tangent: &[f64]) -> ElementMatrix {
    let mut k = ElementMatrix::zeros();
    for (point, t) in points.iter().zip(tangent.chunks_exact(36)) {
        let b = strain_displacement_matrix(&point.gradients);
        let db = tangent_matrix(t) * b * point.weighted_det;
        k.gemm_tr(1.0, &b, &db, 1.0);
    }
    k
}

/// Evaluates `local` for every element in parallel and accumulates the results into
/// `output` in element order, so the sum does not depend on thread scheduling.
pub fn assemble_element_vectors<F>(space: &H1VectorSpace, output: &mut DVector<f64>, local: F)
where
    F: Fn(usize) -> ElementVector + Sync + Send,
{
    let contributions: Vec<ElementVector> = (0..space.num_elements()).into_par_iter().map(local).collect();
    output.fill(0.0);
    for (element, contribution) in contributions.iter().enumerate() {
        space.scatter_add_element(element, contribution, output);
    }
}
