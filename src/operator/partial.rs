use nalgebra::{DVector, Matrix6, SMatrix, SVector};

use crate::fe::{GeometricFactors, H1VectorSpace, NODES_PER_ELEMENT};
use crate::operator::local::{assemble_element_vectors, strain_displacement_matrix, tangent_matrix, ElementVector};
use crate::operator::{AssemblyMode, AssemblyStrategy, EssentialDofs};
use crate::quadrature_field::QuadratureField;

/// Matrix-free Jacobian from per-point shape gradients and weighted tangents.
#[derive(Debug, Clone, Default)]
pub struct PartialAssembly {
    num_quadrature_points: usize,
    gradients: Vec<SMatrix<f64, 3, NODES_PER_ELEMENT>>,
    /// `w det J * T` of every point.
    weighted_tangents: Vec<Matrix6<f64>>,
}

impl PartialAssembly {
    pub fn new() -> Self {
        Self::default()
    }

    fn element_points(&self, element: usize) -> impl Iterator<Item = (&SMatrix<f64, 3, NODES_PER_ELEMENT>, &Matrix6<f64>)> {
        let range = element * self.num_quadrature_points..(element + 1) * self.num_quadrature_points;
        self.gradients[range.clone()]
            .iter()
            .zip(&self.weighted_tangents[range])
    }
}

impl AssemblyStrategy for PartialAssembly {
    fn mode(&self) -> AssemblyMode {
        AssemblyMode::PartialAssembly
    }

    fn assemble(
        &mut self,
        space: &H1VectorSpace,
        geometry: &GeometricFactors,
        tangent: &QuadratureField,
        _essential: &EssentialDofs,
    ) {
        let nq = space.num_quadrature_points();
        self.num_quadrature_points = nq;
        self.gradients.clear();
        self.weighted_tangents.clear();
        for e in 0..space.num_elements() {
            for q in 0..nq {
                let point = geometry.point(e, q);
                self.gradients.push(point.gradients);
                self.weighted_tangents
                    .push(tangent_matrix(tangent.point(e, q)) * point.weighted_det);
            }
        }
    }

    fn apply_local(&self, space: &H1VectorSpace, x: &DVector<f64>, y: &mut DVector<f64>) {
        assemble_element_vectors(space, y, |e| {
            let u = space.gather_element_vector(e, x);
            let mut f = ElementVector::zeros();
            for (gradients, weighted_tangent) in self.element_points(e) {
                let b = strain_displacement_matrix(gradients);
                let stress_rate: SVector<f64, 6> = weighted_tangent * (b * u);
                f.gemv_tr(1.0, &b, &stress_rate, 1.0);
            }
            f
        });
    }

    fn diagonal(&self, space: &H1VectorSpace) -> DVector<f64> {
        let mut diagonal = DVector::zeros(space.num_true_dofs());
        assemble_element_vectors(space, &mut diagonal, |e| {
            let mut d = ElementVector::zeros();
            for (gradients, weighted_tangent) in self.element_points(e) {
                let b = strain_displacement_matrix(gradients);
                let tb = weighted_tangent * b;
                for k in 0..d.len() {
                    d[k] += b.column(k).dot(&tb.column(k));
                }
            }
            d
        });
        diagonal
    }
}
