use nalgebra::DVector;
use rayon::prelude::*;

use crate::fe::{GeometricFactors, H1VectorSpace};
use crate::operator::local::{assemble_element_vectors, element_stiffness, ElementMatrix, ElementVector};
use crate::operator::{AssemblyMode, AssemblyStrategy, EssentialDofs};
use crate::quadrature_field::QuadratureField;

/// Matrix-free Jacobian from dense per-element blocks.
#[derive(Debug, Clone, Default)]
pub struct ElementAssembly {
    blocks: Vec<ElementMatrix>,
}

impl ElementAssembly {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn element_matrix(&self, element: usize) -> &ElementMatrix {
        &self.blocks[element]
    }
}

impl AssemblyStrategy for ElementAssembly {
    fn mode(&self) -> AssemblyMode {
        AssemblyMode::ElementAssembly
    }

    fn assemble(
        &mut self,
        space: &H1VectorSpace,
        geometry: &GeometricFactors,
        tangent: &QuadratureField,
        _essential: &EssentialDofs,
    ) {
        self.blocks = (0..space.num_elements())
            .into_par_iter()
            .map(|e| element_stiffness(geometry.element(e), tangent.element(e)))
            .collect();
    }

    fn apply_local(&self, space: &H1VectorSpace, x: &DVector<f64>, y: &mut DVector<f64>) {
        assemble_element_vectors(space, y, |e| self.blocks[e] * space.gather_element_vector(e, x));
    }

    fn diagonal(&self, space: &H1VectorSpace) -> DVector<f64> {
        let mut diagonal = DVector::zeros(space.num_true_dofs());
        assemble_element_vectors(space, &mut diagonal, |e| -> ElementVector { self.blocks[e].diagonal() });
        diagonal
    }
}
