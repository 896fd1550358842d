use nalgebra::DVector;
use nalgebra_sparse::ops::serial::spmm_csr_dense;
use nalgebra_sparse::ops::Op;
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;
use std::collections::BTreeSet;

use crate::error::{Result, SimulationError};
use crate::fe::{GeometricFactors, H1VectorSpace};
use crate::operator::local::{element_stiffness, ElementMatrix};
use crate::operator::{AssemblyMode, AssemblyStrategy, EssentialDofs};
use crate::quadrature_field::QuadratureField;
use crate::sparse::preconditioner::csr_diagonal;

/// Assembles the global Jacobian as a CSR matrix.
///
/// The sparsity pattern is computed once. Both the plain matrix and the matrix with
/// essential rows and columns eliminated are kept.
#[derive(Debug, Clone)]
pub struct FullAssembly {
    local: CsrMatrix<f64>,
    eliminated: CsrMatrix<f64>,
}

fn assemble_pattern(space: &H1VectorSpace) -> Result<SparsityPattern> {
    // Each matrix entry is stored exactly once, at the expense of assembly speed
    let mut entries = BTreeSet::new();
    for e in 0..space.num_elements() {
        let dofs = space.element_dofs(e);
        for &i in &dofs {
            for &j in &dofs {
                entries.insert((i, j));
            }
        }
    }

    let num_rows = space.num_true_dofs();
    let mut offsets = Vec::with_capacity(num_rows + 1);
    let mut column_indices = Vec::with_capacity(entries.len());
    offsets.push(0);
    for (i, j) in entries {
        // Loop to handle consecutive empty rows
        while i + 1 > offsets.len() {
            offsets.push(column_indices.len());
        }
        column_indices.push(j);
    }
    while offsets.len() < num_rows + 1 {
        offsets.push(column_indices.len());
    }

    SparsityPattern::try_from_offsets_and_indices(num_rows, num_rows, offsets, column_indices)
        .map_err(|err| SimulationError::configuration(format!("invalid Jacobian sparsity pattern: {}", err)))
}

impl FullAssembly {
    pub fn new(space: &H1VectorSpace) -> Result<Self> {
        let pattern = assemble_pattern(space)?;
        let values = vec![0.0; pattern.nnz()];
        let local = CsrMatrix::try_from_pattern_and_values(pattern, values)
            .map_err(|err| SimulationError::configuration(format!("failed to allocate Jacobian: {}", err)))?;
        Ok(Self {
            eliminated: local.clone(),
            local,
        })
    }

    /// The Jacobian without boundary conditions applied.
    pub fn local_matrix(&self) -> &CsrMatrix<f64> {
        &self.local
    }

    fn add_element_matrix(&mut self, dofs: &[usize], k: &ElementMatrix) {
        for (i, &row_index) in dofs.iter().enumerate() {
            let mut row = self.local.row_mut(row_index);
            let (cols, values) = row.cols_and_values_mut();
            for (j, col_index) in dofs.iter().enumerate() {
                if let Ok(idx) = cols.binary_search(col_index) {
                    values[idx] += k[(i, j)];
                }
            }
        }
    }

    fn eliminate(&mut self, essential: &EssentialDofs) {
        self.eliminated.values_mut().copy_from_slice(self.local.values());
        for (i, mut row) in self.eliminated.row_iter_mut().enumerate() {
            let row_is_essential = essential.contains(i);
            let (cols, values) = row.cols_and_values_mut();
            for (&j, value) in cols.iter().zip(values) {
                if row_is_essential || essential.contains(j) {
                    *value = if i == j { 1.0 } else { 0.0 };
                }
            }
        }
    }
}

impl AssemblyStrategy for FullAssembly {
    fn mode(&self) -> AssemblyMode {
        AssemblyMode::Full
    }

    fn assemble(
        &mut self,
        space: &H1VectorSpace,
        geometry: &GeometricFactors,
        tangent: &QuadratureField,
        essential: &EssentialDofs,
    ) {
        let element_matrices: Vec<ElementMatrix> = (0..space.num_elements())
            .into_par_iter()
            .map(|e| element_stiffness(geometry.element(e), tangent.element(e)))
            .collect();

        self.local.values_mut().fill(0.0);
        for (e, k) in element_matrices.iter().enumerate() {
            self.add_element_matrix(&space.element_dofs(e), k);
        }
        self.eliminate(essential);
    }

    fn apply_local(&self, _space: &H1VectorSpace, x: &DVector<f64>, y: &mut DVector<f64>) {
        spmm_csr_dense(0.0, &mut *y, 1.0, Op::NoOp(&self.local), Op::NoOp(x));
    }

    fn apply_eliminated(&self, _space: &H1VectorSpace, _essential: &EssentialDofs, x: &DVector<f64>, y: &mut DVector<f64>) {
        spmm_csr_dense(0.0, &mut *y, 1.0, Op::NoOp(&self.eliminated), Op::NoOp(x));
    }

    fn diagonal(&self, _space: &H1VectorSpace) -> DVector<f64> {
        csr_diagonal(&self.local)
    }

    fn eliminated_matrix(&self) -> Option<&CsrMatrix<f64>> {
        Some(&self.eliminated)
    }
}
