use nalgebra::{DVector, SMatrix, SVector};

use crate::error::{Result, SimulationError};
use crate::fe::{HexMesh, ReferenceElement, DOFS_PER_ELEMENT, NODES_PER_ELEMENT};

/// Component mask for one boundary attribute.
pub type ComponentMask = [bool; 3];

/// Continuous, trilinear, three-component vector space on a hexahedral mesh.
#[derive(Debug, Clone)]
pub struct H1VectorSpace {
    mesh: HexMesh,
    reference: ReferenceElement,
}

impl H1VectorSpace {
    pub fn new(mesh: HexMesh) -> Self {
        Self {
            mesh,
            reference: ReferenceElement::hex8_gauss(),
        }
    }

    pub fn mesh(&self) -> &HexMesh {
        &self.mesh
    }

    pub fn reference_element(&self) -> &ReferenceElement {
        &self.reference
    }

    pub fn num_nodes(&self) -> usize {
        self.mesh.vertices().len()
    }

    pub fn num_elements(&self) -> usize {
        self.mesh.connectivity().len()
    }

    pub fn num_quadrature_points(&self) -> usize {
        self.reference.num_quadrature_points()
    }

    pub fn num_true_dofs(&self) -> usize {
        3 * self.num_nodes()
    }

    pub fn num_boundary_attributes(&self) -> usize {
        self.mesh.num_boundary_attributes()
    }

    pub fn element_nodes(&self, element: usize) -> &[usize; NODES_PER_ELEMENT] {
        &self.mesh.connectivity()[element]
    }

    /// Global true DOFs of an element, ordered as `3 * local_node + component`.
    pub fn element_dofs(&self, element: usize) -> [usize; DOFS_PER_ELEMENT] {
        let nodes = self.element_nodes(element);
        let mut dofs = [0; DOFS_PER_ELEMENT];
        for (a, &node) in nodes.iter().enumerate() {
            for c in 0..3 {
                dofs[3 * a + c] = 3 * node + c;
            }
        }
        dofs
    }

    /// Nodal coordinates of the mesh as a vector in the layout of the true DOFs.
    pub fn node_coordinates(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.num_true_dofs(),
            self.mesh.vertices().iter().flat_map(|v| v.coords.iter().copied()),
        )
    }

    /// Gathers a nodal vector field of an element into a `3 x 8` matrix with one column per node.
    pub fn gather_element(&self, element: usize, field: &DVector<f64>) -> SMatrix<f64, 3, NODES_PER_ELEMENT> {
        let nodes = self.element_nodes(element);
        SMatrix::from_fn(|c, a| field[3 * nodes[a] + c])
    }

    pub fn gather_element_vector(&self, element: usize, field: &DVector<f64>) -> SVector<f64, DOFS_PER_ELEMENT> {
        let dofs = self.element_dofs(element);
        SVector::from_fn(|i, _| field[dofs[i]])
    }

    pub fn scatter_add_element(&self, element: usize, local: &SVector<f64, DOFS_PER_ELEMENT>, global: &mut DVector<f64>) {
        for (i, &dof) in self.element_dofs(element).iter().enumerate() {
            global[dof] += local[i];
        }
    }

    /// Checks that a per-attribute mask covers every boundary attribute of the mesh.
    pub fn check_attribute_mask_len(&self, len: usize) -> Result<()> {
        let num_attributes = self.num_boundary_attributes();
        if len < num_attributes {
            return Err(SimulationError::configuration(format!(
                "attribute mask has {} entries but the mesh has {} boundary attributes",
                len, num_attributes
            )));
        }
        Ok(())
    }

    /// Sorted list of true DOFs constrained by the given boundary attributes.
    ///
    /// `attributes[i]` marks attribute `i + 1` as essential and `components[i]` selects
    /// which of its velocity components are constrained.
    pub fn essential_true_dofs(&self, attributes: &[bool], components: &[ComponentMask]) -> Vec<usize> {
        let mut dofs: Vec<usize> = self
            .mesh
            .boundary_faces()
            .iter()
            .filter(|face| attributes.get(face.attribute - 1).copied().unwrap_or(false))
            .flat_map(|face| {
                let mask = components
                    .get(face.attribute - 1)
                    .copied()
                    .unwrap_or([false; 3]);
                face.nodes.iter().flat_map(move |&node| {
                    (0..3)
                        .filter(move |&c| mask[c])
                        .map(move |c| 3 * node + c)
                })
            })
            .collect();
        dofs.sort_unstable();
        dofs.dedup();
        dofs
    }
}
