use nalgebra::{Point3, SMatrix, SVector, Vector3};

/// Number of nodes of a trilinear hexahedron.
pub const NODES_PER_ELEMENT: usize = 8;
/// Number of velocity DOFs per element.
pub const DOFS_PER_ELEMENT: usize = 3 * NODES_PER_ELEMENT;
/// Number of points of the 2x2x2 Gauss rule.
pub const QUADRATURE_POINTS_PER_ELEMENT: usize = 8;

/// Reference coordinates of the Hex8 nodes, bottom layer counterclockwise followed by the top layer.
#[rustfmt::skip]
pub const HEX8_REFERENCE_NODES: [[f64; 3]; NODES_PER_ELEMENT] = [
    [-1.0, -1.0, -1.0],
    [ 1.0, -1.0, -1.0],
    [ 1.0,  1.0, -1.0],
    [-1.0,  1.0, -1.0],
    [-1.0, -1.0,  1.0],
    [ 1.0, -1.0,  1.0],
    [ 1.0,  1.0,  1.0],
    [-1.0,  1.0,  1.0],
];

fn phi_linear_1d(alpha: f64, xi: f64) -> f64 {
    (1.0 + alpha * xi) / 2.0
}

fn phi_linear_1d_grad(alpha: f64) -> f64 {
    alpha / 2.0
}

/// Values of the eight trilinear basis functions at `xi`.
pub fn hex8_basis(xi: &Point3<f64>) -> SVector<f64, NODES_PER_ELEMENT> {
    SVector::from_fn(|a, _| {
        let [alpha, beta, gamma] = HEX8_REFERENCE_NODES[a];
        phi_linear_1d(alpha, xi[0]) * phi_linear_1d(beta, xi[1]) * phi_linear_1d(gamma, xi[2])
    })
}

/// Reference gradients of the eight basis functions at `xi`, one column per node.
pub fn hex8_gradients(xi: &Point3<f64>) -> SMatrix<f64, 3, NODES_PER_ELEMENT> {
    let phi = phi_linear_1d;
    let grad = phi_linear_1d_grad;
    let columns: Vec<Vector3<f64>> = HEX8_REFERENCE_NODES
        .iter()
        .map(|&[alpha, beta, gamma]| {
            Vector3::new(
                grad(alpha) * phi(beta, xi[1]) * phi(gamma, xi[2]),
                phi(alpha, xi[0]) * grad(beta) * phi(gamma, xi[2]),
                phi(alpha, xi[0]) * phi(beta, xi[1]) * grad(gamma),
            )
        })
        .collect();
    SMatrix::from_columns(&columns)
}

/// Tabulated basis data of the Hex8 element at the points of the 2x2x2 Gauss rule.
#[derive(Debug, Clone)]
pub struct ReferenceElement {
    weights: [f64; QUADRATURE_POINTS_PER_ELEMENT],
    points: [Point3<f64>; QUADRATURE_POINTS_PER_ELEMENT],
    basis: [SVector<f64, NODES_PER_ELEMENT>; QUADRATURE_POINTS_PER_ELEMENT],
    gradients: [SMatrix<f64, 3, NODES_PER_ELEMENT>; QUADRATURE_POINTS_PER_ELEMENT],
}

impl ReferenceElement {
    /// Hex8 element with the tensor product two-point Gauss rule on `[-1, 1]^3`.
    pub fn hex8_gauss() -> Self {
        let g = 1.0 / 3.0f64.sqrt();
        let abscissas = [-g, g];
        let mut points = [Point3::origin(); QUADRATURE_POINTS_PER_ELEMENT];
        let mut q = 0;
        for &z in &abscissas {
            for &y in &abscissas {
                for &x in &abscissas {
                    points[q] = Point3::new(x, y, z);
                    q += 1;
                }
            }
        }
        Self {
            weights: [1.0; QUADRATURE_POINTS_PER_ELEMENT],
            points,
            basis: points.map(|xi| hex8_basis(&xi)),
            gradients: points.map(|xi| hex8_gradients(&xi)),
        }
    }

    pub fn num_quadrature_points(&self) -> usize {
        QUADRATURE_POINTS_PER_ELEMENT
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn basis(&self, q: usize) -> &SVector<f64, NODES_PER_ELEMENT> {
        &self.basis[q]
    }

    pub fn gradients(&self, q: usize) -> &SMatrix<f64, 3, NODES_PER_ELEMENT> {
        &self.gradients[q]
    }
}
