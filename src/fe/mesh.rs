use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimulationError};

/// Boundary attribute of the face `x = x_min`. Attributes are numbered from one.
pub const ATTRIBUTE_X_MIN: usize = 1;
pub const ATTRIBUTE_Y_MIN: usize = 2;
pub const ATTRIBUTE_Z_MIN: usize = 3;
pub const ATTRIBUTE_X_MAX: usize = 4;
pub const ATTRIBUTE_Y_MAX: usize = 5;
pub const ATTRIBUTE_Z_MAX: usize = 6;

/// A quadrilateral boundary face carrying a boundary attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryFace {
    pub nodes: [usize; 4],
    pub attribute: usize,
}

/// Unstructured storage of a hexahedral mesh with tagged boundary faces.
#[derive(Debug, Clone)]
pub struct HexMesh {
    vertices: Vec<Point3<f64>>,
    connectivity: Vec<[usize; 8]>,
    boundary_faces: Vec<BoundaryFace>,
}

impl HexMesh {
    pub fn from_parts(
        vertices: Vec<Point3<f64>>,
        connectivity: Vec<[usize; 8]>,
        boundary_faces: Vec<BoundaryFace>,
    ) -> Result<Self> {
        let num_vertices = vertices.len();
        let out_of_bounds = connectivity
            .iter()
            .flatten()
            .chain(boundary_faces.iter().flat_map(|face| face.nodes.iter()))
            .any(|&idx| idx >= num_vertices);
        if out_of_bounds {
            return Err(SimulationError::configuration("mesh refers to a vertex index out of bounds"));
        }
        if boundary_faces.iter().any(|face| face.attribute == 0) {
            return Err(SimulationError::configuration("boundary attributes are numbered from one"));
        }
        Ok(Self {
            vertices,
            connectivity,
            boundary_faces,
        })
    }

    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    pub fn vertices_mut(&mut self) -> &mut [Point3<f64>] {
        &mut self.vertices
    }

    pub fn connectivity(&self) -> &[[usize; 8]] {
        &self.connectivity
    }

    pub fn boundary_faces(&self) -> &[BoundaryFace] {
        &self.boundary_faces
    }

    /// The largest boundary attribute in the mesh.
    pub fn num_boundary_attributes(&self) -> usize {
        self.boundary_faces
            .iter()
            .map(|face| face.attribute)
            .max()
            .unwrap_or(0)
    }
}

/// Axis-aligned box to be meshed with uniform hexahedra.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxMeshSettings {
    pub origin: [f64; 3],
    pub extents: [f64; 3],
    pub cells: [usize; 3],
}

impl Default for BoxMeshSettings {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            extents: [1.0; 3],
            cells: [1; 3],
        }
    }
}

/// Creates a uniform hexahedral mesh of the box `origin + [0, extents]`.
///
/// Boundary faces are tagged with the `ATTRIBUTE_*` constants of this module.
pub fn create_box_hex_mesh(settings: &BoxMeshSettings) -> Result<HexMesh> {
    let [nx, ny, nz] = settings.cells;
    if nx == 0 || ny == 0 || nz == 0 {
        return Err(SimulationError::configuration("box mesh needs at least one cell per axis"));
    }
    if settings.extents.iter().any(|&l| !(l > 0.0)) {
        return Err(SimulationError::configuration("box mesh extents must be positive"));
    }

    let origin = Point3::from(settings.origin);
    let extents = Vector3::from(settings.extents);
    let h = Vector3::new(extents.x / nx as f64, extents.y / ny as f64, extents.z / nz as f64);
    let vertex_index = |i: usize, j: usize, k: usize| i + (nx + 1) * (j + (ny + 1) * k);

    let mut vertices = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
    for k in 0..=nz {
        for j in 0..=ny {
            for i in 0..=nx {
                let offset = Vector3::new(i as f64 * h.x, j as f64 * h.y, k as f64 * h.z);
                vertices.push(origin + offset);
            }
        }
    }

    let mut connectivity = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                connectivity.push([
                    vertex_index(i, j, k),
                    vertex_index(i + 1, j, k),
                    vertex_index(i + 1, j + 1, k),
                    vertex_index(i, j + 1, k),
                    vertex_index(i, j, k + 1),
                    vertex_index(i + 1, j, k + 1),
                    vertex_index(i + 1, j + 1, k + 1),
                    vertex_index(i, j + 1, k + 1),
                ]);
            }
        }
    }

    let mut boundary_faces = Vec::new();
    let mut push_faces = |attribute_min, attribute_max, quad: &dyn Fn(usize) -> [usize; 4], n| {
        boundary_faces.push(BoundaryFace {
            nodes: quad(0),
            attribute: attribute_min,
        });
        boundary_faces.push(BoundaryFace {
            nodes: quad(n),
            attribute: attribute_max,
        });
    };
    for k in 0..nz {
        for j in 0..ny {
            let quad = |i| {
                [
                    vertex_index(i, j, k),
                    vertex_index(i, j + 1, k),
                    vertex_index(i, j + 1, k + 1),
                    vertex_index(i, j, k + 1),
                ]
            };
            push_faces(ATTRIBUTE_X_MIN, ATTRIBUTE_X_MAX, &quad, nx);
        }
    }
    for k in 0..nz {
        for i in 0..nx {
            let quad = |j| {
                [
                    vertex_index(i, j, k),
                    vertex_index(i + 1, j, k),
                    vertex_index(i + 1, j, k + 1),
                    vertex_index(i, j, k + 1),
                ]
            };
            push_faces(ATTRIBUTE_Y_MIN, ATTRIBUTE_Y_MAX, &quad, ny);
        }
    }
    for j in 0..ny {
        for i in 0..nx {
            let quad = |k| {
                [
                    vertex_index(i, j, k),
                    vertex_index(i + 1, j, k),
                    vertex_index(i + 1, j + 1, k),
                    vertex_index(i, j + 1, k),
                ]
            };
            push_faces(ATTRIBUTE_Z_MIN, ATTRIBUTE_Z_MAX, &quad, nz);
        }
    }

    HexMesh::from_parts(vertices, connectivity, boundary_faces)
}
