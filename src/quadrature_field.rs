//! Per-quadrature-point storage of material data.
use std::mem::swap;

/// Contiguous per-quadrature-point data with layout `[element][point][component]`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureField {
    vdim: usize,
    num_elements: usize,
    num_quadrature_points: usize,
    data: Vec<f64>,
}

impl QuadratureField {
    pub fn zeros(num_elements: usize, num_quadrature_points: usize, vdim: usize) -> Self {
        Self {
            vdim,
            num_elements,
            num_quadrature_points,
            data: vec![0.0; num_elements * num_quadrature_points * vdim],
        }
    }

    /// Creates a field where every quadrature point holds `values`.
    pub fn from_uniform(num_elements: usize, num_quadrature_points: usize, values: &[f64]) -> Self {
        let mut field = Self::zeros(num_elements, num_quadrature_points, values.len());
        for chunk in field.data.chunks_exact_mut(values.len().max(1)) {
            chunk.copy_from_slice(values);
        }
        field
    }

    pub fn vdim(&self) -> usize {
        self.vdim
    }

    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    pub fn num_quadrature_points(&self) -> usize {
        self.num_quadrature_points
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    fn offset(&self, element: usize, q: usize) -> usize {
        debug_assert!(element < self.num_elements && q < self.num_quadrature_points);
        (element * self.num_quadrature_points + q) * self.vdim
    }

    pub fn point(&self, element: usize, q: usize) -> &[f64] {
        let offset = self.offset(element, q);
        &self.data[offset..offset + self.vdim]
    }

    pub fn point_mut(&mut self, element: usize, q: usize) -> &mut [f64] {
        let offset = self.offset(element, q);
        let vdim = self.vdim;
        &mut self.data[offset..offset + vdim]
    }

    /// Data of one element, `num_quadrature_points * vdim` values.
    pub fn element(&self, element: usize) -> &[f64] {
        let len = self.num_quadrature_points * self.vdim;
        &self.data[element * len..(element + 1) * len]
    }

    pub fn element_len(&self) -> usize {
        self.num_quadrature_points * self.vdim
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }
}

/// A pair of fields holding the last committed values ("begin") and the trial values of
/// the step in progress ("end").
#[derive(Debug, Clone, PartialEq)]
pub struct DoubleBuffered {
    begin: QuadratureField,
    end: QuadratureField,
}

impl DoubleBuffered {
    pub fn new(initial: QuadratureField) -> Self {
        Self {
            end: initial.clone(),
            begin: initial,
        }
    }

    pub fn begin(&self) -> &QuadratureField {
        &self.begin
    }

    pub fn end(&self) -> &QuadratureField {
        &self.end
    }

    /// Read access to begin and write access to end at the same time.
    pub fn split_mut(&mut self) -> (&QuadratureField, &mut QuadratureField) {
        (&self.begin, &mut self.end)
    }

    /// Makes the trial values the committed history.
    ///
    /// After the swap, end holds the previous history. It is overwritten by the next
    /// material update before anybody reads it.
    pub fn swap(&mut self) {
        swap(&mut self.begin, &mut self.end);
    }
}

/// All per-quadrature-point storage owned by a material model.
#[derive(Debug, Clone)]
pub struct QuadratureFieldStore {
    /// Cauchy stress in Voigt order `[11, 22, 33, 23, 13, 12]`.
    pub stress: DoubleBuffered,
    /// Material state variables, addressed through the state layout of the model.
    pub state: DoubleBuffered,
    /// Algorithmic tangent `d(sigma)/d(D)` multiplied by `dt`, 6 x 6 row-major.
    pub tangent: QuadratureField,
    /// Von Mises equivalent of the end stress.
    pub von_mises: QuadratureField,
}

impl QuadratureFieldStore {
    pub fn new(num_elements: usize, num_quadrature_points: usize, initial_state: &[f64]) -> Self {
        Self {
            stress: DoubleBuffered::new(QuadratureField::zeros(num_elements, num_quadrature_points, 6)),
            state: DoubleBuffered::new(QuadratureField::from_uniform(
                num_elements,
                num_quadrature_points,
                initial_state,
            )),
            tangent: QuadratureField::zeros(num_elements, num_quadrature_points, 36),
            von_mises: QuadratureField::zeros(num_elements, num_quadrature_points, 1),
        }
    }

    /// Commits stress and state of the current step.
    pub fn commit(&mut self) {
        self.stress.swap();
        self.state.swap();
    }
}
