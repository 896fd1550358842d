use nalgebra::{DVector, DVectorView, DVectorViewMut, RealField, Scalar};
use nalgebra_sparse::CsrMatrix;
use num::Zero;
use std::error::Error;

use crate::LinearOperator;

/// Jacobi (diagonal) preconditioner `P = D^{-1}`.
///
/// Diagonal entries that are zero or not finite are replaced by one, so the
/// preconditioner is always symmetric positive definite when the provided diagonal is
/// nonnegative.
#[derive(Debug, Clone)]
pub struct JacobiPreconditioner<T: Scalar> {
    inv_diag: DVector<T>,
}

impl<T: RealField + Copy> JacobiPreconditioner<T> {
    pub fn from_diagonal(diagonal: &DVector<T>) -> Self {
        let mut inv_diag = diagonal.clone();
        Self::invert_in_place(&mut inv_diag);
        Self { inv_diag }
    }

    /// Replaces the stored diagonal without reallocating.
    pub fn update_diagonal(&mut self, diagonal: DVectorView<T>) {
        self.inv_diag.resize_vertically_mut(diagonal.len(), T::zero());
        self.inv_diag.copy_from(&diagonal);
        Self::invert_in_place(&mut self.inv_diag);
    }

    pub fn inverse_diagonal(&self) -> &DVector<T> {
        &self.inv_diag
    }

    fn invert_in_place(d: &mut DVector<T>) {
        for d_i in d.iter_mut() {
            *d_i = if *d_i == T::zero() || !d_i.is_finite() {
                T::one()
            } else {
                T::one() / *d_i
            };
        }
    }
}

impl<T: RealField + Copy> LinearOperator<T> for JacobiPreconditioner<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        if y.len() != self.inv_diag.len() || x.len() != self.inv_diag.len() {
            return Err(Box::from(format!(
                "Jacobi preconditioner of dimension {} applied to vector of dimension {}",
                self.inv_diag.len(),
                x.len()
            )));
        }
        y.zip_zip_apply(&x, &self.inv_diag, |y_i, x_i, d_i| *y_i = d_i * x_i);
        Ok(())
    }
}

/// Extracts the diagonal of a square CSR matrix. Missing entries are zero.
pub fn csr_diagonal<T: Scalar + Zero>(matrix: &CsrMatrix<T>) -> DVector<T> {
    assert_eq!(matrix.nrows(), matrix.ncols(), "Matrix must be square");
    DVector::from_iterator(
        matrix.nrows(),
        matrix.row_iter().enumerate().map(|(i, row)| {
            row.get_entry(i)
                .map(|entry| entry.into_value())
                .unwrap_or_else(T::zero)
        }),
    )
}
