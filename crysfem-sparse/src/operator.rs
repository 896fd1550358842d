use nalgebra::{DMatrix, DVectorView, DVectorViewMut, RealField, Scalar};
use nalgebra_sparse::ops::serial::spmm_csr_dense;
use nalgebra_sparse::ops::Op;
use nalgebra_sparse::CsrMatrix;
use std::error::Error;

/// An abstract linear operator computing `y = A x`.
///
/// Implementations report a mismatch between their shape and the vectors as an error
/// rather than panicking, so solvers can surface it as an operator failure.
pub trait LinearOperator<T: Scalar> {
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>>;
}

impl<T, A> LinearOperator<T> for &A
where
    T: Scalar,
    A: ?Sized + LinearOperator<T>,
{
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        (**self).apply(y, x)
    }
}

fn check_shape(name: &str, shape: (usize, usize), y_len: usize, x_len: usize) -> Result<(), Box<dyn Error>> {
    let (rows, cols) = shape;
    if rows == y_len && cols == x_len {
        Ok(())
    } else {
        Err(Box::from(format!(
            "{} of shape {}x{} cannot map a vector of length {} to one of length {}",
            name, rows, cols, x_len, y_len
        )))
    }
}

impl<T: RealField + Copy> LinearOperator<T> for DMatrix<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        check_shape("dense matrix", self.shape(), y.len(), x.len())?;
        y.gemv(T::one(), self, &x, T::zero());
        Ok(())
    }
}

impl<T: RealField + Copy> LinearOperator<T> for CsrMatrix<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        check_shape("CSR matrix", (self.nrows(), self.ncols()), y.len(), x.len())?;
        spmm_csr_dense(T::zero(), &mut y, T::one(), Op::NoOp(self), Op::NoOp(&x));
        Ok(())
    }
}

/// The identity, used as the default (absent) preconditioner.
#[derive(Debug, Copy, Clone, Default)]
pub struct IdentityOperator;

impl<T: Scalar> LinearOperator<T> for IdentityOperator {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        check_shape("identity", (y.len(), y.len()), y.len(), x.len())?;
        y.copy_from(&x);
        Ok(())
    }
}

/// Inner product used by Krylov solvers for dot products and norms.
///
/// When vectors are distributed over several processes, the implementation must
/// return the *global* value on every process. All processes then take identical
/// decisions about convergence and breakdown.
pub trait InnerProduct<T: Scalar> {
    fn dot(&self, a: DVectorView<T>, b: DVectorView<T>) -> T;

    fn norm(&self, a: DVectorView<T>) -> T
    where
        T: RealField,
    {
        self.dot(a.clone(), a).sqrt()
    }
}

impl<'a, T, I> InnerProduct<T> for &'a I
where
    T: Scalar,
    I: ?Sized + InnerProduct<T>,
{
    fn dot(&self, a: DVectorView<T>, b: DVectorView<T>) -> T {
        <I as InnerProduct<T>>::dot(self, a, b)
    }
}

/// The standard Euclidean inner product on local vectors.
#[derive(Debug, Copy, Clone, Default)]
pub struct EuclideanInnerProduct;

impl<T: RealField> InnerProduct<T> for EuclideanInnerProduct {
    fn dot(&self, a: DVectorView<T>, b: DVectorView<T>) -> T {
        a.dot(&b)
    }
}
