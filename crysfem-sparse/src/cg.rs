//! Preconditioned Conjugate Gradient for symmetric positive definite operators.
use nalgebra::{DVector, DVectorView, DVectorViewMut, RealField, Scalar};

use crate::krylov::apply_operator;
use crate::{
    EuclideanInnerProduct, IdentityOperator, InnerProduct, KrylovOutput, KrylovSettings, LinearOperator, SolveError,
    SolveErrorKind,
};

#[derive(Debug)]
pub struct ConjugateGradient<T, A, P, I>
where
    T: Scalar,
{
    operator: A,
    preconditioner: P,
    inner_product: I,
    settings: KrylovSettings<T>,
}

impl ConjugateGradient<f64, (), IdentityOperator, EuclideanInnerProduct> {
    pub fn new() -> Self {
        Self {
            operator: (),
            preconditioner: IdentityOperator,
            inner_product: EuclideanInnerProduct,
            settings: KrylovSettings::default(),
        }
    }
}

impl<T: Scalar, P, I> ConjugateGradient<T, (), P, I> {
    pub fn with_operator<A>(self, operator: A) -> ConjugateGradient<T, A, P, I> {
        ConjugateGradient {
            operator,
            preconditioner: self.preconditioner,
            inner_product: self.inner_product,
            settings: self.settings,
        }
    }
}

impl<T: Scalar, A, P, I> ConjugateGradient<T, A, P, I> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> ConjugateGradient<T, A, P2, I> {
        ConjugateGradient {
            operator: self.operator,
            preconditioner,
            inner_product: self.inner_product,
            settings: self.settings,
        }
    }

    pub fn with_inner_product<I2>(self, inner_product: I2) -> ConjugateGradient<T, A, P, I2> {
        ConjugateGradient {
            operator: self.operator,
            preconditioner: self.preconditioner,
            inner_product,
            settings: self.settings,
        }
    }

    pub fn with_settings(self, settings: KrylovSettings<T>) -> Self {
        Self { settings, ..self }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.settings.max_iter = Some(max_iter);
        self
    }
}

impl<T, A, P, I> ConjugateGradient<T, A, P, I>
where
    T: RealField + Copy,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
    I: InnerProduct<T>,
{
    /// Solves `A x = b` using the current contents of `x` as initial guess.
    pub fn solve_with_guess<'b>(
        &mut self,
        b: impl Into<DVectorView<'b, T>>,
        x: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<KrylovOutput<T>, SolveError<T>> {
        self.solve_with_guess_(b.into(), x.into())
    }

    fn solve_with_guess_(&mut self, b: DVectorView<T>, mut x: DVectorViewMut<T>) -> Result<KrylovOutput<T>, SolveError<T>> {
        use SolveErrorKind::*;
        assert_eq!(b.len(), x.len());

        let n = x.len();
        let settings = self.settings;
        let ip = &self.inner_product;
        let mut output = KrylovOutput::new(T::zero());

        if ip.norm(b) == T::zero() {
            x.fill(T::zero());
            return Ok(output);
        }

        let mut r: DVector<T> = DVector::zeros(n);
        let mut z: DVector<T> = DVector::zeros(n);
        let mut ap: DVector<T> = DVector::zeros(n);

        // r = b - A x
        if let Err(err) = apply_operator(&mut r, &self.operator, &x) {
            return Err(SolveError::new(output, OperatorError(err)));
        }
        r.zip_apply(&b, |ax_i, b_i| *ax_i = b_i - *ax_i);

        if let Err(err) = apply_operator(&mut z, &self.preconditioner, &r) {
            return Err(SolveError::new(output, PreconditionerError(err)));
        }
        let mut p = z.clone();
        let mut rho = ip.dot((&z).into(), (&r).into());
        let goal = settings.goal(ip.norm((&r).into()));

        loop {
            output.residual_norm = ip.norm((&r).into());
            if output.residual_norm <= goal {
                return Ok(output);
            } else if settings.max_iter_reached(output.num_iterations) {
                let max_iter = output.num_iterations;
                return Err(SolveError::new(output, MaxIterationsReached { max_iter }));
            }

            if let Err(err) = apply_operator(&mut ap, &self.operator, &p) {
                return Err(SolveError::new(output, OperatorError(err)));
            }
            let curvature = ip.dot((&p).into(), (&ap).into());
            if curvature <= T::zero() {
                return Err(SolveError::new(output, IndefiniteOperator));
            }
            if rho <= T::zero() {
                return Err(SolveError::new(output, IndefinitePreconditioner));
            }

            let alpha = rho / curvature;
            x.axpy(alpha, &p, T::one());
            r.axpy(-alpha, &ap, T::one());
            output.num_iterations += 1;

            if let Err(err) = apply_operator(&mut z, &self.preconditioner, &r) {
                return Err(SolveError::new(output, PreconditionerError(err)));
            }
            let rho_next = ip.dot((&z).into(), (&r).into());

            // p = z + (rho_next / rho) p
            p.axpy(T::one(), &z, rho_next / rho);
            rho = rho_next;
        }
    }
}
