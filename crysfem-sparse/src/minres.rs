//! Preconditioned MINRES for symmetric (possibly indefinite) operators.
//!
//! Follows Algorithm 2.4 of Elman, Silvester & Wathen (2014), Finite Elements and Fast
//! Iterative Solvers. The preconditioner must be symmetric positive definite.
use nalgebra::{DVector, DVectorView, DVectorViewMut, RealField, Scalar};
use std::mem::swap;

use crate::krylov::apply_operator;
use crate::{
    EuclideanInnerProduct, IdentityOperator, InnerProduct, KrylovOutput, KrylovSettings, LinearOperator, SolveError,
    SolveErrorKind,
};

#[derive(Debug)]
pub struct Minres<T, A, P, I>
where
    T: Scalar,
{
    operator: A,
    preconditioner: P,
    inner_product: I,
    settings: KrylovSettings<T>,
}

impl Minres<f64, (), IdentityOperator, EuclideanInnerProduct> {
    pub fn new() -> Self {
        Self {
            operator: (),
            preconditioner: IdentityOperator,
            inner_product: EuclideanInnerProduct,
            settings: KrylovSettings::default(),
        }
    }
}

impl<T: Scalar, P, I> Minres<T, (), P, I> {
    pub fn with_operator<A>(self, operator: A) -> Minres<T, A, P, I> {
        Minres {
            operator,
            preconditioner: self.preconditioner,
            inner_product: self.inner_product,
            settings: self.settings,
        }
    }
}

impl<T: Scalar, A, P, I> Minres<T, A, P, I> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> Minres<T, A, P2, I> {
        Minres {
            operator: self.operator,
            preconditioner,
            inner_product: self.inner_product,
            settings: self.settings,
        }
    }

    pub fn with_inner_product<I2>(self, inner_product: I2) -> Minres<T, A, P, I2> {
        Minres {
            operator: self.operator,
            preconditioner: self.preconditioner,
            inner_product,
            settings: self.settings,
        }
    }

    pub fn with_settings(self, settings: KrylovSettings<T>) -> Self {
        Self { settings, ..self }
    }
}

impl<T, A, P, I> Minres<T, A, P, I>
where
    T: RealField + Copy,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
    I: InnerProduct<T>,
{
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

        let mut v_prev: DVector<T> = DVector::zeros(n);
        let mut v: DVector<T> = DVector::zeros(n);
        let mut v_next: DVector<T> = DVector::zeros(n);
        let mut z: DVector<T> = DVector::zeros(n);
        let mut w_prev: DVector<T> = DVector::zeros(n);
        let mut w: DVector<T> = DVector::zeros(n);
        let mut w_next: DVector<T> = DVector::zeros(n);
        let mut az: DVector<T> = DVector::zeros(n);

        // v_1 = b - A x
        if let Err(err) = apply_operator(&mut v, &self.operator, &x) {
            return Err(SolveError::new(output, OperatorError(err)));
        }
        v.zip_apply(&b, |ax_i, b_i| *ax_i = b_i - *ax_i);
        // z_1 = P v_1
        if let Err(err) = apply_operator(&mut z, &self.preconditioner, &v) {
            return Err(SolveError::new(output, PreconditionerError(err)));
        }

        let zv = ip.dot((&z).into(), (&v).into());
        if zv < T::zero() {
            return Err(SolveError::new(output, IndefinitePreconditioner));
        }
        let mut gamma = zv.sqrt();
        let mut gamma_prev = T::one();
        let mut eta = gamma;
        let (mut c_prev, mut c) = (T::one(), T::one());
        let (mut s_prev, mut s) = (T::zero(), T::zero());

        let goal = settings.goal(gamma);

        loop {
            output.residual_norm = eta.abs();
            if eta.abs() <= goal {
                return Ok(output);
            } else if settings.max_iter_reached(output.num_iterations) {
                let max_iter = output.num_iterations;
                return Err(SolveError::new(output, MaxIterationsReached { max_iter }));
            }

            z /= gamma;
            if let Err(err) = apply_operator(&mut az, &self.operator, &z) {
                return Err(SolveError::new(output, OperatorError(err)));
            }
            let delta = ip.dot((&az).into(), (&z).into());

            // v_{j+1} = A z_j - (delta / gamma_j) v_j - (gamma_j / gamma_{j-1}) v_{j-1}
            v_next.copy_from(&az);
            v_next.axpy(-delta / gamma, &v, T::one());
            v_next.axpy(-gamma / gamma_prev, &v_prev, T::one());

            let z_curr = z.clone();
            if let Err(err) = apply_operator(&mut z, &self.preconditioner, &v_next) {
                return Err(SolveError::new(output, PreconditionerError(err)));
            }
            let zv = ip.dot((&z).into(), (&v_next).into());
            if zv < T::zero() {
                return Err(SolveError::new(output, IndefinitePreconditioner));
            }
            let gamma_next = zv.sqrt();

            let alpha0 = c * delta - c_prev * s * gamma;
            let alpha1 = (alpha0 * alpha0 + gamma_next * gamma_next).sqrt();
            let alpha2 = s * delta + c_prev * c * gamma;
            let alpha3 = s_prev * gamma;
            if alpha1 == T::zero() {
                return Err(SolveError::new(output, Breakdown));
            }
            let c_next = alpha0 / alpha1;
            let s_next = gamma_next / alpha1;

            // w_{j+1} = (z_j - alpha3 w_{j-1} - alpha2 w_j) / alpha1
            w_next.copy_from(&z_curr);
            w_next.axpy(-alpha3, &w_prev, T::one());
            w_next.axpy(-alpha2, &w, T::one());
            w_next /= alpha1;

            x.axpy(c_next * eta, &w_next, T::one());
            eta = -s_next * eta;
            output.num_iterations += 1;

            swap(&mut v_prev, &mut v);
            swap(&mut v, &mut v_next);
            swap(&mut w_prev, &mut w);
            swap(&mut w, &mut w_next);
            gamma_prev = gamma;
            gamma = gamma_next;
            c_prev = c;
            c = c_next;
            s_prev = s;
            s = s_next;
        }
    }
}
