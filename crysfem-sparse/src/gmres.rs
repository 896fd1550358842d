//! Restarted GMRES with left preconditioning.
//!
//! The Arnoldi basis is orthogonalized with modified Gram-Schmidt and the Hessenberg
//! least-squares problem is reduced with Givens rotations, so the preconditioned
//! residual norm is available at every inner iteration without forming the iterate.
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut, RealField, Scalar};

use crate::krylov::apply_operator;
use crate::{
    EuclideanInnerProduct, IdentityOperator, InnerProduct, KrylovOutput, KrylovSettings, LinearOperator, SolveError,
    SolveErrorKind,
};

#[derive(Debug)]
pub struct Gmres<T, A, P, I>
where
    T: Scalar,
{
    operator: A,
    preconditioner: P,
    inner_product: I,
    settings: KrylovSettings<T>,
    restart: usize,
}

impl Gmres<f64, (), IdentityOperator, EuclideanInnerProduct> {
    pub fn new() -> Self {
        Self {
            operator: (),
            preconditioner: IdentityOperator,
            inner_product: EuclideanInnerProduct,
            settings: KrylovSettings::default(),
            restart: 50,
        }
    }
}

impl<T: Scalar, P, I> Gmres<T, (), P, I> {
    pub fn with_operator<A>(self, operator: A) -> Gmres<T, A, P, I> {
        Gmres {
            operator,
            preconditioner: self.preconditioner,
            inner_product: self.inner_product,
            settings: self.settings,
            restart: self.restart,
        }
    }
}

impl<T: Scalar, A, P, I> Gmres<T, A, P, I> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> Gmres<T, A, P2, I> {
        Gmres {
            operator: self.operator,
            preconditioner,
            inner_product: self.inner_product,
            settings: self.settings,
            restart: self.restart,
        }
    }

    pub fn with_inner_product<I2>(self, inner_product: I2) -> Gmres<T, A, P, I2> {
        Gmres {
            operator: self.operator,
            preconditioner: self.preconditioner,
            inner_product,
            settings: self.settings,
            restart: self.restart,
        }
    }

    pub fn with_settings(self, settings: KrylovSettings<T>) -> Self {
        Self { settings, ..self }
    }

    /// Sets the dimension of the Krylov subspace built before each restart.
    pub fn with_restart(self, restart: usize) -> Self {
        assert!(restart > 0, "GMRES restart length must be positive");
        Self { restart, ..self }
    }
}

/// Computes a Givens rotation `(c, s)` that zeroes `b` in `[a, b]`.
fn givens<T: RealField + Copy>(a: T, b: T) -> (T, T) {
    if b == T::zero() {
        (T::one(), T::zero())
    } else if b.abs() > a.abs() {
        let t = a / b;
        let s = T::one() / (T::one() + t * t).sqrt();
        (s * t, s)
    } else {
        let t = b / a;
        let c = T::one() / (T::one() + t * t).sqrt();
        (c, c * t)
    }
}

impl<T, A, P, I> Gmres<T, A, P, I>
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
        let m = self.restart;
        let settings = self.settings;
        let ip = &self.inner_product;

        let mut output = KrylovOutput::new(T::zero());
        let mut r: DVector<T> = DVector::zeros(n);
        let mut w: DVector<T> = DVector::zeros(n);
        let mut av: DVector<T> = DVector::zeros(n);
        let mut basis: Vec<DVector<T>> = Vec::with_capacity(m + 1);
        let mut h: DMatrix<T> = DMatrix::zeros(m + 1, m);
        let mut s: DVector<T> = DVector::zeros(m + 1);
        let mut cs = vec![T::zero(); m];
        let mut sn = vec![T::zero(); m];

        let mut goal = None;

        loop {
            // r = P (b - A x)
            if let Err(err) = apply_operator(&mut av, &self.operator, &x) {
                return Err(SolveError::new(output, OperatorError(err)));
            }
            av.zip_apply(&b, |ax_i, b_i| *ax_i = b_i - *ax_i);
            if let Err(err) = apply_operator(&mut r, &self.preconditioner, &av) {
                return Err(SolveError::new(output, PreconditionerError(err)));
            }

            let beta = ip.norm((&r).into());
            output.residual_norm = beta;
            let goal = *goal.get_or_insert_with(|| settings.goal(beta));

            if beta <= goal {
                return Ok(output);
            } else if settings.max_iter_reached(output.num_iterations) {
                let max_iter = output.num_iterations;
                return Err(SolveError::new(output, MaxIterationsReached { max_iter }));
            }

            basis.clear();
            basis.push(&r / beta);
            h.fill(T::zero());
            s.fill(T::zero());
            s[0] = beta;

            let mut k = 0;
            let mut done = false;
            while k < m && !done {
                // w = P A v_k
                if let Err(err) = apply_operator(&mut av, &self.operator, &basis[k]) {
                    return Err(SolveError::new(output, OperatorError(err)));
                }
                if let Err(err) = apply_operator(&mut w, &self.preconditioner, &av) {
                    return Err(SolveError::new(output, PreconditionerError(err)));
                }

                for (j, v_j) in basis.iter().enumerate() {
                    let h_jk = ip.dot((&w).into(), v_j.into());
                    h[(j, k)] = h_jk;
                    w.axpy(-h_jk, v_j, T::one());
                }
                let h_next = ip.norm((&w).into());
                h[(k + 1, k)] = h_next;
                if h_next > T::zero() {
                    basis.push(&w / h_next);
                } else {
                    // Happy breakdown: the Krylov space is invariant and the least squares
                    // solution is exact.
                    basis.push(DVector::zeros(n));
                }

                for j in 0..k {
                    let (h0, h1) = (h[(j, k)], h[(j + 1, k)]);
                    h[(j, k)] = cs[j] * h0 + sn[j] * h1;
                    h[(j + 1, k)] = -sn[j] * h0 + cs[j] * h1;
                }
                let (c, sk) = givens(h[(k, k)], h[(k + 1, k)]);
                cs[k] = c;
                sn[k] = sk;
                h[(k, k)] = c * h[(k, k)] + sk * h[(k + 1, k)];
                h[(k + 1, k)] = T::zero();
                s[k + 1] = -sk * s[k];
                s[k] = c * s[k];

                output.num_iterations += 1;
                output.residual_norm = s[k + 1].abs();
                k += 1;

                done = output.residual_norm <= goal
                    || h_next == T::zero()
                    || settings.max_iter_reached(output.num_iterations);
            }

            // Back substitution for the upper triangular k x k system H y = s
            let mut y: DVector<T> = DVector::zeros(k);
            for i in (0..k).rev() {
                let mut acc = s[i];
                for j in (i + 1)..k {
                    acc -= h[(i, j)] * y[j];
                }
                if h[(i, i)] == T::zero() {
                    return Err(SolveError::new(output, Breakdown));
                }
                y[i] = acc / h[(i, i)];
            }
            for (i, v_i) in basis.iter().take(k).enumerate() {
                x.axpy(y[i], v_i, T::one());
            }

            if output.residual_norm <= goal {
                return Ok(output);
            }
        }
    }
}
