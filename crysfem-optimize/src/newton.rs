use itertools::iterate;
use log::debug;
use nalgebra::{DVector, DVectorView, DVectorViewMut, RealField, Scalar};
use numeric_literals::replace_float_literals;
use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// A nonlinear system `F(x) = 0` whose evaluation may fail.
///
/// Failures are not retried by the Newton iteration; they abort it and are handed back to
/// the caller unchanged.
pub trait NonlinearSystem<T: Scalar> {
    type Error: Error + 'static;

    fn dimension(&self) -> usize;

    /// Evaluates `f = F(x)`.
    fn eval_into(&mut self, f: &mut DVectorViewMut<T>, x: &DVectorView<T>) -> Result<(), Self::Error>;

    /// Solves `J(x) sol = rhs` where `J` is the Jacobian of `F` at the point of the
    /// most recent call to [`eval_into`](Self::eval_into).
    fn solve_jacobian_system(
        &mut self,
        sol: &mut DVectorViewMut<T>,
        x: &DVectorView<T>,
        rhs: &DVectorView<T>,
    ) -> Result<(), Self::Error>;

    /// Norm used for convergence checks. Distributed systems override this with a global norm.
    fn norm(&self, f: &DVectorView<T>) -> T
    where
        T: RealField,
    {
        f.norm()
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct NewtonSettings<T> {
    pub max_iterations: Option<usize>,
    /// Convergence is reached when `|F(x)| <= max(rel_tolerance * |F(x_0)|, abs_tolerance)`.
    pub rel_tolerance: T,
    pub abs_tolerance: T,
}

impl Default for NewtonSettings<f64> {
    fn default() -> Self {
        Self {
            max_iterations: Some(25),
            rel_tolerance: 1e-5,
            abs_tolerance: 1e-10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonOutput<T> {
    pub iterations: usize,
    pub initial_residual_norm: T,
    pub residual_norm: T,
}

#[derive(Debug)]
pub enum NewtonError<E> {
    /// The procedure failed because the maximum number of iterations was reached.
    MaximumIterationsReached(usize),
    /// Evaluating the residual failed.
    ResidualError(E),
    /// The procedure failed because solving the Jacobian system failed.
    JacobianError(E),
    /// The residual norm became NaN or infinite at the given iteration.
    NonFiniteResidual(usize),
    // The line search failed to produce a valid step direction.
    LineSearchError(Box<dyn Error>),
}

impl<E: Display> Display for NewtonError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            NewtonError::MaximumIterationsReached(maxit) => {
                write!(f, "Failed to converge within maximum number of iterations ({}).", maxit)
            }
            NewtonError::ResidualError(err) => write!(f, "Failed to evaluate residual. Error: {}", err),
            NewtonError::JacobianError(err) => {
                write!(f, "Failed to solve Jacobian system. Error: {}", err)
            }
            NewtonError::NonFiniteResidual(iter) => {
                write!(f, "Residual norm is not finite at iteration {}.", iter)
            }
            NewtonError::LineSearchError(err) => {
                write!(f, "Line search failed to produce valid step direction. Error: {}", err)
            }
        }
    }
}

impl<E: Error> Error for NewtonError<E> {}

/// Attempts to solve the non-linear equation F(x) = 0 starting from the current contents of `x`.
///
/// The solution is said to have converged if
/// ```|F(x)| <= max(rel_tolerance * |F(x_0)|, abs_tolerance)```.
pub fn newton<'a, T, F>(
    function: &mut F,
    x: impl Into<DVectorViewMut<'a, T>>,
    settings: NewtonSettings<T>,
) -> Result<NewtonOutput<T>, NewtonError<F::Error>>
where
    T: RealField + Copy,
    F: NonlinearSystem<T>,
{
    newton_line_search(function, x, settings, &mut NoLineSearch {})
}

/// Same as `newton`, but allows specifying a line search.
#[replace_float_literals(T::from_f64(literal).unwrap())]
pub fn newton_line_search<'a, T, F>(
    function: &mut F,
    x: impl Into<DVectorViewMut<'a, T>>,
    settings: NewtonSettings<T>,
    line_search: &mut impl LineSearch<T, F>,
) -> Result<NewtonOutput<T>, NewtonError<F::Error>>
where
    T: RealField + Copy,
    F: NonlinearSystem<T>,
{
    let mut x = x.into();
    let n = function.dimension();
    assert_eq!(x.nrows(), n);

    let mut f = DVector::zeros(n);
    let mut minus_dx = DVector::zeros(n);

    function
        .eval_into(&mut DVectorViewMut::from(&mut f), &DVectorView::from(&x))
        .map_err(NewtonError::ResidualError)?;

    let initial_norm = function.norm(&DVectorView::from(&f));
    if !initial_norm.is_finite() {
        return Err(NewtonError::NonFiniteResidual(0));
    }
    let goal = (settings.rel_tolerance * initial_norm).max(settings.abs_tolerance);
    debug!("Newton initial residual norm: {}", initial_norm);

    let mut norm = initial_norm;
    let mut iter = 0;

    while norm > goal {
        if settings
            .max_iterations
            .map(|max_iter| iter == max_iter)
            .unwrap_or(false)
        {
            return Err(NewtonError::MaximumIterationsReached(iter));
        }

        // Solve the system J dx = -f   <=>   J (-dx) = f
        minus_dx.fill(T::zero());
        function
            .solve_jacobian_system(
                &mut DVectorViewMut::from(&mut minus_dx),
                &DVectorView::from(&x),
                &DVectorView::from(&f),
            )
            .map_err(NewtonError::JacobianError)?;

        // Flip sign to make it consistent with line search
        minus_dx *= -1.0;
        let dx = &minus_dx;

        let step_length = line_search.step(
            function,
            DVectorViewMut::from(&mut f),
            DVectorViewMut::from(&mut x),
            DVectorView::from(dx),
        )?;
        iter += 1;

        norm = function.norm(&DVectorView::from(&f));
        debug!(
            "Newton iter {}: step length {}, residual norm {} (goal {})",
            iter, step_length, norm, goal
        );
        if !norm.is_finite() {
            return Err(NewtonError::NonFiniteResidual(iter));
        }
    }

    Ok(NewtonOutput {
        iterations: iter,
        initial_residual_norm: initial_norm,
        residual_norm: norm,
    })
}

pub trait LineSearch<T: Scalar, F: NonlinearSystem<T>> {
    /// Updates `x` along `direction` and leaves `f = F(x)` for the new `x`.
    fn step(
        &mut self,
        function: &mut F,
        f: DVectorViewMut<T>,
        x: DVectorViewMut<T>,
        direction: DVectorView<T>,
    ) -> Result<T, NewtonError<F::Error>>;
}

/// Trivial implementation of line search. Equivalent to a single, full Newton step.
#[derive(Clone, Debug)]
pub struct NoLineSearch;

impl<T, F> LineSearch<T, F> for NoLineSearch
where
    T: RealField + Copy,
    F: NonlinearSystem<T>,
{
    fn step(
        &mut self,
        function: &mut F,
        mut f: DVectorViewMut<T>,
        mut x: DVectorViewMut<T>,
        direction: DVectorView<T>,
    ) -> Result<T, NewtonError<F::Error>> {
        x.axpy(T::one(), &direction, T::one());
        function
            .eval_into(&mut f, &DVectorView::from(&x))
            .map_err(NewtonError::ResidualError)?;
        Ok(T::one())
    }
}

/// Standard backtracking line search using the Armijo condition.
///
/// See Jorge & Nocedal (2006), Numerical Optimization, Chapter 3.1.
#[derive(Clone, Debug)]
pub struct BacktrackingLineSearch;

impl<T, F> LineSearch<T, F> for BacktrackingLineSearch
where
    T: RealField + Copy,
    F: NonlinearSystem<T>,
{
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn step(
        &mut self,
        function: &mut F,
        mut f: DVectorViewMut<T>,
        mut x: DVectorViewMut<T>,
        direction: DVectorView<T>,
    ) -> Result<T, NewtonError<F::Error>> {
        // We minimize g(x) = (1/2) || F(x) ||^2 along the Newton direction p_k. Since
        // grad F^T p_k ~= -F(x_k), the sufficient decrease condition becomes
        //  g(x_k + alpha * p_k) <= (1 - c * alpha) * g(x_k)
        let c = 1e-4;
        let alpha_min = 1e-6;

        let p = direction;
        let g_initial = 0.5 * function.norm(&DVectorView::from(&f)).powi(2);

        // Start out with some alphas that don't decrease too quickly, then
        // start decreasing them much faster if the first few iterations don't let us
        // take a step.
        let initial_alphas = [0.0, 1.0, 0.75, 0.5];
        let mut alpha_iter = initial_alphas
            .iter()
            .copied()
            .chain(iterate(0.25, |alpha_i| 0.25 * *alpha_i));

        let mut alpha_prev = 0.0;
        let mut alpha = 1.0;
        // Skip the two values we just consumed by hand
        alpha_iter.nth(1);

        loop {
            // x^{k+1} = x^k + (alpha^k - alpha^{k-1}) * p
            let delta_alpha = alpha - alpha_prev;
            x.axpy(delta_alpha, &p, T::one());

            match function.eval_into(&mut f, &DVectorView::from(&x)) {
                Ok(()) => {
                    let g = 0.5 * function.norm(&DVectorView::from(&f)).powi(2);
                    if g.is_finite() && g <= (1.0 - c * alpha) * g_initial {
                        break;
                    }
                }
                // A failed evaluation along the direction is treated like insufficient decrease
                Err(err) if alpha >= alpha_min => debug!("Residual evaluation failed in line search: {}", err),
                Err(err) => return Err(NewtonError::ResidualError(err)),
            }

            if alpha < alpha_min {
                return Err(NewtonError::LineSearchError(Box::from(format!(
                    "Failed to produce valid step direction. \
                    Alpha {} is smaller than minimum allowed alpha {}.",
                    alpha, alpha_min
                ))));
            }
            alpha_prev = alpha;
            alpha = match alpha_iter.next() {
                Some(next) => next,
                None => alpha * 0.25,
            };
        }

        Ok(alpha)
    }
}
