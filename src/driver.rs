//! Time stepping driver for the quasi-static velocity problem.
//!
//! Every step prescribes the essential velocities, optionally bootstraps the velocity field
//! with a linearized boundary condition update and then solves the nonlinear equilibrium
//! equations with Newton-Raphson. Accepted steps are committed and homogenized.
use log::{debug, error, info};
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use std::sync::Arc;

use crate::bc::{apply_essential_velocities, BoundaryConditionManager};
use crate::comm::Communicator;
use crate::config::{KrylovOptions, KrylovSolverKind, NonlinearSolverKind, SimulationOptions, SolverOptions};
use crate::error::{Result, SimulationError};
use crate::fe::{create_box_hex_mesh, H1VectorSpace};
use crate::homogenize::{homogenize, HomogenizedValues};
use crate::material::MaterialModel;
use crate::operator::{CollectiveInnerProduct, MechanicsOperator};
use crate::optimize::newton::{
    newton, newton_line_search, BacktrackingLineSearch, NewtonError, NewtonSettings, NonlinearSystem,
};
use crate::output::OutputStreams;
use crate::sparse::cg::ConjugateGradient;
use crate::sparse::gmres::Gmres;
use crate::sparse::minres::Minres;
use crate::sparse::preconditioner::JacobiPreconditioner;
use crate::sparse::{KrylovSettings, LinearOperator};

pub mod stepping;

use stepping::{StepReport, TimeOptions, TimeStepController};

/// Solves `A x = b` with the configured Krylov method, using `x` as initial guess.
///
/// Reaching the iteration limit is not an error: the last iterate is kept as an inexact
/// solution. Returns the number of Krylov iterations.
pub fn solve_linear_system<A>(
    options: &KrylovOptions,
    operator: A,
    preconditioner: &JacobiPreconditioner<f64>,
    inner_product: CollectiveInnerProduct<'_>,
    b: &DVector<f64>,
    x: &mut DVector<f64>,
) -> Result<usize>
where
    A: LinearOperator<f64>,
{
    let settings = KrylovSettings {
        max_iter: Some(options.max_iter),
        rel_tol: options.rel_tol,
        abs_tol: options.abs_tol,
    };
    let result = match options.solver {
        KrylovSolverKind::Cg => ConjugateGradient::new()
            .with_operator(operator)
            .with_preconditioner(preconditioner)
            .with_inner_product(inner_product)
            .with_settings(settings)
            .solve_with_guess(b, x),
        KrylovSolverKind::Gmres => Gmres::new()
            .with_operator(operator)
            .with_preconditioner(preconditioner)
            .with_inner_product(inner_product)
            .with_settings(settings)
            .solve_with_guess(b, x),
        KrylovSolverKind::Minres => Minres::new()
            .with_operator(operator)
            .with_preconditioner(preconditioner)
            .with_inner_product(inner_product)
            .with_settings(settings)
            .solve_with_guess(b, x),
    };
    match result {
        Ok(output) => Ok(output.num_iterations),
        Err(err) if err.is_max_iterations_reached() => {
            debug!(
                "Krylov solver stopped at its iteration limit with residual {:e}",
                err.output.residual_norm
            );
            Ok(err.output.num_iterations)
        }
        Err(err) => Err(SimulationError::LinearSolverFailure(err.to_string())),
    }
}

/// The equilibrium equations of one time step as a nonlinear system in the velocity.
struct StepSystem<'a> {
    operator: &'a mut MechanicsOperator,
    comm: Arc<dyn Communicator>,
    krylov: &'a KrylovOptions,
}

impl NonlinearSystem<f64> for StepSystem<'_> {
    type Error = SimulationError;

    fn dimension(&self) -> usize {
        self.operator.dimension()
    }

    fn eval_into(&mut self, f: &mut DVectorViewMut<f64>, x: &DVectorView<f64>) -> Result<()> {
        let x = x.clone_owned();
        let mut y = DVector::zeros(x.len());
        self.operator.residual(&x, &mut y)?;
        f.copy_from(&y);
        Ok(())
    }

    fn solve_jacobian_system(
        &mut self,
        sol: &mut DVectorViewMut<f64>,
        _x: &DVectorView<f64>,
        rhs: &DVectorView<f64>,
    ) -> Result<()> {
        let rhs = rhs.clone_owned();
        let mut z = DVector::zeros(rhs.len());
        let (jacobian, preconditioner) = self.operator.gradient()?;
        solve_linear_system(
            self.krylov,
            jacobian,
            preconditioner,
            CollectiveInnerProduct::new(&*self.comm),
            &rhs,
            &mut z,
        )?;
        sol.copy_from(&z);
        Ok(())
    }

    fn norm(&self, f: &DVectorView<f64>) -> f64 {
        self.operator.norm(f)
    }
}

/// Bootstraps the velocity after a change of boundary conditions.
///
/// Linearizes the residual around the previous velocity `x_prev` and solves for the
/// correction that accounts for the jump of the prescribed values. On return the
/// essential entries of `x` hold their prescribed values.
pub fn solve_init(
    operator: &mut MechanicsOperator,
    krylov: &KrylovOptions,
    x_prev: &DVector<f64>,
    x: &mut DVector<f64>,
) -> Result<()> {
    let essential = operator.essential_true_dofs().to_vec();
    let prescribed: Vec<f64> = essential.iter().map(|&dof| x[dof]).collect();

    let mut delta = DVector::zeros(x.len());
    for &dof in &essential {
        delta[dof] = x[dof] - x_prev[dof];
    }

    let comm = operator.shared_communicator();
    let mut b = DVector::zeros(x.len());
    let mut z = DVector::zeros(x.len());
    let (jacobian, preconditioner) = operator.update_bcs_action(x_prev, &delta, &mut b)?;
    // The bootstrap system is always solved with CG
    let options = KrylovOptions {
        solver: KrylovSolverKind::Cg,
        ..krylov.clone()
    };
    solve_linear_system(&options, jacobian, preconditioner, CollectiveInnerProduct::new(&*comm), &b, &mut z)?;

    x.copy_from(&(x_prev - z));
    for (&dof, value) in essential.iter().zip(prescribed) {
        x[dof] = value;
    }
    Ok(())
}

/// Runs Newton-Raphson on the current step, starting from `x`. Returns the iteration count.
pub fn newton_solve(
    operator: &mut MechanicsOperator,
    solvers: &SolverOptions,
    step: usize,
    x: &mut DVector<f64>,
) -> Result<usize> {
    let dt = operator.dt();
    let settings = NewtonSettings {
        max_iterations: Some(solvers.newton.max_iter),
        rel_tolerance: solvers.newton.rel_tol,
        abs_tolerance: solvers.newton.abs_tol,
    };
    let comm = operator.shared_communicator();
    let mut system = StepSystem {
        operator,
        comm,
        krylov: &solvers.krylov,
    };
    let outcome = match solvers.newton.solver {
        NonlinearSolverKind::NewtonRaphson => newton(&mut system, &mut *x, settings),
        NonlinearSolverKind::NewtonRaphsonLineSearch => {
            newton_line_search(&mut system, &mut *x, settings, &mut BacktrackingLineSearch)
        }
    };

    let divergence = |reason: String| SimulationError::NewtonDivergence { step, dt, reason };
    match outcome {
        Ok(output) => {
            debug!(
                "Newton converged in {} iterations, residual {:e} -> {:e}",
                output.iterations, output.initial_residual_norm, output.residual_norm
            );
            Ok(output.iterations)
        }
        Err(NewtonError::ResidualError(err)) | Err(NewtonError::JacobianError(err)) => Err(err),
        Err(err @ NewtonError::MaximumIterationsReached(_))
        | Err(err @ NewtonError::NonFiniteResidual(_))
        | Err(err @ NewtonError::LineSearchError(_)) => Err(divergence(err.to_string())),
    }
}

/// Drives a simulation from the first to the last time step.
#[derive(Debug)]
pub struct NewtonTimeStepDriver {
    operator: MechanicsOperator,
    bcs: BoundaryConditionManager,
    controller: TimeStepController,
    solvers: SolverOptions,
    outputs: OutputStreams,
    velocity: DVector<f64>,
    last_averages: Option<HomogenizedValues>,
}

impl NewtonTimeStepDriver {
    pub fn new(
        mut operator: MechanicsOperator,
        bcs: BoundaryConditionManager,
        time: &TimeOptions,
        solvers: SolverOptions,
        outputs: OutputStreams,
    ) -> Result<Self> {
        solvers.validate()?;
        let controller = TimeStepController::new(time, solvers.newton.max_iter)?;
        operator.set_dt(controller.state().dt);
        let velocity = DVector::zeros(operator.dimension());
        Ok(Self {
            operator,
            bcs,
            controller,
            solvers,
            outputs,
            velocity,
            last_averages: None,
        })
    }

    /// Builds the box mesh, material, operator and output streams described by `options`.
    pub fn from_options(options: &SimulationOptions, comm: Arc<dyn Communicator>) -> Result<Self> {
        options.validate()?;
        let mesh = create_box_hex_mesh(&options.mesh)?;
        let space = H1VectorSpace::new(mesh);
        let material = MaterialModel::new(
            options.material.variant(),
            options.material.parameters.clone(),
            space.num_elements(),
            space.num_quadrature_points(),
        )?;
        let bcs = BoundaryConditionManager::new(options.bcs.clone(), space.num_boundary_attributes())?;
        let outputs = OutputStreams::new(options.output.clone(), &options.time.dt_file, Arc::clone(&comm))?;
        let operator = MechanicsOperator::new(space, material, options.solvers.assembly, comm)?;
        Self::new(operator, bcs, &options.time, options.solvers.clone(), outputs)
    }

    pub fn operator(&self) -> &MechanicsOperator {
        &self.operator
    }

    pub fn controller(&self) -> &TimeStepController {
        &self.controller
    }

    pub fn boundary_conditions(&self) -> &BoundaryConditionManager {
        &self.bcs
    }

    /// The velocity of the most recently accepted step.
    pub fn velocity(&self) -> &DVector<f64> {
        &self.velocity
    }

    pub fn outputs(&self) -> &OutputStreams {
        &self.outputs
    }

    pub fn last_averages(&self) -> Option<&HomogenizedValues> {
        self.last_averages.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.controller.is_finished()
    }

    /// Solves, commits and reports one time step.
    pub fn step(&mut self) -> Result<StepReport> {
        let dt = self.controller.begin_step();
        let step = self.controller.state().step;
        let time_begin = self.controller.state().time - dt;

        let bcs_changed = step == 1 || self.bcs.bcs_changed(step);
        let bc_data = self.bcs.update_bc_data(step);
        if bcs_changed {
            self.operator.update_essential_dofs(&bc_data.total)?;
        }

        let x_prev = self.velocity.clone();
        let operator = &mut self.operator;
        let velocity = &mut self.velocity;
        let solvers = &self.solvers;
        let velocity_function = self.bcs.velocity_function();
        let mut report = self.controller.solve_step(|dt| {
            operator.set_dt(dt);
            operator.set_time(time_begin + dt);
            // Prescribed values belong to the end time of this attempt
            velocity.copy_from(&x_prev);
            apply_essential_velocities(
                &bc_data,
                operator.space(),
                operator.kinematics().begin(),
                time_begin + dt,
                velocity_function,
                operator.communicator(),
                velocity,
            );
            if bcs_changed {
                solve_init(operator, &solvers.krylov, &x_prev, velocity)?;
            }
            newton_solve(operator, solvers, step, velocity)
        })?;
        report.bootstrapped = bcs_changed;

        if self.controller.state().auto_adapt {
            self.outputs.append_dt(report.dt)?;
        }
        self.operator.commit();
        self.operator.set_dt(report.next_dt);

        let averages = homogenize(&self.operator, self.outputs.options().additional_avgs)?;
        self.outputs.append_averages(&averages)?;
        self.last_averages = Some(averages);

        if self.operator.communicator().is_root() {
            info!(
                "Step {} accepted at t = {:e} (dt = {:e}) after {} Newton iterations",
                report.step, report.time, report.dt, report.iterations
            );
        }
        Ok(report)
    }

    /// Runs all remaining steps. A fatal failure stops the run and is returned.
    pub fn run(&mut self) -> Result<Vec<StepReport>> {
        let mut reports = Vec::new();
        while !self.controller.is_finished() {
            match self.step() {
                Ok(report) => reports.push(report),
                Err(err) => {
                    if self.operator.communicator().is_root() {
                        error!(
                            "Simulation aborted in step {} during {}: {}",
                            self.controller.state().step,
                            err.stage(),
                            err
                        );
                    }
                    return Err(err);
                }
            }
        }
        Ok(reports)
    }
}
