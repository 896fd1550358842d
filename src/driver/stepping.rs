//! Time step selection and the retry policy of adaptive stepping.
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimulationError};

/// Maximum number of attempts with a reduced time step after a failed attempt.
pub const MAX_DT_RETRIES: usize = 2;

/// Relative tolerance used when comparing times against the final time.
const TIME_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeMode {
    /// Constant time step.
    Fixed,
    /// Time step adapted to the Newton iteration count, with retries on failure.
    Auto,
    /// Explicit list of time steps.
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeOptions {
    pub mode: TimeMode,
    /// Initial (auto) or constant (fixed) time step.
    pub dt: f64,
    pub dt_min: f64,
    /// Factor applied to dt on a failed attempt. Must lie in `(0, 1)`.
    pub dt_scale: f64,
    pub t_final: f64,
    /// Time steps of the custom mode.
    pub custom_dt: Vec<f64>,
    /// File receiving every accepted time step of the auto mode.
    pub dt_file: String,
}

impl Default for TimeOptions {
    fn default() -> Self {
        Self {
            mode: TimeMode::Fixed,
            dt: 1.0,
            dt_min: 1e-6,
            dt_scale: 0.25,
            t_final: 1.0,
            custom_dt: Vec::new(),
            dt_file: "auto_dt_out.txt".to_string(),
        }
    }
}

impl TimeOptions {
    pub fn validate(&self) -> Result<()> {
        match self.mode {
            TimeMode::Custom => {
                if self.custom_dt.is_empty() {
                    return Err(SimulationError::configuration("custom time stepping needs at least one time step"));
                }
                if let Some(dt) = self.custom_dt.iter().find(|&&dt| !(dt > 0.0 && dt.is_finite())) {
                    return Err(SimulationError::configuration(format!("custom time step {} is not positive", dt)));
                }
            }
            TimeMode::Fixed | TimeMode::Auto => {
                if !(self.dt > 0.0 && self.dt.is_finite()) {
                    return Err(SimulationError::configuration("time step must be positive"));
                }
                if !(self.t_final > 0.0 && self.t_final.is_finite()) {
                    return Err(SimulationError::configuration("final time must be positive"));
                }
            }
        }
        if self.mode == TimeMode::Auto {
            if !(self.dt_scale > 0.0 && self.dt_scale < 1.0) {
                return Err(SimulationError::configuration("dt_scale must lie strictly between 0 and 1"));
            }
            if !(self.dt_min > 0.0 && self.dt_min <= self.dt) {
                return Err(SimulationError::configuration(
                    "dt_min must be positive and not larger than the initial time step",
                ));
            }
        }
        Ok(())
    }
}

/// Time stepping state. Mutated only by the controller, once per step on acceptance or retry.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TimeStepState {
    pub time: f64,
    pub dt: f64,
    pub dt_min: f64,
    pub dt_scale: f64,
    pub auto_adapt: bool,
    /// One-based index of the current step, zero before the first step.
    pub step: usize,
    pub last_step: bool,
}

/// Summary of an accepted step.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct StepReport {
    pub step: usize,
    /// Simulation time at the end of the step.
    pub time: f64,
    /// The accepted time step.
    pub dt: f64,
    pub iterations: usize,
    /// Number of attempts with a reduced time step.
    pub retries: usize,
    /// Time step proposed for the next step.
    pub next_dt: f64,
    /// Whether the step started from a linearized boundary condition update.
    pub bootstrapped: bool,
}

#[derive(Debug, Clone)]
pub struct TimeStepController {
    state: TimeStepState,
    mode: TimeMode,
    t_final: f64,
    custom_dt: Vec<f64>,
    newton_max_iterations: usize,
}

impl TimeStepController {
    pub fn new(options: &TimeOptions, newton_max_iterations: usize) -> Result<Self> {
        options.validate()?;
        let (dt, t_final) = match options.mode {
            TimeMode::Custom => (options.custom_dt[0], options.custom_dt.iter().sum()),
            TimeMode::Fixed | TimeMode::Auto => (options.dt, options.t_final),
        };
        Ok(Self {
            state: TimeStepState {
                time: 0.0,
                dt,
                dt_min: options.dt_min,
                dt_scale: options.dt_scale,
                auto_adapt: options.mode == TimeMode::Auto,
                step: 0,
                last_step: false,
            },
            mode: options.mode,
            t_final,
            custom_dt: options.custom_dt.clone(),
            newton_max_iterations,
        })
    }

    pub fn state(&self) -> &TimeStepState {
        &self.state
    }

    pub fn t_final(&self) -> f64 {
        self.t_final
    }

    pub fn is_finished(&self) -> bool {
        self.state.last_step || self.state.time >= self.t_final * (1.0 - TIME_TOLERANCE)
    }

    /// Advances to the next step and returns its time step.
    ///
    /// The simulation time is advanced to the end of the step before it is solved.
    pub fn begin_step(&mut self) -> f64 {
        let state = &mut self.state;
        state.step += 1;
        match self.mode {
            TimeMode::Custom => {
                let idx = (state.step - 1).min(self.custom_dt.len() - 1);
                state.dt = self.custom_dt[idx];
                state.last_step = state.step >= self.custom_dt.len();
            }
            TimeMode::Fixed | TimeMode::Auto => {
                let remaining = self.t_final - state.time;
                if state.dt >= remaining * (1.0 - TIME_TOLERANCE) {
                    state.dt = remaining;
                    state.last_step = true;
                }
            }
        }
        state.time += state.dt;
        state.dt
    }

    /// Solves the current step with `attempt`, retrying with smaller time steps when
    /// adaptive stepping is enabled.
    ///
    /// `attempt` receives the time step to use and returns the number of Newton iterations
    /// on success. It must restore the unknowns of the beginning of the step itself.
    pub fn solve_step<F>(&mut self, mut attempt: F) -> Result<StepReport>
    where
        F: FnMut(f64) -> Result<usize>,
    {
        let dt_old = self.state.dt;
        let mut retries = 0;
        let mut outcome = attempt(self.state.dt);

        if self.state.auto_adapt {
            while retries < MAX_DT_RETRIES {
                match &outcome {
                    Err(err) if err.is_recoverable() => {}
                    _ => break,
                }
                let dt = (self.state.dt * self.state.dt_scale).max(self.state.dt_min);
                if let Err(err) = &outcome {
                    warn!(
                        "Step {} failed in {}: {}. Decreasing dt from {:e} to {:e}",
                        self.state.step,
                        err.stage(),
                        err,
                        self.state.dt,
                        dt
                    );
                }
                self.state.dt = dt;
                retries += 1;
                outcome = attempt(dt);
            }
            if retries > 0 {
                self.state.time = self.state.time - dt_old + self.state.dt;
                // A truncated last step is no longer the last one once it shrinks
                if self.mode == TimeMode::Auto && self.state.last_step {
                    self.state.last_step = false;
                }
            }
        }

        let iterations = outcome?;
        let dt = self.state.dt;
        let next_dt = if self.state.auto_adapt {
            let factor = (self.newton_max_iterations as f64 * self.state.dt_scale) / iterations.max(1) as f64;
            let next = (dt * factor).max(self.state.dt_min);
            info!(
                "Time {:e}: dt was {:e}, updated to {:e} (factor {})",
                self.state.time, dt, next, factor
            );
            next
        } else {
            dt
        };
        self.state.dt = next_dt;

        Ok(StepReport {
            step: self.state.step,
            time: self.state.time,
            dt,
            iterations,
            retries,
            next_dt,
            bootstrapped: false,
        })
    }
}
