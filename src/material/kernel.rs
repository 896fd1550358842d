//! Constitutive update of a single material point.
//!
//! Taylor-averaged rate-dependent crystal plasticity: the aggregate slip rate follows a
//! power law in the resolved shear stress `q / M`, where `M` is the Taylor factor of the
//! crystal symmetry, and the elastic response is isotropic. The update is an implicit
//! radial return on the objectively rotated (Hughes-Winget) stress, followed by an
//! explicit update of the hardness and the remaining state variables.
use nalgebra::{Matrix3, Quaternion, Vector3};
use thiserror::Error;

use crate::error;
use crate::material::{layout, CrystalSymmetry, MaterialParameters, StateLayout, StateSlot};

/// Reasons why the update of a single material point fails.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MaterialPointError {
    #[error("non-finite kinematic or stress input")]
    NonFiniteInput,
    #[error("local return mapping did not converge within {iterations} iterations")]
    ReturnMappingNotConverged { iterations: usize },
    #[error("slip resistance {0} is not positive")]
    InvalidSlipResistance(f64),
    #[error("element geometry is inverted or degenerate")]
    InvalidGeometry,
}

const MAX_LOCAL_ITERATIONS: usize = 100;
const LOCAL_TOLERANCE: f64 = 1e-12;

/// Converts Voigt stress `[11, 22, 33, 23, 13, 12]` to a symmetric tensor.
pub fn voigt_to_tensor(v: &[f64]) -> Matrix3<f64> {
    Matrix3::new(v[0], v[5], v[4], v[5], v[1], v[3], v[4], v[3], v[2])
}

pub fn tensor_to_voigt(t: &Matrix3<f64>, out: &mut [f64]) {
    out[0] = t[(0, 0)];
    out[1] = t[(1, 1)];
    out[2] = t[(2, 2)];
    out[3] = 0.5 * (t[(1, 2)] + t[(2, 1)]);
    out[4] = 0.5 * (t[(0, 2)] + t[(2, 0)]);
    out[5] = 0.5 * (t[(0, 1)] + t[(1, 0)]);
}

pub fn deviator(t: &Matrix3<f64>) -> Matrix3<f64> {
    t - Matrix3::identity() * (t.trace() / 3.0)
}

/// Von Mises equivalent of a Voigt stress.
pub fn von_mises(s: &[f64]) -> f64 {
    let t1 = s[0] - s[1];
    let t2 = s[1] - s[2];
    let t3 = s[2] - s[0];
    let shear = s[3] * s[3] + s[4] * s[4] + s[5] * s[5];
    (0.5 * (t1 * t1 + t2 * t2 + t3 * t3 + 6.0 * shear)).sqrt()
}

/// Five-component representation of a symmetric deviatoric tensor.
pub fn deviatoric_to_vec5(d: &Matrix3<f64>) -> [f64; 5] {
    let sqrt2 = 2.0f64.sqrt();
    [
        (d[(0, 0)] - d[(1, 1)]) / sqrt2,
        (1.5f64).sqrt() * d[(2, 2)],
        sqrt2 * d[(0, 1)],
        sqrt2 * d[(0, 2)],
        sqrt2 * d[(1, 2)],
    ]
}

#[derive(Debug, Clone)]
struct Slots {
    shear_rate_effective: StateSlot,
    shear_effective: StateSlot,
    plastic_work: StateSlot,
    quaternions: StateSlot,
    hardness: StateSlot,
    shear_rates: StateSlot,
    elastic_strain: StateSlot,
    relative_volume: StateSlot,
}

/// Scalar results of the local return mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ReturnMapping {
    q: f64,
    plastic_rate: f64,
    /// `1 / (1 + 3 G dt d(rate)/dq)`
    beta: f64,
}

/// The update rule of one material variant, shared by all execution targets.
#[derive(Debug, Clone)]
pub struct PointKernel {
    params: MaterialParameters,
    taylor_factor: f64,
    num_slip_systems: usize,
    slots: Slots,
}

impl PointKernel {
    pub fn new(symmetry: CrystalSymmetry, params: MaterialParameters, layout: &StateLayout) -> error::Result<Self> {
        let slots = Slots {
            shear_rate_effective: layout.lookup(layout::SHEAR_RATE_EFFECTIVE)?,
            shear_effective: layout.lookup(layout::SHEAR_EFFECTIVE)?,
            plastic_work: layout.lookup(layout::PLASTIC_WORK)?,
            quaternions: layout.lookup(layout::QUATERNIONS)?,
            hardness: layout.lookup(layout::HARDNESS)?,
            shear_rates: layout.lookup(layout::SHEAR_RATES)?,
            elastic_strain: layout.lookup(layout::ELASTIC_STRAIN)?,
            relative_volume: layout.lookup(layout::RELATIVE_VOLUME)?,
        };
        Ok(Self {
            params,
            taylor_factor: symmetry.taylor_factor(),
            num_slip_systems: symmetry.num_slip_systems(),
            slots,
        })
    }

    pub fn params(&self) -> &MaterialParameters {
        &self.params
    }

    /// Initial state vector of a material point.
    pub fn initial_state(&self, len: usize) -> Vec<f64> {
        let mut state = vec![0.0; len];
        let q = &self.params.initial_orientation;
        self.slots.quaternions.get_mut(&mut state).copy_from_slice(q);
        self.slots.hardness.get_mut(&mut state)[0] = self.params.hardening.initial_hardness();
        self.slots.relative_volume.get_mut(&mut state)[0] = 1.0;
        state
    }

    /// Equivalent plastic strain rate for the equivalent stress `q` and slip resistance `tau`.
    fn plastic_rate(&self, q: f64, tau: f64) -> f64 {
        if q <= 0.0 {
            return 0.0;
        }
        let m = self.taylor_factor;
        let ratio = q / (m * tau);
        self.params.reference_shear_rate / m * (ratio.ln() / self.params.rate_sensitivity).exp()
    }

    /// Solves `q - q_trial + 3 G dt rate(q) = 0` by safeguarded Newton iteration.
    fn return_mapping(&self, q_trial: f64, tau: f64, dt: f64) -> Result<ReturnMapping, MaterialPointError> {
        let three_g_dt = 3.0 * self.params.shear_modulus * dt;
        if q_trial <= 0.0 {
            return Ok(ReturnMapping {
                q: 0.0,
                plastic_rate: 0.0,
                beta: 1.0,
            });
        }

        let derivative = |q: f64, rate: f64| {
            if q > 0.0 {
                rate / (self.params.rate_sensitivity * q)
            } else {
                0.0
            }
        };

        let (mut lo, mut hi) = (0.0, q_trial);
        let mut q = q_trial.min(self.taylor_factor * tau);
        for _ in 0..MAX_LOCAL_ITERATIONS {
            let rate = self.plastic_rate(q, tau);
            let residual = q - q_trial + three_g_dt * rate;
            let slope = 1.0 + three_g_dt * derivative(q, rate);

            if residual.abs() <= LOCAL_TOLERANCE * q_trial || hi - lo <= 1e-15 * q_trial {
                if !rate.is_finite() || !slope.is_finite() {
                    break;
                }
                return Ok(ReturnMapping {
                    q,
                    plastic_rate: rate,
                    beta: 1.0 / slope,
                });
            }
            if residual > 0.0 {
                hi = q;
            } else {
                lo = q;
            }
            let newton = q - residual / slope;
            q = if newton.is_finite() && newton > lo && newton < hi {
                newton
            } else {
                0.5 * (lo + hi)
            };
        }

        Err(MaterialPointError::ReturnMappingNotConverged {
            iterations: MAX_LOCAL_ITERATIONS,
        })
    }

    /// Updates one material point for the velocity gradient `l` over the step `dt`.
    ///
    /// Writes end stress, end state and the tangent `dt * d(sigma)/d(D)` in Voigt form with
    /// engineering shear, and returns the von Mises stress.
    pub fn update(
        &self,
        dt: f64,
        l: &Matrix3<f64>,
        stress_begin: &[f64],
        state_begin: &[f64],
        stress_end: &mut [f64],
        state_end: &mut [f64],
        tangent: &mut [f64],
    ) -> Result<f64, MaterialPointError> {
        if !l.iter().all(|v| v.is_finite()) || !stress_begin.iter().all(|v| v.is_finite()) {
            return Err(MaterialPointError::NonFiniteInput);
        }
        let bulk = self.params.bulk_modulus;
        let shear = self.params.shear_modulus;
        let identity = Matrix3::identity();

        let d = 0.5 * (l + l.transpose());
        let w = 0.5 * (l - l.transpose());

        // Hughes-Winget incremental rotation of the beginning-of-step stress
        let half_w = w * (0.5 * dt);
        let rotation = (identity - half_w)
            .try_inverse()
            .ok_or(MaterialPointError::NonFiniteInput)?
            * (identity + half_w);
        let sigma_rotated = rotation * voigt_to_tensor(stress_begin) * rotation.transpose();

        let sigma_trial = sigma_rotated + (identity * (bulk * d.trace()) + deviator(&d) * (2.0 * shear)) * dt;
        let pressure = sigma_trial.trace() / 3.0;
        let s_trial = deviator(&sigma_trial);
        let s_trial_norm = s_trial.norm();
        let q_trial = (1.5f64).sqrt() * s_trial_norm;

        state_end.copy_from_slice(state_begin);
        let hardness = self.slots.hardness.get(state_begin)[0];
        let tau = self.params.hardening.slip_resistance(hardness);
        if !(tau > 0.0) {
            return Err(MaterialPointError::InvalidSlipResistance(tau));
        }

        let ReturnMapping { q, plastic_rate, beta } = self.return_mapping(q_trial, tau, dt)?;
        let theta = if q_trial > 0.0 { q / q_trial } else { 1.0 };
        let s = s_trial * theta;
        let sigma = s + identity * pressure;
        tensor_to_voigt(&sigma, stress_end);

        self.update_state(dt, &d, &w, &s, q, plastic_rate, state_end);
        self.write_tangent(dt, theta, beta, &s_trial, s_trial_norm, tangent);

        Ok(von_mises(stress_end))
    }

    #[allow(clippy::too_many_arguments)]
    fn update_state(
        &self,
        dt: f64,
        d: &Matrix3<f64>,
        w: &Matrix3<f64>,
        s: &Matrix3<f64>,
        q: f64,
        plastic_rate: f64,
        state: &mut [f64],
    ) {
        let slots = &self.slots;
        let gamma_dot = self.taylor_factor * plastic_rate;

        slots.shear_rate_effective.get_mut(state)[0] = plastic_rate;
        slots.shear_effective.get_mut(state)[0] += dt * plastic_rate;
        slots.plastic_work.get_mut(state)[0] += dt * q * plastic_rate;

        let hardness = &mut slots.hardness.get_mut(state)[0];
        *hardness = self.params.hardening.evolve(*hardness, gamma_dot, dt);

        let per_system = gamma_dot / self.num_slip_systems as f64;
        slots.shear_rates.get_mut(state).fill(per_system);

        // First order update of the lattice orientation with the continuum spin. Not
        // normalized here; consumers renormalize.
        let omega = Vector3::new(w[(2, 1)], w[(0, 2)], w[(1, 0)]);
        let quat = slots.quaternions.get_mut(state);
        let current = Quaternion::new(quat[0], quat[1], quat[2], quat[3]);
        let rate = Quaternion::from_parts(0.0, omega) * current * 0.5;
        let next = current + rate * dt;
        quat.copy_from_slice(&[next.w, next.i, next.j, next.k]);

        let elastic_deviator = s / (2.0 * self.params.shear_modulus);
        slots
            .elastic_strain
            .get_mut(state)
            .copy_from_slice(&deviatoric_to_vec5(&elastic_deviator));
        slots.relative_volume.get_mut(state)[0] *= (dt * d.trace()).exp();
    }

    fn write_tangent(
        &self,
        dt: f64,
        theta: f64,
        beta: f64,
        s_trial: &Matrix3<f64>,
        s_trial_norm: f64,
        tangent: &mut [f64],
    ) {
        let bulk = self.params.bulk_modulus;
        let shear = self.params.shear_modulus;
        let mut normal = [0.0; 6];
        if s_trial_norm > 0.0 {
            tensor_to_voigt(&(s_trial / s_trial_norm), &mut normal);
        }

        for i in 0..6 {
            for j in 0..6 {
                let mut value = 0.0;
                if i < 3 && j < 3 {
                    let delta = if i == j { 1.0 } else { 0.0 };
                    value += bulk + 2.0 * shear * theta * (delta - 1.0 / 3.0);
                } else if i == j {
                    value += shear * theta;
                }
                value += 2.0 * shear * (beta - theta) * normal[i] * normal[j];
                tangent[6 * i + j] = dt * value;
            }
        }
    }

    /// Plastic rate of deformation tensor `D^p = rate * 3/2 * s / q` (row-major 3 x 3)
    /// from a committed stress and state.
    pub fn plastic_rate_tensor(&self, stress: &[f64], state: &[f64], out: &mut [f64]) {
        let rate = self.slots.shear_rate_effective.get(state)[0];
        let s = deviator(&voigt_to_tensor(stress));
        let q = von_mises(stress);
        let dp = if q > 0.0 { s * (1.5 * rate / q) } else { Matrix3::zeros() };
        for i in 0..3 {
            for j in 0..3 {
                out[3 * i + j] = dp[(i, j)];
            }
        }
    }
}
