//! Dispatch of per-point updates to the execution targets.
//!
//! Points read disjoint input and write disjoint output, so every target produces the same
//! values. When several elements fail, the error of the lowest element index is reported.
use itertools::izip;
use nalgebra::SMatrix;
use rayon::prelude::*;

use crate::fe::{GeometricFactors, NODES_PER_ELEMENT};
use crate::material::kernel::{MaterialPointError, PointKernel};
use crate::material::ExecutionTarget;
use crate::quadrature_field::QuadratureFieldStore;

/// Number of elements processed by one launch on the device target.
pub const DEVICE_BATCH_ELEMENTS: usize = 256;

pub(crate) struct PointUpdate<'a> {
    pub kernel: &'a PointKernel,
    pub dt: f64,
    pub geometry: &'a GeometricFactors,
    pub velocities: &'a [SMatrix<f64, 3, NODES_PER_ELEMENT>],
}

/// Input and output buffers of one element.
struct ElementBuffers<'a> {
    stress_begin: &'a [f64],
    state_begin: &'a [f64],
    stress_end: &'a mut [f64],
    state_end: &'a mut [f64],
    tangent: &'a mut [f64],
    von_mises: &'a mut [f64],
}

impl PointUpdate<'_> {
    fn update_element(&self, element: usize, buffers: ElementBuffers) -> Result<(), MaterialPointError> {
        let ElementBuffers {
            stress_begin,
            state_begin,
            stress_end,
            state_end,
            tangent,
            von_mises,
        } = buffers;
        let num_state = state_begin.len() / von_mises.len();
        let velocity = &self.velocities[element];

        let points = self.geometry.element(element).iter();
        let chunks = izip!(
            stress_begin.chunks_exact(6),
            state_begin.chunks_exact(num_state),
            stress_end.chunks_exact_mut(6),
            state_end.chunks_exact_mut(num_state),
            tangent.chunks_exact_mut(36),
            von_mises.iter_mut()
        );
        for (point, (sigma0, state0, sigma1, state1, tangent, vm)) in points.zip(chunks) {
            let l = velocity * point.gradients.transpose();
            *vm = self.kernel.update(self.dt, &l, sigma0, state0, sigma1, state1, tangent)?;
        }
        Ok(())
    }

    /// Updates the elements `first..first + count`, sequentially or data-parallel.
    fn update_range(
        &self,
        store: &mut QuadratureFieldStore,
        first: usize,
        count: usize,
        parallel: bool,
    ) -> Result<(), MaterialPointError> {
        let (stress_begin, stress_end) = store.stress.split_mut();
        let (state_begin, state_end) = store.state.split_mut();
        let stress_len = stress_end.element_len();
        let state_len = state_end.element_len();
        let tangent_len = store.tangent.element_len();
        let vm_len = store.von_mises.element_len();

        let range = |len: usize| first * len..(first + count) * len;
        let stress_begin = &stress_begin.as_slice()[range(stress_len)];
        let state_begin = &state_begin.as_slice()[range(state_len)];
        let stress_end = &mut stress_end.as_mut_slice()[range(stress_len)];
        let state_end = &mut state_end.as_mut_slice()[range(state_len)];
        let tangent = &mut store.tangent.as_mut_slice()[range(tangent_len)];
        let von_mises = &mut store.von_mises.as_mut_slice()[range(vm_len)];

        let failure = if parallel {
            (
                stress_begin.par_chunks(stress_len),
                state_begin.par_chunks(state_len),
                stress_end.par_chunks_mut(stress_len),
                state_end.par_chunks_mut(state_len),
                tangent.par_chunks_mut(tangent_len),
                von_mises.par_chunks_mut(vm_len),
            )
                .into_par_iter()
                .enumerate()
                .filter_map(|(i, (stress_begin, state_begin, stress_end, state_end, tangent, von_mises))| {
                    let buffers = ElementBuffers {
                        stress_begin,
                        state_begin,
                        stress_end,
                        state_end,
                        tangent,
                        von_mises,
                    };
                    self.update_element(first + i, buffers)
                        .err()
                        .map(|err| (first + i, err))
                })
                .min_by_key(|(element, _)| *element)
        } else {
            izip!(
                stress_begin.chunks(stress_len),
                state_begin.chunks(state_len),
                stress_end.chunks_mut(stress_len),
                state_end.chunks_mut(state_len),
                tangent.chunks_mut(tangent_len),
                von_mises.chunks_mut(vm_len)
            )
            .enumerate()
            .find_map(|(i, (stress_begin, state_begin, stress_end, state_end, tangent, von_mises))| {
                let buffers = ElementBuffers {
                    stress_begin,
                    state_begin,
                    stress_end,
                    state_end,
                    tangent,
                    von_mises,
                };
                self.update_element(first + i, buffers)
                    .err()
                    .map(|err| (first + i, err))
            })
        };

        match failure {
            Some((_, err)) => Err(err),
            None => Ok(()),
        }
    }
}

pub(crate) fn run(
    target: ExecutionTarget,
    update: &PointUpdate,
    store: &mut QuadratureFieldStore,
) -> Result<(), MaterialPointError> {
    let num_elements = update.geometry.num_elements();
    match target {
        ExecutionTarget::Cpu => update.update_range(store, 0, num_elements, false),
        ExecutionTarget::Multicore => update.update_range(store, 0, num_elements, true),
        ExecutionTarget::Device => {
            let mut first = 0;
            while first < num_elements {
                let count = DEVICE_BATCH_ELEMENTS.min(num_elements - first);
                update.update_range(store, first, count, true)?;
                first += count;
            }
            Ok(())
        }
    }
}
