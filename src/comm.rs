//! Collective communication between the ranks of an SPMD run.
//!
//! Every rank must call each reduction the same number of times and in the same order.
//! Reductions are the only points where ranks exchange information, so branching on a
//! rank-local result before the corresponding reduction desynchronizes the run.
use parking_lot::Mutex;
use std::sync::{Arc, Barrier};
use std::thread;

pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Replaces every entry of `values` by its sum over all ranks.
    fn all_reduce_sum(&self, values: &mut [f64]);

    /// Replaces every entry of `values` by its minimum over all ranks.
    fn all_reduce_min(&self, values: &mut [f64]);

    /// Logical AND of `local` over all ranks.
    fn all_reduce_and(&self, local: bool) -> bool {
        let mut flag = [if local { 1.0 } else { 0.0 }];
        self.all_reduce_min(&mut flag);
        flag[0] > 0.5
    }

    fn all_reduce_sum_scalar(&self, value: f64) -> f64 {
        let mut buffer = [value];
        self.all_reduce_sum(&mut buffer);
        buffer[0]
    }

    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

/// Communicator for a run consisting of a single rank.
#[derive(Debug, Copy, Clone, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, _values: &mut [f64]) {}

    fn all_reduce_min(&self, _values: &mut [f64]) {}
}

#[derive(Debug)]
struct SharedSlots {
    barrier: Barrier,
    slots: Mutex<Vec<Vec<f64>>>,
}

/// A group of in-process ranks, one per thread.
///
/// Reductions combine contributions in rank order, so every rank obtains a bit-identical
/// result.
#[derive(Debug)]
pub struct ThreadGroup;

impl ThreadGroup {
    /// Creates the rank handles of a new group. Each handle must be moved to its own thread.
    pub fn create(size: usize) -> Vec<ThreadRank> {
        assert!(size > 0, "Thread group must contain at least one rank");
        let shared = Arc::new(SharedSlots {
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![Vec::new(); size]),
        });
        (0..size)
            .map(|rank| ThreadRank {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    /// Runs `f` on `size` ranks, each on its own thread, and collects the results in rank order.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(ThreadRank) -> R + Sync,
    {
        let ranks = Self::create(size);
        let f = &f;
        thread::scope(|scope| {
            let handles: Vec<_> = ranks
                .into_iter()
                .map(|rank| scope.spawn(move || f(rank)))
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

#[derive(Debug, Clone)]
pub struct ThreadRank {
    rank: usize,
    size: usize,
    shared: Arc<SharedSlots>,
}

impl ThreadRank {
    fn all_reduce_with(&self, values: &mut [f64], combine: impl Fn(f64, f64) -> f64) {
        self.shared.slots.lock()[self.rank] = values.to_vec();
        self.shared.barrier.wait();
        {
            let slots = self.shared.slots.lock();
            for (i, value) in values.iter_mut().enumerate() {
                *value = slots
                    .iter()
                    .map(|slot| slot[i])
                    .reduce(&combine)
                    .unwrap_or(*value);
            }
        }
        // No rank may overwrite its slot before every rank has read all slots
        self.shared.barrier.wait();
    }
}

impl Communicator for ThreadRank {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_reduce_sum(&self, values: &mut [f64]) {
        self.all_reduce_with(values, |a, b| a + b);
    }

    fn all_reduce_min(&self, values: &mut [f64]) {
        self.all_reduce_with(values, f64::min);
    }
}
