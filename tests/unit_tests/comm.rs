use crate::{box_space, voce_material};
use crysfem::bc::BcGroup;
use crysfem::comm::{Communicator, SingleProcess, ThreadGroup};
use crysfem::error::SimulationError;
use crysfem::material::ExecutionTarget;
use crysfem::operator::{AssemblyMode, MechanicsOperator};
use nalgebra::DVector;
use std::sync::Arc;

#[test]
fn single_process_reductions_are_identity() {
    let comm = SingleProcess;
    let mut values = [1.0, -2.0, 3.5];
    comm.all_reduce_sum(&mut values);
    assert_eq!(values, [1.0, -2.0, 3.5]);
    comm.all_reduce_min(&mut values);
    assert_eq!(values, [1.0, -2.0, 3.5]);
    assert!(comm.all_reduce_and(true));
    assert!(!comm.all_reduce_and(false));
    assert!(comm.is_root());
}

#[test]
fn thread_group_reductions_agree_on_every_rank() {
    let results = ThreadGroup::run(4, |rank| {
        let r = rank.rank() as f64;
        let mut sum = [r, 1.0];
        rank.all_reduce_sum(&mut sum);
        let mut min = [10.0 - r, r];
        rank.all_reduce_min(&mut min);
        let all = rank.all_reduce_and(rank.rank() != 2);
        let all_true = rank.all_reduce_and(true);
        (sum, min, all, all_true, rank.size())
    });

    assert_eq!(results.len(), 4);
    for (sum, min, all, all_true, size) in results {
        assert_eq!(sum, [6.0, 4.0]);
        assert_eq!(min, [7.0, 0.0]);
        assert!(!all);
        assert!(all_true);
        assert_eq!(size, 4);
    }
}

#[test]
fn thread_group_scalar_sum_is_bit_identical_across_ranks() {
    let results = ThreadGroup::run(3, |rank| rank.all_reduce_sum_scalar(0.1 * (rank.rank() as f64 + 1.0)));
    assert!(results.iter().all(|&r| r.to_bits() == results[0].to_bits()));
}

#[test]
fn material_failure_on_one_rank_fails_every_rank() {
    let results = ThreadGroup::run(2, |rank| {
        let failing = rank.rank() == 1;
        let space = box_space([1, 1, 1]);
        let material = voce_material(&space, ExecutionTarget::Cpu);
        let mut operator = MechanicsOperator::new(space, material, AssemblyMode::Full, Arc::new(rank)).unwrap();
        operator.update_essential_dofs(&BcGroup::new(6)).unwrap();
        operator.set_dt(1.0);

        // A velocity that collapses the element through itself within one step
        let coords = operator.space().node_coordinates();
        let velocity = if failing {
            DVector::from_fn(coords.len(), |i, _| if i % 3 == 2 { -3.0 * coords[i] } else { 0.0 })
        } else {
            DVector::zeros(coords.len())
        };
        let mut residual = DVector::zeros(coords.len());
        operator.residual(&velocity, &mut residual)
    });

    for result in results {
        assert!(matches!(result, Err(SimulationError::CollectiveMaterialFailure)));
    }
}
