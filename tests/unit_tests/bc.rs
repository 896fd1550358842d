use crate::box_space;
use crysfem::bc::{apply_essential_velocities, component_mask, BcStage, BoundaryConditionManager};
use crysfem::comm::SingleProcess;
use crysfem::error::SimulationError;
use crysfem::fe::{ATTRIBUTE_X_MIN, ATTRIBUTE_Y_MIN, ATTRIBUTE_Z_MAX, ATTRIBUTE_Z_MIN};
use matrixcompare::assert_scalar_eq;
use nalgebra::{DVector, Matrix3, Point3, Vector3};
use std::sync::Arc;

fn velocity_stage(start_step: usize, rate: f64) -> BcStage {
    BcStage {
        start_step,
        essential_ids: vec![ATTRIBUTE_X_MIN, ATTRIBUTE_Y_MIN, ATTRIBUTE_Z_MIN, ATTRIBUTE_Z_MAX],
        essential_comps: vec![1, 2, 3, 3],
        essential_vals: vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, rate],
        velocity_gradient: None,
        vgrad_origin: None,
    }
}

fn shear_gradient_stage(start_step: usize) -> BcStage {
    BcStage {
        start_step,
        essential_ids: vec![ATTRIBUTE_Z_MIN, ATTRIBUTE_Z_MAX],
        essential_comps: vec![-7, -7],
        essential_vals: vec![],
        velocity_gradient: Some([[0.0, 0.0, 0.01], [0.0, 0.0, 0.0], [0.0, 0.0, 0.0]]),
        vgrad_origin: None,
    }
}

fn assert_configuration_error<T: std::fmt::Debug>(result: Result<T, SimulationError>) {
    assert!(
        matches!(result, Err(SimulationError::Configuration(_))),
        "expected configuration error, got {:?}",
        result
    );
}

#[test]
fn component_codes_decode_to_masks() {
    assert_eq!(component_mask(0).unwrap(), [false, false, false]);
    assert_eq!(component_mask(1).unwrap(), [true, false, false]);
    assert_eq!(component_mask(2).unwrap(), [false, true, false]);
    assert_eq!(component_mask(3).unwrap(), [false, false, true]);
    assert_eq!(component_mask(4).unwrap(), [true, true, false]);
    assert_eq!(component_mask(5).unwrap(), [false, true, true]);
    assert_eq!(component_mask(6).unwrap(), [true, false, true]);
    assert_eq!(component_mask(7).unwrap(), [true, true, true]);
    assert_configuration_error(component_mask(8));
}

#[test]
fn manager_rejects_malformed_stages() {
    assert_configuration_error(BoundaryConditionManager::new(vec![], 6));
    assert_configuration_error(BoundaryConditionManager::new(vec![velocity_stage(2, 1.0)], 6));
    assert_configuration_error(BoundaryConditionManager::new(
        vec![velocity_stage(1, 1.0), velocity_stage(1, 2.0)],
        6,
    ));

    let mut unknown_attribute = velocity_stage(1, 1.0);
    unknown_attribute.essential_ids[0] = 7;
    assert_configuration_error(BoundaryConditionManager::new(vec![unknown_attribute], 6));

    let mut bad_code = velocity_stage(1, 1.0);
    bad_code.essential_comps[1] = 9;
    assert_configuration_error(BoundaryConditionManager::new(vec![bad_code], 6));

    let mut missing_values = velocity_stage(1, 1.0);
    missing_values.essential_vals.pop();
    assert_configuration_error(BoundaryConditionManager::new(vec![missing_values], 6));

    let mut missing_gradient = shear_gradient_stage(1);
    missing_gradient.velocity_gradient = None;
    assert_configuration_error(BoundaryConditionManager::new(vec![missing_gradient], 6));
}

#[test]
fn stages_are_selected_by_step() {
    // Stages are given out of order on purpose
    let manager =
        BoundaryConditionManager::new(vec![velocity_stage(4, 2.0), velocity_stage(1, 1.0), shear_gradient_stage(7)], 6)
            .unwrap();

    assert!(manager.bcs_changed(1));
    assert!(!manager.bcs_changed(2));
    assert!(manager.bcs_changed(4));
    assert!(manager.bcs_changed(7));
    assert!(!manager.bcs_changed(8));

    let z_max = ATTRIBUTE_Z_MAX - 1;
    assert_eq!(manager.update_bc_data(3).velocity_values[z_max], Vector3::new(0.0, 0.0, 1.0));
    assert_eq!(manager.update_bc_data(4).velocity_values[z_max], Vector3::new(0.0, 0.0, 2.0));
    assert_eq!(manager.update_bc_data(6).velocity_values[z_max], Vector3::new(0.0, 0.0, 2.0));

    let last = manager.update_bc_data(100);
    assert!(last.velocity.is_empty());
    assert!(last.velocity_gradient.contains(ATTRIBUTE_Z_MIN));
    assert!(last.velocity_gradient.contains(ATTRIBUTE_Z_MAX));
    assert_eq!(last.velocity_gradient.mask(ATTRIBUTE_Z_MAX), [true, true, true]);
}

#[test]
fn negative_codes_split_into_velocity_gradient_group() {
    let stage = BcStage {
        start_step: 1,
        essential_ids: vec![ATTRIBUTE_X_MIN, ATTRIBUTE_Z_MAX],
        essential_comps: vec![1, -3],
        essential_vals: vec![0.5, 0.0, 0.0],
        velocity_gradient: Some([[0.0; 3], [0.0; 3], [0.0, 0.0, 1.0]]),
        vgrad_origin: Some([0.0, 0.0, 0.0]),
    };
    let manager = BoundaryConditionManager::new(vec![stage], 6).unwrap();
    let bcs = manager.update_bc_data(1);

    assert!(bcs.velocity.contains(ATTRIBUTE_X_MIN));
    assert!(!bcs.velocity.contains(ATTRIBUTE_Z_MAX));
    assert!(bcs.velocity_gradient.contains(ATTRIBUTE_Z_MAX));
    assert!(bcs.total.contains(ATTRIBUTE_X_MIN));
    assert!(bcs.total.contains(ATTRIBUTE_Z_MAX));
    assert_eq!(bcs.total.mask(ATTRIBUTE_Z_MAX), [false, false, true]);
    assert_eq!(bcs.velocity_values[ATTRIBUTE_X_MIN - 1], Vector3::new(0.5, 0.0, 0.0));
    assert_eq!(bcs.velocity_gradient_tensor[(2, 2)], 1.0);
    assert_eq!(bcs.origin, Some(Point3::origin()));
}

#[test]
fn uniform_velocities_are_written_on_constrained_components_only() {
    let space = box_space([2, 2, 2]);
    let manager = BoundaryConditionManager::new(vec![velocity_stage(1, 0.25)], 6).unwrap();
    let bcs = manager.update_bc_data(1);
    let coords = space.node_coordinates();
    let mut velocity = DVector::repeat(space.num_true_dofs(), -1.0);

    let origin = apply_essential_velocities(&bcs, &space, &coords, 0.0, None, &SingleProcess, &mut velocity);
    assert!(origin.is_none());

    for node in 0..space.num_nodes() {
        let (x, y, z) = (coords[3 * node], coords[3 * node + 1], coords[3 * node + 2]);
        let v = [velocity[3 * node], velocity[3 * node + 1], velocity[3 * node + 2]];
        assert_eq!(v[0], if x == 0.0 { 0.0 } else { -1.0 });
        assert_eq!(v[1], if y == 0.0 { 0.0 } else { -1.0 });
        let expected_z = if z == 1.0 {
            0.25
        } else if z == 0.0 {
            0.0
        } else {
            -1.0
        };
        assert_eq!(v[2], expected_z);
    }
}

#[test]
fn velocity_function_overrides_uniform_values() {
    let space = box_space([1, 1, 1]);
    let function = Arc::new(|x: &Point3<f64>, t: f64| Vector3::new(0.0, 0.0, t * (1.0 + x.x)));
    let manager = BoundaryConditionManager::new(vec![velocity_stage(1, 0.25)], 6)
        .unwrap()
        .with_velocity_function(function);
    let bcs = manager.update_bc_data(1);
    let coords = space.node_coordinates();
    let mut velocity = DVector::zeros(space.num_true_dofs());

    apply_essential_velocities(
        &bcs,
        &space,
        &coords,
        2.0,
        manager.velocity_function(),
        &SingleProcess,
        &mut velocity,
    );
    for node in 0..space.num_nodes() {
        if coords[3 * node + 2] == 1.0 {
            assert_scalar_eq!(velocity[3 * node + 2], 2.0 * (1.0 + coords[3 * node]), comp = float);
        }
    }
}

#[test]
fn velocity_gradient_group_uses_minimum_corner_as_origin() {
    let space = box_space([1, 1, 1]);
    let mut coords = space.node_coordinates();
    // Translate the configuration so the origin is not the coordinate origin
    for node in 0..space.num_nodes() {
        coords[3 * node] += 2.0;
        coords[3 * node + 1] -= 1.0;
    }
    let manager = BoundaryConditionManager::new(vec![shear_gradient_stage(1)], 6).unwrap();
    let bcs = manager.update_bc_data(1);
    let mut velocity = DVector::zeros(space.num_true_dofs());

    let origin = apply_essential_velocities(&bcs, &space, &coords, 0.0, None, &SingleProcess, &mut velocity)
        .expect("Velocity gradient group is active");
    assert_eq!(origin, Point3::new(2.0, -1.0, 0.0));

    let gradient = Matrix3::new(0.0, 0.0, 0.01, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
    for node in 0..space.num_nodes() {
        let x = Point3::new(coords[3 * node], coords[3 * node + 1], coords[3 * node + 2]);
        let expected = gradient * (x - origin);
        for c in 0..3 {
            assert_scalar_eq!(velocity[3 * node + c], expected[c], comp = abs, tol = 1e-15);
        }
    }
}

#[test]
fn given_velocity_gradient_origin_is_used() {
    let space = box_space([1, 1, 1]);
    let coords = space.node_coordinates();
    let mut stage = shear_gradient_stage(1);
    stage.vgrad_origin = Some([0.0, 0.0, 0.5]);
    let manager = BoundaryConditionManager::new(vec![stage], 6).unwrap();
    let mut velocity = DVector::zeros(space.num_true_dofs());

    let origin = apply_essential_velocities(
        &manager.update_bc_data(1),
        &space,
        &coords,
        0.0,
        None,
        &SingleProcess,
        &mut velocity,
    );
    assert_eq!(origin, Some(Point3::new(0.0, 0.0, 0.5)));
    for node in 0..space.num_nodes() {
        let expected = 0.01 * (coords[3 * node + 2] - 0.5);
        assert_scalar_eq!(velocity[3 * node], expected, comp = abs, tol = 1e-15);
    }
}
