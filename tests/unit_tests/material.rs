use crate::{box_space, smooth_velocity, voce_material};
use crysfem::error::SimulationError;
use crysfem::fe::{GeometricFactors, H1VectorSpace, NODES_PER_ELEMENT};
use crysfem::material::{
    layout, von_mises, CrystalSymmetry, ExecutionTarget, HardeningLaw, HardeningParameters, MaterialModel,
    MaterialParameters, MaterialPointError, MaterialVariant,
};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DVector, Matrix3, Matrix6, SMatrix};

fn dislocation_density_parameters() -> MaterialParameters {
    MaterialParameters {
        hardening: HardeningParameters::DislocationDensity {
            lattice_friction: 10.0,
            taylor_coefficient: 5.0,
            initial_density: 4.0,
            storage_coefficient: 2.0,
            recovery_coefficient: 0.1,
        },
        ..MaterialParameters::default()
    }
}

/// Nodal velocities of the homogeneous field `v = D x` on every element.
fn homogeneous_velocities(space: &H1VectorSpace, d: &Matrix3<f64>) -> Vec<SMatrix<f64, 3, NODES_PER_ELEMENT>> {
    let coords = space.node_coordinates();
    (0..space.num_elements())
        .map(|e| d * space.gather_element(e, &coords))
        .collect()
}

fn element_velocities(space: &H1VectorSpace, v: &DVector<f64>) -> Vec<SMatrix<f64, 3, NODES_PER_ELEMENT>> {
    (0..space.num_elements())
        .map(|e| space.gather_element(e, v))
        .collect()
}

#[test]
fn hcp_requires_dislocation_density_hardening() {
    let voce = MaterialVariant::new(CrystalSymmetry::Hcp, HardeningLaw::Voce, ExecutionTarget::Cpu);
    assert!(!voce.is_supported());
    let result = MaterialModel::new(voce, MaterialParameters::default(), 1, 8);
    assert!(matches!(result, Err(SimulationError::Configuration(_))));

    let dd = MaterialVariant::new(CrystalSymmetry::Hcp, HardeningLaw::DislocationDensity, ExecutionTarget::Cpu);
    let model = MaterialModel::new(dd, dislocation_density_parameters(), 1, 8).unwrap();
    assert_eq!(model.state_layout().lookup(layout::SHEAR_RATES).unwrap().width, 18);
}

#[test]
fn hardening_parameters_must_match_variant() {
    let variant = MaterialVariant::new(CrystalSymmetry::Fcc, HardeningLaw::NonlinearVoce, ExecutionTarget::Cpu);
    let result = MaterialModel::new(variant, MaterialParameters::default(), 1, 8);
    assert!(matches!(result, Err(SimulationError::Configuration(_))));
}

#[test]
fn invalid_material_parameters_are_rejected() {
    let variant = MaterialVariant::new(CrystalSymmetry::Bcc, HardeningLaw::Voce, ExecutionTarget::Multicore);
    let negative_modulus = MaterialParameters {
        shear_modulus: -1.0,
        ..MaterialParameters::default()
    };
    assert!(matches!(
        MaterialModel::new(variant, negative_modulus, 1, 8),
        Err(SimulationError::Configuration(_))
    ));

    let saturated = MaterialParameters {
        hardening: HardeningParameters::Voce {
            initial_strength: 50.0,
            saturation_strength: 40.0,
            initial_hardening_rate: 100.0,
        },
        ..MaterialParameters::default()
    };
    assert!(matches!(
        MaterialModel::new(variant, saturated, 1, 8),
        Err(SimulationError::Configuration(_))
    ));
}

#[test]
fn state_layout_is_resolved_by_name() {
    let variant = MaterialVariant::new(CrystalSymmetry::Fcc, HardeningLaw::Voce, ExecutionTarget::Cpu);
    let layout = variant.state_layout();
    let names: Vec<_> = layout.names().collect();
    assert_eq!(
        names,
        vec![
            layout::SHEAR_RATE_EFFECTIVE,
            layout::SHEAR_EFFECTIVE,
            layout::PLASTIC_WORK,
            layout::QUATERNIONS,
            layout::HARDNESS,
            layout::SHEAR_RATES,
            layout::ELASTIC_STRAIN,
            layout::RELATIVE_VOLUME
        ]
    );
    assert_eq!(layout.len(), 1 + 1 + 1 + 4 + 1 + 12 + 5 + 1);

    let quats = layout.lookup(layout::QUATERNIONS).unwrap();
    assert_eq!((quats.offset, quats.width), (3, 4));
    assert!(layout.find("back_stress").is_none());
    assert!(matches!(layout.lookup("back_stress"), Err(SimulationError::Configuration(_))));
}

#[test]
fn initial_state_holds_orientation_hardness_and_unit_volume() {
    let space = box_space([1, 1, 1]);
    let model = voce_material(&space, ExecutionTarget::Cpu);
    let layout = model.state_layout();
    let state = model.store().state.begin().point(0, 0);
    assert_eq!(layout.lookup(layout::QUATERNIONS).unwrap().get(state), &[1.0, 0.0, 0.0, 0.0]);
    assert_eq!(layout.lookup(layout::HARDNESS).unwrap().get(state), &[20.0]);
    assert_eq!(layout.lookup(layout::RELATIVE_VOLUME).unwrap().get(state), &[1.0]);
    assert_eq!(layout.lookup(layout::PLASTIC_WORK).unwrap().get(state), &[0.0]);
}

#[test]
fn small_rate_of_deformation_gives_hypoelastic_stress() {
    let space = box_space([1, 1, 1]);
    let mut model = voce_material(&space, ExecutionTarget::Cpu);
    let params = model.params().clone();
    let dt = 1e-3;
    model.set_dt(dt);

    let d = Matrix3::new(1e-3, 2e-4, 0.0, 2e-4, -5e-4, 0.0, 0.0, 0.0, 3e-3);
    let geometry = GeometricFactors::compute(&space, &space.node_coordinates());
    model
        .setup(&geometry, &homogeneous_velocities(&space, &d))
        .unwrap();

    let expected = (Matrix3::identity() * (params.bulk_modulus * d.trace())
        + (d - Matrix3::identity() * (d.trace() / 3.0)) * (2.0 * params.shear_modulus))
        * dt;
    let store = model.store();
    for q in 0..space.num_quadrature_points() {
        let sigma = store.stress.end().point(0, q);
        let voigt = [
            expected[(0, 0)],
            expected[(1, 1)],
            expected[(2, 2)],
            expected[(1, 2)],
            expected[(0, 2)],
            expected[(0, 1)],
        ];
        for (computed, expected) in sigma.iter().zip(voigt) {
            assert_scalar_eq!(*computed, expected, comp = abs, tol = 1e-9);
        }
        assert_scalar_eq!(store.von_mises.point(0, q)[0], von_mises(sigma), comp = float);
        // The committed history is untouched until commit
        assert!(store.stress.begin().point(0, q).iter().all(|&s| s == 0.0));
    }
}

#[test]
fn large_rate_of_deformation_flows_plastically_and_hardens() {
    let space = box_space([1, 1, 1]);
    let mut model = voce_material(&space, ExecutionTarget::Cpu);
    model.set_dt(1.0);

    // Isochoric extension at a strain rate well beyond the elastic range
    let d = Matrix3::from_diagonal(&nalgebra::Vector3::new(-0.005, -0.005, 0.01));
    let geometry = GeometricFactors::compute(&space, &space.node_coordinates());
    model
        .setup(&geometry, &homogeneous_velocities(&space, &d))
        .unwrap();

    let layout = model.state_layout();
    let store = model.store();
    let sigma = store.stress.end().point(0, 0);
    let state = store.state.end().point(0, 0);
    let trial_q = 3.0 * model.params().shear_modulus * 0.01;
    let q = von_mises(sigma);
    assert!(q < trial_q);
    assert!(q > 0.0);

    let hardness = layout.lookup(layout::HARDNESS).unwrap().get(state)[0];
    assert!(hardness > 20.0 && hardness <= 120.0);
    let plastic_rate = layout.lookup(layout::SHEAR_RATE_EFFECTIVE).unwrap().get(state)[0];
    assert!(plastic_rate > 0.0);
    assert!(layout.lookup(layout::PLASTIC_WORK).unwrap().get(state)[0] > 0.0);

    let shear_rates = layout.lookup(layout::SHEAR_RATES).unwrap().get(state);
    let total: f64 = shear_rates.iter().sum();
    assert_scalar_eq!(total, CrystalSymmetry::Fcc.taylor_factor() * plastic_rate, comp = abs, tol = 1e-12);

    let tangent = Matrix6::from_row_slice(store.tangent.point(0, 0));
    assert_matrix_eq!(tangent, tangent.transpose(), comp = abs, tol = 1e-6);
}

#[test]
fn commit_makes_end_values_the_history() {
    let space = box_space([2, 1, 1]);
    let mut model = voce_material(&space, ExecutionTarget::Cpu);
    let v = smooth_velocity(&space, 1e-3);
    let geometry = GeometricFactors::compute(&space, &space.node_coordinates());
    model.setup(&geometry, &element_velocities(&space, &v)).unwrap();

    let stress_end = model.store().stress.end().clone();
    let state_end = model.store().state.end().clone();
    model.commit();
    assert_eq!(model.store().stress.begin(), &stress_end);
    assert_eq!(model.store().state.begin(), &state_end);
}

#[test]
fn execution_targets_produce_identical_results() {
    let space = box_space([3, 2, 2]);
    let v = smooth_velocity(&space, 2e-2);
    let geometry = GeometricFactors::compute(&space, &space.node_coordinates());
    let velocities = element_velocities(&space, &v);

    let run = |target| {
        let mut model = voce_material(&space, target);
        model.set_dt(0.5);
        model.setup(&geometry, &velocities).unwrap();
        model
    };
    let cpu = run(ExecutionTarget::Cpu);
    for target in [ExecutionTarget::Multicore, ExecutionTarget::Device] {
        let other = run(target);
        assert_eq!(cpu.store().stress.end(), other.store().stress.end());
        assert_eq!(cpu.store().state.end(), other.store().state.end());
        assert_eq!(cpu.store().tangent, other.store().tangent);
        assert_eq!(cpu.store().von_mises, other.store().von_mises);
    }
}

#[test]
fn invalid_geometry_fails_material_setup() {
    let space = box_space([1, 1, 1]);
    let mut model = voce_material(&space, ExecutionTarget::Multicore);
    let mut coords = space.node_coordinates();
    for node in 0..space.num_nodes() {
        coords[3 * node] *= -1.0;
    }
    let geometry = GeometricFactors::compute(&space, &coords);
    let velocities = element_velocities(&space, &DVector::zeros(space.num_true_dofs()));
    assert_eq!(model.setup(&geometry, &velocities), Err(MaterialPointError::InvalidGeometry));
}

#[test]
fn non_finite_velocity_fails_material_setup() {
    let space = box_space([2, 1, 1]);
    for target in [ExecutionTarget::Cpu, ExecutionTarget::Multicore, ExecutionTarget::Device] {
        let mut model = voce_material(&space, target);
        let mut v = DVector::zeros(space.num_true_dofs());
        v[0] = f64::NAN;
        let geometry = GeometricFactors::compute(&space, &space.node_coordinates());
        assert_eq!(
            model.setup(&geometry, &element_velocities(&space, &v)),
            Err(MaterialPointError::NonFiniteInput)
        );
    }
}

#[test]
fn dislocation_density_material_updates() {
    let space = box_space([1, 1, 1]);
    let variant = MaterialVariant::new(CrystalSymmetry::Hcp, HardeningLaw::DislocationDensity, ExecutionTarget::Cpu);
    let mut model = MaterialModel::new(
        variant,
        dislocation_density_parameters(),
        space.num_elements(),
        space.num_quadrature_points(),
    )
    .unwrap();
    model.set_dt(1.0);
    let d = Matrix3::from_diagonal(&nalgebra::Vector3::new(-0.005, -0.005, 0.01));
    let geometry = GeometricFactors::compute(&space, &space.node_coordinates());
    model
        .setup(&geometry, &homogeneous_velocities(&space, &d))
        .unwrap();

    let state = model.store().state.end().point(0, 0);
    let density = model.state_layout().lookup(layout::HARDNESS).unwrap().get(state)[0];
    assert!(density > 4.0);
}
