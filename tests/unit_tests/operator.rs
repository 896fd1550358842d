use crate::{box_space, distorted_box_mesh, isotropic_tangent, mechanics_operator, smooth_velocity};
use crysfem::bc::{component_mask, BcGroup};
use crysfem::fe::{GeometricFactors, H1VectorSpace, ATTRIBUTE_X_MIN, ATTRIBUTE_Z_MAX};
use crysfem::operator::{
    AssemblyMode, AssemblyStrategy, ElementAssembly, EssentialDofs, FullAssembly, PartialAssembly,
};
use crysfem::quadrature_field::QuadratureField;
use crysfem::sparse::LinearOperator;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use proptest::prelude::*;

fn test_vector(n: usize) -> DVector<f64> {
    DVector::from_fn(n, |i, _| ((i * 7 + 3) % 11) as f64 / 11.0 - 0.4)
}

/// A symmetric positive definite tangent that varies between quadrature points.
fn varying_tangent(space: &H1VectorSpace) -> QuadratureField {
    let mut field = QuadratureField::zeros(space.num_elements(), space.num_quadrature_points(), 36);
    for e in 0..space.num_elements() {
        for q in 0..space.num_quadrature_points() {
            let scale = 1.0 + 0.1 * e as f64 + 0.01 * q as f64;
            let values = isotropic_tangent(2.0 * scale, 1.0 / scale);
            field.point_mut(e, q).copy_from_slice(&values);
        }
    }
    field
}

fn some_essential_dofs(space: &H1VectorSpace) -> EssentialDofs {
    let mut attributes = vec![false; 6];
    let mut components = vec![[false; 3]; 6];
    attributes[ATTRIBUTE_X_MIN - 1] = true;
    components[ATTRIBUTE_X_MIN - 1] = [true, true, true];
    attributes[ATTRIBUTE_Z_MAX - 1] = true;
    components[ATTRIBUTE_Z_MAX - 1] = [false, false, true];
    EssentialDofs::new(space.num_true_dofs(), space.essential_true_dofs(&attributes, &components))
}

fn assembled_strategies(
    space: &H1VectorSpace,
    geometry: &GeometricFactors,
    tangent: &QuadratureField,
    essential: &EssentialDofs,
) -> Vec<Box<dyn AssemblyStrategy>> {
    let mut strategies: Vec<Box<dyn AssemblyStrategy>> = vec![
        Box::new(FullAssembly::new(space).unwrap()),
        Box::new(PartialAssembly::new()),
        Box::new(ElementAssembly::new()),
    ];
    for strategy in &mut strategies {
        strategy.assemble(space, geometry, tangent, essential);
    }
    strategies
}

/// Dense matrix of a strategy's local action, one column per unit vector.
fn dense_local_matrix(strategy: &dyn AssemblyStrategy, space: &H1VectorSpace) -> DMatrix<f64> {
    let n = space.num_true_dofs();
    let mut matrix = DMatrix::zeros(n, n);
    for j in 0..n {
        let mut e_j = DVector::zeros(n);
        e_j[j] = 1.0;
        let mut column = DVector::zeros(n);
        strategy.apply_local(space, &e_j, &mut column);
        matrix.set_column(j, &column);
    }
    matrix
}

#[test]
fn assembly_strategies_agree_on_action_and_diagonal() {
    let space = H1VectorSpace::new(distorted_box_mesh([2, 2, 2]));
    let geometry = GeometricFactors::compute(&space, &space.node_coordinates());
    let tangent = varying_tangent(&space);
    let essential = some_essential_dofs(&space);
    let strategies = assembled_strategies(&space, &geometry, &tangent, &essential);

    let n = space.num_true_dofs();
    let x = test_vector(n);
    let mut reference_local = DVector::zeros(n);
    let mut reference_eliminated = DVector::zeros(n);
    strategies[0].apply_local(&space, &x, &mut reference_local);
    strategies[0].apply_eliminated(&space, &essential, &x, &mut reference_eliminated);
    let reference_diagonal = strategies[0].diagonal(&space);

    for strategy in &strategies[1..] {
        let mut local = DVector::zeros(n);
        strategy.apply_local(&space, &x, &mut local);
        assert_matrix_eq!(local, reference_local, comp = abs, tol = 1e-12);

        let mut eliminated = DVector::zeros(n);
        strategy.apply_eliminated(&space, &essential, &x, &mut eliminated);
        assert_matrix_eq!(eliminated, reference_eliminated, comp = abs, tol = 1e-12);

        assert_matrix_eq!(strategy.diagonal(&space), reference_diagonal, comp = abs, tol = 1e-12);
    }
}

#[test]
fn local_stiffness_is_symmetric_and_annihilates_rigid_translations() {
    let space = H1VectorSpace::new(distorted_box_mesh([2, 1, 2]));
    let geometry = GeometricFactors::compute(&space, &space.node_coordinates());
    let tangent = varying_tangent(&space);
    let essential = EssentialDofs::new(space.num_true_dofs(), vec![]);

    for strategy in assembled_strategies(&space, &geometry, &tangent, &essential) {
        let k = dense_local_matrix(&*strategy, &space);
        assert_matrix_eq!(k, k.transpose(), comp = abs, tol = 1e-12);

        let translation = DVector::from_fn(space.num_true_dofs(), |i, _| [1.0, -2.0, 0.5][i % 3]);
        let force = &k * translation;
        assert_scalar_eq!(force.amax(), 0.0, comp = abs, tol = 1e-12);
    }
}

#[test]
fn full_assembly_eliminated_matrix_has_unit_essential_rows_and_columns() {
    let space = box_space([2, 2, 1]);
    let geometry = GeometricFactors::compute(&space, &space.node_coordinates());
    let tangent = varying_tangent(&space);
    let essential = some_essential_dofs(&space);
    let strategies = assembled_strategies(&space, &geometry, &tangent, &essential);
    let matrix = strategies[0]
        .eliminated_matrix()
        .expect("Full assembly forms the eliminated matrix");

    let dense = DMatrix::from(matrix);
    for &dof in essential.dofs() {
        for j in 0..dense.ncols() {
            let expected = if j == dof { 1.0 } else { 0.0 };
            assert_eq!(dense[(dof, j)], expected);
            assert_eq!(dense[(j, dof)], expected);
        }
    }
    assert!(strategies[1].eliminated_matrix().is_none());
    assert!(strategies[2].eliminated_matrix().is_none());

    // The eliminated action is the product with the stored matrix, overwriting the output
    let x = test_vector(space.num_true_dofs());
    let mut y = DVector::repeat(x.len(), 7.0);
    strategies[0].apply_eliminated(&space, &essential, &x, &mut y);
    let expected = &dense * &x;
    assert_matrix_eq!(y, expected, comp = abs, tol = 1e-12 * expected.amax());
}

#[test]
fn rigid_translation_produces_no_stress_and_identity_deformation_gradient() {
    let space = box_space([2, 2, 2]);
    let mut operator = mechanics_operator(space, AssemblyMode::Full);
    operator.update_essential_dofs(&BcGroup::new(6)).unwrap();
    operator.set_dt(0.1);

    let n = operator.dimension();
    let velocity = DVector::from_fn(n, |i, _| [1.0, 2.0, -3.0][i % 3]);
    let mut residual = DVector::zeros(n);
    operator.residual(&velocity, &mut residual).unwrap();
    assert_scalar_eq!(residual.amax(), 0.0, comp = abs, tol = 1e-12);

    let def_grad = operator.deformation_gradient();
    for e in 0..def_grad.num_elements() {
        for q in 0..def_grad.num_quadrature_points() {
            let f = def_grad.point(e, q);
            let identity = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
            for (computed, expected) in f.iter().zip(identity) {
                assert_scalar_eq!(*computed, expected, comp = abs, tol = 1e-13);
            }
        }
    }
}

#[test]
fn residual_is_bit_identical_for_repeated_evaluations() {
    let space = H1VectorSpace::new(distorted_box_mesh([3, 2, 2]));
    let velocity = smooth_velocity(&space, 1e-2);
    let mut operator = mechanics_operator(space, AssemblyMode::PartialAssembly);
    operator.update_essential_dofs(&BcGroup::new(6)).unwrap();
    operator.set_dt(0.5);

    let n = operator.dimension();
    let mut first = DVector::zeros(n);
    let mut second = DVector::zeros(n);
    operator.residual(&velocity, &mut first).unwrap();
    operator.residual(&velocity, &mut second).unwrap();
    assert!(first
        .iter()
        .zip(second.iter())
        .all(|(a, b)| a.to_bits() == b.to_bits()));
}

#[test]
fn jacobian_matches_finite_differences_of_residual_in_elastic_range() {
    let space = H1VectorSpace::new(distorted_box_mesh([2, 2, 2]));
    let velocity = smooth_velocity(&space, 1e-4);
    for mode in [AssemblyMode::Full, AssemblyMode::PartialAssembly, AssemblyMode::ElementAssembly] {
        let mut operator = mechanics_operator(space.clone(), mode);
        operator.update_essential_dofs(&BcGroup::new(6)).unwrap();
        operator.set_dt(1e-2);

        let n = operator.dimension();
        let direction = test_vector(n) * 1e-4;
        let mut residual = DVector::zeros(n);
        operator.residual(&velocity, &mut residual).unwrap();
        let mut jd = DVector::zeros(n);
        {
            let (jacobian, _) = operator.gradient().unwrap();
            jacobian
                .apply(DVectorViewMut::from(&mut jd), DVectorView::from(&direction))
                .unwrap();
        }

        let h = 1e-3;
        let mut forward = DVector::zeros(n);
        let mut backward = DVector::zeros(n);
        operator
            .residual(&(&velocity + &direction * h), &mut forward)
            .unwrap();
        operator
            .residual(&(&velocity - &direction * h), &mut backward)
            .unwrap();
        let fd = (forward - backward) / (2.0 * h);
        let scale = jd.amax();
        assert!(scale > 0.0);
        assert_matrix_eq!(fd / scale, jd / scale, comp = abs, tol = 1e-4);
    }
}

#[test]
fn essential_rows_of_residual_are_zero() {
    let space = box_space([2, 2, 2]);
    let velocity = smooth_velocity(&space, 1e-3);
    let mut operator = mechanics_operator(space, AssemblyMode::ElementAssembly);
    let mut group = BcGroup::new(6);
    group.attributes[ATTRIBUTE_X_MIN - 1] = true;
    group.components[ATTRIBUTE_X_MIN - 1] = [true, false, true];
    operator.update_essential_dofs(&group).unwrap();
    operator.set_dt(0.1);
    assert_eq!(operator.essential_true_dofs().len(), 2 * 9);

    let mut residual = DVector::zeros(operator.dimension());
    operator.residual(&velocity, &mut residual).unwrap();
    for &dof in operator.essential_true_dofs() {
        assert_eq!(residual[dof], 0.0);
    }
    assert!(residual.amax() > 0.0);
}

#[test]
fn update_essential_dofs_rejects_short_masks() {
    let space = box_space([1, 1, 1]);
    let mut operator = mechanics_operator(space, AssemblyMode::Full);
    assert!(operator.update_essential_dofs(&BcGroup::new(3)).is_err());
}

#[test]
fn gradient_before_material_update_is_an_error() {
    let space = box_space([1, 1, 1]);
    let mut operator = mechanics_operator(space, AssemblyMode::Full);
    assert!(operator.gradient().is_err());
}

#[test]
fn commit_advances_the_configuration() {
    let space = box_space([1, 1, 1]);
    let velocity = smooth_velocity(&space, 1e-3);
    let mut operator = mechanics_operator(space, AssemblyMode::Full);
    operator.update_essential_dofs(&BcGroup::new(6)).unwrap();
    operator.set_dt(0.2);
    let mut residual = DVector::zeros(operator.dimension());
    operator.residual(&velocity, &mut residual).unwrap();

    let expected = operator.kinematics().begin() + &velocity * 0.2;
    operator.commit();
    assert_matrix_eq!(operator.kinematics().begin().clone(), expected, comp = abs, tol = 1e-15);
    assert_matrix_eq!(operator.kinematics().end().clone(), expected, comp = abs, tol = 1e-15);
    assert_eq!(
        operator.kinematics().reference(),
        &operator.space().node_coordinates()
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn update_bcs_action_zeroes_essential_rows(
        attributes in prop::collection::vec(any::<bool>(), 6),
        codes in prop::collection::vec(0u32..=7, 6),
        k in prop::collection::vec(-1e-3..1e-3, 36),
        x in prop::collection::vec(-1.0..1.0, 36),
        mode in prop_oneof![
            Just(AssemblyMode::Full),
            Just(AssemblyMode::PartialAssembly),
            Just(AssemblyMode::ElementAssembly)
        ],
    ) {
        // 1 x 1 x 2 cells have 12 nodes and 36 true DOFs
        let space = box_space([1, 1, 2]);
        let mut operator = mechanics_operator(space, mode);
        let group = BcGroup {
            attributes,
            components: codes.iter().map(|&c| component_mask(c).unwrap()).collect(),
        };
        operator.update_essential_dofs(&group).unwrap();
        operator.set_dt(0.1);

        let k = DVector::from_vec(k);
        let x = DVector::from_vec(x);
        let mut y = DVector::zeros(36);
        let essential = operator.essential_true_dofs().to_vec();
        operator.update_bcs_action(&k, &x, &mut y).unwrap();

        for dof in essential {
            prop_assert_eq!(y[dof], 0.0);
        }
        prop_assert!(y.iter().all(|v| v.is_finite()));
    }
}
