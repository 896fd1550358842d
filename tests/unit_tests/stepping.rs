use crysfem::driver::stepping::{TimeMode, TimeOptions, TimeStepController, MAX_DT_RETRIES};
use crysfem::error::SimulationError;
use matrixcompare::assert_scalar_eq;

const NEWTON_MAX: usize = 25;

fn auto_options() -> TimeOptions {
    TimeOptions {
        mode: TimeMode::Auto,
        dt: 0.1,
        dt_min: 1e-4,
        dt_scale: 0.25,
        t_final: 1.0,
        ..TimeOptions::default()
    }
}

fn divergence(step: usize, dt: f64) -> SimulationError {
    SimulationError::NewtonDivergence {
        step,
        dt,
        reason: "test".to_string(),
    }
}

#[test]
fn invalid_time_options_are_rejected() {
    let no_custom = TimeOptions {
        mode: TimeMode::Custom,
        ..TimeOptions::default()
    };
    assert!(matches!(no_custom.validate(), Err(SimulationError::Configuration(_))));

    let bad_scale = TimeOptions {
        dt_scale: 1.5,
        ..auto_options()
    };
    assert!(matches!(bad_scale.validate(), Err(SimulationError::Configuration(_))));

    let negative_dt = TimeOptions {
        dt: -1.0,
        ..TimeOptions::default()
    };
    assert!(matches!(
        TimeStepController::new(&negative_dt, NEWTON_MAX),
        Err(SimulationError::Configuration(_))
    ));
}

#[test]
fn fixed_steps_end_exactly_at_final_time() {
    let options = TimeOptions {
        mode: TimeMode::Fixed,
        dt: 0.3,
        t_final: 1.0,
        ..TimeOptions::default()
    };
    let mut controller = TimeStepController::new(&options, NEWTON_MAX).unwrap();
    let mut dts = Vec::new();
    while !controller.is_finished() {
        let dt = controller.begin_step();
        let report = controller.solve_step(|_| Ok(3)).unwrap();
        assert_eq!(report.dt, dt);
        assert_eq!(report.next_dt, dt);
        dts.push(dt);
    }
    assert_eq!(dts.len(), 4);
    assert_scalar_eq!(dts[3], 0.1, comp = abs, tol = 1e-12);
    assert_scalar_eq!(controller.state().time, 1.0, comp = abs, tol = 1e-12);
    assert!(controller.state().last_step);
}

#[test]
fn custom_steps_follow_the_list() {
    let options = TimeOptions {
        mode: TimeMode::Custom,
        custom_dt: vec![0.5, 0.25, 0.125],
        ..TimeOptions::default()
    };
    let mut controller = TimeStepController::new(&options, NEWTON_MAX).unwrap();
    assert_eq!(controller.t_final(), 0.875);
    let mut dts = Vec::new();
    while !controller.is_finished() {
        dts.push(controller.begin_step());
        controller.solve_step(|_| Ok(1)).unwrap();
    }
    assert_eq!(dts, vec![0.5, 0.25, 0.125]);
    assert_eq!(controller.state().step, 3);
}

#[test]
fn fixed_mode_does_not_retry() {
    let options = TimeOptions {
        mode: TimeMode::Fixed,
        dt: 0.5,
        ..TimeOptions::default()
    };
    let mut controller = TimeStepController::new(&options, NEWTON_MAX).unwrap();
    controller.begin_step();
    let mut attempts = 0;
    let result = controller.solve_step(|dt| {
        attempts += 1;
        Err(divergence(1, dt))
    });
    assert!(matches!(result, Err(SimulationError::NewtonDivergence { .. })));
    assert_eq!(attempts, 1);
}

#[test]
fn auto_mode_retries_with_reduced_time_step() {
    let mut controller = TimeStepController::new(&auto_options(), NEWTON_MAX).unwrap();
    controller.begin_step();
    let mut seen = Vec::new();
    let report = controller
        .solve_step(|dt| {
            seen.push(dt);
            if seen.len() == 1 {
                Err(SimulationError::CollectiveMaterialFailure)
            } else {
                Ok(5)
            }
        })
        .unwrap();

    assert_eq!(seen.len(), 2);
    assert_scalar_eq!(seen[1], 0.025, comp = float);
    assert_eq!(report.retries, 1);
    assert_scalar_eq!(report.dt, 0.025, comp = float);
    // The time is corrected to the reduced step
    assert_scalar_eq!(report.time, 0.025, comp = abs, tol = 1e-15);
    // next dt = dt * (newton_max * scale) / iterations
    let expected_next = 0.025 * (NEWTON_MAX as f64 * 0.25) / 5.0;
    assert_scalar_eq!(report.next_dt, expected_next, comp = float);
    assert_eq!(controller.state().dt, report.next_dt);
}

#[test]
fn auto_mode_aborts_after_maximum_retries() {
    let mut controller = TimeStepController::new(&auto_options(), NEWTON_MAX).unwrap();
    controller.begin_step();
    let mut attempts = 0;
    let result = controller.solve_step(|dt| {
        attempts += 1;
        Err(divergence(1, dt))
    });
    assert!(matches!(result, Err(SimulationError::NewtonDivergence { .. })));
    assert_eq!(attempts, MAX_DT_RETRIES + 1);
}

#[test]
fn auto_mode_never_goes_below_minimum_time_step() {
    let options = TimeOptions {
        dt_min: 0.05,
        ..auto_options()
    };
    let mut controller = TimeStepController::new(&options, NEWTON_MAX).unwrap();
    controller.begin_step();
    let mut seen = Vec::new();
    let _ = controller.solve_step(|dt| {
        seen.push(dt);
        Err(SimulationError::LinearSolverFailure("test".to_string()))
    });
    assert_eq!(seen, vec![0.1, 0.05, 0.05]);

    // Many iterations shrink the next step, but not below dt_min
    let mut controller = TimeStepController::new(&options, NEWTON_MAX).unwrap();
    controller.begin_step();
    let report = controller.solve_step(|_| Ok(NEWTON_MAX)).unwrap();
    assert_scalar_eq!(report.next_dt, 0.05, comp = float);
}

#[test]
fn configuration_errors_are_not_retried() {
    let mut controller = TimeStepController::new(&auto_options(), NEWTON_MAX).unwrap();
    controller.begin_step();
    let mut attempts = 0;
    let result = controller.solve_step(|_| {
        attempts += 1;
        Err(SimulationError::configuration("unknown field"))
    });
    assert!(matches!(result, Err(SimulationError::Configuration(_))));
    assert_eq!(attempts, 1);
}

#[test]
fn auto_mode_grows_time_step_when_newton_converges_quickly() {
    let mut controller = TimeStepController::new(&auto_options(), NEWTON_MAX).unwrap();
    controller.begin_step();
    let report = controller.solve_step(|_| Ok(2)).unwrap();
    assert!(report.next_dt > report.dt);
    assert_eq!(controller.state().step, 1);
    assert!(!controller.is_finished());
}
