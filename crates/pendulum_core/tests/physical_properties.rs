use pendulum_core::analysis::{analyze, cross_check_energy, energy_drift, second_bob_divergence};
use pendulum_core::integrator::{sample_count, IntegrationFailure};
use pendulum_core::modes::NormalModes;
use pendulum_core::{
    simulate, MechanicsModel, PhysicalParameters, SimulationConfig, Simulator, SolverSettings,
    State,
};
use std::f64::consts::FRAC_PI_2;
use std::sync::OnceLock;

fn model() -> &'static MechanicsModel {
    static MODEL: OnceLock<MechanicsModel> = OnceLock::new();
    MODEL.get_or_init(|| MechanicsModel::derive().expect("derivation should succeed"))
}

fn reference_state() -> State {
    State::new(FRAC_PI_2, FRAC_PI_2, 0.0, 0.0)
}

fn drift_at_tolerance(tol: f64) -> f64 {
    let params = PhysicalParameters::default();
    let sim = Simulator::new(model(), params)
        .and_then(|sim| sim.with_settings(SolverSettings::default().with_tolerance(tol)))
        .expect("valid settings");
    let run = sim.run(reference_state(), 20.0, 0.05).expect("valid input");
    assert!(run.is_complete(), "unexpected warning: {:?}", run.warning);
    let frames = analyze(&run.trajectory, &params);
    energy_drift(&frames, &params).expect("non-empty")
}

#[test]
fn hanging_rest_is_a_fixed_point() {
    let sim = Simulator::new(model(), PhysicalParameters::default()).expect("valid");
    for (t_max, dt) in [(5.0, 0.1), (1.0, 0.3), (0.05, 0.01)] {
        let run = sim.run(State::default(), t_max, dt).expect("valid input");
        assert!(run.is_complete());
        for state in run.trajectory.states() {
            for value in state.to_array() {
                assert!(value.abs() < 1e-12);
            }
        }
    }
}

#[test]
fn reference_run_conserves_energy() {
    let tight = drift_at_tolerance(1e-9);
    assert!(tight < 1e-7, "drift {tight} at tolerance 1e-9");

    let loose = drift_at_tolerance(1e-3);
    assert!(
        loose > tight,
        "relaxing tolerances should increase drift ({loose} vs {tight})"
    );
}

#[test]
fn kinematic_and_compiled_energy_agree() {
    let config = SimulationConfig::default();
    let run = simulate(model(), &config).expect("valid config");
    let frames = analyze(&run.trajectory, &config.parameters);
    let check = cross_check_energy(&frames, &model().energy, &config.parameters);
    assert!(
        check.max_abs_difference < 1e-10,
        "energy paths disagree by {}",
        check.max_abs_difference
    );
}

#[test]
fn nearby_initial_states_diverge() {
    let params = PhysicalParameters::default();
    let sim = Simulator::new(model(), params).expect("valid");
    let base = reference_state();
    let perturbed = State {
        theta1: base.theta1 + 1e-4,
        ..base
    };
    let (a, b) = sim.run_pair(base, perturbed, 20.0, 0.05).expect("valid input");
    assert!(a.is_complete() && b.is_complete());

    // order of the linkage length, i.e. the bobs end up in unrelated places
    let threshold = 0.25 * params.total_length();
    let summary = second_bob_divergence(
        &analyze(&a.trajectory, &params),
        &analyze(&b.trajectory, &params),
        threshold,
    )
    .expect("same grid");
    assert!(summary.distances[0] < 1e-3);
    assert!(
        summary.max_distance > threshold,
        "max divergence only {}",
        summary.max_distance
    );
    assert!(summary.threshold_time.is_some());
}

#[test]
fn small_oscillations_follow_normal_modes() {
    let params = PhysicalParameters::default();
    let modes = NormalModes::linearize(model(), &params).expect("stable equilibrium");
    let sim = Simulator::new(model(), params).expect("valid");
    let initial = State::new(0.01, 0.01, 0.0, 0.0);
    let run = sim.run(initial, 3.0, 0.01).expect("valid input");
    assert!(run.is_complete());

    for (t, state) in run.trajectory.iter() {
        let linear = modes.small_angle_response(&initial, t);
        assert!(
            (state.theta1 - linear.theta1).abs() < 2e-5,
            "theta1 off at t = {t}: {} vs {}",
            state.theta1,
            linear.theta1
        );
        assert!((state.theta2 - linear.theta2).abs() < 2e-5);
        assert!((state.omega1 - linear.omega1).abs() < 1e-4);
        assert!((state.omega2 - linear.omega2).abs() < 1e-4);
    }
}

#[test]
fn complete_runs_fill_the_grid() {
    let config = SimulationConfig::default();
    let run = simulate(model(), &config).expect("valid config");
    assert!(run.is_complete());
    assert_eq!(run.trajectory.len(), 400);
    assert_eq!(run.trajectory.len(), sample_count(config.t_max, config.dt));
    assert!(!run.trajectory.is_truncated());
    let (last, _) = run.trajectory.last().expect("non-empty");
    assert!(last < config.t_max);
}

#[test]
fn solver_failure_truncates_with_warning() {
    let config = SimulationConfig {
        t_max: 5.0,
        dt: 0.5,
        solver: SolverSettings {
            min_step: 0.2,
            initial_step: Some(0.01),
            ..SolverSettings::default()
        },
        ..SimulationConfig::default()
    };
    let run = simulate(model(), &config).expect("valid config");
    let warning = run.warning.expect("solver should give up");
    assert!(matches!(
        warning.failure,
        IntegrationFailure::StepSizeUnderflow { .. }
    ));
    assert_eq!(warning.samples_requested, 10);
    assert_eq!(warning.samples_completed, run.trajectory.len());
    assert!(run.trajectory.len() < run.trajectory.expected_len());
    assert!(run.trajectory.is_truncated());
    assert_eq!(run.trajectory.states()[0], config.initial_state);
}
