/*
    PVG, primer vector guidance for staged launch vehicles
    Copyright (C) 2024 Nyx Space contributors

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use approx::assert_abs_diff_eq;
use pvg::cosmic::{EARTH_GM, EARTH_RADIUS};
use pvg::linalg::Vector3;
use pvg::pvg::{
    Ascent, Optimizer, OptimizerError, OptimizerOpts, OptimizerStatus, Phase, Problem, Solution,
    StageInfo, TargetOrbit, Terminal,
};
use pvg::time::{Duration, Epoch};
use pvg::utils::CancelToken;
use rstest::rstest;

const R0: f64 = EARTH_RADIUS + 185e3;

fn epoch() -> Epoch {
    Epoch::from_gregorian_utc_hms(2024, 3, 1, 12, 0, 0)
}

fn opts() -> OptimizerOpts {
    OptimizerOpts::builder().timeout_ms(120_000).build()
}

/// Vehicle of 50 t at R0 over the equator, heading east, to a circular equatorial orbit.
fn problem(v0: Vector3<f64>, target_radius: f64) -> Problem {
    let target = TargetOrbit::circular(target_radius, 0.0);
    Problem::new(
        epoch(),
        Vector3::new(R0, 0.0, 0.0),
        v0,
        50_000.0,
        Vector3::y(),
        EARTH_GM,
        EARTH_RADIUS,
        Terminal::from_target(&target, EARTH_GM),
    )
}

/// Horizontal at 7500 m/s, so about 300 m/s short of the circular speed at R0.
fn suborbital() -> Problem {
    problem(Vector3::new(0.0, 7_500.0, 0.0), R0)
}

fn vacuum_stage(bt: f64, max_bt: f64) -> Phase {
    Phase::free_burn(0, 50_000.0, 1e6, 300.0, bt, max_bt)
}

fn solve(problem: Problem, phases: Vec<Phase>) -> (Optimizer, Solution) {
    let _ = pretty_env_logger::try_init();
    let mut optimizer = Optimizer::new(problem, phases, opts()).unwrap();
    optimizer.bootstrap().unwrap();
    let status = optimizer.run().unwrap();
    assert_eq!(status, OptimizerStatus::Success, "{}", optimizer.report());
    let solution = optimizer.solution().unwrap();
    (optimizer, solution)
}

/// Largest variation of the Hamiltonian of arc `k` over its window.
fn hamiltonian_spread(solution: &Solution, k: usize) -> f64 {
    let arc = &solution.arcs()[k];
    let values: Vec<f64> = (0..=20)
        .map(|i| {
            let t = arc.tmin + arc.duration() * i as f64 / 20.0;
            solution.arc_state_nd(k, t).unwrap().hamiltonian(
                arc.phase.thrust,
                arc.phase.mdot,
                arc.frozen_u.as_ref(),
            )
        })
        .collect();
    let max = values.iter().copied().fold(f64::MIN, f64::max);
    let min = values.iter().copied().fold(f64::MAX, f64::min);
    max - min
}

#[test]
fn single_stage_to_circular_orbit() {
    let (optimizer, solution) = solve(suborbital(), vec![vacuum_stage(50.0, 100.0)]);
    assert!(
        optimizer.residual_norm() < 1e-9,
        "|z| = {:.3e}",
        optimizer.residual_norm()
    );
    assert!(!optimizer.report().overburn);
    assert!(!optimizer.report().timed_out);

    let dv = solution.dv_total();
    assert!((295.0..300.0).contains(&dv), "ΔV = {dv} m/s");
    let burn = solution.tgo(solution.epoch()).to_seconds();
    assert!((burn - 14.145).abs() < 0.05, "burn lasts {burn} s");

    // Velocity to go strictly decreases down to zero at cutoff
    let span = solution.final_epoch() - solution.epoch();
    let vgo: Vec<f64> = (0..=40)
        .map(|i| {
            solution
                .vgo(solution.epoch() + span * (i as f64 / 40.0))
                .unwrap()
        })
        .collect();
    assert_abs_diff_eq!(vgo[0], dv, epsilon = 1e-9);
    for pair in vgo.windows(2) {
        assert!(pair[1] < pair[0], "velocity to go increased: {pair:?}");
    }
    assert_abs_diff_eq!(vgo[40], 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(solution.tgo(solution.final_epoch()).to_seconds(), 0.0, epsilon = 1e-6);
}

#[test]
fn reaches_the_target_orbit() {
    let (_, solution) = solve(suborbital(), vec![vacuum_stage(50.0, 100.0)]);
    let elements = solution.terminal_elements().unwrap();
    assert_abs_diff_eq!(elements.sma, R0, epsilon = 1.0);
    assert!(elements.ecc < 1e-7, "{elements}");
    assert!(elements.inc_deg < 1e-6, "{elements}");
    for z in solution.terminal_residuals().unwrap() {
        assert_abs_diff_eq!(z, 0.0, epsilon = 1e-9);
    }

    // The commanded attitude stays close to the horizon, eastward
    let (pitch, heading) = solution.pitch_heading(solution.epoch()).unwrap();
    assert!(pitch.abs() < 10.0, "pitch = {pitch} deg");
    assert_abs_diff_eq!(heading, 90.0, epsilon = 1e-6);
    let u = solution.thrust_direction(solution.epoch()).unwrap();
    assert_abs_diff_eq!(u.norm(), 1.0, epsilon = 1e-12);
}

#[test]
fn hamiltonian_is_constant_along_burns() {
    let (_, solution) = solve(suborbital(), vec![vacuum_stage(50.0, 100.0)]);
    assert!(hamiltonian_spread(&solution, 0) < 1e-6);
    // Free final time
    let arc = &solution.arcs()[0];
    let h = solution
        .arc_state_nd(0, arc.tmax)
        .unwrap()
        .hamiltonian(arc.phase.thrust, arc.phase.mdot, None);
    assert_abs_diff_eq!(h, 0.0, epsilon = 1e-6);
}

#[test]
fn continuity_across_coast_and_jettison() {
    let jettison = 1_000.0;
    let phases = vec![
        Phase::fixed_burn(0, 50_000.0, 1e6, 300.0, 5.0),
        Phase::fixed_coast(0, 50_000.0, 20.0),
        Phase::free_burn(1, 49_000.0, 1e6, 300.0, 10.0, 100.0).with_jettison(jettison),
    ];
    let (optimizer, solution) = solve(suborbital(), phases);
    assert!(optimizer.residual_norm() < 1e-9);

    let init = optimizer.initial_vectors();
    let term = optimizer.final_vectors();
    for p in 1..3 {
        assert_abs_diff_eq!(init[p].r, term[p - 1].r, epsilon = 1e-8);
        assert_abs_diff_eq!(init[p].v, term[p - 1].v, epsilon = 1e-8);
        assert_abs_diff_eq!(init[p].pv, term[p - 1].pv, epsilon = 1e-8);
        assert_abs_diff_eq!(init[p].pr, term[p - 1].pr, epsilon = 1e-8);
        assert_abs_diff_eq!(init[p].pm, term[p - 1].pm, epsilon = 1e-8);
    }
    assert_abs_diff_eq!(init[1].m, term[0].m, epsilon = 1e-8);
    let dropped = (term[1].m - init[2].m) * optimizer.problem.scale.mass;
    assert_abs_diff_eq!(dropped, jettison, epsilon = 1e-3);

    // Fixed durations are kept
    let time = solution.scale().time();
    assert_abs_diff_eq!(solution.arcs()[0].duration() * time, 5.0, epsilon = 1e-6);
    assert_abs_diff_eq!(solution.arcs()[1].duration() * time, 20.0, epsilon = 1e-6);

    assert_eq!(solution.stage(epoch() + Duration::from_seconds(1.0)), Some(0));
    assert!(solution.is_coast(epoch() + Duration::from_seconds(10.0)));
    assert!(!solution.is_coast(epoch() + Duration::from_seconds(26.0)));
    assert_eq!(solution.terminal_stage(), Some(1));
    assert_abs_diff_eq!(
        solution.tgo_phase(epoch() + Duration::from_seconds(10.0)).to_seconds(),
        15.0,
        epsilon = 1e-6
    );

    // The coast neither thrusts nor gains any ΔV
    let coast = &solution.arcs()[1];
    let before = solution.arc_state_nd(1, coast.tmin).unwrap();
    let after = solution.arc_state_nd(1, coast.tmax).unwrap();
    assert_abs_diff_eq!(before.dv, after.dv, epsilon = 1e-12);
    assert_abs_diff_eq!(before.m, after.m, epsilon = 1e-12);
    assert!(hamiltonian_spread(&solution, 1) < 1e-8);
    assert!(hamiltonian_spread(&solution, 2) < 1e-6);
}

/// Climbing at 100 m/s towards an apoapsis about 10 km above R0.
fn climbing() -> Problem {
    problem(Vector3::new(100.0, 7_600.0, 0.0), R0 + 10e3)
}

fn upper_stage() -> Phase {
    Phase::free_burn(0, 50_000.0, 1e6, 300.0, 5.0, 100.0)
}

#[rstest]
#[case(-1.0)]
#[case(1.0)]
fn free_coast_is_optimal(#[case] offset: f64) {
    let phases = vec![
        Phase::free_coast(0, 50_000.0, 150.0, 0.0, 400.0),
        upper_stage(),
    ];
    let (optimizer, solution) = solve(climbing(), phases);
    assert!(!optimizer.report().multi_coast);
    let coast = solution.arcs()[0].duration() * solution.scale().time();
    assert!((150.0..160.0).contains(&coast), "coasts for {coast} s");
    assert!(hamiltonian_spread(&solution, 0) < 1e-8);

    let phases = vec![
        Phase::fixed_coast(0, 50_000.0, coast + offset),
        upper_stage(),
    ];
    let (_, fixed) = solve(climbing(), phases);
    assert!(
        fixed.dv_total() >= solution.dv_total() - 1e-6,
        "a {:.3} s coast needs {:.6} m/s but the {coast:.3} s one needs {:.6} m/s",
        coast + offset,
        fixed.dv_total(),
        solution.dv_total()
    );
}

/// The unconstrained coast lasts about 155.1 s, so each window below excludes it.
#[rstest]
#[case(160.0, 158.0, 400.0, 158.0, 205.993)]
#[case(140.0, 0.0, 150.0, 150.0, 209.360)]
fn coast_is_pinned_at_its_bounds(
    #[case] seed: f64,
    #[case] min_ct: f64,
    #[case] max_ct: f64,
    #[case] pinned: f64,
    #[case] dv: f64,
) {
    let phases = vec![
        Phase::free_coast(0, 50_000.0, seed, min_ct, max_ct),
        upper_stage(),
    ];
    let (optimizer, solution) = solve(climbing(), phases);
    assert!(optimizer.report().coast_pinned);
    assert!(!optimizer.phases()[0].optimize_time);
    assert!(optimizer.phases()[1].last_free_burn);

    let coast = solution.arcs()[0].duration() * solution.scale().time();
    assert_abs_diff_eq!(coast, pinned, epsilon = 1e-6);
    assert_abs_diff_eq!(solution.dv_total(), dv, epsilon = 0.05);
    for z in solution.terminal_residuals().unwrap() {
        assert_abs_diff_eq!(z, 0.0, epsilon = 1e-9);
    }
}

#[test]
fn coast_within_its_bounds_is_left_free() {
    let phases = vec![
        Phase::free_coast(0, 50_000.0, 150.0, 100.0, 200.0),
        upper_stage(),
    ];
    let (optimizer, solution) = solve(climbing(), phases);
    assert!(!optimizer.report().coast_pinned);
    assert!(optimizer.phases()[0].optimize_time);
    let coast = solution.arcs()[0].duration() * solution.scale().time();
    assert_abs_diff_eq!(coast, 155.107, epsilon = 0.05);
}

#[test]
fn overburn_appends_the_reserve_stage() {
    let _ = pretty_env_logger::try_init();
    let mut optimizer = Optimizer::new(suborbital(), vec![vacuum_stage(8.0, 8.0)], opts())
        .unwrap()
        .with_reserve(vec![Phase::free_burn(1, 20_000.0, 3e5, 320.0, 50.0, 300.0)]);
    optimizer.bootstrap().unwrap();
    assert_eq!(optimizer.run().unwrap(), OptimizerStatus::Success);
    assert!(optimizer.report().overburn);

    let phases = optimizer.phases();
    assert_eq!(phases.len(), 2);
    assert!(!phases[0].optimize_time);
    assert!(phases[1].last_free_burn);
    assert!(phases[1].jettison.is_some());

    let solution = optimizer.solution().unwrap();
    let time = solution.scale().time();
    assert_abs_diff_eq!(solution.arcs()[0].duration() * time, 8.0, epsilon = 1e-9);
    assert_eq!(solution.terminal_stage(), Some(1));
    let elements = solution.terminal_elements().unwrap();
    assert_abs_diff_eq!(elements.sma, R0, epsilon = 1.0);
}

#[test]
fn warm_start_from_prior_solution() {
    let (_, prior) = solve(suborbital(), vec![vacuum_stage(50.0, 100.0)]);
    let later = epoch() + Duration::from_seconds(4.0);
    let mass = prior.mass(later).unwrap();
    let problem = Problem::new(
        later,
        prior.position(later).unwrap(),
        prior.velocity(later).unwrap(),
        mass,
        Vector3::y(),
        EARTH_GM,
        EARTH_RADIUS,
        Terminal::from_target(&TargetOrbit::circular(R0, 0.0), EARTH_GM),
    );
    let mut optimizer = Optimizer::new(
        problem,
        vec![Phase::free_burn(0, mass, 1e6, 300.0, 10.0, 100.0)],
        opts(),
    )
    .unwrap();
    optimizer.bootstrap_from(&prior).unwrap();
    assert!(optimizer.report().warm_start);
    assert!(
        optimizer.residual_norm() < 1e-4,
        "|z| = {:.3e}",
        optimizer.residual_norm()
    );
    assert_eq!(optimizer.run().unwrap(), OptimizerStatus::Success);
    let solution = optimizer.solution().unwrap();

    // Optimal trajectories stay optimal from any of their states
    let cutoff = (solution.final_epoch() - prior.final_epoch()).to_seconds();
    assert_abs_diff_eq!(cutoff, 0.0, epsilon = 1e-2);
    assert_abs_diff_eq!(solution.dv_total(), prior.vgo(later).unwrap(), epsilon = 1e-2);
}

#[test]
fn lifecycle_is_enforced() {
    let mut optimizer = Optimizer::new(suborbital(), vec![vacuum_stage(50.0, 100.0)], opts()).unwrap();
    assert_eq!(optimizer.status(), OptimizerStatus::Created);
    assert!(matches!(
        optimizer.run(),
        Err(OptimizerError::InvalidStatus {
            expected: OptimizerStatus::Bootstrapped,
            found: OptimizerStatus::Created
        })
    ));
    assert!(matches!(
        optimizer.solution(),
        Err(OptimizerError::InvalidStatus { .. })
    ));

    optimizer.bootstrap().unwrap();
    assert_eq!(optimizer.status(), OptimizerStatus::Bootstrapped);
    assert!(matches!(
        optimizer.bootstrap(),
        Err(OptimizerError::InvalidStatus { .. })
    ));

    assert!(matches!(
        Optimizer::new(suborbital(), Vec::new(), opts()),
        Err(OptimizerError::NoPhases)
    ));
}

#[test]
fn cancelled_solve() {
    let cancel = CancelToken::new();
    let mut optimizer = Optimizer::new(suborbital(), vec![vacuum_stage(50.0, 100.0)], opts())
        .unwrap()
        .with_cancel(cancel.clone());
    optimizer.bootstrap().unwrap();
    cancel.cancel();
    assert!(matches!(optimizer.run(), Err(OptimizerError::Cancelled)));
}

#[test]
fn timed_out_solve_keeps_the_best_iterate() {
    let opts = OptimizerOpts::builder().timeout_ms(0).build();
    let mut optimizer =
        Optimizer::new(suborbital(), vec![vacuum_stage(50.0, 100.0)], opts).unwrap();
    optimizer.bootstrap().unwrap();
    let bootstrapped = optimizer.residual_norm();
    assert_eq!(optimizer.run().unwrap(), OptimizerStatus::Failed);
    assert!(optimizer.report().timed_out);
    assert!(optimizer.residual_norm() <= bootstrapped);
    // A failed solve still yields its best effort trajectory
    let solution = optimizer.solution().unwrap();
    assert_eq!(solution.status, OptimizerStatus::Failed);
}

#[test]
fn several_free_coasts_are_flagged() {
    let phases = vec![
        Phase::free_coast(0, 50_000.0, 10.0, 0.0, 100.0),
        Phase::fixed_burn(0, 50_000.0, 1e6, 300.0, 2.0),
        Phase::free_coast(0, 50_000.0, 10.0, 0.0, 100.0),
        upper_stage(),
    ];
    let optimizer = Optimizer::new(climbing(), phases, opts()).unwrap();
    assert!(optimizer.report().multi_coast);
}

#[test]
fn unguided_lead_in_and_numeric_burn() {
    let phases = vec![
        Phase::fixed_burn(0, 50_000.0, 1e6, 300.0, 4.0).unguided(),
        vacuum_stage(10.0, 100.0).numeric(),
    ];
    let (optimizer, solution) = solve(suborbital(), phases);
    assert!(optimizer.residual_norm() < 1e-9);
    let elements = solution.terminal_elements().unwrap();
    assert_abs_diff_eq!(elements.sma, R0, epsilon = 1.0);
    assert!(elements.ecc < 1e-7, "{elements}");

    // The lead in holds the primer direction of its start, then guidance takes over
    let frozen = solution.arcs()[0].frozen_u.unwrap();
    for t in [0.5, 2.0, 3.5] {
        let u = solution
            .thrust_direction(epoch() + Duration::from_seconds(t))
            .unwrap();
        assert_abs_diff_eq!(u, frozen, epsilon = 1e-12);
    }
    assert!(solution.arcs()[1].frozen_u.is_none());
    assert!(hamiltonian_spread(&solution, 1) < 1e-6);

    // Holding the attitude costs a little more than the fully guided burn
    let dv = solution.dv_total();
    assert!((297.43..297.6).contains(&dv), "ΔV = {dv} m/s");
    let burn = solution.tgo(solution.epoch()).to_seconds();
    assert_abs_diff_eq!(burn, 14.145, epsilon = 0.05);
}

#[test]
fn ascent_through_a_stage_without_shutdown() {
    let _ = pretty_env_logger::try_init();
    let stages = vec![
        StageInfo::builder()
            .stage(0)
            .m0(50_000.0)
            .thrust(1e6)
            .isp(300.0)
            .max_bt(5.0)
            .allow_shutdown(false)
            .build(),
        StageInfo::builder()
            .stage(1)
            .m0(20_000.0)
            .thrust(3e5)
            .isp(320.0)
            .max_bt(150.0)
            .build(),
        StageInfo::builder()
            .stage(2)
            .m0(5_000.0)
            .thrust(5e4)
            .isp(340.0)
            .max_bt(250.0)
            .build(),
    ];
    let burnout = stages[0].burnout_mass();
    let ascent = Ascent::new(stages, TargetOrbit::circular(R0, 0.0));
    let mut optimizer = ascent
        .optimizer(
            epoch(),
            Vector3::new(R0, 0.0, 0.0),
            Vector3::new(0.0, 7_500.0, 0.0),
            EARTH_GM,
            EARTH_RADIUS,
            opts(),
        )
        .unwrap();

    // The first stage covers about a third of the need and may not stop early
    let phases = optimizer.phases();
    assert_eq!(phases.len(), 2);
    assert!(!phases[0].optimize_time);
    assert!(!phases[0].allow_shutdown);
    assert!(phases[1].last_free_burn);

    optimizer.bootstrap().unwrap();
    assert_eq!(optimizer.run().unwrap(), OptimizerStatus::Success);
    assert!(!optimizer.report().overburn);
    let solution = optimizer.solution().unwrap();

    let time = solution.scale().time();
    assert_abs_diff_eq!(solution.arcs()[0].duration() * time, 5.0, epsilon = 1e-6);
    assert_abs_diff_eq!(solution.arcs()[1].duration() * time, 12.650, epsilon = 0.05);
    let init = optimizer.initial_vectors();
    let term = optimizer.final_vectors();
    let dropped = (term[0].m - init[1].m) * optimizer.problem.scale.mass;
    assert_abs_diff_eq!(dropped, burnout - 20_000.0, epsilon = 1e-3);
    assert_eq!(solution.terminal_stage(), Some(1));

    let elements = solution.terminal_elements().unwrap();
    assert_abs_diff_eq!(elements.sma, R0, epsilon = 1.0);
    assert!(elements.ecc < 1e-7, "{elements}");
    assert!(elements.inc_deg < 1e-6, "{elements}");
    assert_abs_diff_eq!(solution.dv_total(), 297.464, epsilon = 0.05);
}
