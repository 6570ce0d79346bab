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

//! Multiple shooting formulation of the guidance problem.
//!
//! Every phase owns [ARC_STATE_LEN] unknowns, which are its initial state and costate with the
//! duration stored in the accumulated slot, and contributes as many residuals. The first block of
//! residuals holds the initial conditions, the terminal conditions, a duration or switching
//! condition and the costate normalization. Every other block holds the continuity of the state
//! and costates across its start boundary and its own duration or switching condition.

use super::analytic::propagate_analytic;
use super::{
    OptimizerError, OptimizerOpts, Phase, Problem, Propagation, ShootingSnafu, TERMINAL_LEN,
};
use crate::dynamics::{ArcState, CostateDynamics, ARC_STATE_LEN};
use crate::linalg::{DMatrix, DVector};
use crate::propagators::{Integrator, IntegratorOpts, MaxStepsSnafu, PropagationError};
use crate::utils::{CancelToken, LogSink};
use levenberg_marquardt::LeastSquaresProblem;
use nalgebra::{storage::Owned, Dyn};
use rayon::prelude::*;
use snafu::{ensure, ResultExt};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Residual assigned to every component when a shooting pass fails, so that the least squares
/// solver rejects the step.
const FAILED_RESIDUAL: f64 = 1e6;

/// Growth of the residual norm over the best one after which Newton steps are abandoned.
const DIVERGENCE_RATIO: f64 = 1e4;

/// Per thread scratch of a shooting pass.
pub(crate) struct Scratch {
    integrator: Integrator,
    y0: DVector<f64>,
    yf: DVector<f64>,
}

impl Scratch {
    pub(crate) fn new(opts: IntegratorOpts, log: &LogSink) -> Self {
        Self {
            integrator: Integrator::new(ARC_STATE_LEN, opts).with_log(log.clone()),
            y0: DVector::zeros(ARC_STATE_LEN),
            yf: DVector::zeros(ARC_STATE_LEN),
        }
    }
}

/// Equations of motion of `phase` started from `init`. Unguided phases freeze the primer
/// direction of their initial state.
pub fn arc_dynamics(phase: &Phase, init: &ArcState) -> CostateDynamics {
    if phase.is_coast() {
        CostateDynamics::coast()
    } else if phase.unguided {
        CostateDynamics::unguided(phase.thrust, phase.mdot, init.thrust_direction(None))
    } else {
        CostateDynamics::burn(phase.thrust, phase.mdot)
    }
}

/// Initial vector of `phase_next` of duration `bt`, continuing from the final state `prev_end` of
/// the phase before it.
pub fn next_initial(phase_next: &Phase, prev_end: &ArcState, bt: f64) -> ArcState {
    let mut init = *prev_end;
    if let Some(jettison) = phase_next.jettison {
        init.m -= jettison;
    }
    init.dv = bt;
    init
}

/// Propagates a phase from its initial vector, whose accumulated slot holds the duration. The
/// returned state accumulates the ΔV gained over the phase.
pub(crate) fn propagate_phase(
    phase: &Phase,
    init: &ArcState,
    scratch: &mut Scratch,
    cancel: &CancelToken,
) -> Result<ArcState, PropagationError> {
    let bt = init.dv;
    let mut start = *init;
    start.dv = 0.0;
    let dynamics = arc_dynamics(phase, init);

    match phase.propagation {
        Propagation::Analytic { segments } => {
            propagate_analytic(&start, bt, segments, &dynamics, cancel)
        }
        Propagation::Numeric => {
            start.copy_to(scratch.y0.as_mut_slice());
            let summary = scratch.integrator.integrate(
                &dynamics,
                0.0,
                &scratch.y0,
                bt,
                &mut scratch.yf,
                cancel,
            )?;
            ensure!(
                summary.completed,
                MaxStepsSnafu {
                    max_steps: scratch.integrator.opts.max_steps,
                    t: summary.t
                }
            );
            Ok(ArcState::from_slice(scratch.yf.as_slice()))
        }
    }
}

/// Initial and final vectors of every phase, where one phase may be substituted.
#[derive(Copy, Clone)]
struct ArcView<'b> {
    init: &'b [ArcState],
    term: &'b [ArcState],
    overlay: Option<(usize, &'b ArcState, &'b ArcState)>,
}

impl<'b> ArcView<'b> {
    fn init(&self, p: usize) -> &'b ArcState {
        match self.overlay {
            Some((q, init, _)) if q == p => init,
            _ => &self.init[p],
        }
    }

    fn term(&self, p: usize) -> &'b ArcState {
        match self.overlay {
            Some((q, _, term)) if q == p => term,
            _ => &self.term[p],
        }
    }
}

/// The shooting formulation over a fixed list of normalized phases.
pub(crate) struct Shooting<'a> {
    pub problem: &'a Problem,
    pub phases: &'a [Phase],
    pub opts: &'a OptimizerOpts,
    pub cancel: &'a CancelToken,
    pub log: &'a LogSink,
}

impl<'a> Shooting<'a> {
    pub fn len(&self) -> usize {
        ARC_STATE_LEN * self.phases.len()
    }

    pub fn integrator_opts(&self) -> IntegratorOpts {
        IntegratorOpts::with_tolerance(self.opts.integrator_tol)
    }

    pub fn propagate(
        &self,
        p: usize,
        init: &ArcState,
        scratch: &mut Scratch,
    ) -> Result<ArcState, OptimizerError> {
        propagate_phase(&self.phases[p], init, scratch, self.cancel)
            .context(ShootingSnafu { phase: p })
    }

    /// Propagates every phase from its initial vector, in parallel.
    pub fn shoot_all(
        &self,
        init: &[ArcState],
        term: &mut [ArcState],
    ) -> Result<(), OptimizerError> {
        let opts = self.integrator_opts();
        term.par_iter_mut()
            .zip(init.par_iter())
            .enumerate()
            .try_for_each_init(
                || Scratch::new(opts, self.log),
                |scratch, (p, (term, init))| {
                    *term = self.propagate(p, init, scratch)?;
                    Ok(())
                },
            )
    }

    /// Full Hamiltonian of phase `p` at its start.
    fn hamiltonian(&self, p: usize, init: &ArcState) -> f64 {
        let phase = &self.phases[p];
        init.hamiltonian(phase.thrust, phase.mdot, None)
    }

    /// Duration or switching condition of phase `p`.
    fn switching(&self, view: &ArcView<'_>, p: usize) -> f64 {
        let phase = &self.phases[p];
        let init = view.init(p);
        if !phase.optimize_time {
            return init.dv - phase.bt;
        }
        let h = self.hamiltonian(p, init);
        if phase.last_free_burn {
            return h;
        }
        match (p + 1..self.phases.len()).find(|&q| self.phases[q].optimize_time) {
            Some(q) => h - self.hamiltonian(q, view.init(q)),
            None => h,
        }
    }

    fn assemble(&self, view: ArcView<'_>, z: &mut [f64]) {
        let n = self.phases.len();
        for p in 0..n {
            let zp = &mut z[ARC_STATE_LEN * p..ARC_STATE_LEN * (p + 1)];
            let init = view.init(p);
            if p == 0 {
                let fin = view.term(n - 1);
                let r = init.r - self.problem.r0;
                let v = init.v - self.problem.v0;
                zp[0..3].copy_from_slice(r.as_slice());
                zp[3..6].copy_from_slice(v.as_slice());
                zp[6] = init.m - self.problem.m0;
                zp[7..7 + TERMINAL_LEN].copy_from_slice(&self.problem.terminal.residuals(fin));
                zp[14] = fin.pv.norm() - 1.0;
            } else {
                let prev = view.term(p - 1);
                let jettison = self.phases[p].jettison.unwrap_or(0.0);
                let r = init.r - prev.r;
                let v = init.v - prev.v;
                let pv = init.pv - prev.pv;
                let pr = init.pr - prev.pr;
                zp[0..3].copy_from_slice(r.as_slice());
                zp[3..6].copy_from_slice(v.as_slice());
                zp[6] = init.m - (prev.m - jettison);
                zp[7..10].copy_from_slice(pv.as_slice());
                zp[10..13].copy_from_slice(pr.as_slice());
                zp[14] = init.pm - prev.pm;
            }
            zp[13] = self.switching(&view, p);
        }
    }

    /// Assembles the residual vector of the provided initial and final vectors.
    pub fn residuals(&self, init: &[ArcState], term: &[ArcState], z: &mut [f64]) {
        self.assemble(
            ArcView {
                init,
                term,
                overlay: None,
            },
            z,
        );
    }
}

/// Reads the initial vectors of every phase from the flat unknown vector.
pub(crate) fn unpack(x: &DVector<f64>, init: &mut [ArcState]) {
    for (p, y) in init.iter_mut().enumerate() {
        *y = ArcState::from_slice(&x.as_slice()[ARC_STATE_LEN * p..ARC_STATE_LEN * (p + 1)]);
    }
}

/// Writes the initial vectors of every phase into a flat unknown vector.
pub(crate) fn pack(init: &[ArcState]) -> DVector<f64> {
    let mut x = DVector::zeros(ARC_STATE_LEN * init.len());
    for (p, y) in init.iter().enumerate() {
        y.copy_to(&mut x.as_mut_slice()[ARC_STATE_LEN * p..ARC_STATE_LEN * (p + 1)]);
    }
    x
}

/// Unknowns, shooting buffers and residuals of one evaluation.
#[derive(Clone, Debug)]
pub(crate) struct Snapshot {
    pub norm: f64,
    pub x: DVector<f64>,
    pub init: Vec<ArcState>,
    pub term: Vec<ArcState>,
    pub z: DVector<f64>,
}

/// The least squares problem handed to the Levenberg Marquardt solver.
///
/// Setting the parameters shoots every phase and assembles the residuals. The Jacobian is
/// estimated with forward differences, one column per unknown in parallel, where perturbing an
/// unknown of a phase only propagates that phase again.
pub(crate) struct ShootingProblem<'a> {
    pub shooting: Shooting<'a>,
    pub x: DVector<f64>,
    pub init: Vec<ArcState>,
    pub term: Vec<ArcState>,
    pub z: DVector<f64>,
    pub norm: f64,
    /// Evaluation of the lowest residual norm seen
    pub best: Option<Snapshot>,
    pub evaluations: usize,
    pub cancelled: bool,
    pub iterations: AtomicUsize,
    scratch: Scratch,
}

impl<'a> ShootingProblem<'a> {
    pub fn new(shooting: Shooting<'a>, init: Vec<ArcState>, term: Vec<ArcState>) -> Self {
        let n = shooting.len();
        let scratch = Scratch::new(shooting.integrator_opts(), shooting.log);
        let mut me = Self {
            x: pack(&init),
            init,
            term,
            z: DVector::zeros(n),
            norm: f64::INFINITY,
            best: None,
            evaluations: 0,
            cancelled: false,
            iterations: AtomicUsize::new(0),
            scratch,
            shooting,
        };
        me.shooting.residuals(&me.init, &me.term, me.z.as_mut_slice());
        me.norm = me.z.norm();
        if me.norm.is_finite() {
            me.best = Some(me.snapshot());
        }
        me
    }

    pub fn iterations(&self) -> usize {
        self.iterations.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            norm: self.norm,
            x: self.x.clone(),
            init: self.init.clone(),
            term: self.term.clone(),
            z: self.z.clone(),
        }
    }

    /// Consumes this problem and returns the evaluation of the lowest residual norm seen, which
    /// is the last one if no evaluation was finite.
    pub fn into_best(self) -> Snapshot {
        match self.best {
            Some(best) if best.norm <= self.norm || !self.norm.is_finite() || self.cancelled => {
                best
            }
            _ => Snapshot {
                norm: self.norm,
                x: self.x,
                init: self.init,
                term: self.term,
                z: self.z,
            },
        }
    }

    /// Takes up to `max_steps` full Newton steps on the square shooting system, which converges in
    /// a few steps near a solution where the damped solver crawls along flat valleys. Steps may
    /// increase the residual norm, but the refinement stops once it exceeds the best norm by
    /// [DIVERGENCE_RATIO]. The best evaluation is restored before returning.
    pub fn newton(&mut self, max_steps: usize) {
        let tol = self.shooting.opts.termination_tol;
        for step in 0..max_steps {
            if self.norm < tol || self.cancelled {
                break;
            }
            let Some(jac) = self.jacobian() else {
                break;
            };
            let Some(dx) = jac.lu().solve(&-&self.z) else {
                log_to!(self.shooting.log, Debug, "singular jacobian at newton step #{step}");
                break;
            };
            let x = &self.x + dx;
            self.set_params(&x);
            let best = self.best.as_ref().map_or(f64::INFINITY, |best| best.norm);
            if !self.norm.is_finite() || self.norm > DIVERGENCE_RATIO * best {
                log_to!(
                    self.shooting.log,
                    Debug,
                    "newton step #{step} diverged (|z| = {:.3e})",
                    self.norm
                );
                break;
            }
        }

        if let Some(best) = self.best.take() {
            if best.norm < self.norm && !self.cancelled {
                self.x = best.x.clone();
                self.init = best.init.clone();
                self.term = best.term.clone();
                self.z = best.z.clone();
                self.norm = best.norm;
            }
            self.best = Some(best);
        }
    }

    fn shoot(&mut self) -> Result<(), OptimizerError> {
        unpack(&self.x, &mut self.init);
        if self.shooting.phases.len() == 1 {
            // Skip the thread pool for single phase problems
            self.term[0] = self.shooting.propagate(0, &self.init[0], &mut self.scratch)?;
            Ok(())
        } else {
            self.shooting.shoot_all(&self.init, &mut self.term)
        }
    }
}

impl<'a> LeastSquaresProblem<f64, Dyn, Dyn> for ShootingProblem<'a> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.x.copy_from(x);
        self.evaluations += 1;
        match self.shoot() {
            Ok(()) => {
                self.shooting
                    .residuals(&self.init, &self.term, self.z.as_mut_slice());
                self.norm = self.z.norm();
                if !self.norm.is_finite() {
                    log_to!(
                        self.shooting.log,
                        Warn,
                        "non finite residuals at evaluation #{}",
                        self.evaluations
                    );
                    self.z.fill(FAILED_RESIDUAL);
                    self.norm = self.z.norm();
                }
            }
            Err(OptimizerError::Shooting {
                source: PropagationError::Cancelled { .. },
                ..
            }) => {
                self.cancelled = true;
                return;
            }
            Err(e) => {
                log_to!(
                    self.shooting.log,
                    Debug,
                    "shooting failed at evaluation #{}: {e}",
                    self.evaluations
                );
                self.z.fill(FAILED_RESIDUAL);
                self.norm = self.z.norm();
                return;
            }
        }

        if self.best.as_ref().map_or(true, |best| self.norm < best.norm) {
            log_to!(
                self.shooting.log,
                Debug,
                "|z| = {:.6e} (evaluation #{})",
                self.norm,
                self.evaluations
            );
            self.best = Some(self.snapshot());
        }
    }

    fn params(&self) -> DVector<f64> {
        self.x.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        if self.cancelled || self.shooting.cancel.is_cancelled() {
            return None;
        }
        if self.norm < self.shooting.opts.termination_tol {
            // Stops the solver early
            return None;
        }
        Some(self.z.clone())
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let iteration = self.iterations.fetch_add(1, Ordering::Relaxed) + 1;
        if iteration > self.shooting.opts.max_iterations || self.shooting.cancel.is_cancelled() {
            return None;
        }

        let n = self.shooting.len();
        let diff_step = self.shooting.opts.diff_step;
        let opts = self.shooting.integrator_opts();
        let columns: Vec<Option<DVector<f64>>> = (0..n)
            .into_par_iter()
            .map_init(
                || (Scratch::new(opts, self.shooting.log), DVector::zeros(n)),
                |(scratch, zj), j| {
                    let p = j / ARC_STATE_LEN;
                    let k = j % ARC_STATE_LEN;
                    let step = diff_step * self.x[j].abs().max(1.0);

                    let mut init = self.init[p];
                    let mut flat = [0.0; ARC_STATE_LEN];
                    init.copy_to(&mut flat);
                    flat[k] += step;
                    init = ArcState::from_slice(&flat);

                    match self.shooting.propagate(p, &init, scratch) {
                        Ok(term) => {
                            self.shooting.assemble(
                                ArcView {
                                    init: &self.init,
                                    term: &self.term,
                                    overlay: Some((p, &init, &term)),
                                },
                                zj.as_mut_slice(),
                            );
                            Some((&*zj - &self.z) / step)
                        }
                        Err(OptimizerError::Shooting {
                            source: PropagationError::Cancelled { .. },
                            ..
                        }) => None,
                        Err(e) => {
                            log_to!(
                                self.shooting.log,
                                Debug,
                                "column {j} of the jacobian failed: {e}"
                            );
                            Some(DVector::zeros(n))
                        }
                    }
                },
            )
            .collect();

        let mut jac = DMatrix::zeros(n, n);
        for (j, column) in columns.into_iter().enumerate() {
            jac.set_column(j, &column?);
        }
        Some(jac)
    }
}
