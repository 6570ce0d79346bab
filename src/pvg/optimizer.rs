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

use super::shooting::{next_initial, Scratch, Shooting, ShootingProblem};
use super::{mark_last_free_burn, Phase, Problem, Solution};
use crate::dynamics::{ArcState, ARC_STATE_LEN};
use crate::linalg::DVector;
use crate::propagators::{IntegratorOpts, PropagationError};
use crate::time::Duration;
use crate::utils::{CancelToken, LogSink};
use levenberg_marquardt::LevenbergMarquardt;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::fmt;
use std::time::Instant;
use typed_builder::TypedBuilder;

/// Full Newton steps attempted before and after the damped least squares pass.
const NEWTON_STEPS: usize = 8;

/// Options of the guidance optimizer. Times and lengths are nondimensional unless stated.
#[derive(Clone, Copy, Debug, PartialEq, TypedBuilder, Serialize, Deserialize)]
#[builder(doc)]
#[serde(default)]
pub struct OptimizerOpts {
    /// Maximum number of Jacobian evaluations of the least squares solver
    #[builder(default = 200)]
    pub max_iterations: usize,
    /// Relative forward difference step of the Jacobian
    #[builder(default = 1e-7)]
    pub diff_step: f64,
    /// Residual norm below which the least squares solver stops
    #[builder(default = 1e-9)]
    pub termination_tol: f64,
    /// Residual norm below which a solve is a success
    #[builder(default = 1e-5)]
    pub acceptance_tol: f64,
    /// Wall clock budget of a solve, in milliseconds
    #[builder(default = 5_000)]
    pub timeout_ms: u64,
    /// Tolerance of the numeric propagation of coasts
    #[builder(default = 1e-11)]
    pub integrator_tol: f64,
    /// Longest segment of the closed form propagation of burns
    #[builder(default = 0.01)]
    pub segment_length: f64,
    /// Searches the initial pitch of the primer vector when bootstrapping
    #[builder(default = true)]
    pub pitch_search: bool,
}

impl Default for OptimizerOpts {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Lifecycle of an [Optimizer].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerStatus {
    Created,
    Bootstrapped,
    Success,
    Failed,
}

impl fmt::Display for OptimizerStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum OptimizerError {
    #[snafu(display("optimizer is {found} but must be {expected}"))]
    InvalidStatus {
        expected: OptimizerStatus,
        found: OptimizerStatus,
    },
    #[snafu(display("no phases to optimize"))]
    NoPhases,
    #[snafu(display("shooting phase {phase} failed: {source}"))]
    Shooting {
        phase: usize,
        source: PropagationError,
    },
    #[snafu(display("solve cancelled"))]
    Cancelled,
    #[snafu(display("bootstrap failed: {reason}"))]
    Bootstrap { reason: String },
    #[snafu(display("phase {phase} has a negative duration ({bt})"))]
    NegativeDuration { phase: usize, bt: f64 },
}

/// Summary of the last solve.
#[derive(Clone, Debug, PartialEq)]
pub struct SolveReport {
    /// Jacobian evaluations, over every least squares pass
    pub iterations: usize,
    /// Shooting passes, over every least squares pass
    pub evaluations: usize,
    pub norm: f64,
    /// Why the last least squares pass stopped
    pub termination: String,
    pub elapsed: Duration,
    /// A reserve stage was appended after an overburn
    pub overburn: bool,
    /// Bootstrapped from a prior solution
    pub warm_start: bool,
    /// A free coast left its bounds and was pinned at the violated one
    pub coast_pinned: bool,
    /// The deadline passed before the solver stopped
    pub timed_out: bool,
    /// More than one coast has a free duration
    pub multi_coast: bool,
}

impl Default for SolveReport {
    fn default() -> Self {
        Self {
            iterations: 0,
            evaluations: 0,
            norm: f64::INFINITY,
            termination: String::new(),
            elapsed: Duration::ZERO,
            overburn: false,
            warm_start: false,
            coast_pinned: false,
            timed_out: false,
            multi_coast: false,
        }
    }
}

impl fmt::Display for SolveReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "|z| = {:.3e} after {} iterations ({} evaluations) in {}: {}",
            self.norm, self.iterations, self.evaluations, self.elapsed, self.termination
        )
    }
}

/// Multiple shooting optimizer of a [Problem] over a list of phases.
///
/// An optimizer is created, bootstrapped (analytically or from a prior solution), and run once.
/// Running drives a Newton then Levenberg Marquardt solve of the shooting residuals under a wall
/// clock budget. If the last free burn needs more than its stage can provide, the next reserve stage
/// is appended and the solve is run again once. Likewise, free coasts which end up outside of their
/// bounds are pinned at the violated bound before solving again once.
pub struct Optimizer {
    pub problem: Problem,
    pub opts: OptimizerOpts,
    pub(crate) phases: Vec<Phase>,
    pub(crate) reserve: Vec<Phase>,
    pub(crate) init: Vec<ArcState>,
    pub(crate) term: Vec<ArcState>,
    pub(crate) z: DVector<f64>,
    pub(crate) status: OptimizerStatus,
    pub(crate) report: SolveReport,
    pub(crate) cancel: CancelToken,
    pub(crate) log: LogSink,
}

impl Optimizer {
    /// Creates an optimizer of `problem` over `phases`, given in physical units.
    pub fn new(
        problem: Problem,
        mut phases: Vec<Phase>,
        opts: OptimizerOpts,
    ) -> Result<Self, OptimizerError> {
        ensure!(!phases.is_empty(), NoPhasesSnafu);
        for phase in &mut phases {
            phase.rescale(&problem.scale, opts.segment_length);
        }
        mark_last_free_burn(&mut phases);

        let free_coasts = phases
            .iter()
            .filter(|p| p.is_coast() && p.optimize_time)
            .count();
        let report = SolveReport {
            multi_coast: free_coasts > 1,
            ..Default::default()
        };

        let n = phases.len();
        Ok(Self {
            problem,
            opts,
            phases,
            reserve: Vec::new(),
            init: vec![ArcState::default(); n],
            term: vec![ArcState::default(); n],
            z: DVector::zeros(ARC_STATE_LEN * n),
            status: OptimizerStatus::Created,
            report,
            cancel: CancelToken::new(),
            log: LogSink::default(),
        })
    }

    /// Sets the stages (physical units) which may be appended after an overburn, in order.
    pub fn with_reserve(mut self, mut reserve: Vec<Phase>) -> Self {
        for phase in &mut reserve {
            phase.rescale(&self.problem.scale, self.opts.segment_length);
        }
        self.reserve = reserve;
        self
    }

    /// Sets the cancellation token checked throughout the solve.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the destination of the log records of the solve.
    pub fn with_log(mut self, log: LogSink) -> Self {
        self.log = log;
        self
    }

    pub fn status(&self) -> OptimizerStatus {
        self.status
    }

    /// Normalized phases, including any appended reserve stage.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn report(&self) -> &SolveReport {
        &self.report
    }

    pub fn residuals(&self) -> &DVector<f64> {
        &self.z
    }

    pub fn residual_norm(&self) -> f64 {
        self.z.norm()
    }

    /// Initial vector of every phase, whose accumulated slot holds the phase duration.
    pub fn initial_vectors(&self) -> &[ArcState] {
        &self.init
    }

    /// Final vector of every phase, whose accumulated slot holds the ΔV of the phase.
    pub fn final_vectors(&self) -> &[ArcState] {
        &self.term
    }

    pub(crate) fn integrator_opts(&self) -> IntegratorOpts {
        IntegratorOpts::with_tolerance(self.opts.integrator_tol)
    }

    pub(crate) fn shooting<'a>(&'a self, cancel: &'a CancelToken) -> Shooting<'a> {
        Shooting {
            problem: &self.problem,
            phases: &self.phases,
            opts: &self.opts,
            cancel,
            log: &self.log,
        }
    }

    /// Assembles the residuals of the current buffers.
    pub(crate) fn update_residuals(&mut self) {
        let cancel = self.cancel.clone();
        let mut z = DVector::zeros(ARC_STATE_LEN * self.phases.len());
        self.shooting(&cancel)
            .residuals(&self.init, &self.term, z.as_mut_slice());
        self.z = z;
    }

    /// Runs the solve. Must be called once bootstrapped.
    ///
    /// Timing out is not an error: the best iterate found so far is evaluated against the
    /// acceptance tolerance. An explicit cancellation aborts the solve.
    pub fn run(&mut self) -> Result<OptimizerStatus, OptimizerError> {
        ensure!(
            self.status == OptimizerStatus::Bootstrapped,
            InvalidStatusSnafu {
                expected: OptimizerStatus::Bootstrapped,
                found: self.status
            }
        );
        let start = Instant::now();
        let cancel = self
            .cancel
            .with_deadline(std::time::Duration::from_millis(self.opts.timeout_ms));
        log_to!(self.log, Info, "solving {}", self.problem);
        for (p, phase) in self.phases.iter().enumerate() {
            log_to!(self.log, Debug, "phase {p}: {phase}");
        }
        if self.report.multi_coast {
            log_to!(
                self.log,
                Warn,
                "several coasts have a free duration: the switching conditions are only \
                 established for a single free coast"
            );
        }

        self.report.iterations = 0;
        self.report.evaluations = 0;
        self.solve(&cancel);

        if !cancel.is_cancelled() {
            if let Some(k) = self.overburning_phase() {
                self.append_reserve(k, &cancel)?;
                self.solve(&cancel);
            }
        }
        if !cancel.is_cancelled() && self.pin_coasts(&cancel)? {
            self.solve(&cancel);
        }

        ensure!(!cancel.cancel_requested(), CancelledSnafu);
        if cancel.timed_out() {
            self.report.timed_out = true;
            log_to!(
                self.log,
                Warn,
                "solve timed out after {} ms, using the best iterate (|z| = {:.3e})",
                self.opts.timeout_ms,
                self.residual_norm()
            );
        }

        self.report.norm = self.residual_norm();
        self.report.elapsed = Duration::from_seconds(start.elapsed().as_secs_f64());
        self.status = if self.report.norm < self.opts.acceptance_tol {
            OptimizerStatus::Success
        } else {
            OptimizerStatus::Failed
        };
        let aligned = self
            .term
            .last()
            .map_or(true, |yf| self.problem.terminal.apsides_aligned(yf));
        if self.status == OptimizerStatus::Success && !aligned {
            self.status = OptimizerStatus::Failed;
            self.report.termination = "converged with the apsides swapped".to_string();
            log_to!(
                self.log,
                Warn,
                "the final orbit has its periapsis where the target has its apoapsis"
            );
        }
        log_to!(self.log, Info, "{} {}", self.status, self.report);
        Ok(self.status)
    }

    /// One least squares pass from the current buffers.
    fn solve(&mut self, cancel: &CancelToken) {
        let init = std::mem::take(&mut self.init);
        let term = std::mem::take(&mut self.term);
        let shooting = Shooting {
            problem: &self.problem,
            phases: &self.phases,
            opts: &self.opts,
            cancel,
            log: &self.log,
        };
        let mut lsq = ShootingProblem::new(shooting, init, term);
        let tol = self.opts.termination_tol;

        let (lsq, termination) = if lsq.norm < tol {
            (lsq, "already converged".to_string())
        } else {
            lsq.newton(NEWTON_STEPS);
            if lsq.norm < tol {
                (lsq, "converged (newton)".to_string())
            } else {
                log_to!(
                    self.log,
                    Debug,
                    "newton stopped at |z| = {:.3e}, switching to LM",
                    lsq.norm
                );
                let (mut lsq, report) = LevenbergMarquardt::new()
                    .with_ftol(f64::EPSILON)
                    .with_xtol(f64::EPSILON)
                    .with_gtol(0.0)
                    .with_patience(self.opts.max_iterations.max(1))
                    .minimize(lsq);
                if lsq.norm >= tol {
                    lsq.newton(NEWTON_STEPS);
                }
                let termination = if lsq.norm < tol {
                    "converged".to_string()
                } else {
                    format!("{:?}", report.termination)
                };
                (lsq, termination)
            }
        };

        self.report.iterations += lsq.iterations().min(self.opts.max_iterations);
        self.report.evaluations += lsq.evaluations;
        let best = lsq.into_best();
        self.init = best.init;
        self.term = best.term;
        self.z = best.z;
        self.report.termination = termination;
    }

    /// Index of the last free burn if it needs more than its maximum duration and a reserve
    /// stage is available.
    fn overburning_phase(&self) -> Option<usize> {
        if self.reserve.is_empty() {
            return None;
        }
        let k = self.phases.iter().position(|p| p.last_free_burn)?;
        let phase = &self.phases[k];
        (!phase.is_coast() && self.init[k].dv > phase.max_bt * (1.0 + 1e-9)).then_some(k)
    }

    /// Pins phase `k` at its maximum duration and appends reserve stages after it: the stages
    /// which may not shut down burn to depletion, up to the first one which may, whose duration is
    /// free. The last reserve stage is free in any case.
    fn append_reserve(&mut self, k: usize, cancel: &CancelToken) -> Result<(), OptimizerError> {
        let time = self.problem.scale.time();
        log_to!(
            self.log,
            Info,
            "stage {} overburns ({:.3} s > {:.3} s)",
            self.phases[k].stage,
            self.init[k].dv * time,
            self.phases[k].max_bt * time
        );
        let pinned = &mut self.phases[k];
        pinned.optimize_time = false;
        pinned.allow_shutdown = false;
        pinned.bt = pinned.max_bt;
        self.init[k].dv = pinned.max_bt;

        let mut scratch = Scratch::new(self.integrator_opts(), &self.log);
        let term = self.shooting(cancel).propagate(k, &self.init[k], &mut scratch)?;
        self.term[k] = term;

        let mut burnout = self.term[k].m;
        let mut at = k + 1;
        while !self.reserve.is_empty() {
            let mut next = self.reserve.remove(0);
            if next.jettison.is_none() && !next.is_coast() {
                next.jettison = Some((burnout - next.m0).max(0.0));
            }
            let free = next.allow_shutdown || self.reserve.is_empty();
            next.optimize_time = free;
            if !free {
                next.bt = next.max_bt;
            }
            log_to!(
                self.log,
                Info,
                "appending stage {} ({})",
                next.stage,
                if free { "free burn" } else { "burns to depletion" }
            );
            burnout = next.mass_after(next.m0, next.max_bt);

            self.phases.insert(at, next);
            self.init.insert(at, ArcState::default());
            self.term.insert(at, ArcState::default());
            at += 1;
            if free {
                break;
            }
        }
        mark_last_free_burn(&mut self.phases);

        // Seed the appended stages and their successors by continuity
        for p in k + 1..self.phases.len() {
            let mut init = next_initial(&self.phases[p], &self.term[p - 1], self.phases[p].bt);
            if self.phases[p].last_free_burn {
                init.dv = self.estimate_burn_time(p, &init);
            }
            self.init[p] = init;
            let term = self.shooting(cancel).propagate(p, &init, &mut scratch)?;
            self.term[p] = term;
        }
        self.update_residuals();
        self.report.overburn = true;
        Ok(())
    }

    /// Pins every free coast whose duration left its bounds at the violated bound, and shoots it
    /// again. Returns whether any coast was pinned.
    fn pin_coasts(&mut self, cancel: &CancelToken) -> Result<bool, OptimizerError> {
        let time = self.problem.scale.time();
        let mut scratch = Scratch::new(self.integrator_opts(), &self.log);
        let mut pinned = false;
        for p in 0..self.phases.len() {
            let phase = &self.phases[p];
            if !phase.is_coast() || !phase.optimize_time {
                continue;
            }
            let ct = self.init[p].dv;
            let bound = if ct < phase.min_bt {
                phase.min_bt
            } else if ct > phase.max_bt {
                phase.max_bt
            } else {
                continue;
            };
            log_to!(
                self.log,
                Info,
                "coast #{p} lasts {:.3} s, outside of [{:.3}, {:.3}] s: pinning it at {:.3} s",
                ct * time,
                phase.min_bt * time,
                phase.max_bt * time,
                bound * time
            );

            let phase = &mut self.phases[p];
            phase.optimize_time = false;
            phase.bt = bound;
            self.init[p].dv = bound;
            let term = self.shooting(cancel).propagate(p, &self.init[p], &mut scratch)?;
            self.term[p] = term;
            pinned = true;
        }
        if pinned {
            mark_last_free_burn(&mut self.phases);
            self.update_residuals();
            self.report.coast_pinned = true;
        }
        Ok(pinned)
    }

    /// Builds the queryable solution of the current buffers. Available once run.
    pub fn solution(&self) -> Result<Solution, OptimizerError> {
        ensure!(
            matches!(
                self.status,
                OptimizerStatus::Success | OptimizerStatus::Failed
            ),
            InvalidStatusSnafu {
                expected: OptimizerStatus::Success,
                found: self.status
            }
        );
        Solution::build(self)
    }
}
