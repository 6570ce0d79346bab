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

use super::shooting::{next_initial, Scratch};
use super::{
    BootstrapSnafu, CancelledSnafu, InvalidStatusSnafu, Optimizer, OptimizerError, OptimizerStatus,
    Solution,
};
use crate::dynamics::ArcState;
use crate::linalg::Vector3;
use crate::roots::brent_minimize;
use snafu::prelude::*;
use std::f64::consts::PI;

/// Pitch bounds of the initial primer search, in radians.
const PITCH_MIN: f64 = -PI / 6.0;
const PITCH_MAX: f64 = PI / 3.0;
/// Terminal miss of a failed forward shot, for the pitch search.
const MISSED: f64 = 1e10;

impl Optimizer {
    /// Seeds the unknowns analytically: the primer points along the heading guess (or the best
    /// pitch of that heading), the position costate is zero, the last free burn lasts as long as
    /// the rocket equation requires to make up the speed deficit, and every phase is shot forward
    /// from the previous one.
    pub fn bootstrap(&mut self) -> Result<(), OptimizerError> {
        self.ensure_created()?;
        self.analytic_bootstrap()
    }

    /// Seeds the unknowns from a prior solution resampled at the epoch of this problem, or
    /// analytically if that fails.
    pub fn bootstrap_from(&mut self, prior: &Solution) -> Result<(), OptimizerError> {
        self.ensure_created()?;
        match self.warm_start(prior) {
            Ok(()) => {
                self.report.warm_start = true;
                self.status = OptimizerStatus::Bootstrapped;
                log_to!(self.log, Debug, "warm started, |z| = {:.3e}", self.residual_norm());
                Ok(())
            }
            Err(e) => {
                log_to!(
                    self.log,
                    Debug,
                    "warm start failed ({e}), bootstrapping analytically"
                );
                self.analytic_bootstrap()
            }
        }
    }

    fn ensure_created(&self) -> Result<(), OptimizerError> {
        ensure!(
            self.status == OptimizerStatus::Created,
            InvalidStatusSnafu {
                expected: OptimizerStatus::Created,
                found: self.status
            }
        );
        Ok(())
    }

    /// Duration of phase `p` entered with `entry`: its nominal duration, or the rocket equation
    /// estimate of the speed deficit for the last free burn.
    pub(crate) fn estimate_burn_time(&self, p: usize, entry: &ArcState) -> f64 {
        let phase = &self.phases[p];
        if !phase.last_free_burn || phase.is_coast() {
            return phase.bt;
        }
        let target = self.problem.terminal.speed_at(entry.r.norm());
        let deficit = (target - entry.v.norm()).abs();
        phase
            .burn_time_for(entry.m, deficit)
            .clamp(1e-2 * phase.max_bt, phase.max_bt)
    }

    /// Single shooting pass from the initial state with the provided initial primer.
    fn forward_shoot(
        &self,
        pv0: &Vector3<f64>,
        scratch: &mut Scratch,
    ) -> Result<(Vec<ArcState>, Vec<ArcState>), OptimizerError> {
        let shooting = self.shooting(&self.cancel);
        let n = self.phases.len();
        let mut init = Vec::with_capacity(n);
        let mut term: Vec<ArcState> = Vec::with_capacity(n);
        for p in 0..n {
            let mut y = match term.last() {
                None => ArcState {
                    pv: *pv0,
                    ..self.problem.initial_state()
                },
                Some(prev) => next_initial(&self.phases[p], prev, 0.0),
            };
            y.dv = self.estimate_burn_time(p, &y);
            term.push(shooting.propagate(p, &y, scratch)?);
            init.push(y);
        }
        Ok((init, term))
    }

    /// Norm of the terminal constraints missed by a forward shot, ignoring transversality.
    fn terminal_miss(&self, term: &[ArcState]) -> f64 {
        let k = self.problem.terminal.constraints();
        term.last()
            .map(|yf| {
                self.problem.terminal.residuals(yf)[..k]
                    .iter()
                    .map(|x| x * x)
                    .sum::<f64>()
                    .sqrt()
            })
            .unwrap_or(MISSED)
    }

    fn analytic_bootstrap(&mut self) -> Result<(), OptimizerError> {
        let mut scratch = Scratch::new(self.integrator_opts(), &self.log);
        let r0 = self.problem.r0;
        let up = r0.normalize();
        let u0 = self.problem.u0;
        let horizontal = (u0 - up * u0.dot(&up))
            .try_normalize(1e-9)
            .or_else(|| (self.problem.v0 - up * self.problem.v0.dot(&up)).try_normalize(1e-9))
            .unwrap_or_else(|| Vector3::z().cross(&up).normalize());
        let primer = |pitch: f64| horizontal * pitch.cos() + up * pitch.sin();
        let base_pitch = u0.dot(&up).clamp(-1.0, 1.0).asin();

        let mut pv0 = u0;
        if self.opts.pitch_search {
            let mut miss = |pitch: f64| match self.forward_shoot(&primer(pitch), &mut scratch) {
                Ok((_, term)) => self.terminal_miss(&term),
                Err(_) => MISSED,
            };
            let base_miss = miss(base_pitch);
            match brent_minimize(&mut miss, PITCH_MIN, PITCH_MAX, 1e-4, 40) {
                Ok((pitch, best)) if best < base_miss => {
                    log_to!(
                        self.log,
                        Debug,
                        "initial primer pitch {:.3} deg (miss {best:.3e} instead of {base_miss:.3e})",
                        pitch.to_degrees()
                    );
                    pv0 = primer(pitch);
                }
                Ok(_) => {}
                Err(e) => log_to!(self.log, Debug, "pitch search failed: {e}"),
            }
        }
        ensure!(!self.cancel.is_cancelled(), CancelledSnafu);

        let (mut init, mut term) = self.forward_shoot(&pv0, &mut scratch)?;

        // Costates are homogeneous: normalize the final primer
        let pvf = term.last().map_or(0.0, |yf| yf.pv.norm());
        ensure!(
            pvf.is_finite() && pvf > 0.0,
            BootstrapSnafu {
                reason: format!("final primer norm is {pvf}")
            }
        );
        for y in init.iter_mut().chain(term.iter_mut()) {
            y.scale_costates(1.0 / pvf);
        }

        // The mass costate only shifts: zero the Hamiltonian of the last free burn
        if let Some(k) = self.phases.iter().position(|p| p.last_free_burn) {
            let phase = &self.phases[k];
            if !phase.is_coast() && phase.mdot > 0.0 {
                let entry = &init[k];
                let pm = (entry.h0() + phase.thrust / entry.m * entry.pv.norm()) / phase.mdot;
                let shift = pm - entry.pm;
                for y in init.iter_mut().chain(term.iter_mut()) {
                    y.pm += shift;
                }
            }
        }

        self.init = init;
        self.term = term;
        self.update_residuals();
        self.status = OptimizerStatus::Bootstrapped;
        log_to!(
            self.log,
            Debug,
            "bootstrapped analytically, |z| = {:.3e}",
            self.residual_norm()
        );
        Ok(())
    }

    /// Resamples `prior` at the epoch of this problem. The phases of the prior solution are
    /// matched to these phases from the one containing the new initial epoch, and the costates
    /// are converted between the scales of both problems.
    fn warm_start(&mut self, prior: &Solution) -> Result<(), OptimizerError> {
        let old = prior.scale();
        let new = self.problem.scale;
        let t_new = prior.nd_time(self.problem.epoch);
        ensure!(
            t_new < prior.nd_final_time(),
            BootstrapSnafu {
                reason: "prior solution ended before the new epoch".to_string()
            }
        );
        let first = prior.arc_index_nd(t_new);
        let time_ratio = old.time() / new.time();

        let mut init = Vec::with_capacity(self.phases.len());
        for (p, phase) in self.phases.iter().enumerate() {
            let k = first + p;
            let arc = prior.arcs().get(k).context(BootstrapSnafu {
                reason: format!("prior solution has no phase matching phase {p}"),
            })?;
            ensure!(
                arc.phase.stage == phase.stage && arc.phase.is_coast() == phase.is_coast(),
                BootstrapSnafu {
                    reason: format!("phase {p} does not match the prior phase {k}")
                }
            );

            let t = if p == 0 { t_new } else { arc.tmin };
            let s = prior
                .arc_state_nd(k, t)
                .map_err(|e| OptimizerError::Bootstrap {
                    reason: e.to_string(),
                })?;

            let mut y = ArcState {
                r: s.r * (old.length / new.length),
                v: s.v * (old.velocity / new.velocity),
                pv: s.pv * (new.velocity / old.velocity),
                pr: s.pr * (new.length / old.length),
                m: s.m * (old.mass / new.mass),
                pm: s.pm * (new.mass / old.mass),
                dv: 0.0,
            };
            if p == 0 {
                y.r = self.problem.r0;
                y.v = self.problem.v0;
                y.m = self.problem.m0;
            }
            y.dv = if phase.optimize_time {
                (arc.tmax - t) * time_ratio
            } else {
                phase.bt
            };
            init.push(y);
        }

        let mut term = init.clone();
        self.shooting(&self.cancel).shoot_all(&init, &mut term)?;
        self.init = init;
        self.term = term;
        self.update_residuals();
        ensure!(
            self.residual_norm().is_finite(),
            BootstrapSnafu {
                reason: "non finite residuals".to_string()
            }
        );
        Ok(())
    }
}
