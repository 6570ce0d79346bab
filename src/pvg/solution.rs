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

use super::analytic::sample_analytic;
use super::shooting::arc_dynamics;
use super::{
    NegativeDurationSnafu, Optimizer, OptimizerError, OptimizerStatus, Phase, Propagation, Scale,
    ShootingSnafu, Terminal,
};
use crate::cosmic::KeplerianElements;
use crate::dynamics::{ArcState, ARC_STATE_LEN};
use crate::linalg::{DVector, Vector3};
use crate::polyfit::{HermiteSpline, InterpolationError};
use crate::propagators::{DenseOutput, EventSet, ImpactEvent, Integrator};
use crate::time::{Duration, Epoch};
use crate::utils::{pitch_heading, CancelToken};
use snafu::{ensure, ResultExt};
use std::fmt;

/// Samples per segment of closed form arcs.
const SAMPLES_PER_SEGMENT: usize = 4;
/// Samples per numeric arc.
const SAMPLES_PER_ARC: f64 = 64.0;

/// One arc of a solution: its time window and its interpolated state and costate.
#[derive(Clone, Debug)]
pub struct SolutionArc {
    /// Nondimensional start time
    pub tmin: f64,
    /// Nondimensional end time
    pub tmax: f64,
    /// State and costate over `[tmin, tmax]`, whose accumulated slot is the ΔV since `tmin`
    pub spline: HermiteSpline,
    pub phase: Phase,
    /// ΔV accumulated before this arc
    pub dv_offset: f64,
    /// Thrust direction of an unguided arc
    pub frozen_u: Option<Vector3<f64>>,
}

impl SolutionArc {
    pub fn duration(&self) -> f64 {
        self.tmax - self.tmin
    }

    pub fn contains(&self, t: f64) -> bool {
        self.tmin <= t && t < self.tmax
    }
}

/// Converged (or best effort) trajectory of a solve, queried by epoch.
///
/// A solution is read only: a new solve produces a new solution.
#[derive(Clone, Debug)]
pub struct Solution {
    scale: Scale,
    epoch: Epoch,
    mu: f64,
    terminal: Terminal,
    arcs: Vec<SolutionArc>,
    dv_total: f64,
    pub status: OptimizerStatus,
    pub residual_norm: f64,
    pub iterations: usize,
}

impl Solution {
    /// Samples every phase of a solved optimizer.
    pub(crate) fn build(optimizer: &Optimizer) -> Result<Self, OptimizerError> {
        let problem = &optimizer.problem;
        let min_radius = problem.nd_body_radius();
        let cancel = CancelToken::new();
        let mut integrator: Integrator = Integrator::new(ARC_STATE_LEN, optimizer.integrator_opts())
            .with_log(optimizer.log.clone());
        let impact = ImpactEvent::new(min_radius);

        let mut arcs = Vec::with_capacity(optimizer.phases.len());
        let mut t = 0.0;
        let mut dv = 0.0;
        for (p, (phase, init)) in optimizer.phases.iter().zip(&optimizer.init).enumerate() {
            let bt = init.dv;
            ensure!(bt >= 0.0, NegativeDurationSnafu { phase: p, bt });
            let mut start = *init;
            start.dv = 0.0;
            let dynamics = arc_dynamics(phase, init);
            let mut spline = HermiteSpline::with_capacity(ARC_STATE_LEN, 64);

            let (end, impacted) = match phase.propagation {
                Propagation::Analytic { segments } => sample_analytic(
                    &start,
                    t,
                    bt,
                    segments,
                    SAMPLES_PER_SEGMENT,
                    &dynamics,
                    min_radius,
                    &mut spline,
                )
                .context(ShootingSnafu { phase: p })?,
                Propagation::Numeric => {
                    let y0 = start.to_dvector();
                    let mut yf = DVector::zeros(ARC_STATE_LEN);
                    let mut events = EventSet::new(vec![&impact]);
                    let mut dense = DenseOutput::new(&mut spline, bt / SAMPLES_PER_ARC);
                    integrator
                        .integrate_with(
                            &dynamics,
                            t,
                            &y0,
                            t + bt,
                            &mut yf,
                            &mut events,
                            Some(&mut dense),
                            &cancel,
                        )
                        .context(ShootingSnafu { phase: p })?;
                    (ArcState::from_slice(yf.as_slice()), !events.fired.is_empty())
                }
            };
            if impacted {
                log_to!(
                    optimizer.log,
                    Warn,
                    "phase {p} (stage {}) goes below the surface of the central body",
                    phase.stage
                );
            }

            arcs.push(SolutionArc {
                tmin: t,
                tmax: t + bt,
                spline,
                phase: phase.clone(),
                dv_offset: dv,
                frozen_u: dynamics.frozen,
            });
            t += bt;
            dv += end.dv;
        }

        Ok(Self {
            scale: problem.scale,
            epoch: problem.epoch,
            mu: problem.mu,
            terminal: problem.terminal,
            arcs,
            dv_total: dv,
            status: optimizer.status,
            residual_norm: optimizer.residual_norm(),
            iterations: optimizer.report.iterations,
        })
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    /// Epoch of the start of the solution.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Epoch of the end of the solution.
    pub fn final_epoch(&self) -> Epoch {
        self.epoch + self.scale.duration(self.nd_final_time())
    }

    pub fn nd_final_time(&self) -> f64 {
        self.arcs.last().map_or(0.0, |arc| arc.tmax)
    }

    pub fn arcs(&self) -> &[SolutionArc] {
        &self.arcs
    }

    /// Nondimensional time of `epoch`.
    pub fn nd_time(&self, epoch: Epoch) -> f64 {
        self.scale.nd_time(epoch - self.epoch)
    }

    /// Index of the arc containing the nondimensional time `t`; times before (after) the
    /// solution belong to the first (last) arc.
    pub fn arc_index_nd(&self, t: f64) -> usize {
        self.arcs
            .iter()
            .position(|arc| t < arc.tmax)
            .unwrap_or(self.arcs.len().saturating_sub(1))
    }

    /// State and costate of arc `k` at the nondimensional time `t`, clamped to the arc window.
    /// The accumulated slot is the ΔV since the start of the solution.
    pub fn arc_state_nd(&self, k: usize, t: f64) -> Result<ArcState, InterpolationError> {
        let arc = self.arcs.get(k).ok_or(InterpolationError::NoKeyframes)?;
        let y = arc.spline.evaluate(t.clamp(arc.tmin, arc.tmax))?;
        let mut state = ArcState::from_slice(y.as_slice());
        state.dv += arc.dv_offset;
        Ok(state)
    }

    fn locate(&self, epoch: Epoch) -> (usize, f64) {
        let t = self.nd_time(epoch).clamp(0.0, self.nd_final_time());
        (self.arc_index_nd(t), t)
    }

    /// Nondimensional state and costate at `epoch`.
    pub fn state(&self, epoch: Epoch) -> Result<ArcState, InterpolationError> {
        let (k, t) = self.locate(epoch);
        self.arc_state_nd(k, t)
    }

    /// Position in meters.
    pub fn position(&self, epoch: Epoch) -> Result<Vector3<f64>, InterpolationError> {
        Ok(self.scale.position(&self.state(epoch)?.r))
    }

    /// Velocity in meters per second.
    pub fn velocity(&self, epoch: Epoch) -> Result<Vector3<f64>, InterpolationError> {
        Ok(self.scale.velocity(&self.state(epoch)?.v))
    }

    /// Primer vector, i.e. velocity costate (nondimensional).
    pub fn primer(&self, epoch: Epoch) -> Result<Vector3<f64>, InterpolationError> {
        Ok(self.state(epoch)?.pv)
    }

    /// Position costate (nondimensional).
    pub fn costate_r(&self, epoch: Epoch) -> Result<Vector3<f64>, InterpolationError> {
        Ok(self.state(epoch)?.pr)
    }

    /// Mass in kilograms.
    pub fn mass(&self, epoch: Epoch) -> Result<f64, InterpolationError> {
        Ok(self.state(epoch)?.m * self.scale.mass)
    }

    /// Mass costate (nondimensional).
    pub fn pm(&self, epoch: Epoch) -> Result<f64, InterpolationError> {
        Ok(self.state(epoch)?.pm)
    }

    /// ΔV gained since the start of the solution, in meters per second.
    pub fn dv(&self, epoch: Epoch) -> Result<f64, InterpolationError> {
        Ok(self.state(epoch)?.dv * self.scale.velocity)
    }

    /// Total ΔV of the solution, in meters per second.
    pub fn dv_total(&self) -> f64 {
        self.dv_total * self.scale.velocity
    }

    /// ΔV still to be gained after `epoch`, in meters per second.
    pub fn vgo(&self, epoch: Epoch) -> Result<f64, InterpolationError> {
        Ok(self.dv_total() - self.dv(epoch)?)
    }

    /// Time to go until the end of the solution.
    pub fn tgo(&self, epoch: Epoch) -> Duration {
        let (_, t) = self.locate(epoch);
        self.scale.duration(self.nd_final_time() - t)
    }

    /// Time to go until the end of the arc containing `epoch`.
    pub fn tgo_phase(&self, epoch: Epoch) -> Duration {
        let (k, t) = self.locate(epoch);
        self.scale
            .duration(self.arcs.get(k).map_or(0.0, |arc| arc.tmax - t))
    }

    /// Index of the arc containing `epoch`.
    pub fn phase_index(&self, epoch: Epoch) -> usize {
        self.locate(epoch).0
    }

    /// Stage flown at `epoch`.
    pub fn stage(&self, epoch: Epoch) -> Option<usize> {
        self.arcs.get(self.phase_index(epoch)).map(|arc| arc.phase.stage)
    }

    /// Stage of the last arc.
    pub fn terminal_stage(&self) -> Option<usize> {
        self.arcs.last().map(|arc| arc.phase.stage)
    }

    pub fn is_coast(&self, epoch: Epoch) -> bool {
        self.arcs
            .get(self.phase_index(epoch))
            .map_or(false, |arc| arc.phase.is_coast())
    }

    /// Unit thrust direction commanded at `epoch`: the primer direction on guided arcs, the
    /// frozen direction on unguided arcs, and the frozen direction of the next arc on a coast
    /// before an unguided arc.
    pub fn thrust_direction(&self, epoch: Epoch) -> Result<Vector3<f64>, InterpolationError> {
        let (k, t) = self.locate(epoch);
        let arc = &self.arcs[k];
        if let Some(u) = arc.frozen_u {
            return Ok(u);
        }
        if arc.phase.is_coast() {
            if let Some(u) = self.arcs.get(k + 1).and_then(|next| next.frozen_u) {
                return Ok(u);
            }
        }
        Ok(self.arc_state_nd(k, t)?.thrust_direction(None))
    }

    /// Pitch above the local horizon and heading from north of the commanded thrust direction,
    /// in degrees.
    pub fn pitch_heading(&self, epoch: Epoch) -> Result<(f64, f64), InterpolationError> {
        let r = self.state(epoch)?.r;
        let u = self.thrust_direction(epoch)?;
        Ok(pitch_heading(&r, &u))
    }

    /// Nondimensional final state and costate.
    pub fn terminal_state(&self) -> Result<ArcState, InterpolationError> {
        self.arc_state_nd(self.arcs.len().saturating_sub(1), self.nd_final_time())
    }

    /// Orbital elements reached at the end of the solution, in meters and degrees.
    pub fn terminal_elements(&self) -> Result<KeplerianElements, InterpolationError> {
        let yf = self.terminal_state()?;
        Ok(KeplerianElements::from_rv(
            &self.scale.position(&yf.r),
            &self.scale.velocity(&yf.v),
            self.mu,
        ))
    }

    /// Residuals of the terminal condition at the end of the solution.
    pub fn terminal_residuals(&self) -> Result<[f64; 6], InterpolationError> {
        Ok(self.terminal.residuals(&self.terminal_state()?))
    }
}

impl fmt::Display for Solution {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "{} solution from {} (|z| = {:.3e}, {} iterations), ΔV = {:.3} m/s",
            self.status,
            self.epoch,
            self.residual_norm,
            self.iterations,
            self.dv_total()
        )?;
        for (k, arc) in self.arcs.iter().enumerate() {
            writeln!(
                f,
                "  #{k}: stage {} {} for {}",
                arc.phase.stage,
                if arc.phase.is_coast() { "coast" } else { "burn" },
                self.scale.duration(arc.duration())
            )?;
        }
        match self.terminal_elements() {
            Ok(elements) => write!(f, "  final orbit: {elements}"),
            Err(e) => write!(f, "  final orbit unavailable: {e}"),
        }
    }
}
