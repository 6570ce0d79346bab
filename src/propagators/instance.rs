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

use super::error_ctrl::{ErrorCtrl, LargestError};
use super::{
    CancelledSnafu, DenseOutputSnafu, Dormand45, DynamicsSnafu, EventAction, EventLocationSnafu,
    EventSet, FiredEvent, IntegrationDetails, IntegratorOpts, MaxStepsSnafu, NonFiniteStateSnafu,
    PropagationError, StateDimensionSnafu, RK,
};
use crate::dynamics::Dynamics;
use crate::linalg::DVector;
use crate::polyfit::{hermite_basis, HermiteSpline};
use crate::roots::{brent_solve, RootSide};
use crate::utils::{CancelToken, LogSink};
use snafu::{ensure, ResultExt};
use std::marker::PhantomData;

/// Safety factor of the step size controller.
const SAFETY: f64 = 0.84;
const MIN_FACTOR: f64 = 0.1;
const MAX_FACTOR: f64 = 4.0;

/// Samples the integrated solution into a Hermite spline, at most once per `interval`.
///
/// The first and last states of an integration are always sampled.
pub struct DenseOutput<'a> {
    spline: &'a mut HermiteSpline,
    interval: f64,
    last: Option<f64>,
}

impl<'a> DenseOutput<'a> {
    pub fn new(spline: &'a mut HermiteSpline, interval: f64) -> Self {
        Self {
            spline,
            interval: interval.abs(),
            last: None,
        }
    }

    fn sample(
        &mut self,
        t: f64,
        state: &DVector<f64>,
        deriv: &DVector<f64>,
        force: bool,
    ) -> Result<(), PropagationError> {
        let due = match self.last {
            None => true,
            Some(last) => force || (t - last).abs() >= self.interval,
        };
        if due {
            self.spline
                .add_with_tangent(t, state, deriv)
                .context(DenseOutputSnafu { t })?;
            self.last = Some(t);
        }
        Ok(())
    }
}

/// Outcome of an integration call.
#[derive(Clone, Debug, PartialEq)]
pub struct IntegrationSummary {
    /// Time reached
    pub t: f64,
    /// Accepted steps
    pub steps: usize,
    /// Rejected step attempts
    pub rejected: usize,
    /// The stop event which ended the integration, if any
    pub stopped_by: Option<FiredEvent>,
    /// Whether the requested final time was reached
    pub completed: bool,
}

/// An adaptive embedded Runge Kutta integrator of vector states of a fixed length.
///
/// The stage buffers are allocated once, so integrating repeatedly with the same instance does
/// not allocate in the stepping loop. Times are plain `f64` in whichever units the dynamics use.
pub struct Integrator<M: RK = Dormand45, E: ErrorCtrl = LargestError> {
    pub opts: IntegratorOpts,
    /// Stores the details of the previous integration step
    pub details: IntegrationDetails,
    log: LogSink,
    dim: usize,
    // Allows us to do pre-allocation of the ki vectors
    k: Vec<DVector<f64>>,
    y_stage: DVector<f64>,
    y_next: DVector<f64>,
    error_est: DVector<f64>,
    interp: DVector<f64>,
    _method: PhantomData<(M, E)>,
}

impl<M: RK, E: ErrorCtrl> Integrator<M, E> {
    pub fn new(dim: usize, opts: IntegratorOpts) -> Self {
        Self {
            opts,
            details: IntegrationDetails::default(),
            log: LogSink::default(),
            dim,
            k: vec![DVector::zeros(dim); M::STAGES],
            y_stage: DVector::zeros(dim),
            y_next: DVector::zeros(dim),
            error_est: DVector::zeros(dim),
            interp: DVector::zeros(dim),
            _method: PhantomData,
        }
    }

    /// Sends the diagnostics of the stepping loop to `log`.
    pub fn with_log(mut self, log: LogSink) -> Self {
        self.log = log;
        self
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// Integrates `dynamics` from `(t0, y0)` until `tf`, storing the final state in `y`.
    pub fn integrate<D: Dynamics>(
        &mut self,
        dynamics: &D,
        t0: f64,
        y0: &DVector<f64>,
        tf: f64,
        y: &mut DVector<f64>,
        cancel: &CancelToken,
    ) -> Result<IntegrationSummary, PropagationError> {
        self.integrate_with(dynamics, t0, y0, tf, y, &mut EventSet::none(), None, cancel)
    }

    /// Integrates `dynamics` from `(t0, y0)` until `tf` or until a stop event fires, storing the
    /// final state in `y`. The integration may go backward in time.
    ///
    /// If `fail_on_max_steps` is unset in the options, exhausting the step budget stops the
    /// integration silently: check the `completed` flag of the summary.
    #[allow(clippy::too_many_arguments)]
    pub fn integrate_with<D: Dynamics>(
        &mut self,
        dynamics: &D,
        t0: f64,
        y0: &DVector<f64>,
        tf: f64,
        y: &mut DVector<f64>,
        events: &mut EventSet<'_>,
        mut dense: Option<&mut DenseOutput<'_>>,
        cancel: &CancelToken,
    ) -> Result<IntegrationSummary, PropagationError> {
        for got in [y0.len(), y.len(), dynamics.dimension()] {
            ensure!(
                got == self.dim,
                StateDimensionSnafu {
                    expected: self.dim,
                    got
                }
            );
        }

        y.copy_from(y0);
        let mut t = t0;
        let mut summary = IntegrationSummary {
            t,
            steps: 0,
            rejected: 0,
            stopped_by: None,
            completed: false,
        };

        dynamics.eom(t, y, &mut self.k[0]).context(DynamicsSnafu)?;
        events.init(t, y);
        if let Some(out) = dense.as_deref_mut() {
            out.sample(t, y, &self.k[0], true)?;
        }

        let span = tf - t0;
        if span == 0.0 {
            summary.completed = true;
            return Ok(summary);
        }
        let dir = span.signum();
        let tol = self.opts.tolerance;
        let mut step = self.opts.init_step.clamp(self.opts.min_step, self.opts.max_step);

        loop {
            ensure!(!cancel.is_cancelled(), CancelledSnafu { t });

            let remaining = (tf - t) * dir;
            if remaining <= 0.0 {
                summary.completed = true;
                break;
            }

            if summary.steps >= self.opts.max_steps {
                ensure!(
                    !self.opts.fail_on_max_steps,
                    MaxStepsSnafu {
                        max_steps: self.opts.max_steps,
                        t
                    }
                );
                log_to!(
                    self.log,
                    Warn,
                    "integration stopped at t = {t} after {} steps before reaching {tf}",
                    summary.steps
                );
                break;
            }

            // Shrink the step until the error is within tolerance
            let mut h = step.min(remaining);
            self.details.attempts = 1;
            loop {
                self.details.error = self.trial(dynamics, t, y, h * dir)?;
                if self.details.error <= tol
                    || h <= self.opts.min_step
                    || self.details.attempts >= self.opts.attempts
                {
                    ensure!(self.details.error.is_finite(), NonFiniteStateSnafu { t });
                    if self.details.error > tol {
                        log_to!(
                            self.log,
                            Debug,
                            "accepting step of {h:e} at t = {t} with error {:e} (attempt {})",
                            self.details.error, self.details.attempts
                        );
                    }
                    break;
                }
                summary.rejected += 1;
                h = (h * Self::step_factor(self.details.error, tol)).max(self.opts.min_step);
                self.details.attempts = self.details.attempts.saturating_add(1);
            }
            let mut last = h >= remaining;

            // Truncate the step at the earliest event crossing
            let mut fired = None;
            if !events.is_empty() {
                if let Some((index, frac, post)) = self.locate_event(t, y, h * dir, events)? {
                    if frac < 1.0 {
                        h *= frac;
                        self.details.error = self.trial(dynamics, t, y, h * dir)?;
                        last = false;
                    }
                    fired = Some((index, post));
                }
            }

            t = if last { tf } else { t + h * dir };
            y.copy_from(&self.y_next);
            // First same as last
            self.k.swap(0, M::STAGES - 1);
            self.details.step = h * dir;
            summary.steps += 1;

            let mut stop = None;
            for i in 0..events.len() {
                let value = events.events[i].eval(t, y);
                events.prev[i] = value;
                if let Some((index, post)) = fired {
                    if index == i {
                        let evt = FiredEvent { index, t, value };
                        log_to!(self.log, Debug, "{} fired: {evt}", events.events[i].name());
                        events.fired.push(evt);
                        if value * post < 0.0 {
                            // The crossing is located on the Hermite interpolant: make sure it
                            // is not found again on the next step.
                            events.prev[i] = post.signum() * f64::MIN_POSITIVE;
                        }
                        if events.events[i].action() == EventAction::Stop {
                            stop = Some(evt);
                        }
                    }
                }
            }

            if let Some(out) = dense.as_deref_mut() {
                out.sample(t, y, &self.k[0], last || stop.is_some())?;
            }

            if let Some(evt) = stop {
                summary.stopped_by = Some(evt);
                break;
            }
            if last {
                summary.completed = true;
                break;
            }

            step = (h * Self::step_factor(self.details.error, tol))
                .clamp(self.opts.min_step, self.opts.max_step);
        }

        summary.t = t;
        Ok(summary)
    }

    /// Step size multiplier from the error of the last attempt.
    fn step_factor(error: f64, tol: f64) -> f64 {
        if error <= 0.0 {
            MAX_FACTOR
        } else if !error.is_finite() {
            MIN_FACTOR
        } else {
            (SAFETY * (tol / error).powf(1.0 / f64::from(M::ORDER))).clamp(MIN_FACTOR, MAX_FACTOR)
        }
    }

    /// Takes a trial step of signed size `h` from `(t, y)`, where `k[0]` already holds the
    /// derivative at `(t, y)`. Stores the candidate in `y_next` and returns its error estimate.
    fn trial<D: Dynamics>(
        &mut self,
        dynamics: &D,
        t: f64,
        y: &DVector<f64>,
        h: f64,
    ) -> Result<f64, PropagationError> {
        let mut a_idx: usize = 0;
        for i in 0..(M::STAGES - 1) {
            // Let's compute the c_i by summing the relevant items from the list of coefficients.
            // \sum_{j=1}^{i-1} a_ij  ∀ i ∈ [2, s]
            let mut ci: f64 = 0.0;
            self.y_stage.copy_from(y);
            for j in 0..=i {
                let a_ij = M::A_COEFFS[a_idx];
                ci += a_ij;
                if a_ij != 0.0 {
                    self.y_stage.axpy(h * a_ij, &self.k[j], 1.0);
                }
                a_idx += 1;
            }
            dynamics
                .eom(t + ci * h, &self.y_stage, &mut self.k[i + 1])
                .context(DynamicsSnafu)?;
        }

        self.y_next.copy_from(y);
        self.error_est.fill(0.0);
        for (i, ki) in self.k.iter().enumerate() {
            let b_i = M::B_COEFFS[i];
            let b_i_star = M::B_COEFFS[i + M::STAGES];
            if b_i != 0.0 {
                self.y_next.axpy(h * b_i, ki, 1.0);
            }
            self.error_est.axpy(h * (b_i - b_i_star), ki, 1.0);
        }

        Ok(E::estimate(&self.error_est, &self.y_next, y))
    }

    /// Searches the trial step for the earliest event crossing. Returns the event index, the
    /// fraction of the step where it happens, and the event value at the untruncated step end.
    fn locate_event(
        &mut self,
        t: f64,
        y: &DVector<f64>,
        h: f64,
        events: &EventSet<'_>,
    ) -> Result<Option<(usize, f64, f64)>, PropagationError> {
        let y_end = &self.y_next;
        let dy0 = &self.k[0];
        let dy1 = &self.k[M::STAGES - 1];
        let interp = &mut self.interp;

        let mut earliest: Option<(usize, f64, f64)> = None;
        for (i, event) in events.events.iter().enumerate() {
            if !events.enabled[i] {
                continue;
            }
            let g1 = event.eval(t + h, y_end);
            if !event.direction().is_crossing(events.prev[i], g1) {
                continue;
            }
            if event.eval(t, y) * g1 > 0.0 {
                // Only the stored sign was forced after a previous crossing
                continue;
            }

            let side = if g1 >= 0.0 {
                RootSide::Positive
            } else {
                RootSide::Negative
            };
            let tol = (event.time_precision() / h.abs()).max(f64::EPSILON);
            let frac = brent_solve(
                |s| {
                    let [h00, h10, h01, h11] = hermite_basis(s);
                    for j in 0..y.len() {
                        interp[j] =
                            h00 * y[j] + h10 * h * dy0[j] + h01 * y_end[j] + h11 * h * dy1[j];
                    }
                    event.eval(t + s * h, interp)
                },
                0.0,
                1.0,
                tol,
                100,
                side,
            )
            .context(EventLocationSnafu { index: i })?;

            if earliest.map_or(true, |(_, best, _)| frac < best) {
                earliest = Some((i, frac, g1));
            }
        }
        Ok(earliest)
    }
}
