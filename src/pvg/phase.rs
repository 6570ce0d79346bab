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

use super::Scale;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard gravity used to convert specific impulse into exhaust velocity, in m/s^2.
pub const G0: f64 = 9.80665;

/// Segment count bounds of closed form burns.
const MIN_SEGMENTS: usize = 4;
const MAX_SEGMENTS: usize = 64;

/// How the state and costate are carried across a phase.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Propagation {
    /// Closed form vacuum thrust solution in linearized gravity, over a fixed number of segments
    Analytic { segments: usize },
    /// Adaptive Dormand Prince integration of the exact equations of motion
    Numeric,
}

/// One burn or coast arc of the trajectory.
///
/// Phases are built in physical units (kg, N, s) and converted once with [Phase::rescale]. A phase
/// is never mutated during a shooting pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Vehicle stage index this phase burns (or coasts on)
    pub stage: usize,
    /// Mass at ignition of a fresh stage
    pub m0: f64,
    pub thrust: f64,
    /// Specific impulse, in seconds (zero for coasts)
    pub isp: f64,
    /// Exhaust velocity
    pub ve: f64,
    pub mdot: f64,
    /// Nominal duration: the fixed duration, or the initial guess of a free one
    pub bt: f64,
    pub min_bt: f64,
    pub max_bt: f64,
    /// Whether the duration is an unknown of the optimization
    pub optimize_time: bool,
    /// Mass dropped at the start of this phase; `None` for mass continuity
    pub jettison: Option<f64>,
    /// Set on the last phase with a free duration
    pub last_free_burn: bool,
    /// Thrust is held along the primer direction at the phase start
    pub unguided: bool,
    /// Whether the stage may be cut off before burnout
    pub allow_shutdown: bool,
    pub propagation: Propagation,
    normalized: bool,
}

impl Phase {
    fn new(stage: usize, m0: f64, thrust: f64, isp: f64, bt: f64, optimize_time: bool) -> Self {
        let ve = isp * G0;
        let mdot = if ve > 0.0 { thrust / ve } else { 0.0 };
        Self {
            stage,
            m0,
            thrust,
            isp,
            ve,
            mdot,
            bt,
            min_bt: 0.0,
            max_bt: bt,
            optimize_time,
            jettison: None,
            last_free_burn: false,
            unguided: false,
            allow_shutdown: optimize_time,
            propagation: if thrust > 0.0 {
                Propagation::Analytic {
                    segments: MIN_SEGMENTS,
                }
            } else {
                Propagation::Numeric
            },
            normalized: false,
        }
    }

    /// A burn of exactly `bt` seconds.
    pub fn fixed_burn(stage: usize, m0: f64, thrust: f64, isp: f64, bt: f64) -> Self {
        Self::new(stage, m0, thrust, isp, bt, false)
    }

    /// A burn whose duration is optimized, starting from `bt` and bounded by `max_bt`.
    pub fn free_burn(stage: usize, m0: f64, thrust: f64, isp: f64, bt: f64, max_bt: f64) -> Self {
        let mut me = Self::new(stage, m0, thrust, isp, bt.min(max_bt), true);
        me.max_bt = max_bt;
        me
    }

    /// A coast of exactly `ct` seconds.
    pub fn fixed_coast(stage: usize, m0: f64, ct: f64) -> Self {
        Self::new(stage, m0, 0.0, 0.0, ct, false)
    }

    /// A coast whose duration is optimized, starting from `ct` within `[min_ct, max_ct]`.
    pub fn free_coast(stage: usize, m0: f64, ct: f64, min_ct: f64, max_ct: f64) -> Self {
        let mut me = Self::new(stage, m0, 0.0, 0.0, ct, true);
        me.min_bt = min_ct;
        me.max_bt = max_ct;
        me
    }

    /// Holds the thrust direction along the primer at the start of the phase.
    pub fn unguided(mut self) -> Self {
        self.unguided = true;
        self
    }

    /// Drops `mass` at the start of this phase instead of carrying the previous mass over.
    pub fn with_jettison(mut self, mass: f64) -> Self {
        self.jettison = Some(mass);
        self
    }

    pub fn with_shutdown(mut self, allow_shutdown: bool) -> Self {
        self.allow_shutdown = allow_shutdown;
        self
    }

    /// Forces the numeric propagation of this phase.
    pub fn numeric(mut self) -> Self {
        self.propagation = Propagation::Numeric;
        self
    }

    pub fn is_coast(&self) -> bool {
        self.thrust <= 0.0
    }

    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    /// Mass at the end of a burn of `bt` starting with mass `m`.
    pub fn mass_after(&self, m: f64, bt: f64) -> f64 {
        m - self.mdot * bt
    }

    /// Duration needed to gain `dv` starting with mass `m`, from the rocket equation. Coasts
    /// return their nominal duration.
    pub fn burn_time_for(&self, m: f64, dv: f64) -> f64 {
        if self.is_coast() || self.mdot <= 0.0 {
            self.bt
        } else {
            m * (1.0 - (-dv / self.ve).exp()) / self.mdot
        }
    }

    /// ΔV of a burn of `bt` starting with mass `m`.
    pub fn dv_for(&self, m: f64, bt: f64) -> f64 {
        if self.is_coast() {
            0.0
        } else {
            self.ve * (m / self.mass_after(m, bt)).ln()
        }
    }

    /// Converts this phase from physical units to the units of `scale`, and sizes the segments of
    /// a closed form burn so that each spans at most `segment_length`. Calling this twice is a
    /// no-op.
    pub fn rescale(&mut self, scale: &Scale, segment_length: f64) {
        if self.normalized {
            return;
        }
        let time = scale.time();
        self.m0 /= scale.mass;
        self.thrust /= scale.force();
        self.ve /= scale.velocity;
        self.mdot /= scale.mass_flow();
        self.bt /= time;
        self.min_bt /= time;
        self.max_bt /= time;
        self.jettison = self.jettison.map(|mass| mass / scale.mass);

        if let Propagation::Analytic { ref mut segments } = self.propagation {
            let span = self.max_bt.max(self.bt);
            *segments = if segment_length > 0.0 {
                ((span / segment_length).ceil() as usize).clamp(MIN_SEGMENTS, MAX_SEGMENTS)
            } else {
                MIN_SEGMENTS
            };
        }
        self.normalized = true;
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = if self.is_coast() { "coast" } else { "burn" };
        let time = if self.optimize_time { "free" } else { "fixed" };
        write!(
            f,
            "stage {} {time} {kind}: m0 = {:.6}, thrust = {:.6}, isp = {:.1}, bt = {:.6} (max {:.6})",
            self.stage, self.m0, self.thrust, self.isp, self.bt, self.max_bt
        )?;
        if let Some(mass) = self.jettison {
            write!(f, ", jettison {mass:.6}")?;
        }
        if self.unguided {
            write!(f, ", unguided")?;
        }
        if self.last_free_burn {
            write!(f, ", last free")?;
        }
        Ok(())
    }
}

/// Flags the last phase with a free duration, which carries the free final time condition.
/// Returns its index.
pub fn mark_last_free_burn(phases: &mut [Phase]) -> Option<usize> {
    for phase in phases.iter_mut() {
        phase.last_free_burn = false;
    }
    let last = phases.iter().rposition(|p| p.optimize_time)?;
    phases[last].last_free_burn = true;
    Some(last)
}

#[cfg(test)]
mod ut_phase {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rocket_equation() {
        let phase = Phase::free_burn(0, 50_000.0, 1e6, 300.0, 50.0, 100.0);
        assert_relative_eq!(phase.mdot, 1e6 / (300.0 * G0));
        let bt = phase.burn_time_for(50_000.0, 500.0);
        assert_relative_eq!(phase.dv_for(50_000.0, bt), 500.0, max_relative = 1e-12);
        assert!(phase.allow_shutdown);
    }

    #[test]
    fn rescaling() {
        let scale = Scale::new(6_556e3, 50_000.0, 3.986_004_418e14);
        let mut phase = Phase::free_burn(1, 50_000.0, 1e6, 300.0, 50.0, 100.0).with_jettison(500.0);
        phase.rescale(&scale, 0.01);
        assert!(phase.is_normalized());
        assert_relative_eq!(phase.m0, 1.0);
        assert_relative_eq!(phase.jettison.unwrap(), 0.01);
        assert_relative_eq!(phase.ve, phase.thrust / phase.mdot, max_relative = 1e-12);
        assert_relative_eq!(phase.max_bt * scale.time(), 100.0, max_relative = 1e-12);
        match phase.propagation {
            Propagation::Analytic { segments } => assert_eq!(segments, 12),
            Propagation::Numeric => panic!("burns default to the closed form"),
        }
        // Idempotent
        let before = phase.clone();
        phase.rescale(&scale, 0.01);
        assert_eq!(phase, before);
    }

    #[test]
    fn last_free_burn() {
        let mut phases = vec![
            Phase::fixed_burn(0, 1.0, 1.0, 300.0, 10.0),
            Phase::free_coast(0, 1.0, 10.0, 0.0, 100.0),
            Phase::free_burn(1, 1.0, 1.0, 300.0, 10.0, 20.0),
            Phase::fixed_coast(1, 1.0, 5.0),
        ];
        assert_eq!(mark_last_free_burn(&mut phases), Some(2));
        assert!(phases[2].last_free_burn);
        assert!(!phases[1].last_free_burn);
        assert!(phases[1].is_coast());
    }
}
