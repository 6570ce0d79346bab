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

use super::{NoPhasesSnafu, Optimizer, OptimizerError, OptimizerOpts, Phase, Problem, Terminal};
use crate::linalg::Vector3;
use crate::time::Epoch;
use crate::utils::direction_from_pitch_heading;
use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::fmt;
use typed_builder::TypedBuilder;

/// Margin applied to the ideal ΔV when choosing how many stages to fly.
pub const DV_MARGIN: f64 = 1.1;

/// Vehicle data of one stage, in physical units.
#[derive(Clone, Debug, PartialEq, TypedBuilder, Serialize, Deserialize)]
pub struct StageInfo {
    pub stage: usize,
    /// Mass at ignition (or current mass of the active stage), in kg
    pub m0: f64,
    /// Vacuum thrust, in N
    pub thrust: f64,
    /// Vacuum specific impulse, in s
    pub isp: f64,
    /// Burn time left in the stage, in s
    pub max_bt: f64,
    #[builder(default = true)]
    #[serde(default = "yes")]
    pub allow_shutdown: bool,
    #[builder(default)]
    #[serde(default)]
    pub unguided: bool,
}

fn yes() -> bool {
    true
}

impl StageInfo {
    fn phase(&self) -> Phase {
        Phase::fixed_burn(self.stage, self.m0, self.thrust, self.isp, self.max_bt)
    }

    /// Mass at burnout, in kg.
    pub fn burnout_mass(&self) -> f64 {
        self.phase().mass_after(self.m0, self.max_bt)
    }

    /// ΔV of the full stage, in m/s.
    pub fn dv(&self) -> f64 {
        self.phase().dv_for(self.m0, self.max_bt)
    }
}

/// Target orbit, in meters and degrees.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetOrbit {
    /// Periapsis radius
    pub periapsis: f64,
    /// Apoapsis radius
    pub apoapsis: f64,
    /// Radius of orbit insertion; `None` leaves the insertion point free along the orbit
    #[serde(default)]
    pub attach_radius: Option<f64>,
    pub inc_deg: f64,
    /// Longitude of the ascending node; `None` leaves it free
    #[serde(default)]
    pub lan_deg: Option<f64>,
    /// Argument of periapsis, only honored for an eccentric orbit with a fixed node and a free
    /// insertion point
    #[serde(default)]
    pub argp_deg: Option<f64>,
}

impl TargetOrbit {
    /// Circular orbit of radius `radius`, inserted at that radius.
    pub fn circular(radius: f64, inc_deg: f64) -> Self {
        Self {
            periapsis: radius,
            apoapsis: radius,
            attach_radius: Some(radius),
            inc_deg,
            lan_deg: None,
            argp_deg: None,
        }
    }

    pub fn sma(&self) -> f64 {
        (self.periapsis + self.apoapsis) / 2.0
    }
}

impl fmt::Display for TargetOrbit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:.3} x {:.3} km, inc {:.3} deg",
            self.periapsis / 1e3,
            self.apoapsis / 1e3,
            self.inc_deg
        )?;
        if let Some(lan) = self.lan_deg {
            write!(f, ", lan {lan:.3} deg")?;
        }
        if let Some(argp) = self.argp_deg {
            write!(f, ", argp {argp:.3} deg")?;
        }
        Ok(())
    }
}

/// Coast inserted before the ignition of a stage, in seconds.
#[derive(Copy, Clone, Debug, PartialEq, TypedBuilder, Serialize, Deserialize)]
pub struct CoastSpec {
    /// Stage whose ignition is delayed
    pub before_stage: usize,
    pub duration: f64,
    /// Whether the coast duration is optimized within `[min, max]`
    #[builder(default)]
    #[serde(default)]
    pub free: bool,
    #[builder(default)]
    #[serde(default)]
    pub min: f64,
    #[builder(default = f64::MAX)]
    #[serde(default = "unbounded")]
    pub max: f64,
}

fn unbounded() -> f64 {
    f64::MAX
}

/// Builds the phases of an ascent from the remaining stages of a vehicle.
///
/// Stages are flown in order until their ΔV covers the estimate required to reach the target.
/// Every kept stage but the last burns to depletion, the last one is a free burn, and the
/// stages left over are held in reserve for an overburn. A stage which may not shut down is
/// never the free burn: the next stage which may is kept after it. If no such stage remains,
/// every stage burns to depletion and only a free coast, if any, is left to optimize.
#[derive(Clone, Debug, PartialEq)]
pub struct Ascent {
    pub stages: Vec<StageInfo>,
    pub target: TargetOrbit,
    pub coast: Option<CoastSpec>,
}

impl Ascent {
    pub fn new(stages: Vec<StageInfo>, target: TargetOrbit) -> Self {
        Self {
            stages,
            target,
            coast: None,
        }
    }

    pub fn with_coast(mut self, coast: CoastSpec) -> Self {
        self.coast = Some(coast);
        self
    }

    /// Ideal ΔV to raise the orbital energy of a vehicle at `r` moving at `v` to the target one,
    /// in m/s.
    pub fn dv_estimate(&self, r: &Vector3<f64>, v: &Vector3<f64>, mu: f64) -> f64 {
        let energy = -mu / (2.0 * self.target.sma());
        let required = (2.0 * (energy + mu / r.norm())).max(0.0).sqrt();
        (required - v.norm()).max(0.0)
    }

    /// Returns the flown phases and the reserve phases, in physical units, for a ΔV of `dv`.
    pub fn phases(&self, dv: f64) -> Result<(Vec<Phase>, Vec<Phase>), OptimizerError> {
        ensure!(!self.stages.is_empty(), NoPhasesSnafu);

        // A stage which may not shut down cannot end the ascent early
        let mut kept = 0;
        let mut covered = 0.0;
        for stage in &self.stages {
            kept += 1;
            if stage.allow_shutdown && covered + stage.dv() >= dv {
                break;
            }
            covered += stage.dv();
        }

        let mut phases = Vec::with_capacity(kept + 1);
        let mut reserve = Vec::with_capacity(self.stages.len() - kept);
        for (k, stage) in self.stages.iter().enumerate() {
            let mut phase = if k + 1 == kept && stage.allow_shutdown {
                let bt = stage
                    .phase()
                    .burn_time_for(stage.m0, (dv - covered).max(0.0))
                    .clamp(0.01 * stage.max_bt, stage.max_bt);
                Phase::free_burn(stage.stage, stage.m0, stage.thrust, stage.isp, bt, stage.max_bt)
            } else if k >= kept {
                stage.phase().with_shutdown(stage.allow_shutdown)
            } else {
                stage.phase().with_shutdown(false)
            };
            if stage.unguided {
                phase = phase.unguided();
            }
            let jettison = k
                .checked_sub(1)
                .map(|prev| (self.stages[prev].burnout_mass() - stage.m0).max(0.0));

            if k >= kept {
                if let Some(mass) = jettison {
                    phase = phase.with_jettison(mass);
                }
                reserve.push(phase);
                continue;
            }

            match self.coast.filter(|c| c.before_stage == stage.stage && k > 0) {
                Some(coast) => {
                    let mut arc = if coast.free {
                        Phase::free_coast(stage.stage, stage.m0, coast.duration, coast.min, coast.max)
                    } else {
                        Phase::fixed_coast(stage.stage, stage.m0, coast.duration)
                    };
                    if let Some(mass) = jettison {
                        arc = arc.with_jettison(mass);
                    }
                    phases.push(arc);
                }
                None => {
                    if let Some(mass) = jettison {
                        phase = phase.with_jettison(mass);
                    }
                }
            }
            phases.push(phase);
        }

        Ok((phases, reserve))
    }

    /// Heading guess at `r`: horizontal, along the launch azimuth of the target inclination.
    pub fn heading_guess(&self, r: &Vector3<f64>) -> Vector3<f64> {
        let lat = (r.z / r.norm()).clamp(-1.0, 1.0).asin();
        let azimuth = (self.target.inc_deg.to_radians().cos() / lat.cos())
            .clamp(-1.0, 1.0)
            .asin();
        direction_from_pitch_heading(r, 0.0, azimuth.to_degrees())
    }

    /// Builds the optimizer of an ascent from a physical state, at `epoch`.
    pub fn optimizer(
        &self,
        epoch: Epoch,
        r: Vector3<f64>,
        v: Vector3<f64>,
        mu: f64,
        body_radius: f64,
        opts: OptimizerOpts,
    ) -> Result<Optimizer, OptimizerError> {
        ensure!(!self.stages.is_empty(), NoPhasesSnafu);
        let dv = DV_MARGIN * self.dv_estimate(&r, &v, mu);
        let (phases, reserve) = self.phases(dv)?;
        let problem = Problem::new(
            epoch,
            r,
            v,
            self.stages[0].m0,
            self.heading_guess(&r),
            mu,
            body_radius,
            Terminal::from_target(&self.target, mu),
        );
        Ok(Optimizer::new(problem, phases, opts)?.with_reserve(reserve))
    }
}

#[cfg(test)]
mod ut_ascent {
    use super::*;
    use approx::assert_relative_eq;

    fn stages() -> Vec<StageInfo> {
        vec![
            StageInfo::builder()
                .stage(0)
                .m0(120_000.0)
                .thrust(2e6)
                .isp(300.0)
                .max_bt(120.0)
                .build(),
            StageInfo::builder()
                .stage(1)
                .m0(30_000.0)
                .thrust(3e5)
                .isp(340.0)
                .max_bt(300.0)
                .build(),
            StageInfo::builder()
                .stage(2)
                .m0(5_000.0)
                .thrust(3e4)
                .isp(320.0)
                .max_bt(400.0)
                .build(),
        ]
    }

    #[test]
    fn keeps_stages_until_dv_is_covered() {
        let ascent = Ascent::new(stages(), TargetOrbit::circular(6_556e3, 28.5));
        let first = ascent.stages[0].dv();

        let (phases, reserve) = ascent.phases(0.5 * first).unwrap();
        assert_eq!(phases.len(), 1);
        assert_eq!(reserve.len(), 2);
        assert!(phases[0].optimize_time);
        assert!(phases[0].bt < ascent.stages[0].max_bt);
        assert!(phases[0].jettison.is_none());
        let dry = ascent.stages[0].burnout_mass() - 30_000.0;
        assert_relative_eq!(reserve[0].jettison.unwrap(), dry);

        let (phases, reserve) = ascent.phases(first + 100.0).unwrap();
        assert_eq!(phases.len(), 2);
        assert_eq!(reserve.len(), 1);
        assert!(!phases[0].optimize_time);
        assert!(!phases[0].allow_shutdown);
        assert_relative_eq!(phases[0].bt, 120.0);
        assert!(phases[1].optimize_time);
        assert_relative_eq!(phases[1].jettison.unwrap(), dry);
    }

    #[test]
    fn overshooting_dv_flies_every_stage() {
        let ascent = Ascent::new(stages(), TargetOrbit::circular(6_556e3, 0.0));
        let (phases, reserve) = ascent.phases(1e5).unwrap();
        assert_eq!(phases.len(), 3);
        assert!(reserve.is_empty());
        assert!(phases[2].last_free_burn || phases[2].optimize_time);
        assert_relative_eq!(phases[2].bt, 400.0);
    }

    #[test]
    fn coast_carries_the_jettison() {
        let coast = CoastSpec::builder()
            .before_stage(1)
            .duration(30.0)
            .free(true)
            .min(5.0)
            .max(200.0)
            .build();
        let ascent = Ascent::new(stages(), TargetOrbit::circular(6_556e3, 0.0)).with_coast(coast);
        let (phases, _) = ascent.phases(ascent.stages[0].dv() + 100.0).unwrap();
        assert_eq!(phases.len(), 3);
        assert!(phases[1].is_coast());
        assert!(phases[1].optimize_time);
        assert!(phases[1].jettison.is_some());
        assert!(phases[2].jettison.is_none());
        assert_eq!(phases[1].stage, 1);
    }

    #[test]
    fn stages_without_shutdown_burn_to_depletion() {
        let mut vehicle = stages();
        vehicle[0].allow_shutdown = false;
        let ascent = Ascent::new(vehicle, TargetOrbit::circular(6_556e3, 28.5));
        let first = ascent.stages[0].dv();

        // The first stage alone would do, but it may not be cut off
        let (phases, reserve) = ascent.phases(0.5 * first).unwrap();
        assert_eq!(phases.len(), 2);
        assert_eq!(reserve.len(), 1);
        assert!(!phases[0].optimize_time);
        assert!(!phases[0].allow_shutdown);
        assert_relative_eq!(phases[0].bt, 120.0);
        assert!(phases[1].optimize_time);
        assert!(phases[1].allow_shutdown);
        // Nothing left to make up after the first stage: the shortest burn is the guess
        assert_relative_eq!(phases[1].bt, 3.0);
        assert!(reserve[0].allow_shutdown);
    }

    #[test]
    fn no_stage_may_shut_down() {
        let mut vehicle = stages();
        for stage in &mut vehicle {
            stage.allow_shutdown = false;
        }
        let coast = CoastSpec::builder()
            .before_stage(2)
            .duration(30.0)
            .free(true)
            .min(5.0)
            .max(200.0)
            .build();
        let ascent = Ascent::new(vehicle, TargetOrbit::circular(6_556e3, 0.0)).with_coast(coast);
        let (phases, reserve) = ascent.phases(10.0).unwrap();
        assert!(reserve.is_empty());
        assert_eq!(phases.len(), 4);
        for burn in phases.iter().filter(|p| !p.is_coast()) {
            assert!(!burn.optimize_time);
            assert!(!burn.allow_shutdown);
            assert_relative_eq!(burn.bt, burn.max_bt);
        }
        // The coast is the only free phase left
        assert!(phases[2].is_coast());
        assert!(phases[2].optimize_time);
    }

    #[test]
    fn empty_vehicle() {
        let ascent = Ascent::new(Vec::new(), TargetOrbit::circular(6_556e3, 0.0));
        assert!(matches!(ascent.phases(10.0), Err(OptimizerError::NoPhases)));
    }

    #[test]
    fn heading_guess_is_horizontal() {
        let ascent = Ascent::new(stages(), TargetOrbit::circular(6_556e3, 0.0));
        let r = Vector3::new(6_556e3, 0.0, 0.0);
        let u = ascent.heading_guess(&r);
        assert_relative_eq!(u.dot(&r.normalize()), 0.0, epsilon = 1e-12);
        assert_relative_eq!(u, Vector3::y(), epsilon = 1e-12);
    }

    #[test]
    fn dv_estimate_circular() {
        let mu = 3.986004418e14;
        let r0 = 6_556e3;
        let ascent = Ascent::new(stages(), TargetOrbit::circular(r0, 0.0));
        let vc = (mu / r0).sqrt();
        let dv = ascent.dv_estimate(&Vector3::new(r0, 0.0, 0.0), &Vector3::new(0.0, 7_500.0, 0.0), mu);
        assert_relative_eq!(dv, vc - 7_500.0, max_relative = 1e-12);
    }
}
