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

use super::{ConfigError, ConfigRepr, InvalidConfigSnafu};
use crate::cosmic::{EARTH_GM, EARTH_RADIUS};
use crate::guidance::GuidanceOpts;
use crate::pvg::{Ascent, CoastSpec, StageInfo, TargetOrbit};
use serde::{Deserialize, Serialize};
use snafu::ensure;

fn earth_gm() -> f64 {
    EARTH_GM
}

fn earth_radius() -> f64 {
    EARTH_RADIUS
}

/// Vehicle, target and solver settings of an ascent, in meters, seconds and kilograms.
///
/// ```yaml
/// stages:
///   - stage: 0
///     m0: 50000.0
///     thrust: 1.0e6
///     isp: 300.0
///     max_bt: 100.0
/// target:
///   periapsis: 6556000.0
///   apoapsis: 6556000.0
///   attach_radius: 6556000.0
///   inc_deg: 0.0
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AscentConfig {
    pub stages: Vec<StageInfo>,
    pub target: TargetOrbit,
    #[serde(default)]
    pub coast: Option<CoastSpec>,
    #[serde(default)]
    pub guidance: GuidanceOpts,
    /// Gravitational parameter of the central body, in m^3/s^2
    #[serde(default = "earth_gm")]
    pub mu: f64,
    #[serde(default = "earth_radius")]
    pub body_radius: f64,
}

impl ConfigRepr for AscentConfig {}

impl AscentConfig {
    /// Checks the physical consistency of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            !self.stages.is_empty(),
            InvalidConfigSnafu {
                reason: "no stages defined"
            }
        );
        for (k, stage) in self.stages.iter().enumerate() {
            ensure!(
                stage.m0 > 0.0 && stage.thrust > 0.0 && stage.isp > 0.0 && stage.max_bt > 0.0,
                InvalidConfigSnafu {
                    reason: format!("stage {} must have a positive mass, thrust, Isp and burn time", stage.stage)
                }
            );
            ensure!(
                stage.burnout_mass() > 0.0,
                InvalidConfigSnafu {
                    reason: format!("stage {} burns more propellant than its mass", stage.stage)
                }
            );
            if let Some(prev) = k.checked_sub(1).map(|p| &self.stages[p]) {
                ensure!(
                    stage.stage > prev.stage && stage.m0 <= prev.burnout_mass(),
                    InvalidConfigSnafu {
                        reason: format!(
                            "stage {} must follow stage {} and be lighter than its burnout mass",
                            stage.stage, prev.stage
                        )
                    }
                );
            }
        }
        let target = &self.target;
        ensure!(
            target.periapsis > self.body_radius && target.apoapsis >= target.periapsis,
            InvalidConfigSnafu {
                reason: format!("target {target} is not above the central body")
            }
        );
        if let Some(attach) = target.attach_radius {
            ensure!(
                attach >= target.periapsis && attach <= target.apoapsis,
                InvalidConfigSnafu {
                    reason: format!("attachment radius {attach} m is not on the target orbit")
                }
            );
        }
        if let Some(coast) = self.coast {
            ensure!(
                self.stages[1..].iter().any(|s| s.stage == coast.before_stage),
                InvalidConfigSnafu {
                    reason: format!("no upper stage {} to coast before", coast.before_stage)
                }
            );
            ensure!(
                coast.duration >= 0.0 && coast.min <= coast.max,
                InvalidConfigSnafu {
                    reason: "coast bounds are inconsistent"
                }
            );
        }
        ensure!(
            self.mu > 0.0 && self.body_radius > 0.0,
            InvalidConfigSnafu {
                reason: "central body must have a positive gravitational parameter and radius"
            }
        );
        Ok(())
    }

    /// Validates this configuration and builds its ascent.
    pub fn ascent(&self) -> Result<Ascent, ConfigError> {
        self.validate()?;
        let ascent = Ascent::new(self.stages.clone(), self.target);
        Ok(match self.coast {
            Some(coast) => ascent.with_coast(coast),
            None => ascent,
        })
    }
}
