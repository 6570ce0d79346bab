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

use crate::linalg::Vector3;
use crate::time::Duration;
use serde::{Deserialize, Serialize};

/// Nondimensionalization of a guidance problem.
///
/// The three characteristic constants are the initial radius, the initial mass and the circular
/// velocity at the initial radius, so that the gravitational parameter is unity. Every other
/// scale is derived from these.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    /// Length scale, in meters
    pub length: f64,
    /// Velocity scale, in meters per second
    pub velocity: f64,
    /// Mass scale, in kilograms
    pub mass: f64,
}

impl Scale {
    /// Builds the scale of a problem starting at radius `r0` (m) with mass `m0` (kg) about a body
    /// of gravitational parameter `mu` (m^3/s^2).
    pub fn new(r0: f64, m0: f64, mu: f64) -> Self {
        Self {
            length: r0,
            velocity: (mu / r0).sqrt(),
            mass: m0,
        }
    }

    /// Time scale, in seconds
    pub fn time(&self) -> f64 {
        self.length / self.velocity
    }

    /// Acceleration scale, in meters per second squared
    pub fn acceleration(&self) -> f64 {
        self.velocity * self.velocity / self.length
    }

    /// Force scale, in Newtons
    pub fn force(&self) -> f64 {
        self.mass * self.acceleration()
    }

    /// Mass flow scale, in kilograms per second
    pub fn mass_flow(&self) -> f64 {
        self.mass / self.time()
    }

    /// Gravitational parameter (m^3/s^2) which this scale normalizes to unity.
    pub fn mu(&self) -> f64 {
        self.velocity * self.velocity * self.length
    }

    pub fn nd_position(&self, r: &Vector3<f64>) -> Vector3<f64> {
        r / self.length
    }

    pub fn nd_velocity(&self, v: &Vector3<f64>) -> Vector3<f64> {
        v / self.velocity
    }

    pub fn position(&self, r: &Vector3<f64>) -> Vector3<f64> {
        r * self.length
    }

    pub fn velocity(&self, v: &Vector3<f64>) -> Vector3<f64> {
        v * self.velocity
    }

    /// Converts a duration into nondimensional time.
    pub fn nd_time(&self, duration: Duration) -> f64 {
        duration.to_seconds() / self.time()
    }

    /// Converts a nondimensional time into a duration.
    pub fn duration(&self, t: f64) -> Duration {
        Duration::from_seconds(t * self.time())
    }
}

#[cfg(test)]
mod ut_scale {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn earth_scale() {
        let mu = 3.986_004_418e14;
        let scale = Scale::new(6_556e3, 50_000.0, mu);
        assert_relative_eq!(scale.mu(), mu, max_relative = 1e-14);
        assert_relative_eq!(scale.velocity, 7797.3, max_relative = 1e-4);
        // Unit gravity at the initial radius
        assert_relative_eq!(scale.acceleration(), mu / 6_556e3_f64.powi(2), max_relative = 1e-14);
        assert_relative_eq!(
            scale.mass_flow() * scale.time(),
            scale.mass,
            max_relative = 1e-14
        );
        let t = scale.nd_time(Duration::from_seconds(120.0));
        assert_relative_eq!(scale.duration(t).to_seconds(), 120.0, max_relative = 1e-12);
    }
}
