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
use crate::utils::between_0_360;
use std::f64::consts::PI;
use std::fmt;

/// Eccentricities (and node vector norms) below this are treated as zero when computing angles.
const ANGLE_EPS: f64 = 1e-11;

/// Classical orbital elements of a Cartesian state. Distances are in whichever units the state
/// and gravitational parameter use; angles are in degrees.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct KeplerianElements {
    pub sma: f64,
    pub ecc: f64,
    pub inc_deg: f64,
    pub raan_deg: f64,
    pub aop_deg: f64,
    pub ta_deg: f64,
    /// Specific orbital energy
    pub energy: f64,
    /// Norm of the specific angular momentum
    pub hmag: f64,
}

impl KeplerianElements {
    /// Computes the elements of the state `(r, v)` about a body of gravitational parameter `mu`.
    ///
    /// For circular orbits the argument of periapsis is set to zero and the true anomaly is
    /// measured from the ascending node; for equatorial orbits the node is along +X.
    pub fn from_rv(r: &Vector3<f64>, v: &Vector3<f64>, mu: f64) -> Self {
        let rmag = r.norm();
        let hvec = r.cross(v);
        let hmag = hvec.norm();
        let energy = v.norm_squared() / 2.0 - mu / rmag;
        let evec = ((v.norm_squared() - mu / rmag) * r - r.dot(v) * v) / mu;
        let ecc = evec.norm();

        let inc = (hvec.z / hmag).clamp(-1.0, 1.0).acos();

        // Node vector, along +X for equatorial orbits
        let n = Vector3::z().cross(&hvec);
        let n_hat = if n.norm() > ANGLE_EPS * hmag {
            n.normalize()
        } else {
            Vector3::x()
        };
        let mut raan = n_hat.x.clamp(-1.0, 1.0).acos();
        if n_hat.y < 0.0 {
            raan = 2.0 * PI - raan;
        }

        let h_hat = hvec / hmag;
        let angle_in_plane = |from: &Vector3<f64>, to: &Vector3<f64>| {
            let cos = from.dot(to);
            let sin = h_hat.dot(&from.cross(to));
            sin.atan2(cos)
        };

        let (aop, ta) = if ecc > ANGLE_EPS {
            let e_hat = evec / ecc;
            (
                angle_in_plane(&n_hat, &e_hat),
                angle_in_plane(&e_hat, &(r / rmag)),
            )
        } else {
            (0.0, angle_in_plane(&n_hat, &(r / rmag)))
        };

        Self {
            sma: -mu / (2.0 * energy),
            ecc,
            inc_deg: inc.to_degrees(),
            raan_deg: between_0_360(raan.to_degrees()),
            aop_deg: between_0_360(aop.to_degrees()),
            ta_deg: between_0_360(ta.to_degrees()),
            energy,
            hmag,
        }
    }

    /// Periapsis radius
    pub fn periapsis(&self) -> f64 {
        self.sma * (1.0 - self.ecc)
    }

    /// Apoapsis radius, infinite for open orbits
    pub fn apoapsis(&self) -> f64 {
        if self.ecc < 1.0 {
            self.sma * (1.0 + self.ecc)
        } else {
            f64::INFINITY
        }
    }
}

impl fmt::Display for KeplerianElements {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let decimals = f.precision().unwrap_or(3);
        write!(
            f,
            "sma = {:.*}\tecc = {:.*}\tinc = {:.*} deg\traan = {:.*} deg\taop = {:.*} deg\tta = {:.*} deg",
            decimals,
            self.sma,
            decimals + 3,
            self.ecc,
            decimals,
            self.inc_deg,
            decimals,
            self.raan_deg,
            decimals,
            self.aop_deg,
            decimals,
            self.ta_deg
        )
    }
}
