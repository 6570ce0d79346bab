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

use super::{Scale, TargetOrbit};
use crate::dynamics::ArcState;
use crate::linalg::Vector3;
use crate::utils::orbit_normal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of terminal residuals, constraints first and transversality conditions last.
pub const TERMINAL_LEN: usize = 6;

/// Below this sine of the inclination, the target is treated as equatorial.
const EQUATORIAL_SIN: f64 = 1e-6;

/// Below this eccentricity, the target is treated as circular.
const CIRCULAR_ECC: f64 = 1e-9;

/// Target orbit boundary conditions at the final time.
///
/// Each variant fixes some orbital quantities and leaves the rest free. The free quantities
/// contribute transversality conditions on the costates so that every variant yields exactly
/// [TERMINAL_LEN] residuals. With `L = r × pr + v × pv`, the projection of `L` on an axis is the
/// transversality condition of a rotation of the final orbit about that axis, and `H0` is the one
/// of a free position along the orbit.
///
/// Distances and velocities are in meters and meters per second until [Terminal::rescale] is
/// applied; angles are always in radians.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Terminal {
    /// Radius, speed, flight path angle and inclination are fixed, the node is free.
    ///
    /// Degenerate for equatorial targets, where the node is undefined.
    FlightPathAngle4Reduced {
        radius: f64,
        speed: f64,
        gamma: f64,
        inc: f64,
    },
    /// Angular momentum vector, radius and flight path angle are fixed.
    FlightPathAngle5 {
        radius: f64,
        speed: f64,
        gamma: f64,
        inc: f64,
        lan: f64,
    },
    /// Energy, angular momentum norm and inclination are fixed.
    ///
    /// Degenerate for circular targets, where the energy and angular momentum constraints
    /// coincide to first order.
    Kepler3 { sma: f64, ecc: f64, inc: f64 },
    /// Energy and angular momentum vector are fixed.
    Kepler4 {
        sma: f64,
        ecc: f64,
        inc: f64,
        lan: f64,
    },
    /// Energy, angular momentum vector and argument of periapsis are fixed.
    ///
    /// The residuals fix the line of apsides only: see [Terminal::apsides_aligned].
    Kepler5 {
        sma: f64,
        ecc: f64,
        inc: f64,
        lan: f64,
        argp: f64,
    },
}

impl Terminal {
    /// Builds the terminal condition of a target orbit about a body of gravitational parameter
    /// `mu`. Targets with an attachment radius are flight path angle conditions at that radius,
    /// reduced when the node is free. Other targets are Keplerian conditions, with as many fixed
    /// elements as the target provides.
    ///
    /// Equatorial targets have no node: their angular momentum vector is fixed instead. Circular
    /// targets have no periapsis and are attached at their radius, ignoring any argument of
    /// periapsis.
    pub fn from_target(target: &TargetOrbit, mu: f64) -> Self {
        let rp = target.periapsis.min(target.apoapsis);
        let ra = target.periapsis.max(target.apoapsis);
        let sma = (rp + ra) / 2.0;
        let ecc = (ra - rp) / (ra + rp);
        let inc = target.inc_deg.to_radians();
        let lan = match target.lan_deg {
            None if inc.sin().abs() < EQUATORIAL_SIN => Some(0.0),
            lan => lan.map(f64::to_radians),
        };

        let attach_radius = target
            .attach_radius
            .or_else(|| (ecc < CIRCULAR_ECC).then_some(rp));

        match attach_radius {
            Some(attach) => {
                let radius = attach.clamp(rp, ra);
                let speed = (mu * (2.0 / radius - 1.0 / sma)).sqrt();
                let hmag = (mu * sma * (1.0 - ecc * ecc)).sqrt();
                let gamma = (hmag / (radius * speed)).clamp(-1.0, 1.0).acos();
                match lan {
                    Some(lan) => Self::FlightPathAngle5 {
                        radius,
                        speed,
                        gamma,
                        inc,
                        lan,
                    },
                    None => Self::FlightPathAngle4Reduced {
                        radius,
                        speed,
                        gamma,
                        inc,
                    },
                }
            }
            None => match (lan, target.argp_deg.map(f64::to_radians)) {
                (None, _) => Self::Kepler3 { sma, ecc, inc },
                (Some(lan), None) => Self::Kepler4 { sma, ecc, inc, lan },
                (Some(lan), Some(argp)) => Self::Kepler5 {
                    sma,
                    ecc,
                    inc,
                    lan,
                    argp,
                },
            },
        }
    }

    /// Returns this condition in the units of `scale`.
    pub fn rescale(&self, scale: &Scale) -> Self {
        let (l, v) = (scale.length, scale.velocity);
        match *self {
            Self::FlightPathAngle4Reduced {
                radius,
                speed,
                gamma,
                inc,
            } => Self::FlightPathAngle4Reduced {
                radius: radius / l,
                speed: speed / v,
                gamma,
                inc,
            },
            Self::FlightPathAngle5 {
                radius,
                speed,
                gamma,
                inc,
                lan,
            } => Self::FlightPathAngle5 {
                radius: radius / l,
                speed: speed / v,
                gamma,
                inc,
                lan,
            },
            Self::Kepler3 { sma, ecc, inc } => Self::Kepler3 {
                sma: sma / l,
                ecc,
                inc,
            },
            Self::Kepler4 { sma, ecc, inc, lan } => Self::Kepler4 {
                sma: sma / l,
                ecc,
                inc,
                lan,
            },
            Self::Kepler5 {
                sma,
                ecc,
                inc,
                lan,
                argp,
            } => Self::Kepler5 {
                sma: sma / l,
                ecc,
                inc,
                lan,
                argp,
            },
        }
    }

    /// Number of fixed orbital quantities, i.e. of leading residuals which are constraints.
    pub fn constraints(&self) -> usize {
        match self {
            Self::FlightPathAngle4Reduced { .. } => 4,
            Self::FlightPathAngle5 { .. } => 5,
            Self::Kepler3 { .. } => 3,
            Self::Kepler4 { .. } => 4,
            Self::Kepler5 { .. } => 5,
        }
    }

    pub fn inc(&self) -> f64 {
        match *self {
            Self::FlightPathAngle4Reduced { inc, .. }
            | Self::FlightPathAngle5 { inc, .. }
            | Self::Kepler3 { inc, .. }
            | Self::Kepler4 { inc, .. }
            | Self::Kepler5 { inc, .. } => inc,
        }
    }

    /// Target speed at radius `r`, in nondimensional units once rescaled.
    pub fn speed_at(&self, r: f64) -> f64 {
        match *self {
            Self::FlightPathAngle4Reduced { speed, .. } | Self::FlightPathAngle5 { speed, .. } => {
                speed
            }
            Self::Kepler3 { sma, .. } | Self::Kepler4 { sma, .. } | Self::Kepler5 { sma, .. } => {
                (2.0 / r - 1.0 / sma).max(0.0).sqrt()
            }
        }
    }

    /// Computes the residuals of the final state and costate `yf`, which must be expressed in
    /// the units of this (rescaled) condition with a unit gravitational parameter.
    pub fn residuals(&self, yf: &ArcState) -> [f64; TERMINAL_LEN] {
        let r = &yf.r;
        let v = &yf.v;
        let hvec = yf.angular_momentum();
        let hmag = hvec.norm();
        let hhat = if hmag > 0.0 { hvec / hmag } else { Vector3::z() };
        let moment = yf.costate_moment();

        match *self {
            Self::FlightPathAngle4Reduced {
                radius,
                speed,
                gamma,
                inc,
            } => [
                r.norm_squared() - radius * radius,
                v.norm_squared() - speed * speed,
                r.dot(v) - radius * speed * gamma.sin(),
                hvec.z - hmag * inc.cos(),
                hhat.dot(&moment),
                moment.z,
            ],
            Self::FlightPathAngle5 {
                radius,
                speed,
                gamma,
                inc,
                lan,
            } => {
                let target = orbit_normal(inc, lan) * (radius * speed * gamma.cos());
                let dh = hvec - target;
                [
                    dh.x,
                    dh.y,
                    dh.z,
                    r.norm_squared() - radius * radius,
                    r.dot(v) - radius * speed * gamma.sin(),
                    hhat.dot(&moment),
                ]
            }
            Self::Kepler3 { sma, ecc, inc } => [
                yf.energy() + 0.5 / sma,
                hmag * hmag - sma * (1.0 - ecc * ecc),
                hvec.z - hmag * inc.cos(),
                hhat.dot(&moment),
                moment.z,
                yf.h0(),
            ],
            Self::Kepler4 { sma, ecc, inc, lan } => {
                let dh = hvec - orbit_normal(inc, lan) * (sma * (1.0 - ecc * ecc)).sqrt();
                [
                    yf.energy() + 0.5 / sma,
                    dh.x,
                    dh.y,
                    dh.z,
                    hhat.dot(&moment),
                    yf.h0(),
                ]
            }
            Self::Kepler5 {
                sma,
                ecc,
                inc,
                lan,
                argp,
            } => {
                let normal = orbit_normal(inc, lan);
                let dh = hvec - normal * (sma * (1.0 - ecc * ecc)).sqrt();
                // In plane direction perpendicular to the target periapsis
                let across = normal.cross(&periapsis_direction(inc, lan, argp));
                [
                    yf.energy() + 0.5 / sma,
                    dh.x,
                    dh.y,
                    dh.z,
                    eccentricity_vector(yf).dot(&across),
                    yf.h0(),
                ]
            }
        }
    }
}

impl Terminal {
    /// Returns whether the eccentricity vector of `yf` points towards the target periapsis rather
    /// than away from it. Only [Terminal::Kepler5] can converge the wrong way round, onto the
    /// orbit whose periapsis and apoapsis are swapped.
    pub fn apsides_aligned(&self, yf: &ArcState) -> bool {
        match *self {
            Self::Kepler5 { inc, lan, argp, .. } => {
                eccentricity_vector(yf).dot(&periapsis_direction(inc, lan, argp)) > 0.0
            }
            _ => true,
        }
    }
}

/// Eccentricity vector of `yf`, with a unit gravitational parameter.
fn eccentricity_vector(yf: &ArcState) -> Vector3<f64> {
    let (r, v) = (&yf.r, &yf.v);
    (v.norm_squared() - 1.0 / r.norm()) * r - r.dot(v) * v
}

/// Unit direction of the periapsis of an orbit of the provided orientation, in radians.
fn periapsis_direction(inc: f64, lan: f64, argp: f64) -> Vector3<f64> {
    let node = Vector3::new(lan.cos(), lan.sin(), 0.0);
    node * argp.cos() + orbit_normal(inc, lan).cross(&node) * argp.sin()
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::FlightPathAngle4Reduced {
                radius,
                speed,
                gamma,
                inc,
            } => write!(
                f,
                "FPA4 (free node): r = {radius:.6}, v = {speed:.6}, fpa = {:.3} deg, inc = {:.3} deg",
                gamma.to_degrees(),
                inc.to_degrees()
            ),
            Self::FlightPathAngle5 {
                radius,
                speed,
                gamma,
                inc,
                lan,
            } => write!(
                f,
                "FPA5: r = {radius:.6}, v = {speed:.6}, fpa = {:.3} deg, inc = {:.3} deg, lan = {:.3} deg",
                gamma.to_degrees(),
                inc.to_degrees(),
                lan.to_degrees()
            ),
            Self::Kepler3 { sma, ecc, inc } => write!(
                f,
                "Kepler3: sma = {sma:.6}, ecc = {ecc:.6}, inc = {:.3} deg",
                inc.to_degrees()
            ),
            Self::Kepler4 { sma, ecc, inc, lan } => write!(
                f,
                "Kepler4: sma = {sma:.6}, ecc = {ecc:.6}, inc = {:.3} deg, lan = {:.3} deg",
                inc.to_degrees(),
                lan.to_degrees()
            ),
            Self::Kepler5 {
                sma,
                ecc,
                inc,
                lan,
                argp,
            } => write!(
                f,
                "Kepler5: sma = {sma:.6}, ecc = {ecc:.6}, inc = {:.3} deg, lan = {:.3} deg, argp = {:.3} deg",
                inc.to_degrees(),
                lan.to_degrees(),
                argp.to_degrees()
            ),
        }
    }
}
