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

use super::{Scale, Terminal};
use crate::dynamics::ArcState;
use crate::linalg::Vector3;
use crate::time::Epoch;
use std::fmt;

/// Normalized statement of a guidance problem: where the vehicle is now and where it must go.
///
/// The state and the terminal condition are stored in the units of the problem's [Scale], built
/// from the initial radius and mass. A problem is immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct Problem {
    pub scale: Scale,
    /// Epoch of the initial state, i.e. of nondimensional time zero
    pub epoch: Epoch,
    pub r0: Vector3<f64>,
    pub v0: Vector3<f64>,
    pub m0: f64,
    /// Unit initial guess of the thrust direction
    pub u0: Vector3<f64>,
    /// Gravitational parameter of the central body, in m^3/s^2
    pub mu: f64,
    /// Radius of the central body, in meters
    pub body_radius: f64,
    pub terminal: Terminal,
}

impl Problem {
    /// Builds a problem from a physical state (m, m/s, kg) and a terminal condition in physical
    /// units. If the heading guess `u0` is degenerate, the velocity direction is used instead.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        epoch: Epoch,
        r0: Vector3<f64>,
        v0: Vector3<f64>,
        m0: f64,
        u0: Vector3<f64>,
        mu: f64,
        body_radius: f64,
        terminal: Terminal,
    ) -> Self {
        let scale = Scale::new(r0.norm(), m0, mu);
        let u0 = match u0.try_normalize(f64::EPSILON) {
            Some(u) if u.iter().all(|x| x.is_finite()) => u,
            _ => v0.try_normalize(f64::EPSILON).unwrap_or_else(|| r0.normalize()),
        };
        Self {
            scale,
            epoch,
            r0: scale.nd_position(&r0),
            v0: scale.nd_velocity(&v0),
            m0: m0 / scale.mass,
            u0,
            mu,
            body_radius,
            terminal: terminal.rescale(&scale),
        }
    }

    /// Initial state with zero costates.
    pub fn initial_state(&self) -> ArcState {
        ArcState {
            r: self.r0,
            v: self.v0,
            m: self.m0,
            ..Default::default()
        }
    }

    /// Nondimensional time of `epoch`.
    pub fn nd_time(&self, epoch: Epoch) -> f64 {
        self.scale.nd_time(epoch - self.epoch)
    }

    /// Epoch of a nondimensional time.
    pub fn epoch_at(&self, t: f64) -> Epoch {
        self.epoch + self.scale.duration(t)
    }

    pub fn nd_body_radius(&self) -> f64 {
        self.body_radius / self.scale.length
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}: r0 = {:.6} m, v0 = {:.3} m/s, m0 = {:.3} kg, target {}",
            self.epoch,
            self.scale.position(&self.r0).norm(),
            self.scale.velocity(&self.v0).norm(),
            self.m0 * self.scale.mass,
            self.terminal
        )
    }
}
