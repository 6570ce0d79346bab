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

use super::{Dynamics, DynamicsError, SingularSnafu, WrongDimensionSnafu};
use crate::linalg::{DVector, Vector3};
use snafu::ensure;

/// Length of the state and costate vector of every arc.
pub const ARC_STATE_LEN: usize = 15;

/// State and costate of the vehicle along an arc, in nondimensional units.
///
/// The flat layout is position (0..3), velocity (3..6), primer vector (6..9), position costate
/// (9..12), mass (12), mass costate (13) and an accumulated scalar (14). The accumulated scalar
/// is the ΔV gained since the start of the arc in propagated vectors, and the arc duration in
/// the initial vectors of the optimizer.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ArcState {
    pub r: Vector3<f64>,
    pub v: Vector3<f64>,
    pub pv: Vector3<f64>,
    pub pr: Vector3<f64>,
    pub m: f64,
    pub pm: f64,
    pub dv: f64,
}

impl ArcState {
    pub const R: usize = 0;
    pub const V: usize = 3;
    pub const PV: usize = 6;
    pub const PR: usize = 9;
    pub const M: usize = 12;
    pub const PM: usize = 13;
    pub const DV: usize = 14;

    /// Reads an arc state from a flat slice of at least [ARC_STATE_LEN] items.
    pub fn from_slice(y: &[f64]) -> Self {
        debug_assert!(y.len() >= ARC_STATE_LEN);
        Self {
            r: Vector3::new(y[0], y[1], y[2]),
            v: Vector3::new(y[3], y[4], y[5]),
            pv: Vector3::new(y[6], y[7], y[8]),
            pr: Vector3::new(y[9], y[10], y[11]),
            m: y[Self::M],
            pm: y[Self::PM],
            dv: y[Self::DV],
        }
    }

    /// Writes this arc state into a flat slice of at least [ARC_STATE_LEN] items.
    pub fn copy_to(&self, y: &mut [f64]) {
        debug_assert!(y.len() >= ARC_STATE_LEN);
        y[0..3].copy_from_slice(self.r.as_slice());
        y[3..6].copy_from_slice(self.v.as_slice());
        y[6..9].copy_from_slice(self.pv.as_slice());
        y[9..12].copy_from_slice(self.pr.as_slice());
        y[Self::M] = self.m;
        y[Self::PM] = self.pm;
        y[Self::DV] = self.dv;
    }

    pub fn to_dvector(&self) -> DVector<f64> {
        let mut y = DVector::zeros(ARC_STATE_LEN);
        self.copy_to(y.as_mut_slice());
        y
    }

    /// Unit thrust direction: the frozen direction if any, else the normalized primer vector.
    pub fn thrust_direction(&self, frozen: Option<&Vector3<f64>>) -> Vector3<f64> {
        match frozen {
            Some(dir) => *dir,
            None => {
                let norm = self.pv.norm();
                if norm > 0.0 {
                    self.pv / norm
                } else {
                    Vector3::zeros()
                }
            }
        }
    }

    /// Coasting part of the Hamiltonian, H0 = pr·v - pv·r/|r|³.
    pub fn h0(&self) -> f64 {
        let rn = self.r.norm();
        self.pr.dot(&self.v) - self.pv.dot(&self.r) / (rn * rn * rn)
    }

    /// Full Hamiltonian of an arc with the provided thrust and mass flow.
    pub fn hamiltonian(&self, thrust: f64, mdot: f64, frozen: Option<&Vector3<f64>>) -> f64 {
        if thrust == 0.0 {
            return self.h0();
        }
        let u = self.thrust_direction(frozen);
        self.h0() + thrust / self.m * self.pv.dot(&u) - self.pm * mdot
    }

    /// Specific angular momentum vector.
    pub fn angular_momentum(&self) -> Vector3<f64> {
        self.r.cross(&self.v)
    }

    /// L = r × pr + v × pv, the costate moment whose projections are the transversality
    /// conditions of rotationally free targets.
    pub fn costate_moment(&self) -> Vector3<f64> {
        self.r.cross(&self.pr) + self.v.cross(&self.pv)
    }

    /// Specific orbital energy with a unit gravitational parameter.
    pub fn energy(&self) -> f64 {
        0.5 * self.v.norm_squared() - 1.0 / self.r.norm()
    }

    /// Scales every costate (primer, position costate and mass costate) by `k`.
    pub fn scale_costates(&mut self, k: f64) {
        self.pv *= k;
        self.pr *= k;
        self.pm *= k;
    }
}

/// Equations of motion of the state and costate in an inverse square gravity field with a unit
/// gravitational parameter, under constant thrust and mass flow.
///
/// The thrust follows the primer vector unless a frozen direction is provided, in which case the
/// arc is unguided.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CostateDynamics {
    pub thrust: f64,
    pub mdot: f64,
    pub frozen: Option<Vector3<f64>>,
}

impl CostateDynamics {
    pub fn coast() -> Self {
        Self::default()
    }

    pub fn burn(thrust: f64, mdot: f64) -> Self {
        Self {
            thrust,
            mdot,
            frozen: None,
        }
    }

    pub fn unguided(thrust: f64, mdot: f64, direction: Vector3<f64>) -> Self {
        Self {
            thrust,
            mdot,
            frozen: Some(direction),
        }
    }

    /// Time derivative of an arc state.
    pub fn derivative(&self, t: f64, s: &ArcState) -> Result<ArcState, DynamicsError> {
        let rn = s.r.norm();
        ensure!(
            rn > 0.0 && rn.is_finite(),
            SingularSnafu {
                t,
                reason: "radius is zero or not finite"
            }
        );
        let r3 = rn * rn * rn;
        let r5 = r3 * rn * rn;

        let mut d = ArcState {
            r: s.v,
            v: -s.r / r3,
            pv: -s.pr,
            pr: s.pv / r3 - 3.0 * s.r.dot(&s.pv) * s.r / r5,
            m: -self.mdot,
            pm: 0.0,
            dv: 0.0,
        };

        if self.thrust > 0.0 {
            ensure!(
                s.m > 0.0,
                SingularSnafu {
                    t,
                    reason: "mass is depleted"
                }
            );
            let u = s.thrust_direction(self.frozen.as_ref());
            let accel = self.thrust / s.m;
            d.v += accel * u;
            d.pm = accel * s.pv.dot(&u) / s.m;
            d.dv = accel;
        }

        Ok(d)
    }
}

impl Dynamics for CostateDynamics {
    fn dimension(&self) -> usize {
        ARC_STATE_LEN
    }

    fn eom(
        &self,
        t: f64,
        state: &DVector<f64>,
        deriv: &mut DVector<f64>,
    ) -> Result<(), DynamicsError> {
        ensure!(
            state.len() == ARC_STATE_LEN && deriv.len() == ARC_STATE_LEN,
            WrongDimensionSnafu {
                expected: ARC_STATE_LEN,
                got: state.len()
            }
        );
        let s = ArcState::from_slice(state.as_slice());
        self.derivative(t, &s)?.copy_to(deriv.as_mut_slice());
        Ok(())
    }
}
