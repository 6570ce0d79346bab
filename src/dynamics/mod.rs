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

use crate::linalg::DVector;
use snafu::Snafu;

/// The state and costate layout shared by every arc, and its equations of motion.
pub mod costate;
pub use self::costate::*;

/// The `Dynamics` trait handles and stores any equation of motion *and* the state is integrated.
///
/// Right hand sides are evaluated in place so that the integrator hot loop does not allocate.
pub trait Dynamics: Send + Sync {
    /// Length of the state vector these dynamics apply to.
    fn dimension(&self) -> usize;

    /// Writes the time derivative of `state` at time `t` into `deriv`.
    fn eom(&self, t: f64, state: &DVector<f64>, deriv: &mut DVector<f64>)
        -> Result<(), DynamicsError>;
}

#[derive(Debug, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DynamicsError {
    #[snafu(display("state is singular at t = {t}: {reason}"))]
    Singular { t: f64, reason: &'static str },
    #[snafu(display("expected a state of length {expected} but got {got}"))]
    WrongDimension { expected: usize, got: usize },
}
