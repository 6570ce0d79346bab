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

mod dormand;
pub use self::dormand::*;

/// The `RK` trait defines an embedded Runge Kutta integrator.
///
/// Implementations must have the "first same as last" property: the last stage is evaluated at
/// the end of the step on the propagated solution, so that its derivative seeds the next step.
#[allow(clippy::upper_case_acronyms)]
pub trait RK
where
    Self: Sized,
{
    /// Returns the order of this integrator (as u8 because there probably isn't an order greater than 255).
    /// The order is used for the adaptive step size only to compute the error between estimates.
    const ORDER: u8;

    /// Returns the stages of this integrator (as usize because it's used as indexing)
    const STAGES: usize;

    /// Lower triangular part of the A coefficients of the Butcher table, row by row, of length
    /// STAGES * (STAGES - 1) / 2.
    /// *Warning:* this RK trait supposes that the implementation is consistent, i.e. c_i = \sum_j a_{ij}.
    const A_COEFFS: &'static [f64];
    /// The b_i coefficients of the propagated solution followed by the b^*_i coefficients of the
    /// embedded solution, of length 2 * STAGES.
    const B_COEFFS: &'static [f64];
}
