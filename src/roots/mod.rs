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

//! Scalar root finding and minimization.
//!
//! Both solvers are derivative free and follow Brent's classic algorithms: the root solver mixes
//! bisection, secant and inverse quadratic interpolation steps, and the minimizer mixes golden
//! section and successive parabolic interpolation steps.

use snafu::prelude::*;

mod brent;
pub use brent::*;
mod minimize;
pub use minimize::*;

/// Selects which side of a sign change is returned by the root solver.
///
/// Event detection needs the root on the side of the crossing matching the event direction, so
/// that the function has actually changed sign at the returned abscissa.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RootSide {
    /// Return the best estimate of the root, regardless of sign.
    #[default]
    Closest,
    /// Return the end of the final bracket where the function is non-negative.
    Positive,
    /// Return the end of the final bracket where the function is non-positive.
    Negative,
}

#[derive(Debug, Snafu, PartialEq)]
#[snafu(visibility(pub(crate)))]
pub enum RootError {
    #[snafu(display("[{a}, {b}] does not bracket a root: f(a) = {fa:e}, f(b) = {fb:e}"))]
    NotBracketed { a: f64, b: f64, fa: f64, fb: f64 },
    #[snafu(display("root solver exceeded {max_iter} iterations"))]
    MaxIterations { max_iter: usize },
    #[snafu(display("invalid search interval [{a}, {b}]"))]
    InvalidInterval { a: f64, b: f64 },
    #[snafu(display("function evaluated to {value} at {x}"))]
    NonFiniteValue { x: f64, value: f64 },
}
