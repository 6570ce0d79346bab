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

//! Piecewise cubic Hermite interpolation of vector valued samples.

use snafu::prelude::*;

pub mod hermite;
pub use hermite::*;
mod weighted;

/// Returns the cubic Hermite basis functions (h00, h10, h01, h11) at the normalized parameter
/// `s` in [0, 1]. The tangent terms h10 and h11 multiply tangents expressed per unit of `s`.
pub fn hermite_basis(s: f64) -> [f64; 4] {
    let s2 = s * s;
    let s3 = s2 * s;
    [
        2.0 * s3 - 3.0 * s2 + 1.0,
        s3 - 2.0 * s2 + s,
        -2.0 * s3 + 3.0 * s2,
        s3 - s2,
    ]
}

#[derive(Debug, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum InterpolationError {
    #[snafu(display("interpolant has no keyframes"))]
    NoKeyframes,
    #[snafu(display("expected vectors of length {expected} but got {got}"))]
    DimensionMismatch { expected: usize, got: usize },
    #[snafu(display("keyframe time {t} is not finite"))]
    InvalidTime { t: f64 },
}

#[test]
fn basis_partition_of_unity() {
    for i in 0..=10 {
        let s = f64::from(i) / 10.0;
        let [h00, _, h01, _] = hermite_basis(s);
        assert!((h00 + h01 - 1.0).abs() < 1e-15);
    }
    assert_eq!(hermite_basis(0.0), [1.0, 0.0, 0.0, 0.0]);
    assert_eq!(hermite_basis(1.0), [0.0, 0.0, 1.0, 0.0]);
}
