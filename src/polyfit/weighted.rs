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

//! Weighted tangents, following the "ease in / ease out" keyframe convention where each tangent
//! carries a weight: the fraction of the segment duration covered by its Bezier control handle.
//! A weight of one third on both ends gives back the standard Hermite segment.

/// Number of Householder iterations used to invert the time curve.
const ITERATIONS: usize = 4;

/// Returns the Bezier parameter `s` at which the time curve with normalized control points
/// `0, out_weight, 1 - in_weight, 1` reaches `u`, for `u` in [0, 1].
///
/// Uses a fixed number of third order Householder iterations started from `u`.
pub(crate) fn weighted_parameter(u: f64, out_weight: f64, in_weight: f64) -> f64 {
    let p1 = out_weight;
    let p2 = 1.0 - in_weight;
    // X(s) = a s³ + b s² + c s
    let a = 1.0 - 3.0 * p2 + 3.0 * p1;
    let b = 3.0 * p2 - 6.0 * p1;
    let c = 3.0 * p1;

    let mut s = u.clamp(0.0, 1.0);
    for _ in 0..ITERATIONS {
        let f = ((a * s + b) * s + c) * s - u;
        if f == 0.0 {
            break;
        }
        let d1 = (3.0 * a * s + 2.0 * b) * s + c;
        let d2 = 6.0 * a * s + 2.0 * b;
        let d3 = 6.0 * a;

        let num = f * (6.0 * d1 * d1 - 3.0 * f * d2);
        let den = -6.0 * d1 * d1 * d1 + 6.0 * f * d1 * d2 - f * f * d3;
        let next = if den.abs() > f64::MIN_POSITIVE {
            s + num / den
        } else if d1.abs() > f64::MIN_POSITIVE {
            s - f / d1
        } else {
            break;
        };
        s = next.clamp(0.0, 1.0);
    }
    s
}
