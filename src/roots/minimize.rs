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

use super::{InvalidIntervalSnafu, MaxIterationsSnafu, NonFiniteValueSnafu, RootError};
use snafu::ensure;

/// Golden section ratio used when parabolic steps are rejected.
const CGOLD: f64 = 0.381_966_011_250_105_1;
/// Protects against a zero relative tolerance when the minimum is at zero.
const ZEPS: f64 = 1e-12;

/// Minimizes `f` over `[a, b]` with Brent's method. Returns `(x, f(x))`.
///
/// The tolerance is relative to `|x|` (plus a tiny absolute floor), and the function is assumed
/// to be unimodal in the interval.
pub fn brent_minimize<F>(
    mut f: F,
    a: f64,
    b: f64,
    tol: f64,
    max_iter: usize,
) -> Result<(f64, f64), RootError>
where
    F: FnMut(f64) -> f64,
{
    ensure!(
        a.is_finite() && b.is_finite() && a != b,
        InvalidIntervalSnafu { a, b }
    );
    let (mut a, mut b) = if a < b { (a, b) } else { (b, a) };

    let mut x = a + CGOLD * (b - a);
    let mut w = x;
    let mut v = x;
    let mut fx = f(x);
    ensure!(fx.is_finite(), NonFiniteValueSnafu { x, value: fx });
    let mut fw = fx;
    let mut fv = fx;
    let mut d: f64 = 0.0;
    let mut e: f64 = 0.0;

    for _ in 0..max_iter {
        let xm = 0.5 * (a + b);
        let tol1 = tol * x.abs() + ZEPS;
        let tol2 = 2.0 * tol1;

        if (x - xm).abs() <= tol2 - 0.5 * (b - a) {
            return Ok((x, fx));
        }

        if e.abs() > tol1 {
            // Attempt a parabolic fit through x, v and w
            let r = (x - w) * (fx - fv);
            let mut q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            let etemp = e;
            e = d;
            if p.abs() >= (0.5 * q * etemp).abs() || p <= q * (a - x) || p >= q * (b - x) {
                e = if x >= xm { a - x } else { b - x };
                d = CGOLD * e;
            } else {
                d = p / q;
                let u = x + d;
                if u - a < tol2 || b - u < tol2 {
                    d = tol1.copysign(xm - x);
                }
            }
        } else {
            e = if x >= xm { a - x } else { b - x };
            d = CGOLD * e;
        }

        let u = if d.abs() >= tol1 {
            x + d
        } else {
            x + tol1.copysign(d)
        };
        let fu = f(u);
        ensure!(fu.is_finite(), NonFiniteValueSnafu { x: u, value: fu });

        if fu <= fx {
            if u >= x {
                a = x;
            } else {
                b = x;
            }
            v = w;
            fv = fw;
            w = x;
            fw = fx;
            x = u;
            fx = fu;
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                v = w;
                fv = fw;
                w = u;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }

    MaxIterationsSnafu { max_iter }.fail()
}

#[cfg(test)]
mod ut_minimize {
    use super::*;

    #[test]
    fn parabola() {
        let (x, y) = brent_minimize(|x| (x - 1.25).powi(2) + 0.5, -3.0, 4.0, 1e-10, 100).unwrap();
        assert!((x - 1.25).abs() < 1e-8);
        assert!((y - 0.5).abs() < 1e-14);
    }

    #[test]
    fn cosine_reversed_bounds() {
        let (x, _) = brent_minimize(|x: f64| x.cos(), 5.0, 1.0, 1e-10, 100).unwrap();
        assert!((x - std::f64::consts::PI).abs() < 1e-7);
    }

    #[test]
    fn failures() {
        assert!(matches!(
            brent_minimize(|x| x * x, 1.0, 1.0, 1e-8, 100),
            Err(RootError::InvalidInterval { .. })
        ));
        assert_eq!(
            brent_minimize(|x: f64| (x - 0.1).abs().sqrt(), -1.0, 1.0, 1e-15, 3),
            Err(RootError::MaxIterations { max_iter: 3 })
        );
    }
}
