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

use super::{MaxIterationsSnafu, NonFiniteValueSnafu, NotBracketedSnafu, RootError, RootSide};
use snafu::ensure;
use std::f64::consts::SQRT_2;
use std::mem::swap;

/// Finds a root of `f` in the bracket `[a, b]` using Brent's method.
///
/// With [RootSide::Closest], the search stops once `|f(x)| <= tol` or once the bracket has
/// collapsed to machine precision. With a sided request, the search stops once the bracket is
/// narrower than `tol` and the end of the bracket on the requested side is returned.
///
/// If `f(a)` or `f(b)` is exactly zero, that end is returned immediately.
pub fn brent_solve<F>(
    mut f: F,
    a: f64,
    b: f64,
    tol: f64,
    max_iter: usize,
    side: RootSide,
) -> Result<f64, RootError>
where
    F: FnMut(f64) -> f64,
{
    let (mut xa, mut xb) = (a, b);
    let mut ya = f(xa);
    let mut yb = f(xb);
    ensure!(ya.is_finite(), NonFiniteValueSnafu { x: xa, value: ya });
    ensure!(yb.is_finite(), NonFiniteValueSnafu { x: xb, value: yb });

    if ya == 0.0 {
        return Ok(xa);
    } else if yb == 0.0 {
        return Ok(xb);
    }

    ensure!(
        ya * yb < 0.0,
        NotBracketedSnafu {
            a,
            b,
            fa: ya,
            fb: yb
        }
    );

    // Keep b as the best estimate so far.
    if ya.abs() < yb.abs() {
        swap(&mut xa, &mut xb);
        swap(&mut ya, &mut yb);
    }

    let (mut xc, mut yc, mut xd) = (xa, ya, xa);
    let mut flag = true;

    for _ in 0..max_iter {
        let collapsed = (xb - xa).abs() <= 4.0 * f64::EPSILON * xb.abs().max(1.0);
        let converged = match side {
            RootSide::Closest => yb == 0.0 || yb.abs() <= tol || collapsed,
            _ => yb == 0.0 || (xb - xa).abs() <= tol || collapsed,
        };
        if converged {
            return Ok(pick_side(xa, ya, xb, yb, side));
        }

        let mut s = if ya != yc && yb != yc {
            // Inverse quadratic interpolation
            xa * yb * yc / ((ya - yb) * (ya - yc))
                + xb * ya * yc / ((yb - ya) * (yb - yc))
                + xc * ya * yb / ((yc - ya) * (yc - yb))
        } else {
            // Secant
            xb - yb * (xb - xa) / (yb - ya)
        };

        let bisect_tol = 2.0 * f64::EPSILON * xb.abs();
        let cond1 = (s - xb) * (s - (3.0 * xa + xb) / 4.0) > 0.0;
        let cond2 = flag && (s - xb).abs() >= (xb - xc).abs() / 2.0;
        let cond3 = !flag && (s - xb).abs() >= (xc - xd).abs() / 2.0;
        let cond4 = flag && (xb - xc).abs() <= bisect_tol;
        let cond5 = !flag && (xc - xd).abs() <= bisect_tol;
        if cond1 || cond2 || cond3 || cond4 || cond5 || !s.is_finite() {
            s = 0.5 * (xa + xb);
            flag = true;
        } else {
            flag = false;
        }

        let ys = f(s);
        ensure!(ys.is_finite(), NonFiniteValueSnafu { x: s, value: ys });

        xd = xc;
        xc = xb;
        yc = yb;

        if ya * ys < 0.0 {
            xb = s;
            yb = ys;
        } else {
            xa = s;
            ya = ys;
        }

        if ya.abs() < yb.abs() {
            swap(&mut xa, &mut xb);
            swap(&mut ya, &mut yb);
        }
    }

    MaxIterationsSnafu { max_iter }.fail()
}

/// Finds a root of `f` starting from a single guess.
///
/// The search interval is expanded symmetrically around `guess` by a factor of √2 per attempt,
/// starting from `step`, until a sign change is found. The tightest bracket found is then handed
/// to [brent_solve].
pub fn brent_solve_from<F>(
    mut f: F,
    guess: f64,
    step: f64,
    tol: f64,
    max_iter: usize,
    side: RootSide,
) -> Result<f64, RootError>
where
    F: FnMut(f64) -> f64,
{
    let y0 = f(guess);
    ensure!(y0.is_finite(), NonFiniteValueSnafu { x: guess, value: y0 });
    if y0 == 0.0 {
        return Ok(guess);
    }

    let mut dx = if step != 0.0 {
        step.abs()
    } else {
        1e-3 * guess.abs().max(1.0)
    };

    let (mut prev_lo, mut prev_hi) = (guess, guess);
    for _ in 0..max_iter {
        let hi = guess + dx;
        let y_hi = f(hi);
        if y_hi.is_finite() && y_hi * y0 <= 0.0 {
            return brent_solve(f, prev_hi, hi, tol, max_iter, side);
        }

        let lo = guess - dx;
        let y_lo = f(lo);
        if y_lo.is_finite() && y_lo * y0 <= 0.0 {
            return brent_solve(f, lo, prev_lo, tol, max_iter, side);
        }

        prev_lo = lo;
        prev_hi = hi;
        dx *= SQRT_2;
    }

    NotBracketedSnafu {
        a: prev_lo,
        b: prev_hi,
        fa: f(prev_lo),
        fb: f(prev_hi),
    }
    .fail()
}

fn pick_side(xa: f64, ya: f64, xb: f64, yb: f64, side: RootSide) -> f64 {
    match side {
        RootSide::Closest => xb,
        RootSide::Positive => {
            if yb >= 0.0 {
                xb
            } else {
                xa
            }
        }
        RootSide::Negative => {
            if yb <= 0.0 {
                xb
            } else {
                xa
            }
        }
    }
}
