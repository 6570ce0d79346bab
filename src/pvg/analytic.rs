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

//! Closed form propagation of powered arcs in vacuum.
//!
//! Over each segment, gravity is linearized about a predicted midpoint `rc` of the segment, so
//! that `y = r - 1.5 rc` obeys `y'' = G y + a(t) u(t)` with `G = (3 r̂r̂ᵀ - I) / |rc|³`. Along
//! `r̂` the homogeneous solution is hyperbolic, across it is harmonic. The costates obey the same
//! homogeneous system and are therefore exact closed forms, while the thrust contributions are
//! integrated with an eight point Gauss Legendre rule.

use crate::dynamics::{ArcState, CostateDynamics, DynamicsError, SingularSnafu};
use crate::linalg::{DVector, Vector3};
use crate::polyfit::HermiteSpline;
use crate::propagators::{
    CancelledSnafu, DenseOutputSnafu, DynamicsSnafu, NonFiniteStateSnafu, PropagationError,
};
use crate::utils::CancelToken;
use snafu::{ensure, ResultExt};

const GL_NODES: [f64; 4] = [
    0.183_434_642_495_649_8,
    0.525_532_409_916_329_0,
    0.796_666_477_413_626_7,
    0.960_289_856_497_536_3,
];
const GL_WEIGHTS: [f64; 4] = [
    0.362_683_783_378_362_0,
    0.313_706_645_877_887_3,
    0.222_381_034_453_374_5,
    0.101_228_536_290_376_3,
];

/// Homogeneous transition operators of the gravity gradient linearized about one point.
struct Linearized {
    rhat: Vector3<f64>,
    k_par: f64,
    k_perp: f64,
}

impl Linearized {
    fn about(rc: &Vector3<f64>) -> Self {
        let rho = rc.norm();
        let rho3 = rho * rho * rho;
        Self {
            rhat: rc / rho,
            k_par: (2.0 / rho3).sqrt(),
            k_perp: (1.0 / rho3).sqrt(),
        }
    }

    fn split(&self, x: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
        let par = self.rhat * self.rhat.dot(x);
        (par, x - par)
    }

    /// C(τ) x
    fn c(&self, tau: f64, x: &Vector3<f64>) -> Vector3<f64> {
        let (par, perp) = self.split(x);
        par * (self.k_par * tau).cosh() + perp * (self.k_perp * tau).cos()
    }

    /// S(τ) x, where S' = C
    fn s(&self, tau: f64, x: &Vector3<f64>) -> Vector3<f64> {
        let (par, perp) = self.split(x);
        par * ((self.k_par * tau).sinh() / self.k_par)
            + perp * ((self.k_perp * tau).sin() / self.k_perp)
    }

    /// G S(τ) x, where C' = G S
    fn gs(&self, tau: f64, x: &Vector3<f64>) -> Vector3<f64> {
        let (par, perp) = self.split(x);
        par * (self.k_par * (self.k_par * tau).sinh())
            - perp * (self.k_perp * (self.k_perp * tau).sin())
    }
}

/// Propagates `start` over a single segment of duration `h` (which may be negative).
pub fn vacuum_segment(
    start: &ArcState,
    h: f64,
    arc: &CostateDynamics,
) -> Result<ArcState, DynamicsError> {
    let rs = start.r.norm();
    ensure!(
        rs > 0.0 && rs.is_finite(),
        SingularSnafu {
            t: h,
            reason: "radius is zero or not finite"
        }
    );
    let m_end = start.m - arc.mdot * h;
    ensure!(
        start.m > 0.0 && m_end > 0.0,
        SingularSnafu {
            t: h,
            reason: "mass is depleted"
        }
    );

    let u_start = start.thrust_direction(arc.frozen.as_ref());
    let accel_start = -start.r / (rs * rs * rs) + (arc.thrust / start.m) * u_start;
    let rc = start.r + start.v * (h / 2.0) + accel_start * (h * h / 8.0);
    let lin = Linearized::about(&rc);

    let primer = |tau: f64| lin.c(tau, &start.pv) - lin.s(tau, &start.pr);

    // Thrust integrals
    let mut iy = Vector3::zeros();
    let mut iv = Vector3::zeros();
    let mut ipm = 0.0;
    if arc.thrust > 0.0 {
        let half = h / 2.0;
        for (node, weight) in GL_NODES.iter().zip(GL_WEIGHTS.iter()) {
            for sigma in [half * (1.0 - node), half * (1.0 + node)] {
                let pv = primer(sigma);
                let u = match arc.frozen {
                    Some(dir) => dir,
                    None => {
                        let norm = pv.norm();
                        if norm > 0.0 {
                            pv / norm
                        } else {
                            Vector3::zeros()
                        }
                    }
                };
                let m = start.m - arc.mdot * sigma;
                let accel = arc.thrust / m;
                let f = u * accel;
                let w = weight * half;
                iy += lin.s(h - sigma, &f) * w;
                iv += lin.c(h - sigma, &f) * w;
                ipm += accel * pv.dot(&u) / m * w;
            }
        }
    }

    let y0 = start.r - 1.5 * rc;
    let dv = if arc.thrust <= 0.0 {
        0.0
    } else if arc.mdot > 0.0 {
        (arc.thrust / arc.mdot) * (start.m / m_end).ln()
    } else {
        arc.thrust / start.m * h
    };

    Ok(ArcState {
        r: 1.5 * rc + lin.c(h, &y0) + lin.s(h, &start.v) + iy,
        v: lin.gs(h, &y0) + lin.c(h, &start.v) + iv,
        pv: primer(h),
        pr: lin.c(h, &start.pr) - lin.gs(h, &start.pv),
        m: m_end,
        pm: start.pm + ipm,
        dv: start.dv + dv,
    })
}

/// Propagates `start` over `duration` split into `segments` equal segments.
pub fn propagate_analytic(
    start: &ArcState,
    duration: f64,
    segments: usize,
    arc: &CostateDynamics,
    cancel: &CancelToken,
) -> Result<ArcState, PropagationError> {
    let segments = segments.max(1);
    let h = duration / segments as f64;
    let mut state = *start;
    for i in 0..segments {
        let t = h * i as f64;
        ensure!(!cancel.is_cancelled(), CancelledSnafu { t });
        state = vacuum_segment(&state, h, arc).context(DynamicsSnafu)?;
        ensure!(
            state.to_dvector().iter().all(|x| x.is_finite()),
            NonFiniteStateSnafu { t: t + h }
        );
    }
    Ok(state)
}

/// Propagates like [propagate_analytic] while sampling `per_segment` points per segment into
/// `spline`, whose times are offset by `t0`. Returns the final state and whether the radius
/// dropped below `min_radius` at any sample.
#[allow(clippy::too_many_arguments)]
pub fn sample_analytic(
    start: &ArcState,
    t0: f64,
    duration: f64,
    segments: usize,
    per_segment: usize,
    arc: &CostateDynamics,
    min_radius: f64,
    spline: &mut HermiteSpline,
) -> Result<(ArcState, bool), PropagationError> {
    let segments = segments.max(1);
    let per_segment = per_segment.max(1);
    let h = duration / segments as f64;
    let mut below = start.r.norm() < min_radius;
    let mut add = |t: f64, s: &ArcState| -> Result<(), PropagationError> {
        let deriv = arc.derivative(t, s).context(DynamicsSnafu)?;
        let y: DVector<f64> = s.to_dvector();
        spline
            .add_with_tangent(t0 + t, &y, &deriv.to_dvector())
            .context(DenseOutputSnafu { t: t0 + t })
    };

    add(0.0, start)?;
    let mut state = *start;
    for i in 0..segments {
        let ts = h * i as f64;
        for j in 1..per_segment {
            let tau = h * j as f64 / per_segment as f64;
            let inner = vacuum_segment(&state, tau, arc).context(DynamicsSnafu)?;
            below |= inner.r.norm() < min_radius;
            add(ts + tau, &inner)?;
        }
        state = vacuum_segment(&state, h, arc).context(DynamicsSnafu)?;
        below |= state.r.norm() < min_radius;
        add(ts + h, &state)?;
    }
    Ok((state, below))
}

#[cfg(test)]
mod ut_analytic {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn start() -> ArcState {
        ArcState {
            r: Vector3::new(1.0, 0.0, 0.0),
            v: Vector3::new(0.0, 0.96, 0.0),
            pv: Vector3::new(0.3, 1.0, 0.05),
            pr: Vector3::new(-0.2, 0.1, 0.0),
            m: 1.0,
            pm: 0.0,
            dv: 0.0,
        }
    }

    #[test]
    fn zero_duration_is_identity() {
        let arc = CostateDynamics::burn(2.0, 5.0);
        let s = start();
        let end = vacuum_segment(&s, 0.0, &arc).unwrap();
        assert_abs_diff_eq!((end.r - s.r).norm(), 0.0, epsilon = 1e-15);
        assert_abs_diff_eq!((end.v - s.v).norm(), 0.0, epsilon = 1e-15);
        assert_abs_diff_eq!((end.pr - s.pr).norm(), 0.0, epsilon = 1e-15);
        assert_eq!(end.m, 1.0);
    }

    #[test]
    fn closed_form_mass_and_dv() {
        let arc = CostateDynamics::burn(2.0, 5.0);
        let end = propagate_analytic(&start(), 0.1, 10, &arc, &CancelToken::new()).unwrap();
        assert_abs_diff_eq!(end.m, 0.5, epsilon = 1e-14);
        // ve = thrust / mdot
        assert_abs_diff_eq!(end.dv, 0.4 * 2.0_f64.ln(), epsilon = 1e-14);
    }

    #[test]
    fn depleted_mass() {
        let arc = CostateDynamics::burn(2.0, 5.0);
        assert!(propagate_analytic(&start(), 0.3, 10, &arc, &CancelToken::new()).is_err());
    }

    #[test]
    fn cancelled() {
        let arc = CostateDynamics::burn(2.0, 5.0);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            propagate_analytic(&start(), 0.1, 10, &arc, &cancel),
            Err(PropagationError::Cancelled { .. })
        ));
    }

    #[test]
    fn sampling_matches_propagation() {
        let arc = CostateDynamics::burn(2.0, 5.0);
        let cancel = CancelToken::new();
        let end = propagate_analytic(&start(), 0.1, 8, &arc, &cancel).unwrap();
        let mut spline = HermiteSpline::new(15);
        let (sampled, below) =
            sample_analytic(&start(), 1.0, 0.1, 8, 3, &arc, 0.5, &mut spline).unwrap();
        assert!(!below);
        assert_eq!(spline.len(), 8 * 3 + 1);
        assert_eq!(sampled, end);
        assert_abs_diff_eq!(spline.max_time().unwrap(), 1.1, epsilon = 1e-14);
        let last = spline.evaluate(1.1).unwrap();
        assert_abs_diff_eq!(last[ArcState::M], end.m, epsilon = 1e-14);
    }
}
