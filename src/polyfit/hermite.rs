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

use super::weighted::weighted_parameter;
use super::{hermite_basis, DimensionMismatchSnafu, InterpolationError, InvalidTimeSnafu};
use crate::linalg::DVector;
use snafu::ensure;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Weight of a tangent which yields a standard (unweighted) Hermite segment.
pub const DEFAULT_WEIGHT: f64 = 1.0 / 3.0;

/// A time tagged sample of the interpolated vector.
#[derive(Clone, Debug, PartialEq)]
pub struct Keyframe {
    pub time: f64,
    pub value: DVector<f64>,
    /// Tangent (per unit time) on the segment ending at this keyframe
    pub in_tangent: DVector<f64>,
    /// Tangent (per unit time) on the segment starting at this keyframe
    pub out_tangent: DVector<f64>,
    pub in_weight: f64,
    pub out_weight: f64,
    /// Tangents are recomputed from the neighbors when keyframes are added
    pub auto_tangent: bool,
}

/// Piecewise cubic Hermite spline through vector valued keyframes.
///
/// Keyframes are kept sorted by time in a vector. Evaluation caches the last bracketing segment,
/// so that marching queries skip the binary search. Outside of the keyframe times, the spline
/// extrapolates linearly along the boundary tangent.
#[derive(Debug)]
pub struct HermiteSpline {
    dim: usize,
    keys: Vec<Keyframe>,
    cache: AtomicUsize,
}

impl Clone for HermiteSpline {
    fn clone(&self) -> Self {
        Self {
            dim: self.dim,
            keys: self.keys.clone(),
            cache: AtomicUsize::new(self.cache.load(Ordering::Relaxed)),
        }
    }
}

impl HermiteSpline {
    pub fn new(dim: usize) -> Self {
        Self::with_capacity(dim, 0)
    }

    pub fn with_capacity(dim: usize, capacity: usize) -> Self {
        Self {
            dim,
            keys: Vec::with_capacity(capacity),
            cache: AtomicUsize::new(0),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keys
    }

    pub fn min_time(&self) -> Option<f64> {
        self.keys.first().map(|k| k.time)
    }

    pub fn max_time(&self) -> Option<f64> {
        self.keys.last().map(|k| k.time)
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.cache.store(0, Ordering::Relaxed);
    }

    /// Adds (or replaces) a keyframe whose tangents are computed from its neighbors.
    pub fn add(&mut self, time: f64, value: &DVector<f64>) -> Result<(), InterpolationError> {
        let zeros = DVector::zeros(self.dim);
        self.insert(Keyframe {
            time,
            value: value.clone(),
            in_tangent: zeros.clone(),
            out_tangent: zeros,
            in_weight: DEFAULT_WEIGHT,
            out_weight: DEFAULT_WEIGHT,
            auto_tangent: true,
        })
    }

    /// Adds (or replaces) a keyframe with the same tangent on both sides, e.g. the time
    /// derivative of an integrated state.
    pub fn add_with_tangent(
        &mut self,
        time: f64,
        value: &DVector<f64>,
        tangent: &DVector<f64>,
    ) -> Result<(), InterpolationError> {
        self.add_with_tangents(time, value, tangent, tangent)
    }

    /// Adds (or replaces) a keyframe with distinct in and out tangents.
    pub fn add_with_tangents(
        &mut self,
        time: f64,
        value: &DVector<f64>,
        in_tangent: &DVector<f64>,
        out_tangent: &DVector<f64>,
    ) -> Result<(), InterpolationError> {
        self.add_weighted(
            time,
            value,
            in_tangent,
            out_tangent,
            DEFAULT_WEIGHT,
            DEFAULT_WEIGHT,
        )
    }

    /// Adds (or replaces) a keyframe with weighted tangents. The weights are the fraction of the
    /// adjacent segment duration covered by each tangent handle.
    pub fn add_weighted(
        &mut self,
        time: f64,
        value: &DVector<f64>,
        in_tangent: &DVector<f64>,
        out_tangent: &DVector<f64>,
        in_weight: f64,
        out_weight: f64,
    ) -> Result<(), InterpolationError> {
        for got in [in_tangent.len(), out_tangent.len()] {
            ensure!(
                got == self.dim,
                DimensionMismatchSnafu {
                    expected: self.dim,
                    got
                }
            );
        }
        self.insert(Keyframe {
            time,
            value: value.clone(),
            in_tangent: in_tangent.clone(),
            out_tangent: out_tangent.clone(),
            in_weight,
            out_weight,
            auto_tangent: false,
        })
    }

    fn insert(&mut self, key: Keyframe) -> Result<(), InterpolationError> {
        ensure!(key.time.is_finite(), InvalidTimeSnafu { t: key.time });
        ensure!(
            key.value.len() == self.dim,
            DimensionMismatchSnafu {
                expected: self.dim,
                got: key.value.len()
            }
        );

        // Keyframes are mostly appended
        let index = match self.keys.last() {
            Some(last) if last.time < key.time => {
                self.keys.push(key);
                self.keys.len() - 1
            }
            _ => {
                let index = self.keys.partition_point(|k| k.time < key.time);
                if self.keys.get(index).map_or(false, |k| k.time == key.time) {
                    self.keys[index] = key;
                } else {
                    self.keys.insert(index, key);
                }
                index
            }
        };

        let lo = index.saturating_sub(1);
        let hi = (index + 1).min(self.keys.len() - 1);
        for i in lo..=hi {
            if self.keys[i].auto_tangent {
                self.update_auto_tangent(i);
            }
        }
        Ok(())
    }

    /// Sets the tangents of keyframe `i` to the mean of the finite difference slopes towards its
    /// neighbors, or the single slope at either end.
    fn update_auto_tangent(&mut self, i: usize) {
        let n = self.keys.len();
        let slope = |a: &Keyframe, b: &Keyframe| (&b.value - &a.value) / (b.time - a.time);
        let tangent = match (i > 0, i + 1 < n) {
            (true, true) => {
                (slope(&self.keys[i - 1], &self.keys[i]) + slope(&self.keys[i], &self.keys[i + 1]))
                    * 0.5
            }
            (true, false) => slope(&self.keys[i - 1], &self.keys[i]),
            (false, true) => slope(&self.keys[i], &self.keys[i + 1]),
            (false, false) => DVector::zeros(self.dim),
        };
        self.keys[i].in_tangent = tangent.clone();
        self.keys[i].out_tangent = tangent;
    }

    /// Returns the index `i` of the segment such that `keys[i].time <= t < keys[i + 1].time`.
    /// Requires at least two keyframes and `t` within the keyframe times.
    fn bracket(&self, t: f64) -> usize {
        let n = self.keys.len();
        let within = |i: usize| i + 1 < n && self.keys[i].time <= t && t < self.keys[i + 1].time;

        let cached = self.cache.load(Ordering::Relaxed);
        let index = if within(cached) {
            cached
        } else if within(cached + 1) {
            cached + 1
        } else {
            (self.keys.partition_point(|k| k.time <= t).max(1) - 1).min(n - 2)
        };
        self.cache.store(index, Ordering::Relaxed);
        index
    }

    /// Evaluates the spline at `t`.
    pub fn evaluate(&self, t: f64) -> Result<DVector<f64>, InterpolationError> {
        let mut out = DVector::zeros(self.dim);
        self.evaluate_into(t, &mut out)?;
        Ok(out)
    }

    /// Evaluates the spline at `t` into `out`, without allocating.
    pub fn evaluate_into(&self, t: f64, out: &mut DVector<f64>) -> Result<(), InterpolationError> {
        ensure!(
            out.len() == self.dim,
            DimensionMismatchSnafu {
                expected: self.dim,
                got: out.len()
            }
        );
        let (first, last) = match (self.keys.first(), self.keys.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(InterpolationError::NoKeyframes),
        };

        if t <= first.time || self.keys.len() == 1 {
            out.copy_from(&first.value);
            out.axpy(t - first.time, &first.in_tangent, 1.0);
            return Ok(());
        } else if t >= last.time {
            out.copy_from(&last.value);
            out.axpy(t - last.time, &last.out_tangent, 1.0);
            return Ok(());
        }

        let i = self.bracket(t);
        let (k0, k1) = (&self.keys[i], &self.keys[i + 1]);
        let dt = k1.time - k0.time;
        let u = (t - k0.time) / dt;

        let weighted = (k0.out_weight - DEFAULT_WEIGHT).abs() > f64::EPSILON
            || (k1.in_weight - DEFAULT_WEIGHT).abs() > f64::EPSILON;
        let (s, m0, m1) = if weighted {
            (
                weighted_parameter(u, k0.out_weight, k1.in_weight),
                3.0 * k0.out_weight * dt,
                3.0 * k1.in_weight * dt,
            )
        } else {
            (u, dt, dt)
        };

        let [h00, h10, h01, h11] = hermite_basis(s);
        out.copy_from(&k0.value);
        *out *= h00;
        out.axpy(h10 * m0, &k0.out_tangent, 1.0);
        out.axpy(h01, &k1.value, 1.0);
        out.axpy(h11 * m1, &k1.in_tangent, 1.0);
        Ok(())
    }
}

#[cfg(test)]
mod ut_hermite {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn scalar(x: f64) -> DVector<f64> {
        DVector::from_element(1, x)
    }

    #[test]
    fn exact_on_cubics() {
        // A cubic with exact derivatives is reproduced exactly
        let f = |t: f64| t.powi(3) - 2.0 * t + 1.0;
        let df = |t: f64| 3.0 * t.powi(2) - 2.0;
        let mut spline = HermiteSpline::new(1);
        for t in [0.0, 0.7, 1.5, 3.0] {
            spline.add_with_tangent(t, &scalar(f(t)), &scalar(df(t))).unwrap();
        }
        for i in 0..=30 {
            let t = f64::from(i) * 0.1;
            assert_abs_diff_eq!(spline.evaluate(t).unwrap()[0], f(t), epsilon = 1e-12);
        }
    }

    #[test]
    fn auto_tangents() {
        let mut spline = HermiteSpline::new(1);
        // Inserted out of order on purpose
        spline.add(2.0, &scalar(4.0)).unwrap();
        spline.add(0.0, &scalar(0.0)).unwrap();
        spline.add(1.0, &scalar(1.0)).unwrap();
        let keys = spline.keyframes();
        assert_eq!(keys[0].time, 0.0);
        assert_abs_diff_eq!(keys[0].out_tangent[0], 1.0);
        assert_abs_diff_eq!(keys[1].out_tangent[0], 2.0);
        assert_abs_diff_eq!(keys[2].in_tangent[0], 3.0);

        // Replacing a keyframe updates its neighbors
        spline.add(1.0, &scalar(2.0)).unwrap();
        assert_eq!(spline.len(), 3);
        assert_abs_diff_eq!(spline.keyframes()[0].out_tangent[0], 2.0);
        assert_abs_diff_eq!(spline.evaluate(1.0).unwrap()[0], 2.0);
    }

    #[test]
    fn extrapolation() {
        let mut spline = HermiteSpline::new(2);
        let v0 = DVector::from_vec(vec![1.0, 2.0]);
        let v1 = DVector::from_vec(vec![3.0, 2.0]);
        let d = DVector::from_vec(vec![2.0, 0.0]);
        spline.add_with_tangent(0.0, &v0, &d).unwrap();
        spline.add_with_tangent(1.0, &v1, &d).unwrap();
        let before = spline.evaluate(-0.5).unwrap();
        let after = spline.evaluate(2.0).unwrap();
        assert_abs_diff_eq!(before[0], 0.0);
        assert_abs_diff_eq!(after[0], 5.0);
        assert_abs_diff_eq!(after[1], 2.0);
    }

    #[test]
    fn errors() {
        let spline = HermiteSpline::new(3);
        assert_eq!(spline.evaluate(0.0), Err(InterpolationError::NoKeyframes));
        let mut spline = HermiteSpline::new(3);
        assert!(spline.add(0.0, &scalar(1.0)).is_err());
        assert!(spline.add(f64::NAN, &DVector::zeros(3)).is_err());
    }

    #[test]
    fn cache_survives_random_queries() {
        let mut spline = HermiteSpline::new(1);
        for i in 0..50 {
            let t = f64::from(i) * 0.2;
            spline.add_with_tangent(t, &scalar(t.sin()), &scalar(t.cos())).unwrap();
        }
        for t in [9.5, 0.1, 4.43, 4.45, 0.0, 7.77, 9.8] {
            assert_abs_diff_eq!(spline.evaluate(t).unwrap()[0], t.sin(), epsilon = 1e-4);
        }
    }
}
