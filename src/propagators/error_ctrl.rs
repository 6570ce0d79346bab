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

/// The Error Control trait manages how a propagator computes the error in the current step.
pub trait ErrorCtrl: Copy + Send + Sync {
    /// Computes the actual error of the current step.
    ///
    /// The `error_est` is the estimated error computed from the difference in the two stages of
    /// of the RK propagator. The `candidate` variable is the candidate state, and `cur_state` is
    /// the current state. This function must return the error.
    fn estimate(error_est: &DVector<f64>, candidate: &DVector<f64>, cur_state: &DVector<f64>)
        -> f64;
}

/// A largest error control which effectively computes the largest absolute error of any
/// component of the state.
#[derive(Clone, Copy, Debug, Default)]
pub struct LargestError;

impl ErrorCtrl for LargestError {
    fn estimate(
        error_est: &DVector<f64>,
        _candidate: &DVector<f64>,
        _cur_state: &DVector<f64>,
    ) -> f64 {
        error_est.iter().fold(0.0, |max, err| {
            if err.is_nan() {
                f64::INFINITY
            } else {
                max.max(err.abs())
            }
        })
    }
}

#[cfg(test)]
mod ut_error_ctrl {
    use super::*;

    #[test]
    fn largest_error() {
        let err = DVector::from_vec(vec![1e-9, -3e-9, 2e-9]);
        let zero = DVector::zeros(3);
        assert_eq!(LargestError::estimate(&err, &zero, &zero), 3e-9);

        let nan = DVector::from_vec(vec![1e-9, f64::NAN, 2e-9]);
        assert_eq!(LargestError::estimate(&nan, &zero, &zero), f64::INFINITY);
    }
}
