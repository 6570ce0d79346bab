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

use crate::dynamics::DynamicsError;
use crate::polyfit::InterpolationError;
use crate::roots::RootError;
use snafu::prelude::*;
use std::fmt;

/// Provides different methods for controlling the error computation of the integrator.
pub mod error_ctrl;
pub use self::error_ctrl::*;

// Re-Export
mod events;
pub use events::*;
mod instance;
pub use instance::*;
mod rk_methods;
pub use rk_methods::*;
mod options;
pub use options::*;

/// Stores the details of the previous integration step of a given integrator.
#[derive(Copy, Clone, Debug, Default)]
pub struct IntegrationDetails {
    /// step size used
    pub step: f64,
    /// error in the previous integration step
    pub error: f64,
    /// number of attempts needed by an adaptive step size to be within the tolerance
    pub attempts: u8,
}

impl fmt::Display for IntegrationDetails {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "IntegrationDetails {{step: {:.3e}, error: {:.3e}, attempts: {}}}",
            self.step, self.error, self.attempts
        )
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PropagationError {
    #[snafu(display("encountered a dynamics error {source}"))]
    Dynamics { source: DynamicsError },
    #[snafu(display("propagation cancelled at t = {t}"))]
    Cancelled { t: f64 },
    #[snafu(display("maximum number of steps ({max_steps}) reached at t = {t}"))]
    MaxSteps { max_steps: usize, t: f64 },
    #[snafu(display("could not locate event #{index}: {source}"))]
    EventLocation { index: usize, source: RootError },
    #[snafu(display("state became non finite at t = {t}"))]
    NonFiniteState { t: f64 },
    #[snafu(display("could not sample the dense output at t = {t}: {source}"))]
    DenseOutput {
        t: f64,
        source: InterpolationError,
    },
    #[snafu(display("expected a state of length {expected} but got {got}"))]
    StateDimension { expected: usize, got: usize },
}
