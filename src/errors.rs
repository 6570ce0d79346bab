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
use crate::io::ConfigError;
use crate::polyfit::InterpolationError;
use crate::propagators::PropagationError;
use crate::pvg::OptimizerError;
use crate::roots::RootError;
use snafu::prelude::*;

/// Top level error of the guidance library, wrapping the error of every module.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum GuidanceError {
    #[snafu(display("root finding failed: {source}"))]
    Root { source: RootError },
    #[snafu(display("dynamics failed: {source}"))]
    Dynamics { source: DynamicsError },
    #[snafu(display("propagation failed: {source}"))]
    Propagation { source: PropagationError },
    #[snafu(display("interpolation failed: {source}"))]
    Interpolation { source: InterpolationError },
    #[snafu(display("optimizer failed: {source}"))]
    Optimizer { source: OptimizerError },
    #[snafu(display("configuration error: {source}"))]
    Config { source: ConfigError },
    #[snafu(display("no guidance solution is available"))]
    NoSolution,
}

impl From<RootError> for GuidanceError {
    fn from(source: RootError) -> Self {
        Self::Root { source }
    }
}

impl From<DynamicsError> for GuidanceError {
    fn from(source: DynamicsError) -> Self {
        Self::Dynamics { source }
    }
}

impl From<PropagationError> for GuidanceError {
    fn from(source: PropagationError) -> Self {
        Self::Propagation { source }
    }
}

impl From<InterpolationError> for GuidanceError {
    fn from(source: InterpolationError) -> Self {
        Self::Interpolation { source }
    }
}

impl From<OptimizerError> for GuidanceError {
    fn from(source: OptimizerError) -> Self {
        Self::Optimizer { source }
    }
}

impl From<ConfigError> for GuidanceError {
    fn from(source: ConfigError) -> Self {
        Self::Config { source }
    }
}
