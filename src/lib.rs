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

/*! # pvg-guidance

Primer vector guidance of staged launch vehicles: the thrust direction and the burn and coast
durations that bring a vehicle from its current state to a target orbit for the least propellant,
solved by multiple shooting of Pontryagin's necessary conditions.

The [pvg] module holds the solver, and [guidance] re-solves it periodically on a worker thread.
*/

/// Logs through a [utils::LogSink], attributing the record to the calling module.
macro_rules! log_to {
    ($sink:expr, $lvl:ident, $($arg:tt)+) => {
        $sink.log(::log::Level::$lvl, module_path!(), format_args!($($arg)+))
    };
}

/// Provides the adaptive Runge Kutta integrator, its events and its dense output.
pub mod propagators;

/// Provides the dynamics of the state and costates, which the integrator propagates.
pub mod dynamics;

/// Orbital elements of Cartesian states.
pub mod cosmic;

/// Utility functions shared by different modules, and which may be useful to engineers.
pub mod utils;

/// Scalar root finding and minimization.
pub mod roots;

/// Hermite interpolation of vector valued samples.
pub mod polyfit;

/// The primer vector guidance solver.
pub mod pvg;

/// Background re-solving guidance.
pub mod guidance;

mod errors;
/// Functions which may fail return a module error, all of which convert into this one.
pub use self::errors::GuidanceError;

/// Configuration loading.
pub mod io;

#[macro_use]
extern crate log;
extern crate hifitime;
extern crate nalgebra as na;

/// Re-export of hifitime
pub mod time {
    pub use hifitime::*;
}

/// Re-export nalgebra
pub mod linalg {
    pub use na::base::*;
}
