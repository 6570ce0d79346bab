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

//! Primer vector guidance of staged ascents.
//!
//! The thrust direction of a minimum propellant burn is the primer vector, i.e. the velocity
//! costate of Pontryagin's principle. A [Problem] couples the initial state of the vehicle with a
//! [Terminal] condition, and the [Optimizer] searches the initial costates and the free durations
//! of its [Phase]s by multiple shooting so that the terminal condition, the continuity across
//! phases and the optimal switching conditions all hold. The converged trajectory is a
//! [Solution], queried by epoch.
//!
//! Everything inside the solver is nondimensional: see [Scale].

mod scale;
pub use scale::*;

mod phase;
pub use phase::*;

/// Closed form vacuum thrust arcs.
pub mod analytic;

mod terminal;
pub use terminal::*;

mod problem;
pub use problem::*;

pub(crate) mod shooting;

mod optimizer;
pub use optimizer::*;

mod bootstrap;

mod solution;
pub use solution::*;

mod ascent;
pub use ascent::*;
