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

//! Orbital elements recovered from Cartesian states.

mod elements;
pub use elements::*;

/// Gravitational parameter of the Earth, in m^3/s^2.
pub const EARTH_GM: f64 = 3.986_004_418e14;

/// Mean equatorial radius of the Earth, in meters.
pub const EARTH_RADIUS: f64 = 6_371e3;
