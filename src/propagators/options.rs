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

use std::fmt;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// IntegratorOpts stores the integrator options, including the minimum and maximum step sizes,
/// and the max error size. All times are nondimensional.
#[derive(Clone, Copy, Debug, PartialEq, TypedBuilder, Serialize, Deserialize)]
#[builder(doc)]
#[serde(default)]
pub struct IntegratorOpts {
    #[builder(default = 1e-3)]
    pub init_step: f64,
    #[builder(default = 1e-10)]
    pub min_step: f64,
    #[builder(default = 0.25)]
    pub max_step: f64,
    #[builder(default = 1e-10)]
    pub tolerance: f64,
    /// Maximum number of rejected attempts for a single step
    #[builder(default = 50)]
    pub attempts: u8,
    /// Maximum number of accepted steps for a single call
    #[builder(default = 100_000)]
    pub max_steps: usize,
    /// If false, reaching `max_steps` silently stops the integration where it is
    #[builder(default = true)]
    pub fail_on_max_steps: bool,
}

impl IntegratorOpts {
    /// Initializes the default options with the provided tolerance.
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self::builder().tolerance(tolerance).build()
    }

    /// Returns a string with the information about these options
    pub fn info(&self) -> String {
        format!("{self}")
    }

    /// Set the maximum step size and sets the initial step to that value if currently greater
    pub fn set_max_step(&mut self, max_step: f64) {
        if self.init_step > max_step {
            self.init_step = max_step;
        }
        self.max_step = max_step;
    }

    /// Set the minimum step size and sets the initial step to that value if currently smaller
    pub fn set_min_step(&mut self, min_step: f64) {
        if self.init_step < min_step {
            self.init_step = min_step;
        }
        self.min_step = min_step;
    }
}

impl Default for IntegratorOpts {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Display for IntegratorOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min_step: {:e}, max_step: {:e}, tol: {:e}, attempts: {}, max steps: {}",
            self.min_step, self.max_step, self.tolerance, self.attempts, self.max_steps
        )
    }
}

#[test]
fn test_options() {
    let opts = IntegratorOpts::with_tolerance(1e-12);
    assert_eq!(opts.tolerance, 1e-12);
    assert_eq!(opts.min_step, 1e-10);
    assert!(opts.fail_on_max_steps);

    let mut opts = IntegratorOpts::builder().init_step(0.5).build();
    opts.set_max_step(0.1);
    assert_eq!(opts.init_step, 0.1);
    opts.set_min_step(0.2);
    assert_eq!(opts.init_step, 0.2);
    assert_eq!(opts.min_step, 0.2);
    println!("{}", opts.info());
}
