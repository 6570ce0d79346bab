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
use std::fmt;

/// Which sign changes of an event function trigger the event.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum EventDirection {
    /// Any sign change
    #[default]
    Any,
    /// From negative to positive
    Rising,
    /// From positive to negative
    Falling,
}

impl EventDirection {
    /// Returns whether going from `prev` to `next` is a crossing in this direction.
    pub fn is_crossing(&self, prev: f64, next: f64) -> bool {
        match self {
            Self::Any => (prev < 0.0 && next >= 0.0) || (prev > 0.0 && next <= 0.0),
            Self::Rising => prev < 0.0 && next >= 0.0,
            Self::Falling => prev > 0.0 && next <= 0.0,
        }
    }
}

/// What the integrator does once an event fires.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum EventAction {
    /// Stop the integration at the event
    #[default]
    Stop,
    /// Record the event and carry on
    Continue,
}

/// A scalar event function of time and state, whose zero crossings are located by the
/// integrator.
pub trait Event: Send + Sync {
    fn eval(&self, t: f64, state: &DVector<f64>) -> f64;

    fn direction(&self) -> EventDirection {
        EventDirection::Any
    }

    fn action(&self) -> EventAction {
        EventAction::Stop
    }

    /// Absolute precision, in time, of the located crossing
    fn time_precision(&self) -> f64 {
        1e-12
    }

    fn name(&self) -> String {
        "event".to_string()
    }
}

/// An event built from a closure.
pub struct FnEvent<F>
where
    F: Fn(f64, &DVector<f64>) -> f64 + Send + Sync,
{
    pub func: F,
    pub direction: EventDirection,
    pub action: EventAction,
    pub name: String,
}

impl<F> FnEvent<F>
where
    F: Fn(f64, &DVector<f64>) -> f64 + Send + Sync,
{
    pub fn new(name: &str, func: F) -> Self {
        Self {
            func,
            direction: EventDirection::Any,
            action: EventAction::Stop,
            name: name.to_string(),
        }
    }

    pub fn with_direction(mut self, direction: EventDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_action(mut self, action: EventAction) -> Self {
        self.action = action;
        self
    }
}

impl<F> Event for FnEvent<F>
where
    F: Fn(f64, &DVector<f64>) -> f64 + Send + Sync,
{
    fn eval(&self, t: f64, state: &DVector<f64>) -> f64 {
        (self.func)(t, state)
    }

    fn direction(&self) -> EventDirection {
        self.direction
    }

    fn action(&self) -> EventAction {
        self.action
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Fires when the radius, i.e. the norm of the first three state components, drops below the
/// radius of the central body.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ImpactEvent {
    pub body_radius: f64,
    pub action: EventAction,
}

impl ImpactEvent {
    pub fn new(body_radius: f64) -> Self {
        Self {
            body_radius,
            action: EventAction::Continue,
        }
    }
}

impl Event for ImpactEvent {
    fn eval(&self, _t: f64, state: &DVector<f64>) -> f64 {
        state.fixed_rows::<3>(0).norm() - self.body_radius
    }

    fn direction(&self) -> EventDirection {
        EventDirection::Falling
    }

    fn action(&self) -> EventAction {
        self.action
    }

    fn name(&self) -> String {
        format!("impact at radius {}", self.body_radius)
    }
}

/// An event which fired during an integration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FiredEvent {
    /// Index of the event in its set
    pub index: usize,
    /// Time of the crossing
    pub t: f64,
    /// Value of the event function at the end of the truncated step
    pub value: f64,
}

impl fmt::Display for FiredEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "event #{} at t = {:.9} ({:e})", self.index, self.t, self.value)
    }
}

/// The set of events tracked during an integration, with their enabled flag and the value of
/// each event function at the start of the current step.
pub struct EventSet<'a> {
    pub(crate) events: Vec<&'a dyn Event>,
    pub(crate) enabled: Vec<bool>,
    pub(crate) prev: Vec<f64>,
    /// Events which fired, in chronological order
    pub fired: Vec<FiredEvent>,
}

impl<'a> EventSet<'a> {
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    pub fn new(events: Vec<&'a dyn Event>) -> Self {
        let len = events.len();
        Self {
            events,
            enabled: vec![true; len],
            prev: vec![0.0; len],
            fired: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) {
        if let Some(flag) = self.enabled.get_mut(index) {
            *flag = enabled;
        }
    }

    /// Number of times the event at `index` fired.
    pub fn count(&self, index: usize) -> usize {
        self.fired.iter().filter(|e| e.index == index).count()
    }

    /// Evaluates every event at the start of an integration.
    pub(crate) fn init(&mut self, t: f64, state: &DVector<f64>) {
        for (prev, event) in self.prev.iter_mut().zip(&self.events) {
            *prev = event.eval(t, state);
        }
    }
}

#[cfg(test)]
mod ut_events {
    use super::*;

    #[test]
    fn crossings() {
        assert!(EventDirection::Any.is_crossing(-1.0, 1.0));
        assert!(EventDirection::Any.is_crossing(1.0, 0.0));
        assert!(!EventDirection::Any.is_crossing(0.0, 1.0));
        assert!(EventDirection::Rising.is_crossing(-1.0, 0.5));
        assert!(!EventDirection::Rising.is_crossing(1.0, -0.5));
        assert!(EventDirection::Falling.is_crossing(1.0, -0.5));
        assert!(!EventDirection::Falling.is_crossing(-1.0, 0.5));
    }

    #[test]
    fn fn_event() {
        let event = FnEvent::new("x", |_t, y: &DVector<f64>| y[0])
            .with_direction(EventDirection::Falling)
            .with_action(EventAction::Continue);
        let mut set = EventSet::new(vec![&event]);
        set.init(0.0, &DVector::from_element(1, 2.0));
        assert_eq!(set.prev[0], 2.0);
        assert_eq!(set.len(), 1);
        assert_eq!(event.name(), "x");
        assert_eq!(set.count(0), 0);
    }

    #[test]
    fn impact() {
        let event = ImpactEvent::new(1.0);
        let above = DVector::from_vec(vec![0.0, 1.5, 0.0, 0.0]);
        let below = DVector::from_vec(vec![0.0, 0.5, 0.0, 0.0]);
        assert_eq!(event.eval(0.0, &above), 0.5);
        assert!(event
            .direction()
            .is_crossing(event.eval(0.0, &above), event.eval(1.0, &below)));
        assert_eq!(event.action(), EventAction::Continue);
    }
}
