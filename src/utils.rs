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

use crate::linalg::Vector3;
use log::Level;
use nalgebra::UnitQuaternion;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Returns the provided angle bounded between 0.0 and 360.0
pub fn between_0_360(angle: f64) -> f64 {
    let mut bounded = angle % 360.0;
    if bounded < 0.0 {
        bounded += 360.0;
    }
    bounded
}

/// Returns the provided angle bounded between -180.0 and +180.0
pub fn between_pm_180(angle: f64) -> f64 {
    let mut bounded = between_0_360(angle);
    if bounded > 180.0 {
        bounded -= 360.0;
    }
    bounded
}

/// Returns the unit orbit normal of an orbit with the provided inclination and right ascension of
/// the ascending node (both in radians), i.e. [sin i sin Ω, -sin i cos Ω, cos i].
pub fn orbit_normal(inc: f64, raan: f64) -> Vector3<f64> {
    let rot = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), raan)
        * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), inc);
    rot * Vector3::z()
}

/// Returns the local (east, north, up) unit vectors at the provided position, where north is
/// along the +Z axis of the inertial frame.
///
/// Directly above a pole, east is taken along +Y.
pub fn enu_frame(r: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>) {
    let up = r.normalize();
    let east_raw = Vector3::z().cross(&up);
    let east = if east_raw.norm() > 1e-12 {
        east_raw.normalize()
    } else {
        Vector3::y()
    };
    let north = up.cross(&east);
    (east, north, up)
}

/// Returns the pitch above the local horizon and the heading from north (clockwise, towards
/// east) of the provided direction at the provided position, both in degrees.
pub fn pitch_heading(r: &Vector3<f64>, dir: &Vector3<f64>) -> (f64, f64) {
    let (east, north, up) = enu_frame(r);
    let u = dir.normalize();
    let pitch = u.dot(&up).clamp(-1.0, 1.0).asin().to_degrees();
    let heading = between_0_360(u.dot(&east).atan2(u.dot(&north)).to_degrees());
    (pitch, heading)
}

/// Builds the inertial unit direction from a pitch and heading (degrees) at the provided position.
pub fn direction_from_pitch_heading(r: &Vector3<f64>, pitch: f64, heading: f64) -> Vector3<f64> {
    let (east, north, up) = enu_frame(r);
    let (sp, cp) = pitch.to_radians().sin_cos();
    let (sh, ch) = heading.to_radians().sin_cos();
    (up * sp + (north * ch + east * sh) * cp).normalize()
}

/// Cooperative cancellation signal shared between a solver and whoever started it.
///
/// Cloning the token shares the flag. A token may also carry a wall clock deadline, past which
/// it reports itself as cancelled.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token which cancels itself once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Returns a token sharing this token's flag, whose deadline is the earliest of this token's
    /// deadline and `timeout` from now.
    pub fn with_deadline(&self, timeout: Duration) -> Self {
        let deadline = Instant::now().checked_add(timeout);
        Self {
            flag: self.flag.clone(),
            deadline: match (self.deadline, deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
        }
    }

    /// Requests cancellation for every clone of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.timed_out()
    }

    /// Returns whether cancellation was requested, regardless of the deadline.
    pub fn cancel_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Returns whether the deadline, if any, has passed.
    pub fn timed_out(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

/// A log record captured on one thread to be replayed on another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    /// Module which emitted the record
    pub target: String,
    pub message: String,
}

/// Destination of the log records of a solver.
///
/// The default sink logs through the `log` facade on the calling thread. A forwarding sink hands
/// every enabled record to a callback instead, so that a worker thread can ship its records to
/// the thread which owns the logger.
#[derive(Clone, Default)]
pub struct LogSink {
    forward: Option<Arc<dyn Fn(LogRecord) + Send + Sync>>,
}

impl LogSink {
    /// Creates a sink which hands its records to `f`.
    pub fn forward<F>(f: F) -> Self
    where
        F: Fn(LogRecord) + Send + Sync + 'static,
    {
        Self {
            forward: Some(Arc::new(f)),
        }
    }

    pub fn is_forwarding(&self) -> bool {
        self.forward.is_some()
    }

    /// Emits a record of `level` attributed to `target`. Records above the maximum level of the
    /// `log` facade are dropped before being formatted.
    pub fn log(&self, level: Level, target: &str, args: fmt::Arguments<'_>) {
        if level > log::max_level() {
            return;
        }
        match &self.forward {
            Some(forward) => forward(LogRecord {
                level,
                target: target.to_string(),
                message: args.to_string(),
            }),
            None => log!(target: target, level, "{args}"),
        }
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_forwarding() {
            write!(f, "LogSink(forwarding)")
        } else {
            write!(f, "LogSink(log)")
        }
    }
}

#[cfg(test)]
mod ut_utils {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn angle_bounds() {
        assert_abs_diff_eq!(between_0_360(-90.0), 270.0);
        assert_abs_diff_eq!(between_0_360(725.0), 5.0);
        assert_abs_diff_eq!(between_pm_180(270.0), -90.0);
    }

    #[test]
    fn normal_from_quaternion() {
        let (inc, raan) = (28.5_f64.to_radians(), 40.0_f64.to_radians());
        let n = orbit_normal(inc, raan);
        assert_abs_diff_eq!(n.x, inc.sin() * raan.sin(), epsilon = 1e-15);
        assert_abs_diff_eq!(n.y, -inc.sin() * raan.cos(), epsilon = 1e-15);
        assert_abs_diff_eq!(n.z, inc.cos(), epsilon = 1e-15);
    }

    #[test]
    fn pitch_heading_round_trip() {
        let r = Vector3::new(6.4e6, 1.2e6, -2.0e6);
        for (pitch, heading) in [(10.0, 90.0), (-5.0, 200.0), (45.0, 359.0)] {
            let dir = direction_from_pitch_heading(&r, pitch, heading);
            let (p, h) = pitch_heading(&r, &dir);
            assert_abs_diff_eq!(p, pitch, epsilon = 1e-9);
            assert_abs_diff_eq!(h, heading, epsilon = 1e-9);
        }
        // Due east on the equator
        let (p, h) = pitch_heading(&Vector3::new(1.0, 0.0, 0.0), &Vector3::new(0.0, 1.0, 0.0));
        assert_abs_diff_eq!(p, 0.0);
        assert_abs_diff_eq!(h, 90.0);
    }

    #[test]
    fn cancel_token() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());

        let expired = CancelToken::with_timeout(Duration::ZERO);
        assert!(expired.timed_out());
        assert!(expired.is_cancelled());
        assert!(!expired.cancel_requested());

        // Deadlines share the flag of their parent
        let parent = CancelToken::new();
        let child = parent.with_deadline(Duration::from_secs(60));
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.cancel_requested());
        assert!(expired.with_deadline(Duration::from_secs(60)).timed_out());
    }

    #[test]
    fn forwarding_sink() {
        use std::sync::mpsc::channel;
        use std::sync::Mutex;

        log::set_max_level(log::LevelFilter::Debug);
        let (tx, rx) = channel();
        let tx = Mutex::new(tx);
        let sink = LogSink::forward(move |record| {
            let _ = tx.lock().map(|tx| tx.send(record));
        });
        assert!(sink.is_forwarding());
        log_to!(sink, Warn, "stage {} overburns", 2);
        log_to!(sink, Trace, "too verbose");

        let records: Vec<LogRecord> = rx.try_iter().collect();
        assert_eq!(
            records,
            vec![LogRecord {
                level: Level::Warn,
                target: module_path!().to_string(),
                message: "stage 2 overburns".to_string(),
            }]
        );
        assert!(!LogSink::default().is_forwarding());
    }
}
