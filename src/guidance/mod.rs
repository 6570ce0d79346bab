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

//! Background re-solving guidance.
//!
//! The [GuidanceController] runs one solve at a time on a worker thread while the caller keeps
//! flying the last accepted [Solution]. The worker never touches the caller's state or logger: it
//! sends its log records and its outcome over a channel, which [GuidanceController::update]
//! drains on the caller's thread.

use crate::errors::GuidanceError;
use crate::io::AscentConfig;
use crate::linalg::Vector3;
use crate::pvg::{
    Ascent, CoastSpec, OptimizerError, OptimizerOpts, OptimizerStatus, Solution, SolveReport,
    StageInfo, TargetOrbit,
};
use crate::time::{Duration, Epoch};
use crate::utils::{CancelToken, LogSink};
use log::Level;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Once};
use std::thread::{self, JoinHandle};
use typed_builder::TypedBuilder;

pub use crate::utils::LogRecord;

/// Name of the solver threads, whose panics are reported through the log records.
pub const WORKER_THREAD: &str = "pvg-guidance-worker";

#[derive(Clone, Copy, Debug, PartialEq, TypedBuilder, Serialize, Deserialize)]
#[builder(doc)]
#[serde(default)]
pub struct GuidanceOpts {
    #[builder(default)]
    pub optimizer: OptimizerOpts,
    /// Shortest time between two solve requests, in seconds
    #[builder(default = 1.0)]
    pub min_resolve_interval_s: f64,
}

impl Default for GuidanceOpts {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Vehicle telemetry at the time of a solve request, in meters, seconds and kilograms.
#[derive(Clone, Debug, PartialEq)]
pub struct SolveRequest {
    pub epoch: Epoch,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    /// Remaining stages, the active one first with its current mass and burn time left
    pub stages: Vec<StageInfo>,
}

struct Outcome {
    solution: Option<Solution>,
    status: Option<OptimizerStatus>,
    report: SolveReport,
}

impl Outcome {
    fn failed(report: SolveReport) -> Self {
        Self {
            solution: None,
            status: None,
            report,
        }
    }
}

enum WorkerMessage {
    Log(LogRecord),
    Done(Box<Outcome>),
}

/// Commands of the attitude control layer at one epoch.
#[derive(Clone, Debug, PartialEq)]
pub struct GuidanceOutput {
    pub epoch: Epoch,
    /// Commanded thrust direction, inertial
    pub direction: Vector3<f64>,
    /// Pitch above the local horizon, in degrees
    pub pitch_deg: f64,
    /// Heading from north towards east, in degrees
    pub heading_deg: f64,
    /// Time to go until orbit insertion
    pub tgo: Duration,
    /// Time to go until the end of the current phase
    pub tgo_phase: Duration,
    pub phase: usize,
    pub stage: Option<usize>,
    pub terminal_stage: Option<usize>,
    pub coasting: bool,
    /// ΔV to go, in m/s
    pub vgo: f64,
    /// Summary of the orbit reached at insertion
    pub orbit: String,
}

impl fmt::Display for GuidanceOutput {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}: pitch {:.3} deg, heading {:.3} deg, tgo {} (phase {}), vgo {:.3} m/s, stage {:?} of {:?}",
            self.epoch,
            self.pitch_deg,
            self.heading_deg,
            self.tgo,
            self.tgo_phase,
            self.vgo,
            self.stage,
            self.terminal_stage
        )
    }
}

/// Solver diagnostics of the guidance controller.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Diagnostics {
    /// Report of the last finished solve
    pub report: SolveReport,
    /// Status of the last finished solve, `None` if it did not run to completion
    pub status: Option<OptimizerStatus>,
    pub successes: usize,
    pub failures: usize,
    /// A solve is running
    pub active: bool,
}

impl Diagnostics {
    pub fn norm(&self) -> f64 {
        self.report.norm
    }

    pub fn iterations(&self) -> usize {
        self.report.iterations
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{status} {}", self.report)?,
            None => write!(f, "aborted {}", self.report)?,
        }
        write!(f, " ({} ok, {} failed)", self.successes, self.failures)?;
        if self.report.multi_coast {
            write!(f, " [multiple free coasts]")?;
        }
        Ok(())
    }
}

/// Periodically re-solved primer vector guidance of an ascent.
///
/// At most one solve runs at a time: a solve is active from the request which starts it until
/// [GuidanceController::update] collects its outcome.
pub struct GuidanceController {
    pub opts: GuidanceOpts,
    target: TargetOrbit,
    coast: Option<CoastSpec>,
    mu: f64,
    body_radius: f64,
    solution: Option<Arc<Solution>>,
    active: bool,
    /// The active solve was cancelled and its outcome must be discarded
    abandoned: bool,
    cancel: CancelToken,
    tx: Sender<WorkerMessage>,
    rx: Receiver<WorkerMessage>,
    worker: Option<JoinHandle<()>>,
    last_request: Option<Epoch>,
    diagnostics: Diagnostics,
}

impl GuidanceController {
    pub fn new(
        target: TargetOrbit,
        coast: Option<CoastSpec>,
        mu: f64,
        body_radius: f64,
        opts: GuidanceOpts,
    ) -> Self {
        let (tx, rx) = channel();
        Self {
            opts,
            target,
            coast,
            mu,
            body_radius,
            solution: None,
            active: false,
            abandoned: false,
            cancel: CancelToken::new(),
            tx,
            rx,
            worker: None,
            last_request: None,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn from_config(cfg: &AscentConfig) -> Result<Self, GuidanceError> {
        cfg.validate()?;
        Ok(Self::new(
            cfg.target,
            cfg.coast,
            cfg.mu,
            cfg.body_radius,
            cfg.guidance,
        ))
    }

    /// Starts a solve in the background. Returns `false` without doing anything if a solve is
    /// still active or if the previous request is too recent. A request older than the previous
    /// one (the flight clock was reset) is never throttled.
    pub fn request_solve(&mut self, request: SolveRequest) -> bool {
        if self.active {
            debug!("solve requested at {} while one is running", request.epoch);
            return false;
        }
        if let Some(last) = self.last_request {
            let elapsed = (request.epoch - last).to_seconds();
            if (0.0..self.opts.min_resolve_interval_s).contains(&elapsed) {
                return false;
            }
            if elapsed < 0.0 {
                debug!("solve requested at {} before the previous request {last}", request.epoch);
            }
        }
        if let Some(handle) = self.worker.take() {
            // Its outcome was already collected
            let _ = handle.join();
        }

        self.cancel = CancelToken::with_timeout(std::time::Duration::from_millis(
            self.opts.optimizer.timeout_ms,
        ));
        let tx = self.tx.clone();
        let log = LogSink::forward(move |record| {
            let _ = tx.send(WorkerMessage::Log(record));
        });

        let mut ascent = Ascent::new(request.stages, self.target);
        ascent.coast = self.coast;
        let job = Job {
            ascent,
            epoch: request.epoch,
            position: request.position,
            velocity: request.velocity,
            mu: self.mu,
            body_radius: self.body_radius,
            opts: self.opts.optimizer,
            prior: self.solution.clone(),
            cancel: self.cancel.clone(),
            log,
        };

        match spawn_worker(self.tx.clone(), move || job.run()) {
            Ok(handle) => {
                self.worker = Some(handle);
                self.active = true;
                self.abandoned = false;
                self.diagnostics.active = true;
                self.last_request = Some(request.epoch);
                true
            }
            Err(e) => {
                error!("cannot start the guidance worker: {e}");
                false
            }
        }
    }

    /// Replays the worker's log records and swaps in a newly converged solution. Returns whether
    /// the solution changed.
    pub fn update(&mut self) -> bool {
        let mut swapped = false;
        while let Ok(message) = self.rx.try_recv() {
            match message {
                WorkerMessage::Log(record) => {
                    log!(target: record.target.as_str(), record.level, "{}", record.message)
                }
                WorkerMessage::Done(outcome) => {
                    let Outcome {
                        solution,
                        status,
                        report,
                    } = *outcome;
                    self.active = false;
                    self.diagnostics.report = report;
                    self.diagnostics.status = status;
                    self.diagnostics.active = false;
                    let solution = if std::mem::take(&mut self.abandoned) {
                        if solution.is_some() {
                            debug!("discarding the solution of a cancelled solve");
                        }
                        None
                    } else {
                        solution
                    };
                    match solution {
                        Some(solution) => {
                            info!("guidance updated: {}", self.diagnostics);
                            self.diagnostics.successes += 1;
                            self.solution = Some(Arc::new(solution));
                            swapped = true;
                        }
                        None => {
                            self.diagnostics.failures += 1;
                            warn!("guidance kept its previous solution: {}", self.diagnostics);
                        }
                    }
                }
            }
        }
        swapped
    }

    /// Requests the active solve, if any, to stop. Its outcome counts as a failure, even if the
    /// worker finished before noticing the request.
    pub fn cancel(&mut self) {
        if self.active {
            self.abandoned = true;
        }
        self.cancel.cancel();
    }

    /// Returns whether a solve was started and its outcome not collected yet.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Blocks until the active solve, if any, finishes and then processes its outcome.
    pub fn wait(&mut self) -> bool {
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.update()
    }

    pub fn solution(&self) -> Option<Arc<Solution>> {
        self.solution.clone()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.clone()
    }

    /// Guidance commands at `epoch` from the current solution.
    pub fn output(&self, epoch: Epoch) -> Result<GuidanceOutput, GuidanceError> {
        let solution = self.solution.as_ref().ok_or(GuidanceError::NoSolution)?;
        let direction = solution.thrust_direction(epoch)?;
        let (pitch_deg, heading_deg) = solution.pitch_heading(epoch)?;
        Ok(GuidanceOutput {
            epoch,
            direction,
            pitch_deg,
            heading_deg,
            tgo: solution.tgo(epoch),
            tgo_phase: solution.tgo_phase(epoch),
            phase: solution.phase_index(epoch),
            stage: solution.stage(epoch),
            terminal_stage: solution.terminal_stage(),
            coasting: solution.is_coast(epoch),
            vgo: solution.vgo(epoch)?,
            orbit: solution.terminal_elements()?.to_string(),
        })
    }
}

impl Drop for GuidanceController {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// Starts a worker thread running `body`. A panic of `body` is reported as an error record
/// followed by a failed outcome instead of reaching the standard error stream.
fn spawn_worker<F>(tx: Sender<WorkerMessage>, body: F) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce() -> Outcome + Send + 'static,
{
    silence_worker_panics();
    thread::Builder::new()
        .name(WORKER_THREAD.to_string())
        .spawn(move || {
            let outcome = match catch_unwind(AssertUnwindSafe(body)) {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let _ = tx.send(WorkerMessage::Log(LogRecord {
                        level: Level::Error,
                        target: module_path!().to_string(),
                        message: format!("guidance worker panicked: {}", panic_message(&*panic)),
                    }));
                    Outcome::failed(SolveReport::default())
                }
            };
            let _ = tx.send(WorkerMessage::Done(Box::new(outcome)));
        })
}

/// Installs, once, a panic hook which stays quiet on worker threads and defers to the previous
/// hook everywhere else.
fn silence_worker_panics() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if thread::current().name() != Some(WORKER_THREAD) {
                previous(info);
            }
        }));
    });
}

/// One solve, owned by the worker thread.
struct Job {
    ascent: Ascent,
    epoch: Epoch,
    position: Vector3<f64>,
    velocity: Vector3<f64>,
    mu: f64,
    body_radius: f64,
    opts: OptimizerOpts,
    prior: Option<Arc<Solution>>,
    cancel: CancelToken,
    log: LogSink,
}

impl Job {
    fn run(self) -> Outcome {
        let mut optimizer = match self.ascent.optimizer(
            self.epoch,
            self.position,
            self.velocity,
            self.mu,
            self.body_radius,
            self.opts,
        ) {
            Ok(optimizer) => optimizer
                .with_cancel(self.cancel.clone())
                .with_log(self.log.clone()),
            Err(e) => {
                log_to!(self.log, Error, "cannot set up the solve: {e}");
                return Outcome::failed(SolveReport::default());
            }
        };

        let bootstrap = match &self.prior {
            Some(prior) => optimizer.bootstrap_from(prior),
            None => optimizer.bootstrap(),
        };
        let status = bootstrap.and_then(|_| optimizer.run());
        let report = optimizer.report().clone();
        match status {
            Ok(OptimizerStatus::Success) => match optimizer.solution() {
                Ok(solution) => {
                    log_to!(self.log, Debug, "converged at {}", self.epoch);
                    Outcome {
                        solution: Some(solution),
                        status: Some(OptimizerStatus::Success),
                        report,
                    }
                }
                Err(e) => {
                    log_to!(self.log, Error, "cannot sample the solution: {e}");
                    Outcome {
                        solution: None,
                        status: Some(OptimizerStatus::Failed),
                        report,
                    }
                }
            },
            Ok(status) => {
                log_to!(
                    self.log,
                    Warn,
                    "solve at {} did not converge: {report}",
                    self.epoch
                );
                Outcome {
                    solution: None,
                    status: Some(status),
                    report,
                }
            }
            Err(OptimizerError::Cancelled) => {
                log_to!(self.log, Warn, "solve at {} cancelled", self.epoch);
                Outcome::failed(report)
            }
            Err(e) => {
                log_to!(self.log, Error, "solve at {} failed: {e}", self.epoch);
                Outcome::failed(report)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod ut_guidance {
    use super::*;

    #[test]
    fn no_solution_yet() {
        let ctrl = GuidanceController::new(
            TargetOrbit::circular(6_556e3, 0.0),
            None,
            3.986004418e14,
            6_371e3,
            GuidanceOpts::default(),
        );
        assert!(matches!(
            ctrl.output(Epoch::from_gregorian_utc_at_midnight(2024, 1, 1)),
            Err(GuidanceError::NoSolution)
        ));
        assert!(!ctrl.is_active());
        assert_eq!(ctrl.diagnostics().successes, 0);
    }

    #[test]
    fn panic_messages() {
        let panic = catch_unwind(|| {
            panic!("boom");
        })
        .unwrap_err();
        assert_eq!(panic_message(&*panic), "boom");
    }

    #[test]
    fn empty_vehicle_fails_cleanly() {
        let mut ctrl = GuidanceController::new(
            TargetOrbit::circular(6_556e3, 0.0),
            None,
            3.986004418e14,
            6_371e3,
            GuidanceOpts::default(),
        );
        let request = SolveRequest {
            epoch: Epoch::from_gregorian_utc_at_midnight(2024, 1, 1),
            position: Vector3::new(6_556e3, 0.0, 0.0),
            velocity: Vector3::new(0.0, 7_500.0, 0.0),
            stages: Vec::new(),
        };
        assert!(ctrl.request_solve(request));
        assert!(!ctrl.wait());
        let diag = ctrl.diagnostics();
        assert_eq!(diag.failures, 1);
        assert!(diag.status.is_none());
        assert!(!diag.active);
    }

    fn unthrottled() -> GuidanceController {
        GuidanceController::new(
            TargetOrbit::circular(6_556e3, 0.0),
            None,
            3.986004418e14,
            6_371e3,
            GuidanceOpts::builder().min_resolve_interval_s(0.0).build(),
        )
    }

    fn empty_request(seconds: f64) -> SolveRequest {
        SolveRequest {
            epoch: Epoch::from_gregorian_utc_at_midnight(2024, 1, 1)
                + Duration::from_seconds(seconds),
            position: Vector3::new(6_556e3, 0.0, 0.0),
            velocity: Vector3::new(0.0, 7_500.0, 0.0),
            stages: Vec::new(),
        }
    }

    #[test]
    fn one_solve_at_a_time() {
        let mut ctrl = unthrottled();
        assert!(ctrl.request_solve(empty_request(0.0)));
        // Active until its outcome is collected, however fast the worker is
        assert!(ctrl.is_active());
        assert!(!ctrl.request_solve(empty_request(10.0)));
        assert!(ctrl.diagnostics().active);

        assert!(!ctrl.wait());
        assert!(!ctrl.is_active());
        assert_eq!(ctrl.diagnostics().failures, 1);
        assert!(ctrl.request_solve(empty_request(20.0)));
        assert!(!ctrl.wait());
        assert_eq!(ctrl.diagnostics().failures, 2);
    }

    #[test]
    fn clock_reset_is_not_throttled() {
        let mut ctrl = GuidanceController::new(
            TargetOrbit::circular(6_556e3, 0.0),
            None,
            3.986004418e14,
            6_371e3,
            GuidanceOpts::builder().min_resolve_interval_s(5.0).build(),
        );
        assert!(ctrl.request_solve(empty_request(100.0)));
        assert!(!ctrl.wait());
        assert!(!ctrl.request_solve(empty_request(102.0)));
        assert!(ctrl.request_solve(empty_request(40.0)));
        assert!(!ctrl.wait());
        assert!(ctrl.request_solve(empty_request(45.0)));
        assert!(!ctrl.wait());
        assert_eq!(ctrl.diagnostics().failures, 3);
    }

    #[test]
    fn cancel_when_idle_changes_nothing() {
        let mut ctrl = unthrottled();
        ctrl.cancel();
        assert!(!ctrl.is_active());
        assert!(ctrl.request_solve(empty_request(0.0)));
        assert!(!ctrl.wait());
        let diag = ctrl.diagnostics();
        assert_eq!(diag.failures, 1);
        assert_eq!(diag.successes, 0);
    }

    #[test]
    fn worker_panic_becomes_an_error_record() {
        let (tx, rx) = channel();
        let handle = spawn_worker(tx, || panic!("boom")).unwrap();
        assert_eq!(handle.thread().name(), Some(WORKER_THREAD));
        handle.join().unwrap();

        let messages: Vec<WorkerMessage> = rx.try_iter().collect();
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            WorkerMessage::Log(record) => {
                assert_eq!(record.level, Level::Error);
                assert_eq!(record.message, "guidance worker panicked: boom");
            }
            WorkerMessage::Done(_) => panic!("expected the panic record first"),
        }
        match &messages[1] {
            WorkerMessage::Done(outcome) => {
                assert!(outcome.solution.is_none());
                assert!(outcome.status.is_none());
            }
            WorkerMessage::Log(record) => panic!("unexpected record {record:?}"),
        }
    }
}
