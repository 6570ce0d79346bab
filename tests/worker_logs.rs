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

//! The logger is process wide, so this file holds a single test.

use log::{Level, LevelFilter, Log, Metadata, Record};
use pvg::cosmic::{EARTH_GM, EARTH_RADIUS};
use pvg::guidance::{GuidanceController, GuidanceOpts, SolveRequest};
use pvg::linalg::Vector3;
use pvg::pvg::{OptimizerOpts, StageInfo, TargetOrbit};
use pvg::time::Epoch;
use std::sync::Mutex;
use std::thread::{self, ThreadId};

struct Captured {
    thread: ThreadId,
    level: Level,
    target: String,
    message: String,
}

struct Capture {
    records: Mutex<Vec<Captured>>,
}

impl Log for Capture {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record) {
        if let Ok(mut records) = self.records.lock() {
            records.push(Captured {
                thread: thread::current().id(),
                level: record.level(),
                target: record.target().to_string(),
                message: record.args().to_string(),
            });
        }
    }

    fn flush(&self) {}
}

static CAPTURE: Capture = Capture {
    records: Mutex::new(Vec::new()),
};

fn drain() -> Vec<Captured> {
    std::mem::take(&mut *CAPTURE.records.lock().unwrap())
}

#[test]
fn solver_records_reach_the_caller_thread() {
    log::set_logger(&CAPTURE).unwrap();
    log::set_max_level(LevelFilter::Debug);

    let r0 = EARTH_RADIUS + 185e3;
    let opts = GuidanceOpts::builder()
        .optimizer(OptimizerOpts::builder().timeout_ms(120_000).build())
        .build();
    let mut ctrl = GuidanceController::new(
        TargetOrbit::circular(r0, 0.0),
        None,
        EARTH_GM,
        EARTH_RADIUS,
        opts,
    );
    let request = SolveRequest {
        epoch: Epoch::from_gregorian_utc_hms(2024, 3, 1, 12, 0, 0),
        position: Vector3::new(r0, 0.0, 0.0),
        velocity: Vector3::new(0.0, 7_500.0, 0.0),
        stages: vec![StageInfo::builder()
            .stage(0)
            .m0(50_000.0)
            .thrust(1e6)
            .isp(300.0)
            .max_bt(100.0)
            .build()],
    };
    assert!(ctrl.request_solve(request));
    assert!(ctrl.wait());

    let caller = thread::current().id();
    let records = drain();
    assert!(
        records.iter().all(|r| r.thread == caller),
        "records were logged from another thread"
    );
    // Solver records keep the module which emitted them
    assert!(records
        .iter()
        .any(|r| r.level == Level::Info && r.target == "pvg::pvg::optimizer"
            && r.message.starts_with("solving")));
    assert!(records
        .iter()
        .any(|r| r.level == Level::Debug && r.target == "pvg::pvg::bootstrap"));
    assert!(records
        .iter()
        .any(|r| r.level == Level::Info && r.message.starts_with("guidance updated")));

    // Nothing is logged by the worker once its outcome is collected
    assert!(!ctrl.update());
    assert!(drain().is_empty());
}
