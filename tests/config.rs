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

use pvg::guidance::GuidanceController;
use pvg::io::{AscentConfig, ConfigError, ConfigRepr};
use pvg::GuidanceError;
use std::fs;
use std::path::PathBuf;

const TWO_STAGES: &str = r#"
stages:
  - stage: 0
    m0: 120000.0
    thrust: 2.0e6
    isp: 300.0
    max_bt: 120.0
    allow_shutdown: false
  - stage: 1
    m0: 30000.0
    thrust: 3.0e5
    isp: 340.0
    max_bt: 300.0
target:
  periapsis: 6556000.0
  apoapsis: 6856000.0
  attach_radius: 6556000.0
  inc_deg: 28.5
  lan_deg: 10.0
coast:
  before_stage: 1
  duration: 20.0
  free: true
  min: 5.0
  max: 120.0
guidance:
  min_resolve_interval_s: 2.0
  optimizer:
    timeout_ms: 1000
    max_iterations: 50
mu: 3.986004418e14
"#;

fn scratch_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("pvg-{}-{name}", std::process::id()));
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn load_from_file() {
    let _ = pretty_env_logger::try_init();
    let path = scratch_file("two_stages.yaml", TWO_STAGES);
    let cfg = AscentConfig::load(&path).unwrap();
    fs::remove_file(&path).unwrap();

    assert_eq!(cfg.stages.len(), 2);
    assert!(!cfg.stages[0].allow_shutdown);
    assert!(cfg.stages[1].allow_shutdown);
    assert_eq!(cfg.target.lan_deg, Some(10.0));
    assert_eq!(cfg.target.argp_deg, None);

    let coast = cfg.coast.unwrap();
    assert!(coast.free);
    assert_eq!(coast.before_stage, 1);

    // Unspecified options keep their defaults
    assert_eq!(cfg.guidance.min_resolve_interval_s, 2.0);
    assert_eq!(cfg.guidance.optimizer.timeout_ms, 1000);
    assert_eq!(cfg.guidance.optimizer.max_iterations, 50);
    assert_eq!(cfg.guidance.optimizer.termination_tol, 1e-9);
    assert_eq!(cfg.body_radius, pvg::cosmic::EARTH_RADIUS);

    let ascent = cfg.ascent().unwrap();
    assert_eq!(ascent.stages.len(), 2);
    assert!(ascent.coast.is_some());

    let ctrl = GuidanceController::from_config(&cfg).unwrap();
    assert_eq!(ctrl.opts, cfg.guidance);
}

#[test]
fn load_many_from_file() {
    let many = format!(
        "- {}\n- {}",
        indent(TWO_STAGES),
        indent(&TWO_STAGES.replace("inc_deg: 28.5", "inc_deg: 51.6"))
    );
    let path = scratch_file("many.yaml", &many);
    let cfgs = AscentConfig::load_many(&path).unwrap();
    fs::remove_file(&path).unwrap();

    assert_eq!(cfgs.len(), 2);
    assert_eq!(cfgs[0].target.inc_deg, 28.5);
    assert_eq!(cfgs[1].target.inc_deg, 51.6);
    assert_eq!(AscentConfig::loads_many(&many).unwrap(), cfgs);
}

/// Indents a YAML document as an item of a sequence.
fn indent(doc: &str) -> String {
    doc.trim()
        .lines()
        .enumerate()
        .map(|(i, line)| if i == 0 { line.to_string() } else { format!("  {line}") })
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn round_trip_through_yaml() {
    let cfg = AscentConfig::loads(TWO_STAGES).unwrap();
    let yaml = serde_yaml::to_string(&cfg).unwrap();
    assert_eq!(AscentConfig::loads(&yaml).unwrap(), cfg);
}

#[test]
fn missing_file() {
    assert!(matches!(
        AscentConfig::load("/this/path/does/not/exist.yaml"),
        Err(ConfigError::ReadError { .. })
    ));
}

#[test]
fn invalid_vehicle_is_rejected() {
    // The upper stage is heavier than what the first stage leaves
    let cfg = AscentConfig::loads(&TWO_STAGES.replace("m0: 30000.0", "m0: 119000.0")).unwrap();
    assert!(matches!(
        cfg.validate(),
        Err(ConfigError::InvalidConfig { .. })
    ));
    assert!(matches!(
        GuidanceController::from_config(&cfg),
        Err(GuidanceError::Config { .. })
    ));
}
