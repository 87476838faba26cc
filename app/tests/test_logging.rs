//! FILENAME: tests/test_logging.rs
//! The unified log file receives host lines and engine facade records.

mod common;

use common::TestHarness;
use facet_engine::{DropTarget, Plane};
use grid_app::{get_log_path, init_facade, init_log_file};
use log::LevelFilter;

#[test]
fn test_unified_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs").join("grid.log");
    init_log_file(&path).unwrap();
    init_facade(LevelFilter::Debug).unwrap();
    assert_eq!(get_log_path().as_deref(), Some(path.as_path()));

    let harness = TestHarness::new();
    harness
        .drag_and_drop("status", Some(Plane::X), DropTarget::Slot(Plane::Y))
        .unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert!(lines.iter().any(|l| l.contains("|I|SYS|Creating GridSession")));
    assert!(lines.iter().any(|l| l.contains("|D|GRID|ENTER refresh_grid")));
    assert!(lines.iter().any(|l| l.contains("|I|REMAP|drag started")));
    assert!(lines.iter().any(|l| l.contains("|D|QUERY|")));

    let seqs: Vec<u64> = lines
        .iter()
        .map(|l| l.split('|').next().unwrap().parse().unwrap())
        .collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));

    // A second facade install fails.
    assert!(init_facade(LevelFilter::Info).is_err());
}
