//! Integration tests for the logging session workflow
//!
//! Ticks are driven by hand through `EngineHandle::tick_now`, so these tests
//! do not depend on the polling thread's timing:
//! - Registration, start, pause and resume
//! - Per-variable failure isolation
//! - Export and Clear

mod common;

use common::builders::{journal_path, ConfigBuilder, VariableBuilder};
use common::mock_helpers::{create_engine, create_test_plc, script_ints};
use s7_logger::backend::{ClearOutcome, EngineEvent};
use s7_logger::error::LoggerError;
use s7_logger::export::ExportLayout;
use s7_logger::types::{DataType, PlotKind, SessionState, Value};
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_three_ticks_export_then_clear() {
    let dir = TempDir::new().unwrap();
    let plc = create_test_plc();
    let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
    let var = VariableBuilder::new(1).build();
    script_ints(&plc, var, &[10, 12, 15]);

    engine.connect("192.168.0.1", 0, 1).unwrap();
    engine.add_variable(var).unwrap();
    engine.start(Duration::from_secs(1), PlotKind::Line).unwrap();
    for _ in 0..3 {
        engine.tick_now().unwrap();
    }

    let history = engine.history(&var).unwrap();
    let values: Vec<Value> = history.iter().map(|s| s.value).collect();
    assert_eq!(values, vec![Value::Int(10), Value::Int(12), Value::Int(15)]);
    assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

    let out = dir.path().join("session.csv");
    let summary = engine.export(&out).unwrap();
    assert_eq!(summary.rows, 3);

    let mut reader = csv::Reader::from_path(&out).unwrap();
    let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(header, vec!["variable", "timestamp", "value"]);
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 3);
    for (row, (sample, expected)) in rows.iter().zip(history.iter().zip(["10", "12", "15"])) {
        assert_eq!(&row[0], "DB1_0_INT");
        assert_eq!(
            &row[1],
            sample
                .timestamp
                .wall
                .to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
        );
        assert_eq!(&row[2], expected);
    }

    assert_eq!(engine.clear(true).unwrap(), ClearOutcome::Cleared { samples: 3 });
    assert!(matches!(
        engine.export(dir.path().join("after_clear.csv")),
        Err(LoggerError::EmptyDataset)
    ));
    assert!(!dir.path().join("after_clear.csv").exists());

    // Clear keeps a running session running
    assert_eq!(engine.state().unwrap(), SessionState::Running);
}

#[test]
fn test_unconfirmed_clear_keeps_data() {
    let dir = TempDir::new().unwrap();
    let plc = create_test_plc();
    let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
    let var = VariableBuilder::new(1).build();

    engine.connect("192.168.0.1", 0, 1).unwrap();
    engine.add_variable(var).unwrap();
    engine.start(Duration::from_secs(1), PlotKind::Line).unwrap();
    engine.tick_now().unwrap();

    assert_eq!(engine.clear(false).unwrap(), ClearOutcome::Cancelled);
    assert_eq!(engine.history(&var).unwrap().len(), 1);
    assert!(journal_path(&dir).exists());
}

#[test]
fn test_start_with_no_variables_keeps_connected() {
    let dir = TempDir::new().unwrap();
    let plc = create_test_plc();
    let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);

    engine.connect("192.168.0.1", 0, 1).unwrap();
    let result = engine.start(Duration::from_secs(1), PlotKind::Line);

    assert!(matches!(result, Err(LoggerError::InvalidStartParameters(_))));
    assert_eq!(engine.state().unwrap(), SessionState::Connected);
}

#[test]
fn test_zero_interval_rejected() {
    let dir = TempDir::new().unwrap();
    let plc = create_test_plc();
    let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);

    engine.connect("192.168.0.1", 0, 1).unwrap();
    engine.add_variable(VariableBuilder::new(1).build()).unwrap();
    let result = engine.start(Duration::ZERO, PlotKind::Line);

    assert!(matches!(result, Err(LoggerError::InvalidStartParameters(_))));
    assert_eq!(engine.state().unwrap(), SessionState::Connected);
}

#[test]
fn test_refused_connection_stays_idle() {
    let dir = TempDir::new().unwrap();
    let plc = create_test_plc();
    plc.refuse_connections(true);
    let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);

    let result = engine.connect("10.0.0.99", 0, 1);

    assert!(matches!(result, Err(LoggerError::Connection(_))));
    assert_eq!(engine.state().unwrap(), SessionState::Idle);
}

#[test]
fn test_read_failure_is_isolated_per_variable() {
    let dir = TempDir::new().unwrap();
    let plc = create_test_plc();
    let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
    let a = VariableBuilder::new(1).build();
    let b = VariableBuilder::new(1).offset(2).data_type(DataType::Real).build();
    plc.fail_reads(a, Some(1));

    engine.connect("192.168.0.1", 0, 1).unwrap();
    engine.add_variable(a).unwrap();
    engine.add_variable(b).unwrap();
    engine.start(Duration::from_secs(1), PlotKind::Scatter).unwrap();

    let report = engine.tick_now().unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, a);
    assert!(report.value_of(&b).is_some());
    assert!(engine.history(&a).unwrap().is_empty());
    assert_eq!(engine.history(&b).unwrap().len(), 1);

    // The failed variable is polled again on the next tick
    let report = engine.tick_now().unwrap();
    assert!(report.failures.is_empty());
    assert_eq!(engine.history(&a).unwrap().len(), 1);
    assert_eq!(engine.state().unwrap(), SessionState::Running);
}

#[test]
fn test_unreachable_warning_after_three_failures() {
    let dir = TempDir::new().unwrap();
    let plc = create_test_plc();
    let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
    let var = VariableBuilder::new(4).build();
    plc.fail_reads(var, Some(4));

    engine.connect("192.168.0.1", 0, 1).unwrap();
    engine.add_variable(var).unwrap();
    engine.start(Duration::from_secs(1), PlotKind::Line).unwrap();

    let reports: Vec<_> = (0..5).map(|_| engine.tick_now().unwrap()).collect();
    assert!(reports[1].unreachable.is_empty());
    assert_eq!(reports[2].unreachable, vec![var]);
    assert!(reports[3].unreachable.is_empty());
    assert_eq!(reports[4].recovered, vec![var]);

    let events = engine.drain_events();
    let unreachable = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::VariableUnreachable { failures: 3, .. }))
        .count();
    assert_eq!(unreachable, 1);
}

#[test]
fn test_pause_resume_leaves_gap_without_interpolation() {
    let dir = TempDir::new().unwrap();
    let plc = create_test_plc();
    let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
    let var = VariableBuilder::new(1).build();

    engine.connect("192.168.0.1", 0, 1).unwrap();
    engine.add_variable(var).unwrap();
    engine.start(Duration::from_millis(10), PlotKind::Line).unwrap();
    engine.tick_now().unwrap();
    engine.tick_now().unwrap();

    engine.stop().unwrap();
    assert_eq!(engine.state().unwrap(), SessionState::Paused);
    let reads_before = plc.read_count();
    for _ in 0..3 {
        assert!(engine.tick_now().unwrap().skipped());
    }
    assert_eq!(plc.read_count(), reads_before);
    std::thread::sleep(Duration::from_millis(100));

    engine.resume().unwrap();
    engine.tick_now().unwrap();

    let history = engine.history(&var).unwrap();
    assert_eq!(history.len(), 3);
    let gap = history[2].timestamp.elapsed - history[1].timestamp.elapsed;
    assert!(gap >= Duration::from_millis(100));
    assert_eq!(engine.session().unwrap().interval, Duration::from_millis(10));
}

#[test]
fn test_registry_changes_only_while_not_running() {
    let dir = TempDir::new().unwrap();
    let plc = create_test_plc();
    let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
    let a = VariableBuilder::new(1).build();
    let b = VariableBuilder::new(2).build();

    engine.connect("192.168.0.1", 0, 1).unwrap();
    engine.add_variable(a).unwrap();
    assert!(matches!(
        engine.add_variable(a),
        Err(LoggerError::DuplicateVariable(_))
    ));
    engine.start(Duration::from_secs(1), PlotKind::Line).unwrap();

    assert!(matches!(
        engine.remove_variable(&a),
        Err(LoggerError::RemovalWhileRunning(_))
    ));
    assert!(engine.add_variable(b).is_err());

    engine.stop().unwrap();
    engine.add_variable(b).unwrap();
    engine.remove_variable(&a).unwrap();
    assert!(matches!(engine.remove_variable(&a), Err(LoggerError::NotFound(_))));
    assert_eq!(engine.variables().unwrap(), vec![b]);
}

#[test]
fn test_wide_export_aligns_on_tick_timestamps() {
    let dir = TempDir::new().unwrap();
    let plc = create_test_plc();
    let config = ConfigBuilder::in_dir(&dir)
        .layout(ExportLayout::Wide)
        .build();
    let (_backend, engine) = create_engine(config, &plc);
    let a = VariableBuilder::new(1).build();
    let b = VariableBuilder::new(1).offset(2).build();
    script_ints(&plc, a, &[1, 2]);
    script_ints(&plc, b, &[5, 6]);
    plc.fail_reads(b, Some(1));

    engine.connect("192.168.0.1", 0, 1).unwrap();
    engine.add_variable(a).unwrap();
    engine.add_variable(b).unwrap();
    engine.start(Duration::from_secs(1), PlotKind::Line).unwrap();
    engine.tick_now().unwrap();
    engine.tick_now().unwrap();

    let out = dir.path().join("wide.csv");
    assert_eq!(engine.export(&out).unwrap().rows, 2);

    let text = std::fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "timestamp,DB1_0_INT,DB1_2_INT");
    assert!(lines[1].ends_with(",1,"));
    assert!(lines[2].ends_with(",2,5"));
}

#[test]
fn test_chart_series_follow_buffer() {
    let dir = TempDir::new().unwrap();
    let plc = create_test_plc();
    let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
    let var = VariableBuilder::new(1).build();
    script_ints(&plc, var, &[3, 9]);

    engine.connect("192.168.0.1", 0, 1).unwrap();
    engine.add_variable(var).unwrap();
    engine.start(Duration::from_secs(1), PlotKind::Scatter).unwrap();
    engine.tick_now().unwrap();
    engine.tick_now().unwrap();

    let series = engine.chart_series().unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].label, "DB1.0 (9)");
    assert_eq!(series[0].kind, PlotKind::Scatter);
    let values: Vec<f64> = series[0].points.iter().map(|p| p[1]).collect();
    assert_eq!(values, vec![3.0, 9.0]);
    common::assert_float_eq(series[0].statistics().mean, 6.0, 1e-9);
}
