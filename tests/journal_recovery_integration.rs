//! Integration tests for crash recovery through the journal
//!
//! A "crash" is simulated by dropping an engine without Clear or shutdown and
//! building a new one over the same journal file.

mod common;

use common::builders::{journal_path, ConfigBuilder, VariableBuilder};
use common::mock_helpers::{create_engine, create_test_plc, script_ints};
use s7_logger::backend::EngineEvent;
use s7_logger::export::{export_from_journal, ExportLayout};
use s7_logger::journal::Journal;
use s7_logger::types::{DataType, PlotKind, SessionState, Value};
use std::io::Write;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_replay_restores_identical_history() {
    let dir = TempDir::new().unwrap();
    let a = VariableBuilder::new(1).build();
    let b = VariableBuilder::new(2).offset(4).data_type(DataType::Real).build();

    let before = {
        let plc = create_test_plc();
        let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
        engine.connect("192.168.0.1", 0, 1).unwrap();
        engine.add_variable(a).unwrap();
        engine.add_variable(b).unwrap();
        engine.start(Duration::from_secs(1), PlotKind::Line).unwrap();
        for _ in 0..4 {
            engine.tick_now().unwrap();
        }
        (engine.history(&a).unwrap(), engine.history(&b).unwrap())
    };

    let plc = create_test_plc();
    let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);

    assert_eq!(engine.state().unwrap(), SessionState::Idle);
    assert_eq!(engine.variables().unwrap(), vec![a, b]);
    assert_eq!(engine.history(&a).unwrap(), before.0);
    assert_eq!(engine.history(&b).unwrap(), before.1);
    assert!(engine
        .drain_events()
        .iter()
        .any(|e| matches!(e, EngineEvent::Replayed { records: 8, variables: 2 })));
}

#[test]
fn test_samples_after_restart_sort_after_replayed_ones() {
    let dir = TempDir::new().unwrap();
    let var = VariableBuilder::new(1).build();

    {
        let plc = create_test_plc();
        script_ints(&plc, var, &[1, 2]);
        let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
        engine.connect("192.168.0.1", 0, 1).unwrap();
        engine.add_variable(var).unwrap();
        engine.start(Duration::from_secs(1), PlotKind::Line).unwrap();
        engine.tick_now().unwrap();
        engine.tick_now().unwrap();
    }

    let plc = create_test_plc();
    script_ints(&plc, var, &[3]);
    let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
    engine.connect("192.168.0.1", 0, 1).unwrap();
    engine.start(Duration::from_secs(1), PlotKind::Line).unwrap();
    engine.tick_now().unwrap();

    let history = engine.history(&var).unwrap();
    let values: Vec<Value> = history.iter().map(|s| s.value).collect();
    assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert_eq!(Journal::open(journal_path(&dir)).unwrap().record_count().unwrap(), 3);
}

#[test]
fn test_clear_then_replay_yields_empty_session() {
    let dir = TempDir::new().unwrap();
    let var = VariableBuilder::new(1).build();

    {
        let plc = create_test_plc();
        let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
        engine.connect("192.168.0.1", 0, 1).unwrap();
        engine.add_variable(var).unwrap();
        engine.start(Duration::from_secs(1), PlotKind::Line).unwrap();
        engine.tick_now().unwrap();
        engine.stop().unwrap();
        engine.clear(true).unwrap();
    }

    assert!(!journal_path(&dir).exists());

    let plc = create_test_plc();
    let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
    assert!(engine.history(&var).unwrap().is_empty());
    assert!(engine.variables().unwrap().is_empty());
    assert!(!journal_path(&dir).exists());
}

#[test]
fn test_truncated_last_line_is_skipped() {
    let dir = TempDir::new().unwrap();
    let var = VariableBuilder::new(1).build();

    {
        let plc = create_test_plc();
        script_ints(&plc, var, &[7, 8]);
        let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
        engine.connect("192.168.0.1", 0, 1).unwrap();
        engine.add_variable(var).unwrap();
        engine.start(Duration::from_secs(1), PlotKind::Line).unwrap();
        engine.tick_now().unwrap();
        engine.tick_now().unwrap();
    }

    // A crash in the middle of an append leaves a partial line behind
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(journal_path(&dir))
        .unwrap();
    file.write_all(br#"{"variable":"DB1_0_INT","elapsed_"#).unwrap();
    drop(file);

    let plc = create_test_plc();
    let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
    let values: Vec<Value> = engine
        .history(&var)
        .unwrap()
        .iter()
        .map(|s| s.value)
        .collect();
    assert_eq!(values, vec![Value::Int(7), Value::Int(8)]);
}

#[test]
fn test_replay_disabled_starts_empty() {
    let dir = TempDir::new().unwrap();
    let var = VariableBuilder::new(1).build();

    {
        let plc = create_test_plc();
        let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
        engine.connect("192.168.0.1", 0, 1).unwrap();
        engine.add_variable(var).unwrap();
        engine.start(Duration::from_secs(1), PlotKind::Line).unwrap();
        engine.tick_now().unwrap();
    }

    let plc = create_test_plc();
    let config = ConfigBuilder::in_dir(&dir).replay_on_start(false).build();
    let (_backend, engine) = create_engine(config, &plc);
    assert!(engine.history(&var).unwrap().is_empty());
    assert!(journal_path(&dir).exists());
}

#[test]
fn test_export_straight_from_journal() {
    let dir = TempDir::new().unwrap();
    let var = VariableBuilder::new(1).build();

    {
        let plc = create_test_plc();
        script_ints(&plc, var, &[10, 12, 15]);
        let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
        engine.connect("192.168.0.1", 0, 1).unwrap();
        engine.add_variable(var).unwrap();
        engine.start(Duration::from_secs(1), PlotKind::Line).unwrap();
        for _ in 0..3 {
            engine.tick_now().unwrap();
        }
    }

    let out = dir.path().join("recovered.csv");
    let summary = export_from_journal(journal_path(&dir), ExportLayout::Long, &out).unwrap();
    assert_eq!(summary.rows, 3);

    let text = std::fs::read_to_string(&out).unwrap();
    let values: Vec<&str> = text
        .lines()
        .skip(1)
        .filter_map(|line| line.rsplit(',').next())
        .collect();
    assert_eq!(values, vec!["10", "12", "15"]);
}

#[test]
fn test_sample_after_torn_line_survives_next_restart() {
    let dir = TempDir::new().unwrap();
    let var = VariableBuilder::new(1).build();

    {
        let plc = create_test_plc();
        script_ints(&plc, var, &[7]);
        let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
        engine.connect("192.168.0.1", 0, 1).unwrap();
        engine.add_variable(var).unwrap();
        engine.start(Duration::from_secs(1), PlotKind::Line).unwrap();
        engine.tick_now().unwrap();
    }

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(journal_path(&dir))
        .unwrap();
    file.write_all(br#"{"variable":"DB1_0_INT","elapsed_"#).unwrap();
    drop(file);

    {
        let plc = create_test_plc();
        script_ints(&plc, var, &[99]);
        let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
        engine.connect("192.168.0.1", 0, 1).unwrap();
        engine.start(Duration::from_secs(1), PlotKind::Line).unwrap();
        let report = engine.tick_now().unwrap();
        assert!(report.journal_error.is_none());
    }

    let plc = create_test_plc();
    let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
    let values: Vec<Value> = engine
        .history(&var)
        .unwrap()
        .iter()
        .map(|s| s.value)
        .collect();
    assert_eq!(values, vec![Value::Int(7), Value::Int(99)]);
}

#[test]
fn test_non_finite_real_replays() {
    let dir = TempDir::new().unwrap();
    let var = VariableBuilder::new(1).data_type(DataType::Real).build();

    {
        let plc = create_test_plc();
        plc.script_values(var, [Value::Real(f32::NAN), Value::Real(f32::INFINITY)]);
        let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
        engine.connect("192.168.0.1", 0, 1).unwrap();
        engine.add_variable(var).unwrap();
        engine.start(Duration::from_secs(1), PlotKind::Line).unwrap();
        engine.tick_now().unwrap();
        engine.tick_now().unwrap();
    }

    let plc = create_test_plc();
    let (_backend, engine) = create_engine(ConfigBuilder::in_dir(&dir).build(), &plc);
    let history = engine.history(&var).unwrap();
    assert_eq!(history.len(), 2);
    assert!(matches!(history[0].value, Value::Real(v) if v.is_nan()));
    assert_eq!(history[1].value, Value::Real(f32::INFINITY));
}
