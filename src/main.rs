//! S7 Logger - Operator Console
//!
//! Line-oriented console around the acquisition engine. Runs against the
//! simulated controller; every session operation maps to one command.

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use s7_logger::backend::{ClearOutcome, EngineEvent, EngineHandle, LoggerBackend, SimulatedPlc};
use s7_logger::config::{self, AppState, LoggerConfig};
use s7_logger::export::ExportLayout;
use s7_logger::types::{ConnectionParams, PlotKind, VariableDescriptor};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(version, about = "Acquisition and logging console for S7 PLC variables")]
struct Args {
    /// Configuration file (TOML or JSON)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Journal file, overriding the configured path
    #[arg(long)]
    journal: Option<PathBuf>,

    /// Start with an empty session instead of restoring the journal
    #[arg(long)]
    no_replay: bool,
}

const HELP: &str = "\
Commands:
  connect [ip] [rack] [slot]    connect to the PLC (defaults to the last connection)
  disconnect                    close the connection
  add <DB1.0:INT>               register a variable
  remove <DB1.0:INT>            unregister a variable
  list                          show registered variables and their latest values
  start <interval_ms> [line|scatter]
  stop                          pause collection
  resume                        continue collection
  clear                         delete all collected data and the journal
  export <path> [long|wide]     write the session to CSV (or xlsx by extension)
  chart                         show chart series statistics
  status                        show session state and statistics
  quit";

/// Logs go to stderr (warnings only, to keep the prompt readable) and to a
/// daily rolling file in the app data directory
fn init_tracing() -> Option<WorkerGuard> {
    let (file_layer, guard) = match config::ensure_app_data_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir.join("logs"), "s7-logger.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new("info,s7_logger=debug")),
                );
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(LevelFilter::WARN),
        )
        .with(file_layer)
        .init();

    guard
}

fn load_config(args: &Args, app_state: &mut AppState) -> anyhow::Result<LoggerConfig> {
    let last_path = app_state.last_config_path.clone();
    let mut config = match (&args.config, &last_path) {
        (Some(path), _) => {
            let config = LoggerConfig::load(path)
                .with_context(|| format!("Failed to load configuration {:?}", path))?;
            app_state.last_config_path = Some(path.clone());
            config
        }
        (None, Some(last)) => match LoggerConfig::load(last) {
            Ok(config) => {
                tracing::info!("Using last configuration {:?}", last);
                config
            }
            Err(e) => {
                tracing::warn!("Ignoring last configuration {:?}: {}", last, e);
                LoggerConfig::default()
            }
        },
        (None, None) => LoggerConfig::default(),
    };

    if let Some(journal) = &args.journal {
        config.journal.path = Some(journal.clone());
    }
    if args.no_replay {
        config.journal.replay_on_start = false;
    }
    Ok(config)
}

fn parse_variable(arg: Option<&str>) -> anyhow::Result<VariableDescriptor> {
    let arg = arg.ok_or_else(|| anyhow!("Expected a variable such as DB1.0:INT"))?;
    arg.parse().map_err(|e: String| anyhow!(e))
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn print_events(engine: &EngineHandle) {
    for event in engine.drain_events() {
        match event {
            EngineEvent::VariableUnreachable { variable, failures } => {
                println!("! {} unreachable ({} failed reads)", variable, failures)
            }
            EngineEvent::VariableRecovered(variable) => println!("! {} recovered", variable),
            EngineEvent::JournalFailure(error) => println!("! journal write failed: {}", error),
            EngineEvent::Replayed { records, variables } => println!(
                "Restored {} samples for {} variables from the journal",
                records, variables
            ),
            _ => {}
        }
    }
}

fn print_status(engine: &EngineHandle) -> anyhow::Result<()> {
    let session = engine.session()?;
    let stats = engine.stats()?;

    println!("State:      {}", session.state);
    if let Some(connection) = &session.connection {
        println!("Connection: {}", connection);
    }
    println!(
        "Interval:   {} ms ({})",
        session.interval.as_millis(),
        session.plot_kind.display_name()
    );
    if let Some(started) = session.started_at {
        println!("Started:    {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    let journal_size = std::fs::metadata(&session.journal_path)
        .map(|m| config::format_file_size(m.len()))
        .unwrap_or_else(|_| "absent".to_string());
    println!("Journal:    {:?} ({})", session.journal_path, journal_size);
    println!(
        "Ticks:      {} (avg {:.0} us, last {} us)",
        stats.ticks, stats.avg_tick_time_us, stats.last_tick_time_us
    );
    println!(
        "Reads:      {} ok, {} failed ({:.1}% success)",
        stats.successful_reads,
        stats.failed_reads,
        stats.success_rate()
    );
    println!(
        "Latency:    avg {:.0} us, min {} us, max {} us, jitter {} us",
        stats.avg_read_time_us, stats.min_latency_us, stats.max_latency_us, stats.jitter_us
    );
    if stats.journal_failures > 0 || stats.dropped_events > 0 {
        println!(
            "Dropped:    {} journal writes, {} events",
            stats.journal_failures, stats.dropped_events
        );
    }
    Ok(())
}

fn run_command(
    engine: &EngineHandle,
    app_state: &mut AppState,
    line: &str,
) -> anyhow::Result<bool> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(true);
    };

    match command {
        "help" | "?" => println!("{}", HELP),
        "quit" | "exit" => return Ok(false),
        "connect" => {
            let last = app_state.connection_or_default();
            let params = ConnectionParams::new(
                words.next().unwrap_or(last.ip.as_str()),
                words.next().map(str::parse::<u16>).transpose()?.unwrap_or(last.rack),
                words.next().map(str::parse::<u16>).transpose()?.unwrap_or(last.slot),
            );
            engine.connect_with(params.clone())?;
            println!("Connected to {}", params);
            app_state.update_last_connection(&params);
            app_state.save()?;
        }
        "disconnect" => engine.disconnect()?,
        "add" => engine.add_variable(parse_variable(words.next())?)?,
        "remove" => engine.remove_variable(&parse_variable(words.next())?)?,
        "list" => {
            let latest = engine.latest()?;
            for var in engine.variables()? {
                match latest.get(&var) {
                    Some(sample) => println!("{}  {}", var, sample.value),
                    None => println!("{}  -", var),
                }
            }
        }
        "start" => {
            let interval: u64 = words
                .next()
                .ok_or_else(|| anyhow!("Expected an interval in milliseconds"))?
                .parse()
                .context("Invalid interval")?;
            let kind = match words.next() {
                Some(kind) => kind.parse().map_err(|e: String| anyhow!(e))?,
                None => PlotKind::Line,
            };
            engine.start(Duration::from_millis(interval), kind)?;
        }
        "stop" => engine.stop()?,
        "resume" => engine.resume()?,
        "clear" => {
            let confirmed = confirm("Delete all collected data and the journal?")?;
            match engine.clear(confirmed)? {
                ClearOutcome::Cancelled => println!("Nothing cleared"),
                ClearOutcome::Cleared { samples } => println!("Cleared {} samples", samples),
            }
        }
        "export" => {
            let path = words
                .next()
                .map(PathBuf::from)
                .or_else(|| app_state.last_export_path.clone())
                .ok_or_else(|| anyhow!("Expected an output path"))?;
            let summary = match words.next() {
                Some(layout) => {
                    let layout: ExportLayout = layout.parse().map_err(|e: String| anyhow!(e))?;
                    engine.export_with(layout, &path)?
                }
                None => engine.export(&path)?,
            };
            println!("Wrote {} rows to {:?}", summary.rows, summary.path);
            app_state.last_export_path = Some(summary.path);
            app_state.save()?;
        }
        "chart" => {
            for series in engine.chart_series()? {
                let stats = series.statistics();
                if stats.is_valid() {
                    println!(
                        "{:<20} n={} min={:.3} max={:.3} mean={:.3} std={:.3}",
                        series.label, stats.count, stats.min, stats.max, stats.mean, stats.std_dev
                    );
                } else {
                    println!("{:<20} no samples", series.label);
                }
            }
        }
        "status" => print_status(engine)?,
        other => bail!("Unknown command '{}'; type 'help'", other),
    }
    Ok(true)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_tracing();

    tracing::info!("Starting S7 Logger");

    let mut app_state = AppState::load_or_default();
    let config = load_config(&args, &mut app_state)?;

    let plc = SimulatedPlc::new();
    let (backend, engine) = LoggerBackend::new(config, Box::new(plc))?;
    let worker = backend.spawn().context("Failed to spawn polling thread")?;

    println!("S7 Logger - type 'help' for commands");
    print_events(&engine);

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        match run_command(&engine, &mut app_state, line.trim()) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("Error: {:#}", e),
        }
        print_events(&engine);
    }

    tracing::info!("Shutting down...");
    engine.shutdown()?;
    if worker.join().is_err() {
        tracing::error!("Polling thread panicked");
    }
    if let Err(e) = app_state.save() {
        tracing::warn!("Failed to save app state: {}", e);
    }
    Ok(())
}
