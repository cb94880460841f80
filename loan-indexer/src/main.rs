use anyhow::{Context, Result};
use loan_core::dispatcher::{Dispatcher, Report};
use loan_core::event_log::EventLog;
use loan_core::lifecycle::LoanLifecycle;
use loan_core::logging;
use loan_core::request_state::{RetryingRequestStateReader, SnapshotRequestStateReader};
use loan_core::store::{EntityKind, InMemoryStore};
use std::convert::TryFrom;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::num::{NonZeroUsize, ParseIntError};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "loan-indexer",
    about = "Derives request and loan entities from recorded loan contract events.",
    rename_all = "kebab"
)]
struct Options {
    /// The log filter to use.
    ///
    /// This follows the `slog-envlogger` syntax (e.g. 'info,loan_core=debug').
    #[structopt(
        long,
        env = "LOAN_INDEXER_LOG",
        default_value = "warn,loan_indexer=info,loan_core=info"
    )]
    log_filter: String,

    /// File with one JSON encoded contract event per line. Events may be in any
    /// order, they are applied in chain order.
    #[structopt(long, env = "EVENTS_FILE", parse(from_os_str))]
    events: PathBuf,

    /// JSON file mapping decimal request ids to the contract's request state.
    #[structopt(long, env = "REQUEST_STATES_FILE", parse(from_os_str))]
    request_states: PathBuf,

    /// Where to write the resulting entities as JSON.
    #[structopt(long, env = "OUTPUT_FILE", parse(from_os_str))]
    output: PathBuf,

    /// Store snapshot to resume from and to update after the run. Events that
    /// are already part of the snapshot are skipped.
    #[structopt(long, env = "STORE_SNAPSHOT_FILE", parse(from_os_str))]
    store_snapshot: Option<PathBuf>,

    /// Only apply events emitted up to and including this block.
    #[structopt(long, env = "UNTIL_BLOCK")]
    until_block: Option<u64>,

    /// Number of worker threads events are partitioned over by id.
    #[structopt(long, env = "PARTITIONS", default_value = "4")]
    partitions: NonZeroUsize,

    /// How many times a contract state read is attempted before the event
    /// fails.
    #[structopt(long, env = "READ_ATTEMPTS", default_value = "3")]
    read_attempts: NonZeroUsize,

    /// The delay in milliseconds between contract state read attempts.
    #[structopt(
        long,
        env = "READ_RETRY_DELAY_MS",
        default_value = "500",
        parse(try_from_str = duration_millis),
    )]
    read_retry_delay_ms: Duration,
}

fn main() {
    let options = Options::from_args();
    let code = {
        let (_, _guard) = logging::init(&options.log_filter);
        log::info!("Starting loan indexer with runtime options: {:#?}", options);
        exit_code(run(&options))
    };
    // The async drain is flushed once the logging guard is dropped.
    process::exit(code);
}

fn exit_code(result: Result<Report>) -> i32 {
    match result {
        Ok(report) if report.failures.is_empty() => 0,
        Ok(report) => {
            log::error!("{} events could not be applied", report.failures.len());
            1
        }
        Err(err) => {
            log::error!("loan indexer failed: {:?}", err);
            2
        }
    }
}

fn run(options: &Options) -> Result<Report> {
    let mut events = EventLog::try_from(options.events.as_path())?;
    if let Some(until_block) = options.until_block {
        events.delete_events_starting_at_block(until_block.saturating_add(1));
    }
    log::info!(
        "Applying {} events up to block {:?}",
        events.len(),
        events.last_handled_block()
    );

    let snapshot = SnapshotRequestStateReader::try_from(options.request_states.as_path())?;
    let contract = Arc::new(RetryingRequestStateReader::new(
        Arc::new(snapshot),
        options.read_attempts,
        options.read_retry_delay_ms,
    ));
    let store = Arc::new(match &options.store_snapshot {
        Some(path) if path.exists() => InMemoryStore::read_from_file(path)?,
        _ => InMemoryStore::default(),
    });

    let lifecycle = Arc::new(LoanLifecycle::new(contract, store.clone()));
    let dispatcher = Dispatcher::new(lifecycle, options.partitions);
    for event in events.into_events() {
        dispatcher.submit(event)?;
    }
    let report = dispatcher.finish()?;
    log_report(&report);

    if let Some(path) = &options.store_snapshot {
        store.write_to_file(path)?;
        log::info!("Wrote store snapshot to {}", path.display());
    }
    write_entities(&store, &options.output)?;
    for kind in &EntityKind::ALL {
        log::info!("{} {} entities", store.count(*kind), kind);
    }

    Ok(report)
}

fn log_report(report: &Report) {
    log::info!("Applied {} events", report.applied);
    for (key, anomaly) in &report.anomalies {
        log::warn!("event {}: {}", key, anomaly);
    }
    for failure in &report.failures {
        log::error!(
            "{} event {} in block {} not applied: {}",
            failure.event.event.name(),
            failure.event.key(),
            failure.event.block_number,
            failure.reason
        );
    }
}

fn write_entities(store: &InMemoryStore, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("couldn't create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &store.entities())?;
    writer.flush()?;
    Ok(())
}

fn duration_millis(s: &str) -> Result<Duration, ParseIntError> {
    Ok(Duration::from_millis(s.parse()?))
}
