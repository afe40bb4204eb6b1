//! tpxflow command-line interface.
//!
//! Replays recorded streams or listens on the camera's UDP port, runs the
//! standard pipeline and writes its output to HDF5.

use clap::{Parser, Subcommand};
use crossbeam_channel::{unbounded, Receiver};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tpxflow_core::ReferenceClock;
use tpxflow_io::{FileSampler, Hdf5Sink, SinkCounts, SinkOptions, UdpSampler};
use tpxflow_pipeline::{Message, Pipeline, PipelineConfig, PipelineError, SamplerConfig};
use tpxflow_tpx::{DecodeStats, Decoder};

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    TpxflowIo(#[from] tpxflow_io::Error),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

/// Timepix3 acquisition: decoding, time-of-flight windowing and centroiding.
#[derive(Parser)]
#[command(name = "tpxflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded stream through the pipeline
    Replay {
        /// Recorded stream (8-byte start time followed by raw words)
        input: PathBuf,

        /// Output HDF5 file
        #[arg(short, long)]
        output: PathBuf,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Centroid workers (overrides the configuration)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Acquire from the camera's UDP stream
    Listen {
        /// Address to bind
        #[arg(short, long, default_value = "0.0.0.0:8192")]
        bind: String,

        /// Output HDF5 file
        #[arg(short, long)]
        output: PathBuf,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Centroid workers (overrides the configuration)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Acquisition length in seconds
        #[arg(short, long, default_value = "60")]
        duration: f64,
    },

    /// Show information about a recorded stream
    Info {
        /// Recorded stream
        input: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            config,
            workers,
        } => replay(&input, &output, load_config(config.as_deref(), workers)?),
        Commands::Listen {
            bind,
            output,
            config,
            workers,
            duration,
        } => listen(
            &bind,
            &output,
            load_config(config.as_deref(), workers)?,
            duration,
        ),
        Commands::Info { input } => info_command(&input),
    }
}

fn replay(input: &Path, output: &Path, config: PipelineConfig) -> Result<()> {
    let mut config = config.for_sampler_input();
    let clock = ReferenceClock::default();
    let mut sampler = FileSampler::open(input, config.sampler.clone(), clock)?;
    config.window = config.window.with_start_time_ns(sampler.start_time_ns());
    info!(
        "replaying {} ({} words)",
        input.display(),
        sampler.word_count()
    );

    let start = Instant::now();
    let mut pipeline = Pipeline::standard(&config)?;
    pipeline.start()?;
    let sink = spawn_sink(output, pipeline.output())?;

    let replayed = sampler.run(&pipeline.input());
    let report = pipeline.stop()?;
    let counts = join_sink(sink)?;
    let stats = replayed?;

    if report.faults() > 0 {
        warn!("{} worker(s) faulted", report.faults());
    }
    println!(
        "Replayed {} batches ({} bytes) in {:.2}s",
        stats.batches,
        stats.bytes,
        start.elapsed().as_secs_f64()
    );
    print_counts(&counts);
    Ok(())
}

fn listen(bind: &str, output: &Path, config: PipelineConfig, duration: f64) -> Result<()> {
    let config = config.for_sampler_input();
    let sampler = UdpSampler::bind(bind, config.sampler.clone(), ReferenceClock::default())?;

    let mut pipeline = Pipeline::standard(&config)?;
    pipeline.start()?;
    let sink = spawn_sink(output, pipeline.output())?;

    let stop = Arc::new(AtomicBool::new(false));
    let input = pipeline.input();
    let sampler_stop = Arc::clone(&stop);
    let listener = thread::Builder::new()
        .name("sampler".into())
        .spawn(move || sampler.run(&input, &sampler_stop))?;

    thread::sleep(Duration::from_secs_f64(duration.max(0.0)));
    stop.store(true, Ordering::Release);
    let sampled = listener
        .join()
        .map_err(|_| CliError::ThreadPanicked("sampler"))?;
    let report = pipeline.stop()?;
    let counts = join_sink(sink)?;
    let stats = sampled?;

    if report.faults() > 0 {
        warn!("{} worker(s) faulted", report.faults());
    }
    println!(
        "Received {} batches ({} bytes) in {:.1}s",
        stats.batches, stats.bytes, duration
    );
    print_counts(&counts);
    Ok(())
}

fn info_command(input: &Path) -> Result<()> {
    let mut sampler = FileSampler::open(input, SamplerConfig::default(), ReferenceClock::default())?;
    let (tx, rx) = unbounded();
    let sampled = sampler.run(&tx)?;

    let decoder = Decoder::default();
    let mut stats = DecodeStats::default();
    for message in rx.try_iter() {
        if let Message::RawBatch(raw) = message {
            stats.merge(&decoder.decode(&raw).1);
        }
    }

    println!("File: {}", input.display());
    println!("Start time: {} ns", sampler.start_time_ns());
    println!("Words: {}", sampler.word_count());
    println!("Pixels: {}", stats.pixels);
    println!("Triggers: {}", stats.triggers);
    println!("Clock words: {}", sampled.clock_words);
    println!("Clock discontinuities: {}", sampled.clock_discontinuities);
    println!("Unrecognized words: {}", stats.ignored);
    Ok(())
}

fn load_config(path: Option<&Path>, workers: Option<usize>) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(workers) = workers {
        config = config.with_centroid_workers(workers);
        config.validate()?;
    }
    Ok(config)
}

/// Drains the pipeline output into an HDF5 file until the sentinel.
fn spawn_sink(path: &Path, output: Receiver<Message>) -> Result<JoinHandle<Result<SinkCounts>>> {
    let mut sink = Hdf5Sink::create(path, &SinkOptions::default())?;
    let handle = thread::Builder::new()
        .name("sink".into())
        .spawn(move || {
            // Drain to the sentinel even after a write failure.
            let mut failure = None;
            for message in output.iter() {
                if message.is_sentinel() {
                    break;
                }
                if failure.is_none() {
                    if let Err(e) = sink.write_message(&message) {
                        error!("sink write failed, discarding further output: {e}");
                        failure = Some(e);
                    }
                }
            }
            if let Some(e) = failure {
                return Err(e.into());
            }
            sink.flush()?;
            Ok(sink.counts())
        })?;
    Ok(handle)
}

fn join_sink(handle: JoinHandle<Result<SinkCounts>>) -> Result<SinkCounts> {
    handle
        .join()
        .map_err(|_| CliError::ThreadPanicked("sink"))?
}

fn print_counts(counts: &SinkCounts) {
    println!("Events: {}", counts.events);
    println!("Centroids: {}", counts.centroids);
    println!("Trigger stamps: {}", counts.timestamps);
}
