use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::info;
use pulse_lib::{
    clock::{Clock, MonotonicClock},
    config::Config,
    detectors::ppg::{analyze_recording, analyze_samples},
    io::{
        csv as csv_io,
        history::{HistoryStore, JsonHistoryStore},
        text as text_io,
    },
    link::{AnalysisClient, JsonLinesPublisher, LoopbackAnalyzer, LoopbackBroker},
    metrics::hrv::finalize_series,
    queue::sample_queue,
    session::{LiveReading, SessionController, SessionOutcome},
    signal::{IntervalSeries, TimeSeries},
    source::{spawn_sampler, SyntheticPpg, VirtualTimer, Waveform},
};
use serde::Serialize;
use std::{
    io::{self, Read},
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(name = "pulse", version, about = "PPG heartbeat monitor tools")]
struct Cli {
    /// TOML configuration file; defaults apply to anything it leaves out
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SimMode {
    #[value(name = "heart-rate")]
    HeartRate,
    #[value(name = "hrv")]
    Hrv,
    #[value(name = "readiness")]
    Readiness,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SimWaveform {
    Pulse,
    Sine,
}

impl From<SimWaveform> for Waveform {
    fn from(shape: SimWaveform) -> Self {
        match shape {
            SimWaveform::Pulse => Waveform::Pulse,
            SimWaveform::Sine => Waveform::Sine,
        }
    }
}

/// One heart-rate screen refresh as printed by `simulate --mode heart-rate`.
#[derive(Serialize)]
struct HeartRateLine {
    #[serde(flatten)]
    reading: LiveReading,
    waveform: Vec<f64>,
}

struct SimOptions {
    mode: SimMode,
    bpm: f64,
    seconds: u64,
    noise: f64,
    seed: u64,
    waveform: SimWaveform,
    offline: bool,
    history: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Time-domain HRV from newline-delimited intervals (ms) read from stdin or --input
    Hrv {
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Run smoothing, beat detection and BPM reporting over a recording
    Detect {
        #[arg(long, default_value_t = 200.0)]
        fs: f64,
        /// Newline-delimited raw values sampled at --fs
        #[arg(long, conflicts_with = "csv")]
        input: Option<PathBuf>,
        /// CSV with t_ms,value columns
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Drive a session against a synthetic sensor on virtual time
    Simulate {
        #[arg(long, value_enum, default_value = "hrv")]
        mode: SimMode,
        #[arg(long, default_value_t = 72.0)]
        bpm: f64,
        #[arg(long, default_value_t = 30)]
        seconds: u64,
        /// Uniform noise as a fraction of the pulse amplitude
        #[arg(long, default_value_t = 0.0)]
        noise: f64,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, value_enum, default_value = "pulse")]
        waveform: SimWaveform,
        /// Readiness mode: run without the loopback analysis service
        #[arg(long)]
        offline: bool,
        /// History file; defaults to `session.history_path` from the config
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Real-time HRV session fed by a sampler thread
    Live {
        #[arg(long, default_value_t = 72.0)]
        bpm: f64,
        #[arg(long)]
        duration_ms: Option<u64>,
        /// History file; defaults to `session.history_path` from the config
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Print stored session records
    History {
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();
    let config = match cli.config.as_deref() {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    match cli.command {
        Commands::Hrv { input } => cmd_hrv(input.as_deref())?,
        Commands::Detect { fs, input, csv } => {
            cmd_detect(&config, fs, input.as_deref(), csv.as_deref())?
        }
        Commands::Simulate {
            mode,
            bpm,
            seconds,
            noise,
            seed,
            waveform,
            offline,
            history,
        } => {
            let options = SimOptions {
                mode,
                bpm,
                seconds,
                noise,
                seed,
                waveform,
                offline,
                history,
            };
            cmd_simulate(config, options)?
        }
        Commands::Live {
            bpm,
            duration_ms,
            history,
        } => cmd_live(config, bpm, duration_ms, history)?,
        Commands::History { path } => cmd_history(&config, path)?,
    }
    Ok(())
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("reading stdin")?;
    Ok(buf)
}

fn read_intervals(input: Option<&Path>) -> Result<IntervalSeries> {
    match input {
        Some(path) => text_io::read_interval_series(path),
        None => text_io::parse_interval_series(&read_stdin()?),
    }
}

fn history_store(config: &Config, path: Option<PathBuf>) -> Box<dyn HistoryStore> {
    let path = path.unwrap_or_else(|| config.session.history_path.clone());
    Box::new(JsonHistoryStore::new(path))
}

fn cmd_hrv(input: Option<&Path>) -> Result<()> {
    let series = read_intervals(input)?;
    let metrics = finalize_series(&series);
    println!("{}", serde_json::to_string(&metrics)?);
    Ok(())
}

fn cmd_detect(config: &Config, fs: f64, input: Option<&Path>, csv: Option<&Path>) -> Result<()> {
    if fs <= 0.0 {
        bail!("--fs must be positive, got {fs}");
    }
    let analysis = match csv {
        Some(path) => {
            let samples = csv_io::read_timed_samples(path)?;
            let rate = csv_io::infer_rate_hz(&samples).unwrap_or(fs);
            analyze_samples(samples, rate, &config.monitor)
        }
        None => {
            let data = match input {
                Some(path) => text_io::read_f64_series(path)?,
                None => text_io::parse_f64_series(&read_stdin()?)?,
            };
            analyze_recording(&TimeSeries { fs, data }, &config.monitor)
        }
    };
    println!("{}", serde_json::to_string(&analysis)?);
    Ok(())
}

fn cmd_simulate(mut config: Config, options: SimOptions) -> Result<()> {
    if options.seconds == 0 {
        bail!("--seconds must be at least 1");
    }
    let duration_ms = options.seconds * 1000;
    config.session.hrv_duration_ms = duration_ms;
    let (producer, consumer) = sample_queue(config.monitor.queue_capacity);
    let sensor = SyntheticPpg::new(options.bpm)
        .with_noise(options.noise, options.seed)
        .with_waveform(options.waveform.into());
    let timer = VirtualTimer::new(sensor, producer, config.monitor.sample_rate_hz);
    let telemetry = Box::new(JsonLinesPublisher::new(io::stderr()));
    let history = history_store(&config, options.history);

    // the analyzer answers on the configured topics until it is dropped
    let broker = LoopbackBroker::new();
    let _analyzer = (options.mode == SimMode::Readiness && !options.offline).then(|| {
        LoopbackAnalyzer::spawn(
            &broker,
            &config.link.request_topic,
            &config.link.response_topic,
        )
    });
    let transport = broker.client(&config.link.response_topic);
    let client = AnalysisClient::new(Box::new(transport), config.link.request_topic.clone());
    let mut controller = SessionController::new(config, timer, consumer, telemetry, history)
        .with_analysis(client);

    match options.mode {
        SimMode::HeartRate => {
            controller.start_heart_rate();
            while controller.clock().now_ms() < duration_ms {
                let reading = controller.tick();
                if reading.report.is_some() {
                    let line = HeartRateLine {
                        reading,
                        waveform: controller.monitor().waveform(),
                    };
                    println!("{}", serde_json::to_string(&line)?);
                }
            }
            controller.stop();
        }
        SimMode::Hrv => match controller.run_hrv() {
            SessionOutcome::Completed(metrics) => {
                println!("{}", serde_json::to_string(&metrics)?)
            }
            other => bail!("simulated session ended without metrics: {other:?}"),
        },
        SimMode::Readiness => match controller.run_readiness() {
            SessionOutcome::Completed(result) => {
                println!("{}", serde_json::to_string(&result)?)
            }
            other => bail!("readiness analysis gave no result: {other:?}"),
        },
    }
    Ok(())
}

fn cmd_live(
    mut config: Config,
    bpm: f64,
    duration_ms: Option<u64>,
    history: Option<PathBuf>,
) -> Result<()> {
    if let Some(duration_ms) = duration_ms {
        config.session.hrv_duration_ms = duration_ms;
    }
    config.validate()?;
    let clock = MonotonicClock::new();
    let (producer, consumer) = sample_queue(config.monitor.queue_capacity);
    let sampler = spawn_sampler(
        SyntheticPpg::new(bpm),
        producer,
        clock,
        config.monitor.sample_rate_hz,
    );
    let telemetry = Box::new(JsonLinesPublisher::new(io::stderr()));
    let history = history_store(&config, history);
    let mut controller = SessionController::new(config, clock, consumer, telemetry, history);
    let mut last_second = 0;
    controller.on_progress(move |progress| {
        let second = progress.elapsed_ms / 1000;
        if second > last_second {
            last_second = second;
            info!(
                "{:>3.0}% collected, {} intervals",
                progress.fraction() * 100.0,
                progress.intervals
            );
        }
    });
    let outcome = controller.run_hrv();
    sampler.stop();
    match outcome {
        SessionOutcome::Completed(metrics) => println!("{}", serde_json::to_string(&metrics)?),
        other => bail!("live session ended without metrics: {other:?}"),
    }
    Ok(())
}

fn cmd_history(config: &Config, path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(|| config.session.history_path.clone());
    let records = JsonHistoryStore::new(path).read_all();
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
