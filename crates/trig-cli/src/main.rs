use anyhow::{anyhow, bail, Result};
use clap::{Args, Parser, Subcommand};
use plotters::prelude::*;
use std::{
    io::{self, Read},
    path::{Path, PathBuf},
};
use trig_lib::{
    detectors::{detect_analog, detect_digital, AnalogParams},
    io::{
        channels::parse_samples, marker::read_marker_file, ChannelSource, CsvChannelSource,
        EdfChannelSource,
    },
    signal::{ChannelDescriptor, ChannelKind},
    EventTable,
};
use trig_run::{pipeline::ConditionSummary, read_config, run_pipeline, write_outputs};

#[derive(Parser)]
#[command(
    name = "trig",
    version,
    about = "Trigger/event coding for MEG recordings"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where channel samples come from.
#[derive(Args, Clone)]
struct SourceArgs {
    /// CSV/TSV with one column per channel; with no --channel, one sample per line
    #[arg(long)]
    input: Option<PathBuf>,
    /// EDF export to read channels from
    #[arg(long, conflicts_with = "input")]
    edf: Option<PathBuf>,
    /// Sample rate of --input data (Hz)
    #[arg(long, default_value_t = 1200.0)]
    fs: f64,
}

#[derive(Args, Clone)]
struct AnalogArgs {
    #[arg(long, default_value_t = 0.5)]
    amplitude_threshold: f64,
    #[arg(long, default_value_t = 0.1)]
    derivative_threshold: f64,
    #[arg(long, default_value_t = 0.1)]
    dead_time: f64,
    /// Band-pass cutoffs applied before detection
    #[arg(long, num_args = 2, value_names = ["LOW", "HIGH"])]
    band: Option<Vec<f64>>,
    /// Detect falling instead of rising deflections
    #[arg(long)]
    invert: bool,
}

impl AnalogArgs {
    fn params(&self) -> Result<AnalogParams> {
        let band = match self.band.as_deref() {
            Some(&[low, high]) => Some([low, high]),
            Some(_) => bail!("--band takes exactly two values"),
            None => None,
        };
        Ok(AnalogParams {
            amplitude_threshold: self.amplitude_threshold,
            derivative_threshold: self.derivative_threshold,
            dead_time: self.dead_time,
            band,
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Detect analog onsets on one channel; prints events as JSON
    DetectAnalog {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        channel: Option<String>,
        /// Condition label for the onsets (defaults to the channel name)
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        analog: AnalogArgs,
    },
    /// Detect digital code transitions on one channel; prints events as JSON
    DetectDigital {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        channel: Option<String>,
    },
    /// Run a configured pipeline and write the marker file
    Run {
        #[arg(long)]
        config: PathBuf,
        #[command(flatten)]
        source: SourceArgs,
        /// Marker file to write; an existing file is kept as a timestamped backup
        #[arg(long)]
        marker_out: Option<PathBuf>,
        /// BIDS-style events.tsv to write
        #[arg(long)]
        events_tsv: Option<PathBuf>,
    },
    /// Summarise the conditions of an existing marker file as JSON
    Markers {
        #[arg(long)]
        input: PathBuf,
    },
    /// Render one analog channel and its detected onsets to a PNG
    PlotChannel {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        channel: Option<String>,
        #[command(flatten)]
        analog: AnalogArgs,
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::DetectAnalog {
            source,
            channel,
            name,
            analog,
        } => cmd_detect_analog(&source, channel.as_deref(), name.as_deref(), &analog)?,
        Commands::DetectDigital { source, channel } => {
            cmd_detect_digital(&source, channel.as_deref())?
        }
        Commands::Run {
            config,
            source,
            marker_out,
            events_tsv,
        } => cmd_run(&config, &source, marker_out.as_deref(), events_tsv.as_deref())?,
        Commands::Markers { input } => cmd_markers(&input)?,
        Commands::PlotChannel {
            source,
            channel,
            analog,
            out,
        } => cmd_plot_channel(&source, channel.as_deref(), &analog, &out)?,
    }
    Ok(())
}

fn open_source(args: &SourceArgs) -> Result<Box<dyn ChannelSource>> {
    if let Some(edf) = &args.edf {
        Ok(Box::new(EdfChannelSource::open(edf)?))
    } else if let Some(input) = &args.input {
        Ok(Box::new(CsvChannelSource::open(input, args.fs)?))
    } else {
        Err(anyhow!("a channel source is required: pass --input or --edf"))
    }
}

/// A named channel from the source, or a bare sample list from --input/stdin.
fn load_channel(
    args: &SourceArgs,
    channel: Option<&str>,
    kind: ChannelKind,
    invert: bool,
) -> Result<ChannelDescriptor> {
    if let Some(name) = channel {
        return open_source(args)?.descriptor(name, kind, invert);
    }
    if args.edf.is_some() {
        bail!("--edf needs --channel");
    }
    let (name, text) = match &args.input {
        Some(path) => (
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "input".into()),
            std::fs::read_to_string(path)?,
        ),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            ("stdin".to_string(), buf)
        }
    };
    Ok(ChannelDescriptor {
        name,
        kind,
        invert,
        fs: args.fs,
        trials: vec![parse_samples(&text)?],
    })
}

fn print_events(table: &EventTable) -> Result<()> {
    println!("{}", serde_json::to_string(table)?);
    Ok(())
}

fn cmd_detect_analog(
    source: &SourceArgs,
    channel: Option<&str>,
    name: Option<&str>,
    analog: &AnalogArgs,
) -> Result<()> {
    let ch = load_channel(source, channel, ChannelKind::Analog, analog.invert)?;
    let label = name.unwrap_or(ch.name.as_str()).to_string();
    let table = detect_analog(&ch, &label, &analog.params()?)?;
    print_events(&table)
}

fn cmd_detect_digital(source: &SourceArgs, channel: Option<&str>) -> Result<()> {
    let ch = load_channel(source, channel, ChannelKind::Digital, false)?;
    let table = detect_digital(&ch)?;
    print_events(&table)
}

fn cmd_run(
    config: &Path,
    source: &SourceArgs,
    marker_out: Option<&Path>,
    events_tsv: Option<&Path>,
) -> Result<()> {
    let config = read_config(config)?;
    let source = open_source(source)?;
    let output = run_pipeline(&config, source.as_ref())?;
    let summary = write_outputs(&config, source.as_ref(), &output, marker_out, events_tsv)?;
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn cmd_markers(input: &Path) -> Result<()> {
    let table = read_marker_file(input)?;
    let summary: Vec<ConditionSummary> = table
        .conditions()
        .into_iter()
        .map(|name| ConditionSummary {
            count: table.with_condition(&name).count(),
            name,
            color: None,
        })
        .collect();
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn cmd_plot_channel(
    source: &SourceArgs,
    channel: Option<&str>,
    analog: &AnalogArgs,
    out: &Path,
) -> Result<()> {
    let ch = load_channel(source, channel, ChannelKind::Analog, analog.invert)?;
    let table = detect_analog(&ch, &ch.name, &analog.params()?)?;
    let samples = ch
        .trials
        .first()
        .ok_or_else(|| anyhow!("channel {} has no samples", ch.name))?;
    let points: Vec<(f64, f64)> = samples
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as f64 / ch.fs, v))
        .collect();
    let onsets: Vec<f64> = table
        .iter()
        .filter(|e| e.trial == 0)
        .map(|e| e.onset)
        .collect();
    draw_channel(out, &ch.name, &points, &onsets)
}

/// `(min, max)` of `values`, widened when flat so the axis stays drawable.
fn value_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        (0.0, 1.0)
    } else if lo == hi {
        (lo - 0.5, hi + 0.5)
    } else {
        (lo, hi)
    }
}

fn draw_channel(path: &Path, title: &str, points: &[(f64, f64)], onsets: &[f64]) -> Result<()> {
    let backend = BitMapBackend::new(path, (1000, 400));
    let root = backend.into_drawing_area();
    root.fill(&WHITE)?;
    let (x_min, x_max) = value_range(points.iter().map(|p| p.0));
    let (y_min, y_max) = value_range(points.iter().map(|p| p.1));
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .caption(format!("{title}: {} onsets", onsets.len()), ("sans-serif", 22))
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    chart.configure_mesh().x_desc("time (s)").draw()?;
    chart.draw_series(LineSeries::new(points.iter().copied(), &BLUE))?;
    for &onset in onsets {
        chart.draw_series(LineSeries::new(
            [(onset, y_min), (onset, y_max)],
            &RED,
        ))?;
    }
    root.present()?;
    Ok(())
}
