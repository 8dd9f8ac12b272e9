use crate::signal::{ChannelDescriptor, ChannelKind};
use anyhow::{anyhow, bail, Context, Result};
use csv::{ReaderBuilder, Trim};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Raw samples of one channel: a sample rate and one array per trial.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelData {
    pub fs: f64,
    pub trials: Vec<Vec<f64>>,
}

/// Read-only access to the channels of one recording session.
pub trait ChannelSource {
    /// Identifier written into marker file headers.
    fn dataset(&self) -> String;
    fn channel_names(&self) -> Vec<String>;
    fn read_channel(&self, name: &str) -> Result<ChannelData>;

    /// Load `name` as a descriptor ready for detection.
    fn descriptor(&self, name: &str, kind: ChannelKind, invert: bool) -> Result<ChannelDescriptor> {
        let data = self.read_channel(name)?;
        Ok(ChannelDescriptor {
            name: name.to_string(),
            kind,
            invert,
            fs: data.fs,
            trials: data.trials,
        })
    }
}

/// Delimited text with a header row of channel names.
///
/// A column named `trial` (any case) splits rows into trials; its values must
/// cover `0..n` without gaps. `.tsv` files are tab separated, anything else
/// comma separated.
#[derive(Debug, Clone)]
pub struct CsvChannelSource {
    path: PathBuf,
    fs: f64,
    names: Vec<String>,
    columns: BTreeMap<String, Vec<Vec<f64>>>,
}

impl CsvChannelSource {
    pub fn open(path: &Path, fs: f64) -> Result<Self> {
        if fs.is_nan() || fs <= 0.0 {
            bail!("sample rate must be positive, got {fs}");
        }
        let delimiter = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
            _ => b',',
        };
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(Trim::All)
            .has_headers(true)
            .from_path(path)
            .with_context(|| format!("opening channel file {}", path.display()))?;
        let headers = reader.headers().context("reading channel header")?.clone();
        let trial_idx = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case("trial"));
        let names: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| Some(*idx) != trial_idx)
            .map(|(_, h)| h.to_string())
            .collect();

        let mut rows: BTreeMap<usize, Vec<Vec<f64>>> = BTreeMap::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("reading row {}", line + 2))?;
            let trial = match trial_idx {
                Some(idx) => record
                    .get(idx)
                    .unwrap_or_default()
                    .parse::<usize>()
                    .with_context(|| format!("row {}: trial is not an index", line + 2))?,
                None => 0,
            };
            let mut values = Vec::with_capacity(names.len());
            for (idx, field) in record.iter().enumerate() {
                if Some(idx) == trial_idx {
                    continue;
                }
                let value = field.parse::<f64>().with_context(|| {
                    format!("row {}: '{}' is not a number", line + 2, field)
                })?;
                values.push(value);
            }
            rows.entry(trial).or_default().push(values);
        }

        if let Some((expected, found)) = rows
            .keys()
            .enumerate()
            .find(|(expected, found)| expected != *found)
        {
            bail!(
                "{}: trial indices must be contiguous from 0; expected {expected}, found {found}",
                path.display()
            );
        }

        let mut columns: BTreeMap<String, Vec<Vec<f64>>> = names
            .iter()
            .map(|n| (n.clone(), Vec::with_capacity(rows.len())))
            .collect();
        for trial_rows in rows.values() {
            for (col, name) in names.iter().enumerate() {
                let samples: Vec<f64> = trial_rows.iter().map(|row| row[col]).collect();
                if let Some(trials) = columns.get_mut(name) {
                    trials.push(samples);
                }
            }
        }

        log::debug!(
            "{}: {} channels, {} trial(s)",
            path.display(),
            names.len(),
            rows.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            fs,
            names,
            columns,
        })
    }
}

impl ChannelSource for CsvChannelSource {
    fn dataset(&self) -> String {
        self.path.display().to_string()
    }

    fn channel_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn read_channel(&self, name: &str) -> Result<ChannelData> {
        let trials = self.columns.get(name).ok_or_else(|| {
            anyhow!(
                "channel '{}' not found in {} (available: {})",
                name,
                self.path.display(),
                self.names.join(", ")
            )
        })?;
        Ok(ChannelData {
            fs: self.fs,
            trials: trials.clone(),
        })
    }
}

/// Parse one sample per line, skipping blank lines and `#` comments.
pub fn parse_samples(text: &str) -> Result<Vec<f64>> {
    let samples = text
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(idx, line)| {
            line.parse::<f64>()
                .with_context(|| format!("line {} is not a sample value: {}", idx + 1, line))
        })
        .collect::<Result<Vec<f64>>>()?;
    if samples.is_empty() {
        bail!("no samples found");
    }
    Ok(samples)
}
