use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use trig_lib::{
    correct::PROJECTOR, ensure_unique_conditions, AnalogParams, MarkOn, ParseStage, TriggerError,
};

/// A pipeline description for one recording, read from TOML.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Dataset path written into the marker file header.
    #[serde(default)]
    pub dataset: Option<String>,
    /// Seed for marker colours.
    #[serde(default)]
    pub seed: u64,
    /// Selects a `[tasks.<name>]` defaults table.
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub tasks: BTreeMap<String, Defaults>,
    #[serde(default)]
    pub analog: Vec<AnalogSpec>,
    #[serde(default)]
    pub digital: Vec<DigitalSpec>,
    #[serde(default)]
    pub parse: Vec<ParseSpec>,
    #[serde(default)]
    pub projector: Option<ProjectorSpec>,
    #[serde(default)]
    pub offset: Vec<OffsetSpec>,
    #[serde(default)]
    pub output: OutputSpec,
}

/// Windows and offsets used when a stage leaves them out.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    #[serde(default)]
    pub parse_window: Option<[f64; 2]>,
    #[serde(default)]
    pub projector_window: Option<[f64; 2]>,
    #[serde(default)]
    pub offset_seconds: Option<f64>,
}

impl Defaults {
    /// Fields set in `self` win over `fallback`.
    fn or(self, fallback: Defaults) -> Defaults {
        Defaults {
            parse_window: self.parse_window.or(fallback.parse_window),
            projector_window: self.projector_window.or(fallback.projector_window),
            offset_seconds: self.offset_seconds.or(fallback.offset_seconds),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct AnalogSpec {
    pub channel: String,
    /// Condition label of the detected onsets.
    pub name: String,
    #[serde(default)]
    pub invert: bool,
    #[serde(default)]
    pub amplitude_threshold: Option<f64>,
    #[serde(default)]
    pub derivative_threshold: Option<f64>,
    #[serde(default)]
    pub dead_time: Option<f64>,
    #[serde(default)]
    pub band: Option<[f64; 2]>,
}

impl AnalogSpec {
    pub fn params(&self) -> AnalogParams {
        let base = AnalogParams::default();
        AnalogParams {
            amplitude_threshold: self.amplitude_threshold.unwrap_or(base.amplitude_threshold),
            derivative_threshold: self.derivative_threshold.unwrap_or(base.derivative_threshold),
            dead_time: self.dead_time.unwrap_or(base.dead_time),
            band: self.band,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DigitalSpec {
    pub channel: String,
    /// Code value (as text) to condition label.
    #[serde(default)]
    pub names: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ParseSpec {
    pub lead: String,
    pub lag: String,
    #[serde(default)]
    pub window: Option<[f64; 2]>,
    pub mark_on: MarkOn,
    pub name: String,
    #[serde(default)]
    pub negate: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ProjectorSpec {
    pub events: Vec<String>,
    #[serde(default)]
    pub window: Option<[f64; 2]>,
    #[serde(default = "default_reference")]
    pub reference: String,
}

fn default_reference() -> String {
    PROJECTOR.to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct OffsetSpec {
    pub events: Vec<String>,
    #[serde(default)]
    pub seconds: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct OutputSpec {
    /// Conditions kept in the final table; empty keeps everything.
    #[serde(default)]
    pub keep: Vec<String>,
}

/// Projector correction with its window resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectorStep {
    pub events: Vec<String>,
    pub window: [f64; 2],
    pub reference: String,
}

/// Offset shift with its amount resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetStep {
    pub events: Vec<String>,
    pub seconds: f64,
}

/// Everything after detection, with defaults applied and validated.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStages {
    pub parse: Vec<ParseStage>,
    pub projector: Option<ProjectorStep>,
    pub offsets: Vec<OffsetStep>,
}

pub fn read_config(path: &Path) -> Result<PipelineConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read pipeline config {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("parsing pipeline config {}", path.display()))
}

pub fn parse_config(contents: &str) -> Result<PipelineConfig> {
    Ok(toml::from_str(contents)?)
}

impl PipelineConfig {
    /// Global defaults overlaid with the selected task's defaults.
    pub fn effective_defaults(&self) -> trig_lib::Result<Defaults> {
        match &self.task {
            Some(task) => {
                let task_defaults = self.tasks.get(task).ok_or_else(|| {
                    TriggerError::config(format!("task '{task}' has no [tasks.{task}] table"))
                })?;
                Ok(task_defaults.or(self.defaults))
            }
            None => Ok(self.defaults),
        }
    }

    /// Labels the configuration names explicitly, one entry per output.
    pub fn configured_labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.analog.iter().map(|a| a.name.as_str()).collect();
        for digital in &self.digital {
            labels.extend(digital.names.values().map(String::as_str));
        }
        labels.extend(self.parse.iter().map(|p| p.name.as_str()));
        labels
    }

    /// Validate and resolve every post-detection stage.
    ///
    /// Runs before any channel is read, so configuration mistakes never cost
    /// a detection pass.
    pub fn resolve(&self) -> trig_lib::Result<ResolvedStages> {
        ensure_unique_conditions(self.configured_labels())?;
        let defaults = self.effective_defaults()?;
        for analog in &self.analog {
            analog.params().validate()?;
        }

        let parse = self
            .parse
            .iter()
            .map(|spec| -> trig_lib::Result<ParseStage> {
                let window = spec.window.or(defaults.parse_window).ok_or_else(|| {
                    TriggerError::config(format!(
                        "parse mark '{}' has no window and no default parse_window",
                        spec.name
                    ))
                })?;
                let stage = ParseStage {
                    lead: spec.lead.clone(),
                    lag: spec.lag.clone(),
                    window,
                    mark_on: spec.mark_on,
                    name: spec.name.clone(),
                    negate: spec.negate,
                };
                stage.validate()?;
                Ok(stage)
            })
            .collect::<trig_lib::Result<Vec<_>>>()?;

        let projector = self
            .projector
            .as_ref()
            .map(|spec| -> trig_lib::Result<ProjectorStep> {
                let window = spec.window.or(defaults.projector_window).ok_or_else(|| {
                    TriggerError::config("projector correction has no window and no default")
                })?;
                if window[0] >= window[1] {
                    return Err(TriggerError::config(format!(
                        "projector window [{}, {}] must have start < end",
                        window[0], window[1]
                    )));
                }
                Ok(ProjectorStep {
                    events: spec.events.clone(),
                    window,
                    reference: spec.reference.clone(),
                })
            })
            .transpose()?;

        let offsets = self
            .offset
            .iter()
            .map(|spec| -> trig_lib::Result<OffsetStep> {
                let seconds = spec.seconds.or(defaults.offset_seconds).ok_or_else(|| {
                    TriggerError::config(format!(
                        "offset for {:?} has no seconds and no default offset_seconds",
                        spec.events
                    ))
                })?;
                Ok(OffsetStep {
                    events: spec.events.clone(),
                    seconds,
                })
            })
            .collect::<trig_lib::Result<Vec<_>>>()?;

        Ok(ResolvedStages {
            parse,
            projector,
            offsets,
        })
    }
}
