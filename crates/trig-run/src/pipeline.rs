use crate::config::{PipelineConfig, ResolvedStages};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use trig_lib::{
    add_event_offset, append_conditions, apply_parse_stages, correct_to_reference,
    detect_analog, detect_digital, ensure_unique_conditions,
    io::{bids, marker, ChannelSource},
    ChannelKind, EventTable, TriggerError,
};

/// Final table of one recording plus the sample rate of its channels.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub table: EventTable,
    /// Rate of the first channel read; used for sample columns.
    pub fs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSummary {
    pub name: String,
    pub count: usize,
    #[serde(default)]
    pub color: Option<String>,
}

/// JSON summary printed after a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub dataset: String,
    pub seed: u64,
    pub total_events: usize,
    pub conditions: Vec<ConditionSummary>,
    pub marker_file: Option<String>,
    pub backup: Option<String>,
    pub events_tsv: Option<String>,
}

/// Detect every configured channel and merge the results.
///
/// Digital codes are renamed through the channel's `names` map. After
/// detection, labels are checked once more across outputs because raw
/// digital codes are only known now.
pub fn detect_channels(
    config: &PipelineConfig,
    source: &dyn ChannelSource,
) -> Result<(EventTable, Option<f64>)> {
    let mut tables = Vec::new();
    let mut labels: Vec<String> = Vec::new();
    let mut fs = None;

    for spec in &config.analog {
        let channel = source.descriptor(&spec.channel, ChannelKind::Analog, spec.invert)?;
        fs.get_or_insert(channel.fs);
        let table = detect_analog(&channel, &spec.name, &spec.params())
            .with_context(|| format!("analog channel {}", spec.channel))?;
        log::info!("{} -> {} '{}' events", spec.channel, table.len(), spec.name);
        labels.push(spec.name.clone());
        tables.push(table);
    }

    for spec in &config.digital {
        let channel = source.descriptor(&spec.channel, ChannelKind::Digital, false)?;
        fs.get_or_insert(channel.fs);
        let table = detect_digital(&channel)
            .with_context(|| format!("digital channel {}", spec.channel))?
            .map_conditions(&spec.names);
        log::info!(
            "{} -> {} events, conditions {:?}",
            spec.channel,
            table.len(),
            table.conditions()
        );
        labels.extend(table.conditions());
        tables.push(table);
    }

    labels.extend(config.parse.iter().map(|p| p.name.clone()));
    ensure_unique_conditions(labels.iter().map(String::as_str))?;
    Ok((append_conditions(tables), fs))
}

/// Detection, parse stages, corrections and selection, in that order.
///
/// Any failure aborts the whole run; nothing is written here.
pub fn run_pipeline(config: &PipelineConfig, source: &dyn ChannelSource) -> Result<PipelineOutput> {
    let stages = config.resolve()?;
    let (table, fs) = detect_channels(config, source)?;
    let table = apply_stages(table, &stages)?;
    let table = if config.output.keep.is_empty() {
        table
    } else {
        ensure_known_outputs(config, &table)?;
        table.select(&config.output.keep)
    };
    Ok(PipelineOutput { table, fs })
}

/// Every `keep` label must be configured or present in the table.
///
/// Configured outputs may legitimately be empty (a negate stage on a clean
/// recording). Unrenamed digital codes are only known once detected.
fn ensure_known_outputs(config: &PipelineConfig, table: &EventTable) -> trig_lib::Result<()> {
    let configured = config.configured_labels();
    for label in &config.output.keep {
        if !configured.contains(&label.as_str()) && !table.has_condition(label) {
            return Err(TriggerError::unresolved(label, "output selection"));
        }
    }
    Ok(())
}

/// Post-detection stages on an already merged table.
pub fn apply_stages(table: EventTable, stages: &ResolvedStages) -> Result<EventTable> {
    let mut table = apply_parse_stages(table, &stages.parse)?;
    if let Some(step) = &stages.projector {
        table = correct_to_reference(table, &step.events, step.window, &step.reference)?;
    }
    for step in &stages.offsets {
        table = add_event_offset(table, &step.events, step.seconds)?;
    }
    Ok(table)
}

/// Write the marker file and/or events.tsv for a finished run.
///
/// The events file is staged beside its destination before the marker file
/// is touched and moved into place last, so a bad events path fails the run
/// without leaving a new marker file behind.
pub fn write_outputs(
    config: &PipelineConfig,
    source: &dyn ChannelSource,
    output: &PipelineOutput,
    marker_path: Option<&Path>,
    events_tsv: Option<&Path>,
) -> Result<RunSummary> {
    let dataset = config
        .dataset
        .clone()
        .unwrap_or_else(|| source.dataset());
    let mut conditions: Vec<ConditionSummary> = output
        .table
        .conditions()
        .into_iter()
        .map(|name| ConditionSummary {
            count: output.table.with_condition(&name).count(),
            name,
            color: None,
        })
        .collect();

    let staged_tsv = events_tsv
        .map(|path| bids::stage_events_tsv(path, &output.table, output.fs))
        .transpose()?;

    let mut backup = None;
    if let Some(path) = marker_path {
        let (classes, previous) =
            marker::write_marker_file(path, &output.table, &dataset, config.seed)?;
        for (summary, class) in conditions.iter_mut().zip(classes) {
            summary.color = Some(class.color);
        }
        backup = previous;
    }
    if let Some(staged) = staged_tsv {
        staged.commit()?;
    }

    Ok(RunSummary {
        dataset,
        seed: config.seed,
        total_events: output.table.len(),
        conditions,
        marker_file: marker_path.map(|p| p.display().to_string()),
        backup: backup.map(|p| p.display().to_string()),
        events_tsv: events_tsv.map(|p| p.display().to_string()),
    })
}
