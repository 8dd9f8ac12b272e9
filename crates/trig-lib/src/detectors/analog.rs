use crate::{
    detectors::filter::bandpass,
    error::{Result, TriggerError},
    events::{Event, EventTable},
    signal::ChannelDescriptor,
};
use serde::{Deserialize, Serialize};

/// Thresholds for analog onset detection.
///
/// Both thresholds apply to normalised signals, so the same values work across
/// channels with different gains and offsets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalogParams {
    /// Min-max scaled amplitude a sample must exceed (0..1).
    pub amplitude_threshold: f64,
    /// Scaled first difference a sample must exceed (0..1).
    pub derivative_threshold: f64,
    /// Seconds skipped after each detection.
    pub dead_time: f64,
    /// Optional band-pass `[low, high]` in Hz applied before scaling.
    pub band: Option<[f64; 2]>,
}

impl Default for AnalogParams {
    fn default() -> Self {
        Self {
            amplitude_threshold: 0.5,
            derivative_threshold: 0.1,
            dead_time: 0.1,
            band: None,
        }
    }
}

impl AnalogParams {
    pub fn validate(&self) -> Result<()> {
        if !self.amplitude_threshold.is_finite() || !self.derivative_threshold.is_finite() {
            return Err(TriggerError::config("analog thresholds must be finite"));
        }
        if !self.dead_time.is_finite() || self.dead_time < 0.0 {
            return Err(TriggerError::config(format!(
                "dead time must be a finite number of seconds >= 0, got {}",
                self.dead_time
            )));
        }
        Ok(())
    }
}

/// Detect rising onsets on every trial of an analog channel.
///
/// Events carry `condition` and the channel's name. Polarity comes from
/// `channel.invert`.
pub fn detect_analog(
    channel: &ChannelDescriptor,
    condition: &str,
    params: &AnalogParams,
) -> Result<EventTable> {
    let mut events = Vec::new();
    for (trial, data) in channel.trials.iter().enumerate() {
        let onsets = detect_analog_onsets(data, channel.fs, channel.invert, params)
            .map_err(|err| match err {
                TriggerError::DegenerateSignal { .. } => TriggerError::DegenerateSignal {
                    channel: channel.name.clone(),
                },
                other => other,
            })?;
        log::debug!(
            "{}: trial {} -> {} '{}' onsets",
            channel.name,
            trial,
            onsets.len(),
            condition
        );
        events.extend(
            onsets
                .into_iter()
                .map(|onset| Event::new(trial, onset, condition, channel.name.as_str())),
        );
    }
    Ok(EventTable::from_events(events))
}

/// Onset times (seconds) of one analog sample array.
pub fn detect_analog_onsets(
    samples: &[f64],
    fs: f64,
    invert: bool,
    params: &AnalogParams,
) -> Result<Vec<f64>> {
    params.validate()?;
    if fs.is_nan() || fs <= 0.0 {
        return Err(TriggerError::config(format!(
            "sample rate must be positive, got {fs}"
        )));
    }

    let mut signal = match params.band {
        Some([low, high]) => bandpass(samples, fs, low, high)?,
        None => samples.to_vec(),
    };
    if invert {
        signal.iter_mut().for_each(|v| *v = -*v);
    }

    let amplitude = minmax_scale(&signal).ok_or_else(|| TriggerError::DegenerateSignal {
        channel: String::new(),
    })?;
    let slope = scaled_derivative(&amplitude);

    let dead_samples = ((params.dead_time * fs).round() as usize).max(1);
    let mut onsets = Vec::new();
    let mut i = 0;
    while i < amplitude.len() {
        if amplitude[i] > params.amplitude_threshold && slope[i] > params.derivative_threshold {
            onsets.push(i as f64 / fs);
            // A second edge inside the dead time is skipped as well.
            i = i.saturating_add(dead_samples);
        } else {
            i += 1;
        }
    }
    Ok(onsets)
}

/// Scale to [0, 1]; `None` when the signal is empty, flat or non-finite.
fn minmax_scale(data: &[f64]) -> Option<Vec<f64>> {
    let (min, max) = data
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        return None;
    }
    Some(data.iter().map(|v| (v - min) / range).collect())
}

/// Backward difference with positive and negative halves scaled separately,
/// positive steps to (0, 1] and negative steps to [-1, 0).
fn scaled_derivative(data: &[f64]) -> Vec<f64> {
    let mut diff = vec![0.0; data.len()];
    for i in 1..data.len() {
        diff[i] = data[i] - data[i - 1];
    }
    let pos_max = diff.iter().copied().fold(0.0_f64, f64::max);
    let neg_min = diff.iter().copied().fold(0.0_f64, f64::min);
    for d in diff.iter_mut() {
        if *d > 0.0 {
            *d /= pos_max;
        } else if *d < 0.0 {
            *d /= -neg_min;
        }
    }
    diff
}
