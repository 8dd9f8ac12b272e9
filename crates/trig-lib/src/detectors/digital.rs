use crate::{
    error::{Result, TriggerError},
    events::{Event, EventTable},
    signal::ChannelDescriptor,
};

/// Rising transitions of a digital trigger channel.
///
/// Each event is labelled with the integer code the channel switched to.
pub fn detect_digital(channel: &ChannelDescriptor) -> Result<EventTable> {
    let mut events = Vec::new();
    for (trial, data) in channel.trials.iter().enumerate() {
        let onsets = detect_digital_onsets(data, channel.fs)?;
        log::debug!(
            "{}: trial {} -> {} rising edges",
            channel.name,
            trial,
            onsets.len()
        );
        events.extend(onsets.into_iter().map(|(onset, code)| {
            Event::new(trial, onset, code.to_string(), channel.name.as_str())
        }));
    }
    Ok(EventTable::from_events(events))
}

/// `(onset seconds, code)` for every positive step in `samples`.
///
/// Falling or flat transitions are ignored; a code that steps directly up to
/// a higher one counts as a new event.
pub fn detect_digital_onsets(samples: &[f64], fs: f64) -> Result<Vec<(f64, i64)>> {
    if fs.is_nan() || fs <= 0.0 {
        return Err(TriggerError::config(format!(
            "sample rate must be positive, got {fs}"
        )));
    }
    Ok(samples
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[1] - w[0] > 0.0)
        .map(|(i, w)| ((i + 1) as f64 / fs, w[1].trunc() as i64))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_at_rising_edges() {
        let ch = ChannelDescriptor::digital("UPPT001", 1.0, vec![0., 0., 1., 1., 0., 0., 2., 2.]);
        let table = detect_digital(&ch).unwrap();
        let got: Vec<(f64, &str)> = table
            .iter()
            .map(|e| (e.onset, e.condition.as_str()))
            .collect();
        assert_eq!(got, vec![(2.0, "1"), (6.0, "2")]);
        assert!(table.iter().all(|e| e.channel == "UPPT001" && e.trial == 0));
    }

    #[test]
    fn step_up_between_codes_is_an_event() {
        let onsets = detect_digital_onsets(&[0., 4., 4., 12., 12., 0.], 600.0).unwrap();
        assert_eq!(onsets, vec![(1.0 / 600.0, 4), (3.0 / 600.0, 12)]);
    }

    #[test]
    fn constant_channel_has_no_events() {
        assert!(detect_digital_onsets(&[3.0; 10], 100.0).unwrap().is_empty());
        assert!(detect_digital_onsets(&[], 100.0).unwrap().is_empty());
    }
}
