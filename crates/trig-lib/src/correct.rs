//! Timing corrections applied after detection and parsing.

use crate::{
    error::{Result, TriggerError},
    events::EventTable,
};
use std::collections::{BTreeMap, HashSet};

/// Default reference condition for projector correction.
pub const PROJECTOR: &str = "projector";

/// Snap listed events onto the nearest `reference` event within `window`.
///
/// Best effort: an event with no reference inside
/// `[onset + window[0], onset + window[1]]` keeps its original onset and stays
/// in the table, including when the table has no reference events at all. On
/// equal distance the earlier reference wins. The result is re-sorted by onset.
pub fn correct_to_reference(
    table: EventTable,
    event_list: &[String],
    window: [f64; 2],
    reference: &str,
) -> Result<EventTable> {
    let [start, end] = window;
    if !start.is_finite() || !end.is_finite() || start >= end {
        return Err(TriggerError::config(format!(
            "correction window [{start}, {end}] must have start < end"
        )));
    }
    if !table.has_condition(reference) {
        log::warn!("no '{reference}' events; correction leaves onsets unchanged");
    }

    let targets: HashSet<&str> = event_list.iter().map(String::as_str).collect();
    let mut reference_by_trial: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    for event in table.with_condition(reference) {
        reference_by_trial
            .entry(event.trial)
            .or_default()
            .push(event.onset);
    }
    for onsets in reference_by_trial.values_mut() {
        onsets.sort_by(|a, b| a.total_cmp(b));
    }

    let mut moved = 0usize;
    let mut unmatched = 0usize;
    let corrected: EventTable = table
        .into_iter()
        .map(|mut event| {
            if targets.contains(event.condition.as_str()) {
                let nearest = reference_by_trial.get(&event.trial).and_then(|onsets| {
                    nearest_in_window(onsets, event.onset, event.onset + start, event.onset + end)
                });
                match nearest {
                    Some(onset) => {
                        event.onset = onset;
                        moved += 1;
                    }
                    None => unmatched += 1,
                }
            }
            event
        })
        .collect();

    if unmatched > 0 {
        log::warn!(
            "{unmatched} event(s) had no '{reference}' within [{start}, {end}] s; onsets left unchanged"
        );
    }
    log::debug!("corrected {moved} event(s) to '{reference}'");
    Ok(corrected.sorted())
}

/// [`correct_to_reference`] against the `projector` condition.
pub fn correct_to_projector(
    table: EventTable,
    event_list: &[String],
    window: [f64; 2],
) -> Result<EventTable> {
    correct_to_reference(table, event_list, window, PROJECTOR)
}

/// Shift every listed condition by `offset_seconds`; the result is re-sorted.
///
/// Fails when a shift would move an event before the start of its trial.
pub fn add_event_offset(
    table: EventTable,
    event_list: &[String],
    offset_seconds: f64,
) -> Result<EventTable> {
    if !offset_seconds.is_finite() {
        return Err(TriggerError::config(format!(
            "offset must be finite, got {offset_seconds}"
        )));
    }
    let targets: HashSet<&str> = event_list.iter().map(String::as_str).collect();
    let shifted = table
        .into_iter()
        .map(|mut event| {
            if targets.contains(event.condition.as_str()) {
                event.onset += offset_seconds;
                if event.onset < 0.0 {
                    return Err(TriggerError::config(format!(
                        "offset {offset_seconds} s moves '{}' before the start of trial {}",
                        event.condition, event.trial
                    )));
                }
            }
            Ok(event)
        })
        .collect::<Result<EventTable>>()?;
    Ok(shifted.sorted())
}

fn nearest_in_window(sorted: &[f64], onset: f64, lo: f64, hi: f64) -> Option<f64> {
    sorted
        .iter()
        .copied()
        .filter(|&t| t >= lo && t <= hi)
        .fold(None, |best: Option<f64>, t| match best {
            Some(b) if (b - onset).abs() <= (t - onset).abs() => Some(b),
            _ => Some(t),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;

    fn list(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    fn stim_table() -> EventTable {
        EventTable::from_events(vec![
            Event::new(0, 1.00, "stimA", "UPPT001"),
            Event::new(0, 1.03, PROJECTOR, "UADC016"),
            Event::new(0, 3.00, "stimA", "UPPT001"),
            Event::new(0, 3.00, "stimB", "UPPT001"),
            Event::new(0, 3.50, PROJECTOR, "UADC016"),
        ])
    }

    #[test]
    fn snaps_to_projector_and_keeps_unmatched() {
        let out = correct_to_projector(stim_table(), &list(&["stimA"]), [-0.2, 0.2]).unwrap();
        let stim: Vec<f64> = out.with_condition("stimA").map(|e| e.onset).collect();
        assert_eq!(stim, vec![1.03, 3.00]);
        assert_eq!(out.len(), 5);
        let b: Vec<f64> = out.with_condition("stimB").map(|e| e.onset).collect();
        assert_eq!(b, vec![3.00]);
    }

    #[test]
    fn nearest_reference_wins_and_ties_go_early() {
        let table = EventTable::from_events(vec![
            Event::new(0, 2.0, "stimA", "UPPT001"),
            Event::new(0, 1.9, PROJECTOR, "UADC016"),
            Event::new(0, 2.1, PROJECTOR, "UADC016"),
            Event::new(0, 2.05, "stimB", "UPPT001"),
        ]);
        let out = correct_to_projector(table, &list(&["stimA", "stimB"]), [-0.2, 0.2]).unwrap();
        let a = out.with_condition("stimA").next().unwrap().onset;
        let b = out.with_condition("stimB").next().unwrap().onset;
        assert_eq!(a, 1.9);
        assert_eq!(b, 2.1);
    }

    #[test]
    fn correction_resorts_the_table() {
        let table = EventTable::from_events(vec![
            Event::new(0, 1.0, "other", "UPPT001"),
            Event::new(0, 0.95, "stimA", "UPPT001"),
            Event::new(0, 1.1, PROJECTOR, "UADC016"),
        ])
        .sorted();
        let out = correct_to_projector(table, &list(&["stimA"]), [-0.2, 0.2]).unwrap();
        let order: Vec<&str> = out.iter().map(|e| e.condition.as_str()).collect();
        assert_eq!(order, vec!["other", "stimA", PROJECTOR]);
    }

    #[test]
    fn no_reference_events_leaves_table_unchanged() {
        let table = EventTable::from_events(vec![Event::new(0, 1.0, "stimA", "UPPT001")]);
        let out = correct_to_projector(table.clone(), &list(&["stimA"]), [-0.2, 0.2]).unwrap();
        assert_eq!(out, table);
    }

    #[test]
    fn offset_shifts_only_listed_conditions() {
        let out = add_event_offset(stim_table(), &list(&["stimA"]), 0.019).unwrap();
        let a: Vec<f64> = out.with_condition("stimA").map(|e| e.onset).collect();
        assert_eq!(a, vec![1.00 + 0.019, 3.00 + 0.019]);
        let b: Vec<f64> = out.with_condition("stimB").map(|e| e.onset).collect();
        assert_eq!(b, vec![3.00]);
        let p: Vec<f64> = out.with_condition(PROJECTOR).map(|e| e.onset).collect();
        assert_eq!(p, vec![1.03, 3.50]);
    }

    #[test]
    fn offset_before_trial_start_is_rejected() {
        let err = add_event_offset(stim_table(), &list(&["stimA"]), -2.0).unwrap_err();
        assert!(matches!(err, TriggerError::Configuration(_)));
    }
}
