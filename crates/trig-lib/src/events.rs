//! The unified event timeline shared by every pipeline stage.
//!
//! Tables are values: stages take a table by value and hand back a new one.
//! Ordering is ascending by onset after any merge; ties keep input order.

use crate::error::{Result, TriggerError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// A single detected or derived occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub trial: usize,
    /// Seconds from the start of `trial`.
    pub onset: f64,
    pub condition: String,
    /// Source channel name, or `*LEAD>LAG` / `LEAD>*LAG` for parse marks.
    pub channel: String,
}

impl Event {
    pub fn new(
        trial: usize,
        onset: f64,
        condition: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            trial,
            onset,
            condition: condition.into(),
            channel: channel.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventTable {
    events: Vec<Event>,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap events as given, without sorting.
    pub fn from_events(events: Vec<Event>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn has_condition(&self, condition: &str) -> bool {
        self.events.iter().any(|e| e.condition == condition)
    }

    /// Distinct condition labels in first-appearance order.
    pub fn conditions(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.events
            .iter()
            .filter(|e| seen.insert(e.condition.as_str()))
            .map(|e| e.condition.clone())
            .collect()
    }

    /// Events carrying `condition`, in table order.
    pub fn with_condition<'a>(&'a self, condition: &'a str) -> impl Iterator<Item = &'a Event> {
        self.events.iter().filter(move |e| e.condition == condition)
    }

    /// Onsets of `condition` inside `trial`, ascending.
    pub fn onsets(&self, condition: &str, trial: usize) -> Vec<f64> {
        let mut onsets: Vec<f64> = self
            .with_condition(condition)
            .filter(|e| e.trial == trial)
            .map(|e| e.onset)
            .collect();
        onsets.sort_by(|a, b| a.total_cmp(b));
        onsets
    }

    /// Stable sort ascending by onset.
    pub fn sorted(mut self) -> Self {
        self.events.sort_by(|a, b| a.onset.total_cmp(&b.onset));
        self
    }

    /// Keep only events whose condition is listed.
    ///
    /// A listed label with no events selects nothing; deciding whether a
    /// label is known at all belongs to whoever configured the outputs.
    pub fn select(self, conditions: &[String]) -> Self {
        let keep: HashSet<&str> = conditions.iter().map(String::as_str).collect();
        let events = self
            .events
            .into_iter()
            .filter(|e| keep.contains(e.condition.as_str()))
            .collect();
        Self { events }
    }

    /// Relabel events through `names`, looking up each event's current label
    /// once. Labels missing from the map are kept.
    pub fn map_conditions(self, names: &BTreeMap<String, String>) -> Self {
        let events = self
            .events
            .into_iter()
            .map(|mut e| {
                if let Some(name) = names.get(&e.condition) {
                    e.condition = name.clone();
                }
                e
            })
            .collect();
        Self { events }
    }
}

impl FromIterator<Event> for EventTable {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        Self {
            events: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for EventTable {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

/// Concatenate tables and stable-sort ascending by onset.
///
/// This is the only merge primitive; equal onsets keep their input order, so
/// merging an already merged table changes nothing.
pub fn append_conditions(tables: Vec<EventTable>) -> EventTable {
    tables
        .into_iter()
        .flat_map(EventTable::into_iter)
        .collect::<EventTable>()
        .sorted()
}

/// Fail on the first label configured by more than one output.
pub fn ensure_unique_conditions<'a, I>(labels: I) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = BTreeSet::new();
    for label in labels {
        if !seen.insert(label) {
            return Err(TriggerError::DuplicateConditionName(label.to_string()));
        }
    }
    Ok(())
}
