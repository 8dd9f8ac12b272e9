//! Windowed lead/lag pairing of two event streams.
//!
//! A stage looks at every `lead` event and searches for the earliest `lag`
//! event strictly inside `(lead + start, lead + end)` of the same trial. The
//! derived event is stamped at the lag (`mark_on = lag`) or at the lead
//! (`mark_on = lead`). With `negate`, a lead *without* a lag in the window is
//! what gets marked.

use crate::{
    error::{Result, TriggerError},
    events::{append_conditions, Event, EventTable},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which side of a pairing provides the derived onset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkOn {
    Lead,
    Lag,
}

/// One parse-marks stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseStage {
    pub lead: String,
    pub lag: String,
    /// `[start, end]` in seconds relative to each lead onset.
    pub window: [f64; 2],
    pub mark_on: MarkOn,
    /// Condition label given to derived events.
    pub name: String,
    #[serde(default)]
    pub negate: bool,
}

impl ParseStage {
    pub fn new(
        lead: impl Into<String>,
        lag: impl Into<String>,
        window: [f64; 2],
        mark_on: MarkOn,
        name: impl Into<String>,
    ) -> Self {
        Self {
            lead: lead.into(),
            lag: lag.into(),
            window,
            mark_on,
            name: name.into(),
            negate: false,
        }
    }

    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }

    /// Checks that need no event data.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TriggerError::config("parse mark needs a non-empty name"));
        }
        let [start, end] = self.window;
        if !start.is_finite() || !end.is_finite() || start >= end {
            return Err(TriggerError::config(format!(
                "parse mark '{}': window [{start}, {end}] must have start < end",
                self.name
            )));
        }
        if self.negate && self.mark_on == MarkOn::Lag {
            return Err(TriggerError::config(format!(
                "parse mark '{}': negate is only supported with mark_on = lead",
                self.name
            )));
        }
        Ok(())
    }

    /// `*LEAD>LAG` or `LEAD>*LAG`, starring the side the onset comes from.
    pub fn channel_tag(&self) -> String {
        match self.mark_on {
            MarkOn::Lead => format!("*{}>{}", self.lead, self.lag),
            MarkOn::Lag => format!("{}>*{}", self.lead, self.lag),
        }
    }

    fn stage_label(&self) -> String {
        format!("parse mark '{}'", self.name)
    }
}

/// Derive the events of one stage. Only the new events are returned.
pub fn parse_marks(table: &EventTable, stage: &ParseStage) -> Result<EventTable> {
    stage.validate()?;
    for label in [&stage.lead, &stage.lag] {
        if !table.has_condition(label) {
            return Err(TriggerError::unresolved(label, stage.stage_label()));
        }
    }

    let [start, end] = stage.window;
    let tag = stage.channel_tag();
    let mut lag_by_trial: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    let mut derived = Vec::new();

    for lead in table.with_condition(&stage.lead) {
        let lags = lag_by_trial
            .entry(lead.trial)
            .or_insert_with(|| table.onsets(&stage.lag, lead.trial));
        let matched = first_in_window(lags, lead.onset + start, lead.onset + end);
        let onset = match (matched, stage.mark_on, stage.negate) {
            (Some(_), MarkOn::Lead, false) => Some(lead.onset),
            (Some(lag), MarkOn::Lag, false) => Some(lag),
            (None, MarkOn::Lead, true) => Some(lead.onset),
            _ => None,
        };
        if let Some(onset) = onset {
            derived.push(Event::new(lead.trial, onset, stage.name.as_str(), tag.as_str()));
        }
    }

    log::debug!(
        "{} ({}): {} derived events",
        stage.stage_label(),
        tag,
        derived.len()
    );
    Ok(EventTable::from_events(derived))
}

/// Run stages in order, merging each stage's output back before the next.
pub fn apply_parse_stages(table: EventTable, stages: &[ParseStage]) -> Result<EventTable> {
    stages.iter().try_fold(table, |table, stage| {
        let derived = parse_marks(&table, stage)?;
        Ok(append_conditions(vec![table, derived]))
    })
}

/// Earliest onset strictly between `lo` and `hi`; `sorted` must be ascending.
fn first_in_window(sorted: &[f64], lo: f64, hi: f64) -> Option<f64> {
    let idx = sorted.partition_point(|&t| t <= lo);
    sorted.get(idx).copied().filter(|&t| t < hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead_lag_table() -> EventTable {
        append_conditions(vec![
            EventTable::from_events(vec![
                Event::new(0, 1.0, "lead", "UPPT001"),
                Event::new(0, 5.0, "lead", "UPPT001"),
            ]),
            EventTable::from_events(vec![
                Event::new(0, 1.2, "lag", "UADC016"),
                Event::new(0, 5.6, "lag", "UADC016"),
            ]),
        ])
    }

    #[test]
    fn mark_on_lag_uses_lag_onset_inside_window() {
        let stage = ParseStage::new("lead", "lag", [0.0, 0.5], MarkOn::Lag, "resp");
        let out = parse_marks(&lead_lag_table(), &stage).unwrap();
        assert_eq!(out.events(), &[Event::new(0, 1.2, "resp", "lead>*lag")]);
    }

    #[test]
    fn mark_on_lead_confirms_lag() {
        let stage = ParseStage::new("lead", "lag", [0.0, 0.5], MarkOn::Lead, "hit");
        let out = parse_marks(&lead_lag_table(), &stage).unwrap();
        assert_eq!(out.events(), &[Event::new(0, 1.0, "hit", "*lead>lag")]);
    }

    #[test]
    fn negate_marks_leads_without_lag() {
        let stage = ParseStage::new("lead", "lag", [0.0, 0.5], MarkOn::Lead, "miss").negated();
        let out = parse_marks(&lead_lag_table(), &stage).unwrap();
        assert_eq!(out.events(), &[Event::new(0, 5.0, "miss", "*lead>lag")]);
    }

    #[test]
    fn earliest_lag_wins_and_bounds_are_exclusive() {
        let table = EventTable::from_events(vec![
            Event::new(0, 2.0, "lead", "a"),
            Event::new(0, 2.3, "lag", "b"),
            Event::new(0, 2.1, "lag", "b"),
            Event::new(0, 2.0, "lag", "b"),
        ]);
        let stage = ParseStage::new("lead", "lag", [0.0, 0.5], MarkOn::Lag, "x");
        let out = parse_marks(&table, &stage).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.events()[0].onset, 2.1);

        let tight = ParseStage::new("lead", "lag", [-1.0, 0.1], MarkOn::Lag, "y");
        let out = parse_marks(&table, &tight).unwrap();
        assert_eq!(out.events()[0].onset, 2.0);
    }

    #[test]
    fn lags_only_match_within_the_same_trial() {
        let table = EventTable::from_events(vec![
            Event::new(0, 1.0, "lead", "a"),
            Event::new(1, 1.1, "lag", "b"),
            Event::new(1, 1.0, "lead", "a"),
        ]);
        let stage = ParseStage::new("lead", "lag", [0.0, 0.5], MarkOn::Lag, "x");
        let out = parse_marks(&table, &stage).unwrap();
        assert_eq!(out.events(), &[Event::new(1, 1.1, "x", "lead>*lag")]);
    }

    #[test]
    fn configuration_errors_fail_before_scanning() {
        let empty = EventTable::new();
        let negate_lag = ParseStage::new("a", "b", [0.0, 1.0], MarkOn::Lag, "x").negated();
        assert!(matches!(
            parse_marks(&empty, &negate_lag),
            Err(TriggerError::Configuration(_))
        ));
        let bad_window = ParseStage::new("a", "b", [0.5, 0.5], MarkOn::Lead, "x");
        assert!(matches!(
            parse_marks(&empty, &bad_window),
            Err(TriggerError::Configuration(_))
        ));
    }

    #[test]
    fn unknown_labels_are_errors_not_empty_results() {
        let stage = ParseStage::new("lead", "missing", [0.0, 0.5], MarkOn::Lag, "x");
        let err = parse_marks(&lead_lag_table(), &stage).unwrap_err();
        assert_eq!(
            err,
            TriggerError::unresolved("missing", "parse mark 'x'")
        );
    }

    #[test]
    fn stages_chain_on_earlier_output() {
        let stages = vec![
            ParseStage::new("lead", "lag", [0.0, 0.5], MarkOn::Lag, "resp"),
            ParseStage::new("resp", "lead", [-0.5, 0.0], MarkOn::Lead, "resp_confirmed"),
        ];
        let out = apply_parse_stages(lead_lag_table(), &stages).unwrap();
        let confirmed: Vec<f64> = out.with_condition("resp_confirmed").map(|e| e.onset).collect();
        assert_eq!(confirmed, vec![1.2]);
        let onsets: Vec<f64> = out.iter().map(|e| e.onset).collect();
        assert!(onsets.windows(2).all(|w| w[0] <= w[1]));

        let reversed: Vec<ParseStage> = stages.into_iter().rev().collect();
        let err = apply_parse_stages(lead_lag_table(), &reversed).unwrap_err();
        assert!(matches!(err, TriggerError::UnresolvedLabel { ref label, .. } if label == "resp"));
    }
}
