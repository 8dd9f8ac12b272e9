use thiserror::Error;

/// Failures raised by the trigger-processing core.
///
/// Every variant is fatal for the call that produced it; nothing in the core
/// retries or substitutes a default.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TriggerError {
    /// An analog channel has no dynamic range, so it cannot be scaled.
    #[error("channel '{channel}' has zero dynamic range; cannot detect events")]
    DegenerateSignal { channel: String },

    /// A stage referenced a condition label that is not in the event table.
    #[error("condition '{label}' is not present in the event table (needed by {stage})")]
    UnresolvedLabel { label: String, stage: String },

    /// Invalid parameter combination, caught before any scanning.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Two configured outputs would write the same condition label.
    #[error("condition name '{0}' is produced by more than one configured output")]
    DuplicateConditionName(String),

    /// FFT planning or execution failed while band-pass filtering.
    #[error("band-pass filter failed: {0}")]
    Filter(String),
}

impl TriggerError {
    pub fn config(msg: impl Into<String>) -> Self {
        TriggerError::Configuration(msg.into())
    }

    pub fn unresolved(label: impl Into<String>, stage: impl Into<String>) -> Self {
        TriggerError::UnresolvedLabel {
            label: label.into(),
            stage: stage.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TriggerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_label() {
        let err = TriggerError::unresolved("stim", "parse mark 'resp'");
        assert_eq!(
            err.to_string(),
            "condition 'stim' is not present in the event table (needed by parse mark 'resp')"
        );
        let dup = TriggerError::DuplicateConditionName("projector".into());
        assert!(dup.to_string().contains("'projector'"));
    }
}
