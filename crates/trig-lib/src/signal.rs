use serde::{Deserialize, Serialize};

/// How a channel's samples turn into events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Continuous values, thresholded on amplitude and derivative.
    Analog,
    /// Integer codes, events at rising value transitions.
    Digital,
}

/// A source channel: identity, polarity and one sample array per trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub name: String,
    pub kind: ChannelKind,
    /// Negate analog samples before detection. Ignored for digital channels.
    #[serde(default)]
    pub invert: bool,
    pub fs: f64,
    pub trials: Vec<Vec<f64>>,
}

impl ChannelDescriptor {
    pub fn analog(name: impl Into<String>, fs: f64, data: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Analog,
            invert: false,
            fs,
            trials: vec![data],
        }
    }

    pub fn digital(name: impl Into<String>, fs: f64, data: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Digital,
            invert: false,
            fs,
            trials: vec![data],
        }
    }

    pub fn with_invert(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    pub fn with_trials(mut self, trials: Vec<Vec<f64>>) -> Self {
        self.trials = trials;
        self
    }
}
