pub mod analog;
pub mod digital;
pub mod filter;

pub use analog::{detect_analog, detect_analog_onsets, AnalogParams};
pub use digital::{detect_digital, detect_digital_onsets};
