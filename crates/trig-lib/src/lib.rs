pub mod correct;
pub mod detectors;
pub mod error;
pub mod events;
pub mod io;
pub mod parse_marks;
pub mod signal;

pub use correct::{add_event_offset, correct_to_projector, correct_to_reference, PROJECTOR};
pub use detectors::*;
pub use error::{Result, TriggerError};
pub use events::{append_conditions, ensure_unique_conditions, Event, EventTable};
pub use parse_marks::{apply_parse_stages, parse_marks, MarkOn, ParseStage};
pub use signal::*;
