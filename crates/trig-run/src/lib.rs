//! Configured trigger-coding runs for a single recording.

pub mod config;
pub mod pipeline;

pub use config::{parse_config, read_config, PipelineConfig};
pub use pipeline::{run_pipeline, write_outputs, PipelineOutput, RunSummary};
