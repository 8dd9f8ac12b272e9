pub mod bids;
pub mod channels;
pub mod edf;
pub mod marker;

pub use channels::{ChannelData, ChannelSource, CsvChannelSource};
pub use edf::EdfChannelSource;
