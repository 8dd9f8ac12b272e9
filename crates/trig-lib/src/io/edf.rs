use crate::io::channels::{ChannelData, ChannelSource};
use anyhow::{anyhow, Context, Result};
use edf_reader::file_reader::SyncFileReader;
use edf_reader::sync_reader::SyncEDFReader;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Reads byte ranges straight from the file for `edf-reader`.
struct DiskFileReader {
    path: PathBuf,
}

impl SyncFileReader for DiskFileReader {
    fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>, std::io::Error> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Channels of an EDF export, looked up by their (trimmed) labels.
///
/// EDF recordings are continuous, so every channel has a single trial.
pub struct EdfChannelSource {
    path: PathBuf,
    reader: SyncEDFReader<DiskFileReader>,
}

impl EdfChannelSource {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = SyncEDFReader::init_with_file_reader(DiskFileReader {
            path: path.to_path_buf(),
        })
        .with_context(|| format!("reading EDF header of {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader,
        })
    }

    fn channel_index(&self, name: &str) -> Option<usize> {
        self.reader
            .edf_header
            .channels
            .iter()
            .position(|ch| ch.label.trim() == name)
    }
}

impl ChannelSource for EdfChannelSource {
    fn dataset(&self) -> String {
        self.path.display().to_string()
    }

    fn channel_names(&self) -> Vec<String> {
        self.reader
            .edf_header
            .channels
            .iter()
            .map(|ch| ch.label.trim().to_string())
            .collect()
    }

    fn read_channel(&self, name: &str) -> Result<ChannelData> {
        let index = self.channel_index(name).ok_or_else(|| {
            anyhow!(
                "channel '{}' not found in {} (available: {})",
                name,
                self.path.display(),
                self.channel_names().join(", ")
            )
        })?;
        let header = &self.reader.edf_header;
        let total_ms = header.block_duration * header.number_of_blocks;
        let window = self
            .reader
            .read_data_window(0, total_ms)
            .with_context(|| format!("reading EDF samples of {}", self.path.display()))?;
        let samples = window
            .get(index)
            .ok_or_else(|| anyhow!("missing data for EDF channel '{name}'"))?;
        let fs = header.channels[index].number_of_samples_in_data_record as f64 * 1000.0
            / header.block_duration as f64;
        Ok(ChannelData {
            fs,
            trials: vec![samples.iter().map(|&v| v as f64).collect()],
        })
    }
}
