use crate::events::EventTable;
use anyhow::{Context, Result};
use csv::WriterBuilder;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// An `events.tsv` fully written to a temporary file beside its destination.
///
/// Nothing appears at the destination until [`StagedEventsTsv::commit`].
/// Dropping it removes the temporary file.
pub struct StagedEventsTsv {
    path: PathBuf,
    tmp: NamedTempFile,
}

impl StagedEventsTsv {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the staged file into place.
    pub fn commit(self) -> Result<()> {
        self.tmp
            .persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("saving {}", self.path.display()))?;
        Ok(())
    }
}

/// Write the rows of `table` into a temporary file in `path`'s directory.
///
/// `sample` is the onset in samples at `fs`, or `n/a` when no rate is known.
/// Trigger events are instantaneous, so `duration` is always 0.
pub fn stage_events_tsv(
    path: &Path,
    table: &EventTable,
    fs: Option<f64>,
) -> Result<StagedEventsTsv> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let tmp = NamedTempFile::new_in(&dir)
        .with_context(|| format!("creating temporary events file in {}", dir.display()))?;
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(tmp.as_file());
    writer.write_record(["onset", "duration", "trial_type", "sample", "trial", "channel"])?;
    for event in table.iter() {
        let sample = fs
            .map(|fs| ((event.onset * fs).round() as i64).to_string())
            .unwrap_or_else(|| "n/a".into());
        writer.write_record([
            format!("{:.6}", event.onset),
            "0".to_string(),
            event.condition.clone(),
            sample,
            event.trial.to_string(),
            event.channel.clone(),
        ])?;
    }
    writer.flush()?;
    drop(writer);
    Ok(StagedEventsTsv {
        path: path.to_path_buf(),
        tmp,
    })
}

/// Write a BIDS-style `events.tsv` for the final table.
pub fn write_events_tsv(path: &Path, table: &EventTable, fs: Option<f64>) -> Result<()> {
    stage_events_tsv(path, table, fs)?.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use csv::ReaderBuilder;
    use tempfile::tempdir;

    #[test]
    fn writes_one_row_per_event() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub-01_task-airpuff_events.tsv");
        let table = EventTable::from_events(vec![
            Event::new(0, 0.5, "stim", "UPPT001"),
            Event::new(0, 0.75, "stim_on", "stim>*projector"),
        ]);
        write_events_tsv(&path, &table, Some(1200.0)).unwrap();
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(&path)
            .unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.get(2), Some("trial_type"));
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get(3), Some("600"));
        assert_eq!(rows[1].get(2), Some("stim_on"));
        assert_eq!(rows[1].get(5), Some("stim>*projector"));
    }

    #[test]
    fn staged_file_appears_only_on_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.tsv");
        let table = EventTable::from_events(vec![Event::new(0, 0.5, "stim", "UPPT001")]);
        let staged = stage_events_tsv(&path, &table, None).unwrap();
        assert_eq!(staged.path(), path.as_path());
        assert!(!path.exists());
        staged.commit().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("n/a"));

        let dropped = stage_events_tsv(&dir.path().join("other.tsv"), &table, None).unwrap();
        drop(dropped);
        assert!(!dir.path().join("other.tsv").exists());
    }

    #[test]
    fn staging_into_a_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("events.tsv");
        assert!(stage_events_tsv(&path, &EventTable::new(), None).is_err());
    }
}
