//! CTF-style `MarkerFile.mrk` output.
//!
//! One block per condition, in order of first occurrence, each with a colour
//! drawn from a caller-seeded generator so repeated runs produce identical
//! files.

use crate::events::{Event, EventTable};
use anyhow::{anyhow, bail, Context, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

const SAMPLE_HEADER: &str = "TRIAL NUMBER\t\tTIME FROM SYNC POINT (in seconds)";

/// Per-condition summary of a rendered marker file.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MarkerClass {
    pub class_id: usize,
    pub name: String,
    pub color: String,
    pub count: usize,
}

/// Render the marker file text for `table`.
pub fn render_marker_file<R: Rng>(
    table: &EventTable,
    dataset: &str,
    rng: &mut R,
) -> (String, Vec<MarkerClass>) {
    let conditions = table.conditions();
    let mut out = String::new();
    let mut classes = Vec::with_capacity(conditions.len());
    // Writing into a String cannot fail.
    let _ = write!(
        out,
        "PATH OF DATASET:\n{dataset}\n\n\nNUMBER OF MARKERS:\n{}\n\n\n",
        conditions.len()
    );
    for (idx, name) in conditions.iter().enumerate() {
        let color = format!(
            "#{:02x}{:02x}{:02x}",
            rng.gen::<u8>(),
            rng.gen::<u8>(),
            rng.gen::<u8>()
        );
        let events: Vec<&Event> = table.with_condition(name).collect();
        let class_id = idx + 1;
        let _ = write!(
            out,
            "CLASSGROUPID:\n3\nNAME:\n{name}\nCOMMENT:\n\nCOLOR:\n{color}\nEDITABLE:\nYes\n\
             CLASSID:\n{class_id}\nNUMBER OF SAMPLES:\n{}\nLIST OF SAMPLES:\n{SAMPLE_HEADER}\n",
            events.len()
        );
        for event in &events {
            let _ = writeln!(
                out,
                "{:>18}\t\t\t\t{:>21}",
                format!("+{}", event.trial),
                format_seconds(event.onset)
            );
        }
        out.push_str("\n\n");
        classes.push(MarkerClass {
            class_id,
            name: name.clone(),
            color,
            count: events.len(),
        });
    }
    (out, classes)
}

/// Write `table` to `path` atomically.
///
/// An existing file is first renamed to a timestamped backup, whose path is
/// returned. Rendering happens before anything on disk is touched.
pub fn write_marker_file(
    path: &Path,
    table: &EventTable,
    dataset: &str,
    seed: u64,
) -> Result<(Vec<MarkerClass>, Option<PathBuf>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let (text, classes) = render_marker_file(table, dataset, &mut rng);

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("creating temporary marker file in {}", dir.display()))?;
    tmp.write_all(text.as_bytes())
        .context("writing marker file contents")?;
    tmp.flush().context("flushing marker file")?;

    let backup = backup_existing(path)?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("saving marker file {}", path.display()))?;
    log::info!(
        "wrote {} marker classes ({} events) to {}",
        classes.len(),
        table.len(),
        path.display()
    );
    Ok((classes, backup))
}

/// Move an existing `path` aside as `<stem>_<YYYYmmdd_HHMMSS>[_n].<ext>`.
pub fn backup_existing(path: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("MarkerFile");
    let ext = path.extension().and_then(|s| s.to_str());
    let mut attempt = 0usize;
    let backup = loop {
        let suffix = if attempt == 0 {
            stamp.clone()
        } else {
            format!("{stamp}_{attempt}")
        };
        let name = match ext {
            Some(ext) => format!("{stem}_{suffix}.{ext}"),
            None => format!("{stem}_{suffix}"),
        };
        let candidate = path.with_file_name(name);
        if !candidate.exists() {
            break candidate;
        }
        attempt += 1;
    };
    fs::rename(path, &backup)
        .with_context(|| format!("backing up {} to {}", path.display(), backup.display()))?;
    log::warn!(
        "existing {} preserved as {}",
        path.display(),
        backup.display()
    );
    Ok(Some(backup))
}

/// Parse a marker file back into an onset-sorted table.
///
/// Events get the condition name from their block and `MarkerFile` as channel.
pub fn read_marker_file(path: &Path) -> Result<EventTable> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_marker_file(&text).with_context(|| format!("parsing {}", path.display()))
}

pub fn parse_marker_file(text: &str) -> Result<EventTable> {
    let mut lines = text.lines().map(str::trim);
    let mut events = Vec::new();
    let mut name: Option<String> = None;
    let mut count: Option<usize> = None;

    while let Some(line) = lines.next() {
        match line {
            "NAME:" => {
                name = Some(
                    lines
                        .next()
                        .ok_or_else(|| anyhow!("NAME: without a value"))?
                        .to_string(),
                );
            }
            "NUMBER OF SAMPLES:" => {
                let value = lines
                    .next()
                    .ok_or_else(|| anyhow!("NUMBER OF SAMPLES: without a value"))?;
                count = Some(value.parse().with_context(|| {
                    format!("sample count '{value}' is not an integer")
                })?);
            }
            "LIST OF SAMPLES:" => {
                let condition = name
                    .take()
                    .ok_or_else(|| anyhow!("LIST OF SAMPLES: before NAME:"))?;
                let expected = count
                    .take()
                    .ok_or_else(|| anyhow!("LIST OF SAMPLES: before NUMBER OF SAMPLES:"))?;
                lines.next();
                for _ in 0..expected {
                    let row = lines
                        .next()
                        .ok_or_else(|| anyhow!("'{condition}' lists fewer than {expected} samples"))?;
                    events.push(parse_sample_row(row, &condition)?);
                }
            }
            _ => {}
        }
    }
    if name.is_some() {
        bail!("marker block without LIST OF SAMPLES:");
    }
    Ok(EventTable::from_events(events).sorted())
}

fn parse_sample_row(row: &str, condition: &str) -> Result<Event> {
    let mut fields = row.split_whitespace();
    let (Some(trial), Some(onset)) = (fields.next(), fields.next()) else {
        bail!("malformed sample row '{row}' in '{condition}'");
    };
    let trial: usize = trial
        .trim_start_matches('+')
        .parse()
        .with_context(|| format!("trial '{trial}' in '{condition}'"))?;
    let onset: f64 = onset
        .parse()
        .with_context(|| format!("onset '{onset}' in '{condition}'"))?;
    Ok(Event::new(trial, onset, condition, "MarkerFile"))
}

/// `+1.234000000000e+00` style: explicit sign, 12 decimals, two-digit exponent.
fn format_seconds(value: f64) -> String {
    let formatted = format!("{value:+.12e}");
    match formatted.split_once('e') {
        Some((mantissa, exp)) => match exp.parse::<i32>() {
            Ok(exp) => format!("{mantissa}e{exp:+03}"),
            Err(_) => formatted,
        },
        None => formatted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn table() -> EventTable {
        EventTable::from_events(vec![
            Event::new(0, 0.5, "stim", "UPPT001"),
            Event::new(0, 0.53, "projector", "UADC016"),
            Event::new(0, 2.25, "stim", "UPPT001"),
        ])
    }

    #[test]
    fn seconds_use_two_digit_exponents() {
        assert_eq!(format_seconds(1.234), "+1.234000000000e+00");
        assert_eq!(format_seconds(0.019), "+1.900000000000e-02");
        assert_eq!(format_seconds(0.0), "+0.000000000000e+00");
        assert_eq!(format_seconds(125.5), "+1.255000000000e+02");
    }

    #[test]
    fn renders_blocks_in_first_seen_order() {
        let mut rng = StdRng::seed_from_u64(0);
        let (text, classes) = render_marker_file(&table(), "sub-01.ds", &mut rng);
        assert!(text.starts_with("PATH OF DATASET:\nsub-01.ds\n\n\nNUMBER OF MARKERS:\n2\n"));
        let names: Vec<&str> = classes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["stim", "projector"]);
        assert_eq!(classes[0].count, 2);
        assert_eq!(classes[1].class_id, 2);
        assert!(text.contains("+2.250000000000e+00"));
    }

    #[test]
    fn colours_depend_only_on_the_seed() {
        let render = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            render_marker_file(&table(), "x.ds", &mut rng).0
        };
        assert_eq!(render(7), render(7));
        assert_ne!(render(7), render(8));
    }

    #[test]
    fn written_file_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MarkerFile.mrk");
        let (classes, backup) = write_marker_file(&path, &table(), "sub-01.ds", 0).unwrap();
        assert_eq!(classes.len(), 2);
        assert!(backup.is_none());
        let back = read_marker_file(&path).unwrap();
        let got: Vec<(f64, &str)> = back
            .iter()
            .map(|e| (e.onset, e.condition.as_str()))
            .collect();
        assert_eq!(got, vec![(0.5, "stim"), (0.53, "projector"), (2.25, "stim")]);
    }

    #[test]
    fn rewrite_keeps_previous_file_as_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MarkerFile.mrk");
        fs::write(&path, "previous").unwrap();
        let (_, backup) = write_marker_file(&path, &table(), "sub-01.ds", 0).unwrap();
        let backup = backup.expect("backup path");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "previous");
        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("MarkerFile_") && name.ends_with(".mrk"));
        assert!(fs::read_to_string(&path).unwrap().starts_with("PATH OF DATASET:"));

        let (_, second) = write_marker_file(&path, &table(), "sub-01.ds", 0).unwrap();
        assert_ne!(second.expect("second backup"), backup);
    }

    #[test]
    fn truncated_sample_list_is_an_error() {
        let text = "NAME:\nstim\nNUMBER OF SAMPLES:\n2\nLIST OF SAMPLES:\nTRIAL NUMBER\n+0 +1.0e+00\n";
        assert!(parse_marker_file(text).is_err());
    }
}
