//! Batch prediction step
//!
//! Labels a CSV of preprocessed posts with the recorded champion and writes
//! `predicted_twitter_<YYYYMMDD>.csv`: every input column kept, plus a
//! `Sentiment` column.

use crate::classifier::Classifier;
use chrono::NaiveDate;
use csv::StringRecord;
use mlops_common::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Columns holding the text to classify, in lookup order
pub const TEXT_COLUMNS: [&str; 2] = ["cleaned_text", "text"];

/// Column added to (or overwritten in) each output row
pub const SENTIMENT_COLUMN: &str = "Sentiment";

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub input: PathBuf,
    pub output: PathBuf,
    pub records: usize,
}

/// A parsed CSV file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: StringRecord,
    pub rows: Vec<StringRecord>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Index of the first of `TEXT_COLUMNS` present in the header
    pub fn text_column(&self) -> Option<usize> {
        TEXT_COLUMNS.iter().find_map(|name| self.column(name))
    }
}

/// Map a csv error onto the shared taxonomy, keeping I/O failures as I/O
pub(crate) fn csv_error(path: &Path, err: csv::Error) -> Error {
    if err.is_io_error() {
        if let csv::ErrorKind::Io(io) = err.into_kind() {
            return Error::Io(io);
        }
        return Error::InvalidInput(format!("{}: unreadable", path.display()));
    }
    Error::InvalidInput(format!("{}: {}", path.display(), err))
}

/// Use `path` itself, or the most recently modified `.csv` inside it
pub fn resolve_input(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(Error::NotFound(format!("input {}", path.display())));
    }
    if !path.is_dir() {
        return Ok(path.to_path_buf());
    }

    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let candidate = entry.path();
        if candidate.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            newest = Some((modified, candidate));
        }
    }
    newest
        .map(|(_, p)| p)
        .ok_or_else(|| Error::NotFound(format!("no .csv file in {}", path.display())))
}

pub fn output_path(output_dir: &Path, date: NaiveDate) -> PathBuf {
    output_dir.join(format!("predicted_twitter_{}.csv", date.format("%Y%m%d")))
}

/// Parse a headed CSV file; every row must have the header's width
pub fn read_table(path: &Path) -> Result<Table> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| csv_error(path, e))?;
    let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();
    let rows = reader
        .records()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| csv_error(path, e))?;
    debug!(path = %path.display(), count = rows.len(), "Read CSV rows");
    Ok(Table { headers, rows })
}

/// Write a table through a temporary file and a rename
pub fn write_table(path: &Path, table: &Table) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp).map_err(|e| csv_error(&tmp, e))?;
        writer.write_record(&table.headers).map_err(|e| csv_error(&tmp, e))?;
        for row in &table.rows {
            writer.write_record(row).map_err(|e| csv_error(&tmp, e))?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Set `column` of every row to the matching value, appending the column
/// when the header lacks it
fn set_column(table: &mut Table, column: &str, values: &[String]) {
    match table.column(column) {
        Some(index) => {
            for (row, value) in table.rows.iter_mut().zip(values) {
                let mut fields: Vec<&str> = row.iter().collect();
                fields[index] = value.as_str();
                let updated = StringRecord::from(fields);
                *row = updated;
            }
        }
        None => {
            table.headers.push_field(column);
            for (row, value) in table.rows.iter_mut().zip(values) {
                row.push_field(value);
            }
        }
    }
}

/// Label every row of `input` and write them to `output_dir`
pub fn label_file<C: Classifier + ?Sized>(
    classifier: &C,
    input: &Path,
    output_dir: &Path,
    date: NaiveDate,
) -> Result<BatchSummary> {
    let mut table = read_table(input)?;
    let text_column = table.text_column().ok_or_else(|| {
        Error::InvalidInput(format!(
            "{} has no {} column",
            input.display(),
            TEXT_COLUMNS.join(" or ")
        ))
    })?;

    let texts: Vec<&str> = table
        .rows
        .iter()
        .map(|row| row.get(text_column).unwrap_or(""))
        .collect();
    let labels: Vec<String> = classifier
        .predict_batch(&texts)
        .into_iter()
        .map(|label| label.to_string())
        .collect();
    set_column(&mut table, SENTIMENT_COLUMN, &labels);

    let output = output_path(output_dir, date);
    write_table(&output, &table)?;
    info!(
        input = %input.display(),
        output = %output.display(),
        records = table.rows.len(),
        "Batch labelled"
    );
    Ok(BatchSummary {
        input: input.to_path_buf(),
        output,
        records: table.rows.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ModelArtifact;
    use tempfile::TempDir;

    fn lexicon() -> ModelArtifact {
        ModelArtifact::from_slice(
            br#"{"kind": "lexicon", "scores": {"love": 1.0, "hate": -1.0},
                 "negative_threshold": -0.5, "positive_threshold": 0.5}"#,
        )
        .unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    #[test]
    fn test_label_file_adds_sentiment_and_keeps_columns() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("processed_twitter.csv");
        fs::write(
            &input,
            "id,text,cleaned_text\n1,\"I LOVE it!!\",i love it\n2,\"Hate, this\",hate this\n3,meh,meh\n",
        )
        .unwrap();

        let summary = label_file(&lexicon(), &input, &dir.path().join("labeled"), date()).unwrap();
        assert_eq!(summary.records, 3);
        assert!(summary.output.ends_with("labeled/predicted_twitter_20240309.csv"));

        let written = read_table(&summary.output).unwrap();
        assert_eq!(
            written.headers,
            StringRecord::from(vec!["id", "text", "cleaned_text", "Sentiment"])
        );
        let labels: Vec<&str> = written.rows.iter().map(|r| &r[3]).collect();
        assert_eq!(labels, vec!["2", "0", "1"]);
        assert_eq!(&written.rows[1][1], "Hate, this");
        assert!(!summary.output.with_extension("csv.tmp").exists());
    }

    #[test]
    fn test_existing_sentiment_column_is_overwritten() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("again.csv");
        fs::write(&input, "text,Sentiment\nlove,0\n").unwrap();

        let summary = label_file(&lexicon(), &input, dir.path(), date()).unwrap();
        let written = read_table(&summary.output).unwrap();
        assert_eq!(written.headers.len(), 2);
        assert_eq!(&written.rows[0][1], "2");
    }

    #[test]
    fn test_file_without_text_column_is_rejected() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("bad.csv");
        fs::write(&input, "id,body\n1,no text\n").unwrap();

        let err = label_file(&lexicon(), &input, dir.path(), date()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(!output_path(dir.path(), date()).exists());
    }

    #[test]
    fn test_ragged_row_is_invalid_input() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("ragged.csv");
        fs::write(&input, "id,cleaned_text\n1,fine\n2,too,many\n").unwrap();

        assert!(matches!(read_table(&input), Err(Error::InvalidInput(_))));
        assert!(matches!(
            read_table(&dir.path().join("absent.csv")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_resolve_input_picks_newest_csv() {
        let dir = TempDir::new().unwrap();
        let older = dir.path().join("processed_a.csv");
        let newer = dir.path().join("processed_b.csv");
        fs::write(&older, "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::write(&newer, "").unwrap();
        let past = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&older)
            .unwrap()
            .set_modified(past)
            .unwrap();

        assert_eq!(resolve_input(dir.path()).unwrap(), newer);
        assert_eq!(resolve_input(&older).unwrap(), older);
    }

    #[test]
    fn test_resolve_input_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(resolve_input(dir.path()), Err(Error::NotFound(_))));
        assert!(matches!(
            resolve_input(&dir.path().join("missing.csv")),
            Err(Error::NotFound(_))
        ));
    }
}
