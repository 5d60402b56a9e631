//! Concatenates every table the executor extracted into one CSV, unioning
//! columns across files the way a real export run does: not every segment
//! necessarily returns a file with identical columns, and per §5's
//! reproducibility requirement, paths are sorted in descending order
//! before concatenation so re-running the aggregator over the same
//! segment set reproduces the same row order.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::error::Result;

pub const AGGREGATED_FILE_NAME: &str = "aggregated_data.csv";

/// Reads every path in `table_paths`, unions their headers, and writes the
/// concatenated result to `<output_dir>/aggregated_data.csv`. Returns the
/// path written, or `None` if `table_paths` was empty (nothing to do).
pub fn aggregate(table_paths: &[PathBuf], output_dir: &Path) -> Result<Option<PathBuf>> {
    if table_paths.is_empty() {
        warn!("no tables to aggregate, nothing written");
        return Ok(None);
    }

    let mut sorted: Vec<&PathBuf> = table_paths.iter().collect();
    sorted.sort_by(|a, b| b.cmp(a));

    let mut columns: Vec<String> = Vec::new();
    let mut seen_columns: BTreeSet<String> = BTreeSet::new();
    let mut rows: Vec<Vec<(String, String)>> = Vec::new();

    for path in &sorted {
        match read_table(path) {
            Ok((headers, records)) => {
                for header in &headers {
                    if seen_columns.insert(header.clone()) {
                        columns.push(header.clone());
                    }
                }
                for record in records {
                    let row: Vec<(String, String)> = headers
                        .iter()
                        .cloned()
                        .zip(record.into_iter())
                        .collect();
                    rows.push(row);
                }
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to parse table, skipping");
            }
        }
    }

    let out_path = output_dir.join(AGGREGATED_FILE_NAME);
    let mut writer = csv::Writer::from_path(&out_path)?;
    writer.write_record(&columns)?;
    for row in &rows {
        let record: Vec<String> = columns
            .iter()
            .map(|col| {
                row.iter()
                    .find(|(k, _)| k == col)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default()
            })
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;

    info!(
        path = %out_path.display(),
        tables = sorted.len(),
        rows = rows.len(),
        "aggregated tables"
    );
    Ok(Some(out_path))
}

fn read_table(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut records = Vec::new();
    for result in reader.records() {
        let record = result?;
        records.push(record.iter().map(str::to_string).collect());
    }
    Ok((headers, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn empty_path_list_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let result = aggregate(&[], tmp.path()).unwrap();
        assert!(result.is_none());
        assert!(!tmp.path().join(AGGREGATED_FILE_NAME).exists());
    }

    #[test]
    fn unions_columns_across_mismatched_tables() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write_csv(tmp.path(), "a.csv", "id,title\n1,Engine fire\n");
        let b = write_csv(tmp.path(), "b.csv", "id,city\n2,Reno\n");

        let out = aggregate(&[a, b], tmp.path()).unwrap().unwrap();
        let contents = std::fs::read_to_string(out).unwrap();
        let mut lines = contents.lines();
        let header = lines.next().unwrap();
        assert!(header.contains("id"));
        assert!(header.contains("title"));
        assert!(header.contains("city"));
        assert_eq!(lines.count(), 2);
    }

    #[test]
    fn unparseable_table_is_skipped_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let good = write_csv(tmp.path(), "good.csv", "id\n1\n");
        let missing = tmp.path().join("missing.csv");

        let out = aggregate(&[good, missing], tmp.path()).unwrap().unwrap();
        let contents = std::fs::read_to_string(out).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
