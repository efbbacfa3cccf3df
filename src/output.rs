//! Output formatting and CSV persistence helpers.

use anyhow::Result;
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::debug;

/// Writes a value to stdout as pretty-printed JSON.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Appends rows to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_records<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, rows = rows.len(), "Appending CSV records");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use std::path::PathBuf;

    #[derive(Serialize)]
    struct Row {
        timestamp: i64,
        value: f64,
    }

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir().join(name)
    }

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&Row {
            timestamp: 1,
            value: 2.0,
        })
        .unwrap();
    }

    #[test]
    fn test_append_records_writes_header_once() {
        let path = temp_path("route_delays_test_header.csv");
        let _ = fs::remove_file(&path);

        let rows = [Row {
            timestamp: 1,
            value: 0.5,
        }];
        append_records(&path, &rows).unwrap();
        append_records(&path, &rows).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let header_count = content.lines().filter(|l| l.contains("timestamp")).count();
        assert_eq!(header_count, 1);
        // 1 header + 2 data rows
        assert_eq!(content.lines().count(), 3);

        fs::remove_file(&path).unwrap();
    }
}
