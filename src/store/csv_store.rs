use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::TimeSeriesStore;
use crate::model::{RouteDelaySample, parse_bus_states};
use crate::output::append_records;

const FILE_PREFIX: &str = "route=";
const FILE_SUFFIX: &str = ".csv";

/// One CSV file per route under a base directory: `route=<name>.csv`.
///
/// Bus states are stored as a JSON array of compact strings in one column.
pub struct CsvStore {
    base_dir: PathBuf,
    /// Timestamps already on disk, loaded per route on first write.
    written: Arc<Mutex<HashMap<String, HashSet<i64>>>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SampleRow {
    route: String,
    timestamp: i64,
    average_delay_seconds: Option<f64>,
    bus_states: String,
}

impl SampleRow {
    fn from_sample(sample: &RouteDelaySample) -> Result<Self> {
        let states: Vec<String> = sample.bus_states.iter().map(ToString::to_string).collect();
        Ok(Self {
            route: sample.route.clone(),
            timestamp: sample.timestamp,
            average_delay_seconds: sample.average_delay_seconds,
            bus_states: serde_json::to_string(&states)?,
        })
    }

    fn into_sample(self) -> RouteDelaySample {
        let raw: Vec<String> = serde_json::from_str(&self.bus_states).unwrap_or_else(|e| {
            warn!(route = %self.route, timestamp = self.timestamp, error = %e, "Unreadable bus state column");
            Vec::new()
        });
        RouteDelaySample {
            route: self.route,
            timestamp: self.timestamp,
            average_delay_seconds: self.average_delay_seconds,
            bus_states: parse_bus_states(raw),
        }
    }
}

/// Encodes a route name into a file-system safe stem.
fn encode_route(route: &str) -> String {
    let mut out = String::with_capacity(route.len());
    for byte in route.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_route(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn read_rows(path: &Path) -> Result<Vec<RouteDelaySample>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    let mut rdr = csv::Reader::from_reader(file);

    let mut samples = Vec::new();
    for result in rdr.deserialize::<SampleRow>() {
        match result {
            Ok(row) => samples.push(row.into_sample()),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping malformed sample row"),
        }
    }
    Ok(samples)
}

impl CsvStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)
            .with_context(|| format!("creating store directory {}", base_dir.display()))?;
        Ok(Self {
            base_dir,
            written: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn route_path(base_dir: &Path, route: &str) -> PathBuf {
        base_dir.join(format!("{FILE_PREFIX}{}{FILE_SUFFIX}", encode_route(route)))
    }
}

#[async_trait]
impl TimeSeriesStore for CsvStore {
    async fn append(&self, samples: &[RouteDelaySample]) -> Result<usize> {
        let mut by_route: BTreeMap<String, Vec<RouteDelaySample>> = BTreeMap::new();
        for sample in samples {
            by_route
                .entry(sample.route.clone())
                .or_default()
                .push(sample.clone());
        }

        let base_dir = self.base_dir.clone();
        let written = Arc::clone(&self.written);

        tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut written = written
                .lock()
                .map_err(|_| anyhow::anyhow!("store index lock poisoned"))?;
            let mut accepted = 0;

            for (route, samples) in by_route {
                let path = Self::route_path(&base_dir, &route);
                let seen = match written.entry(route) {
                    std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                    std::collections::hash_map::Entry::Vacant(e) => {
                        let existing = read_rows(&path)?;
                        e.insert(existing.iter().map(|s| s.timestamp).collect())
                    }
                };

                let mut rows = Vec::new();
                for sample in &samples {
                    if seen.insert(sample.timestamp) {
                        rows.push(SampleRow::from_sample(sample)?);
                    } else {
                        debug!(route = %sample.route, timestamp = sample.timestamp, "Duplicate sample ignored");
                    }
                }

                if !rows.is_empty() {
                    append_records(&path, &rows)?;
                    accepted += rows.len();
                }
            }

            Ok(accepted)
        })
        .await?
    }

    async fn range_query(
        &self,
        route: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<RouteDelaySample>> {
        let path = Self::route_path(&self.base_dir, route);

        tokio::task::spawn_blocking(move || -> Result<Vec<RouteDelaySample>> {
            let mut samples: Vec<RouteDelaySample> = read_rows(&path)?
                .into_iter()
                .filter(|s| s.timestamp >= start && s.timestamp < end)
                .collect();
            samples.sort_by_key(|s| s.timestamp);
            samples.dedup_by_key(|s| s.timestamp);
            Ok(samples)
        })
        .await?
    }

    async fn routes(&self) -> Result<Vec<String>> {
        let base_dir = self.base_dir.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut routes = Vec::new();
            for entry in fs::read_dir(&base_dir)? {
                let entry = entry?;
                let name = entry.file_name();
                let Some(stem) = name
                    .to_str()
                    .and_then(|n| n.strip_prefix(FILE_PREFIX))
                    .and_then(|n| n.strip_suffix(FILE_SUFFIX))
                else {
                    continue;
                };
                match decode_route(stem) {
                    Some(route) => routes.push(route),
                    None => warn!(file = ?name, "Unrecognised route file name"),
                }
            }
            routes.sort();
            Ok(routes)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CompactBusState;
    use std::env;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn sample(route: &str, timestamp: i64) -> RouteDelaySample {
        RouteDelaySample {
            route: route.to_string(),
            timestamp,
            average_delay_seconds: Some(timestamp as f64),
            bus_states: vec![
                CompactBusState::new(Some(30), "s1", "t1").unwrap(),
                CompactBusState::new(None, "s2", "t2").unwrap(),
            ],
        }
    }

    #[test]
    fn test_route_name_encoding() {
        for route in ["99 B-Line", "R4", "N/9", "Ligne à grande vitesse", "a%b"] {
            let encoded = encode_route(route);
            assert!(encoded.chars().all(|c| c.is_ascii_alphanumeric() || "-_%".contains(c)));
            assert_eq!(decode_route(&encoded).as_deref(), Some(route));
        }
        assert_eq!(decode_route("bad%G1"), None);
    }

    #[tokio::test]
    async fn test_append_and_query_round_trip() {
        let dir = temp_dir("route_delays_csv_store_roundtrip");
        let store = CsvStore::new(&dir).unwrap();

        let accepted = store
            .append(&[sample("99 B-Line", 200), sample("99 B-Line", 100), sample("R4", 150)])
            .await
            .unwrap();
        assert_eq!(accepted, 3);

        let got = store.range_query("99 B-Line", 0, 1_000).await.unwrap();
        assert_eq!(got.iter().map(|s| s.timestamp).collect::<Vec<_>>(), vec![100, 200]);
        assert_eq!(got[0], sample("99 B-Line", 100));

        assert_eq!(store.routes().await.unwrap(), vec!["99 B-Line", "R4"]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_duplicates_ignored_across_instances() {
        let dir = temp_dir("route_delays_csv_store_dupes");
        let first = CsvStore::new(&dir).unwrap();
        first.append(&[sample("r", 10)]).await.unwrap();

        let second = CsvStore::new(&dir).unwrap();
        assert_eq!(second.append(&[sample("r", 10), sample("r", 20)]).await.unwrap(), 1);
        assert_eq!(second.range_query("r", 0, 100).await.unwrap().len(), 2);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_malformed_bus_states_skipped_on_read() {
        let dir = temp_dir("route_delays_csv_store_malformed");
        let store = CsvStore::new(&dir).unwrap();
        let rows = [SampleRow {
            route: "r".to_string(),
            timestamp: 5,
            average_delay_seconds: Some(1.0),
            bus_states: r#"["1#s#t","broken","x#s#t"]"#.to_string(),
        }];
        append_records(&CsvStore::route_path(&dir, "r"), &rows).unwrap();

        let got = store.range_query("r", 0, 10).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].bus_states.len(), 1);

        fs::remove_dir_all(&dir).unwrap();
    }
}
