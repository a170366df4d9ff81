use std::fs::{self, File};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::{debug, warn};

use super::schema::{
    self, RawRow, COPTER_FILE, MASTER_COEF_COLUMNS, MASTER_COEF_FILE, VALID_FROM_COLUMN,
};
use super::{CoefficientStore, CopterTable, Loaded, MalformedRecord, StoreError};
use crate::model::{ScoopAssignment, ScoopId, SensorRecord};

pub const BACKEND_NAME: &str = "local-csv";

/// Coefficient tables kept as CSV files in one directory (`coefs_path`).
#[derive(Debug, Clone)]
pub struct LocalCsvStore {
    root: PathBuf,
}

impl LocalCsvStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StoreError::BackendUnavailable {
                backend: BACKEND_NAME,
                reason: format!("{} is not a readable directory", root.display()),
            });
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn reader(&self, file_name: &str, has_headers: bool) -> Result<csv::Reader<File>, StoreError> {
        let path = self.root.join(file_name);
        let file = File::open(&path).map_err(|err| StoreError::BackendUnavailable {
            backend: BACKEND_NAME,
            reason: format!("cannot open {}: {err}", path.display()),
        })?;
        Ok(ReaderBuilder::new()
            .has_headers(has_headers)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(file))
    }

    fn headers(reader: &mut csv::Reader<File>, source: &str) -> Result<Vec<String>, StoreError> {
        let headers = reader.headers().map_err(|source_err| StoreError::Csv {
            source_name: source.to_string(),
            source: source_err,
        })?;
        Ok(headers.iter().map(str::to_string).collect())
    }
}

fn row_from(headers: &[String], record: &StringRecord) -> RawRow {
    headers
        .iter()
        .zip(record.iter())
        .map(|(column, value)| (column.as_str(), value))
        .collect()
}

fn check_master_header(headers: &[String]) -> Result<(), StoreError> {
    let required_matches = headers.len() >= MASTER_COEF_COLUMNS.len()
        && headers
            .iter()
            .zip(MASTER_COEF_COLUMNS.iter())
            .all(|(found, expected)| found == expected);
    let extras_allowed = headers[MASTER_COEF_COLUMNS.len().min(headers.len())..]
        .iter()
        .all(|extra| extra == VALID_FROM_COLUMN);

    if required_matches && extras_allowed && headers.len() <= MASTER_COEF_COLUMNS.len() + 1 {
        Ok(())
    } else {
        Err(StoreError::InvalidHeader {
            source_name: MASTER_COEF_FILE.to_string(),
            expected: MASTER_COEF_COLUMNS.iter().map(|c| c.to_string()).collect(),
            found: headers.to_vec(),
        })
    }
}

#[async_trait]
impl CoefficientStore for LocalCsvStore {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn fetch_copter_table(&self) -> Result<Loaded<CopterTable>, StoreError> {
        let mut reader = self.reader(COPTER_FILE, false)?;
        let columns = ["platformId", "name", "scoopId"].map(str::to_string);

        let mut table = CopterTable::new();
        let mut skipped = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(err) => {
                    skipped.push(MalformedRecord::new(COPTER_FILE, idx + 1, err.to_string()));
                    continue;
                }
            };
            // The header row is optional in copterID.csv.
            if idx == 0 && record.get(0).is_some_and(|id| id.parse::<u32>().is_err()) {
                continue;
            }
            match schema::platform_from_row(&row_from(&columns, &record)) {
                Ok(mapping) => {
                    table.insert(mapping.platform_id, mapping);
                }
                Err(reason) => skipped.push(MalformedRecord::new(COPTER_FILE, idx + 1, reason)),
            }
        }

        for malformed in &skipped {
            warn!(%malformed, "skipping platform row");
        }
        Ok(Loaded::new(table, skipped))
    }

    async fn fetch_scoop_history(
        &self,
        scoop_id: &ScoopId,
    ) -> Result<Loaded<Vec<ScoopAssignment>>, StoreError> {
        let file_name = schema::scoop_file_name(scoop_id);
        let mut reader = self.reader(&file_name, true)?;
        let headers = Self::headers(&mut reader, &file_name)?;

        let mut rows = Vec::new();
        let mut skipped = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let parsed = result
                .map_err(|err| err.to_string())
                .and_then(|record| schema::assignment_from_row(scoop_id, &row_from(&headers, &record)));
            match parsed {
                Ok(assignment) => rows.push((idx + 1, assignment)),
                Err(reason) => skipped.push(MalformedRecord::new(&file_name, idx + 1, reason)),
            }
        }

        let history = schema::order_history(&file_name, rows, &mut skipped);
        for malformed in &skipped {
            warn!(%malformed, "skipping scoop assignment row");
        }
        debug!(scoop = %scoop_id, assignments = history.len(), "loaded scoop history");
        Ok(Loaded::new(history, skipped))
    }

    async fn fetch_master_coef_list(&self) -> Result<Loaded<Vec<SensorRecord>>, StoreError> {
        let mut reader = self.reader(MASTER_COEF_FILE, true)?;
        let headers = Self::headers(&mut reader, MASTER_COEF_FILE)?;
        check_master_header(&headers)?;

        let mut rows = Vec::new();
        let mut skipped = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let parsed = result
                .map_err(|err| err.to_string())
                .and_then(|record| schema::sensor_from_row(&row_from(&headers, &record)));
            match parsed {
                Ok(record) => rows.push((idx + 1, record)),
                Err(reason) => skipped.push(MalformedRecord::new(MASTER_COEF_FILE, idx + 1, reason)),
            }
        }

        let records = schema::dedupe_sensors(MASTER_COEF_FILE, rows, &mut skipped);
        for malformed in &skipped {
            warn!(%malformed, "skipping coefficient row");
        }
        Ok(Loaded::new(records, skipped))
    }

    async fn list_scoops(&self) -> Result<Vec<ScoopId>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|err| StoreError::BackendUnavailable {
            backend: BACKEND_NAME,
            reason: format!("cannot list {}: {err}", self.root.display()),
        })?;

        let mut scoops: Vec<ScoopId> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| {
                name.strip_prefix("scoop")
                    .and_then(|rest| rest.strip_suffix(".csv"))
                    .filter(|id| !id.is_empty())
                    .map(ScoopId::new)
            })
            .collect();
        scoops.sort();
        Ok(scoops)
    }
}
