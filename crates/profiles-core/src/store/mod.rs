//! Read access to platform, scoop and coefficient tables.
//!
//! Both backends normalize their rows through [`schema`], so equivalent data
//! yields identical records whichever backend served it.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::CoefficientSource;
use crate::model::{PlatformId, PlatformMapping, ScoopAssignment, ScoopId, SensorRecord};

pub mod local;
pub mod remote;
pub mod schema;

pub use local::LocalCsvStore;
pub use remote::{RetryPolicy, TableStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{backend} backend unavailable: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    #[error("{source_name} has an unexpected header: expected {expected:?}, found {found:?}")]
    InvalidHeader {
        source_name: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("CSV error in {source_name}: {source}")]
    Csv {
        source_name: String,
        #[source]
        source: csv::Error,
    },
}

/// A row that violated the table schema and was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    pub source: String,
    /// 1-based data row index (the header is not counted).
    pub row: usize,
    pub reason: String,
}

impl MalformedRecord {
    pub fn new(source: impl Into<String>, row: usize, reason: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            row,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} row {}: {}", self.source, self.row, self.reason)
    }
}

/// Records fetched from a backend together with the rows that were skipped.
#[derive(Debug, Clone, Default)]
pub struct Loaded<T> {
    pub records: T,
    pub skipped: Vec<MalformedRecord>,
}

impl<T> Loaded<T> {
    pub fn new(records: T, skipped: Vec<MalformedRecord>) -> Self {
        Self { records, skipped }
    }
}

pub type CopterTable = BTreeMap<PlatformId, PlatformMapping>;

#[async_trait]
pub trait CoefficientStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn fetch_copter_table(&self) -> Result<Loaded<CopterTable>, StoreError>;

    /// Assignment history of one scoop, ordered by `valid_from`.
    async fn fetch_scoop_history(
        &self,
        scoop_id: &ScoopId,
    ) -> Result<Loaded<Vec<ScoopAssignment>>, StoreError>;

    async fn fetch_master_coef_list(&self) -> Result<Loaded<Vec<SensorRecord>>, StoreError>;

    /// Every scoop that has an assignment history in this backend.
    async fn list_scoops(&self) -> Result<Vec<ScoopId>, StoreError>;
}

/// Opens the backend named by the configuration.
pub fn open_store(source: &CoefficientSource) -> Result<Box<dyn CoefficientStore>, StoreError> {
    match source {
        CoefficientSource::Local { coefs_path } => {
            Ok(Box::new(LocalCsvStore::open(coefs_path.clone())?))
        }
        CoefficientSource::Remote {
            account,
            sas_token,
            endpoint,
            timeout_secs,
            retry,
        } => {
            let config = profiles_tables::TableConfig {
                account: account.clone(),
                sas_token: sas_token.clone(),
                endpoint: endpoint.clone(),
                timeout: std::time::Duration::from_secs(*timeout_secs),
            };
            let client = profiles_tables::AzureTableClient::new(config).map_err(|err| {
                StoreError::BackendUnavailable {
                    backend: remote::BACKEND_NAME,
                    reason: err.to_string(),
                }
            })?;
            Ok(Box::new(TableStore::new(client).with_retry(retry.clone())))
        }
    }
}
