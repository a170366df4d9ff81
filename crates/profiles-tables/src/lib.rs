//! Client abstractions over keyed table stores holding sensor calibration metadata.
//!
//! Entities are addressed by `(PartitionKey, RowKey)` and carry free-form
//! properties. The coefficient store adapter in `profiles-core` is written
//! against [`TableClient`] so the HTTP client and the in-memory client are
//! interchangeable.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

pub const PARTITION_KEY: &str = "PartitionKey";
pub const ROW_KEY: &str = "RowKey";

/// Properties the service attaches to every entity; never part of the payload.
pub const SYSTEM_PROPERTIES: [&str; 4] = [PARTITION_KEY, ROW_KEY, "Timestamp", "odata.etag"];

pub type Entity = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct TableConfig {
    pub account: String,
    pub sas_token: String,
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            sas_token: String::new(),
            endpoint: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl TableConfig {
    pub fn base_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}.table.core.windows.net", self.account),
        }
    }
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("table {table} returned HTTP {status}: {message}")]
    Status {
        table: String,
        status: u16,
        message: String,
    },
    #[error("could not decode response from table {table}: {message}")]
    Decode { table: String, message: String },
}

impl TableError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TableError::Transport(_) => true,
            TableError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            TableError::Configuration(_) | TableError::Decode { .. } => false,
        }
    }
}

#[async_trait]
pub trait TableClient: Send + Sync {
    /// All entities of `table` whose partition key equals `partition_key`.
    async fn query_partition(
        &self,
        table: &str,
        partition_key: &str,
    ) -> Result<Vec<Entity>, TableError>;

    /// Every entity of `table`.
    async fn query_table(&self, table: &str) -> Result<Vec<Entity>, TableError>;
}

/// OData filter selecting a single partition. Single quotes are doubled.
pub fn partition_filter(partition_key: &str) -> String {
    format!("PartitionKey eq '{}'", partition_key.replace('\'', "''"))
}

/// Renders a property value as the plain string the row parsers expect.
pub fn property_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    value: Vec<Entity>,
}

/// Table service client authenticated with a shared access signature.
#[derive(Clone)]
pub struct AzureTableClient {
    http: reqwest::Client,
    base_url: String,
    sas_token: String,
}

impl AzureTableClient {
    pub fn new(config: TableConfig) -> Result<Self, TableError> {
        if config.account.is_empty() && config.endpoint.is_none() {
            return Err(TableError::Configuration(
                "either an account name or an explicit endpoint is required".into(),
            ));
        }
        if config.sas_token.trim().is_empty() {
            return Err(TableError::Configuration("SAS token cannot be empty".into()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json;odata=nometadata"),
        );
        headers.insert("x-ms-version", HeaderValue::from_static("2019-02-02"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|err| TableError::Configuration(err.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url(),
            sas_token: config.sas_token.trim_start_matches('?').to_string(),
        })
    }

    fn table_url(&self, table: &str) -> Result<Url, TableError> {
        let raw = format!("{}/{}()?{}", self.base_url, table, self.sas_token);
        Url::parse(&raw).map_err(|err| TableError::Configuration(format!("{raw}: {err}")))
    }

    async fn query(&self, table: &str, filter: Option<String>) -> Result<Vec<Entity>, TableError> {
        let mut entities = Vec::new();
        let mut continuation: Option<(String, Option<String>)> = None;

        loop {
            let mut request = self.http.get(self.table_url(table)?);
            if let Some(filter) = &filter {
                request = request.query(&[("$filter", filter.as_str())]);
            }
            if let Some((next_partition, next_row)) = &continuation {
                request = request.query(&[("NextPartitionKey", next_partition.as_str())]);
                if let Some(next_row) = next_row {
                    request = request.query(&[("NextRowKey", next_row.as_str())]);
                }
            }

            let response = request
                .send()
                .await
                .map_err(|err| TableError::Transport(err.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(TableError::Status {
                    table: table.to_string(),
                    status: status.as_u16(),
                    message,
                });
            }

            continuation = continuation_from(response.headers());

            let page: QueryResponse = response.json().await.map_err(|err| TableError::Decode {
                table: table.to_string(),
                message: err.to_string(),
            })?;
            debug!(table, rows = page.value.len(), "fetched table page");
            entities.extend(page.value);

            if continuation.is_none() {
                return Ok(entities);
            }
        }
    }
}

fn continuation_from(headers: &HeaderMap) -> Option<(String, Option<String>)> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    header("x-ms-continuation-NextPartitionKey")
        .map(|partition| (partition, header("x-ms-continuation-NextRowKey")))
}

#[async_trait]
impl TableClient for AzureTableClient {
    async fn query_partition(
        &self,
        table: &str,
        partition_key: &str,
    ) -> Result<Vec<Entity>, TableError> {
        self.query(table, Some(partition_filter(partition_key))).await
    }

    async fn query_table(&self, table: &str) -> Result<Vec<Entity>, TableError> {
        self.query(table, None).await
    }
}

/// In-process table store, used offline and by tests.
#[derive(Debug, Default)]
pub struct MemoryTableClient {
    tables: RwLock<HashMap<String, Vec<Entity>>>,
}

impl MemoryTableClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entity with the same partition and row key.
    pub fn upsert(&self, table: &str, partition_key: &str, row_key: &str, properties: Entity) {
        let mut entity = properties;
        entity.insert(PARTITION_KEY.into(), Value::String(partition_key.into()));
        entity.insert(ROW_KEY.into(), Value::String(row_key.into()));

        let mut tables = match self.tables.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let rows = tables.entry(table.to_string()).or_default();
        rows.retain(|existing| {
            !(key_of(existing, PARTITION_KEY) == Some(partition_key)
                && key_of(existing, ROW_KEY) == Some(row_key))
        });
        rows.push(entity);
    }

    fn rows(&self, table: &str) -> Vec<Entity> {
        let tables = match self.tables.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tables.get(table).cloned().unwrap_or_default()
    }
}

fn key_of<'a>(entity: &'a Entity, key: &str) -> Option<&'a str> {
    entity.get(key).and_then(Value::as_str)
}

#[async_trait]
impl TableClient for MemoryTableClient {
    async fn query_partition(
        &self,
        table: &str,
        partition_key: &str,
    ) -> Result<Vec<Entity>, TableError> {
        Ok(self
            .rows(table)
            .into_iter()
            .filter(|entity| key_of(entity, PARTITION_KEY) == Some(partition_key))
            .collect())
    }

    async fn query_table(&self, table: &str) -> Result<Vec<Entity>, TableError> {
        Ok(self.rows(table))
    }
}
