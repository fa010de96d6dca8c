//! Time-series store
//!
//! Read-only access to the last recorded value of a field, used to seed the
//! defrost counter. [`InfluxV1Store`] talks to the InfluxDB 1.x HTTP query
//! API; no authentication.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::InfluxConfig;
use crate::error::{NibeSrvError, Result};

/// Last-value lookup in a time-series store
#[async_trait]
pub trait SeriesStore: Send + Sync {
    /// `Ok(None)`: store reachable, nothing recorded.
    /// `Err`: store unreachable or the query failed.
    async fn query_last(&self, series: &str, field: &str) -> Result<Option<f64>>;
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// InfluxDB 1.x client
#[derive(Clone)]
pub struct InfluxV1Store {
    client: Client,
    url: String,
    database: String,
}

impl InfluxV1Store {
    pub fn new(config: &InfluxConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| NibeSrvError::config(format!("Failed to build InfluxDB client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
        })
    }
}

#[async_trait]
impl SeriesStore for InfluxV1Store {
    async fn query_last(&self, series: &str, field: &str) -> Result<Option<f64>> {
        let query = format!("select last(\"{}\") from {}", field, series);
        debug!("InfluxDB query on {}: {}", self.database, query);

        let response = self
            .client
            .get(format!("{}/query", self.url))
            .query(&[("db", self.database.as_str()), ("q", query.as_str())])
            .send()
            .await
            .map_err(|e| NibeSrvError::store(format!("InfluxDB unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NibeSrvError::store(format!(
                "InfluxDB query failed: HTTP {}",
                status
            )));
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| NibeSrvError::store(format!("Malformed InfluxDB response: {}", e)))?;

        parse_last_value(body)
    }
}

fn parse_last_value(body: QueryResponse) -> Result<Option<f64>> {
    if let Some(error) = body.error {
        return Err(NibeSrvError::store(format!("InfluxDB error: {}", error)));
    }

    let Some(statement) = body.results.into_iter().next() else {
        return Ok(None);
    };
    if let Some(error) = statement.error {
        return Err(NibeSrvError::store(format!("InfluxDB error: {}", error)));
    }

    let Some(series) = statement.series.into_iter().next() else {
        return Ok(None);
    };

    // Column 0 is always "time"
    let column = series
        .columns
        .iter()
        .position(|c| c == "last")
        .unwrap_or(1);

    let Some(row) = series.values.first() else {
        return Ok(None);
    };
    match row.get(column) {
        Some(cell) => cell.as_f64().map(Some).ok_or_else(|| {
            NibeSrvError::store(format!("Non-numeric last value in InfluxDB: {}", cell))
        }),
        None => Err(NibeSrvError::store("InfluxDB row has no last value")),
    }
}
