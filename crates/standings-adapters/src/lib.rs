//! Source adapter contract + the rendered-table and JSON API adapters.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use standings_core::RawRow;
use standings_storage::{FetchError, HttpFetcher};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "standings-adapters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Table,
    Api,
}

/// Structural signal a table source must show before it counts as loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessCondition {
    #[serde(default = "default_row_selector")]
    pub row_selector: String,
    #[serde(default = "default_min_rows")]
    pub min_rows: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_row_selector() -> String {
    "table tbody tr".to_string()
}

fn default_min_rows() -> usize {
    1
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ReadinessCondition {
    fn default() -> Self {
        Self {
            row_selector: default_row_selector(),
            min_rows: default_min_rows(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Where and how to fetch one competition's raw rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub kind: SourceKind,
    pub url: String,
    /// JSON pointer to the team list in an API response; empty means the
    /// response root.
    #[serde(default)]
    pub rows_pointer: String,
    #[serde(default)]
    pub readiness: ReadinessCondition,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("no standings rows matched {selector:?} within {waited_secs}s")]
    TableNotFound { selector: String, waited_secs: u64 },
    #[error("invalid row selector {0:?}")]
    InvalidSelector(String),
}

impl From<FetchError> for AdapterError {
    fn from(err: FetchError) -> Self {
        AdapterError::SourceUnavailable(err.to_string())
    }
}

/// Yields one competition's raw rows. Concrete adapters own the transport;
/// callers only see rows or the two failure kinds above.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn fetch_rows(
        &self,
        http: &HttpFetcher,
        run_id: Uuid,
        competition: &str,
        spec: &SourceSpec,
    ) -> Result<Vec<RawRow>, AdapterError>;
}

/// Adapter for server-rendered standings tables.
///
/// The page is fetched and re-polled until the row selector matches at least
/// `min_rows` rows or the readiness deadline passes, standing in for a
/// browser-side wait on the same selector.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderedTableAdapter;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[async_trait]
impl SourceAdapter for RenderedTableAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Table
    }

    async fn fetch_rows(
        &self,
        http: &HttpFetcher,
        run_id: Uuid,
        competition: &str,
        spec: &SourceSpec,
    ) -> Result<Vec<RawRow>, AdapterError> {
        let readiness = &spec.readiness;
        let deadline = Instant::now() + Duration::from_secs(readiness.timeout_secs);

        loop {
            let page = http.fetch_text(run_id, competition, &spec.url).await?;
            let rows = rows_from_html(&page.body, &readiness.row_selector)?;
            if rows.len() >= readiness.min_rows {
                debug!(competition, rows = rows.len(), "table ready");
                return Ok(rows);
            }
            if Instant::now() + POLL_INTERVAL > deadline {
                return Err(AdapterError::TableNotFound {
                    selector: readiness.row_selector.clone(),
                    waited_secs: readiness.timeout_secs,
                });
            }
            debug!(competition, rows = rows.len(), "table not ready, polling again");
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn rows_from_html(html: &str, row_selector: &str) -> Result<Vec<RawRow>, AdapterError> {
    let rows = Selector::parse(row_selector)
        .map_err(|_| AdapterError::InvalidSelector(row_selector.to_string()))?;
    let cells = Selector::parse("td").expect("static selector");

    let document = Html::parse_document(html);
    Ok(document
        .select(&rows)
        .map(|row| {
            RawRow::Cells(
                row.select(&cells)
                    .map(|cell| cell.text().collect::<String>().trim().to_string())
                    .collect(),
            )
        })
        .collect())
}

/// Adapter for structured standings endpoints: one GET, one `RawRow::Object`
/// per entry in the configured team list.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiAdapter;

#[async_trait]
impl SourceAdapter for ApiAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    async fn fetch_rows(
        &self,
        http: &HttpFetcher,
        run_id: Uuid,
        competition: &str,
        spec: &SourceSpec,
    ) -> Result<Vec<RawRow>, AdapterError> {
        let page = http.fetch_text(run_id, competition, &spec.url).await?;
        rows_from_json(&page.body, &spec.rows_pointer)
    }
}

fn rows_from_json(body: &str, rows_pointer: &str) -> Result<Vec<RawRow>, AdapterError> {
    let value: JsonValue = serde_json::from_str(body).map_err(|_| AdapterError::TableNotFound {
        selector: rows_pointer.to_string(),
        waited_secs: 0,
    })?;
    let node = if rows_pointer.is_empty() {
        Some(&value)
    } else {
        value.pointer(rows_pointer)
    };
    let entries = node
        .and_then(JsonValue::as_array)
        .ok_or_else(|| AdapterError::TableNotFound {
            selector: rows_pointer.to_string(),
            waited_secs: 0,
        })?;
    Ok(entries.iter().cloned().map(RawRow::Object).collect())
}

pub fn adapter_for_kind(kind: SourceKind) -> Box<dyn SourceAdapter> {
    match kind {
        SourceKind::Table => Box::new(RenderedTableAdapter),
        SourceKind::Api => Box::new(ApiAdapter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STANDINGS_PAGE: &str = r#"
        <html><body>
        <h1>League table</h1>
        <table>
          <thead><tr><th>#</th><th>Team</th><th>P</th></tr></thead>
          <tbody>
            <tr><td>1</td><td> Saracens </td><td>10</td><td>7</td><td>1</td><td>2</td><td>45</td><td>20</td><td></td><td></td><td>30</td></tr>
            <tr><td>2</td><td>Bath</td><td>10</td><td>6</td><td>0</td><td>4</td><td>38</td><td>31</td><td></td><td></td><td>24</td></tr>
          </tbody>
        </table>
        </body></html>"#;

    #[test]
    fn table_rows_become_trimmed_cell_sequences() {
        let rows = rows_from_html(STANDINGS_PAGE, "table tbody tr").unwrap();
        assert_eq!(rows.len(), 2);
        let RawRow::Cells(cells) = &rows[0] else {
            panic!("table adapter yields cell rows");
        };
        assert_eq!(cells[1], "Saracens");
        assert_eq!(cells[10], "30");
    }

    #[test]
    fn selector_that_matches_nothing_yields_no_rows() {
        let rows = rows_from_html(STANDINGS_PAGE, "table.standings tbody tr").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn malformed_selector_is_rejected() {
        assert!(matches!(
            rows_from_html(STANDINGS_PAGE, "tr["),
            Err(AdapterError::InvalidSelector(_))
        ));
    }

    #[test]
    fn api_rows_follow_the_configured_pointer() {
        let body = r#"{"standings":{"teams":[{"teamName":"Crusaders","wins":11},{"teamName":"Chiefs","wins":10}]}}"#;
        let rows = rows_from_json(body, "/standings/teams").unwrap();
        assert_eq!(rows.len(), 2);
        let RawRow::Object(first) = &rows[0] else {
            panic!("api adapter yields object rows");
        };
        assert_eq!(first["teamName"], "Crusaders");
    }

    #[test]
    fn api_root_array_works_with_empty_pointer() {
        let rows = rows_from_json(r#"[{"teamName":"Blues"}]"#, "").unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn api_structural_mismatch_is_table_not_found() {
        assert!(matches!(
            rows_from_json(r#"{"standings":{}}"#, "/standings/teams"),
            Err(AdapterError::TableNotFound { .. })
        ));
        assert!(matches!(
            rows_from_json("<html>not json</html>", "/standings/teams"),
            Err(AdapterError::TableNotFound { .. })
        ));
    }

    #[test]
    fn registry_kinds_resolve_to_matching_adapters() {
        assert_eq!(adapter_for_kind(SourceKind::Table).kind(), SourceKind::Table);
        assert_eq!(adapter_for_kind(SourceKind::Api).kind(), SourceKind::Api);
    }
}
