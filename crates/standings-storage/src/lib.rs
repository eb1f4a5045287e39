//! HTTP fetch utilities and the standings persistence gateway.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use standings_core::StandingRecord;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::info_span;
use uuid::Uuid;

pub const CRATE_NAME: &str = "standings-storage";

// ─── HTTP fetch ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_competition_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 8,
            per_competition_concurrency: 2,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: StatusCode,
    pub final_url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Shared HTTP client with bounded retries and global/per-competition
/// concurrency limits. One instance is reused across a whole refresh run.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Semaphore,
    per_competition_limit: usize,
    per_competition: Mutex<HashMap<String, Arc<Semaphore>>>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        Ok(Self {
            client: builder.build().context("building reqwest client")?,
            global_limit: Semaphore::new(config.global_concurrency.max(1)),
            per_competition_limit: config.per_competition_concurrency.max(1),
            per_competition: Mutex::new(HashMap::new()),
            backoff: config.backoff,
        })
    }

    async fn competition_semaphore(&self, competition: &str) -> Arc<Semaphore> {
        let mut map = self.per_competition.lock().await;
        map.entry(competition.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_competition_limit)))
            .clone()
    }

    /// GET a page as text, retrying transient failures with exponential
    /// backoff. Non-success statuses that are not retryable surface as
    /// `FetchError::HttpStatus`.
    pub async fn fetch_text(
        &self,
        run_id: Uuid,
        competition: &str,
        url: &str,
    ) -> Result<FetchedPage, FetchError> {
        let _global = self.global_limit.acquire().await.expect("semaphore not closed");
        let per_competition = self.competition_semaphore(competition).await;
        let _scoped = per_competition.acquire().await.expect("semaphore not closed");

        let span = info_span!("http_fetch", %run_id, competition, url);
        let _guard = span.enter();

        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.text().await?;
                        return Ok(FetchedPage {
                            status,
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(FetchError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }
}

// ─── Persistence gateway ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Unavailable(String),
}

/// Store boundary the orchestrator writes through: delete one competition's
/// partition, bulk-insert its replacement rows.
#[async_trait]
pub trait StandingsGateway: Send + Sync {
    async fn delete_by_competition(&self, competition: &str) -> Result<(), StorageError>;
    async fn bulk_insert(&self, records: &[StandingRecord]) -> Result<(), StorageError>;
}

/// Postgres-backed gateway over the `standings` table.
#[derive(Debug, Clone)]
pub struct PgStandingsGateway {
    pool: PgPool,
}

// Stay under the Postgres bind-parameter cap: 10 columns per row.
const INSERT_CHUNK_ROWS: usize = 500;

impl PgStandingsGateway {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("running standings migrations")?;
        Ok(())
    }
}

#[async_trait]
impl StandingsGateway for PgStandingsGateway {
    async fn delete_by_competition(&self, competition: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM standings WHERE competition = $1")
            .bind(competition)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn bulk_insert(&self, records: &[StandingRecord]) -> Result<(), StorageError> {
        for chunk in records.chunks(INSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO standings (competition, team, played, won, drawn, lost, points, \
                 for_points, against_points, point_difference) ",
            );
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(&record.competition)
                    .push_bind(&record.team)
                    .push_bind(record.played as i32)
                    .push_bind(record.won as i32)
                    .push_bind(record.drawn as i32)
                    .push_bind(record.lost as i32)
                    .push_bind(record.points as i32)
                    .push_bind(record.for_points)
                    .push_bind(record.against_points)
                    .push_bind(record.point_difference);
            });
            builder.build().execute(&self.pool).await?;
        }
        Ok(())
    }
}

/// In-memory gateway for orchestrator tests: a partition map plus injectable
/// per-competition failures for either operation.
#[derive(Debug, Default)]
pub struct MemoryStandingsGateway {
    partitions: RwLock<HashMap<String, Vec<StandingRecord>>>,
    fail_deletes: HashSet<String>,
    fail_inserts: HashSet<String>,
}

impl MemoryStandingsGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failing_delete(mut self, competition: &str) -> Self {
        self.fail_deletes.insert(competition.to_string());
        self
    }

    pub fn with_failing_insert(mut self, competition: &str) -> Self {
        self.fail_inserts.insert(competition.to_string());
        self
    }

    pub async fn records_for(&self, competition: &str) -> Vec<StandingRecord> {
        self.partitions
            .read()
            .await
            .get(competition)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn partition_count(&self) -> usize {
        self.partitions.read().await.len()
    }
}

#[async_trait]
impl StandingsGateway for MemoryStandingsGateway {
    async fn delete_by_competition(&self, competition: &str) -> Result<(), StorageError> {
        if self.fail_deletes.contains(competition) {
            return Err(StorageError::Unavailable(format!(
                "injected delete failure for {competition}"
            )));
        }
        self.partitions.write().await.remove(competition);
        Ok(())
    }

    async fn bulk_insert(&self, records: &[StandingRecord]) -> Result<(), StorageError> {
        for record in records {
            if self.fail_inserts.contains(&record.competition) {
                return Err(StorageError::Unavailable(format!(
                    "injected insert failure for {}",
                    record.competition
                )));
            }
        }
        let mut partitions = self.partitions.write().await;
        for record in records {
            partitions
                .entry(record.competition.clone())
                .or_default()
                .push(record.clone());
        }
        Ok(())
    }
}
