//! Incremental sync orchestration: catalog walk, page loading, watermark bookkeeping.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use hbc_core::{catalog, normalize_records, EntityDescriptor, Watermarks};
use hbc_store::{DbConfig, Destination, PgStore, StorageError, WatermarkStore};
use hbc_upstream::{
    ApiCredentials, ClientConfig, ContentSource, PageError, PageOptions, Paginator, ProtocolError,
    SignedClient, UpstreamError, DEFAULT_BASE_URL, DEFAULT_LANGUAGE, DEFAULT_PAGE_SIZE,
    MIN_REQUEST_INTERVAL,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "hbc-sync";

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    lookup(name)
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("{name} is not set"))
}

fn parsed_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> T {
    lookup(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Database settings shared by the sync job and the query endpoint.
pub fn database_config_from(lookup: &impl Fn(&str) -> Option<String>) -> Result<DbConfig> {
    let url = required(lookup, "DB_URL").or_else(|_| required(lookup, "DATABASE_URL"))?;
    let defaults = DbConfig::new(url);
    Ok(DbConfig {
        max_connections: parsed_or(lookup, "HBC_DB_MAX_CONNECTIONS", defaults.max_connections),
        acquire_timeout: Duration::from_secs(parsed_or(
            lookup,
            "HBC_DB_ACQUIRE_TIMEOUT_SECS",
            defaults.acquire_timeout.as_secs(),
        )),
        max_lifetime: Duration::from_secs(parsed_or(
            lookup,
            "HBC_DB_MAX_LIFETIME_SECS",
            defaults.max_lifetime.as_secs(),
        )),
        ..defaults
    })
}

pub fn database_config_from_env() -> Result<DbConfig> {
    database_config_from(&|name| std::env::var(name).ok())
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database: DbConfig,
    pub base_url: String,
    pub credentials: ApiCredentials,
    pub language: String,
    pub page_size: u32,
    pub request_interval: Duration,
    pub http_timeout: Duration,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            database: database_config_from(&lookup)?,
            base_url: lookup("HOTELBEDS_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            credentials: ApiCredentials {
                api_key: required(&lookup, "API_KEY")?,
                secret: required(&lookup, "SECRET")?,
            },
            language: lookup("HOTELBEDS_LANGUAGE").unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            page_size: parsed_or(&lookup, "HBC_PAGE_SIZE", DEFAULT_PAGE_SIZE).max(1),
            request_interval: Duration::from_millis(parsed_or(
                &lookup,
                "HBC_REQUEST_INTERVAL_MS",
                MIN_REQUEST_INTERVAL.as_millis() as u64,
            ))
            .max(MIN_REQUEST_INTERVAL),
            http_timeout: Duration::from_secs(parsed_or(&lookup, "HBC_HTTP_TIMEOUT_SECS", 30)),
        })
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            credentials: self.credentials.clone(),
            timeout: self.http_timeout,
            request_interval: self.request_interval,
        }
    }

    pub fn page_options(&self) -> PageOptions {
        PageOptions {
            page_size: self.page_size,
            language: self.language.clone(),
        }
    }
}

/// Why one entity's sync stopped. None of these abort the run.
#[derive(Debug, Error)]
pub enum EntityError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<PageError> for EntityError {
    fn from(err: PageError) -> Self {
        match err {
            PageError::Upstream(e) => EntityError::Upstream(e),
            PageError::Protocol(e) => EntityError::Protocol(e),
        }
    }
}

/// `Pending -> Fetching -> (Loading)* -> Advanced | Unchanged | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityState {
    Pending,
    Fetching,
    Loading,
    Advanced,
    Unchanged,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityReport {
    pub endpoint: String,
    pub table: String,
    pub since: Option<NaiveDate>,
    pub state: EntityState,
    pub pages: u32,
    pub rows: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub run_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entities: Vec<EntityReport>,
}

impl SyncRunSummary {
    fn count(&self, state: EntityState) -> usize {
        self.entities.iter().filter(|e| e.state == state).count()
    }

    pub fn advanced(&self) -> usize {
        self.count(EntityState::Advanced)
    }

    pub fn unchanged(&self) -> usize {
        self.count(EntityState::Unchanged)
    }

    pub fn failed(&self) -> usize {
        self.count(EntityState::Failed)
    }

    pub fn total_rows(&self) -> u64 {
        self.entities.iter().map(|e| e.rows).sum()
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub paging: PageOptions,
    /// Date recorded as the watermark for entities that loaded rows.
    pub run_date: NaiveDate,
}

impl SyncOptions {
    pub fn new(paging: PageOptions) -> Self {
        Self {
            paging,
            run_date: Utc::now().date_naive(),
        }
    }
}

/// Walks the catalog one entity at a time, one page at a time.
pub struct SyncOrchestrator<'a> {
    source: &'a dyn ContentSource,
    destination: &'a dyn Destination,
    watermarks: &'a dyn WatermarkStore,
    options: SyncOptions,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(
        source: &'a dyn ContentSource,
        destination: &'a dyn Destination,
        watermarks: &'a dyn WatermarkStore,
        options: SyncOptions,
    ) -> Self {
        Self {
            source,
            destination,
            watermarks,
            options,
        }
    }

    /// Errors only when the watermark store itself cannot be read or finally written.
    pub async fn run(&self, entities: &[EntityDescriptor]) -> Result<SyncRunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut marks = self
            .watermarks
            .load_all()
            .await
            .context("loading watermarks")?;

        let mut reports = Vec::with_capacity(entities.len());
        for entity in entities {
            let span = info_span!("entity_sync", %run_id, endpoint = %entity.endpoint);
            let report = self.sync_entity(entity, &mut marks).instrument(span).await;
            reports.push(report);
        }

        self.watermarks
            .save_all(&marks)
            .await
            .context("saving watermarks")?;
        info!(%run_id, "finished checking all endpoints for updates");

        Ok(SyncRunSummary {
            run_id,
            run_date: self.options.run_date,
            started_at,
            finished_at: Utc::now(),
            entities: reports,
        })
    }

    async fn sync_entity(&self, entity: &EntityDescriptor, marks: &mut Watermarks) -> EntityReport {
        let table = entity.qualified_table();
        let since = marks.get(&table).copied();
        let mut report = EntityReport {
            endpoint: entity.endpoint.clone(),
            table: table.clone(),
            since,
            state: EntityState::Pending,
            pages: 0,
            rows: 0,
            error: None,
        };

        match since {
            Some(date) => info!(endpoint = %entity.endpoint, since = %date, "checking for updates"),
            None => info!(endpoint = %entity.endpoint, "checking for updates since the beginning"),
        }
        report.state = EntityState::Fetching;

        match self.pull(entity, &table, since, &mut report).await {
            Err(err) => {
                error!(endpoint = %entity.endpoint, rows = report.rows, error = %err, "entity sync failed");
                report.state = EntityState::Failed;
                report.error = Some(err.to_string());
            }
            Ok(()) if report.rows > 0 => {
                let date = self.options.run_date;
                marks.insert(table.clone(), date);
                if let Err(err) = self.watermarks.save(&table, date).await {
                    warn!(%table, error = %err, "immediate watermark save failed; final save will retry");
                }
                info!(endpoint = %entity.endpoint, rows = report.rows, "inserted updated items");
                report.state = EntityState::Advanced;
            }
            Ok(()) => {
                info!(endpoint = %entity.endpoint, "no updates found");
                report.state = EntityState::Unchanged;
            }
        }
        report
    }

    async fn pull(
        &self,
        entity: &EntityDescriptor,
        table: &str,
        since: Option<NaiveDate>,
        report: &mut EntityReport,
    ) -> Result<(), EntityError> {
        let mut pages = Paginator::new(self.source, entity, since, &self.options.paging);
        loop {
            let next = pages.next_batch().await;
            report.pages = pages.pages_requested();
            let Some(batch) = next? else {
                return Ok(());
            };

            let normalized = normalize_records(&batch.records);
            if normalized.columns.is_empty() {
                warn!(%table, page = batch.page, "skipping page whose records carry no values");
                continue;
            }

            report.state = EntityState::Loading;
            self.destination.reconcile(&normalized, table).await?;
            report.rows += self.destination.load(&normalized, table).await?;
        }
    }
}

/// Build every collaborator from the environment and sync the full catalog once.
pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let config = SyncConfig::from_env()?;
    let client = SignedClient::new(config.client_config())?;
    let pool = hbc_store::connect(&config.database).await?;
    let store = PgStore::new(pool);

    let orchestrator = SyncOrchestrator::new(
        &client,
        &store,
        &store,
        SyncOptions::new(config.page_options()),
    );
    let summary = orchestrator.run(&catalog()).await;
    store.close().await;
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hbc_core::NormalizedBatch;
    use hbc_store::{plan_schema_change, SchemaChange};
    use serde_json::{json, Value};
    use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    type Events = Arc<Mutex<Vec<String>>>;

    struct ScriptedSource {
        responses: Mutex<HashMap<String, VecDeque<Result<Value, u16>>>>,
        calls: Mutex<Vec<(String, Vec<(&'static str, String)>)>>,
        events: Events,
    }

    impl ScriptedSource {
        fn new(events: Events) -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                events,
            }
        }

        fn respond(self, endpoint: &str, response: Result<Value, u16>) -> Self {
            self.responses
                .lock()
                .unwrap()
                .entry(endpoint.to_string())
                .or_default()
                .push_back(response);
            self
        }

        fn last_update_param(&self, endpoint: &str) -> Option<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .find(|(e, _)| e == endpoint)
                .and_then(|(_, params)| {
                    params
                        .iter()
                        .find(|(k, _)| *k == "lastUpdateTime")
                        .map(|(_, v)| v.clone())
                })
        }
    }

    #[async_trait]
    impl ContentSource for ScriptedSource {
        async fn fetch(
            &self,
            endpoint: &str,
            params: &[(&'static str, String)],
        ) -> Result<Value, UpstreamError> {
            self.events.lock().unwrap().push(format!("fetch {endpoint}"));
            self.calls
                .lock()
                .unwrap()
                .push((endpoint.to_string(), params.to_vec()));
            let next = self
                .responses
                .lock()
                .unwrap()
                .get_mut(endpoint)
                .and_then(|queue| queue.pop_front());
            match next {
                Some(Ok(body)) => Ok(body),
                Some(Err(status)) => Err(UpstreamError::HttpStatus {
                    status,
                    url: endpoint.to_string(),
                }),
                None => Err(UpstreamError::HttpStatus {
                    status: 404,
                    url: endpoint.to_string(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct MemoryTable {
        columns: BTreeSet<String>,
        rows: Vec<BTreeMap<String, Option<String>>>,
    }

    #[derive(Default)]
    struct MemoryDestination {
        tables: Mutex<BTreeMap<String, MemoryTable>>,
        failing_tables: BTreeSet<String>,
    }

    impl MemoryDestination {
        fn failing_on(table: &str) -> Self {
            Self {
                failing_tables: [table.to_string()].into_iter().collect(),
                ..Self::default()
            }
        }

        fn row_count(&self, table: &str) -> usize {
            self.tables
                .lock()
                .unwrap()
                .get(table)
                .map(|t| t.rows.len())
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl Destination for MemoryDestination {
        async fn reconcile(&self, batch: &NormalizedBatch, table: &str) -> Result<(), StorageError> {
            let mut tables = self.tables.lock().unwrap();
            let existing = tables.get(table).map(|t| t.columns.clone());
            match plan_schema_change(existing.as_ref(), &batch.columns) {
                SchemaChange::Create(columns) | SchemaChange::AddColumns(columns) => {
                    tables
                        .entry(table.to_string())
                        .or_default()
                        .columns
                        .extend(columns);
                }
                SchemaChange::Unchanged => {}
            }
            Ok(())
        }

        async fn load(&self, batch: &NormalizedBatch, table: &str) -> Result<u64, StorageError> {
            if self.failing_tables.contains(table) {
                return Err(StorageError::EmptyBatch {
                    table: table.to_string(),
                });
            }
            let mut tables = self.tables.lock().unwrap();
            let target = tables.get_mut(table).expect("reconciled before load");
            for row in &batch.rows {
                target.rows.push(
                    batch
                        .columns
                        .iter()
                        .cloned()
                        .zip(row.iter().map(|v| v.to_sql_text()))
                        .collect(),
                );
            }
            Ok(batch.rows.len() as u64)
        }
    }

    struct MemoryWatermarks {
        marks: Mutex<Watermarks>,
        events: Events,
    }

    impl MemoryWatermarks {
        fn new(initial: Watermarks, events: Events) -> Self {
            Self {
                marks: Mutex::new(initial),
                events,
            }
        }

        fn get(&self, table: &str) -> Option<NaiveDate> {
            self.marks.lock().unwrap().get(table).copied()
        }
    }

    #[async_trait]
    impl WatermarkStore for MemoryWatermarks {
        async fn load_all(&self) -> Result<Watermarks, StorageError> {
            Ok(self.marks.lock().unwrap().clone())
        }

        async fn save(&self, table: &str, date: NaiveDate) -> Result<(), StorageError> {
            self.events.lock().unwrap().push(format!("save {table}"));
            self.marks.lock().unwrap().insert(table.to_string(), date);
            Ok(())
        }

        async fn save_all(&self, watermarks: &Watermarks) -> Result<(), StorageError> {
            self.events.lock().unwrap().push("save_all".to_string());
            self.marks.lock().unwrap().extend(watermarks.clone());
            Ok(())
        }
    }

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn options() -> SyncOptions {
        SyncOptions {
            paging: PageOptions::default(),
            run_date: run_date(),
        }
    }

    fn countries() -> EntityDescriptor {
        EntityDescriptor::new("locations/countries", "countries")
    }

    fn rooms() -> EntityDescriptor {
        EntityDescriptor::new("types/rooms", "rooms")
    }

    fn countries_page() -> Value {
        json!({"total": 3, "to": 3, "countries": [
            {"code": "US", "name": "United States"},
            {"code": "FR", "name": "France"},
            {"code": "DE", "name": "Germany"}
        ]})
    }

    fn rooms_page() -> Value {
        json!({"total": 1, "to": 1, "rooms": [{"code": "DBL", "type": "DBL", "minPax": 1}]})
    }

    #[tokio::test]
    async fn countries_page_lands_in_prefixed_table_and_advances_watermark() {
        let events = Events::default();
        let source = ScriptedSource::new(events.clone()).respond("locations/countries", Ok(countries_page()));
        let destination = MemoryDestination::default();
        let watermarks = MemoryWatermarks::new(Watermarks::new(), events.clone());

        let summary = SyncOrchestrator::new(&source, &destination, &watermarks, options())
            .run(&[countries()])
            .await
            .unwrap();

        let report = &summary.entities[0];
        assert_eq!(report.state, EntityState::Advanced);
        assert_eq!(report.rows, 3);
        assert_eq!(report.pages, 1);
        assert_eq!(destination.row_count("hotelbeds_countries"), 3);
        let tables = destination.tables.lock().unwrap();
        let columns: Vec<_> = tables["hotelbeds_countries"].columns.iter().cloned().collect();
        assert_eq!(columns, vec!["code", "name"]);
        assert_eq!(
            tables["hotelbeds_countries"].rows[1]["name"].as_deref(),
            Some("France")
        );
        assert_eq!(watermarks.get("hotelbeds_countries"), Some(run_date()));
        assert_eq!(source.last_update_param("locations/countries"), None);
    }

    #[tokio::test]
    async fn upstream_failure_is_isolated_to_its_entity() {
        let events = Events::default();
        let source = ScriptedSource::new(events.clone())
            .respond("locations/countries", Err(500))
            .respond("types/rooms", Ok(rooms_page()));
        let destination = MemoryDestination::default();
        let prior = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let watermarks = MemoryWatermarks::new(
            [("hotelbeds_countries".to_string(), prior)].into_iter().collect(),
            events.clone(),
        );

        let summary = SyncOrchestrator::new(&source, &destination, &watermarks, options())
            .run(&[countries(), rooms()])
            .await
            .unwrap();

        assert_eq!(summary.entities[0].state, EntityState::Failed);
        assert!(summary.entities[0].error.as_deref().unwrap().contains("500"));
        assert_eq!(summary.entities[1].state, EntityState::Advanced);
        assert_eq!(watermarks.get("hotelbeds_countries"), Some(prior));
        assert_eq!(watermarks.get("hotelbeds_rooms"), Some(run_date()));
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.advanced(), 1);
    }

    #[tokio::test]
    async fn empty_first_page_leaves_watermark_untouched() {
        let events = Events::default();
        let source = ScriptedSource::new(events.clone())
            .respond("locations/countries", Ok(json!({"total": 0, "to": 0, "countries": []})));
        let destination = MemoryDestination::default();
        let prior = NaiveDate::from_ymd_opt(2026, 3, 4).unwrap();
        let watermarks = MemoryWatermarks::new(
            [("hotelbeds_countries".to_string(), prior)].into_iter().collect(),
            events.clone(),
        );

        let summary = SyncOrchestrator::new(&source, &destination, &watermarks, options())
            .run(&[countries()])
            .await
            .unwrap();

        assert_eq!(summary.entities[0].state, EntityState::Unchanged);
        assert_eq!(summary.unchanged(), 1);
        assert_eq!(watermarks.get("hotelbeds_countries"), Some(prior));
        assert!(!events.lock().unwrap().iter().any(|e| e.starts_with("save hotelbeds")));
        assert_eq!(
            source.last_update_param("locations/countries").as_deref(),
            Some("2026-03-04")
        );
    }

    #[tokio::test]
    async fn watermark_is_persisted_before_next_entity_starts() {
        let events = Events::default();
        let source = ScriptedSource::new(events.clone())
            .respond("locations/countries", Ok(countries_page()))
            .respond("types/rooms", Ok(rooms_page()));
        let destination = MemoryDestination::default();
        let watermarks = MemoryWatermarks::new(Watermarks::new(), events.clone());

        SyncOrchestrator::new(&source, &destination, &watermarks, options())
            .run(&[countries(), rooms()])
            .await
            .unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                "fetch locations/countries",
                "save hotelbeds_countries",
                "fetch types/rooms",
                "save hotelbeds_rooms",
                "save_all",
            ]
        );
    }

    #[tokio::test]
    async fn resumed_run_filters_completed_entity_and_restarts_the_rest() {
        // State left behind by a run that stopped after countries completed.
        let events = Events::default();
        let watermarks = MemoryWatermarks::new(
            [("hotelbeds_countries".to_string(), run_date())].into_iter().collect(),
            events.clone(),
        );
        let source = ScriptedSource::new(events.clone())
            .respond("locations/countries", Ok(json!({"total": 0, "to": 0, "countries": []})))
            .respond("types/rooms", Ok(rooms_page()));
        let destination = MemoryDestination::default();

        let summary = SyncOrchestrator::new(&source, &destination, &watermarks, options())
            .run(&[countries(), rooms()])
            .await
            .unwrap();

        assert_eq!(
            source.last_update_param("locations/countries").as_deref(),
            Some("2026-10-19")
        );
        assert_eq!(source.last_update_param("types/rooms"), None);
        assert_eq!(summary.entities[0].state, EntityState::Unchanged);
        assert_eq!(summary.entities[1].state, EntityState::Advanced);
    }

    #[tokio::test]
    async fn storage_failure_does_not_advance_watermark() {
        let events = Events::default();
        let source = ScriptedSource::new(events.clone())
            .respond("locations/countries", Ok(countries_page()))
            .respond("types/rooms", Ok(rooms_page()));
        let destination = MemoryDestination::failing_on("hotelbeds_countries");
        let watermarks = MemoryWatermarks::new(Watermarks::new(), events.clone());

        let summary = SyncOrchestrator::new(&source, &destination, &watermarks, options())
            .run(&[countries(), rooms()])
            .await
            .unwrap();

        assert_eq!(summary.entities[0].state, EntityState::Failed);
        assert_eq!(summary.entities[0].rows, 0);
        assert_eq!(watermarks.get("hotelbeds_countries"), None);
        assert_eq!(summary.entities[1].state, EntityState::Advanced);
        assert_eq!(summary.total_rows(), 1);
    }

    #[tokio::test]
    async fn protocol_error_fails_entity_without_retry() {
        let events = Events::default();
        let source = ScriptedSource::new(events.clone())
            .respond("locations/countries", Ok(json!({"total": 3, "to": 3, "unexpected": []})));
        let destination = MemoryDestination::default();
        let watermarks = MemoryWatermarks::new(Watermarks::new(), events.clone());

        let summary = SyncOrchestrator::new(&source, &destination, &watermarks, options())
            .run(&[countries()])
            .await
            .unwrap();

        assert_eq!(summary.entities[0].state, EntityState::Failed);
        assert_eq!(
            events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.starts_with("fetch"))
                .count(),
            1
        );
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn config_defaults_and_interval_floor() {
        let config = SyncConfig::from_lookup(env(&[
            ("DB_URL", "postgres://u:p@localhost/hb"),
            ("API_KEY", "key"),
            ("SECRET", "secret"),
            ("HBC_REQUEST_INTERVAL_MS", "100"),
        ]))
        .unwrap();

        assert_eq!(config.database.url, "postgres://u:p@localhost/hb");
        assert_eq!(config.database.max_connections, 30);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.language, "ENG");
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.request_interval, Duration::from_millis(250));
    }

    #[test]
    fn config_requires_credentials_and_database() {
        let err = SyncConfig::from_lookup(env(&[("DB_URL", "postgres://x")])).unwrap_err();
        assert!(err.to_string().contains("API_KEY"));

        let err = SyncConfig::from_lookup(env(&[("API_KEY", "k"), ("SECRET", "s")])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));

        let fallback = database_config_from(&env(&[("DATABASE_URL", "postgres://fallback")])).unwrap();
        assert_eq!(fallback.url, "postgres://fallback");
    }
}
