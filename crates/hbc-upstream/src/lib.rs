//! Signed HTTP access to the Hotelbeds content API plus page-by-page record iteration.

use std::fmt;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use hbc_core::{format_watermark, EntityDescriptor, Record};
use reqwest::header::ACCEPT;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, info_span, Instrument};

pub const CRATE_NAME: &str = "hbc-upstream";

pub const DEFAULT_BASE_URL: &str = "https://api.test.hotelbeds.com/hotel-content-api/1.0/";

/// Upstream ceiling is 4 requests/second; never pace faster than this.
pub const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(250);

pub const DEFAULT_PAGE_SIZE: u32 = 1000;

pub const DEFAULT_LANGUAGE: &str = "ENG";

#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub secret: String,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Hex SHA-256 of `key || secret || unix_seconds`. Only valid for a short window upstream.
pub fn signature(api_key: &str, secret: &str, unix_seconds: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hasher.update(secret.as_bytes());
    hasher.update(unix_seconds.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("malformed json body from {url}: {source}")]
    MalformedBody {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unexpected response structure for {endpoint}: body is not a json object")]
    NotAnObject { endpoint: String },
    #[error("unexpected response structure for {endpoint}: missing key `{key}`")]
    MissingKey { endpoint: String, key: String },
    #[error("unexpected response structure for {endpoint}: `{key}` is not an array")]
    NotAnArray { endpoint: String, key: String },
    #[error("unexpected response structure for {endpoint}: record {index} is not an object")]
    NonObjectRecord { endpoint: String, index: usize },
    #[error("unexpected response structure for {endpoint}: full page without `to`/`total` counters")]
    MissingCounters { endpoint: String },
}

#[derive(Debug, Error)]
pub enum PageError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Anything that can answer a content API GET with a parsed JSON body.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(
        &self,
        endpoint: &str,
        params: &[(&'static str, String)],
    ) -> Result<Value, UpstreamError>;
}

/// Enforces a minimum spacing between consecutive requests.
#[derive(Debug)]
pub struct RequestPacer {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestPacer {
    /// Intervals below [`MIN_REQUEST_INTERVAL`] are raised to it.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval: min_interval.max(MIN_REQUEST_INTERVAL),
            last_request: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + self.min_interval).await;
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub credentials: ApiCredentials,
    pub timeout: Duration,
    pub request_interval: Duration,
}

impl ClientConfig {
    pub fn new(credentials: ApiCredentials) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            credentials,
            timeout: Duration::from_secs(30),
            request_interval: MIN_REQUEST_INTERVAL,
        }
    }
}

/// Content API client that signs every request afresh.
#[derive(Debug)]
pub struct SignedClient {
    client: reqwest::Client,
    base_url: String,
    credentials: ApiCredentials,
    pacer: RequestPacer,
}

impl SignedClient {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;

        let mut base_url = config.base_url;
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self {
            client,
            base_url,
            credentials: config.credentials,
            pacer: RequestPacer::new(config.request_interval),
        })
    }

    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    async fn get_json(
        &self,
        url: &str,
        params: &[(&'static str, String)],
    ) -> Result<Value, UpstreamError> {
        let signed = signature(
            &self.credentials.api_key,
            &self.credentials.secret,
            Utc::now().timestamp(),
        );

        let resp = self
            .client
            .get(url)
            .query(params)
            .header("Api-key", &self.credentials.api_key)
            .header("X-Signature", signed)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| UpstreamError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = resp.bytes().await.map_err(|source| UpstreamError::Transport {
            url: url.to_string(),
            source,
        })?;
        serde_json::from_slice(&body).map_err(|source| UpstreamError::MalformedBody {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl ContentSource for SignedClient {
    async fn fetch(
        &self,
        endpoint: &str,
        params: &[(&'static str, String)],
    ) -> Result<Value, UpstreamError> {
        self.pacer.wait().await;
        let url = self.endpoint_url(endpoint);
        info!(endpoint, "fetching data");
        self.get_json(&url, params)
            .instrument(info_span!("upstream_fetch", endpoint))
            .await
    }
}

#[derive(Debug, Clone)]
pub struct PageOptions {
    pub page_size: u32,
    pub language: String,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

/// One page worth of records for a single entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub page: u32,
    pub records: Vec<Record>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug)]
struct PageBody {
    records: Vec<Record>,
    to: Option<u64>,
    total: Option<u64>,
}

fn parse_page(entity: &EntityDescriptor, body: Value) -> Result<PageBody, ProtocolError> {
    let Value::Object(mut object) = body else {
        return Err(ProtocolError::NotAnObject {
            endpoint: entity.endpoint.clone(),
        });
    };

    let payload = object
        .remove(&entity.response_key)
        .ok_or_else(|| ProtocolError::MissingKey {
            endpoint: entity.endpoint.clone(),
            key: entity.response_key.clone(),
        })?;

    let items = match payload {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        _ => {
            return Err(ProtocolError::NotAnArray {
                endpoint: entity.endpoint.clone(),
                key: entity.response_key.clone(),
            })
        }
    };

    let records = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(record) => Ok(record),
            _ => Err(ProtocolError::NonObjectRecord {
                endpoint: entity.endpoint.clone(),
                index,
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PageBody {
        records,
        to: object.get("to").and_then(Value::as_u64),
        total: object.get("total").and_then(Value::as_u64),
    })
}

/// Finite sequence of batches for one entity, always starting at page 1.
///
/// Stops on an empty page, a short page, or once the upstream `to` offset reaches `total`.
/// After any error the sequence is exhausted.
pub struct Paginator<'a> {
    source: &'a dyn ContentSource,
    entity: &'a EntityDescriptor,
    since: Option<NaiveDate>,
    options: &'a PageOptions,
    page: u32,
    finished: bool,
}

impl<'a> Paginator<'a> {
    pub fn new(
        source: &'a dyn ContentSource,
        entity: &'a EntityDescriptor,
        since: Option<NaiveDate>,
        options: &'a PageOptions,
    ) -> Self {
        Self {
            source,
            entity,
            since,
            options,
            page: 1,
            finished: false,
        }
    }

    /// Number of page requests issued so far.
    pub fn pages_requested(&self) -> u32 {
        if self.finished {
            self.page
        } else {
            self.page - 1
        }
    }

    /// Query parameters for the current page window `[from, to]`, 1-based and inclusive.
    pub fn page_params(&self) -> Vec<(&'static str, String)> {
        let size = u64::from(self.options.page_size.max(1));
        let page = u64::from(self.page);
        let mut params = vec![
            ("fields", "all".to_string()),
            ("language", self.options.language.clone()),
            ("from", ((page - 1) * size + 1).to_string()),
            ("to", (page * size).to_string()),
        ];
        if let Some(since) = self.since {
            params.push(("lastUpdateTime", format_watermark(since)));
        }
        params
    }

    pub async fn next_batch(&mut self) -> Result<Option<Batch>, PageError> {
        if self.finished {
            return Ok(None);
        }

        let params = self.page_params();
        let page = match self.fetch_page(&params).await {
            Ok(page) => page,
            Err(err) => {
                self.finished = true;
                return Err(err);
            }
        };

        if page.records.is_empty() {
            self.finished = true;
            return Ok(None);
        }

        let short = page.records.len() < self.options.page_size.max(1) as usize;
        let exhausted = short
            || match (page.to, page.total) {
                (Some(to), Some(total)) => to >= total,
                _ => {
                    self.finished = true;
                    return Err(ProtocolError::MissingCounters {
                        endpoint: self.entity.endpoint.clone(),
                    }
                    .into());
                }
            };

        let batch = Batch {
            page: self.page,
            records: page.records,
        };
        info!(
            endpoint = %self.entity.endpoint,
            page = batch.page,
            records = batch.len(),
            "fetched page"
        );

        if exhausted {
            self.finished = true;
        } else {
            self.page += 1;
        }
        Ok(Some(batch))
    }

    async fn fetch_page(&self, params: &[(&'static str, String)]) -> Result<PageBody, PageError> {
        let body = self.source.fetch(&self.entity.endpoint, params).await?;
        Ok(parse_page(self.entity, body)?)
    }
}
