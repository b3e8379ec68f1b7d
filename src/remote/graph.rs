//! HTTP client for the remote drive API
//!
//! Speaks the Graph-style drive endpoints:
//! - `GET  /sites/{site}/drive/root:/{path}:/children`
//! - `GET  /sites/{site}/drive/items/{id}`
//! - `GET  /sites/{site}/drive/items/{id}/listItem/fields`
//! - `PATCH /sites/{site}/drive/items/{id}/listItem/fields`
//!
//! Reads retry with exponential backoff; field patches do not, since they
//! represent an explicit assessor action and failures go straight back to
//! the caller.

use super::{DriveItem, FieldMap, RemoteStore};
use crate::config::RemoteSettings;
use crate::error::{PortfolioError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Upper bound on a server-requested `Retry-After`
const MAX_RETRY_AFTER_SECS: u64 = 60;

/// Drive API client
pub struct GraphStoreClient {
    client: Client,
    base_url: String,
    token: SecretString,
    max_retries: usize,
    backoff_base_ms: u64,
}

/// Failure of a single attempt, with any server-provided retry hint
struct AttemptError {
    error: PortfolioError,
    retry_after: Option<Duration>,
}

impl From<PortfolioError> for AttemptError {
    fn from(error: PortfolioError) -> Self {
        Self {
            error,
            retry_after: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChildrenPage {
    #[serde(default)]
    value: Vec<GraphItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphItem {
    id: String,
    name: String,
    web_url: Option<String>,
    last_modified_date_time: DateTime<Utc>,
    created_date_time: Option<DateTime<Utc>>,
    folder: Option<serde_json::Value>,
    file: Option<GraphFile>,
    parent_reference: Option<GraphParent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphFile {
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphParent {
    path: Option<String>,
}

impl From<GraphItem> for DriveItem {
    fn from(item: GraphItem) -> Self {
        DriveItem {
            id: item.id,
            name: item.name,
            is_folder: item.folder.is_some(),
            web_url: item.web_url,
            last_modified: item.last_modified_date_time,
            created: item.created_date_time,
            mime_type: item.file.and_then(|f| f.mime_type),
            parent_path: item
                .parent_reference
                .and_then(|p| p.path)
                .map(|p| strip_drive_prefix(&p)),
        }
    }
}

/// `/drive/root:/Evidence/netp3_01` -> `Evidence/netp3_01`
fn strip_drive_prefix(path: &str) -> String {
    let relative = match path.split_once("root:") {
        Some((_, rest)) => rest,
        None => path,
    };
    relative.trim_matches('/').to_string()
}

/// Percent-encode each segment of a folder path
fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Stringify custom field values; the store returns mixed JSON types
fn fields_from_json(value: serde_json::Value) -> FieldMap {
    let mut fields = FieldMap::new();
    if let serde_json::Value::Object(map) = value {
        for (key, value) in map {
            let text = match value {
                serde_json::Value::Null => continue,
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            fields.insert(key, text);
        }
    }
    fields
}

impl GraphStoreClient {
    /// Create a client from remote settings
    pub fn new(settings: &RemoteSettings) -> Result<Self> {
        if settings.token.is_empty() {
            return Err(PortfolioError::Config(config::ConfigError::Message(
                "remote.token is not set (PORTFOLIO_REMOTE__TOKEN)".to_string(),
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .user_agent(concat!("portfolio/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token: SecretString::from(settings.token.clone()),
            max_retries: settings.max_retries,
            backoff_base_ms: settings.backoff_base_ms,
        })
    }

    fn site_url(&self, site: &str) -> String {
        format!(
            "{}/sites/{}/drive",
            self.base_url,
            urlencoding::encode(site)
        )
    }

    fn children_url(&self, site: &str, path: &str) -> String {
        let encoded = encode_path(path);
        if encoded.is_empty() {
            format!("{}/root/children", self.site_url(site))
        } else {
            format!("{}/root:/{}:/children", self.site_url(site), encoded)
        }
    }

    fn item_url(&self, site: &str, item_id: &str) -> String {
        format!("{}/items/{}", self.site_url(site), urlencoding::encode(item_id))
    }

    /// Send one request and classify the response status
    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> std::result::Result<Response, AttemptError> {
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(self.token.expose_secret());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PortfolioError::RemoteUnavailable(e.to_string()))?;

        let status = response.status();
        match status {
            s if s.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(PortfolioError::NotFound(url.to_string()).into()),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                Err(PortfolioError::ConcurrentWriteConflict(url.to_string()).into())
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(|secs| Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)));
                Err(AttemptError {
                    error: PortfolioError::RemoteUnavailable("rate limited".to_string()),
                    retry_after,
                })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                PortfolioError::RemoteUnavailable(format!("authentication failed ({})", status))
                    .into(),
            ),
            s if s.is_server_error() => Err(PortfolioError::RemoteUnavailable(format!(
                "server error ({})",
                s
            ))
            .into()),
            _ => {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                Err(PortfolioError::Other(format!(
                    "Remote store error (status {}): {}",
                    status, error_text
                ))
                .into())
            }
        }
    }

    /// GET with retry and exponential backoff for retryable failures
    async fn get_with_retry<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut retries = 0;

        loop {
            match self.send_once(Method::GET, url, None).await {
                Ok(response) => {
                    return response
                        .json::<T>()
                        .await
                        .map_err(|e| PortfolioError::Other(format!("Invalid response from {}: {}", url, e)));
                }
                Err(attempt) => {
                    if retries >= self.max_retries || !attempt.error.is_retryable() {
                        return Err(attempt.error);
                    }

                    let backoff = Duration::from_millis(
                        self.backoff_base_ms.saturating_mul(2_u64.saturating_pow(retries as u32)),
                    );
                    let delay = attempt.retry_after.map_or(backoff, |hint| hint.max(backoff));
                    warn!(
                        "Remote call failed ({}), retrying after {}ms (attempt {}/{})",
                        attempt.error,
                        delay.as_millis(),
                        retries + 1,
                        self.max_retries
                    );

                    sleep(delay).await;
                    retries += 1;
                }
            }
        }
    }
}

#[async_trait]
impl RemoteStore for GraphStoreClient {
    async fn list_children(&self, site: &str, path: &str) -> Result<Vec<DriveItem>> {
        let mut url = self.children_url(site, path);
        let mut children = Vec::new();

        loop {
            let page: ChildrenPage = match self.get_with_retry(&url).await {
                Ok(page) => page,
                Err(PortfolioError::NotFound(_)) => {
                    debug!("Folder {} not found on {}, treating as empty", path, site);
                    return Ok(Vec::new());
                }
                Err(e) => return Err(e),
            };

            children.extend(page.value.into_iter().map(DriveItem::from));
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }

        debug!("Listed {} children of {} on {}", children.len(), path, site);
        Ok(children)
    }

    async fn get_item(&self, site: &str, item_id: &str) -> Result<DriveItem> {
        let item: GraphItem = self.get_with_retry(&self.item_url(site, item_id)).await?;
        Ok(item.into())
    }

    async fn get_fields(&self, site: &str, item_id: &str) -> Result<FieldMap> {
        let url = format!("{}/listItem/fields", self.item_url(site, item_id));
        let value: serde_json::Value = self.get_with_retry(&url).await?;
        Ok(fields_from_json(value))
    }

    async fn patch_fields(&self, site: &str, item_id: &str, fields: FieldMap) -> Result<()> {
        let url = format!("{}/listItem/fields", self.item_url(site, item_id));
        let body = serde_json::to_value(&fields)?;
        debug!("Patching {} field(s) on {}", fields.len(), item_id);
        self.send_once(Method::PATCH, &url, Some(&body))
            .await
            .map(|_| ())
            .map_err(|attempt| attempt.error)
    }
}
