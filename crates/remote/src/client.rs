//! REST client for the hosted backend (PostgREST dialect).
//!
//! Rows are addressed as `{base_url}/rest/v1/{table}` with equality filters
//! in the query string (`id=eq.t1`).

use async_trait::async_trait;
use log::{debug, error};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use remindly_core::remote::{RemoteStore, Row, RowFilter};
use remindly_core::sync::SYNC_TABLES;

use crate::config::RemoteConfig;
use crate::error::{RemoteClientError, Result};

const MAX_LOG_BODY_CHARS: usize = 512;
const REST_PATH: &str = "rest/v1";

/// Error body returned by PostgREST.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    code: Option<String>,
    message: String,
    #[serde(default)]
    details: Option<String>,
}

impl ApiErrorResponse {
    fn describe(&self) -> String {
        let mut text = match &self.code {
            Some(code) => format!("{}: {}", code, self.message),
            None => self.message.clone(),
        };
        if let Some(details) = self.details.as_deref().filter(|d| !d.is_empty()) {
            text.push_str(" (");
            text.push_str(details);
            text.push(')');
        }
        text
    }
}

/// [`RemoteStore`] backed by a PostgREST-compatible HTTP API.
pub struct RestRemoteStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
}

impl RestRemoteStore {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(RemoteClientError::invalid_request("Remote base URL is empty"));
        }
        if config.api_key.trim().is_empty() {
            return Err(RemoteClientError::auth("Remote API key is empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key,
            access_token: config.access_token,
        })
    }

    /// Replaces the session token used as bearer; `None` falls back to the API key.
    pub fn set_access_token(&mut self, token: Option<String>) {
        self.access_token = token;
    }

    fn table_url(&self, table: &str) -> Result<String> {
        if !SYNC_TABLES.contains(&table) {
            return Err(RemoteClientError::invalid_request(format!(
                "Unknown table '{}'",
                table
            )));
        }
        Ok(format!("{}/{}/{}", self.base_url, REST_PATH, table))
    }

    fn filtered_url(&self, table: &str, filter: &RowFilter) -> Result<String> {
        if filter.column.is_empty() {
            return Err(RemoteClientError::invalid_request("Filter column is empty"));
        }
        Ok(format!(
            "{}?{}=eq.{}",
            self.table_url(table)?,
            urlencoding::encode(&filter.column),
            urlencoding::encode(&filter.value)
        ))
    }

    fn headers(&self, prefer: Option<&'static str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let api_key = HeaderValue::from_str(&self.api_key)
            .map_err(|_| RemoteClientError::auth("Invalid API key format"))?;
        headers.insert("apikey", api_key);

        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", bearer))
            .map_err(|_| RemoteClientError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        if let Some(prefer) = prefer {
            headers.insert("Prefer", HeaderValue::from_static(prefer));
        }
        Ok(headers)
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[Remote] Response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[Remote] Response error ({}): {}", status, preview);
    }

    /// Reads the body and turns non-2xx statuses into [`RemoteClientError::Api`].
    async fn read_body(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(RemoteClientError::api(status.as_u16(), error.describe()));
            }
            return Err(RemoteClientError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }
        Ok(body)
    }

    async fn parse_rows(response: reqwest::Response) -> Result<Vec<Row>> {
        let body = Self::read_body(response).await?;
        serde_json::from_str(&body).map_err(|e| {
            error!("[Remote] Failed to deserialize rows: {}", e);
            RemoteClientError::from(e)
        })
    }

    pub async fn select_rows(&self, table: &str) -> Result<Vec<Row>> {
        let url = format!("{}?select=*", self.table_url(table)?);
        debug!("[Remote] GET {}", table);
        let response = self
            .client
            .get(&url)
            .headers(self.headers(None)?)
            .send()
            .await?;
        Self::parse_rows(response).await
    }

    pub async fn insert_row(&self, table: &str, row: &Row) -> Result<Row> {
        let url = self.table_url(table)?;
        debug!("[Remote] POST {}", table);
        let response = self
            .client
            .post(&url)
            .headers(self.headers(Some("return=representation"))?)
            .json(row)
            .send()
            .await?;
        Self::parse_rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteClientError::invalid_request("Insert returned no rows"))
    }

    pub async fn upsert_row(&self, table: &str, row: &Row) -> Result<()> {
        let url = format!("{}?on_conflict=id", self.table_url(table)?);
        debug!("[Remote] UPSERT {}", table);
        let response = self
            .client
            .post(&url)
            .headers(self.headers(Some("resolution=merge-duplicates,return=minimal"))?)
            .json(row)
            .send()
            .await?;
        Self::read_body(response).await.map(|_| ())
    }

    pub async fn update_rows(&self, table: &str, row: &Row, filter: &RowFilter) -> Result<()> {
        let url = self.filtered_url(table, filter)?;
        debug!("[Remote] PATCH {} where {}={}", table, filter.column, filter.value);
        let response = self
            .client
            .patch(&url)
            .headers(self.headers(Some("return=minimal"))?)
            .json(row)
            .send()
            .await?;
        Self::read_body(response).await.map(|_| ())
    }

    pub async fn delete_rows(&self, table: &str, filter: &RowFilter) -> Result<()> {
        let url = self.filtered_url(table, filter)?;
        debug!("[Remote] DELETE {} where {}={}", table, filter.column, filter.value);
        let response = self
            .client
            .delete(&url)
            .headers(self.headers(Some("return=minimal"))?)
            .send()
            .await?;
        Self::read_body(response).await.map(|_| ())
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn select(&self, table: &str) -> remindly_core::Result<Vec<Row>> {
        Ok(self.select_rows(table).await?)
    }

    async fn insert(&self, table: &str, row: Row) -> remindly_core::Result<Row> {
        Ok(self.insert_row(table, &row).await?)
    }

    async fn upsert(&self, table: &str, row: Row) -> remindly_core::Result<()> {
        Ok(self.upsert_row(table, &row).await?)
    }

    async fn update(&self, table: &str, row: Row, filter: RowFilter) -> remindly_core::Result<()> {
        Ok(self.update_rows(table, &row, &filter).await?)
    }

    async fn delete(&self, table: &str, filter: RowFilter) -> remindly_core::Result<()> {
        Ok(self.delete_rows(table, &filter).await?)
    }
}
