//! Status endpoint client

use reqwest::Url;
use serde_json::Value;
use thiserror::Error;

use super::StatusRecord;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("invalid base URL {0:?}")]
    InvalidBaseUrl(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server answered with status {0}")]
    HttpStatus(u16),
    #[error("malformed status body: {0}")]
    Malformed(String),
}

/// Where device status comes from. Implementations run on the UI thread,
/// so the returned futures do not need to be `Send`.
#[allow(async_fn_in_trait)]
pub trait StatusSource {
    async fn fetch_status(&self, entity_id: &str) -> Result<StatusRecord, StatusError>;
}

/// Talks to `GET {base}/api/device_status[/{id}]`
#[derive(Debug, Clone)]
pub struct HttpStatusClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpStatusClient {
    pub fn new(base_url: &str) -> Result<Self, StatusError> {
        let parsed =
            Url::parse(base_url).map_err(|_| StatusError::InvalidBaseUrl(base_url.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(StatusError::InvalidBaseUrl(base_url.to_string()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: parsed,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, StatusError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StatusError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json(&self, url: Url) -> Result<Value, StatusError> {
        tracing::trace!("GET {}", url);
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StatusError::HttpStatus(status.as_u16()));
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| StatusError::Malformed(e.to_string()))
    }

    /// Status of every device the server knows about
    pub async fn fetch_all(&self) -> Result<Vec<StatusRecord>, StatusError> {
        let url = self.endpoint(&["api", "device_status"])?;
        let body = self.get_json(url).await?;
        let Value::Array(items) = body else {
            return Err(StatusError::Malformed("expected a JSON array".to_string()));
        };

        let mut records = Vec::with_capacity(items.len());
        for item in &items {
            let id = match item.get("id") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => {
                    tracing::debug!("Skipping status entry without id: {}", item);
                    continue;
                }
            };
            records.push(StatusRecord::from_json(&id, item)?);
        }
        Ok(records)
    }
}

impl StatusSource for HttpStatusClient {
    async fn fetch_status(&self, entity_id: &str) -> Result<StatusRecord, StatusError> {
        let url = self.endpoint(&["api", "device_status", entity_id])?;
        let body = self.get_json(url).await?;
        StatusRecord::from_json(entity_id, &body)
    }
}
