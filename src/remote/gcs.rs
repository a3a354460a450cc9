use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use super::{validate_key, ObjectStore, ObjectStoreError, PutMode};

pub const DEFAULT_GCS_API_BASE: &str = "https://storage.googleapis.com";

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    items: Vec<ListItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    name: String,
}

/// Google Cloud Storage bucket over the JSON API.
///
/// The bearer token is passed through as-is; obtaining and refreshing it is
/// the deployment's job.
pub struct GcsObjectStore {
    client: Client,
    api_base: String,
    bucket: String,
    token: Option<String>,
}

impl GcsObjectStore {
    pub fn new(bucket: impl Into<String>, token: Option<String>) -> Result<Self, ObjectStoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_base: DEFAULT_GCS_API_BASE.to_string(),
            bucket: bucket.into(),
            token,
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ObjectStoreError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|err| ObjectStoreError::InvalidKey(format!("{}: {err}", self.api_base)))?;
        url.path_segments_mut()
            .map_err(|_| ObjectStoreError::InvalidKey(self.api_base.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn http_error(response: reqwest::Response) -> ObjectStoreError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ObjectStoreError::Http { status, body }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>, mode: PutMode) -> Result<(), ObjectStoreError> {
        validate_key(key)?;
        let url = self.url(&["upload", "storage", "v1", "b", self.bucket.as_str(), "o"])?;
        let mut query = vec![("uploadType", "media"), ("name", key)];
        if mode == PutMode::Create {
            // Generation 0 only matches an absent object.
            query.push(("ifGenerationMatch", "0"));
        }

        let response = self
            .authorize(self.client.post(url))
            .query(&query)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::PRECONDITION_FAILED => Err(ObjectStoreError::AlreadyExists(key.to_string())),
            _ => Err(http_error(response).await),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        validate_key(key)?;
        let url = self.url(&["storage", "v1", "b", self.bucket.as_str(), "o", key])?;
        let response = self
            .authorize(self.client.get(url))
            .query(&[("alt", "media")])
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(Some(response.bytes().await?.to_vec())),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(http_error(response).await),
        }
    }

    async fn list(
        &self,
        prefix: &str,
        start_offset: Option<&str>,
    ) -> Result<Vec<String>, ObjectStoreError> {
        let url = self.url(&["storage", "v1", "b", self.bucket.as_str(), "o"])?;
        let mut keys = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("prefix", prefix.to_string()), ("fields", "items(name),nextPageToken".to_string())];
            if let Some(offset) = start_offset {
                query.push(("startOffset", offset.to_string()));
            }
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let response = self
                .authorize(self.client.get(url.clone()))
                .query(&query)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(http_error(response).await);
            }

            let page: ListPage = response.json().await?;
            keys.extend(page.items.into_iter().map(|item| item.name));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }
}
