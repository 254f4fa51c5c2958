use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use super::{Client, ClientError, EventsResponse, QueriesRequest, QueriesResponse};

/// HTTP client for the analytics API.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Client for ApiClient {
    async fn send_queries(&self, request: &QueriesRequest) -> Result<QueriesResponse, ClientError> {
        let response = self
            .request(Method::POST, "/queries")
            .json(request)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn events(&self, follow: Option<&str>) -> Result<EventsResponse, ClientError> {
        let mut builder = self.request(Method::GET, "/events");
        if let Some(cursor) = follow {
            builder = builder.query(&[("follow", cursor)]);
        }
        Self::parse(builder.send().await?).await
    }
}
