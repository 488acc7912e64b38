//! reqwest-backed [`HttpClient`].

use std::time::Duration;

use super::{HttpClient, HttpMethod, HttpRequest};
use crate::error::NetError;

const CONNECT_TIMEOUT_SECS: u64 = 10;

pub struct ReqwestHttpClient {
    http: reqwest::Client,
}

impl ReqwestHttpClient {
    /// # Errors
    ///
    /// Returns [`NetError::Request`] if the TLS backend fails to initialize.
    pub fn new() -> Result<Self, NetError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| NetError::Request(e.to_string()))?;
        Ok(Self { http })
    }

    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.http
    }
}

#[async_trait::async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn request(&self, request: HttpRequest) -> Result<String, NetError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.http.get(&request.url).query(&request.form),
            HttpMethod::Post => self.http.post(&request.url).form(&request.form),
        };
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        if !(200..300).contains(&status) {
            return Err(NetError::Status { status, body: text });
        }
        Ok(text)
    }
}
