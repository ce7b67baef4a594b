use std::io::Read;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::SourceDescriptor;
use crate::error::IdaError;

pub trait IdaClient: Send + Sync {
    /// Downloads the bytes of one monthly file; `timeout` bounds the whole request.
    fn download(&self, descriptor: &SourceDescriptor, timeout: Duration)
    -> Result<Vec<u8>, IdaError>;
}

#[derive(Clone)]
pub struct IdaHttpClient {
    client: Client,
    base_url: String,
}

impl IdaHttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, IdaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("tess-ida/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| IdaError::InvalidConfig(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| IdaError::InvalidConfig(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl IdaClient for IdaHttpClient {
    fn download(
        &self,
        descriptor: &SourceDescriptor,
        timeout: Duration,
    ) -> Result<Vec<u8>, IdaError> {
        let file = descriptor.filename();
        let resolved;
        let url = match descriptor.url() {
            Some(url) => url,
            None => {
                resolved = descriptor.clone().with_base_url(&self.base_url)?;
                resolved.url().unwrap_or_default()
            }
        };
        tracing::debug!(url = %url, "requesting IDA file");

        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(|err| IdaError::Network {
                file: file.clone(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(IdaError::NotFound(file));
        }
        if !status.is_success() {
            let message = response
                .text()
                .map(|text| text.chars().take(200).collect())
                .unwrap_or_else(|_| "IDA request failed".to_string());
            return Err(IdaError::HttpStatus {
                file,
                status: status.as_u16(),
                message,
            });
        }

        let mut body = Vec::new();
        response
            .read_to_end(&mut body)
            .map_err(|err| IdaError::Network {
                file,
                message: err.to_string(),
            })?;
        Ok(body)
    }
}
