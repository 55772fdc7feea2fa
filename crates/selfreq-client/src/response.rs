use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Version};
use url::Url;

use crate::options::ResponseType;

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl ResponseBody {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Bytes(_) | Self::Json(_) => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Text(text) => Some(text.as_bytes()),
            Self::Bytes(bytes) => Some(bytes),
            Self::Json(_) => None,
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) | Self::Bytes(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Timings {
    /// From the first attempt until response headers arrived.
    pub response: Duration,
    /// From the first attempt until the body was read.
    pub total: Duration,
}

#[derive(Debug, Clone)]
pub struct SelfResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Final URL, after redirects if they were followed.
    pub url: Url,
    pub version: Version,
    pub body: ResponseBody,
    pub timings: Timings,
    pub retry_count: u32,
}

impl SelfResponse {
    pub(crate) async fn read(
        resp: reqwest::Response,
        response_type: ResponseType,
        started_at: Instant,
        retry_count: u32,
    ) -> Result<Self, reqwest::Error> {
        let response = started_at.elapsed();
        let status = resp.status();
        let headers = resp.headers().clone();
        let url = resp.url().clone();
        let version = resp.version();

        let body = match response_type {
            ResponseType::Text => ResponseBody::Text(resp.text().await?),
            ResponseType::Bytes => ResponseBody::Bytes(resp.bytes().await?.to_vec()),
            ResponseType::Json => ResponseBody::Json(resp.json().await?),
        };

        Ok(Self {
            status,
            headers,
            url,
            version,
            body,
            timings: Timings {
                response,
                total: started_at.elapsed(),
            },
            retry_count,
        })
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.body.as_text()
    }
}
