use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use tracing::debug;
use url::{Origin, Url};

use super::types::{Request, RequestMode, Response, ResponseType};

/// Anything that can put a request on the wire.
///
/// An `Err` means the request never produced a response (offline, DNS,
/// connection reset). HTTP error statuses come back as `Ok`.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// HTTP network backed by reqwest
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Origin,
}

impl HttpNetwork {
  pub fn new(origin: &Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("saathi-cache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: origin.origin(),
    })
  }

  fn classify(&self, final_url: &Url, mode: RequestMode) -> ResponseType {
    if final_url.origin() == self.origin || mode == RequestMode::Navigate {
      ResponseType::Basic
    } else {
      ResponseType::Opaque
    }
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    debug!(method = %request.method, url = %request.url, "network fetch");

    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let url = response.url().clone();
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let response_type = self.classify(&url, request.mode);

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?
      .to_vec();

    Ok(Response {
      url,
      status,
      headers,
      body,
      response_type,
    })
  }
}
