//! Scripted network used by the manager and runtime tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use url::Url;

use super::client::Network;
use super::types::{Request, Response, ResponseType};

/// Serves canned responses by URL and records every call.
/// Unknown URLs answer 404; going offline makes every fetch fail.
pub struct ScriptedNetwork {
  resources: Mutex<HashMap<String, Response>>,
  online: AtomicBool,
  calls: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self {
      resources: Mutex::new(HashMap::new()),
      online: AtomicBool::new(true),
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn serve(&self, url: &str, body: &[u8]) {
    self.serve_with(url, 200, ResponseType::Basic, body);
  }

  pub fn serve_with(&self, url: &str, status: u16, response_type: ResponseType, body: &[u8]) {
    let parsed = Url::parse(url).unwrap();
    let response = Response {
      url: parsed.clone(),
      status,
      headers: vec![("content-length".into(), body.len().to_string())],
      body: body.to_vec(),
      response_type,
    };
    self
      .resources
      .lock()
      .unwrap()
      .insert(parsed.to_string(), response);
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn clear_calls(&self) {
    self.calls.lock().unwrap().clear();
  }
}

#[async_trait]
impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push(url.clone());

    if !self.online.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to fetch {}: network unreachable", url));
    }

    let found = self.resources.lock().unwrap().get(&url).cloned();
    Ok(found.unwrap_or_else(|| Response {
      url: request.url.clone(),
      status: 404,
      headers: Vec::new(),
      body: b"not found".to_vec(),
      response_type: ResponseType::Basic,
    }))
  }
}
