//! The offline cache manager: lifecycle hooks and the fetch policy.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use reqwest::Method;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use url::Url;

use super::message::{ControlMessage, MessageOutcome};
use crate::cache::{CacheStorage, CachedResponse, RequestKey, ServedResponse};
use crate::config::CacheConfig;
use crate::network::{Destination, Network, Request, Response};

/// Where the manager is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Installing,
  /// Installed and, with skip-waiting, ready to activate right away
  Installed,
  /// Controlling all clients
  Active,
  /// Replaced by a newer generation
  Superseded,
}

/// Outcome of precaching a single resource at install time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheOutcome {
  pub path: String,
  pub error: Option<String>,
}

impl PrecacheOutcome {
  pub fn is_cached(&self) -> bool {
    self.error.is_none()
  }
}

#[derive(Debug, Clone)]
pub struct InstallReport {
  pub store: String,
  pub outcomes: Vec<PrecacheOutcome>,
}

impl InstallReport {
  pub fn cached(&self) -> usize {
    self.outcomes.iter().filter(|o| o.is_cached()).count()
  }

  pub fn failed(&self) -> impl Iterator<Item = &PrecacheOutcome> {
    self.outcomes.iter().filter(|o| !o.is_cached())
  }
}

#[derive(Debug, Clone, Default)]
pub struct ActivateReport {
  /// Stale stores removed
  pub deleted: Vec<String>,
  /// Stale stores that could not be removed, with the reason
  pub failed: Vec<(String, String)>,
  pub claimed: bool,
}

/// What the manager decided to do with an intercepted request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// Not ours; the request goes to the network untouched
  Passthrough,
  Respond(ServedResponse),
}

/// Offline cache manager for one page origin.
///
/// Sits between the page and the network: precaches a fixed resource set on
/// install, prunes stale generations on activate, and answers intercepted
/// requests cache-first (network-first for navigations).
pub struct OfflineCacheManager<S: CacheStorage, N: Network> {
  origin: Url,
  settings: CacheConfig,
  storage: Arc<S>,
  network: Arc<N>,
  state: Mutex<LifecycleState>,
}

impl<S: CacheStorage, N: Network> OfflineCacheManager<S, N> {
  pub fn new(origin: Url, settings: CacheConfig, storage: Arc<S>, network: Arc<N>) -> Self {
    Self {
      origin,
      settings,
      storage,
      network,
      state: Mutex::new(LifecycleState::Installing),
    }
  }

  /// Generation identifier of this manager's cache store.
  pub fn cache_name(&self) -> &str {
    &self.settings.name
  }

  pub fn state(&self) -> LifecycleState {
    match self.state.lock() {
      Ok(state) => *state,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }

  fn set_state(&self, next: LifecycleState) {
    let mut state = match self.state.lock() {
      Ok(state) => state,
      Err(poisoned) => poisoned.into_inner(),
    };
    debug!(from = ?*state, to = ?next, "lifecycle transition");
    *state = next;
  }

  /// Populate the generation store with the precache set.
  ///
  /// Each resource is fetched independently; failures are logged and
  /// reported but never abort installation.
  pub async fn on_install(&self) -> InstallReport {
    self.set_state(LifecycleState::Installing);
    info!(store = %self.settings.name, "Installing");

    let outcomes = match self.storage.open_store(&self.settings.name) {
      Ok(()) => {
        info!(count = self.settings.precache.len(), "Caching files");
        join_all(self.settings.precache.iter().map(|p| self.precache(p))).await
      }
      Err(e) => {
        error!(error = %e, "Failed to open cache store");
        self
          .settings
          .precache
          .iter()
          .map(|path| PrecacheOutcome {
            path: path.clone(),
            error: Some(e.to_string()),
          })
          .collect()
      }
    };

    // Skip waiting: ready to take over as soon as activation runs
    self.set_state(LifecycleState::Installed);

    InstallReport {
      store: self.settings.name.clone(),
      outcomes,
    }
  }

  async fn precache(&self, path: &str) -> PrecacheOutcome {
    let result: Result<()> = async {
      let request = Request::get(self.resolve(path)?);
      let response = self.network.fetch(&request).await?;
      if response.status != 200 {
        return Err(eyre!("Unexpected status {} for {}", response.status, path));
      }
      self
        .storage
        .put(&self.settings.name, &RequestKey::from_request(&request), &response)
    }
    .await;

    if let Err(e) = &result {
      warn!(path, error = %e, "Cache addAll entry failed");
    }

    PrecacheOutcome {
      path: path.to_string(),
      error: result.err().map(|e| e.to_string()),
    }
  }

  /// Delete every store but the current generation, then claim clients.
  pub async fn on_activate(&self) -> ActivateReport {
    info!("Activating");
    let mut report = ActivateReport::default();

    match self.storage.store_names() {
      Ok(names) => {
        for name in names.into_iter().filter(|n| *n != self.settings.name) {
          match self.storage.delete_store(&name) {
            Ok(_) => {
              info!(store = %name, "Deleting old cache");
              report.deleted.push(name);
            }
            Err(e) => {
              error!(store = %name, error = %e, "Failed to delete old cache");
              report.failed.push((name, e.to_string()));
            }
          }
        }
      }
      Err(e) => error!(error = %e, "Failed to enumerate cache stores"),
    }

    self.set_state(LifecycleState::Active);
    report.claimed = true;
    info!(store = %self.settings.name, "Activated");

    report
  }

  /// Whether the fetch policy applies to this request at all.
  pub fn intercepts(&self, request: &Request) -> bool {
    request.url.origin() == self.origin.origin()
      && !request.url.path().contains(&self.settings.api_marker)
  }

  /// Apply the fetch policy to one outgoing request.
  ///
  /// An `Err` is a failure propagated to the requester.
  pub async fn on_fetch(&self, request: &Request) -> Result<FetchOutcome> {
    if !self.intercepts(request) {
      debug!(url = %request.url, "passthrough");
      return Ok(FetchOutcome::Passthrough);
    }

    let served = if request.is_navigation() {
      self.navigate(request).await?
    } else {
      self.cache_first(request).await?
    };

    Ok(FetchOutcome::Respond(served))
  }

  /// Network first; offline falls back to the cached root document.
  async fn navigate(&self, request: &Request) -> Result<ServedResponse> {
    match self.network.fetch(request).await {
      Ok(response) => Ok(ServedResponse::from_network(response)),
      Err(e) => {
        warn!(url = %request.url, error = %e, "Navigation failed, serving cached root document");
        match self.lookup_path(&self.settings.root_document) {
          Some(root) => Ok(ServedResponse::offline(root)),
          None => Err(e.wrap_err("No cached root document to serve offline")),
        }
      }
    }
  }

  async fn cache_first(&self, request: &Request) -> Result<ServedResponse> {
    let key = RequestKey::from_request(request);

    if let Some(cached) = self.lookup(&key) {
      debug!(%key, store = %cached.store, "cache hit");
      return Ok(ServedResponse::from_cache(cached));
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_cacheable() {
          if let Err(e) = self.cache_put(&key, &response) {
            error!(%key, error = %e, "Cache put failed");
          }
        }
        Ok(ServedResponse::from_network(response))
      }
      Err(e) => {
        error!(url = %request.url, error = %e, "Fetch failed");

        if request.destination == Destination::Image {
          if let Some(placeholder) = self.lookup_path(&self.settings.placeholder_image) {
            return Ok(ServedResponse::offline(placeholder));
          }
        }

        Err(e)
      }
    }
  }

  fn cache_put(&self, key: &RequestKey, response: &Response) -> Result<()> {
    if *key.method() != Method::GET {
      return Err(eyre!("Only GET requests can be cached, got {}", key.method()));
    }
    if self.state() == LifecycleState::Superseded {
      return Err(eyre!("Superseded; {} is no longer writable", self.settings.name));
    }
    // Never recreate a store that activation of a newer generation removed
    self.storage.put_existing(&self.settings.name, key, response)
  }

  /// Cache lookup across all stores; read failures count as a miss.
  fn lookup(&self, key: &RequestKey) -> Option<CachedResponse> {
    match self.storage.match_any(key) {
      Ok(found) => found,
      Err(e) => {
        warn!(%key, error = %e, "Cache match failed");
        None
      }
    }
  }

  fn lookup_path(&self, path: &str) -> Option<CachedResponse> {
    let url = match self.resolve(path) {
      Ok(url) => url,
      Err(e) => {
        warn!(path, error = %e, "Cannot resolve fallback path");
        return None;
      }
    };
    self.lookup(&RequestKey::new(&Method::GET, &url))
  }

  fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Failed to resolve {} against {}: {}", path, self.origin, e))
  }

  /// Handle a control message posted by the page.
  pub fn on_message(&self, data: &Value) -> MessageOutcome {
    match ControlMessage::parse(data) {
      Some(message @ ControlMessage::InitOfflineDb) => {
        info!("Received offline data initialization request");
        MessageOutcome::Acknowledged(message)
      }
      None => MessageOutcome::Ignored,
    }
  }

  /// Uncaught error reported by the host.
  pub fn on_error(&self, message: &str) {
    error!(store = %self.settings.name, "Service worker error: {}", message);
  }

  /// A newer generation has taken control.
  pub fn supersede(&self) {
    info!(store = %self.settings.name, "Superseded");
    self.set_state(LifecycleState::Superseded);
  }

  /// Resume control of an already installed and activated generation.
  pub fn resume(&self) -> Result<()> {
    if !self.storage.has_store(&self.settings.name)? {
      return Err(eyre!(
        "Cache store {} is not installed",
        self.settings.name
      ));
    }
    self.set_state(LifecycleState::Active);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ResponseSource, SqliteStorage};
  use crate::network::testing::ScriptedNetwork;
  use crate::network::ResponseType;
  use serde_json::json;
  use std::sync::atomic::{AtomicBool, Ordering};

  /// SQLite storage that can be told to fail reads or specific deletions.
  struct FlakyStorage {
    inner: SqliteStorage,
    fail_reads: AtomicBool,
    undeletable: Vec<String>,
  }

  impl FlakyStorage {
    fn new(undeletable: &[&str]) -> Self {
      Self {
        inner: SqliteStorage::open_in_memory().unwrap(),
        fail_reads: AtomicBool::new(false),
        undeletable: undeletable.iter().map(|s| s.to_string()).collect(),
      }
    }
  }

  impl CacheStorage for FlakyStorage {
    fn open_store(&self, name: &str) -> Result<()> {
      self.inner.open_store(name)
    }

    fn has_store(&self, name: &str) -> Result<bool> {
      self.inner.has_store(name)
    }

    fn store_names(&self) -> Result<Vec<String>> {
      self.inner.store_names()
    }

    fn delete_store(&self, name: &str) -> Result<bool> {
      if self.undeletable.iter().any(|n| n == name) {
        return Err(eyre!("disk I/O error"));
      }
      self.inner.delete_store(name)
    }

    fn put(&self, store: &str, key: &RequestKey, response: &Response) -> Result<()> {
      self.inner.put(store, key, response)
    }

    fn put_existing(&self, store: &str, key: &RequestKey, response: &Response) -> Result<()> {
      self.inner.put_existing(store, key, response)
    }

    fn match_in(&self, store: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
      self.inner.match_in(store, key)
    }

    fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
      if self.fail_reads.load(Ordering::SeqCst) {
        return Err(eyre!("database is locked"));
      }
      self.inner.match_any(key)
    }

    fn entry_count(&self, store: &str) -> Result<usize> {
      self.inner.entry_count(store)
    }
  }

  fn flaky_manager(
    storage: &Arc<FlakyStorage>,
    network: &Arc<ScriptedNetwork>,
  ) -> OfflineCacheManager<FlakyStorage, ScriptedNetwork> {
    OfflineCacheManager::new(
      Url::parse(ORIGIN).unwrap(),
      CacheConfig::default(),
      Arc::clone(storage),
      Arc::clone(network),
    )
  }

  const ORIGIN: &str = "https://saathi.test";

  struct Fixture {
    manager: OfflineCacheManager<SqliteStorage, ScriptedNetwork>,
    storage: Arc<SqliteStorage>,
    network: Arc<ScriptedNetwork>,
  }

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  fn fixture() -> Fixture {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(ScriptedNetwork::new());
    network.serve(url("/").as_str(), b"<html>root</html>");
    network.serve(url("/static/images/logo.png").as_str(), b"logo");
    network.serve(url("/static/images/favicon.ico").as_str(), b"favicon");
    network.serve(url("/static/images/app-icon.png").as_str(), b"icon");

    let manager = OfflineCacheManager::new(
      Url::parse(ORIGIN).unwrap(),
      CacheConfig::default(),
      Arc::clone(&storage),
      Arc::clone(&network),
    );

    Fixture {
      manager,
      storage,
      network,
    }
  }

  fn served(outcome: FetchOutcome) -> ServedResponse {
    match outcome {
      FetchOutcome::Respond(served) => served,
      FetchOutcome::Passthrough => panic!("expected a response, got passthrough"),
    }
  }

  fn cached(storage: &SqliteStorage, path: &str) -> Option<CachedResponse> {
    storage
      .match_in("nyaay-saathi-v1", &RequestKey::new(&Method::GET, &url(path)))
      .unwrap()
  }

  #[tokio::test]
  async fn test_install_caches_every_reachable_resource() {
    let f = fixture();

    let report = f.manager.on_install().await;

    assert_eq!(report.store, "nyaay-saathi-v1");
    assert_eq!(report.cached(), 4);
    assert_eq!(f.storage.entry_count("nyaay-saathi-v1").unwrap(), 4);
    assert_eq!(cached(&f.storage, "/").unwrap().response.body, b"<html>root</html>");
    assert_eq!(f.manager.state(), LifecycleState::Installed);
  }

  #[tokio::test]
  async fn test_install_is_best_effort() {
    let f = fixture();
    let mut settings = CacheConfig::default();
    settings.precache.push("/static/images/missing.png".to_string());
    let manager = OfflineCacheManager::new(
      Url::parse(ORIGIN).unwrap(),
      settings,
      Arc::clone(&f.storage),
      Arc::clone(&f.network),
    );

    let report = manager.on_install().await;

    assert_eq!(report.cached(), 4);
    let failed: Vec<_> = report.failed().map(|o| o.path.as_str()).collect();
    assert_eq!(failed, vec!["/static/images/missing.png"]);
    assert!(cached(&f.storage, "/static/images/missing.png").is_none());
    assert_eq!(manager.state(), LifecycleState::Installed);
  }

  #[tokio::test]
  async fn test_install_offline_still_creates_store() {
    let f = fixture();
    f.network.set_online(false);

    let report = f.manager.on_install().await;

    assert_eq!(report.cached(), 0);
    assert_eq!(report.failed().count(), 4);
    assert!(f.storage.has_store("nyaay-saathi-v1").unwrap());
    assert_eq!(f.storage.entry_count("nyaay-saathi-v1").unwrap(), 0);
  }

  #[tokio::test]
  async fn test_activate_removes_stale_stores() {
    let f = fixture();
    let old = url("/static/old.js");
    f.storage
      .put(
        "nyaay-saathi-v0",
        &RequestKey::new(&Method::GET, &old),
        &Response {
          url: old.clone(),
          status: 200,
          headers: Vec::new(),
          body: b"old".to_vec(),
          response_type: ResponseType::Basic,
        },
      )
      .unwrap();
    f.storage.open_store("scratch").unwrap();

    f.manager.on_install().await;
    let report = f.manager.on_activate().await;

    assert_eq!(report.deleted, vec!["nyaay-saathi-v0", "scratch"]);
    assert!(report.failed.is_empty());
    assert!(report.claimed);
    assert_eq!(f.storage.store_names().unwrap(), vec!["nyaay-saathi-v1"]);
    assert_eq!(f.manager.state(), LifecycleState::Active);
  }

  #[tokio::test]
  async fn test_cached_request_skips_network() {
    let f = fixture();
    f.manager.on_install().await;
    f.manager.on_activate().await;
    f.network.clear_calls();

    let served = served(
      f.manager
        .on_fetch(&Request::get(url("/static/images/favicon.ico")))
        .await
        .unwrap(),
    );

    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, b"favicon");
    assert!(served.cached_at.is_some());
    assert!(f.network.calls().is_empty());
  }

  #[tokio::test]
  async fn test_miss_fetches_and_stores() {
    let f = fixture();
    f.storage.open_store("nyaay-saathi-v1").unwrap();
    f.network.serve(url("/static/fix.js").as_str(), b"fix()");

    let first = served(
      f.manager
        .on_fetch(&Request::get(url("/static/fix.js")))
        .await
        .unwrap(),
    );
    assert_eq!(first.source, ResponseSource::Network);
    assert_eq!(first.response.body, b"fix()");
    assert_eq!(cached(&f.storage, "/static/fix.js").unwrap().response.body, b"fix()");

    f.network.clear_calls();
    let second = served(
      f.manager
        .on_fetch(&Request::get(url("/static/fix.js")))
        .await
        .unwrap(),
    );
    assert_eq!(second.source, ResponseSource::Cache);
    assert!(f.network.calls().is_empty());
  }

  #[tokio::test]
  async fn test_invalid_responses_are_returned_but_not_cached() {
    let f = fixture();
    f.network.serve_with(
      url("/static/partial.js").as_str(),
      206,
      ResponseType::Basic,
      b"par",
    );
    f.network.serve_with(
      url("/static/proxied.js").as_str(),
      200,
      ResponseType::Cors,
      b"cors",
    );

    let not_found = served(
      f.manager
        .on_fetch(&Request::get(url("/static/nope.js")))
        .await
        .unwrap(),
    );
    let partial = served(
      f.manager
        .on_fetch(&Request::get(url("/static/partial.js")))
        .await
        .unwrap(),
    );
    let cors = served(
      f.manager
        .on_fetch(&Request::get(url("/static/proxied.js")))
        .await
        .unwrap(),
    );

    assert_eq!(not_found.response.status, 404);
    assert_eq!(partial.response.status, 206);
    assert_eq!(cors.response.body, b"cors");
    assert!(cached(&f.storage, "/static/nope.js").is_none());
    assert!(cached(&f.storage, "/static/partial.js").is_none());
    assert!(cached(&f.storage, "/static/proxied.js").is_none());
  }

  #[tokio::test]
  async fn test_non_get_responses_are_not_cached() {
    let f = fixture();
    f.network.serve(url("/feedback").as_str(), b"thanks");

    let request = Request::get(url("/feedback")).with_method(Method::POST);
    let served = served(f.manager.on_fetch(&request).await.unwrap());

    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(f.storage.entry_count("nyaay-saathi-v1").unwrap(), 0);
  }

  #[tokio::test]
  async fn test_navigation_prefers_network() {
    let f = fixture();
    f.manager.on_install().await;
    f.network.serve(url("/").as_str(), b"<html>fresh</html>");

    let served = served(f.manager.on_fetch(&Request::navigate(url("/"))).await.unwrap());

    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response.body, b"<html>fresh</html>");
  }

  #[tokio::test]
  async fn test_offline_navigation_serves_root_document() {
    let f = fixture();
    f.manager.on_install().await;
    f.network.set_online(false);

    let served = served(
      f.manager
        .on_fetch(&Request::navigate(url("/chat?lang=hi")))
        .await
        .unwrap(),
    );

    assert_eq!(served.source, ResponseSource::OfflineFallback);
    assert_eq!(served.response.body, b"<html>root</html>");
  }

  #[tokio::test]
  async fn test_offline_navigation_without_root_fails() {
    let f = fixture();
    f.network.set_online(false);

    let result = f.manager.on_fetch(&Request::navigate(url("/"))).await;

    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_offline_image_gets_placeholder() {
    let f = fixture();
    f.manager.on_install().await;
    f.network.set_online(false);

    let served = served(
      f.manager
        .on_fetch(&Request::get(url("/static/images/avatar.png")))
        .await
        .unwrap(),
    );

    assert_eq!(served.source, ResponseSource::OfflineFallback);
    assert_eq!(served.response.body, b"logo");
  }

  #[tokio::test]
  async fn test_offline_image_without_placeholder_fails() {
    let f = fixture();
    f.network.set_online(false);

    let result = f
      .manager
      .on_fetch(&Request::get(url("/static/images/avatar.png")))
      .await;

    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_offline_script_miss_propagates_failure() {
    let f = fixture();
    f.manager.on_install().await;
    f.network.set_online(false);

    let result = f.manager.on_fetch(&Request::get(url("/static/fix.js"))).await;

    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_api_requests_never_touch_cache() {
    let f = fixture();
    let api = url("/api/chat");
    f.storage
      .put(
        "nyaay-saathi-v1",
        &RequestKey::new(&Method::GET, &api),
        &Response {
          url: api.clone(),
          status: 200,
          headers: Vec::new(),
          body: b"stale answer".to_vec(),
          response_type: ResponseType::Basic,
        },
      )
      .unwrap();

    let outcome = f.manager.on_fetch(&Request::get(api.clone())).await.unwrap();
    let nested = f
      .manager
      .on_fetch(&Request::get(url("/v2/api/history")))
      .await
      .unwrap();

    assert!(matches!(outcome, FetchOutcome::Passthrough));
    assert!(matches!(nested, FetchOutcome::Passthrough));
    assert!(f.network.calls().is_empty());
    assert_eq!(f.storage.entry_count("nyaay-saathi-v1").unwrap(), 1);
  }

  #[tokio::test]
  async fn test_cross_origin_requests_pass_through() {
    let f = fixture();
    let other = Url::parse("https://cdn.example/lib.js").unwrap();
    let other_port = Url::parse("https://saathi.test:8443/static/fix.js").unwrap();

    assert!(matches!(
      f.manager.on_fetch(&Request::get(other)).await.unwrap(),
      FetchOutcome::Passthrough
    ));
    assert!(matches!(
      f.manager.on_fetch(&Request::get(other_port)).await.unwrap(),
      FetchOutcome::Passthrough
    ));
    assert!(f.network.calls().is_empty());
  }

  #[tokio::test]
  async fn test_cache_read_failure_is_a_miss() {
    let storage = Arc::new(FlakyStorage::new(&[]));
    let network = Arc::new(ScriptedNetwork::new());
    network.serve(url("/").as_str(), b"<html>root</html>");
    network.serve(url("/static/fix.js").as_str(), b"fix()");
    let manager = flaky_manager(&storage, &network);
    storage.open_store("nyaay-saathi-v1").unwrap();

    manager.on_fetch(&Request::get(url("/static/fix.js"))).await.unwrap();
    storage.fail_reads.store(true, Ordering::SeqCst);
    network.clear_calls();

    let served = served(
      manager
        .on_fetch(&Request::get(url("/static/fix.js")))
        .await
        .unwrap(),
    );

    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response.body, b"fix()");
    assert_eq!(network.calls().len(), 1);
  }

  #[tokio::test]
  async fn test_cache_read_failure_offline_propagates() {
    let storage = Arc::new(FlakyStorage::new(&[]));
    let network = Arc::new(ScriptedNetwork::new());
    network.serve(url("/").as_str(), b"<html>root</html>");
    let manager = flaky_manager(&storage, &network);
    manager.on_install().await;

    storage.fail_reads.store(true, Ordering::SeqCst);
    network.set_online(false);

    // The root document is stored, but unreadable
    assert!(manager.on_fetch(&Request::navigate(url("/"))).await.is_err());
  }

  #[tokio::test]
  async fn test_failed_deletion_is_reported_and_clients_claimed() {
    let storage = Arc::new(FlakyStorage::new(&["nyaay-saathi-v0"]));
    let network = Arc::new(ScriptedNetwork::new());
    storage.open_store("nyaay-saathi-v0").unwrap();
    storage.open_store("scratch").unwrap();
    let manager = flaky_manager(&storage, &network);

    manager.on_install().await;
    let report = manager.on_activate().await;

    assert_eq!(report.deleted, vec!["scratch"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "nyaay-saathi-v0");
    assert!(report.failed[0].1.contains("disk I/O error"));
    assert!(report.claimed);
    assert_eq!(manager.state(), LifecycleState::Active);
    assert_eq!(
      storage.store_names().unwrap(),
      vec!["nyaay-saathi-v0", "nyaay-saathi-v1"]
    );
  }

  #[tokio::test]
  async fn test_write_never_recreates_deleted_store() {
    let f = fixture();
    f.network.serve(url("/static/late.js").as_str(), b"late");
    f.manager.on_install().await;
    f.manager.on_activate().await;

    // A newer generation's activation removed this store mid-flight
    f.storage.delete_store("nyaay-saathi-v1").unwrap();

    let served = served(
      f.manager
        .on_fetch(&Request::get(url("/static/late.js")))
        .await
        .unwrap(),
    );

    assert_eq!(served.source, ResponseSource::Network);
    assert!(!f.storage.has_store("nyaay-saathi-v1").unwrap());
    assert!(f.storage.store_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_message_handling() {
    let f = fixture();

    assert_eq!(
      f.manager.on_message(&json!({ "type": "INIT_OFFLINE_DB" })),
      MessageOutcome::Acknowledged(ControlMessage::InitOfflineDb)
    );
    assert_eq!(
      f.manager.on_message(&json!({ "type": "CLEAR" })),
      MessageOutcome::Ignored
    );
    assert_eq!(f.manager.on_message(&json!(42)), MessageOutcome::Ignored);
  }

  #[tokio::test]
  async fn test_resume_requires_installed_store() {
    let f = fixture();
    assert!(f.manager.resume().is_err());

    f.manager.on_install().await;
    f.manager.resume().unwrap();
    assert_eq!(f.manager.state(), LifecycleState::Active);

    f.manager.supersede();
    assert_eq!(f.manager.state(), LifecycleState::Superseded);
  }
}
