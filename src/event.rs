use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};

use crate::cache::CacheStorage;
use crate::network::{Network, Request};
use crate::worker::{
  ActivateReport, FetchOutcome, InstallReport, MessageOutcome, OfflineCacheManager,
};

/// Events routed to the controlling manager
#[derive(Debug)]
pub enum WorkerEvent {
  /// Populate the generation's store
  Install,
  /// Prune stale generations and claim clients
  Activate,
  /// Outgoing request from a controlled page
  Fetch(Request),
  /// Control message posted by a page
  Message(Value),
  /// Uncaught error reported by the host
  Error(String),
}

/// Settled result of one event
#[derive(Debug)]
pub enum EventOutcome {
  Installed(InstallReport),
  Activated(ActivateReport),
  Fetched(Result<FetchOutcome>),
  Message(MessageOutcome),
  Logged,
}

struct Envelope<S: CacheStorage, N: Network> {
  event: WorkerEvent,
  /// Manager the event is addressed to; the controller when absent
  target: Option<Arc<OfflineCacheManager<S, N>>>,
  reply: oneshot::Sender<EventOutcome>,
}

type Controller<S, N> = Arc<RwLock<Option<Arc<OfflineCacheManager<S, N>>>>>;

/// Event runtime hosting the offline cache manager.
///
/// Each event is handled on its own task against whichever manager controls
/// the page when the event arrives, and is answered only once all of its
/// cache and network work has settled. Fetches run concurrently.
pub struct EventHandler<S: CacheStorage, N: Network> {
  tx: mpsc::UnboundedSender<Envelope<S, N>>,
  controller: Controller<S, N>,
}

impl<S: CacheStorage + 'static, N: Network + 'static> EventHandler<S, N> {
  /// Start the event loop with no controller; fetches pass through until a
  /// manager is registered.
  pub fn new() -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope<S, N>>();
    let controller: Controller<S, N> = Arc::new(RwLock::new(None));

    let current = Arc::clone(&controller);
    tokio::spawn(async move {
      while let Some(Envelope {
        event,
        target,
        reply,
      }) = rx.recv().await
      {
        let manager = match target {
          Some(manager) => Some(manager),
          None => current.read().await.clone(),
        };
        tokio::spawn(async move {
          let outcome = handle(manager, event).await;
          // Requester may have stopped waiting
          let _ = reply.send(outcome);
        });
      }
    });

    Self { tx, controller }
  }

  /// Install and activate a manager, then hand it control.
  ///
  /// Both lifecycle events go through the event loop addressed to the new
  /// manager. A previous controller is superseded before the new one
  /// activates so it stops writing into a store that is about to be deleted;
  /// it keeps answering fetches until the swap.
  pub async fn register(
    &self,
    manager: Arc<OfflineCacheManager<S, N>>,
  ) -> Result<(InstallReport, ActivateReport)> {
    let installed = match self
      .dispatch_to(Arc::clone(&manager), WorkerEvent::Install)
      .await?
    {
      EventOutcome::Installed(report) => report,
      other => return Err(eyre!("Unexpected outcome for install: {:?}", other)),
    };

    if let Some(previous) = self.controller.read().await.as_ref() {
      if !Arc::ptr_eq(previous, &manager) {
        previous.supersede();
      }
    }

    let activated = match self
      .dispatch_to(Arc::clone(&manager), WorkerEvent::Activate)
      .await?
    {
      EventOutcome::Activated(report) => report,
      other => return Err(eyre!("Unexpected outcome for activate: {:?}", other)),
    };

    info!(store = %manager.cache_name(), "Controller registered");
    *self.controller.write().await = Some(manager);

    Ok((installed, activated))
  }

  /// Give control to a manager whose generation was installed earlier.
  pub async fn adopt(&self, manager: Arc<OfflineCacheManager<S, N>>) -> Result<()> {
    manager.resume()?;

    let mut controller = self.controller.write().await;
    if let Some(previous) = controller.replace(manager) {
      previous.supersede();
    }
    Ok(())
  }

  pub async fn controller(&self) -> Option<Arc<OfflineCacheManager<S, N>>> {
    self.controller.read().await.clone()
  }

  /// Deliver an event to the controller and wait until it has settled.
  pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome> {
    self.send(event, None).await
  }

  /// Deliver an event to a specific manager, controlling or not.
  pub async fn dispatch_to(
    &self,
    manager: Arc<OfflineCacheManager<S, N>>,
    event: WorkerEvent,
  ) -> Result<EventOutcome> {
    self.send(event, Some(manager)).await
  }

  async fn send(
    &self,
    event: WorkerEvent,
    target: Option<Arc<OfflineCacheManager<S, N>>>,
  ) -> Result<EventOutcome> {
    let (reply, settled) = oneshot::channel();

    self
      .tx
      .send(Envelope {
        event,
        target,
        reply,
      })
      .map_err(|_| eyre!("Event loop has shut down"))?;

    settled
      .await
      .map_err(|_| eyre!("Event handler dropped before settling"))
  }

  pub async fn fetch(&self, request: Request) -> Result<FetchOutcome> {
    match self.dispatch(WorkerEvent::Fetch(request)).await? {
      EventOutcome::Fetched(result) => result,
      other => Err(eyre!("Unexpected outcome for fetch: {:?}", other)),
    }
  }

  pub async fn post_message(&self, data: Value) -> Result<MessageOutcome> {
    match self.dispatch(WorkerEvent::Message(data)).await? {
      EventOutcome::Message(outcome) => Ok(outcome),
      other => Err(eyre!("Unexpected outcome for message: {:?}", other)),
    }
  }

  /// Report an uncaught host error to the controller.
  pub async fn report_error(&self, message: impl Into<String>) -> Result<()> {
    match self.dispatch(WorkerEvent::Error(message.into())).await? {
      EventOutcome::Logged => Ok(()),
      other => Err(eyre!("Unexpected outcome for error: {:?}", other)),
    }
  }
}

impl<S: CacheStorage + 'static, N: Network + 'static> Default for EventHandler<S, N> {
  fn default() -> Self {
    Self::new()
  }
}

async fn handle<S: CacheStorage, N: Network>(
  manager: Option<Arc<OfflineCacheManager<S, N>>>,
  event: WorkerEvent,
) -> EventOutcome {
  match (manager, event) {
    (Some(manager), WorkerEvent::Install) => {
      EventOutcome::Installed(manager.on_install().await)
    }
    (Some(manager), WorkerEvent::Activate) => {
      EventOutcome::Activated(manager.on_activate().await)
    }
    (None, event @ (WorkerEvent::Install | WorkerEvent::Activate)) => {
      warn!(?event, "lifecycle event with no manager, ignored");
      EventOutcome::Logged
    }
    (Some(manager), WorkerEvent::Fetch(request)) => {
      EventOutcome::Fetched(manager.on_fetch(&request).await)
    }
    (None, WorkerEvent::Fetch(request)) => {
      debug!(url = %request.url, "no controller, passthrough");
      EventOutcome::Fetched(Ok(FetchOutcome::Passthrough))
    }
    (Some(manager), WorkerEvent::Message(data)) => {
      EventOutcome::Message(manager.on_message(&data))
    }
    (None, WorkerEvent::Message(_)) => EventOutcome::Message(MessageOutcome::Ignored),
    (Some(manager), WorkerEvent::Error(message)) => {
      manager.on_error(&message);
      EventOutcome::Logged
    }
    (None, WorkerEvent::Error(message)) => {
      error!("Unhandled error with no controller: {}", message);
      EventOutcome::Logged
    }
  }
}
