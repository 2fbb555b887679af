//! Compiler host controller.
//!
//! [`CompilerHost`] owns the isolated execution context, correlates requests
//! with responses, applies per-request timeouts and drives the compile
//! pipeline: resolve imports, build the standard-JSON document, run it through
//! the worker and normalise the result.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinHandle;

use crate::compile::{normalize, CompileResult, StandardInput};
use crate::imports::{HttpFetcher, ImportResolver, SourceFetcher};
use crate::internal::config::{HostConfig, HostConfigOptions};
use crate::internal::errors::{Error, Result};
use crate::protocol::{Action, FaultCode, RequestData, ResponsePayload, WorkerMessage};
use crate::worker::{ContextEvent, ContextSpawner, ExecutionContext, SvmLoader, ThreadSpawner};

mod pending;

pub use pending::PendingRequests;

struct ActiveContext {
  generation: u64,
  context: Arc<dyn ExecutionContext>,
  dispatcher: JoinHandle<()>,
}

type ContextSlot = Arc<Mutex<Option<ActiveContext>>>;

struct HostInner {
  config: HostConfig,
  spawner: Arc<dyn ContextSpawner>,
  resolver: ImportResolver,
  pending: Arc<PendingRequests>,
  init_lock: tokio::sync::Mutex<()>,
  slot: ContextSlot,
  generation: AtomicU64,
  teardowns: AtomicU64,
  current_version: RwLock<String>,
  versions: Mutex<Option<Vec<String>>>,
}

/// Handle to a compiler host. Clones share the same context and state.
#[derive(Clone)]
pub struct CompilerHost {
  inner: Arc<HostInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CompilerHost {
  pub fn new(
    config: HostConfig,
    spawner: Arc<dyn ContextSpawner>,
    fetcher: Arc<dyn SourceFetcher>,
  ) -> Self {
    let resolver = ImportResolver::new(&config, fetcher);
    let current_version = config.default_version.clone();
    Self {
      inner: Arc::new(HostInner {
        config,
        spawner,
        resolver,
        pending: Arc::new(PendingRequests::new()),
        init_lock: tokio::sync::Mutex::new(()),
        slot: Arc::new(Mutex::new(None)),
        generation: AtomicU64::new(0),
        teardowns: AtomicU64::new(0),
        current_version: RwLock::new(current_version),
        versions: Mutex::new(None),
      }),
    }
  }

  /// Host backed by a worker thread driving SVM-managed solc releases and
  /// fetching imports over HTTP.
  ///
  /// Releases are looked up in the local SVM cache. Unless
  /// `config.auto_install` is set, a version that was never installed fails
  /// to load with "Solc <version> is not installed".
  pub fn with_defaults(config: HostConfig) -> Result<Self> {
    let loader = Arc::new(SvmLoader::new(config.auto_install));
    let spawner = Arc::new(ThreadSpawner::new(&config, loader));
    let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout)?);
    Ok(Self::new(config, spawner, fetcher))
  }

  /// Same as [`CompilerHost::with_defaults`] with configuration read from
  /// `SOLC_HOST_*` variables; `SOLC_HOST_AUTO_INSTALL=1` enables downloads.
  pub fn from_env() -> Result<Self> {
    let config = HostConfig::from_options(Some(HostConfigOptions::from_env()?))?;
    Self::with_defaults(config)
  }

  pub fn config(&self) -> &HostConfig {
    &self.inner.config
  }

  pub fn resolver(&self) -> &ImportResolver {
    &self.inner.resolver
  }

  pub fn current_version(&self) -> String {
    self
      .inner
      .current_version
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Version list from the last successful `list_available_versions` call.
  pub fn cached_versions(&self) -> Option<Vec<String>> {
    lock(&self.inner.versions).clone()
  }

  pub fn pending_requests(&self) -> usize {
    self.inner.pending.len()
  }

  pub fn is_initialized(&self) -> bool {
    lock(&self.inner.slot).is_some()
  }

  pub async fn list_available_versions(&self) -> Result<Vec<String>> {
    let versions = self
      .request(Action::GetVersions, None)
      .await?
      .ok_or_else(|| Error::Protocol("missing version list".into()))?
      .into_list()?;
    *lock(&self.inner.versions) = Some(versions.clone());
    Ok(versions)
  }

  /// Switch the worker to `version`. The current version only changes once
  /// the worker confirms the load.
  pub async fn set_version(&self, version: &str) -> Result<()> {
    let registry = &self.inner.config.registry;
    let Some(entry) = registry.resolve(version) else {
      return Err(registry.unsupported(version));
    };
    let version = entry.version.clone();

    self
      .request(Action::LoadCompiler, Some(RequestData::version(&version)))
      .await
      .map_err(|err| self.typed_load_error(err, &version))?;

    *self
      .inner
      .current_version
      .write()
      .unwrap_or_else(PoisonError::into_inner) = version.clone();
    log::info!("compiler version set to {version}");
    Ok(())
  }

  /// Compile `sources` (path -> content). Never fails: pipeline errors are
  /// folded into a failed [`CompileResult`].
  pub async fn compile(&self, sources: BTreeMap<String, String>) -> CompileResult {
    match self.try_compile(sources).await {
      Ok(result) => result,
      Err(err) => {
        log::warn!("compilation failed: {err}");
        CompileResult::failed(err)
      }
    }
  }

  /// Reject every pending request, tear down the context and clear caches.
  /// Compiles still resolving imports fail instead of reaching a new context.
  /// A later call starts a fresh context.
  pub fn destroy(&self) {
    let active = {
      let mut slot = lock(&self.inner.slot);
      self.inner.teardowns.fetch_add(1, Ordering::SeqCst);
      slot.take()
    };
    if let Some(active) = active {
      active.dispatcher.abort();
      active.context.terminate();
      log::info!("compiler context terminated");
    }
    self.inner.pending.reject_all(|| Error::HostDestroyed);
    self.inner.resolver.cache().clear();
    lock(&self.inner.versions).take();
  }

  async fn try_compile(&self, sources: BTreeMap<String, String>) -> Result<CompileResult> {
    let teardowns = self.inner.teardowns.load(Ordering::SeqCst);
    self.ensure_context().await?;

    let resolution = self.inner.resolver.resolve(sources).await;
    if !resolution.failures.is_empty() {
      log::warn!(
        "{} import(s) could not be resolved; compiling without them",
        resolution.failures.len()
      );
    }

    let input = StandardInput::new(resolution.sources).to_json()?;
    // A context lost to a crash is replaced; one torn down by `destroy` is not.
    let context = match self.context_since(teardowns)? {
      Some(context) => context,
      None => self.ensure_context().await?,
    };
    let raw = self
      .send(&context, Action::Compile, Some(RequestData::input(input)))
      .await?
      .ok_or_else(|| Error::Protocol("missing compiler output".into()))?
      .into_text()?;

    normalize(&raw)
  }

  fn typed_load_error(&self, err: Error, version: &str) -> Error {
    match err {
      Error::Worker {
        code: Some(FaultCode::LoadTimeout),
        ..
      } => Error::LoadTimeout {
        version: version.to_string(),
      },
      Error::Worker {
        code: Some(FaultCode::UnsupportedVersion),
        ..
      } => self.inner.config.registry.unsupported(version),
      other => other,
    }
  }

  // ---------------------------------------------------------------------------
  // Context lifecycle and request plumbing
  // ---------------------------------------------------------------------------

  fn active_context(&self) -> Option<Arc<dyn ExecutionContext>> {
    lock(&self.inner.slot)
      .as_ref()
      .map(|active| active.context.clone())
  }

  fn context_since(&self, teardowns: u64) -> Result<Option<Arc<dyn ExecutionContext>>> {
    let slot = lock(&self.inner.slot);
    if self.inner.teardowns.load(Ordering::SeqCst) != teardowns {
      return Err(Error::HostDestroyed);
    }
    Ok(slot.as_ref().map(|active| active.context.clone()))
  }

  async fn ensure_context(&self) -> Result<Arc<dyn ExecutionContext>> {
    if let Some(context) = self.active_context() {
      return Ok(context);
    }

    let _init = self.inner.init_lock.lock().await;
    if let Some(context) = self.active_context() {
      return Ok(context);
    }

    let (events, inbox) = unbounded_channel();
    let context: Arc<dyn ExecutionContext> = Arc::from(self.inner.spawner.spawn(events)?);
    let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
    let dispatcher = tokio::spawn(dispatch_events(
      inbox,
      self.inner.pending.clone(),
      self.inner.slot.clone(),
      generation,
    ));
    *lock(&self.inner.slot) = Some(ActiveContext {
      generation,
      context: context.clone(),
      dispatcher,
    });
    log::info!("compiler context {generation} started");

    let version = self.current_version();
    self
      .send(&context, Action::LoadCompiler, Some(RequestData::version(version)))
      .await
      .map_err(|err| self.typed_load_error(err, &self.current_version()))?;

    Ok(context)
  }

  async fn request(&self, action: Action, data: Option<RequestData>) -> Result<Option<ResponsePayload>> {
    let context = self.ensure_context().await?;
    self.send(&context, action, data).await
  }

  async fn send(
    &self,
    context: &Arc<dyn ExecutionContext>,
    action: Action,
    data: Option<RequestData>,
  ) -> Result<Option<ResponsePayload>> {
    let pending = &self.inner.pending;
    let (id, reply) = pending.register(action, self.inner.config.request_timeout);

    if let Err(err) = context.post_message(WorkerMessage { id, action, data }) {
      pending.remove(id);
      self.discard_context(context);
      return Err(err);
    }
    log::debug!("sent request {id} ({action})");

    reply
      .await
      .map_err(|_| Error::ContextUnavailable("request dropped before it was settled".into()))?
  }

  /// Forget `context` if it is still the active one so the next call respawns.
  fn discard_context(&self, context: &Arc<dyn ExecutionContext>) {
    let mut slot = lock(&self.inner.slot);
    if slot
      .as_ref()
      .is_some_and(|active| Arc::ptr_eq(&active.context, context))
    {
      if let Some(active) = slot.take() {
        active.dispatcher.abort();
      }
    }
  }
}

async fn dispatch_events(
  mut inbox: UnboundedReceiver<ContextEvent>,
  pending: Arc<PendingRequests>,
  slot: ContextSlot,
  generation: u64,
) {
  while let Some(event) = inbox.recv().await {
    match event {
      ContextEvent::Message(response) => pending.settle(response),
      ContextEvent::Crashed(reason) => {
        log::error!("compiler context {generation} crashed: {reason}");
        let crashed = {
          let mut slot = lock(&slot);
          if slot
            .as_ref()
            .is_some_and(|active| active.generation == generation)
          {
            slot.take()
          } else {
            None
          }
        };
        if let Some(active) = crashed {
          active.context.terminate();
          pending.reject_all(|| Error::ContextCrashed(reason.clone()));
        }
        return;
      }
    }
  }
}
