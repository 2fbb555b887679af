//! The isolated side of the compilation protocol.
//!
//! A [`Worker`] owns at most one loaded engine and answers one message at a
//! time. [`ThreadSpawner`] runs it on a dedicated thread reachable only
//! through channels; the host talks to it via [`ExecutionContext`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::internal::config::{HostConfig, ReadinessPolicy};
use crate::internal::errors::{Error, Result};
use crate::internal::solc::VersionRegistry;
use crate::protocol::{Action, RequestData, ResponsePayload, WorkerMessage, WorkerResponse};

pub mod engine;
pub mod svm;

pub use engine::{compile_with_fallback, EngineLoader, EngineModule, EntryPoint, ModuleStatus};
pub use svm::SvmLoader;

const WORKER_THREAD_NAME: &str = "solc-worker";

/// Events emitted by an execution context towards the host.
#[derive(Debug)]
pub enum ContextEvent {
  Message(WorkerResponse),
  Crashed(String),
}

pub type EventSink = UnboundedSender<ContextEvent>;

/// Handle to a running isolated context.
pub trait ExecutionContext: Send + Sync {
  fn post_message(&self, message: WorkerMessage) -> Result<()>;
  fn terminate(&self);
}

/// Creates execution contexts that report back through `events`.
pub trait ContextSpawner: Send + Sync {
  fn spawn(&self, events: EventSink) -> Result<Box<dyn ExecutionContext>>;
}

struct LoadedEngine {
  version: String,
  module: Box<dyn EngineModule>,
}

pub struct Worker {
  registry: VersionRegistry,
  loader: Arc<dyn EngineLoader>,
  readiness: ReadinessPolicy,
  default_version: String,
  engine: Option<LoadedEngine>,
}

impl Worker {
  pub fn new(config: &HostConfig, loader: Arc<dyn EngineLoader>) -> Self {
    Self {
      registry: config.registry.clone(),
      loader,
      readiness: config.readiness,
      default_version: config.default_version.clone(),
      engine: None,
    }
  }

  pub fn loaded_version(&self) -> Option<&str> {
    self.engine.as_ref().map(|engine| engine.version.as_str())
  }

  pub fn handle(&mut self, message: WorkerMessage) -> WorkerResponse {
    let WorkerMessage { id, action, data } = message;
    let data = data.unwrap_or_default();

    let outcome = match action {
      Action::LoadCompiler => {
        let version = data.version.unwrap_or_else(|| self.default_version.clone());
        self.load_compiler(&version).map(|_| None)
      }
      Action::Compile => self.compile(data).map(|output| Some(ResponsePayload::Text(output))),
      Action::GetVersions => Ok(Some(ResponsePayload::List(self.registry.versions()))),
    };

    match outcome {
      Ok(result) => WorkerResponse::ok(id, result),
      Err(err) => {
        log::debug!("worker request {id} ({action}) failed: {err}");
        WorkerResponse::failed(id, &err)
      }
    }
  }

  /// Handle a JSON-encoded request. Requests with an unknown action are
  /// answered with an error when their id can be recovered; anything else
  /// that does not parse is dropped.
  pub fn handle_json(&mut self, raw: &str) -> Option<WorkerResponse> {
    match serde_json::from_str::<WorkerMessage>(raw) {
      Ok(message) => Some(self.handle(message)),
      Err(parse_err) => {
        let value: Value = serde_json::from_str(raw).ok()?;
        let Some(id) = value.get("id").and_then(Value::as_u64) else {
          log::warn!("dropping request without an id: {parse_err}");
          return None;
        };
        let err = match value.get("action").and_then(Value::as_str) {
          Some(action) => Error::worker(format!("Unknown action: {action}")),
          None => Error::Protocol(parse_err.to_string()),
        };
        Some(WorkerResponse::failed(id, &err))
      }
    }
  }

  fn load_compiler(&mut self, version: &str) -> Result<()> {
    let entry = self
      .registry
      .resolve(version)
      .cloned()
      .ok_or_else(|| self.registry.unsupported(version))?;

    if self.loaded_version() == Some(entry.version.as_str()) {
      return Ok(());
    }

    self.engine = None;
    let module = self
      .loader
      .import_script(&entry)
      .map_err(|err| Error::with_context(format!("Failed to load compiler {}", entry.version), err))?;
    self.await_ready(&entry.version, module.as_ref())?;

    log::info!("solidity compiler {} loaded", entry.version);
    self.engine = Some(LoadedEngine {
      version: entry.version,
      module,
    });
    Ok(())
  }

  fn await_ready(&self, version: &str, module: &dyn EngineModule) -> Result<()> {
    for _ in 0..self.readiness.max_attempts {
      match module.status() {
        ModuleStatus::Ready => return Ok(()),
        ModuleStatus::Failed(reason) => {
          return Err(Error::worker(format!(
            "Failed to load compiler {version}: {reason}"
          )))
        }
        ModuleStatus::Loading => thread::sleep(self.readiness.interval),
      }
    }
    Err(Error::LoadTimeout {
      version: version.to_string(),
    })
  }

  fn compile(&mut self, data: RequestData) -> Result<String> {
    if self.engine.is_none() {
      let default_version = self.default_version.clone();
      self.load_compiler(&default_version)?;
    }

    let input = data
      .input
      .filter(|input| !input.is_empty())
      .ok_or_else(|| Error::worker("Input must be a non-empty string"))?;

    match &self.engine {
      Some(engine) => compile_with_fallback(engine.module.as_ref(), &input),
      None => Err(Error::worker("Compiler not loaded. Call loadCompiler first.")),
    }
  }
}

// -----------------------------------------------------------------------------
// Dedicated-thread context
// -----------------------------------------------------------------------------

pub struct ThreadSpawner {
  config: HostConfig,
  loader: Arc<dyn EngineLoader>,
}

impl ThreadSpawner {
  pub fn new(config: &HostConfig, loader: Arc<dyn EngineLoader>) -> Self {
    Self {
      config: config.clone(),
      loader,
    }
  }
}

impl ContextSpawner for ThreadSpawner {
  fn spawn(&self, events: EventSink) -> Result<Box<dyn ExecutionContext>> {
    let (sender, receiver) = mpsc::channel();
    let worker = Worker::new(&self.config, self.loader.clone());

    thread::Builder::new()
      .name(WORKER_THREAD_NAME.to_string())
      .spawn(move || run_worker(worker, receiver, events))
      .map_err(|err| Error::ContextUnavailable(err.to_string()))?;

    Ok(Box::new(ThreadContext {
      sender: Mutex::new(Some(sender)),
    }))
  }
}

struct ThreadContext {
  sender: Mutex<Option<mpsc::Sender<WorkerMessage>>>,
}

impl ExecutionContext for ThreadContext {
  fn post_message(&self, message: WorkerMessage) -> Result<()> {
    let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
    match sender.as_ref() {
      Some(sender) => sender
        .send(message)
        .map_err(|_| Error::ContextUnavailable("worker thread has exited".into())),
      None => Err(Error::ContextUnavailable("context terminated".into())),
    }
  }

  /// Closes the channel; the thread exits once its current message is done.
  fn terminate(&self) {
    self
      .sender
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
  }
}

fn run_worker(mut worker: Worker, receiver: mpsc::Receiver<WorkerMessage>, events: EventSink) {
  while let Ok(message) = receiver.recv() {
    match panic::catch_unwind(AssertUnwindSafe(|| worker.handle(message))) {
      Ok(response) => {
        if events.send(ContextEvent::Message(response)).is_err() {
          break;
        }
      }
      Err(payload) => {
        let reason = panic_reason(payload.as_ref());
        log::error!("solc worker crashed: {reason}");
        let _ = events.send(ContextEvent::Crashed(reason));
        return;
      }
    }
  }
  log::debug!("solc worker thread exiting");
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic".to_string()
  }
}
