use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::internal::errors::{Error, Result};
use crate::protocol::{Action, ResponsePayload, WorkerResponse};

pub type Reply = Result<Option<ResponsePayload>>;

struct PendingRequest {
  action: Action,
  reply: oneshot::Sender<Reply>,
  timer: Option<JoinHandle<()>>,
}

/// Correlation table for in-flight requests. Every entry is settled exactly
/// once: by its response, by its timer, or by a bulk rejection.
#[derive(Default)]
pub struct PendingRequests {
  next_id: AtomicU64,
  entries: Mutex<HashMap<u64, PendingRequest>>,
}

impl PendingRequests {
  pub fn new() -> Self {
    Self::default()
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<u64, PendingRequest>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Allocate a fresh id and arm its timeout. Must be called inside a tokio runtime.
  pub fn register(self: &Arc<Self>, action: Action, timeout: Duration) -> (u64, oneshot::Receiver<Reply>) {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
    let (reply, receiver) = oneshot::channel();

    let mut entries = self.entries();
    entries.insert(
      id,
      PendingRequest {
        action,
        reply,
        timer: None,
      },
    );

    let table = Arc::downgrade(self);
    let timer = tokio::spawn(async move {
      tokio::time::sleep(timeout).await;
      if let Some(table) = table.upgrade() {
        table.expire(id);
      }
    });
    if let Some(entry) = entries.get_mut(&id) {
      entry.timer = Some(timer);
    }

    (id, receiver)
  }

  fn expire(&self, id: u64) {
    let Some(entry) = self.entries().remove(&id) else {
      return;
    };
    log::warn!("request {id} ({}) timed out", entry.action);
    let _ = entry.reply.send(Err(Error::Timeout {
      action: entry.action,
    }));
  }

  /// Settle the entry matching `response.id`. Late or duplicate responses are ignored.
  pub fn settle(&self, response: WorkerResponse) {
    let Some(entry) = self.entries().remove(&response.id) else {
      log::debug!("ignoring response for unknown request {}", response.id);
      return;
    };
    if let Some(timer) = entry.timer {
      timer.abort();
    }
    let _ = entry.reply.send(response.into_result());
  }

  /// Drop an entry without settling it, e.g. when the message never left the host.
  pub fn remove(&self, id: u64) {
    if let Some(entry) = self.entries().remove(&id) {
      if let Some(timer) = entry.timer {
        timer.abort();
      }
    }
  }

  pub fn reject_all(&self, error: impl Fn() -> Error) {
    let drained: Vec<PendingRequest> = self.entries().drain().map(|(_, entry)| entry).collect();
    if !drained.is_empty() {
      log::debug!("rejecting {} pending request(s): {}", drained.len(), error());
    }
    for entry in drained {
      if let Some(timer) = entry.timer {
        timer.abort();
      }
      let _ = entry.reply.send(Err(error()));
    }
  }

  pub fn len(&self) -> usize {
    self.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries().is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::sync::oneshot::error::TryRecvError;

  const TIMEOUT: Duration = Duration::from_secs(30);

  #[tokio::test(start_paused = true)]
  async fn ids_are_monotonic_and_unique() {
    let pending = Arc::new(PendingRequests::new());
    let (first, _a) = pending.register(Action::Compile, TIMEOUT);
    let (second, _b) = pending.register(Action::Compile, TIMEOUT);
    assert!(second > first);
    assert_eq!(pending.len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn responses_settle_out_of_order() {
    let pending = Arc::new(PendingRequests::new());
    let (first, first_rx) = pending.register(Action::GetVersions, TIMEOUT);
    let (second, second_rx) = pending.register(Action::Compile, TIMEOUT);

    pending.settle(WorkerResponse::ok(
      second,
      Some(ResponsePayload::Text("{}".into())),
    ));
    pending.settle(WorkerResponse::ok(
      first,
      Some(ResponsePayload::List(vec!["0.8.26".into()])),
    ));

    assert_eq!(
      second_rx.await.unwrap().unwrap(),
      Some(ResponsePayload::Text("{}".into()))
    );
    assert_eq!(
      first_rx.await.unwrap().unwrap(),
      Some(ResponsePayload::List(vec!["0.8.26".into()]))
    );
    assert!(pending.is_empty());

    pending.settle(WorkerResponse::ok(first, None));
    assert!(pending.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn timer_fires_at_the_deadline_not_before() {
    let pending = Arc::new(PendingRequests::new());
    let (_, mut receiver) = pending.register(Action::Compile, TIMEOUT);

    tokio::time::sleep(TIMEOUT - Duration::from_millis(1)).await;
    assert!(matches!(receiver.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(pending.len(), 1);

    tokio::time::sleep(Duration::from_millis(1)).await;
    tokio::task::yield_now().await;
    assert_eq!(
      receiver.try_recv().unwrap().unwrap_err(),
      Error::Timeout {
        action: Action::Compile
      }
    );
    assert!(pending.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn settled_request_is_not_timed_out_later() {
    let pending = Arc::new(PendingRequests::new());
    let (id, receiver) = pending.register(Action::LoadCompiler, TIMEOUT);
    pending.settle(WorkerResponse::ok(id, None));
    tokio::time::sleep(TIMEOUT * 2).await;
    assert_eq!(receiver.await.unwrap(), Ok(None));
  }

  #[tokio::test(start_paused = true)]
  async fn reject_all_settles_everything() {
    let pending = Arc::new(PendingRequests::new());
    let (_, a) = pending.register(Action::Compile, TIMEOUT);
    let (_, b) = pending.register(Action::GetVersions, TIMEOUT);

    pending.reject_all(|| Error::HostDestroyed);

    assert_eq!(a.await.unwrap(), Err(Error::HostDestroyed));
    assert_eq!(b.await.unwrap(), Err(Error::HostDestroyed));
    assert!(pending.is_empty());
  }
}
