use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;

use super::ResultAndInvalidations;
use super::RunRequestError;

/// How many times an execution may crash before the request is reported as failed
pub const MAX_EXECUTION_ATTEMPTS: u32 = 2;

/// What came back from a worker task
#[derive(Debug)]
pub enum WorkerOutcome {
  /// The handler ran to completion, successfully or not
  Completed(Result<ResultAndInvalidations, RunRequestError>),
  /// The task running the handler panicked or was cancelled
  Crashed(String),
}

/// Bounds the number of request handlers that execute at the same time
#[derive(Debug)]
pub struct WorkerPool {
  semaphore: Arc<Semaphore>,
  capacity: usize,
}

impl WorkerPool {
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      semaphore: Arc::new(Semaphore::new(capacity)),
      capacity,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn available(&self) -> usize {
    self.semaphore.available_permits()
  }

  /// A slot that a single execution holds while its handler runs
  pub fn slot(&self) -> Arc<WorkerSlot> {
    Arc::new(WorkerSlot {
      semaphore: self.semaphore.clone(),
      state: Mutex::new(SlotState::default()),
    })
  }

  /// Run `job` on a fresh task once `slot` is acquired, then hand its outcome to `on_done`.
  ///
  /// The job runs on its own inner task so that a panic is observed as a [`WorkerOutcome::Crashed`]
  /// rather than tearing down the caller.
  pub fn spawn<F, D>(&self, slot: Arc<WorkerSlot>, job: F, on_done: D)
  where
    F: Future<Output = Result<ResultAndInvalidations, RunRequestError>> + Send + 'static,
    D: FnOnce(WorkerOutcome) + Send + 'static,
  {
    tokio::spawn(async move {
      slot.acquire().await;

      let outcome = match tokio::spawn(job).await {
        Ok(result) => WorkerOutcome::Completed(result),
        Err(error) if error.is_panic() => WorkerOutcome::Crashed(panic_message(error.into_panic())),
        Err(error) => WorkerOutcome::Crashed(error.to_string()),
      };

      slot.release().await;
      on_done(outcome);
    });
  }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    String::from("worker panicked")
  }
}

#[derive(Debug, Default)]
struct SlotState {
  permit: Option<OwnedSemaphorePermit>,
  suspended: usize,
}

/// The permit held by one execution.
///
/// While the handler waits on sub-requests the permit is returned to the pool, and it is taken
/// again before the handler continues. Suspensions nest, the permit is only given up once.
#[derive(Debug)]
pub struct WorkerSlot {
  semaphore: Arc<Semaphore>,
  state: Mutex<SlotState>,
}

impl WorkerSlot {
  async fn acquire(&self) {
    let mut state = self.state.lock().await;
    if state.permit.is_none() {
      state.permit = self.semaphore.clone().acquire_owned().await.ok();
    }
  }

  async fn release(&self) {
    let mut state = self.state.lock().await;
    state.permit.take();
    state.suspended = 0;
  }

  pub(crate) async fn suspend(&self) {
    let mut state = self.state.lock().await;
    state.suspended += 1;
    if state.suspended == 1 {
      state.permit.take();
    }
  }

  pub(crate) async fn resume(&self) {
    let mut state = self.state.lock().await;
    state.suspended = state.suspended.saturating_sub(1);
    if state.suspended == 0 && state.permit.is_none() {
      state.permit = self.semaphore.clone().acquire_owned().await.ok();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicUsize;
  use std::sync::atomic::Ordering;
  use std::time::Duration;

  use tokio::sync::oneshot;

  use crate::requests::RequestResult;

  use super::*;

  fn ok_result(name: &str) -> Result<ResultAndInvalidations, RunRequestError> {
    Ok(ResultAndInvalidations::new(
      RequestResult::TestSub(name.to_string()),
      vec![],
    ))
  }

  fn pool_panics() -> bool {
    true
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn reports_completed_jobs() {
    let pool = WorkerPool::new(2);
    let (tx, rx) = oneshot::channel();

    pool.spawn(pool.slot(), async { ok_result("a") }, move |outcome| {
      let _ = tx.send(outcome);
    });

    let outcome = rx.await.unwrap();
    assert!(matches!(
      outcome,
      WorkerOutcome::Completed(Ok(ResultAndInvalidations {
        result: RequestResult::TestSub(name),
        ..
      })) if name == "a"
    ));
    assert_eq!(pool.available(), 2);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn reports_panics_as_crashes() {
    let pool = WorkerPool::new(1);
    let (tx, rx) = oneshot::channel();

    pool.spawn(
      pool.slot(),
      async {
        if pool_panics() {
          panic!("handler exploded");
        }
        ok_result("unreachable")
      },
      move |outcome| {
        let _ = tx.send(outcome);
      },
    );

    let outcome = rx.await.unwrap();
    assert!(matches!(outcome, WorkerOutcome::Crashed(message) if message == "handler exploded"));
    assert_eq!(pool.available(), 1);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn limits_concurrent_jobs_to_capacity() {
    let pool = WorkerPool::new(2);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut receivers = vec![];

    for _ in 0..6 {
      let (tx, rx) = oneshot::channel();
      let running = running.clone();
      let peak = peak.clone();

      pool.spawn(
        pool.slot(),
        async move {
          let now = running.fetch_add(1, Ordering::SeqCst) + 1;
          peak.fetch_max(now, Ordering::SeqCst);
          tokio::time::sleep(Duration::from_millis(20)).await;
          running.fetch_sub(1, Ordering::SeqCst);
          ok_result("job")
        },
        move |outcome| {
          let _ = tx.send(outcome);
        },
      );
      receivers.push(rx);
    }

    for rx in receivers {
      rx.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn suspended_slots_return_their_permit() {
    let pool = WorkerPool::new(1);
    let slot = pool.slot();

    slot.acquire().await;
    assert_eq!(pool.available(), 0);

    slot.suspend().await;
    slot.suspend().await;
    assert_eq!(pool.available(), 1);

    slot.resume().await;
    assert_eq!(pool.available(), 1);

    slot.resume().await;
    assert_eq!(pool.available(), 0);

    slot.release().await;
    assert_eq!(pool.available(), 1);
  }
}
