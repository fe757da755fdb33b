use crate::error::StoreError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting gate in front of the download jobs.
///
/// At most `limit` downloads hold a permit; at most `max_queued` more may wait for one.
/// Anything beyond that is turned away with [`StoreError::Rejected`].
#[derive(Clone)]
pub struct Admission {
  inner: Arc<AdmissionInner>,
}

struct AdmissionInner {
  semaphore: Arc<Semaphore>,
  limit: AtomicUsize,
  // running + waiting
  occupied: AtomicUsize,
  max_queued: usize,
}

impl Admission {
  pub fn new(limit: usize, max_queued: usize) -> Self {
    let limit = limit.max(1);
    Self {
      inner: Arc::new(AdmissionInner {
        semaphore: Arc::new(Semaphore::new(limit)),
        limit: AtomicUsize::new(limit),
        occupied: AtomicUsize::new(0),
        max_queued,
      }),
    }
  }

  pub fn limit(&self) -> usize {
    self.inner.limit.load(Ordering::Relaxed)
  }

  /// Takes a place in line without waiting. The place is given back when the ticket
  /// (or the [`Admitted`] guard it turns into) is dropped.
  pub fn try_reserve(&self) -> Result<QueueTicket, StoreError> {
    let capacity = self.limit() + self.inner.max_queued;
    let mut cur = self.inner.occupied.load(Ordering::Relaxed);
    loop {
      if cur >= capacity {
        return Err(StoreError::Rejected);
      }
      match self
        .inner
        .occupied
        .compare_exchange(cur, cur + 1, Ordering::AcqRel, Ordering::Relaxed)
      {
        Ok(_) => {
          return Ok(QueueTicket {
            inner: self.inner.clone(),
          })
        }
        Err(actual) => cur = actual,
      }
    }
  }

  /// Raising the limit frees permits immediately; lowering it retires permits as
  /// running downloads hand them back.
  pub fn set_limit(&self, limit: usize) {
    let limit = limit.max(1);
    let old = self.inner.limit.swap(limit, Ordering::AcqRel);
    if limit > old {
      self.inner.semaphore.add_permits(limit - old);
    } else if limit < old {
      let surplus = old - limit;
      let forgotten = self.inner.semaphore.forget_permits(surplus);
      let owed = (surplus - forgotten) as u32;
      if owed > 0 {
        let semaphore = self.inner.semaphore.clone();
        match tokio::runtime::Handle::try_current() {
          Ok(rt) => {
            rt.spawn(async move {
              if let Ok(permits) = semaphore.acquire_many_owned(owed).await {
                permits.forget();
              }
            });
          }
          Err(_) => tracing::warn!(owed, "lowered download limit outside a runtime; permits not retired"),
        }
      }
    }
    tracing::info!(old, new = limit, "download concurrency limit changed");
  }
}

pub struct QueueTicket {
  inner: Arc<AdmissionInner>,
}

impl QueueTicket {
  /// Waits for a running slot.
  pub async fn admit(self) -> Result<Admitted, StoreError> {
    let permit = self
      .inner
      .semaphore
      .clone()
      .acquire_owned()
      .await
      .map_err(|_| StoreError::Rejected)?;
    Ok(Admitted {
      _permit: permit,
      _ticket: self,
    })
  }
}

impl Drop for QueueTicket {
  fn drop(&mut self) {
    self.inner.occupied.fetch_sub(1, Ordering::AcqRel);
  }
}

pub struct Admitted {
  _permit: OwnedSemaphorePermit,
  _ticket: QueueTicket,
}
