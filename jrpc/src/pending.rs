use std::{
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};
use foldhash::fast::RandomState;
use serde_json::Value;
use tokio::{runtime::Handle, sync::oneshot, task::AbortHandle};

use crate::{
    Id, Request, Response,
    error::{Error, ErrorKind, Result},
};

pub(crate) type ResultReceiver = oneshot::Receiver<Result<Value>>;

/// An outgoing request awaiting its response.
///
/// Completed at most once: by the matching response, by its timeout, or
/// dropped when the caller gives up on the future.
pub struct PendingRequest {
    pub request: Request,
    pub result_type: &'static str,
    pub posted_at: Instant,
    pub deadline: Option<Instant>,
    tx: Option<oneshot::Sender<Result<Value>>>,
    timer: Option<AbortHandle>,
}

impl PendingRequest {
    #[must_use]
    pub(crate) fn new(
        request: Request,
        result_type: &'static str,
        timeout: Option<Duration>,
    ) -> (Self, ResultReceiver) {
        let (tx, rx) = oneshot::channel();
        let posted_at = Instant::now();
        let pending = Self {
            request,
            result_type,
            posted_at,
            // an unrepresentable deadline never fires.
            deadline: timeout.and_then(|timeout| posted_at.checked_add(timeout)),
            tx: Some(tx),
            timer: None,
        };
        (pending, rx)
    }

    #[must_use]
    pub fn id(&self) -> &Id {
        &self.request.id
    }

    /// Hands the outcome to the waiting future. Returns false if the caller
    /// already dropped it.
    pub fn complete(mut self, result: Result<Value>) -> bool {
        self.tx.take().is_some_and(|tx| tx.send(result).is_ok())
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", self.id())
            .field("method", &self.request.method)
            .field("result_type", &self.result_type)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// In-flight outgoing requests keyed by id.
///
/// Every way out of the pool goes through [`PendingPool::pop`], so a
/// response racing a timeout resolves to whichever removes the entry first.
pub struct PendingPool {
    map: DashMap<Id, PendingRequest, RandomState>,
    runtime: Handle,
}

impl PendingPool {
    /// Creates a pool whose timeout timers run on `runtime`.
    #[must_use]
    pub fn new(runtime: Handle) -> Arc<Self> {
        Arc::new(Self {
            map: DashMap::default(),
            runtime,
        })
    }

    /// Registers a request and arms its timeout, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is already in flight.
    pub fn add(self: &Arc<Self>, mut pending: PendingRequest) -> Result<()> {
        match self.map.entry(pending.id().clone()) {
            Entry::Occupied(entry) => Err(Error::new(
                ErrorKind::InternalError,
                format!("request id {} is already in flight", entry.key()),
            )),
            Entry::Vacant(entry) => {
                if let Some(deadline) = pending.deadline {
                    let timer = self.runtime.spawn(Self::expire_at(
                        Arc::downgrade(self),
                        entry.key().clone(),
                        deadline,
                    ));
                    pending.timer = Some(timer.abort_handle());
                }
                entry.insert(pending);
                Ok(())
            }
        }
    }

    /// Atomically removes and returns the entry for `id`.
    pub fn pop(&self, id: &Id) -> Option<PendingRequest> {
        self.map.remove(id).map(|(_, pending)| pending)
    }

    /// Completes the pending request matching `response`.
    ///
    /// Returns false, after logging, if no request is waiting for it.
    pub fn resolve(&self, response: Response) -> bool {
        if let Some(pending) = self.pop(&response.id) {
            tracing::debug!(
                "request {} resolved after {:?}",
                response.id,
                pending.posted_at.elapsed()
            );
            pending.complete(response.result);
            true
        } else {
            tracing::warn!("no pending request for response: {}", response.id);
            false
        }
    }

    /// Completes every in-flight request with `error`.
    pub fn fail_all(&self, error: &Error) {
        let ids: Vec<Id> = self.map.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some(pending) = self.pop(&id) {
                pending.complete(Err(error.clone()));
            }
        }
    }

    #[must_use]
    pub fn contains(&self, id: &Id) -> bool {
        self.map.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    async fn expire_at(pool: Weak<Self>, id: Id, deadline: Instant) {
        tokio::time::sleep_until(deadline.into()).await;
        let Some(pool) = pool.upgrade() else {
            return;
        };
        if let Some(mut pending) = pool.pop(&id) {
            tracing::debug!("request {id} timed out: {}", pending.request.method);
            // this task is the timer; nothing left to abort.
            pending.timer = None;
            pending.complete(Err(Error::timeout()));
        }
    }
}

impl std::fmt::Debug for PendingPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingPool")
            .field("in_flight", &self.map.len())
            .finish()
    }
}

/// RAII guard removing a pending request when its future is dropped.
pub(crate) struct PendingGuard {
    pool: Option<Arc<PendingPool>>,
    id: Id,
}

impl PendingGuard {
    pub(crate) fn new(pool: &Arc<PendingPool>, id: Id) -> Self {
        Self {
            pool: Some(pool.clone()),
            id,
        }
    }

    pub(crate) fn id(&self) -> &Id {
        &self.id
    }

    /// Called once the outcome has been received; the entry is gone already.
    pub(crate) fn disarm(&mut self) {
        self.pool = None;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take()
            && pool.pop(&self.id).is_some()
        {
            tracing::debug!("request {} cancelled by caller", self.id);
        }
    }
}
