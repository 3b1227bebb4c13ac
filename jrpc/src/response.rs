use std::{
    future::Future,
    marker::PhantomData,
    pin::Pin,
    task::{Context, Poll, ready},
};

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;

use crate::{
    Error, Id, Result,
    params::decode_result,
    pending::{PendingGuard, ResultReceiver},
};

/// The eventual result of a call.
///
/// Returned immediately by [`Endpoint::request`](crate::Endpoint::request)
/// and resolves exactly once. Dropping it before completion removes the
/// request from the pending pool; the peer is not told.
///
/// Service implementations may also return one for methods whose caller
/// side should not be awaited eagerly, see [`ResponseFuture::new`].
pub struct ResponseFuture<T> {
    state: State<T>,
}

enum State<T> {
    Waiting {
        rx: ResultReceiver,
        guard: PendingGuard,
        _marker: PhantomData<fn() -> T>,
    },
    Boxed(BoxFuture<'static, Result<T>>),
    Ready(Option<Result<T>>),
}

// no structural pinning of `T` anywhere.
impl<T> Unpin for ResponseFuture<T> {}

impl<T> ResponseFuture<T> {
    pub(crate) fn waiting(rx: ResultReceiver, guard: PendingGuard) -> Self {
        Self {
            state: State::Waiting {
                rx,
                guard,
                _marker: PhantomData,
            },
        }
    }

    /// Wraps a locally computed future.
    pub fn new(fut: impl Future<Output = Result<T>> + Send + 'static) -> Self {
        Self {
            state: State::Boxed(Box::pin(fut)),
        }
    }

    /// An already completed future.
    pub fn ready(result: Result<T>) -> Self {
        Self {
            state: State::Ready(Some(result)),
        }
    }

    /// Runs `fut` as a tokio task; a panic or abort of that task surfaces
    /// as an internal error.
    pub fn spawn(fut: impl Future<Output = Result<T>> + Send + 'static) -> Self
    where
        T: Send + 'static,
    {
        let handle = tokio::spawn(fut);
        Self::new(async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::resolve(&e)),
            }
        })
    }

    /// The request id, for futures backed by an outgoing request.
    pub fn id(&self) -> Option<&Id> {
        match &self.state {
            State::Waiting { guard, .. } => Some(guard.id()),
            _ => None,
        }
    }
}

impl<T: DeserializeOwned> Future for ResponseFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            State::Waiting { rx, guard, .. } => {
                let result = ready!(Pin::new(rx).poll(cx));
                guard.disarm();
                Poll::Ready(match result {
                    Ok(Ok(value)) => decode_result(value),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(Error::interrupted()),
                })
            }
            State::Boxed(fut) => fut.as_mut().poll(cx),
            State::Ready(result) => Poll::Ready(
                result
                    .take()
                    .unwrap_or_else(|| Err(Error::interrupted())),
            ),
        }
    }
}

impl<T> std::fmt::Debug for ResponseFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Waiting { .. } => "Waiting",
            State::Boxed(_) => "Boxed",
            State::Ready(_) => "Ready",
        };
        f.debug_struct("ResponseFuture")
            .field("id", &self.id())
            .field("state", &state)
            .finish()
    }
}
