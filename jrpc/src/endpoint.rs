use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_inline_default::serde_inline_default;
use serde_json::Value;
use tokio::{runtime::Handle, sync::mpsc};
use tokio_util::sync::DropGuard;

use crate::{
    Codec, Context, HandlerRegistry, Id, IdGenerator, Message, Notification, PendingPool,
    PendingRequest, Request, Response, ResponseFuture, SequenceIdGenerator, TaskSupervisor,
    Transport,
    error::{Error, ErrorKind, Result},
    msg::request_id_of,
    pending::PendingGuard,
};

#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct EndpointConfig {
    /// First id handed out by the default id generator.
    #[serde_inline_default(0)]
    pub initial_id: i64,
    #[serde_inline_default(Codec::Json)]
    pub codec: Codec,
    /// Largest frame accepted or sent by stream transports.
    #[serde_inline_default(64 << 20)]
    pub max_frame_size: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default())).unwrap()
    }
}

/// Counters for traffic that is dropped without an error.
#[derive(Debug, Default)]
pub struct Stats {
    unmatched_responses: AtomicU64,
    unhandled_notifications: AtomicU64,
    failed_notifications: AtomicU64,
}

impl Stats {
    /// Responses with no pending request: late, duplicate or unknown ids.
    pub fn unmatched_responses(&self) -> u64 {
        self.unmatched_responses.load(Ordering::Relaxed)
    }

    /// Notifications with no registered handler.
    pub fn unhandled_notifications(&self) -> u64 {
        self.unhandled_notifications.load(Ordering::Relaxed)
    }

    /// Notification handler invocations that returned an error or panicked.
    pub fn failed_notifications(&self) -> u64 {
        self.failed_notifications.load(Ordering::Relaxed)
    }
}

/// Builds an [`Endpoint`] on top of a transport.
#[derive(Clone, Default)]
pub struct EndpointBuilder {
    config: EndpointConfig,
    registry: Option<Arc<HandlerRegistry>>,
    request_executor: Option<Handle>,
    notification_executor: Option<Handle>,
    id_generator: Option<Arc<dyn IdGenerator>>,
}

impl EndpointBuilder {
    #[must_use]
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Runs both request and notification handlers on `runtime`.
    #[must_use]
    pub fn executor(self, runtime: Handle) -> Self {
        self.request_executor(runtime.clone())
            .notification_executor(runtime)
    }

    #[must_use]
    pub fn request_executor(mut self, runtime: Handle) -> Self {
        self.request_executor = Some(runtime);
        self
    }

    #[must_use]
    pub fn notification_executor(mut self, runtime: Handle) -> Self {
        self.notification_executor = Some(runtime);
        self
    }

    #[must_use]
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = Some(ids);
        self
    }

    /// Builds the endpoint. Inbound frames are fed in by the transport
    /// through [`Endpoint::handle_frame`] or [`Endpoint::handle`].
    ///
    /// An executor that is not set falls back to the other one, then to
    /// the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if no executor is set and there is no current
    /// runtime.
    pub fn build(self, transport: Arc<dyn Transport>) -> Result<Endpoint> {
        let (request_executor, notification_executor) =
            match (self.request_executor, self.notification_executor) {
                (Some(r), Some(n)) => (r, n),
                (Some(r), None) => (r.clone(), r),
                (None, Some(n)) => (n.clone(), n),
                (None, None) => {
                    let runtime = Handle::try_current()
                        .map_err(|e| Error::new(ErrorKind::InternalError, e.to_string()))?;
                    (runtime.clone(), runtime)
                }
            };
        let ids = self
            .id_generator
            .unwrap_or_else(|| {
                Arc::new(SequenceIdGenerator::new(self.config.initial_id)) as Arc<dyn IdGenerator>
            });

        Ok(Endpoint(Arc::new(EndpointState {
            transport,
            registry: self.registry.unwrap_or_default(),
            pending: PendingPool::new(request_executor.clone()),
            ids,
            supervisor: TaskSupervisor::create(request_executor.clone()),
            request_executor,
            notification_executor,
            stats: Arc::default(),
            config: self.config,
        })))
    }
}

impl std::fmt::Debug for EndpointBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct EndpointState {
    config: EndpointConfig,
    transport: Arc<dyn Transport>,
    registry: Arc<HandlerRegistry>,
    pending: Arc<PendingPool>,
    ids: Arc<dyn IdGenerator>,
    request_executor: Handle,
    notification_executor: Handle,
    stats: Arc<Stats>,
    supervisor: TaskSupervisor,
}

/// One side of a connection: sends requests and notifications to the peer
/// and dispatches whatever the peer sends.
///
/// Cheap to clone; all clones share the same state. The background loops
/// of the endpoint stop once the last clone is dropped.
#[derive(Clone)]
pub struct Endpoint(Arc<EndpointState>);

impl Endpoint {
    #[must_use]
    pub fn builder() -> EndpointBuilder {
        EndpointBuilder::default()
    }

    #[must_use]
    pub fn config(&self) -> &EndpointConfig {
        &self.0.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.0.registry
    }

    #[must_use]
    pub fn pending(&self) -> &Arc<PendingPool> {
        &self.0.pending
    }

    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.0.stats
    }

    /// Posts a notification.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the message cannot be posted.
    pub fn notify(&self, method: impl Into<String>, params: Option<Value>) -> Result<()> {
        let notification = Notification {
            method: method.into(),
            params,
        };
        tracing::debug!("notify {}", notification.method);
        self.0.transport.post(&notification.into())
    }

    /// Posts a request and returns its future without waiting.
    ///
    /// A `timeout` of `None` waits until the response arrives or the
    /// endpoint stops.
    pub fn request<T: DeserializeOwned>(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> ResponseFuture<T> {
        self.request_with(method, params, timeout, std::any::type_name::<T>())
    }

    /// Like [`Endpoint::request`], recording `result_type` in the pending
    /// entry.
    pub fn request_with<T>(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        timeout: Option<Duration>,
        result_type: &'static str,
    ) -> ResponseFuture<T> {
        if self.0.supervisor.is_stopped() {
            return ResponseFuture::ready(Err(Error::interrupted()));
        }
        let id = self.0.ids.next_id();
        let request = Request {
            id: id.clone(),
            method: method.into(),
            params,
        };
        let message = Message::Request(request.clone());
        tracing::debug!("request {id}: {}", request.method);

        // registered before posting: the response may arrive before post returns.
        let (pending, rx) = PendingRequest::new(request, result_type, timeout);
        if let Err(e) = self.0.pending.add(pending) {
            return ResponseFuture::ready(Err(e));
        }
        let guard = PendingGuard::new(&self.0.pending, id);
        if let Err(e) = self.0.transport.post(&message) {
            drop(guard);
            return ResponseFuture::ready(Err(e));
        }
        ResponseFuture::waiting(rx, guard)
    }

    /// Entry point for every inbound message.
    pub fn handle(&self, message: Message) {
        match message {
            Message::Notification(notification) => {
                self.dispatch_notification(notification, false);
            }
            Message::Request(request) => {
                self.dispatch_notification(request.as_notification(), true);
                self.dispatch_request(request);
            }
            Message::Response(response) => {
                if !self.0.pending.resolve(response) {
                    self.0
                        .stats
                        .unmatched_responses
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Decodes a raw inbound frame with the configured codec and handles it.
    ///
    /// Undecodable frames are dropped; if the frame still names a method
    /// and an id, the decode error is posted back for that id.
    pub fn handle_frame(&self, frame: &[u8]) {
        let value = match self.0.config.codec.decode_value(frame) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("drop undecodable frame: {e}");
                return;
            }
        };
        let id = request_id_of(&value);
        match Message::from_value(value) {
            Ok(message) => self.handle(message),
            Err(e) => {
                tracing::warn!("drop invalid message: {e}");
                if let Some(id) = id {
                    self.reply(Response::err(id, e));
                }
            }
        }
    }

    /// Requests the background loops to stop and fails every in-flight
    /// request with `Interrupted`.
    pub fn stop(&self) {
        self.0.supervisor.stop();
        self.0.pending.fail_all(&Error::interrupted());
    }

    /// Waits until the background loops have exited after [`Endpoint::stop`].
    pub async fn join(&self) {
        self.0.supervisor.all_stopped().await;
    }

    pub(crate) fn supervise<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.0.supervisor.spawn(fut);
    }

    /// Feeds frames from `inbox` into the endpoint until the sender side
    /// closes, then stops the endpoint and fails the requests still in
    /// flight.
    pub(crate) fn spawn_receiver(&self, mut inbox: mpsc::UnboundedReceiver<Bytes>) {
        let state = Arc::downgrade(&self.0);
        let interrupt = InterruptOnDrop(self.0.pending.clone());
        let close = self.stop_guard();
        self.supervise(async move {
            let _interrupt = interrupt;
            let _close = close;
            while let Some(frame) = inbox.recv().await {
                let Some(state) = state.upgrade() else {
                    break;
                };
                Endpoint(state).handle_frame(&frame);
            }
            tracing::debug!("receive loop finished");
        });
    }

    /// A guard stopping the endpoint's loops when dropped.
    pub(crate) fn stop_guard(&self) -> DropGuard {
        self.0.supervisor.drop_guard()
    }

    fn dispatch_notification(&self, notification: Notification, from_request: bool) {
        let handlers = self.0.registry.notification_handlers(&notification.method);
        if handlers.is_empty() {
            if !from_request {
                tracing::warn!("no notification handler: {}", notification.method);
                self.0
                    .stats
                    .unhandled_notifications
                    .fetch_add(1, Ordering::Relaxed);
            }
            return;
        }

        for handler in handlers {
            let ctx = Context::incoming(self, &notification.method, None);
            let params = notification.params.clone();
            let stats = self.0.stats.clone();
            self.0.notification_executor.spawn(async move {
                let method = ctx.method.clone();
                let result = AssertUnwindSafe(async move { handler(ctx, params).await })
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(Error::from_panic(payload)));
                if let Err(e) = result {
                    tracing::warn!("notification handler for {method} failed: {e}");
                    stats.failed_notifications.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    }

    fn dispatch_request(&self, request: Request) {
        let Request { id, method, params } = request;
        if method.is_empty() {
            self.reply(Response::err(
                id,
                Error::new(ErrorKind::InvalidRequest, "empty method name"),
            ));
            return;
        }
        let Some(handler) = self.0.registry.request_handler(&method) else {
            tracing::warn!("no request handler: {method}");
            self.reply(Response::err(id, Error::method_not_found(&method)));
            return;
        };

        let ctx = Context::incoming(self, &method, Some(id.clone()));
        let endpoint = self.clone();
        self.0.request_executor.spawn(async move {
            let result = AssertUnwindSafe(async move { handler(ctx, params).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(Error::from_panic(payload)));
            if let Err(e) = &result {
                tracing::debug!("request {id} ({method}) failed: {e}");
            }
            endpoint.reply(Response { id, result });
        });
    }

    fn reply(&self, response: Response) {
        let id = response.id.clone();
        if let Err(e) = self.0.transport.post(&response.into()) {
            tracing::error!("failed to post response {id}: {e}");
        }
    }

    /// Whether `id` is still awaiting its response.
    #[must_use]
    pub fn is_pending(&self, id: &Id) -> bool {
        self.0.pending.contains(id)
    }
}

/// Interrupts the requests still in flight once the receive loop is gone,
/// whether it finished or was cancelled.
struct InterruptOnDrop(Arc<PendingPool>);

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        self.0.fail_all(&Error::interrupted());
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("config", &self.0.config)
            .field("registry", &self.0.registry)
            .field("pending", &self.0.pending)
            .field("stats", &self.0.stats)
            .finish_non_exhaustive()
    }
}
