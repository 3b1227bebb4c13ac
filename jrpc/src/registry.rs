use std::{future::Future, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};
use foldhash::fast::RandomState;
use futures_util::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    Context, DispatchKind, MappingResolver, MethodMapping,
    error::{Error, ErrorKind, Result},
    params::{decode, encode_result},
};

pub type RequestHandler =
    Arc<dyn Fn(Context, Option<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

pub type NotificationHandler =
    Arc<dyn Fn(Context, Option<Value>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Method name to handler tables.
///
/// A method has at most one request handler and any number of
/// notification handlers. Lookups hand out clones of the handlers so no
/// lock is held while one runs.
#[derive(Default)]
pub struct HandlerRegistry {
    requests: DashMap<String, RequestHandler, RandomState>,
    notifications: DashMap<String, Vec<NotificationHandler>, RandomState>,
    resolver: MappingResolver,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    /// # Errors
    ///
    /// Returns `DuplicateHandler` if `method` already has a request handler.
    pub fn register_request_handler(
        &self,
        method: impl Into<String>,
        handler: RequestHandler,
    ) -> Result<()> {
        match self.requests.entry(method.into()) {
            Entry::Occupied(entry) => Err(Error::new(
                ErrorKind::DuplicateHandler,
                format!("request handler already registered: {}", entry.key()),
            )),
            Entry::Vacant(entry) => {
                tracing::debug!("register request handler: {}", entry.key());
                entry.insert(handler);
                Ok(())
            }
        }
    }

    pub fn register_notification_handler(
        &self,
        method: impl Into<String>,
        handler: NotificationHandler,
    ) {
        let method = method.into();
        tracing::debug!("register notification handler: {method}");
        self.notifications.entry(method).or_default().push(handler);
    }

    #[must_use]
    pub fn request_handler(&self, method: &str) -> Option<RequestHandler> {
        self.requests.get(method).map(|handler| handler.clone())
    }

    #[must_use]
    pub fn notification_handlers(&self, method: &str) -> Vec<NotificationHandler> {
        self.notifications
            .get(method)
            .map(|handlers| handlers.clone())
            .unwrap_or_default()
    }

    /// Methods with a request handler, sorted.
    #[must_use]
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.requests.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn resolver(&self) -> &MappingResolver {
        &self.resolver
    }

    /// Registers a request handler taking the whole `params` as one typed
    /// value, e.g. a tuple for positional params or a struct for named ones.
    ///
    /// Errors returned by `f` go through [`Error::resolve`].
    ///
    /// # Errors
    ///
    /// Returns `DuplicateHandler` if `method` already has a request handler.
    pub fn add_request_fn<P, R, E, F, Fut>(&self, method: impl Into<String>, f: F) -> Result<()>
    where
        P: DeserializeOwned,
        R: Serialize,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
        F: Fn(Context, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        self.register_request_handler(
            method,
            Arc::new(
                move |ctx: Context, params: Option<Value>| -> BoxFuture<'static, Result<Value>> {
                    let fut = decode::<P>(params.unwrap_or_default(), "params").map(|p| f(ctx, p));
                    Box::pin(async move {
                        let value = fut?.await.map_err(resolve_boxed)?;
                        encode_result(&value)
                    })
                },
            ),
        )
    }

    /// Notification counterpart of [`HandlerRegistry::add_request_fn`].
    pub fn add_notification_fn<P, E, F, Fut>(&self, method: impl Into<String>, f: F)
    where
        P: DeserializeOwned,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
        F: Fn(Context, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    {
        self.register_notification_handler(
            method,
            Arc::new(
                move |ctx: Context, params: Option<Value>| -> BoxFuture<'static, Result<()>> {
                    let fut = decode::<P>(params.unwrap_or_default(), "params").map(|p| f(ctx, p));
                    Box::pin(async move { fut?.await.map_err(resolve_boxed) })
                },
            ),
        );
    }

    /// Exposes one service method under its resolved mapping.
    ///
    /// `f` receives the arguments unpacked per the mapping's packing mode.
    /// Request methods are registered as the request handler of the mapped
    /// name; notification methods are appended to its notification
    /// handlers and their return value is discarded.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateHandler` if a request method is exposed twice.
    pub fn export<F, Fut, R>(&self, mapping: Arc<MethodMapping>, f: F) -> Result<()>
    where
        F: Fn(Context, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Serialize,
    {
        let name = mapping.name.clone();
        let kind = mapping.kind;
        match kind {
            DispatchKind::Request => self.register_request_handler(
                name,
                Arc::new(
                    move |ctx: Context, params: Option<Value>| -> BoxFuture<'static, Result<Value>> {
                        let fut = mapping.unpack(params).map(|args| f(ctx, args));
                        Box::pin(async move { encode_result(&fut?.await?) })
                    },
                ),
            ),
            DispatchKind::Notification => {
                self.register_notification_handler(
                    name,
                    Arc::new(
                        move |ctx: Context, params: Option<Value>| -> BoxFuture<'static, Result<()>> {
                            let fut = mapping.unpack(params).map(|args| f(ctx, args));
                            Box::pin(async move { fut?.await.map(drop) })
                        },
                    ),
                );
                Ok(())
            }
        }
    }
}

fn resolve_boxed(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Error {
    let e: Box<dyn std::error::Error + Send + Sync> = e.into();
    Error::resolve(&*e)
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("requests", &self.method_names())
            .field(
                "notifications",
                &self
                    .notifications
                    .iter()
                    .map(|e| (e.key().clone(), e.value().len()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> RequestHandler {
        Arc::new(|_, params| Box::pin(async move { Ok(params.unwrap_or_default()) }))
    }

    fn noop() -> NotificationHandler {
        Arc::new(|_, _| Box::pin(async { Ok(()) }))
    }

    #[test]
    fn test_duplicate_request_handler() {
        let registry = HandlerRegistry::default();
        registry.register_request_handler("echo", echo()).unwrap();
        let err = registry.register_request_handler("echo", echo()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateHandler);
        assert!(registry.request_handler("echo").is_some());
        assert!(registry.request_handler("other").is_none());
        assert_eq!(registry.method_names(), vec!["echo".to_string()]);
    }

    #[test]
    fn test_many_notification_handlers() {
        let registry = HandlerRegistry::default();
        registry.register_notification_handler("tick", noop());
        registry.register_notification_handler("tick", noop());
        assert_eq!(registry.notification_handlers("tick").len(), 2);
        assert!(registry.notification_handlers("tock").is_empty());
        // the two namespaces are independent.
        assert!(registry.request_handler("tick").is_none());
        registry.register_request_handler("tick", echo()).unwrap();
    }
}
