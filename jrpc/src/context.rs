use crate::{Endpoint, Id};

/// Per-call context handed to handlers and stub calls.
///
/// For incoming calls, `endpoint` is the endpoint that received the
/// message, so a handler can call back into the peer through it.
#[derive(Clone)]
pub struct Context {
    pub endpoint: Endpoint,
    pub method: String,
    /// The request id; `None` for notifications.
    pub id: Option<Id>,
}

impl Context {
    /// A context for outgoing calls on `endpoint`.
    #[must_use]
    pub fn new(endpoint: &Endpoint) -> Self {
        Self {
            endpoint: endpoint.clone(),
            method: String::default(),
            id: None,
        }
    }

    #[must_use]
    pub(crate) fn incoming(endpoint: &Endpoint, method: &str, id: Option<Id>) -> Self {
        Self {
            endpoint: endpoint.clone(),
            method: method.to_string(),
            id,
        }
    }

    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.method)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
