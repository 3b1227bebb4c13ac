use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_inline_default::serde_inline_default;
use serde_json::Value;
use std::time::Duration;

use crate::{
    Context, DispatchKind, MethodDescriptor, ResponseFuture, ServiceDescriptor,
    error::{Error, ErrorKind, Result},
};

/// Caller-side stub configuration.
///
/// Every `#[jrpc::service]` trait is implemented for `Client`, turning
/// method calls into outgoing requests or notifications on the context's
/// endpoint.
#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct Client {
    /// Used only for methods whose mapping neither sets nor disables a
    /// timeout.
    #[serde_inline_default(None)]
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for Client {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default())).unwrap()
    }
}

impl Client {
    /// Sends a request for a service method and returns its future
    /// without waiting.
    ///
    /// `args` are the already encoded arguments; an encoding failure is
    /// reported through the returned future.
    pub fn jrpc_request<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        service: &'static ServiceDescriptor,
        method: &'static MethodDescriptor,
        args: Result<Vec<Value>>,
    ) -> ResponseFuture<T> {
        let endpoint = &ctx.endpoint;
        let mapping = match endpoint.registry().resolver().resolve(service, method) {
            Ok(mapping) => mapping,
            Err(e) => return ResponseFuture::ready(Err(e)),
        };
        if mapping.kind != DispatchKind::Request {
            return ResponseFuture::ready(Err(Error::new(
                ErrorKind::InvalidMapping,
                format!("{} is a notification", mapping.name),
            )));
        }
        let params = match args.and_then(|args| mapping.pack(args)) {
            Ok(params) => params,
            Err(e) => return ResponseFuture::ready(Err(e)),
        };
        let timeout = mapping.timeout.or(self.timeout);
        endpoint.request_with(mapping.name.clone(), params, timeout, mapping.result_type)
    }

    /// Sends a notification for a service method.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping is invalid, the arguments cannot be
    /// packed, or the transport refuses the message.
    pub fn jrpc_notify(
        &self,
        ctx: &Context,
        service: &'static ServiceDescriptor,
        method: &'static MethodDescriptor,
        args: Result<Vec<Value>>,
    ) -> Result<()> {
        let mapping = ctx.endpoint.registry().resolver().resolve(service, method)?;
        let params = mapping.pack(args?)?;
        ctx.endpoint.notify(mapping.name.clone(), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let client = Client::default();
        assert_eq!(client.timeout, None);

        let client: Client = serde_json::from_str(r#"{"timeout": "150ms"}"#).unwrap();
        assert_eq!(client.timeout, Some(Duration::from_millis(150)));
    }
}
