use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use foldhash::fast::RandomState;
use serde_json::Value;

use crate::{
    ParamsPacking,
    error::{Error, ErrorKind, Result},
};

/// Whether a method expects a response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DispatchKind {
    #[default]
    Request,
    Notification,
}

/// Compile-time description of one service method.
///
/// Emitted by `#[jrpc::service]`; resolved into a [`MethodMapping`].
#[derive(Debug)]
pub struct MethodDescriptor {
    /// The Rust method name.
    pub ident: &'static str,
    /// Explicit exposed name, overriding the derived one.
    pub name: Option<&'static str>,
    pub kind: DispatchKind,
    pub packing: Option<ParamsPacking>,
    /// Declared parameter names after the context, empty for unnamed ones.
    pub params: &'static [&'static str],
    pub result_type: &'static str,
    pub returns_future: bool,
    /// Positive: timeout in ms. Negative: disable the service timeout.
    pub timeout_ms: Option<i64>,
}

/// Compile-time description of a service trait.
#[derive(Debug)]
pub struct ServiceDescriptor {
    pub name: &'static str,
    pub base_path: Option<&'static str>,
    /// Base timeout in ms for all methods; zero means none.
    pub timeout_ms: Option<u64>,
    pub methods: &'static [MethodDescriptor],
}

/// Resolved timeout of a method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Neither the method nor its service declares one; the caller decides.
    Inherit,
    /// Explicitly disabled by the method.
    Disabled,
    After(Duration),
}

impl TimeoutPolicy {
    #[must_use]
    pub fn or(self, fallback: Option<Duration>) -> Option<Duration> {
        match self {
            TimeoutPolicy::Inherit => fallback,
            TimeoutPolicy::Disabled => None,
            TimeoutPolicy::After(timeout) => Some(timeout),
        }
    }
}

/// Dispatch metadata of a method, immutable once resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodMapping {
    pub name: String,
    pub kind: DispatchKind,
    pub packing: ParamsPacking,
    pub params: &'static [&'static str],
    pub result_type: &'static str,
    pub returns_future: bool,
    pub timeout: TimeoutPolicy,
}

impl MethodMapping {
    /// Resolves a descriptor without caching.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMapping` for single packing on a method without
    /// exactly one parameter, named packing with unnamed parameters, or a
    /// notification declared to return a future.
    pub fn resolve(service: &ServiceDescriptor, method: &MethodDescriptor) -> Result<Self> {
        let invalid = |msg: &str| {
            Error::new(
                ErrorKind::InvalidMapping,
                format!("{}::{}: {msg}", service.name, method.ident),
            )
        };

        let name = match (method.name, service.base_path) {
            (Some(name), _) => name.to_string(),
            (None, Some(base_path)) if !base_path.is_empty() => {
                format!("{base_path}/{}", method.ident)
            }
            (None, _) => method.ident.to_string(),
        };

        let packing = method.packing.unwrap_or_default();
        match packing {
            ParamsPacking::Single if method.params.len() != 1 => {
                return Err(invalid("single params require exactly one parameter"));
            }
            ParamsPacking::Named if method.params.iter().any(|p| p.is_empty()) => {
                return Err(invalid("named params require every parameter to be named"));
            }
            _ => {}
        }
        if method.kind == DispatchKind::Notification && method.returns_future {
            return Err(invalid("a notification cannot return a future"));
        }

        let timeout = match method.timeout_ms {
            Some(ms) if ms < 0 => TimeoutPolicy::Disabled,
            Some(ms) if ms > 0 => TimeoutPolicy::After(Duration::from_millis(ms.unsigned_abs())),
            _ => match service.timeout_ms {
                Some(ms) if ms > 0 => TimeoutPolicy::After(Duration::from_millis(ms)),
                _ => TimeoutPolicy::Inherit,
            },
        };

        Ok(Self {
            name,
            kind: method.kind,
            packing,
            params: method.params,
            result_type: method.result_type,
            returns_future: method.returns_future,
            timeout,
        })
    }

    /// # Errors
    ///
    /// See [`ParamsPacking::unpack`].
    pub fn unpack(&self, params: Option<Value>) -> Result<Vec<Value>> {
        self.packing.unpack(params, self.params)
    }

    /// # Errors
    ///
    /// See [`ParamsPacking::pack`].
    pub fn pack(&self, args: Vec<Value>) -> Result<Option<Value>> {
        self.packing.pack(args, self.params)
    }
}

/// Memoizing resolver keyed by the descriptor's address.
///
/// Descriptors are emitted as statics, so the address identifies the
/// method for the lifetime of the process.
#[derive(Default)]
pub struct MappingResolver {
    cache: DashMap<usize, Arc<MethodMapping>, RandomState>,
}

impl MappingResolver {
    /// # Errors
    ///
    /// See [`MethodMapping::resolve`]. Failures are not cached.
    pub fn resolve(
        &self,
        service: &'static ServiceDescriptor,
        method: &'static MethodDescriptor,
    ) -> Result<Arc<MethodMapping>> {
        let key = std::ptr::from_ref(method) as usize;
        if let Some(mapping) = self.cache.get(&key) {
            return Ok(mapping.clone());
        }
        let mapping = Arc::new(MethodMapping::resolve(service, method)?);
        Ok(self.cache.entry(key).or_insert(mapping).clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl std::fmt::Debug for MappingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingResolver")
            .field("cached", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const fn method(ident: &'static str, params: &'static [&'static str]) -> MethodDescriptor {
        MethodDescriptor {
            ident,
            name: None,
            kind: DispatchKind::Request,
            packing: None,
            params,
            result_type: "i64",
            returns_future: false,
            timeout_ms: None,
        }
    }

    static SERVICE: ServiceDescriptor = ServiceDescriptor {
        name: "Math",
        base_path: Some("math"),
        timeout_ms: Some(500),
        methods: &[
            method("add", &["a", "b"]),
            MethodDescriptor {
                name: Some("sum"),
                timeout_ms: Some(50),
                ..method("total", &["values"])
            },
            MethodDescriptor {
                timeout_ms: Some(-1),
                packing: Some(ParamsPacking::Named),
                ..method("wait", &["ms"])
            },
        ],
    };

    static BARE: ServiceDescriptor = ServiceDescriptor {
        name: "Bare",
        base_path: None,
        timeout_ms: Some(0),
        methods: &[
            method("ping", &[]),
            MethodDescriptor {
                packing: Some(ParamsPacking::Single),
                ..method("echo", &["a", "b"])
            },
            MethodDescriptor {
                packing: Some(ParamsPacking::Named),
                ..method("named", &["a", ""])
            },
            MethodDescriptor {
                kind: DispatchKind::Notification,
                returns_future: true,
                ..method("tick", &[])
            },
        ],
    };

    #[test]
    fn test_names_and_timeouts() {
        let add = MethodMapping::resolve(&SERVICE, &SERVICE.methods[0]).unwrap();
        assert_eq!(add.name, "math/add");
        assert_eq!(add.packing, ParamsPacking::Positional);
        assert_eq!(add.timeout, TimeoutPolicy::After(Duration::from_millis(500)));

        let sum = MethodMapping::resolve(&SERVICE, &SERVICE.methods[1]).unwrap();
        assert_eq!(sum.name, "sum");
        assert_eq!(sum.timeout, TimeoutPolicy::After(Duration::from_millis(50)));

        let wait = MethodMapping::resolve(&SERVICE, &SERVICE.methods[2]).unwrap();
        assert_eq!(wait.timeout, TimeoutPolicy::Disabled);
        assert_eq!(wait.timeout.or(Some(Duration::from_secs(1))), None);

        let ping = MethodMapping::resolve(&BARE, &BARE.methods[0]).unwrap();
        assert_eq!(ping.name, "ping");
        assert_eq!(ping.timeout, TimeoutPolicy::Inherit);
        assert_eq!(
            ping.timeout.or(Some(Duration::from_secs(1))),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_invalid_mappings() {
        for method in &BARE.methods[1..] {
            let err = MethodMapping::resolve(&BARE, method).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidMapping);
        }
    }

    #[test]
    fn test_resolver_memoizes() {
        let resolver = MappingResolver::default();
        let a = resolver.resolve(&SERVICE, &SERVICE.methods[0]).unwrap();
        let b = resolver.resolve(&SERVICE, &SERVICE.methods[0]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(resolver.len(), 1);

        resolver.resolve(&BARE, &BARE.methods[1]).unwrap_err();
        assert_eq!(resolver.len(), 1);
    }
}
