//! Built-in services.
//!
//! - MetaService: introspection of an endpoint's handlers and pending requests.

mod meta_service;
pub use meta_service::MetaService;
