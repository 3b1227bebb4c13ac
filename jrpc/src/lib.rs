#![forbid(unsafe_code)]

extern crate self as jrpc;

pub use jrpc_macro::service;
pub use serde_json;

mod error;
pub use error::{Error, ErrorKind, Result};

mod id;
pub use id::{Id, IdGenerator, SequenceIdGenerator};

mod msg;
pub use msg::{JSONRPC_VERSION, Message, Notification, Request, Response};

mod codec;
pub use codec::Codec;

pub mod params;
pub use params::ParamsPacking;

mod mapping;
pub use mapping::{
    DispatchKind, MappingResolver, MethodDescriptor, MethodMapping, ServiceDescriptor,
    TimeoutPolicy,
};

mod pending;
pub use pending::{PendingPool, PendingRequest};

mod response;
pub use response::ResponseFuture;

mod registry;
pub use registry::{HandlerRegistry, NotificationHandler, RequestHandler};

mod task_supervisor;
pub use task_supervisor::{TaskSupervisor, TaskSupervisorGuard};

mod transport;
pub use transport::Transport;

pub mod channel;
pub use channel::ChannelTransport;

pub mod stream;

mod context;
pub use context::Context;

mod endpoint;
pub use endpoint::{Endpoint, EndpointBuilder, EndpointConfig, Stats};

mod client;
pub use client::Client;

pub mod services;
