//! A schema-driven RPC framework over HTTP.
//!
//! Services expose methods described by protobuf-style schemas in four call
//! shapes — unary, client-streaming, server-streaming and bidirectional —
//! with the wire encoding negotiated per request. Unary calls run over
//! plain `POST /<package>/<service>/<method>`; streaming calls share a
//! persistent upgraded connection, multiplexed by correlation id.
//!
//! # Overview
//!
//! - [`Service`], [`Method`] and [`Registry`] describe what a server
//!   exposes; the method constructors adapt plain async closures over
//!   [`Message`] types into [`Call`] state machines.
//! - [`Status`] and [`Code`] form the structured error model: code, message
//!   and an optional typed detail payload cross the wire, a diagnostic
//!   cause never does.
//! - [`Interceptor`] chains wrap unary invocations with cross-cutting
//!   policy; [`Validator`] is the built-in message-validation interceptor.
//! - [`Handler`] is the HTTP entry point, a [`tower_service::Service`]
//!   ready for hyper.
//! - [`transport`] multiplexes streaming calls over one connection with a
//!   single serializing writer and a per-call protocol state machine.
//!
//! # Example
//!
//! ```
//! use trellis::{BoxError, Method, Registry, Service};
//!
//! #[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
//! struct Greeting {
//!     #[prost(string, tag = "1")]
//!     name: String,
//! }
//!
//! impl trellis::Message for Greeting {}
//!
//! let mut registry = Registry::new();
//! registry.register(Service::new("demo.hello", "Greeter").method(Method::unary(
//!     "Greet",
//!     |_ctx, mut input: Greeting| async move {
//!         input.name = format!("hello, {}", input.name);
//!         Ok::<_, BoxError>(input)
//!     },
//! )));
//! assert!(registry.resolve("/demo.hello/Greeter/Greet").is_some());
//! ```

#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod call;
pub mod codec;
pub mod interceptor;
pub mod negotiate;
pub mod server;
pub mod service;
pub mod transport;
pub mod wire;

mod code;
mod context;
mod error;
mod status;

pub use crate::call::{Call, CallOptions, CallSink, CallSource, InputStream, OutputSink};
pub use crate::code::Code;
pub use crate::codec::{MediaType, Message};
pub use crate::context::Context;
pub use crate::error::BoxError;
pub use crate::interceptor::{AnyMessage, BoxMessage, Chain, Interceptor, MethodInfo, Validator};
pub use crate::server::Handler;
pub use crate::service::{CallParams, Method, Registry, Service};
pub use crate::status::Status;
