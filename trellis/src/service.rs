//! Services, methods and the startup registry.
//!
//! A [`Method`] is stateless and reusable: it knows its call shape and how
//! to build a fresh [`Call`] for one invocation. A [`Service`] groups
//! methods under a `package` + `name` identity, and the [`Registry`] maps
//! request paths onto them. Registration happens once at startup; lookups
//! after that are read-only and need no synchronization.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::call::{self, Call, CallOptions};
use crate::codec::{MediaType, Message};
use crate::context::Context;
use crate::error::{BoxError, BoxFuture};
use crate::interceptor::{Chain, MethodInfo};

/// Everything a [`Method`] needs to create one [`Call`].
#[derive(Clone, Debug)]
pub struct CallParams {
    /// The cancellable context scoping the call.
    pub ctx: Context,
    /// Identifies the invocation to interceptors.
    pub info: MethodInfo,
    /// The encoding request messages arrive in.
    pub input_media: MediaType,
    /// The encoding response messages leave in.
    pub output_media: MediaType,
    /// The interceptor chain wrapping the invocation.
    pub chain: Chain,
    /// Per-call tunables.
    pub options: CallOptions,
}

type CallFactory = Arc<dyn Fn(CallParams) -> Call + Send + Sync>;

/// One schema method: a name, the shape of its input and output, and a
/// factory for fresh calls.
#[derive(Clone)]
pub struct Method {
    name: String,
    client_streaming: bool,
    server_streaming: bool,
    factory: CallFactory,
}

impl Method {
    /// A method taking one input message and returning one output message.
    pub fn unary<In, Out, H, Fut>(name: impl Into<String>, handler: H) -> Method
    where
        In: Message,
        Out: Message,
        H: Fn(Context, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, BoxError>> + Send + 'static,
    {
        let handler: call::UnaryHandler<In, Out> = Arc::new(
            move |ctx: Context, input: In| -> BoxFuture<'static, Result<Out, BoxError>> {
                Box::pin(handler(ctx, input))
            },
        );
        Method {
            name: name.into(),
            client_streaming: false,
            server_streaming: false,
            factory: Arc::new(move |params: CallParams| {
                call::unary::new_call(
                    params.ctx,
                    params.info,
                    params.input_media,
                    params.output_media,
                    params.chain,
                    handler.clone(),
                )
            }),
        }
    }

    /// A method consuming a stream of inputs and returning one output.
    /// The handler runs once, after end-of-input, with every message in the
    /// order it was sent.
    pub fn client_streaming<In, Out, H, Fut>(name: impl Into<String>, handler: H) -> Method
    where
        In: Message,
        Out: Message,
        H: Fn(Context, Vec<In>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, BoxError>> + Send + 'static,
    {
        let handler: call::ClientStreamingHandler<In, Out> = Arc::new(
            move |ctx: Context, inputs: Vec<In>| -> BoxFuture<'static, Result<Out, BoxError>> {
                Box::pin(handler(ctx, inputs))
            },
        );
        Method {
            name: name.into(),
            client_streaming: true,
            server_streaming: false,
            factory: Arc::new(move |params: CallParams| {
                call::client::new_call(
                    params.ctx,
                    params.input_media,
                    params.output_media,
                    params.options,
                    handler.clone(),
                )
            }),
        }
    }

    /// A method taking one input and producing a stream of outputs through
    /// the provided sink.
    pub fn server_streaming<In, Out, H, Fut>(name: impl Into<String>, handler: H) -> Method
    where
        In: Message,
        Out: Message,
        H: Fn(Context, In, call::OutputSink<Out>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let handler: call::ServerStreamingHandler<In, Out> = Arc::new(
            move |ctx: Context,
                  input: In,
                  sink: call::OutputSink<Out>|
                  -> BoxFuture<'static, Result<(), BoxError>> {
                Box::pin(handler(ctx, input, sink))
            },
        );
        Method {
            name: name.into(),
            client_streaming: false,
            server_streaming: true,
            factory: Arc::new(move |params: CallParams| {
                call::server::new_call(
                    params.ctx,
                    params.input_media,
                    params.output_media,
                    handler.clone(),
                )
            }),
        }
    }

    /// A method streaming in both directions, with input and output live
    /// simultaneously for the whole call.
    pub fn duplex_streaming<In, Out, H, Fut>(name: impl Into<String>, handler: H) -> Method
    where
        In: Message,
        Out: Message,
        H: Fn(Context, call::InputStream<In>, call::OutputSink<Out>) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let handler: call::DuplexHandler<In, Out> = Arc::new(
            move |ctx: Context,
                  inputs: call::InputStream<In>,
                  outputs: call::OutputSink<Out>|
                  -> BoxFuture<'static, Result<(), BoxError>> {
                Box::pin(handler(ctx, inputs, outputs))
            },
        );
        Method {
            name: name.into(),
            client_streaming: true,
            server_streaming: true,
            factory: Arc::new(move |params: CallParams| {
                call::duplex::new_call(
                    params.ctx,
                    params.input_media,
                    params.output_media,
                    handler.clone(),
                )
            }),
        }
    }

    /// The method's name within its service.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the input is a stream of messages.
    pub fn is_client_streaming(&self) -> bool {
        self.client_streaming
    }

    /// Whether the output is a stream of messages.
    pub fn is_server_streaming(&self) -> bool {
        self.server_streaming
    }

    /// Whether either direction is a stream. Streaming methods run over the
    /// multiplexed transport; only fully unary methods run over plain POST.
    pub fn is_streaming(&self) -> bool {
        self.client_streaming || self.server_streaming
    }

    /// Creates a fresh call for one invocation. Calls are single-use; the
    /// returned value must be driven to completion and then discarded.
    pub fn new_call(&self, params: CallParams) -> Call {
        (self.factory)(params)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("client_streaming", &self.client_streaming)
            .field("server_streaming", &self.server_streaming)
            .finish()
    }
}

/// A named group of methods, identified by `package` and `name`.
#[derive(Clone, Debug)]
pub struct Service {
    package: String,
    name: String,
    methods: HashMap<String, Method>,
}

impl Service {
    /// Creates an empty service.
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Service {
        Service {
            package: package.into(),
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Adds a method. A method with the same name replaces the earlier one.
    pub fn method(mut self, method: Method) -> Service {
        self.methods.insert(method.name().to_owned(), method);
        self
    }

    /// The service's package.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// The service's name within its package.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `package/name` path identifying this service externally.
    pub fn path(&self) -> String {
        format!("{}/{}", self.package, self.name)
    }

    /// Looks up a method by name.
    pub fn get(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }
}

/// All services exposed by a server. Populated once at startup.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    services: HashMap<String, Service>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Registers a service. A service with the same `package/name` path
    /// replaces the earlier registration.
    pub fn register(&mut self, service: Service) {
        self.services.insert(service.path(), service);
    }

    /// Looks up a service by its `package/name` path.
    pub fn service(&self, path: &str) -> Option<&Service> {
        self.services.get(path)
    }

    /// Resolves a request path of the form `/<package>/<service>/<method>`.
    pub fn resolve(&self, url_path: &str) -> Option<(&Service, &Method)> {
        let mut segments = url_path.trim_start_matches('/').splitn(3, '/');
        let package = segments.next().filter(|s| !s.is_empty())?;
        let service_name = segments.next().filter(|s| !s.is_empty())?;
        let method_name = segments
            .next()
            .filter(|s| !s.is_empty() && !s.contains('/'))?;

        let service = self.services.get(&format!("{package}/{service_name}"))?;
        let method = service.get(method_name)?;
        Some((service, method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    struct Empty {}

    impl Message for Empty {}

    fn noop_method(name: &str) -> Method {
        Method::unary(name, |_ctx, input: Empty| async move {
            Ok::<Empty, BoxError>(input)
        })
    }

    #[test]
    fn resolve_requires_three_segments() {
        let mut registry = Registry::new();
        registry.register(
            Service::new("acme.search", "Indexer").method(noop_method("Flush")),
        );

        assert!(registry.resolve("/acme.search/Indexer/Flush").is_some());
        assert!(registry.resolve("acme.search/Indexer/Flush").is_some());
        assert!(registry.resolve("/acme.search/Indexer").is_none());
        assert!(registry.resolve("/acme.search/Indexer/Flush/extra").is_none());
        assert!(registry.resolve("/acme.search/Indexer/Missing").is_none());
        assert!(registry.resolve("/other/Indexer/Flush").is_none());
    }

    #[test]
    fn duplicate_registrations_last_write_wins() {
        let mut registry = Registry::new();
        registry.register(Service::new("acme", "Widget").method(noop_method("Old")));
        registry.register(Service::new("acme", "Widget").method(noop_method("New")));

        assert!(registry.resolve("/acme/Widget/New").is_some());
        assert!(registry.resolve("/acme/Widget/Old").is_none());

        let service = Service::new("acme", "Widget")
            .method(noop_method("M"))
            .method(Method::client_streaming("M", |_ctx, inputs: Vec<Empty>| async move {
                let _ = inputs;
                Ok::<Empty, BoxError>(Empty {})
            }));
        assert!(service.get("M").unwrap().is_client_streaming());
    }

    #[test]
    fn shape_flags() {
        assert!(!noop_method("U").is_streaming());
        let duplex = Method::duplex_streaming(
            "D",
            |_ctx, _inputs: crate::call::InputStream<Empty>, _outputs: crate::call::OutputSink<Empty>| async move {
                Ok::<(), BoxError>(())
            },
        );
        assert!(duplex.is_client_streaming());
        assert!(duplex.is_server_streaming());
        assert!(duplex.is_streaming());
    }
}
