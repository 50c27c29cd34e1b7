//! The HTTP surface: unary calls over plain POST, streaming calls handed
//! off to the multiplexed transport through a connection upgrade.
//!
//! [`Handler`] implements [`tower_service::Service`] over `http` types and
//! can be mounted on any hyper-compatible server. Failures that occur
//! before an encoding has been negotiated — unknown paths, malformed or
//! unsupported media type headers, unreadable bodies — are reported as
//! plain text, the lowest common denominator; everything after negotiation
//! speaks the negotiated encoding, errors included.

mod upgrade;

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, ALLOW, CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderMap, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use tracing::debug;

use crate::call::{Call, CallOptions};
use crate::codec::MediaType;
use crate::context::Context;
use crate::error::{BoxError, BoxFuture};
use crate::interceptor::{Chain, Interceptor, MethodInfo};
use crate::negotiate::{self, NegotiateError};
use crate::service::{CallParams, Registry};
use crate::status::Status;
use crate::transport::MuxConfig;

const ACCEPT_POST: &str = "accept-post";
const X_CONTENT_TYPE_OPTIONS: &str = "x-content-type-options";

/// Advertised to clients once a path is known to name a real method.
const SUPPORTED_MEDIA_TYPES: &str =
    "application/protobuf, application/x-protobuf, application/json, text/plain";

/// Serves the registered services over HTTP.
///
/// ```no_run
/// # use trellis::{Handler, Method, Registry, Service};
/// # #[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
/// # struct Echo { #[prost(string, tag = "1")] text: String }
/// # impl trellis::Message for Echo {}
/// let mut registry = Registry::new();
/// registry.register(Service::new("demo", "Echo").method(Method::unary(
///     "Say",
///     |_ctx, input: Echo| async move { Ok(input) },
/// )));
/// let handler = Handler::builder(registry).build();
/// # drop(handler);
/// ```
#[derive(Clone)]
pub struct Handler {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) registry: Registry,
    pub(crate) chain: Chain,
    pub(crate) options: CallOptions,
    pub(crate) mux: MuxConfig,
}

impl Handler {
    /// Starts configuring a handler for `registry`.
    pub fn builder(registry: Registry) -> Builder {
        Builder {
            registry,
            interceptors: Vec::new(),
            options: CallOptions::default(),
            mux: MuxConfig::default(),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

/// Configures and builds a [`Handler`].
pub struct Builder {
    registry: Registry,
    interceptors: Vec<Arc<dyn Interceptor>>,
    options: CallOptions,
    mux: MuxConfig,
}

impl Builder {
    /// Appends an interceptor to the chain wrapping every unary invocation.
    pub fn interceptor(mut self, interceptor: impl Interceptor + 'static) -> Builder {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Capacity of the input queue for calls with streamed input.
    pub fn input_capacity(mut self, capacity: usize) -> Builder {
        self.options.input_capacity = capacity;
        self
    }

    /// How long a streaming call with non-streamed input may stay open
    /// before its mandatory input frame arrives.
    pub fn protocol_timeout(mut self, timeout: Duration) -> Builder {
        self.mux.protocol_timeout = timeout;
        self
    }

    /// The largest transport frame accepted or produced.
    pub fn max_frame_size(mut self, bytes: usize) -> Builder {
        self.mux.max_frame_size = bytes;
        self
    }

    /// Builds the handler.
    pub fn build(self) -> Handler {
        Handler {
            inner: Arc::new(Inner {
                registry: self.registry,
                chain: Chain::new(self.interceptors),
                options: self.options,
                mux: self.mux,
            }),
        }
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("registry", &self.registry)
            .field("interceptors", &self.interceptors.len())
            .finish_non_exhaustive()
    }
}

impl<B> tower_service::Service<Request<B>> for Handler
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(handle(inner, req).await) })
    }
}

async fn handle<B>(inner: Arc<Inner>, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let path = req.uri().path().to_owned();
    let (info, method) = match inner.registry.resolve(&path) {
        Some((service, method)) => (
            MethodInfo {
                service: service.path(),
                method: method.name().to_owned(),
            },
            method.clone(),
        ),
        None => {
            debug!(%path, "no method for path");
            return plain_response(
                StatusCode::NOT_FOUND,
                &Status::not_found(format!("no method handles {path}")),
                false,
            );
        }
    };

    if method.is_streaming() {
        return upgrade::handle(inner, method, info, req);
    }

    if req.method() != http::Method::POST {
        let mut response = plain_response(
            StatusCode::METHOD_NOT_ALLOWED,
            &Status::invalid_input(format!("{} is not supported, use POST", req.method())),
            true,
        );
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("POST"));
        return response;
    }

    let input_media = match negotiate::unmarshaler_for(req.headers()) {
        Ok(media) => media,
        Err(err) => return negotiate_failure(err),
    };
    let output_media = match negotiate::marshaler_for(req.headers(), input_media) {
        Ok(media) => media,
        Err(err) => return negotiate_failure(err),
    };

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            let err = err.into();
            return plain_response(
                StatusCode::BAD_REQUEST,
                &Status::invalid_input(format!("failed to read request body: {err}")),
                true,
            );
        }
    };

    let params = CallParams {
        ctx: Context::new(),
        info,
        input_media,
        output_media,
        chain: inner.chain.clone(),
        options: inner.options,
    };
    let Call {
        mut sink,
        mut source,
    } = method.new_call(params);

    if let Err(status) = sink.send(body).await {
        return error_response(&status, output_media);
    }
    match source.recv().await {
        Ok(Some(bytes)) => {
            let mut response = Response::new(Full::new(bytes));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(output_media.as_str()));
            standard_headers(response.headers_mut(), true);
            response
        }
        Ok(None) => error_response(
            &Status::unknown("call completed without a response"),
            output_media,
        ),
        Err(status) => error_response(&status, output_media),
    }
}

/// Cache and sniffing headers go on every response; the POST media type
/// advertisement only once the path is known to name a real method.
fn standard_headers(headers: &mut HeaderMap, advertise: bool) {
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        HeaderName::from_static(X_CONTENT_TYPE_OPTIONS),
        HeaderValue::from_static("nosniff"),
    );
    if advertise {
        headers.insert(
            HeaderName::from_static(ACCEPT_POST),
            HeaderValue::from_static(SUPPORTED_MEDIA_TYPES),
        );
    }
}

/// A text rendering of `status`, for failures that precede (or preclude)
/// encoding negotiation.
fn plain_response(code: StatusCode, status: &Status, advertise: bool) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(format!("{status}\n"))));
    *response.status_mut() = code;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    standard_headers(response.headers_mut(), advertise);
    response
}

fn negotiate_failure(err: NegotiateError) -> Response<Full<Bytes>> {
    let code = match &err {
        NegotiateError::Malformed(_) => StatusCode::BAD_REQUEST,
        NegotiateError::Unsupported(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        NegotiateError::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
    };
    plain_response(code, &Status::invalid_input(err.to_string()), true)
}

/// A call failure in the negotiated encoding, with the HTTP status derived
/// from the status code.
fn error_response(status: &Status, media: MediaType) -> Response<Full<Bytes>> {
    let body = media
        .marshal(&status.to_wire())
        .unwrap_or_else(|_| Bytes::from(format!("{status}\n")));
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status.code().http_status();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(media.as_str()));
    standard_headers(response.headers_mut(), true);
    response
}
