//! Switching a streaming method onto the multiplexed transport.
//!
//! Streaming calls never run over plain POST. A client asks for the
//! persistent connection with `Connection: upgrade` and an `Upgrade` token
//! of the form `trellis+<type>.<subtype>`, where the suffix names the media
//! type every envelope on the connection is marshaled in (for example
//! `trellis+application.json`). The handler answers `101 Switching
//! Protocols` and hands the raw connection to the transport.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderValue, CONNECTION, UPGRADE};
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::Full;
use hyper_util::rt::TokioIo;
use tracing::debug;

use super::{plain_response, Inner};
use crate::codec::MediaType;
use crate::context::Context;
use crate::interceptor::MethodInfo;
use crate::service::Method;
use crate::status::Status;
use crate::transport::{serve_connection, CallTarget};

/// The fixed prefix of the upgrade sub-protocol token.
pub(crate) const PROTOCOL: &str = "trellis";

pub(super) fn handle<B>(
    inner: Arc<Inner>,
    method: Method,
    info: MethodInfo,
    mut req: Request<B>,
) -> Response<Full<Bytes>>
where
    B: Send + 'static,
{
    if !connection_requests_upgrade(req.headers()) {
        let mut response = plain_response(
            StatusCode::UPGRADE_REQUIRED,
            &Status::failed_precondition(format!(
                "{} is a streaming method and requires a connection upgrade",
                info.method,
            )),
            true,
        );
        response
            .headers_mut()
            .insert(UPGRADE, HeaderValue::from_static(PROTOCOL));
        return response;
    }

    let Some(token) = req.headers().get(UPGRADE).cloned() else {
        return plain_response(
            StatusCode::BAD_REQUEST,
            &Status::invalid_input("connection upgrade requested without an upgrade protocol"),
            true,
        );
    };
    let media = token
        .to_str()
        .ok()
        .and_then(|token| token.strip_prefix(PROTOCOL))
        .and_then(|rest| rest.strip_prefix('+'))
        .and_then(MediaType::from_subprotocol);
    let Some(media) = media else {
        return plain_response(
            StatusCode::BAD_REQUEST,
            &Status::invalid_input(format!("unsupported upgrade protocol {token:?}")),
            true,
        );
    };

    let target = CallTarget::new(method, info, inner.chain.clone(), inner.options);
    let config = inner.mux.clone();
    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let io = TokioIo::new(upgraded);
                if let Err(err) = serve_connection(io, target, media, config, Context::new()).await
                {
                    debug!("streaming connection ended: {err}");
                }
            }
            Err(err) => debug!("connection upgrade failed: {err}"),
        }
    });

    let mut response = Response::new(Full::default());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("upgrade"));
    response.headers_mut().insert(UPGRADE, token);
    super::standard_headers(response.headers_mut(), true);
    response
}

fn connection_requests_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(CONNECTION)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        })
        .unwrap_or(false)
}
