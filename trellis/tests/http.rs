//! Driving the HTTP handler with in-memory requests.

mod support;

use bytes::Bytes;
use http::{header, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use support::{response_from_json, EchoRequest, EchoResponse};
use tower::ServiceExt;
use trellis::{
    BoxError, Code, Handler, InputStream, Method, OutputSink, Registry, Service, Status,
    Validator,
};

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register(
        Service::new("demo.chat", "Echo")
            .method(Method::unary("Say", |_ctx, input: EchoRequest| async move {
                Ok::<_, BoxError>(EchoResponse { text: input.text })
            }))
            .method(Method::unary("Fail", |_ctx, _input: EchoRequest| async move {
                Err::<EchoResponse, BoxError>(Box::new(Status::not_found("no such room")))
            }))
            .method(Method::unary("Boom", |_ctx, _input: EchoRequest| async move {
                Err::<EchoResponse, BoxError>("panic in sector 7G".into())
            }))
            .method(Method::duplex_streaming(
                "Chat",
                |_ctx,
                 mut inputs: InputStream<EchoRequest>,
                 outputs: OutputSink<EchoResponse>| async move {
                    while let Some(input) = inputs.next().await {
                        outputs.send(EchoResponse { text: input.text }).await?;
                    }
                    Ok(())
                },
            )),
    );
    registry
}

fn handler() -> Handler {
    Handler::builder(registry()).build()
}

async fn send(
    handler: Handler,
    request: Request<Full<Bytes>>,
) -> (http::response::Parts, Bytes) {
    let response: Response<Full<Bytes>> = handler.oneshot(request).await.unwrap();
    let (parts, body) = response.into_parts();
    let body = body.collect().await.unwrap().to_bytes();
    (parts, body)
}

fn json_request(path: &str, text: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(support::request_json(text)))
        .unwrap()
}

#[tokio::test]
async fn unary_round_trip_over_json() {
    let (parts, body) = send(handler(), json_request("/demo.chat/Echo/Say", "hello")).await;

    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(
        parts.headers.get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(response_from_json(&body).text, "hello");
}

#[tokio::test]
async fn absent_accept_reuses_the_request_encoding() {
    // The server prefers binary protobuf, but a JSON request with no Accept
    // header gets a JSON response.
    let (parts, _body) = send(handler(), json_request("/demo.chat/Echo/Say", "x")).await;
    assert_eq!(
        parts.headers.get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
}

#[tokio::test]
async fn accept_weights_pick_the_response_encoding() {
    let request = Request::builder()
        .method("POST")
        .uri("/demo.chat/Echo/Say")
        .header(header::CONTENT_TYPE, "text/plain")
        .header(header::ACCEPT, "text/plain;q=0.5, application/json;q=0.9")
        .body(Full::new(support::request_json("weighted")))
        .unwrap();
    let (parts, body) = send(handler(), request).await;

    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(
        parts.headers.get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(response_from_json(&body).text, "weighted");
}

#[tokio::test]
async fn standard_headers_are_set_once_the_method_resolves() {
    let (parts, _body) = send(handler(), json_request("/demo.chat/Echo/Say", "x")).await;

    assert_eq!(parts.headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
    assert_eq!(
        parts.headers.get("x-content-type-options").unwrap(),
        "nosniff"
    );
    let advertised = parts.headers.get("accept-post").unwrap().to_str().unwrap();
    for media in trellis::MediaType::SUPPORTED {
        assert!(advertised.contains(media.as_str()), "{advertised}");
    }
}

#[tokio::test]
async fn unknown_paths_are_reported_in_text() {
    let (parts, body) = send(handler(), json_request("/demo.chat/Echo/Missing", "x")).await;

    assert_eq!(parts.status, StatusCode::NOT_FOUND);
    assert_eq!(parts.headers.get(header::CONTENT_TYPE).unwrap(), "text/plain");
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.starts_with("not_found:"), "{text}");
}

#[tokio::test]
async fn status_failures_map_to_http_statuses() {
    let (parts, body) = send(handler(), json_request("/demo.chat/Echo/Fail", "x")).await;

    assert_eq!(parts.status, StatusCode::NOT_FOUND);
    assert_eq!(
        parts.headers.get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let wire: trellis::wire::Error = serde_json::from_slice(&body).unwrap();
    let status = Status::from_wire(wire);
    assert_eq!(status.code(), Code::NOT_FOUND);
    assert_eq!(status.message(), "no such room");
}

#[tokio::test]
async fn arbitrary_failures_reach_the_client_redacted() {
    let (parts, body) = send(handler(), json_request("/demo.chat/Echo/Boom", "x")).await;

    assert_eq!(parts.status, StatusCode::INTERNAL_SERVER_ERROR);
    let wire: trellis::wire::Error = serde_json::from_slice(&body).unwrap();
    assert_eq!(wire.message, "internal error");
    assert!(!String::from_utf8_lossy(&body).contains("sector 7G"));
}

#[tokio::test]
async fn unsupported_content_type_is_415_with_the_offending_type() {
    let request = Request::builder()
        .method("POST")
        .uri("/demo.chat/Echo/Say")
        .header(header::CONTENT_TYPE, "application/xml")
        .body(Full::new(Bytes::from_static(b"<x/>")))
        .unwrap();
    let (parts, body) = send(handler(), request).await;

    assert_eq!(parts.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("application/xml"), "{text}");
}

#[tokio::test]
async fn missing_content_type_is_400() {
    let request = Request::builder()
        .method("POST")
        .uri("/demo.chat/Echo/Say")
        .body(Full::new(support::request_json("x")))
        .unwrap();
    let (parts, _body) = send(handler(), request).await;
    assert_eq!(parts.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn nothing_acceptable_is_406() {
    let request = Request::builder()
        .method("POST")
        .uri("/demo.chat/Echo/Say")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "application/xml")
        .body(Full::new(support::request_json("x")))
        .unwrap();
    let (parts, _body) = send(handler(), request).await;
    assert_eq!(parts.status, StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn non_post_methods_are_rejected() {
    let request = Request::builder()
        .method("GET")
        .uri("/demo.chat/Echo/Say")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let (parts, _body) = send(handler(), request).await;

    assert_eq!(parts.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(parts.headers.get(header::ALLOW).unwrap(), "POST");
}

#[tokio::test]
async fn validator_rejects_invalid_input_before_the_service() {
    let handler = Handler::builder(registry()).interceptor(Validator).build();
    // EchoRequest validation refuses an empty text.
    let (parts, body) = send(handler, json_request("/demo.chat/Echo/Say", "")).await;

    assert_eq!(parts.status, StatusCode::BAD_REQUEST);
    let wire: trellis::wire::Error = serde_json::from_slice(&body).unwrap();
    let status = Status::from_wire(wire);
    assert_eq!(status.code(), Code::INVALID_INPUT);
    assert!(status.message().contains("text must not be empty"));
}

#[tokio::test]
async fn streaming_methods_require_an_upgrade() {
    let (parts, body) = send(handler(), json_request("/demo.chat/Echo/Chat", "x")).await;

    assert_eq!(parts.status, StatusCode::UPGRADE_REQUIRED);
    assert_eq!(parts.headers.get(header::UPGRADE).unwrap(), "trellis");
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("requires a connection upgrade"), "{text}");
}

#[tokio::test]
async fn upgrade_requests_switch_protocols() {
    let request = Request::builder()
        .method("GET")
        .uri("/demo.chat/Echo/Chat")
        .header(header::CONNECTION, "Upgrade")
        .header(header::UPGRADE, "trellis+application.json")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let (parts, _body) = send(handler(), request).await;

    assert_eq!(parts.status, StatusCode::SWITCHING_PROTOCOLS);
    assert_eq!(
        parts.headers.get(header::UPGRADE).unwrap(),
        "trellis+application.json"
    );
    assert_eq!(parts.headers.get(header::CONNECTION).unwrap(), "upgrade");
}

#[tokio::test]
async fn unknown_upgrade_protocols_are_rejected() {
    let request = Request::builder()
        .method("GET")
        .uri("/demo.chat/Echo/Chat")
        .header(header::CONNECTION, "upgrade")
        .header(header::UPGRADE, "websocket")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let (parts, _body) = send(handler(), request).await;
    assert_eq!(parts.status, StatusCode::BAD_REQUEST);
}
