//! HTTP/1.1 transport.
//!
//! Accepts connections, normalizes each request into an [`InboundRequest`]
//! and writes back whatever the [`StubHandler`] decides.

use crate::matcher::{self, InboundRequest};
use crate::server::{ResponseDescriptor, StubHandler};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Serve connections from `listener` until `shutdown` completes.
pub async fn serve<H, F>(
    listener: TcpListener,
    handler: Arc<H>,
    shutdown: F,
) -> std::io::Result<()>
where
    H: StubHandler + 'static,
    F: Future<Output = ()>,
{
    info!(address = %listener.local_addr()?, "Stub server listening");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(connection) => connection,
                    Err(err) => {
                        warn!(error = %err, "Failed to accept connection");
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let handler = Arc::clone(&handler);

                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let handler = Arc::clone(&handler);
                        async move { handle_request(req, handler).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        debug!(remote = %remote, error = %err, "Connection closed with error");
                    }
                });
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received, no longer accepting connections");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_request<H>(
    req: Request<Incoming>,
    handler: Arc<H>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    H: StubHandler + ?Sized,
{
    let (parts, body) = req.into_parts();

    if parts.method == Method::GET && handler.status_path() == Some(parts.uri.path()) {
        return Ok(status_response(handler.as_ref()));
    }

    let limit = handler.body_limit();
    let body = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(
                method = %parts.method,
                path = %parts.uri.path(),
                limit,
                "Request body too large"
            );
            return Ok(payload_too_large(limit));
        }
        Err(err) => {
            debug!(error = %err, "Failed to read request body");
            return Ok(error_response(
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": "bad_request",
                    "message": "request body could not be read",
                }),
            ));
        }
    };

    let path = matcher::decode_path(parts.uri.path());
    let mut request = InboundRequest::new(parts.method.as_str(), path)
        .with_query_string(parts.uri.query().unwrap_or(""))
        .with_body(body.to_vec());
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            request.headers.append(name.as_str(), value);
        } else {
            debug!(header = %name, "Skipping non-text header value");
        }
    }

    let descriptor = handler.respond(&request).await;
    if let Some(latency) = descriptor.latency {
        tokio::time::sleep(latency).await;
    }

    Ok(into_response(descriptor))
}

fn status_response<H: StubHandler + ?Sized>(handler: &H) -> Response<Full<Bytes>> {
    let report = handler.status();
    match serde_json::to_vec_pretty(&report) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|_| internal_error()),
        Err(err) => {
            warn!(error = %err, "Failed to serialize status report");
            internal_error()
        }
    }
}

fn into_response(descriptor: ResponseDescriptor) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(descriptor.status);
    for (name, value) in descriptor.headers.iter() {
        builder = builder.header(name, value);
    }

    builder
        .body(Full::new(Bytes::from(descriptor.body)))
        .unwrap_or_else(|err| {
            warn!(
                stub_id = ?descriptor.declaration_id,
                error = %err,
                "Stub response cannot be encoded"
            );
            internal_error()
        })
}

fn payload_too_large(limit: usize) -> Response<Full<Bytes>> {
    error_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        serde_json::json!({
            "error": "payload_too_large",
            "message": format!("request body exceeds {} bytes", limit),
        }),
    )
}

fn error_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| internal_error())
}

fn internal_error() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(b"Internal Server Error")));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
