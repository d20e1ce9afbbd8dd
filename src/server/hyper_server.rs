//! Hyper-based JSON Gateway
//!
//! Plain hyper routing over the same coordinator as the gRPC service, for
//! clients that can't speak gRPC. Enabled by `network.http_bind_address`.

use hyper::body::to_bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE, ORIGIN};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpSocket;
use tracing::{debug, error, info};

use crate::models::coordinator::{EmbeddingCoordinator, EmbeddingRequest};
use crate::protocol::http::{
    HealthResponse, HttpEmbedBatchRequest, HttpEmbedBatchResponse, HttpEmbedRequest,
    HttpEmbedResponse, HttpErrorResponse,
};
use crate::server::server::ServerError;

/// Bind the gateway socket with `SO_REUSEADDR` and optional `TCP_NODELAY`
pub fn bind_http_listener(
    bind_address: &str,
    nodelay: bool,
) -> Result<std::net::TcpListener, ServerError> {
    let addr: SocketAddr = bind_address.parse()?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_nodelay(nodelay)?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;

    let listener = socket.listen(1024)?;
    Ok(listener.into_std()?)
}

/// Serve the JSON gateway on `listener` until `shutdown` resolves
pub async fn serve_http<F>(
    listener: std::net::TcpListener,
    coordinator: Arc<EmbeddingCoordinator>,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr()?;

    let make_svc = make_service_fn(move |_| {
        let coordinator = Arc::clone(&coordinator);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                handle_request(req, Arc::clone(&coordinator))
            }))
        }
    });

    let server = Server::from_tcp(listener)?
        .http1_keepalive(true)
        .http1_half_close(false)
        .tcp_sleep_on_accept_errors(true)
        .serve(make_svc)
        .with_graceful_shutdown(shutdown);

    info!("✅ HTTP gateway listening on {}", local_addr);
    info!("📍 POST /embed, POST /embed_batch, GET /health, GET /");

    server.await?;
    info!("HTTP gateway stopped");
    Ok(())
}

async fn handle_request(
    req: Request<Body>,
    coordinator: Arc<EmbeddingCoordinator>,
) -> Result<Response<Body>, Infallible> {
    let origin = req
        .headers()
        .get(ORIGIN)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = match (&method, path.as_str()) {
        (&Method::POST, "/embed") => handle_embed(req, &coordinator).await,
        (&Method::POST, "/embed_batch") => handle_embed_batch(req, &coordinator).await,
        (&Method::GET, "/health") => handle_health(&coordinator),
        (&Method::GET, "/") => handle_root(&coordinator),
        (&Method::OPTIONS, _) => empty_response(StatusCode::NO_CONTENT),
        _ => json_response(StatusCode::NOT_FOUND, &HttpErrorResponse::not_found()),
    };

    let headers = response.headers_mut();
    headers.insert("access-control-allow-origin", origin);
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type"),
    );

    Ok(response)
}

fn handle_root(coordinator: &EmbeddingCoordinator) -> Response<Body> {
    let info = serde_json::json!({
        "name": "Embedding Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "grpc_service": "tei.v1.Embed",
        "endpoints": {
            "embed": { "method": "POST", "path": "/embed" },
            "embed_batch": { "method": "POST", "path": "/embed_batch" },
            "health": { "method": "GET", "path": "/health" }
        },
        "default_model": coordinator.default_model(),
    });
    json_response(StatusCode::OK, &info)
}

/// Reports loaded models and pool occupancy; never triggers a model load.
fn handle_health(coordinator: &EmbeddingCoordinator) -> Response<Body> {
    debug!("🏥 Health check requested");

    let health = HealthResponse::new(
        coordinator.default_model(),
        coordinator.registry().loaded_models(),
        coordinator.pool_stats(),
    );
    let status = if health.pool.closed {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    json_response(status, &health)
}

async fn handle_embed(req: Request<Body>, coordinator: &EmbeddingCoordinator) -> Response<Body> {
    let request: HttpEmbedRequest = match read_json(req).await {
        Ok(request) => request,
        Err(response) => return response,
    };

    let embedding_request = EmbeddingRequest::single(request.text, request.model);
    match coordinator.embed(embedding_request).await {
        Ok(mut output) => {
            let response = HttpEmbedResponse {
                embedding: output.vectors.pop().unwrap_or_default(),
                model: output.model,
            };
            json_response(StatusCode::OK, &response)
        }
        Err(e) => embedding_error_response(&e),
    }
}

async fn handle_embed_batch(
    req: Request<Body>,
    coordinator: &EmbeddingCoordinator,
) -> Response<Body> {
    let request: HttpEmbedBatchRequest = match read_json(req).await {
        Ok(request) => request,
        Err(response) => return response,
    };

    match coordinator
        .embed(EmbeddingRequest::new(request.texts, request.model))
        .await
    {
        Ok(output) => json_response(
            StatusCode::OK,
            &HttpEmbedBatchResponse {
                embeddings: output.vectors,
                model: output.model,
            },
        ),
        Err(e) => embedding_error_response(&e),
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    req: Request<Body>,
) -> Result<T, Response<Body>> {
    let body = to_bytes(req.into_body()).await.map_err(|e| {
        json_response(
            StatusCode::BAD_REQUEST,
            &HttpErrorResponse::new("Failed to read request body").with_details(e.to_string()),
        )
    })?;

    serde_json::from_slice(&body).map_err(|e| {
        json_response(
            StatusCode::BAD_REQUEST,
            &HttpErrorResponse::invalid_json(e.to_string()),
        )
    })
}

fn embedding_error_response(error: &crate::models::EmbeddingError) -> Response<Body> {
    error!("❌ Embedding request failed: {}", error);
    let (status, body) = HttpErrorResponse::from_embedding_error(error);
    json_response(status, &body)
}

fn empty_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    match serde_json::to_vec(body) {
        Ok(bytes) => {
            let mut response = Response::new(Body::from(bytes));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            error!("❌ Failed to serialize response: {}", e);
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
