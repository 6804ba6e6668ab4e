//! HTTP front end of the bridge
//!
//! Exposes `GET /health`, `POST /publish` and `GET /metrics` with warp.
//! Every response body, success or failure, is `{"message": ...}` except
//! the 204 returned by a successful publish and the metrics snapshot.

use crate::bridge::ConnectionManager;
use crate::config::{ConfigError, HttpSection};
use crate::error::BridgeError;
use crate::observability::metrics;
use crate::protocol::{prepare_message, BaseResponse};
use crate::request_span;
use crate::transport::Transport;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};
use warp::http::StatusCode;
use warp::reject::Reject;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// HTTP server wiring the routes to a connection manager
pub struct BridgeServer<T>
where
    T: Transport + 'static,
{
    config: HttpSection,
    manager: Arc<ConnectionManager<T>>,
}

impl<T> BridgeServer<T>
where
    T: Transport + 'static,
{
    pub fn new(config: HttpSection, manager: Arc<ConnectionManager<T>>) -> Self {
        Self { config, manager }
    }

    /// Socket address from the configured bind address and port
    pub fn bind_address(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.config.bind_address.parse().map_err(|_| {
            ConfigError::InvalidConfig(format!(
                "http.bind_address '{}' is not an IP address",
                self.config.bind_address
            ))
        })?;
        Ok(SocketAddr::new(ip, self.config.port))
    }

    /// Serve until `shutdown` resolves, then finish in-flight requests
    pub async fn run<F>(self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.bind_address()?;
        let routes = routes(self.manager, self.config.body_limit_bytes);

        let (bound, server) = warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown)?;
        info!("HTTP server listening on {}", bound);

        server.await;
        info!("HTTP server stopped");
        Ok(())
    }
}

/// All bridge routes, with rejections turned into JSON responses
pub fn routes<T>(
    manager: Arc<ConnectionManager<T>>,
    body_limit_bytes: u64,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone
where
    T: Transport + 'static,
{
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&BaseResponse::new("OK")));

    let publish = warp::path("publish")
        .and(warp::path::end())
        .and(warp::post())
        .and(limited_body(body_limit_bytes))
        .and(with_manager(manager))
        .and_then(handle_publish);

    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&metrics().get_metrics()));

    health
        .or(publish)
        .or(metrics_route)
        .recover(handle_rejection)
        .with(warp::trace::request())
}

fn with_manager<T>(
    manager: Arc<ConnectionManager<T>>,
) -> impl Filter<Extract = (Arc<ConnectionManager<T>>,), Error = Infallible> + Clone
where
    T: Transport + 'static,
{
    warp::any().map(move || Arc::clone(&manager))
}

/// Request body exceeded the configured limit
#[derive(Debug)]
struct BodyTooLarge;

impl Reject for BodyTooLarge {}

/// Request body could not be read off the connection
#[derive(Debug)]
struct BodyReadFailed(String);

impl Reject for BodyReadFailed {}

/// Whole request body, capped at `limit` bytes
///
/// A declared Content-Length over the limit is refused before reading.
/// Bodies without one (chunked) are accepted and cut off once they grow
/// past the limit.
fn limited_body(limit: u64) -> impl Filter<Extract = (Bytes,), Error = Rejection> + Clone {
    warp::header::optional::<u64>("content-length")
        .and_then(move |declared: Option<u64>| async move {
            match declared {
                Some(length) if length > limit => Err(warp::reject::custom(BodyTooLarge)),
                _ => Ok(()),
            }
        })
        .untuple_one()
        .and(warp::body::stream())
        .and_then(move |stream| collect_body(stream, limit))
}

async fn collect_body<S, B>(stream: S, limit: u64) -> Result<Bytes, Rejection>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    let mut body = BytesMut::new();

    futures::pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| warp::reject::custom(BodyReadFailed(e.to_string())))?;
        if body.len().saturating_add(chunk.remaining()) > limit {
            return Err(warp::reject::custom(BodyTooLarge));
        }
        body.put(chunk);
    }

    Ok(body.freeze())
}

/// Validate, publish, and map the outcome to a status code
async fn handle_publish<T>(
    body: Bytes,
    manager: Arc<ConnectionManager<T>>,
) -> Result<Response, Infallible>
where
    T: Transport + 'static,
{
    let span = request_span!(method = "POST", path = "/publish", body_bytes = body.len());

    async move {
        metrics().publish_request_received();

        let result = match prepare_message(&body) {
            Ok(message) => manager.publish(&message).await,
            Err(e) => Err(e),
        };

        Ok(match result {
            Ok(()) => {
                info!(status = 204, "Publish accepted by broker");
                warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT).into_response()
            }
            Err(e) => error_response(&e),
        })
    }
    .instrument(span)
    .await
}

/// Log an error once and build its JSON response
fn error_response(error: &BridgeError) -> Response {
    let status = error.status_code();
    if error.is_client_error() {
        metrics().publish_request_rejected();
        warn!(status = status.as_u16(), error = %error, "Publish request rejected");
    } else {
        metrics().publish_request_failed();
        error!(status = status.as_u16(), error = %error, "Publish request failed");
    }
    json_message(error.to_response(), status)
}

fn json_message(body: BaseResponse, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

/// Map warp rejections onto `{"message": ...}` responses
async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let status = if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.find::<BodyTooLarge>().is_some() {
        StatusCode::PAYLOAD_TOO_LARGE
    } else if let Some(BodyReadFailed(reason)) = err.find::<BodyReadFailed>() {
        warn!("Failed to read request body: {}", reason);
        StatusCode::BAD_REQUEST
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        StatusCode::METHOD_NOT_ALLOWED
    } else {
        error!("Unhandled rejection: {:?}", err);
        StatusCode::INTERNAL_SERVER_ERROR
    };

    let reason = status.canonical_reason().unwrap_or("Unknown Error");
    Ok(json_message(BaseResponse::new(reason), status))
}
