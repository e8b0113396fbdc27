//! Access logging.
//!
//! The request path only builds an [`AccessRecord`] and offers it to a
//! bounded channel. A background writer turns records into `tracing`
//! events. When the channel is full or the writer is gone the record is
//! dropped and counted; the response is never delayed.

use axum::{
    body::Body,
    extract::Request,
    http::{Method, StatusCode},
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use metrics::{counter, histogram};
use serde::Serialize;
use std::{
    task::{Context, Poll},
    time::Instant,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower::{Layer, Service};
use tracing::{info, info_span, Instrument};

use super::client_addr::ClientAddr;
use super::request_id_of;

/// Default number of records buffered between requests and the writer.
pub const DEFAULT_CAPACITY: usize = 1024;

/// One completed request.
#[derive(Debug, Clone, Serialize)]
pub struct AccessRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    #[serde(with = "method_str")]
    pub method: Method,
    pub path: String,
    #[serde(with = "status_u16")]
    pub status: StatusCode,
    pub latency_ms: f64,
    pub client_addr: String,
}

mod method_str {
    use axum::http::Method;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(method: &Method, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(method.as_str())
    }
}

mod status_u16 {
    use axum::http::StatusCode;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(status: &StatusCode, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u16(status.as_u16())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Writer
// ═══════════════════════════════════════════════════════════════════════════════

/// Background task draining access records.
pub struct AccessLogWriter;

impl AccessLogWriter {
    /// Spawn the writer and return the layer feeding it.
    pub fn spawn(capacity: usize) -> (AccessLogLayer, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AccessRecord>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                info!(
                    target: "access_log",
                    request_id = %record.request_id,
                    method = %record.method,
                    path = %record.path,
                    status = record.status.as_u16(),
                    latency_ms = record.latency_ms,
                    client_addr = %record.client_addr,
                    "request"
                );
            }
        });

        (AccessLogLayer::new(tx), handle)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer and Service
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct AccessLogLayer {
    sender: mpsc::Sender<AccessRecord>,
}

impl AccessLogLayer {
    /// Feed records into an existing channel.
    pub fn new(sender: mpsc::Sender<AccessRecord>) -> Self {
        Self { sender }
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService {
            inner,
            sender: self.sender.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccessLogService<S> {
    inner: S,
    sender: mpsc::Sender<AccessRecord>,
}

impl<S> Service<Request<Body>> for AccessLogService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let sender = self.sender.clone();
        let mut inner = self.inner.clone();

        let start = Instant::now();
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let request_id = request_id_of(&request).unwrap_or_default();
        let client_addr = request
            .extensions()
            .get::<ClientAddr>()
            .copied()
            .unwrap_or(ClientAddr(None));

        let span = info_span!(
            "http_request",
            request_id = %request_id,
            method = %method,
            path = %path,
        );

        Box::pin(
            async move {
                let response = inner.call(request).await?;
                let elapsed = start.elapsed();
                let status = response.status();

                counter!(
                    "http_requests_total",
                    "method" => method.to_string(),
                    "status" => status.as_u16().to_string(),
                )
                .increment(1);
                histogram!("http_request_duration_seconds", "method" => method.to_string())
                    .record(elapsed.as_secs_f64());

                let record = AccessRecord {
                    timestamp: Utc::now(),
                    request_id,
                    method,
                    path,
                    status,
                    latency_ms: elapsed.as_secs_f64() * 1000.0,
                    client_addr: client_addr.to_string(),
                };

                if sender.try_send(record).is_err() {
                    counter!("access_log_dropped_total").increment(1);
                }

                Ok(response)
            }
            .instrument(span),
        )
    }
}
