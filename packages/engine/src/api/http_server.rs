// packages/engine/src/api/http_server.rs
//! HTTP server for phase events and monitor control
//!
//! Plain HTTP/1.1 with JSON bodies. Every request is answered; engine
//! errors become `500` with an `{"error": ...}` body.

use crate::interception::correlator::{IgnoreReason, PhaseOutcome};
use crate::interception::phase::{
    BodySample, Header, HeadersReceived, RequestCompleted, RequestInitiated,
};
use crate::monitor::Monitor;
use crate::recording::exporter::{ExportArtifact, ExportFormat};
use crate::recording::record::RequestRecord;
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Phase-1 and phase-2 payloads carry the correlation key alongside the fields
#[derive(Debug, Deserialize)]
struct Keyed<T> {
    key: String,
    #[serde(flatten)]
    event: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletedPayload {
    key: String,
    #[serde(default, alias = "requestHeadersRaw")]
    request_headers: Vec<Header>,
    #[serde(default)]
    body_sample: Option<String>,
    #[serde(default)]
    body_unavailable: Option<String>,
}

impl CompletedPayload {
    fn into_event(self) -> (String, RequestCompleted) {
        let body = match (self.body_sample, self.body_unavailable) {
            (Some(sample), _) => Some(BodySample::Captured(Bytes::from(sample))),
            (None, Some(reason)) => Some(BodySample::Unavailable(reason)),
            (None, None) => None,
        };
        (
            self.key,
            RequestCompleted {
                request_headers: self.request_headers,
                body,
            },
        )
    }
}

#[derive(Debug, Deserialize)]
struct DomainPayload {
    domain: String,
}

#[derive(Debug, Serialize)]
struct PhaseReply {
    accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

impl From<PhaseOutcome> for PhaseReply {
    fn from(outcome: PhaseOutcome) -> Self {
        match outcome {
            PhaseOutcome::Accepted => Self {
                accepted: true,
                reason: None,
            },
            PhaseOutcome::Ignored(reason) => Self {
                accepted: false,
                reason: Some(reason_name(reason)),
            },
        }
    }
}

/// Reply to a phase-3 event; a queueing failure still carries the record
#[derive(Debug, Serialize)]
struct CompletedReply {
    finalized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<RequestRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CompletedReply {
    fn ignored() -> Self {
        Self {
            finalized: false,
            reason: Some(reason_name(IgnoreReason::UnknownKey)),
            record: None,
            error: None,
        }
    }

    fn finalized(record: RequestRecord, error: Option<String>) -> Self {
        Self {
            finalized: true,
            reason: None,
            record: Some(record),
            error,
        }
    }
}

fn reason_name(reason: IgnoreReason) -> &'static str {
    match reason {
        IgnoreReason::MonitoringStopped => "monitoringStopped",
        IgnoreReason::DomainExcluded => "domainExcluded",
        IgnoreReason::DuplicateKey => "duplicateKey",
        IgnoreReason::UnknownKey => "unknownKey",
    }
}

/// HTTP front end of a [`Monitor`]
pub struct HttpServer {
    addr: SocketAddr,
    monitor: Arc<Monitor>,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, monitor: Arc<Monitor>) -> Self {
        Self { addr, monitor }
    }

    /// Bind the configured address and serve until `cancel` fires
    pub async fn serve(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            EngineError::ServerError(format!("Failed to bind {}: {}", self.addr, e))
        })?;
        self.serve_listener(listener, cancel).await
    }

    /// Serve on an already bound listener until `cancel` fires
    pub async fn serve_listener(
        self: Arc<Self>,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<()> {
        let local = listener
            .local_addr()
            .map_err(|e| EngineError::ServerError(format!("Listener has no address: {}", e)))?;
        info!("HTTP API listening on {}", local);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("HTTP API stopped accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&self);

                        tokio::spawn(async move {
                            debug!("Accepted connection from {}", peer);

                            let io = TokioIo::new(stream);

                            let service = service_fn(move |req| {
                                let server = Arc::clone(&server);
                                async move { Ok::<_, Infallible>(server.handle_request(req).await) }
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!("Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }
    }

    async fn handle_request(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, &format!("Body read error: {}", e))
            }
        };

        self.route(&method, &path, body).await
    }

    /// Dispatch one request
    pub async fn route(&self, method: &Method, path: &str, body: Bytes) -> Response<Full<Bytes>> {
        debug!("{} {}", method, path);
        let monitor = &self.monitor;

        match (method, path) {
            (&Method::POST, "/events/request-initiated") => {
                match parse::<Keyed<RequestInitiated>>(&body) {
                    Ok(p) => json_response(StatusCode::OK, &PhaseReply::from(monitor.on_phase1(&p.key, p.event))),
                    Err(resp) => resp,
                }
            }
            (&Method::POST, "/events/headers-received") => {
                match parse::<Keyed<HeadersReceived>>(&body) {
                    Ok(p) => json_response(StatusCode::OK, &PhaseReply::from(monitor.on_phase2(&p.key, p.event))),
                    Err(resp) => resp,
                }
            }
            (&Method::POST, "/events/completed") => match parse::<CompletedPayload>(&body) {
                Ok(payload) => {
                    let (key, event) = payload.into_event();
                    match monitor.on_phase3(&key, event) {
                        None => json_response(StatusCode::OK, &CompletedReply::ignored()),
                        Some(outcome) => match outcome.queued {
                            Ok(()) => json_response(StatusCode::OK, &CompletedReply::finalized(outcome.record, None)),
                            Err(e) => json_response(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                &CompletedReply::finalized(outcome.record, Some(e.to_string())),
                            ),
                        },
                    }
                }
                Err(resp) => resp,
            },
            (&Method::POST, "/monitor/start") => {
                monitor.start();
                json_response(StatusCode::OK, &json!({ "monitoring": monitor.is_monitoring() }))
            }
            (&Method::POST, "/monitor/stop") => {
                monitor.stop();
                json_response(StatusCode::OK, &json!({ "monitoring": monitor.is_monitoring() }))
            }
            (&Method::GET, "/domains") => {
                json_response(StatusCode::OK, &monitor.list_disabled_domains())
            }
            (&Method::POST, "/domains/disable") => match parse::<DomainPayload>(&body) {
                Ok(p) => domains_reply(monitor.disable_domain(&p.domain).await, monitor),
                Err(resp) => resp,
            },
            (&Method::POST, "/domains/enable") => match parse::<DomainPayload>(&body) {
                Ok(p) => domains_reply(monitor.enable_domain(&p.domain).await, monitor),
                Err(resp) => resp,
            },
            (&Method::GET, "/records") => match monitor.get_all().await {
                Ok(records) => json_response(StatusCode::OK, &records),
                Err(e) => engine_error(e),
            },
            (&Method::GET, "/debug") => json_response(StatusCode::OK, &monitor.debug_snapshot().await),
            (&Method::GET, export) if export.starts_with("/export/") => {
                let format = match &export["/export/".len()..] {
                    "json" => ExportFormat::Json,
                    "csv" => ExportFormat::Csv,
                    "sql" => ExportFormat::SqlScript,
                    "archive" => ExportFormat::Archive,
                    _ => return error_response(StatusCode::NOT_FOUND, "Unknown export format"),
                };
                match monitor.export(format).await {
                    Ok(artifact) => artifact_response(artifact),
                    Err(e) => engine_error(e),
                }
            }
            _ => error_response(StatusCode::NOT_FOUND, "Not found"),
        }
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> std::result::Result<T, Response<Full<Bytes>>> {
    serde_json::from_slice(body).map_err(|e| {
        debug!("Rejected request body: {}", e);
        error_response(StatusCode::BAD_REQUEST, &format!("Invalid request body: {}", e))
    })
}

fn domains_reply(result: Result<()>, monitor: &Monitor) -> Response<Full<Bytes>> {
    match result {
        Ok(()) => json_response(StatusCode::OK, &monitor.list_disabled_domains()),
        Err(e) => engine_error(e),
    }
}

fn engine_error(e: EngineError) -> Response<Full<Bytes>> {
    error!("Request failed: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => response(status, "application/json", Bytes::from(body)),
        Err(e) => engine_error(EngineError::ExportFailed(format!("Response serialization error: {}", e))),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = json!({ "error": message }).to_string();
    response(status, "application/json", Bytes::from(body))
}

fn artifact_response(artifact: ExportArtifact) -> Response<Full<Bytes>> {
    let mut resp = response(
        StatusCode::OK,
        artifact.format.content_type(),
        Bytes::from(artifact.content),
    );
    let disposition = format!("attachment; filename=\"{}\"", artifact.filename);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        resp.headers_mut().insert(CONTENT_DISPOSITION, value);
    }
    resp
}

fn response(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}
