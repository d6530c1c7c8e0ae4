//! JSON query API over hyper.
//!
//! Every store read runs on the blocking pool. Malformed parameters answer
//! 400, store failures answer 500, anything unrouted answers 404 with the
//! list of endpoints.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Local;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use moodwatch_types::time::to_iso_millis;
use moodwatch_types::{Aggregate, Sample, SampleEvent, Status};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::metrics::{self, format_prometheus};
use super::AppState;
use crate::error::{PersistenceError, QueryError};
use crate::query::{format_date, HistoryParams, QueryService, RangeParams};
use crate::shutdown::stopped;

/// Routes advertised by the 404 response.
pub const ENDPOINTS: [&str; 6] = [
    "GET /health",
    "GET /samples",
    "GET /samples/latest",
    "GET /samples/stats",
    "GET /samples/range",
    "GET /metrics",
];

type Body = Full<Bytes>;

/// Accept connections until `shutdown` fires.
///
/// Open connections finish their current request and then close.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "HTTP API listening");

    loop {
        let (stream, peer) = tokio::select! {
            _ = stopped(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "Failed to accept HTTP connection");
                    continue;
                }
            },
        };

        tokio::spawn(serve_connection(
            stream,
            peer,
            state.clone(),
            shutdown.clone(),
        ));
    }

    info!("HTTP API stopped");
    Ok(())
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let service = service_fn(move |req: Request<Incoming>| {
        let state = state.clone();
        async move { Ok::<_, Infallible>(route(req.method(), req.uri(), &state).await) }
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    let mut conn = std::pin::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!(peer = %peer, error = %e, "HTTP connection error");
            }
        }
        _ = stopped(&mut shutdown) => {
            conn.as_mut().graceful_shutdown();
            let _ = conn.await;
        }
    }
}

/// Dispatch one request.
pub async fn route(method: &Method, uri: &Uri, state: &AppState) -> Response<Body> {
    if method != Method::GET {
        return not_found();
    }

    let query = uri.query();
    let result = match uri.path() {
        "/health" => Ok(health(state)),
        "/samples" => history(state, query).await,
        "/samples/latest" => latest(state).await,
        "/samples/stats" => stats(state).await,
        "/samples/range" => range(state, query).await,
        "/metrics" => Ok(prometheus(state)),
        _ => return not_found(),
    };

    result.unwrap_or_else(ApiError::into_response)
}

enum ApiError {
    Query(QueryError),
    Internal {
        context: &'static str,
        source: PersistenceError,
    },
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError::Query(err)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl ApiError {
    fn into_response(self) -> Response<Body> {
        match self {
            ApiError::Query(e) => {
                debug!(error = %e, "Rejected query");
                let message = e.to_string();
                json(
                    StatusCode::BAD_REQUEST,
                    &ErrorBody {
                        success: false,
                        error: &message,
                        message: None,
                    },
                )
            }
            ApiError::Internal { context, source } => {
                error!(error = %source, "{}", context);
                json(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &ErrorBody {
                        success: false,
                        error: context,
                        message: Some(source.to_string()),
                    },
                )
            }
        }
    }
}

/// Run a store query on the blocking pool.
async fn blocking<T, F>(state: &AppState, context: &'static str, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&QueryService) -> Result<T, PersistenceError> + Send + 'static,
    T: Send + 'static,
{
    let query = state.query.clone();
    tokio::task::spawn_blocking(move || f(&query))
        .await
        .map_err(PersistenceError::from)
        .and_then(|result| result)
        .map_err(|source| ApiError::Internal { context, source })
}

fn json<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    match serde_json::to_vec(body) {
        Ok(bytes) => respond(status, "application/json", bytes),
        Err(e) => {
            error!(error = %e, "Failed to serialize response");
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                "application/json",
                br#"{"success":false,"error":"Internal server error"}"#.to_vec(),
            )
        }
    }
}

fn respond(status: StatusCode, content_type: &'static str, body: Vec<u8>) -> Response<Body> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotFound {
    success: bool,
    error: &'static str,
    available_endpoints: &'static [&'static str],
}

fn not_found() -> Response<Body> {
    json(
        StatusCode::NOT_FOUND,
        &NotFound {
            success: false,
            error: "Endpoint not found",
            available_endpoints: &ENDPOINTS,
        },
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    status: &'static str,
    message: &'static str,
    timestamp: String,
    subscribers: usize,
    ingest: IngestHealth,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestHealth {
    cycles: u64,
    accepted: u64,
    failures: u64,
    last_error: Option<String>,
}

fn health(state: &AppState) -> Response<Body> {
    let ingest = state.ingest.snapshot();
    json(
        StatusCode::OK,
        &Health {
            status: "OK",
            message: "moodwatch is running",
            timestamp: to_iso_millis(&state.query.now()),
            subscribers: state.hub.subscriber_count(),
            ingest: IngestHealth {
                cycles: ingest.cycles,
                accepted: ingest.accepted,
                failures: ingest.fetch_failures
                    + ingest.parse_failures
                    + ingest.persistence_failures,
                last_error: ingest.last_error,
            },
        },
    )
}

#[derive(Serialize)]
struct HistoryItem {
    id: i64,
    value: f64,
    status: Status,
    time: String,
    date: String,
    timestamp: i64,
}

impl From<&Sample> for HistoryItem {
    fn from(sample: &Sample) -> Self {
        Self {
            id: sample.id,
            value: sample.value,
            status: sample.status,
            time: to_iso_millis(&sample.recorded_at),
            date: format_date(&sample.recorded_at, &Local),
            timestamp: sample.timestamp_ms(),
        }
    }
}

#[derive(Serialize)]
struct Pagination {
    page: u32,
    limit: u32,
    total: u64,
    pages: u64,
}

#[derive(Serialize)]
struct HistoryResponse {
    success: bool,
    data: Vec<HistoryItem>,
    pagination: Pagination,
    period: String,
}

async fn history(state: &AppState, query: Option<&str>) -> Result<Response<Body>, ApiError> {
    let params = HistoryParams::from_query(query)?;
    let page = blocking(state, "Failed to fetch historical data", move |q| {
        q.history(&params)
    })
    .await?;

    Ok(json(
        StatusCode::OK,
        &HistoryResponse {
            success: true,
            data: page.items.iter().map(HistoryItem::from).collect(),
            pagination: Pagination {
                page: page.page,
                limit: page.limit,
                total: page.total,
                pages: page.pages,
            },
            period: page.period,
        },
    ))
}

#[derive(Serialize)]
struct LatestResponse {
    success: bool,
    data: Option<SampleEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

async fn latest(state: &AppState) -> Result<Response<Body>, ApiError> {
    let data = blocking(state, "Failed to fetch latest data", |q| q.latest()).await?;
    let message = data.is_none().then_some("No data available");

    Ok(json(
        StatusCode::OK,
        &LatestResponse {
            success: true,
            data,
            message,
        },
    ))
}

#[derive(Serialize)]
struct Count {
    count: u64,
}

#[derive(Serialize)]
struct StatsResponse {
    success: bool,
    today: Aggregate,
    #[serde(rename = "allTime")]
    all_time: Aggregate,
    #[serde(rename = "last24h")]
    last_24h: Count,
    #[serde(rename = "lastUpdated")]
    last_updated: String,
}

async fn stats(state: &AppState) -> Result<Response<Body>, ApiError> {
    let stats = blocking(state, "Failed to fetch statistics", |q| q.stats()).await?;

    Ok(json(
        StatusCode::OK,
        &StatsResponse {
            success: true,
            today: stats.today,
            all_time: stats.all_time,
            last_24h: Count {
                count: stats.last_24h,
            },
            last_updated: to_iso_millis(&stats.last_updated),
        },
    ))
}

#[derive(Serialize)]
struct RangeItem {
    value: f64,
    status: Status,
    time: String,
    timestamp: i64,
}

#[derive(Serialize)]
struct Period {
    start: String,
    end: String,
}

#[derive(Serialize)]
struct RangeResponse {
    success: bool,
    data: Vec<RangeItem>,
    total: usize,
    period: Period,
}

async fn range(state: &AppState, query: Option<&str>) -> Result<Response<Body>, ApiError> {
    let params = RangeParams::from_query(query)?;
    let result = blocking(state, "Failed to fetch range data", move |q| q.range(&params)).await?;

    let data: Vec<RangeItem> = result
        .items
        .iter()
        .map(|s| RangeItem {
            value: s.value,
            status: s.status,
            time: to_iso_millis(&s.recorded_at),
            timestamp: s.timestamp_ms(),
        })
        .collect();

    Ok(json(
        StatusCode::OK,
        &RangeResponse {
            success: true,
            total: data.len(),
            data,
            period: Period {
                start: to_iso_millis(&result.start),
                end: to_iso_millis(&result.end),
            },
        },
    ))
}

fn prometheus(state: &AppState) -> Response<Body> {
    let body = format_prometheus(
        &state.ingest.snapshot(),
        &state.hub.stats(),
        state.metrics_namespace.as_deref(),
    );
    respond(StatusCode::OK, metrics::CONTENT_TYPE, body.into_bytes())
}
