//! Read/query HTTP surface over the keyed store and the landed objects, plus
//! an on-demand generator endpoint.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use energy_client::{
    db::{PageToken, RecordQuery, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT},
    domain::{parse_timestamp, EnergyRecord},
};
use serde::{Deserialize, Serialize};
use time::{macros::format_description, OffsetDateTime, PrimitiveDateTime};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::blob::{validate_object_name, BlobStore, LandingWriter, JSON_CONTENT_TYPE};
use crate::pipeline::{storage_timeout, PipelineError, StorageError};
use crate::sinks::KeyedStore;
use crate::sources::{generator::parse_site_ids, Generator};

pub struct AppState {
    pub records: Arc<dyn KeyedStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub landing: LandingWriter,
    pub generator: Mutex<Generator>,
    pub default_sites: Vec<String>,
    pub default_batch_size: usize,
    pub io_timeout: Duration,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/records", get(get_records))
        .route("/anomalies/:site_id", get(get_anomalies))
        .route("/all-records", get(get_all_records))
        .route("/files", get(get_files))
        .route("/file/:name", get(get_file))
        .route("/simulatedata", post(post_simulate))
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, bind_addr: &str, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind API listener on {bind_addr}: {e}"))?;
    tracing::info!(addr = %bind_addr, "API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, message = %self.message, "API request failed");
        }
        let body = Json(ErrorResponse {
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        let status = match &e {
            StorageError::NotFound(_) => StatusCode::NOT_FOUND,
            StorageError::InvalidName(_) => StatusCode::BAD_REQUEST,
            StorageError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            StorageError::AlreadyExists(_) => StatusCode::CONFLICT,
            StorageError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Storage(e) => e.into(),
            PipelineError::Config(_) | PipelineError::Validation(_) => Self::bad_request(e.to_string()),
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

/// RFC 3339, or an offset-less `YYYY-MM-DDTHH:MM:SS[.f]` read as UTC.
fn parse_query_time(field: &str, value: &str) -> Result<OffsetDateTime, ApiError> {
    if let Ok(ts) = parse_timestamp(value) {
        return Ok(ts);
    }
    let naive = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    let naive_fractional = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");
    PrimitiveDateTime::parse(value, &naive)
        .or_else(|_| PrimitiveDateTime::parse(value, &naive_fractional))
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|_| ApiError::bad_request(format!("{field} is not a valid timestamp: {value}")))
}

fn parse_token(value: Option<&str>) -> Result<Option<PageToken>, ApiError> {
    value
        .map(|t| {
            t.parse::<PageToken>()
                .map_err(|e| ApiError::bad_request(format!("invalid next_token: {e}")))
        })
        .transpose()
}

fn page_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

#[derive(Debug, Serialize)]
struct RecordsPage {
    items: Vec<EnergyRecord>,
    next_token: Option<PageToken>,
}

#[derive(Debug, Deserialize)]
struct RecordsParams {
    site_id: Option<String>,
    start: Option<String>,
    end: Option<String>,
    limit: Option<usize>,
    next_token: Option<String>,
}

async fn get_records(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecordsParams>,
) -> Result<Json<RecordsPage>, ApiError> {
    let site_id = params
        .site_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("site_id is required"))?;

    let mut query = RecordQuery::for_site(site_id);
    query.start = params.start.as_deref().map(|v| parse_query_time("start", v)).transpose()?;
    query.end = params.end.as_deref().map(|v| parse_query_time("end", v)).transpose()?;
    if let (Some(start), Some(end)) = (query.start, query.end) {
        if start > end {
            return Err(ApiError::bad_request("start must not be after end"));
        }
    }
    query.after = parse_token(params.next_token.as_deref())?;
    query.limit = page_limit(params.limit);

    run_query(&state, &query).await
}

#[derive(Debug, Deserialize)]
struct PageParams {
    limit: Option<usize>,
    next_token: Option<String>,
}

async fn get_anomalies(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<RecordsPage>, ApiError> {
    let mut query = RecordQuery::for_site(site_id);
    query.anomalies_only = true;
    query.after = parse_token(params.next_token.as_deref())?;
    query.limit = page_limit(params.limit);

    run_query(&state, &query).await
}

async fn run_query(state: &AppState, query: &RecordQuery) -> Result<Json<RecordsPage>, ApiError> {
    let page = storage_timeout("keyed query", state.io_timeout, state.records.query(query)).await?;
    Ok(Json(RecordsPage {
        items: page.items,
        next_token: page.next_token,
    }))
}

#[derive(Debug, Deserialize)]
struct ScanParams {
    limit: Option<usize>,
}

async fn get_all_records(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ScanParams>,
) -> Result<Json<Vec<EnergyRecord>>, ApiError> {
    let limit = page_limit(params.limit);
    let rows = storage_timeout("keyed scan", state.io_timeout, state.records.scan(limit)).await?;
    Ok(Json(rows))
}

async fn get_files(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, ApiError> {
    let names = storage_timeout("blob list", state.io_timeout, state.blobs.list()).await?;
    Ok(Json(names))
}

async fn get_file(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Result<Response, ApiError> {
    validate_object_name(&name)?;
    let bytes = storage_timeout("blob get", state.io_timeout, state.blobs.get(&name)).await?;
    Ok(([(header::CONTENT_TYPE, JSON_CONTENT_TYPE)], bytes).into_response())
}

#[derive(Debug, Deserialize)]
struct SimulateParams {
    batch_size: Option<usize>,
    /// Comma-separated site ids.
    sites: Option<String>,
}

#[derive(Debug, Serialize)]
struct SimulateResponse {
    object: String,
    readings: usize,
}

async fn post_simulate(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SimulateParams>,
) -> Result<(StatusCode, Json<SimulateResponse>), ApiError> {
    let batch_size = params.batch_size.unwrap_or(state.default_batch_size);
    let sites = match params.sites.as_deref() {
        Some(csv) => parse_site_ids(csv),
        None => state.default_sites.clone(),
    };

    let readings = state.generator.lock().await.generate(batch_size, &sites)?;
    let object = state.landing.write(&readings).await?;

    Ok((
        StatusCode::CREATED,
        Json(SimulateResponse {
            object,
            readings: readings.len(),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::sinks::MemoryKeyedStore;
    use axum::body::Body;
    use axum::http::Request;
    use rust_decimal::Decimal;
    use serde_json::Value;
    use time::macros::datetime;
    use tower::ServiceExt;

    fn state_with(records: Arc<MemoryKeyedStore>, blobs: Arc<MemoryBlobStore>) -> Arc<AppState> {
        Arc::new(AppState {
            records,
            blobs: blobs.clone(),
            landing: LandingWriter::new(blobs),
            generator: Mutex::new(Generator::with_seed(7)),
            default_sites: vec!["site_alpha".to_string(), "site_beta".to_string()],
            default_batch_size: 3,
            io_timeout: Duration::from_secs(1),
        })
    }

    fn record(site: &str, ts: OffsetDateTime, generated: i64) -> EnergyRecord {
        let generated = Decimal::new(generated, 0);
        let consumed = Decimal::new(10, 0);
        EnergyRecord {
            site_id: site.to_string(),
            timestamp: ts,
            energy_generated_kwh: generated,
            energy_consumed_kwh: consumed,
            net_energy_kwh: generated - consumed,
            anomaly: generated < Decimal::ZERO,
        }
    }

    async fn seeded() -> Router {
        let records = Arc::new(MemoryKeyedStore::default());
        for (minute, generated) in [(0, 5), (1, -2), (2, 7)] {
            let ts = datetime!(2025-06-01 12:00:00 UTC) + time::Duration::minutes(minute);
            records.upsert(&record("site_alpha", ts, generated)).await.unwrap();
        }
        records
            .upsert(&record("site_beta", datetime!(2025-06-01 12:00:00 UTC), 1))
            .await
            .unwrap();
        router(state_with(records, Arc::new(MemoryBlobStore::default())))
    }

    async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .clone()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn records_are_paged_in_timestamp_order() {
        let app = seeded().await;

        let (status, first) = send(&app, "GET", "/records?site_id=site_alpha&limit=2").await;
        assert_eq!(status, StatusCode::OK);
        let items = first["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["timestamp"], "2025-06-01T12:00:00Z");
        assert_eq!(items[1]["timestamp"], "2025-06-01T12:01:00Z");
        assert_eq!(first["next_token"], "2025-06-01T12:01:00Z");

        let (_, second) = send(
            &app,
            "GET",
            "/records?site_id=site_alpha&limit=2&next_token=2025-06-01T12:01:00Z",
        )
        .await;
        let items = second["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["timestamp"], "2025-06-01T12:02:00Z");
        assert!(second["next_token"].is_null());
    }

    #[tokio::test]
    async fn records_range_is_inclusive_and_accepts_naive_utc() {
        let app = seeded().await;
        let (status, body) = send(
            &app,
            "GET",
            "/records?site_id=site_alpha&start=2025-06-01T12:01:00&end=2025-06-01T12:02:00Z",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn bad_query_parameters_are_rejected() {
        let app = seeded().await;
        assert_eq!(send(&app, "GET", "/records").await.0, StatusCode::BAD_REQUEST);
        assert_eq!(
            send(&app, "GET", "/records?site_id=site_alpha&start=yesterday").await.0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            send(
                &app,
                "GET",
                "/records?site_id=site_alpha&start=2025-06-02T00:00:00Z&end=2025-06-01T00:00:00Z"
            )
            .await
            .0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            send(&app, "GET", "/records?site_id=site_alpha&next_token=nope").await.0,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn anomalies_only_returns_flagged_records() {
        let app = seeded().await;
        let (status, body) = send(&app, "GET", "/anomalies/site_alpha").await;
        assert_eq!(status, StatusCode::OK);
        let items = body["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["anomaly"], true);
        assert_eq!(items[0]["net_energy_kwh"], -12.0);
    }

    #[tokio::test]
    async fn all_records_scans_every_site() {
        let app = seeded().await;
        let (_, body) = send(&app, "GET", "/all-records").await;
        assert_eq!(body.as_array().unwrap().len(), 4);
        let (_, body) = send(&app, "GET", "/all-records?limit=1").await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn simulate_lands_one_object_readable_through_files() {
        let blobs = Arc::new(MemoryBlobStore::default());
        let app = router(state_with(Arc::new(MemoryKeyedStore::default()), blobs));

        let (status, body) = send(&app, "POST", "/simulatedata?batch_size=2&sites=site_x,site_y,site_z").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["readings"], 6);
        let object = body["object"].as_str().unwrap().to_string();

        let (_, files) = send(&app, "GET", "/files").await;
        assert_eq!(files, serde_json::json!([object.clone()]));

        let (status, landed) = send(&app, "GET", &format!("/file/{object}")).await;
        assert_eq!(status, StatusCode::OK);
        let readings = landed.as_array().unwrap();
        assert_eq!(readings.len(), 6);
        assert!(readings[0]["energy_generated_kwh"].is_number());
    }

    #[tokio::test]
    async fn simulate_uses_configured_defaults() {
        let app = router(state_with(
            Arc::new(MemoryKeyedStore::default()),
            Arc::new(MemoryBlobStore::default()),
        ));
        let (status, body) = send(&app, "POST", "/simulatedata").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["readings"], 6);
    }

    #[tokio::test]
    async fn simulate_rejects_bad_generator_input() {
        let app = router(state_with(
            Arc::new(MemoryKeyedStore::default()),
            Arc::new(MemoryBlobStore::default()),
        ));
        assert_eq!(
            send(&app, "POST", "/simulatedata?batch_size=0").await.0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            send(&app, "POST", "/simulatedata?sites=").await.0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            send(&app, "POST", "/simulatedata?batch_size=9223372036854775808&sites=a,b")
                .await
                .0,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn missing_and_invalid_files() {
        let app = seeded().await;
        assert_eq!(send(&app, "GET", "/file/nope.json").await.0, StatusCode::NOT_FOUND);
        assert_eq!(send(&app, "GET", "/file/.hidden").await.0, StatusCode::BAD_REQUEST);
    }
}
