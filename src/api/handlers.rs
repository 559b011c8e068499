use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::QueryError;
use crate::logic::{parse_query, LineStream, QueryEngine};
use crate::model::{AttributeDescription, IdValue, QueryDescriptor, Record, WhereClause};
use crate::store::traits::EntityStore;

pub type AppState<S> = Arc<ApiContext<S>>;

/// Shared per-process state: one engine over one store and one registry.
pub struct ApiContext<S> {
    pub engine: QueryEngine<S>,
}

impl<S: EntityStore + 'static> ApiContext<S> {
    pub fn new(engine: QueryEngine<S>) -> AppState<S> {
        Arc::new(Self { engine })
    }
}

const DEFAULT_BATCH_SIZE: u64 = 10;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct SumResponse {
    pub sum: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct AvgResponse {
    pub avg: Option<f64>,
}

/// Update-by-query body: `{query, update}`.
#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub query: Option<WhereClause>,
    pub update: Record,
}

/// Seek body: `{criteria, initialValues}`.
#[derive(Debug, Deserialize)]
pub struct SeekRequest {
    pub criteria: WhereClause,
    #[serde(rename = "initialValues")]
    pub initial_values: Value,
}

/// Engine errors mapped to HTTP. Validation-class errors keep their
/// message; persistence failures are logged and surfaced generically.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn from_query(operation: &str, err: QueryError) -> Self {
        log::error!("{} error: {}", operation, err);
        let status = match &err {
            QueryError::Validation(_)
            | QueryError::Translation(_)
            | QueryError::MissingParameter(_)
            | QueryError::NoChanges => StatusCode::BAD_REQUEST,
            QueryError::NotFound(_) => StatusCode::NOT_FOUND,
            QueryError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = if err.is_client_error() {
            err.to_string()
        } else {
            "Internal Server Error".to_string()
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

fn parse_id(operation: &str, raw: &str) -> Result<IdValue, ApiError> {
    IdValue::parse(raw)
        .ok_or_else(|| ApiError::from_query(operation, QueryError::validation(format!("invalid id {:?}", raw))))
}

fn query_descriptor(operation: &str, raw: &HashMap<String, String>) -> Result<QueryDescriptor, ApiError> {
    parse_query(raw).map_err(|err| ApiError::from_query(operation, err))
}

pub async fn find<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path(entity): Path<String>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Record>>, ApiError> {
    let descriptor = query_descriptor("find", &raw)?;
    let rows = state
        .engine
        .find(&entity, &descriptor)
        .await
        .map_err(|err| ApiError::from_query("find", err))?;
    Ok(Json(rows))
}

pub async fn find_one<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path((entity, id)): Path<(String, String)>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Record>, ApiError> {
    let id = parse_id("findOne", &id)?;
    let descriptor = query_descriptor("findOne", &raw)?;
    let record = state
        .engine
        .find_one(&entity, &id, descriptor.populate)
        .await
        .map_err(|err| ApiError::from_query("findOne", err))?;
    match record {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::from_query(
            "findOne",
            QueryError::not_found(format!("{} {}", entity, id)),
        )),
    }
}

pub async fn create<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path(entity): Path<String>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let created = state
        .engine
        .create(&entity, payload)
        .await
        .map_err(|err| ApiError::from_query("create", err))?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path(entity): Path<String>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<Vec<Record>>, ApiError> {
    let mut descriptor = QueryDescriptor::default();
    if let Some(query) = request.query {
        if !query.is_empty() {
            descriptor.where_clause = Some(query);
        }
    }
    let rows = state
        .engine
        .update_by_query(&entity, &descriptor, &request.update)
        .await
        .map_err(|err| ApiError::from_query("update", err))?;
    Ok(Json(rows))
}

pub async fn update_one<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path((entity, id)): Path<(String, String)>,
    Json(partial): Json<Record>,
) -> Result<Json<Record>, ApiError> {
    let id = parse_id("updateOne", &id)?;
    let record = state
        .engine
        .update_by_id(&entity, &id, &partial)
        .await
        .map_err(|err| ApiError::from_query("updateOne", err))?;
    match record {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::from_query(
            "updateOne",
            QueryError::not_found(format!("{} {}", entity, id)),
        )),
    }
}

pub async fn destroy<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path(entity): Path<String>,
    Json(where_clause): Json<WhereClause>,
) -> Result<Json<Vec<Record>>, ApiError> {
    let mut descriptor = QueryDescriptor::default();
    if !where_clause.is_empty() {
        descriptor.where_clause = Some(where_clause);
    }
    let rows = state
        .engine
        .destroy_all(&entity, &descriptor)
        .await
        .map_err(|err| ApiError::from_query("destroy", err))?;
    Ok(Json(rows))
}

pub async fn destroy_one<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path((entity, id)): Path<(String, String)>,
) -> Result<Json<Record>, ApiError> {
    let id = parse_id("destroyOne", &id)?;
    let record = state
        .engine
        .destroy_by_id(&entity, &id)
        .await
        .map_err(|err| ApiError::from_query("destroyOne", err))?;
    match record {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::from_query(
            "destroyOne",
            QueryError::not_found(format!("{} {}", entity, id)),
        )),
    }
}

pub async fn schema<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path(entity): Path<String>,
) -> Result<Json<HashMap<String, AttributeDescription>>, ApiError> {
    let attrs = state
        .engine
        .describe(&entity)
        .map_err(|err| ApiError::from_query("schema", err))?;
    Ok(Json(attrs))
}

pub async fn count<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path(entity): Path<String>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<u64>, ApiError> {
    let descriptor = query_descriptor("count", &raw)?;
    let total = state
        .engine
        .count(&entity, &descriptor)
        .await
        .map_err(|err| ApiError::from_query("count", err))?;
    Ok(Json(total))
}

pub async fn sum<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path((entity, attr)): Path<(String, String)>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<SumResponse>, ApiError> {
    let descriptor = query_descriptor("sum", &raw)?;
    let sum = state
        .engine
        .sum(&entity, &descriptor, &attr)
        .await
        .map_err(|err| ApiError::from_query("sum", err))?;
    Ok(Json(SumResponse { sum }))
}

pub async fn avg<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path((entity, attr)): Path<(String, String)>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<AvgResponse>, ApiError> {
    let descriptor = query_descriptor("avg", &raw)?;
    let avg = state
        .engine
        .avg(&entity, &descriptor, &attr)
        .await
        .map_err(|err| ApiError::from_query("avg", err))?;
    Ok(Json(AvgResponse { avg }))
}

pub async fn seek<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path(entity): Path<String>,
    Json(request): Json<SeekRequest>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .engine
        .seek(&entity, request.criteria, request.initial_values)
        .await
        .map_err(|err| ApiError::from_query("seek", err))?;
    Ok(Json(record))
}

/// Add a member to a relation collection. A duplicate add is a no-op and
/// answers `null`.
pub async fn populate<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path((entity, id, attr, value)): Path<(String, String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    let owner = parse_id("populate", &id)?;
    let member = parse_id("populate", &value)?;
    let record = state
        .engine
        .add_to_collection(&entity, &owner, &attr, &member)
        .await
        .map_err(|err| ApiError::from_query("populate", err))?;
    Ok(Json(record.map(Value::Object).unwrap_or(Value::Null)))
}

/// Remove a member from a relation collection. Removing an absent member is
/// a no-op and answers `null`.
pub async fn depopulate<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path((entity, id, attr, value)): Path<(String, String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    let owner = parse_id("depopulate", &id)?;
    let member = parse_id("depopulate", &value)?;
    let record = state
        .engine
        .remove_from_collection(&entity, &owner, &attr, &member)
        .await
        .map_err(|err| ApiError::from_query("depopulate", err))?;
    Ok(Json(record.map(Value::Object).unwrap_or(Value::Null)))
}

pub async fn stream<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path(entity): Path<String>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let descriptor = query_descriptor("stream", &raw)?;
    let lines = state
        .engine
        .stream(&entity, &descriptor)
        .await
        .map_err(|err| ApiError::from_query("stream", err))?;
    stream_response("stream", lines)
}

pub async fn stream_batch<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path((entity, size)): Path<(String, String)>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let batch_size = size.parse::<u64>().map_err(|_| {
        ApiError::from_query(
            "streamBatch",
            QueryError::validation(format!("invalid batch size {:?}", size)),
        )
    })?;
    let descriptor = query_descriptor("streamBatch", &raw)?;
    let lines = state
        .engine
        .stream_batch(&entity, &descriptor, batch_size)
        .await
        .map_err(|err| ApiError::from_query("streamBatch", err))?;
    stream_response("streamBatch", lines)
}

pub async fn stream_batch_default<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path(entity): Path<String>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let descriptor = query_descriptor("streamBatch", &raw)?;
    let lines = state
        .engine
        .stream_batch(&entity, &descriptor, DEFAULT_BATCH_SIZE)
        .await
        .map_err(|err| ApiError::from_query("streamBatch", err))?;
    stream_response("streamBatch", lines)
}

/// Chunked-transfer headers go out before the body; a mid-stream failure
/// terminates the connection and the consumer must treat the truncated
/// stream as a failure.
fn stream_response(operation: &str, lines: LineStream) -> Result<Response, ApiError> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::TRANSFER_ENCODING, "chunked")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(lines))
        .map_err(|err| {
            ApiError::from_query(operation, QueryError::from(anyhow::anyhow!(err)))
        })
}
