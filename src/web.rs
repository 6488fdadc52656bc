//! HTTP surface: public consent endpoints, staff endpoints and signed file
//! downloads. Staff routes trust the `X-Authenticated-User` header set by the
//! auth proxy in front of this service.
use crate::document_store::DOCUMENT_PREFIX;
use crate::errors::CountersignError;
use crate::jobs;
use crate::recipients::RecipientType;
use crate::reporting::{self, DocumentFilter, RecordFilter};
use crate::settings::Settings;
use crate::staff::{ClientIp, StaffIdentity};
use crate::validation;
use crate::workflow::{ConsentService, NewConsentRequest};
use axum::body::{Body, Bytes};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use miette::IntoDiagnostic;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub service: ConsentService,
}

// Security headers middleware
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    // X-Frame-Options: Prevent clickjacking
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );

    // X-Content-Type-Options: Prevent MIME sniffing
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );

    // Referrer-Policy: the consent link carries a bearer token in its query
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );

    response
}

// Token-bearing responses must not be cached by browsers or proxies
async fn no_store(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

pub fn router(state: AppState) -> Router {
    let upload_limit = state.settings.storage.max_upload_bytes;

    let public = Router::new()
        .route("/consent/view", get(view_consent))
        .route("/consent/submit", post(submit_consent))
        .route("/files/{*path}", get(download_file))
        .layer(middleware::from_fn(no_store));

    let staff = Router::new()
        .route(
            "/consent/upload",
            post(upload_document).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/consent/request", post(create_request))
        .route("/consent/resend", post(resend))
        .route("/consent/documents", get(list_documents))
        .route("/consent/documents/{id}", patch(update_document))
        .route("/consent/records/{id}", get(list_records))
        .route("/consent/records/{id}/expire", post(expire_record))
        .route("/admin/jobs", get(list_job_runs))
        .route("/admin/jobs/{name}/run", post(run_job));

    Router::new()
        .route("/health", get(health))
        .merge(public)
        .merge(staff)
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState) -> miette::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    )
    .parse()
    .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let app = router(state);

    tracing::info!(%addr, "Consent API listening");
    tracing::warn!("Rate limiting should be configured at the reverse proxy level for production");
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .into_diagnostic()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, CountersignError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| CountersignError::Validation(e.body_text()))
}

fn query<T: DeserializeOwned>(
    params: Result<Query<T>, QueryRejection>,
) -> Result<T, CountersignError> {
    params
        .map(|Query(q)| q)
        .map_err(|e| CountersignError::Validation(e.body_text()))
}

async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, CountersignError> {
    state
        .service
        .db()
        .ping()
        .await
        .map_err(|e| CountersignError::Transient(format!("database unavailable: {e}")))?;
    Ok(Json(json!({ "status": "ok" })))
}

// Public consent endpoints

#[derive(Debug, Deserialize)]
struct ViewQuery {
    token: Option<String>,
}

async fn view_consent(
    State(state): State<AppState>,
    params: Result<Query<ViewQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, CountersignError> {
    let token = query(params)?.token.unwrap_or_default();
    let token = validation::required("token", &token)?;
    let view = state.service.view_by_token(token).await?;
    Ok(Json(json!({ "success": true, "data": view })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SubmitBody {
    token: String,
    consented_name: String,
}

async fn submit_consent(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    payload: Result<Json<SubmitBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, CountersignError> {
    let body = json_body(payload)?;
    let token = validation::required("token", &body.token)?;
    let submitted = state
        .service
        .submit(token, &body.consented_name, ip.as_deref())
        .await?;
    Ok(Json(json!({ "success": true, "data": submitted })))
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    expires: Option<i64>,
    signature: Option<String>,
}

async fn download_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    params: Result<Query<FileQuery>, QueryRejection>,
) -> Result<Response, CountersignError> {
    let FileQuery { expires, signature } = query(params)?;
    let (Some(expires), Some(signature)) = (expires, signature) else {
        return Err(CountersignError::Forbidden("Missing signature".to_string()));
    };

    let store = state.service.store();
    if !path.starts_with(DOCUMENT_PREFIX)
        || !store.verify_signature(&path, expires, &signature, Utc::now().timestamp())
    {
        return Err(CountersignError::Forbidden(
            "This link has expired or is invalid".to_string(),
        ));
    }

    let bytes = store.read(&path).await?;
    Ok((
        [(header::CONTENT_TYPE, content_type_for(&path))],
        bytes,
    )
        .into_response())
}

fn content_type_for(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "txt" => "text/plain; charset=utf-8",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

// Staff endpoints

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadQuery {
    file_name: Option<String>,
}

async fn upload_document(
    State(state): State<AppState>,
    staff: StaffIdentity,
    params: Result<Query<UploadQuery>, QueryRejection>,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), CountersignError> {
    let file_name = query(params)?.file_name.unwrap_or_default();
    let file_name = validation::required("fileName", &file_name)?;
    validation::max_len("fileName", file_name, validation::MAX_FILE_NAME_LEN)?;
    if body.is_empty() {
        return Err(CountersignError::Validation(
            "Uploaded document is empty".to_string(),
        ));
    }

    let file_path = state.service.store().put(file_name, &body).await?;
    tracing::info!(%file_path, size = body.len(), uploaded_by = %staff.user, "consent document uploaded");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "filePath": file_path })),
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CreateRequestBody {
    file_name: String,
    file_path: String,
    recipient_ids: Vec<String>,
    recipient_type: Option<RecipientType>,
}

async fn create_request(
    State(state): State<AppState>,
    staff: StaffIdentity,
    payload: Result<Json<CreateRequestBody>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), CountersignError> {
    let body = json_body(payload)?;
    let recipient_type = body
        .recipient_type
        .ok_or_else(|| CountersignError::Validation("recipientType is required".to_string()))?;

    let created = state
        .service
        .create_request(
            NewConsentRequest {
                file_name: body.file_name,
                file_path: body.file_path,
                recipient_ids: body.recipient_ids,
                recipient_type,
            },
            &staff.user,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": format!("Consent request sent to {} recipient(s)", created.record_count),
            "document": created.document,
            "recordCount": created.record_count,
        })),
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ResendBody {
    record_ids: Vec<String>,
}

async fn resend(
    State(state): State<AppState>,
    _staff: StaffIdentity,
    payload: Result<Json<ResendBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, CountersignError> {
    let body = json_body(payload)?;
    let outcome = state.service.resend(&body.record_ids).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!(
            "Resent {} consent request(s), skipped {}",
            outcome.resent_count, outcome.skipped_count
        ),
        "resentCount": outcome.resent_count,
        "skippedCount": outcome.skipped_count,
    })))
}

async fn list_documents(
    State(state): State<AppState>,
    _staff: StaffIdentity,
    params: Result<Query<DocumentFilter>, QueryRejection>,
) -> Result<Json<serde_json::Value>, CountersignError> {
    let filter = query(params)?;
    let page = reporting::list_documents(state.service.db(), &filter).await?;
    Ok(Json(json!({
        "success": true,
        "data": page.data,
        "pagination": page.pagination,
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UpdateDocumentBody {
    is_active: Option<bool>,
}

async fn update_document(
    State(state): State<AppState>,
    staff: StaffIdentity,
    Path(id): Path<String>,
    payload: Result<Json<UpdateDocumentBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, CountersignError> {
    let is_active = json_body(payload)?
        .is_active
        .ok_or_else(|| CountersignError::Validation("isActive is required".to_string()))?;
    let document = state.service.set_document_active(&id, is_active).await?;
    tracing::info!(document_id = %id, is_active, by = %staff.user, "consent document updated");
    Ok(Json(json!({ "success": true, "document": document })))
}

async fn list_records(
    State(state): State<AppState>,
    _staff: StaffIdentity,
    Path(document_id): Path<String>,
    params: Result<Query<RecordFilter>, QueryRejection>,
) -> Result<Json<serde_json::Value>, CountersignError> {
    let filter = query(params)?;
    let document = state.service.get_document(&document_id).await?;
    let page = reporting::list_records(state.service.db(), &document, &filter).await?;
    Ok(Json(json!({
        "success": true,
        "document": document,
        "data": page.data,
        "pagination": page.pagination,
    })))
}

async fn expire_record(
    State(state): State<AppState>,
    staff: StaffIdentity,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, CountersignError> {
    let record = state.service.expire(&id).await?;
    tracing::info!(record_id = %id, by = %staff.user, "consent record expired by staff");
    Ok(Json(json!({ "success": true, "data": record })))
}

async fn run_job(
    State(state): State<AppState>,
    staff: StaffIdentity,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, CountersignError> {
    tracing::info!(job = %name, by = %staff.user, "manual job run requested");
    let run = jobs::trigger_job_manually(state.service.db(), &state.settings, &name).await?;
    Ok(Json(json!({ "success": run.success, "data": run })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JobRunsParams {
    limit: Option<u64>,
}

async fn list_job_runs(
    State(state): State<AppState>,
    _staff: StaffIdentity,
    params: Result<Query<JobRunsParams>, QueryRejection>,
) -> Result<Json<serde_json::Value>, CountersignError> {
    let limit = query(params)?
        .limit
        .unwrap_or(reporting::DEFAULT_PAGE_SIZE)
        .clamp(1, reporting::MAX_PAGE_SIZE);
    let runs = jobs::recent_executions(state.service.db(), limit).await?;
    Ok(Json(json!({ "success": true, "data": runs })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for_common_documents() {
        assert_eq!(content_type_for("consent-documents/ab-nda.PDF"), "application/pdf");
        assert_eq!(content_type_for("consent-documents/ab-notes.txt"), "text/plain; charset=utf-8");
        assert_eq!(content_type_for("consent-documents/ab-blob"), "application/octet-stream");
    }
}
