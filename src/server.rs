//! HTTP server for the single-page app.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Single-page UI |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/documents` | Documents in this session |
//! | `POST` | `/api/documents` | Upload a PDF (multipart field `file`) |
//! | `POST` | `/api/documents/{name}/select` | Make a document active |
//! | `DELETE` | `/api/documents/{name}` | Evict a document |
//! | `POST` | `/api/ask` | Ask a question: `{ "prompt": "...", "document": "..." }` |
//! | `DELETE` | `/api/session` | End the session |
//!
//! Sessions are tracked with the `paperparrot_session` cookie. When an
//! access token is configured, every `/api` route requires it in the
//! `X-Access-Token` header or the `token` query parameter.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "capacity", "message": "cannot add 'x.pdf': ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `capacity` (409), `payload_too_large` (413), `unsupported_media_type` (415),
//! `index_error` (422), `upstream_error` (502), `timeout` (504), `internal` (500).

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, Request, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AskError, IndexError, OnboardError, ResponderError, UploadError};
use crate::extract::is_pdf_upload;
use crate::models::UploadedDocument;
use crate::pipeline::Pipeline;
use crate::session::{Resolved, SessionStore};

pub const SESSION_COOKIE: &str = "paperparrot_session";
pub const TOKEN_HEADER: &str = "x-access-token";

const INDEX_HTML: &str = include_str!("ui.html");

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pipeline: Pipeline,
    sessions: Arc<SessionStore>,
    /// SHA-256 of the configured access token.
    token_digest: Option<[u8; 32]>,
}

impl AppState {
    pub fn new(pipeline: Pipeline, config: &Config) -> Self {
        Self {
            pipeline,
            sessions: Arc::new(SessionStore::new(
                config.session.max_documents,
                Duration::from_secs(config.server.session_idle_secs),
            )),
            token_digest: config.server.access_token.as_deref().map(digest),
        }
    }
}

fn digest(s: &str) -> [u8; 32] {
    Sha256::digest(s.as_bytes()).into()
}

/// Build the router for `state`.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let api = Router::new()
        .route(
            "/documents",
            get(handle_list_documents).post(handle_upload),
        )
        .route("/documents/{name}/select", post(handle_select))
        .route("/documents/{name}", delete(handle_evict))
        .route("/ask", post(handle_ask))
        .route("/session", delete(handle_end_session))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_access_token,
        ));

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .nest("/api", api)
        // Multipart framing overhead on top of the file itself.
        .layer(DefaultBodyLimit::max(max_upload_bytes.saturating_add(64 * 1024)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the server and run until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(config)?;
    let state = AppState::new(pipeline, config);
    let app = router(state, config.uploads.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(
        "PaperParrot listening on http://{}",
        listener.local_addr()?
    );
    if config.server.access_token.is_none() {
        warn!("No access token configured; uploads are open to anyone who can reach this address");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

/// Map an extractor or multipart failure onto the error contract.
fn rejected(status: StatusCode, message: String) -> AppError {
    match status {
        StatusCode::PAYLOAD_TOO_LARGE => {
            AppError::new(status, "payload_too_large", message)
        }
        StatusCode::UNSUPPORTED_MEDIA_TYPE => {
            AppError::new(status, "unsupported_media_type", message)
        }
        _ => bad_request(message),
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        rejected(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        rejected(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        rejected(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        rejected(err.status(), err.body_text())
    }
}

impl From<OnboardError> for AppError {
    fn from(err: OnboardError) -> Self {
        let message = err.to_string();
        match err {
            OnboardError::Capacity(_) => AppError::new(StatusCode::CONFLICT, "capacity", message),
            OnboardError::Upload(UploadError::TooLarge { .. }) => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", message)
            }
            OnboardError::Upload(UploadError::EmptyName | UploadError::InvalidName(_)) => {
                bad_request(message)
            }
            OnboardError::Upload(UploadError::Io { .. }) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
            OnboardError::Index(IndexError::Timeout(_)) => {
                AppError::new(StatusCode::GATEWAY_TIMEOUT, "timeout", message)
            }
            OnboardError::Index(IndexError::Embedding(_)) => {
                AppError::new(StatusCode::BAD_GATEWAY, "upstream_error", message)
            }
            OnboardError::Index(_) => {
                AppError::new(StatusCode::UNPROCESSABLE_ENTITY, "index_error", message)
            }
        }
    }
}

impl From<AskError> for AppError {
    fn from(err: AskError) -> Self {
        let message = err.to_string();
        match err {
            AskError::NoDocument => bad_request(message),
            AskError::UnknownDocument(_) => not_found(message),
            AskError::Responder(ResponderError::EmptyPrompt) => bad_request(message),
            AskError::Responder(ResponderError::Timeout(_)) => {
                AppError::new(StatusCode::GATEWAY_TIMEOUT, "timeout", message)
            }
            AskError::Responder(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "upstream_error", message)
            }
        }
    }
}

// ============ Access token ============

#[derive(Deserialize)]
struct TokenParams {
    token: Option<String>,
}

/// Rejects `/api` requests that do not carry the configured access token.
async fn require_access_token(
    State(state): State<AppState>,
    params: Result<Query<TokenParams>, QueryRejection>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.token_digest else {
        return next.run(request).await;
    };
    let query_token = match params {
        Ok(Query(params)) => params.token,
        Err(rejection) => return AppError::from(rejection).into_response(),
    };

    let supplied = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(query_token);

    match supplied {
        Some(token) if digest(&token) == expected => next.run(request).await,
        _ => {
            warn!(path = %request.uri().path(), "Rejected request with missing or invalid access token");
            AppError::new(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "a valid access token is required",
            )
            .into_response()
        }
    }
}

// ============ Sessions ============

fn session_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == SESSION_COOKIE)
        .map(|(_, v)| v.to_string())
}

/// Resolve the caller's session, scheduling release of any pruned ones.
fn open_session(state: &AppState, headers: &HeaderMap) -> Resolved {
    let mut resolved = state.sessions.resolve(session_id_from(headers).as_deref());
    for expired in std::mem::take(&mut resolved.expired) {
        let pipeline = state.pipeline.clone();
        tokio::spawn(async move {
            let mut ctx = expired.lock().await;
            pipeline.close(&mut ctx).await;
        });
    }
    resolved
}

/// Attach the session cookie to freshly created sessions.
fn respond(resolved: &Resolved, result: Result<impl IntoResponse, AppError>) -> Response {
    let mut response = result.into_response();
    if resolved.created {
        let cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Strict",
            SESSION_COOKIE, resolved.id
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

// ============ GET / and /health ============

async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Documents ============

#[derive(Serialize)]
struct DocumentInfo {
    name: String,
    pages: usize,
    chunks: usize,
    indexed_at: String,
    active: bool,
}

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<DocumentInfo>,
    active: Option<String>,
    capacity: usize,
}

fn list_response(ctx: &crate::session::SessionContext) -> DocumentListResponse {
    let active = ctx.registry.active_name().map(str::to_string);
    let documents = ctx
        .registry
        .iter()
        .map(|(name, handle)| DocumentInfo {
            name: name.to_string(),
            pages: handle.index().page_count(),
            chunks: handle.index().chunk_count(),
            indexed_at: handle.index().indexed_at().to_rfc3339(),
            active: active.as_deref() == Some(name),
        })
        .collect();
    DocumentListResponse {
        documents,
        active,
        capacity: ctx.registry.capacity(),
    }
}

async fn handle_list_documents(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let resolved = open_session(&state, &headers);
    let ctx = resolved.context.lock().await;
    let body = Json(list_response(&ctx));
    drop(ctx);
    respond(&resolved, Ok::<_, AppError>(body))
}

#[derive(Serialize)]
struct UploadResponse {
    name: String,
    pages: usize,
    chunks: usize,
    replaced: bool,
    documents: DocumentListResponse,
}

/// Read the `file` field of the multipart body into an immutable document.
async fn read_upload(multipart: &mut Multipart) -> Result<UploadedDocument, AppError> {
    loop {
        let Some(field) = multipart.next_field().await? else {
            return Err(bad_request("multipart body must contain a 'file' field"));
        };
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| bad_request("uploaded file must have a name"))?;
        let content_type = field.content_type().map(str::to_string);
        if !is_pdf_upload(&file_name, content_type.as_deref()) {
            return Err(AppError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_media_type",
                format!("{} is not a PDF", file_name),
            ));
        }

        let bytes = field.bytes().await?;
        return Ok(UploadedDocument::new(file_name, bytes.to_vec()));
    }
}

async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let resolved = open_session(&state, &headers);
    let result = async {
        let mut multipart = multipart?;
        let doc = read_upload(&mut multipart).await?;
        let mut ctx = resolved.context.lock().await;
        let outcome = state.pipeline.onboard(&mut ctx, doc).await?;
        Ok::<_, AppError>(Json(UploadResponse {
            name: outcome.name,
            pages: outcome.pages,
            chunks: outcome.chunks,
            replaced: outcome.replaced,
            documents: list_response(&ctx),
        }))
    }
    .await;
    respond(&resolved, result)
}

async fn handle_select(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    let resolved = open_session(&state, &headers);
    let mut ctx = resolved.context.lock().await;
    let result = match ctx.registry.select(&name) {
        Some(_) => Ok(Json(list_response(&ctx))),
        None => Err(not_found(format!("document not found: {}", name))),
    };
    drop(ctx);
    respond(&resolved, result)
}

async fn handle_evict(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    let resolved = open_session(&state, &headers);
    let mut ctx = resolved.context.lock().await;
    let result = if state.pipeline.evict(&mut ctx, &name).await {
        Ok(Json(list_response(&ctx)))
    } else {
        Err(not_found(format!("document not found: {}", name)))
    };
    drop(ctx);
    respond(&resolved, result)
}

// ============ Ask ============

#[derive(Deserialize)]
struct AskRequest {
    prompt: String,
    #[serde(default)]
    document: Option<String>,
}

#[derive(Serialize)]
struct Citation {
    text: String,
    page: Option<u32>,
    score: Option<f32>,
}

#[derive(Serialize)]
struct AskResponse {
    document: String,
    answer: String,
    citation: Citation,
}

async fn handle_ask(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Response {
    let resolved = open_session(&state, &headers);
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => return respond(&resolved, Err::<(), _>(AppError::from(rejection))),
    };
    let mut ctx = resolved.context.lock().await;
    let result = state
        .pipeline
        .ask(&mut ctx, &req.prompt, req.document.as_deref())
        .await
        .map(|(document, answer)| {
            Json(AskResponse {
                document,
                answer: answer.text,
                citation: Citation {
                    text: answer.cited_chunk,
                    page: answer.cited_page,
                    score: answer.score,
                },
            })
        })
        .map_err(AppError::from);
    drop(ctx);
    respond(&resolved, result)
}

// ============ Session ============

async fn handle_end_session(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let ended = match session_id_from(&headers).and_then(|id| state.sessions.end(&id)) {
        Some(ctx) => {
            let mut ctx = ctx.lock().await;
            state.pipeline.close(&mut ctx).await;
            true
        }
        None => false,
    };
    let mut response = Json(serde_json::json!({ "ended": ended })).into_response();
    let expire = format!("{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Strict", SESSION_COOKIE);
    if let Ok(value) = HeaderValue::from_str(&expire) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}
