use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::config::{Backend, Config};
use crate::coordinator::{BatchCoordinator, WriteSummary};
use crate::error::{Error, ErrorStatus};
use crate::extract::{ChatExtractor, DisabledExtractor, OrderExtractor};
use crate::provision::SheetTarget;
use crate::record::OrderRecord;
use crate::state::{Credential, CredentialState};
use crate::store::{
    Attachment, AttachmentStore, GoogleDrive, GoogleSheets, MemoryAttachments, MemoryWorkbook,
    SnapshotWorkbook, TabularStore,
};

/// Receipts are photos; the axum default of 2 MB is too small for a batch.
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;
const ATTACHMENT_FIELD_PREFIX: &str = "attachment_";
const CALLBACK_SECRET_HEADER: &str = "x-callback-secret";

pub struct AppState {
    coordinator: BatchCoordinator,
    credentials: Arc<CredentialState>,
    extractor: Arc<dyn OrderExtractor>,
    collection_id: String,
    requires_auth: bool,
    callback_secret: Option<String>,
}

impl AppState {
    pub fn new(
        coordinator: BatchCoordinator,
        credentials: Arc<CredentialState>,
        extractor: Arc<dyn OrderExtractor>,
        collection_id: impl Into<String>,
        requires_auth: bool,
    ) -> Self {
        Self {
            coordinator,
            credentials,
            extractor,
            collection_id: collection_id.into(),
            requires_auth,
            callback_secret: None,
        }
    }

    /// Requires `secret` in the `x-callback-secret` header of token updates.
    pub fn with_callback_secret(mut self, secret: Option<String>) -> Self {
        self.callback_secret = secret;
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    success: bool,
    rows: usize,
    manager: String,
    start_row: u32,
}

impl From<WriteSummary> for SubmitResponse {
    fn from(summary: WriteSummary) -> Self {
        Self {
            success: true,
            rows: summary.rows,
            manager: summary.tab,
            start_row: summary.start_row,
        }
    }
}

#[derive(Deserialize)]
struct TokenUpdate {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Serialize)]
struct AuthStatus {
    authenticated: bool,
    required: bool,
}

/// Failure body shared by every endpoint.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.status() {
            ErrorStatus::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorStatus::BadRequest => StatusCode::BAD_REQUEST,
            ErrorStatus::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        } else {
            warn!("request rejected: {}", self.0);
        }
        (
            status,
            Json(serde_json::json!({
                "success": false,
                "message": self.0.to_string(),
            })),
        )
            .into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/orders", post(submit_orders))
        .route("/auth/token", post(store_token))
        .route("/auth/status", get(auth_status))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = reqwest::Client::builder();
    if let Some(timeout) = config.http_timeout() {
        client = client.timeout(timeout);
    }
    let client = client.build()?;
    let credentials = Arc::new(CredentialState::from_token(config.access_token.clone()));

    let tables: Arc<dyn TabularStore> = match config.backend {
        Backend::Google => Arc::new(GoogleSheets::new(client.clone(), Arc::clone(&credentials))),
        Backend::Memory => Arc::new(MemoryWorkbook::new()),
        Backend::Snapshot => Arc::new(SnapshotWorkbook::open(&config.snapshot_path)?),
    };
    let files: Arc<dyn AttachmentStore> = match config.backend {
        Backend::Google => Arc::new(GoogleDrive::new(client.clone(), Arc::clone(&credentials))),
        Backend::Memory | Backend::Snapshot => Arc::new(MemoryAttachments::new()),
    };

    let extractor: Arc<dyn OrderExtractor> = match &config.extractor.api_key {
        Some(key) => Arc::new(ChatExtractor::new(
            client,
            config.extractor.endpoint.clone(),
            config.extractor.model.clone(),
            key.clone(),
        )),
        None => Arc::new(DisabledExtractor),
    };

    let coordinator = BatchCoordinator::new(tables, files, config.intake_settings());
    let app_state = Arc::new(AppState::new(
        coordinator,
        credentials,
        extractor,
        config.collection_id(),
        config.requires_auth(),
    )
    .with_callback_secret(config.callback_secret.clone()));
    if config.callback_secret.is_none() {
        warn!("no callback secret configured; POST /auth/token accepts any caller");
    }
    let app = router(app_state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(
        "listening on http://{} ({:?} backend)",
        config.bind_addr, config.backend
    );
    axum::serve(listener, app).await?;

    Ok(())
}

/// Fields of one `/api/orders` submission.
#[derive(Default)]
struct Submission {
    manager: Option<String>,
    orders: Option<String>,
    text: Option<String>,
    attachments: BTreeMap<usize, Attachment>,
}

async fn read_submission(mut multipart: Multipart) -> Result<Submission, Error> {
    let mut submission = Submission::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidInput(format!("malformed form data: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "manager" | "orders" | "text" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| Error::InvalidInput(format!("unreadable field '{name}': {e}")))?;
                let slot = match name.as_str() {
                    "manager" => &mut submission.manager,
                    "orders" => &mut submission.orders,
                    _ => &mut submission.text,
                };
                *slot = Some(value);
            }
            _ => {
                let Some(index) = name
                    .strip_prefix(ATTACHMENT_FIELD_PREFIX)
                    .and_then(|i| i.parse::<usize>().ok())
                else {
                    continue;
                };
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("attachment-{index}"));
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::InvalidInput(format!("unreadable file '{name}': {e}")))?;
                if bytes.is_empty() {
                    continue;
                }
                submission.attachments.insert(
                    index,
                    Attachment {
                        bytes: bytes.to_vec(),
                        mime_type,
                        file_name,
                    },
                );
            }
        }
    }
    Ok(submission)
}

/// Lays the `attachment_<i>` files out against `count` orders.
fn align_attachments(
    mut files: BTreeMap<usize, Attachment>,
    count: usize,
) -> Result<Vec<Option<Attachment>>, Error> {
    if files.is_empty() {
        return Ok(Vec::new());
    }
    if let Some((&index, _)) = files.range(count..).next() {
        return Err(Error::InvalidInput(format!(
            "attachment_{index} has no matching order ({count} submitted)"
        )));
    }
    Ok((0..count).map(|i| files.remove(&i)).collect())
}

async fn submit_orders(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    if state.requires_auth && !state.credentials.is_authenticated() {
        return Err(Error::AuthRequired.into());
    }
    let submission = read_submission(multipart).await?;
    let target = SheetTarget::new(
        state.collection_id.clone(),
        submission.manager.unwrap_or_default(),
    )?;

    let layout = state.coordinator.layout();
    let records = match (submission.orders, submission.text) {
        (Some(orders), _) if !orders.trim().is_empty() => {
            OrderRecord::batch_from_json(&orders, layout)?
        }
        (_, Some(text)) if !text.trim().is_empty() => {
            state
                .extractor
                .extract(&text, state.coordinator.canonical().fixed(), layout)
                .await?
        }
        _ => {
            return Err(Error::InvalidInput("either orders or text is required".into()).into());
        }
    };
    let attachments = align_attachments(submission.attachments, records.len())?;

    let summary = state
        .coordinator
        .submit_batch(&target, records, attachments)
        .await?;
    Ok(Json(summary.into()))
}

async fn store_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<TokenUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(secret) = &state.callback_secret {
        let presented = headers
            .get(CALLBACK_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if presented != Some(secret.as_str()) {
            warn!("token update refused: callback secret missing or wrong");
            return Err(Error::AuthRequired.into());
        }
    }
    if update.access_token.trim().is_empty() {
        return Err(Error::InvalidInput("access_token is empty".into()).into());
    }
    state.credentials.store(Credential::new(
        update.access_token,
        update.expires_in.map(Duration::from_secs),
    ));
    info!("access token updated (expires in {:?}s)", update.expires_in);
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn auth_status(State(state): State<Arc<AppState>>) -> Json<AuthStatus> {
    Json(AuthStatus {
        authenticated: state.credentials.is_authenticated(),
        required: state.requires_auth,
    })
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
