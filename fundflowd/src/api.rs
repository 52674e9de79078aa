//! HTTP API for the Fundflow daemon.
//!
//! Provides REST endpoints for:
//! - Health check
//! - Executing and reading transfers
//! - Opening and reading the caller's accounts
//! - Intake of identity events for the user projection
//!
//! Authentication happens upstream: the gateway forwards the caller's email
//! in a configurable header and the daemon only authorizes.

use axum::{
    async_trait,
    body::Bytes,
    extract::{
        rejection::{JsonRejection, PathRejection},
        FromRequestParts, Path, State,
    },
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use fundflow_domain::{Account, AccountId, Amount, Currency, Transfer, User};
use fundflow_engine::{Initiator, TransferEngine, TransferError, TransferRequest};
use fundflow_projector::{decode_envelope, UserEvent};
use fundflow_store::{AccountStore, LedgerReader, StoreError, UserDirectory};

/// Longest accepted `Idempotency-Key` header value
const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState {
    pub engine: TransferEngine,
    pub accounts: Arc<dyn AccountStore>,
    pub ledger: Arc<dyn LedgerReader>,
    pub users: Arc<dyn UserDirectory>,
    /// Queue feeding the user projection worker
    pub user_events: mpsc::Sender<UserEvent>,
    /// Header carrying the authenticated caller's email
    pub auth_header: HeaderName,
    /// Currency for accounts opened without one
    pub default_currency: Currency,
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Amount as sent by clients.
///
/// Strings are preferred. A plain JSON number is taken verbatim from the
/// request body, so its digits never pass through an `f64`.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct AmountInput(Box<RawValue>);

impl AmountInput {
    fn into_text(self) -> ApiResult<String> {
        let raw = self.0.get().trim();
        if raw.starts_with('"') {
            return serde_json::from_str(raw)
                .map_err(|_| ApiError::bad_request("amount must be a string or a number"));
        }
        if raw.starts_with(|c: char| c == '-' || c.is_ascii_digit()) {
            return Ok(raw.to_string());
        }
        Err(ApiError::bad_request("amount must be a string or a number"))
    }
}

/// Request to execute a transfer.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransferRequest {
    pub from_account_uuid: Uuid,
    pub to_account_uuid: Uuid,
    pub amount: AmountInput,
    pub currency: String,
}

/// A completed transfer.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub transfer_uuid: Uuid,
    pub from_account_uuid: Uuid,
    pub to_account_uuid: Uuid,
    pub amount: String,
    pub currency: String,
    pub status: String,
    pub initiator_uuid: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<&Transfer> for TransferResponse {
    fn from(transfer: &Transfer) -> Self {
        Self {
            transfer_uuid: transfer.id,
            from_account_uuid: transfer.from_account_id,
            to_account_uuid: transfer.to_account_id,
            amount: transfer.amount.to_string(),
            currency: transfer.currency.to_string(),
            status: transfer.status().as_str().to_string(),
            initiator_uuid: transfer.initiator_id,
            created_at: transfer.created_at,
        }
    }
}

/// Request to open an account for the caller.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub opening_balance: Option<AmountInput>,
}

/// An account owned by the caller.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub account_uuid: Uuid,
    pub owner_uuid: Uuid,
    pub balance: String,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            account_uuid: account.id,
            owner_uuid: account.owner_id,
            balance: account.balance.to_string(),
            currency: account.currency.to_string(),
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

/// Acknowledgement of a queued identity event.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEventAccepted {
    pub status: String,
    pub event_type: String,
    pub user_uuid: Uuid,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code
    pub error: String,
    pub message: String,
}

// =============================================================================
// Errors
// =============================================================================

/// Error returned by a handler, rendered as [`ErrorResponse`].
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "malformed_request", message)
    }

    fn unauthenticated() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthenticated", "No authenticated caller")
    }

    fn not_found(entity: &str, id: Uuid) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", format!("{} not found: {}", entity, id))
    }

    fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "invalid_request", message)
    }

    /// HTTP status of this error
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<TransferError> for ApiError {
    fn from(err: TransferError) -> Self {
        let status = match &err {
            TransferError::InvalidRequest(_)
            | TransferError::Forbidden { .. }
            | TransferError::AccountNotFound { .. }
            | TransferError::CurrencyMismatch { .. }
            | TransferError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            TransferError::UnauthorizedInitiator => StatusCode::UNAUTHORIZED,
            TransferError::DuplicateRequest => StatusCode::CONFLICT,
            TransferError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            TransferError::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.code(), err.public_message())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        error!(error = %err, "Storage failure while serving request");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_failure",
            "Internal storage failure",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.code.to_string(),
            message: self.message,
        });
        let mut response = (self.status, body).into_response();
        if self.status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Caller
// =============================================================================

/// Email of the authenticated caller, taken from the configured header.
#[derive(Debug, Clone)]
pub struct Caller(pub String);

#[async_trait]
impl FromRequestParts<Arc<ApiState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(&state.auth_header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .map(|email| Caller(email.to_string()))
            .ok_or_else(ApiError::unauthenticated)
    }
}

impl Caller {
    /// Resolve the caller to an active projected user
    async fn user(&self, state: &ApiState) -> ApiResult<User> {
        state
            .users
            .find_active_user_by_email(&self.0)
            .await?
            .ok_or_else(|| ApiError::from(TransferError::UnauthorizedInitiator))
    }
}

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/transfers", post(create_transfer))
        .route("/api/transfers/:id", get(get_transfer))
        .route("/api/accounts", post(create_account).get(list_accounts))
        .route("/api/accounts/:id", get(get_account))
        .route("/api/accounts/:id/transfers", get(list_account_transfers))
        .route("/internal/user-events", post(accept_user_event))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Execute a transfer on behalf of the caller.
async fn create_transfer(
    State(state): State<Arc<ApiState>>,
    caller: Caller,
    headers: HeaderMap,
    body: Result<Json<CreateTransferRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TransferResponse>)> {
    let Json(body) = body?;
    let idempotency_key = idempotency_key(&headers)?;

    let mut request = TransferRequest::new(
        body.from_account_uuid,
        body.to_account_uuid,
        body.amount.into_text()?,
        body.currency,
        Initiator::Email(caller.0),
    );
    if let Some(key) = idempotency_key {
        request = request.with_idempotency_key(key);
    }

    let transfer = state.engine.execute(request).await?;
    Ok((StatusCode::CREATED, Json(TransferResponse::from(&transfer))))
}

fn idempotency_key(headers: &HeaderMap) -> ApiResult<Option<String>> {
    let Some(value) = headers.get("idempotency-key") else {
        return Ok(None);
    };
    let key = value
        .to_str()
        .map_err(|_| ApiError::bad_request("Idempotency-Key must be visible ASCII"))?;
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ApiError::bad_request(format!(
            "Idempotency-Key longer than {} characters",
            MAX_IDEMPOTENCY_KEY_LEN
        )));
    }
    Ok(Some(key.to_string()))
}

/// Read a transfer the caller is a party to.
async fn get_transfer(
    State(state): State<Arc<ApiState>>,
    caller: Caller,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<TransferResponse>> {
    let Path(id) = path?;
    let user = caller.user(&state).await?;

    let transfer = state
        .ledger
        .find_transfer(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Transfer", id))?;

    for account_id in [transfer.from_account_id, transfer.to_account_id] {
        if owned_account(&state, &user, account_id).await?.is_some() {
            return Ok(Json(TransferResponse::from(&transfer)));
        }
    }
    Err(ApiError::not_found("Transfer", id))
}

/// Open an account owned by the caller.
async fn create_account(
    State(state): State<Arc<ApiState>>,
    caller: Caller,
    body: Result<Json<CreateAccountRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AccountResponse>)> {
    let Json(body) = body?;
    let user = caller.user(&state).await?;

    let currency = match body.currency.as_deref() {
        Some(code) => Currency::new(code).map_err(|e| ApiError::unprocessable(e.to_string()))?,
        None => state.default_currency.clone(),
    };
    let opening_balance = match body.opening_balance {
        Some(input) => Amount::parse(&input.into_text()?)
            .map_err(|e| ApiError::unprocessable(e.to_string()))?,
        None => Amount::ZERO,
    };

    let account = Account::open(user.id, currency, opening_balance);
    state.accounts.create_account(&account).await?;

    info!(
        account_id = %account.id,
        owner_id = %user.id,
        currency = %account.currency,
        balance = %account.balance,
        "Account opened"
    );
    Ok((StatusCode::CREATED, Json(AccountResponse::from(&account))))
}

/// List the caller's accounts.
async fn list_accounts(
    State(state): State<Arc<ApiState>>,
    caller: Caller,
) -> ApiResult<Json<Vec<AccountResponse>>> {
    let user = caller.user(&state).await?;
    let accounts = state.accounts.find_accounts_by_owner(user.id).await?;
    Ok(Json(accounts.iter().map(AccountResponse::from).collect()))
}

/// Read one of the caller's accounts.
async fn get_account(
    State(state): State<Arc<ApiState>>,
    caller: Caller,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<AccountResponse>> {
    let Path(id) = path?;
    let user = caller.user(&state).await?;

    owned_account(&state, &user, id)
        .await?
        .map(|account| Json(AccountResponse::from(&account)))
        .ok_or_else(|| ApiError::not_found("Account", id))
}

/// Transfers touching one of the caller's accounts, newest first.
async fn list_account_transfers(
    State(state): State<Arc<ApiState>>,
    caller: Caller,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<Vec<TransferResponse>>> {
    let Path(id) = path?;
    let user = caller.user(&state).await?;

    if owned_account(&state, &user, id).await?.is_none() {
        return Err(ApiError::not_found("Account", id));
    }
    let transfers = state.ledger.find_transfers_by_account(id).await?;
    Ok(Json(transfers.iter().map(TransferResponse::from).collect()))
}

/// Accounts owned by someone else are indistinguishable from missing ones.
async fn owned_account(
    state: &ApiState,
    user: &User,
    account_id: AccountId,
) -> ApiResult<Option<Account>> {
    let account = state.accounts.find_account(account_id).await?;
    Ok(account.filter(|account| account.is_owned_by(user.id)))
}

/// Queue an identity event for the projection worker.
async fn accept_user_event(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<UserEventAccepted>)> {
    let event = decode_envelope(&body).map_err(|e| {
        warn!(error = %e, "Rejected user event");
        ApiError::bad_request(e.to_string())
    })?;

    let accepted = UserEventAccepted {
        status: "accepted".to_string(),
        event_type: event.event_type().to_string(),
        user_uuid: event.user_uuid(),
    };

    match state.user_events.try_send(event) {
        Ok(()) => Ok((StatusCode::ACCEPTED, Json(accepted))),
        Err(TrySendError::Full(_)) => {
            warn!(user_uuid = %accepted.user_uuid, "User event queue full");
            Err(ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "busy",
                "User event queue is full, retry later",
            ))
        },
        Err(TrySendError::Closed(_)) => Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "shutting_down",
            "User event intake is closed",
        )),
    }
}

// =============================================================================
// Tests
// =============================================================================
