//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the escrow ledger over HTTP.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                    | Description                          |
//! |--------|-------------------------|--------------------------------------|
//! | GET    | `/health`               | Liveness probe                       |
//! | GET    | `/status`               | Version, escrow count, custody       |
//! | POST   | `/escrows`              | Create an escrow                     |
//! | GET    | `/escrows`              | Page through escrows                 |
//! | GET    | `/escrows/count`        | Number of escrows ever created       |
//! | GET    | `/escrows/:id`          | Escrow by id                         |
//! | POST   | `/escrows/:id/release`  | Release custody to the seller        |
//! | POST   | `/escrows/:id/refund`   | Refund custody to the buyer          |
//! | GET    | `/accounts/:address`    | Payout balance and related escrows   |
//! | POST   | `/rpc`                  | JSON-RPC 2.0 gateway                 |
//! | GET    | `/ws`                   | WebSocket stream of ledger events    |
//!
//! The caller identity is part of every mutating request body. Whatever sits
//! in front of this API is responsible for authenticating it.

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use escrow_contracts::{
    CustodySummary, ErrorKind, EscrowError, EscrowLedger, SettlementBackend, SettlementError,
};
use escrow_protocol::config::{DEFAULT_DISPLAY_DECIMALS, DEFAULT_PAGE_SIZE};
use escrow_protocol::units::parse_ether;
use escrow_protocol::{Address, EscrowId, EscrowRecord, EscrowState, Wei};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// The ledger as the node holds it: backend picked at startup.
pub type SharedLedger = Arc<EscrowLedger<Box<dyn SettlementBackend>>>;

/// Shared application state available to all request handlers.
///
/// Cheap to clone: everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// Name of the settlement backend, for `/status`.
    pub backend: &'static str,
    pub ledger: SharedLedger,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
}

impl AppState {
    fn create_escrow(
        &self,
        caller: Address,
        seller: Address,
        value: Wei,
    ) -> Result<EscrowId, EscrowError> {
        let started = Instant::now();
        let outcome = self.ledger.create_escrow(caller, seller, value);
        self.metrics
            .observe("create_escrow", EscrowState::AwaitingDelivery, started, &outcome);
        outcome
    }

    /// Release or refund, returning the settled record.
    fn settle(
        &self,
        caller: Address,
        id: EscrowId,
        terminal: EscrowState,
    ) -> Result<EscrowRecord, EscrowError> {
        let started = Instant::now();
        let (operation, outcome) = match terminal {
            EscrowState::Complete => ("release_funds", self.ledger.release_funds(caller, id)),
            EscrowState::Refunded => ("refund", self.ledger.refund(caller, id)),
            EscrowState::AwaitingDelivery => {
                return Err(EscrowError::Settlement(SettlementError::Rejected(format!(
                    "cannot settle escrow {id} into {terminal}"
                ))))
            }
        };
        self.metrics.observe(operation, terminal, started, &outcome);
        outcome?;
        self.ledger.get_escrow(id)
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/escrows", post(create_escrow_handler).get(list_escrows_handler))
        .route("/escrows/count", get(escrow_count_handler))
        .route("/escrows/:id", get(escrow_handler))
        .route("/escrows/:id/release", post(release_handler))
        .route("/escrows/:id/refund", post(refund_handler))
        .route("/accounts/:address", get(account_handler))
        .route("/rpc", post(rpc_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Body of `POST /escrows`. Exactly one of `value` (wei) or `value_ether`
/// must be given.
#[derive(Debug, Deserialize)]
pub struct CreateEscrowRequest {
    pub caller: Address,
    pub seller: Address,
    #[serde(default)]
    pub value: Option<Wei>,
    #[serde(default)]
    pub value_ether: Option<String>,
}

impl CreateEscrowRequest {
    fn attached_value(&self) -> Result<Wei, ApiError> {
        match (&self.value, &self.value_ether) {
            (Some(wei), None) => Ok(*wei),
            (None, Some(ether)) => {
                parse_ether(ether).map_err(|e| ApiError::BadRequest(e.to_string()))
            }
            _ => Err(ApiError::BadRequest(
                "exactly one of `value` or `value_ether` is required".into(),
            )),
        }
    }
}

/// Body of `POST /escrows/:id/release` and `/refund`.
#[derive(Debug, Deserialize)]
pub struct CallerRequest {
    pub caller: Address,
}

/// Query of `GET /escrows`.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: u64,
    pub limit: Option<usize>,
}

/// An escrow record plus display helpers.
#[derive(Debug, Serialize, Deserialize)]
pub struct EscrowView {
    #[serde(flatten)]
    pub record: EscrowRecord,
    /// `amount` in ether, truncated for display.
    pub amount_ether: String,
    pub buyer_short: String,
    pub seller_short: String,
}

impl From<EscrowRecord> for EscrowView {
    fn from(record: EscrowRecord) -> Self {
        Self {
            amount_ether: record.amount.to_ether_string(DEFAULT_DISPLAY_DECIMALS),
            buyer_short: record.buyer.short(),
            seller_short: record.seller.short(),
            record,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub escrow_id: EscrowId,
    pub escrow: EscrowView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PageResponse {
    /// Total escrows in the ledger, not just this page.
    pub total: u64,
    pub offset: u64,
    pub escrows: Vec<EscrowView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub backend: String,
    pub escrow_count: u64,
    pub custody: CustodySummary,
    pub solvent: bool,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// Response payload for `GET /accounts/:address`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub address: Address,
    /// Value paid out to this account so far.
    pub balance: Wei,
    pub balance_ether: String,
    /// Escrows where this account is buyer or seller.
    pub escrows: Vec<EscrowView>,
}

/// Error body returned by REST endpoints on failure.
///
/// `kind` is the ledger's [`ErrorKind`] name, or `InvalidRequest` for
/// malformed input that never reached the ledger.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Anything a REST handler can fail with.
#[derive(Debug)]
pub enum ApiError {
    Ledger(EscrowError),
    BadRequest(String),
}

impl From<EscrowError> for ApiError {
    fn from(e: EscrowError) -> Self {
        ApiError::Ledger(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// HTTP status for a ledger error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidAmount => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Settlement => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Ledger(e) => (
                status_for(e.kind()),
                ErrorResponse {
                    error: e.to_string(),
                    kind: e.kind().to_string(),
                },
            ),
            ApiError::BadRequest(error) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error,
                    kind: "InvalidRequest".into(),
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`: node version and a custody snapshot.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let custody = state.ledger.custody();
    Json(StatusResponse {
        version: state.version.clone(),
        backend: state.backend.to_string(),
        escrow_count: custody.escrow_count,
        solvent: custody.is_solvent(),
        custody,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `POST /escrows`: takes the attached value into custody.
async fn create_escrow_handler(
    State(state): State<AppState>,
    payload: Result<Json<CreateEscrowRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let value = req.attached_value()?;
    let escrow_id = state.create_escrow(req.caller, req.seller, value)?;
    let record = state.ledger.get_escrow(escrow_id)?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            escrow_id,
            escrow: record.into(),
        }),
    ))
}

/// `GET /escrows?offset=&limit=`: escrows in id order.
async fn list_escrows_handler(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Json<PageResponse> {
    let escrows = state
        .ledger
        .escrows(page.offset, page.limit.unwrap_or(DEFAULT_PAGE_SIZE))
        .into_iter()
        .map(EscrowView::from)
        .collect();
    Json(PageResponse {
        total: state.ledger.escrow_count(),
        offset: page.offset,
        escrows,
    })
}

/// `GET /escrows/count`
async fn escrow_count_handler(State(state): State<AppState>) -> Json<CountResponse> {
    Json(CountResponse {
        count: state.ledger.escrow_count(),
    })
}

/// `GET /escrows/:id`
async fn escrow_handler(
    Path(id): Path<EscrowId>,
    State(state): State<AppState>,
) -> Result<Json<EscrowView>, ApiError> {
    Ok(Json(state.ledger.get_escrow(id)?.into()))
}

/// `POST /escrows/:id/release`
async fn release_handler(
    Path(id): Path<EscrowId>,
    State(state): State<AppState>,
    payload: Result<Json<CallerRequest>, JsonRejection>,
) -> Result<Json<EscrowView>, ApiError> {
    let Json(req) = payload?;
    Ok(Json(state.settle(req.caller, id, EscrowState::Complete)?.into()))
}

/// `POST /escrows/:id/refund`
async fn refund_handler(
    Path(id): Path<EscrowId>,
    State(state): State<AppState>,
    payload: Result<Json<CallerRequest>, JsonRejection>,
) -> Result<Json<EscrowView>, ApiError> {
    let Json(req) = payload?;
    Ok(Json(state.settle(req.caller, id, EscrowState::Refunded)?.into()))
}

/// `GET /accounts/:address`: payout balance and every escrow the address
/// is party to. Unknown addresses get a zero balance and no escrows.
async fn account_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AccountResponse>, ApiError> {
    let address = Address::parse(&address).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let balance = state.ledger.balance_of(&address)?;
    let escrows = state
        .ledger
        .escrows_for(&address)
        .into_iter()
        .map(EscrowView::from)
        .collect();

    Ok(Json(AccountResponse {
        address,
        balance,
        balance_ether: balance.to_ether_string(DEFAULT_DISPLAY_DECIMALS),
        escrows,
    }))
}

// ---------------------------------------------------------------------------
// JSON-RPC
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version. Must be "2.0".
    pub jsonrpc: String,
    pub method: String,
    /// Positional parameters.
    pub params: Option<serde_json::Value>,
    /// Request identifier. Echoed back in the response.
    pub id: serde_json::Value,
}

/// A JSON-RPC 2.0 response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: serde_json::Value,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    /// `{ "kind": <ErrorKind> }` for ledger errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_params(detail: impl std::fmt::Display) -> Self {
        Self::new(-32602, format!("Invalid params: {detail}"))
    }
}

impl From<EscrowError> for JsonRpcError {
    fn from(e: EscrowError) -> Self {
        let code = match e.kind() {
            ErrorKind::NotFound => -32001,
            ErrorKind::Unauthorized => -32002,
            ErrorKind::InvalidAmount => -32003,
            ErrorKind::Settlement => -32603,
        };
        Self {
            code,
            message: e.to_string(),
            data: Some(serde_json::json!({ "kind": e.kind() })),
        }
    }
}

fn rpc_params<T: DeserializeOwned>(params: Option<serde_json::Value>) -> Result<T, JsonRpcError> {
    serde_json::from_value(params.unwrap_or(serde_json::Value::Null))
        .map_err(|e| JsonRpcError::invalid_params(e))
}

fn to_rpc_value<T: Serialize>(value: T) -> Result<serde_json::Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::new(-32603, format!("Internal error: {e}")))
}

/// Dispatches one JSON-RPC call.
///
/// | Method                | Params                           | Result        |
/// |-----------------------|----------------------------------|---------------|
/// | `escrow_createEscrow` | `[caller, seller, value_wei]`    | escrow id     |
/// | `escrow_releaseFunds` | `[caller, escrow_id]`            | escrow record |
/// | `escrow_refund`       | `[caller, escrow_id]`            | escrow record |
/// | `escrow_getEscrow`    | `[escrow_id]`                    | escrow record |
/// | `escrow_escrowCount`  | none                             | count         |
fn dispatch_rpc(
    state: &AppState,
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<serde_json::Value, JsonRpcError> {
    match method {
        "escrow_createEscrow" => {
            let (caller, seller, value): (Address, Address, Wei) = rpc_params(params)?;
            to_rpc_value(state.create_escrow(caller, seller, value)?)
        }
        "escrow_releaseFunds" => {
            let (caller, id): (Address, EscrowId) = rpc_params(params)?;
            to_rpc_value(EscrowView::from(state.settle(caller, id, EscrowState::Complete)?))
        }
        "escrow_refund" => {
            let (caller, id): (Address, EscrowId) = rpc_params(params)?;
            to_rpc_value(EscrowView::from(state.settle(caller, id, EscrowState::Refunded)?))
        }
        "escrow_getEscrow" => {
            let (id,): (EscrowId,) = rpc_params(params)?;
            to_rpc_value(EscrowView::from(state.ledger.get_escrow(id)?))
        }
        "escrow_escrowCount" => to_rpc_value(state.ledger.escrow_count()),
        _ => Err(JsonRpcError::new(-32601, format!("Method not found: {method}"))),
    }
}

/// Unwraps a JSON-RPC envelope. On failure, returns the id to echo (null
/// when the body has none) with the error to answer.
fn parse_rpc_request(
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<JsonRpcRequest, (serde_json::Value, JsonRpcError)> {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(JsonRejection::JsonSyntaxError(e)) => {
            return Err((
                serde_json::Value::Null,
                JsonRpcError::new(-32700, format!("Parse error: {e}")),
            ))
        }
        Err(rejection) => {
            return Err((
                serde_json::Value::Null,
                JsonRpcError::new(-32600, format!("Invalid Request: {rejection}")),
            ))
        }
    };

    let id = body.get("id").cloned().unwrap_or(serde_json::Value::Null);
    let req: JsonRpcRequest = serde_json::from_value(body)
        .map_err(|e| (id, JsonRpcError::new(-32600, format!("Invalid Request: {e}"))))?;
    if req.jsonrpc != "2.0" {
        return Err((
            req.id,
            JsonRpcError::new(-32600, "Invalid Request: jsonrpc must be \"2.0\""),
        ));
    }
    Ok(req)
}

/// `POST /rpc`: JSON-RPC 2.0 gateway. Always answers 200; failures travel
/// in the `error` member, malformed envelopes included.
async fn rpc_handler(
    State(state): State<AppState>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Json<JsonRpcResponse> {
    let (id, outcome) = match parse_rpc_request(payload) {
        Ok(req) => {
            let outcome = dispatch_rpc(&state, &req.method, req.params);
            (req.id, outcome)
        }
        Err((id, e)) => (id, Err(e)),
    };

    let (result, error) = match outcome {
        Ok(value) => (Some(value), None),
        Err(e) => (None, Some(e)),
    };
    Json(JsonRpcResponse {
        jsonrpc: "2.0".into(),
        result,
        error,
        id,
    })
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// `GET /ws`: WebSocket upgrade for live ledger events.
///
/// Clients receive one JSON-encoded `EscrowEvent` per committed mutation.
/// Client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Forwards ledger events until the client disconnects.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.ledger.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to serialize ws event");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "ws subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
