//! REST API server for HashLedger
//!
//! Exposes the chain, mining, consensus, mempool and wallet exchange endpoints
//! peers and clients talk to.

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

use crate::blockchain::{Block, ConfirmationStatus};
use crate::consensus::Resolution;
use crate::crypto::{Address, KeyPair};
use crate::error::ChainError;
use crate::node::{MinedBlock, Node, Submission};
use crate::transaction::{default_fee, now_millis, Amount, Transaction};

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Chain(ChainError),
    InvalidInput(String),
    /// `/add_block` rejections carry a fixed message plus the reason.
    InvalidBlock(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::InvalidBlock(reason) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Invalid block", "reason": reason }),
            ),
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Chain(e) => {
                let status = match e {
                    ChainError::InvalidTransaction(_)
                    | ChainError::InvalidBlock(_)
                    | ChainError::ChainInvalid(_)
                    | ChainError::CryptoError(_)
                    | ChainError::SerializationError(_) => StatusCode::BAD_REQUEST,
                    ChainError::StaleTip(_) | ChainError::MiningCancelled => StatusCode::CONFLICT,
                    ChainError::PeerUnreachable(_) | ChainError::ConfigError(_) | ChainError::IoError(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, json!({ "error": e.to_string() }))
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::Chain(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidInput(rejection.body_text())
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
struct ChainResponse {
    length: usize,
    chain: Vec<Block>,
}

#[derive(Deserialize)]
struct MineRequest {
    #[serde(default)]
    transactions: Option<Vec<Transaction>>,
}

#[derive(Serialize)]
struct MinedResponse {
    message: &'static str,
    block: Block,
    status: ConfirmationStatus,
}

impl MinedResponse {
    fn new(message: &'static str, mined: MinedBlock) -> Self {
        Self {
            message,
            block: mined.block,
            status: mined.status,
        }
    }
}

/// Client-facing transaction body. Amounts arrive as JSON numbers.
#[derive(Deserialize)]
pub struct TransactionRequest {
    pub sender: Address,
    pub receiver: Address,
    pub amount: f64,
    #[serde(default)]
    pub fee: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl TryFrom<TransactionRequest> for Transaction {
    type Error = ApiError;

    fn try_from(req: TransactionRequest) -> Result<Self, Self::Error> {
        let amount = to_amount("amount", req.amount)?;
        let fee = match req.fee {
            Some(fee) => to_amount("fee", fee)?,
            None => default_fee(amount),
        };
        Ok(Transaction {
            sender: req.sender,
            receiver: req.receiver,
            amount,
            fee,
            timestamp: req.timestamp.unwrap_or_else(now_millis),
            signature: req.signature,
        })
    }
}

fn to_amount(field: &str, value: f64) -> Result<Amount, ApiError> {
    Amount::checked_from_num(value)
        .ok_or_else(|| ApiError::InvalidInput(format!("{} is not a representable amount", field)))
}

#[derive(Deserialize)]
struct UpdateMempoolRequest {
    #[serde(default)]
    transactions: Vec<Transaction>,
}

#[derive(Serialize)]
struct WalletResponse {
    address: String,
    public_key: String,
    private_key: String,
}

#[derive(Deserialize)]
struct WalletDetailsRequest {
    address: Address,
}

#[derive(Serialize)]
struct WalletDetailsResponse {
    address: Address,
    balance: Amount,
}

#[derive(Deserialize)]
struct WalletUpdateRequest {
    #[serde(default)]
    wallets: HashMap<Address, Amount>,
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

// ============================================================================
// Middleware
// ============================================================================

/// Logs method, path, status and duration of every request.
async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

/// Build the API router with all endpoints
pub fn build_api_router(node: Arc<Node>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(vec![http::header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        // Chain endpoints
        .route("/chain", get(get_chain))
        .route("/chain/validate", get(validate_chain))
        .route("/balances", get(get_balances))
        .route("/status", get(get_status))
        // Mining & consensus
        .route("/mine", post(mine_block))
        .route("/add_block", post(add_block))
        .route("/nodes/resolve", get(resolve_conflicts))
        // Transactions & mempool
        .route("/transaction", post(submit_transaction))
        .route("/mempool", get(get_mempool))
        .route("/add_mempool", post(add_mempool))
        .route("/update_mempool", post(update_mempool))
        // Wallet exchange
        .route("/wallet", post(create_wallet))
        .route("/wallet_details", post(wallet_details))
        .route("/wallet_details/update", post(update_wallets))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(node)
        .layer(cors)
}

/// Serves the API on `0.0.0.0:port` until the process exits.
pub async fn run_api_server(node: Arc<Node>, port: u16) -> Result<(), ChainError> {
    let app = build_api_router(node);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(%addr, "API server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn get_chain(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let chain = node.ledger().read().await.chain().to_vec();
    Json(ChainResponse {
        length: chain.len(),
        chain,
    })
}

async fn validate_chain(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let ledger = node.ledger().read().await;
    Json(json!({
        "valid": ledger.is_valid(),
        "difficulty": ledger.difficulty(),
        "length": ledger.len(),
    }))
}

async fn get_balances(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(json!({ "balances": node.balances().await }))
}

async fn get_status(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let (length, pending_blocks, epoch, difficulty) = {
        let ledger = node.ledger().read().await;
        (ledger.len(), ledger.pending_len(), ledger.epoch(), ledger.difficulty())
    };
    Json(json!({
        "length": length,
        "pending_blocks": pending_blocks,
        "epoch": epoch,
        "difficulty": difficulty,
        "mempool_size": node.mempool().read().await.len(),
        "peers": node.peers(),
        "blocks_mined": node.blocks_mined(),
        "mining_in_flight": node.mining_in_flight(),
        "mode": node.config().miner.mode,
    }))
}

async fn mine_block(
    State(node): State<Arc<Node>>,
    payload: Result<Json<MineRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let transactions = match req.transactions {
        Some(txs) if !txs.is_empty() => txs,
        _ => return Err(ApiError::InvalidInput("Transactions are required".to_string())),
    };

    let mined = node.mine_transactions(transactions).await?;
    Ok((
        StatusCode::CREATED,
        Json(MinedResponse::new("New block mined and broadcasted", mined)),
    ))
}

async fn add_block(
    State(node): State<Arc<Node>>,
    payload: Result<Json<Block>, JsonRejection>,
) -> Result<Json<ConfirmationStatus>, ApiError> {
    let Json(block) = payload.map_err(|e| ApiError::InvalidInput(format!("Invalid block data: {}", e.body_text())))?;
    match node.receive_block(block).await {
        Ok(status) => Ok(Json(status)),
        Err(e @ ChainError::InvalidBlock(_)) => Err(ApiError::InvalidBlock(e.to_string())),
        Err(e) => Err(e.into()),
    }
}

async fn resolve_conflicts(State(node): State<Arc<Node>>) -> impl IntoResponse {
    match node.resolve().await {
        Resolution::Replaced { .. } => {
            let chain = node.ledger().read().await.chain().to_vec();
            Json(json!({ "message": "Chain was replaced", "new_chain": chain }))
        }
        Resolution::Authoritative => Json(json!({ "message": "Chain is authoritative" })),
    }
}

async fn submit_transaction(
    State(node): State<Arc<Node>>,
    payload: Result<Json<TransactionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let tx = Transaction::try_from(req)?;

    let response = match node.submit_transaction(tx.clone()).await? {
        Submission::Mined(mined) => (
            StatusCode::CREATED,
            Json(MinedResponse::new("Transaction mined into a new block", mined)),
        )
            .into_response(),
        Submission::Queued { admitted: true } => (
            StatusCode::CREATED,
            Json(json!({ "message": "Transaction will be added to the mempool", "transaction": tx })),
        )
            .into_response(),
        Submission::Queued { admitted: false } => {
            Json(MessageResponse { message: "Transaction already known" }).into_response()
        }
    };
    Ok(response)
}

async fn get_mempool(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let mempool = node.mempool().read().await;
    Json(json!({
        "count": mempool.len(),
        "transactions": mempool.transactions(),
    }))
}

async fn add_mempool(
    State(node): State<Arc<Node>>,
    payload: Result<Json<Transaction>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(tx) = payload?;
    let response = if node.admit_from_peer(tx).await? {
        (StatusCode::CREATED, Json(MessageResponse { message: "Transaction added to mempool" })).into_response()
    } else {
        Json(MessageResponse { message: "Transaction already known" }).into_response()
    };
    Ok(response)
}

async fn update_mempool(
    State(node): State<Arc<Node>>,
    payload: Result<Json<UpdateMempoolRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let count = node.sync_mempool(req.transactions).await;
    Ok(Json(json!({ "message": "Mempool updated", "count": count })))
}

async fn create_wallet() -> impl IntoResponse {
    let keypair = KeyPair::generate();
    Json(WalletResponse {
        address: keypair.address(),
        public_key: hex::encode(keypair.public_key_bytes()),
        private_key: keypair.secret_hex(),
    })
}

async fn wallet_details(
    State(node): State<Arc<Node>>,
    payload: Result<Json<WalletDetailsRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let balance = node.balance_of(&req.address).await;
    Ok(Json(WalletDetailsResponse {
        address: req.address,
        balance,
    }))
}

async fn update_wallets(
    State(node): State<Arc<Node>>,
    payload: Result<Json<WalletUpdateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let count = node.update_peer_wallets(req.wallets).await;
    Ok(Json(json!({ "message": "Wallets updated", "count": count })))
}
