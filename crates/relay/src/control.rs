//! HTTP control surface: start/stop the relay and read-only status and owner queries.
//!
//! | route | |
//! |---|---|
//! | `GET /health` | liveness of the process |
//! | `GET /status` | running flag, cache size, signer addresses, last health check, event counters |
//! | `POST /start`, `POST /stop` | lifecycle (idempotent) |
//! | `GET /owner/:address` | merged registry + automation view |
//! | `GET /owner/:address/contacts` | contacts and their votes |
//! | `GET /grace-period/:address` | automation grace period + last observed outcome |
//!
//! 256-bit ledger integers are rendered as decimal strings.

use crate::error::LedgerError;
use crate::ledger::{AutomationLedger, RegistryLedger};
use crate::router::RouterCounters;
use crate::supervisor::{HealthSnapshot, Supervisor, SupervisorError};
use crate::types::{ContactInfo, DeathDeclarationStatus, GracePeriodInfo, OwnerMirror, OwnerRecord};
use alloy::primitives::Address;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Build the control router over `supervisor`.
pub fn router<R, A>(supervisor: Arc<Supervisor<R, A>>) -> Router
where
    R: RegistryLedger,
    A: AutomationLedger,
{
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status::<R, A>))
        .route("/start", post(start::<R, A>))
        .route("/stop", post(stop::<R, A>))
        .route("/owner/:address", get(owner::<R, A>))
        .route("/owner/:address/contacts", get(contacts::<R, A>))
        .route("/grace-period/:address", get(grace_period::<R, A>))
        .with_state(supervisor)
}

/// Serve `app` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "control surface listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

enum ApiError {
    BadAddress(String),
    Ledger(LedgerError),
    Start(SupervisorError),
    NotFound(Address),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadAddress(raw) => (StatusCode::BAD_REQUEST, format!("invalid address: {}", raw)),
            ApiError::Ledger(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            ApiError::Start(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
            ApiError::NotFound(owner) => (
                StatusCode::NOT_FOUND,
                format!("owner {} is not registered", owner),
            ),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError::Ledger(e)
    }
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    raw.parse::<Address>()
        .map_err(|_| ApiError::BadAddress(raw.to_string()))
}

#[derive(Serialize)]
struct StatusView {
    running: bool,
    cache_size: usize,
    registry_signer: String,
    automation_signer: String,
    health: HealthSnapshot,
    events: RouterCounters,
}

#[derive(Serialize)]
struct RegistryOwnerView {
    first_name: String,
    last_name: String,
    last_heartbeat: String,
    grace_interval: String,
    is_deceased: bool,
    exists: bool,
}

impl From<OwnerRecord> for RegistryOwnerView {
    fn from(r: OwnerRecord) -> Self {
        Self {
            first_name: r.first_name,
            last_name: r.last_name,
            last_heartbeat: r.last_heartbeat.to_string(),
            grace_interval: r.grace_interval.to_string(),
            is_deceased: r.is_deceased,
            exists: r.exists,
        }
    }
}

#[derive(Serialize)]
struct MirrorView {
    grace_interval: String,
    is_deceased: bool,
    exists: bool,
    last_update: String,
}

impl From<OwnerMirror> for MirrorView {
    fn from(m: OwnerMirror) -> Self {
        Self {
            grace_interval: m.grace_interval.to_string(),
            is_deceased: m.is_deceased,
            exists: m.exists,
            last_update: m.last_update.to_string(),
        }
    }
}

#[derive(Serialize)]
struct DeclarationView {
    is_active: bool,
    start_time: String,
    votes_for: String,
    votes_against: String,
    total_voting_contacts: String,
    consensus_reached: bool,
}

impl From<DeathDeclarationStatus> for DeclarationView {
    fn from(d: DeathDeclarationStatus) -> Self {
        Self {
            is_active: d.is_active,
            start_time: d.start_time.to_string(),
            votes_for: d.votes_for.to_string(),
            votes_against: d.votes_against.to_string(),
            total_voting_contacts: d.total_voting_contacts.to_string(),
            consensus_reached: d.consensus_reached,
        }
    }
}

#[derive(Serialize)]
struct OwnerView {
    address: String,
    registry: RegistryOwnerView,
    automation: MirrorView,
    death_declaration: DeclarationView,
}

#[derive(Serialize)]
struct ContactView {
    contact: String,
    first_name: String,
    last_name: String,
    is_verified: bool,
    has_voted: bool,
    vote: Option<bool>,
}

impl From<ContactInfo> for ContactView {
    fn from(c: ContactInfo) -> Self {
        Self {
            contact: c.contact.to_string(),
            first_name: c.first_name,
            last_name: c.last_name,
            is_verified: c.is_verified,
            has_voted: c.has_voted,
            vote: c.has_voted.then_some(c.vote),
        }
    }
}

#[derive(Serialize)]
struct OutcomeView {
    is_dead: bool,
    process_time: String,
    block_number: u64,
    tx_hash: String,
}

#[derive(Serialize)]
struct GracePeriodView {
    address: String,
    start_time: String,
    has_pinged: bool,
    processed: bool,
    grace_interval: String,
    is_deceased: bool,
    last_outcome: Option<OutcomeView>,
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn status<R, A>(State(sup): State<Arc<Supervisor<R, A>>>) -> Json<StatusView>
where
    R: RegistryLedger,
    A: AutomationLedger,
{
    let s = sup.status().await;
    Json(StatusView {
        running: s.running,
        cache_size: s.cache_size,
        registry_signer: s.registry_signer.to_string(),
        automation_signer: s.automation_signer.to_string(),
        health: s.health,
        events: s.events,
    })
}

async fn start<R, A>(State(sup): State<Arc<Supervisor<R, A>>>) -> Result<Json<serde_json::Value>, ApiError>
where
    R: RegistryLedger,
    A: AutomationLedger,
{
    sup.start().await.map_err(ApiError::Start)?;
    Ok(Json(json!({ "running": true })))
}

async fn stop<R, A>(State(sup): State<Arc<Supervisor<R, A>>>) -> Json<serde_json::Value>
where
    R: RegistryLedger,
    A: AutomationLedger,
{
    sup.stop().await;
    Json(json!({ "running": false }))
}

async fn owner<R, A>(
    State(sup): State<Arc<Supervisor<R, A>>>,
    Path(raw): Path<String>,
) -> Result<Json<OwnerView>, ApiError>
where
    R: RegistryLedger,
    A: AutomationLedger,
{
    let owner = parse_address(&raw)?;
    let engine = sup.engine();
    let (record, mirror, declaration) = tokio::join!(
        engine.cached_owner(owner),
        sup.automation().owner_data(owner),
        sup.registry().death_declaration_status(owner),
    );
    let record = record?.ok_or(ApiError::NotFound(owner))?;
    Ok(Json(OwnerView {
        address: owner.to_string(),
        registry: record.into(),
        automation: mirror?.into(),
        death_declaration: declaration?.into(),
    }))
}

async fn contacts<R, A>(
    State(sup): State<Arc<Supervisor<R, A>>>,
    Path(raw): Path<String>,
) -> Result<Json<Vec<ContactView>>, ApiError>
where
    R: RegistryLedger,
    A: AutomationLedger,
{
    let owner = parse_address(&raw)?;
    let contacts = sup.registry().contacts(owner).await?;
    Ok(Json(contacts.into_iter().map(ContactView::from).collect()))
}

async fn grace_period<R, A>(
    State(sup): State<Arc<Supervisor<R, A>>>,
    Path(raw): Path<String>,
) -> Result<Json<GracePeriodView>, ApiError>
where
    R: RegistryLedger,
    A: AutomationLedger,
{
    let owner = parse_address(&raw)?;
    let info: GracePeriodInfo = sup.automation().grace_period_info(owner).await?;
    let outcome = sup.engine().outcome(&owner).await;
    Ok(Json(GracePeriodView {
        address: owner.to_string(),
        start_time: info.start_time.to_string(),
        has_pinged: info.has_pinged,
        processed: info.processed,
        grace_interval: info.grace_interval.to_string(),
        is_deceased: info.is_deceased,
        last_outcome: outcome.map(|o| OutcomeView {
            is_dead: o.is_dead,
            process_time: o.process_time.to_string(),
            block_number: o.block_number,
            tx_hash: o.tx_hash.to_string(),
        }),
    }))
}
