use std::sync::Arc;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use crate::peer::hash::compute_hash;
use crate::peer::manager::PeerManager;
use crate::trust_store::TrustHandle;
use shared::protocol::API_PREFIX;
use shared::types::{PeerSummary, TrustedCertificate};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<PeerManager>,
    pub trust: TrustHandle,
}

#[derive(Serialize)]
pub struct ConfigResponse {
    pub service_type: String,
}

#[derive(Serialize)]
pub struct CountsResponse {
    pub total: usize,
    pub visible: usize,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/config", get(get_config))
        .route("/peers", get(get_peers))
        .route("/peers/counts", get(get_counts))
        .route("/peers/hash", get(get_hash))
        .route("/peers/:id", get(get_peer))
        .route("/trust", get(get_trusted))
        .route("/trust/:hostname", get(get_trusted_one).delete(forget_trusted));

    Router::new().nest(API_PREFIX, api).with_state(state)
}

async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        service_type: state.manager.get_service_type(),
    })
}

async fn get_peers(State(state): State<AppState>) -> Json<Vec<PeerSummary>> {
    Json(state.manager.list_current_peers())
}

async fn get_counts(State(state): State<AppState>) -> Json<CountsResponse> {
    Json(CountsResponse {
        total: state.manager.get_total_count(),
        visible: state.manager.get_visible_count(),
    })
}

async fn get_hash(State(state): State<AppState>) -> String {
    compute_hash(&state.manager.list_current_peers())
}

/// Every entry with this id; re-announced peers have more than one
async fn get_peer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PeerSummary>>, StatusCode> {
    let peers = state.manager.find_peers(&id);
    if peers.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(peers))
}

async fn get_trusted(
    State(state): State<AppState>,
) -> Result<Json<Vec<TrustedCertificate>>, StatusCode> {
    state
        .trust
        .get_all()
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to query trusted certificates: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn get_trusted_one(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> Result<Json<TrustedCertificate>, StatusCode> {
    state
        .trust
        .get_one(hostname)
        .await
        .map_err(|e| {
            tracing::error!("Failed to query trusted certificate: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn forget_trusted(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> StatusCode {
    match state.trust.forget(hostname).await {
        Ok(true) => StatusCode::NO_CONTENT,
        Ok(false) => StatusCode::NOT_FOUND,
        Err(e) => {
            tracing::error!("Failed to forget trusted certificate: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
