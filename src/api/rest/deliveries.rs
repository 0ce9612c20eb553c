use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::assignment::{Assignment, Release};
use crate::error::AppError;
use crate::models::delivery::Delivery;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/delivery/assign", post(assign))
        .route("/api/delivery/unassign", post(unassign))
        .route("/api/delivery/complete", post(complete))
        .route("/api/delivery/:order_id", get(get_delivery))
}

#[derive(Deserialize)]
pub struct OrderRequest {
    #[serde(default)]
    pub order_id: String,
}

#[derive(Serialize)]
pub struct ReleaseResponse {
    pub order_id: String,
    pub status: &'static str,
    pub courier_id: Uuid,
}

impl ReleaseResponse {
    fn new(release: Release, status: &'static str) -> Self {
        Self {
            order_id: release.order_id,
            status,
            courier_id: release.courier_id,
        }
    }
}

async fn assign(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<OrderRequest>,
) -> Result<Json<Assignment>, AppError> {
    Ok(Json(state.engine.assign(&payload.order_id).await?))
}

async fn unassign(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<OrderRequest>,
) -> Result<Json<ReleaseResponse>, AppError> {
    let release = state.engine.unassign(&payload.order_id).await?;
    Ok(Json(ReleaseResponse::new(release, "unassigned")))
}

async fn complete(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<OrderRequest>,
) -> Result<Json<ReleaseResponse>, AppError> {
    let release = state.engine.complete(&payload.order_id).await?;
    Ok(Json(ReleaseResponse::new(release, "completed")))
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(state.ledger.get_by_order_id(&order_id).await?))
}
