use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::{Courier, CourierInput};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/couriers", post(create_courier).get(list_couriers))
        .route("/api/couriers/:id", get(get_courier).put(update_courier))
}

async fn create_courier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CourierInput>,
) -> Result<(StatusCode, Json<Courier>), AppError> {
    let courier = state.directory.create(payload).await?;
    Ok((StatusCode::CREATED, Json(courier)))
}

async fn list_couriers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Courier>>, AppError> {
    Ok(Json(state.directory.get_all().await?))
}

async fn get_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Courier>, AppError> {
    Ok(Json(state.directory.get_by_id(id).await?))
}

async fn update_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CourierInput>,
) -> Result<Json<Courier>, AppError> {
    Ok(Json(state.directory.update(id, payload).await?))
}
