use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use catalog::store::Package;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub async fn list_dcps(State(state): State<AppState>) -> AppResult<Json<Vec<Package>>> {
    Ok(Json(state.store.list_packages().await?))
}

pub async fn get_dcp(State(state): State<AppState>, Path(uuid): Path<Uuid>) -> AppResult<Json<Package>> {
    let package = state
        .store
        .get_package(uuid)
        .await?
        .ok_or_else(|| AppError::not_found("no such package"))?;
    Ok(Json(package))
}
