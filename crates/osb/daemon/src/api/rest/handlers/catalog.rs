//! Catalog handler

use crate::api::rest::state::AppState;
use axum::{extract::State, Json};
use osb_types::Catalog;

/// `GET /v2/catalog`
pub async fn get_catalog(State(state): State<AppState>) -> Json<Catalog> {
    Json(state.catalog.as_ref().clone())
}
