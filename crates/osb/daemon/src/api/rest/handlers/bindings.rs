//! Service binding handlers

use super::{body, query};
use crate::api::rest::state::AppState;
use crate::engine::BindOutcome;
use crate::error::BrokerResult;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use osb_types::{BindRequest, BindResponse, EmptyResponse, UnbindQuery};

/// `PUT /v2/service_instances/:instance_id/service_bindings/:binding_id`
pub async fn bind(
    State(state): State<AppState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    payload: Result<Json<BindRequest>, JsonRejection>,
) -> BrokerResult<(StatusCode, Json<BindResponse>)> {
    let request = body(payload)?;

    Ok(match state.broker.bind(&instance_id, &binding_id, request).await? {
        BindOutcome::Created(credentials) => {
            (StatusCode::CREATED, Json(BindResponse { credentials }))
        }
        BindOutcome::Existing(credentials) => (StatusCode::OK, Json(BindResponse { credentials })),
    })
}

/// `DELETE /v2/service_instances/:instance_id/service_bindings/:binding_id`
pub async fn unbind(
    State(state): State<AppState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    params: Result<Query<UnbindQuery>, QueryRejection>,
) -> BrokerResult<Json<EmptyResponse>> {
    let params = query(params)?;
    state.broker.unbind(&instance_id, &binding_id, params).await?;
    Ok(Json(EmptyResponse::default()))
}
