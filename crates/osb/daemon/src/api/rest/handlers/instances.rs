//! Service instance handlers

use super::{body, query};
use crate::api::rest::state::AppState;
use crate::engine::{DeprovisionOutcome, ProvisionOutcome};
use crate::error::BrokerResult;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use osb_types::{
    DeprovisionQuery, EmptyResponse, LastOperationQuery, LastOperationResponse,
    OperationResponse, ProvisionQuery, ProvisionRequest, ProvisionResponse, UpdateRequest,
};

/// `PUT /v2/service_instances/:instance_id`
pub async fn provision_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    params: Result<Query<ProvisionQuery>, QueryRejection>,
    payload: Result<Json<ProvisionRequest>, JsonRejection>,
) -> BrokerResult<(StatusCode, Json<ProvisionResponse>)> {
    let params = query(params)?;
    let request = body(payload)?;

    let outcome = state
        .broker
        .provision(&instance_id, request, params.accepts_incomplete)
        .await?;

    Ok(match outcome {
        ProvisionOutcome::Created { dashboard_url } => (
            StatusCode::CREATED,
            Json(ProvisionResponse {
                dashboard_url: Some(dashboard_url),
                operation: None,
            }),
        ),
        ProvisionOutcome::AlreadyExists { dashboard_url } => (
            StatusCode::OK,
            Json(ProvisionResponse {
                dashboard_url: Some(dashboard_url),
                operation: None,
            }),
        ),
        ProvisionOutcome::Accepted { operation } => (
            StatusCode::ACCEPTED,
            Json(ProvisionResponse {
                dashboard_url: None,
                operation: Some(operation),
            }),
        ),
    })
}

/// `PATCH /v2/service_instances/:instance_id`
pub async fn update_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    payload: Result<Json<UpdateRequest>, JsonRejection>,
) -> BrokerResult<Json<EmptyResponse>> {
    let request = body(payload)?;
    state.broker.update(&instance_id, request).await?;
    Ok(Json(EmptyResponse::default()))
}

/// `DELETE /v2/service_instances/:instance_id`
pub async fn deprovision_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    params: Result<Query<DeprovisionQuery>, QueryRejection>,
) -> BrokerResult<Response> {
    let params = query(params)?;

    Ok(match state.broker.deprovision(&instance_id, params).await? {
        DeprovisionOutcome::Deleted => {
            (StatusCode::OK, Json(EmptyResponse::default())).into_response()
        }
        DeprovisionOutcome::Accepted { operation } => {
            (StatusCode::ACCEPTED, Json(OperationResponse { operation })).into_response()
        }
    })
}

/// `GET /v2/service_instances/:instance_id/last_operation`
pub async fn last_operation(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    params: Result<Query<LastOperationQuery>, QueryRejection>,
) -> BrokerResult<Json<LastOperationResponse>> {
    let params = query(params)?;
    let status = state.broker.last_operation(&instance_id, params).await?;
    Ok(Json(status))
}
