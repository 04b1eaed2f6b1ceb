//! OSB request handlers

mod bindings;
mod catalog;
mod health;
mod instances;

pub use bindings::*;
pub use catalog::*;
pub use health::*;
pub use instances::*;

use crate::error::BrokerError;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Json, Query};

/// Unwrap a JSON body, reporting a malformed one as a 400
pub(crate) fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, BrokerError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| BrokerError::Validation(rejection.body_text()))
}

/// Unwrap a query string, reporting a malformed one as a 400
pub(crate) fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, BrokerError> {
    params
        .map(|Query(value)| value)
        .map_err(|rejection| BrokerError::Validation(rejection.body_text()))
}
