use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use customer_registry_core::{Customer, CustomerInput};

use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::service::CustomerServiceError;

pub const DELETED_MESSAGE: &str = "Customer deleted successfully.";

pub async fn create(
    State(state): State<AppState>,
    uri: Uri,
    payload: Result<Json<CustomerInput>, JsonRejection>,
) -> Result<Json<Customer>, ProblemResponse> {
    info!(stage = "http", "create customer request received");
    let Json(input) = payload.map_err(|rejection| malformed_body(&state, &rejection))?;

    let created = state
        .customers()
        .create(input)
        .await
        .map_err(|err| service_problem(&state, &err, &uri))?;
    Ok(Json(created))
}

pub async fn update(
    State(state): State<AppState>,
    uri: Uri,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<CustomerInput>, JsonRejection>,
) -> Result<Json<Customer>, ProblemResponse> {
    let id = customer_id(&state, id)?;
    info!(stage = "http", customer_id = id, "update customer request received");
    let Json(input) = payload.map_err(|rejection| malformed_body(&state, &rejection))?;

    let updated = state
        .customers()
        .update(id, input)
        .await
        .map_err(|err| service_problem(&state, &err, &uri))?;
    Ok(Json(updated))
}

pub async fn delete(
    State(state): State<AppState>,
    uri: Uri,
    id: Result<Path<i64>, PathRejection>,
) -> Result<&'static str, ProblemResponse> {
    let id = customer_id(&state, id)?;
    info!(stage = "http", customer_id = id, "delete customer request received");

    state
        .customers()
        .delete(id)
        .await
        .map_err(|err| service_problem(&state, &err, &uri))?;
    Ok(DELETED_MESSAGE)
}

/// Lists every customer; an empty table answers `204 No Content`.
pub async fn list(State(state): State<AppState>, uri: Uri) -> Result<Response, ProblemResponse> {
    info!(stage = "http", "list customers request received");
    let customers = state
        .customers()
        .list_all()
        .await
        .map_err(|err| service_problem(&state, &err, &uri))?;

    if customers.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    Ok(Json(customers).into_response())
}

pub async fn fetch(
    State(state): State<AppState>,
    uri: Uri,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Customer>, ProblemResponse> {
    let id = customer_id(&state, id)?;
    info!(stage = "http", customer_id = id, "fetch customer request received");

    match state.customers().find_by_id(id).await {
        Ok(Some(customer)) => Ok(Json(customer)),
        Ok(None) => Err(service_problem(
            &state,
            &CustomerServiceError::NotFound(id),
            &uri,
        )),
        Err(err) => Err(service_problem(&state, &err, &uri)),
    }
}

fn customer_id(
    state: &AppState,
    id: Result<Path<i64>, PathRejection>,
) -> Result<i64, ProblemResponse> {
    id.map(|Path(id)| id).map_err(|rejection| {
        ProblemResponse::invalid_fields(state.now(), [("id", rejection.body_text())])
    })
}

fn malformed_body(state: &AppState, rejection: &JsonRejection) -> ProblemResponse {
    ProblemResponse::invalid_fields(state.now(), [("body", rejection.body_text())])
}

fn service_problem(state: &AppState, err: &CustomerServiceError, uri: &Uri) -> ProblemResponse {
    ProblemResponse::from_service_error(err, state.now(), uri.path())
}
