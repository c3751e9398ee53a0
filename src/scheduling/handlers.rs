use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use tracing::{info, instrument};

use crate::state::AppState;

use super::dto::{CreateAppointment, ListQuery};
use super::error::Error;
use super::service;
use super::store::AppointmentView;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route("/appointments/:id", delete(delete_appointment))
}

#[instrument(skip(state))]
pub async fn list_appointments(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<AppointmentView>>, Error> {
    let items = service::list(state.appointments.as_ref(), q).await?;
    Ok(Json(items))
}

#[instrument(skip(state, body))]
pub async fn create_appointment(
    State(state): State<AppState>,
    Json(body): Json<CreateAppointment>,
) -> Result<(StatusCode, Json<AppointmentView>), Error> {
    let view = service::book(state.appointments.as_ref(), state.catalog.as_ref(), body).await?;
    info!(
        appointment_id = view.id,
        master_id = view.master.id,
        starts_at = %view.starts_at,
        "appointment booked"
    );
    Ok((StatusCode::CREATED, Json(view)))
}

#[instrument(skip(state))]
pub async fn delete_appointment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, Error> {
    service::cancel(state.appointments.as_ref(), id).await?;
    info!(appointment_id = id, "appointment cancelled");
    Ok(StatusCode::NO_CONTENT)
}
