// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AppointmentError, AppointmentView, BookAppointmentRequest, BookingRejection, DoctorTimings,
    VisitReason,
};
use crate::router::AppointmentState;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct CheckBookingQuery {
    pub date: NaiveDate,
    pub pin: String,
    pub reason: VisitReason,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelQuery {
    pub pin: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NextSlotQuery {
    pub date: NaiveDate,
    pub reason: VisitReason,
}

impl From<AppointmentError> for AppError {
    fn from(error: AppointmentError) -> Self {
        match error {
            AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
            AppointmentError::Rejected(rejection @ BookingRejection::DuplicateBookingForPin) => {
                AppError::Conflict(rejection.message().to_string())
            }
            AppointmentError::Rejected(rejection) => AppError::BadRequest(rejection.message().to_string()),
            AppointmentError::InvalidTimings(msg) => AppError::ValidationError(msg),
            AppointmentError::ValidationError(msg) => AppError::ValidationError(msg),
            AppointmentError::Conflict(_) => {
                AppError::Conflict("Appointment slot no longer available, please try again".to_string())
            }
            AppointmentError::Unauthorized => {
                AppError::Forbidden("Not authorized to modify this appointment".to_string())
            }
            AppointmentError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}

fn require_staff(user: &User) -> Result<(), AppError> {
    if user.is_staff() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Only doctors and admins can manage the patient flow".to_string()))
    }
}

/// Patients see the day's queue without other patients' PIN and contact.
fn visible_to(user: &User, view: AppointmentView) -> Value {
    let mut value = json!(view);
    if !user.is_staff() {
        if let Some(fields) = value.as_object_mut() {
            fields.remove("pin");
            fields.remove("contact");
        }
    }
    value
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Query(query): Query<DateQuery>,
) -> Result<Json<Value>, AppError> {
    let now = Local::now().naive_local();
    let appointments: Vec<Value> = state.service
        .appointments_for_date(query.date)
        .await?
        .into_iter()
        .map(|appointment| visible_to(&user, AppointmentView::at(appointment, now)))
        .collect();

    Ok(Json(json!({
        "date": query.date,
        "total": appointments.len(),
        "appointments": appointments,
    })))
}

#[axum::debug_handler]
pub async fn check_booking(
    State(state): State<Arc<AppointmentState>>,
    Query(query): Query<CheckBookingQuery>,
) -> Result<Json<Value>, AppError> {
    let decision = state.service
        .check_booking(query.date, &query.pin, query.reason)
        .await?;

    Ok(Json(json!(decision)))
}

#[axum::debug_handler]
pub async fn next_slot(
    State(state): State<Arc<AppointmentState>>,
    Query(query): Query<NextSlotQuery>,
) -> Result<Json<Value>, AppError> {
    let time = state.service.next_slot(query.date, query.reason).await?;

    Ok(Json(json!({
        "date": query.date,
        "reason": query.reason,
        "time": time,
    })))
}

#[axum::debug_handler]
pub async fn get_appointment_by_pin(
    State(state): State<Arc<AppointmentState>>,
    Path(pin): Path<String>,
    Query(query): Query<DateQuery>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.service.find_by_pin(query.date, &pin).await?;
    let now = Local::now().naive_local();

    Ok(Json(json!(AppointmentView::at(appointment, now))))
}

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    tracing::debug!("User {} booking for PIN {}", user.id, request.pin);

    let appointment = state.service.book_appointment(request).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": format!("Appointment booked at {} (serial {})", appointment.time, appointment.serial),
    })))
}

#[axum::debug_handler]
pub async fn mark_absent(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let outcome = state.service.mark_absent(appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "appointments": outcome.appointments,
        "dropped": outcome.dropped,
        "message": "Patient marked absent and the day was rescheduled",
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Query(query): Query<CancelQuery>,
) -> Result<Json<Value>, AppError> {
    tracing::debug!("User {} cancelling appointment {}", user.id, appointment_id);

    let outcome = if user.is_staff() {
        state.service.cancel_appointment(appointment_id).await?
    } else {
        let pin = query.pin.unwrap_or_default();
        state.service.cancel_appointment_with_pin(appointment_id, &pin).await?
    };

    Ok(Json(json!({
        "success": true,
        "appointments": outcome.appointments,
        "dropped": outcome.dropped,
        "message": "Appointment cancelled and the day was rescheduled",
    })))
}

// ==============================================================================
// TIMINGS HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_timings(
    State(state): State<Arc<AppointmentState>>,
) -> Result<Json<Value>, AppError> {
    let timings = state.service.current_timings().await?;
    Ok(Json(json!(timings)))
}

#[axum::debug_handler]
pub async fn update_timings(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Json(timings): Json<DoctorTimings>,
) -> Result<Json<Value>, AppError> {
    if !user.has_role("admin") {
        return Err(AppError::Forbidden("Only admins can change doctor timings".to_string()));
    }

    let rescheduled = state.service.update_timings(timings).await?;
    let dropped: usize = rescheduled.iter().map(|day| day.outcome.dropped.len()).sum();

    Ok(Json(json!({
        "success": true,
        "timings": timings,
        "rescheduled": rescheduled,
        "dropped_total": dropped,
    })))
}
