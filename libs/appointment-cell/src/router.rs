// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::models::SchedulingConfig;
use crate::services::booking::AppointmentBookingService;
use crate::services::store::{AppointmentStore, InMemoryAppointmentStore, SupabaseAppointmentStore};

pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub service: AppointmentBookingService,
}

impl AppointmentState {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn AppointmentStore>) -> Self {
        let scheduling = SchedulingConfig::with_daily_limit(config.daily_appointment_limit);
        Self {
            service: AppointmentBookingService::new(store, scheduling),
            config,
        }
    }

    /// Supabase when configured, otherwise a process-local store.
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        let store: Arc<dyn AppointmentStore> = if config.is_database_configured() {
            Arc::new(SupabaseAppointmentStore::new(&config))
        } else {
            tracing::warn!("Supabase not configured, appointments are kept in memory");
            Arc::new(InMemoryAppointmentStore::new())
        };
        Self::new(config, store)
    }
}

pub fn appointment_routes(state: Arc<AppointmentState>) -> Router {
    Router::new()
        .route("/", get(handlers::list_appointments).post(handlers::book_appointment))
        .route("/check", get(handlers::check_booking))
        .route("/next-slot", get(handlers::next_slot))
        .route("/pin/{pin}", get(handlers::get_appointment_by_pin))
        .route("/{appointment_id}", axum::routing::delete(handlers::cancel_appointment))
        .route("/{appointment_id}/absent", post(handlers::mark_absent))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}

pub fn timings_routes(state: Arc<AppointmentState>) -> Router {
    Router::new()
        .route("/", get(handlers::get_timings).put(handlers::update_timings))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
