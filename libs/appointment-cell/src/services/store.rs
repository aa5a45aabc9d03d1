// libs/appointment-cell/src/services/store.rs
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{SupabaseClient, SupabaseError};

use crate::models::{Appointment, AppointmentError, DoctorTimings};

/// Persistence for appointments and the doctor's timings.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn fetch_timings(&self) -> Result<Option<DoctorTimings>, AppointmentError>;

    async fn save_timings(&self, timings: &DoctorTimings) -> Result<(), AppointmentError>;

    /// All appointments of `date`, absent ones included, ordered by serial.
    async fn list_for_date(&self, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError>;

    /// All appointments on or after `from`, ordered by date then serial.
    async fn list_from_date(&self, from: NaiveDate) -> Result<Vec<Appointment>, AppointmentError>;

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError>;

    /// Fails with [`AppointmentError::Conflict`] when the date already holds an
    /// active appointment with the same PIN or serial.
    async fn insert_appointment(&self, appointment: &Appointment) -> Result<(), AppointmentError>;

    /// Supersedes every appointment of `date` with `appointments`. On error
    /// the date keeps its previous appointments.
    async fn replace_for_date(
        &self,
        date: NaiveDate,
        appointments: &[Appointment],
    ) -> Result<(), AppointmentError>;
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[derive(Default)]
struct MemoryState {
    timings: Option<DoctorTimings>,
    appointments: Vec<Appointment>,
}

/// Process-local store used when Supabase is not configured.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    state: RwLock<MemoryState>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timings(timings: DoctorTimings) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                timings: Some(timings),
                appointments: Vec::new(),
            }),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.appointments.len()
    }
}

fn sorted(mut appointments: Vec<Appointment>) -> Vec<Appointment> {
    appointments.sort_by_key(|a| (a.date, a.serial, a.time));
    appointments
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn fetch_timings(&self) -> Result<Option<DoctorTimings>, AppointmentError> {
        Ok(self.state.read().await.timings)
    }

    async fn save_timings(&self, timings: &DoctorTimings) -> Result<(), AppointmentError> {
        self.state.write().await.timings = Some(*timings);
        Ok(())
    }

    async fn list_for_date(&self, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        let state = self.state.read().await;
        Ok(sorted(state.appointments.iter().filter(|a| a.date == date).cloned().collect()))
    }

    async fn list_from_date(&self, from: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        let state = self.state.read().await;
        Ok(sorted(state.appointments.iter().filter(|a| a.date >= from).cloned().collect()))
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        let state = self.state.read().await;
        Ok(state.appointments.iter().find(|a| a.id == id).cloned())
    }

    async fn insert_appointment(&self, appointment: &Appointment) -> Result<(), AppointmentError> {
        let mut state = self.state.write().await;

        let clash = state.appointments.iter().find(|existing| {
            existing.id == appointment.id
                || (existing.date == appointment.date
                    && existing.is_active()
                    && appointment.is_active()
                    && (existing.pin == appointment.pin || existing.serial == appointment.serial))
        });
        if let Some(existing) = clash {
            return Err(AppointmentError::Conflict(format!(
                "appointment {} already holds serial {} / PIN {} on {}",
                existing.id, existing.serial, existing.pin, existing.date
            )));
        }

        state.appointments.push(appointment.clone());
        Ok(())
    }

    async fn replace_for_date(
        &self,
        date: NaiveDate,
        appointments: &[Appointment],
    ) -> Result<(), AppointmentError> {
        let mut state = self.state.write().await;
        state.appointments.retain(|a| a.date != date);
        state.appointments.extend(appointments.iter().cloned());
        Ok(())
    }
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

const APPOINTMENTS_TABLE: &str = "/rest/v1/appointments";
const TIMINGS_TABLE: &str = "/rest/v1/doctor_timings";
const TIMINGS_ROW_ID: i64 = 1;

/// PostgREST-backed store. Expects unique indexes on `(date, pin)` and
/// `(date, serial)` restricted to rows where `is_absent` is false.
pub struct SupabaseAppointmentStore {
    supabase: SupabaseClient,
}

impl SupabaseAppointmentStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    async fn insert_rows(&self, appointments: &[Appointment]) -> Result<(), AppointmentError> {
        if appointments.is_empty() {
            return Ok(());
        }

        self.supabase
            .execute(
                Method::POST,
                APPOINTMENTS_TABLE,
                None,
                Some(json!(appointments)),
                "return=minimal",
            )
            .await
            .map_err(map_db_error)
    }

    async fn fetch_appointments(&self, path: &str) -> Result<Vec<Appointment>, AppointmentError> {
        let rows: Vec<Value> = self.supabase
            .request(Method::GET, path, None, None)
            .await
            .map_err(map_db_error)?;

        rows.into_iter()
            .map(|row| serde_json::from_value(row)
                .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointment: {}", e))))
            .collect()
    }
}

fn map_db_error(error: anyhow::Error) -> AppointmentError {
    match error.downcast_ref::<SupabaseError>() {
        Some(SupabaseError::Conflict(msg)) => AppointmentError::Conflict(msg.clone()),
        _ => AppointmentError::DatabaseError(error.to_string()),
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn fetch_timings(&self) -> Result<Option<DoctorTimings>, AppointmentError> {
        let path = format!("{}?id=eq.{}&select=*", TIMINGS_TABLE, TIMINGS_ROW_ID);
        let rows: Vec<Value> = self.supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(map_db_error)?;

        match rows.into_iter().next() {
            Some(row) => serde_json::from_value(row)
                .map(Some)
                .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse timings: {}", e))),
            None => Ok(None),
        }
    }

    async fn save_timings(&self, timings: &DoctorTimings) -> Result<(), AppointmentError> {
        let body = json!({
            "id": TIMINGS_ROW_ID,
            "start_time": timings.start_time,
            "break_start": timings.break_start,
            "break_end": timings.break_end,
            "end_time": timings.end_time,
        });

        self.supabase
            .execute(
                Method::POST,
                TIMINGS_TABLE,
                None,
                Some(body),
                "resolution=merge-duplicates,return=minimal",
            )
            .await
            .map_err(map_db_error)?;

        info!(
            "Doctor timings saved: {}-{} (break {}-{})",
            timings.start_time,
            timings.end_time,
            timings.break_start,
            timings.break_end
        );
        Ok(())
    }

    async fn list_for_date(&self, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!("{}?date=eq.{}&order=serial.asc", APPOINTMENTS_TABLE, date);
        self.fetch_appointments(&path).await
    }

    async fn list_from_date(&self, from: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!("{}?date=gte.{}&order=date.asc,serial.asc", APPOINTMENTS_TABLE, from);
        self.fetch_appointments(&path).await
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        let path = format!("{}?id=eq.{}", APPOINTMENTS_TABLE, id);
        Ok(self.fetch_appointments(&path).await?.into_iter().next())
    }

    async fn insert_appointment(&self, appointment: &Appointment) -> Result<(), AppointmentError> {
        debug!("Inserting appointment {} for {}", appointment.id, appointment.date);

        self.supabase
            .execute(
                Method::POST,
                APPOINTMENTS_TABLE,
                None,
                Some(json!(appointment)),
                "return=minimal",
            )
            .await
            .map_err(map_db_error)
    }

    // PostgREST has no multi-statement transaction. The date's current rows
    // are read first and written back if the insert fails after the delete.
    async fn replace_for_date(
        &self,
        date: NaiveDate,
        appointments: &[Appointment],
    ) -> Result<(), AppointmentError> {
        debug!("Replacing {} appointments for {}", appointments.len(), date);

        let previous = self.list_for_date(date).await?;

        let path = format!("{}?date=eq.{}", APPOINTMENTS_TABLE, date);
        self.supabase
            .execute(Method::DELETE, &path, None, None, "return=minimal")
            .await
            .map_err(map_db_error)?;

        if let Err(error) = self.insert_rows(appointments).await {
            warn!(
                "Replacing appointments for {} failed, restoring {} previous rows: {}",
                date,
                previous.len(),
                error
            );
            if let Err(restore_error) = self.insert_rows(&previous).await {
                error!(
                    "Could not restore appointments {:?} for {}: {}",
                    previous.iter().map(|a| a.id).collect::<Vec<_>>(),
                    date,
                    restore_error
                );
            }
            return Err(error);
        }

        Ok(())
    }
}
