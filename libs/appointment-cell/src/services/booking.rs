// libs/appointment-cell/src/services/booking.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentError, BookAppointmentRequest, BookingDecision, BookingRejection,
    DateReschedule, DoctorTimings, RescheduleOutcome, SchedulingConfig, VisitReason,
};
use crate::services::allocator::{active_for_date, SlotAllocator};
use crate::services::clock::ClockTime;
use crate::services::store::AppointmentStore;

/// Runs bookings and day re-packs against an [`AppointmentStore`].
///
/// Every read-decide-write sequence holds `write_lock`, so two requests in
/// this process never act on the same snapshot. Writers in other processes
/// are caught by the store's uniqueness constraints.
pub struct AppointmentBookingService {
    store: Arc<dyn AppointmentStore>,
    allocator: SlotAllocator,
    write_lock: Mutex<()>,
}

impl AppointmentBookingService {
    pub fn new(store: Arc<dyn AppointmentStore>, config: SchedulingConfig) -> Self {
        Self {
            store,
            allocator: SlotAllocator::new(config),
            write_lock: Mutex::new(()),
        }
    }

    /// Configured timings, or the clinic defaults when none were saved.
    pub async fn current_timings(&self) -> Result<DoctorTimings, AppointmentError> {
        match self.store.fetch_timings().await? {
            Some(timings) => Ok(timings),
            None => {
                debug!("No doctor timings configured, using defaults");
                Ok(DoctorTimings::default())
            }
        }
    }

    pub async fn appointments_for_date(&self, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        let mut appointments = self.store.list_for_date(date).await?;
        appointments.sort_by_key(|a| (a.is_absent, a.serial));
        Ok(appointments)
    }

    pub async fn find_by_pin(&self, date: NaiveDate, pin: &str) -> Result<Appointment, AppointmentError> {
        let pin = pin.trim();
        self.store
            .list_for_date(date)
            .await?
            .into_iter()
            .find(|a| a.is_active() && a.pin == pin)
            .ok_or(AppointmentError::NotFound)
    }

    pub async fn check_booking(
        &self,
        date: NaiveDate,
        pin: &str,
        reason: VisitReason,
    ) -> Result<BookingDecision, AppointmentError> {
        let timings = self.current_timings().await?;
        let day = self.store.list_for_date(date).await?;
        Ok(self.allocator.can_book_appointment(&day, pin.trim(), date, reason, &timings))
    }

    pub async fn next_slot(
        &self,
        date: NaiveDate,
        reason: VisitReason,
    ) -> Result<Option<ClockTime>, AppointmentError> {
        let timings = self.current_timings().await?;
        let day = self.store.list_for_date(date).await?;
        let active = active_for_date(&day, date);
        Ok(self.allocator.calculate_appointment_time(&active, reason, &timings))
    }

    /// Books the next slot of the day for the requesting patient.
    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let request = request.normalized();
        request.validate()?;
        info!("Booking {} appointment for PIN {} on {}", request.reason, request.pin, request.date);

        let _guard = self.write_lock.lock().await;

        let timings = self.current_timings().await?;
        let day = self.store.list_for_date(request.date).await?;

        let decision = self.allocator.can_book_appointment(
            &day, &request.pin, request.date, request.reason, &timings,
        );
        if let Some(rejection) = decision.rejection {
            warn!("Booking rejected for PIN {} on {}: {}", request.pin, request.date, rejection);
            return Err(AppointmentError::Rejected(rejection));
        }

        let active = active_for_date(&day, request.date);
        let time = self.allocator
            .calculate_appointment_time(&active, request.reason, &timings)
            .ok_or(AppointmentError::Rejected(BookingRejection::ScheduleExhausted))?;

        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_name: request.patient_name,
            pin: request.pin,
            concern: request.concern,
            reason: request.reason,
            contact: request.contact,
            serial: active.len() as u32 + 1,
            time,
            date: request.date,
            is_absent: false,
        };

        self.store.insert_appointment(&appointment).await?;

        info!(
            "Appointment {} booked: serial {} at {} on {}",
            appointment.id,
            appointment.serial,
            appointment.time,
            appointment.date
        );
        Ok(appointment)
    }

    /// Flags the appointment absent and re-packs the rest of its day.
    pub async fn mark_absent(&self, appointment_id: Uuid) -> Result<RescheduleOutcome, AppointmentError> {
        let _guard = self.write_lock.lock().await;

        let appointment = self.store
            .get_appointment(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        let mut day = self.store.list_for_date(appointment.date).await?;
        for entry in day.iter_mut().filter(|a| a.id == appointment_id) {
            entry.is_absent = true;
        }

        info!(
            "Appointment {} (serial {}) marked absent on {}",
            appointment_id,
            appointment.serial,
            appointment.date
        );

        let timings = self.current_timings().await?;
        self.repack_date(appointment.date, day, &timings).await
    }

    /// Removes the appointment and re-packs the rest of its day.
    pub async fn cancel_appointment(&self, appointment_id: Uuid) -> Result<RescheduleOutcome, AppointmentError> {
        self.cancel(appointment_id, None).await
    }

    /// Cancels on behalf of the patient, who must present the booking's PIN.
    pub async fn cancel_appointment_with_pin(
        &self,
        appointment_id: Uuid,
        pin: &str,
    ) -> Result<RescheduleOutcome, AppointmentError> {
        self.cancel(appointment_id, Some(pin.trim())).await
    }

    async fn cancel(
        &self,
        appointment_id: Uuid,
        pin: Option<&str>,
    ) -> Result<RescheduleOutcome, AppointmentError> {
        let _guard = self.write_lock.lock().await;

        let appointment = self.store
            .get_appointment(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        if let Some(pin) = pin {
            if pin != appointment.pin {
                warn!("Cancellation of appointment {} refused: PIN mismatch", appointment_id);
                return Err(AppointmentError::Unauthorized);
            }
        }

        let mut day = self.store.list_for_date(appointment.date).await?;
        day.retain(|a| a.id != appointment_id);

        info!(
            "Appointment {} (serial {}) cancelled on {}",
            appointment_id,
            appointment.serial,
            appointment.date
        );

        let timings = self.current_timings().await?;
        self.repack_date(appointment.date, day, &timings).await
    }

    /// Saves new timings and re-packs every day from today onwards.
    pub async fn update_timings(&self, timings: DoctorTimings) -> Result<Vec<DateReschedule>, AppointmentError> {
        self.update_timings_from(timings, Local::now().date_naive()).await
    }

    /// Re-packs every day from `from` under `timings`, then saves them.
    ///
    /// Days are persisted before the timings. If any write fails, the days
    /// already rewritten get their previous appointments back and the old
    /// timings stay in force.
    pub async fn update_timings_from(
        &self,
        timings: DoctorTimings,
        from: NaiveDate,
    ) -> Result<Vec<DateReschedule>, AppointmentError> {
        timings.validate()?;

        let _guard = self.write_lock.lock().await;

        let mut by_date: BTreeMap<NaiveDate, Vec<Appointment>> = BTreeMap::new();
        for appointment in self.store.list_from_date(from).await? {
            by_date.entry(appointment.date).or_default().push(appointment);
        }

        info!("Timings updated, re-packing {} day(s) from {}", by_date.len(), from);

        let mut results = Vec::with_capacity(by_date.len());
        let mut rewritten: Vec<(NaiveDate, Vec<Appointment>)> = Vec::new();
        for (date, day) in by_date {
            match self.repack_date(date, day.clone(), &timings).await {
                Ok(outcome) => {
                    rewritten.push((date, day));
                    results.push(DateReschedule { date, outcome });
                }
                Err(error) => {
                    self.restore_days(&rewritten).await;
                    return Err(error);
                }
            }
        }

        if let Err(error) = self.store.save_timings(&timings).await {
            self.restore_days(&rewritten).await;
            return Err(error);
        }

        Ok(results)
    }

    async fn restore_days(&self, days: &[(NaiveDate, Vec<Appointment>)]) {
        for (date, appointments) in days {
            warn!("Restoring {} appointment(s) on {}", appointments.len(), date);
            if let Err(error) = self.store.replace_for_date(*date, appointments).await {
                error!("Could not restore appointments on {}: {}", date, error);
            }
        }
    }

    /// Re-packs `day` and persists it. Absent records are kept as they are;
    /// dropped appointments are removed from the store.
    async fn repack_date(
        &self,
        date: NaiveDate,
        day: Vec<Appointment>,
        timings: &DoctorTimings,
    ) -> Result<RescheduleOutcome, AppointmentError> {
        let outcome = self.allocator.reschedule_all_appointments(&day, timings);

        let mut persisted = outcome.appointments.clone();
        persisted.extend(day.into_iter().filter(|a| a.is_absent));

        self.store.replace_for_date(date, &persisted).await?;

        if outcome.has_drops() {
            warn!(
                "{} appointment(s) on {} no longer fit the schedule and were removed: {:?}",
                outcome.dropped.len(),
                date,
                outcome.dropped.iter().map(|a| a.id).collect::<Vec<_>>()
            );
        } else {
            debug!("Re-packed {} appointment(s) on {}", outcome.appointments.len(), date);
        }

        Ok(outcome)
    }
}
