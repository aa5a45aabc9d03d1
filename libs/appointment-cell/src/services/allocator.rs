// libs/appointment-cell/src/services/allocator.rs
use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::models::{
    Appointment, BookingDecision, BookingRejection, DoctorTimings, RescheduleOutcome,
    SchedulingConfig, VisitReason,
};
use crate::services::clock::{add_minutes, ClockTime};

/// Sequential slot packer for a single doctor's day.
///
/// Appointments are laid out back to back from `start_time` in booking
/// order, never reordered to fill gaps, moved past the break according to
/// the configured [`crate::models::BreakPolicy`], and refused once a visit
/// would end after `end_time`.
#[derive(Debug, Clone, Default)]
pub struct SlotAllocator {
    config: SchedulingConfig,
}

impl SlotAllocator {
    pub fn new(config: SchedulingConfig) -> Self {
        Self { config }
    }

    /// Start time for a new visit of `reason` after `existing_active`, or
    /// `None` when it would end after the doctor's day.
    pub fn calculate_appointment_time(
        &self,
        existing_active: &[Appointment],
        reason: VisitReason,
        timings: &DoctorTimings,
    ) -> Option<ClockTime> {
        let cursor = existing_active
            .iter()
            .filter(|a| a.is_active())
            .map(Appointment::end_time)
            .max()
            .unwrap_or(timings.start_time);

        self.fit(cursor, reason, timings)
    }

    /// Decides whether `pin` may book a `reason` visit on `date`.
    ///
    /// Checks run in order: daily limit, one booking per PIN and day, then
    /// remaining time in the day.
    pub fn can_book_appointment(
        &self,
        all_appointments: &[Appointment],
        pin: &str,
        date: NaiveDate,
        reason: VisitReason,
        timings: &DoctorTimings,
    ) -> BookingDecision {
        let active = active_for_date(all_appointments, date);

        if active.len() >= self.config.daily_limit {
            debug!("Daily limit of {} reached for {}", self.config.daily_limit, date);
            return BookingDecision::reject(BookingRejection::CapacityExceeded);
        }

        if active.iter().any(|a| a.pin == pin) {
            debug!("PIN {} already booked on {}", pin, date);
            return BookingDecision::reject(BookingRejection::DuplicateBookingForPin);
        }

        if self.calculate_appointment_time(&active, reason, timings).is_none() {
            debug!("No time left on {} for a {} visit", date, reason);
            return BookingDecision::reject(BookingRejection::ScheduleExhausted);
        }

        BookingDecision::accept()
    }

    /// Re-packs one date's active appointments from `start_time`, keeping
    /// their booking order (by serial). Absent appointments are left out of
    /// the result; appointments that no longer fit are returned in `dropped`.
    pub fn reschedule_all_appointments(
        &self,
        appointments: &[Appointment],
        timings: &DoctorTimings,
    ) -> RescheduleOutcome {
        let mut active: Vec<&Appointment> = appointments.iter().filter(|a| a.is_active()).collect();
        active.sort_by_key(|a| (a.serial, a.time));

        let mut outcome = RescheduleOutcome::default();
        let mut cursor = timings.start_time;

        for appointment in active {
            match self.fit(cursor, appointment.reason, timings) {
                Some(start) => {
                    let mut placed = appointment.clone();
                    placed.time = start;
                    placed.serial = outcome.appointments.len() as u32 + 1;
                    cursor = placed.end_time();
                    outcome.appointments.push(placed);
                }
                None => {
                    warn!(
                        "Appointment {} (serial {}) no longer fits before {} on {}",
                        appointment.id, appointment.serial, timings.end_time, appointment.date
                    );
                    outcome.dropped.push(appointment.clone());
                }
            }
        }

        outcome
    }

    fn fit(&self, cursor: ClockTime, reason: VisitReason, timings: &DoctorTimings) -> Option<ClockTime> {
        let duration = reason.duration_minutes();
        let start = self.config.break_policy.place(cursor, duration, timings);

        if add_minutes(start, duration) > timings.end_time {
            None
        } else {
            Some(start)
        }
    }
}

/// The active appointments of `date`, ordered by start time.
pub fn active_for_date(appointments: &[Appointment], date: NaiveDate) -> Vec<Appointment> {
    let mut active: Vec<Appointment> = appointments
        .iter()
        .filter(|a| a.date == date && a.is_active())
        .cloned()
        .collect();
    active.sort_by_key(|a| (a.time, a.serial));
    active
}
