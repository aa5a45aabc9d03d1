// libs/appointment-cell/src/models.rs
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::services::clock::ClockTime;

pub const DEFAULT_DAILY_LIMIT: usize = 17;

// ==============================================================================
// SCHEDULE CONFIGURATION
// ==============================================================================

/// A doctor's working day. Replaced wholesale by an administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorTimings {
    pub start_time: ClockTime,
    pub break_start: ClockTime,
    pub break_end: ClockTime,
    pub end_time: ClockTime,
}

impl Default for DoctorTimings {
    fn default() -> Self {
        Self {
            start_time: ClockTime::from_minutes(11 * 60),
            break_start: ClockTime::from_minutes(13 * 60 + 15),
            break_end: ClockTime::from_minutes(14 * 60 + 30),
            end_time: ClockTime::from_minutes(16 * 60 + 30),
        }
    }
}

impl DoctorTimings {
    /// Checks `start_time < break_start < break_end < end_time`.
    pub fn validate(&self) -> Result<(), AppointmentError> {
        if self.start_time >= self.break_start {
            return Err(AppointmentError::InvalidTimings(format!(
                "start time {} must be before break start {}", self.start_time, self.break_start
            )));
        }
        if self.break_start >= self.break_end {
            return Err(AppointmentError::InvalidTimings(format!(
                "break start {} must be before break end {}", self.break_start, self.break_end
            )));
        }
        if self.break_end >= self.end_time {
            return Err(AppointmentError::InvalidTimings(format!(
                "break end {} must be before end time {}", self.break_end, self.end_time
            )));
        }
        Ok(())
    }
}

/// How the allocator treats a visit that would run into the break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakPolicy {
    /// Any overlap of the visit with the break moves it to `break_end`.
    #[default]
    RejectOverlap,
    /// Only a visit *starting* inside the break is moved.
    StartOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingConfig {
    pub daily_limit: usize,
    pub break_policy: BreakPolicy,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            daily_limit: DEFAULT_DAILY_LIMIT,
            break_policy: BreakPolicy::default(),
        }
    }
}

impl SchedulingConfig {
    pub fn with_daily_limit(daily_limit: usize) -> Self {
        Self {
            daily_limit,
            ..Self::default()
        }
    }
}

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VisitReason {
    #[serde(rename = "New Patient")]
    NewPatient,

    #[serde(rename = "Follow-up", alias = "Follow Up")]
    FollowUp,

    #[serde(rename = "Report Show")]
    ReportShow,
}

impl VisitReason {
    pub const fn duration_minutes(self) -> u16 {
        match self {
            VisitReason::NewPatient => 10,
            VisitReason::FollowUp => 7,
            VisitReason::ReportShow => 12,
        }
    }
}

impl fmt::Display for VisitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisitReason::NewPatient => write!(f, "New Patient"),
            VisitReason::FollowUp => write!(f, "Follow-up"),
            VisitReason::ReportShow => write!(f, "Report Show"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_name: String,
    pub pin: String,
    pub concern: String,
    pub reason: VisitReason,
    pub contact: String,
    pub serial: u32,
    pub time: ClockTime,
    pub date: NaiveDate,
    #[serde(default)]
    pub is_absent: bool,
}

impl Appointment {
    pub fn duration_minutes(&self) -> u16 {
        self.reason.duration_minutes()
    }

    pub fn end_time(&self) -> ClockTime {
        self.time.add_minutes(self.duration_minutes())
    }

    pub fn is_active(&self) -> bool {
        !self.is_absent
    }

    /// True once the scheduled start lies in the past.
    pub fn is_completed(&self, now: NaiveDateTime) -> bool {
        let today = now.date();
        let now_minutes = (now.hour() * 60 + now.minute()) as u16;
        self.date < today || (self.date == today && self.time.minutes() < now_minutes)
    }
}

/// Appointment as returned to clients, with its derived completion status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentView {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub is_completed: bool,
}

impl AppointmentView {
    pub fn at(appointment: Appointment, now: NaiveDateTime) -> Self {
        let is_completed = appointment.is_completed(now);
        Self { appointment, is_completed }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_name: String,
    pub pin: String,
    pub concern: String,
    pub reason: VisitReason,
    pub contact: String,
    pub date: NaiveDate,
}

impl BookAppointmentRequest {
    /// Trims the fields that identify and reach the patient.
    pub fn normalized(mut self) -> Self {
        self.patient_name = self.patient_name.trim().to_string();
        self.pin = self.pin.trim().to_string();
        self.contact = self.contact.trim().to_string();
        self
    }

    pub fn validate(&self) -> Result<(), AppointmentError> {
        if self.patient_name.trim().is_empty() {
            return Err(AppointmentError::ValidationError("Patient name is required".to_string()));
        }
        if self.pin.trim().is_empty() {
            return Err(AppointmentError::ValidationError("PIN is required".to_string()));
        }
        if self.contact.trim().is_empty() {
            return Err(AppointmentError::ValidationError("Contact is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingRejection {
    CapacityExceeded,
    DuplicateBookingForPin,
    ScheduleExhausted,
}

impl BookingRejection {
    pub fn message(self) -> &'static str {
        match self {
            BookingRejection::CapacityExceeded => {
                "Daily appointment limit is filled. Please contact the emergency line."
            }
            BookingRejection::DuplicateBookingForPin => {
                "This PIN already has an appointment booked for today."
            }
            BookingRejection::ScheduleExhausted => {
                "This appointment exceeds the doctor's availability for the day."
            }
        }
    }
}

impl fmt::Display for BookingRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Outcome of a bookability check. `error` carries the user-facing reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDecision {
    pub can_book: bool,
    pub error: Option<String>,
    pub rejection: Option<BookingRejection>,
}

impl BookingDecision {
    pub fn accept() -> Self {
        Self { can_book: true, error: None, rejection: None }
    }

    pub fn reject(rejection: BookingRejection) -> Self {
        Self {
            can_book: false,
            error: Some(rejection.message().to_string()),
            rejection: Some(rejection),
        }
    }
}

/// Result of re-packing one date. `dropped` holds the active appointments
/// that no longer fit before the end of the day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleOutcome {
    pub appointments: Vec<Appointment>,
    pub dropped: Vec<Appointment>,
}

impl RescheduleOutcome {
    pub fn has_drops(&self) -> bool {
        !self.dropped.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateReschedule {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub outcome: RescheduleOutcome,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("{0}")]
    Rejected(BookingRejection),

    #[error("Invalid doctor timings: {0}")]
    InvalidTimings(String),

    #[error("Booking conflicts with an existing appointment: {0}")]
    Conflict(String),

    #[error("Unauthorized access to appointment")]
    Unauthorized,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
