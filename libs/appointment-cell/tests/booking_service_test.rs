// libs/appointment-cell/tests/booking_service_test.rs
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use appointment_cell::models::{
    Appointment, AppointmentError, BookAppointmentRequest, BookingRejection, DoctorTimings,
    SchedulingConfig, VisitReason,
};
use appointment_cell::services::booking::AppointmentBookingService;
use appointment_cell::services::clock::ClockTime;
use appointment_cell::services::store::{AppointmentStore, InMemoryAppointmentStore};

// ==============================================================================
// TEST FIXTURES AND UTILITIES
// ==============================================================================

struct TestSetup {
    service: Arc<AppointmentBookingService>,
    store: Arc<InMemoryAppointmentStore>,
}

impl TestSetup {
    fn new(timings: Option<DoctorTimings>, config: SchedulingConfig) -> Self {
        let store = Arc::new(match timings {
            Some(timings) => InMemoryAppointmentStore::with_timings(timings),
            None => InMemoryAppointmentStore::new(),
        });
        let service = Arc::new(AppointmentBookingService::new(store.clone(), config));
        Self { service, store }
    }

    fn with_timings(start: &str, break_start: &str, break_end: &str, end: &str) -> Self {
        Self::new(
            Some(DoctorTimings {
                start_time: t(start),
                break_start: t(break_start),
                break_end: t(break_end),
                end_time: t(end),
            }),
            SchedulingConfig::default(),
        )
    }
}

/// In-memory store whose `replace_for_date` fails for one date.
struct FailingReplaceStore {
    inner: InMemoryAppointmentStore,
    failing_date: NaiveDate,
}

#[async_trait]
impl AppointmentStore for FailingReplaceStore {
    async fn fetch_timings(&self) -> Result<Option<DoctorTimings>, AppointmentError> {
        self.inner.fetch_timings().await
    }

    async fn save_timings(&self, timings: &DoctorTimings) -> Result<(), AppointmentError> {
        self.inner.save_timings(timings).await
    }

    async fn list_for_date(&self, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        self.inner.list_for_date(date).await
    }

    async fn list_from_date(&self, from: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        self.inner.list_from_date(from).await
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        self.inner.get_appointment(id).await
    }

    async fn insert_appointment(&self, appointment: &Appointment) -> Result<(), AppointmentError> {
        self.inner.insert_appointment(appointment).await
    }

    async fn replace_for_date(
        &self,
        date: NaiveDate,
        appointments: &[Appointment],
    ) -> Result<(), AppointmentError> {
        if date == self.failing_date {
            return Err(AppointmentError::DatabaseError("connection reset".to_string()));
        }
        self.inner.replace_for_date(date, appointments).await
    }
}

fn t(raw: &str) -> ClockTime {
    raw.parse().unwrap()
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
}

fn request(pin: &str, reason: VisitReason) -> BookAppointmentRequest {
    BookAppointmentRequest {
        patient_name: format!("Patient {}", pin),
        pin: pin.to_string(),
        concern: "Back pain".to_string(),
        reason,
        contact: "0800000000".to_string(),
        date: day(),
    }
}

// ==============================================================================
// BOOKING
// ==============================================================================

#[tokio::test]
async fn test_booking_uses_default_timings_when_none_saved() {
    let setup = TestSetup::new(None, SchedulingConfig::default());

    let timings = setup.service.current_timings().await.unwrap();
    assert_eq!(timings, DoctorTimings::default());

    let first = setup.service.book_appointment(request("1111", VisitReason::NewPatient)).await.unwrap();
    let second = setup.service.book_appointment(request("2222", VisitReason::FollowUp)).await.unwrap();

    assert_eq!((first.serial, first.time), (1, t("11:00")));
    assert_eq!((second.serial, second.time), (2, t("11:10")));
    assert_eq!(setup.store.len().await, 2);
}

#[tokio::test]
async fn test_booking_rejections() {
    let setup = TestSetup::new(
        Some(DoctorTimings::default()),
        SchedulingConfig::with_daily_limit(2),
    );

    setup.service.book_appointment(request("1111", VisitReason::NewPatient)).await.unwrap();

    let duplicate = setup.service.book_appointment(request("1111", VisitReason::FollowUp)).await;
    assert_matches!(duplicate, Err(AppointmentError::Rejected(BookingRejection::DuplicateBookingForPin)));

    setup.service.book_appointment(request("2222", VisitReason::NewPatient)).await.unwrap();

    let over_limit = setup.service.book_appointment(request("3333", VisitReason::FollowUp)).await;
    assert_matches!(over_limit, Err(AppointmentError::Rejected(BookingRejection::CapacityExceeded)));
}

#[tokio::test]
async fn test_padded_pin_counts_as_the_same_patient() {
    let setup = TestSetup::new(None, SchedulingConfig::default());
    setup.service.book_appointment(request("1111", VisitReason::NewPatient)).await.unwrap();

    let decision = setup.service.check_booking(day(), " 1111", VisitReason::FollowUp).await.unwrap();
    assert!(!decision.can_book);
    assert_eq!(decision.rejection, Some(BookingRejection::DuplicateBookingForPin));

    let padded = setup.service.book_appointment(request(" 1111", VisitReason::FollowUp)).await;
    assert_matches!(padded, Err(AppointmentError::Rejected(BookingRejection::DuplicateBookingForPin)));

    let found = setup.service.find_by_pin(day(), "1111 ").await.unwrap();
    assert_eq!(found.pin, "1111");
    assert_eq!(setup.store.len().await, 1);
}

#[tokio::test]
async fn test_booking_rejected_when_day_is_exhausted() {
    let setup = TestSetup::with_timings("09:00", "09:10", "09:20", "09:30");

    setup.service.book_appointment(request("1", VisitReason::NewPatient)).await.unwrap();
    let second = setup.service.book_appointment(request("2", VisitReason::NewPatient)).await.unwrap();
    assert_eq!(second.time, t("09:20"));

    let third = setup.service.book_appointment(request("3", VisitReason::FollowUp)).await;
    assert_matches!(third, Err(AppointmentError::Rejected(BookingRejection::ScheduleExhausted)));
}

#[tokio::test]
async fn test_booking_request_validation() {
    let setup = TestSetup::new(None, SchedulingConfig::default());

    let mut blank_pin = request("  ", VisitReason::NewPatient);
    blank_pin.pin = "  ".to_string();
    assert_matches!(
        setup.service.book_appointment(blank_pin).await,
        Err(AppointmentError::ValidationError(_))
    );
    assert_eq!(setup.store.len().await, 0);
}

#[tokio::test]
async fn test_check_booking_and_next_slot_do_not_write() {
    let setup = TestSetup::with_timings("09:00", "12:00", "13:00", "17:00");
    setup.service.book_appointment(request("1111", VisitReason::ReportShow)).await.unwrap();

    let decision = setup.service.check_booking(day(), "2222", VisitReason::NewPatient).await.unwrap();
    assert!(decision.can_book);

    let decision = setup.service.check_booking(day(), "1111", VisitReason::NewPatient).await.unwrap();
    assert!(!decision.can_book);
    assert_eq!(decision.error.as_deref(), Some(BookingRejection::DuplicateBookingForPin.message()));

    let slot = setup.service.next_slot(day(), VisitReason::FollowUp).await.unwrap();
    assert_eq!(slot, Some(t("09:12")));
    assert_eq!(setup.store.len().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_get_distinct_slots() {
    let setup = TestSetup::with_timings("09:00", "12:00", "13:00", "17:00");

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let service = setup.service.clone();
            tokio::spawn(async move {
                service.book_appointment(request(&format!("P{}", i), VisitReason::NewPatient)).await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let appointments = setup.service.appointments_for_date(day()).await.unwrap();
    let serials: Vec<u32> = appointments.iter().map(|a| a.serial).collect();
    assert_eq!(serials, (1..=8).collect::<Vec<u32>>());
    for (index, appointment) in appointments.iter().enumerate() {
        assert_eq!(appointment.time, t("09:00").add_minutes(10 * index as u16));
    }
}

// ==============================================================================
// ABSENCE AND CANCELLATION
// ==============================================================================

#[tokio::test]
async fn test_mark_absent_repacks_and_keeps_record() {
    let setup = TestSetup::with_timings("09:00", "12:00", "13:00", "17:00");
    let first = setup.service.book_appointment(request("1", VisitReason::NewPatient)).await.unwrap();
    let second = setup.service.book_appointment(request("2", VisitReason::NewPatient)).await.unwrap();
    let third = setup.service.book_appointment(request("3", VisitReason::FollowUp)).await.unwrap();

    let outcome = setup.service.mark_absent(second.id).await.unwrap();

    assert_eq!(outcome.appointments.len(), 2);
    assert_eq!(outcome.appointments[0].id, first.id);
    assert_eq!(outcome.appointments[1].id, third.id);
    assert_eq!((outcome.appointments[1].serial, outcome.appointments[1].time), (2, t("09:10")));

    let stored = setup.store.list_for_date(day()).await.unwrap();
    assert_eq!(stored.len(), 3);
    let absent = stored.iter().find(|a| a.id == second.id).unwrap();
    assert!(absent.is_absent);

    // The absent patient's PIN can book again.
    let rebooked = setup.service.book_appointment(request("2", VisitReason::FollowUp)).await.unwrap();
    assert_eq!((rebooked.serial, rebooked.time), (3, t("09:17")));
}

#[tokio::test]
async fn test_cancel_removes_and_repacks() {
    let setup = TestSetup::with_timings("09:00", "12:00", "13:00", "17:00");
    let first = setup.service.book_appointment(request("1", VisitReason::ReportShow)).await.unwrap();
    let second = setup.service.book_appointment(request("2", VisitReason::NewPatient)).await.unwrap();

    let outcome = setup.service.cancel_appointment(first.id).await.unwrap();

    assert_eq!(outcome.appointments.len(), 1);
    assert_eq!(outcome.appointments[0].id, second.id);
    assert_eq!((outcome.appointments[0].serial, outcome.appointments[0].time), (1, t("09:00")));
    assert_eq!(setup.store.len().await, 1);
    assert!(setup.store.get_appointment(first.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_with_pin_requires_the_booking_pin() {
    let setup = TestSetup::with_timings("09:00", "12:00", "13:00", "17:00");
    let first = setup.service.book_appointment(request("1111", VisitReason::NewPatient)).await.unwrap();
    setup.service.book_appointment(request("2222", VisitReason::NewPatient)).await.unwrap();

    let wrong = setup.service.cancel_appointment_with_pin(first.id, "2222").await;
    assert_matches!(wrong, Err(AppointmentError::Unauthorized));
    assert_eq!(setup.store.len().await, 2);

    let outcome = setup.service.cancel_appointment_with_pin(first.id, " 1111").await.unwrap();
    assert_eq!(outcome.appointments.len(), 1);
    assert_eq!(outcome.appointments[0].time, t("09:00"));
    assert_eq!(setup.store.len().await, 1);
}

#[tokio::test]
async fn test_unknown_appointment_is_not_found() {
    let setup = TestSetup::new(None, SchedulingConfig::default());

    assert_matches!(setup.service.cancel_appointment(Uuid::new_v4()).await, Err(AppointmentError::NotFound));
    assert_matches!(setup.service.mark_absent(Uuid::new_v4()).await, Err(AppointmentError::NotFound));
    assert_matches!(setup.service.find_by_pin(day(), "0000").await, Err(AppointmentError::NotFound));
}

#[tokio::test]
async fn test_find_by_pin() {
    let setup = TestSetup::new(None, SchedulingConfig::default());
    let booked = setup.service.book_appointment(request("4242", VisitReason::NewPatient)).await.unwrap();

    let found = setup.service.find_by_pin(day(), "4242").await.unwrap();
    assert_eq!(found.id, booked.id);
}

// ==============================================================================
// TIMINGS
// ==============================================================================

#[tokio::test]
async fn test_invalid_timings_are_rejected() {
    let setup = TestSetup::new(None, SchedulingConfig::default());
    let invalid = DoctorTimings {
        start_time: t("13:00"),
        break_start: t("12:00"),
        break_end: t("14:00"),
        end_time: t("17:00"),
    };

    assert_matches!(
        setup.service.update_timings_from(invalid, day()).await,
        Err(AppointmentError::InvalidTimings(_))
    );
    assert_eq!(setup.service.current_timings().await.unwrap(), DoctorTimings::default());
}

#[tokio::test]
async fn test_timings_change_repacks_future_days_and_reports_drops() {
    let setup = TestSetup::with_timings("09:00", "12:00", "13:00", "17:00");
    let booked: Vec<_> = {
        let mut booked = Vec::new();
        for pin in ["1", "2", "3", "4"] {
            booked.push(setup.service.book_appointment(request(pin, VisitReason::NewPatient)).await.unwrap());
        }
        booked
    };

    let mut yesterday_request = request("9", VisitReason::NewPatient);
    yesterday_request.date = day().pred_opt().unwrap();
    let yesterday = setup.service.book_appointment(yesterday_request).await.unwrap();

    let shorter = DoctorTimings {
        start_time: t("10:00"),
        break_start: t("10:20"),
        break_end: t("10:25"),
        end_time: t("10:35"),
    };
    let rescheduled = setup.service.update_timings_from(shorter, day()).await.unwrap();

    assert_eq!(rescheduled.len(), 1);
    assert_eq!(rescheduled[0].date, day());
    let outcome = &rescheduled[0].outcome;
    let times: Vec<ClockTime> = outcome.appointments.iter().map(|a| a.time).collect();
    assert_eq!(times, vec![t("10:00"), t("10:10"), t("10:25")]);
    assert_eq!(outcome.dropped.len(), 1);
    assert_eq!(outcome.dropped[0].id, booked[3].id);

    assert_eq!(setup.service.current_timings().await.unwrap(), shorter);
    assert_eq!(setup.store.list_for_date(day()).await.unwrap().len(), 3);

    let untouched = setup.store.get_appointment(yesterday.id).await.unwrap().unwrap();
    assert_eq!(untouched.time, t("09:00"));
}

#[tokio::test]
async fn test_failed_timings_change_restores_rewritten_days() {
    let original = DoctorTimings {
        start_time: t("09:00"),
        break_start: t("12:00"),
        break_end: t("13:00"),
        end_time: t("17:00"),
    };
    let next_day = day().succ_opt().unwrap();
    let store = Arc::new(FailingReplaceStore {
        inner: InMemoryAppointmentStore::with_timings(original),
        failing_date: next_day,
    });
    let service = AppointmentBookingService::new(store.clone(), SchedulingConfig::default());

    service.book_appointment(request("1", VisitReason::NewPatient)).await.unwrap();
    service.book_appointment(request("2", VisitReason::FollowUp)).await.unwrap();
    let mut tomorrow = request("3", VisitReason::NewPatient);
    tomorrow.date = next_day;
    service.book_appointment(tomorrow).await.unwrap();

    let later = DoctorTimings {
        start_time: t("10:00"),
        break_start: t("12:00"),
        break_end: t("13:00"),
        end_time: t("17:00"),
    };
    let result = service.update_timings_from(later, day()).await;
    assert_matches!(result, Err(AppointmentError::DatabaseError(_)));

    assert_eq!(service.current_timings().await.unwrap(), original);
    let times: Vec<ClockTime> = store.list_for_date(day()).await.unwrap().iter().map(|a| a.time).collect();
    assert_eq!(times, vec![t("09:00"), t("09:10")]);
    assert_eq!(store.list_for_date(next_day).await.unwrap()[0].time, t("09:00"));
}
