pub mod allocator;
pub mod booking;
pub mod clock;
pub mod store;

pub use allocator::SlotAllocator;
pub use booking::AppointmentBookingService;
pub use clock::{ClockError, ClockTime};
pub use store::{AppointmentStore, InMemoryAppointmentStore, SupabaseAppointmentStore};
