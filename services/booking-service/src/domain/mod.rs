pub mod models;

pub use models::{Booking, BookingStatus};
