pub mod saga;

pub use saga::{BookingCreatedHandler, PaymentFailedHandler, PaymentSucceededHandler};
