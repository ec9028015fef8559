pub mod saga;

pub use saga::{
    InventoryReservationFailedHandler, PaymentFailedHandler, PaymentSucceededHandler,
};
