pub mod models;

pub use models::{InventoryItem, InventoryReservation, ReservationStatus};
