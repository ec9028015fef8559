pub mod items;
pub mod reservations;

pub use reservations::{InventoryStore, ReserveOutcome};
