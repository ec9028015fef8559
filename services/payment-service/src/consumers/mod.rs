pub mod saga;

pub use saga::InventoryReservedHandler;
