pub mod expiry_sweep;
pub mod outbox_worker;
