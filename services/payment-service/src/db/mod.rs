pub mod payments;

pub use payments::{PaymentStore, RetryOutcome};
