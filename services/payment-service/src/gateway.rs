//! Payment gateway seam.
//!
//! The real processor is an external collaborator; the platform ships a
//! probabilistic simulation behind the same trait so the saga can be driven
//! end to end with a configurable success ratio.

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Outcome of the external charge effect. A decline is a domain outcome,
/// not an infrastructure error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Approved { transaction_id: String },
    Declined { reason: String },
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(
        &self,
        booking_id: Uuid,
        amount: Decimal,
        method: &str,
    ) -> anyhow::Result<ChargeOutcome>;
}

/// Simulated processor: approves with the configured probability.
pub struct SimulatedGateway {
    success_ratio: f64,
}

impl SimulatedGateway {
    pub fn new(success_ratio: f64) -> Self {
        Self {
            success_ratio: success_ratio.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn charge(
        &self,
        booking_id: Uuid,
        _amount: Decimal,
        _method: &str,
    ) -> anyhow::Result<ChargeOutcome> {
        let approved = rand::thread_rng().gen_bool(self.success_ratio);

        if approved {
            Ok(ChargeOutcome::Approved {
                transaction_id: format!("txn_{}", Uuid::new_v4().simple()),
            })
        } else {
            Ok(ChargeOutcome::Declined {
                reason: format!("Payment declined by processor for booking {}", booking_id),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ratio_one_always_approves() {
        let gateway = SimulatedGateway::new(1.0);
        for _ in 0..20 {
            let outcome = gateway
                .charge(Uuid::new_v4(), Decimal::new(50000, 2), "CARD")
                .await
                .unwrap();
            assert!(matches!(outcome, ChargeOutcome::Approved { .. }));
        }
    }

    #[tokio::test]
    async fn test_ratio_zero_always_declines() {
        let gateway = SimulatedGateway::new(0.0);
        for _ in 0..20 {
            let outcome = gateway
                .charge(Uuid::new_v4(), Decimal::new(50000, 2), "CARD")
                .await
                .unwrap();
            assert!(matches!(outcome, ChargeOutcome::Declined { .. }));
        }
    }

    #[test]
    fn test_out_of_range_ratio_is_clamped() {
        // gen_bool panics outside [0, 1]; the constructor clamps.
        let _ = SimulatedGateway::new(1.7);
        let _ = SimulatedGateway::new(-0.2);
    }
}
