//! Static broker topology.
//!
//! One durable fanout exchange per event type, named with the canonical
//! event names. Each consuming service binds its own durable queue
//! `<event>.<service>` so that events with two consumers (payment outcomes
//! feed both booking and inventory) fan out instead of competing on a single
//! queue. Every consumer queue has a `<queue>_dlq` counterpart for poison
//! messages.

use crate::events::names;

/// Canonical exchange names, one per event type.
pub mod exchanges {
    pub const BOOKING_CREATED: &str = "booking_created";
    pub const INVENTORY_RESERVED: &str = "inventory_reserved";
    pub const INVENTORY_RESERVATION_FAILED: &str = "inventory_reservation_failed";
    pub const INVENTORY_RELEASED: &str = "inventory_released";
    pub const PAYMENT_SUCCEEDED: &str = "payment_succeeded";
    pub const PAYMENT_FAILED: &str = "payment_failed";
    pub const BOOKING_CANCELLED: &str = "booking_cancelled";
}

/// Service labels used in queue names.
pub mod services {
    pub const BOOKING: &str = "booking";
    pub const INVENTORY: &str = "inventory";
    pub const PAYMENT: &str = "payment";
}

pub const ALL_EXCHANGES: [&str; 7] = [
    exchanges::BOOKING_CREATED,
    exchanges::INVENTORY_RESERVED,
    exchanges::INVENTORY_RESERVATION_FAILED,
    exchanges::INVENTORY_RELEASED,
    exchanges::PAYMENT_SUCCEEDED,
    exchanges::PAYMENT_FAILED,
    exchanges::BOOKING_CANCELLED,
];

/// A durable queue bound to an event exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueBinding {
    pub exchange: &'static str,
    pub service: &'static str,
}

impl QueueBinding {
    pub fn queue(&self) -> String {
        queue_name(self.exchange, self.service)
    }

    pub fn dlq(&self) -> String {
        dlq_name(&self.queue())
    }
}

/// The saga wiring: which service consumes which event.
pub const BINDINGS: [QueueBinding; 7] = [
    QueueBinding {
        exchange: exchanges::BOOKING_CREATED,
        service: services::INVENTORY,
    },
    QueueBinding {
        exchange: exchanges::INVENTORY_RESERVED,
        service: services::PAYMENT,
    },
    QueueBinding {
        exchange: exchanges::INVENTORY_RESERVATION_FAILED,
        service: services::BOOKING,
    },
    QueueBinding {
        exchange: exchanges::PAYMENT_SUCCEEDED,
        service: services::BOOKING,
    },
    QueueBinding {
        exchange: exchanges::PAYMENT_SUCCEEDED,
        service: services::INVENTORY,
    },
    QueueBinding {
        exchange: exchanges::PAYMENT_FAILED,
        service: services::BOOKING,
    },
    QueueBinding {
        exchange: exchanges::PAYMENT_FAILED,
        service: services::INVENTORY,
    },
];

/// Consumer queue name for a service bound to an event exchange.
pub fn queue_name(exchange: &str, service: &str) -> String {
    format!("{}.{}", exchange, service)
}

/// Dead-letter counterpart for a consumer queue.
pub fn dlq_name(queue: &str) -> String {
    format!("{}_dlq", queue)
}

/// Exchange an event name is published to. `None` for unknown names, which
/// the outbox treats as poison.
pub fn exchange_for(event_name: &str) -> Option<&'static str> {
    match event_name {
        names::BOOKING_CREATED => Some(exchanges::BOOKING_CREATED),
        names::INVENTORY_RESERVED => Some(exchanges::INVENTORY_RESERVED),
        names::INVENTORY_RESERVATION_FAILED => Some(exchanges::INVENTORY_RESERVATION_FAILED),
        names::INVENTORY_RELEASED => Some(exchanges::INVENTORY_RELEASED),
        names::PAYMENT_SUCCEEDED => Some(exchanges::PAYMENT_SUCCEEDED),
        names::PAYMENT_FAILED => Some(exchanges::PAYMENT_FAILED),
        names::BOOKING_CANCELLED => Some(exchanges::BOOKING_CANCELLED),
        _ => None,
    }
}

/// Bindings a single service consumes, in declaration order.
pub fn bindings_for(service: &str) -> Vec<QueueBinding> {
    BINDINGS
        .iter()
        .copied()
        .filter(|b| b.service == service)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_and_dlq_names() {
        let binding = QueueBinding {
            exchange: exchanges::PAYMENT_SUCCEEDED,
            service: services::INVENTORY,
        };
        assert_eq!(binding.queue(), "payment_succeeded.inventory");
        assert_eq!(binding.dlq(), "payment_succeeded.inventory_dlq");
    }

    #[test]
    fn test_payment_outcomes_fan_out_to_two_services() {
        let succeeded: Vec<_> = BINDINGS
            .iter()
            .filter(|b| b.exchange == exchanges::PAYMENT_SUCCEEDED)
            .map(|b| b.service)
            .collect();
        assert_eq!(succeeded, vec![services::BOOKING, services::INVENTORY]);

        let failed: Vec<_> = BINDINGS
            .iter()
            .filter(|b| b.exchange == exchanges::PAYMENT_FAILED)
            .map(|b| b.service)
            .collect();
        assert_eq!(failed, vec![services::BOOKING, services::INVENTORY]);
    }

    #[test]
    fn test_bindings_for_service() {
        let inventory = bindings_for(services::INVENTORY);
        assert_eq!(inventory.len(), 3);
        assert!(inventory
            .iter()
            .any(|b| b.exchange == exchanges::BOOKING_CREATED));

        let payment = bindings_for(services::PAYMENT);
        assert_eq!(payment.len(), 1);
        assert_eq!(payment[0].exchange, exchanges::INVENTORY_RESERVED);
    }
}
