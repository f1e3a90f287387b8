//! Price comparison for accepted matches.

use beleg_catalog::{ItemKind, TieUpItem};

use crate::result::ItemStatus;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceOutcome {
    pub status: ItemStatus,
    pub allowed: f64,
    pub extra: f64,
}

/// Compare the billed amount against the tie-up allowance.
///
/// `unit` items multiply the rate by the billed quantity (defaulting to 1);
/// `service` and `bundle` items allow the flat rate. Exactly at the allowed
/// amount is GREEN; any overshoot is RED with the delta as `extra`.
pub fn classify_price(tie_up: &TieUpItem, bill_amount: f64, quantity: Option<f64>) -> PriceOutcome {
    let allowed = match tie_up.kind {
        ItemKind::Unit => tie_up.rate * quantity.unwrap_or(1.0),
        ItemKind::Service | ItemKind::Bundle => tie_up.rate,
    };

    if bill_amount <= allowed {
        PriceOutcome {
            status: ItemStatus::Green,
            allowed,
            extra: 0.0,
        }
    } else {
        PriceOutcome {
            status: ItemStatus::Red,
            allowed,
            extra: bill_amount - allowed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(rate: f64) -> TieUpItem {
        TieUpItem {
            item_name: "Consultation".into(),
            rate,
            kind: ItemKind::Service,
        }
    }

    fn unit(rate: f64) -> TieUpItem {
        TieUpItem {
            item_name: "Paracetamol 500mg".into(),
            rate,
            kind: ItemKind::Unit,
        }
    }

    #[test]
    fn within_allowance_is_green() {
        let outcome = classify_price(&service(1500.0), 1500.0, None);
        assert_eq!(outcome.status, ItemStatus::Green);
        assert_eq!(outcome.allowed, 1500.0);
        assert_eq!(outcome.extra, 0.0);
    }

    #[test]
    fn one_paisa_over_is_red() {
        let outcome = classify_price(&service(1500.0), 1500.01, None);
        assert_eq!(outcome.status, ItemStatus::Red);
        assert!((outcome.extra - 0.01).abs() < 1e-9);
    }

    #[test]
    fn overshoot_carries_delta() {
        let outcome = classify_price(&service(8500.0), 10770.0, None);
        assert_eq!(outcome.status, ItemStatus::Red);
        assert_eq!(outcome.allowed, 8500.0);
        assert_eq!(outcome.extra, 2270.0);
    }

    #[test]
    fn unit_items_scale_by_quantity() {
        let outcome = classify_price(&unit(10.0), 45.0, Some(5.0));
        assert_eq!(outcome.status, ItemStatus::Green);
        assert_eq!(outcome.allowed, 50.0);

        // Missing quantity defaults to one unit.
        let outcome = classify_price(&unit(10.0), 30.0, None);
        assert_eq!(outcome.status, ItemStatus::Red);
        assert_eq!(outcome.allowed, 10.0);
        assert_eq!(outcome.extra, 20.0);
    }

    #[test]
    fn bundle_uses_flat_rate() {
        let tie_up = TieUpItem {
            item_name: "Knee Replacement Package".into(),
            rate: 150000.0,
            kind: ItemKind::Bundle,
        };
        let outcome = classify_price(&tie_up, 140000.0, Some(2.0));
        assert_eq!(outcome.status, ItemStatus::Green);
        assert_eq!(outcome.allowed, 150000.0);
    }
}
