//! Protective leg ordering.

use arbor_core::{Leg, Side};

/// Reorder legs so the first SELL leg executes first, keeping the rest in
/// their original relative order. The short side carries the inventory risk
/// in a cross-venue round trip; testing it first means an unfilled
/// protective leg never leaves a resting long behind.
#[must_use]
pub fn protective_reorder(legs: &[Leg]) -> Vec<Leg> {
    let Some(protective) = legs.iter().position(|leg| leg.side == Side::Sell) else {
        return legs.to_vec();
    };
    let mut reordered = Vec::with_capacity(legs.len());
    reordered.push(legs[protective].clone());
    for (index, leg) in legs.iter().enumerate() {
        if index != protective {
            reordered.push(leg.clone());
        }
    }
    reordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn leg(side: Side, venue: &str) -> Leg {
        Leg {
            exchange: venue.to_string(),
            instrument_id: "BTCUSDT".to_string(),
            side,
            est_px: Decimal::from(100),
            size: Some(Decimal::ONE),
            fee_bps: None,
        }
    }

    #[test]
    fn sell_leg_moves_to_front() {
        let legs = vec![leg(Side::Buy, "binance"), leg(Side::Sell, "bybit")];
        let reordered = protective_reorder(&legs);
        assert_eq!(reordered[0].side, Side::Sell);
        assert_eq!(reordered[0].exchange, "bybit");
        assert_eq!(reordered[1].side, Side::Buy);
    }

    #[test]
    fn already_protective_order_is_stable() {
        let legs = vec![leg(Side::Sell, "bybit"), leg(Side::Buy, "binance")];
        assert_eq!(protective_reorder(&legs), legs);
    }

    #[test]
    fn remainder_keeps_relative_order() {
        let legs = vec![
            leg(Side::Buy, "a"),
            leg(Side::Buy, "b"),
            leg(Side::Sell, "c"),
            leg(Side::Buy, "d"),
        ];
        let reordered = protective_reorder(&legs);
        let venues: Vec<&str> = reordered.iter().map(|l| l.exchange.as_str()).collect();
        assert_eq!(venues, vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn all_buy_legs_are_left_alone() {
        let legs = vec![leg(Side::Buy, "a"), leg(Side::Buy, "b")];
        assert_eq!(protective_reorder(&legs), legs);
    }
}
