//! Cross-venue edge arithmetic shared by the scanner and the risk engine.

use rust_decimal::Decimal;

use crate::{Costs, OpportunityPayload, Px};

const BPS_SCALE: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);
const TWO: Decimal = Decimal::from_parts(2, 0, 0, false, 0);

/// Full breakdown of one directional buy/sell path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgeBreakdown {
    pub gross_bps: Decimal,
    pub fees_bps: Decimal,
    pub net_bps: Decimal,
    pub abs_spread: Decimal,
    pub mid: Decimal,
}

/// Evaluate one path: buy at `buy_px`, sell at `sell_px`, with all frictions
/// already expressed in bps. Returns `None` when the midpoint is not
/// positive (the bps scaling would be meaningless).
#[must_use]
pub fn evaluate_path(
    buy_px: Px,
    sell_px: Px,
    fees_bps: Decimal,
    slippage_bps: Decimal,
    borrow_bps: Decimal,
) -> Option<EdgeBreakdown> {
    let mid = (buy_px + sell_px) / TWO;
    if mid <= Decimal::ZERO {
        return None;
    }
    let abs_spread = sell_px - buy_px;
    let gross_bps = abs_spread / mid * BPS_SCALE;
    let net_bps = gross_bps - (fees_bps + slippage_bps + borrow_bps);
    Some(EdgeBreakdown {
        gross_bps,
        fees_bps,
        net_bps,
        abs_spread,
        mid,
    })
}

/// Combined fee estimate in bps: per-leg `feeBps` wins when any leg supplies
/// it, otherwise the payload-level fee fraction is scaled up.
#[must_use]
pub fn fees_bps(payload: &OpportunityPayload) -> Decimal {
    let supplied: Vec<Decimal> = payload.legs.iter().filter_map(|leg| leg.fee_bps).collect();
    if !supplied.is_empty() {
        supplied.into_iter().sum()
    } else {
        payload
            .costs
            .map(|costs| costs.fees * BPS_SCALE)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Evaluate an opportunity payload from its own legs. `None` when either
/// side is missing or the midpoint degenerates.
#[must_use]
pub fn evaluate_payload(payload: &OpportunityPayload) -> Option<EdgeBreakdown> {
    let buy = payload.buy_leg()?;
    let sell = payload.sell_leg()?;
    let costs = payload.costs.unwrap_or(Costs::default());
    evaluate_path(
        buy.est_px,
        sell.est_px,
        fees_bps(payload),
        costs.slippage * BPS_SCALE,
        costs.borrow * BPS_SCALE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Leg, Side};
    use rust_decimal_macros::dec;

    fn payload(buy_px: Decimal, sell_px: Decimal) -> OpportunityPayload {
        OpportunityPayload {
            paper: true,
            edge_bps: None,
            legs: vec![
                Leg {
                    exchange: "binance".into(),
                    instrument_id: "BTCUSDT".into(),
                    side: Side::Buy,
                    est_px: buy_px,
                    size: Some(dec!(1)),
                    fee_bps: None,
                },
                Leg {
                    exchange: "bybit".into(),
                    instrument_id: "BTCUSDT".into(),
                    side: Side::Sell,
                    est_px: sell_px,
                    size: Some(dec!(1)),
                    fee_bps: None,
                },
            ],
            costs: None,
        }
    }

    #[test]
    fn gross_edge_is_spread_over_mid() {
        let edge = evaluate_path(
            dec!(100),
            dec!(101),
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
        )
        .unwrap();
        assert_eq!(edge.mid, dec!(100.5));
        assert_eq!(edge.abs_spread, dec!(1));
        // 1 / 100.5 * 10000
        assert!((edge.gross_bps - dec!(99.5024875621890547)).abs() < dec!(0.000001));
        assert_eq!(edge.net_bps, edge.gross_bps);
    }

    #[test]
    fn frictions_subtract_from_gross() {
        let edge = evaluate_path(dec!(100), dec!(101), dec!(15), dec!(5), dec!(2)).unwrap();
        assert_eq!(edge.net_bps, edge.gross_bps - dec!(22));
    }

    #[test]
    fn degenerate_midpoint_yields_none() {
        assert!(evaluate_path(
            dec!(-1),
            dec!(1),
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO
        )
        .is_none());
    }

    #[test]
    fn leg_fees_take_precedence_over_cost_fraction() {
        let mut p = payload(dec!(100), dec!(101));
        p.costs = Some(Costs {
            fees: dec!(0.001),
            ..Costs::default()
        });
        // No leg fees: fall back to the fraction, scaled to bps.
        assert_eq!(fees_bps(&p), dec!(10));

        p.legs[0].fee_bps = Some(dec!(7.5));
        p.legs[1].fee_bps = Some(dec!(10));
        assert_eq!(fees_bps(&p), dec!(17.5));
    }

    #[test]
    fn swapping_venues_flips_the_path_sign() {
        let forward = evaluate_payload(&payload(dec!(100), dec!(101))).unwrap();
        let backward = evaluate_payload(&payload(dec!(101), dec!(100))).unwrap();
        assert_eq!(forward.gross_bps, -backward.gross_bps);
        assert_eq!(forward.mid, backward.mid);
    }
}
