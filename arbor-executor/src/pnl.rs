//! Realized PnL at trade emission.

use rust_decimal::Decimal;

use arbor_core::{FillPayload, OpportunityPayload};

const TWO: Decimal = Decimal::from_parts(2, 0, 0, false, 0);

/// Cash-flow PnL over the collected fills, less the opportunity's estimated
/// cost fractions applied to the traded notional.
///
/// The midpoint comes from the opportunity's estimated prices, not from the
/// fills; costs only apply when a midpoint can be formed from a buy/sell
/// pair.
#[must_use]
pub fn realized_pnl(payload: &OpportunityPayload, fills: &[FillPayload]) -> Decimal {
    let gross: Decimal = fills
        .iter()
        .map(|fill| fill.side.cash_sign() * fill.px * fill.filled_size)
        .sum();
    let qty: Decimal = fills.iter().map(|fill| fill.filled_size).sum();
    let mid = match (payload.buy_leg(), payload.sell_leg()) {
        (Some(buy), Some(sell)) => Some((buy.est_px + sell.est_px) / TWO),
        _ => None,
    };
    let fees_abs = payload.costs.map(|costs| costs.total()).unwrap_or(Decimal::ZERO);
    let total_fees = match mid {
        Some(mid) if !qty.is_zero() => fees_abs * qty * mid,
        _ => Decimal::ZERO,
    };
    gross - total_fees
}
