//! Spread and profit arithmetic.

use rust_decimal::Decimal;

use crate::error::ArbitrageError;

/// Estimated outcome of buying on one exchange and selling on another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfitEstimate {
    /// Quote-currency amount spent on the buy leg.
    pub trade_amount: Decimal,
    /// Base quantity bought (trade_amount / buy_price).
    pub quantity: Decimal,
    /// Buy price (ask on the buy exchange).
    pub buy_price: Decimal,
    /// Sell price (bid on the sell exchange).
    pub sell_price: Decimal,
    /// Buy-leg taker fee in quote currency.
    pub buy_fee: Decimal,
    /// Sell-leg taker fee in quote currency.
    pub sell_fee: Decimal,
    /// Quote received for the sell leg before fees.
    pub gross_proceeds: Decimal,
    /// Proceeds minus trade amount, before fees.
    pub gross_profit: Decimal,
    /// Buy fee plus sell fee.
    pub total_fees: Decimal,
    /// Profit after both fees.
    pub net_profit: Decimal,
    /// Net profit over total outlay (trade amount plus buy fee), in percent.
    pub roi_pct: Decimal,
    /// Gross spread percent.
    pub gross_spread_pct: Decimal,
    /// Gross spread minus fees as a percent of the trade amount.
    pub net_spread_pct: Decimal,
}

impl ProfitEstimate {
    /// Whether the trade makes money after fees.
    pub fn is_profitable(&self) -> bool {
        self.net_profit > Decimal::ZERO
    }

    /// Fees as a percent of gross profit. `None` when there is no gross profit.
    pub fn fee_impact_pct(&self) -> Option<Decimal> {
        if self.gross_profit <= Decimal::ZERO {
            return None;
        }
        Some(self.total_fees / self.gross_profit * Decimal::ONE_HUNDRED)
    }
}

/// Gross spread percent: `(sell - buy) / buy * 100`.
pub fn spread_percent(buy_price: Decimal, sell_price: Decimal) -> Result<Decimal, ArbitrageError> {
    if buy_price <= Decimal::ZERO {
        return Err(ArbitrageError::InvalidPrice(buy_price));
    }
    if sell_price <= Decimal::ZERO {
        return Err(ArbitrageError::InvalidPrice(sell_price));
    }
    (sell_price - buy_price)
        .checked_div(buy_price)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .ok_or(ArbitrageError::Overflow)
}

/// Price a trade of `trade_amount` quote currency with taker fees on both legs.
pub fn estimate_profit(
    trade_amount: Decimal,
    buy_price: Decimal,
    sell_price: Decimal,
    buy_taker_pct: Decimal,
    sell_taker_pct: Decimal,
) -> Result<ProfitEstimate, ArbitrageError> {
    if trade_amount <= Decimal::ZERO {
        return Err(ArbitrageError::InvalidAmount(trade_amount));
    }
    for fee in [buy_taker_pct, sell_taker_pct] {
        if fee < Decimal::ZERO || fee >= Decimal::ONE_HUNDRED {
            return Err(ArbitrageError::InvalidFee(fee));
        }
    }
    let gross_spread_pct = spread_percent(buy_price, sell_price)?;

    let quantity = trade_amount
        .checked_div(buy_price)
        .ok_or(ArbitrageError::Overflow)?;
    let buy_fee = percent_of(trade_amount, buy_taker_pct)?;
    let gross_proceeds = quantity
        .checked_mul(sell_price)
        .ok_or(ArbitrageError::Overflow)?;
    let sell_fee = percent_of(gross_proceeds, sell_taker_pct)?;

    let gross_profit = gross_proceeds - trade_amount;
    let total_fees = buy_fee + sell_fee;
    let net_profit = gross_proceeds - sell_fee - buy_fee - trade_amount;
    let roi_pct = net_profit
        .checked_div(trade_amount + buy_fee)
        .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
        .ok_or(ArbitrageError::Overflow)?;
    let fee_pct = total_fees
        .checked_div(trade_amount)
        .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
        .ok_or(ArbitrageError::Overflow)?;

    Ok(ProfitEstimate {
        trade_amount,
        quantity,
        buy_price,
        sell_price,
        buy_fee,
        sell_fee,
        gross_proceeds,
        gross_profit,
        total_fees,
        net_profit,
        roi_pct,
        gross_spread_pct,
        net_spread_pct: gross_spread_pct - fee_pct,
    })
}

fn percent_of(amount: Decimal, pct: Decimal) -> Result<Decimal, ArbitrageError> {
    amount
        .checked_mul(pct)
        .map(|v| v / Decimal::ONE_HUNDRED)
        .ok_or(ArbitrageError::Overflow)
}
