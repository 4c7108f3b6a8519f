//! Fixed decimal scale for every persisted quantity and money amount.

use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places kept for stored amounts. Matches the `NUMERIC(28, 8)`
/// columns, so a value that fits is stored exactly.
pub const LEDGER_SCALE: u32 = 8;

/// Round half away from zero to [`LEDGER_SCALE`] places.
pub fn to_ledger_scale(value: Decimal) -> Decimal {
    value
        .round_dp_with_strategy(LEDGER_SCALE, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
}

/// True when `value` survives storage without rounding.
pub fn fits_ledger_scale(value: Decimal) -> bool {
    value.normalize().scale() <= LEDGER_SCALE
}
