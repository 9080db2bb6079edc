//! EIP-1559 fee correction.
//!
//! Some networks return a `maxFeePerGas` estimate wildly above the legacy
//! gas price. When the estimate exceeds the legacy price by more than
//! [`CORRECTION_THRESHOLD`]x it is discarded: the max fee becomes the legacy
//! price plus 10% and the tip drops to [`FALLBACK_PRIORITY_FEE`].

use chain::FeeEstimate;

/// Estimates above `gas_price * CORRECTION_THRESHOLD` are discarded.
pub const CORRECTION_THRESHOLD: u128 = 10;

/// Corrected max fee is `gas_price * 110 / 100`.
pub const CORRECTION_NUMERATOR: u128 = 110;
pub const CORRECTION_DENOMINATOR: u128 = 100;

/// Tip used with a corrected max fee, in wei.
pub const FALLBACK_PRIORITY_FEE: u128 = 1;

/// Fees to put on the transaction, given the legacy price and the node's
/// EIP-1559 estimate.
pub fn correct_fees(gas_price: u128, estimate: FeeEstimate) -> FeeEstimate {
    if estimate.max_fee_per_gas <= gas_price.saturating_mul(CORRECTION_THRESHOLD) {
        return estimate;
    }

    let max_fee_per_gas = gas_price.saturating_mul(CORRECTION_NUMERATOR) / CORRECTION_DENOMINATOR;
    FeeEstimate {
        max_fee_per_gas,
        max_priority_fee_per_gas: FALLBACK_PRIORITY_FEE.min(max_fee_per_gas),
    }
}
