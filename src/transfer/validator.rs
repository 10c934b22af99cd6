//! Limit and fee validation
//!
//! Pure functions over the injected engine config. Rejections are typed and
//! synchronous; no record exists until validation passes.

use rust_decimal::{Decimal, RoundingStrategy};

use super::error::ValidationError;
use crate::config::EngineConfig;

/// Immutable fee/payout pair produced at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub fee_amount: Decimal,
    pub net_payout_amount: Decimal,
}

/// Validate a requested amount against configured limits and compute the fee.
///
/// Rules, in order:
/// 1. amount must be positive
/// 2. amount must be within [min_amount, max_amount]
/// 3. fee = round_half_up(amount * fee_percentage, payout_scale)
/// 4. net payout = amount - fee, must remain strictly positive
pub fn validate(amount: Decimal, config: &EngineConfig) -> Result<FeeBreakdown, ValidationError> {
    if amount <= Decimal::ZERO {
        return Err(ValidationError::AmountNotPositive);
    }

    if amount < config.min_amount || amount > config.max_amount {
        return Err(ValidationError::AmountOutOfRange {
            min: config.min_amount.to_string(),
            max: config.max_amount.to_string(),
        });
    }

    let fee_amount = (amount * config.fee_percentage)
        .round_dp_with_strategy(config.payout_scale, RoundingStrategy::MidpointAwayFromZero);

    let net_payout_amount = amount - fee_amount;
    if net_payout_amount <= Decimal::ZERO {
        return Err(ValidationError::FeeExceedsAmount);
    }

    Ok(FeeBreakdown {
        fee_amount,
        net_payout_amount,
    })
}
