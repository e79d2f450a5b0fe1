//! Integer-only amount arithmetic: decimal parsing, slippage bounds and carve-outs
//!
//! Every function here floors. A minimum-output bound that rounds up could make an
//! otherwise acceptable fill revert on-chain, so no value is ever rounded toward the user.

use crate::error::{TransferError, TransferResult};

use ethers::types::U256;

/// Basis points in one whole
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Widest token precision whose scale factor fits in 256 bits
pub const MAX_DECIMALS: u8 = 77;

/// Amounts derived for one action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountBounds {
    /// Input amount in the source token's base units
    pub base_units: U256,
    /// Output the route is expected to produce, in the output token's base units
    pub expected_output: U256,
    /// Smallest output the action will accept
    pub min_output: U256,
}

impl AmountBounds {
    pub fn new(base_units: U256, expected_output: U256, slippage_bps: u32) -> TransferResult<Self> {
        let min_output = apply_slippage(expected_output, slippage_bps)?;
        Ok(Self {
            base_units,
            expected_output,
            min_output,
        })
    }
}

/// Split a plain decimal literal into its integer and fractional digits.
///
/// Accepts `123`, `123.45`, `0.5` and `.5`. Signs, exponents, whitespace and
/// anything that is not an ASCII digit are rejected.
pub(crate) fn split_decimal(input: &str) -> Result<(&str, &str), &'static str> {
    if input.is_empty() {
        return Err("amount is empty");
    }

    let (int_part, frac_part) = match input.split_once('.') {
        Some((i, f)) => (i, f),
        None => (input, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err("amount has no digits");
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err("amount must be a plain decimal number");
    }

    Ok((int_part, frac_part))
}

/// Whether `input` is a syntactically valid decimal greater than zero
pub(crate) fn is_positive_decimal(input: &str) -> Result<(), &'static str> {
    let (int_part, frac_part) = split_decimal(input)?;
    if int_part.bytes().chain(frac_part.bytes()).all(|b| b == b'0') {
        return Err("amount must be greater than zero");
    }
    Ok(())
}

/// Convert a user-facing decimal amount into base units at `decimals` precision.
///
/// Fails with `InvalidAmount` unless the value is positive and exactly representable;
/// trailing zeros beyond the precision are fine, significant digits are not.
pub fn to_base_units(amount: &str, decimals: u8) -> TransferResult<U256> {
    let invalid = |reason: &str| TransferError::InvalidAmount {
        amount: amount.to_string(),
        reason: reason.to_string(),
    };

    let (int_part, frac_part) = split_decimal(amount).map_err(invalid)?;

    let precision = decimals as usize;
    let frac_part = if frac_part.len() > precision {
        let (kept, dropped) = frac_part.split_at(precision);
        if dropped.bytes().any(|b| b != b'0') {
            return Err(invalid(&format!(
                "more than {} fractional digits",
                decimals
            )));
        }
        kept
    } else {
        frac_part
    };

    let mut digits = String::with_capacity(int_part.len() + precision);
    digits.push_str(int_part);
    digits.push_str(frac_part);
    for _ in frac_part.len()..precision {
        digits.push('0');
    }
    if digits.is_empty() {
        digits.push('0');
    }

    let value = U256::from_dec_str(&digits).map_err(|_| invalid("amount does not fit in 256 bits"))?;
    if value.is_zero() {
        return Err(invalid("amount must be greater than zero"));
    }

    Ok(value)
}

/// Render base units as a decimal string at `decimals` precision, without trailing zeros
pub fn from_base_units(value: U256, decimals: u8) -> String {
    let digits = value.to_string();
    let precision = decimals as usize;

    if precision == 0 {
        return digits;
    }

    let padded = if digits.len() <= precision {
        format!("{}{}", "0".repeat(precision - digits.len() + 1), digits)
    } else {
        digits
    };

    let (int_part, frac_part) = padded.split_at(padded.len() - precision);
    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{}.{}", int_part, frac_part)
    }
}

/// `floor(value * numerator / BPS_DENOMINATOR)` without intermediate overflow
fn mul_bps_floor(value: U256, numerator: u32) -> U256 {
    let denominator = U256::from(BPS_DENOMINATOR);
    let numerator = U256::from(numerator);
    let quotient = value / denominator;
    let remainder = value % denominator;
    quotient * numerator + remainder * numerator / denominator
}

/// Lower bound accepted after `slippage_bps` of price movement.
///
/// Returns `floor(amount * (10000 - slippage_bps) / 10000)`.
pub fn apply_slippage(amount: U256, slippage_bps: u32) -> TransferResult<U256> {
    if slippage_bps >= BPS_DENOMINATOR {
        return Err(TransferError::InvalidSlippage { bps: slippage_bps });
    }
    Ok(mul_bps_floor(amount, BPS_DENOMINATOR - slippage_bps))
}

/// The `ratio_bps` share of `total`, floored. Used for gas-reserve carve-outs.
pub fn proportional_allocation(total: U256, ratio_bps: u32) -> TransferResult<U256> {
    if ratio_bps > BPS_DENOMINATOR {
        return Err(TransferError::InvalidAmount {
            amount: total.to_string(),
            reason: format!("allocation of {} bps exceeds the whole", ratio_bps),
        });
    }
    Ok(mul_bps_floor(total, ratio_bps))
}

/// Move a base-unit amount between precisions, flooring when precision drops.
///
/// Fails with `InvalidAmount` when either precision exceeds `MAX_DECIMALS` or the
/// scaled value does not fit in 256 bits.
pub fn rescale(value: U256, from_decimals: u8, to_decimals: u8) -> TransferResult<U256> {
    use std::cmp::Ordering;

    let invalid = |reason: String| TransferError::InvalidAmount {
        amount: value.to_string(),
        reason,
    };

    if from_decimals > MAX_DECIMALS || to_decimals > MAX_DECIMALS {
        return Err(invalid(format!(
            "cannot rescale from {} to {} decimals",
            from_decimals, to_decimals
        )));
    }

    match to_decimals.cmp(&from_decimals) {
        Ordering::Equal => Ok(value),
        Ordering::Greater => {
            let factor = U256::exp10((to_decimals - from_decimals) as usize);
            value
                .checked_mul(factor)
                .ok_or_else(|| invalid(format!("overflows at {} decimals", to_decimals)))
        }
        Ordering::Less => Ok(value / U256::exp10((from_decimals - to_decimals) as usize)),
    }
}
