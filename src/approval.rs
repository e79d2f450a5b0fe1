//! Allowance check ahead of a spend

use ethers::types::U256;

/// Whether an approval transaction must land before spending `required_amount`.
///
/// Pure comparison; fetching the allowance and sending the approval belong to the caller.
pub fn needs_approval(current_allowance: U256, required_amount: U256) -> bool {
    current_allowance < required_amount
}
