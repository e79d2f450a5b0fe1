//! Transfer actions as data, validated once at construction

use crate::amount::{is_positive_decimal, BPS_DENOMINATOR};
use crate::error::ValidationError;

use ethers::types::Address;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

lazy_static! {
    static ref ADDRESS_RE: Regex = Regex::new(r"^0x[0-9a-fA-F]{40}$").unwrap();
}

/// The four supported operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Pool token -> LP token on the hub
    Convert,
    /// LP token -> pool token on the hub
    Redeem,
    /// External chain -> hub
    Deposit,
    /// Hub -> external chain
    Withdraw,
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Convert => "convert",
            ActionKind::Redeem => "redeem",
            ActionKind::Deposit => "deposit",
            ActionKind::Withdraw => "withdraw",
        }
    }

    /// Whether settlement needs a second leg on another chain
    pub fn is_cross_chain(&self) -> bool {
        matches!(self, ActionKind::Deposit | ActionKind::Withdraw)
    }

    fn targets_token(&self) -> bool {
        matches!(self, ActionKind::Convert | ActionKind::Redeem)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActionKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "convert" => Ok(ActionKind::Convert),
            "redeem" => Ok(ActionKind::Redeem),
            "deposit" => Ok(ActionKind::Deposit),
            "withdraw" => Ok(ActionKind::Withdraw),
            other => Err(ValidationError::new(
                "kind",
                format!("unknown action {:?}", other),
            )),
        }
    }
}

/// Target token symbol (Convert/Redeem) or target chain id (Deposit/Withdraw)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Token(String),
    Chain(u64),
}

/// A transfer request as entered by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferAction {
    pub kind: ActionKind,
    pub origin_chain: u64,
    pub source_token: String,
    pub destination: Option<Destination>,
    /// Decimal string in whole-token units
    pub amount: String,
    pub recipient: String,
    pub slippage_bps: u32,
    /// Share of a withdrawal swapped for destination gas. Withdrawals only.
    pub gas_reserve_bps: Option<u32>,
}

impl TransferAction {
    pub fn convert(
        hub_chain: u64,
        source_token: impl Into<String>,
        target_token: impl Into<String>,
        amount: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        Self::new(
            ActionKind::Convert,
            hub_chain,
            source_token.into(),
            Destination::Token(target_token.into()),
            amount.into(),
            recipient.into(),
        )
    }

    pub fn redeem(
        hub_chain: u64,
        source_token: impl Into<String>,
        target_token: impl Into<String>,
        amount: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        Self::new(
            ActionKind::Redeem,
            hub_chain,
            source_token.into(),
            Destination::Token(target_token.into()),
            amount.into(),
            recipient.into(),
        )
    }

    pub fn deposit(
        origin_chain: u64,
        source_token: impl Into<String>,
        hub_chain: u64,
        amount: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        Self::new(
            ActionKind::Deposit,
            origin_chain,
            source_token.into(),
            Destination::Chain(hub_chain),
            amount.into(),
            recipient.into(),
        )
    }

    pub fn withdraw(
        hub_chain: u64,
        source_token: impl Into<String>,
        target_chain: u64,
        amount: impl Into<String>,
        recipient: impl Into<String>,
        gas_reserve_bps: u32,
    ) -> Self {
        let mut action = Self::new(
            ActionKind::Withdraw,
            hub_chain,
            source_token.into(),
            Destination::Chain(target_chain),
            amount.into(),
            recipient.into(),
        );
        action.gas_reserve_bps = Some(gas_reserve_bps);
        action
    }

    fn new(
        kind: ActionKind,
        origin_chain: u64,
        source_token: String,
        destination: Destination,
        amount: String,
        recipient: String,
    ) -> Self {
        Self {
            kind,
            origin_chain,
            source_token,
            destination: Some(destination),
            amount,
            recipient,
            slippage_bps: 0,
            gas_reserve_bps: None,
        }
    }

    pub fn with_slippage_bps(mut self, slippage_bps: u32) -> Self {
        self.slippage_bps = slippage_bps;
        self
    }

    /// Check the request and freeze it. Reports the first violated rule only.
    pub fn validate(self) -> Result<ValidAction, ValidationError> {
        if self.source_token.trim().is_empty() {
            return Err(ValidationError::new("source_token", "no token selected"));
        }

        is_positive_decimal(&self.amount).map_err(|reason| ValidationError::new("amount", reason))?;

        let destination = self
            .destination
            .ok_or_else(|| ValidationError::new("destination", "no destination selected"))?;

        match (&destination, self.kind.targets_token()) {
            (Destination::Token(symbol), true) => {
                if symbol.trim().is_empty() {
                    return Err(ValidationError::new("destination", "no target token selected"));
                }
                if self.kind == ActionKind::Redeem && symbol.eq_ignore_ascii_case(&self.source_token) {
                    return Err(ValidationError::new(
                        "destination",
                        "target token must differ from the source token",
                    ));
                }
            }
            (Destination::Chain(chain_id), false) => {
                if self.kind == ActionKind::Withdraw && *chain_id == self.origin_chain {
                    return Err(ValidationError::new(
                        "destination",
                        "target chain must differ from the origin chain",
                    ));
                }
            }
            (Destination::Chain(_), true) => {
                return Err(ValidationError::new(
                    "destination",
                    format!("{} expects a target token, not a chain", self.kind),
                ));
            }
            (Destination::Token(_), false) => {
                return Err(ValidationError::new(
                    "destination",
                    format!("{} expects a target chain, not a token", self.kind),
                ));
            }
        }

        let recipient = parse_address(&self.recipient)
            .map_err(|reason| ValidationError::new("recipient", reason))?;

        if self.slippage_bps >= BPS_DENOMINATOR {
            return Err(ValidationError::new(
                "slippage_bps",
                format!("{} is outside [0, {})", self.slippage_bps, BPS_DENOMINATOR),
            ));
        }

        let gas_reserve_bps = match (self.kind, self.gas_reserve_bps) {
            (ActionKind::Withdraw, Some(bps)) if bps < BPS_DENOMINATOR => bps,
            (ActionKind::Withdraw, Some(bps)) => {
                return Err(ValidationError::new(
                    "gas_reserve_bps",
                    format!("{} leaves nothing to withdraw", bps),
                ));
            }
            (ActionKind::Withdraw, None) => {
                return Err(ValidationError::new(
                    "gas_reserve_bps",
                    "withdrawals need a gas reserve",
                ));
            }
            (_, Some(_)) => {
                return Err(ValidationError::new(
                    "gas_reserve_bps",
                    "only withdrawals carry a gas reserve",
                ));
            }
            (_, None) => 0,
        };

        Ok(ValidAction {
            kind: self.kind,
            origin_chain: self.origin_chain,
            source_token: self.source_token.trim().to_string(),
            destination,
            amount: self.amount,
            recipient,
            slippage_bps: self.slippage_bps,
            gas_reserve_bps,
        })
    }
}

/// Check the `0x` + 40 hex digit form, and the EIP-55 checksum when the input is mixed-case
pub fn parse_address(input: &str) -> Result<Address, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("no address given".to_string());
    }
    if !ADDRESS_RE.is_match(input) {
        return Err(format!("{:?} is not a 20-byte hex address", input));
    }

    let address = Address::from_str(input).map_err(|e| e.to_string())?;

    let hex_digits = &input[2..];
    let mixed_case = hex_digits.bytes().any(|b| b.is_ascii_lowercase())
        && hex_digits.bytes().any(|b| b.is_ascii_uppercase());
    if mixed_case && ethers::utils::to_checksum(&address, None) != input {
        return Err(format!("{:?} has a bad checksum", input));
    }

    Ok(address)
}

/// A request that passed validation. Only `TransferAction::validate` builds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidAction {
    kind: ActionKind,
    origin_chain: u64,
    source_token: String,
    destination: Destination,
    amount: String,
    recipient: Address,
    slippage_bps: u32,
    gas_reserve_bps: u32,
}

impl ValidAction {
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn origin_chain(&self) -> u64 {
        self.origin_chain
    }

    pub fn source_token(&self) -> &str {
        &self.source_token
    }

    pub fn target_token(&self) -> Option<&str> {
        match &self.destination {
            Destination::Token(symbol) => Some(symbol),
            Destination::Chain(_) => None,
        }
    }

    pub fn target_chain(&self) -> Option<u64> {
        match self.destination {
            Destination::Chain(chain_id) => Some(chain_id),
            Destination::Token(_) => None,
        }
    }

    pub fn amount(&self) -> &str {
        &self.amount
    }

    pub fn recipient(&self) -> Address {
        self.recipient
    }

    pub fn slippage_bps(&self) -> u32 {
        self.slippage_bps
    }

    /// Zero for everything but withdrawals
    pub fn gas_reserve_bps(&self) -> u32 {
        self.gas_reserve_bps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECIPIENT: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    fn field_of(action: TransferAction) -> &'static str {
        action.validate().unwrap_err().field
    }

    #[test]
    fn test_valid_convert() {
        let action = TransferAction::convert(7000, "USDC.ARB", "USDC.4", "100", RECIPIENT)
            .with_slippage_bps(50)
            .validate()
            .unwrap();

        assert_eq!(action.kind(), ActionKind::Convert);
        assert_eq!(action.target_token(), Some("USDC.4"));
        assert_eq!(action.target_chain(), None);
        assert_eq!(action.gas_reserve_bps(), 0);
        assert_eq!(action.recipient(), RECIPIENT.parse::<Address>().unwrap());
    }

    #[test]
    fn test_valid_withdraw() {
        let action = TransferAction::withdraw(7000, "USDC.4", 8453, "25.5", RECIPIENT, 1_000)
            .with_slippage_bps(500)
            .validate()
            .unwrap();
        assert_eq!(action.target_chain(), Some(8453));
        assert_eq!(action.gas_reserve_bps(), 1_000);
    }

    #[test]
    fn test_amount_rules() {
        for amount in ["", "0", "0.0", "-5", "abc", "1e3"] {
            let action = TransferAction::deposit(42161, "USDC", 7000, amount, RECIPIENT);
            assert_eq!(field_of(action), "amount", "{:?}", amount);
        }
    }

    #[test]
    fn test_first_violation_wins() {
        // bad amount and bad recipient: amount is checked first
        let action = TransferAction::deposit(42161, "USDC", 7000, "0", "nope");
        assert_eq!(field_of(action), "amount");

        let action = TransferAction::deposit(42161, "", 7000, "0", "nope");
        assert_eq!(field_of(action), "source_token");
    }

    #[test]
    fn test_recipient_rules() {
        let cases = [
            "",
            "0x123",
            "5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0xZZAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            // one character's case flipped
            "0x5AAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
        ];
        for recipient in cases {
            let action = TransferAction::deposit(42161, "USDC", 7000, "1", recipient);
            assert_eq!(field_of(action), "recipient", "{:?}", recipient);
        }

        // single-case input carries no checksum
        let lower = RECIPIENT.to_lowercase();
        assert!(TransferAction::deposit(42161, "USDC", 7000, "1", lower).validate().is_ok());
    }

    #[test]
    fn test_destination_rules() {
        let mut missing = TransferAction::convert(7000, "USDC.ARB", "USDC.4", "1", RECIPIENT);
        missing.destination = None;
        assert_eq!(field_of(missing), "destination");

        let same = TransferAction::redeem(7000, "USDC.4", "usdc.4", "1", RECIPIENT);
        assert_eq!(field_of(same), "destination");

        let same_chain = TransferAction::withdraw(7000, "USDC.4", 7000, "1", RECIPIENT, 1_000);
        assert_eq!(field_of(same_chain), "destination");

        let mut wrong_variant = TransferAction::deposit(42161, "USDC", 7000, "1", RECIPIENT);
        wrong_variant.destination = Some(Destination::Token("USDC.4".to_string()));
        let err = wrong_variant.validate().unwrap_err();
        assert_eq!(err.field, "destination");
        assert!(err.reason.contains("expects a target chain"));
    }

    #[test]
    fn test_slippage_and_gas_reserve_rules() {
        let action = TransferAction::convert(7000, "USDC.ARB", "USDC.4", "1", RECIPIENT)
            .with_slippage_bps(10_000);
        assert_eq!(field_of(action), "slippage_bps");

        let mut no_reserve = TransferAction::withdraw(7000, "USDC.4", 8453, "1", RECIPIENT, 0);
        no_reserve.gas_reserve_bps = None;
        assert_eq!(field_of(no_reserve), "gas_reserve_bps");

        let everything = TransferAction::withdraw(7000, "USDC.4", 8453, "1", RECIPIENT, 10_000);
        assert_eq!(field_of(everything), "gas_reserve_bps");

        let mut stray = TransferAction::deposit(42161, "USDC", 7000, "1", RECIPIENT);
        stray.gas_reserve_bps = Some(100);
        assert_eq!(field_of(stray), "gas_reserve_bps");
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Withdraw".parse::<ActionKind>().unwrap(), ActionKind::Withdraw);
        assert!("bridge".parse::<ActionKind>().is_err());
        assert!(ActionKind::Deposit.is_cross_chain());
        assert!(!ActionKind::Redeem.is_cross_chain());
    }
}
