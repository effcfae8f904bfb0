use crate::errors::ReadError;
use alloy::primitives::{
    Address,
    U256,
};
use chrono::{
    DateTime,
    Utc,
};
use generated_abi::{
    DEPOSIT_UNITS,
    one_unit,
};
use std::fmt;

/// Fixed-point token amount: `raw / 10^decimals` whole tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TokenAmount {
    raw: U256,
    decimals: u8,
}

impl TokenAmount {
    pub fn new(raw: U256, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    pub fn zero(decimals: u8) -> Self {
        Self::new(U256::ZERO, decimals)
    }

    pub fn from_units(units: u64, decimals: u8) -> Self {
        Self::new(U256::from(units).saturating_mul(one_unit(decimals)), decimals)
    }

    pub fn raw(&self) -> U256 {
        self.raw
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn is_at_least_units(&self, units: u64) -> bool {
        self.raw >= U256::from(units).saturating_mul(one_unit(self.decimals))
    }

    /// Whether this amount pays for one deposit.
    pub fn covers_deposit(&self) -> bool {
        self.is_at_least_units(DEPOSIT_UNITS)
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = one_unit(self.decimals);
        let whole = self.raw / unit;
        let fractional = self.raw % unit;
        if fractional.is_zero() {
            return write!(f, "{whole}");
        }
        let digits = format!(
            "{:0>width$}",
            fractional.to_string(),
            width = self.decimals as usize
        );
        write!(f, "{whole}.{}", digits.trim_end_matches('0'))
    }
}

/// Per-field outcome of one batched read; `None` marks a failed call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartialRead {
    pub account: Option<Address>,
    pub total_deposited: Option<U256>,
    pub remaining_time_secs: Option<u64>,
    pub game_end_timestamp: Option<u64>,
    pub current_leader: Option<Address>,
    pub contract_balance: Option<U256>,
    pub user_allowance: Option<U256>,
    pub user_balance: Option<U256>,
}

impl PartialRead {
    pub fn failed_fields(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        if self.total_deposited.is_none() {
            failed.push("totalDeposited");
        }
        if self.remaining_time_secs.is_none() {
            failed.push("getRemainingTime");
        }
        if self.game_end_timestamp.is_none() {
            failed.push("gameEndTime");
        }
        if self.current_leader.is_none() {
            failed.push("currentLeader");
        }
        if self.contract_balance.is_none() {
            failed.push("balanceOf(pot)");
        }
        if self.account.is_some() {
            if self.user_allowance.is_none() {
                failed.push("allowance");
            }
            if self.user_balance.is_none() {
                failed.push("balanceOf(account)");
            }
        }
        failed
    }

    /// The non-fatal notice to surface for this read, if any call failed.
    pub fn partial_error(&self) -> Option<ReadError> {
        let fields = self.failed_fields();
        (!fields.is_empty()).then_some(ReadError::Partial { fields })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractSnapshot {
    pub total_deposited: TokenAmount,
    /// Contract clock, never interpolated locally.
    pub remaining_time_ms: u64,
    pub game_end_timestamp: u64,
    pub current_leader: Address,
    pub contract_balance: TokenAmount,
    pub user_allowance: Option<TokenAmount>,
    pub user_balance: Option<TokenAmount>,
    /// Wallet the user fields belong to.
    pub account: Option<Address>,
    pub fetched_at: DateTime<Utc>,
}

impl ContractSnapshot {
    /// Builds the next snapshot from a read, falling back field by field to
    /// `previous` for calls that failed. User fields are only carried over
    /// when the read was for the same account.
    ///
    /// Returns `None` when a pot field failed and there is no earlier value
    /// for it; pot state is never guessed.
    pub fn merge(
        previous: Option<&ContractSnapshot>,
        read: &PartialRead,
        decimals: u8,
        fetched_at: DateTime<Utc>,
    ) -> Option<Self> {
        let amount = |raw: Option<U256>, fallback: Option<TokenAmount>| {
            raw.map(|raw| TokenAmount::new(raw, decimals)).or(fallback)
        };
        let same_account = previous.filter(|prev| {
            read.account.is_some() && prev.account == read.account
        });
        let user_amount = |raw: Option<U256>,
                           fallback: Option<TokenAmount>|
         -> Option<TokenAmount> {
            read.account?;
            raw.map(|raw| TokenAmount::new(raw, decimals)).or(fallback)
        };

        Some(Self {
            total_deposited: amount(
                read.total_deposited,
                previous.map(|p| p.total_deposited),
            )?,
            remaining_time_ms: read
                .remaining_time_secs
                .map(|secs| secs.saturating_mul(1000))
                .or(previous.map(|p| p.remaining_time_ms))?,
            game_end_timestamp: read
                .game_end_timestamp
                .or(previous.map(|p| p.game_end_timestamp))?,
            current_leader: read
                .current_leader
                .or(previous.map(|p| p.current_leader))?,
            contract_balance: amount(
                read.contract_balance,
                previous.map(|p| p.contract_balance),
            )?,
            user_allowance: user_amount(
                read.user_allowance,
                same_account.and_then(|p| p.user_allowance),
            ),
            user_balance: user_amount(
                read.user_balance,
                same_account.and_then(|p| p.user_balance),
            ),
            account: read.account,
            fetched_at,
        })
    }

    /// The zero address leader means nobody has deposited this round.
    pub fn has_deposits(&self) -> bool {
        self.current_leader != Address::ZERO
    }

    pub fn is_closed(&self) -> bool {
        self.remaining_time_ms == 0
    }

    pub fn is_leader(&self, address: Address) -> bool {
        self.has_deposits() && self.current_leader == address
    }
}
