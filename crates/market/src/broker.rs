//! Wallet abstraction the market settles against.

use rust_decimal::Decimal;
use std::collections::HashMap;
use univ3_backtest_domain::{BacktestError, TokenInfo};

/// Per-token asset ledger.
///
/// The market never holds funds itself; every add, remove, collect, and
/// trade settles through this trait, so several markets can share one
/// wallet.
pub trait AssetLedger {
    /// Current balance of `token`, zero when the token is unknown.
    fn balance(&self, token: &TokenInfo) -> Decimal;

    /// Credits `amount` of `token` and returns the new balance.
    fn deposit(&mut self, token: &TokenInfo, amount: Decimal) -> Result<Decimal, BacktestError>;

    /// Debits `amount` of `token` and returns the new balance. Fails
    /// without mutating when the balance would go negative.
    fn withdraw(&mut self, token: &TokenInfo, amount: Decimal) -> Result<Decimal, BacktestError>;
}

/// In-memory wallet used for backtests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    balances: HashMap<TokenInfo, Decimal>,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the balance of `token`, creating the entry if needed.
    pub fn set_balance(&mut self, token: &TokenInfo, amount: Decimal) {
        self.balances.insert(token.clone(), amount);
    }
}

impl AssetLedger for InMemoryBroker {
    fn balance(&self, token: &TokenInfo) -> Decimal {
        self.balances.get(token).copied().unwrap_or(Decimal::ZERO)
    }

    fn deposit(&mut self, token: &TokenInfo, amount: Decimal) -> Result<Decimal, BacktestError> {
        if amount.is_sign_negative() {
            return Err(BacktestError::InvalidInput {
                what: "deposit amount",
                value: amount.to_string(),
            });
        }
        let entry = self.balances.entry(token.clone()).or_insert(Decimal::ZERO);
        *entry += amount;
        Ok(*entry)
    }

    fn withdraw(&mut self, token: &TokenInfo, amount: Decimal) -> Result<Decimal, BacktestError> {
        if amount.is_sign_negative() {
            return Err(BacktestError::InvalidInput {
                what: "withdraw amount",
                value: amount.to_string(),
            });
        }
        let have = self.balance(token);
        if have < amount {
            return Err(BacktestError::InsufficientBalance {
                token: token.name.clone(),
                have: have.to_string(),
                need: amount.to_string(),
            });
        }
        let entry = self.balances.entry(token.clone()).or_insert(Decimal::ZERO);
        *entry -= amount;
        Ok(*entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn deposit_withdraw_cycle() {
        let usdc = TokenInfo::new("USDC", 6);
        let mut broker = InMemoryBroker::new();
        assert_eq!(broker.balance(&usdc), Decimal::ZERO);
        broker.deposit(&usdc, dec!(100)).unwrap();
        broker.withdraw(&usdc, dec!(40)).unwrap();
        assert_eq!(broker.balance(&usdc), dec!(60));
    }

    #[test]
    fn overdraft_rejected_without_mutation() {
        let usdc = TokenInfo::new("USDC", 6);
        let mut broker = InMemoryBroker::new();
        broker.set_balance(&usdc, dec!(10));
        assert!(broker.withdraw(&usdc, dec!(11)).is_err());
        assert_eq!(broker.balance(&usdc), dec!(10));
    }

    #[test]
    fn negative_amounts_rejected() {
        let usdc = TokenInfo::new("USDC", 6);
        let mut broker = InMemoryBroker::new();
        assert!(broker.deposit(&usdc, dec!(-1)).is_err());
        assert!(broker.withdraw(&usdc, dec!(-1)).is_err());
    }
}
