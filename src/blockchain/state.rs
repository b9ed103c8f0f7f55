use crate::crypto::Address;
use crate::error::ChainError;
use crate::transaction::{Amount, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::block::Block;

/// Address -> balance map. Derived state: only block confirmation mutates it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceState {
    pub address_balances: HashMap<Address, Amount>,
}

impl BalanceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_allocations(allocations: &HashMap<Address, Amount>) -> Self {
        Self {
            address_balances: allocations.clone(),
        }
    }

    /// Recomputes balances from scratch: allocations first, then every block in order.
    pub fn rebuild<'a>(
        allocations: &HashMap<Address, Amount>,
        blocks: impl IntoIterator<Item = &'a Block>,
    ) -> Result<Self, ChainError> {
        let mut state = Self::from_allocations(allocations);
        for block in blocks {
            state.apply_block(block)?;
        }
        Ok(state)
    }

    pub fn get_balance(&self, address: &str) -> Amount {
        self.address_balances
            .get(address)
            .copied()
            .unwrap_or(Amount::ZERO)
    }

    /// Final balance of every address `transactions` touch, applied in order
    /// on top of the current state. Nothing is written.
    fn project<'a>(
        &self,
        transactions: impl IntoIterator<Item = &'a Transaction>,
    ) -> Result<HashMap<&'a str, Amount>, ChainError> {
        let mut touched: HashMap<&'a str, Amount> = HashMap::new();
        for tx in transactions {
            if !tx.is_system() {
                let balance = touched
                    .get(tx.sender.as_str())
                    .copied()
                    .unwrap_or_else(|| self.get_balance(&tx.sender));
                let debited = balance.checked_sub(tx.amount).ok_or_else(|| overflow(tx))?;
                touched.insert(tx.sender.as_str(), debited);
            }
            let balance = touched
                .get(tx.receiver.as_str())
                .copied()
                .unwrap_or_else(|| self.get_balance(&tx.receiver));
            let credited = balance.checked_add(tx.amount).ok_or_else(|| overflow(tx))?;
            touched.insert(tx.receiver.as_str(), credited);
        }
        Ok(touched)
    }

    /// Fails if applying `transactions` in order would overflow any balance.
    pub fn check_transactions<'a>(
        &self,
        transactions: impl IntoIterator<Item = &'a Transaction>,
    ) -> Result<(), ChainError> {
        self.project(transactions).map(|_| ())
    }

    /// Debits senders (except the system sentinel) and credits receivers.
    /// All-or-nothing: on overflow the state is left untouched.
    pub fn apply_transactions<'a>(
        &mut self,
        transactions: impl IntoIterator<Item = &'a Transaction>,
    ) -> Result<(), ChainError> {
        let touched = self.project(transactions)?;
        for (address, balance) in touched {
            if balance < Amount::ZERO {
                tracing::warn!(address = %address, balance = %balance, "balance went negative");
            }
            self.address_balances.insert(address.to_string(), balance);
        }
        Ok(())
    }

    pub fn apply_transaction(&mut self, tx: &Transaction) -> Result<(), ChainError> {
        self.apply_transactions(std::iter::once(tx))
    }

    pub fn apply_block(&mut self, block: &Block) -> Result<(), ChainError> {
        self.apply_transactions(block.transactions())
    }

    pub fn len(&self) -> usize {
        self.address_balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.address_balances.is_empty()
    }
}

fn overflow(tx: &Transaction) -> ChainError {
    ChainError::InvalidBlock(format!(
        "Balance overflow applying {} from {} to {}",
        tx.amount, tx.sender, tx.receiver
    ))
}
