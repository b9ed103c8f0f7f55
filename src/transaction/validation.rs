/// Validation logic for transactions separated from type definitions
use crate::blockchain::BalanceState;
use crate::crypto::{address_to_public_key, verify_signature};
use crate::error::ChainError;
use crate::transaction::types::{Amount, Transaction};

/// Stateless admission checks for transactions entering the mempool.
pub struct TransactionValidator;

impl TransactionValidator {
    /// Checks funds first, then the signature.
    ///
    /// The order matters: an over-spending transaction with a bad signature is
    /// reported as insufficient funds.
    pub fn validate(tx: &Transaction, balances: &BalanceState) -> Result<(), ChainError> {
        if tx.amount < Amount::ZERO {
            return Err(ChainError::InvalidTransaction(
                "Amount cannot be negative".to_string(),
            ));
        }
        if tx.fee < Amount::ZERO {
            return Err(ChainError::InvalidTransaction(
                "Fee cannot be negative".to_string(),
            ));
        }

        let available = balances.get_balance(&tx.sender);
        if available < tx.amount {
            return Err(ChainError::InvalidTransaction(format!(
                "Insufficient funds: {} has {} but tried to send {}",
                tx.sender, available, tx.amount
            )));
        }

        Self::validate_signature(tx)
    }

    pub fn is_valid(tx: &Transaction, balances: &BalanceState) -> bool {
        Self::validate(tx, balances).is_ok()
    }

    /// Verifies `tx.signature` against the sender interpreted as a public key.
    pub fn validate_signature(tx: &Transaction) -> Result<(), ChainError> {
        let signature = tx.signature.as_deref().ok_or_else(|| {
            ChainError::InvalidTransaction("Transaction not signed".to_string())
        })?;
        let signature = hex::decode(signature).map_err(|e| {
            ChainError::InvalidTransaction(format!("Signature is not valid hex: {}", e))
        })?;
        let public_key = address_to_public_key(&tx.sender)
            .map_err(|e| ChainError::InvalidTransaction(format!("Bad sender address: {}", e)))?;

        verify_signature(&public_key, &tx.signable_message(), &signature)
            .map_err(|e| ChainError::InvalidTransaction(format!("Bad signature: {}", e)))
    }
}
