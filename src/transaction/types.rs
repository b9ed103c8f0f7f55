/// Transaction types for HashLedger
use crate::crypto::{Address, KeyPair};
use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// Deterministic fixed-point amount. Serialized as a decimal string.
pub type Amount = I32F32;

/// Sender identity of balance-creating reward transactions.
pub const SYSTEM_SENDER: &str = "SYSTEM";

/// Default fee is `amount / DEFAULT_FEE_DIVISOR` (1%).
pub const DEFAULT_FEE_DIVISOR: i32 = 100;

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// A value transfer between two addresses.
///
/// Field order is part of the canonical block serialization; do not reorder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: Address,
    pub receiver: Address,
    pub amount: Amount,
    pub fee: Amount,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Transaction {
    /// Creates an unsigned transfer stamped with the current time and the default fee.
    pub fn new(sender: Address, receiver: Address, amount: Amount) -> Self {
        Self::with_fee(sender, receiver, amount, default_fee(amount))
    }

    pub fn with_fee(sender: Address, receiver: Address, amount: Amount, fee: Amount) -> Self {
        Transaction {
            sender,
            receiver,
            amount,
            fee,
            timestamp: now_millis(),
            signature: None,
        }
    }

    /// A reward paid out of thin air to `receiver`. Carries no signature and no fee.
    pub fn system_reward(receiver: Address, amount: Amount) -> Self {
        Transaction {
            sender: SYSTEM_SENDER.to_string(),
            receiver,
            amount,
            fee: Amount::ZERO,
            timestamp: now_millis(),
            signature: None,
        }
    }

    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }

    /// Canonical signing payload: sender, receiver, amount, fee, timestamp
    /// rendered with `Display` and concatenated without separators.
    pub fn signable_message(&self) -> Vec<u8> {
        format!(
            "{}{}{}{}{}",
            self.sender, self.receiver, self.amount, self.fee, self.timestamp
        )
        .into_bytes()
    }

    pub fn sign(&mut self, keypair: &KeyPair) {
        let signature = keypair.sign(&self.signable_message());
        self.signature = Some(hex::encode(signature));
    }

    /// Builder form of [`Transaction::sign`].
    pub fn signed(mut self, keypair: &KeyPair) -> Self {
        self.sign(keypair);
        self
    }
}

pub fn default_fee(amount: Amount) -> Amount {
    amount / Amount::from_num(DEFAULT_FEE_DIVISOR)
}
