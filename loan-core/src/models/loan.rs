use super::{RequestId, Timestamp, NULL_ADDRESS};
use crate::request_state::RequestState;
use crate::serialization::u256_decimal;
use ethcontract::{Address, U256};
use serde::{Deserialize, Serialize};

/// A funded request. The loan is an NFT so it is created by a mint transfer,
/// changes creditor on every ordinary transfer and is destroyed by a burn
/// transfer or by being forgiven.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: RequestId,
    pub request: RequestId,
    pub creditor: Address,
    pub funded_at: Timestamp,
    pub last_updated_at: Timestamp,
    #[serde(with = "u256_decimal")]
    pub fee_rate: U256,
    #[serde(with = "u256_decimal")]
    pub original_debt: U256,
    #[serde(with = "u256_decimal")]
    pub total_debt: U256,
    #[serde(with = "u256_decimal")]
    pub repaid_amount: U256,
    pub destroyed_at: Option<Timestamp>,
}

impl Loan {
    /// Creates the loan for a funded request. All loan economics come from the
    /// contract, the mint event itself only tells us that funding happened.
    pub fn fund(id: RequestId, contract: &RequestState) -> Self {
        Loan {
            id,
            request: id,
            creditor: contract.creditor,
            funded_at: contract.funded_at,
            last_updated_at: contract.last_updated_at,
            fee_rate: contract.fee_rate,
            original_debt: contract.original_debt,
            total_debt: contract.total_debt,
            repaid_amount: U256::zero(),
            destroyed_at: None,
        }
    }

    pub fn transfer_to(&mut self, creditor: Address) {
        self.creditor = creditor;
    }

    /// Marks the loan destroyed. Only the first destruction is kept.
    ///
    /// Returns whether the loan changed.
    pub fn destroy(&mut self, timestamp: Timestamp) -> bool {
        if self.destroyed_at.is_some() {
            return false;
        }
        self.destroyed_at = Some(timestamp);
        true
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed_at.is_some()
    }

    /// Adds a repayment and refreshes the debt from the contract.
    ///
    /// The contract skips interest updates within its minimum period so the
    /// debt can not be derived from the repayment alone. A zero
    /// `last_updated_at` means the contract already deleted the loan, in which
    /// case the repayment time is used instead.
    pub fn record_repayment(
        &mut self,
        amount: U256,
        contract: &RequestState,
        timestamp: Timestamp,
    ) {
        self.repaid_amount = self.repaid_amount.saturating_add(amount);
        self.original_debt = contract.original_debt;
        self.total_debt = contract.total_debt;
        self.last_updated_at = match contract.last_updated_at {
            0 => timestamp,
            last_updated_at => last_updated_at,
        };
    }
}

/// The three things a loan token transfer can mean.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferKind {
    Mint,
    Burn,
    Ordinary,
}

impl TransferKind {
    /// Classifies a transfer. `from` is checked before `to`, so a transfer
    /// between two null addresses is a mint. The second value flags that case.
    pub fn classify(from: Address, to: Address) -> (Self, bool) {
        if from == NULL_ADDRESS {
            (TransferKind::Mint, to == NULL_ADDRESS)
        } else if to == NULL_ADDRESS {
            (TransferKind::Burn, false)
        } else {
            (TransferKind::Ordinary, false)
        }
    }
}
