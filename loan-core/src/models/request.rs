use super::{RequestId, Timestamp};
use crate::request_state::RequestState;
use crate::serialization::u256_decimal;
use ethcontract::{Address, U256};
use serde::{Deserialize, Serialize};

/// A borrower's request for a loan, indexed from its creation event.
///
/// Everything except `canceled_at` is fixed once the request is created.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: RequestId,
    pub debtor: Address,
    pub created_at_block: u64,
    pub canceled_at: Option<Timestamp>,
    #[serde(with = "u256_decimal")]
    pub default_threshold: U256,
    pub metadata: String,
    /// The original debt of the request at creation time.
    #[serde(with = "u256_decimal")]
    pub amount: U256,
}

impl Request {
    /// Creates the request, snapshotting the contract parameters that are not
    /// part of the creation event.
    pub fn create(
        id: RequestId,
        debtor: Address,
        metadata: String,
        block_number: u64,
        contract: &RequestState,
    ) -> Self {
        Request {
            id,
            debtor,
            created_at_block: block_number,
            canceled_at: None,
            default_threshold: contract.default_threshold,
            metadata,
            amount: contract.original_debt,
        }
    }

    /// Marks the request canceled. Only the first cancellation is kept.
    ///
    /// Returns whether the request changed.
    pub fn cancel(&mut self, timestamp: Timestamp) -> bool {
        if self.canceled_at.is_some() {
            return false;
        }
        self.canceled_at = Some(timestamp);
        true
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request {
        let contract = RequestState {
            default_threshold: 30.into(),
            original_debt: 1000.into(),
            ..Default::default()
        };
        Request::create(
            7.into(),
            Address::from_low_u64_be(1),
            "ipfs://meta".to_string(),
            42,
            &contract,
        )
    }

    #[test]
    fn create_snapshots_contract_fields() {
        let request = request();
        assert_eq!(request.created_at_block, 42);
        assert_eq!(request.default_threshold, 30.into());
        assert_eq!(request.amount, 1000.into());
        assert_eq!(request.metadata, "ipfs://meta");
        assert!(!request.is_canceled());
    }

    #[test]
    fn cancel_keeps_first_timestamp() {
        let mut request = request();
        assert!(request.cancel(100));
        assert!(!request.cancel(200));
        assert_eq!(request.canceled_at, Some(100));
    }

    #[test]
    fn serializes_camel_case_with_decimal_amounts() {
        let json = serde_json::to_value(&request()).unwrap();
        assert_eq!(json["id"], "7");
        assert_eq!(json["createdAtBlock"], 42);
        assert_eq!(json["defaultThreshold"], "30");
        assert_eq!(json["canceledAt"], serde_json::Value::Null);
    }
}
