use super::{RequestId, Timestamp};
use crate::serialization::u256_decimal;
use ethcontract::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The events emitted by the loan contract that the engine consumes.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum LoanEvent {
    #[serde(rename_all = "camelCase")]
    Approval {
        owner: Address,
        approved: Address,
        token_id: RequestId,
    },
    #[serde(rename_all = "camelCase")]
    ApprovalForAll {
        owner: Address,
        operator: Address,
        approved: bool,
    },
    #[serde(rename_all = "camelCase")]
    RequestCreation {
        request_id: RequestId,
        debtor: Address,
        request_metadata: String,
    },
    #[serde(rename_all = "camelCase")]
    RequestCanceled {
        request_id: RequestId,
    },
    #[serde(rename_all = "camelCase")]
    Transfer {
        from: Address,
        to: Address,
        token_id: RequestId,
    },
    #[serde(rename_all = "camelCase")]
    LoanRepayment {
        request_id: RequestId,
        #[serde(with = "u256_decimal")]
        repaid_amount: U256,
        #[serde(with = "u256_decimal")]
        pending_debt: U256,
    },
    #[serde(rename_all = "camelCase")]
    LoanForgiven {
        request_id: RequestId,
        #[serde(with = "u256_decimal")]
        pending_debt: U256,
    },
}

impl LoanEvent {
    /// The request or token id whose events have to be applied in order with
    /// this one. Operator approvals are not tied to a single token.
    pub fn subject(&self) -> Option<RequestId> {
        match self {
            LoanEvent::Approval { token_id, .. } | LoanEvent::Transfer { token_id, .. } => {
                Some(*token_id)
            }
            LoanEvent::RequestCreation { request_id, .. }
            | LoanEvent::RequestCanceled { request_id }
            | LoanEvent::LoanRepayment { request_id, .. }
            | LoanEvent::LoanForgiven { request_id, .. } => Some(*request_id),
            LoanEvent::ApprovalForAll { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LoanEvent::Approval { .. } => "Approval",
            LoanEvent::ApprovalForAll { .. } => "ApprovalForAll",
            LoanEvent::RequestCreation { .. } => "RequestCreation",
            LoanEvent::RequestCanceled { .. } => "RequestCanceled",
            LoanEvent::Transfer { .. } => "Transfer",
            LoanEvent::LoanRepayment { .. } => "LoanRepayment",
            LoanEvent::LoanForgiven { .. } => "LoanForgiven",
        }
    }
}

/// A decoded contract event together with where it was emitted.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEvent {
    pub block_number: u64,
    pub block_timestamp: Timestamp,
    pub transaction_hash: H256,
    pub log_index: u64,
    pub event: LoanEvent,
}

impl ChainEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            transaction_hash: self.transaction_hash,
            log_index: self.log_index,
        }
    }
}

/// Uniquely identifies an event log. Used to recognize re-delivered events.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventKey {
    pub transaction_hash: H256,
    pub log_index: u64,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}-{}", self.transaction_hash, self.log_index)
    }
}

/// The immutable record of an applied event.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,
    pub block_number: u64,
    pub block_timestamp: Timestamp,
    pub transaction_hash: H256,
    pub event: LoanEvent,
}

impl From<&ChainEvent> for EventRecord {
    fn from(event: &ChainEvent) -> Self {
        EventRecord {
            id: event.key().to_string(),
            block_number: event.block_number,
            block_timestamp: event.block_timestamp,
            transaction_hash: event.transaction_hash,
            event: event.event.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_event() {
        let json = r#"{
            "blockNumber": 12,
            "blockTimestamp": 1600000000,
            "transactionHash": "0x0000000000000000000000000000000000000000000000000000000000000abc",
            "logIndex": 3,
            "event": {
                "LoanRepayment": {
                    "requestId": "7",
                    "repaidAmount": "1000000000000000000",
                    "pendingDebt": "0"
                }
            }
        }"#;
        let event: ChainEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.block_number, 12);
        assert_eq!(
            event.event,
            LoanEvent::LoanRepayment {
                request_id: 7.into(),
                repaid_amount: U256::exp10(18),
                pending_debt: U256::zero(),
            }
        );
        assert_eq!(event.event.subject(), Some(7.into()));
        assert_eq!(
            event.key().to_string(),
            "0x0000000000000000000000000000000000000000000000000000000000000abc-3"
        );
    }

    #[test]
    fn operator_approval_has_no_subject() {
        let event = LoanEvent::ApprovalForAll {
            owner: Address::from_low_u64_be(1),
            operator: Address::from_low_u64_be(2),
            approved: true,
        };
        assert_eq!(event.subject(), None);
        assert_eq!(event.name(), "ApprovalForAll");
    }
}
