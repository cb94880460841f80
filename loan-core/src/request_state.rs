//! Point in time reads of the loan contract's per request state.
//!
//! The events alone are not enough to index loans: funding parameters are only
//! stored in the contract and the contract rate limits its debt updates, so
//! the engine reconciles against these reads wherever the contract is the
//! authority on a field.

use crate::models::{RequestId, Timestamp};
use crate::serialization::u256_decimal;
use anyhow::{anyhow, Context, Result};
use ethcontract::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::fs::File;
use std::io::{BufReader, Read};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// The contract's `requests(id)` getter.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestState {
    #[serde(with = "u256_decimal")]
    pub default_threshold: U256,
    pub creditor: Address,
    pub funded_at: Timestamp,
    /// Zero once the contract deleted the loan.
    pub last_updated_at: Timestamp,
    #[serde(with = "u256_decimal")]
    pub fee_rate: U256,
    #[serde(with = "u256_decimal")]
    pub original_debt: U256,
    #[serde(with = "u256_decimal")]
    pub total_debt: U256,
}

#[cfg_attr(test, mockall::automock)]
pub trait RequestStateReading: Send + Sync {
    /// Reads the state of the request as of `block_number`. Reading the same
    /// id and block again must give the same result so failed events can be
    /// retried.
    fn read_request_state(&self, id: RequestId, block_number: u64) -> Result<RequestState>;
}

/// Serves reads from a recorded snapshot of the contract state.
///
/// Useful to replay a recorded event stream deterministically.
#[derive(Debug, Default)]
pub struct SnapshotRequestStateReader {
    states: HashMap<RequestId, RequestState>,
}

impl SnapshotRequestStateReader {
    pub fn new(states: HashMap<RequestId, RequestState>) -> Self {
        Self { states }
    }

    /// Reads a JSON object mapping decimal request ids to their state.
    pub fn read(reader: impl Read) -> Result<Self> {
        let states = serde_json::from_reader(reader)?;
        Ok(Self::new(states))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl RequestStateReading for SnapshotRequestStateReader {
    fn read_request_state(&self, id: RequestId, _block_number: u64) -> Result<RequestState> {
        self.states
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow!("no recorded contract state for request {}", id))
    }
}

impl TryFrom<&Path> for SnapshotRequestStateReader {
    type Error = anyhow::Error;

    fn try_from(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("couldn't open {}", path.display()))?;
        let reader = Self::read(BufReader::new(file))
            .with_context(|| format!("failed to parse request states in {}", path.display()))?;
        log::info!(
            "Loaded contract state of {} requests from {}",
            reader.len(),
            path.display()
        );
        Ok(reader)
    }
}

/// Retries failed reads of an inner reader a fixed number of times.
pub struct RetryingRequestStateReader {
    inner: Arc<dyn RequestStateReading>,
    attempts: NonZeroUsize,
    delay: Duration,
}

impl RetryingRequestStateReader {
    pub fn new(
        inner: Arc<dyn RequestStateReading>,
        attempts: NonZeroUsize,
        delay: Duration,
    ) -> Self {
        Self {
            inner,
            attempts,
            delay,
        }
    }
}

impl RequestStateReading for RetryingRequestStateReader {
    fn read_request_state(&self, id: RequestId, block_number: u64) -> Result<RequestState> {
        let attempts = self.attempts.get();
        let mut attempt = 1;
        loop {
            match self.inner.read_request_state(id, block_number) {
                Ok(state) => return Ok(state),
                Err(err) if attempt >= attempts => {
                    return Err(err.context(format!(
                        "reading request {} failed after {} attempts",
                        id, attempts
                    )))
                }
                Err(err) => {
                    log::warn!(
                        "attempt {} of reading request {} at block {} failed: {:?}",
                        attempt,
                        id,
                        block_number,
                        err
                    );
                    attempt += 1;
                    thread::sleep(self.delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use mockall::Sequence;

    #[test]
    fn snapshot_reads_decimal_keyed_json() {
        let json = r#"{
            "7": {
                "defaultThreshold": "30",
                "creditor": "0x0000000000000000000000000000000000000002",
                "fundedAt": 1000,
                "lastUpdatedAt": 1000,
                "feeRate": "5",
                "originalDebt": "100",
                "totalDebt": "100"
            }
        }"#;
        let reader = SnapshotRequestStateReader::read(json.as_bytes()).unwrap();
        assert_eq!(reader.len(), 1);
        let state = reader.read_request_state(7.into(), 0).unwrap();
        assert_eq!(state.creditor, Address::from_low_u64_be(2));
        assert_eq!(state.total_debt, 100.into());
        assert!(reader.read_request_state(8.into(), 0).is_err());
    }

    #[test]
    fn snapshot_from_map() {
        let reader = SnapshotRequestStateReader::new(hash_map! {
            RequestId::from(1) => RequestState::default(),
        });
        assert!(reader.read_request_state(1.into(), 5).is_ok());
    }

    #[test]
    fn retries_until_success() {
        let mut inner = MockRequestStateReading::new();
        let mut seq = Sequence::new();
        inner
            .expect_read_request_state()
            .with(eq(RequestId::from(3)), eq(10))
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(anyhow!("node unavailable")));
        inner
            .expect_read_request_state()
            .with(eq(RequestId::from(3)), eq(10))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(RequestState::default()));

        let reader = RetryingRequestStateReader::new(
            Arc::new(inner),
            NonZeroUsize::new(3).unwrap(),
            Duration::from_millis(0),
        );
        assert_eq!(
            reader.read_request_state(3.into(), 10).unwrap(),
            RequestState::default()
        );
    }

    #[test]
    fn gives_up_after_attempts() {
        let mut inner = MockRequestStateReading::new();
        inner
            .expect_read_request_state()
            .times(2)
            .returning(|_, _| Err(anyhow!("node unavailable")));

        let reader = RetryingRequestStateReader::new(
            Arc::new(inner),
            NonZeroUsize::new(2).unwrap(),
            Duration::from_millis(0),
        );
        let err = reader.read_request_state(3.into(), 10).unwrap_err();
        assert!(format!("{:?}", err).contains("node unavailable"));
    }
}
