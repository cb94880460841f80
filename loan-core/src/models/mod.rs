mod event;
mod loan;
mod request;

pub use self::event::{ChainEvent, EventKey, EventRecord, LoanEvent};
pub use self::loan::{Loan, TransferKind};
pub use self::request::Request;

use ethcontract::{Address, H160, U256};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The reserved all-zero address. Transfers from it mint a loan token and
/// transfers to it burn one.
pub const NULL_ADDRESS: Address = H160([0u8; 20]);

/// Block timestamps and contract time fields, in seconds.
pub type Timestamp = u64;

/// The on-chain request id. Doubles as the token id of the loan minted for
/// the request so requests and loans share one id space.
///
/// Formatted as a decimal string everywhere since it can exceed what fits
/// into a 64 bit integer.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RequestId(pub U256);

impl RequestId {
    /// Returns the partition this id gets routed to out of `partitions`.
    pub fn partition(&self, partitions: usize) -> usize {
        (self.0 % U256::from(partitions)).low_u64() as usize
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId(id.into())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for RequestId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        U256::from_dec_str(s)
            .map(RequestId)
            .map_err(|err| anyhow::anyhow!("invalid request id '{}': {:?}", s, err))
    }
}

impl Serialize for RequestId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
