use crate::models::{EventKey, RequestId};
use crate::store::EntityKind;
use thiserror::Error;

/// Failures that prevented an event from being applied. Nothing was written
/// for the event so it can be retried as is.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read contract state of request {id} at block {block_number}")]
    ContractRead {
        id: RequestId,
        block_number: u64,
        #[source]
        source: anyhow::Error,
    },
    #[error("entity store failure")]
    Store(#[source] anyhow::Error),
}

/// Events that do not fit the entity state. These are skipped or resolved
/// and reported but never fail the event.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Anomaly {
    #[error("no {kind} with id {id}")]
    MissingAggregate { kind: EntityKind, id: RequestId },
    #[error("{kind} with id {id} already exists")]
    DuplicateCreation { kind: EntityKind, id: RequestId },
    #[error("transfer of token {id} from and to the null address treated as mint")]
    AmbiguousTransfer { id: RequestId },
    #[error("event {key} has already been applied")]
    Redelivered { key: EventKey },
}

impl Anomaly {
    /// Whether the event was still applied despite the anomaly.
    pub fn is_applied(&self) -> bool {
        matches!(self, Anomaly::AmbiguousTransfer { .. })
    }
}
